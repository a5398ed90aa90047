//! Distinguished name parsing for CSR subjects.

use rcgen::{DistinguishedName, DnType, DnValue};

use crate::error::{CaError, Result};

/// Parse a comma-separated distinguished name such as `"CN=host1,O=example"`.
///
/// Supported attributes: `CN`, `O`, `OU`, `C`, `ST`, `L` (case-insensitive).
/// A literal comma inside a value is written as `\,`. Attribute order is
/// preserved.
///
/// # Errors
///
/// Returns `CaError::Protocol` for an empty name, a component without `=`,
/// an empty value or an unsupported attribute.
pub fn parse_dn(input: &str) -> Result<DistinguishedName> {
    let components = split_components(input);
    if components.iter().all(|c| c.trim().is_empty()) {
        return Err(CaError::Protocol("distinguished name is empty".to_string()));
    }

    let mut dn = DistinguishedName::new();
    for component in components {
        let component = component.trim();
        if component.is_empty() {
            continue;
        }
        let (attr, value) = component.split_once('=').ok_or_else(|| {
            CaError::Protocol(format!("malformed DN component '{component}'"))
        })?;
        let value = value.trim();
        if value.is_empty() {
            return Err(CaError::Protocol(format!(
                "empty value for DN attribute '{}'",
                attr.trim()
            )));
        }
        dn.push(dn_type(attr.trim())?, DnValue::Utf8String(value.to_string()));
    }
    Ok(dn)
}

fn dn_type(attr: &str) -> Result<DnType> {
    let ty = match attr.to_ascii_uppercase().as_str() {
        "CN" => DnType::CommonName,
        "O" => DnType::OrganizationName,
        "OU" => DnType::OrganizationalUnitName,
        "C" => DnType::CountryName,
        "ST" => DnType::StateOrProvinceName,
        "L" => DnType::LocalityName,
        _ => {
            return Err(CaError::Protocol(format!(
                "unsupported DN attribute '{attr}'"
            )))
        }
    };
    Ok(ty)
}

/// Split on unescaped commas, unescaping `\,` and `\\` in the process.
fn split_components(input: &str) -> Vec<String> {
    let mut components = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next @ (',' | '\\')) => current.push(next),
                Some(other) => {
                    current.push('\\');
                    current.push(other);
                }
                None => current.push('\\'),
            },
            ',' => components.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    components.push(current);
    components
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(dn: &DistinguishedName, ty: DnType) -> Option<String> {
        match dn.get(&ty)? {
            DnValue::Utf8String(s) => Some(s.clone()),
            _ => None,
        }
    }

    #[test]
    fn test_single_common_name() {
        let dn = parse_dn("CN=host1").unwrap();
        assert_eq!(value(&dn, DnType::CommonName).as_deref(), Some("host1"));
    }

    #[test]
    fn test_multiple_attributes_with_whitespace() {
        let dn = parse_dn(" CN = web01 , O=Example Corp, ou=Ops, C=US ").unwrap();
        assert_eq!(value(&dn, DnType::CommonName).as_deref(), Some("web01"));
        assert_eq!(
            value(&dn, DnType::OrganizationName).as_deref(),
            Some("Example Corp")
        );
        assert_eq!(
            value(&dn, DnType::OrganizationalUnitName).as_deref(),
            Some("Ops")
        );
        assert_eq!(value(&dn, DnType::CountryName).as_deref(), Some("US"));
    }

    #[test]
    fn test_escaped_comma_in_value() {
        let dn = parse_dn(r"CN=host1,O=Acme\, Inc.").unwrap();
        assert_eq!(
            value(&dn, DnType::OrganizationName).as_deref(),
            Some("Acme, Inc.")
        );
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert!(matches!(parse_dn(""), Err(CaError::Protocol(_))));
        assert!(matches!(parse_dn("host1"), Err(CaError::Protocol(_))));
        assert!(matches!(parse_dn("CN="), Err(CaError::Protocol(_))));
        assert!(matches!(parse_dn("XX=foo"), Err(CaError::Protocol(_))));
    }
}
