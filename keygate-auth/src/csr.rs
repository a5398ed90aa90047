//! PKCS#10 certification requests.
//!
//! # Security
//!
//! - PEM input is limited to [`MAX_CERT_SIZE`] before any ASN.1 parsing
//! - The self-signature is only checked on demand via
//!   [`CertificationRequest::verify_signature`]; the signer always calls it

use rcgen::{CertificateParams, KeyPair};
use x509_parser::prelude::*;

use crate::cert::MAX_CERT_SIZE;
use crate::dn::parse_dn;
use crate::error::{CaError, Result};

const CSR_TAGS: [&str; 2] = ["CERTIFICATE REQUEST", "NEW CERTIFICATE REQUEST"];

/// A parsed certification request.
#[derive(Debug, Clone)]
pub struct CertificationRequest {
    pem: String,
    der: Vec<u8>,
    subject: String,
    public_key: Vec<u8>,
}

impl CertificationRequest {
    /// Build and self-sign a CSR for `key`.
    ///
    /// `subject_dn` uses the syntax accepted by [`parse_dn`]. Each entry of
    /// `subject_alt_names` becomes an IP SAN if it parses as an address and a
    /// DNS SAN otherwise.
    pub fn generate(
        subject_dn: &str,
        subject_alt_names: &[String],
        key: &KeyPair,
    ) -> Result<Self> {
        let mut params = CertificateParams::new(subject_alt_names.to_vec())
            .map_err(|e| CaError::Protocol(format!("invalid subject alternative name: {e}")))?;
        params.distinguished_name = parse_dn(subject_dn)?;

        let pem = params
            .serialize_request(key)
            .and_then(|csr| csr.pem())
            .map_err(|e| CaError::Signing(format!("failed to sign CSR: {e}")))?;

        Self::from_pem(&pem)
    }

    /// Parse a PEM-encoded CSR.
    ///
    /// # Errors
    ///
    /// Returns `CaError::Protocol` if the input is oversized, is not a CSR
    /// PEM block or does not decode as PKCS#10.
    pub fn from_pem(input: &str) -> Result<Self> {
        if input.len() > MAX_CERT_SIZE {
            return Err(CaError::Protocol(format!(
                "CSR too large: {} bytes (max {MAX_CERT_SIZE})",
                input.len()
            )));
        }

        let block = ::pem::parse(input)
            .map_err(|e| CaError::Protocol(format!("invalid CSR PEM: {e}")))?;
        if !CSR_TAGS.contains(&block.tag()) {
            return Err(CaError::Protocol(format!(
                "expected CERTIFICATE REQUEST PEM block, found '{}'",
                block.tag()
            )));
        }
        let der = block.into_contents();

        let (subject, public_key) = {
            let (_, csr) = X509CertificationRequest::from_der(&der)
                .map_err(|e| CaError::Protocol(format!("failed to parse CSR: {e}")))?;
            let info = &csr.certification_request_info;
            (info.subject.to_string(), info.subject_pki.raw.to_vec())
        };

        Ok(Self {
            pem: input.to_string(),
            der,
            subject,
            public_key,
        })
    }

    /// The PEM text as received or generated.
    #[must_use]
    pub fn pem(&self) -> &str {
        &self.pem
    }

    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// RFC 4514 rendering of the requested subject.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// DER-encoded SubjectPublicKeyInfo of the requested key.
    ///
    /// This is the message the request HMAC is computed over.
    #[must_use]
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key
    }

    /// Check that the CSR is signed by the key it carries.
    ///
    /// # Errors
    ///
    /// Returns `CaError::Security` if the proof of possession is invalid.
    pub fn verify_signature(&self) -> Result<()> {
        let (_, csr) = X509CertificationRequest::from_der(&self.der)
            .map_err(|e| CaError::Protocol(format!("failed to parse CSR: {e}")))?;
        csr.verify_signature()
            .map_err(|e| CaError::Security(format!("CSR signature invalid: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyAlgorithm;
    use rcgen::PublicKeyData;

    #[test]
    fn test_generate_carries_subject_and_key() {
        let key = KeyAlgorithm::EcdsaP256.generate().unwrap();
        let csr = CertificationRequest::generate("CN=host1,O=example", &[], &key).unwrap();

        assert!(csr.pem().starts_with("-----BEGIN CERTIFICATE REQUEST-----"));
        assert!(csr.subject().contains("CN=host1"));
        assert_eq!(csr.public_key_der(), key.subject_public_key_info().as_slice());
        csr.verify_signature().unwrap();
    }

    #[test]
    fn test_generate_for_each_algorithm() {
        for algorithm in KeyAlgorithm::ALL {
            let key = algorithm.generate().unwrap();
            let csr = CertificationRequest::generate("CN=host1", &[], &key).unwrap();
            csr.verify_signature().unwrap();
        }
    }

    #[test]
    fn test_from_pem_roundtrip() {
        let key = KeyAlgorithm::EcdsaP256.generate().unwrap();
        let csr = CertificationRequest::generate(
            "CN=web01",
            &["web01.example".to_string(), "10.0.0.7".to_string()],
            &key,
        )
        .unwrap();

        let parsed = CertificationRequest::from_pem(csr.pem()).unwrap();
        assert_eq!(parsed.der(), csr.der());
        assert_eq!(parsed.subject(), csr.subject());
    }

    #[test]
    fn test_rejects_garbage() {
        let result = CertificationRequest::from_pem("not a csr");
        assert!(matches!(result, Err(CaError::Protocol(_))));
    }

    #[test]
    fn test_rejects_wrong_pem_tag() {
        let block = ::pem::Pem::new("CERTIFICATE", vec![0x30, 0x00]);
        let result = CertificationRequest::from_pem(&::pem::encode(&block));
        assert!(matches!(result, Err(CaError::Protocol(_))));
    }

    #[test]
    fn test_rejects_oversized_input() {
        let large = "A".repeat(MAX_CERT_SIZE + 1);
        let result = CertificationRequest::from_pem(&large);
        assert!(matches!(result, Err(CaError::Protocol(_))));
    }

    #[test]
    fn test_tampered_signature_detected() {
        let key = KeyAlgorithm::EcdsaP256.generate().unwrap();
        let csr = CertificationRequest::generate("CN=host1", &[], &key).unwrap();

        // The signature BIT STRING sits at the end of the structure.
        let mut der = csr.der().to_vec();
        let last = der.len() - 1;
        der[last] ^= 0x01;
        let tampered = ::pem::encode(&::pem::Pem::new("CERTIFICATE REQUEST", der));

        let parsed = CertificationRequest::from_pem(&tampered).unwrap();
        assert!(matches!(
            parsed.verify_signature(),
            Err(CaError::Security(_))
        ));
    }
}
