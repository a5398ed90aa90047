//! X.509 certificates and chains.
//!
//! # Security
//!
//! - Each certificate is limited to 16KB to prevent DoS
//! - The x509_parser library handles ASN.1 parsing safely
//! - Nothing here establishes trust on its own; callers decide which key a
//!   certificate must verify against

use x509_parser::prelude::*;

use crate::error::{CaError, Result};

/// Maximum certificate size (16KB is generous for a single cert)
pub const MAX_CERT_SIZE: usize = 16 * 1024;

/// Maximum number of certificates accepted in one chain.
pub const MAX_CHAIN_LEN: usize = 8;

const CERT_TAG: &str = "CERTIFICATE";

/// A DER-encoded X.509 certificate that is known to parse.
#[derive(Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
}

impl Certificate {
    /// Wrap a DER certificate after checking that it parses.
    ///
    /// # Errors
    ///
    /// Returns `CaError::Protocol` if the input exceeds [`MAX_CERT_SIZE`] or
    /// is not an X.509 certificate.
    pub fn from_der(der: impl Into<Vec<u8>>) -> Result<Self> {
        let der = der.into();
        if der.len() > MAX_CERT_SIZE {
            return Err(CaError::Protocol(format!(
                "certificate too large: {} bytes (max {MAX_CERT_SIZE})",
                der.len()
            )));
        }
        parse(&der)?;
        Ok(Self { der })
    }

    /// Parse the first `CERTIFICATE` block of a PEM document.
    pub fn from_pem(input: &str) -> Result<Self> {
        let block = ::pem::parse(input)
            .map_err(|e| CaError::Protocol(format!("invalid certificate PEM: {e}")))?;
        if block.tag() != CERT_TAG {
            return Err(CaError::Protocol(format!(
                "expected CERTIFICATE PEM block, found '{}'",
                block.tag()
            )));
        }
        Self::from_der(block.into_contents())
    }

    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    #[must_use]
    pub fn to_pem(&self) -> String {
        ::pem::encode(&::pem::Pem::new(CERT_TAG, self.der.clone()))
    }

    /// RFC 4514 rendering of the subject.
    pub fn subject(&self) -> Result<String> {
        Ok(parse(&self.der)?.subject().to_string())
    }

    /// RFC 4514 rendering of the issuer.
    pub fn issuer(&self) -> Result<String> {
        Ok(parse(&self.der)?.issuer().to_string())
    }

    /// First common name of the subject, if any.
    pub fn common_name(&self) -> Result<Option<String>> {
        let cert = parse(&self.der)?;
        let cn = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|attr| attr.as_str().ok())
            .map(str::to_string);
        Ok(cn)
    }

    /// DER-encoded SubjectPublicKeyInfo.
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        Ok(parse(&self.der)?.public_key().raw.to_vec())
    }

    /// Serial number as lowercase hex.
    pub fn serial_hex(&self) -> Result<String> {
        Ok(hex::encode(parse(&self.der)?.raw_serial()))
    }

    /// Check that this certificate's signature verifies under `issuer`'s key.
    ///
    /// # Errors
    ///
    /// Returns `CaError::Security` if the signature does not verify.
    pub fn verify_signed_by(&self, issuer: &Certificate) -> Result<()> {
        let cert = parse(&self.der)?;
        let issuer = parse(&issuer.der)?;
        cert.verify_signature(Some(issuer.public_key()))
            .map_err(|e| CaError::Security(format!("certificate signature invalid: {e}")))
    }

    fn is_self_issued(&self) -> Result<bool> {
        let cert = parse(&self.der)?;
        Ok(cert.subject().as_raw() == cert.issuer().as_raw())
    }

    fn verify_self_signed(&self) -> Result<()> {
        parse(&self.der)?
            .verify_signature(None)
            .map_err(|e| CaError::Security(format!("self-signature invalid: {e}")))
    }
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subject = self.subject().unwrap_or_else(|_| "<unparseable>".to_string());
        f.debug_struct("Certificate")
            .field("subject", &subject)
            .field("len", &self.der.len())
            .finish()
    }
}

fn parse(der: &[u8]) -> Result<X509Certificate<'_>> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| CaError::Protocol(format!("failed to parse X.509 certificate: {e}")))?;
    Ok(cert)
}

/// An ordered, non-empty certificate chain.
///
/// Element 0 is the leaf; each following element is the issuer of the one
/// before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateChain {
    certs: Vec<Certificate>,
}

impl CertificateChain {
    /// # Errors
    ///
    /// Returns `CaError::Protocol` if `certs` is empty or longer than
    /// [`MAX_CHAIN_LEN`].
    pub fn new(certs: Vec<Certificate>) -> Result<Self> {
        if certs.is_empty() {
            return Err(CaError::Protocol("certificate chain is empty".to_string()));
        }
        if certs.len() > MAX_CHAIN_LEN {
            return Err(CaError::Protocol(format!(
                "certificate chain too long: {} (max {MAX_CHAIN_LEN})",
                certs.len()
            )));
        }
        Ok(Self { certs })
    }

    /// Parse every `CERTIFICATE` block in a PEM document, in order.
    ///
    /// Blocks with other tags (e.g. a bundled private key) are skipped.
    pub fn from_pem(input: &str) -> Result<Self> {
        let blocks = ::pem::parse_many(input)
            .map_err(|e| CaError::Protocol(format!("invalid certificate PEM: {e}")))?;
        let certs = blocks
            .into_iter()
            .filter(|block| block.tag() == CERT_TAG)
            .map(|block| Certificate::from_der(block.into_contents()))
            .collect::<Result<Vec<_>>>()?;
        Self::new(certs)
    }

    /// Build a chain from DER blobs, e.g. the peer certificates of a TLS
    /// handshake.
    pub fn from_der_list<I, D>(ders: I) -> Result<Self>
    where
        I: IntoIterator<Item = D>,
        D: Into<Vec<u8>>,
    {
        let certs = ders
            .into_iter()
            .map(Certificate::from_der)
            .collect::<Result<Vec<_>>>()?;
        Self::new(certs)
    }

    #[must_use]
    pub fn leaf(&self) -> &Certificate {
        &self.certs[0]
    }

    #[must_use]
    pub fn certificates(&self) -> &[Certificate] {
        &self.certs
    }

    /// Everything after the leaf.
    #[must_use]
    pub fn issuers(&self) -> &[Certificate] {
        &self.certs[1..]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    /// Always false; kept for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// Concatenated PEM, leaf first.
    #[must_use]
    pub fn to_pem(&self) -> String {
        self.certs.iter().map(Certificate::to_pem).collect()
    }

    /// Return a new chain with `leaf` placed in front of this one.
    pub fn prepend(&self, leaf: Certificate) -> Result<Self> {
        let mut certs = Vec::with_capacity(self.certs.len() + 1);
        certs.push(leaf);
        certs.extend(self.certs.iter().cloned());
        Self::new(certs)
    }

    /// Check issuer/subject linkage and signatures along the chain.
    ///
    /// If the last certificate is self-issued its self-signature is checked
    /// too. Validity periods and extensions are not evaluated.
    ///
    /// # Errors
    ///
    /// Returns `CaError::Security` on the first broken link.
    pub fn validate_links(&self) -> Result<()> {
        for pair in self.certs.windows(2) {
            let (child, parent) = (&pair[0], &pair[1]);
            let child_issuer = child.issuer()?;
            let parent_subject = parent.subject()?;
            if child_issuer != parent_subject {
                return Err(CaError::Security(format!(
                    "chain broken: issuer '{child_issuer}' does not match next subject '{parent_subject}'"
                )));
            }
            child.verify_signed_by(parent)?;
        }

        let last = &self.certs[self.certs.len() - 1];
        if last.is_self_issued()? {
            last.verify_self_signed()?;
        }
        Ok(())
    }
}
