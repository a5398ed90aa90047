//! CA signing identity: certificate chain plus private key.

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, IsCa, KeyPair,
    KeyUsagePurpose, PublicKeyData,
};
use zeroize::Zeroizing;

use crate::authority::{random_serial, validity_window};
use crate::cert::{Certificate, CertificateChain};
use crate::error::{CaError, Result};
use crate::keys::KeyAlgorithm;

/// Organization placed in generated CA subjects.
pub const CA_ORGANIZATION: &str = "keygate";

/// The CA's certificate chain (CA certificate first) and its private key.
///
/// The same identity is used to sign requests and as the server's TLS
/// certificate, so the chain a client captures during the handshake starts
/// with the CA certificate.
#[derive(Clone)]
pub struct CaIdentity {
    chain: CertificateChain,
    key_pem: Zeroizing<String>,
    algorithm: KeyAlgorithm,
}

impl CaIdentity {
    /// Generate a self-signed root for `hostname`.
    ///
    /// The subject is `CN=<hostname>, O=keygate`; the hostname is also added
    /// as a subject alternative name.
    pub fn generate(hostname: &str, algorithm: KeyAlgorithm, validity_days: u32) -> Result<Self> {
        let mut params = CertificateParams::new(vec![hostname.to_string()])
            .map_err(|e| CaError::Protocol(format!("invalid CA hostname '{hostname}': {e}")))?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(hostname.to_string()));
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String(CA_ORGANIZATION.to_string()),
        );
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        params.serial_number = Some(random_serial());
        (params.not_before, params.not_after) = validity_window(validity_days);

        let key = algorithm.generate()?;
        let cert = params
            .self_signed(&key)
            .map_err(|e| CaError::Signing(format!("failed to create CA certificate: {e}")))?;

        let chain = CertificateChain::new(vec![Certificate::from_der(cert.der().to_vec())?])?;
        Ok(Self {
            chain,
            key_pem: Zeroizing::new(key.serialize_pem()),
            algorithm,
        })
    }

    /// Load an identity from PEM text.
    ///
    /// `chain_pem` holds the CA certificate followed by any intermediates
    /// and roots above it; `key_pem` holds the matching PKCS#8 private key.
    ///
    /// # Errors
    ///
    /// - `CaError::Protocol` if either document does not parse
    /// - `CaError::Signing` if the key algorithm is unsupported or the key
    ///   does not match the first certificate
    pub fn from_pem(chain_pem: &str, key_pem: &str) -> Result<Self> {
        let chain = CertificateChain::from_pem(chain_pem)?;
        let key = KeyPair::from_pem(key_pem)
            .map_err(|e| CaError::Protocol(format!("failed to parse CA key: {e}")))?;

        let algorithm = KeyAlgorithm::of_key(&key)
            .ok_or_else(|| CaError::Signing("unsupported CA key algorithm".to_string()))?;

        if chain.leaf().public_key_der()? != key.subject_public_key_info() {
            return Err(CaError::Signing(
                "CA key does not match CA certificate".to_string(),
            ));
        }

        Ok(Self {
            chain,
            key_pem: Zeroizing::new(key.serialize_pem()),
            algorithm,
        })
    }

    #[must_use]
    pub fn chain(&self) -> &CertificateChain {
        &self.chain
    }

    /// The CA certificate (first element of the chain).
    #[must_use]
    pub fn certificate(&self) -> &Certificate {
        self.chain.leaf()
    }

    #[must_use]
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// Common name of the CA certificate, used by clients as the expected
    /// server identity.
    pub fn hostname(&self) -> Result<String> {
        self.certificate()
            .common_name()?
            .ok_or_else(|| CaError::Protocol("CA certificate has no common name".to_string()))
    }

    /// Load the signing key.
    pub fn key_pair(&self) -> Result<KeyPair> {
        KeyPair::from_pem(&self.key_pem)
            .map_err(|e| CaError::Signing(format!("failed to load CA key: {e}")))
    }

    #[must_use]
    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    /// PKCS#8 DER encoding of the private key, for TLS configuration.
    pub fn key_der(&self) -> Result<Zeroizing<Vec<u8>>> {
        Ok(Zeroizing::new(self.key_pair()?.serialize_der()))
    }
}

impl std::fmt::Debug for CaIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaIdentity")
            .field("certificate", self.certificate())
            .field("chain_len", &self.chain.len())
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_self_signed_root() {
        let ca = CaIdentity::generate("ca.example", KeyAlgorithm::EcdsaP256, 365).unwrap();

        assert_eq!(ca.chain().len(), 1);
        assert_eq!(ca.hostname().unwrap(), "ca.example");
        let subject = ca.certificate().subject().unwrap();
        assert!(subject.contains("O=keygate"));
        assert_eq!(subject, ca.certificate().issuer().unwrap());
        ca.chain().validate_links().unwrap();
    }

    #[test]
    fn test_pem_roundtrip() {
        let ca = CaIdentity::generate("ca.example", KeyAlgorithm::EcdsaP384, 365).unwrap();
        let loaded = CaIdentity::from_pem(&ca.chain().to_pem(), ca.key_pem()).unwrap();

        assert_eq!(loaded.chain(), ca.chain());
        assert_eq!(loaded.algorithm(), KeyAlgorithm::EcdsaP384);
    }

    #[test]
    fn test_from_pem_matches_key_for_every_algorithm() {
        for algorithm in KeyAlgorithm::ALL {
            let ca = CaIdentity::generate("ca.example", algorithm, 365).unwrap();
            let loaded = CaIdentity::from_pem(&ca.chain().to_pem(), ca.key_pem()).unwrap();

            assert_eq!(loaded.algorithm(), algorithm);
            assert_eq!(
                loaded.certificate().public_key_der().unwrap(),
                loaded.key_pair().unwrap().subject_public_key_info()
            );
        }
    }

    #[test]
    fn test_mismatched_key_rejected() {
        let a = CaIdentity::generate("ca.example", KeyAlgorithm::EcdsaP256, 365).unwrap();
        let b = CaIdentity::generate("ca.example", KeyAlgorithm::EcdsaP256, 365).unwrap();

        let result = CaIdentity::from_pem(&a.chain().to_pem(), b.key_pem());
        assert!(matches!(result, Err(CaError::Signing(_))));
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let ca = CaIdentity::generate("ca.example", KeyAlgorithm::Ed25519, 365).unwrap();
        let debug = format!("{:?}", ca);
        assert!(!debug.contains("PRIVATE KEY"));
    }
}
