//! Key algorithms supported for CA and requester key pairs.

use rcgen::{KeyPair, SignatureAlgorithm};

use crate::error::{CaError, Result};

/// Asymmetric key algorithm.
///
/// The signature algorithm of an issued certificate is always the one
/// belonging to the CA key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyAlgorithm {
    /// ECDSA over P-256 with SHA-256.
    #[default]
    EcdsaP256,
    /// ECDSA over P-384 with SHA-384.
    EcdsaP384,
    /// Ed25519.
    Ed25519,
}

impl KeyAlgorithm {
    /// All supported algorithms.
    pub const ALL: [KeyAlgorithm; 3] = [Self::EcdsaP256, Self::EcdsaP384, Self::Ed25519];

    fn signature_algorithm(self) -> &'static SignatureAlgorithm {
        match self {
            Self::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            Self::EcdsaP384 => &rcgen::PKCS_ECDSA_P384_SHA384,
            Self::Ed25519 => &rcgen::PKCS_ED25519,
        }
    }

    /// Generate a fresh key pair.
    pub fn generate(self) -> Result<KeyPair> {
        KeyPair::generate_for(self.signature_algorithm())
            .map_err(|e| CaError::Signing(format!("key generation failed: {e}")))
    }

    /// Identify the algorithm of an existing key pair.
    ///
    /// Returns `None` for algorithms keygate does not issue with (e.g. RSA).
    #[must_use]
    pub fn of_key(key: &KeyPair) -> Option<Self> {
        let algorithm = key.algorithm();
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.signature_algorithm() == algorithm)
    }

    /// Stable name used on the command line.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EcdsaP256 => "ecdsa-p256",
            Self::EcdsaP384 => "ecdsa-p384",
            Self::Ed25519 => "ed25519",
        }
    }
}

impl std::fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for KeyAlgorithm {
    type Err = CaError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                CaError::Protocol(format!(
                    "unknown key algorithm '{s}' (expected ecdsa-p256, ecdsa-p384 or ed25519)"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_identify_each_algorithm() {
        for algorithm in KeyAlgorithm::ALL {
            let key = algorithm.generate().unwrap();
            assert_eq!(KeyAlgorithm::of_key(&key), Some(algorithm));
        }
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(
            "ecdsa-p256".parse::<KeyAlgorithm>().unwrap(),
            KeyAlgorithm::EcdsaP256
        );
        assert_eq!(
            "ED25519".parse::<KeyAlgorithm>().unwrap(),
            KeyAlgorithm::Ed25519
        );
        assert!("rsa-2048".parse::<KeyAlgorithm>().is_err());
    }

    #[test]
    fn test_display_roundtrips_through_from_str() {
        for algorithm in KeyAlgorithm::ALL {
            assert_eq!(algorithm.to_string().parse::<KeyAlgorithm>().unwrap(), algorithm);
        }
    }
}
