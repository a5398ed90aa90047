//! TLS server configuration.
//!
//! Uses rustls 0.23+ with the ring provider. The server presents the CA's own
//! chain as its TLS identity and never asks for client certificates; clients
//! authenticate with the token HMAC instead.

use std::sync::Arc;

use keygate_auth::{CaIdentity, Certificate};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use x509_parser::prelude::{ASN1Time, FromDer, X509Certificate};

/// TLS server configuration wrapper.
pub struct TlsServerConfig {
    pub config: Arc<ServerConfig>,
}

impl TlsServerConfig {
    /// Build a server-auth-only config presenting `identity`'s chain.
    ///
    /// An expired or not-yet-valid CA certificate is logged but not refused;
    /// clients do not evaluate validity during the trust-capture handshake.
    pub fn from_identity(identity: &CaIdentity) -> Result<Self, TlsConfigError> {
        match validity_at(identity.certificate(), ASN1Time::now())? {
            CaValidity::Current => {}
            CaValidity::NotYetValid { not_before } => {
                tracing::warn!(%not_before, "CA certificate is not yet valid");
            }
            CaValidity::Expired { not_after } => {
                tracing::warn!(%not_after, "CA certificate has expired");
            }
        }

        let certs: Vec<CertificateDer<'static>> = identity
            .chain()
            .certificates()
            .iter()
            .map(|cert| CertificateDer::from(cert.der().to_vec()))
            .collect();
        let key_der = identity
            .key_der()
            .map_err(|e| TlsConfigError::InvalidKey(e.to_string()))?;
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der.to_vec()));

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsConfigError::Config(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| TlsConfigError::Config(e.to_string()))?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn into_rustls_config(self) -> Arc<ServerConfig> {
        self.config
    }
}

/// Position of a point in time relative to a certificate's validity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaValidity {
    Current,
    NotYetValid { not_before: ASN1Time },
    Expired { not_after: ASN1Time },
}

fn validity_at(cert: &Certificate, at: ASN1Time) -> Result<CaValidity, TlsConfigError> {
    let (_, parsed) = X509Certificate::from_der(cert.der())
        .map_err(|e| TlsConfigError::InvalidCert(e.to_string()))?;
    let validity = parsed.validity();

    Ok(if at < validity.not_before {
        CaValidity::NotYetValid {
            not_before: validity.not_before,
        }
    } else if at > validity.not_after {
        CaValidity::Expired {
            not_after: validity.not_after,
        }
    } else {
        CaValidity::Current
    })
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TlsConfigError {
    #[error("CA certificate unreadable: {0}")]
    InvalidCert(String),
    #[error("CA key unusable for TLS: {0}")]
    InvalidKey(String),
    #[error("failed to build TLS config: {0}")]
    Config(String),
}
