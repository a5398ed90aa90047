//! Trust-capturing TLS connector.
//!
//! The requesting host has no trust anchor for the CA yet, so the handshake
//! accepts whatever chain the server presents and hands it back alongside the
//! stream. The chain is untrusted until the response HMAC has been checked
//! against its first certificate; see [`crate::client`].
//!
//! # Security
//!
//! - Handshake signatures are still verified, so the peer holds the private
//!   key for the certificate it presented
//! - Each connection returns its own captured chain; nothing is shared
//!   between connections
//! - The common-name check rejects gross misdirection only and is not
//!   authentication

use std::sync::Arc;

use keygate_auth::{CaError, CertificateChain, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// Certificate verifier that accepts any server certificate.
///
/// Only the handshake signature is checked.
#[derive(Debug)]
struct CaptureOnlyVerifier {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for CaptureOnlyVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// A TLS stream together with the chain the server presented on it.
pub struct CapturedConnection {
    pub stream: TlsStream<TcpStream>,
    /// Untrusted until counter-authenticated.
    pub peer_chain: CertificateChain,
}

impl std::fmt::Debug for CapturedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedConnection")
            .field("peer_chain", &self.peer_chain)
            .finish_non_exhaustive()
    }
}

/// Opens TLS connections that capture the server's chain instead of
/// validating it.
#[derive(Clone)]
pub struct TrustCaptureConnector {
    connector: TlsConnector,
    expected_identity: String,
}

impl TrustCaptureConnector {
    /// `expected_identity` must equal the common name of the certificate the
    /// server presents.
    pub fn new(expected_identity: impl Into<String>) -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = Arc::new(CaptureOnlyVerifier {
            algorithms: provider.signature_verification_algorithms,
        });

        let mut config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| CaError::Tls(format!("failed to build TLS config: {e}")))?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            expected_identity: expected_identity.into(),
        })
    }

    #[must_use]
    pub fn expected_identity(&self) -> &str {
        &self.expected_identity
    }

    /// Connect, complete the handshake and capture the presented chain.
    ///
    /// # Errors
    ///
    /// - `CaError::Io` / `CaError::Tls` for connection or handshake failures
    /// - `CaError::Protocol` if the server presented no certificates, a
    ///   non-X.509 chain, or a leaf whose common name differs from the
    ///   expected identity
    pub async fn connect(&self, host: &str, port: u16) -> Result<CapturedConnection> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| CaError::Protocol(format!("invalid server name '{host}': {e}")))?;

        let tcp_stream = TcpStream::connect((host, port)).await?;
        let stream = self
            .connector
            .connect(server_name, tcp_stream)
            .await
            .map_err(|e| CaError::Tls(format!("handshake with {host}:{port} failed: {e}")))?;

        let peer_certs = stream
            .get_ref()
            .1
            .peer_certificates()
            .filter(|certs| !certs.is_empty())
            .ok_or_else(|| CaError::Protocol("server presented no certificates".to_string()))?;
        let peer_chain =
            CertificateChain::from_der_list(peer_certs.iter().map(|cert| cert.as_ref().to_vec()))?;

        let common_name = peer_chain.leaf().common_name()?;
        if common_name.as_deref() != Some(self.expected_identity.as_str()) {
            return Err(CaError::Protocol(format!(
                "unexpected identity: expected '{}', server presented '{}'",
                self.expected_identity,
                common_name.unwrap_or_default()
            )));
        }

        tracing::debug!(
            host,
            port,
            chain_len = peer_chain.len(),
            "Captured server certificate chain"
        );
        Ok(CapturedConnection { stream, peer_chain })
    }
}

impl std::fmt::Debug for TrustCaptureConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustCaptureConnector")
            .field("expected_identity", &self.expected_identity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keygate_auth::{CaIdentity, KeyAlgorithm};

    fn verifier() -> CaptureOnlyVerifier {
        CaptureOnlyVerifier {
            algorithms: rustls::crypto::ring::default_provider().signature_verification_algorithms,
        }
    }

    #[test]
    fn test_verifier_accepts_unknown_certificate() {
        let ca = CaIdentity::generate("ca.example", KeyAlgorithm::EcdsaP256, 30).unwrap();
        let cert = CertificateDer::from(ca.certificate().der().to_vec());

        let result = verifier().verify_server_cert(
            &cert,
            &[],
            &ServerName::try_from("other.example").unwrap(),
            &[],
            UnixTime::now(),
        );

        assert!(result.is_ok(), "Capture-only verifier must not validate trust");
    }

    #[test]
    fn test_verifier_advertises_schemes() {
        let schemes = verifier().supported_verify_schemes();
        assert!(schemes.contains(&SignatureScheme::ECDSA_NISTP256_SHA256));
        assert!(schemes.contains(&SignatureScheme::ED25519));
    }

    #[tokio::test]
    async fn test_connection_refused_is_io_error() {
        // Bind then drop to find a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = TrustCaptureConnector::new("127.0.0.1").unwrap();
        let result = connector.connect("127.0.0.1", port).await;
        assert!(matches!(result, Err(CaError::Io(_))));
    }
}
