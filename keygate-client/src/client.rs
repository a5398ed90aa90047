//! Remote client for the keygate signing endpoint.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, HOST};
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use keygate_auth::protocol::CONTENT_TYPE_JSON;
use keygate_auth::{
    AuthenticatedRequest, AuthenticatedResponse, CaError, Certificate, CertificateAuthority,
    CertificateChain, CertificationRequest, Result, Token, MAX_BODY_SIZE, SIGN_PATH,
};
use zeroize::Zeroizing;

use crate::config::ClientSettings;
use crate::connector::{CapturedConnection, TrustCaptureConnector};

/// Progress of a single issuance.
///
/// `Validated` and `Rejected` are terminal; a rejected issuance is never
/// resumed, the caller starts over with a fresh key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuanceState {
    Init,
    KeyGenerated,
    RequestSent,
    ResponseReceived,
    Validated,
    Rejected,
}

struct Issuance {
    state: IssuanceState,
}

impl Issuance {
    fn new(state: IssuanceState) -> Self {
        Self { state }
    }

    fn advance(&mut self, next: IssuanceState) {
        tracing::debug!(from = ?self.state, to = ?next, "Issuance state");
        self.state = next;
    }
}

/// A freshly generated private key and the chain issued for it.
pub struct IssuedIdentity {
    key_pem: Zeroizing<String>,
    chain: CertificateChain,
}

impl IssuedIdentity {
    /// PKCS#8 PEM private key.
    #[must_use]
    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    /// Issued certificate first, then the CA chain.
    #[must_use]
    pub fn chain(&self) -> &CertificateChain {
        &self.chain
    }
}

impl std::fmt::Debug for IssuedIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedIdentity")
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

/// [`CertificateAuthority`] backed by a remote keygate server.
///
/// Every call opens a fresh connection; nothing is retried.
#[derive(Debug)]
pub struct RemoteClient {
    settings: ClientSettings,
    token: Token,
    connector: TrustCaptureConnector,
}

impl RemoteClient {
    pub fn new(settings: ClientSettings, token: Token) -> Result<Self> {
        if token.is_weak() {
            tracing::warn!(
                min_len = keygate_auth::token::MIN_RECOMMENDED_TOKEN_LEN,
                "Token is shorter than recommended"
            );
        }
        let connector = TrustCaptureConnector::new(settings.ca_hostname.clone())?;
        Ok(Self {
            settings,
            token,
            connector,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Generate a key pair, request a certificate for it and return both.
    pub async fn issue(&self, subject_dn: &str) -> Result<IssuedIdentity> {
        let mut issuance = Issuance::new(IssuanceState::Init);
        let key = self.settings.algorithm.generate()?;
        let csr =
            CertificationRequest::generate(subject_dn, &self.settings.subject_alt_names, &key)?;
        issuance.advance(IssuanceState::KeyGenerated);

        let chain = self.submit(&csr, issuance).await?;
        Ok(IssuedIdentity {
            key_pem: Zeroizing::new(key.serialize_pem()),
            chain,
        })
    }

    /// Run one exchange under the configured timeout.
    async fn submit(
        &self,
        csr: &CertificationRequest,
        mut issuance: Issuance,
    ) -> Result<CertificateChain> {
        let timeout = self.settings.timeout;
        let result = match tokio::time::timeout(timeout, self.exchange(csr, &mut issuance)).await {
            Ok(result) => result,
            Err(_) => Err(CaError::Timeout(timeout)),
        };

        match &result {
            Ok(_) => issuance.advance(IssuanceState::Validated),
            Err(e) => {
                issuance.advance(IssuanceState::Rejected);
                tracing::debug!(error = %e, kind = ?e.kind(), "Issuance rejected");
            }
        }
        result
    }

    async fn exchange(
        &self,
        csr: &CertificationRequest,
        issuance: &mut Issuance,
    ) -> Result<CertificateChain> {
        let host = self.settings.ca_hostname.as_str();
        let port = self.settings.port;
        let body = AuthenticatedRequest::new(&self.token, csr).to_json()?;

        let CapturedConnection { stream, peer_chain } = self.connector.connect(host, port).await?;

        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| CaError::Http(format!("HTTP handshake failed: {e}")))?;
        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "Connection closed with error");
            }
        });

        let request = Request::builder()
            .method(Method::POST)
            .uri(SIGN_PATH)
            .header(HOST, format!("{host}:{port}"))
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| CaError::Http(format!("failed to build request: {e}")))?;

        tracing::debug!(host, port, subject = %csr.subject(), "Sending signing request");
        let response = sender
            .send_request(request)
            .await
            .map_err(|e| CaError::Http(format!("request failed: {e}")))?;
        issuance.advance(IssuanceState::RequestSent);
        let status = response.status();
        let declared_len = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = read_body(response.into_body(), declared_len).await;
        connection.abort();
        let body = body?;
        issuance.advance(IssuanceState::ResponseReceived);

        if !status.is_success() {
            return Err(CaError::BadStatus {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let response = AuthenticatedResponse::from_json(&body)?;
        let hmac = response
            .hmac
            .ok_or_else(|| CaError::Protocol("response missing authentication".to_string()))?;
        let certificate = response
            .certificate
            .ok_or_else(|| CaError::Protocol("response missing certificate".to_string()))?;

        let ca = peer_chain.leaf();
        if !self.token.verify(&ca.public_key_der()?, &hmac) {
            tracing::warn!(
                host,
                port,
                ca_subject = %ca.subject().unwrap_or_default(),
                "Response HMAC mismatch"
            );
            return Err(CaError::Security(
                "response HMAC mismatch: possible interception".to_string(),
            ));
        }

        let leaf = Certificate::from_pem(&certificate)?;
        leaf.verify_signed_by(ca)?;
        if leaf.public_key_der()? != csr.public_key_der() {
            return Err(CaError::Protocol(
                "issued certificate does not carry the requested key".to_string(),
            ));
        }

        tracing::info!(
            subject = %leaf.subject().unwrap_or_default(),
            serial = %leaf.serial_hex().unwrap_or_default(),
            "Certificate issued"
        );
        peer_chain.prepend(leaf)
    }
}

#[async_trait]
impl CertificateAuthority for RemoteClient {
    /// Submit `request` to the CA.
    ///
    /// # Errors
    ///
    /// - `CaError::Timeout` if the whole exchange exceeds the configured timeout
    /// - `CaError::BadStatus` for any non-2xx response
    /// - `CaError::Protocol` for a missing field, unexpected identity or
    ///   oversized response
    /// - `CaError::Security` if the response HMAC or the certificate signature
    ///   does not verify against the captured CA key
    async fn sign(&self, request: &CertificationRequest) -> Result<CertificateChain> {
        self.submit(request, Issuance::new(IssuanceState::KeyGenerated))
            .await
    }
}

async fn read_body(body: Incoming, declared_len: Option<u64>) -> Result<Bytes> {
    if declared_len.is_some_and(|len| len > MAX_BODY_SIZE as u64) {
        return Err(CaError::Protocol(format!(
            "response body too large (max {MAX_BODY_SIZE} bytes)"
        )));
    }

    match Limited::new(body, MAX_BODY_SIZE).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(CaError::Protocol(format!(
            "response body too large (max {MAX_BODY_SIZE} bytes)"
        ))),
        Err(e) => Err(CaError::Http(format!("failed to read response: {e}"))),
    }
}
