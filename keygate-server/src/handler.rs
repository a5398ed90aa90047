//! Request handling for `POST /v1/sign`.
//!
//! The handler is transport-agnostic: it takes the raw request body and
//! returns a status plus JSON response, so it can be exercised without TLS.

use std::sync::Arc;

use hyper::StatusCode;
use keygate_auth::{
    AuthenticatedRequest, AuthenticatedResponse, CertificateAuthority, CertificationRequest, Token,
};

/// Status code and body produced by [`RequestHandler::handle`].
#[derive(Debug)]
pub struct HandlerResponse {
    pub status: StatusCode,
    pub body: AuthenticatedResponse,
}

impl HandlerResponse {
    fn error(status: StatusCode, message: &str) -> Self {
        Self {
            status,
            body: AuthenticatedResponse::error(message),
        }
    }
}

/// Validates the request HMAC, delegates to a signer and counter-authenticates
/// the response.
#[derive(Clone)]
pub struct RequestHandler {
    signer: Arc<dyn CertificateAuthority>,
    token: Token,
}

impl RequestHandler {
    pub fn new(signer: Arc<dyn CertificateAuthority>, token: Token) -> Self {
        Self { signer, token }
    }

    /// Handle one request body.
    ///
    /// - malformed JSON, missing field or unparseable CSR: 400
    /// - HMAC mismatch: 403 `forbidden`, nothing more
    /// - signing failure: 500 `internal error`, detail only in the log
    pub async fn handle(&self, body: &[u8]) -> HandlerResponse {
        let request = match AuthenticatedRequest::from_json(body) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(error = %e, "Rejecting malformed request");
                return HandlerResponse::error(StatusCode::BAD_REQUEST, "malformed request");
            }
        };

        let Some(hmac) = request.hmac else {
            return HandlerResponse::error(StatusCode::BAD_REQUEST, "hmac field must be set");
        };
        let Some(csr_pem) = request.csr else {
            return HandlerResponse::error(StatusCode::BAD_REQUEST, "csr field must be set");
        };

        let csr = match CertificationRequest::from_pem(&csr_pem) {
            Ok(csr) => csr,
            Err(e) => {
                tracing::debug!(error = %e, "Rejecting unparseable CSR");
                return HandlerResponse::error(StatusCode::BAD_REQUEST, "invalid csr");
            }
        };

        if !self.token.verify(csr.public_key_der(), &hmac) {
            tracing::warn!(subject = %csr.subject(), "Request HMAC mismatch");
            return HandlerResponse::error(StatusCode::FORBIDDEN, "forbidden");
        }

        match self.issue(&csr).await {
            Ok(body) => HandlerResponse {
                status: StatusCode::OK,
                body,
            },
            Err(e) => {
                tracing::error!(subject = %csr.subject(), error = %e, "Signing failed");
                HandlerResponse::error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }

    async fn issue(&self, csr: &CertificationRequest) -> keygate_auth::Result<AuthenticatedResponse> {
        let chain = self.signer.sign(csr).await?;
        let ca = chain.issuers().first().ok_or_else(|| {
            keygate_auth::CaError::Signing("signer returned a chain without its CA".to_string())
        })?;

        let response = AuthenticatedResponse::issued(&self.token, ca, chain.leaf())?;
        tracing::info!(
            subject = %csr.subject(),
            serial = %chain.leaf().serial_hex().unwrap_or_default(),
            "Issued certificate"
        );
        Ok(response)
    }
}
