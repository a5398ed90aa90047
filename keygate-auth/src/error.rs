//! Error taxonomy shared by the signer, the remote client and the server.

use std::time::Duration;

/// Coarse classification of a [`CaError`].
///
/// Callers that want to alert on authentication failures separately from
/// ordinary network trouble should match on [`ErrorKind::Security`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection failure, timeout or non-success HTTP status.
    Transport,
    /// Missing field, malformed PEM, unexpected peer identity.
    Protocol,
    /// HMAC mismatch in either direction, bad signatures.
    Security,
    /// Failure inside the signing primitive.
    Signing,
}

/// Errors produced while requesting or issuing a certificate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("HTTP error: {0}")]
    Http(String),

    /// The CA answered with a non-success status code.
    #[error("CA responded with status {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("security check failed: {0}")]
    Security(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

impl CaError {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_)
            | Self::Tls(_)
            | Self::Http(_)
            | Self::BadStatus { .. }
            | Self::Timeout(_) => ErrorKind::Transport,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Security(_) => ErrorKind::Security,
            Self::Signing(_) => ErrorKind::Signing,
        }
    }

    /// True for authentication failures (possible interception or a wrong token).
    #[must_use]
    pub fn is_security(&self) -> bool {
        self.kind() == ErrorKind::Security
    }
}

/// Result type for CA operations.
pub type Result<T> = std::result::Result<T, CaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let io = CaError::Io(std::io::Error::other("refused"));
        assert_eq!(io.kind(), ErrorKind::Transport);

        let status = CaError::BadStatus {
            status: 403,
            body: "{\"error\":\"forbidden\"}".to_string(),
        };
        assert_eq!(status.kind(), ErrorKind::Transport);
        assert!(status.to_string().contains("403"));

        assert_eq!(
            CaError::Protocol("missing".into()).kind(),
            ErrorKind::Protocol
        );
        assert!(CaError::Security("mismatch".into()).is_security());
        assert!(!CaError::Signing("bad key".into()).is_security());
    }
}
