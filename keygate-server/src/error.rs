//! Server lifecycle errors.

use keygate_auth::CaError;

use crate::tls::TlsConfigError;

/// Errors from constructing, starting or stopping a [`RemoteServer`](crate::RemoteServer).
///
/// All of these are caller or environment errors and are never retried.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ServerError {
    #[error("server is already running")]
    AlreadyRunning,

    #[error("server is not running")]
    NotRunning,

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS configuration failed: {0}")]
    Tls(#[from] TlsConfigError),

    #[error("CA configuration failed: {0}")]
    Ca(#[from] CaError),
}
