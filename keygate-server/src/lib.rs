//! keygate signing service.
//!
//! Terminates TLS with the CA's own certificate chain, authenticates each
//! `POST /v1/sign` request by its token HMAC and answers with a
//! counter-authenticated certificate.

pub mod config;
pub mod error;
pub mod handler;
pub mod rate_limit;
pub mod server;
pub mod tls;

pub use config::{
    ServerSettings, DEFAULT_PORT, MAX_CONNECTIONS, REQUEST_TIMEOUT, TLS_HANDSHAKE_TIMEOUT,
};
pub use error::ServerError;
pub use handler::{HandlerResponse, RequestHandler};
pub use rate_limit::{RateLimit, SigningRateLimiter};
pub use server::RemoteServer;
pub use tls::{TlsConfigError, TlsServerConfig};
