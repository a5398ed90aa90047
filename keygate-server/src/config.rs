//! Server settings.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use keygate_auth::{KeyAlgorithm, DEFAULT_VALIDITY_DAYS};

use crate::rate_limit::RateLimit;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8443;

/// Connections that don't complete the TLS handshake within this time are
/// dropped.
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for a client to deliver request headers, and separately the
/// request body, once the handshake is done.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connections served at once; further connections are dropped on accept.
pub const MAX_CONNECTIONS: usize = 256;

/// Everything a [`RemoteServer`](crate::RemoteServer) is bound to at
/// construction, apart from the CA identity and token.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind_address: IpAddr,
    /// `0` binds an ephemeral port; see `RemoteServer::local_addr`.
    pub port: u16,
    pub validity_days: u32,
    /// Defaults to the CA key's own algorithm.
    pub signing_algorithm: Option<KeyAlgorithm>,
    /// `None` disables rate limiting.
    pub rate_limit: Option<RateLimit>,
    pub handshake_timeout: Duration,
    pub request_timeout: Duration,
    pub max_connections: usize,
}

impl ServerSettings {
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            validity_days: DEFAULT_VALIDITY_DAYS,
            signing_algorithm: None,
            rate_limit: Some(RateLimit::default()),
            handshake_timeout: TLS_HANDSHAKE_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
            max_connections: MAX_CONNECTIONS,
        }
    }
}
