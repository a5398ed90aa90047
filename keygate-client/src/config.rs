//! Client settings.

use std::time::Duration;

use keygate_auth::KeyAlgorithm;

/// Default CA port.
pub const DEFAULT_PORT: u16 = 8443;

/// Upper bound on one whole request/response exchange.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Where to reach the CA and what to ask it for.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Host to connect to; also the common name the CA certificate must carry.
    pub ca_hostname: String,
    pub port: u16,
    /// Algorithm for the requester's freshly generated key.
    pub algorithm: KeyAlgorithm,
    /// DNS names or IP addresses to request as subject alternative names.
    pub subject_alt_names: Vec<String>,
    pub timeout: Duration,
}

impl ClientSettings {
    pub fn new(ca_hostname: impl Into<String>) -> Self {
        Self {
            ca_hostname: ca_hostname.into(),
            port: DEFAULT_PORT,
            algorithm: KeyAlgorithm::default(),
            subject_alt_names: Vec::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}
