//! keygate client.
//!
//! Requests a certificate from a keygate CA the host does not yet trust:
//! 1. Generate a key pair and CSR
//! 2. Authenticate the CSR's public key with the token HMAC
//! 3. Connect over TLS, capturing the CA's chain without validating it
//! 4. Check the response HMAC over the captured CA key before trusting
//!    anything the CA returned

pub mod client;
pub mod config;
pub mod connector;

pub use client::{IssuanceState, IssuedIdentity, RemoteClient};
pub use config::{ClientSettings, DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT};
pub use connector::{CapturedConnection, TrustCaptureConnector};
