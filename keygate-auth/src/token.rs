//! Pre-shared token and HMAC proofs.
//!
//! The token is provisioned out-of-band to both the CA and the requesting
//! host. It never crosses the wire; only `HMAC-SHA256(token, public_key)`
//! values do, in both directions:
//!
//! - client -> CA: MAC over the CSR's SubjectPublicKeyInfo
//! - CA -> client: MAC over the CA certificate's SubjectPublicKeyInfo
//!
//! The CA public key is visible to anyone observing the TLS handshake, so the
//! response MAC provides authenticity only. It proves the responder knows the
//! token; its strength rests entirely on the token staying secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::{CaError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Length of a MAC produced by [`Token::mac`].
pub const MAC_LEN: usize = 32;

/// Tokens shorter than this are accepted but should be reported as weak.
pub const MIN_RECOMMENDED_TOKEN_LEN: usize = 16;

/// Shared secret used to authenticate both protocol directions.
///
/// # Security
///
/// - Secret bytes are zeroized on drop
/// - `Debug` never prints the secret
/// - MAC comparison is constant-time
#[derive(Clone)]
pub struct Token(Zeroizing<Vec<u8>>);

impl Token {
    /// Wrap a token secret.
    ///
    /// # Errors
    ///
    /// Returns `CaError::Protocol` if the secret is empty.
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self> {
        let secret = Zeroizing::new(secret.into());
        if secret.is_empty() {
            return Err(CaError::Protocol("token must not be empty".to_string()));
        }
        Ok(Self(secret))
    }

    /// True if the token is shorter than [`MIN_RECOMMENDED_TOKEN_LEN`].
    #[must_use]
    pub fn is_weak(&self) -> bool {
        self.0.len() < MIN_RECOMMENDED_TOKEN_LEN
    }

    /// Compute `HMAC-SHA256(token, message)`.
    #[must_use]
    pub fn mac(&self, message: &[u8]) -> [u8; MAC_LEN] {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.0)
            .expect("HMAC accepts keys of any length");
        mac.update(message);
        mac.finalize().into_bytes().into()
    }

    /// Check a MAC received from the peer against `message`.
    ///
    /// Constant-time with respect to the MAC contents.
    #[must_use]
    pub fn verify(&self, message: &[u8], candidate: &[u8]) -> bool {
        let expected = self.mac(message);
        candidate.len() == expected.len() && bool::from(expected.as_slice().ct_eq(candidate))
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("len", &self.0.len())
            .finish_non_exhaustive()
    }
}
