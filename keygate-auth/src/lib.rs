//! Pure certificate-authority library for keygate.
//!
//! This crate is intentionally IO-free:
//! - No filesystem operations
//! - No network calls
//! - No logging
//!
//! It provides the pieces both ends of the bootstrap protocol share:
//! - [`Token`] - the pre-shared secret and its HMAC proofs
//! - [`CertificationRequest`] - CSR generation, parsing and self-signature checks
//! - [`Certificate`] / [`CertificateChain`] - X.509 parsing and chain linkage
//! - [`AuthenticatedRequest`] / [`AuthenticatedResponse`] - the JSON wire types
//! - [`CertificateAuthority`] - the signing seam, implemented in-process by [`LocalSigner`]
//!
//! # Example
//!
//! ```ignore
//! use keygate_auth::{CaIdentity, CertificateAuthority, CertificationRequest, KeyAlgorithm, LocalSigner};
//!
//! let ca = CaIdentity::generate("ca.example", KeyAlgorithm::EcdsaP256, 3650)?;
//! let signer = LocalSigner::new(ca, KeyAlgorithm::EcdsaP256, 825)?;
//!
//! let key = KeyAlgorithm::EcdsaP256.generate()?;
//! let csr = CertificationRequest::generate("CN=host1", &[], &key)?;
//! let chain = signer.sign(&csr).await?;
//! assert_eq!(chain.len(), 2);
//! ```

pub mod authority;
pub mod ca;
pub mod cert;
pub mod csr;
pub mod dn;
pub mod error;
pub mod keys;
pub mod protocol;
pub mod token;

pub use authority::{CertificateAuthority, LocalSigner, DEFAULT_VALIDITY_DAYS};
pub use ca::CaIdentity;
pub use cert::{Certificate, CertificateChain, MAX_CERT_SIZE};
pub use csr::CertificationRequest;
pub use dn::parse_dn;
pub use error::{CaError, ErrorKind, Result};
pub use keys::KeyAlgorithm;
pub use protocol::{AuthenticatedRequest, AuthenticatedResponse, MAX_BODY_SIZE, SIGN_PATH};
pub use token::Token;
