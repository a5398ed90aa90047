//! The signing seam and its in-process implementation.

use async_trait::async_trait;
use rcgen::{
    CertificateSigningRequestParams, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyUsagePurpose,
    SanType, SerialNumber,
};
use time::OffsetDateTime;

use crate::ca::CaIdentity;
use crate::cert::{Certificate, CertificateChain};
use crate::csr::CertificationRequest;
use crate::error::{CaError, Result};
use crate::keys::KeyAlgorithm;

/// Default lifetime of issued certificates.
pub const DEFAULT_VALIDITY_DAYS: u32 = 825;

/// Anything that can turn a CSR into a certificate chain.
///
/// Implemented locally by [`LocalSigner`] and remotely by the keygate client.
/// The returned chain always starts with the newly issued certificate,
/// followed by the CA's own chain.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    async fn sign(&self, request: &CertificationRequest) -> Result<CertificateChain>;
}

/// Signs CSRs directly with a CA key held in memory.
#[derive(Debug, Clone)]
pub struct LocalSigner {
    ca: CaIdentity,
    validity_days: u32,
}

impl LocalSigner {
    /// # Errors
    ///
    /// Returns `CaError::Signing` if `algorithm` differs from the CA key's
    /// algorithm, or if `validity_days` is zero.
    pub fn new(ca: CaIdentity, algorithm: KeyAlgorithm, validity_days: u32) -> Result<Self> {
        if ca.algorithm() != algorithm {
            return Err(CaError::Signing(format!(
                "signing algorithm {algorithm} does not match CA key ({})",
                ca.algorithm()
            )));
        }
        if validity_days == 0 {
            return Err(CaError::Signing("validity must be at least one day".to_string()));
        }
        Ok(Self { ca, validity_days })
    }

    #[must_use]
    pub fn ca(&self) -> &CaIdentity {
        &self.ca
    }

    #[must_use]
    pub fn validity_days(&self) -> u32 {
        self.validity_days
    }

    /// Issue an end-entity certificate for `request`.
    ///
    /// The CSR's subject, public key and DNS/IP alternative names are kept.
    /// Everything else (validity, serial, key usages, basic constraints) is
    /// chosen by the signer.
    ///
    /// # Errors
    ///
    /// - `CaError::Security` if the CSR's self-signature does not verify
    /// - `CaError::Protocol` if the CSR cannot be parsed for signing
    /// - `CaError::Signing` if the signing operation fails
    pub fn issue(&self, request: &CertificationRequest) -> Result<CertificateChain> {
        request.verify_signature()?;

        let mut csr_params = CertificateSigningRequestParams::from_pem(request.pem())
            .map_err(|e| CaError::Protocol(format!("failed to parse CSR: {e}")))?;

        let params = &mut csr_params.params;
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        params
            .subject_alt_names
            .retain(|san| matches!(san, SanType::DnsName(_) | SanType::IpAddress(_)));
        params.serial_number = Some(random_serial());
        (params.not_before, params.not_after) = validity_window(self.validity_days);
        params.custom_extensions.clear();

        let ca_key = self.ca.key_pair()?;
        let issuer = Issuer::from_ca_cert_pem(&self.ca.certificate().to_pem(), &ca_key)
            .map_err(|e| CaError::Signing(format!("failed to load issuer: {e}")))?;

        let signed = csr_params
            .signed_by(&issuer)
            .map_err(|e| CaError::Signing(format!("failed to sign certificate: {e}")))?;

        let leaf = Certificate::from_der(signed.der().to_vec())?;
        self.ca.chain().prepend(leaf)
    }
}

#[async_trait]
impl CertificateAuthority for LocalSigner {
    async fn sign(&self, request: &CertificationRequest) -> Result<CertificateChain> {
        self.issue(request)
    }
}

/// 16 random bytes with the top bit cleared so the DER INTEGER stays positive.
pub(crate) fn random_serial() -> SerialNumber {
    let mut bytes: [u8; 16] = rand::random();
    bytes[0] &= 0x7f;
    SerialNumber::from_slice(&bytes)
}

/// `(now, now + days)`.
pub(crate) fn validity_window(days: u32) -> (OffsetDateTime, OffsetDateTime) {
    let now = OffsetDateTime::now_utc();
    (now, now + time::Duration::days(i64::from(days)))
}
