//! JSON wire types for `POST /v1/sign`.
//!
//! HMAC values travel as standard base64; CSRs and certificates as PEM text.
//! Every field is optional on the wire so that a missing field can be
//! reported precisely rather than as a generic parse failure.

use serde::{Deserialize, Serialize};

use crate::cert::Certificate;
use crate::csr::CertificationRequest;
use crate::error::{CaError, Result};
use crate::token::Token;

/// Path of the signing endpoint.
pub const SIGN_PATH: &str = "/v1/sign";

/// Maximum body size accepted by either side (1 MiB).
pub const MAX_BODY_SIZE: usize = 1024 * 1024;

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Client -> CA.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthenticatedRequest {
    #[serde(default, with = "base64_opt", skip_serializing_if = "Option::is_none")]
    pub hmac: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csr: Option<String>,
}

impl AuthenticatedRequest {
    /// Build a request whose HMAC covers the CSR's public key.
    #[must_use]
    pub fn new(token: &Token, csr: &CertificationRequest) -> Self {
        Self {
            hmac: Some(token.mac(csr.public_key_der()).to_vec()),
            csr: Some(csr.pem().to_string()),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| CaError::Protocol(format!("failed to encode request: {e}")))
    }

    pub fn from_json(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| CaError::Protocol(format!("malformed request: {e}")))
    }
}

/// CA -> client.
///
/// Success carries `hmac` and `certificate`; rejection carries only `error`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthenticatedResponse {
    #[serde(default, with = "base64_opt", skip_serializing_if = "Option::is_none")]
    pub hmac: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthenticatedResponse {
    /// Successful issuance: the HMAC covers the CA certificate's public key.
    pub fn issued(token: &Token, ca: &Certificate, leaf: &Certificate) -> Result<Self> {
        Ok(Self {
            hmac: Some(token.mac(&ca.public_key_der()?).to_vec()),
            certificate: Some(leaf.to_pem()),
            error: None,
        })
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| CaError::Protocol(format!("failed to encode response: {e}")))
    }

    pub fn from_json(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| CaError::Protocol(format!("malformed response: {e}")))
    }
}

mod base64_opt {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_str(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyAlgorithm;

    #[test]
    fn test_request_wire_shape() {
        let token = Token::new("shared-secret").unwrap();
        let key = KeyAlgorithm::EcdsaP256.generate().unwrap();
        let csr = CertificationRequest::generate("CN=host1", &[], &key).unwrap();

        let json = AuthenticatedRequest::new(&token, &csr).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();

        assert!(value["hmac"].is_string());
        assert!(value["csr"]
            .as_str()
            .unwrap()
            .contains("BEGIN CERTIFICATE REQUEST"));
    }

    #[test]
    fn test_missing_fields_decode_as_none() {
        let request = AuthenticatedRequest::from_json(b"{}").unwrap();
        assert!(request.hmac.is_none());
        assert!(request.csr.is_none());

        let response = AuthenticatedResponse::from_json(br#"{"error":"forbidden"}"#).unwrap();
        assert_eq!(response.error.as_deref(), Some("forbidden"));
        assert!(response.hmac.is_none());
        assert!(response.certificate.is_none());
    }

    #[test]
    fn test_error_response_omits_success_fields() {
        let json = AuthenticatedResponse::error("forbidden").to_json().unwrap();
        assert_eq!(json, br#"{"error":"forbidden"}"#);
    }

    #[test]
    fn test_invalid_base64_is_protocol_error() {
        let result = AuthenticatedRequest::from_json(br#"{"hmac":"***","csr":"x"}"#);
        assert!(matches!(result, Err(CaError::Protocol(_))));
    }

    #[test]
    fn test_non_json_is_protocol_error() {
        assert!(matches!(
            AuthenticatedResponse::from_json(b"<html>"),
            Err(CaError::Protocol(_))
        ));
    }
}
