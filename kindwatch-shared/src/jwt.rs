use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{self, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::Role;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub jti: String,
    pub exp: i64,
    pub role: Role,
    /// Present on device tokens; parent tokens carry no device binding.
    pub device_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("invalid token: {0}")]
    Decode(String),
    #[error("encoding failed: {0}")]
    Encode(String),
}

/// Read claims without verifying the signature. Used by clients to inspect
/// their own token (e.g. device binding); never for server-side auth.
pub fn decode_unverified(token: &str) -> Result<JwtClaims, JwtError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() < 2 {
        return Err(JwtError::Decode("invalid JWT format".into()));
    }
    let payload_bytes = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|e| JwtError::Decode(format!("invalid base64 payload: {e}")))?;
    serde_json::from_slice::<JwtClaims>(&payload_bytes)
        .map_err(|e| JwtError::Decode(format!("invalid json payload: {e}")))
}

pub fn decode_and_verify(token: &str, secret: &[u8]) -> Result<JwtClaims, JwtError> {
    let key = DecodingKey::from_secret(secret);
    let validation = Validation::new(Algorithm::HS256);
    jsonwebtoken::decode::<JwtClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| JwtError::Decode(e.to_string()))
}

pub fn encode(claims: &JwtClaims, secret: &[u8]) -> Result<String, JwtError> {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| JwtError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(role: Role, device_id: Option<&str>) -> JwtClaims {
        JwtClaims {
            sub: "parent".into(),
            jti: "jti-1".into(),
            exp: 4_102_444_800, // far future
            role,
            device_id: device_id.map(|s| s.to_string()),
        }
    }

    #[test]
    fn roundtrip_verify() {
        let secret = b"s3cret";
        let token = encode(&claims(Role::Device, Some("dev-1")), secret).unwrap();
        let decoded = decode_and_verify(&token, secret).unwrap();
        assert_eq!(decoded.sub, "parent");
        assert_eq!(decoded.role, Role::Device);
        assert_eq!(decoded.device_id.as_deref(), Some("dev-1"));
    }

    #[test]
    fn wrong_secret_rejected() {
        let token = encode(&claims(Role::Parent, None), b"good").unwrap();
        assert!(decode_and_verify(&token, b"bad").is_err());
    }

    #[test]
    fn unverified_decode_reads_payload() {
        let token = encode(&claims(Role::Parent, None), b"whatever").unwrap();
        let decoded = decode_unverified(&token).unwrap();
        assert_eq!(decoded.role, Role::Parent);
        assert!(decoded.device_id.is_none());
    }
}
