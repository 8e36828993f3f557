use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::keys::KeyManager;
use super::LtiError;

/// Claims whose signature, audience and expiry have been checked.
#[derive(Debug, Clone)]
pub struct VerifiedClaims<T> {
    header: Header,
    claims: T,
}

impl<T> VerifiedClaims<T> {
    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn claims(&self) -> &T {
        &self.claims
    }

    pub fn into_inner(self) -> T {
        self.claims
    }
}

/// Routing hints read from a token before its signature is checked.
///
/// Only the fields needed to pick a verification key are reachable; the
/// payload itself is never exposed.
#[derive(Debug, Clone)]
pub struct UnverifiedClaims {
    key_id: Option<String>,
    issuer: Option<String>,
    audience: Vec<String>,
}

impl UnverifiedClaims {
    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    pub fn audience(&self) -> &[String] {
        &self.audience
    }
}

#[derive(Clone)]
pub struct TokenCodec {
    keys: KeyManager,
    leeway_seconds: u64,
}

impl TokenCodec {
    pub fn new(keys: KeyManager, leeway_seconds: u64) -> Self {
        Self {
            keys,
            leeway_seconds,
        }
    }

    /// Sign `claims` with the platform key. The header carries the platform
    /// `kid` so tools can pick the key from the published JWKS.
    pub fn encode<T: Serialize>(&self, claims: &T) -> Result<String, LtiError> {
        let platform = self.keys.resolve_platform_keyset();

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(platform.kid().to_string());

        encode(&header, claims, platform.encoding_key())
            .map_err(|e| LtiError::Internal(anyhow::anyhow!("Failed to sign token: {}", e)))
    }

    pub fn decode<T: DeserializeOwned>(
        &self,
        token: &str,
        key: &DecodingKey,
        audience: &str,
    ) -> Result<VerifiedClaims<T>, LtiError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[audience]);
        validation.leeway = self.leeway_seconds;
        validation.validate_exp = true;

        let data = decode::<T>(token, key, &validation).map_err(|e| {
            let reason = match e.kind() {
                ErrorKind::ExpiredSignature => "token has expired".to_string(),
                ErrorKind::InvalidSignature => "signature verification failed".to_string(),
                ErrorKind::InvalidAudience => format!("audience is not {}", audience),
                ErrorKind::InvalidAlgorithm => "only RS256 is accepted".to_string(),
                _ => e.to_string(),
            };
            tracing::debug!(error = %e, "Token rejected");
            LtiError::InvalidToken(reason)
        })?;

        Ok(VerifiedClaims {
            header: data.header,
            claims: data.claims,
        })
    }

    pub fn peek_unverified(&self, token: &str) -> Result<UnverifiedClaims, LtiError> {
        let header = decode_header(token)
            .map_err(|e| LtiError::InvalidToken(format!("malformed header: {}", e)))?;

        let payload = token
            .split('.')
            .nth(1)
            .ok_or_else(|| LtiError::InvalidToken("missing payload segment".to_string()))?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| LtiError::InvalidToken(format!("malformed payload: {}", e)))?;
        let body: Value = serde_json::from_slice(&bytes)
            .map_err(|e| LtiError::InvalidToken(format!("malformed payload: {}", e)))?;

        if !body.is_object() {
            return Err(LtiError::InvalidToken(
                "payload is not a JSON object".to_string(),
            ));
        }

        let audience = match body.get("aud") {
            Some(Value::String(aud)) => vec![aud.clone()],
            Some(Value::Array(auds)) => auds
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };

        Ok(UnverifiedClaims {
            key_id: header.kid,
            issuer: body.get("iss").and_then(Value::as_str).map(str::to_string),
            audience,
        })
    }
}
