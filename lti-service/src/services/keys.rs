//! Key resolution for launch signing and tool message verification.
//!
//! The platform signs with one RSA key pair loaded at startup and publishes
//! its public half as a JWKS. Tool keys come either from the registration
//! (a PEM) or from the tool's JWKS URL, fetched through a TTL cache that is
//! built once in `main` and shared by every request.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use dashmap::DashMap;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet};
use jsonwebtoken::{DecodingKey, EncodingKey};
use metrics::counter;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use service_core::observability::inject_trace_headers;
use sha2::{Digest, Sha256};
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};
use utoipa::ToSchema;

use super::LtiError;
use crate::config::KeyConfig;
use crate::models::{Tool, ToolKeySource};

/// Public RSA key in JWK form, as published on the platform JWKS endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct PublicJwk {
    #[schema(example = "RSA")]
    pub kty: String,
    pub kid: String,
    #[schema(example = "RS256")]
    pub alg: String,
    #[serde(rename = "use")]
    #[schema(example = "sig")]
    pub key_use: String,
    pub n: String,
    pub e: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Jwks {
    pub keys: Vec<PublicJwk>,
}

/// The platform's signing key pair and its published form.
pub struct PlatformKeySet {
    kid: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    jwks: Jwks,
}

impl PlatformKeySet {
    /// Load the key pair from the PEM files named in the configuration.
    pub fn load(config: &KeyConfig) -> Result<Self, anyhow::Error> {
        let private_key_pem = fs::read_to_string(&config.private_key_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read private key from {}: {}",
                config.private_key_path,
                e
            )
        })?;

        let public_key_pem = fs::read_to_string(&config.public_key_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read public key from {}: {}",
                config.public_key_path,
                e
            )
        })?;

        Self::from_pem(&private_key_pem, &public_key_pem, config.key_id.clone())
    }

    /// Build from PEM text (PKCS#8 or PKCS#1). Fails if the halves do not
    /// belong to the same key pair.
    pub fn from_pem(
        private_key_pem: &str,
        public_key_pem: &str,
        key_id: Option<String>,
    ) -> Result<Self, anyhow::Error> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_key_pem))
            .map_err(|e| anyhow::anyhow!("Failed to parse private key: {}", e))?;

        let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(public_key_pem))
            .map_err(|e| anyhow::anyhow!("Failed to parse public key: {}", e))?;

        if private_key.to_public_key() != public_key {
            return Err(anyhow::anyhow!(
                "Configured public key does not match the private key"
            ));
        }

        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("Failed to load signing key: {}", e))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("Failed to load verification key: {}", e))?;

        let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());
        let kid = key_id.unwrap_or_else(|| rsa_thumbprint(&n, &e));

        tracing::info!(kid = %kid, "Platform RS256 signing key loaded");

        Ok(Self {
            jwks: Jwks {
                keys: vec![PublicJwk {
                    kty: "RSA".to_string(),
                    kid: kid.clone(),
                    alg: "RS256".to_string(),
                    key_use: "sig".to_string(),
                    n,
                    e,
                }],
            },
            kid,
            encoding_key,
            decoding_key,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    pub fn jwks(&self) -> &Jwks {
        &self.jwks
    }
}

/// RFC 7638 JWK thumbprint (SHA-256, base64url) of an RSA public key.
fn rsa_thumbprint(n: &str, e: &str) -> String {
    // Members in lexicographic order, no whitespace.
    let canonical = format!(r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#, e, n);
    URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
}

struct CachedKeySet {
    keys: Arc<JwkSet>,
    fetched_at: Instant,
}

/// Remote key sets by URL, each valid for `ttl` after it was fetched.
pub struct JwksCache {
    entries: DashMap<String, CachedKeySet>,
    ttl: Duration,
}

impl JwksCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, url: &str) -> Option<Arc<JwkSet>> {
        let entry = self.entries.get(url)?;
        if entry.fetched_at.elapsed() < self.ttl {
            Some(entry.keys.clone())
        } else {
            None
        }
    }

    pub fn insert(&self, url: &str, keys: Arc<JwkSet>) {
        self.entries.insert(
            url.to_string(),
            CachedKeySet {
                keys,
                fetched_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Picks the verification key for a token.
///
/// With a `kid`, only the key carrying that id qualifies. Without one, the
/// set must hold exactly one key; anything else is ambiguous and rejected.
fn select_key<'a>(set: &'a JwkSet, kid: Option<&str>) -> Result<Option<&'a Jwk>, LtiError> {
    match kid {
        Some(kid) => Ok(set.find(kid)),
        None => match set.keys.as_slice() {
            [only] => Ok(Some(only)),
            [] => Err(LtiError::KeyResolution("Tool JWKS contains no keys".to_string())),
            keys => Err(LtiError::KeyResolution(format!(
                "Token has no kid and the tool JWKS holds {} keys",
                keys.len()
            ))),
        },
    }
}

fn jwk_to_decoding_key(jwk: &Jwk) -> Result<DecodingKey, LtiError> {
    if !matches!(jwk.algorithm, AlgorithmParameters::RSA(_)) {
        return Err(LtiError::KeyResolution(
            "Tool key is not an RSA key".to_string(),
        ));
    }

    DecodingKey::from_jwk(jwk)
        .map_err(|e| LtiError::KeyResolution(format!("Unusable tool JWK: {}", e)))
}

#[derive(Clone)]
pub struct KeyManager {
    platform: Arc<PlatformKeySet>,
    http: reqwest::Client,
    cache: Arc<JwksCache>,
}

impl KeyManager {
    pub fn new(platform: PlatformKeySet, http: reqwest::Client, cache: Arc<JwksCache>) -> Self {
        Self {
            platform: Arc::new(platform),
            http,
            cache,
        }
    }

    /// HTTP client for JWKS fetches, bounded by the configured timeout.
    pub fn http_client(config: &KeyConfig) -> Result<reqwest::Client, anyhow::Error> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build JWKS HTTP client: {}", e))
    }

    pub fn resolve_platform_keyset(&self) -> &PlatformKeySet {
        &self.platform
    }

    /// Resolve the key that verifies messages signed by `tool`.
    ///
    /// `kid` comes from the (unverified) token header. Fetch failures are
    /// reported immediately; there is no retry.
    pub async fn resolve_tool_key(
        &self,
        tool: &Tool,
        kid: Option<&str>,
        request_id: Option<&str>,
    ) -> Result<DecodingKey, LtiError> {
        let source = tool.key_source().map_err(LtiError::KeyResolution)?;

        match source {
            ToolKeySource::PublicKeyPem(pem) => DecodingKey::from_rsa_pem(pem.as_bytes())
                .map_err(|e| {
                    LtiError::KeyResolution(format!(
                        "Invalid public key registered for tool {}: {}",
                        tool.client_id, e
                    ))
                }),
            ToolKeySource::JwksUrl(url) => {
                if let Some(cached) = self.cache.get(url) {
                    if let Some(jwk) = select_key(&cached, kid)? {
                        return jwk_to_decoding_key(jwk);
                    }
                    tracing::debug!(url = %url, kid = ?kid, "kid not in cached JWKS, refreshing");
                }

                let fresh = self.fetch_jwks(url, request_id).await?;
                self.cache.insert(url, fresh.clone());

                match select_key(&fresh, kid)? {
                    Some(jwk) => jwk_to_decoding_key(jwk),
                    None => Err(LtiError::KeyResolution(format!(
                        "No key with kid '{}' in JWKS of tool {}",
                        kid.unwrap_or_default(),
                        tool.client_id
                    ))),
                }
            }
        }
    }

    async fn fetch_jwks(&self, url: &str, request_id: Option<&str>) -> Result<Arc<JwkSet>, LtiError> {
        let mut headers = reqwest::header::HeaderMap::new();
        inject_trace_headers(&mut headers, request_id);

        let result: Result<JwkSet, String> = async {
            let response = self
                .http
                .get(url)
                .headers(headers)
                .send()
                .await
                .map_err(|e| format!("request failed: {}", e))?
                .error_for_status()
                .map_err(|e| format!("unexpected status: {}", e))?;

            response
                .json::<JwkSet>()
                .await
                .map_err(|e| format!("invalid JWKS document: {}", e))
        }
        .await;

        match result {
            Ok(set) => {
                counter!("lti_jwks_fetch_total", "outcome" => "ok").increment(1);
                tracing::info!(url = %url, keys = set.keys.len(), "Fetched tool JWKS");
                Ok(Arc::new(set))
            }
            Err(reason) => {
                counter!("lti_jwks_fetch_total", "outcome" => "error").increment(1);
                tracing::warn!(url = %url, error = %reason, "Tool JWKS fetch failed");
                Err(LtiError::KeyResolution(format!(
                    "Failed to fetch JWKS from {}: {}",
                    url, reason
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLATFORM_PRIVATE: &str = include_str!("../../tests/fixtures/platform_private.pem");
    const PLATFORM_PUBLIC: &str = include_str!("../../tests/fixtures/platform_public.pem");
    const TOOL_PUBLIC: &str = include_str!("../../tests/fixtures/tool_public.pem");

    fn jwk_set(json: serde_json::Value) -> JwkSet {
        serde_json::from_value(json).expect("valid JWKS")
    }

    fn platform_jwk_json(kid: &str) -> serde_json::Value {
        let set = PlatformKeySet::from_pem(PLATFORM_PRIVATE, PLATFORM_PUBLIC, Some(kid.into()))
            .expect("fixture keys load");
        serde_json::to_value(&set.jwks().keys[0]).unwrap()
    }

    #[test]
    fn test_platform_keyset_publishes_rsa_jwk() {
        let set = PlatformKeySet::from_pem(PLATFORM_PRIVATE, PLATFORM_PUBLIC, None).unwrap();
        let jwk = &set.jwks().keys[0];

        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.alg, "RS256");
        assert_eq!(jwk.key_use, "sig");
        assert_eq!(jwk.e, "AQAB");
        assert_eq!(jwk.kid, set.kid());
        // SHA-256 digest, base64url without padding
        assert_eq!(set.kid().len(), 43);
    }

    #[test]
    fn test_thumbprint_is_stable_and_overridable() {
        let a = PlatformKeySet::from_pem(PLATFORM_PRIVATE, PLATFORM_PUBLIC, None).unwrap();
        let b = PlatformKeySet::from_pem(PLATFORM_PRIVATE, PLATFORM_PUBLIC, None).unwrap();
        assert_eq!(a.kid(), b.kid());

        let c = PlatformKeySet::from_pem(PLATFORM_PRIVATE, PLATFORM_PUBLIC, Some("k1".into()))
            .unwrap();
        assert_eq!(c.kid(), "k1");
    }

    #[test]
    fn test_load_from_files() {
        use std::io::Write;

        let mut private = tempfile::NamedTempFile::new().unwrap();
        private.write_all(PLATFORM_PRIVATE.as_bytes()).unwrap();
        let mut public = tempfile::NamedTempFile::new().unwrap();
        public.write_all(PLATFORM_PUBLIC.as_bytes()).unwrap();

        let config = KeyConfig {
            private_key_path: private.path().to_string_lossy().into_owned(),
            public_key_path: public.path().to_string_lossy().into_owned(),
            key_id: None,
            jwks_cache_ttl_seconds: 300,
            http_timeout_seconds: 10,
        };
        let loaded = PlatformKeySet::load(&config).unwrap();
        let direct = PlatformKeySet::from_pem(PLATFORM_PRIVATE, PLATFORM_PUBLIC, None).unwrap();
        assert_eq!(loaded.jwks(), direct.jwks());

        let missing = KeyConfig {
            private_key_path: "/nonexistent/private.pem".to_string(),
            ..config
        };
        assert!(PlatformKeySet::load(&missing).is_err());
    }

    #[test]
    fn test_mismatched_key_pair_rejected() {
        assert!(PlatformKeySet::from_pem(PLATFORM_PRIVATE, TOOL_PUBLIC, None).is_err());
    }

    #[test]
    fn test_published_jwk_is_a_usable_decoding_key() {
        let set = jwk_set(serde_json::json!({ "keys": [platform_jwk_json("k1")] }));
        let jwk = select_key(&set, Some("k1")).unwrap().expect("key found");
        assert!(jwk_to_decoding_key(jwk).is_ok());
    }

    #[test]
    fn test_select_by_kid() {
        let set = jwk_set(serde_json::json!({
            "keys": [platform_jwk_json("a"), platform_jwk_json("b")]
        }));

        let jwk = select_key(&set, Some("b")).unwrap().expect("key found");
        assert_eq!(jwk.common.key_id.as_deref(), Some("b"));
        assert!(select_key(&set, Some("missing")).unwrap().is_none());
    }

    #[test]
    fn test_missing_kid_requires_single_key() {
        let single = jwk_set(serde_json::json!({ "keys": [platform_jwk_json("a")] }));
        assert!(select_key(&single, None).unwrap().is_some());

        let multiple = jwk_set(serde_json::json!({
            "keys": [platform_jwk_json("a"), platform_jwk_json("b")]
        }));
        assert!(matches!(
            select_key(&multiple, None),
            Err(LtiError::KeyResolution(_))
        ));

        let empty = jwk_set(serde_json::json!({ "keys": [] }));
        assert!(matches!(
            select_key(&empty, None),
            Err(LtiError::KeyResolution(_))
        ));
    }

    #[test]
    fn test_cache_entries_expire() {
        let cache = JwksCache::new(Duration::from_millis(0));
        cache.insert("https://tool/jwks", Arc::new(jwk_set(serde_json::json!({"keys": []}))));
        assert_eq!(cache.len(), 1);
        assert!(cache.get("https://tool/jwks").is_none());

        let cache = JwksCache::new(Duration::from_secs(60));
        cache.insert("https://tool/jwks", Arc::new(jwk_set(serde_json::json!({"keys": []}))));
        assert!(cache.get("https://tool/jwks").is_some());
        assert!(cache.get("https://other/jwks").is_none());
    }
}
