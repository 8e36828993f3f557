use serde::{Deserialize, Serialize};
use std::fmt;

/// How a tool publishes the key that verifies its signed messages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PublicKeyType {
    #[serde(rename = "JWK URL")]
    JwkUrl,
    #[serde(rename = "Public Key")]
    PublicKey,
}

impl fmt::Display for PublicKeyType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PublicKeyType::JwkUrl => write!(f, "JWK URL"),
            PublicKeyType::PublicKey => write!(f, "Public Key"),
        }
    }
}

/// A registered external LTI tool. Read-only to this service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    pub uuid: String,
    pub name: String,
    pub client_id: String,
    pub deployment_id: String,
    pub redirect_uris: Vec<String>,
    pub public_key_type: PublicKeyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_keyset_url: Option<String>,
    pub tool_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_login_url: Option<String>,
    #[serde(default)]
    pub enable_grade_sync: bool,
}

/// The key material a tool registration points at, after checking that the
/// discriminator and the populated field agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKeySource<'a> {
    JwksUrl(&'a str),
    PublicKeyPem(&'a str),
}

impl Tool {
    pub fn key_source(&self) -> Result<ToolKeySource<'_>, String> {
        fn non_empty(v: &Option<String>) -> Option<&str> {
            v.as_deref().filter(|s| !s.trim().is_empty())
        }

        match (
            self.public_key_type,
            non_empty(&self.tool_keyset_url),
            non_empty(&self.tool_public_key),
        ) {
            (PublicKeyType::JwkUrl, Some(url), None) => Ok(ToolKeySource::JwksUrl(url)),
            (PublicKeyType::PublicKey, None, Some(pem)) => Ok(ToolKeySource::PublicKeyPem(pem)),
            (kind, url, pem) => Err(format!(
                "Tool {} declares '{}' but has keyset_url={} public_key={}",
                self.client_id,
                kind,
                url.is_some(),
                pem.is_some()
            )),
        }
    }

    pub fn allows_redirect(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|uri| uri == redirect_uri)
    }

    /// Where OIDC third-party login initiation is sent.
    pub fn login_url(&self) -> &str {
        self.tool_login_url.as_deref().unwrap_or(&self.tool_url)
    }
}
