//! Deep-linking response intake: verify a tool-signed message and persist the
//! content items it carries.

use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use utoipa::ToSchema;

use super::keys::KeyManager;
use super::token::TokenCodec;
use super::{LtiError, LtiStore};
use crate::models::LtiContentItem;

const DEEP_LINKING_RESPONSE: &str = "LtiDeepLinkingResponse";

#[derive(Debug, Deserialize)]
struct DeepLinkingResponse {
    #[serde(
        rename = "https://purl.imsglobal.org/spec/lti/claim/message_type",
        default
    )]
    message_type: Option<String>,
    #[serde(
        rename = "https://purl.imsglobal.org/spec/lti-dl/claim/content_items",
        default
    )]
    content_items: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeOutcome {
    Persisted,
    /// Verified, but the tool returned no content items.
    Empty,
    RejectedUnknownTool,
    RejectedBadSignature,
    RejectedInternal,
}

impl IntakeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntakeOutcome::Persisted => "persisted",
            IntakeOutcome::Empty => "empty",
            IntakeOutcome::RejectedUnknownTool => "rejected-unknown-tool",
            IntakeOutcome::RejectedBadSignature => "rejected-bad-signature",
            IntakeOutcome::RejectedInternal => "rejected-internal",
        }
    }

    fn from_receipt(receipt: &IntakeReceipt) -> Self {
        if receipt.persisted_ids.is_empty() {
            IntakeOutcome::Empty
        } else {
            IntakeOutcome::Persisted
        }
    }

    fn from_error(err: &LtiError) -> Self {
        match err {
            LtiError::NotFound(_) => IntakeOutcome::RejectedUnknownTool,
            LtiError::InvalidToken(_) => IntakeOutcome::RejectedBadSignature,
            LtiError::UnauthorizedRedirect(_)
            | LtiError::KeyResolution(_)
            | LtiError::Internal(_) => IntakeOutcome::RejectedInternal,
        }
    }
}

/// Result of a successful intake.
#[derive(Debug, Clone, Serialize, PartialEq, ToSchema)]
pub struct IntakeReceipt {
    pub tool_id: String,
    /// The content-items claim as the tool sent it; an empty array when the
    /// tool returned none.
    #[schema(value_type = Object)]
    pub content_items: Value,
    pub persisted_ids: Vec<String>,
}

#[derive(Clone)]
pub struct ContentItemIntake {
    store: Arc<dyn LtiStore>,
    keys: KeyManager,
    codec: TokenCodec,
    issuer: String,
}

impl ContentItemIntake {
    pub fn new(
        store: Arc<dyn LtiStore>,
        keys: KeyManager,
        codec: TokenCodec,
        issuer: impl Into<String>,
    ) -> Self {
        Self {
            store,
            keys,
            codec,
            issuer: issuer.into(),
        }
    }

    #[tracing::instrument(skip(self, jwt))]
    pub async fn receive(
        &self,
        jwt: &str,
        request_id: Option<&str>,
    ) -> Result<IntakeReceipt, LtiError> {
        let result = self.process(jwt, request_id).await;

        let outcome = match &result {
            Ok(receipt) => IntakeOutcome::from_receipt(receipt),
            Err(e) => IntakeOutcome::from_error(e),
        };
        counter!("lti_content_item_intake_total", "outcome" => outcome.as_str()).increment(1);

        match &result {
            Ok(receipt) => tracing::info!(
                outcome = outcome.as_str(),
                tool_id = %receipt.tool_id,
                persisted = receipt.persisted_ids.len(),
                "Content items received"
            ),
            Err(e) => tracing::warn!(outcome = outcome.as_str(), error = %e, "Content item intake rejected"),
        }

        result
    }

    async fn process(&self, jwt: &str, request_id: Option<&str>) -> Result<IntakeReceipt, LtiError> {
        tracing::debug!(stage = "received", "Deep linking response received");

        let peeked = self.codec.peek_unverified(jwt)?;
        let client_id = peeked
            .issuer()
            .ok_or_else(|| LtiError::InvalidToken("missing iss claim".to_string()))?;

        let tool = self
            .store
            .find_tool_by_client_id(client_id)
            .await?
            .ok_or_else(|| {
                LtiError::NotFound(format!("Tool with client_id {} not found", client_id))
            })?;

        let key = self
            .keys
            .resolve_tool_key(&tool, peeked.key_id(), request_id)
            .await?;
        tracing::debug!(stage = "key-resolved", client_id = %tool.client_id);

        let response = self
            .codec
            .decode::<DeepLinkingResponse>(jwt, &key, &self.issuer)?
            .into_inner();

        if let Some(message_type) = response.message_type.as_deref() {
            if message_type != DEEP_LINKING_RESPONSE {
                return Err(LtiError::InvalidToken(format!(
                    "unexpected message_type {}",
                    message_type
                )));
            }
        }
        tracing::debug!(stage = "verified", client_id = %tool.client_id);

        let (content_items, entries) = match response.content_items {
            None | Some(Value::Null) => (Value::Array(Vec::new()), Vec::new()),
            Some(Value::Array(items)) => (Value::Array(items.clone()), items),
            Some(item @ Value::Object(_)) => (item.clone(), vec![item]),
            Some(_) => {
                return Err(LtiError::InvalidToken(
                    "content_items must be an object or an array".to_string(),
                ))
            }
        };

        let records: Vec<LtiContentItem> = entries
            .into_iter()
            .map(|info| LtiContentItem::new(&tool.uuid, info))
            .collect();

        if records.is_empty() {
            tracing::debug!(stage = "empty", "Deep linking response carried no content items");
        } else {
            self.store.insert_content_items(&records).await?;
            tracing::debug!(stage = "persisted", count = records.len());
        }

        Ok(IntakeReceipt {
            tool_id: tool.uuid,
            content_items,
            persisted_ids: records.into_iter().map(|r| r.uuid).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PublicKeyType, Tool};
    use crate::services::keys::{JwksCache, PlatformKeySet};
    use crate::services::InMemoryStore;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde_json::json;
    use std::time::Duration;

    const PLATFORM_PRIVATE: &str = include_str!("../../tests/fixtures/platform_private.pem");
    const PLATFORM_PUBLIC: &str = include_str!("../../tests/fixtures/platform_public.pem");
    const TOOL_PRIVATE: &str = include_str!("../../tests/fixtures/tool_private.pem");
    const TOOL_PUBLIC: &str = include_str!("../../tests/fixtures/tool_public.pem");

    const ISSUER: &str = "https://lms.example.com";

    fn tool() -> Tool {
        Tool {
            uuid: "tool-uuid".to_string(),
            name: "Quiz Tool".to_string(),
            client_id: "client-1".to_string(),
            deployment_id: "deployment-1".to_string(),
            redirect_uris: vec!["https://tool.example.com/launch".to_string()],
            public_key_type: PublicKeyType::PublicKey,
            tool_public_key: Some(TOOL_PUBLIC.to_string()),
            tool_keyset_url: None,
            tool_url: "https://tool.example.com".to_string(),
            tool_login_url: None,
            enable_grade_sync: false,
        }
    }

    fn intake() -> (ContentItemIntake, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        store.insert_tool(tool()).unwrap();

        let platform = PlatformKeySet::from_pem(PLATFORM_PRIVATE, PLATFORM_PUBLIC, None).unwrap();
        let keys = KeyManager::new(
            platform,
            reqwest::Client::new(),
            Arc::new(JwksCache::new(Duration::from_secs(60))),
        );
        let codec = TokenCodec::new(keys.clone(), 0);
        (
            ContentItemIntake::new(store.clone(), keys, codec, ISSUER),
            store,
        )
    }

    fn tool_signed(body: Value) -> String {
        let key = EncodingKey::from_rsa_pem(TOOL_PRIVATE.as_bytes()).unwrap();
        encode(&Header::new(Algorithm::RS256), &body, &key).unwrap()
    }

    fn response(iss: &str, content_items: Option<Value>) -> Value {
        let now = chrono::Utc::now().timestamp();
        let mut body = json!({
            "iss": iss,
            "aud": ISSUER,
            "iat": now,
            "exp": now + 300,
            "https://purl.imsglobal.org/spec/lti/claim/message_type": "LtiDeepLinkingResponse",
            "https://purl.imsglobal.org/spec/lti/claim/version": "1.3.0",
        });
        if let Some(items) = content_items {
            body["https://purl.imsglobal.org/spec/lti-dl/claim/content_items"] = items;
        }
        body
    }

    #[tokio::test]
    async fn test_two_items_persisted() {
        let (intake, store) = intake();
        let jwt = tool_signed(response(
            "client-1",
            Some(json!([
                {"type": "ltiResourceLink", "title": "Quiz 1", "url": "https://tool.example.com/q/1"},
                {"type": "link", "title": "Reading", "url": "https://example.com/reading"}
            ])),
        ));

        let receipt = intake.receive(&jwt, None).await.unwrap();

        let stored = store.content_items().unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(receipt.persisted_ids.len(), 2);
        assert_eq!(IntakeOutcome::from_receipt(&receipt), IntakeOutcome::Persisted);
        for item in &stored {
            assert!(!item.uuid.is_empty());
            assert_eq!(item.tool_id, "tool-uuid");
            assert!(receipt.persisted_ids.contains(&item.uuid));
        }
        assert_eq!(receipt.content_items.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_single_object_persisted_as_one_record() {
        let (intake, store) = intake();
        let jwt = tool_signed(response(
            "client-1",
            Some(json!({"type": "html", "html": "<p>Hi</p>"})),
        ));

        let receipt = intake.receive(&jwt, None).await.unwrap();

        let stored = store.content_items().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content_item_type, "html");
        assert_eq!(receipt.content_items["type"], "html");
    }

    #[tokio::test]
    async fn test_absent_items_persist_nothing() {
        let (intake, store) = intake();
        let jwt = tool_signed(response("client-1", None));

        let receipt = intake.receive(&jwt, None).await.unwrap();

        assert!(store.content_items().unwrap().is_empty());
        assert!(receipt.persisted_ids.is_empty());
        assert_eq!(receipt.content_items, json!([]));
        assert_eq!(IntakeOutcome::from_receipt(&receipt), IntakeOutcome::Empty);
    }

    #[tokio::test]
    async fn test_empty_response_skips_store_write() {
        let (intake, store) = intake();
        store.set_reject_writes(true);
        let jwt = tool_signed(response("client-1", Some(json!([]))));

        let receipt = intake.receive(&jwt, None).await.unwrap();

        assert!(receipt.persisted_ids.is_empty());
        assert_eq!(IntakeOutcome::from_receipt(&receipt), IntakeOutcome::Empty);
        assert_eq!(IntakeOutcome::Empty.as_str(), "empty");
    }

    #[tokio::test]
    async fn test_scalar_items_rejected() {
        let (intake, store) = intake();
        let jwt = tool_signed(response("client-1", Some(json!("not-an-item"))));

        let err = intake.receive(&jwt, None).await.unwrap_err();
        assert!(matches!(err, LtiError::InvalidToken(_)));
        assert!(store.content_items().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_issuer_rejected_without_writes() {
        let (intake, store) = intake();
        let jwt = tool_signed(response("unregistered", Some(json!([{"type": "link"}]))));

        let err = intake.receive(&jwt, None).await.unwrap_err();
        assert!(matches!(err, LtiError::NotFound(_)));
        assert_eq!(IntakeOutcome::from_error(&err), IntakeOutcome::RejectedUnknownTool);
        assert!(store.content_items().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_signature_rejected() {
        let (intake, store) = intake();
        // Signed with the platform key, not the key registered for the tool.
        let key = EncodingKey::from_rsa_pem(PLATFORM_PRIVATE.as_bytes()).unwrap();
        let body = response("client-1", Some(json!([{"type": "link"}])));
        let jwt = encode(&Header::new(Algorithm::RS256), &body, &key).unwrap();

        let err = intake.receive(&jwt, None).await.unwrap_err();
        assert!(matches!(err, LtiError::InvalidToken(_)));
        assert!(store.content_items().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_audience_rejected() {
        let (intake, _) = intake();
        let mut body = response("client-1", Some(json!([{"type": "link"}])));
        body["aud"] = json!("https://other-platform.example.com");

        let err = intake.receive(&tool_signed(body), None).await.unwrap_err();
        assert!(matches!(err, LtiError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_other_message_type_rejected() {
        let (intake, store) = intake();
        let mut body = response("client-1", Some(json!([{"type": "link"}])));
        body["https://purl.imsglobal.org/spec/lti/claim/message_type"] =
            json!("LtiResourceLinkRequest");

        let err = intake.receive(&tool_signed(body), None).await.unwrap_err();
        assert!(matches!(err, LtiError::InvalidToken(_)));
        assert!(store.content_items().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_is_internal() {
        let (intake, store) = intake();
        store.set_reject_writes(true);
        let jwt = tool_signed(response("client-1", Some(json!([{"type": "link"}]))));

        let err = intake.receive(&jwt, None).await.unwrap_err();
        assert!(matches!(err, LtiError::Internal(_)));
        assert_eq!(IntakeOutcome::from_error(&err), IntakeOutcome::RejectedInternal);
    }

    #[tokio::test]
    async fn test_garbage_token_rejected() {
        let (intake, _) = intake();
        let err = intake.receive("garbage", None).await.unwrap_err();
        assert!(matches!(err, LtiError::InvalidToken(_)));
    }
}
