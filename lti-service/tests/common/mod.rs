//! Shared setup for lti-service integration tests: an in-memory store seeded
//! with two tools and three users, fixture RSA keys, and a local JWKS server
//! standing in for a tool's keyset URL.

#![allow(dead_code)]

use axum::{body::Body, http::Request, response::Response, routing, Json, Router};
use http_body_util::BodyExt;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use lti_service::{
    build_router,
    config::{
        Environment, KeyConfig, LtiConfig, MongoConfig, PlatformConfig, SecurityConfig,
        SwaggerConfig, SwaggerMode,
    },
    models::{PublicKeyType, TempUser, Tool, UserType},
    services::{InMemoryStore, PlatformKeySet},
    AppState,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceExt;

pub const PLATFORM_PRIVATE: &str = include_str!("../fixtures/platform_private.pem");
pub const PLATFORM_PUBLIC: &str = include_str!("../fixtures/platform_public.pem");
pub const TOOL_PRIVATE: &str = include_str!("../fixtures/tool_private.pem");
pub const TOOL_PUBLIC: &str = include_str!("../fixtures/tool_public.pem");

pub const ISSUER: &str = "https://lms.example.com";
pub const PEM_CLIENT: &str = "pem-client";
pub const JWKS_CLIENT: &str = "jwks-client";
pub const TOOL_KID: &str = "tool-key-1";
pub const REDIRECT_URI: &str = "https://tool.example.com/launch";

pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemoryStore>,
    pub state: AppState,
    pub jwks_url: String,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let jwks_url = spawn_tool_jwks_server().await;

        let store = Arc::new(InMemoryStore::new());
        store
            .insert_tool(tool(PEM_CLIENT, PublicKeyType::PublicKey, None))
            .unwrap();
        store
            .insert_tool(tool(JWKS_CLIENT, PublicKeyType::JwkUrl, Some(&jwks_url)))
            .unwrap();
        for (id, user_type) in [
            ("learner-1", UserType::Learner),
            ("faculty-1", UserType::Faculty),
            ("admin-1", UserType::Admin),
        ] {
            store
                .insert_user(TempUser {
                    user_id: id.to_string(),
                    first_name: "Test".to_string(),
                    last_name: id.to_string(),
                    email: format!("{}@example.com", id),
                    user_type,
                })
                .unwrap();
        }

        let platform = PlatformKeySet::from_pem(PLATFORM_PRIVATE, PLATFORM_PUBLIC, None)
            .expect("fixture platform keys load");
        let state = AppState::new(test_config(), store.clone(), platform)
            .expect("Failed to build app state");
        let router = build_router(state.clone()).expect("Failed to build router");

        Self {
            router,
            store,
            state,
            jwks_url,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

pub fn test_config() -> LtiConfig {
    LtiConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "lti-service".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        mongodb: MongoConfig {
            uri: "mongodb://unused".to_string(),
            database: "lti_test".to_string(),
        },
        platform: PlatformConfig {
            issuer: ISSUER.to_string(),
            token_ttl_seconds: 3600,
            token_leeway_seconds: 0,
        },
        keys: KeyConfig {
            private_key_path: String::new(),
            public_key_path: String::new(),
            key_id: None,
            jwks_cache_ttl_seconds: 300,
            http_timeout_seconds: 5,
        },
        security: SecurityConfig {
            allowed_origins: vec!["*".to_string()],
        },
        swagger: SwaggerConfig {
            enabled: SwaggerMode::Public,
        },
    }
}

pub fn tool(client_id: &str, key_type: PublicKeyType, jwks_url: Option<&str>) -> Tool {
    Tool {
        uuid: format!("{}-uuid", client_id),
        name: format!("Tool {}", client_id),
        client_id: client_id.to_string(),
        deployment_id: format!("{}-deployment", client_id),
        redirect_uris: vec![REDIRECT_URI.to_string()],
        public_key_type: key_type,
        tool_public_key: match key_type {
            PublicKeyType::PublicKey => Some(TOOL_PUBLIC.to_string()),
            PublicKeyType::JwkUrl => None,
        },
        tool_keyset_url: jwks_url.map(str::to_string),
        tool_url: "https://tool.example.com/home".to_string(),
        tool_login_url: Some("https://tool.example.com/login".to_string()),
        enable_grade_sync: false,
    }
}

/// Serves the tool fixture key as a one-entry JWKS on an ephemeral port.
async fn spawn_tool_jwks_server() -> String {
    let keys = PlatformKeySet::from_pem(TOOL_PRIVATE, TOOL_PUBLIC, Some(TOOL_KID.to_string()))
        .expect("fixture tool keys load");
    let jwks = keys.jwks().clone();

    let app = Router::new().route("/jwks", routing::get(move || async move { Json(jwks) }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}/jwks", addr)
}

/// A deep-linking response signed with the tool fixture key.
pub fn deep_linking_response(iss: &str, kid: Option<&str>, content_items: Value) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = json!({
        "iss": iss,
        "aud": ISSUER,
        "iat": now,
        "exp": now + 300,
        "nonce": "response-nonce",
        "https://purl.imsglobal.org/spec/lti/claim/message_type": "LtiDeepLinkingResponse",
        "https://purl.imsglobal.org/spec/lti/claim/version": "1.3.0",
        "https://purl.imsglobal.org/spec/lti-dl/claim/content_items": content_items,
    });

    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    let key = EncodingKey::from_rsa_pem(TOOL_PRIVATE.as_bytes()).unwrap();
    encode(&header, &claims, &key).unwrap()
}

pub fn form_post(uri: &str, body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn body_string(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

/// Reverses the entity escaping applied by the launch page template.
pub fn unescape_html(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#x2f;", "/")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn attribute_after(html: &str, marker: &str) -> Option<String> {
    let start = html.find(marker)? + marker.len();
    let end = html[start..].find('"')?;
    Some(unescape_html(&html[start..start + end]))
}

/// Pulls the value of a hidden input out of the auto-submit launch page.
pub fn hidden_input(html: &str, name: &str) -> Option<String> {
    attribute_after(html, &format!(r#"name="{}" value=""#, name))
}

/// The URL the launch page posts to.
pub fn form_action(html: &str) -> Option<String> {
    attribute_after(html, r#"action=""#)
}
