//! Launch claim assembly.
//!
//! Claims are held in [`LaunchClaims`], a typed struct whose serde names are
//! the namespaced LTI claim URIs. The URI strings live only in the serde
//! attributes, so a misspelt claim fails the round-trip tests below instead
//! of producing a silently wrong token.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use utoipa::ToSchema;

use super::{LtiError, LtiStore};
use crate::config::PlatformConfig;
use crate::models::{LtiContentItem, TempUser, Tool, UserType};

pub const LTI_VERSION: &str = "1.3.0";

pub const DEEP_LINK_RETURN_PATH: &str = "/lti/api/v1/content-item-return";

/// `https://purl.imsglobal.org/spec/lti[-{suffix}]/{field_type}/{claim_type}`
pub fn claim_uri(field_type: &str, claim_type: &str, suffix: Option<&str>) -> String {
    let suffix = suffix.map(|s| format!("-{}", s)).unwrap_or_default();
    format!(
        "https://purl.imsglobal.org/spec/lti{}/{}/{}",
        suffix, field_type, claim_type
    )
}

pub mod roles {
    pub const INSTITUTION_STUDENT: &str =
        "http://purl.imsglobal.org/vocab/lis/v2/institution/person#Student";
    pub const INSTITUTION_INSTRUCTOR: &str =
        "http://purl.imsglobal.org/vocab/lis/v2/institution/person#Instructor";
    pub const INSTITUTION_FACULTY: &str =
        "http://purl.imsglobal.org/vocab/lis/v2/institution/person#Faculty";
    pub const INSTITUTION_ADMINISTRATOR: &str =
        "http://purl.imsglobal.org/vocab/lis/v2/institution/person#Administrator";
    pub const SYSTEM_ADMINISTRATOR: &str =
        "http://purl.imsglobal.org/vocab/lis/v2/system/person#Administrator";
    pub const MEMBERSHIP_STUDENT: &str = "http://purl.imsglobal.org/vocab/lis/v2/membership#Student";
    pub const MEMBERSHIP_INSTRUCTOR: &str =
        "http://purl.imsglobal.org/vocab/lis/v2/membership#Instructor";
}

const COURSE_OFFERING: &str = "http://purl.imsglobal.org/vocab/lis/v2/course#CourseOffering";

const ACCEPT_TYPES: [&str; 5] = ["link", "file", "html", "ltiResourceLink", "image"];
const ACCEPT_TARGETS: [&str; 3] = ["iframe", "window", "embed"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LaunchRequestType {
    DeepLink,
    ResourceLink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    LtiDeepLinkingRequest,
    LtiResourceLinkRequest,
}

/// Inputs of a launch, as received from the OIDC authorization request.
#[derive(Debug, Clone)]
pub struct LaunchRequest<'a> {
    pub request_type: LaunchRequestType,
    pub client_id: &'a str,
    pub login_hint: &'a str,
    pub message_hint: Option<&'a str>,
    pub nonce: &'a str,
    pub redirect_uri: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeepLinkingSettings {
    pub accept_types: Vec<String>,
    pub accept_presentation_document_targets: Vec<String>,
    pub accept_multiple: bool,
    pub auto_create: bool,
    pub title: String,
    pub text: String,
    pub deep_link_return_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceLinkClaim {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Assignment and Grade Services endpoint claim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgsEndpointClaim {
    pub scope: Vec<String>,
    pub lineitems: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineitem: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextClaim {
    pub id: String,
    pub label: String,
    pub title: String,
    #[serde(rename = "type")]
    pub context_type: Vec<String>,
}

impl ContextClaim {
    /// Fixed course context used until launches are bound to real courses.
    pub fn placeholder() -> Self {
        Self {
            id: "default-context".to_string(),
            label: "Default Course".to_string(),
            title: "Default course context".to_string(),
            context_type: vec![COURSE_OFFERING.to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LaunchClaims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub nonce: String,
    pub iat: i64,
    pub exp: i64,
    pub given_name: String,
    pub family_name: String,
    pub name: String,
    pub email: String,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/message_type")]
    pub message_type: MessageType,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/version")]
    pub version: String,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/deployment_id")]
    pub deployment_id: String,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/roles")]
    pub roles: Vec<String>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/context")]
    pub context: ContextClaim,
    #[serde(
        rename = "https://purl.imsglobal.org/spec/lti-dl/claim/deep_linking_settings",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub deep_linking_settings: Option<DeepLinkingSettings>,
    #[serde(
        rename = "https://purl.imsglobal.org/spec/lti/claim/target_link_uri",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub target_link_uri: Option<String>,
    #[serde(
        rename = "https://purl.imsglobal.org/spec/lti/claim/resource_link",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub resource_link: Option<ResourceLinkClaim>,
    #[serde(
        rename = "https://purl.imsglobal.org/spec/lti/claim/custom",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub custom: Option<Map<String, Value>>,
    #[serde(
        rename = "https://purl.imsglobal.org/spec/lti-ags/claim/endpoint",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ags_endpoint: Option<AgsEndpointClaim>,
}

/// Role URIs granted to each platform user type.
pub fn roles_for(user_type: UserType) -> Vec<String> {
    let uris: &[&str] = match user_type {
        UserType::Learner => &[roles::INSTITUTION_STUDENT, roles::MEMBERSHIP_STUDENT],
        UserType::Faculty => &[
            roles::INSTITUTION_INSTRUCTOR,
            roles::INSTITUTION_FACULTY,
            roles::MEMBERSHIP_INSTRUCTOR,
        ],
        UserType::Admin => &[roles::INSTITUTION_ADMINISTRATOR, roles::SYSTEM_ADMINISTRATOR],
    };
    uris.iter().map(|uri| uri.to_string()).collect()
}

fn ags_scopes() -> Vec<String> {
    ["lineitem", "result.readonly", "score"]
        .iter()
        .map(|scope| claim_uri("scope", scope, Some("ags")))
        .collect()
}

#[derive(Clone)]
pub struct ClaimsBuilder {
    store: Arc<dyn LtiStore>,
    issuer: String,
    token_ttl_seconds: i64,
}

impl ClaimsBuilder {
    pub fn new(store: Arc<dyn LtiStore>, platform: &PlatformConfig) -> Self {
        Self {
            store,
            issuer: platform.issuer.clone(),
            token_ttl_seconds: platform.token_ttl_seconds,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn deep_link_return_url(&self) -> String {
        format!("{}{}", self.issuer, DEEP_LINK_RETURN_PATH)
    }

    fn line_items_url(&self, context_id: &str) -> String {
        format!("{}/lti/api/v1/{}/line_items", self.issuer, context_id)
    }

    pub async fn find_tool(&self, client_id: &str) -> Result<Tool, LtiError> {
        self.store
            .find_tool_by_client_id(client_id)
            .await?
            .ok_or_else(|| {
                LtiError::NotFound(format!("Tool with client_id {} not found", client_id))
            })
    }

    async fn find_user(&self, user_id: &str) -> Result<TempUser, LtiError> {
        self.store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| LtiError::NotFound(format!("User with id {} not found", user_id)))
    }

    async fn find_content_item(&self, uuid: &str) -> Result<LtiContentItem, LtiError> {
        self.store
            .find_content_item(uuid)
            .await?
            .ok_or_else(|| {
                LtiError::NotFound(format!("Content item with id {} not found", uuid))
            })
    }

    /// Assemble the claim set for a launch. Either every lookup succeeds and
    /// the full set is returned, or the first failure is.
    #[tracing::instrument(
        skip(self, request),
        fields(client_id = %request.client_id, request_type = ?request.request_type)
    )]
    pub async fn build_claims(&self, request: &LaunchRequest<'_>) -> Result<LaunchClaims, LtiError> {
        let tool = self.find_tool(request.client_id).await?;

        if !tool.allows_redirect(request.redirect_uri) {
            tracing::warn!(redirect_uri = %request.redirect_uri, "Launch rejected: unregistered redirect_uri");
            return Err(LtiError::UnauthorizedRedirect(
                request.redirect_uri.to_string(),
            ));
        }

        let user = self.find_user(request.login_hint).await?;

        let iat = Utc::now().timestamp();
        let exp = iat.checked_add(self.token_ttl_seconds).ok_or_else(|| {
            LtiError::Internal(anyhow::anyhow!(
                "Token TTL of {}s overflows the expiry timestamp",
                self.token_ttl_seconds
            ))
        })?;
        let context = ContextClaim::placeholder();

        let mut claims = LaunchClaims {
            iss: self.issuer.clone(),
            aud: request.client_id.to_string(),
            sub: request.login_hint.to_string(),
            nonce: request.nonce.to_string(),
            iat,
            exp,
            given_name: user.first_name.clone(),
            family_name: user.last_name.clone(),
            name: user.full_name(),
            email: user.email.clone(),
            message_type: MessageType::LtiDeepLinkingRequest,
            version: LTI_VERSION.to_string(),
            deployment_id: tool.deployment_id.clone(),
            roles: roles_for(user.user_type),
            context,
            deep_linking_settings: None,
            target_link_uri: None,
            resource_link: None,
            custom: None,
            ags_endpoint: None,
        };

        match request.request_type {
            LaunchRequestType::DeepLink => {
                claims.message_type = MessageType::LtiDeepLinkingRequest;
                claims.deep_linking_settings = Some(DeepLinkingSettings {
                    accept_types: ACCEPT_TYPES.iter().map(|t| t.to_string()).collect(),
                    accept_presentation_document_targets: ACCEPT_TARGETS
                        .iter()
                        .map(|t| t.to_string())
                        .collect(),
                    accept_multiple: false,
                    auto_create: false,
                    title: String::new(),
                    text: String::new(),
                    deep_link_return_url: self.deep_link_return_url(),
                });
            }
            LaunchRequestType::ResourceLink => {
                let hint = request.message_hint.ok_or_else(|| {
                    LtiError::NotFound(
                        "lti_message_hint naming a content item is required for resource link launches"
                            .to_string(),
                    )
                })?;
                let content_item = self.find_content_item(hint).await?;
                // Items are only launchable through the tool that returned them.
                if content_item.tool_id != tool.uuid {
                    tracing::warn!(
                        content_item = %hint,
                        owner = %content_item.tool_id,
                        "Launch rejected: content item belongs to another tool"
                    );
                    return Err(LtiError::NotFound(format!(
                        "Content item with id {} not found",
                        hint
                    )));
                }

                claims.message_type = MessageType::LtiResourceLinkRequest;
                claims.target_link_uri = Some(
                    content_item
                        .url()
                        .unwrap_or(tool.tool_url.as_str())
                        .to_string(),
                );
                claims.custom = content_item.custom().cloned();

                if tool.enable_grade_sync || content_item.declares_line_item() {
                    let lineitems = self.line_items_url(&claims.context.id);
                    let line_item = if content_item.declares_line_item() {
                        self.store
                            .find_line_item_by_resource_link_id(&content_item.uuid)
                            .await?
                    } else {
                        None
                    };

                    claims.ags_endpoint = Some(AgsEndpointClaim {
                        scope: ags_scopes(),
                        lineitem: line_item.map(|li| format!("{}/{}", lineitems, li.uuid)),
                        lineitems,
                    });
                }

                claims.resource_link = Some(ResourceLinkClaim {
                    id: hint.to_string(),
                    title: content_item.title().map(str::to_string),
                    description: content_item.text().map(str::to_string),
                });
            }
        }

        tracing::debug!(sub = %claims.sub, "Launch claims assembled");
        Ok(claims)
    }
}
