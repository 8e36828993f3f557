//! OIDC third-party login initiation and the authorization endpoint that
//! answers it with a signed launch.

use askama::Template;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;
use service_core::error::AppError;
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationError};

use crate::dtos::ErrorResponse;
use crate::services::{LaunchRequest, LaunchRequestType};
use crate::utils::{ValidatedForm, ValidatedQuery};
use crate::AppState;

pub const DEEP_LINK_HINT: &str = "deep_link";

#[derive(Debug, Deserialize, Validate, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LoginInitiationQuery {
    #[validate(length(min = 1))]
    pub client_id: String,
    #[validate(length(min = 1))]
    pub login_hint: String,
    pub lti_message_hint: Option<String>,
    pub request_type: Option<LaunchRequestType>,
    #[validate(url)]
    pub target_link_uri: Option<String>,
}

impl LoginInitiationQuery {
    fn message_hint(&self) -> Result<&str, AppError> {
        match (self.request_type, self.lti_message_hint.as_deref()) {
            (Some(LaunchRequestType::ResourceLink), None) => Err(AppError::BadRequest(
                anyhow::anyhow!("lti_message_hint is required for resource link launches"),
            )),
            (Some(LaunchRequestType::DeepLink), _) | (None, None) => Ok(DEEP_LINK_HINT),
            (_, Some(hint)) => Ok(hint),
        }
    }
}

/// Starts a launch by sending the browser to the tool's login URL.
#[utoipa::path(
    get,
    path = "/lti/api/v1/login",
    params(LoginInitiationQuery),
    responses(
        (status = 302, description = "Redirect to the tool's OIDC login initiation URL"),
        (status = 400, description = "Missing or malformed parameters", body = ErrorResponse),
        (status = 404, description = "Unknown tool", body = ErrorResponse)
    ),
    tag = "LTI"
)]
pub async fn login(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<LoginInitiationQuery>,
) -> Result<impl IntoResponse, AppError> {
    let tool = state.claims.find_tool(&query.client_id).await?;
    let message_hint = query.message_hint()?;

    let mut location = reqwest::Url::parse(tool.login_url()).map_err(|e| {
        AppError::InternalError(anyhow::anyhow!(
            "Tool {} has an invalid login URL: {}",
            tool.client_id,
            e
        ))
    })?;
    location
        .query_pairs_mut()
        .append_pair("iss", state.claims.issuer())
        .append_pair("login_hint", &query.login_hint)
        .append_pair("lti_message_hint", message_hint)
        .append_pair(
            "target_link_uri",
            query.target_link_uri.as_deref().unwrap_or(&tool.tool_url),
        )
        .append_pair("client_id", &tool.client_id)
        .append_pair("lti_deployment_id", &tool.deployment_id);

    tracing::info!(client_id = %tool.client_id, message_hint = %message_hint, "Initiating LTI login");

    Ok((
        StatusCode::FOUND,
        [(header::LOCATION, location.to_string())],
    ))
}

fn validate_scope(scope: &str) -> Result<(), ValidationError> {
    if scope.split_whitespace().any(|s| s == "openid") {
        Ok(())
    } else {
        Err(ValidationError::new("scope_must_include_openid"))
    }
}

fn validate_response_type(response_type: &str) -> Result<(), ValidationError> {
    if response_type == "id_token" {
        Ok(())
    } else {
        Err(ValidationError::new("response_type_must_be_id_token"))
    }
}

fn validate_response_mode(response_mode: &str) -> Result<(), ValidationError> {
    if response_mode == "form_post" {
        Ok(())
    } else {
        Err(ValidationError::new("response_mode_must_be_form_post"))
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuthorizationRequest {
    #[validate(custom(function = "validate_scope"))]
    pub scope: String,
    #[validate(custom(function = "validate_response_type"))]
    pub response_type: String,
    #[validate(length(min = 1))]
    pub client_id: String,
    #[validate(url)]
    pub redirect_uri: String,
    #[validate(length(min = 1))]
    pub login_hint: String,
    pub lti_message_hint: Option<String>,
    #[validate(length(min = 1))]
    pub nonce: String,
    pub state: Option<String>,
    #[validate(custom(function = "validate_response_mode"))]
    pub response_mode: Option<String>,
    pub prompt: Option<String>,
}

impl AuthorizationRequest {
    pub fn request_type(&self) -> LaunchRequestType {
        match self.lti_message_hint.as_deref() {
            None | Some(DEEP_LINK_HINT) => LaunchRequestType::DeepLink,
            Some(_) => LaunchRequestType::ResourceLink,
        }
    }

    fn launch_request(&self) -> LaunchRequest<'_> {
        let request_type = self.request_type();
        LaunchRequest {
            request_type,
            client_id: &self.client_id,
            login_hint: &self.login_hint,
            message_hint: match request_type {
                LaunchRequestType::DeepLink => None,
                LaunchRequestType::ResourceLink => self.lti_message_hint.as_deref(),
            },
            nonce: &self.nonce,
            redirect_uri: &self.redirect_uri,
        }
    }
}

#[utoipa::path(
    get,
    path = "/lti/api/v1/authorize",
    params(AuthorizationRequest),
    responses(
        (status = 200, description = "Auto-submitting form posting id_token and state to redirect_uri", body = String, content_type = "text/html"),
        (status = 401, description = "redirect_uri not registered for the tool", body = ErrorResponse),
        (status = 404, description = "Unknown tool, user or content item", body = ErrorResponse),
        (status = 422, description = "Invalid OIDC parameters", body = ErrorResponse)
    ),
    tag = "LTI"
)]
pub async fn authorize_query(
    State(state): State<AppState>,
    ValidatedQuery(request): ValidatedQuery<AuthorizationRequest>,
) -> Result<LaunchFormTemplate, AppError> {
    authorize(state, request).await
}

#[utoipa::path(
    post,
    path = "/lti/api/v1/authorize",
    request_body(content = AuthorizationRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Auto-submitting form posting id_token and state to redirect_uri", body = String, content_type = "text/html"),
        (status = 401, description = "redirect_uri not registered for the tool", body = ErrorResponse),
        (status = 404, description = "Unknown tool, user or content item", body = ErrorResponse),
        (status = 422, description = "Invalid OIDC parameters", body = ErrorResponse)
    ),
    tag = "LTI"
)]
pub async fn authorize_form(
    State(state): State<AppState>,
    ValidatedForm(request): ValidatedForm<AuthorizationRequest>,
) -> Result<LaunchFormTemplate, AppError> {
    authorize(state, request).await
}

async fn authorize(
    state: AppState,
    request: AuthorizationRequest,
) -> Result<LaunchFormTemplate, AppError> {
    let claims = state.claims.build_claims(&request.launch_request()).await?;
    let id_token = state.codec.encode(&claims)?;

    tracing::info!(
        client_id = %request.client_id,
        sub = %claims.sub,
        request_type = ?request.request_type(),
        "Issued launch token"
    );

    Ok(LaunchFormTemplate {
        action: request.redirect_uri,
        id_token,
        state: request.state,
    })
}

/// Page that immediately POSTs the launch to the tool. Values are
/// HTML-escaped by the template engine.
#[derive(Template)]
#[template(path = "launch_form.html")]
pub struct LaunchFormTemplate {
    pub action: String,
    pub id_token: String,
    pub state: Option<String>,
}
