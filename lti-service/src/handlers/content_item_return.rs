use axum::{extract::State, Extension, Json};
use serde::Deserialize;
use service_core::{error::AppError, middleware::RequestId, response::ApiResponse};
use utoipa::ToSchema;
use validator::Validate;

use crate::dtos::{ContentItemReturnResponse, ErrorResponse};
use crate::services::IntakeReceipt;
use crate::utils::ValidatedForm;
use crate::AppState;

/// Deep-linking response posted back by the tool's browser form.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ContentItemReturnForm {
    #[serde(rename = "JWT")]
    #[validate(length(min = 1))]
    pub jwt: String,
}

#[utoipa::path(
    post,
    path = "/lti/api/v1/content-item-return",
    request_body(content = ContentItemReturnForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Deep-linking response verified and content items stored", body = ContentItemReturnResponse),
        (status = 401, description = "Signature, issuer, audience or expiry check failed", body = ErrorResponse),
        (status = 404, description = "Token audience is not a registered tool", body = ErrorResponse),
        (status = 422, description = "JWT field missing", body = ErrorResponse)
    ),
    tag = "LTI"
)]
pub async fn content_item_return(
    State(state): State<AppState>,
    request_id: Option<Extension<RequestId>>,
    ValidatedForm(form): ValidatedForm<ContentItemReturnForm>,
) -> Result<Json<ApiResponse<IntakeReceipt>>, AppError> {
    let request_id = request_id.map(|Extension(RequestId(id))| id);

    let receipt = state
        .intake
        .receive(&form.jwt, request_id.as_deref())
        .await?;

    Ok(Json(ApiResponse::success(
        "Successfully received and decoded content item",
        receipt,
    )))
}
