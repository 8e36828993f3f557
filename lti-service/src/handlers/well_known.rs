use axum::{extract::State, http::header, response::IntoResponse, Json};

use crate::services::Jwks;
use crate::AppState;

/// Platform public keys, served at both the LTI path and `/.well-known`.
#[utoipa::path(
    get,
    path = "/.well-known/jwks.json",
    responses(
        (status = 200, description = "Platform public JWKS", body = Jwks)
    ),
    tag = "Well-Known"
)]
pub async fn jwks(State(state): State<AppState>) -> impl IntoResponse {
    let jwks = state.keys.resolve_platform_keyset().jwks().clone();
    (
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        Json(jwks),
    )
}
