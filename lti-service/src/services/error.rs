use service_core::error::AppError;
use thiserror::Error;

/// Failures of the launch/claims/intake core. Every variant is terminal for
/// the request: nothing partially built or partially verified is returned.
#[derive(Error, Debug)]
pub enum LtiError {
    #[error("{0}")]
    NotFound(String),

    #[error("Unknown redirect_uri {0}")]
    UnauthorizedRedirect(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Key resolution failed: {0}")]
    KeyResolution(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<LtiError> for AppError {
    fn from(err: LtiError) -> Self {
        match err {
            LtiError::NotFound(msg) => AppError::NotFound(anyhow::anyhow!(msg)),
            LtiError::UnauthorizedRedirect(uri) => {
                AppError::Unauthorized(anyhow::anyhow!("Unknown redirect_uri {}", uri))
            }
            LtiError::InvalidToken(msg) => AppError::InvalidToken(anyhow::anyhow!(msg)),
            LtiError::KeyResolution(msg) => {
                AppError::InternalError(anyhow::anyhow!("Key resolution failed: {}", msg))
            }
            LtiError::Internal(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::axum::http::StatusCode;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (LtiError::NotFound("Tool not found".into()), StatusCode::NOT_FOUND),
            (
                LtiError::UnauthorizedRedirect("https://evil".into()),
                StatusCode::UNAUTHORIZED,
            ),
            (LtiError::InvalidToken("expired".into()), StatusCode::UNAUTHORIZED),
            (
                LtiError::KeyResolution("timeout".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                LtiError::Internal(anyhow::anyhow!("db down")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status_code(), expected);
        }
    }
}
