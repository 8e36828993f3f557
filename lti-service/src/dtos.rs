//! Documentation-only shapes of the JSON envelopes the handlers return.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::services::IntakeReceipt;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    #[schema(example = false)]
    pub success: bool,
    #[schema(example = "Tool with client_id unknown-client not found")]
    pub message: String,
    /// Field errors for validation failures, otherwise null.
    #[schema(value_type = Object)]
    pub data: Value,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ContentItemReturnResponse {
    #[schema(example = true)]
    pub success: bool,
    #[schema(example = "Successfully received and decoded content item")]
    pub message: String,
    pub data: IntakeReceipt,
}

