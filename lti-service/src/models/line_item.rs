use serde::{Deserialize, Serialize};

/// A gradebook column attached to a resource link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    pub uuid: String,
    /// Content item uuid the line item grades.
    pub resource_link_id: String,
    pub label: String,
    pub score_maximum: f64,
}
