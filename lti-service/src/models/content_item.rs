use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A content item returned by a tool during deep linking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LtiContentItem {
    pub uuid: String,
    pub tool_id: String,
    pub content_item_type: String,
    /// The item exactly as the tool sent it.
    pub content_item_info: Value,
}

impl LtiContentItem {
    /// Builds a record with its identifier already assigned, so it can be
    /// written in a single insert.
    pub fn new(tool_id: &str, content_item_info: Value) -> Self {
        let content_item_type = content_item_info
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Self {
            uuid: Uuid::new_v4().to_string(),
            tool_id: tool_id.to_string(),
            content_item_type,
            content_item_info,
        }
    }

    fn info_str(&self, key: &str) -> Option<&str> {
        self.content_item_info.get(key).and_then(Value::as_str)
    }

    pub fn url(&self) -> Option<&str> {
        self.info_str("url").filter(|u| !u.is_empty())
    }

    pub fn title(&self) -> Option<&str> {
        self.info_str("title")
    }

    pub fn text(&self) -> Option<&str> {
        self.info_str("text")
    }

    pub fn custom(&self) -> Option<&serde_json::Map<String, Value>> {
        self.content_item_info.get("custom").and_then(Value::as_object)
    }

    pub fn declares_line_item(&self) -> bool {
        self.content_item_info.get("lineItem").is_some()
    }
}
