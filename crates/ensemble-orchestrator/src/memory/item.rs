//! Memory item and summary types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Tag describing what a memory item records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MemoryItemType {
    /// Conversational output, such as an agent's final answer.
    Message,
    /// A decision taken by an agent (tool choice, plan).
    Action,
    /// The result of an action.
    Observation,
    /// A recorded failure.
    Error,
    /// A condensed summary of earlier items.
    Summary,
    /// Any other caller-defined tag.
    Other(String),
}

impl MemoryItemType {
    /// Returns the tag string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Message => "message",
            Self::Action => "action",
            Self::Observation => "observation",
            Self::Error => "error",
            Self::Summary => "summary",
            Self::Other(tag) => tag,
        }
    }
}

impl From<&str> for MemoryItemType {
    fn from(tag: &str) -> Self {
        match tag {
            "message" => Self::Message,
            "action" => Self::Action,
            "observation" => Self::Observation,
            "error" => Self::Error,
            "summary" => Self::Summary,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for MemoryItemType {
    fn from(tag: String) -> Self {
        Self::from(tag.as_str())
    }
}

impl From<MemoryItemType> for String {
    fn from(kind: MemoryItemType) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for MemoryItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable entry in the context memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Strictly increasing, never reused.
    pub id: u64,
    /// Item tag.
    #[serde(rename = "type")]
    pub kind: MemoryItemType,
    /// Item text.
    pub content: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Free-form metadata. A boolean `important` key raises the item's score.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl MemoryItem {
    /// Whether the item was flagged `important` in its metadata.
    pub fn is_important(&self) -> bool {
        self.metadata.get("important").and_then(serde_json::Value::as_bool).unwrap_or(false)
    }

    /// Renders the item as `[type] content`.
    pub fn render(&self) -> String {
        format!("[{}] {}", self.kind, self.content)
    }
}

/// A condensation of earlier memory items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Summary text.
    pub content: String,
    /// Number of items the summary covered.
    pub items_summarized: usize,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_round_trips_through_tag() {
        assert_eq!(MemoryItemType::from("action"), MemoryItemType::Action);
        assert_eq!(MemoryItemType::from("thought"), MemoryItemType::Other("thought".to_string()));
        assert_eq!(MemoryItemType::Observation.to_string(), "observation");
    }

    #[test]
    fn test_item_serializes_type_as_tag() {
        let item = MemoryItem {
            id: 7,
            kind: MemoryItemType::Action,
            content: "open page".to_string(),
            created_at: Utc::now(),
            metadata: HashMap::from([("important".to_string(), serde_json::Value::Bool(true))]),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "action");
        assert!(item.is_important());
        assert_eq!(item.render(), "[action] open page");
    }
}
