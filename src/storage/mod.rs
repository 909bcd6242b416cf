pub mod json;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::source::UpdateMarker;

/// One entry of the recipient list. Only `chat_id` matters to the update job,
/// everything else is kept as-is so hand-edited files survive a rewrite.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipientRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl RecipientRecord {
    pub fn new(chat_id: i64) -> Self {
        Self {
            chat_id: Some(chat_id),
            metadata: Map::new(),
        }
    }

    /// Read one entry of the recipient file. Never fails: an entry whose
    /// `chat_id` is missing or unusable comes back with `chat_id: None` and
    /// the raw value left in `metadata`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(mut metadata) => {
                let chat_id = metadata.get("chat_id").and_then(parse_chat_id);
                if chat_id.is_some() {
                    metadata.remove("chat_id");
                }
                Self { chat_id, metadata }
            }
            other => {
                let mut metadata = Map::new();
                metadata.insert("entry".to_string(), other);
                Self {
                    chat_id: None,
                    metadata,
                }
            }
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Integer ids, or numeric strings as older files stored them.
fn parse_chat_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Last marker that was announced, as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerRecord {
    pub last_updated: UpdateMarker,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
}

/// Persistence used by the update job and by recipient registration.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Last persisted marker, `None` before the first change was seen.
    async fn load_marker(&self) -> Result<Option<UpdateMarker>>;

    async fn save_marker(&self, marker: &UpdateMarker) -> Result<()>;

    async fn load_recipients(&self) -> Result<Vec<RecipientRecord>>;

    /// Add a recipient unless its chat id is already known.
    /// Returns `true` if the record was added.
    async fn add_recipient(&self, record: RecipientRecord) -> Result<bool>;
}
