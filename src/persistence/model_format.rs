// Serialized model format shared by every store
// Decoding never raises: a malformed payload is reported as an absent model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

use crate::reinforcement::ActionValueTable;

/// Format version written into every payload
pub const MODEL_FORMAT_VERSION: &str = "1.0";

/// Metadata stored next to a table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    #[serde(default)]
    pub total_states: usize,
    #[serde(default)]
    pub action_space: usize,
    /// Caller-supplied fields, kept as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ModelMetadata {
    /// Metadata describing `table`
    pub fn for_table(table: &ActionValueTable) -> Self {
        Self {
            total_states: table.len(),
            action_space: table.num_actions(),
            extra: Map::new(),
        }
    }

    /// Attach a caller-defined field
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// A model read back from storage
#[derive(Debug, Clone)]
pub struct StoredModel {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub table: ActionValueTable,
    pub metadata: ModelMetadata,
}

#[derive(Serialize)]
struct SerializedModel<'a> {
    version: &'a str,
    timestamp: DateTime<Utc>,
    model: BTreeMap<String, Vec<f64>>,
    metadata: &'a ModelMetadata,
}

#[derive(Deserialize)]
struct RawModel {
    version: Option<Value>,
    timestamp: Option<String>,
    model: Option<BTreeMap<String, Vec<f64>>>,
    metadata: Option<ModelMetadata>,
}

/// Encode `table` with `metadata`. `totalStates` and `actionSpace` always
/// describe the table, whatever the caller put there. Returns `None` when a
/// value is NaN or infinite, since such a payload could not be read back.
pub fn serialize_model(table: &ActionValueTable, metadata: &ModelMetadata) -> Option<String> {
    // JSON has no NaN or infinity; serde_json would write them as null
    if let Some((state, _)) = table
        .iter()
        .find(|(_, values)| values.iter().any(|v| !v.is_finite()))
    {
        warn!("Refusing to serialize model: state '{}' holds a non-finite value", state);
        return None;
    }

    let mut metadata = metadata.clone();
    metadata.total_states = table.len();
    metadata.action_space = table.num_actions();

    let payload = SerializedModel {
        version: MODEL_FORMAT_VERSION,
        timestamp: Utc::now(),
        model: table.to_sorted_map(),
        metadata: &metadata,
    };

    match serde_json::to_string_pretty(&payload) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!("Failed to serialize model: {}", e);
            None
        }
    }
}

/// Decode a payload produced by `serialize_model`.
///
/// Returns `None` for invalid JSON, a missing `model` or `version` field, or
/// rows whose length disagrees with the action space.
pub fn deserialize_model(json: &str) -> Option<StoredModel> {
    let raw: RawModel = match serde_json::from_str(json) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Rejected model payload: {}", e);
            return None;
        }
    };

    let version = match raw.version? {
        Value::String(s) => s,
        Value::Null => return None,
        other => other.to_string(),
    };
    let rows = raw.model?;
    let mut metadata = raw.metadata.unwrap_or_default();

    let num_actions = if metadata.action_space > 0 {
        metadata.action_space
    } else {
        rows.values().next().map(Vec::len).unwrap_or(0)
    };

    let table = match ActionValueTable::from_rows(num_actions, rows) {
        Ok(table) => table,
        Err(e) => {
            warn!("Rejected model payload: {}", e);
            return None;
        }
    };

    metadata.total_states = table.len();
    metadata.action_space = num_actions;

    let timestamp = raw
        .timestamp
        .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Some(StoredModel {
        version,
        timestamp,
        table,
        metadata,
    })
}
