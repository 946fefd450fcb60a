//! Raw per-annotator records as returned by the service for the current
//! stage of a task.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};

use crate::label::Label;
use crate::task::LabelMapEntry;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawUser {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStorage {
    #[serde(default)]
    pub storage_id: Option<String>,
}

/// Label payload of one annotator.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTaskData {
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub created_by_email: Option<String>,
    #[serde(default, deserialize_with = "deserialize_labels_data")]
    pub labels_data: Vec<Label>,
    #[serde(default)]
    pub labels_storage: Option<RawStorage>,
    #[serde(default)]
    pub labels_map: Option<Vec<LabelMapEntry>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawScore {
    #[serde(default, deserialize_with = "crate::null_as_default")]
    pub user: RawUser,
    #[serde(default)]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawConsensusInfo {
    #[serde(default, deserialize_with = "crate::null_as_default")]
    pub user: RawUser,
    #[serde(default)]
    pub task_data: Option<RawTaskData>,
    #[serde(default, deserialize_with = "crate::null_as_default")]
    pub scores: Vec<RawScore>,
}

/// The current-stage sub-task record of a task.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSubTask {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<RawUser>,
    #[serde(default)]
    pub task_data: Option<RawTaskData>,
    #[serde(default)]
    pub sub_tasks: Option<Vec<RawSubTask>>,
    #[serde(default)]
    pub overall_consensus_score: Option<f64>,
    #[serde(default)]
    pub consensus_info: Option<Vec<RawConsensusInfo>>,
}

/// `labelsData` is a JSON-encoded string on the wire; plain arrays and null
/// are accepted as well. Anything that is not a list of label objects is
/// skipped so one bad annotation cannot fail a whole page.
fn deserialize_labels_data<'de, D>(deserializer: D) -> Result<Vec<Label>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(encoded)) if encoded.trim().is_empty() => return Ok(Vec::new()),
        Some(Value::String(encoded)) => match serde_json::from_str(&encoded) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Ignoring undecodable labelsData");
                return Ok(Vec::new());
            }
        },
        Some(value) => value,
        None => return Ok(Vec::new()),
    };
    Ok(labels_from_value(value))
}

fn labels_from_value(value: Value) -> Vec<Label> {
    let items = match value {
        Value::Null => return Vec::new(),
        Value::Array(items) => items,
        other => {
            warn!(kind = json_kind(&other), "Ignoring labelsData that is not a list");
            return Vec::new();
        }
    };
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(Label::from(map).clean()),
            other => {
                debug!(kind = json_kind(&other), "Skipping label that is not an object");
                None
            }
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_labels_data_as_string() {
        let data: RawTaskData = serde_json::from_value(json!({
            "createdAt": "2024-01-01T00:00:00Z",
            "labelsData": "[{\"category\": [[\"object\", \"car\"]], \"pixel\": null}]",
        }))
        .unwrap();
        assert_eq!(data.labels_data.len(), 1);
        assert!(data.labels_data[0].extra.is_empty());
    }

    #[test]
    fn test_labels_data_as_array_or_null() {
        let data: RawTaskData =
            serde_json::from_value(json!({"labelsData": [{"multiclassify": true}]})).unwrap();
        assert_eq!(data.labels_data.len(), 1);

        let data: RawTaskData = serde_json::from_value(json!({"labelsData": null})).unwrap();
        assert!(data.labels_data.is_empty());

        let data: RawTaskData = serde_json::from_value(json!({"labelsData": "null"})).unwrap();
        assert!(data.labels_data.is_empty());
    }

    #[test]
    fn test_malformed_labels_do_not_fail_the_record() {
        crate::init_tracing();
        let data: RawTaskData = serde_json::from_value(json!({
            "labelsData": "[{\"point\": {\"xnorm\": 0.5}}, 7, {\"multiclassify\": true}]",
        }))
        .unwrap();
        assert_eq!(data.labels_data.len(), 2);
        assert!(data.labels_data[0].shape().is_none());
        assert_eq!(data.labels_data[0].extra["point"], json!({"xnorm": 0.5}));
        assert!(data.labels_data[1].shape().is_some());

        let data: RawTaskData =
            serde_json::from_value(json!({"labelsData": "[{\"point\""})).unwrap();
        assert!(data.labels_data.is_empty());

        let data: RawTaskData =
            serde_json::from_value(json!({"labelsData": {"point": {}}})).unwrap();
        assert!(data.labels_data.is_empty());
    }

    #[test]
    fn test_sub_task_nesting() {
        let sub: RawSubTask = serde_json::from_value(json!({
            "state": "ASSIGNED",
            "assignedTo": {"userId": "u1", "email": "a@x.com"},
            "subTasks": [{"state": "COMPLETED"}],
            "consensusInfo": null,
        }))
        .unwrap();
        assert_eq!(sub.sub_tasks.as_ref().map(Vec::len), Some(1));
        assert!(sub.consensus_info.is_none());
    }
}
