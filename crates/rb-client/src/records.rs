//! Raw task records returned by the output queries.

use rb_format::raw::{RawStorage, RawSubTask, RawTaskData};
use rb_format::{SeriesInfo, TaskFields};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Stage name reported for ground-truth records without one.
pub const GROUND_TRUTH_STAGE: &str = "END";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawEntity {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDatapoint {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub items: Option<Vec<String>>,
    #[serde(default)]
    pub items_presigned: Option<Vec<Option<String>>>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub created_by_entity: Option<RawEntity>,
    #[serde(default, deserialize_with = "deserialize_meta_data")]
    pub meta_data: Option<Value>,
    #[serde(default)]
    pub series_info: Option<Vec<SeriesInfo>>,
    #[serde(default)]
    pub storage_method: Option<RawStorage>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLatestTaskData {
    #[serde(default)]
    pub data_point: Option<RawDatapoint>,
    #[serde(flatten)]
    pub task_data: RawTaskData,
}

/// A task with its most recent annotation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLatestTask {
    pub task_id: String,
    #[serde(default)]
    pub dp_id: Option<String>,
    #[serde(default)]
    pub current_stage_name: Option<String>,
    #[serde(default)]
    pub current_stage_sub_task: Option<RawSubTask>,
    #[serde(default)]
    pub latest_task_data: Option<RawLatestTaskData>,
}

/// A task that reached the ground-truth stage.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawGroundTruthTask {
    pub task_id: String,
    #[serde(default)]
    pub dp_id: Option<String>,
    #[serde(default)]
    pub current_stage_name: Option<String>,
    #[serde(default)]
    pub data_point: Option<RawDatapoint>,
    #[serde(default)]
    pub task_data: Option<RawTaskData>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawTaskRecord {
    Latest(RawLatestTask),
    GroundTruth(RawGroundTruthTask),
}

impl RawTaskRecord {
    pub fn task_id(&self) -> &str {
        match self {
            RawTaskRecord::Latest(task) => &task.task_id,
            RawTaskRecord::GroundTruth(task) => &task.task_id,
        }
    }

    /// Unpack the query-specific envelope.
    pub fn into_fields(self) -> TaskFields {
        match self {
            RawTaskRecord::Latest(task) => {
                let latest = task.latest_task_data.unwrap_or_default();
                fields(
                    task.task_id,
                    task.current_stage_name,
                    latest.data_point.unwrap_or_default(),
                    latest.task_data,
                    task.current_stage_sub_task,
                )
            }
            RawTaskRecord::GroundTruth(task) => fields(
                task.task_id,
                Some(
                    task.current_stage_name
                        .unwrap_or_else(|| GROUND_TRUTH_STAGE.to_string()),
                ),
                task.data_point.unwrap_or_default(),
                task.task_data.unwrap_or_default(),
                None,
            ),
        }
    }
}

fn fields(
    task_id: String,
    current_stage_name: Option<String>,
    datapoint: RawDatapoint,
    data: RawTaskData,
    sub_task: Option<RawSubTask>,
) -> TaskFields {
    TaskFields {
        task_id,
        name: datapoint.name.unwrap_or_default(),
        items: datapoint.items.unwrap_or_default(),
        items_presigned: datapoint.items_presigned.unwrap_or_default(),
        current_stage_name,
        created_by: datapoint.created_by_entity.and_then(|entity| entity.email),
        created_at: datapoint.created_at,
        updated_by: data.created_by_email,
        updated_at: data.created_at,
        storage_id: datapoint.storage_method.and_then(|s| s.storage_id),
        label_storage_id: data.labels_storage.and_then(|s| s.storage_id),
        labels: data.labels_data,
        labels_map: data.labels_map,
        series_info: datapoint.series_info,
        meta_data: datapoint.meta_data,
        sub_task,
    }
}

/// `metaData` arrives JSON-encoded; text that is not JSON is kept as a string.
fn deserialize_meta_data<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(encoded)) => match serde_json::from_str::<Value>(&encoded) {
            Ok(Value::Null) => None,
            Ok(decoded) => Some(decoded),
            Err(_) => Some(Value::String(encoded)),
        },
        Some(other) => Some(other),
    })
}
