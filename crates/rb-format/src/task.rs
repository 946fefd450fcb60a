//! The flat task format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::label::Label;

/// Segmentation file attached to a volume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelMapEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_name: Option<String>,
}

/// Maps a subset of a task's items to one logical volume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "crate::null_as_default")]
    pub items_indices: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_frames: Option<u32>,
}

/// Agreement between the entry's annotator and one other annotator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Percentage, `0..=100`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// One annotator's view of a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, deserialize_with = "crate::null_as_default")]
    pub labels: Vec<Label>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels_map: Option<Vec<LabelMapEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<Vec<Score>>,
}

/// A task in the flat format.
///
/// Every non-consensus key is always serialized, `null` when unknown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "crate::null_as_default")]
    pub items: Vec<String>,
    #[serde(default, deserialize_with = "crate::null_as_default")]
    pub items_presigned: Vec<Option<String>>,
    #[serde(default)]
    pub current_stage_name: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default, deserialize_with = "crate::null_as_default")]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub labels_map: Option<Vec<LabelMapEntry>>,
    #[serde(default)]
    pub series_info: Option<Vec<SeriesInfo>>,
    #[serde(default)]
    pub meta_data: Option<Value>,
    #[serde(default)]
    pub storage_id: Option<String>,
    #[serde(default)]
    pub label_storage_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_tasks: Option<Vec<ConsensusEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_score: Option<f64>,
}

impl Task {
    /// The task's own annotation as a single consensus entry.
    pub fn own_entry(&self) -> ConsensusEntry {
        ConsensusEntry {
            status: None,
            updated_by: self.updated_by.clone(),
            updated_by_user_id: None,
            updated_at: self.updated_at.clone(),
            labels: self.labels.clone(),
            labels_map: self.labels_map.clone(),
            scores: None,
        }
    }
}
