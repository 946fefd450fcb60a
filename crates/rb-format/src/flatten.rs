//! Raw remote fields to the flat task format.

use serde_json::Value;

use crate::consensus::{Consensus, aggregate};
use crate::label::Label;
use crate::raw::RawSubTask;
use crate::task::{LabelMapEntry, SeriesInfo, Task};

/// Everything the service returns about one task, already unpacked from its
/// query-specific envelope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFields {
    pub task_id: String,
    pub name: String,
    pub items: Vec<String>,
    pub items_presigned: Vec<Option<String>>,
    pub current_stage_name: Option<String>,
    pub created_by: Option<String>,
    pub created_at: Option<String>,
    pub updated_by: Option<String>,
    pub updated_at: Option<String>,
    pub storage_id: Option<String>,
    pub label_storage_id: Option<String>,
    pub labels: Vec<Label>,
    pub labels_map: Option<Vec<LabelMapEntry>>,
    pub series_info: Option<Vec<SeriesInfo>>,
    pub meta_data: Option<Value>,
    pub sub_task: Option<RawSubTask>,
}

/// Build the flat task, attaching consensus data when the current-stage
/// sub-task carries more than one annotator.
pub fn flat_rb_format(fields: TaskFields) -> Task {
    let TaskFields {
        task_id,
        name,
        items,
        items_presigned,
        current_stage_name,
        created_by,
        created_at,
        updated_by,
        updated_at,
        storage_id,
        label_storage_id,
        labels,
        labels_map,
        series_info,
        meta_data,
        sub_task,
    } = fields;

    let (consensus_tasks, consensus_score) = match sub_task.and_then(aggregate) {
        Some(Consensus::SubTasks(entries)) => (Some(entries), None),
        Some(Consensus::Scored { score, entries }) => (Some(entries), Some(score)),
        None => (None, None),
    };

    Task {
        task_id,
        name,
        items,
        items_presigned,
        current_stage_name,
        created_by,
        created_at,
        updated_by,
        updated_at,
        labels,
        labels_map,
        series_info,
        meta_data,
        storage_id,
        label_storage_id,
        consensus_tasks,
        consensus_score,
    }
}
