//! Flat task to structured series task.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::consensus::{StructuredConsensusEntry, structure_entry};
use crate::label::Label;
use crate::series::{ClassificationRecord, Series, dicom_rb_series};
use crate::task::{ConsensusEntry, LabelMapEntry, SeriesInfo, Task};

/// Output switches for [`dicom_rb_format`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatOptions {
    /// Emit the pruned flat task instead of series.
    pub old_format: bool,
    /// Collapse consensus into the first annotator's labels.
    pub no_consensus: bool,
}

fn is_empty_vec<T>(value: &Option<Vec<T>>) -> bool {
    value.as_ref().is_none_or(Vec::is_empty)
}

fn is_empty_value(value: &Option<Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Object(map)) => map.is_empty(),
        Some(Value::Array(values)) => values.is_empty(),
        Some(Value::String(text)) => text.is_empty(),
        Some(_) => false,
    }
}

fn is_empty_text(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(str::is_empty)
}

/// Flat task with empty optional keys removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyTask {
    pub task_id: String,
    pub name: String,
    pub items: Vec<String>,
    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub items_presigned: Option<Vec<Option<String>>>,
    pub current_stage_name: Option<String>,
    pub created_by: Option<String>,
    pub created_at: Option<String>,
    pub updated_by: Option<String>,
    pub updated_at: Option<String>,
    pub labels: Vec<Label>,
    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub labels_map: Option<Vec<LabelMapEntry>>,
    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub series_info: Option<Vec<SeriesInfo>>,
    #[serde(default, skip_serializing_if = "is_empty_value")]
    pub meta_data: Option<Value>,
    pub storage_id: Option<String>,
    #[serde(default, skip_serializing_if = "is_empty_text")]
    pub label_storage_id: Option<String>,
    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub consensus_tasks: Option<Vec<ConsensusEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_score: Option<f64>,
}

impl From<Task> for LegacyTask {
    fn from(task: Task) -> Self {
        Self {
            task_id: task.task_id,
            name: task.name,
            items: task.items,
            items_presigned: Some(task.items_presigned)
                .filter(|presigned| presigned.iter().any(Option::is_some)),
            current_stage_name: task.current_stage_name,
            created_by: task.created_by,
            created_at: task.created_at,
            updated_by: task.updated_by,
            updated_at: task.updated_at,
            labels: task.labels,
            labels_map: task.labels_map,
            series_info: task.series_info,
            meta_data: task.meta_data,
            storage_id: task.storage_id,
            label_storage_id: task.label_storage_id,
            consensus_tasks: task.consensus_tasks,
            consensus_score: task.consensus_score,
        }
    }
}

/// A task laid out per volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredTask {
    pub task_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "is_empty_value")]
    pub meta_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_storage_id: Option<String>,
    pub series: Vec<Series>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_tasks: Option<Vec<StructuredConsensusEntry>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormattedTask {
    Legacy(LegacyTask),
    Series(Box<StructuredTask>),
}

/// Label-free volumes described by `seriesInfo`, or a single volume
/// holding every item when it is absent or empty.
fn base_volumes(items: &[String], series_info: Option<&[SeriesInfo]>) -> Vec<Series> {
    let Some(infos) = series_info.filter(|infos| !infos.is_empty()) else {
        return vec![Series {
            items: items.to_vec(),
            ..Default::default()
        }];
    };

    infos
        .iter()
        .map(|info| Series {
            name: info.name.clone(),
            num_frames: info.num_frames,
            items: info
                .items_indices
                .iter()
                .filter_map(|&index| {
                    let item = items.get(index);
                    if item.is_none() {
                        debug!(index, items = items.len(), "Skipping out-of-range series item");
                    }
                    item.cloned()
                })
                .collect(),
            ..Default::default()
        })
        .collect()
}

/// Convert a flat task into the legacy or series output format.
pub fn dicom_rb_format(mut task: Task, options: FormatOptions) -> FormattedTask {
    if options.old_format {
        return FormattedTask::Legacy(LegacyTask::from(task));
    }

    let volumes = base_volumes(&task.items, task.series_info.as_deref());
    let mut structured = StructuredTask {
        task_id: task.task_id.clone(),
        name: task.name.clone(),
        current_stage_name: task.current_stage_name.clone(),
        created_by: task.created_by.clone(),
        created_at: task.created_at.clone(),
        updated_by: task.updated_by.clone(),
        updated_at: task.updated_at.clone(),
        meta_data: task.meta_data.clone(),
        storage_id: task.storage_id.clone(),
        label_storage_id: task.label_storage_id.clone(),
        series: Vec::new(),
        classification: None,
        consensus: None,
        consensus_score: None,
        consensus_tasks: None,
    };

    if options.no_consensus {
        let (labels, labels_map) = match task.consensus_tasks.and_then(|e| e.into_iter().next()) {
            Some(first) => (first.labels, first.labels_map),
            None => (task.labels, task.labels_map),
        };
        let bundle = dicom_rb_series(&labels, labels_map.as_deref().unwrap_or_default(), &volumes);
        structured.series = bundle.series;
        structured.classification = bundle.classification;
        return FormattedTask::Series(Box::new(structured));
    }

    let entries = match task.consensus_tasks.take() {
        Some(entries) if !entries.is_empty() => entries,
        _ => vec![task.own_entry()],
    };
    structured.consensus_tasks = Some(
        entries
            .into_iter()
            .map(|entry| structure_entry(entry, &volumes))
            .collect(),
    );
    structured.consensus = Some(true);
    structured.consensus_score = task.consensus_score;
    structured.series = volumes;
    FormattedTask::Series(Box::new(structured))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(value: Value) -> Task {
        serde_json::from_value(value).unwrap()
    }

    fn structured(formatted: FormattedTask) -> StructuredTask {
        match formatted {
            FormattedTask::Series(task) => *task,
            FormattedTask::Legacy(_) => panic!("expected series output"),
        }
    }

    fn no_consensus() -> FormatOptions {
        FormatOptions {
            no_consensus: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_single_bounding_box_without_series_info() {
        let flat = task(json!({
            "taskId": "t1",
            "name": "img",
            "items": ["a.png"],
            "labels": [{
                "bbox2d": {"xnorm": 0.1, "ynorm": 0.2, "wnorm": 0.3, "hnorm": 0.4},
                "category": [["obj", "car"]],
            }],
        }));
        let out = structured(dicom_rb_format(flat, no_consensus()));
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(
            value["series"][0]["boundingBoxes"],
            json!([{"x": 0.1, "y": 0.2, "width": 0.3, "height": 0.4,
                    "keyFrame": true, "endTrack": true, "frameIndex": 0, "category": "car"}])
        );
        assert_eq!(value["series"][0]["items"], json!(["a.png"]));
        assert!(value.get("consensus").is_none());
    }

    #[test]
    fn test_series_info_builds_volumes() {
        let flat = task(json!({
            "taskId": "t1",
            "items": ["a", "b", "c"],
            "seriesInfo": [
                {"name": "axial", "itemsIndices": [0, 1], "numFrames": 2},
                {"name": "sagittal", "itemsIndices": [2, 9]},
            ],
            "labels": [{"point": {"xnorm": 0.5, "ynorm": 0.5}, "volumeindex": 1}],
        }));
        let out = structured(dicom_rb_format(flat, no_consensus()));
        assert_eq!(out.series.len(), 2);
        assert_eq!(out.series[0].name.as_deref(), Some("axial"));
        assert_eq!(out.series[0].num_frames, Some(2));
        assert_eq!(out.series[0].items, vec!["a", "b"]);
        assert_eq!(out.series[1].items, vec!["c"]);
        assert!(out.series[0].landmarks.is_none());
        assert_eq!(out.series[1].landmarks.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_no_consensus_uses_first_entry() {
        let flat = task(json!({
            "taskId": "t1",
            "items": ["a.png"],
            "labels": [{"multiclassify": true, "category": [["object", "own"]]}],
            "consensusTasks": [
                {"updatedBy": "a@x.com",
                 "labels": [{"tasklevelclassify": true, "category": [["object", "first"]]}]},
                {"updatedBy": "b@x.com", "labels": []},
            ],
        }));
        let out = structured(dicom_rb_format(flat, no_consensus()));
        assert!(out.consensus_tasks.is_none());
        assert!(out.series[0].classifications.is_none());
        assert_eq!(
            serde_json::to_value(&out.classification).unwrap(),
            json!({"category": "first"})
        );
    }

    #[test]
    fn test_consensus_mode_synthesizes_own_entry() {
        let flat = task(json!({
            "taskId": "t1",
            "items": ["a.png"],
            "updatedBy": "a@x.com",
            "labels": [{"point": {"xnorm": 0.5, "ynorm": 0.5}}],
        }));
        let out = structured(dicom_rb_format(flat, FormatOptions::default()));
        assert_eq!(out.consensus, Some(true));
        assert!(out.series[0].landmarks.is_none());
        let entries = out.consensus_tasks.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].updated_by.as_deref(), Some("a@x.com"));
        assert_eq!(entries[0].series[0].landmarks.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_consensus_entries_get_independent_volumes() {
        let flat = task(json!({
            "taskId": "t1",
            "items": ["a.png"],
            "consensusScore": 75.0,
            "consensusTasks": [
                {"labels": [{"point": {"xnorm": 0.1, "ynorm": 0.1}, "volumeindex": 2}],
                 "scores": [{"email": "b@x.com", "score": 75.0}]},
                {"labels": [{"point": {"xnorm": 0.9, "ynorm": 0.9}}]},
            ],
        }));
        let out = structured(dicom_rb_format(flat, FormatOptions::default()));
        assert_eq!(out.consensus_score, Some(75.0));
        assert_eq!(out.series.len(), 1);
        let entries = out.consensus_tasks.unwrap();
        assert_eq!(entries[0].series.len(), 3);
        assert_eq!(entries[1].series.len(), 1);
        assert_eq!(
            entries[0].scores.as_ref().unwrap()[0].secondary_user_email.as_deref(),
            Some("b@x.com")
        );
    }

    #[test]
    fn test_legacy_prunes_empty_keys() {
        let flat = task(json!({
            "taskId": "t1",
            "name": "img",
            "items": ["a.png"],
            "itemsPresigned": [null],
            "labelsMap": [],
            "metaData": {},
            "labelStorageId": "",
            "storageId": "s1",
            "labels": [{"pixel": {"regions": []}}],
        }));
        let value = serde_json::to_value(dicom_rb_format(
            flat,
            FormatOptions {
                old_format: true,
                ..Default::default()
            },
        ))
        .unwrap();
        for key in ["itemsPresigned", "labelsMap", "seriesInfo", "metaData", "labelStorageId",
                    "consensusTasks", "consensusScore"] {
            assert!(value.get(key).is_none(), "{key} should be pruned");
        }
        assert_eq!(value["storageId"], "s1");
        assert_eq!(value["labels"], json!([{"pixel": {"regions": []}}]));
        assert!(value.get("series").is_none());
    }
}
