//! Multi-annotator consensus.
//!
//! On the way in, a raw current-stage sub-task is reshaped into either a
//! list of per-annotator sub-tasks or a scored comparison list. On the way
//! out, every entry is distributed into its own copy of the task's volumes.

use std::iter;

use serde::{Deserialize, Serialize};

use crate::label::Label;
use crate::raw::{RawConsensusInfo, RawSubTask, RawTaskData, RawUser};
use crate::series::{ClassificationRecord, Series, dicom_rb_series};
use crate::task::{ConsensusEntry, Score};

/// Multi-annotator data found on a task.
#[derive(Debug, Clone, PartialEq)]
pub enum Consensus {
    /// The current annotator first, then each sub-task.
    SubTasks(Vec<ConsensusEntry>),
    /// One entry per annotator, with an overall score out of 100.
    Scored {
        score: f64,
        entries: Vec<ConsensusEntry>,
    },
}

fn to_percent(score: f64) -> f64 {
    score * 100.0
}

/// Detect and reshape multi-annotator data.
///
/// A non-empty `subTasks` list wins over `consensusInfo`; a single
/// `consensusInfo` entry is not consensus.
pub fn aggregate(sub_task: RawSubTask) -> Option<Consensus> {
    let RawSubTask {
        state,
        assigned_to,
        task_data,
        sub_tasks,
        overall_consensus_score,
        consensus_info,
    } = sub_task;

    if let Some(sub_tasks) = sub_tasks.filter(|tasks| !tasks.is_empty()) {
        let own = annotator_entry(state, assigned_to, task_data);
        let others = sub_tasks
            .into_iter()
            .map(|sub| annotator_entry(sub.state, sub.assigned_to, sub.task_data));
        return Some(Consensus::SubTasks(iter::once(own).chain(others).collect()));
    }

    match consensus_info {
        Some(info) if info.len() > 1 => Some(Consensus::Scored {
            score: to_percent(overall_consensus_score.unwrap_or(0.0)),
            entries: info.into_iter().map(scored_entry).collect(),
        }),
        _ => None,
    }
}

fn annotator_entry(
    status: Option<String>,
    user: Option<RawUser>,
    data: Option<RawTaskData>,
) -> ConsensusEntry {
    let user = user.unwrap_or_default();
    let data = data.unwrap_or_default();
    ConsensusEntry {
        status,
        updated_by: user.email,
        updated_by_user_id: user.user_id,
        updated_at: data.created_at,
        labels: data.labels_data,
        labels_map: data.labels_map,
        scores: None,
    }
}

fn scored_entry(info: RawConsensusInfo) -> ConsensusEntry {
    let data = info.task_data.unwrap_or_default();
    let scores = info
        .scores
        .into_iter()
        .map(|raw| Score {
            user_id: raw.user.user_id,
            email: raw.user.email,
            score: raw.score.map(to_percent),
        })
        .collect();
    ConsensusEntry {
        status: None,
        updated_by: info.user.email,
        updated_by_user_id: info.user.user_id,
        updated_at: data.created_at,
        labels: data.labels_data,
        labels_map: data.labels_map,
        scores: Some(scores),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecondaryScore {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_user_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl From<Score> for SecondaryScore {
    fn from(score: Score) -> Self {
        Self {
            secondary_user_id: score.user_id,
            secondary_user_email: score.email,
            score: score.score,
        }
    }
}

/// A consensus entry in the series format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredConsensusEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<Vec<SecondaryScore>>,
    pub series: Vec<Series>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationRecord>,
}

/// Distribute one annotator's labels into a private copy of `volumes`.
pub fn structure_entry(entry: ConsensusEntry, volumes: &[Series]) -> StructuredConsensusEntry {
    let labels: &[Label] = &entry.labels;
    let bundle = dicom_rb_series(labels, entry.labels_map.as_deref().unwrap_or_default(), volumes);
    StructuredConsensusEntry {
        status: entry.status,
        updated_by: entry.updated_by,
        updated_by_user_id: entry.updated_by_user_id,
        updated_at: entry.updated_at,
        scores: entry
            .scores
            .map(|scores| scores.into_iter().map(SecondaryScore::from).collect()),
        series: bundle.series,
        classification: bundle.classification,
    }
}
