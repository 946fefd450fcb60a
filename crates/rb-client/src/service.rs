//! The remote operations the pipelines depend on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::pagination::Page;
use crate::records::RawTaskRecord;
use crate::upload::DatapointEntry;

/// Project-level summary returned by the output-info query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputInfo {
    #[serde(default)]
    pub datapoint_count: usize,
    #[serde(default)]
    pub taxonomy: Value,
}

#[async_trait]
pub trait AnnotationService: Send + Sync {
    /// One page of task records, ground-truth records when
    /// `include_ground_truth` is set.
    async fn fetch_output_page(
        &self,
        org_id: &str,
        project_id: &str,
        page_size: usize,
        cursor: Option<String>,
        include_ground_truth: bool,
    ) -> Result<Page<RawTaskRecord>>;

    async fn get_output_info(&self, org_id: &str, project_id: &str) -> Result<OutputInfo>;

    /// Create one datapoint (and its task), returning the datapoint id.
    async fn create_datapoint(
        &self,
        org_id: &str,
        project_id: &str,
        storage_id: &str,
        entry: &DatapointEntry,
    ) -> Result<String>;
}
