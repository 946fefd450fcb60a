//! Bulk datapoint creation.

use std::path::Path;
use std::sync::Arc;

use rb_format::{Label, LabelMapEntry, SeriesInfo};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result, UploadError};
use crate::executor::{BoundedExecutor, ProgressFn};
use crate::masks::{self, MaskPolygonizer};
use crate::service::AnnotationService;

/// One datapoint to create, with optional pre-existing labels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatapointEntry {
    pub name: String,
    pub items: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels_map: Option<Vec<LabelMapEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_info: Option<Vec<SeriesInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_data: Option<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_ground_truth: bool,
}

impl DatapointEntry {
    pub fn new(name: impl Into<String>, items: Vec<String>) -> Self {
        Self {
            name: name.into(),
            items,
            ..Default::default()
        }
    }

    /// Checks that need no round trip.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ClientError::rejected("datapoint name is empty"));
        }
        if self.items.is_empty() {
            return Err(ClientError::rejected(format!(
                "datapoint {:?} has no items",
                self.name
            )));
        }
        Ok(())
    }
}

fn serialize_display<S: Serializer>(error: &ClientError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// An entry whose creation failed, serialized as the entry plus `error`.
#[derive(Debug, Serialize)]
pub struct FailedEntry {
    #[serde(flatten)]
    pub entry: DatapointEntry,
    #[serde(serialize_with = "serialize_display")]
    pub error: ClientError,
}

/// Creates datapoints in a project with bounded concurrency.
pub struct Upload<S> {
    service: Arc<S>,
    org_id: String,
    project_id: String,
    concurrency: usize,
    progress: Option<ProgressFn>,
}

impl<S> Upload<S>
where
    S: AnnotationService + 'static,
{
    pub fn new(service: Arc<S>, config: &ClientConfig) -> Self {
        Self {
            service,
            org_id: config.org_id.clone(),
            project_id: config.project_id.clone(),
            concurrency: config.upload_concurrency,
            progress: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Observe `(completed, total)` as creations finish.
    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }

    fn executor(&self) -> BoundedExecutor {
        let executor = BoundedExecutor::new(self.concurrency);
        match self.progress.clone() {
            Some(progress) => executor.with_progress(move |done, total| progress(done, total)),
            None => executor,
        }
    }

    /// Create one datapoint per entry and return the entries that failed,
    /// in submission order.
    pub async fn create_datapoints(
        &self,
        storage_id: &str,
        entries: Vec<DatapointEntry>,
    ) -> Vec<FailedEntry> {
        let total = entries.len();
        info!(total, concurrency = self.concurrency, "Creating datapoints");

        let failures = self
            .executor()
            .collect_failures(entries, |entry| {
                let service = self.service.clone();
                let org_id = self.org_id.clone();
                let project_id = self.project_id.clone();
                let storage_id = storage_id.to_string();
                let entry = entry.clone();
                async move {
                    entry.validate()?;
                    service
                        .create_datapoint(&org_id, &project_id, &storage_id, &entry)
                        .await
                }
            })
            .await;

        for (entry, error) in &failures {
            warn!(name = %entry.name, error = %error, "Failed to create datapoint");
        }
        info!(total, failed = failures.len(), "Finished creating datapoints");

        failures
            .into_iter()
            .map(|(entry, error)| FailedEntry { entry, error })
            .collect()
    }

    /// Convert a directory of PNG masks into entries and create them.
    ///
    /// Manifest and mask errors abort before any datapoint is created.
    pub async fn create_datapoints_from_masks(
        &self,
        storage_id: &str,
        mask_dir: &Path,
        polygonizer: &dyn MaskPolygonizer,
    ) -> std::result::Result<Vec<FailedEntry>, UploadError> {
        let entries = masks::entries_from_masks(mask_dir, polygonizer).await?;
        Ok(self.create_datapoints(storage_id, entries).await)
    }
}
