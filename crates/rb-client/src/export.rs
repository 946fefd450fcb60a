//! Exporting project tasks.

use std::pin::pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use rb_format::{FormatOptions, FormattedTask, Task, dicom_rb_format, flat_rb_format};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::Result;
use crate::executor::ProgressFn;
use crate::pagination::PaginationIterator;
use crate::service::{AnnotationService, OutputInfo};

/// Which annotation of each task to export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportMode {
    /// The most recent annotation of every task.
    #[default]
    Latest,
    /// Only tasks that reached the ground-truth stage.
    GroundTruth,
}

impl ExportMode {
    pub fn include_ground_truth(self) -> bool {
        matches!(self, ExportMode::GroundTruth)
    }
}

/// Exported tasks and the project's taxonomy.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportResult<T> {
    pub tasks: Vec<T>,
    pub taxonomy: Value,
}

pub struct Export<S> {
    service: Arc<S>,
    org_id: String,
    project_id: String,
    page_size: usize,
    progress: Option<ProgressFn>,
}

impl<S> Export<S>
where
    S: AnnotationService + 'static,
{
    pub fn new(service: Arc<S>, config: &ClientConfig) -> Self {
        Self {
            service,
            org_id: config.org_id.clone(),
            project_id: config.project_id.clone(),
            page_size: config.page_size.max(1),
            progress: None,
        }
    }

    /// Observe `(exported, declared_total)` as tasks arrive. The declared
    /// total comes from the output-info query and may not match.
    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub async fn output_info(&self) -> Result<OutputInfo> {
        self.service
            .get_output_info(&self.org_id, &self.project_id)
            .await
    }

    /// Lazily page through the project, yielding flat tasks in service order.
    pub fn stream(&self, mode: ExportMode) -> impl Stream<Item = Result<Task>> + use<S> {
        let service = self.service.clone();
        let org_id = self.org_id.clone();
        let project_id = self.project_id.clone();
        let page_size = self.page_size;

        PaginationIterator::new(move |cursor| {
            let service = service.clone();
            let org_id = org_id.clone();
            let project_id = project_id.clone();
            async move {
                service
                    .fetch_output_page(
                        &org_id,
                        &project_id,
                        page_size,
                        cursor,
                        mode.include_ground_truth(),
                    )
                    .await
            }
        })
        .into_stream()
        .map(|record| {
            record.map(|record| {
                debug!(task_id = %record.task_id(), "Exported task");
                flat_rb_format(record.into_fields())
            })
        })
    }

    /// Export every task in the flat format.
    pub async fn redbrick_format(&self, mode: ExportMode) -> Result<ExportResult<Task>> {
        let info = self.output_info().await?;
        let total = info.datapoint_count;
        info!(total, ?mode, "Exporting tasks");

        let mut tasks = Vec::new();
        let mut stream = pin!(self.stream(mode));
        while let Some(task) = stream.next().await {
            tasks.push(task?);
            if let Some(progress) = &self.progress {
                progress(tasks.len(), total);
            }
        }

        if tasks.len() != total {
            debug!(exported = tasks.len(), total, "Exported count differs from declared total");
        }
        info!(exported = tasks.len(), "Export finished");
        Ok(ExportResult {
            tasks,
            taxonomy: info.taxonomy,
        })
    }

    /// Export every task in the series (or legacy) format.
    pub async fn series_format(
        &self,
        mode: ExportMode,
        options: FormatOptions,
    ) -> Result<ExportResult<FormattedTask>> {
        let ExportResult { tasks, taxonomy } = self.redbrick_format(mode).await?;
        Ok(ExportResult {
            tasks: tasks
                .into_iter()
                .map(|task| dicom_rb_format(task, options))
                .collect(),
            taxonomy,
        })
    }
}
