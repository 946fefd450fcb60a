use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rb_client::{ClientConfig, DatapointEntry, Export, ExportResult, GraphQlService, Upload};
use rb_format::FormatOptions;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::cli::{Format, Mode};

fn progress_bar(message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.blue} {msg} [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.set_message(message);
    pb
}

/// Drive `pb` from `(done, total)` callbacks. `total` is advisory.
fn track(pb: &ProgressBar) -> impl Fn(usize, usize) + Send + Sync + 'static {
    let pb = pb.clone();
    move |done, total| {
        pb.set_length(total.max(done) as u64);
        pb.set_position(done as u64);
    }
}

async fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let body = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            tokio::fs::write(path, body)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "Wrote output");
        }
        None => println!("{body}"),
    }
    Ok(())
}

fn envelope<T: Serialize>(result: ExportResult<T>) -> serde_json::Value {
    json!({
        "tasks": result.tasks,
        "taxonomy": result.taxonomy,
    })
}

pub async fn export(
    config: &ClientConfig,
    mode: Mode,
    format: Format,
    no_consensus: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let service = Arc::new(GraphQlService::new(config)?);
    let pb = progress_bar("Exporting");
    let export = Export::new(service, config).with_progress(track(&pb));

    let body = match format {
        Format::Flat => envelope(export.redbrick_format(mode.into()).await?),
        Format::Series | Format::Legacy => {
            let options = FormatOptions {
                old_format: format == Format::Legacy,
                no_consensus,
            };
            envelope(export.series_format(mode.into(), options).await?)
        }
    };
    pb.finish_and_clear();

    write_json(&body, output.as_deref()).await
}

pub async fn upload(
    config: &ClientConfig,
    storage_id: &str,
    input: &Path,
    concurrency: Option<usize>,
    failed_output: Option<PathBuf>,
) -> Result<()> {
    let raw = tokio::fs::read(input)
        .await
        .with_context(|| format!("failed to read {}", input.display()))?;
    let entries: Vec<DatapointEntry> = serde_json::from_slice(&raw)
        .with_context(|| format!("{} is not a JSON array of datapoints", input.display()))?;

    let service = Arc::new(GraphQlService::new(config)?);
    let pb = progress_bar("Uploading");
    pb.set_length(entries.len() as u64);
    let mut upload = Upload::new(service, config).with_progress(track(&pb));
    if let Some(concurrency) = concurrency {
        upload = upload.with_concurrency(concurrency);
    }

    let failed = upload.create_datapoints(storage_id, entries).await;
    pb.finish_and_clear();

    if !failed.is_empty() {
        warn!(failed = failed.len(), "Some datapoints were not created");
    }
    write_json(&failed, failed_output.as_deref()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_grows_length() {
        let pb = ProgressBar::hidden();
        let update = track(&pb);
        update(3, 2);
        assert_eq!(pb.length(), Some(3));
        assert_eq!(pb.position(), 3);
        update(4, 10);
        assert_eq!(pb.length(), Some(10));
    }

    #[tokio::test]
    async fn test_write_json_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_json(&json!({"tasks": []}), Some(&path)).await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(serde_json::from_str::<serde_json::Value>(&text).unwrap()["tasks"], json!([]));
    }

    #[tokio::test]
    async fn test_upload_rejects_malformed_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.json");
        std::fs::write(&path, r#"{"name": "not an array"}"#).unwrap();
        let config = ClientConfig::new("key", "org", "project");
        let err = upload(&config, "s1", &path, None, None).await.unwrap_err();
        assert!(err.to_string().contains("is not a JSON array"));
    }
}
