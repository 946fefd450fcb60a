use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rb_client::records::{RawGroundTruthTask, RawLatestTask};
use rb_client::{
    AnnotationService, ClientConfig, ClientError, DatapointEntry, Export, ExportMode,
    OutputInfo, Page, RawTaskRecord, Result, Upload,
};
use rb_format::{FormatOptions, FormattedTask};
use serde_json::{Value, json};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Serves fixed pages and records datapoint creations.
#[derive(Default)]
struct InMemoryService {
    latest: Vec<Vec<RawLatestTask>>,
    ground_truth: Vec<Vec<RawGroundTruthTask>>,
    fail_page: Option<usize>,
    fail_output_info: bool,
    declared_total: usize,
    reject_names: HashSet<String>,
    cursors: Mutex<Vec<Option<String>>>,
    created: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

fn page_index(cursor: &Option<String>) -> usize {
    cursor
        .as_deref()
        .and_then(|c| c.strip_prefix("page-"))
        .and_then(|c| c.parse().ok())
        .unwrap_or(0)
}

fn paged<T: Clone>(pages: &[Vec<T>], index: usize) -> (Vec<T>, Option<String>) {
    let items = pages.get(index).cloned().unwrap_or_default();
    let next = (index + 1 < pages.len()).then(|| format!("page-{}", index + 1));
    (items, next)
}

#[async_trait]
impl AnnotationService for InMemoryService {
    async fn fetch_output_page(
        &self,
        _org_id: &str,
        _project_id: &str,
        _page_size: usize,
        cursor: Option<String>,
        include_ground_truth: bool,
    ) -> Result<Page<RawTaskRecord>> {
        self.cursors.lock().unwrap().push(cursor.clone());
        let index = page_index(&cursor);
        if Some(index) == self.fail_page {
            return Err(ClientError::Status {
                status: 502,
                body: "bad gateway".into(),
            });
        }
        if include_ground_truth {
            let (items, next) = paged(&self.ground_truth, index);
            Ok(Page::new(items.into_iter().map(RawTaskRecord::GroundTruth).collect(), next))
        } else {
            let (items, next) = paged(&self.latest, index);
            Ok(Page::new(items.into_iter().map(RawTaskRecord::Latest).collect(), next))
        }
    }

    async fn get_output_info(&self, _org_id: &str, _project_id: &str) -> Result<OutputInfo> {
        if self.fail_output_info {
            return Err(ClientError::Status {
                status: 401,
                body: "invalid api key".into(),
            });
        }
        Ok(OutputInfo {
            datapoint_count: self.declared_total,
            taxonomy: json!({"name": "DEFAULT::Berlin", "version": 2}),
        })
    }

    async fn create_datapoint(
        &self,
        _org_id: &str,
        _project_id: &str,
        storage_id: &str,
        entry: &DatapointEntry,
    ) -> Result<String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        assert_eq!(storage_id, "storage-1");
        if self.reject_names.contains(&entry.name) {
            return Err(ClientError::GraphQl(vec![format!("cannot create {}", entry.name)]));
        }
        self.created.lock().unwrap().push(entry.name.clone());
        Ok(format!("dp-{}", entry.name))
    }
}

fn config() -> ClientConfig {
    ClientConfig::new("key", "org", "project").with_page_size(2)
}

fn latest(value: Value) -> RawLatestTask {
    serde_json::from_value(value).unwrap()
}

fn latest_task(id: &str) -> RawLatestTask {
    latest(json!({
        "taskId": id,
        "currentStageName": "Label",
        "latestTaskData": {
            "createdByEmail": "a@x.com",
            "labelsData": "[{\"bbox2d\": {\"xnorm\": 0.1, \"ynorm\": 0.2, \"wnorm\": 0.3, \"hnorm\": 0.4}, \"category\": [[\"obj\", \"car\"]]}]",
            "dataPoint": {"name": id, "items": [format!("{id}.png")]},
        },
    }))
}

#[tokio::test]
async fn test_upload_returns_failures_in_order() {
    init_tracing();
    let service = Arc::new(InMemoryService {
        reject_names: ["entry-10", "entry-75"].into_iter().map(String::from).collect(),
        ..Default::default()
    });
    let completed = Arc::new(AtomicUsize::new(0));
    let observed = completed.clone();
    let upload = Upload::new(service.clone(), &config())
        .with_concurrency(50)
        .with_progress(move |done, _total| {
            observed.fetch_max(done, Ordering::SeqCst);
        });

    let entries: Vec<DatapointEntry> = (0..120)
        .map(|i| DatapointEntry::new(format!("entry-{i}"), vec![format!("items/{i}.png")]))
        .collect();
    let failed = upload.create_datapoints("storage-1", entries).await;

    let names: Vec<&str> = failed.iter().map(|f| f.entry.name.as_str()).collect();
    assert_eq!(names, vec!["entry-10", "entry-75"]);
    assert!(failed.iter().all(|f| matches!(f.error, ClientError::GraphQl(_))));
    assert_eq!(service.created.lock().unwrap().len(), 118);
    assert!(service.peak.load(Ordering::SeqCst) <= 50);
    assert_eq!(completed.load(Ordering::SeqCst), 120);
}

#[tokio::test]
async fn test_upload_rejects_invalid_entries_locally() {
    let service = Arc::new(InMemoryService::default());
    let upload = Upload::new(service.clone(), &config());
    let entries = vec![
        DatapointEntry::new("ok", vec!["a.png".into()]),
        DatapointEntry::new("", vec!["b.png".into()]),
        DatapointEntry::new("empty", vec![]),
    ];
    let failed = upload.create_datapoints("storage-1", entries).await;

    assert_eq!(failed.len(), 2);
    assert!(failed.iter().all(|f| matches!(f.error, ClientError::Rejected(_))));
    assert_eq!(failed[1].entry.name, "empty");
    assert_eq!(*service.created.lock().unwrap(), vec!["ok".to_string()]);
}

#[tokio::test]
async fn test_export_latest_follows_page_order() {
    init_tracing();
    let service = Arc::new(InMemoryService {
        latest: vec![
            vec![latest_task("t1"), latest_task("t2")],
            vec![latest_task("t3")],
        ],
        declared_total: 4,
        ..Default::default()
    });
    let progress = Arc::new(Mutex::new(Vec::new()));
    let seen = progress.clone();
    let export = Export::new(service.clone(), &config())
        .with_progress(move |done, total| seen.lock().unwrap().push((done, total)));

    let result = export.redbrick_format(ExportMode::Latest).await.unwrap();

    let ids: Vec<&str> = result.tasks.iter().map(|t| t.task_id.as_str()).collect();
    assert_eq!(ids, vec!["t1", "t2", "t3"]);
    assert_eq!(result.taxonomy["name"], "DEFAULT::Berlin");
    assert_eq!(result.tasks[0].updated_by.as_deref(), Some("a@x.com"));
    assert_eq!(*progress.lock().unwrap(), vec![(1, 4), (2, 4), (3, 4)]);
    assert_eq!(
        *service.cursors.lock().unwrap(),
        vec![None, Some("page-1".to_string())]
    );
}

#[tokio::test]
async fn test_export_series_format() {
    let service = Arc::new(InMemoryService {
        latest: vec![vec![latest_task("t1")]],
        declared_total: 1,
        ..Default::default()
    });
    let export = Export::new(service, &config());
    let options = FormatOptions {
        no_consensus: true,
        ..Default::default()
    };

    let result = export.series_format(ExportMode::Latest, options).await.unwrap();
    let FormattedTask::Series(task) = &result.tasks[0] else {
        panic!("expected series output");
    };
    assert_eq!(
        serde_json::to_value(&task.series[0].bounding_boxes).unwrap(),
        json!([{"x": 0.1, "y": 0.2, "width": 0.3, "height": 0.4,
                "keyFrame": true, "endTrack": true, "frameIndex": 0, "category": "car"}])
    );
}

#[tokio::test]
async fn test_export_consensus_sub_tasks() {
    let task = latest(json!({
        "taskId": "t1",
        "currentStageSubTask": {
            "state": "ASSIGNED",
            "assignedTo": {"userId": "u0", "email": "lead@x.com"},
            "taskData": {"labelsData": "[]"},
            "subTasks": [
                {"state": "COMPLETED", "assignedTo": {"userId": "u1", "email": "a@x.com"},
                 "taskData": {"labelsData": "[]"}},
            ],
        },
        "latestTaskData": {"dataPoint": {"name": "scan", "items": ["a.dcm"]}},
    }));
    let service = Arc::new(InMemoryService {
        latest: vec![vec![task]],
        declared_total: 1,
        ..Default::default()
    });
    let result = Export::new(service, &config())
        .redbrick_format(ExportMode::Latest)
        .await
        .unwrap();

    let consensus = result.tasks[0].consensus_tasks.as_ref().unwrap();
    assert_eq!(consensus.len(), 2);
    assert_eq!(consensus[1].updated_by.as_deref(), Some("a@x.com"));
    assert!(result.tasks[0].consensus_score.is_none());
}

#[tokio::test]
async fn test_export_ground_truth_mode() {
    let record: RawGroundTruthTask = serde_json::from_value(json!({
        "taskId": "gt1",
        "dataPoint": {"name": "scan", "items": ["a.dcm"]},
        "taskData": {"labelsData": "[]", "createdByEmail": "reviewer@x.com"},
    }))
    .unwrap();
    let service = Arc::new(InMemoryService {
        latest: vec![vec![latest_task("ignored")]],
        ground_truth: vec![vec![record]],
        declared_total: 1,
        ..Default::default()
    });
    let result = Export::new(service, &config())
        .redbrick_format(ExportMode::GroundTruth)
        .await
        .unwrap();

    assert_eq!(result.tasks.len(), 1);
    assert_eq!(result.tasks[0].task_id, "gt1");
    assert_eq!(result.tasks[0].current_stage_name.as_deref(), Some("END"));
}

#[tokio::test]
async fn test_export_page_failure_is_fatal() {
    let service = Arc::new(InMemoryService {
        latest: vec![vec![latest_task("t1")], vec![latest_task("t2")]],
        fail_page: Some(1),
        declared_total: 2,
        ..Default::default()
    });
    let export = Export::new(service, &config());
    let err = export.redbrick_format(ExportMode::Latest).await.unwrap_err();
    assert!(matches!(err, ClientError::Status { status: 502, .. }));
}

#[tokio::test]
async fn test_export_output_info_failure_is_fatal() {
    let service = Arc::new(InMemoryService {
        latest: vec![vec![latest_task("t1")]],
        fail_output_info: true,
        ..Default::default()
    });
    let export = Export::new(service.clone(), &config());

    let err = export.redbrick_format(ExportMode::Latest).await.unwrap_err();
    assert!(matches!(err, ClientError::Status { status: 401, .. }));
    let err = export
        .series_format(ExportMode::Latest, FormatOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Status { status: 401, .. }));
    assert!(service.cursors.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_export_survives_malformed_labels() {
    let broken = latest(json!({
        "taskId": "t2",
        "latestTaskData": {
            "labelsData": "[{\"point\": {\"xnorm\": 0.5}, \"volumeindex\": -1}]",
            "dataPoint": {"name": "t2", "items": ["t2.png"]},
        },
    }));
    let service = Arc::new(InMemoryService {
        latest: vec![vec![latest_task("t1"), broken]],
        declared_total: 2,
        ..Default::default()
    });
    let export = Export::new(service.clone(), &config());

    let flat = export.redbrick_format(ExportMode::Latest).await.unwrap();
    assert_eq!(flat.tasks.len(), 2);
    assert_eq!(
        serde_json::to_value(&flat.tasks[1].labels).unwrap(),
        json!([{"point": {"xnorm": 0.5}, "volumeindex": -1}])
    );

    let options = FormatOptions {
        no_consensus: true,
        ..Default::default()
    };
    let series = export.series_format(ExportMode::Latest, options).await.unwrap();
    let FormattedTask::Series(task) = &series.tasks[1] else {
        panic!("expected series output");
    };
    assert_eq!(task.series.len(), 1);
    assert!(task.series[0].landmarks.is_none());
}
