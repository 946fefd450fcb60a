//! [`AnnotationService`] over the GraphQL HTTP endpoint.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::time;
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::pagination::Page;
use crate::records::{RawGroundTruthTask, RawLatestTask, RawTaskRecord};
use crate::service::{AnnotationService, OutputInfo};
use crate::upload::DatapointEntry;

const USER_AGENT: &str = concat!("rb-client/", env!("CARGO_PKG_VERSION"));
const API_KEY_HEADER: &str = "ApiKey";
const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);

const TASK_DATA_FIELDS: &str = r#"
    createdAt
    createdByEmail
    labelsData(interpolate: true)
    labelsStorage { storageId }
    labelsMap(presigned: false) { imageIndex labelName }
"#;

const DATAPOINT_FIELDS: &str = r#"
    dataPoint {
        name
        items(presigned: false)
        itemsPresigned: items(presigned: true)
        createdAt
        createdByEntity { email }
        metaData
        seriesInfo { name itemsIndices numFrames }
        storageMethod { storageId }
    }
"#;

const ANNOTATOR_FIELDS: &str = r#"
    state
    assignedTo { userId email }
"#;

fn latest_tasks_query() -> String {
    format!(
        r#"query latestTasks($orgId: UUID!, $projectId: UUID!, $first: Int, $after: String) {{
    tasksPaged(orgId: $orgId, projectId: $projectId, first: $first, after: $after) {{
        entries {{
            taskId
            dpId
            currentStageName
            currentStageSubTask(consensus: true) {{
                ... on LabelingTask {{
                    {ANNOTATOR_FIELDS}
                    taskData {{ {TASK_DATA_FIELDS} }}
                    subTasks {{
                        {ANNOTATOR_FIELDS}
                        taskData {{ {TASK_DATA_FIELDS} }}
                    }}
                    overallConsensusScore
                    consensusInfo {{
                        user {{ userId email }}
                        taskData {{ {TASK_DATA_FIELDS} }}
                        scores {{ user {{ userId email }} score }}
                    }}
                }}
            }}
            latestTaskData {{
                {DATAPOINT_FIELDS}
                {TASK_DATA_FIELDS}
            }}
        }}
        cursor
    }}
}}"#
    )
}

fn ground_truth_query() -> String {
    format!(
        r#"query groundTruthTasks($orgId: UUID!, $projectId: UUID!, $first: Int, $after: String) {{
    tasksPaged(orgId: $orgId, projectId: $projectId, stageName: "END", first: $first, after: $after) {{
        entries {{
            taskId
            dpId
            currentStageName
            {DATAPOINT_FIELDS}
            taskData {{ {TASK_DATA_FIELDS} }}
        }}
        cursor
    }}
}}"#
    )
}

const OUTPUT_INFO_QUERY: &str = r#"query outputInfo($orgId: UUID!, $projectId: UUID!) {
    project(orgId: $orgId, projectId: $projectId) {
        datapointCount
        taxonomy {
            name
            version
            categories { name children { name classId children { name classId } } }
            attributes { name attrType whitelist }
        }
    }
}"#;

const CREATE_DATAPOINT_MUTATION: &str = r#"mutation createDatapoint(
    $orgId: UUID!
    $projectId: UUID!
    $storageId: UUID!
    $name: String!
    $items: [String!]!
    $labelsData: String
    $labelsMap: [LabelMapInput!]
    $seriesInfo: [SeriesInfoInput!]
    $metaData: String
    $isGroundTruth: Boolean!
) {
    createDatapoint(
        orgId: $orgId
        projectId: $projectId
        storageId: $storageId
        name: $name
        items: $items
        labelsData: $labelsData
        labelsMap: $labelsMap
        seriesInfo: $seriesInfo
        metaData: $metaData
        isGroundTruth: $isGroundTruth
    ) {
        dpId
        taskId
    }
}"#;

#[derive(Debug, Deserialize)]
struct GqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Option<Vec<GqlError>>,
}

#[derive(Debug, Deserialize)]
struct Paged<T> {
    #[serde(default = "Vec::new")]
    entries: Vec<T>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TasksPaged<T> {
    tasks_paged: Option<Paged<T>>,
}

#[derive(Debug, Deserialize)]
struct ProjectOutput {
    project: Option<OutputInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedDatapoint {
    dp_id: Option<String>,
    task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateDatapointData {
    create_datapoint: Option<CreatedDatapoint>,
}

/// Queries are idempotent; a mutation may already have been applied when
/// its response is lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Query,
    Mutation,
}

impl RequestKind {
    fn should_retry(self, error: &ClientError) -> bool {
        match self {
            RequestKind::Query => error.is_transient(),
            RequestKind::Mutation => error.is_unapplied(),
        }
    }
}

fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Annotation service client speaking GraphQL over reqwest.
#[derive(Debug, Clone)]
pub struct GraphQlService {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
}

impl GraphQlService {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        install_rustls_provider();
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout())
            .build()?;
        Self::with_client(client, config)
    }

    /// Use an existing client; only the endpoint of `config` is checked.
    pub fn with_client(client: reqwest::Client, config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            client,
            endpoint: config.endpoint_url()?,
            api_key: config.api_key.clone(),
        })
    }

    async fn post_once<T: DeserializeOwned>(&self, body: &Value) -> Result<T> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: GqlResponse<T> = serde_json::from_str(&text)?;
        if let Some(errors) = parsed.errors.filter(|errors| !errors.is_empty()) {
            return Err(ClientError::GraphQl(
                errors.into_iter().map(|e| e.message).collect(),
            ));
        }
        parsed.data.ok_or(ClientError::MissingData("data"))
    }

    /// Post a GraphQL document, retrying failures that `kind` allows with
    /// backoff. At most `MAX_ATTEMPTS` requests are sent.
    async fn post_gql<T: DeserializeOwned>(
        &self,
        kind: RequestKind,
        query: &str,
        variables: Value,
    ) -> Result<T> {
        let body = json!({ "query": query, "variables": variables });
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.post_once(&body).await {
                Err(e) if kind.should_retry(&e) && attempt < MAX_ATTEMPTS => {
                    warn!(attempt, ?kind, error = %e, "GraphQL request failed, retrying");
                    time::sleep(RETRY_DELAY * 2u32.pow(attempt - 1)).await;
                }
                result => return result,
            }
        }
    }
}

#[async_trait]
impl AnnotationService for GraphQlService {
    async fn fetch_output_page(
        &self,
        org_id: &str,
        project_id: &str,
        page_size: usize,
        cursor: Option<String>,
        include_ground_truth: bool,
    ) -> Result<Page<RawTaskRecord>> {
        let variables = json!({
            "orgId": org_id,
            "projectId": project_id,
            "first": page_size,
            "after": cursor,
        });

        if include_ground_truth {
            let data: TasksPaged<RawGroundTruthTask> =
                self.post_gql(RequestKind::Query, &ground_truth_query(), variables).await?;
            let page = data.tasks_paged.ok_or(ClientError::MissingData("tasksPaged"))?;
            Ok(Page::new(
                page.entries.into_iter().map(RawTaskRecord::GroundTruth).collect(),
                page.cursor,
            ))
        } else {
            let data: TasksPaged<RawLatestTask> =
                self.post_gql(RequestKind::Query, &latest_tasks_query(), variables).await?;
            let page = data.tasks_paged.ok_or(ClientError::MissingData("tasksPaged"))?;
            Ok(Page::new(
                page.entries.into_iter().map(RawTaskRecord::Latest).collect(),
                page.cursor,
            ))
        }
    }

    async fn get_output_info(&self, org_id: &str, project_id: &str) -> Result<OutputInfo> {
        let data: ProjectOutput = self
            .post_gql(
                RequestKind::Query,
                OUTPUT_INFO_QUERY,
                json!({ "orgId": org_id, "projectId": project_id }),
            )
            .await?;
        data.project.ok_or(ClientError::MissingData("project"))
    }

    async fn create_datapoint(
        &self,
        org_id: &str,
        project_id: &str,
        storage_id: &str,
        entry: &DatapointEntry,
    ) -> Result<String> {
        let meta_data = entry
            .meta_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let variables = json!({
            "orgId": org_id,
            "projectId": project_id,
            "storageId": storage_id,
            "name": entry.name,
            "items": entry.items,
            "labelsData": serde_json::to_string(&entry.labels)?,
            "labelsMap": entry.labels_map,
            "seriesInfo": entry.series_info,
            "metaData": meta_data,
            "isGroundTruth": entry.is_ground_truth,
        });

        let data: CreateDatapointData = self
            .post_gql(RequestKind::Mutation, CREATE_DATAPOINT_MUTATION, variables)
            .await?;
        let created = data
            .create_datapoint
            .ok_or(ClientError::MissingData("createDatapoint"))?;
        created
            .dp_id
            .or(created.task_id)
            .ok_or(ClientError::MissingData("createDatapoint.dpId"))
    }
}
