use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ClientError, Result};

pub const DEFAULT_ENDPOINT: &str = "https://api.redbrickai.com/graphql/";
pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 50;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Connection and batching settings for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoint: String,
    pub api_key: String,
    pub org_id: String,
    pub project_id: String,
    /// Items requested per output page.
    pub page_size: usize,
    /// Maximum number of datapoint creations in flight.
    pub upload_concurrency: usize,
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: String::new(),
            org_id: String::new(),
            project_id: String::new(),
            page_size: DEFAULT_PAGE_SIZE,
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ClientConfig {
    pub fn new(
        api_key: impl Into<String>,
        org_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            org_id: org_id.into(),
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_upload_concurrency(mut self, concurrency: usize) -> Self {
        self.upload_concurrency = concurrency;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Parsed endpoint URL.
    pub fn endpoint_url(&self) -> Result<Url> {
        Url::parse(&self.endpoint)
            .map_err(|e| ClientError::config(format!("invalid endpoint {:?}: {e}", self.endpoint)))
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("api_key", &self.api_key),
            ("org_id", &self.org_id),
            ("project_id", &self.project_id),
        ] {
            if value.trim().is_empty() {
                return Err(ClientError::config(format!("{name} must not be empty")));
            }
        }
        if self.page_size == 0 {
            return Err(ClientError::config("page_size must be at least 1"));
        }
        if self.upload_concurrency == 0 {
            return Err(ClientError::config("upload_concurrency must be at least 1"));
        }
        self.endpoint_url()?;
        Ok(())
    }
}
