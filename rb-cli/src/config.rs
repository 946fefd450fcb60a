use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rb_client::ClientConfig;
use tracing::debug;

use crate::cli::Args;

const APP_DIR: &str = "rb";
const CONFIG_FILE: &str = "config.toml";

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}

/// Read the TOML configuration.
///
/// An explicit path must exist; the default path is optional.
pub fn load(path: Option<&Path>) -> Result<ClientConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match default_config_path().filter(|path| path.is_file()) {
            Some(path) => path,
            None => {
                debug!("No configuration file found, using defaults");
                return Ok(ClientConfig::default());
            }
        },
    };

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = toml::from_str(&text)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    debug!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

/// Command-line and environment values take precedence over the file.
pub fn apply_overrides(mut config: ClientConfig, args: &Args) -> ClientConfig {
    if let Some(api_key) = &args.api_key {
        config.api_key = api_key.clone();
    }
    if let Some(org_id) = &args.org_id {
        config.org_id = org_id.clone();
    }
    if let Some(project_id) = &args.project_id {
        config.project_id = project_id.clone();
    }
    if let Some(endpoint) = &args.endpoint {
        config.endpoint = endpoint.clone();
    }
    config
}
