use std::path::Path;

use tracing::debug;

use crate::error::ConfigError;
use crate::raw::RawConfig;

/// Settings the coordinator needs at startup: which cloud to talk to, which
/// appliances to ignore, and how the SSE reconnect loop should behave.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    pub simulate: bool,
    pub disabled_appliance_ids: Vec<String>,
    pub refresh_on_connect: bool,
    pub language: String,
    pub sse_idle_timeout_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        convert(RawConfig {
            simulate: false,
            disabled_appliance_ids: Vec::new(),
            refresh_on_connect: true,
            language: "en-GB".to_string(),
            sse_idle_timeout_secs: 3600,
        })
    }
}

fn convert(raw: RawConfig) -> CoordinatorConfig {
    CoordinatorConfig {
        simulate: raw.simulate,
        disabled_appliance_ids: raw.disabled_appliance_ids,
        refresh_on_connect: raw.refresh_on_connect,
        language: raw.language,
        sse_idle_timeout_secs: raw.sse_idle_timeout_secs,
    }
}

/// Loads a [`CoordinatorConfig`] from a single YAML document on disk.
pub fn load_config(path: &Path) -> Result<CoordinatorConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_config(&text, path)
}

fn parse_config(text: &str, path: &Path) -> Result<CoordinatorConfig, ConfigError> {
    let raw: RawConfig = serde_yaml::from_str(text).map_err(|source| ConfigError::YamlParse {
        path: path.display().to_string(),
        source,
    })?;
    debug!(?path, simulate = raw.simulate, "loaded coordinator config");
    Ok(convert(raw))
}
