use serde::{Deserialize, Serialize};

/// Raw YAML representation of the coordinator's config document, before
/// defaults are applied.
#[derive(Debug, Deserialize, Serialize)]
pub struct RawConfig {
    #[serde(default)]
    pub simulate: bool,
    #[serde(default)]
    pub disabled_appliance_ids: Vec<String>,
    #[serde(default = "default_true")]
    pub refresh_on_connect: bool,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_idle_timeout")]
    pub sse_idle_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_language() -> String {
    "en-GB".to_string()
}

fn default_idle_timeout() -> u64 {
    3600
}
