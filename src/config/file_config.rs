use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub api_base_url: Option<String>,
    pub stream_url: Option<String>,
    pub session_cookie: Option<String>,
    pub request_timeout_sec: Option<u64>,
    pub dispatch_channel_capacity: Option<usize>,

    // Feature configs
    pub reconnect: Option<ReconnectConfig>,
    pub stream: Option<StreamConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct StreamConfig {
    /// Event names carrying notifications, in addition to `message`.
    pub event_names: Option<Vec<String>>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
