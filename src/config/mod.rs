mod file_config;

pub use file_config::{FileConfig, ReconnectConfig, StreamConfig};

use anyhow::{bail, Result};

pub const DEFAULT_REQUEST_TIMEOUT_SEC: u64 = 30;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 3000;
pub const DEFAULT_DISPATCH_CHANNEL_CAPACITY: usize = 64;
pub const DEFAULT_EVENT_NAME: &str = "notification";

/// Path of the push stream, relative to the API base URL.
const STREAM_PATH: &str = "/notifications/stream";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub api_base_url: Option<String>,
    pub stream_url: Option<String>,
    pub session_cookie: Option<String>,
    pub request_timeout_sec: u64,
    pub max_reconnect_attempts: u32,
    pub retry_delay_ms: u64,
    pub dispatch_channel_capacity: usize,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            stream_url: None,
            session_cookie: None,
            request_timeout_sec: DEFAULT_REQUEST_TIMEOUT_SEC,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            dispatch_channel_capacity: DEFAULT_DISPATCH_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub api_base_url: String,
    pub stream_url: String,
    pub session_cookie: Option<String>,
    pub request_timeout_sec: u64,
    pub dispatch_channel_capacity: usize,

    // Feature configs (with defaults)
    pub reconnect: ReconnectSettings,
    pub stream: StreamSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let api_base_url = file
            .api_base_url
            .or_else(|| cli.api_base_url.clone())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "api_base_url must be specified via --api-base-url or in config file"
                )
            })?;
        let api_base_url = validate_url("api_base_url", &api_base_url)?;

        // Stream endpoint defaults to the fixed path under the API base
        let stream_url = match file.stream_url.or_else(|| cli.stream_url.clone()) {
            Some(url) => validate_url("stream_url", &url)?,
            None => format!("{}{}", api_base_url, STREAM_PATH),
        };

        let session_cookie = file
            .session_cookie
            .or_else(|| cli.session_cookie.clone())
            .filter(|c| !c.trim().is_empty());

        let request_timeout_sec = file
            .request_timeout_sec
            .unwrap_or(cli.request_timeout_sec);
        if request_timeout_sec == 0 {
            bail!("request_timeout_sec must be greater than 0");
        }

        let dispatch_channel_capacity = file
            .dispatch_channel_capacity
            .unwrap_or(cli.dispatch_channel_capacity);
        if dispatch_channel_capacity == 0 {
            bail!("dispatch_channel_capacity must be greater than 0");
        }

        // Reconnect settings - merge file config with CLI
        let reconnect_file = file.reconnect.unwrap_or_default();
        let reconnect = ReconnectSettings {
            max_attempts: reconnect_file
                .max_attempts
                .unwrap_or(cli.max_reconnect_attempts),
            retry_delay_ms: reconnect_file.retry_delay_ms.unwrap_or(cli.retry_delay_ms),
        };

        let stream_file = file.stream.unwrap_or_default();
        let event_names = stream_file
            .event_names
            .unwrap_or_else(|| vec![DEFAULT_EVENT_NAME.to_string()]);
        if event_names.iter().any(|name| name.trim().is_empty()) {
            bail!("stream.event_names must not contain empty names");
        }
        let stream = StreamSettings { event_names };

        Ok(Self {
            api_base_url,
            stream_url,
            session_cookie,
            request_timeout_sec,
            dispatch_channel_capacity,
            reconnect,
            stream,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectSettings {
    /// Consecutive failures after which the stream gives up.
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    pub event_names: Vec<String>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            event_names: vec![DEFAULT_EVENT_NAME.to_string()],
        }
    }
}

/// Checks the scheme and strips trailing slashes.
fn validate_url(field: &str, url: &str) -> Result<String> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("{} must be an http(s) URL, got {:?}", field, url);
    }
    Ok(url.trim_end_matches('/').to_string())
}
