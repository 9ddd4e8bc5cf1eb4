use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::error::Result;
use crate::error::SyncErr;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/v1";
pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
// Matches the upstream model stream: we generally don't want to disconnect.
pub const DEFAULT_STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_FAILURE_NOTICE: &str =
    "Sorry, something went wrong while generating a response. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub base_url: String,
    pub bearer_token: Option<String>,
    pub page_size: usize,
    pub debounce: Duration,
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,
    /// Text that replaces an assistant message whose stream failed.
    pub failure_notice: String,
}

/// On-disk form of [`SyncConfig`]. Every field is optional; missing or
/// invalid values fall back to the defaults.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SyncConfigToml {
    pub base_url: Option<String>,
    pub bearer_token: Option<String>,
    pub page_size: Option<usize>,
    pub debounce_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub stream_idle_timeout_ms: Option<u64>,
    pub failure_notice: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            bearer_token: None,
            page_size: DEFAULT_PAGE_SIZE,
            debounce: DEFAULT_DEBOUNCE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            stream_idle_timeout: DEFAULT_STREAM_IDLE_TIMEOUT,
            failure_notice: DEFAULT_FAILURE_NOTICE.to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_toml(toml: Option<SyncConfigToml>) -> Self {
        let mut config = Self::default();
        let Some(toml) = toml else {
            return config;
        };

        if let Some(base_url) = toml.base_url {
            if base_url.trim().is_empty() {
                warn!("ignoring blank base_url");
            } else {
                config.base_url = base_url;
            }
        }
        if let Some(token) = toml.bearer_token
            && !token.trim().is_empty()
        {
            config.bearer_token = Some(token);
        }
        match toml.page_size {
            Some(0) => warn!("ignoring page_size = 0"),
            Some(page_size) => config.page_size = page_size,
            None => {}
        }
        if let Some(ms) = toml.debounce_ms {
            config.debounce = Duration::from_millis(ms);
        }
        match toml.request_timeout_ms {
            Some(0) => warn!("ignoring request_timeout_ms = 0"),
            Some(ms) => config.request_timeout = Duration::from_millis(ms),
            None => {}
        }
        match toml.stream_idle_timeout_ms {
            Some(0) => warn!("ignoring stream_idle_timeout_ms = 0"),
            Some(ms) => config.stream_idle_timeout = Duration::from_millis(ms),
            None => {}
        }
        if let Some(notice) = toml.failure_notice
            && !notice.trim().is_empty()
        {
            config.failure_notice = notice;
        }
        config
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let parsed: SyncConfigToml = toml::from_str(raw)?;
        Ok(Self::from_toml(Some(parsed)))
    }

    /// Loads `path`, treating a missing file as "all defaults".
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml_str(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        if base_url.trim().is_empty() {
            return Err(SyncErr::Config("base url must not be empty".to_string()));
        }
        self.base_url = base_url;
        Ok(self)
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}
