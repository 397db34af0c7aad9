use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::constants::{
    DEFAULT_HTTP_TIMEOUT_SECONDS, DEFAULT_STATUS_RANGES, HTTP_POOL_MAX_IDLE_PER_HOST, env_vars,
};
use crate::entity::{SendBodyMode, StreamingMode};
use crate::error::CourierError;
use crate::response::MediaTypeMode;
use crate::transport::ReqwestTransport;

/// Connection and request-defaults configuration for one logical
/// endpoint.
///
/// The pool-relevant subset of these settings forms the configuration
/// identity under which a shared client is registered.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    /// Base URL requests are resolved against. Should include the scheme.
    pub base_url: String,
    /// HTTP timeout in seconds for requests. Defaults to 30 seconds.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
    /// Maximum idle pooled connections per host
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,
    /// Per-request redirect-follow override. `None` leaves the transport's
    /// own default in force.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_redirects: Option<bool>,
    /// How request bodies are put on the wire
    #[serde(default)]
    pub streaming_mode: StreamingMode,
    /// Whether request bodies are sent at all
    #[serde(default)]
    pub send_body_mode: SendBodyMode,
    /// Whether cookies are read from and written to the cookie store
    #[serde(default = "default_true")]
    pub enable_cookies: bool,
    /// Acceptable response status codes, in validator range syntax
    #[serde(default = "default_status_ranges")]
    pub response_status_ranges: String,
    /// Strict or lenient handling of malformed response media types
    #[serde(default)]
    pub media_type_mode: MediaTypeMode,
    /// Headers applied to every request, before per-call headers
    #[serde(default)]
    pub default_headers: Vec<(String, String)>,
    /// Query parameters applied to every request, before per-call ones
    #[serde(default)]
    pub default_query_params: Vec<(String, String)>,
    /// Path to the log file. If not specified, logs go to the default
    /// location chosen by the logging setup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file_path: Option<String>,
}

fn default_http_timeout() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECONDS
}

fn default_pool_max_idle() -> usize {
    HTTP_POOL_MAX_IDLE_PER_HOST
}

fn default_true() -> bool {
    true
}

fn default_status_ranges() -> String {
    DEFAULT_STATUS_RANGES.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            base_url: String::new(),
            http_timeout_seconds: default_http_timeout(),
            pool_max_idle_per_host: default_pool_max_idle(),
            follow_redirects: None,
            streaming_mode: StreamingMode::default(),
            send_body_mode: SendBodyMode::default(),
            enable_cookies: true,
            response_status_ranges: default_status_ranges(),
            media_type_mode: MediaTypeMode::default(),
            default_headers: Vec::new(),
            default_query_params: Vec::new(),
            log_file_path: None,
        }
    }
}

impl Settings {
    /// Loads settings from a TOML file, applying environment overrides
    /// and validating the result.
    ///
    /// # Environment Variables
    /// - `COURIER_BASE_URL` - Override base URL
    /// - `COURIER_HTTP_TIMEOUT` - Override HTTP timeout in seconds
    /// - `COURIER_LOG_FILE` - Override log file path
    pub async fn load_from_path(path: &str) -> Result<Self, CourierError> {
        let content = fs::read_to_string(path).await?;
        let mut settings: Settings = toml::from_str(&content)?;
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Applies `COURIER_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(base_url) = std::env::var(env_vars::BASE_URL) {
            self.base_url = base_url;
        }
        if let Some(timeout) = std::env::var(env_vars::HTTP_TIMEOUT)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            self.http_timeout_seconds = timeout;
        }
        if let Ok(log_file_path) = std::env::var(env_vars::LOG_FILE) {
            self.log_file_path = Some(log_file_path);
        }
    }

    /// Validates the settings
    ///
    /// # Validation Rules
    /// - Base URL cannot be empty and must parse as an http(s) URL
    /// - Timeout must be greater than zero
    /// - The status range spec must parse
    pub fn validate(&self) -> Result<(), CourierError> {
        if self.base_url.is_empty() {
            return Err(CourierError::configuration("Base URL cannot be empty"));
        }
        let url = Url::parse(&self.base_url).map_err(|e| {
            CourierError::configuration(format!("Base URL '{}' is invalid: {e}", self.base_url))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(CourierError::configuration(format!(
                "Base URL scheme '{}' is not supported",
                url.scheme()
            )));
        }
        if self.http_timeout_seconds == 0 {
            return Err(CourierError::configuration(
                "HTTP timeout must be greater than zero",
            ));
        }
        crate::validation::StatusRangeValidator::parse(&self.response_status_ranges)?;
        if let Some(log_path) = &self.log_file_path
            && log_path.is_empty()
        {
            return Err(CourierError::configuration("Log file path cannot be empty"));
        }
        Ok(())
    }

    /// Saves the settings to a TOML file, creating parent directories as
    /// needed
    pub async fn save_to_path(&self, path: &str) -> Result<(), CourierError> {
        let parent = Path::new(path).parent().ok_or_else(|| {
            CourierError::configuration(format!("Path '{path}' has no parent directory"))
        })?;
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
        let content = toml::to_string_pretty(self)?;
        let mut file = fs::File::create(path).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// The configuration identity under which a shared client is
    /// registered. Two settings values with the same identity can share
    /// one physical connection pool.
    pub fn identity(&self) -> String {
        format!(
            "{}|timeout={}|pool={}|redirects={:?}",
            self.base_url,
            self.http_timeout_seconds,
            self.pool_max_idle_per_host,
            self.follow_redirects
        )
    }

    /// The request timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    /// Builds the production transport this configuration describes
    pub fn transport(&self) -> ReqwestTransport {
        ReqwestTransport::new(
            self.timeout(),
            self.pool_max_idle_per_host,
            self.follow_redirects.unwrap_or(true),
        )
    }
}
