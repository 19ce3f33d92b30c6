//! Client configuration.
//!
//! Loaded from `<config_dir>/peer-review-chat/config.toml` (or `--config`),
//! layered over built-in defaults; command-line flags and `PEER_REVIEW_URL`
//! are applied last by the front end through [`ClientConfig::with_overrides`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{ClientError, Result};

pub const APP_DIR: &str = "peer-review-chat";
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const ENV_BASE_URL: &str = "PEER_REVIEW_URL";

/// Optional keys of the TOML file. Anything missing keeps its default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    base_url: Option<String>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    data_dir: Option<PathBuf>,
    #[serde(default)]
    default_models: Vec<String>,
    ocr_model: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    pub connect_timeout: Duration,
    /// Applies to every request except the process stream, which may run
    /// for minutes while models review each other.
    pub request_timeout: Duration,
    pub data_dir: PathBuf,
    pub default_models: Vec<String>,
    pub ocr_model: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(120),
            data_dir: default_data_dir(),
            default_models: Vec::new(),
            ocr_model: None,
        }
    }
}

/// `<data_dir>/peer-review-chat`, or `./.peer-review-chat` without a home.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(format!(".{APP_DIR}")))
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
}

impl ClientConfig {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// An explicit path must exist; a missing default file just means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match default_config_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            if explicit {
                return Err(ClientError::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)?;
        let config = Self::from_toml(&text)
            .map_err(|e| ClientError::Config(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let file: FileConfig =
            toml::from_str(text).map_err(|e| ClientError::Config(e.to_string()))?;
        let defaults = Self::default();
        let config = Self {
            base_url: file.base_url.unwrap_or(defaults.base_url),
            connect_timeout: file
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            request_timeout: file
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            data_dir: file.data_dir.unwrap_or(defaults.data_dir),
            default_models: file.default_models,
            ocr_model: file.ocr_model,
        };
        config.validated()
    }

    /// Apply command-line (or environment) values on top.
    pub fn with_overrides(mut self, base_url: Option<String>, data_dir: Option<PathBuf>) -> Result<Self> {
        if let Some(url) = base_url {
            self.base_url = url;
        }
        if let Some(dir) = data_dir {
            self.data_dir = dir;
        }
        self.validated()
    }

    fn validated(mut self) -> Result<Self> {
        let url = self.base_url.trim().trim_end_matches('/').to_string();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ClientError::Config(format!(
                "base_url must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }
        self.base_url = url;
        if self.connect_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(ClientError::Config("timeouts must be positive".to_string()));
        }
        Ok(self)
    }

    /// Absolute URL of an API path such as `/api/providers`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}
