//! reqflow configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::coordinator::CoordinatorConfig;
use crate::csrf::DEFAULT_CSRF_HEADER;
use crate::transport::TransportConfig;

const LOCAL_CONFIG: &str = ".reqflow.yml";

/// Main reqflow configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Endpoint defaults applied to every dispatch
    pub transport: TransportConfig,

    /// Coordinator settings
    pub coordinator: CoordinatorConfig,

    /// CSRF token handling
    pub csrf: CsrfConfig,
}

/// CSRF token handling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Header the token travels in
    #[serde(rename = "header-name")]
    pub header_name: String,

    /// Persist the token here instead of keeping it in memory
    #[serde(rename = "token-file", skip_serializing_if = "Option::is_none")]
    pub token_file: Option<PathBuf>,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            header_name: DEFAULT_CSRF_HEADER.to_string(),
            token_file: None,
        }
    }
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        debug!("Config::validate: called");
        if self.transport.url.trim().is_empty() {
            return Err(eyre!("No endpoint configured. Set transport.url or pass --url."));
        }
        if self.coordinator.poll_interval_ms == 0 {
            return Err(eyre!("coordinator.poll-interval-ms must be greater than zero"));
        }
        if self.coordinator.channel_buffer == 0 {
            return Err(eyre!("coordinator.channel-buffer must be greater than zero"));
        }
        if self.csrf.header_name.trim().is_empty() {
            return Err(eyre!("csrf.header-name must not be empty"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::candidates() {
            if !candidate.exists() {
                continue;
            }
            match Self::load_from_file(&candidate) {
                Ok(config) => return Ok(config),
                Err(e) => warn!("Failed to load config from {}: {}", candidate.display(), e),
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    ///
    /// Errors are swallowed; the full load reports them later.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(path) => path.clone(),
            None => Self::candidates().into_iter().find(|p| p.exists())?,
        };
        let content = fs::read_to_string(path).ok()?;
        let config: Self = serde_yaml::from_str(&content).ok()?;
        config.log_level
    }

    /// Project-local file first, then the user config dir
    fn candidates() -> Vec<PathBuf> {
        let mut candidates = vec![PathBuf::from(LOCAL_CONFIG)];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("reqflow").join("reqflow.yml"));
        }
        candidates
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}
