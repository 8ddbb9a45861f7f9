//! Configuration loading and config-file resolution
//!
//! Config file resolution order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`DSW_CONFIG`)
//! 3. `~/.config/dsw/pipeline.toml` if it exists
//! 4. Built-in defaults
//!
//! Secrets and the database path may additionally be overridden from the
//! environment after the file is parsed.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const CONFIG_ENV_VAR: &str = "DSW_CONFIG";
pub const DATABASE_PATH_ENV_VAR: &str = "DSW_DATABASE_PATH";
pub const ANALYZER_KEY_ENV_VAR: &str = "DSW_ANALYZER_API_KEY";

/// Complete pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub database_path: PathBuf,
    pub cycle_interval_secs: u64,
    pub inter_post_delay_ms: u64,
    pub max_posts_per_cycle: usize,
    pub verification_interval_secs: u64,
    pub adapter_timeout_secs: u64,
    pub system_status_interval_secs: u64,
    pub http_bind: String,
    pub rules_path: Option<PathBuf>,
    pub analyzer: AnalyzerConfig,
    pub signals: SignalsConfig,
    pub confirmation: ConfirmationConfig,
    pub channels: ChannelsConfig,
    pub logging: LoggingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            cycle_interval_secs: 60,
            inter_post_delay_ms: 1000,
            max_posts_per_cycle: 50,
            verification_interval_secs: 300,
            adapter_timeout_secs: 10,
            system_status_interval_secs: 3600,
            http_bind: "127.0.0.1:5780".to_string(),
            rules_path: None,
            analyzer: AnalyzerConfig::default(),
            signals: SignalsConfig::default(),
            confirmation: ConfirmationConfig::default(),
            channels: ChannelsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn inter_post_delay(&self) -> Duration {
        Duration::from_millis(self.inter_post_delay_ms)
    }

    pub fn verification_interval(&self) -> Duration {
        Duration::from_secs(self.verification_interval_secs)
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }

    pub fn system_status_interval(&self) -> Duration {
        Duration::from_secs(self.system_status_interval_secs)
    }

    /// Reject values that would stall or spin the scheduler
    pub fn validate(&self) -> Result<()> {
        if self.cycle_interval_secs == 0 {
            return Err(Error::Config("cycle_interval_secs must be > 0".to_string()));
        }
        if self.verification_interval_secs == 0 {
            return Err(Error::Config("verification_interval_secs must be > 0".to_string()));
        }
        if self.adapter_timeout_secs == 0 {
            return Err(Error::Config("adapter_timeout_secs must be > 0".to_string()));
        }
        if self.max_posts_per_cycle == 0 {
            return Err(Error::Config("max_posts_per_cycle must be > 0".to_string()));
        }
        Ok(())
    }
}

/// External NLP/translation service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub requests_per_second: u32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            requests_per_second: 5,
        }
    }
}

/// Weather/seismic signal provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalsConfig {
    pub base_url: Option<String>,
}

/// One confirmation feed source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSourceConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    pub sources: Vec<FeedSourceConfig>,
}

/// Outbound channel gateways
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub email_webhook: Option<String>,
    pub sms_webhook: Option<String>,
    /// Log messages instead of sending them
    pub dry_run: bool,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            email_webhook: None,
            sms_webhook: None,
            dry_run: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "dsw_pipeline=info,dsw_common=info".to_string(),
        }
    }
}

/// Resolve which config file to read, if any
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: user config dir
    dirs::config_dir()
        .map(|d| d.join("dsw").join("pipeline.toml"))
        .filter(|p| p.exists())
}

/// Load configuration from `path` (or defaults), then apply env overrides
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
            let config: PipelineConfig = toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
            info!("Configuration loaded from {}", path.display());
            config
        }
        None => {
            info!("No configuration file found, using defaults");
            PipelineConfig::default()
        }
    };

    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Environment overrides for secrets and storage location
pub fn apply_env_overrides(config: &mut PipelineConfig) {
    if let Ok(key) = std::env::var(ANALYZER_KEY_ENV_VAR) {
        if !key.trim().is_empty() {
            if config.analyzer.api_key.is_some() {
                warn!("Analyzer API key found in both TOML and environment. Using environment.");
            }
            config.analyzer.api_key = Some(key);
        }
    }

    if let Ok(path) = std::env::var(DATABASE_PATH_ENV_VAR) {
        if !path.trim().is_empty() {
            config.database_path = PathBuf::from(path);
        }
    }
}

/// OS-dependent default database location
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("dsw").join("dsw.db"))
        .unwrap_or_else(|| PathBuf::from("./dsw_data/dsw.db"))
}
