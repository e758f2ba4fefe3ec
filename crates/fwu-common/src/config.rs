//! ---
//! fwu_section: "01-core-functionality"
//! fwu_subsection: "module"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Shared primitives and utilities for the upgrade runtime."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_base_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_retry_jitter() -> Duration {
    Duration::from_secs(2)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_flash_timeout() -> Duration {
    Duration::from_secs(70)
}

fn default_settle_delay() -> Duration {
    Duration::from_secs(120)
}

fn default_reconnect_interval() -> Duration {
    Duration::from_secs(12)
}

fn default_reconnect_attempts() -> u32 {
    10
}

fn default_journal_path() -> PathBuf {
    PathBuf::from("target/fwu/operations.jsonl")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_operation_log() -> bool {
    true
}

fn default_upload_dir() -> String {
    "/tmp".to_owned()
}

fn default_checksum_file() -> String {
    "/etc/openwisp/firmware_checksum".to_owned()
}

fn default_checksum_probe() -> String {
    "test -f {file}".to_owned()
}

fn default_checksum_read() -> String {
    "cat {file}".to_owned()
}

fn default_mkdir_command() -> String {
    "mkdir -p {dir}".to_owned()
}

fn default_checksum_write() -> String {
    "echo {checksum} > {file}".to_owned()
}

/// Primary configuration object for the upgrade runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub upgrade: UpgradeConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    /// Extra image types appended to (or overriding) the builtin hardware catalog.
    #[serde(default)]
    pub hardware: Vec<HardwareImageConfig>,
    /// Extra device-type command sets keyed by update strategy tag.
    #[serde(default)]
    pub upgraders: IndexMap<String, CommandTemplateConfig>,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "FWU_CONFIG";

    /// Load configuration from disk, respecting the `FWU_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Like [`AppConfig::load`] but falls back to defaults when no file exists.
    pub fn load_or_default<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        let env_set = std::env::var(Self::ENV_CONFIG_PATH)
            .map(|value| !value.trim().is_empty())
            .unwrap_or(false);
        if !env_set && !candidates.iter().any(|c| c.as_ref().exists()) {
            debug!("no configuration file present; using defaults");
            return Ok(Self::default());
        }
        Self::load(candidates)
    }

    pub fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.upgrade.validate()?;
        for entry in &self.hardware {
            entry.validate()?;
        }
        for (tag, templates) in &self.upgraders {
            templates.validate(tag)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Timing and retry budget of a single upgrade operation.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeConfig {
    /// Total executor runs allowed for recoverable failures (first run included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub retry_base_delay: Duration,
    #[serde(default = "default_retry_jitter")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub retry_jitter: Duration,
    #[serde(default = "default_command_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub command_timeout: Duration,
    #[serde(default = "default_flash_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub flash_timeout: Duration,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl UpgradeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!("upgrade.max_attempts must be at least 1"));
        }
        if self.reconnect.max_attempts == 0 {
            return Err(anyhow!("upgrade.reconnect.max_attempts must be at least 1"));
        }
        if self.command_timeout.is_zero() || self.flash_timeout.is_zero() {
            return Err(anyhow!("command timeouts must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_base_delay: default_retry_base_delay(),
            retry_jitter: default_retry_jitter(),
            command_timeout: default_command_timeout(),
            flash_timeout: default_flash_timeout(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Pacing of the post-flash reconnect loop.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Wait applied before the first attempt only, while the device reboots.
    #[serde(default = "default_settle_delay")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub settle_delay: Duration,
    #[serde(default = "default_reconnect_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub interval: Duration,
    #[serde(default = "default_reconnect_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            settle_delay: default_settle_delay(),
            interval: default_reconnect_interval(),
            max_attempts: default_reconnect_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_journal_path")]
    pub path: PathBuf,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_journal_path(),
        }
    }
}

/// Hardware catalog entry declared in configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HardwareImageConfig {
    pub image_type: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub boards: Vec<String>,
}

impl HardwareImageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.image_type.trim().is_empty() {
            return Err(anyhow!("hardware entries require a non-empty image_type"));
        }
        if self.boards.iter().all(|b| b.trim().is_empty()) {
            return Err(anyhow!(
                "hardware entry '{}' must list at least one board",
                self.image_type
            ));
        }
        Ok(())
    }
}

/// Remote command templates for one device type.
///
/// Placeholders: `{path}` is the uploaded image path, `{file}` the checksum
/// marker, `{dir}` its parent directory and `{checksum}` the image hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandTemplateConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
    #[serde(default = "default_checksum_file")]
    pub checksum_file: String,
    pub test_command: String,
    pub flash_command: String,
    #[serde(default = "default_checksum_probe")]
    pub checksum_probe: String,
    #[serde(default = "default_checksum_read")]
    pub checksum_read: String,
    #[serde(default = "default_mkdir_command")]
    pub mkdir_command: String,
    #[serde(default = "default_checksum_write")]
    pub checksum_write: String,
}

impl CommandTemplateConfig {
    pub fn validate(&self, tag: &str) -> Result<()> {
        if tag.trim().is_empty() {
            return Err(anyhow!("upgrader tags must not be empty"));
        }
        for (name, template) in [
            ("test_command", &self.test_command),
            ("flash_command", &self.flash_command),
        ] {
            if !template.contains("{path}") {
                return Err(anyhow!(
                    "upgrader '{}' {} must reference the {{path}} placeholder",
                    tag,
                    name
                ));
            }
        }
        if !self.checksum_write.contains("{checksum}") {
            return Err(anyhow!(
                "upgrader '{}' checksum_write must reference the {{checksum}} placeholder",
                tag
            ));
        }
        if !self.checksum_file.starts_with('/') {
            return Err(anyhow!(
                "upgrader '{}' checksum_file must be an absolute path",
                tag
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Also write a rolling file holding only operation-scoped events.
    #[serde(default = "default_operation_log")]
    pub operation_log: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            operation_log: default_operation_log(),
        }
    }
}
