//! Configuration management.
//!
//! Settings load from a TOML file (`--config`, `./docrelay.toml`, or the
//! user config directory) with serde defaults for everything, so a bare
//! `docrelay init` works without any file present.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::{DestinationBinding, RetryPolicy};
use crate::services::DirectoryDestination;

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Root directory for the database and document store.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Database URL override. Defaults to `{data_dir}/docrelay.db`.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub destinations: Vec<DestinationConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_url: None,
            pipeline: PipelineSettings::default(),
            retry: RetrySettings::default(),
            destinations: Vec::new(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./docrelay-data")
}

/// Pipeline tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSettings {
    /// Delivery payloads above this many bytes are split at page
    /// boundaries. Zero disables splitting.
    #[serde(default)]
    pub max_single_file_size: u64,
    /// How long a stage may stay in progress before the watchdog fails it.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    /// Interval between watchdog passes.
    #[serde(default = "default_watchdog_period_secs")]
    pub watchdog_period_secs: u64,
    /// Default worker count for `process`.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_single_file_size: 0,
            stage_timeout_secs: default_stage_timeout_secs(),
            watchdog_period_secs: default_watchdog_period_secs(),
            workers: default_workers(),
        }
    }
}

fn default_stage_timeout_secs() -> u64 {
    3600
}

fn default_watchdog_period_secs() -> u64 {
    60
}

fn default_workers() -> usize {
    4
}

/// Retry bounds for transient stage failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    60_000
}

/// One configured delivery destination.
// No deny_unknown_fields here: it does not compose with #[serde(flatten)].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub id: String,
    #[serde(flatten)]
    pub kind: DestinationKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Skip delivering documents the dedup gate marked as duplicates.
    #[serde(default)]
    pub skip_duplicates: bool,
}

fn default_true() -> bool {
    true
}

/// Destination backend selector.
///
/// Cloud adapters (S3, WebDAV, mail, ...) register here as they land; each
/// owns its credentials and wire protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DestinationKind {
    /// Copy into a local or mounted directory.
    Directory { path: PathBuf },
}

impl Settings {
    /// Load settings from an explicit path, `./docrelay.toml`, or the user
    /// config directory, falling back to defaults.
    pub fn load(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let candidates: Vec<PathBuf> = match config_path {
            Some(path) => vec![path.to_path_buf()],
            None => {
                let mut paths = vec![PathBuf::from("docrelay.toml")];
                if let Some(config_dir) = dirs::config_dir() {
                    paths.push(config_dir.join("docrelay").join("config.toml"));
                }
                paths
            }
        };

        for path in &candidates {
            if path.exists() {
                let body = std::fs::read_to_string(path)?;
                let settings: Settings = toml::from_str(&body)
                    .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
                return Ok(settings);
            }
        }

        if config_path.is_some() {
            anyhow::bail!("config file not found: {}", candidates[0].display());
        }
        Ok(Settings::default())
    }

    /// Resolved database URL.
    pub fn database_url(&self) -> String {
        self.database_url
            .clone()
            .unwrap_or_else(|| self.data_dir.join("docrelay.db").display().to_string())
    }

    /// Where raw ingested content lives.
    pub fn documents_dir(&self) -> PathBuf {
        self.data_dir.join("documents")
    }

    /// Where converted artifacts live.
    pub fn processed_dir(&self) -> PathBuf {
        self.data_dir.join("processed")
    }

    /// Where split chunks live.
    pub fn chunks_dir(&self) -> PathBuf {
        self.data_dir.join("chunks")
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.stage_timeout_secs)
    }

    pub fn watchdog_period(&self) -> Duration {
        Duration::from_secs(self.pipeline.watchdog_period_secs)
    }

    /// Build adapter bindings for the enabled destinations.
    pub fn destination_bindings(&self) -> Vec<DestinationBinding> {
        self.destinations
            .iter()
            .filter(|dest| dest.enabled)
            .map(|dest| {
                let adapter = match &dest.kind {
                    DestinationKind::Directory { path } => {
                        Arc::new(DirectoryDestination::new(path.clone()))
                    }
                };
                DestinationBinding {
                    id: dest.id.clone(),
                    adapter,
                    skip_duplicates: dest.skip_duplicates,
                }
            })
            .collect()
    }
}
