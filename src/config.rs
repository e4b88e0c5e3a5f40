//! Configuration management
//!
//! Learning rates, advisory thresholds and storage settings, loaded from a
//! TOML file. Every field has a default so partial files are fine.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Feedback adaptation rules
    #[serde(default)]
    pub learning: LearningConfig,
    /// Read-side thresholds
    #[serde(default)]
    pub advisor: AdvisorConfig,
    /// Persistence
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Minimum confidence for a raw observation to count
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Fraction of the remaining gap to 1.0 closed by an approval
    #[serde(default = "default_approval_boost")]
    pub approval_boost: f64,
    /// Fraction of the current confidence removed by a rejection
    #[serde(default = "default_rejection_penalty")]
    pub rejection_penalty: f64,
    /// Weight of a corrected annotation in the confidence running average
    #[serde(default = "default_correction_weight")]
    pub correction_weight: f64,
    /// Successful prompts retained per pattern
    #[serde(default = "default_max_successful_prompts")]
    pub max_successful_prompts: usize,
    /// Bounding-box samples retained per pattern
    #[serde(default = "default_max_box_samples")]
    pub max_box_samples: usize,
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_approval_boost() -> f64 {
    0.1
}

fn default_rejection_penalty() -> f64 {
    0.1
}

fn default_correction_weight() -> f64 {
    2.0
}

fn default_max_successful_prompts() -> usize {
    10
}

fn default_max_box_samples() -> usize {
    20
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            approval_boost: default_approval_boost(),
            rejection_penalty: default_rejection_penalty(),
            correction_weight: default_correction_weight(),
            max_successful_prompts: default_max_successful_prompts(),
            max_box_samples: default_max_box_samples(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorConfig {
    /// Observations a pattern needs before it shapes prompts
    #[serde(default = "default_min_observations")]
    pub min_observations_for_guidance: u64,
    /// Rejections for one reason above which a caution is emitted
    #[serde(default = "default_rejection_warning_threshold")]
    pub rejection_warning_threshold: u32,
    /// Size of the analytics top-features list
    #[serde(default = "default_top_features")]
    pub top_features: usize,
}

fn default_min_observations() -> u64 {
    5
}

fn default_rejection_warning_threshold() -> u32 {
    3
}

fn default_top_features() -> usize {
    10
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            min_observations_for_guidance: default_min_observations(),
            rejection_warning_threshold: default_rejection_warning_threshold(),
            top_features: default_top_features(),
        }
    }
}

/// Which storage backend persists pattern state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    Memory,
    #[default]
    Local,
    Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackendKind,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_key")]
    pub key: String,
    /// Root directory for the local backend (defaults to the data dir)
    #[serde(default)]
    pub local_root: Option<PathBuf>,
    /// API root for the object backend
    #[serde(default)]
    pub object_url: Option<String>,
    /// Environment variable holding the object storage API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Upper bound for any single storage call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Start from an empty store without reading persisted state
    #[serde(default)]
    pub skip_initial_load: bool,
    /// Persist after mutations without making the caller wait
    #[serde(default = "default_true")]
    pub persist_in_background: bool,
}

fn default_bucket() -> String {
    "ml-patterns".to_string()
}

fn default_key() -> String {
    "learned-patterns.json".to_string()
}

fn default_api_key_env() -> String {
    "PATTERN_STORAGE_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::default(),
            bucket: default_bucket(),
            key: default_key(),
            local_root: None,
            object_url: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            skip_initial_load: false,
            persist_in_background: true,
        }
    }
}

impl Config {
    /// Load configuration from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Reject values that would break the numeric invariants
    pub fn validate(&self) -> Result<()> {
        let l = &self.learning;
        if !(0.0..=1.0).contains(&l.confidence_threshold) {
            anyhow::bail!("learning.confidence_threshold must be in [0, 1], got {}", l.confidence_threshold);
        }
        if !(0.0..=1.0).contains(&l.approval_boost) {
            anyhow::bail!("learning.approval_boost must be in [0, 1], got {}", l.approval_boost);
        }
        if !(0.0..=1.0).contains(&l.rejection_penalty) {
            anyhow::bail!("learning.rejection_penalty must be in [0, 1], got {}", l.rejection_penalty);
        }
        if !(l.correction_weight.is_finite() && l.correction_weight > 0.0) {
            anyhow::bail!("learning.correction_weight must be positive, got {}", l.correction_weight);
        }
        if self.storage.timeout_secs == 0 {
            anyhow::bail!("storage.timeout_secs must be at least 1");
        }
        Ok(())
    }
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "pattern-engine", "pattern-engine")
        .context("Failed to get project directories")
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

/// Get default configuration as TOML string
pub fn default_config_toml() -> String {
    let config = Config::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| "# Default configuration\n".to_string())
}
