//! Application configuration for the provider directory pipeline.
//!
//! User config lives at `~/.provdir/provdir.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ProvDirError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "provdir.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".provdir";

// ---------------------------------------------------------------------------
// Config structs (matching provdir.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Quality scoring weights and thresholds.
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Batch execution defaults.
    #[serde(default)]
    pub batch: BatchConfig,

    /// Retry policy for transient collaborator failures.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Public provider registry settings.
    #[serde(default)]
    pub registry: RegistryConfig,
}

/// `[scoring]` section. Validated when the scoring engine is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub weights: ScoringWeights,

    /// Minimum score for LOW risk (inclusive).
    #[serde(default = "default_low_risk_min")]
    pub low_risk_min: f64,

    /// Minimum score for MEDIUM risk (inclusive); below is HIGH.
    #[serde(default = "default_medium_risk_min")]
    pub medium_risk_min: f64,

    /// Phone/address confidence below this raises a stale-data flag.
    #[serde(default = "default_stale_below")]
    pub stale_below: f64,

    /// Specialty confidence below this raises a license flag.
    #[serde(default = "default_license_below")]
    pub license_below: f64,

    /// Number of flags that forces HIGH risk.
    #[serde(default = "default_high_risk_flag_count")]
    pub high_risk_flag_count: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            low_risk_min: default_low_risk_min(),
            medium_risk_min: default_medium_risk_min(),
            stale_below: default_stale_below(),
            license_below: default_license_below(),
            high_risk_flag_count: default_high_risk_flag_count(),
        }
    }
}

fn default_low_risk_min() -> f64 {
    0.85
}
fn default_medium_risk_min() -> f64 {
    0.5
}
fn default_stale_below() -> f64 {
    0.4
}
fn default_license_below() -> f64 {
    0.5
}
fn default_high_risk_flag_count() -> usize {
    2
}

/// `[scoring.weights]`: must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub phone: f64,
    pub address: f64,
    pub specialty: f64,
    pub enrichment: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            phone: 0.35,
            address: 0.35,
            specialty: 0.20,
            enrichment: 0.10,
        }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.phone + self.address + self.specialty + self.enrichment
    }
}

/// `[batch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum concurrent orchestrator runs.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-record time budget in milliseconds.
    #[serde(default = "default_record_timeout_ms")]
    pub record_timeout_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            record_timeout_ms: default_record_timeout_ms(),
        }
    }
}

impl BatchConfig {
    pub fn record_timeout(&self) -> Duration {
        Duration::from_millis(self.record_timeout_ms)
    }
}

fn default_concurrency() -> usize {
    8
}
fn default_record_timeout_ms() -> u64 {
    30_000
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any single delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Growth factor between consecutive delays.
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    250
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_multiplier() -> u32 {
    2
}

/// `[registry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry API endpoint.
    #[serde(default = "default_registry_url")]
    pub base_url: Url,

    /// API version query parameter.
    #[serde(default = "default_registry_version")]
    pub api_version: String,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_registry_timeout")]
    pub timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: default_registry_url(),
            api_version: default_registry_version(),
            timeout_secs: default_registry_timeout(),
        }
    }
}

fn default_registry_url() -> Url {
    Url::parse("https://npiregistry.cms.hhs.gov/api/").expect("static registry URL is valid")
}
fn default_registry_version() -> String {
    "2.1".into()
}
fn default_registry_timeout() -> u64 {
    10
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.provdir/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| ProvDirError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.provdir/provdir.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ProvDirError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ProvDirError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ProvDirError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ProvDirError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ProvDirError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("[scoring.weights]"));
        assert!(toml_str.contains("npiregistry.cms.hhs.gov"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.scoring, ScoringConfig::default());
        assert_eq!(parsed.retry.max_retries, 3);
        assert_eq!(parsed.batch.concurrency, 8);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[batch]
concurrency = 32

[scoring.weights]
phone = 0.25
address = 0.25
specialty = 0.25
enrichment = 0.25
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.batch.concurrency, 32);
        assert_eq!(config.batch.record_timeout(), Duration::from_secs(30));
        assert_eq!(config.scoring.weights.sum(), 1.0);
        assert_eq!(config.scoring.low_risk_min, 0.85);
    }

    #[test]
    fn default_weights_sum_to_one() {
        let sum = ScoringWeights::default().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn malformed_file_is_config_error() {
        let tmp = std::env::temp_dir().join(format!("provdir_cfg_{}.toml", uuid::Uuid::now_v7()));
        std::fs::write(&tmp, "[batch\nconcurrency = ").unwrap();
        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ProvDirError::Config { .. }));
        let _ = std::fs::remove_file(&tmp);
    }
}
