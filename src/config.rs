//! Application configuration: directory layout and retry knobs. Values come
//! from an optional `br-aqi.toml`; the directory paths can additionally be
//! overridden by `BR_AQI_*_DIR` environment variables (loaded via dotenv in
//! `main`). Retry knobs are file-only.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::common::error::{PipelineError, Result};
use crate::connectors::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Bronze layer root.
    pub bronze_dir: PathBuf,
    /// Silver layer root.
    pub silver_dir: PathBuf,
    /// Fetch cache root.
    pub cache_dir: PathBuf,
    /// Source descriptor directory.
    pub registry_dir: PathBuf,
    pub retry: RetrySection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bronze_dir: PathBuf::from("data/bronze"),
            silver_dir: PathBuf::from("data/silver"),
            cache_dir: PathBuf::from("artifacts/cache"),
            registry_dir: PathBuf::from("registry/sources"),
            retry: RetrySection::default(),
        }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            jitter_ms: policy.jitter.as_millis() as u64,
        }
    }
}

impl AppConfig {
    /// Load from `path` if it exists, else defaults; then apply the
    /// directory env overrides (`BR_AQI_BRONZE_DIR` and friends).
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw).map_err(|e| PipelineError::Registry {
                message: format!("invalid config {}: {e}", path.display()),
            })?
        } else {
            Self::default()
        };
        if let Ok(dir) = std::env::var("BR_AQI_BRONZE_DIR") {
            config.bronze_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("BR_AQI_SILVER_DIR") {
            config.silver_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("BR_AQI_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("BR_AQI_REGISTRY_DIR") {
            config.registry_dir = PathBuf::from(dir);
        }
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            jitter: Duration::from_millis(self.retry.jitter_ms),
        }
    }
}
