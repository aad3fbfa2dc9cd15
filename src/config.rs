//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every field carries a default so a missing file or section still
//! yields a working configuration. Path values may reference an
//! environment variable as `${VAR}`, resolved at load time.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

use crate::types::VegaError;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub scan: ScanConfig,
    pub proxy: ProxyConfig,
    pub cache: CacheConfig,
    pub otc: OtcConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScanConfig {
    /// Tickers per batch; batches run strictly one after another.
    pub batch_size: usize,
    /// Concurrent per-ticker analyses within a batch (capped at the
    /// batch length).
    pub analysis_concurrency: usize,
    /// Price-history range requested from the market data provider.
    pub history_range: String,
    pub request_timeout_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            batch_size: 10,
            analysis_concurrency: 5,
            history_range: "3mo".to_string(),
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub max_pool_size: usize,
    pub validation_concurrency: usize,
    pub validation_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            enabled: false,
            max_pool_size: 50,
            validation_concurrency: 20,
            validation_timeout_secs: 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: String,
    pub expiry_days: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            dir: "scan_cache".to_string(),
            expiry_days: 7,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OtcConfig {
    /// Point-in-time snapshot of excluded symbols, one per line.
    pub snapshot_path: String,
    pub refresh_on_start: bool,
}

impl Default for OtcConfig {
    fn default() -> Self {
        OtcConfig {
            snapshot_path: "otc-tickers.txt".to_string(),
            refresh_on_start: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file. A missing file is not an
    /// error — defaults apply; a present-but-invalid file is.
    pub fn load(path: &str) -> Result<Self> {
        let mut config: AppConfig = match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {path}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read config file: {path}"))
            }
        };
        config.cache.dir = resolve_env_refs(&config.cache.dir)?;
        config.otc.snapshot_path = resolve_env_refs(&config.otc.snapshot_path)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.scan.batch_size == 0 {
            return Err(VegaError::Config("scan.batch_size must be > 0".to_string()).into());
        }
        if self.scan.analysis_concurrency == 0 {
            return Err(
                VegaError::Config("scan.analysis_concurrency must be > 0".to_string()).into(),
            );
        }
        if self.cache.expiry_days <= 0 {
            return Err(VegaError::Config("cache.expiry_days must be > 0".to_string()).into());
        }
        Ok(())
    }
}

/// Expand `${VAR}` references against the process environment.
/// A reference to an unset variable is a configuration error.
fn resolve_env_refs(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        let Some(end) = rest[start..].find('}') else {
            return Err(VegaError::Config(format!("Unterminated ${{..}} in: {value}")).into());
        };
        out.push_str(&rest[..start]);
        let name = &rest[start + 2..start + end];
        let resolved = std::env::var(name)
            .map_err(|_| VegaError::Config(format!("Environment variable not set: {name}")))?;
        out.push_str(&resolved);
        rest = &rest[start + end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
