//! Scan result cache.
//!
//! One JSON file per (date, ticker-set) key under the cache directory.
//! Expiry is enforced at read time with eager deletion, so a stale
//! entry never survives past its next access. Distinct keys map to
//! distinct files; writers for the same key are assumed single.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::types::{AnalysisResult, EarningsTiming};

// ---------------------------------------------------------------------------
// Entry model
// ---------------------------------------------------------------------------

/// One cached scan: the ranked results plus descriptors of what each
/// record still lacks, kept so a later run can backfill only those
/// tickers instead of rescanning the whole set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub timestamp: DateTime<Utc>,
    pub date: NaiveDate,
    pub tickers: Vec<String>,
    pub results: Vec<AnalysisResult>,
    pub missing: Vec<MissingFields>,
}

/// Per-ticker backfill descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingFields {
    pub ticker: String,
    pub fields: Vec<String>,
    pub earnings_time: EarningsTiming,
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

pub struct ScanCache {
    dir: PathBuf,
    expiry_days: i64,
}

impl ScanCache {
    pub fn new(config: &CacheConfig) -> Self {
        ScanCache {
            dir: PathBuf::from(&config.dir),
            expiry_days: config.expiry_days,
        }
    }

    /// Digest key for a scan. Tickers are sorted before hashing, so
    /// the same date and set produce the same key in any input order.
    pub fn cache_key(date: NaiveDate, tickers: &[String]) -> String {
        let mut sorted: Vec<&str> = tickers.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        let seed = format!("{}_{}", date, sorted.join("_"));
        hex::encode(Sha256::digest(seed.as_bytes()))
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn is_expired(&self, timestamp: &DateTime<Utc>) -> bool {
        Utc::now().signed_duration_since(*timestamp) >= chrono::Duration::days(self.expiry_days)
    }

    /// Load the entry for a scan. Unreadable, unparseable, or expired
    /// entries are deleted and reported as a miss.
    pub fn get(&self, date: NaiveDate, tickers: &[String]) -> Result<Option<CacheEntry>> {
        let key = Self::cache_key(date, tickers);
        let path = self.entry_path(&key);
        if !path.exists() {
            debug!(%date, key = %key, "Cache miss");
            return Ok(None);
        }

        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable cache entry, removing");
                let _ = std::fs::remove_file(&path);
                return Ok(None);
            }
        };
        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt cache entry, removing");
                let _ = std::fs::remove_file(&path);
                return Ok(None);
            }
        };

        if self.is_expired(&entry.timestamp) {
            info!(%date, key = %key, "Cache entry expired, removing");
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove expired cache entry");
            }
            return Ok(None);
        }

        debug!(
            %date,
            key = %key,
            results = entry.results.len(),
            missing = entry.missing.len(),
            "Cache hit"
        );
        Ok(Some(entry))
    }

    /// Write the entry for a scan, recomputing the missing-field
    /// descriptors from the results. Overwrites any prior entry.
    pub fn save(&self, date: NaiveDate, tickers: &[String], results: &[AnalysisResult]) -> Result<()> {
        std::fs::create_dir_all(&self.dir).context(format!(
            "Failed to create cache directory {}",
            self.dir.display()
        ))?;

        let key = Self::cache_key(date, tickers);
        let path = self.entry_path(&key);
        let entry = CacheEntry {
            timestamp: Utc::now(),
            date,
            tickers: tickers.to_vec(),
            results: results.to_vec(),
            missing: missing_descriptors(results),
        };
        let json =
            serde_json::to_string_pretty(&entry).context("Failed to serialise cache entry")?;
        std::fs::write(&path, &json)
            .context(format!("Failed to write cache entry to {}", path.display()))?;

        debug!(
            %date,
            key = %key,
            results = entry.results.len(),
            missing = entry.missing.len(),
            "Scan cached"
        );
        Ok(())
    }

    /// Fill absent fields of the cached record for `partial.ticker`
    /// from `partial`, then persist. Populated fields are never
    /// overwritten; zero counts as absent, the same as null in the
    /// upstream feeds. No-op when the key or the ticker is not
    /// cached.
    pub fn merge_missing(
        &self,
        date: NaiveDate,
        tickers: &[String],
        partial: &AnalysisResult,
    ) -> Result<()> {
        let Some(mut entry) = self.get(date, tickers)? else {
            warn!(ticker = %partial.ticker, %date, "No cache entry to merge into");
            return Ok(());
        };

        let Some(record) = entry
            .results
            .iter_mut()
            .find(|r| r.ticker == partial.ticker)
        else {
            warn!(ticker = %partial.ticker, %date, "Ticker not present in cache entry");
            return Ok(());
        };

        fill(&mut record.current_price, partial.current_price);
        fill(&mut record.market_cap, partial.market_cap);
        fill(&mut record.volume, partial.volume);
        fill(&mut record.avg_volume, partial.avg_volume);
        fill(&mut record.iv_rv_ratio, partial.iv_rv_ratio);
        fill(&mut record.term_slope, partial.term_slope);
        fill(&mut record.realized_vol, partial.realized_vol);
        fill(&mut record.current_iv, partial.current_iv);
        fill(&mut record.expected_move_pct, partial.expected_move_pct);
        fill(&mut record.iv30, partial.iv30);

        debug!(ticker = %partial.ticker, %date, "Merged backfilled fields");
        self.save(date, tickers, &entry.results)
    }

    /// Sweep the cache directory, deleting expired and unparseable
    /// entries. Returns how many files were removed. Idempotent.
    pub fn purge_expired(&self) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        let dir_iter = std::fs::read_dir(&self.dir).context(format!(
            "Failed to read cache directory {}",
            self.dir.display()
        ))?;
        for item in dir_iter {
            let item = item.context("Failed to read cache directory entry")?;
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stale = match std::fs::read_to_string(&path) {
                Ok(raw) => match serde_json::from_str::<CacheEntry>(&raw) {
                    Ok(entry) => self.is_expired(&entry.timestamp),
                    Err(_) => true,
                },
                Err(_) => true,
            };
            if stale {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "Failed to remove stale cache entry");
                } else {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            info!(removed, dir = %self.dir.display(), "Purged stale cache entries");
        }
        Ok(removed)
    }
}

/// Missing-field descriptors for every record that still lacks data.
fn missing_descriptors(results: &[AnalysisResult]) -> Vec<MissingFields> {
    results
        .iter()
        .filter_map(|r| {
            let fields = r.missing_fields();
            if fields.is_empty() {
                return None;
            }
            Some(MissingFields {
                ticker: r.ticker.clone(),
                fields: fields.iter().map(|f| f.to_string()).collect(),
                earnings_time: r.earnings_time,
            })
        })
        .collect()
}

// Zero stands in for null in cached rows, so it is fillable too.
fn fill(slot: &mut Option<f64>, value: Option<f64>) {
    if slot.map_or(true, |v| v == 0.0) {
        if let Some(v) = value {
            *slot = Some(v);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
