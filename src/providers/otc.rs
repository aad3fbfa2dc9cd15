//! OTC ticker universe.
//!
//! Over-the-counter names are excluded from scans up front. The
//! universe is a point-in-time snapshot, one symbol per line, built
//! from the stockanalysis.com screener; `refresh` re-pages the
//! screener and atomically rewrites the snapshot file. A second,
//! per-ticker check against the quote's exchange code catches OTC
//! names the snapshot missed.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::net::session::SessionManager;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const SCREENER_URL: &str = "https://api.stockanalysis.com/api/screener/a/f";

/// Exchange codes treated as OTC on the per-ticker re-check.
pub const OTC_EXCHANGES: &[&str] = &["PNK", "Other OTC", "OTC", "GREY"];

// ---------------------------------------------------------------------------
// API response types (screener JSON → Rust)
// ---------------------------------------------------------------------------

/// Screener page envelope. With `i=symbols` the inner rows are plain
/// strings of the form `OTCMKTS/SYMB`; the last page is empty/null.
#[derive(Debug, Deserialize)]
struct ScreenerEnvelope {
    #[serde(default)]
    data: Option<ScreenerData>,
}

#[derive(Debug, Deserialize)]
struct ScreenerData {
    #[serde(default)]
    data: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Universe
// ---------------------------------------------------------------------------

pub struct OtcList {
    path: PathBuf,
    symbols: RwLock<HashSet<String>>,
}

impl OtcList {
    /// Load the snapshot. A missing file is an empty universe, not an
    /// error — the filter simply passes everything through.
    pub fn load(path: &str) -> Result<Self> {
        let path_buf = PathBuf::from(path);
        let symbols = match std::fs::read_to_string(&path_buf) {
            Ok(raw) => raw
                .lines()
                .map(|line| line.trim().to_uppercase())
                .filter(|line| !line.is_empty())
                .collect::<HashSet<_>>(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path, "No OTC snapshot found; filter starts empty");
                HashSet::new()
            }
            Err(e) => {
                return Err(e).context(format!("Failed to read OTC snapshot {path}"));
            }
        };

        if !symbols.is_empty() {
            info!(path, count = symbols.len(), "OTC universe loaded");
        }
        Ok(OtcList {
            path: path_buf,
            symbols: RwLock::new(symbols),
        })
    }

    pub async fn contains(&self, ticker: &str) -> bool {
        self.symbols.read().await.contains(&ticker.trim().to_uppercase())
    }

    pub async fn len(&self) -> usize {
        self.symbols.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.symbols.read().await.is_empty()
    }

    /// Quote-level OTC check, independent of the snapshot.
    pub fn is_otc_exchange(exchange: &str) -> bool {
        OTC_EXCHANGES.contains(&exchange)
    }

    /// Re-page the screener and replace both the in-memory set and the
    /// snapshot file. Fails without touching either when the screener
    /// yields nothing.
    pub async fn refresh(&self, sessions: &SessionManager) -> Result<usize> {
        let mut symbols = HashSet::new();
        let mut page = 1u32;
        loop {
            let url = format!(
                "{SCREENER_URL}?m=marketCap&s=desc&c=no,s,n,marketCap,price,change,revenue\
                 &cn=1000&f=exchangeCode-is-OTC,subtype-is-stock&i=symbols&p={page}"
            );
            let session = sessions.session().await;
            debug!(page, session = %session.id(), "Fetching OTC screener page");

            let resp = session
                .client()
                .get(&url)
                .send()
                .await
                .context("OTC screener request failed")?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("OTC screener error {status}: {body}");
            }

            let envelope: ScreenerEnvelope = resp
                .json()
                .await
                .context("Failed to parse OTC screener response")?;

            let rows = envelope.data.and_then(|d| d.data).unwrap_or_default();
            if rows.is_empty() {
                break;
            }
            for row in &rows {
                if let Some(symbol) = symbol_from_row(row) {
                    symbols.insert(symbol);
                }
            }
            page += 1;
        }

        if symbols.is_empty() {
            anyhow::bail!("OTC screener returned no symbols; keeping previous snapshot");
        }

        self.write_snapshot(&symbols)?;
        let count = symbols.len();
        *self.symbols.write().await = symbols;
        info!(count, pages = page - 1, "OTC universe refreshed");
        Ok(count)
    }

    /// Write the snapshot via a temp file and rename, so a crash never
    /// leaves a half-written universe behind.
    fn write_snapshot(&self, symbols: &HashSet<String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context(format!(
                    "Failed to create snapshot directory {}",
                    parent.display()
                ))?;
            }
        }

        let mut lines: Vec<&str> = symbols.iter().map(String::as_str).collect();
        lines.sort_unstable();

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, lines.join("\n")).context(format!(
            "Failed to write OTC snapshot to {}",
            tmp.display()
        ))?;
        std::fs::rename(&tmp, &self.path).context(format!(
            "Failed to move OTC snapshot into place at {}",
            self.path.display()
        ))?;
        Ok(())
    }
}

/// Symbol from a screener row: the segment after the last `/`.
fn symbol_from_row(row: &str) -> Option<String> {
    let symbol = row.rsplit('/').next().unwrap_or(row).trim().to_uppercase();
    if symbol.is_empty() {
        None
    } else {
        Some(symbol)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> String {
        let mut p = std::env::temp_dir();
        p.push(format!("vega_test_otc_{}.txt", uuid::Uuid::new_v4()));
        p.to_string_lossy().to_string()
    }

    #[test]
    fn test_symbol_from_row() {
        assert_eq!(symbol_from_row("OTCMKTS/TSNP"), Some("TSNP".to_string()));
        assert_eq!(symbol_from_row("bare"), Some("BARE".to_string()));
        assert_eq!(symbol_from_row("a/b/ghvi"), Some("GHVI".to_string()));
        assert_eq!(symbol_from_row("OTCMKTS/"), None);
        assert_eq!(symbol_from_row("   "), None);
    }

    #[test]
    fn test_parse_screener_page() {
        let json = r#"{"status": 200, "data": {"data": ["OTCMKTS/TSNP", "OTCMKTS/GHVI", "SNDL"]}}"#;
        let envelope: ScreenerEnvelope = serde_json::from_str(json).unwrap();
        let rows = envelope.data.and_then(|d| d.data).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(symbol_from_row(&rows[0]), Some("TSNP".to_string()));
    }

    #[test]
    fn test_parse_screener_last_page() {
        for json in [
            r#"{"status": 200, "data": {"data": []}}"#,
            r#"{"status": 200, "data": {"data": null}}"#,
            r#"{"status": 200, "data": null}"#,
        ] {
            let envelope: ScreenerEnvelope = serde_json::from_str(json).unwrap();
            let rows = envelope.data.and_then(|d| d.data).unwrap_or_default();
            assert!(rows.is_empty());
        }
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let list = OtcList::load("/tmp/vega_otc_does_not_exist_xyz.txt").unwrap();
        assert!(list.is_empty().await);
        assert!(!list.contains("TSNP").await);
    }

    #[tokio::test]
    async fn test_load_normalizes_symbols() {
        let path = temp_path();
        std::fs::write(&path, "tsnp\n  GHVI \n\nsndl\n").unwrap();

        let list = OtcList::load(&path).unwrap();
        assert_eq!(list.len().await, 3);
        assert!(list.contains("TSNP").await);
        assert!(list.contains("ghvi").await);
        assert!(list.contains(" SNDL ").await);
        assert!(!list.contains("AAPL").await);

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_write_and_reload() {
        let path = temp_path();
        let list = OtcList::load(&path).unwrap();

        let symbols: HashSet<String> =
            ["TSNP", "GHVI", "SNDL"].iter().map(|s| s.to_string()).collect();
        list.write_snapshot(&symbols).unwrap();

        let reloaded = OtcList::load(&path).unwrap();
        assert_eq!(reloaded.len().await, 3);
        assert!(reloaded.contains("GHVI").await);
        // Deterministic file layout: sorted, one per line.
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, "GHVI\nSNDL\nTSNP");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_otc_exchange_codes() {
        assert!(OtcList::is_otc_exchange("PNK"));
        assert!(OtcList::is_otc_exchange("Other OTC"));
        assert!(OtcList::is_otc_exchange("OTC"));
        assert!(OtcList::is_otc_exchange("GREY"));
        assert!(!OtcList::is_otc_exchange("NMS"));
        assert!(!OtcList::is_otc_exchange("NasdaqGS"));
    }
}
