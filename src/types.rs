//! Shared types for the VEGA scanner.
//!
//! These types form the data model used across all modules: calendar
//! events, price bars, option quotes, and the per-ticker analysis
//! record that flows from the engine into the cache and out to the
//! caller. Absent values are `None` — never sentinel zeros or "N/A"
//! strings.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Earnings timing
// ---------------------------------------------------------------------------

/// When a company reports earnings relative to the trading session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EarningsTiming {
    #[serde(rename = "Pre Market")]
    PreMarket,
    #[serde(rename = "Post Market")]
    PostMarket,
    #[serde(rename = "During Market")]
    DuringMarket,
    Unknown,
}

impl EarningsTiming {
    /// All known timings (useful for iteration).
    pub const ALL: &'static [EarningsTiming] = &[
        EarningsTiming::PreMarket,
        EarningsTiming::PostMarket,
        EarningsTiming::DuringMarket,
        EarningsTiming::Unknown,
    ];

    /// Canonical label, also used as the ranking sort key so that
    /// known timings order alphabetically by label.
    pub fn label(&self) -> &'static str {
        match self {
            EarningsTiming::PreMarket => "Pre Market",
            EarningsTiming::PostMarket => "Post Market",
            EarningsTiming::DuringMarket => "During Market",
            EarningsTiming::Unknown => "Unknown",
        }
    }

    /// Whether the calendar supplied no timing for this ticker.
    pub fn is_unknown(&self) -> bool {
        matches!(self, EarningsTiming::Unknown)
    }
}

impl fmt::Display for EarningsTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One row of the earnings calendar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarningsEvent {
    pub ticker: String,
    pub timing: EarningsTiming,
}

// ---------------------------------------------------------------------------
// Recommendation
// ---------------------------------------------------------------------------

/// Final scoring tier for a ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recommendation {
    Recommended,
    Consider,
    Avoid,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recommendation::Recommended => write!(f, "Recommended"),
            Recommendation::Consider => write!(f, "Consider"),
            Recommendation::Avoid => write!(f, "Avoid"),
        }
    }
}

// ---------------------------------------------------------------------------
// Price & option data
// ---------------------------------------------------------------------------

/// A single daily OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OhlcBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// One option contract row from a chain snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    pub strike: f64,
    pub last_price: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub volume: Option<f64>,
    pub open_interest: Option<f64>,
    pub implied_volatility: Option<f64>,
}

impl OptionQuote {
    /// Mid price, defined only when both bid and ask are strictly
    /// positive. A one-sided or crossed-to-zero quote has no mid.
    pub fn mid(&self) -> Option<f64> {
        match (self.bid, self.ask) {
            (Some(b), Some(a)) if b > 0.0 && a > 0.0 => Some((b + a) / 2.0),
            _ => None,
        }
    }
}

/// Calls and puts for a single expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionChain {
    pub expiry: NaiveDate,
    pub calls: Vec<OptionQuote>,
    pub puts: Vec<OptionQuote>,
}

impl OptionChain {
    /// A chain with either side empty carries no usable signal.
    pub fn is_one_sided(&self) -> bool {
        self.calls.is_empty() || self.puts.is_empty()
    }
}

/// Point-in-time quote metadata for a ticker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickerSummary {
    pub price: Option<f64>,
    /// Exchange code as reported by the provider (e.g. "NMS", "PNK").
    pub exchange: Option<String>,
    pub market_cap: Option<f64>,
}

// ---------------------------------------------------------------------------
// Analysis result
// ---------------------------------------------------------------------------

/// Per-ticker scan output. Immutable once stored; the cache fills
/// absent fields in place via its merge operation but never rewrites
/// populated ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub ticker: String,
    pub current_price: Option<f64>,
    pub market_cap: Option<f64>,
    /// Most recent daily volume.
    pub volume: Option<f64>,
    /// 30-bar mean daily volume.
    pub avg_volume: Option<f64>,
    pub avg_volume_ok: bool,
    pub iv_rv_ratio: Option<f64>,
    pub term_slope: Option<f64>,
    /// Term-structure IV interpolated at the 30-day horizon.
    pub iv30: Option<f64>,
    pub realized_vol: Option<f64>,
    /// ATM implied volatility at the nearest filtered expiry.
    pub current_iv: Option<f64>,
    /// ATM straddle mid as a percentage of the underlying.
    pub expected_move_pct: Option<f64>,
    pub earnings_time: EarningsTiming,
    pub recommendation: Recommendation,
}

impl AnalysisResult {
    /// Names of fields the cache should try to backfill later:
    /// expected move unavailable, current IV absent, or IV30 absent
    /// or zero.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.expected_move_pct.is_none() {
            fields.push("expected_move");
        }
        if self.current_iv.is_none() {
            fields.push("current_iv");
        }
        if self.iv30.is_none() || self.iv30 == Some(0.0) {
            fields.push("term_structure");
        }
        fields
    }

    /// Sort key for the final ranking: Recommended first, known
    /// timing before unknown, then alphabetically by timing label,
    /// then by ticker.
    pub fn rank_key(&self) -> (bool, bool, &'static str, &str) {
        (
            self.recommendation != Recommendation::Recommended,
            self.earnings_time.is_unknown(),
            self.earnings_time.label(),
            &self.ticker,
        )
    }

    /// Helper to build a fully-populated result for tests.
    #[cfg(test)]
    pub fn sample(ticker: &str) -> Self {
        AnalysisResult {
            ticker: ticker.to_string(),
            current_price: Some(184.25),
            market_cap: Some(2.8e12),
            volume: Some(4_200_000.0),
            avg_volume: Some(3_900_000.0),
            avg_volume_ok: true,
            iv_rv_ratio: Some(1.42),
            term_slope: Some(-0.0061),
            iv30: Some(0.51),
            realized_vol: Some(0.36),
            current_iv: Some(0.58),
            expected_move_pct: Some(7.8),
            earnings_time: EarningsTiming::PostMarket,
            recommendation: Recommendation::Recommended,
        }
    }
}

impl fmt::Display for AnalysisResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt_opt = |v: Option<f64>| match v {
            Some(x) => format!("{x:.2}"),
            None => "-".to_string(),
        };
        write!(
            f,
            "{} [{}] iv/rv: {} | slope: {} | move: {}% | {}",
            self.ticker,
            self.recommendation,
            fmt_opt(self.iv_rv_ratio),
            match self.term_slope {
                Some(s) => format!("{s:.5}"),
                None => "-".to_string(),
            },
            fmt_opt(self.expected_move_pct),
            self.earnings_time,
        )
    }
}

// ---------------------------------------------------------------------------
// Scan outcome
// ---------------------------------------------------------------------------

/// Terminal status of a scan invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanStatus {
    Completed,
    Cancelled,
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanStatus::Completed => write!(f, "completed"),
            ScanStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Ranked results plus the terminal status of the run.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub results: Vec<AnalysisResult>,
    pub status: ScanStatus,
}

impl ScanReport {
    pub fn completed(results: Vec<AnalysisResult>) -> Self {
        ScanReport {
            results,
            status: ScanStatus::Completed,
        }
    }

    pub fn cancelled(results: Vec<AnalysisResult>) -> Self {
        ScanReport {
            results,
            status: ScanStatus::Cancelled,
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for VEGA.
#[derive(Debug, thiserror::Error)]
pub enum VegaError {
    #[error("Provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    #[error("No listed options for {0}")]
    NoOptions(String),

    #[error("No ATM implied volatility derivable for {0}")]
    NoSignal(String),

    #[error("Empty ticker symbol")]
    EmptySymbol,

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl VegaError {
    /// Data-shape failures yield "no signal" for the ticker; they are
    /// skipped rather than retried.
    pub fn is_no_signal(&self) -> bool {
        matches!(self, VegaError::NoOptions(_) | VegaError::NoSignal(_))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
