//! Volatility analytics.
//!
//! Pure computation: the Yang-Zhang realized-volatility estimator
//! with a simple fallback, the ATM implied-volatility term structure,
//! expiry filtering, and the fixed-threshold recommendation scoring.
//! No I/O happens here.

use chrono::NaiveDate;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use crate::types::{OhlcBar, OptionChain, OptionQuote, Recommendation};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Rolling window, in bars, for realized volatility and mean volume.
pub const DEFAULT_WINDOW: usize = 30;

/// Trading periods per year used to annualize volatility.
pub const DEFAULT_ANNUALIZATION: f64 = 252.0;

/// 30-bar mean volume must reach this for the liquidity check.
pub const AVG_VOLUME_THRESHOLD: f64 = 1_500_000.0;

/// IV30 / RV30 must reach this for the richness check.
pub const IV_RV_THRESHOLD: f64 = 1.25;

/// Term slope must be at or below this for the backwardation check.
pub const SLOPE_THRESHOLD: f64 = -0.00406;

/// Horizon, in days, of the long end of the slope.
const LONG_HORIZON_DAYS: i64 = 45;

/// Ratio reported when realized volatility is exactly zero.
pub const IV_RV_ZERO_RV_SENTINEL: f64 = 9999.0;

// ---------------------------------------------------------------------------
// Term structure
// ---------------------------------------------------------------------------

/// Piecewise-linear ATM IV curve over days-to-expiry.
///
/// Evaluation outside the input domain clamps to the boundary value —
/// flat extrapolation, never a projected slope. The short-end slope
/// depends on this exact behavior.
#[derive(Debug, Clone)]
pub struct TermStructure {
    /// (days, iv), strictly sorted by days ascending.
    points: Vec<(f64, f64)>,
}

impl TermStructure {
    pub fn evaluate(&self, dte: f64) -> f64 {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];
        if dte <= first.0 {
            return first.1;
        }
        if dte >= last.0 {
            return last.1;
        }
        for pair in self.points.windows(2) {
            let (x0, y0) = pair[0];
            let (x1, y1) = pair[1];
            if dte >= x0 && dte <= x1 {
                if x1 == x0 {
                    return y0;
                }
                let t = (dte - x0) / (x1 - x0);
                return y0 + t * (y1 - y0);
            }
        }
        last.1
    }

    /// Shortest days-to-expiry in the curve.
    pub fn min_days(&self) -> f64 {
        self.points[0].0
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Volatility engine. Stateless apart from the warn-once flag for the
/// realized-volatility fallback, so one instance is shared across
/// concurrent analyses.
pub struct VolatilityEngine {
    fallback_warned: AtomicBool,
}

impl Default for VolatilityEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl VolatilityEngine {
    pub fn new() -> Self {
        VolatilityEngine {
            fallback_warned: AtomicBool::new(false),
        }
    }

    // -- Realized volatility ------------------------------------------------

    /// Annualized realized volatility over the trailing `window` bars.
    ///
    /// Yang-Zhang first; when it produces nothing over a full window
    /// (non-finite logs from bad bars) falls back once to the simple
    /// close-to-close estimator over the same window. Histories with
    /// fewer than `window + 1` bars yield `None` on both paths. The
    /// fallback logs a warning only on its first use per engine
    /// instance.
    pub fn realized_volatility(
        &self,
        bars: &[OhlcBar],
        window: usize,
        annualization: f64,
    ) -> Option<f64> {
        if let Some(v) = yang_zhang(bars, window, annualization) {
            return Some(v);
        }
        if !self.fallback_warned.swap(true, Ordering::Relaxed) {
            warn!(
                bars = bars.len(),
                window, "Yang-Zhang estimator failed; using simple volatility fallback"
            );
        }
        simple_volatility(bars, window, annualization)
    }

    // -- Term structure -----------------------------------------------------

    /// Build the piecewise-linear IV curve from (days, iv) samples.
    /// Pairs are sorted by days ascending; empty input yields `None`.
    pub fn term_structure(&self, days: &[i64], ivs: &[f64]) -> Option<TermStructure> {
        if days.is_empty() || days.len() != ivs.len() {
            return None;
        }
        let mut points: Vec<(f64, f64)> = days
            .iter()
            .zip(ivs.iter())
            .map(|(d, v)| (*d as f64, *v))
            .collect();
        points.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        Some(TermStructure { points })
    }

    /// Slope of the IV curve between the shortest expiry and the
    /// 45-day horizon. Defined as exactly 0 when `short_days == 45`.
    /// The zero-denominator guard (forcing 1) is kept for
    /// compatibility even though the preceding check makes it
    /// unreachable.
    pub fn term_slope(&self, structure: &TermStructure, short_days: i64) -> f64 {
        if short_days == LONG_HORIZON_DAYS {
            return 0.0;
        }
        let denom = LONG_HORIZON_DAYS - short_days;
        let denom = if denom == 0 { 1 } else { denom };
        let long = structure.evaluate(LONG_HORIZON_DAYS as f64);
        let short = structure.evaluate(short_days as f64);
        (long - short) / denom as f64
    }

    // -- Scoring --------------------------------------------------------------

    /// Fixed-threshold recommendation tiering. An absent or non-finite
    /// ratio/slope fails its threshold, never passes.
    pub fn score(
        &self,
        avg_volume_ok: bool,
        iv_rv_ratio: Option<f64>,
        slope: Option<f64>,
    ) -> Recommendation {
        let iv_ok = matches!(iv_rv_ratio, Some(r) if r.is_finite() && r >= IV_RV_THRESHOLD);
        let slope_ok = matches!(slope, Some(s) if s.is_finite() && s <= SLOPE_THRESHOLD);

        if avg_volume_ok && iv_ok && slope_ok {
            Recommendation::Recommended
        } else if slope_ok && (avg_volume_ok ^ iv_ok) {
            Recommendation::Consider
        } else {
            Recommendation::Avoid
        }
    }

    /// ATM straddle mid as a percentage of the underlying. Requires a
    /// strictly positive bid and ask on both legs.
    pub fn expected_move(
        &self,
        call: &OptionQuote,
        put: &OptionQuote,
        underlying: f64,
    ) -> Option<f64> {
        let call_mid = call.mid()?;
        let put_mid = put.mid()?;
        if underlying <= 0.0 {
            return None;
        }
        Some((call_mid + put_mid) / underlying * 100.0)
    }

    /// IV30 over realized volatility. Zero realized volatility maps to
    /// the compatibility sentinel; absent or non-finite maps to `None`.
    pub fn iv_rv_ratio(&self, iv30: f64, realized: Option<f64>) -> Option<f64> {
        match realized {
            Some(rv) if rv == 0.0 => Some(IV_RV_ZERO_RV_SENTINEL),
            Some(rv) if rv.is_finite() => Some(iv30 / rv),
            _ => None,
        }
    }

    // -- Expiry selection -------------------------------------------------------

    /// Keep expiries up to and including the first one at least 45
    /// days out; when none reaches that far, keep them all. A same-day
    /// expiry is trimmed when at least one other expiry remains.
    pub fn filter_expiries(&self, expiries: &[NaiveDate], today: NaiveDate) -> Vec<NaiveDate> {
        let cutoff = today + chrono::Duration::days(LONG_HORIZON_DAYS);
        let mut sorted = expiries.to_vec();
        sorted.sort();
        match sorted.iter().position(|d| *d >= cutoff) {
            Some(i) => {
                let mut kept = sorted[..=i].to_vec();
                if kept.len() > 1 && kept[0] == today {
                    kept.remove(0);
                }
                kept
            }
            None => sorted,
        }
    }

    /// ATM implied volatility for a chain: the mean of the IVs of the
    /// call and put whose strikes sit closest to the underlying.
    pub fn atm_iv(&self, chain: &OptionChain, underlying: f64) -> Option<f64> {
        let (call, put) = self.atm_quotes(chain, underlying)?;
        match (call.implied_volatility, put.implied_volatility) {
            (Some(c), Some(p)) => Some((c + p) / 2.0),
            _ => None,
        }
    }

    /// Nearest-to-money call and put for a chain.
    pub fn atm_quotes<'a>(
        &self,
        chain: &'a OptionChain,
        underlying: f64,
    ) -> Option<(&'a OptionQuote, &'a OptionQuote)> {
        let call = nearest_quote(&chain.calls, underlying)?;
        let put = nearest_quote(&chain.puts, underlying)?;
        Some((call, put))
    }

    /// Mean volume over the trailing `window` bars; `None` when the
    /// history is shorter than the window.
    pub fn mean_volume(&self, bars: &[OhlcBar], window: usize) -> Option<f64> {
        if window == 0 || bars.len() < window {
            return None;
        }
        let tail = &bars[bars.len() - window..];
        Some(tail.iter().map(|b| b.volume).sum::<f64>() / window as f64)
    }
}

/// Quote whose strike sits closest to the underlying. Ties keep the
/// first quote in chain order, i.e. the lower strike of the pair.
fn nearest_quote(quotes: &[OptionQuote], underlying: f64) -> Option<&OptionQuote> {
    let mut best: Option<(f64, &OptionQuote)> = None;
    for q in quotes {
        let dist = (q.strike - underlying).abs();
        if best.map_or(true, |(d, _)| dist < d) {
            best = Some((dist, q));
        }
    }
    best.map(|(_, q)| q)
}

// ---------------------------------------------------------------------------
// Estimators
// ---------------------------------------------------------------------------

/// Yang-Zhang estimator over the trailing window.
///
/// Combines overnight (open vs prior close), close-to-close, and
/// high/low range components with the bias constant
/// `k = 0.34 / (1.34 + (window+1)/(window-1))`:
/// `sqrt(open_vol + k*close_vol + (1-k)*rs) * sqrt(annualization)`.
/// Returns `None` when there are fewer than `window + 1` bars or the
/// result is not finite.
fn yang_zhang(bars: &[OhlcBar], window: usize, annualization: f64) -> Option<f64> {
    if window < 2 || bars.len() < window + 1 {
        return None;
    }

    let n = bars.len();
    let mut log_cc_sq = Vec::with_capacity(n - 1);
    let mut log_oc_sq = Vec::with_capacity(n - 1);
    let mut range_stat = Vec::with_capacity(n - 1);

    // Terms are defined from the second bar on (they need prior close).
    for i in 1..n {
        let bar = &bars[i];
        let prev_close = bars[i - 1].close;
        let log_ho = (bar.high / bar.open).ln();
        let log_lo = (bar.low / bar.open).ln();
        let log_co = (bar.close / bar.open).ln();
        let log_oc = (bar.open / prev_close).ln();
        let log_cc = (bar.close / prev_close).ln();
        log_cc_sq.push(log_cc * log_cc);
        log_oc_sq.push(log_oc * log_oc);
        range_stat.push(log_ho * (log_ho - log_co) + log_lo * (log_lo - log_co));
    }

    let tail = log_cc_sq.len() - window;
    let divisor = window as f64 - 1.0;
    let close_vol = log_cc_sq[tail..].iter().sum::<f64>() / divisor;
    let open_vol = log_oc_sq[tail..].iter().sum::<f64>() / divisor;
    let rs = range_stat[tail..].iter().sum::<f64>() / divisor;

    let w = window as f64;
    let k = 0.34 / (1.34 + (w + 1.0) / (w - 1.0));
    let out = (open_vol + k * close_vol + (1.0 - k) * rs).sqrt() * annualization.sqrt();
    out.is_finite().then_some(out)
}

/// Simple fallback: sample standard deviation of daily percentage
/// returns over the trailing `window` bars, annualized. Requires the
/// same `window + 1` bars as the primary estimator; a shorter history
/// is `None`, never an estimate over fewer returns.
fn simple_volatility(bars: &[OhlcBar], window: usize, annualization: f64) -> Option<f64> {
    if window < 2 || bars.len() < window + 1 {
        return None;
    }
    let mut returns = Vec::with_capacity(bars.len() - 1);
    for pair in bars.windows(2) {
        let prev = pair[0].close;
        let cur = pair[1].close;
        if prev == 0.0 {
            return None;
        }
        returns.push(cur / prev - 1.0);
    }
    let tail = &returns[returns.len() - window..];
    let mean = tail.iter().sum::<f64>() / tail.len() as f64;
    let var = tail.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (tail.len() as f64 - 1.0);
    let out = var.sqrt() * annualization.sqrt();
    out.is_finite().then_some(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
