//! Earnings scan pipeline.
//!
//! Drives the full flow: earnings calendar → OTC filter → cache check
//! → batched per-ticker analysis → ranking → persistence. A failing
//! ticker costs one row, never the scan; the worst case of a whole
//! run is an empty list.

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, ScanCache};
use crate::config::ScanConfig;
use crate::net::retry::retry_with_rotation;
use crate::net::session::SessionManager;
use crate::providers::otc::OtcList;
use crate::providers::{EarningsCalendar, MarketDataProvider};
use crate::types::{
    AnalysisResult, EarningsTiming, OhlcBar, Recommendation, ScanReport, TickerSummary, VegaError,
};
use crate::vol::{VolatilityEngine, AVG_VOLUME_THRESHOLD, DEFAULT_ANNUALIZATION, DEFAULT_WINDOW};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Attempts for the calendar fetch before the scan soft-fails empty.
const CALENDAR_ATTEMPTS: usize = 3;

/// Attempts for a ticker's option analytics.
const TICKER_ATTEMPTS: usize = 3;

/// Attempts for a single expiry's chain (one retry).
const CHAIN_ATTEMPTS: usize = 2;

/// Share of the progress range taken by the primary pass; the
/// remainder belongs to backfill.
const PRIMARY_PROGRESS_SPAN: f32 = 80.0;

/// Progress callback; invoked with 0–100, monotonic within a phase.
/// Carries its own lifetime so callers can pass borrowing closures.
pub type ProgressObserver<'a> = dyn Fn(f32) + Send + Sync + 'a;

// ---------------------------------------------------------------------------
// Per-ticker option analytics
// ---------------------------------------------------------------------------

/// Everything the option chains contribute to one result row.
struct TickerSignal {
    iv30: Option<f64>,
    slope: f64,
    iv_rv_ratio: Option<f64>,
    current_iv: Option<f64>,
    expected_move_pct: Option<f64>,
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

pub struct EarningsScanner {
    calendar: Arc<dyn EarningsCalendar>,
    provider: Arc<dyn MarketDataProvider>,
    sessions: Arc<SessionManager>,
    cache: ScanCache,
    otc: Arc<OtcList>,
    engine: VolatilityEngine,
    config: ScanConfig,
    cancel: watch::Receiver<bool>,
}

impl EarningsScanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        calendar: Arc<dyn EarningsCalendar>,
        provider: Arc<dyn MarketDataProvider>,
        sessions: Arc<SessionManager>,
        cache: ScanCache,
        otc: Arc<OtcList>,
        config: ScanConfig,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        EarningsScanner {
            calendar,
            provider,
            sessions,
            cache,
            otc,
            engine: VolatilityEngine::new(),
            config,
            cancel,
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Scan every eligible earnings ticker for `date`.
    ///
    /// A cancelled run returns whatever completed so far and skips
    /// persistence, so a later scan of the same set starts clean.
    pub async fn scan(
        &self,
        date: NaiveDate,
        progress: Option<&ProgressObserver<'_>>,
    ) -> Result<ScanReport> {
        let scan_id = uuid::Uuid::new_v4();
        info!(%scan_id, %date, "Starting earnings scan");

        // 1. Earnings calendar, with session rotation between attempts.
        //    Total failure means there is nothing to scan, not a crash.
        let calendar = self.calendar.clone();
        let events = match retry_with_rotation(
            CALENDAR_ATTEMPTS,
            &self.sessions,
            "earnings calendar",
            |_session| {
                let calendar = calendar.clone();
                async move { calendar.fetch_earnings(date).await }
            },
        )
        .await
        {
            Ok(events) => events,
            Err(e) => {
                warn!(%date, error = %e, "Calendar unavailable; nothing to scan");
                report(progress, 100.0);
                return Ok(ScanReport::completed(Vec::new()));
            }
        };

        // 2. Drop OTC names up front; keep first-seen timing per ticker.
        let mut timings: HashMap<String, EarningsTiming> = HashMap::new();
        let mut eligible: Vec<String> = Vec::new();
        for event in &events {
            if self.otc.contains(&event.ticker).await {
                debug!(ticker = %event.ticker, "Skipping OTC ticker");
                continue;
            }
            if timings.insert(event.ticker.clone(), event.timing).is_none() {
                eligible.push(event.ticker.clone());
            }
        }
        info!(total = events.len(), eligible = eligible.len(), "Calendar filtered");
        if eligible.is_empty() {
            report(progress, 100.0);
            return Ok(ScanReport::completed(Vec::new()));
        }

        // 3. Cache check: full hit short-circuits, a hit with gaps
        //    backfills only the gapped tickers.
        if let Some(entry) = self.cache.get(date, &eligible)? {
            if entry.missing.is_empty() {
                info!(%date, results = entry.results.len(), "Cache hit, scan skipped");
                report(progress, 100.0);
                return Ok(ScanReport::completed(entry.results));
            }
            info!(%date, gaps = entry.missing.len(), "Cache hit with gaps, backfilling");
            return self.backfill(date, &eligible, entry, progress).await;
        }

        // 4. Full scan in strictly sequential batches.
        let (mut results, cancelled) = self
            .run_batches(
                &eligible,
                &timings,
                (0.0, PRIMARY_PROGRESS_SPAN),
                progress,
            )
            .await;

        // 5. Rank: Recommended first, known timing before unknown,
        //    then timing label and ticker.
        results.sort_by(|a, b| a.rank_key().cmp(&b.rank_key()));

        if cancelled {
            info!(%scan_id, partial = results.len(), "Scan cancelled");
            return Ok(ScanReport::cancelled(results));
        }

        // 6. Persist the completed scan.
        if let Err(e) = self.cache.save(date, &eligible, &results) {
            warn!(%date, error = %e, "Failed to cache scan results");
        }

        report(progress, 100.0);
        info!(%scan_id, results = results.len(), "Scan complete");
        Ok(ScanReport::completed(results))
    }

    /// Ad hoc analysis of a single symbol, outside any calendar. The
    /// OTC exchange check is skipped: the caller asked for this name
    /// explicitly.
    pub async fn analyze_single(&self, ticker: &str) -> Result<Option<AnalysisResult>> {
        let symbol = ticker.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(VegaError::EmptySymbol.into());
        }
        info!(ticker = %symbol, "Ad hoc single-ticker analysis");
        Ok(self
            .analyze_ticker(&symbol, EarningsTiming::Unknown, None, true)
            .await)
    }

    // -- Batch machinery ---------------------------------------------------

    /// Run per-ticker analysis over `tickers` in `batch_size` chunks.
    /// Within a batch, at most `analysis_concurrency` tickers run at
    /// once; batches never overlap. Returns the collected results and
    /// whether cancellation cut the run short.
    async fn run_batches(
        &self,
        tickers: &[String],
        timings: &HashMap<String, EarningsTiming>,
        span: (f32, f32),
        progress: Option<&ProgressObserver<'_>>,
    ) -> (Vec<AnalysisResult>, bool) {
        let total = tickers.len();
        let mut results = Vec::with_capacity(total);
        let mut done = 0usize;
        let mut cancelled = false;

        for batch in tickers.chunks(self.config.batch_size) {
            if self.is_cancelled() {
                cancelled = true;
                break;
            }

            // Shared history prefetch for the whole batch, best effort.
            let histories = self
                .provider
                .bulk_history(batch, &self.config.history_range)
                .await;
            debug!(batch = batch.len(), prefetched = histories.len(), "Batch histories ready");

            let concurrency = self.config.analysis_concurrency.min(batch.len());
            let mut analyses = stream::iter(batch.iter().map(|ticker| {
                let timing = timings
                    .get(ticker)
                    .copied()
                    .unwrap_or(EarningsTiming::Unknown);
                let bars = histories.get(ticker).cloned();
                async move {
                    if self.is_cancelled() {
                        return None;
                    }
                    self.analyze_ticker(ticker, timing, bars, false).await
                }
            }))
            .buffer_unordered(concurrency);

            while let Some(outcome) = analyses.next().await {
                done += 1;
                if let Some(result) = outcome {
                    results.push(result);
                }
                report(
                    progress,
                    span.0 + done as f32 / total as f32 * (span.1 - span.0),
                );
            }
        }

        // A cancel landing while a batch is in flight only drops rows;
        // it still has to reach the caller, or a truncated set would
        // pass for a complete one.
        (results, cancelled || self.is_cancelled())
    }

    /// Recompute only the gapped tickers of a cached entry, merging
    /// each fresh row into the cache, then return the merged entry.
    async fn backfill(
        &self,
        date: NaiveDate,
        eligible: &[String],
        entry: CacheEntry,
        progress: Option<&ProgressObserver<'_>>,
    ) -> Result<ScanReport> {
        report(progress, PRIMARY_PROGRESS_SPAN);

        let gapped: Vec<String> = entry.missing.iter().map(|m| m.ticker.clone()).collect();
        let timings: HashMap<String, EarningsTiming> = entry
            .missing
            .iter()
            .map(|m| (m.ticker.clone(), m.earnings_time))
            .collect();

        let (fresh, cancelled) = self
            .run_batches(
                &gapped,
                &timings,
                (PRIMARY_PROGRESS_SPAN, 100.0),
                progress,
            )
            .await;

        for partial in &fresh {
            if let Err(e) = self.cache.merge_missing(date, eligible, partial) {
                warn!(ticker = %partial.ticker, error = %e, "Backfill merge failed");
            }
        }

        let mut results = self
            .cache
            .get(date, eligible)?
            .map(|e| e.results)
            .unwrap_or_default();
        results.sort_by(|a, b| a.rank_key().cmp(&b.rank_key()));

        if cancelled {
            info!(%date, "Backfill cancelled");
            return Ok(ScanReport::cancelled(results));
        }
        report(progress, 100.0);
        info!(%date, merged = fresh.len(), "Backfill complete");
        Ok(ScanReport::completed(results))
    }

    // -- Per-ticker analysis -------------------------------------------------

    /// Analyze one ticker. `None` means the ticker is skipped (OTC
    /// exchange, no price history, hard failure); skipping never
    /// propagates out of the batch.
    async fn analyze_ticker(
        &self,
        ticker: &str,
        timing: EarningsTiming,
        prefetched: Option<Vec<OhlcBar>>,
        skip_otc_check: bool,
    ) -> Option<AnalysisResult> {
        match self
            .try_analyze(ticker, timing, prefetched, skip_otc_check)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "Ticker analysis failed, skipping");
                None
            }
        }
    }

    async fn try_analyze(
        &self,
        ticker: &str,
        timing: EarningsTiming,
        prefetched: Option<Vec<OhlcBar>>,
        skip_otc_check: bool,
    ) -> Result<Option<AnalysisResult>> {
        // Quote metadata first: it powers the exchange-level OTC check.
        let summary = match self.provider.quote_summary(ticker).await {
            Ok(summary) => summary,
            Err(e) => {
                debug!(ticker = %ticker, error = %e, "Quote summary unavailable");
                TickerSummary::default()
            }
        };

        if !skip_otc_check {
            if let Some(exchange) = summary.exchange.as_deref() {
                if OtcList::is_otc_exchange(exchange) {
                    debug!(ticker = %ticker, exchange, "OTC exchange, skipping");
                    return Ok(None);
                }
            }
        }

        // Price history, preferring the batch prefetch.
        let bars = match prefetched {
            Some(bars) if !bars.is_empty() => bars,
            _ => {
                self.provider
                    .price_history(ticker, &self.config.history_range)
                    .await?
            }
        };
        if bars.is_empty() {
            debug!(ticker = %ticker, "No price history, skipping");
            return Ok(None);
        }

        let realized =
            self.engine
                .realized_volatility(&bars, DEFAULT_WINDOW, DEFAULT_ANNUALIZATION);
        let last_close = bars.last().map(|b| b.close);
        let last_volume = bars.last().map(|b| b.volume);
        let avg_volume = self.engine.mean_volume(&bars, DEFAULT_WINDOW);
        let avg_volume_ok = avg_volume.map(|v| v >= AVG_VOLUME_THRESHOLD).unwrap_or(false);
        let price = summary.price.or(last_close);

        // Option analytics; a ticker with no derivable signal still
        // yields a row, scored Avoid with absent analytics.
        let result = match self.fetch_signal(ticker, price, realized).await {
            Ok(Some(signal)) => AnalysisResult {
                ticker: ticker.to_string(),
                current_price: price,
                market_cap: summary.market_cap,
                volume: last_volume,
                avg_volume,
                avg_volume_ok,
                iv_rv_ratio: signal.iv_rv_ratio,
                term_slope: Some(signal.slope),
                iv30: signal.iv30,
                realized_vol: realized,
                current_iv: signal.current_iv,
                expected_move_pct: signal.expected_move_pct,
                earnings_time: timing,
                recommendation: self.engine.score(
                    avg_volume_ok,
                    signal.iv_rv_ratio,
                    Some(signal.slope),
                ),
            },
            Ok(None) => {
                debug!(ticker = %ticker, "No options signal");
                Self::signal_less_result(ticker, timing, price, &summary, last_volume, avg_volume, avg_volume_ok, realized)
            }
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "Option analytics failed after retries");
                Self::signal_less_result(ticker, timing, price, &summary, last_volume, avg_volume, avg_volume_ok, realized)
            }
        };

        Ok(Some(result))
    }

    #[allow(clippy::too_many_arguments)]
    fn signal_less_result(
        ticker: &str,
        timing: EarningsTiming,
        price: Option<f64>,
        summary: &TickerSummary,
        last_volume: Option<f64>,
        avg_volume: Option<f64>,
        avg_volume_ok: bool,
        realized: Option<f64>,
    ) -> AnalysisResult {
        AnalysisResult {
            ticker: ticker.to_string(),
            current_price: price,
            market_cap: summary.market_cap,
            volume: last_volume,
            avg_volume,
            avg_volume_ok,
            iv_rv_ratio: None,
            term_slope: None,
            iv30: None,
            realized_vol: realized,
            current_iv: None,
            expected_move_pct: None,
            earnings_time: timing,
            recommendation: Recommendation::Avoid,
        }
    }

    /// Option analytics for one ticker, retried with rotation. A
    /// data-shape miss (no options, no ATM IV) resolves to `Ok(None)`
    /// immediately; only transport errors burn retries.
    async fn fetch_signal(
        &self,
        ticker: &str,
        price_hint: Option<f64>,
        realized: Option<f64>,
    ) -> Result<Option<TickerSignal>> {
        retry_with_rotation(
            TICKER_ATTEMPTS,
            &self.sessions,
            "option analytics",
            |_session| {
                let ticker = ticker.to_string();
                async move {
                    match self.compute_signal(&ticker, price_hint, realized).await {
                        Ok(signal) => Ok(Some(signal)),
                        Err(e) => {
                            let no_signal = e
                                .downcast_ref::<VegaError>()
                                .map(VegaError::is_no_signal)
                                .unwrap_or(false);
                            if no_signal {
                                debug!(ticker = %ticker, reason = %e, "Signal not derivable");
                                Ok(None)
                            } else {
                                Err(e)
                            }
                        }
                    }
                }
            },
        )
        .await
    }

    async fn compute_signal(
        &self,
        ticker: &str,
        price_hint: Option<f64>,
        realized: Option<f64>,
    ) -> Result<TickerSignal> {
        let expiries = self.provider.list_expiries(ticker).await?;
        if expiries.is_empty() {
            return Err(VegaError::NoOptions(ticker.to_string()).into());
        }

        let today = Utc::now().date_naive();
        let filtered = self.engine.filter_expiries(&expiries, today);
        if filtered.is_empty() {
            return Err(VegaError::NoOptions(ticker.to_string()).into());
        }

        // One chain per surviving expiry; a failed fetch gets one
        // retry, then the expiry is dropped from the curve.
        let mut chains = Vec::with_capacity(filtered.len());
        for expiry in &filtered {
            let fetched = retry_with_rotation(
                CHAIN_ATTEMPTS,
                &self.sessions,
                "option chain",
                |_session| {
                    let ticker = ticker.to_string();
                    let expiry = *expiry;
                    async move { self.provider.option_chain(&ticker, expiry).await }
                },
            )
            .await;
            match fetched {
                Ok(chain) => chains.push(chain),
                Err(e) => {
                    warn!(ticker = %ticker, %expiry, error = %e, "Dropping expiry after failed chain fetch");
                }
            }
        }
        if chains.is_empty() {
            return Err(VegaError::NoSignal(ticker.to_string()).into());
        }

        let underlying = price_hint.ok_or_else(|| VegaError::NoSignal(ticker.to_string()))?;

        // ATM IV per expiry, in ascending expiry order.
        let mut days = Vec::with_capacity(chains.len());
        let mut ivs = Vec::with_capacity(chains.len());
        for chain in &chains {
            let Some(iv) = self.engine.atm_iv(chain, underlying) else {
                debug!(ticker = %ticker, expiry = %chain.expiry, "No ATM IV for expiry");
                continue;
            };
            days.push((chain.expiry - today).num_days());
            ivs.push(iv);
        }
        if days.is_empty() {
            return Err(VegaError::NoSignal(ticker.to_string()).into());
        }

        // The nearest surviving expiry drives the straddle move and
        // the headline IV.
        let expected_move_pct = chains.first().and_then(|front| {
            self.engine
                .atm_quotes(front, underlying)
                .and_then(|(call, put)| self.engine.expected_move(call, put, underlying))
        });
        let current_iv = ivs.first().copied();

        let structure = self
            .engine
            .term_structure(&days, &ivs)
            .ok_or_else(|| VegaError::NoSignal(ticker.to_string()))?;
        let iv30 = structure.evaluate(30.0);
        let short_days = days.iter().copied().min().unwrap_or(45);
        let slope = self.engine.term_slope(&structure, short_days);

        Ok(TickerSignal {
            iv30: Some(iv30),
            slope,
            iv_rv_ratio: self.engine.iv_rv_ratio(iv30, realized),
            current_iv,
            expected_move_pct,
        })
    }
}

fn report(progress: Option<&ProgressObserver>, pct: f32) {
    if let Some(observer) = progress {
        observer(pct.min(100.0));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
