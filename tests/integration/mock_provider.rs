//! Mock market data for integration testing.
//!
//! Deterministic `EarningsCalendar` and `MarketDataProvider`
//! implementations backed by per-ticker fixtures, all in-memory with
//! no external dependencies. Fixtures can be swapped mid-test to
//! simulate data appearing between scans.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use vega::providers::{EarningsCalendar, MarketDataProvider};
use vega::types::*;

// ---------------------------------------------------------------------------
// Calendar
// ---------------------------------------------------------------------------

/// A calendar that returns a fixed set of events for any date.
pub struct MockCalendar {
    events: Vec<EarningsEvent>,
    /// If set, fetches return this error instead.
    force_error: Mutex<Option<String>>,
}

impl MockCalendar {
    pub fn new(events: Vec<EarningsEvent>) -> Self {
        Self {
            events,
            force_error: Mutex::new(None),
        }
    }

    /// Force all subsequent fetches to return an error.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    /// Clear any forced error.
    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }
}

#[async_trait]
impl EarningsCalendar for MockCalendar {
    async fn fetch_earnings(&self, _date: NaiveDate) -> Result<Vec<EarningsEvent>> {
        if let Some(err) = self.force_error.lock().unwrap().as_ref() {
            return Err(anyhow!("{}", err));
        }
        Ok(self.events.clone())
    }

    fn name(&self) -> &str {
        "mock-calendar"
    }
}

/// Shorthand for building calendar rows in tests.
pub fn event(ticker: &str, timing: EarningsTiming) -> EarningsEvent {
    EarningsEvent {
        ticker: ticker.to_string(),
        timing,
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Everything the provider knows about one ticker.
#[derive(Default, Clone)]
pub struct TickerFixture {
    pub bars: Vec<OhlcBar>,
    pub expiries: Vec<NaiveDate>,
    pub chains: HashMap<NaiveDate, OptionChain>,
    pub summary: TickerSummary,
}

/// In-memory market data provider serving scripted fixtures.
///
/// Unknown tickers get an empty history and a default quote, which
/// the scanner treats as "skip". `bulk_history` uses the trait's
/// default per-ticker loop, so history call counts cover both paths.
pub struct MockMarketData {
    fixtures: Mutex<HashMap<String, TickerFixture>>,
    /// Tickers whose history fetches fail with a simulated outage.
    history_errors: Mutex<HashSet<String>>,
    history_calls: Mutex<usize>,
}

impl MockMarketData {
    pub fn new() -> Self {
        Self {
            fixtures: Mutex::new(HashMap::new()),
            history_errors: Mutex::new(HashSet::new()),
            history_calls: Mutex::new(0),
        }
    }

    /// Install or replace the fixture for a ticker.
    pub fn set_fixture(&self, ticker: &str, fixture: TickerFixture) {
        self.fixtures
            .lock()
            .unwrap()
            .insert(ticker.to_string(), fixture);
    }

    /// Make history fetches for `ticker` fail.
    pub fn fail_history(&self, ticker: &str) {
        self.history_errors
            .lock()
            .unwrap()
            .insert(ticker.to_string());
    }

    /// Number of `price_history` calls served so far.
    pub fn history_calls(&self) -> usize {
        *self.history_calls.lock().unwrap()
    }

    fn fixture(&self, ticker: &str) -> TickerFixture {
        self.fixtures
            .lock()
            .unwrap()
            .get(ticker)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MarketDataProvider for MockMarketData {
    async fn list_expiries(&self, ticker: &str) -> Result<Vec<NaiveDate>> {
        Ok(self.fixture(ticker).expiries)
    }

    async fn option_chain(&self, ticker: &str, expiry: NaiveDate) -> Result<OptionChain> {
        self.fixture(ticker)
            .chains
            .get(&expiry)
            .cloned()
            .ok_or_else(|| anyhow!("No chain for {ticker} at {expiry}"))
    }

    async fn price_history(&self, ticker: &str, _range: &str) -> Result<Vec<OhlcBar>> {
        *self.history_calls.lock().unwrap() += 1;
        if self.history_errors.lock().unwrap().contains(ticker) {
            return Err(anyhow!("Simulated feed outage for {ticker}"));
        }
        Ok(self.fixture(ticker).bars)
    }

    async fn quote_summary(&self, ticker: &str) -> Result<TickerSummary> {
        Ok(self.fixture(ticker).summary)
    }

    fn name(&self) -> &str {
        "mock-market"
    }
}

// ---------------------------------------------------------------------------
// Fixture builders
// ---------------------------------------------------------------------------

/// `n` daily bars drifting gently upward from `base` with a small
/// oscillation, all at a constant volume. Enough movement for a
/// finite realized volatility, little enough that IV/RV ratios stay
/// comfortably high with typical test IVs.
pub fn trending_bars(n: usize, base: f64, volume: f64) -> Vec<OhlcBar> {
    let start = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();
    (0..n)
        .map(|i| {
            let drift = base * (1.0 + 0.001 * i as f64);
            let wiggle = (i as f64 * 0.9).sin() * 0.01 * drift;
            let open = drift - wiggle;
            let close = drift + wiggle;
            OhlcBar {
                date: start + Duration::days(i as i64),
                open,
                high: open.max(close) * 1.005,
                low: open.min(close) * 0.995,
                close,
                volume,
            }
        })
        .collect()
}

/// Five-strike chain centred on `atm`, every contract two-sided with
/// the same IV and a 1.40/1.60 spread (mid 1.50 per leg).
pub fn chain(expiry: NaiveDate, atm: f64, iv: f64) -> OptionChain {
    let quote = |strike: f64| OptionQuote {
        strike,
        last_price: Some(1.5),
        bid: Some(1.4),
        ask: Some(1.6),
        volume: Some(250.0),
        open_interest: Some(1_000.0),
        implied_volatility: Some(iv),
    };
    let strikes: Vec<f64> = (-2..=2).map(|k| atm + 5.0 * k as f64).collect();
    OptionChain {
        expiry,
        calls: strikes.iter().map(|&s| quote(s)).collect(),
        puts: strikes.iter().map(|&s| quote(s)).collect(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_calendar_returns_events() {
        let calendar = MockCalendar::new(vec![
            event("AAPL", EarningsTiming::PostMarket),
            event("JPM", EarningsTiming::PreMarket),
        ]);
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let events = calendar.fetch_earnings(date).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].ticker, "AAPL");
    }

    #[tokio::test]
    async fn test_mock_calendar_forced_error() {
        let calendar = MockCalendar::new(vec![event("AAPL", EarningsTiming::Unknown)]);
        calendar.set_error("simulated outage");
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        assert!(calendar.fetch_earnings(date).await.is_err());

        calendar.clear_error();
        assert!(calendar.fetch_earnings(date).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_market_serves_fixture() {
        let market = MockMarketData::new();
        let expiry = NaiveDate::from_ymd_opt(2026, 3, 20).unwrap();
        let mut chains = HashMap::new();
        chains.insert(expiry, chain(expiry, 100.0, 0.5));
        market.set_fixture(
            "AAPL",
            TickerFixture {
                bars: trending_bars(40, 100.0, 1_000_000.0),
                expiries: vec![expiry],
                chains,
                summary: TickerSummary {
                    price: Some(100.0),
                    exchange: Some("NMS".to_string()),
                    market_cap: Some(3.0e12),
                },
            },
        );

        assert_eq!(market.list_expiries("AAPL").await.unwrap(), vec![expiry]);
        assert_eq!(market.price_history("AAPL", "3mo").await.unwrap().len(), 40);
        assert_eq!(market.history_calls(), 1);
        let chain = market.option_chain("AAPL", expiry).await.unwrap();
        assert_eq!(chain.calls.len(), 5);
        assert_eq!(chain.puts.len(), 5);
    }

    #[tokio::test]
    async fn test_mock_market_unknown_ticker_is_empty() {
        let market = MockMarketData::new();
        assert!(market.list_expiries("NOPE").await.unwrap().is_empty());
        assert!(market.price_history("NOPE", "3mo").await.unwrap().is_empty());
        let summary = market.quote_summary("NOPE").await.unwrap();
        assert!(summary.price.is_none());
    }

    #[tokio::test]
    async fn test_mock_market_failed_history() {
        let market = MockMarketData::new();
        market.set_fixture(
            "DEADCO",
            TickerFixture {
                bars: trending_bars(40, 50.0, 1_000_000.0),
                ..Default::default()
            },
        );
        market.fail_history("DEADCO");
        assert!(market.price_history("DEADCO", "3mo").await.is_err());
    }

    #[test]
    fn test_trending_bars_shape() {
        let bars = trending_bars(60, 100.0, 2_000_000.0);
        assert_eq!(bars.len(), 60);
        for bar in &bars {
            assert!(bar.high >= bar.open.max(bar.close));
            assert!(bar.low <= bar.open.min(bar.close));
            assert!(bar.low > 0.0);
            assert_eq!(bar.volume, 2_000_000.0);
        }
        // Drift is upward overall.
        assert!(bars.last().unwrap().close > bars[0].close);
    }

    #[test]
    fn test_chain_quotes_have_mids() {
        let expiry = NaiveDate::from_ymd_opt(2026, 3, 20).unwrap();
        let c = chain(expiry, 100.0, 0.5);
        assert!(!c.is_one_sided());
        for q in c.calls.iter().chain(c.puts.iter()) {
            assert!((q.mid().unwrap() - 1.5).abs() < 1e-10);
            assert_eq!(q.implied_volatility, Some(0.5));
        }
    }
}
