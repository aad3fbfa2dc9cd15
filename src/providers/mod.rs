//! External data providers.
//!
//! Defines the `EarningsCalendar` and `MarketDataProvider` traits and
//! provides implementations for:
//! - Nasdaq — daily earnings calendar (JSON API)
//! - Yahoo Finance — option chains, expiries, price history, quotes
//! - stockanalysis.com — OTC ticker universe snapshot

pub mod calendar;
pub mod otc;
pub mod yahoo;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::debug;

use crate::types::{EarningsEvent, OhlcBar, OptionChain, TickerSummary};

/// Source of the daily earnings schedule.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EarningsCalendar: Send + Sync {
    /// Tickers reporting on `date`, each with its session timing.
    async fn fetch_earnings(&self, date: NaiveDate) -> Result<Vec<EarningsEvent>>;

    /// Calendar name for logging and identification.
    fn name(&self) -> &str;
}

/// Abstraction over the market data backend.
///
/// Implementors hold the shared session manager, so every request
/// rides whatever proxy binding is current at call time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Listed option expiries for a ticker. Empty means the ticker
    /// has no options — that is data, not an error.
    async fn list_expiries(&self, ticker: &str) -> Result<Vec<NaiveDate>>;

    /// Full chain snapshot for one expiry.
    async fn option_chain(&self, ticker: &str, expiry: NaiveDate) -> Result<OptionChain>;

    /// Daily OHLCV history over a provider range string (e.g. "3mo").
    async fn price_history(&self, ticker: &str, range: &str) -> Result<Vec<OhlcBar>>;

    /// Point-in-time quote metadata (price, exchange, market cap).
    async fn quote_summary(&self, ticker: &str) -> Result<TickerSummary>;

    /// Histories for many tickers. Partial by design: tickers that
    /// fail or come back empty are simply absent from the map.
    async fn bulk_history(
        &self,
        tickers: &[String],
        range: &str,
    ) -> HashMap<String, Vec<OhlcBar>> {
        let mut histories = HashMap::new();
        for ticker in tickers {
            match self.price_history(ticker, range).await {
                Ok(bars) if !bars.is_empty() => {
                    histories.insert(ticker.clone(), bars);
                }
                Ok(_) => {
                    debug!(ticker = %ticker, "Empty history in bulk fetch");
                }
                Err(e) => {
                    debug!(ticker = %ticker, error = %e, "Bulk history fetch failed");
                }
            }
        }
        histories
    }

    /// Provider name for logging and identification.
    fn name(&self) -> &str;
}
