//! Yahoo Finance market data.
//!
//! Option expiries and chains come from the v7 options endpoint,
//! daily price history from the v8 chart endpoint. No authentication,
//! but the service rate-limits aggressively per IP — which is what
//! the rotating proxy sessions are for.
//!
//! Base URL: https://query1.finance.yahoo.com

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use super::MarketDataProvider;
use crate::net::session::SessionManager;
use crate::types::{OhlcBar, OptionChain, OptionQuote, TickerSummary};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const BASE_URL: &str = "https://query1.finance.yahoo.com";
const PROVIDER_NAME: &str = "yahoo";

// ---------------------------------------------------------------------------
// API response types (Yahoo JSON → Rust)
// ---------------------------------------------------------------------------

/// Envelope of `/v7/finance/options/{symbol}`. Only the fields we
/// read are deserialized.
#[derive(Debug, Deserialize)]
struct OptionsEnvelope {
    #[serde(rename = "optionChain")]
    option_chain: OptionsResult,
}

#[derive(Debug, Deserialize)]
struct OptionsResult {
    #[serde(default)]
    result: Option<Vec<OptionsPayload>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionsPayload {
    /// Unix seconds, one per listed expiry.
    #[serde(default)]
    expiration_dates: Vec<i64>,
    #[serde(default)]
    quote: Option<YahooQuote>,
    /// Chain blocks; requests with `?date=` carry exactly one.
    #[serde(default)]
    options: Vec<ChainBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooQuote {
    #[serde(default)]
    regular_market_price: Option<f64>,
    /// Short exchange code, e.g. "NMS" or "PNK".
    #[serde(default)]
    exchange: Option<String>,
    #[serde(default)]
    full_exchange_name: Option<String>,
    #[serde(default)]
    market_cap: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainBlock {
    #[serde(default)]
    calls: Vec<ContractRow>,
    #[serde(default)]
    puts: Vec<ContractRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContractRow {
    strike: f64,
    #[serde(default)]
    last_price: Option<f64>,
    #[serde(default)]
    bid: Option<f64>,
    #[serde(default)]
    ask: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
    #[serde(default)]
    open_interest: Option<f64>,
    #[serde(default)]
    implied_volatility: Option<f64>,
}

/// Envelope of `/v8/finance/chart/{symbol}`. On error responses
/// `result` is null, not an empty array.
#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    result: Option<Vec<ChartPayload>>,
}

#[derive(Debug, Deserialize)]
struct ChartPayload {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteArrays>,
}

/// Parallel per-day arrays; a slot is null on halted days.
#[derive(Debug, Deserialize)]
struct QuoteArrays {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Yahoo Finance provider. All requests go through the shared session
/// manager, so a rotation between calls transparently rebinds them.
pub struct YahooProvider {
    sessions: Arc<SessionManager>,
}

impl YahooProvider {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    // -- Internal helpers ------------------------------------------------

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, what: &str) -> Result<T> {
        let session = self.sessions.session().await;
        debug!(url = %url, session = %session.id(), "Yahoo request");

        let resp = session
            .client()
            .get(url)
            .send()
            .await
            .context(format!("Yahoo {what} request failed"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Yahoo {what} error {status}: {body}");
        }

        resp.json::<T>()
            .await
            .context(format!("Failed to parse Yahoo {what} response"))
    }

    /// First options payload for a symbol, or `None` when the service
    /// reports no result for it.
    async fn options_payload(
        &self,
        ticker: &str,
        expiry: Option<NaiveDate>,
    ) -> Result<Option<OptionsPayload>> {
        let mut url = format!("{BASE_URL}/v7/finance/options/{}", urlencoding::encode(ticker));
        if let Some(date) = expiry {
            url.push_str(&format!("?date={}", date_to_unix(date)));
        }
        let envelope: OptionsEnvelope = self.get_json(&url, "options").await?;
        Ok(envelope
            .option_chain
            .result
            .unwrap_or_default()
            .into_iter()
            .next())
    }

    fn quote_from_row(row: ContractRow) -> OptionQuote {
        OptionQuote {
            strike: row.strike,
            last_price: row.last_price,
            bid: row.bid,
            ask: row.ask,
            volume: row.volume,
            open_interest: row.open_interest,
            implied_volatility: row.implied_volatility,
        }
    }

    fn chain_from_block(expiry: NaiveDate, block: ChainBlock) -> OptionChain {
        OptionChain {
            expiry,
            calls: block.calls.into_iter().map(Self::quote_from_row).collect(),
            puts: block.puts.into_iter().map(Self::quote_from_row).collect(),
        }
    }

    fn summary_from_quote(quote: Option<YahooQuote>) -> TickerSummary {
        match quote {
            Some(q) => TickerSummary {
                price: q.regular_market_price,
                exchange: q.exchange.or(q.full_exchange_name),
                market_cap: q.market_cap,
            },
            None => TickerSummary::default(),
        }
    }

    /// Bars from the parallel chart arrays. Days with a null price
    /// slot are dropped; a null volume becomes 0.
    fn bars_from_payload(payload: ChartPayload) -> Vec<OhlcBar> {
        let Some(quote) = payload.indicators.quote.into_iter().next() else {
            return Vec::new();
        };

        let mut bars = Vec::with_capacity(payload.timestamp.len());
        for (i, ts) in payload.timestamp.iter().enumerate() {
            let (Some(date), Some(open), Some(high), Some(low), Some(close)) = (
                unix_to_date(*ts),
                value_at(&quote.open, i),
                value_at(&quote.high, i),
                value_at(&quote.low, i),
                value_at(&quote.close, i),
            ) else {
                continue;
            };
            let volume = value_at(&quote.volume, i).unwrap_or(0.0);
            bars.push(OhlcBar {
                date,
                open,
                high,
                low,
                close,
                volume,
            });
        }
        bars
    }
}

fn value_at(series: &[Option<f64>], idx: usize) -> Option<f64> {
    series.get(idx).copied().flatten()
}

fn unix_to_date(ts: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive())
}

fn date_to_unix(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// MarketDataProvider trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl MarketDataProvider for YahooProvider {
    async fn list_expiries(&self, ticker: &str) -> Result<Vec<NaiveDate>> {
        let payload = self.options_payload(ticker, None).await?;
        let expiries: Vec<NaiveDate> = payload
            .map(|p| p.expiration_dates)
            .unwrap_or_default()
            .into_iter()
            .filter_map(unix_to_date)
            .collect();
        debug!(ticker = %ticker, count = expiries.len(), "Listed option expiries");
        Ok(expiries)
    }

    async fn option_chain(&self, ticker: &str, expiry: NaiveDate) -> Result<OptionChain> {
        let payload = self
            .options_payload(ticker, Some(expiry))
            .await?
            .with_context(|| format!("Yahoo returned no options payload for {ticker}"))?;
        let block = payload
            .options
            .into_iter()
            .next()
            .with_context(|| format!("Yahoo returned no chain for {ticker} @ {expiry}"))?;
        Ok(Self::chain_from_block(expiry, block))
    }

    async fn price_history(&self, ticker: &str, range: &str) -> Result<Vec<OhlcBar>> {
        let url = format!(
            "{BASE_URL}/v8/finance/chart/{}?range={}&interval=1d",
            urlencoding::encode(ticker),
            range,
        );
        let envelope: ChartEnvelope = self.get_json(&url, "chart").await?;
        let bars = envelope
            .chart
            .result
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(Self::bars_from_payload)
            .unwrap_or_default();
        debug!(ticker = %ticker, range = %range, bars = bars.len(), "Price history fetched");
        Ok(bars)
    }

    async fn quote_summary(&self, ticker: &str) -> Result<TickerSummary> {
        let payload = self
            .options_payload(ticker, None)
            .await?
            .with_context(|| format!("Yahoo returned no quote payload for {ticker}"))?;
        Ok(Self::summary_from_quote(payload.quote))
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
