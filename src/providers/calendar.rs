//! Nasdaq earnings calendar.
//!
//! One JSON request per scan date. The endpoint reports each symbol
//! with a session-timing code; everything it does not label lands in
//! the `Unknown` bucket and sorts last in the final ranking.
//!
//! Base URL: https://api.nasdaq.com/api/calendar/earnings

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

use super::EarningsCalendar;
use crate::net::session::SessionManager;
use crate::types::{EarningsEvent, EarningsTiming};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const BASE_URL: &str = "https://api.nasdaq.com";
const CALENDAR_NAME: &str = "nasdaq";

// ---------------------------------------------------------------------------
// API response types (Nasdaq JSON → Rust)
// ---------------------------------------------------------------------------

/// Envelope of `/api/calendar/earnings`. `data` and `rows` are null
/// on days without earnings.
#[derive(Debug, Deserialize)]
struct CalendarEnvelope {
    #[serde(default)]
    data: Option<CalendarData>,
}

#[derive(Debug, Deserialize)]
struct CalendarData {
    #[serde(default)]
    rows: Option<Vec<CalendarRow>>,
}

#[derive(Debug, Deserialize)]
struct CalendarRow {
    #[serde(default)]
    symbol: String,
    /// Timing code, e.g. "time-pre-market" or "time-after-hours".
    #[serde(default)]
    time: Option<String>,
}

// ---------------------------------------------------------------------------
// Calendar
// ---------------------------------------------------------------------------

pub struct NasdaqCalendar {
    sessions: Arc<SessionManager>,
}

impl NasdaqCalendar {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    fn timing_from_code(code: Option<&str>) -> EarningsTiming {
        match code {
            Some("time-pre-market") => EarningsTiming::PreMarket,
            Some("time-after-hours") => EarningsTiming::PostMarket,
            _ => EarningsTiming::Unknown,
        }
    }

    /// Rows with an empty symbol are skipped; symbols are normalized
    /// to upper case for matching against the OTC universe.
    fn events_from_rows(rows: Vec<CalendarRow>) -> Vec<EarningsEvent> {
        rows.into_iter()
            .filter_map(|row| {
                let ticker = row.symbol.trim().to_uppercase();
                if ticker.is_empty() {
                    return None;
                }
                Some(EarningsEvent {
                    ticker,
                    timing: Self::timing_from_code(row.time.as_deref()),
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// EarningsCalendar trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl EarningsCalendar for NasdaqCalendar {
    async fn fetch_earnings(&self, date: NaiveDate) -> Result<Vec<EarningsEvent>> {
        let url = format!("{BASE_URL}/api/calendar/earnings?date={date}");
        let session = self.sessions.session().await;
        debug!(url = %url, session = %session.id(), "Fetching earnings calendar");

        let resp = session
            .client()
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .context("Nasdaq calendar request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Nasdaq calendar error {status}: {body}");
        }

        let envelope: CalendarEnvelope = resp
            .json()
            .await
            .context("Failed to parse Nasdaq calendar response")?;

        let rows = envelope.data.and_then(|d| d.rows).unwrap_or_default();
        let events = Self::events_from_rows(rows);
        info!(%date, count = events.len(), "Earnings calendar fetched");
        Ok(events)
    }

    fn name(&self) -> &str {
        CALENDAR_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
