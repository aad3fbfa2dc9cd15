//! End-to-end scan pipeline tests: calendar → filter → analysis →
//! ranking → cache, with deterministic in-memory market data.

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use vega::cache::ScanCache;
use vega::config::{CacheConfig, ProxyConfig, ScanConfig};
use vega::engine::scanner::EarningsScanner;
use vega::net::proxy::ProxyPool;
use vega::net::session::SessionManager;
use vega::providers::otc::OtcList;
use vega::types::*;

use crate::mock_provider::{chain, event, trending_bars, MockCalendar, MockMarketData, TickerFixture};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    scanner: EarningsScanner,
    cancel: watch::Sender<bool>,
    market: Arc<MockMarketData>,
}

async fn harness(events: Vec<EarningsEvent>, market: MockMarketData) -> Harness {
    harness_with(events, market, &[]).await
}

/// Wire a scanner to the mocks, a throwaway cache directory, and an
/// OTC snapshot seeded with `otc_symbols`.
async fn harness_with(
    events: Vec<EarningsEvent>,
    market: MockMarketData,
    otc_symbols: &[&str],
) -> Harness {
    let calendar = Arc::new(MockCalendar::new(events));
    let market = Arc::new(market);

    let pool = Arc::new(ProxyPool::new(&ProxyConfig::default()).unwrap());
    let sessions = Arc::new(
        SessionManager::new(pool, Duration::from_secs(5))
            .await
            .unwrap(),
    );

    let mut cache_dir = std::env::temp_dir();
    cache_dir.push(format!("vega_it_cache_{}", uuid::Uuid::new_v4()));
    let cache = ScanCache::new(&CacheConfig {
        dir: cache_dir.to_string_lossy().to_string(),
        expiry_days: 7,
    });

    let mut otc_path = std::env::temp_dir();
    otc_path.push(format!("vega_it_otc_{}.txt", uuid::Uuid::new_v4()));
    if !otc_symbols.is_empty() {
        std::fs::write(&otc_path, otc_symbols.join("\n")).unwrap();
    }
    let otc = Arc::new(OtcList::load(&otc_path.to_string_lossy()).unwrap());

    let (cancel, cancel_rx) = watch::channel(false);
    let scanner = EarningsScanner::new(
        calendar,
        market.clone(),
        sessions,
        cache,
        otc,
        ScanConfig::default(),
        cancel_rx,
    );
    Harness {
        scanner,
        cancel,
        market,
    }
}

fn scan_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

/// A ticker with everything the analysis wants: 60 bars of history,
/// three listed expiries inside the 45-day horizon with IV falling
/// from 0.65 to 0.45, and a live quote. With `volume` above the
/// 1.5M threshold this scores Recommended.
fn rich_fixture(atm: f64, volume: f64) -> TickerFixture {
    let today = Utc::now().date_naive();
    let expiries: Vec<NaiveDate> = [7, 21, 45]
        .iter()
        .map(|&d| today + ChronoDuration::days(d))
        .collect();
    let ivs = [0.65, 0.50, 0.45];

    let mut chains = HashMap::new();
    for (expiry, iv) in expiries.iter().zip(ivs) {
        chains.insert(*expiry, chain(*expiry, atm, iv));
    }

    TickerFixture {
        bars: trending_bars(60, atm, volume),
        expiries,
        chains,
        summary: TickerSummary {
            price: Some(atm),
            exchange: Some("NMS".to_string()),
            market_cap: Some(5.0e9),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_scan_ranks_recommended_first() {
    let market = MockMarketData::new();
    market.set_fixture("BIGCO", rich_fixture(106.0, 2_500_000.0));
    // Same vol surface, but too thin to pass the volume threshold.
    market.set_fixture("TINYCO", rich_fixture(48.0, 300_000.0));
    let h = harness(
        vec![
            event("TINYCO", EarningsTiming::PreMarket),
            event("BIGCO", EarningsTiming::PostMarket),
        ],
        market,
    )
    .await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let observer = move |pct: f32| sink.lock().unwrap().push(pct);
    let report = h.scanner.scan(scan_date(), Some(&observer)).await.unwrap();

    assert_eq!(report.status, ScanStatus::Completed);
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[0].ticker, "BIGCO");
    assert_eq!(report.results[0].recommendation, Recommendation::Recommended);
    assert_eq!(report.results[1].ticker, "TINYCO");
    assert_eq!(report.results[1].recommendation, Recommendation::Consider);

    let best = &report.results[0];
    // IV30 interpolates between the 21d and 45d expiries.
    assert!((best.iv30.unwrap() - 0.48125).abs() < 1e-10);
    assert!((best.current_iv.unwrap() - 0.65).abs() < 1e-10);
    // ATM straddle mid is 3.00 against a 106.00 underlying.
    assert!((best.expected_move_pct.unwrap() - 300.0 / 106.0).abs() < 1e-10);
    assert!(best.iv_rv_ratio.unwrap() > 1.25);
    assert!(best.term_slope.unwrap() < -0.004);
    assert!(best.avg_volume_ok);
    assert_eq!(best.earnings_time, EarningsTiming::PostMarket);

    // Progress is monotonic and lands on 100.
    let seen = seen.lock().unwrap();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(seen.last().copied(), Some(100.0));
}

#[tokio::test]
async fn test_completed_scan_is_served_from_cache() {
    let market = MockMarketData::new();
    market.set_fixture("BIGCO", rich_fixture(106.0, 2_500_000.0));
    let h = harness(vec![event("BIGCO", EarningsTiming::PostMarket)], market).await;

    let first = h.scanner.scan(scan_date(), None).await.unwrap();
    assert_eq!(first.results.len(), 1);
    let calls_after_first = h.market.history_calls();
    assert!(calls_after_first > 0);

    // Second scan of the same date and tickers never touches the feed.
    let second = h.scanner.scan(scan_date(), None).await.unwrap();
    assert_eq!(second.status, ScanStatus::Completed);
    assert_eq!(second.results, first.results);
    assert_eq!(h.market.history_calls(), calls_after_first);
}

#[tokio::test]
async fn test_backfill_fills_gaps_without_full_rescan() {
    let market = MockMarketData::new();
    // No listed options yet: the first scan records the ticker with
    // its option-derived fields absent.
    let mut gappy = rich_fixture(106.0, 2_500_000.0);
    gappy.expiries.clear();
    gappy.chains.clear();
    market.set_fixture("BIGCO", gappy);
    let h = harness(vec![event("BIGCO", EarningsTiming::PostMarket)], market).await;

    let first = h.scanner.scan(scan_date(), None).await.unwrap();
    assert_eq!(first.results.len(), 1);
    assert!(first.results[0].iv30.is_none());
    assert!(first.results[0].expected_move_pct.is_none());
    assert_eq!(first.results[0].recommendation, Recommendation::Avoid);

    // Options appear; the next scan backfills just the gaps.
    h.market.set_fixture("BIGCO", rich_fixture(106.0, 2_500_000.0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let observer = move |pct: f32| sink.lock().unwrap().push(pct);
    let second = h.scanner.scan(scan_date(), Some(&observer)).await.unwrap();

    assert_eq!(second.status, ScanStatus::Completed);
    let row = &second.results[0];
    assert!((row.iv30.unwrap() - 0.48125).abs() < 1e-10);
    assert!(row.current_iv.is_some());
    assert!(row.expected_move_pct.is_some());
    assert!(row.iv_rv_ratio.is_some());
    // The merge fills gaps only; the stored verdict stands.
    assert_eq!(row.recommendation, Recommendation::Avoid);

    // Backfill progress runs inside the 80-100 band.
    let seen = seen.lock().unwrap();
    assert!(seen.iter().all(|&p| p >= 80.0));
    assert_eq!(seen.last().copied(), Some(100.0));
}

#[tokio::test]
async fn test_failing_ticker_skipped_not_fatal() {
    let market = MockMarketData::new();
    market.set_fixture("GOODCO", rich_fixture(106.0, 2_500_000.0));
    market.fail_history("DEADCO");
    let h = harness(
        vec![
            event("GOODCO", EarningsTiming::PostMarket),
            event("DEADCO", EarningsTiming::PreMarket),
        ],
        market,
    )
    .await;

    let report = h.scanner.scan(scan_date(), None).await.unwrap();
    assert_eq!(report.status, ScanStatus::Completed);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].ticker, "GOODCO");
}

#[tokio::test]
async fn test_otc_names_filtered_before_analysis() {
    let market = MockMarketData::new();
    market.set_fixture("BIGCO", rich_fixture(106.0, 2_500_000.0));
    // Fixture exists, but the snapshot must stop it being touched.
    market.set_fixture("SNDL", rich_fixture(2.0, 9_000_000.0));
    let h = harness_with(
        vec![
            event("BIGCO", EarningsTiming::PostMarket),
            event("SNDL", EarningsTiming::PreMarket),
        ],
        market,
        &["SNDL"],
    )
    .await;

    let report = h.scanner.scan(scan_date(), None).await.unwrap();
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].ticker, "BIGCO");
}

#[tokio::test]
async fn test_cancelled_scan_is_not_cached() {
    let market = MockMarketData::new();
    market.set_fixture("BIGCO", rich_fixture(106.0, 2_500_000.0));
    let h = harness(vec![event("BIGCO", EarningsTiming::PostMarket)], market).await;

    h.cancel.send(true).unwrap();
    let cancelled = h.scanner.scan(scan_date(), None).await.unwrap();
    assert_eq!(cancelled.status, ScanStatus::Cancelled);
    assert!(cancelled.results.is_empty());

    // Nothing was persisted, so clearing the flag re-runs in full.
    h.cancel.send(false).unwrap();
    let complete = h.scanner.scan(scan_date(), None).await.unwrap();
    assert_eq!(complete.status, ScanStatus::Completed);
    assert_eq!(complete.results.len(), 1);
}

#[tokio::test]
async fn test_analyze_single_outside_calendar() {
    let market = MockMarketData::new();
    market.set_fixture("BIGCO", rich_fixture(106.0, 2_500_000.0));
    let h = harness(Vec::new(), market).await;

    let result = h.scanner.analyze_single("bigco").await.unwrap().unwrap();
    assert_eq!(result.ticker, "BIGCO");
    assert_eq!(result.earnings_time, EarningsTiming::Unknown);
    assert_eq!(result.recommendation, Recommendation::Recommended);
    assert!(result.iv30.is_some());
}
