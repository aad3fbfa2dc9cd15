//! Outbound proxy pool.
//!
//! Discovers candidate proxies from public list sources, validates
//! them concurrently against an IP-echo endpoint, and hands out a
//! current proxy with random rotation. Every source is best-effort:
//! a dead source is logged and skipped, never aborts a build.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::ProxyConfig;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const PROXYSCRAPE_URL: &str = "https://api.proxyscrape.com/v2/?request=displayproxies&protocol=http&timeout=10000&country=all&ssl=all&anonymity=all";
const GEONODE_URL: &str = "https://proxylist.geonode.com/api/proxy-list?limit=100&page=1&sort_by=lastChecked&sort_type=desc&protocols=http&anonymityLevel=elite&anonymityLevel=anonymous";
const PUBPROXY_URL: &str = "http://pubproxy.com/api/proxy?limit=20&format=json&type=http";
const PROXYLIST_DOWNLOAD_URL: &str = "https://www.proxy-list.download/api/v1/get?type=http";

/// IP-echo endpoint used to confirm traffic actually exits the proxy.
const VALIDATION_URL: &str = "https://httpbin.org/ip";

/// Timeout for fetching a proxy-list source.
const SOURCE_TIMEOUT_SECS: u64 = 15;

// ---------------------------------------------------------------------------
// API response types (proxy-list JSON → Rust)
// ---------------------------------------------------------------------------

/// Geonode and PubProxy both return `{ "data": [{ "ip", "port" }] }`;
/// the port is a string in one and a number in the other.
#[derive(Debug, Deserialize)]
struct ProxyListPage {
    #[serde(default)]
    data: Vec<ProxyListEntry>,
}

#[derive(Debug, Deserialize)]
struct ProxyListEntry {
    ip: String,
    port: serde_json::Value,
}

impl ProxyListEntry {
    fn port_string(&self) -> Option<String> {
        match &self.port {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// httpbin.org/ip response.
#[derive(Debug, Deserialize)]
struct IpEcho {
    #[serde(default)]
    origin: String,
}

// ---------------------------------------------------------------------------
// Proxy record
// ---------------------------------------------------------------------------

/// A single outbound proxy, immutable once validated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyRecord {
    url: String,
}

impl ProxyRecord {
    /// Build from an `ip:port` line. Whitespace is trimmed; lines
    /// without a port separator are rejected.
    pub fn from_endpoint(endpoint: &str) -> Option<Self> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() || !endpoint.contains(':') {
            return None;
        }
        Some(ProxyRecord {
            url: format!("http://{endpoint}"),
        })
    }

    /// Full proxy URL, e.g. `http://1.2.3.4:8080`.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The bare IP, used to match the echoed origin during validation.
    pub fn ip(&self) -> &str {
        let after_scheme = self.url.split("//").last().unwrap_or(&self.url);
        after_scheme.split(':').next().unwrap_or(after_scheme)
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

struct PoolState {
    validated: Vec<ProxyRecord>,
    /// Index into `validated`; always in range when set.
    current: Option<usize>,
}

/// Pool of validated outbound proxies.
///
/// `build_pool` and `rotate` take exclusive access; `acquire_current`
/// reads concurrently. When disabled (the default) every acquire
/// returns `None` and traffic goes direct.
pub struct ProxyPool {
    http: Client,
    enabled: bool,
    max_pool_size: usize,
    validation_concurrency: usize,
    validation_timeout: Duration,
    state: RwLock<PoolState>,
}

impl ProxyPool {
    pub fn new(cfg: &ProxyConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(SOURCE_TIMEOUT_SECS))
            .user_agent("Mozilla/5.0")
            .build()
            .context("Failed to build HTTP client for proxy sources")?;

        Ok(ProxyPool {
            http,
            enabled: cfg.enabled,
            max_pool_size: cfg.max_pool_size,
            validation_concurrency: cfg.validation_concurrency.max(1),
            validation_timeout: Duration::from_secs(cfg.validation_timeout_secs),
            state: RwLock::new(PoolState {
                validated: Vec::new(),
                current: None,
            }),
        })
    }

    /// Pool seeded with pre-validated records, for tests.
    #[cfg(test)]
    pub fn seeded(records: Vec<ProxyRecord>, enabled: bool) -> Self {
        ProxyPool {
            http: Client::new(),
            enabled,
            max_pool_size: 50,
            validation_concurrency: 20,
            validation_timeout: Duration::from_secs(3),
            state: RwLock::new(PoolState {
                validated: records,
                current: None,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn size(&self) -> usize {
        self.state.read().await.validated.len()
    }

    // -- Candidate sources -------------------------------------------------

    async fn fetch_plain_list(&self, url: &str) -> Result<Vec<ProxyRecord>> {
        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("proxy source returned {}", resp.status());
        }
        let body = resp.text().await?;
        Ok(parse_plain_lines(&body))
    }

    async fn fetch_json_list(&self, url: &str) -> Result<Vec<ProxyRecord>> {
        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("proxy source returned {}", resp.status());
        }
        let page: ProxyListPage = resp.json().await?;
        Ok(records_from_entries(&page))
    }

    /// Query all sources, tolerating individual failures, and
    /// deduplicate by URL preserving first occurrence.
    pub async fn fetch_candidates(&self, observer: Option<&BuildObserver<'_>>) -> Vec<ProxyRecord> {
        let mut candidates = Vec::new();

        let sources: [(&str, &str, bool); 4] = [
            ("proxyscrape", PROXYSCRAPE_URL, false),
            ("geonode", GEONODE_URL, true),
            ("pubproxy", PUBPROXY_URL, true),
            ("proxy-list.download", PROXYLIST_DOWNLOAD_URL, false),
        ];

        for (name, url, is_json) in sources {
            let fetched = if is_json {
                self.fetch_json_list(url).await
            } else {
                self.fetch_plain_list(url).await
            };
            match fetched {
                Ok(records) => {
                    let msg = format!("Fetched {} candidates from {name}", records.len());
                    debug!(source = name, count = records.len(), "Proxy source fetched");
                    notify(observer, &msg);
                    candidates.extend(records);
                }
                Err(e) => {
                    warn!(source = name, error = %e, "Proxy source failed; skipping");
                }
            }
        }

        let deduped = dedup_records(candidates);
        notify(
            observer,
            &format!("{} unique candidate proxies after deduplication", deduped.len()),
        );
        deduped
    }

    // -- Validation ---------------------------------------------------------

    /// Issue a test request through the candidate. True only when the
    /// echoed origin IP contains the candidate's IP. Never errors past
    /// this boundary.
    pub async fn validate(&self, candidate: &ProxyRecord) -> bool {
        let proxy = match reqwest::Proxy::all(candidate.url()) {
            Ok(p) => p,
            Err(_) => return false,
        };
        let client = match Client::builder()
            .proxy(proxy)
            .timeout(self.validation_timeout)
            .build()
        {
            Ok(c) => c,
            Err(_) => return false,
        };
        match client.get(VALIDATION_URL).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<IpEcho>().await {
                Ok(echo) => echo.origin.contains(candidate.ip()),
                Err(_) => false,
            },
            _ => false,
        }
    }

    /// Fetch and validate candidates with a bounded worker count,
    /// stopping once `max_pool_size` proxies pass. The validated set
    /// is replaced atomically and the current pointer reset.
    pub async fn build_pool(&self, observer: Option<&BuildObserver<'_>>) -> usize {
        let candidates = self.fetch_candidates(observer).await;
        notify(observer, "Starting parallel validation of proxies");

        let mut valid = Vec::new();
        let mut checks = stream::iter(candidates.into_iter().map(|candidate| async move {
            let ok = self.validate(&candidate).await;
            (ok, candidate)
        }))
        .buffer_unordered(self.validation_concurrency);

        while let Some((ok, candidate)) = checks.next().await {
            if !ok {
                continue;
            }
            notify(observer, &format!("Validated: {}", candidate.url()));
            valid.push(candidate);
            if valid.len() >= self.max_pool_size {
                break;
            }
        }
        drop(checks);

        let count = valid.len();
        let mut state = self.state.write().await;
        state.validated = valid;
        state.current = None;
        drop(state);

        info!(count, "Proxy pool built");
        notify(
            observer,
            &format!("Validation complete. {count} proxies are usable"),
        );
        count
    }

    // -- Acquire / rotate ----------------------------------------------------

    /// Current proxy, selected uniformly at random on first use.
    /// `None` when the pool is disabled or empty: connect direct.
    pub async fn acquire_current(&self) -> Option<ProxyRecord> {
        if !self.enabled {
            return None;
        }
        {
            let state = self.state.read().await;
            if state.validated.is_empty() {
                return None;
            }
            if let Some(i) = state.current {
                return Some(state.validated[i].clone());
            }
        }
        let mut state = self.state.write().await;
        if state.validated.is_empty() {
            return None;
        }
        let i = match state.current {
            Some(i) => i,
            None => {
                let i = rand::thread_rng().gen_range(0..state.validated.len());
                state.current = Some(i);
                i
            }
        };
        Some(state.validated[i].clone())
    }

    /// Switch to a different proxy chosen uniformly among the others.
    /// No-op returning `None` when disabled or fewer than two proxies
    /// exist; otherwise returns the newly current record.
    pub async fn rotate(&self) -> Option<ProxyRecord> {
        if !self.enabled {
            return None;
        }
        let mut state = self.state.write().await;
        let n = state.validated.len();
        if n < 2 {
            return None;
        }
        let next = match state.current {
            // Pick among the n-1 others, never the current index.
            Some(cur) => {
                let r = rand::thread_rng().gen_range(0..n - 1);
                if r >= cur {
                    r + 1
                } else {
                    r
                }
            }
            None => rand::thread_rng().gen_range(0..n),
        };
        state.current = Some(next);
        Some(state.validated[next].clone())
    }
}

/// Progress sink for pool builds (source names, counts, hits).
/// Carries its own lifetime so callers can pass borrowing closures.
pub type BuildObserver<'a> = dyn Fn(&str) + Send + Sync + 'a;

fn notify(observer: Option<&BuildObserver>, msg: &str) {
    if let Some(cb) = observer {
        cb(msg);
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn parse_plain_lines(body: &str) -> Vec<ProxyRecord> {
    body.lines().filter_map(ProxyRecord::from_endpoint).collect()
}

fn records_from_entries(page: &ProxyListPage) -> Vec<ProxyRecord> {
    page.data
        .iter()
        .filter_map(|e| {
            let port = e.port_string()?;
            ProxyRecord::from_endpoint(&format!("{}:{}", e.ip, port))
        })
        .collect()
}

fn dedup_records(records: Vec<ProxyRecord>) -> Vec<ProxyRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.url.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
