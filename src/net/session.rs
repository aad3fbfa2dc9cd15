//! Proxy-bound HTTP sessions.
//!
//! A `NetworkSession` is a reqwest client bound to zero or one proxy,
//! plus an id for log correlation. Sessions are immutable: rotation
//! builds a replacement, so callers must re-fetch the handle after
//! any rotation — stale handles keep the old binding.

use anyhow::{Context, Result};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::proxy::{ProxyPool, ProxyRecord};

/// Providers scrape public endpoints that expect a browser user agent.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:135.0) Gecko/20100101 Firefox/135.0";

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One network identity: a client plus the proxy it exits through.
pub struct NetworkSession {
    id: Uuid,
    client: Client,
    proxy_url: Option<String>,
}

impl NetworkSession {
    fn build(proxy: Option<&ProxyRecord>, timeout: Duration) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(timeout)
            .user_agent(BROWSER_USER_AGENT);
        if let Some(record) = proxy {
            let p = reqwest::Proxy::all(record.url())
                .with_context(|| format!("Invalid proxy URL: {}", record.url()))?;
            builder = builder.proxy(p);
        }
        let client = builder.build().context("Failed to build session client")?;
        Ok(NetworkSession {
            id: Uuid::new_v4(),
            client,
            proxy_url: proxy.map(|r| r.url().to_string()),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The proxy this session exits through, if any.
    pub fn proxy_url(&self) -> Option<&str> {
        self.proxy_url.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Hands out the current session and rebuilds it on pool rotation.
pub struct SessionManager {
    pool: Arc<ProxyPool>,
    timeout: Duration,
    current: RwLock<Arc<NetworkSession>>,
}

impl SessionManager {
    /// Build the initial session bound to the pool's current proxy
    /// (or none, when the pool is disabled or empty).
    pub async fn new(pool: Arc<ProxyPool>, timeout: Duration) -> Result<Self> {
        let proxy = pool.acquire_current().await;
        let session = NetworkSession::build(proxy.as_ref(), timeout)?;
        tracing::debug!(
            session = %session.id(),
            proxy = session.proxy_url().unwrap_or("direct"),
            "Initial session created"
        );
        Ok(SessionManager {
            pool,
            timeout,
            current: RwLock::new(Arc::new(session)),
        })
    }

    /// The current session handle.
    pub async fn session(&self) -> Arc<NetworkSession> {
        self.current.read().await.clone()
    }

    /// Rotate the underlying pool; when a different proxy was chosen,
    /// discard the old session and bind a fresh one to it. Returns
    /// whether the identity actually changed.
    pub async fn rotate(&self) -> Result<bool> {
        let Some(record) = self.pool.rotate().await else {
            return Ok(false);
        };
        let session = NetworkSession::build(Some(&record), self.timeout)?;
        let mut current = self.current.write().await;
        tracing::info!(
            old = %current.id(),
            new = %session.id(),
            proxy = record.url(),
            "Session rotated"
        );
        *current = Arc::new(session);
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
