//! Retry with session rotation.
//!
//! One helper replaces the per-call-site retry loops: run the
//! operation against the current session; on failure rotate the
//! session manager and run again with the fresh handle. Rotation
//! lives here, in the failure path — call sites never rotate ad hoc.

use anyhow::{anyhow, Result};
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

use super::session::{NetworkSession, SessionManager};

/// Run `op` up to `attempts` times, rotating the session between
/// failures. The closure receives the current session handle each
/// attempt (handles are replaced by rotation, never mutated). Returns
/// the first success or the last error.
pub async fn retry_with_rotation<T, F, Fut>(
    attempts: usize,
    sessions: &SessionManager,
    label: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut(Arc<NetworkSession>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 1..=attempts {
        let session = sessions.session().await;
        match op(session).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt < attempts {
                    warn!(
                        op = label,
                        attempt,
                        error = %e,
                        "Attempt failed; rotating session"
                    );
                    if let Err(rotate_err) = sessions.rotate().await {
                        warn!(op = label, error = %rotate_err, "Session rotation failed");
                    }
                }
                last_err = Some(e);
            }
        }
    }
    match last_err {
        Some(e) => Err(e.context(format!("{label}: all {attempts} attempts failed"))),
        None => Err(anyhow!("{label}: zero attempts requested")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::proxy::{ProxyPool, ProxyRecord};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn direct_sessions() -> SessionManager {
        let pool = Arc::new(ProxyPool::seeded(vec![], false));
        SessionManager::new(pool, Duration::from_secs(5)).await.unwrap()
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let sessions = direct_sessions().await;
        let out = retry_with_rotation(3, &sessions, "op", |_s| async { Ok::<_, anyhow::Error>(7) })
            .await
            .unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let sessions = direct_sessions().await;
        let calls = AtomicUsize::new(0);
        let out = retry_with_rotation(3, &sessions, "op", |_s| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(anyhow!("transient"))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let sessions = direct_sessions().await;
        let calls = AtomicUsize::new(0);
        let err = retry_with_rotation(2, &sessions, "chain fetch", |_s| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Err::<(), _>(anyhow!("boom {n}")) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let msg = format!("{err:#}");
        assert!(msg.contains("chain fetch: all 2 attempts failed"));
        assert!(msg.contains("boom 1"));
    }

    #[tokio::test]
    async fn test_failures_rotate_between_attempts() {
        let pool = Arc::new(ProxyPool::seeded(
            vec![
                ProxyRecord::from_endpoint("1.1.1.1:80").unwrap(),
                ProxyRecord::from_endpoint("2.2.2.2:80").unwrap(),
            ],
            true,
        ));
        let sessions = SessionManager::new(pool, Duration::from_secs(5)).await.unwrap();
        let seen = std::sync::Mutex::new(Vec::new());
        let _ = retry_with_rotation(3, &sessions, "op", |s| {
            seen.lock().unwrap().push(s.id());
            async { Err::<(), _>(anyhow!("always")) }
        })
        .await;
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 3);
        // With two proxies every rotation lands on the other one, so
        // consecutive attempts never share a session.
        assert_ne!(seen[0], seen[1]);
        assert_ne!(seen[1], seen[2]);
    }

    #[tokio::test]
    async fn test_zero_attempts_is_an_error() {
        let sessions = direct_sessions().await;
        let err = retry_with_rotation(0, &sessions, "noop", |_s| async {
            Ok::<_, anyhow::Error>(())
        })
        .await
        .unwrap_err();
        assert!(format!("{err}").contains("zero attempts"));
    }
}
