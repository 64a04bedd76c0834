//! Authorized session state shared by concurrent requests.

pub mod http;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::info;

pub use http::{parse_cookies, HttpTransport, SessionState};

/// Holds the current session and serializes refreshes.
///
/// Readers get an `Arc` to a complete session, never a half-updated one.
/// When the session is missing, the first caller runs the login closure
/// while later callers wait on it and reuse its outcome.
#[derive(Debug)]
pub struct SessionCell<S> {
    current: RwLock<Option<Arc<S>>>,
    refresh: Mutex<()>,
}

impl<S> Default for SessionCell<S> {
    fn default() -> Self {
        Self {
            current: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }
}

impl<S> SessionCell<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current(&self) -> Option<Arc<S>> {
        self.current.read().await.clone()
    }

    pub async fn get_or_refresh<F, Fut, E>(&self, login: F) -> Result<Arc<S>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<S, E>>,
    {
        if let Some(session) = self.current().await {
            return Ok(session);
        }

        let _refreshing = self.refresh.lock().await;
        if let Some(session) = self.current().await {
            return Ok(session);
        }

        let session = Arc::new(login().await?);
        *self.current.write().await = Some(Arc::clone(&session));
        info!("session established");
        Ok(session)
    }

    /// Drops `stale` if it is still the current session. A session that was
    /// already replaced by a newer login is left alone.
    pub async fn invalidate(&self, stale: &Arc<S>) -> bool {
        let mut current = self.current.write().await;
        match current.as_ref() {
            Some(session) if Arc::ptr_eq(session, stale) => {
                *current = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_login() {
        let cell = Arc::new(SessionCell::<u32>::new());
        let logins = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cell = Arc::clone(&cell);
            let logins = Arc::clone(&logins);
            handles.push(tokio::spawn(async move {
                cell.get_or_refresh(|| async {
                    logins.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, ()>(7)
                })
                .await
            }));
        }
        for handle in handles {
            assert_eq!(*handle.await.unwrap().unwrap(), 7);
        }
        assert_eq!(logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_only_drops_matching_session() {
        let cell = SessionCell::<u32>::new();
        let first = cell.get_or_refresh(|| async { Ok::<_, ()>(1) }).await.unwrap();
        assert!(cell.invalidate(&first).await);

        let second = cell.get_or_refresh(|| async { Ok::<_, ()>(2) }).await.unwrap();
        assert!(!cell.invalidate(&first).await);
        assert_eq!(cell.current().await.as_deref(), Some(&2));
        assert!(cell.invalidate(&second).await);
        assert!(cell.current().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_login_leaves_cell_empty() {
        let cell = SessionCell::<u32>::new();
        let err = cell
            .get_or_refresh(|| async { Err::<u32, _>("denied") })
            .await
            .unwrap_err();
        assert_eq!(err, "denied");
        assert!(cell.current().await.is_none());
    }
}
