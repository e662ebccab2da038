//! Leased distributed locks over a [`LeaseStore`].
//!
//! A held [`Lock`] is renewed in the background every `ttl / 2` for as long
//! as the store still holds this lock's owner token. Renewal stops silently
//! once the token is gone, so a lock is only guaranteed for one TTL past the
//! last successful renewal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use cinema_core::error::StoreError;
use cinema_core::store::LeaseStore;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Lock already held: {0}")]
    AlreadyLocked(String),

    #[error("Lock provider unavailable: {0}")]
    Unavailable(#[from] StoreError),
}

#[derive(Clone)]
pub struct LockProvider {
    store: Arc<dyn LeaseStore>,
}

impl LockProvider {
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self { store }
    }

    /// Single attempt, never retried here.
    pub async fn acquire(&self, key: &str, ttl: Duration) -> Result<Lock, LockError> {
        let token = Uuid::new_v4().to_string();

        if !self.store.set_if_absent(key, &token, ttl).await? {
            debug!(key, "Lock busy");
            return Err(LockError::AlreadyLocked(key.to_string()));
        }

        let renewal = Renewal::spawn(self.store.clone(), key.to_string(), token.clone(), ttl);
        debug!(key, "Lock acquired");

        Ok(Lock {
            key: key.to_string(),
            token,
            store: self.store.clone(),
            renewal: Some(renewal),
            released: false,
        })
    }
}

const MIN_RENEWAL_PERIOD: Duration = Duration::from_millis(10);

struct Renewal {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Renewal {
    fn spawn(store: Arc<dyn LeaseStore>, key: String, token: String, ttl: Duration) -> Self {
        let (stop, mut stopped) = oneshot::channel::<()>();
        let period = (ttl / 2).max(MIN_RENEWAL_PERIOD);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stopped => return,
                    _ = tokio::time::sleep(period) => {}
                }

                match store.extend_if_owner(&key, &token, ttl).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(key = %key, "Lock no longer owned, renewal stopped");
                        return;
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "Lock renewal failed, renewal stopped");
                        return;
                    }
                }
            }
        });

        Self { stop, handle }
    }

    /// Returns once the loop has exited, so no extension can land afterwards.
    async fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.handle.await;
    }
}

/// A held lease. Call [`Lock::release`] when done; dropping it stops renewal
/// and schedules a best-effort owner-checked delete.
pub struct Lock {
    key: String,
    token: String,
    store: Arc<dyn LeaseStore>,
    renewal: Option<Renewal>,
    released: bool,
}

impl Lock {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Returns `false` if the lease had already expired or passed to another
    /// owner, in which case nothing is deleted.
    pub async fn release(mut self) -> Result<bool, LockError> {
        if let Some(renewal) = self.renewal.take() {
            renewal.stop().await;
        }
        self.released = true;

        let deleted = self.store.delete_if_owner(&self.key, &self.token).await?;
        if deleted {
            debug!(key = %self.key, "Lock released");
        } else {
            debug!(key = %self.key, "Lock expired before release");
        }
        Ok(deleted)
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if let Some(renewal) = self.renewal.take() {
            renewal.handle.abort();
        }
        if self.released {
            return;
        }

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let store = self.store.clone();
            let key = std::mem::take(&mut self.key);
            let token = std::mem::take(&mut self.token);
            runtime.spawn(async move {
                if let Err(e) = store.delete_if_owner(&key, &token).await {
                    warn!(key = %key, error = %e, "Failed to release dropped lock");
                }
            });
        }
    }
}
