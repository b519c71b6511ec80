use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::store::PasteStore;

/// Periodically removes expired pastes.
pub struct ExpirationReaper {
    store: PasteStore,
    period: Duration,
}

impl ExpirationReaper {
    pub fn new(store: PasteStore, period: Duration) -> Self {
        ExpirationReaper { store, period }
    }

    /// Run one sweep, logging the outcome.
    pub async fn reap(&self) -> Option<u64> {
        match self.store.delete_expired().await {
            Ok(0) => Some(0),
            Ok(count) => {
                info!("deleted {count} expired pastes");
                Some(count)
            }
            Err(err) => {
                error!("expired paste sweep failed: {err}");
                None
            }
        }
    }

    /// Sweep every period until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.period) => {
                    self.reap().await;
                }
            }
        }
        info!("expiration reaper stopped");
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(token))
    }
}
