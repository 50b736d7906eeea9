use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use super::state::Stage;
use crate::error::{AppError, Result};

// ============================================================================
// CANCELLATION TOKEN
// ============================================================================

/// Shared flag plus wake-up signal for one stage run.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    cancelled: Arc<watch::Sender<bool>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            cancelled: Arc::new(tx),
        }
    }

    /// Returns `true` only for the call that actually flipped the flag.
    pub fn cancel(&self) -> bool {
        self.cancelled.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Resolves once the token is cancelled. Safe to race in `select!`.
    pub async fn cancelled(&self) {
        let mut rx = self.cancelled.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(AppError::aborted())
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// REQUEST MANAGER
// ============================================================================

/// Live tokens of the stages currently running for one document session.
#[derive(Clone, Default)]
pub struct RequestManager {
    active_requests: Arc<Mutex<HashMap<Stage, CancellationToken>>>,
}

impl RequestManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh token for `stage`. A token still registered for it is cancelled first.
    pub fn register(&self, stage: Stage) -> CancellationToken {
        let token = CancellationToken::new();
        let mut requests = self.lock();
        if let Some(previous) = requests.insert(stage, token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Cancel and forget the token for `stage`. `false` when nothing was running.
    pub fn cancel(&self, stage: Stage) -> bool {
        let token = self.lock().remove(&stage);
        match token {
            Some(token) => token.cancel(),
            None => false,
        }
    }

    /// Forget `token` if it is still the one registered for `stage`.
    pub fn unregister(&self, stage: Stage, token: &CancellationToken) {
        let mut requests = self.lock();
        if let Some(current) = requests.get(&stage) {
            if Arc::ptr_eq(&current.cancelled, &token.cancelled) {
                requests.remove(&stage);
            }
        }
    }

    pub fn is_active(&self, stage: Stage) -> bool {
        self.lock().contains_key(&stage)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Stage, CancellationToken>> {
        // Poisoning only follows a panic in another holder; the map stays usable.
        self.active_requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ============================================================================
// TESTS
// ============================================================================
