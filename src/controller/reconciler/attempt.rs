//! # Attempt Registry
//!
//! At most one in-flight attempt per Konfiguration. Each attempt owns a
//! cancellation token so a deletion can interrupt it, and a deadline token
//! derived from it.

use crate::crd::UnitKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct AttemptRegistry {
    inflight: Arc<Mutex<HashMap<UnitKey, CancellationToken>>>,
}

impl AttemptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an attempt for `key`. Returns None while another attempt for
    /// the same key is in flight.
    pub fn try_begin(&self, key: &UnitKey) -> Option<AttemptGuard> {
        let mut inflight = match self.inflight.lock() {
            Ok(inflight) => inflight,
            Err(poisoned) => {
                warn!("Attempt registry lock poisoned, recovering");
                poisoned.into_inner()
            }
        };
        if inflight.contains_key(key) {
            return None;
        }
        let token = CancellationToken::new();
        inflight.insert(key.clone(), token.clone());
        Some(AttemptGuard {
            key: key.clone(),
            token,
            inflight: self.inflight.clone(),
        })
    }

    /// Cancel the in-flight attempt for `key`, if any
    pub fn cancel(&self, key: &UnitKey) -> bool {
        let token = self
            .inflight
            .lock()
            .ok()
            .and_then(|inflight| inflight.get(key).cloned());
        match token {
            Some(token) => {
                debug!("Cancelling in-flight attempt for {}", key);
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_inflight(&self, key: &UnitKey) -> bool {
        self.inflight
            .lock()
            .is_ok_and(|inflight| inflight.contains_key(key))
    }
}

/// Registration of one in-flight attempt, released on drop
#[derive(Debug)]
pub struct AttemptGuard {
    key: UnitKey,
    token: CancellationToken,
    inflight: Arc<Mutex<HashMap<UnitKey, CancellationToken>>>,
}

impl AttemptGuard {
    /// Cancelled when the Konfiguration is deleted mid-attempt
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if let Ok(mut inflight) = self.inflight.lock() {
            inflight.remove(&self.key);
        }
    }
}

/// Deadline of one attempt
///
/// The token is a child of the attempt token: it fires when the timeout
/// elapses or when the attempt is interrupted.
#[derive(Debug)]
pub struct Deadline {
    token: CancellationToken,
    parent: CancellationToken,
    timer: JoinHandle<()>,
}

impl Deadline {
    pub fn start(parent: &CancellationToken, timeout: Duration) -> Self {
        let token = parent.child_token();
        let timer_token = token.clone();
        let timer = tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(timeout) => timer_token.cancel(),
                () = timer_token.cancelled() => {}
            }
        });
        Self {
            token,
            parent: parent.clone(),
            timer,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The timeout elapsed (as opposed to the attempt being interrupted)
    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled() && !self.parent.is_cancelled()
    }

    pub fn is_interrupted(&self) -> bool {
        self.parent.is_cancelled()
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.timer.abort();
    }
}
