//! Per-key coordination so at most one upstream fetch runs per fingerprint.
//!
//! The engine composes cache-get, `acquire`, a second cache-get, and only
//! then the backend call. The winner populates the cache before releasing
//! its permit, so every queued caller resolves through the cache and the
//! backend runs exactly once per cold fingerprint.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct SingleFlight {
    keys: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive ownership of `key`. The returned permit releases
    /// the key on drop; the last holder also retires the key's slot so the
    /// registry does not grow with the fingerprint space.
    pub async fn acquire(&self, key: &str) -> FlightPermit<'_> {
        let slot = {
            let mut keys = self.keys.lock();
            keys.entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = slot.clone().lock_owned().await;
        FlightPermit {
            flight: self,
            key: key.to_string(),
            slot,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.keys.lock().len()
    }
}

pub struct FlightPermit<'a> {
    flight: &'a SingleFlight,
    key: String,
    slot: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FlightPermit<'_> {
    fn drop(&mut self) {
        // Registry and release are serialised under the keys lock, so a
        // fresh acquirer either finds this slot or a brand-new one, never a
        // half-retired entry. After the guard is gone, strong_count == 2
        // means registry + this permit: no waiter holds a clone, safe to
        // retire the key.
        let mut keys = self.flight.keys.lock();
        self.guard.take();
        if Arc::strong_count(&self.slot) == 2 {
            keys.remove(&self.key);
        }
    }
}
