//! Idempotency keys and the per-adapter replay ledger

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::debug;

use super::AdapterError;

/// Deterministic identifier for a side-effecting call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Key for a (device, discrepancy fingerprint) pair
    pub fn derive(device_id: &str, fingerprint: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(device_id.trim().to_lowercase().as_bytes());
        hasher.update(b"\n");
        hasher.update(fingerprint.trim().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Use a caller-supplied key as-is
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// sha256 hex of arbitrary text, used when no fingerprint is supplied
pub fn content_digest(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Remembers the first successful result per key.
///
/// Concurrent callers with the same key share one initialization, so the
/// backend sees at most one call. The call runs on its own task: a caller
/// that times out or is cancelled leaves it running, and the next caller
/// with the same key waits for it instead of calling again. A failed call
/// drops its slot.
pub struct IdempotencyLedger<T> {
    entries: Arc<Mutex<HashMap<String, Arc<OnceCell<T>>>>>,
}

impl<T: Clone + Send + Sync + 'static> IdempotencyLedger<T> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn slot(&self, key: &IdempotencyKey) -> Arc<OnceCell<T>> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries
            .entry(key.as_str().to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Returns the stored value and whether it was replayed
    pub async fn get_or_try_insert<F, Fut>(&self, key: &IdempotencyKey, f: F) -> Result<(T, bool), AdapterError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, AdapterError>> + Send + 'static,
    {
        let slot = self.slot(key);
        if let Some(value) = slot.get() {
            debug!("replaying result for key {}", key);
            return Ok((value.clone(), true));
        }

        let entries = Arc::clone(&self.entries);
        let key = key.as_str().to_string();
        let call = tokio::spawn(async move {
            let mut ran = false;
            let outcome = slot
                .get_or_try_init(|| {
                    ran = true;
                    f()
                })
                .await
                .map(T::clone);
            match outcome {
                Ok(value) => Ok((value, !ran)),
                Err(err) => {
                    forget_failed(&entries, &key, &slot);
                    Err(err)
                }
            }
        });
        call.await?
    }

    pub fn get(&self, key: &IdempotencyKey) -> Option<T> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.get(key.as_str()).and_then(|cell| cell.get().cloned())
    }

    pub fn len(&self) -> usize {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + Sync + 'static> Default for IdempotencyLedger<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop an empty slot nobody else is waiting on
fn forget_failed<T>(entries: &Mutex<HashMap<String, Arc<OnceCell<T>>>>, key: &str, slot: &Arc<OnceCell<T>>) {
    let mut entries = entries
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    // one reference held by the map, one by this caller
    let idle = entries
        .get(key)
        .map_or(false, |cell| Arc::ptr_eq(cell, slot) && !cell.initialized() && Arc::strong_count(cell) == 2);
    if idle {
        entries.remove(key);
    }
}
