//! Advisory distributed lock over a shared key-value document
//!
//! The lock's only persisted state is one value inside an externally owned
//! document, so any process that can reach the document can participate.
//! Mutual exclusion holds among cooperating participants only: a holder that
//! crashes leaves a stale lock behind forever, as there is no lease or
//! heartbeat mechanism.

use crate::error::{GridFlowError, Result};
use rand::Rng;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use uuid::Uuid;

/// Document field the lock lives under by default
pub const DEFAULT_LOCK_KEY: &str = "_lock";

/// Default backoff delay between acquisition attempts
pub const DEFAULT_LOCK_DELAY: Duration = Duration::from_millis(100);

/// Key-value document shared between cooperating processes
pub trait SharedDocument {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    fn remove(&self, key: &str);
}

/// In-process document, shareable across handles via `clone`
#[derive(Debug, Clone, Default)]
pub struct MemoryDocument {
    entries: Arc<Mutex<serde_json::Map<String, Value>>>,
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SharedDocument for MemoryDocument {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.entries.lock().unwrap().insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }
}

/// Mutual exclusion over one field of a shared document
pub struct DocumentLock<D: SharedDocument> {
    document: D,
    key: String,
    owner_id: Option<String>,
}

impl<D: SharedDocument> DocumentLock<D> {
    pub fn new(document: D, key: impl Into<String>) -> Self {
        Self {
            document,
            key: key.into(),
            owner_id: None,
        }
    }

    pub fn with_default_key(document: D) -> Self {
        Self::new(document, DEFAULT_LOCK_KEY)
    }

    /// Whether this instance currently believes it holds the lock
    pub fn is_held(&self) -> bool {
        self.owner_id.is_some()
    }

    /// One acquisition attempt: claim the key only if it is currently unset
    ///
    /// The claim is written and read back; among cooperating participants the
    /// last writer wins, so seeing our own id confirms the claim stuck.
    fn try_acquire(&mut self) -> bool {
        match self.document.get(&self.key) {
            None | Some(Value::Null) => {}
            Some(_) => {
                trace!("Document key '{}' already locked", self.key);
                return false;
            }
        }
        let id = Uuid::new_v4().to_string();
        self.document.set(&self.key, Value::String(id.clone()));
        let confirmed = matches!(
            self.document.get(&self.key),
            Some(Value::String(current)) if current == id
        );
        if confirmed {
            debug!("Acquired document lock '{}' as {}", self.key, id);
            self.owner_id = Some(id);
        }
        confirmed
    }

    /// Acquire the lock, retrying with increasing jittered backoff
    ///
    /// `timeout` of `None` retries indefinitely; otherwise the total elapsed
    /// wait is bounded and exceeding it fails with a lock timeout. A zero
    /// timeout fails promptly after a single attempt.
    pub fn acquire(&mut self, timeout: Option<Duration>, delay: Duration) -> Result<()> {
        let start = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if self.try_acquire() {
                return Ok(());
            }
            let jitter = delay.mul_f64(rand::thread_rng().gen::<f64>());
            match timeout {
                None => std::thread::sleep(delay * attempt + jitter),
                Some(limit) => {
                    let elapsed = start.elapsed();
                    if elapsed >= limit {
                        return Err(GridFlowError::LockTimeout(limit));
                    }
                    let pause = (delay * attempt).min(limit - elapsed) + jitter;
                    std::thread::sleep(pause);
                }
            }
        }
    }

    /// Release the lock
    ///
    /// Forced release clears the key unconditionally; otherwise releasing
    /// without a successful acquisition in this instance's lifetime is an
    /// error.
    pub fn release(&mut self, force: bool) -> Result<()> {
        if !force && self.owner_id.is_none() {
            return Err(GridFlowError::LockNotHeld);
        }
        self.document.remove(&self.key);
        self.owner_id = None;
        Ok(())
    }

    /// Scoped acquisition with default parameters
    ///
    /// The returned guard releases on drop, on every exit path.
    pub fn lock(&mut self) -> Result<DocumentGuard<'_, D>> {
        self.acquire(None, DEFAULT_LOCK_DELAY)?;
        Ok(DocumentGuard { lock: self })
    }
}

/// Holds a [`DocumentLock`] for the duration of a scope
pub struct DocumentGuard<'a, D: SharedDocument> {
    lock: &'a mut DocumentLock<D>,
}

impl<D: SharedDocument> Drop for DocumentGuard<'_, D> {
    fn drop(&mut self) {
        // Forced release cannot fail.
        let _ = self.lock.release(true);
    }
}
