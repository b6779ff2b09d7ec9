//! Derived-artifact cache
//!
//! Expensive per-node results are cached on disk under keys built from the node's
//! content digest, the resolver plugin list and the path prefix, plus the resolver
//! options for option-sensitive fields. Identical keys resolve from disk across runs;
//! concurrent requests for the same key inside one worker share a single computation.

use crate::error::BuildError;
use crate::hashing::{compute_canonical_hash, compute_hash};
use crate::writer::write_atomic;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// `{namespace}-{contentDigest}-{pluginsKey}-{pathPrefix}[-{optionsKey}]`
pub fn cache_key(
    namespace: &str,
    content_digest: &str,
    plugins: &[String],
    path_prefix: &str,
    options: Option<&Value>,
) -> String {
    let plugins_key = compute_canonical_hash(&plugins);
    let mut key = format!(
        "{}-{}-{}-{}",
        namespace, content_digest, plugins_key, path_prefix
    );
    if let Some(options) = options {
        key.push('-');
        key.push_str(&compute_canonical_hash(options));
    }
    key
}

type Waiters = Vec<oneshot::Sender<Result<Value, BuildError>>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub coalesced: usize,
}

pub struct DerivedCache {
    dir: PathBuf,
    memory: Mutex<HashMap<String, Value>>,
    in_flight: Mutex<HashMap<String, Waiters>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
    coalesced: AtomicUsize,
}

/// Clears a leader's in-flight entry, also when its future is dropped mid-compute
///
/// Dropping the entry drops the followers' senders, so they fail instead of waiting.
struct LeaderGuard<'a> {
    in_flight: &'a Mutex<HashMap<String, Waiters>>,
    key: &'a str,
}

impl LeaderGuard<'_> {
    fn finish(self) -> Waiters {
        self.in_flight.lock().remove(self.key).unwrap_or_default()
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(self.key);
    }
}

enum Slot {
    Ready(Value),
    Leader,
    Follower(oneshot::Receiver<Result<Value, BuildError>>),
}

impl DerivedCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DerivedCache {
            dir: dir.into(),
            memory: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            coalesced: AtomicUsize::new(0),
        }
    }

    fn file_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", compute_hash(key.as_bytes())))
    }

    async fn lookup(&self, key: &str) -> Option<Value> {
        let remembered = self.memory.lock().get(key).cloned();
        if remembered.is_some() {
            return remembered;
        }
        let bytes = tokio::fs::read(self.file_for(key)).await.ok()?;
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => {
                self.memory.lock().insert(key.to_string(), value.clone());
                Some(value)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Ignoring corrupt cache entry");
                None
            }
        }
    }

    /// Return the cached value for `key`, computing and storing it on a miss
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> Result<Value, BuildError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, BuildError>>,
    {
        if let Some(value) = self.lookup(key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        let slot = {
            let mut in_flight = self.in_flight.lock();
            // a leader stores its value before leaving the in-flight map
            let finished = self.memory.lock().get(key).cloned();
            if let Some(value) = finished {
                Slot::Ready(value)
            } else if let Some(waiters) = in_flight.get_mut(key) {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Slot::Follower(rx)
            } else {
                in_flight.insert(key.to_string(), Vec::new());
                Slot::Leader
            }
        };

        match slot {
            Slot::Ready(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(value);
            }
            Slot::Follower(rx) => {
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                return rx.await.map_err(|_| {
                    BuildError::Protocol(format!("cache computation for {} was dropped", key))
                })?;
            }
            Slot::Leader => {}
        }

        let guard = LeaderGuard {
            in_flight: &self.in_flight,
            key,
        };
        self.misses.fetch_add(1, Ordering::Relaxed);
        let result = compute().await;
        if let Ok(value) = &result {
            self.memory.lock().insert(key.to_string(), value.clone());
            match serde_json::to_vec(value) {
                Ok(bytes) => {
                    if let Err(e) = write_atomic(&self.file_for(key), &bytes).await {
                        warn!(key = %key, error = %e, "Failed to persist cache entry");
                    }
                }
                Err(e) => warn!(key = %key, error = %e, "Failed to encode cache entry"),
            }
        }

        let waiters = guard.finish();
        debug!(key = %key, waiters = waiters.len(), "Computed derived value");
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
        result
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }
}
