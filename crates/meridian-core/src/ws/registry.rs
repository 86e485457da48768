//! Subscription registry: tracks which logical channels callers want and
//! dispatches received items to their callbacks.
//!
//! The registry is the one structure touched by both caller threads
//! (`add`/`remove`) and the session's receive loop (`deliver`), so all state
//! lives behind a single mutex. Callbacks are invoked *outside* the lock and
//! each one is isolated with `catch_unwind`: a panicking handler never stops
//! delivery to its siblings or the receive loop itself.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::AHashMap;

use crate::types::MessageKind;

/// Identifies one logical live-update channel: a symbol plus message kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub symbol: String,
    pub kind: MessageKind,
}

impl StreamKey {
    pub fn new(symbol: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            symbol: symbol.into(),
            kind,
        }
    }

    /// The channel key for the account-wide order-update stream, which is
    /// not tied to a single symbol.
    pub fn order_updates() -> Self {
        Self::new("*", MessageKind::OrderUpdate)
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.symbol)
    }
}

/// Callback invoked for each item delivered on a subscribed channel.
pub type ItemCallback<T> = Arc<dyn Fn(&StreamKey, &T) + Send + Sync>;

/// Caller-owned proof of one subscription; pass back to unsubscribe.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: u64,
    keys: Vec<StreamKey>,
}

impl SubscriptionHandle {
    pub fn keys(&self) -> &[StreamKey] {
        &self.keys
    }
}

/// Per-channel handler table with subscribe/unsubscribe delta computation.
pub struct SubscriptionRegistry<T> {
    channels: Mutex<AHashMap<StreamKey, AHashMap<u64, ItemCallback<T>>>>,
    next_id: AtomicU64,
}

impl<T> SubscriptionRegistry<T> {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(AHashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AHashMap<StreamKey, AHashMap<u64, ItemCallback<T>>>> {
        match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register `callback` for every key in `keys`.
    ///
    /// Returns the handle plus the keys that had no handlers before this call
    /// — only those need a subscribe message to the server.
    pub fn add(&self, keys: Vec<StreamKey>, callback: ItemCallback<T>) -> (SubscriptionHandle, Vec<StreamKey>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut newly_live = Vec::new();

        let mut channels = self.lock();
        for key in &keys {
            let handlers = channels.entry(key.clone()).or_default();
            if handlers.is_empty() {
                newly_live.push(key.clone());
            }
            handlers.insert(id, Arc::clone(&callback));
        }

        (SubscriptionHandle { id, keys }, newly_live)
    }

    /// Drop the handle's registrations.
    ///
    /// Returns the keys left with no handlers at all — only those need an
    /// unsubscribe message; a key still held by another handle stays live.
    pub fn remove(&self, handle: &SubscriptionHandle) -> Vec<StreamKey> {
        let mut fully_removed = Vec::new();

        let mut channels = self.lock();
        for key in &handle.keys {
            if let Some(handlers) = channels.get_mut(key) {
                handlers.remove(&handle.id);
                if handlers.is_empty() {
                    channels.remove(key);
                    fully_removed.push(key.clone());
                }
            }
        }

        fully_removed
    }

    /// Every key with at least one handler — the full set replayed to the
    /// server after a reconnect.
    pub fn active_keys(&self) -> Vec<StreamKey> {
        self.lock().keys().cloned().collect()
    }

    /// Invoke every handler registered for `key`. Unknown keys are silently
    /// dropped. Returns the number of handlers that panicked; their panics
    /// are contained here.
    pub fn deliver(&self, key: &StreamKey, item: &T) -> usize {
        let callbacks: Vec<ItemCallback<T>> = {
            let channels = self.lock();
            match channels.get(key) {
                Some(handlers) => handlers.values().map(Arc::clone).collect(),
                None => return 0,
            }
        };

        let mut panics = 0;
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(key, item))).is_err() {
                panics += 1;
            }
        }
        panics
    }
}

impl<T> Default for SubscriptionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
