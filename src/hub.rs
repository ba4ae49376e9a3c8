use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::mpsc;

use crate::models::EnvelopeOut;

/// Close reasons a transport can observe after its delivery queue ends.
pub const REASON_SLOW_CONSUMER: &str = "slow_consumer";
pub const REASON_SUPERSEDED: &str = "superseded";

struct SubEntry {
    id: u64,
    session_id: String,
    tx: mpsc::Sender<EnvelopeOut>,
    /// Set while the queue is saturated; cleared on a successful offer.
    stalled_since: Option<Instant>,
    shared: Arc<SubShared>,
}

/// State shared between the hub and the transport holding the receiver.
#[derive(Default)]
pub struct SubShared {
    closed_reason: Mutex<Option<&'static str>>,
}

impl SubShared {
    fn close(&self, reason: &'static str) {
        let mut r = self.closed_reason.lock().unwrap_or_else(|e| e.into_inner());
        if r.is_none() {
            *r = Some(reason);
        }
    }

    pub fn closed_reason(&self) -> Option<&'static str> {
        *self.closed_reason.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A live subscription: the bounded delivery queue plus an RAII guard that
/// deregisters from the hub when the transport drops it.
pub struct Subscription {
    pub rx: mpsc::Receiver<EnvelopeOut>,
    pub shared: Arc<SubShared>,
    _guard: SubGuard,
}

struct SubGuard {
    hub: FanoutHub,
    conv_id: String,
    id: u64,
}

impl Drop for SubGuard {
    fn drop(&mut self) {
        self.hub.remove(&self.conv_id, self.id);
    }
}

/// Caps concurrent WebSocket connections per user. Managed Rocket state,
/// not a process-wide static, so tests and multiple gateways stay isolated.
#[derive(Clone, Default)]
pub struct ConnectionTracker {
    connections: Arc<Mutex<HashMap<String, usize>>>,
}

/// Releases the user's slot when the connection task ends.
pub struct ConnectionSlot {
    tracker: ConnectionTracker,
    user_id: String,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a slot for `user_id`, or None once `max` are held.
    pub fn try_acquire(&self, user_id: &str, max: usize) -> Option<ConnectionSlot> {
        let mut map = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        let count = map.entry(user_id.to_string()).or_insert(0);
        if *count >= max {
            return None;
        }
        *count += 1;
        Some(ConnectionSlot {
            tracker: self.clone(),
            user_id: user_id.to_string(),
        })
    }

    pub fn count(&self, user_id: &str) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .copied()
            .unwrap_or(0)
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        let mut map = self
            .tracker
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(count) = map.get_mut(&self.user_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                map.remove(&self.user_id);
            }
        }
    }
}

struct HubInner {
    subs: Mutex<HashMap<String, Vec<SubEntry>>>,
    next_id: AtomicU64,
    queue_len: usize,
    slow_consumer_ms: u64,
}

/// In-memory per-conversation broadcast. The Append Coordinator posts each
/// accepted envelope once; every subscription gets it through its own bounded
/// queue, so one stalled transport cannot block the append path or its peers.
#[derive(Clone)]
pub struct FanoutHub {
    inner: Arc<HubInner>,
}

impl FanoutHub {
    pub fn new(queue_len: usize, slow_consumer_ms: u64) -> Self {
        FanoutHub {
            inner: Arc::new(HubInner {
                subs: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                queue_len: queue_len.max(1),
                slow_consumer_ms,
            }),
        }
    }

    /// Register a subscription for `(session_id, conv_id)`. An existing one
    /// for the same pair is superseded: exactly one is active at a time.
    pub fn subscribe(&self, conv_id: &str, session_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.queue_len);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(SubShared::default());

        let mut subs = self.lock_subs();
        let entries = subs.entry(conv_id.to_string()).or_default();
        entries.retain(|e| {
            if e.session_id == session_id {
                e.shared.close(REASON_SUPERSEDED);
                false
            } else {
                true
            }
        });
        entries.push(SubEntry {
            id,
            session_id: session_id.to_string(),
            tx,
            stalled_since: None,
            shared: shared.clone(),
        });
        drop(subs);

        Subscription {
            rx,
            shared,
            _guard: SubGuard {
                hub: self.clone(),
                conv_id: conv_id.to_string(),
                id,
            },
        }
    }

    /// Offer one accepted envelope to every subscription on the conversation.
    /// Non-blocking: a full queue marks the subscription stalled, and a
    /// subscription saturated beyond the slow-consumer deadline is dropped
    /// (its transport sees the queue close with `slow_consumer`). Skipped
    /// rows are healed transport-side by a store backfill, so nothing is
    /// lost silently.
    pub fn publish(&self, conv_id: &str, row: &EnvelopeOut) {
        let slow_after = std::time::Duration::from_millis(self.inner.slow_consumer_ms);
        let mut subs = self.lock_subs();
        let Some(entries) = subs.get_mut(conv_id) else {
            return;
        };
        entries.retain_mut(|entry| match entry.tx.try_send(row.clone()) {
            Ok(()) => {
                entry.stalled_since = None;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let since = *entry.stalled_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= slow_after {
                    entry.shared.close(REASON_SLOW_CONSUMER);
                    false
                } else {
                    true
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        if entries.is_empty() {
            subs.remove(conv_id);
        }
    }

    /// Live subscription count across all conversations.
    pub fn subscriber_count(&self) -> usize {
        self.lock_subs().values().map(Vec::len).sum()
    }

    fn remove(&self, conv_id: &str, id: u64) {
        let mut subs = self.lock_subs();
        if let Some(entries) = subs.get_mut(conv_id) {
            entries.retain(|e| e.id != id);
            if entries.is_empty() {
                subs.remove(conv_id);
            }
        }
    }

    fn lock_subs(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<SubEntry>>> {
        self.inner.subs.lock().unwrap_or_else(|e| e.into_inner())
    }
}
