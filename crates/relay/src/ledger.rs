//! Duplicate-suppression ledger
//!
//! Remembers which logical notifications were attempted recently so a burst
//! of identical triggers produces one remote send. Entries carry the time
//! they were marked and stop counting once the suppression window has
//! elapsed; expired entries are removed lazily on every mark and by an
//! optional background sweeper.
//!
//! The ledger is memory-resident and per-process. A restart or a second
//! process can still double-send.
//!
//! # Atomicity
//!
//! Callers wrap check, decide, and mark for a key in [`DeduplicationLedger::lock_key`].
//! Concurrent triggers for the same key then queue behind each other instead
//! of both passing the check.

use lifeline_core::Clock;
use lifeline_domain::NotificationKey;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::debug;

/// Reference suppression window
pub const DEFAULT_SUPPRESSION_WINDOW: Duration = Duration::from_secs(30);

/// Per-key async locks.
///
/// Holders of the same key queue in arrival order; distinct keys never
/// block each other. A key's entry is removed once its last holder is gone.
pub struct KeyedLocks<K> {
    gates: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

/// Exclusive hold on one key of a [`KeyedLocks`]
pub struct KeyedGuard<'a, K: Eq + Hash> {
    locks: &'a KeyedLocks<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self {
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &K) -> KeyedGuard<'_, K> {
        let gate = {
            let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
            gates
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let guard = gate.lock_owned().await;
        KeyedGuard {
            locks: self,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    /// Whether no key is currently held or awaited
    pub fn is_empty(&self) -> bool {
        self.gates.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash> KeyedGuard<'_, K> {
    /// Key held by this guard
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash> Drop for KeyedGuard<'_, K> {
    fn drop(&mut self) {
        // The guard holds a clone of the gate Arc, so release it before
        // checking whether anyone else is queued on this key.
        self.guard.take();

        let mut gates = self.locks.gates.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(gate) = gates.get(&self.key) {
            if Arc::strong_count(gate) == 1 {
                gates.remove(&self.key);
            }
        }
    }
}

/// In-memory set of recently sent notification keys
pub struct DeduplicationLedger {
    window_ms: u64,
    clock: Arc<dyn Clock>,
    /// Key -> time it was marked (Unix epoch ms)
    entries: RwLock<HashMap<NotificationKey, u64>>,
    gates: KeyedLocks<NotificationKey>,
}

/// Exclusive hold on one key's check/decide/mark region
pub struct KeyGate<'a> {
    ledger: &'a DeduplicationLedger,
    hold: KeyedGuard<'a, NotificationKey>,
}

impl KeyGate<'_> {
    /// Key held by this gate
    pub fn key(&self) -> &NotificationKey {
        self.hold.key()
    }

    /// Whether the key was marked within the window
    pub fn already_sent(&self) -> bool {
        self.ledger.already_sent(self.hold.key())
    }

    /// Mark the key; call only after a real recipient is confirmed
    pub fn mark_sent(&self) {
        self.ledger.mark_sent(self.hold.key());
    }
}

impl DeduplicationLedger {
    /// Create a ledger with the given suppression window
    pub fn new(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            window_ms: window.as_millis() as u64,
            clock,
            entries: RwLock::new(HashMap::new()),
            gates: KeyedLocks::new(),
        }
    }

    /// Suppression window
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Serialise work on `key` within this process
    pub async fn lock_key(&self, key: &NotificationKey) -> KeyGate<'_> {
        KeyGate {
            ledger: self,
            hold: self.gates.lock(key).await,
        }
    }

    /// Whether `key` was marked within the suppression window
    pub fn already_sent(&self, key: &NotificationKey) -> bool {
        let now = self.clock.now_ms();
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .map(|marked_at| !self.is_expired(*marked_at, now))
            .unwrap_or(false)
    }

    /// Record `key` as sent now
    pub fn mark_sent(&self, key: &NotificationKey) {
        let now = self.clock.now_ms();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, marked_at| !self.is_expired(*marked_at, now));
        entries.insert(key.clone(), now);
        debug!(key = %key, "Marked notification key");
    }

    /// Remove expired entries and return how many were dropped
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, marked_at| !self.is_expired(*marked_at, now));
        before - entries.len()
    }

    /// Number of stored entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the ledger holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, marked_at: u64, now: u64) -> bool {
        now.saturating_sub(marked_at) >= self.window_ms
    }
}

/// Sweep `ledger` every `interval` until the task is aborted
pub fn spawn_sweeper(ledger: Arc<DeduplicationLedger>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = ledger.sweep();
            if removed > 0 {
                debug!(removed, remaining = ledger.len(), "Swept expired notification keys");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifeline_core::ManualClock;
    use lifeline_domain::EventKind;

    fn key(request_id: &str) -> NotificationKey {
        NotificationKey::broadcast(EventKind::NewBloodRequest, request_id).unwrap()
    }

    fn ledger() -> (Arc<ManualClock>, DeduplicationLedger) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let ledger = DeduplicationLedger::new(DEFAULT_SUPPRESSION_WINDOW, clock.clone());
        (clock, ledger)
    }

    #[test]
    fn test_unmarked_key_not_sent() {
        let (_, ledger) = ledger();
        assert!(!ledger.already_sent(&key("req-1")));
    }

    #[test]
    fn test_marked_key_suppressed_within_window() {
        let (clock, ledger) = ledger();
        ledger.mark_sent(&key("req-1"));

        clock.advance(Duration::from_secs(29));
        assert!(ledger.already_sent(&key("req-1")));
        assert!(!ledger.already_sent(&key("req-2")));
    }

    #[test]
    fn test_entry_expires_after_window() {
        let (clock, ledger) = ledger();
        ledger.mark_sent(&key("req-1"));

        clock.advance(Duration::from_secs(30));
        assert!(!ledger.already_sent(&key("req-1")));
        assert_eq!(ledger.sweep(), 1);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_mark_prunes_expired_entries() {
        let (clock, ledger) = ledger();
        ledger.mark_sent(&key("old"));
        clock.advance(Duration::from_secs(31));
        ledger.mark_sent(&key("new"));

        assert_eq!(ledger.len(), 1);
        assert!(ledger.already_sent(&key("new")));
    }

    #[test]
    fn test_remark_refreshes_window() {
        let (clock, ledger) = ledger();
        ledger.mark_sent(&key("req-1"));
        clock.advance(Duration::from_secs(20));
        ledger.mark_sent(&key("req-1"));
        clock.advance(Duration::from_secs(20));

        assert!(ledger.already_sent(&key("req-1")));
    }

    #[tokio::test]
    async fn test_gate_serialises_same_key() {
        let (_, ledger) = ledger();
        let ledger = Arc::new(ledger);
        let k = key("req-1");

        let first = ledger.lock_key(&k).await;
        assert!(!first.already_sent());

        let contender = {
            let ledger = ledger.clone();
            let k = k.clone();
            tokio::spawn(async move {
                let gate = ledger.lock_key(&k).await;
                gate.already_sent()
            })
        };

        // Give the contender a chance to run; it must still be waiting.
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        first.mark_sent();
        drop(first);

        assert!(contender.await.unwrap(), "second holder must observe the mark");
        assert!(ledger.gates.is_empty());
    }

    #[tokio::test]
    async fn test_gates_for_distinct_keys_do_not_block() {
        let (_, ledger) = ledger();
        let a = ledger.lock_key(&key("a")).await;
        let b = ledger.lock_key(&key("b")).await;
        assert_ne!(a.key(), b.key());
    }

    #[tokio::test]
    async fn test_keyed_locks_release_entries() {
        let locks: KeyedLocks<String> = KeyedLocks::new();
        {
            let held = locks.lock(&"req-1".to_string()).await;
            assert_eq!(held.key(), "req-1");
            assert!(!locks.is_empty());
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired_entries() {
        let (clock, ledger) = ledger();
        let ledger = Arc::new(ledger);
        ledger.mark_sent(&key("req-1"));
        clock.advance(Duration::from_secs(60));

        let handle = spawn_sweeper(ledger.clone(), Duration::from_millis(5));
        for _ in 0..50 {
            if ledger.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.abort();

        assert!(ledger.is_empty());
    }
}
