//! Result Cache (C2): `commandId -> CommandResult`, bounded by an LRU policy.
//!
//! Grounded in the teacher's `registry::ProcessRegistry`, which also keys a
//! `HashMap` by a string id and retains completed entries for later
//! retrieval. That registry prunes by a fixed TTL; this cache instead caps
//! entry count (1024 per session, per the specification) and evicts by
//! least-recently-accessed, since a debugging session can run far longer
//! than any reasonable TTL but still must bound memory.
//!
//! The eviction mechanics (`Lru<T>`) are generic because the command queue
//! needs the identical bounded-retention behavior for the richer
//! `CommandInfo` it serves from `status`/`statusBulk` -- same capacity, same
//! "oldest access wins" policy, just a different payload type.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

/// Default cap on cached terminal results per session.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Immutable snapshot produced at a command's terminal-state transition.
#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub success: bool,
    pub output: String,
    pub error_message: Option<String>,
    pub duration: Duration,
}

struct Entry<T> {
    value: T,
    /// Monotonic counter stamped on every access; the entry with the
    /// smallest value is evicted first.
    last_used: u64,
}

/// A bounded least-recently-used map, scoped to one session.
///
/// Not `Send`-shared directly -- callers wrap it the way they wrap the
/// queue's other per-session state (behind the session's own lock), so this
/// type itself does no internal locking.
pub struct Lru<T: Clone> {
    capacity: usize,
    entries: HashMap<String, Entry<T>>,
    clock: u64,
}

impl<T: Clone> Lru<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), entries: HashMap::new(), clock: 0 }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Stores a value for `key`. Command ids are unique for the lifetime of
    /// the process, so this is effectively single-shot; a duplicate store
    /// simply overwrites (last write wins) rather than being rejected, since
    /// the specification does not require detecting misuse here.
    pub fn store(&mut self, key: String, value: T) {
        let used = self.tick();
        self.entries.insert(key, Entry { value, last_used: used });
        self.evict_if_over_capacity();
    }

    /// Looks up a value, marking it most-recently-used on hit.
    pub fn get(&mut self, key: &str) -> Option<T> {
        let used = self.tick();
        let entry = self.entries.get_mut(key)?;
        entry.last_used = used;
        Some(entry.value.clone())
    }

    /// Looks up without affecting recency (used by status queries that
    /// shouldn't protect an entry from eviction just because it was polled).
    pub fn peek(&self, key: &str) -> Option<&T> {
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn remove(&mut self, key: &str) -> Option<T> {
        self.entries.remove(key).map(|e| e.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evicts least-recently-used entries until the map is back within
    /// capacity. Every entry here is, by construction, a terminal result --
    /// non-terminal commands live in the queue, not the cache -- so there is
    /// nothing to protect from eviction beyond the capacity bound itself.
    fn evict_if_over_capacity(&mut self) {
        while self.entries.len() > self.capacity {
            let Some(oldest_key) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            self.entries.remove(&oldest_key);
        }
    }

    /// Evicts least-recently-used entries until the total size reported by
    /// `size_of` is back within `max_bytes`. Complements the count-based
    /// `capacity` bound: a session that retains a handful of multi-megabyte
    /// `!analyze -v` outputs can blow its memory budget long before it hits
    /// 1024 entries.
    pub fn shrink_to_bytes(&mut self, max_bytes: u64, size_of: impl Fn(&T) -> u64) {
        let mut total: u64 = self.entries.values().map(|e| size_of(&e.value)).sum();
        while total > max_bytes {
            let Some(oldest_key) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            if let Some(entry) = self.entries.remove(&oldest_key) {
                total = total.saturating_sub(size_of(&entry.value));
            }
        }
    }
}

impl<T: Clone> Default for Lru<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// The specification's Result Cache: `commandId -> CommandResult`.
pub type ResultCache = Lru<CommandResult>;

#[cfg(test)]
mod tests {
    use super::*;

    fn result(tag: &str) -> CommandResult {
        CommandResult {
            success: true,
            output: format!("output-{tag}"),
            error_message: None,
            duration: Duration::from_millis(1),
        }
    }

    #[test]
    fn store_then_get_round_trips() {
        let mut cache: ResultCache = Lru::new(4);
        cache.store("a".into(), result("a"));
        let got = cache.get("a").unwrap();
        assert_eq!(got.output, "output-a");
    }

    #[test]
    fn missing_entry_returns_none() {
        let mut cache: ResultCache = Lru::new(4);
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn eviction_removes_least_recently_used_first() {
        let mut cache: ResultCache = Lru::new(2);
        cache.store("a".into(), result("a"));
        cache.store("b".into(), result("b"));
        // touch "a" so "b" becomes the least-recently-used entry.
        let _ = cache.get("a");
        cache.store("c".into(), result("c"));

        assert!(cache.peek("a").is_some());
        assert!(cache.peek("b").is_none());
        assert!(cache.peek("c").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn capacity_of_zero_is_clamped_to_one() {
        let mut cache: ResultCache = Lru::new(0);
        cache.store("a".into(), result("a"));
        cache.store("b".into(), result("b"));
        assert_eq!(cache.len(), 1);
        assert!(cache.peek("b").is_some());
    }
}
