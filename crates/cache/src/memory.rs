use crate::cache::MAX_CACHE_TTL;
use nachos_core::ToolResult;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

struct MemoryEntry {
    tool: String,
    result: ToolResult,
    expires_at: Instant,
    seq: u64,
}

/// Bounded in-process result store.
///
/// Eviction drops the entry that was inserted (or last rewritten) earliest.
/// Reads do not refresh position, so this approximates LRU rather than
/// implementing it exactly.
pub struct MemoryTier {
    entries: HashMap<String, MemoryEntry>,
    order: VecDeque<(String, u64)>,
    next_seq: u64,
    max_entries: usize,
    evictions: u64,
}

impl MemoryTier {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            next_seq: 0,
            max_entries: max_entries.max(1),
            evictions: 0,
        }
    }

    /// Live entry for `key`. Expired entries are removed on sight.
    pub fn get(&mut self, key: &str, now: Instant) -> Option<ToolResult> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.result.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    /// `ttl` is capped at [`MAX_CACHE_TTL`].
    pub fn insert(&mut self, key: String, tool: &str, result: ToolResult, ttl: Duration, now: Instant) {
        let Some(expires_at) = now.checked_add(ttl.min(MAX_CACHE_TTL)) else {
            return;
        };
        if !self.entries.contains_key(&key) {
            while self.entries.len() >= self.max_entries {
                if !self.evict_oldest() {
                    break;
                }
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.push_back((key.clone(), seq));
        self.entries.insert(
            key,
            MemoryEntry {
                tool: tool.to_string(),
                result,
                expires_at,
                seq,
            },
        );

        // Rewrites leave stale queue slots behind; keep the queue bounded.
        if self.order.len() > self.max_entries.saturating_mul(2) {
            self.compact();
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every entry produced by `tool`. Returns how many were dropped.
    pub fn remove_tool(&mut self, tool: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.tool != tool);
        let removed = before - self.entries.len();
        if removed > 0 {
            self.compact();
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Drop expired entries. Returns how many were dropped.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let purged = before - self.entries.len();
        if purged > 0 {
            self.compact();
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    fn evict_oldest(&mut self) -> bool {
        while let Some((key, seq)) = self.order.pop_front() {
            let live = self.entries.get(&key).is_some_and(|entry| entry.seq == seq);
            if live {
                self.entries.remove(&key);
                self.evictions += 1;
                return true;
            }
        }
        false
    }

    fn compact(&mut self) {
        let entries = &self.entries;
        self.order
            .retain(|(key, seq)| entries.get(key).is_some_and(|entry| entry.seq == *seq));
    }
}
