//! Duplicate-message absorption.
//!
//! Signal channels relay the same announcement through several sources
//! within seconds. A small hash cache with a TTL absorbs the repeats.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Hash-keyed LRU with a TTL.
pub struct DedupCache {
    ttl: Duration,
    capacity: usize,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    seen: HashMap<u64, Instant>,
    order: VecDeque<u64>,
}

impl DedupCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Record a message; returns true when it was seen within the TTL.
    pub fn is_duplicate(&self, message: &str) -> bool {
        let mut hasher = DefaultHasher::new();
        message.hash(&mut hasher);
        let key = hasher.finish();

        let mut inner = self.inner.lock();
        let now = Instant::now();

        // Expire from the front; insertion order is age order.
        while let Some(oldest) = inner.order.front().copied() {
            let expired = inner
                .seen
                .get(&oldest)
                .map(|at| now.duration_since(*at) > self.ttl)
                .unwrap_or(true);
            if !expired && inner.order.len() <= self.capacity {
                break;
            }
            inner.order.pop_front();
            inner.seen.remove(&oldest);
        }

        if let Some(at) = inner.seen.get(&key) {
            if now.duration_since(*at) <= self.ttl {
                return true;
            }
        }
        inner.seen.insert(key, now);
        inner.order.push_back(key);
        false
    }

    pub fn len(&self) -> usize {
        self.inner.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
