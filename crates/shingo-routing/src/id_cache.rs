//! Route request duplicate suppression

use std::net::Ipv4Addr;
use std::time::Duration;

use shingo_core::Timestamp;

/// Recently seen (origin, request id) pairs
#[derive(Debug)]
pub struct IdCache {
    seen: Vec<(Ipv4Addr, u32, Timestamp)>,
    lifetime: Duration,
}

impl IdCache {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            seen: Vec::new(),
            lifetime,
        }
    }

    /// Record the pair, returning `true` if it was already present
    pub fn is_duplicate(&mut self, origin: Ipv4Addr, id: u32, now: Timestamp) -> bool {
        self.purge(now);
        if self.seen.iter().any(|(o, i, _)| *o == origin && *i == id) {
            return true;
        }
        self.seen.push((origin, id, now + self.lifetime));
        false
    }

    pub fn len(&mut self, now: Timestamp) -> usize {
        self.purge(now);
        self.seen.len()
    }

    pub fn is_empty(&mut self, now: Timestamp) -> bool {
        self.len(now) == 0
    }

    fn purge(&mut self, now: Timestamp) {
        self.seen.retain(|(_, _, expire)| *expire >= now);
    }
}
