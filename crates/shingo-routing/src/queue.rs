//! Packet buffers for packets awaiting a route
//!
//! Two independent bounded queues:
//!
//! - [`PacketQueue`]: proactive path, bounded globally and per destination;
//!   a full queue evicts its oldest entry for the destination
//! - [`RequestQueue`]: reactive discovery path, bounded globally; a full
//!   queue rejects the new entry
//!
//! Both sweep expired entries before every query and report each dropped
//! entry through its drop continuation.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::time::Duration;

use shingo_core::{Completion, DataPacket, DropReason, PacketHeader, Timestamp};
use tracing::debug;

use crate::error::QueueError;

/// A packet parked until its route resolves
#[derive(Debug)]
pub struct QueueEntry {
    packet: DataPacket,
    header: PacketHeader,
    completion: Completion,
    expire: Timestamp,
}

impl QueueEntry {
    /// Create an entry; the queue stamps its expiry on insertion
    pub fn new(packet: DataPacket, header: PacketHeader, completion: Completion) -> Self {
        Self {
            packet,
            header,
            completion,
            expire: Timestamp::MAX,
        }
    }

    pub fn destination(&self) -> Ipv4Addr {
        self.header.destination
    }

    pub fn packet(&self) -> &DataPacket {
        &self.packet
    }

    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    pub fn expire(&self) -> Timestamp {
        self.expire
    }

    /// Split into packet, header and completion
    pub fn into_parts(self) -> (DataPacket, PacketHeader, Completion) {
        (self.packet, self.header, self.completion)
    }

    /// Run the drop continuation
    pub fn drop_with(self, reason: DropReason) {
        self.completion.fail(self.packet, self.header, reason)
    }

    fn is_same_packet(&self, other: &QueueEntry) -> bool {
        self.packet.uid() == other.packet.uid() && self.destination() == other.destination()
    }
}

/// An entry refused by a queue, handed back so the caller can drop it
#[derive(Debug)]
pub struct Rejected {
    pub error: QueueError,
    pub entry: QueueEntry,
}

impl Rejected {
    /// Drop the rejected entry with the matching reason
    pub fn drop_entry(self) {
        let reason = match self.error {
            QueueError::Full => DropReason::QueueFull,
            QueueError::Duplicate => DropReason::Duplicate,
        };
        self.entry.drop_with(reason);
    }
}

fn purge_expired(entries: &mut VecDeque<QueueEntry>, now: Timestamp) {
    if !entries.iter().any(|e| e.expire < now) {
        return;
    }
    let (expired, live): (VecDeque<_>, VecDeque<_>) =
        entries.drain(..).partition(|e| e.expire < now);
    *entries = live;
    for entry in expired {
        debug!(dst = %entry.destination(), uid = entry.packet.uid(), "Queued packet expired");
        entry.drop_with(DropReason::QueueTimeout);
    }
}

fn take_first(entries: &mut VecDeque<QueueEntry>, dst: Ipv4Addr) -> Option<QueueEntry> {
    let pos = entries.iter().position(|e| e.destination() == dst)?;
    entries.remove(pos)
}

fn drain_dst(entries: &mut VecDeque<QueueEntry>, dst: Ipv4Addr) -> Vec<QueueEntry> {
    let (matched, rest): (VecDeque<_>, VecDeque<_>) =
        entries.drain(..).partition(|e| e.destination() == dst);
    *entries = rest;
    matched.into()
}

/// Proactive-path queue with global and per-destination bounds
#[derive(Debug)]
pub struct PacketQueue {
    entries: VecDeque<QueueEntry>,
    max_len: usize,
    max_per_dst: usize,
    timeout: Duration,
}

impl PacketQueue {
    pub fn new(max_len: usize, max_per_dst: usize, timeout: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            max_len,
            max_per_dst,
            timeout,
        }
    }

    pub fn set_bounds(&mut self, max_len: usize, max_per_dst: usize) {
        self.max_len = max_len;
        self.max_per_dst = max_per_dst;
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Queue a packet, evicting the oldest entry for its destination (or the
    /// oldest overall) when a bound would be exceeded
    pub fn enqueue(&mut self, mut entry: QueueEntry, now: Timestamp) -> Result<(), Rejected> {
        self.purge(now);
        if self.entries.iter().any(|e| e.is_same_packet(&entry)) {
            return Err(Rejected {
                error: QueueError::Duplicate,
                entry,
            });
        }

        let dst = entry.destination();
        let per_dst = self.entries.iter().filter(|e| e.destination() == dst).count();
        if per_dst >= self.max_per_dst || self.entries.len() >= self.max_len {
            let evicted = take_first(&mut self.entries, dst).or_else(|| self.entries.pop_front());
            if let Some(evicted) = evicted {
                debug!(dst = %evicted.destination(), uid = evicted.packet.uid(), "Queue full, evicting oldest");
                evicted.drop_with(DropReason::QueueFull);
            }
        }

        entry.expire = now + self.timeout;
        self.entries.push_back(entry);
        Ok(())
    }

    /// Remove and return the earliest entry for `dst`
    pub fn dequeue(&mut self, dst: Ipv4Addr, now: Timestamp) -> Option<QueueEntry> {
        self.purge(now);
        take_first(&mut self.entries, dst)
    }

    pub fn find(&mut self, dst: Ipv4Addr, now: Timestamp) -> bool {
        self.count(dst, now) > 0
    }

    pub fn count(&mut self, dst: Ipv4Addr, now: Timestamp) -> usize {
        self.purge(now);
        self.entries.iter().filter(|e| e.destination() == dst).count()
    }

    pub fn size(&mut self, now: Timestamp) -> usize {
        self.purge(now);
        self.entries.len()
    }

    /// Distinct destinations with queued packets, in arrival order
    pub fn destinations(&mut self, now: Timestamp) -> Vec<Ipv4Addr> {
        self.purge(now);
        let mut dsts: Vec<Ipv4Addr> = Vec::new();
        for entry in &self.entries {
            if !dsts.contains(&entry.destination()) {
                dsts.push(entry.destination());
            }
        }
        dsts
    }

    /// Drop every entry for `dst`
    pub fn drop_packets_with_dst(&mut self, dst: Ipv4Addr, reason: DropReason) {
        for entry in drain_dst(&mut self.entries, dst) {
            entry.drop_with(reason);
        }
    }

    /// Drop expired entries
    pub fn purge(&mut self, now: Timestamp) {
        purge_expired(&mut self.entries, now);
    }
}

/// Discovery-path queue with a single global bound
#[derive(Debug)]
pub struct RequestQueue {
    entries: VecDeque<QueueEntry>,
    max_len: usize,
    timeout: Duration,
}

impl RequestQueue {
    pub fn new(max_len: usize, timeout: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            max_len,
            timeout,
        }
    }

    /// Queue a packet; fails when full or when the packet is already queued
    pub fn enqueue(&mut self, mut entry: QueueEntry, now: Timestamp) -> Result<(), Rejected> {
        self.purge(now);
        let error = if self.entries.iter().any(|e| e.is_same_packet(&entry)) {
            Some(QueueError::Duplicate)
        } else if self.entries.len() >= self.max_len {
            Some(QueueError::Full)
        } else {
            None
        };
        if let Some(error) = error {
            return Err(Rejected { error, entry });
        }

        entry.expire = now + self.timeout;
        self.entries.push_back(entry);
        Ok(())
    }

    /// Remove and return the earliest entry for `dst`
    pub fn dequeue(&mut self, dst: Ipv4Addr, now: Timestamp) -> Option<QueueEntry> {
        self.purge(now);
        take_first(&mut self.entries, dst)
    }

    pub fn find(&mut self, dst: Ipv4Addr, now: Timestamp) -> bool {
        self.purge(now);
        self.entries.iter().any(|e| e.destination() == dst)
    }

    pub fn size(&mut self, now: Timestamp) -> usize {
        self.purge(now);
        self.entries.len()
    }

    /// Drop every entry for `dst` after a failed discovery
    pub fn drop_packets_with_dst(&mut self, dst: Ipv4Addr) {
        for entry in drain_dst(&mut self.entries, dst) {
            debug!(dst = %dst, uid = entry.packet.uid(), "Dropping packet, discovery failed");
            entry.drop_with(DropReason::DiscoveryFailed);
        }
    }

    /// Drop expired entries
    pub fn purge(&mut self, now: Timestamp) {
        purge_expired(&mut self.entries, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    type DropLog = Arc<Mutex<Vec<(u64, DropReason)>>>;

    fn make_entry(uid: u64, dst: Ipv4Addr, log: &DropLog) -> QueueEntry {
        let log = log.clone();
        let completion = Completion::new(
            Box::new(|_, _, _| {}),
            Box::new(move |packet, _, reason| log.lock().push((packet.uid(), reason))),
        );
        QueueEntry::new(
            DataPacket::new(uid, &b"data"[..]),
            PacketHeader::new(Ipv4Addr::new(10, 0, 0, 1), dst),
            completion,
        )
    }

    fn dst(n: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, n)
    }

    #[test]
    fn test_per_destination_bound_evicts_oldest_for_destination() {
        let log = DropLog::default();
        let mut queue = PacketQueue::new(10, 2, Duration::from_secs(30));
        let now = Timestamp::ZERO;

        queue.enqueue(make_entry(1, dst(5), &log), now).unwrap();
        queue.enqueue(make_entry(2, dst(6), &log), now).unwrap();
        queue.enqueue(make_entry(3, dst(5), &log), now).unwrap();
        queue.enqueue(make_entry(4, dst(5), &log), now).unwrap();

        assert_eq!(*log.lock(), vec![(1, DropReason::QueueFull)]);
        assert_eq!(queue.count(dst(5), now), 2);
        assert_eq!(queue.size(now), 3);
        assert_eq!(queue.dequeue(dst(5), now).map(|e| e.packet().uid()), Some(3));
    }

    #[test]
    fn test_global_bound_evicts_oldest_overall_when_destination_absent() {
        let log = DropLog::default();
        let mut queue = PacketQueue::new(2, 2, Duration::from_secs(30));
        let now = Timestamp::ZERO;

        queue.enqueue(make_entry(1, dst(5), &log), now).unwrap();
        queue.enqueue(make_entry(2, dst(6), &log), now).unwrap();
        queue.enqueue(make_entry(3, dst(7), &log), now).unwrap();

        assert_eq!(*log.lock(), vec![(1, DropReason::QueueFull)]);
        assert_eq!(queue.size(now), 2);
        assert!(!queue.find(dst(5), now));
    }

    #[test]
    fn test_duplicate_rejected() {
        let log = DropLog::default();
        let mut queue = PacketQueue::new(10, 5, Duration::from_secs(30));
        queue.enqueue(make_entry(1, dst(5), &log), Timestamp::ZERO).unwrap();

        let rejected = queue
            .enqueue(make_entry(1, dst(5), &log), Timestamp::ZERO)
            .unwrap_err();
        assert_eq!(rejected.error, QueueError::Duplicate);
        rejected.drop_entry();
        assert_eq!(*log.lock(), vec![(1, DropReason::Duplicate)]);

        // same uid toward another destination is a different packet
        queue.enqueue(make_entry(1, dst(6), &log), Timestamp::ZERO).unwrap();
    }

    #[test]
    fn test_expired_entries_are_reported() {
        let log = DropLog::default();
        let mut queue = RequestQueue::new(4, Duration::from_secs(30));
        queue.enqueue(make_entry(1, dst(5), &log), Timestamp::ZERO).unwrap();
        queue.enqueue(make_entry(2, dst(5), &log), Timestamp::from_secs(20)).unwrap();

        assert_eq!(queue.size(Timestamp::from_secs(31)), 1);
        assert_eq!(*log.lock(), vec![(1, DropReason::QueueTimeout)]);
    }

    #[test]
    fn test_request_queue_rejects_when_full() {
        let log = DropLog::default();
        let mut queue = RequestQueue::new(2, Duration::from_secs(30));
        let now = Timestamp::ZERO;
        queue.enqueue(make_entry(1, dst(5), &log), now).unwrap();
        queue.enqueue(make_entry(2, dst(5), &log), now).unwrap();

        let rejected = queue.enqueue(make_entry(3, dst(6), &log), now).unwrap_err();
        assert_eq!(rejected.error, QueueError::Full);
        assert_eq!(rejected.entry.packet().uid(), 3);
        assert_eq!(queue.size(now), 2);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_request_queue_drop_by_destination() {
        let log = DropLog::default();
        let mut queue = RequestQueue::new(8, Duration::from_secs(30));
        let now = Timestamp::ZERO;
        queue.enqueue(make_entry(1, dst(5), &log), now).unwrap();
        queue.enqueue(make_entry(2, dst(6), &log), now).unwrap();
        queue.enqueue(make_entry(3, dst(5), &log), now).unwrap();

        queue.drop_packets_with_dst(dst(5));
        assert_eq!(
            *log.lock(),
            vec![(1, DropReason::DiscoveryFailed), (3, DropReason::DiscoveryFailed)]
        );
        assert!(queue.find(dst(6), now));
        assert!(!queue.find(dst(5), now));
    }

    #[test]
    fn test_destinations_in_arrival_order() {
        let log = DropLog::default();
        let mut queue = PacketQueue::new(10, 5, Duration::from_secs(30));
        let now = Timestamp::ZERO;
        for (uid, n) in [(1, 7), (2, 5), (3, 7)] {
            queue.enqueue(make_entry(uid, dst(n), &log), now).unwrap();
        }
        assert_eq!(queue.destinations(now), vec![dst(7), dst(5)]);
    }
}
