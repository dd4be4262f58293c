//! Sink counters
//!
//! Atomic counters shared by every writer of a sink. Writers on different
//! threads increment them concurrently; readers take a [`CounterSnapshot`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for one sink
#[derive(Debug, Default)]
pub struct SinkCounter {
    name: String,

    /// Storage connections opened
    pub connections_created: AtomicU64,
    /// Storage connections closed
    pub connections_closed: AtomicU64,
    /// Storage connections that failed to open
    pub connections_failed: AtomicU64,
    /// Transaction batches fetched
    pub batches_opened: AtomicU64,
    /// Transaction batches released
    pub batches_closed: AtomicU64,
    /// Batches replaced because they were exhausted, failed or flushed with rolling
    pub batch_rotations: AtomicU64,
    /// Events written into transactions
    pub events_written: AtomicU64,
    /// Events made visible by commits
    pub events_committed: AtomicU64,
    /// Uncommitted events rolled back
    pub events_discarded: AtomicU64,
    /// Transactions committed
    pub transactions_committed: AtomicU64,
    /// Failed writes (transport or timeout)
    pub write_failures: AtomicU64,
    /// Failed commits (transport or timeout)
    pub commit_failures: AtomicU64,
    /// Events rejected by the serializer
    pub serialization_failures: AtomicU64,
    /// Calls that exceeded a deadline
    pub call_timeouts: AtomicU64,
    /// Heartbeats sent
    pub heartbeats_sent: AtomicU64,
    /// Heartbeats that failed
    pub heartbeat_failures: AtomicU64,
}

impl SinkCounter {
    /// Create zeroed counters for the named sink
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sink name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add `n` to a counter
    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Increment a counter by one
    #[inline]
    pub fn incr(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    /// Take a point-in-time copy of every counter
    pub fn snapshot(&self) -> CounterSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            name: self.name.clone(),
            connections_created: load(&self.connections_created),
            connections_closed: load(&self.connections_closed),
            connections_failed: load(&self.connections_failed),
            batches_opened: load(&self.batches_opened),
            batches_closed: load(&self.batches_closed),
            batch_rotations: load(&self.batch_rotations),
            events_written: load(&self.events_written),
            events_committed: load(&self.events_committed),
            events_discarded: load(&self.events_discarded),
            transactions_committed: load(&self.transactions_committed),
            write_failures: load(&self.write_failures),
            commit_failures: load(&self.commit_failures),
            serialization_failures: load(&self.serialization_failures),
            call_timeouts: load(&self.call_timeouts),
            heartbeats_sent: load(&self.heartbeats_sent),
            heartbeat_failures: load(&self.heartbeat_failures),
        }
    }
}

/// Point-in-time copy of [`SinkCounter`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    /// Sink name
    pub name: String,
    /// Storage connections opened
    pub connections_created: u64,
    /// Storage connections closed
    pub connections_closed: u64,
    /// Storage connections that failed to open
    pub connections_failed: u64,
    /// Transaction batches fetched
    pub batches_opened: u64,
    /// Transaction batches released
    pub batches_closed: u64,
    /// Batch rotations
    pub batch_rotations: u64,
    /// Events written into transactions
    pub events_written: u64,
    /// Events made visible by commits
    pub events_committed: u64,
    /// Uncommitted events rolled back
    pub events_discarded: u64,
    /// Transactions committed
    pub transactions_committed: u64,
    /// Failed writes
    pub write_failures: u64,
    /// Failed commits
    pub commit_failures: u64,
    /// Events rejected by the serializer
    pub serialization_failures: u64,
    /// Calls that exceeded a deadline
    pub call_timeouts: u64,
    /// Heartbeats sent
    pub heartbeats_sent: u64,
    /// Heartbeats that failed
    pub heartbeat_failures: u64,
}

impl fmt::Display for CounterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} events written, {} committed in {} transactions ({} batches, {} rotations, {} timeouts)",
            self.name,
            self.events_written,
            self.events_committed,
            self.transactions_committed,
            self.batches_opened,
            self.batch_rotations,
            self.call_timeouts
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_concurrent_increments() {
        let counter = Arc::new(SinkCounter::new("test"));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        SinkCounter::incr(&counter.events_written);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = counter.snapshot();
        assert_eq!(snapshot.events_written, 4000);
        assert_eq!(snapshot.name, "test");
    }

    #[test]
    fn test_snapshot_serializes() {
        let counter = SinkCounter::new("sink");
        SinkCounter::add(&counter.events_committed, 3);
        let json = serde_json::to_value(counter.snapshot()).unwrap();
        assert_eq!(json["events_committed"], 3);
    }
}
