//! Deadline-bounded execution of blocking storage calls.
//!
//! [`CallTimeoutPool`] owns a fixed set of worker threads fed by a
//! `crossbeam-channel` queue. Every storage call is submitted as a task and the
//! caller waits on a one-shot reply channel until the earlier of two deadlines:
//!
//! - the **call** deadline, bounding one remote operation, and
//! - the **transaction** deadline, bounding everything done inside one open
//!   transaction.
//!
//! When a deadline passes, the task's cancellation flag is raised and the caller
//! gets [`CallError::Timeout`]. A task still waiting in the queue is skipped when
//! a worker picks it up; a task already running finishes on its worker and its
//! result is dropped. Workers are never lost either way.
//!
//! ```text
//! ┌──────────┐  Box<dyn FnOnce>   ┌──────────────┐
//! │  caller  │ ──── queue ─────▶  │ worker 0..N  │
//! │          │ ◀── reply(1) ───── │ (blocking IO)│
//! └──────────┘  recv_deadline     └──────────────┘
//! ```
//!
//! The pool is a process-scoped dependency: build it once, wrap it in an `Arc`
//! and hand a clone to every writer.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, RecvTimeoutError, Sender};

use crate::endpoint::Endpoint;
use crate::storage::StorageError;
use crate::writer::WriterError;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Which deadline ended a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineKind {
    /// The per-call deadline
    Call,
    /// The transaction-lifetime deadline
    Transaction,
}

impl fmt::Display for DeadlineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call => f.write_str("call"),
            Self::Transaction => f.write_str("transaction"),
        }
    }
}

/// Deadlines applied to one dispatched call
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    call_timeout: Duration,
    transaction: Option<Instant>,
}

impl Deadline {
    /// Bound a call by `timeout` only
    pub fn call(timeout: Duration) -> Self {
        Self {
            call_timeout: timeout,
            transaction: None,
        }
    }

    /// Also bound the call by an absolute transaction deadline
    pub fn with_transaction(mut self, deadline: Option<Instant>) -> Self {
        self.transaction = deadline;
        self
    }

    /// The effective expiry for a call starting at `now`, and which deadline it is
    pub fn resolve(&self, now: Instant) -> (Instant, DeadlineKind) {
        let call = now + self.call_timeout;
        match self.transaction {
            Some(transaction) if transaction < call => (transaction, DeadlineKind::Transaction),
            _ => (call, DeadlineKind::Call),
        }
    }
}

/// Failure of a dispatched call
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The call ran and the storage side failed it
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A deadline passed before the call returned
    #[error("call '{call}' exceeded its {kind} deadline after {elapsed:?}")]
    Timeout {
        /// Name of the call
        call: &'static str,
        /// Which deadline fired
        kind: DeadlineKind,
        /// Time waited
        elapsed: Duration,
    },

    /// The call panicked on its worker
    #[error("call '{0}' panicked")]
    Panicked(&'static str),

    /// The pool no longer accepts tasks
    #[error("call pool is shut down")]
    Shutdown,
}

impl CallError {
    /// Attach the endpoint a call was made against
    pub fn into_writer_error(self, endpoint: &Endpoint) -> WriterError {
        match self {
            // A record the storage side cannot decode is a data error, not a transport failure
            Self::Storage(StorageError::MalformedRecord(reason)) => {
                WriterError::Serialization(reason)
            }
            Self::Storage(source) => WriterError::transport(endpoint, source),
            Self::Timeout {
                call,
                kind,
                elapsed,
            } => WriterError::CallTimeout {
                call,
                kind,
                elapsed,
                endpoint: endpoint.to_string(),
                batch: None,
            },
            Self::Panicked(call) => WriterError::CallPanicked(call),
            Self::Shutdown => WriterError::PoolShutdown,
        }
    }
}

/// Configuration for the call pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads; caps concurrent in-flight storage calls
    pub threads: usize,
    /// Worker thread name prefix
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            threads: 10,
            thread_name: "tablesink-call".to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct PoolCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    timed_out: AtomicU64,
    skipped: AtomicU64,
}

/// Point-in-time pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Tasks submitted
    pub submitted: u64,
    /// Tasks that ran to completion on a worker
    pub completed: u64,
    /// Calls whose caller gave up on a deadline
    pub timed_out: u64,
    /// Cancelled tasks dropped before they started
    pub skipped: u64,
    /// Tasks currently waiting for a worker
    pub queued: usize,
}

/// Bounded worker pool running blocking calls under deadlines
pub struct CallTimeoutPool {
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<PoolCounters>,
}

impl CallTimeoutPool {
    /// Spawn a pool with `threads` workers and default naming
    pub fn new(threads: usize) -> Result<Self, std::io::Error> {
        Self::with_config(PoolConfig {
            threads,
            ..PoolConfig::default()
        })
    }

    /// Spawn a pool from a configuration
    pub fn with_config(config: PoolConfig) -> Result<Self, std::io::Error> {
        let threads = config.threads.max(1);
        let (sender, receiver) = unbounded::<Task>();
        let counters = Arc::new(PoolCounters::default());

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let receiver = receiver.clone();
            let name = format!("{}-{}", config.thread_name, index);
            let handle = thread::Builder::new().name(name).spawn(move || {
                for task in receiver {
                    // A panicking call must not take the worker down with it
                    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                        log::error!(
                            "storage call panicked on {}",
                            thread::current().name().unwrap_or("worker")
                        );
                    }
                }
            })?;
            workers.push(handle);
        }
        log::debug!("call pool started with {} workers", threads);

        Ok(Self {
            sender: Some(sender),
            workers,
            counters,
        })
    }

    /// Number of worker threads
    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Run `f` on a worker and wait for it under `deadline`
    pub fn run<T, F>(&self, call: &'static str, deadline: Deadline, f: F) -> Result<T, CallError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    {
        let start = Instant::now();
        let (expires_at, kind) = deadline.resolve(start);
        if expires_at <= start {
            self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
            return Err(CallError::Timeout {
                call,
                kind,
                elapsed: Duration::ZERO,
            });
        }

        let sender = self.sender.as_ref().ok_or(CallError::Shutdown)?;
        let cancelled = Arc::new(AtomicBool::new(false));
        let (reply_tx, reply_rx) = bounded::<Result<T, StorageError>>(1);

        let task_cancelled = Arc::clone(&cancelled);
        let counters = Arc::clone(&self.counters);
        let task: Task = Box::new(move || {
            if task_cancelled.load(Ordering::Acquire) {
                counters.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            let result = f();
            counters.completed.fetch_add(1, Ordering::Relaxed);
            // The caller may have stopped listening after a timeout
            let _ = reply_tx.send(result);
        });

        sender.send(task).map_err(|_| CallError::Shutdown)?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        match reply_rx.recv_deadline(expires_at) {
            Ok(result) => result.map_err(CallError::from),
            Err(RecvTimeoutError::Timeout) => {
                cancelled.store(true, Ordering::Release);
                self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
                let elapsed = start.elapsed();
                log::warn!("storage call '{}' timed out ({} deadline) after {:?}", call, kind, elapsed);
                Err(CallError::Timeout {
                    call,
                    kind,
                    elapsed,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(CallError::Panicked(call)),
        }
    }

    /// Current statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            queued: self.sender.as_ref().map(Sender::len).unwrap_or(0),
        }
    }

    /// Stop accepting tasks, drain the queue and join every worker
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Dropping the sender ends each worker's receive loop once the queue drains
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::warn!("call pool worker exited with a panic");
            }
        }
    }
}

impl Drop for CallTimeoutPool {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for CallTimeoutPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallTimeoutPool")
            .field("threads", &self.workers.len())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_run_returns_value() {
        let pool = CallTimeoutPool::new(2).unwrap();
        let value = pool
            .run("answer", Deadline::call(Duration::from_secs(1)), || Ok(42))
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(pool.stats().completed, 1);
    }

    #[test]
    fn test_storage_error_passes_through() {
        let pool = CallTimeoutPool::new(1).unwrap();
        let err = pool
            .run::<(), _>("fail", Deadline::call(Duration::from_secs(1)), || {
                Err(StorageError::ConnectionClosed)
            })
            .unwrap_err();
        assert!(matches!(err, CallError::Storage(StorageError::ConnectionClosed)));
    }

    #[test]
    fn test_malformed_record_maps_to_serialization() {
        let endpoint = Endpoint::new("mem://test", "testing", "alerts", vec![]);
        let err = CallError::Storage(StorageError::MalformedRecord("record is not UTF-8".into()))
            .into_writer_error(&endpoint);
        assert!(matches!(err, WriterError::Serialization(_)));
        assert!(!err.is_retryable());

        let err = CallError::Storage(StorageError::ConnectionClosed).into_writer_error(&endpoint);
        assert!(matches!(err, WriterError::Transport { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_timeout_carries_endpoint() {
        let endpoint = Endpoint::new("mem://test", "testing", "alerts", vec![]);
        let err = CallError::Timeout {
            call: "write",
            kind: DeadlineKind::Call,
            elapsed: Duration::from_millis(20),
        }
        .into_writer_error(&endpoint);
        assert_eq!(err.endpoint(), Some(endpoint.to_string().as_str()));
        assert!(err.to_string().contains("testing.alerts"));
    }

    #[test]
    fn test_call_deadline_fires() {
        let pool = CallTimeoutPool::new(1).unwrap();
        let err = pool
            .run("slow", Deadline::call(Duration::from_millis(20)), || {
                thread::sleep(Duration::from_millis(200));
                Ok(())
            })
            .unwrap_err();
        match err {
            CallError::Timeout { call, kind, .. } => {
                assert_eq!(call, "slow");
                assert_eq!(kind, DeadlineKind::Call);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        // The worker is released once the slow call finishes
        let value = pool
            .run("next", Deadline::call(Duration::from_secs(2)), || Ok(7))
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_transaction_deadline_wins_when_earlier() {
        let pool = CallTimeoutPool::new(1).unwrap();
        let deadline = Deadline::call(Duration::from_secs(10))
            .with_transaction(Some(Instant::now() + Duration::from_millis(20)));
        let err = pool
            .run("slow", deadline, || {
                thread::sleep(Duration::from_millis(200));
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(
            err,
            CallError::Timeout {
                kind: DeadlineKind::Transaction,
                ..
            }
        ));
    }

    #[test]
    fn test_expired_transaction_deadline_never_dispatches() {
        let pool = CallTimeoutPool::new(1).unwrap();
        let deadline =
            Deadline::call(Duration::from_secs(10)).with_transaction(Some(Instant::now()));
        let err = pool.run("late", deadline, || Ok(())).unwrap_err();
        assert!(matches!(err, CallError::Timeout { .. }));
        assert_eq!(pool.stats().submitted, 0);
    }

    #[test]
    fn test_cancelled_queued_task_is_skipped() {
        let pool = CallTimeoutPool::new(1).unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        // Occupy the only worker until released
        let blocker = pool.run("block", Deadline::call(Duration::from_millis(10)), move || {
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
            Ok(())
        });
        assert!(blocker.is_err());

        // Queued behind the blocker; its deadline passes before it can start
        let ran = Arc::new(AtomicBool::new(false));
        let ran_flag = Arc::clone(&ran);
        let queued = pool.run("queued", Deadline::call(Duration::from_millis(10)), move || {
            ran_flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        assert!(queued.is_err());

        release_tx.send(()).unwrap();
        pool.run("after", Deadline::call(Duration::from_secs(2)), || Ok(()))
            .unwrap();

        assert!(!ran.load(Ordering::SeqCst));
        let stats = pool.stats();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.timed_out, 2);
    }

    #[test]
    fn test_panicking_call_keeps_worker() {
        let pool = CallTimeoutPool::new(1).unwrap();
        let err = pool
            .run::<(), _>("boom", Deadline::call(Duration::from_secs(1)), || {
                panic!("boom")
            })
            .unwrap_err();
        assert!(matches!(err, CallError::Panicked("boom")));

        let value = pool
            .run("alive", Deadline::call(Duration::from_secs(1)), || Ok(1))
            .unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn test_shutdown_joins_workers() {
        let pool = CallTimeoutPool::new(3).unwrap();
        assert_eq!(pool.threads(), 3);
        pool.shutdown();
    }
}
