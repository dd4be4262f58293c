//! Transaction batch state machine.
//!
//! ```text
//!            begin                commit
//!   Idle ───────────▶ Open ───────────────▶ Committed
//!                      ▲                       │
//!                      └────── begin ──────────┘
//!
//!   any failure ──▶ Aborted        close (from any state) ──▶ Closed
//! ```
//!
//! The local state is authoritative: once a call fails or times out the batch is
//! `Aborted` even if the remote call is still running on a pool worker, and the
//! owner must rotate to a fresh batch.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::endpoint::Endpoint;
use crate::executor::{CallTimeoutPool, Deadline};
use crate::storage::{RecordWriter, RemoteTransactionBatch, StorageConnection, StorageError};

use super::error::{BatchContext, WriterError};

pub(crate) type SharedConnection = Arc<Mutex<Box<dyn StorageConnection>>>;
type SharedBatch = Arc<Mutex<Box<dyn RemoteTransactionBatch>>>;

/// Lock a remote handle; a poisoned lock means a call panicked mid-flight
pub(crate) fn lock_remote<T: ?Sized>(
    remote: &Mutex<Box<T>>,
) -> Result<MutexGuard<'_, Box<T>>, StorageError> {
    remote.lock().map_err(|_| StorageError::Poisoned)
}

/// Lifecycle state of a transaction batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Fetched, no transaction begun yet
    Idle,
    /// A transaction is active and accepting writes
    Open,
    /// The last transaction committed; the next one may begin
    Committed,
    /// A call failed or the batch was rolled back
    Aborted,
    /// Remote resources released
    Closed,
}

impl BatchState {
    /// Aborted and Closed batches accept no further work
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Aborted | Self::Closed)
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Open => "Open",
            Self::Committed => "Committed",
            Self::Aborted => "Aborted",
            Self::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// Per-call and per-transaction timeouts
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallTimeouts {
    pub(crate) call: Duration,
    pub(crate) transaction: Duration,
}

/// A bounded group of transactions against one endpoint
pub struct TransactionBatch {
    id: u64,
    endpoint: Endpoint,
    remote: SharedBatch,
    pool: Arc<CallTimeoutPool>,
    timeouts: CallTimeouts,
    max_transactions: usize,
    transactions_used: usize,
    pending_records: usize,
    transaction_started: Option<Instant>,
    state: BatchState,
}

impl TransactionBatch {
    /// Fetch a new batch from the connection
    pub(crate) fn open(
        id: u64,
        endpoint: &Endpoint,
        connection: &SharedConnection,
        record_writer: RecordWriter,
        max_transactions: usize,
        pool: Arc<CallTimeoutPool>,
        timeouts: CallTimeouts,
    ) -> Result<Self, WriterError> {
        let connection = Arc::clone(connection);
        let remote = pool
            .run("fetch_transaction_batch", Deadline::call(timeouts.call), move || {
                lock_remote(&*connection)?.fetch_transaction_batch(max_transactions, record_writer)
            })
            .map_err(|e| e.into_writer_error(endpoint))?;

        Ok(Self {
            id,
            endpoint: endpoint.clone(),
            remote: Arc::new(Mutex::new(remote)),
            pool,
            timeouts,
            max_transactions,
            transactions_used: 0,
            pending_records: 0,
            transaction_started: None,
            state: BatchState::Idle,
        })
    }

    /// Sequence number of this batch within its writer
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current state
    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Transactions begun so far
    pub fn transactions_used(&self) -> usize {
        self.transactions_used
    }

    /// Transactions that may still be begun
    pub fn remaining_transactions(&self) -> usize {
        self.max_transactions - self.transactions_used
    }

    /// Records written to the active transaction and not yet committed
    pub fn pending_records(&self) -> usize {
        self.pending_records
    }

    /// No further transaction can be begun in this batch
    pub fn is_exhausted(&self) -> bool {
        self.transactions_used >= self.max_transactions && self.state != BatchState::Open
    }

    fn context(&self) -> BatchContext {
        BatchContext {
            id: self.id,
            state: self.state,
        }
    }

    fn deadline(&self) -> Deadline {
        Deadline::call(self.timeouts.call).with_transaction(
            self.transaction_started
                .map(|started| started + self.timeouts.transaction),
        )
    }

    /// Dispatch a call on the remote batch; any failure aborts the batch
    fn dispatch<T, F>(&mut self, call: &'static str, deadline: Deadline, f: F) -> Result<T, WriterError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn RemoteTransactionBatch) -> Result<T, StorageError> + Send + 'static,
    {
        let remote = Arc::clone(&self.remote);
        let result = self.pool.run(call, deadline, move || {
            let mut guard = lock_remote(&*remote)?;
            f(&mut **guard)
        });

        result.map_err(|e| {
            let err = e.into_writer_error(&self.endpoint).with_batch(self.context());
            self.fail(call, &err);
            err
        })
    }

    /// Move to Aborted after a failed call, rolling back remotely when possible
    fn fail(&mut self, call: &'static str, err: &WriterError) {
        log::warn!(
            "batch {} on {} aborted after '{}' failed: {}",
            self.id,
            self.endpoint,
            call,
            err
        );
        // A timed-out call may still hold the remote handle; skip the rollback then
        if self.state == BatchState::Open && !err.is_timeout() {
            let remote = Arc::clone(&self.remote);
            let rollback = self
                .pool
                .run("abort", Deadline::call(self.timeouts.call), move || {
                    lock_remote(&*remote)?.abort()
                });
            if let Err(e) = rollback {
                log::warn!("rollback of batch {} on {} failed: {}", self.id, self.endpoint, e);
            }
        }
        self.state = BatchState::Aborted;
        self.transaction_started = None;
    }

    /// Begin the next transaction.
    ///
    /// Allowed from `Idle` or `Committed`. Fails with
    /// [`WriterError::BatchExhausted`] once every transaction has been used.
    pub fn begin_next_transaction(&mut self) -> Result<(), WriterError> {
        match self.state {
            BatchState::Idle | BatchState::Committed => {}
            state => {
                return Err(WriterError::InvalidState {
                    operation: "begin_next_transaction",
                    state,
                })
            }
        }
        if self.transactions_used >= self.max_transactions {
            return Err(WriterError::BatchExhausted);
        }

        self.dispatch(
            "begin_next_transaction",
            Deadline::call(self.timeouts.call),
            |remote| remote.begin_next_transaction(),
        )?;
        self.transactions_used += 1;
        self.pending_records = 0;
        self.transaction_started = Some(Instant::now());
        self.state = BatchState::Open;
        Ok(())
    }

    /// Write one record into the active transaction
    pub fn write(&mut self, record: Bytes) -> Result<(), WriterError> {
        if self.state != BatchState::Open {
            return Err(WriterError::InvalidState {
                operation: "write",
                state: self.state,
            });
        }
        let deadline = self.deadline();
        self.dispatch("write", deadline, move |remote| remote.write(&record))?;
        self.pending_records += 1;
        Ok(())
    }

    /// Commit the active transaction.
    ///
    /// A timeout aborts the batch like any other failure; the commit is never
    /// retried here because the storage side may or may not have applied it.
    pub fn commit(&mut self) -> Result<(), WriterError> {
        if self.state != BatchState::Open {
            return Err(WriterError::InvalidState {
                operation: "commit",
                state: self.state,
            });
        }
        let deadline = self.deadline();
        self.dispatch("commit", deadline, |remote| remote.commit())?;
        log::debug!(
            "batch {} on {} committed transaction {}/{} ({} records)",
            self.id,
            self.endpoint,
            self.transactions_used,
            self.max_transactions,
            self.pending_records
        );
        self.pending_records = 0;
        self.transaction_started = None;
        self.state = BatchState::Committed;
        Ok(())
    }

    /// Roll back the active transaction. Always leaves the batch `Aborted`.
    pub fn abort(&mut self) -> Result<(), WriterError> {
        if self.state.is_terminal() {
            return Ok(());
        }
        let context = self.context();
        let was_open = self.state == BatchState::Open;
        self.state = BatchState::Aborted;
        self.transaction_started = None;
        if !was_open {
            return Ok(());
        }

        let remote = Arc::clone(&self.remote);
        let discarded = std::mem::take(&mut self.pending_records);
        log::debug!(
            "aborting batch {} on {} ({} uncommitted records)",
            self.id,
            self.endpoint,
            discarded
        );
        self.pool
            .run("abort", Deadline::call(self.timeouts.call), move || {
                lock_remote(&*remote)?.abort()
            })
            .map_err(|e| e.into_writer_error(&self.endpoint).with_batch(context))
    }

    /// Keep open remote transactions alive; no state change
    pub fn heartbeat(&mut self) -> Result<(), WriterError> {
        if self.state.is_terminal() {
            return Ok(());
        }
        let remote = Arc::clone(&self.remote);
        self.pool
            .run("heartbeat", Deadline::call(self.timeouts.call), move || {
                lock_remote(&*remote)?.heartbeat()
            })
            .map_err(|e| e.into_writer_error(&self.endpoint).with_batch(self.context()))
    }

    /// Release remote resources. Idempotent.
    pub fn close(&mut self) -> Result<(), WriterError> {
        if self.state == BatchState::Closed {
            return Ok(());
        }
        let context = self.context();
        self.state = BatchState::Closed;
        self.transaction_started = None;

        let remote = Arc::clone(&self.remote);
        self.pool
            .run("close_batch", Deadline::call(self.timeouts.call), move || {
                lock_remote(&*remote)?.close()
            })
            .map_err(|e| e.into_writer_error(&self.endpoint).with_batch(context))
    }
}

impl fmt::Debug for TransactionBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionBatch")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint.to_string())
            .field("state", &self.state)
            .field("transactions_used", &self.transactions_used)
            .field("max_transactions", &self.max_transactions)
            .field("pending_records", &self.pending_records)
            .finish()
    }
}
