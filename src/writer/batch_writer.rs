use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::endpoint::Endpoint;
use crate::event::Event;
use crate::executor::{CallTimeoutPool, Deadline};
use crate::metrics::SinkCounter;
use crate::serializer::Serializer;
use crate::storage::{RecordWriter, StorageEndpoint};

use super::batch::{lock_remote, BatchState, CallTimeouts, SharedConnection, TransactionBatch};
use super::config::WriterConfig;
use super::error::WriterError;
use super::stats::WriterStats;

/// Writer that streams events into one endpoint, rotating transaction batches
///
/// The writer owns one connection and at most one live [`TransactionBatch`].
/// Every storage call goes through the shared [`CallTimeoutPool`]. When the
/// live batch runs out of transactions or fails, the next write replaces it;
/// callers never see exhaustion.
///
/// Writes become visible only when [`flush`](Self::flush) commits them.
/// [`close`](Self::close) never commits.
pub struct BatchWriter {
    endpoint: Endpoint,
    serializer: Serializer,
    config: WriterConfig,
    pool: Arc<CallTimeoutPool>,
    counter: Arc<SinkCounter>,
    connection: Option<SharedConnection>,
    record_writer: RecordWriter,
    current_batch: Option<TransactionBatch>,
    batches_opened: u64,
    stats: WriterStats,
    last_heartbeat: Instant,
    last_used: Instant,
    closed: bool,
}

impl BatchWriter {
    /// Connect to the endpoint and open the first transaction batch.
    ///
    /// The partition is created on connect when `auto_create_partitions` is set.
    pub fn new(
        endpoint: Endpoint,
        config: WriterConfig,
        pool: Arc<CallTimeoutPool>,
        serializer: Serializer,
        store: Arc<dyn StorageEndpoint>,
        counter: Arc<SinkCounter>,
    ) -> Result<Self, WriterError> {
        config.validate()?;

        let connection = {
            let endpoint = endpoint.clone();
            let agent = config.agent.clone();
            let create = config.auto_create_partitions;
            pool.run("connect", Deadline::call(config.call_timeout), move || {
                store.connect(&endpoint, create, &agent)
            })
        };
        let connection: SharedConnection = match connection {
            Ok(connection) => Arc::new(Mutex::new(connection)),
            Err(e) => {
                let err = e.into_writer_error(&endpoint);
                record_failure(&counter, &counter.connections_failed, &err);
                return Err(err);
            }
        };
        SinkCounter::incr(&counter.connections_created);
        log::info!("connected to {} as '{}'", endpoint, config.agent);

        let record_writer =
            match bind_record_writer(&pool, &connection, &serializer, &endpoint, config.call_timeout) {
                Ok(writer) => writer,
                Err(err) => {
                    if let Err(e) = close_connection(&pool, connection, &endpoint, config.call_timeout) {
                        log::warn!("failed to close connection to {}: {}", endpoint, e);
                    }
                    SinkCounter::incr(&counter.connections_closed);
                    return Err(err);
                }
            };

        let now = Instant::now();
        let mut writer = Self {
            endpoint,
            serializer,
            config,
            pool,
            counter,
            connection: Some(connection),
            record_writer,
            current_batch: None,
            batches_opened: 0,
            stats: WriterStats::default(),
            last_heartbeat: now,
            last_used: now,
            closed: false,
        };

        if let Err(err) = writer.open_batch() {
            if let Err(e) = writer.close() {
                log::warn!("cleanup after failed open on {} failed: {}", writer.endpoint, e);
            }
            return Err(err);
        }
        Ok(writer)
    }

    fn timeouts(&self) -> CallTimeouts {
        CallTimeouts {
            call: self.config.call_timeout,
            transaction: self.config.transaction_timeout,
        }
    }

    fn check_open(&self) -> Result<(), WriterError> {
        if self.closed {
            return Err(WriterError::WriterClosed(self.endpoint.to_string()));
        }
        Ok(())
    }

    /// Fetch a fresh batch and make it the live one
    fn open_batch(&mut self) -> Result<(), WriterError> {
        let connection = self
            .connection
            .as_ref()
            .ok_or_else(|| WriterError::WriterClosed(self.endpoint.to_string()))?;

        let batch = TransactionBatch::open(
            self.batches_opened + 1,
            &self.endpoint,
            connection,
            self.record_writer.clone(),
            self.config.max_transactions,
            Arc::clone(&self.pool),
            self.timeouts(),
        )
        .map_err(|err| {
            record_failure(&self.counter, &self.counter.connections_failed, &err);
            err
        })?;

        self.batches_opened += 1;
        self.stats.batches_opened += 1;
        SinkCounter::incr(&self.counter.batches_opened);
        log::debug!(
            "opened batch {} on {} ({} transactions)",
            batch.id(),
            self.endpoint,
            self.config.max_transactions
        );
        self.current_batch = Some(batch);
        Ok(())
    }

    /// Close the live batch, aborting any uncommitted transaction first
    fn release_batch(&mut self) -> Result<(), WriterError> {
        match self.current_batch.take() {
            Some(mut batch) => self.release(&mut batch),
            None => Ok(()),
        }
    }

    fn release(&mut self, batch: &mut TransactionBatch) -> Result<(), WriterError> {
        let mut first_error = None;
        // Failed batches keep the records their last transaction had taken
        self.discard_pending(batch);
        if batch.state() == BatchState::Open {
            if let Err(e) = batch.abort() {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = batch.close() {
            first_error.get_or_insert(e);
        }
        SinkCounter::incr(&self.counter.batches_closed);
        first_error.map_or(Ok(()), Err)
    }

    /// Count the uncommitted records of a batch about to be rolled back
    fn discard_pending(&mut self, batch: &TransactionBatch) {
        let pending = batch.pending_records();
        if pending == 0 || batch.state() == BatchState::Closed {
            return;
        }
        log::warn!(
            "discarding {} uncommitted records in batch {} on {}",
            pending,
            batch.id(),
            self.endpoint
        );
        self.stats.records_discarded += pending;
        SinkCounter::add(&self.counter.events_discarded, pending as u64);
    }

    /// Replace the live batch with a fresh one
    fn rotate(&mut self) -> Result<(), WriterError> {
        if let Some(batch) = &self.current_batch {
            log::debug!(
                "rotating batch {} on {} (state {}, {} transactions used)",
                batch.id(),
                self.endpoint,
                batch.state(),
                batch.transactions_used()
            );
        }
        if let Err(e) = self.release_batch() {
            log::warn!("failed to release batch on {}: {}", self.endpoint, e);
        }
        SinkCounter::incr(&self.counter.batch_rotations);
        self.open_batch()
    }

    /// Make sure a batch that can take a write is live
    fn ensure_batch(&mut self) -> Result<(), WriterError> {
        match &self.current_batch {
            None => self.open_batch(),
            Some(batch) if batch.state().is_terminal() || batch.is_exhausted() => self.rotate(),
            Some(_) => Ok(()),
        }
    }

    /// Write into the live batch, beginning a transaction when none is active
    fn write_record(&mut self, record: Bytes) -> Result<(), WriterError> {
        let batch = self
            .current_batch
            .as_mut()
            .ok_or(WriterError::InvalidState {
                operation: "write",
                state: BatchState::Closed,
            })?;

        if batch.state() != BatchState::Open {
            batch.begin_next_transaction()?;
        }
        batch.write(record)
    }

    /// Serialize an event and write it into the active transaction.
    ///
    /// The write is visible only after the next [`flush`](Self::flush). A
    /// serialization failure aborts the active transaction, discarding its
    /// pending writes.
    pub fn write(&mut self, event: &Event) -> Result<(), WriterError> {
        self.check_open()?;
        self.heartbeat();
        self.last_used = Instant::now();

        let record = match self.serializer.to_record(event) {
            Ok(record) => record,
            Err(e) => {
                SinkCounter::incr(&self.counter.serialization_failures);
                if let Some(mut batch) = self.current_batch.take() {
                    if batch.state() == BatchState::Open {
                        self.discard_pending(&batch);
                        if let Err(abort_err) = batch.abort() {
                            log::warn!("abort after serialization failure failed: {}", abort_err);
                        }
                    }
                    self.current_batch = Some(batch);
                }
                return Err(e.into());
            }
        };

        self.ensure_batch()?;
        let result = match self.write_record(record.clone()) {
            Err(WriterError::BatchExhausted) => {
                self.rotate()?;
                self.write_record(record)
            }
            other => other,
        };

        match result {
            Ok(()) => {
                self.stats.records_written += 1;
                SinkCounter::incr(&self.counter.events_written);
                Ok(())
            }
            Err(err) => {
                record_failure(&self.counter, &self.counter.write_failures, &err);
                Err(err)
            }
        }
    }

    /// Commit the active transaction.
    ///
    /// Does nothing when no transaction is active. With `rolling`, the
    /// committed batch is closed and a replacement is opened right away; if the
    /// replacement cannot be opened the next write retries.
    pub fn flush(&mut self, rolling: bool) -> Result<(), WriterError> {
        self.check_open()?;
        self.heartbeat();

        let Some(batch) = self.current_batch.as_mut() else {
            return Ok(());
        };
        if batch.state() != BatchState::Open {
            return Ok(());
        }

        let pending = batch.pending_records();
        if let Err(err) = batch.commit() {
            record_failure(&self.counter, &self.counter.commit_failures, &err);
            return Err(err);
        }
        self.last_used = Instant::now();
        self.stats.records_committed += pending;
        self.stats.transactions_committed += 1;
        SinkCounter::incr(&self.counter.transactions_committed);
        SinkCounter::add(&self.counter.events_committed, pending as u64);

        if rolling {
            if let Err(e) = self.rotate() {
                log::warn!("could not open replacement batch on {}: {}", self.endpoint, e);
            }
        }
        Ok(())
    }

    /// Heartbeat the live batch if the configured interval has elapsed.
    ///
    /// Failures are logged and counted, never returned.
    pub fn heartbeat(&mut self) {
        if self.closed || self.last_heartbeat.elapsed() < self.config.heartbeat_interval {
            return;
        }
        self.last_heartbeat = Instant::now();

        let Some(batch) = self.current_batch.as_mut() else {
            return;
        };
        match batch.heartbeat() {
            Ok(()) => SinkCounter::incr(&self.counter.heartbeats_sent),
            Err(err) => {
                record_failure(&self.counter, &self.counter.heartbeat_failures, &err);
                log::warn!("heartbeat on {} failed: {}", self.endpoint, err);
            }
        }
    }

    /// Release the batch and the connection without committing.
    ///
    /// An active transaction is aborted. Every step runs even when an earlier
    /// one fails; the first error is returned. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), WriterError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut first_error = None;
        if let Some(mut batch) = self.current_batch.take() {
            if let Err(e) = self.release(&mut batch) {
                first_error.get_or_insert(e);
            }
            // The closed batch stays readable through the accessors
            self.current_batch = Some(batch);
        }
        if let Some(connection) = self.connection.take() {
            match close_connection(&self.pool, connection, &self.endpoint, self.config.call_timeout) {
                Ok(()) => log::info!("closed connection to {}", self.endpoint),
                Err(e) => {
                    log::warn!("failed to close connection to {}: {}", self.endpoint, e);
                    first_error.get_or_insert(e);
                }
            }
            SinkCounter::incr(&self.counter.connections_closed);
        }

        log::debug!("writer for {} closed: {}", self.endpoint, self.stats);
        first_error.map_or(Ok(()), Err)
    }

    /// Target endpoint
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Serializer in use
    pub fn serializer(&self) -> &Serializer {
        &self.serializer
    }

    /// Writer configuration
    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Transactions begun in the live batch, or in the last one after close
    pub fn transactions_used(&self) -> usize {
        self.current_batch
            .as_ref()
            .map_or(0, TransactionBatch::transactions_used)
    }

    /// Uncommitted records in the active transaction
    pub fn pending_records(&self) -> usize {
        self.current_batch
            .as_ref()
            .map_or(0, TransactionBatch::pending_records)
    }

    /// State of the live batch, if any
    pub fn batch_state(&self) -> Option<BatchState> {
        self.current_batch.as_ref().map(TransactionBatch::state)
    }

    /// Batches fetched over the writer's lifetime
    pub fn batches_opened(&self) -> u64 {
        self.batches_opened
    }

    /// Time of the last write or successful flush
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Time since the last write or successful flush
    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Whether [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Writer statistics
    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }
}

impl Drop for BatchWriter {
    fn drop(&mut self) {
        if !self.closed {
            log::warn!(
                "BatchWriter for {} dropped without calling close(); uncommitted records are discarded",
                self.endpoint
            );
            if let Err(e) = self.close() {
                log::warn!("close on drop failed for {}: {}", self.endpoint, e);
            }
        }
    }
}

impl std::fmt::Debug for BatchWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWriter")
            .field("endpoint", &self.endpoint.to_string())
            .field("serializer", &self.serializer.alias())
            .field("current_batch", &self.current_batch)
            .field("batches_opened", &self.batches_opened)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Count a failure, and a timeout when that is what it was
fn record_failure(counter: &SinkCounter, kind: &AtomicU64, err: &WriterError) {
    SinkCounter::incr(kind);
    if err.is_timeout() {
        SinkCounter::incr(&counter.call_timeouts);
    }
}

fn bind_record_writer(
    pool: &CallTimeoutPool,
    connection: &SharedConnection,
    serializer: &Serializer,
    endpoint: &Endpoint,
    timeout: Duration,
) -> Result<RecordWriter, WriterError> {
    let remote = Arc::clone(connection);
    let descriptor = pool
        .run("describe_table", Deadline::call(timeout), move || {
            lock_remote(&*remote)?.describe_table()
        })
        .map_err(|e| e.into_writer_error(endpoint))?;
    Ok(serializer.create_record_writer(endpoint, &descriptor)?)
}

fn close_connection(
    pool: &CallTimeoutPool,
    connection: SharedConnection,
    endpoint: &Endpoint,
    timeout: Duration,
) -> Result<(), WriterError> {
    pool.run("close_connection", Deadline::call(timeout), move || {
        lock_remote(&*connection)?.close()
    })
    .map_err(|e| e.into_writer_error(endpoint))
}
