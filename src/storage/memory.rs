//! In-process transactional store.
//!
//! Committed rows live in memory, keyed by table and partition. Rows written to
//! a transaction stay private to its batch until commit. Faults can be injected
//! per operation (fail the next call, or delay every call) to exercise timeout and
//! recovery paths without a real backend.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::endpoint::Endpoint;

use super::error::StorageError;
use super::record::{RecordWriter, Row};
use super::{RemoteTransactionBatch, StorageConnection, StorageEndpoint, TableDescriptor};

/// Store operations that faults can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `StorageEndpoint::connect`
    Connect,
    /// `StorageConnection::describe_table`
    DescribeTable,
    /// `StorageConnection::fetch_transaction_batch`
    FetchBatch,
    /// `RemoteTransactionBatch::begin_next_transaction`
    BeginTransaction,
    /// `RemoteTransactionBatch::write`
    Write,
    /// `RemoteTransactionBatch::commit`
    Commit,
    /// `RemoteTransactionBatch::abort`
    Abort,
    /// `RemoteTransactionBatch::heartbeat`
    Heartbeat,
    /// `RemoteTransactionBatch::close`
    CloseBatch,
    /// `StorageConnection::close`
    CloseConnection,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::DescribeTable => "describe_table",
            Self::FetchBatch => "fetch_batch",
            Self::BeginTransaction => "begin_transaction",
            Self::Write => "write",
            Self::Commit => "commit",
            Self::Abort => "abort",
            Self::Heartbeat => "heartbeat",
            Self::CloseBatch => "close_batch",
            Self::CloseConnection => "close_connection",
        };
        f.write_str(name)
    }
}

/// One committed transaction
#[derive(Debug, Clone)]
pub struct CommitRecord {
    /// Store-wide transaction id
    pub txn_id: u64,
    /// Partition values the rows landed in
    pub partition: Vec<String>,
    /// Number of rows committed
    pub rows: usize,
    /// Agent id of the committing writer
    pub agent: String,
    /// Commit time
    pub committed_at: DateTime<Utc>,
}

struct MemoryTable {
    descriptor: TableDescriptor,
    partitions: HashMap<Vec<String>, Vec<Row>>,
    commits: Vec<CommitRecord>,
}

#[derive(Default)]
struct Faults {
    fail_next: Vec<StoreOp>,
    delays: HashMap<StoreOp, Duration>,
}

#[derive(Default)]
struct StoreState {
    tables: HashMap<String, MemoryTable>,
    faults: Faults,
    open_connections: usize,
    open_batches: usize,
    heartbeats: u64,
    next_txn_id: u64,
}

/// In-memory storage endpoint. Clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a table
    pub fn create_table(&self, descriptor: TableDescriptor) -> Result<(), StorageError> {
        descriptor.validate()?;
        let key = descriptor.qualified_name();
        let mut state = self.state();
        if state.tables.contains_key(&key) {
            return Err(StorageError::TableExists(key));
        }

        let mut partitions = HashMap::new();
        if descriptor.partition_keys.is_empty() {
            partitions.insert(Vec::new(), Vec::new());
        }
        state.tables.insert(
            key,
            MemoryTable {
                descriptor,
                partitions,
                commits: Vec::new(),
            },
        );
        Ok(())
    }

    /// Create a partition ahead of any writer
    pub fn add_partition(
        &self,
        database: &str,
        table: &str,
        values: Vec<String>,
    ) -> Result<(), StorageError> {
        let key = format!("{}.{}", database, table);
        let mut state = self.state();
        let table = state
            .tables
            .get_mut(&key)
            .ok_or(StorageError::NoSuchTable(key))?;
        table.descriptor.check_partition(&values)?;
        table.partitions.entry(values).or_default();
        Ok(())
    }

    /// Whether the endpoint's partition exists
    pub fn has_partition(&self, endpoint: &Endpoint) -> bool {
        self.state()
            .tables
            .get(&endpoint.qualified_table())
            .map(|table| table.partitions.contains_key(endpoint.partition_values()))
            .unwrap_or(false)
    }

    /// Committed rows visible at the endpoint
    pub fn rows(&self, endpoint: &Endpoint) -> Vec<Row> {
        self.state()
            .tables
            .get(&endpoint.qualified_table())
            .and_then(|table| table.partitions.get(endpoint.partition_values()))
            .cloned()
            .unwrap_or_default()
    }

    /// Number of committed rows visible at the endpoint
    pub fn committed_rows(&self, endpoint: &Endpoint) -> usize {
        self.state()
            .tables
            .get(&endpoint.qualified_table())
            .and_then(|table| table.partitions.get(endpoint.partition_values()))
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Commit log of the endpoint's partition
    pub fn commits(&self, endpoint: &Endpoint) -> Vec<CommitRecord> {
        self.state()
            .tables
            .get(&endpoint.qualified_table())
            .map(|table| {
                table
                    .commits
                    .iter()
                    .filter(|commit| commit.partition == endpoint.partition_values())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Connections not yet closed
    pub fn open_connections(&self) -> usize {
        self.state().open_connections
    }

    /// Transaction batches not yet closed
    pub fn open_batches(&self) -> usize {
        self.state().open_batches
    }

    /// Heartbeats received
    pub fn heartbeats(&self) -> u64 {
        self.state().heartbeats
    }

    /// Fail the next call of `op` with [`StorageError::Injected`]
    pub fn fail_next(&self, op: StoreOp) {
        self.state().faults.fail_next.push(op);
    }

    /// Sleep for `delay` inside every call of `op`
    pub fn delay(&self, op: StoreOp, delay: Duration) {
        self.state().faults.delays.insert(op, delay);
    }

    /// Remove all injected faults
    pub fn clear_faults(&self) {
        self.state().faults = Faults::default();
    }

    fn inject(&self, op: StoreOp) -> Result<(), StorageError> {
        let (delay, fail) = {
            let mut state = self.state();
            let delay = state.faults.delays.get(&op).copied();
            let fail = match state.faults.fail_next.iter().position(|o| *o == op) {
                Some(index) => {
                    state.faults.fail_next.remove(index);
                    true
                }
                None => false,
            };
            (delay, fail)
        };

        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        if fail {
            return Err(StorageError::Injected(op.to_string()));
        }
        Ok(())
    }
}

impl StorageEndpoint for MemoryStore {
    fn connect(
        &self,
        endpoint: &Endpoint,
        create_partition: bool,
        agent: &str,
    ) -> Result<Box<dyn StorageConnection>, StorageError> {
        self.inject(StoreOp::Connect)?;

        let key = endpoint.qualified_table();
        let mut state = self.state();
        let table = state
            .tables
            .get_mut(&key)
            .ok_or_else(|| StorageError::NoSuchTable(key.clone()))?;
        table.descriptor.check_partition(endpoint.partition_values())?;

        if !table.partitions.contains_key(endpoint.partition_values()) {
            if !create_partition {
                return Err(StorageError::NoSuchPartition(endpoint.to_string()));
            }
            log::debug!("creating partition {}", endpoint);
            table
                .partitions
                .insert(endpoint.partition_values().to_vec(), Vec::new());
        }
        state.open_connections += 1;

        Ok(Box::new(MemoryConnection {
            store: self.clone(),
            table_key: key,
            partition: endpoint.partition_values().to_vec(),
            agent: agent.to_string(),
            closed: false,
        }))
    }
}

struct MemoryConnection {
    store: MemoryStore,
    table_key: String,
    partition: Vec<String>,
    agent: String,
    closed: bool,
}

impl MemoryConnection {
    fn check_open(&self) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::ConnectionClosed);
        }
        Ok(())
    }
}

impl StorageConnection for MemoryConnection {
    fn describe_table(&mut self) -> Result<TableDescriptor, StorageError> {
        self.check_open()?;
        self.store.inject(StoreOp::DescribeTable)?;
        self.store
            .state()
            .tables
            .get(&self.table_key)
            .map(|table| table.descriptor.clone())
            .ok_or_else(|| StorageError::NoSuchTable(self.table_key.clone()))
    }

    fn fetch_transaction_batch(
        &mut self,
        max_transactions: usize,
        writer: RecordWriter,
    ) -> Result<Box<dyn RemoteTransactionBatch>, StorageError> {
        self.check_open()?;
        self.store.inject(StoreOp::FetchBatch)?;
        self.store.state().open_batches += 1;

        Ok(Box::new(MemoryTransactionBatch {
            store: self.store.clone(),
            table_key: self.table_key.clone(),
            partition: self.partition.clone(),
            agent: self.agent.clone(),
            writer,
            max_transactions,
            used: 0,
            current: None,
            closed: false,
        }))
    }

    fn close(&mut self) -> Result<(), StorageError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.store.state().open_connections -= 1;
        self.store.inject(StoreOp::CloseConnection)
    }
}

struct MemoryTransactionBatch {
    store: MemoryStore,
    table_key: String,
    partition: Vec<String>,
    agent: String,
    writer: RecordWriter,
    max_transactions: usize,
    used: usize,
    current: Option<Vec<Row>>,
    closed: bool,
}

impl MemoryTransactionBatch {
    fn check_open(&self) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::ConnectionClosed);
        }
        Ok(())
    }

    fn current(&mut self) -> Result<&mut Vec<Row>, StorageError> {
        self.current
            .as_mut()
            .ok_or_else(|| StorageError::InvalidState("no transaction is open".to_string()))
    }
}

impl RemoteTransactionBatch for MemoryTransactionBatch {
    fn begin_next_transaction(&mut self) -> Result<(), StorageError> {
        self.check_open()?;
        self.store.inject(StoreOp::BeginTransaction)?;
        if self.current.is_some() {
            return Err(StorageError::InvalidState(
                "a transaction is already open".to_string(),
            ));
        }
        if self.used >= self.max_transactions {
            return Err(StorageError::InvalidState(
                "no transactions remaining in batch".to_string(),
            ));
        }
        self.used += 1;
        self.current = Some(Vec::new());
        Ok(())
    }

    fn write(&mut self, record: &[u8]) -> Result<(), StorageError> {
        self.check_open()?;
        self.store.inject(StoreOp::Write)?;
        let row = self.writer.decode(record)?;
        self.current()?.push(row);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.check_open()?;
        self.store.inject(StoreOp::Commit)?;
        let rows = std::mem::take(self.current()?);
        self.current = None;

        let mut state = self.store.state();
        state.next_txn_id += 1;
        let txn_id = state.next_txn_id;
        let table = state
            .tables
            .get_mut(&self.table_key)
            .ok_or_else(|| StorageError::NoSuchTable(self.table_key.clone()))?;
        table.commits.push(CommitRecord {
            txn_id,
            partition: self.partition.clone(),
            rows: rows.len(),
            agent: self.agent.clone(),
            committed_at: Utc::now(),
        });
        table
            .partitions
            .entry(self.partition.clone())
            .or_default()
            .extend(rows);
        Ok(())
    }

    fn abort(&mut self) -> Result<(), StorageError> {
        self.check_open()?;
        self.current = None;
        self.store.inject(StoreOp::Abort)
    }

    fn heartbeat(&mut self) -> Result<(), StorageError> {
        self.check_open()?;
        self.store.inject(StoreOp::Heartbeat)?;
        self.store.state().heartbeats += 1;
        Ok(())
    }

    fn remaining_transactions(&self) -> usize {
        self.max_transactions - self.used
    }

    fn close(&mut self) -> Result<(), StorageError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.current = None;
        self.store.state().open_batches -= 1;
        self.store.inject(StoreOp::CloseBatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::record::DelimitedRecordWriter;

    fn setup() -> (MemoryStore, Endpoint, RecordWriter) {
        let store = MemoryStore::new();
        let descriptor = TableDescriptor::new("testing", "alerts", vec!["id".into(), "msg".into()])
            .partitioned_by(vec!["continent".into(), "country".into()]);
        store.create_table(descriptor.clone()).unwrap();
        let endpoint = Endpoint::new(
            "mem://test",
            "testing",
            "alerts",
            vec!["Asia".to_string(), "India".to_string()],
        );
        let writer = RecordWriter::Delimited(
            DelimitedRecordWriter::bind(&["id".into(), "msg".into()], ",", ',', &descriptor)
                .unwrap(),
        );
        (store, endpoint, writer)
    }

    #[test]
    fn test_connect_requires_partition_without_auto_create() {
        let (store, endpoint, _) = setup();
        let err = store.connect(&endpoint, false, "test").err().unwrap();
        assert!(matches!(err, StorageError::NoSuchPartition(_)));

        assert!(store.connect(&endpoint, true, "test").is_ok());
        assert!(store.has_partition(&endpoint));
        assert_eq!(store.open_connections(), 1);
    }

    #[test]
    fn test_connect_rejects_wrong_partition_arity() {
        let (store, _, _) = setup();
        let endpoint = Endpoint::new("mem://test", "testing", "alerts", vec!["Asia".into()]);
        let err = store.connect(&endpoint, true, "test").err().unwrap();
        assert!(matches!(err, StorageError::InvalidPartition { .. }));
    }

    #[test]
    fn test_rows_visible_only_after_commit() {
        let (store, endpoint, writer) = setup();
        let mut conn = store.connect(&endpoint, true, "test").unwrap();
        let mut batch = conn.fetch_transaction_batch(2, writer).unwrap();

        batch.begin_next_transaction().unwrap();
        batch.write(b"1,hello").unwrap();
        batch.write(b"2,world").unwrap();
        assert_eq!(store.committed_rows(&endpoint), 0);

        batch.commit().unwrap();
        assert_eq!(store.committed_rows(&endpoint), 2);
        assert_eq!(store.commits(&endpoint)[0].rows, 2);
        assert_eq!(batch.remaining_transactions(), 1);

        batch.begin_next_transaction().unwrap();
        batch.write(b"3,lost").unwrap();
        batch.close().unwrap();
        assert_eq!(store.committed_rows(&endpoint), 2);
        assert_eq!(store.open_batches(), 0);
    }

    #[test]
    fn test_batch_refuses_more_than_max_transactions() {
        let (store, endpoint, writer) = setup();
        let mut conn = store.connect(&endpoint, true, "test").unwrap();
        let mut batch = conn.fetch_transaction_batch(1, writer).unwrap();

        batch.begin_next_transaction().unwrap();
        batch.commit().unwrap();
        assert!(matches!(
            batch.begin_next_transaction(),
            Err(StorageError::InvalidState(_))
        ));
    }

    #[test]
    fn test_fail_next_fires_once() {
        let (store, endpoint, writer) = setup();
        let mut conn = store.connect(&endpoint, true, "test").unwrap();
        let mut batch = conn.fetch_transaction_batch(5, writer).unwrap();
        batch.begin_next_transaction().unwrap();

        store.fail_next(StoreOp::Write);
        assert!(matches!(batch.write(b"1,a"), Err(StorageError::Injected(_))));
        assert!(batch.write(b"1,a").is_ok());
    }
}
