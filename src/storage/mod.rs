//! # Storage endpoint surface
//!
//! The writer talks to storage through three object-safe traits that model a
//! transactional streaming RPC surface:
//!
//! 1. [`StorageEndpoint`] opens a [`StorageConnection`] to one table partition.
//! 2. A connection describes the table and hands out [`RemoteTransactionBatch`]es
//!    bound to a [`RecordWriter`].
//! 3. A remote batch runs a bounded number of transactions; each transaction is
//!    begun, written, and committed or aborted.
//!
//! Every method may block. The writer never calls them directly; all calls are
//! dispatched through the [`CallTimeoutPool`](crate::executor::CallTimeoutPool).
//!
//! Two backends ship with the crate:
//!
//! - [`MemoryStore`]: an in-process store with fault injection, used by tests and
//!   benchmarks.
//! - [`ParquetStore`]: a local directory of partitioned tables where every commit
//!   becomes one Parquet file.

mod error;
pub mod local;
pub mod memory;
pub mod record;

use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;

pub use error::StorageError;
pub use local::{CompressionType, ParquetStore, ParquetStoreConfig};
pub use memory::{CommitRecord, MemoryStore, StoreOp};
pub use record::{DelimitedRecordWriter, JsonRecordWriter, RecordWriter, Row, NULL_MARKER};

/// Storage formats a record writer can bind to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    /// Delimited text files
    Text,
    /// JSON lines
    Json,
    /// Parquet files
    Parquet,
}

impl TableFormat {
    /// Resolve a format name reported by the storage side
    pub fn resolve(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "text" | "textfile" => Some(Self::Text),
            "json" => Some(Self::Json),
            "parquet" => Some(Self::Parquet),
            _ => None,
        }
    }
}

/// Table layout reported by the storage side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Database name
    pub database: String,
    /// Table name
    pub table: String,
    /// Data columns in table order
    pub columns: Vec<String>,
    /// Partition keys in order (empty for unpartitioned tables)
    #[serde(default)]
    pub partition_keys: Vec<String>,
    /// Storage format name, resolved with [`TableFormat::resolve`]
    pub format: String,
}

impl TableDescriptor {
    /// Describe an unpartitioned text table
    pub fn new(database: impl Into<String>, table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            columns,
            partition_keys: Vec::new(),
            format: "text".to_string(),
        }
    }

    /// Set the partition keys (builder style)
    pub fn partitioned_by(mut self, partition_keys: Vec<String>) -> Self {
        self.partition_keys = partition_keys;
        self
    }

    /// Set the format name (builder style)
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    /// `database.table`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }

    /// Position of a column, matched case-insensitively
    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
    }

    /// Check that partition values fit this table's partition keys
    pub fn check_partition(&self, values: &[String]) -> Result<(), StorageError> {
        if values.len() != self.partition_keys.len() {
            return Err(StorageError::InvalidPartition {
                table: self.qualified_name(),
                reason: format!(
                    "expected {} partition values, got {}",
                    self.partition_keys.len(),
                    values.len()
                ),
            });
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), StorageError> {
        if self.database.is_empty() || self.table.is_empty() {
            return Err(StorageError::UnsupportedFormat(format!(
                "table name '{}' has an empty part",
                self.qualified_name()
            )));
        }
        if self.columns.is_empty() {
            return Err(StorageError::UnsupportedFormat(format!(
                "{} has no columns",
                self.qualified_name()
            )));
        }
        if TableFormat::resolve(&self.format).is_none() {
            return Err(StorageError::UnsupportedFormat(self.format.clone()));
        }
        Ok(())
    }
}

/// Entry point of a storage system
pub trait StorageEndpoint: Send + Sync {
    /// Open a connection to the table partition named by `endpoint`.
    ///
    /// When `create_partition` is set, a missing partition is created; otherwise
    /// connecting to it fails with [`StorageError::NoSuchPartition`].
    fn connect(
        &self,
        endpoint: &Endpoint,
        create_partition: bool,
        agent: &str,
    ) -> Result<Box<dyn StorageConnection>, StorageError>;
}

/// An open connection to one table partition
pub trait StorageConnection: Send {
    /// Describe the connected table
    fn describe_table(&mut self) -> Result<TableDescriptor, StorageError>;

    /// Fetch a batch of `max_transactions` transactions decoding records with `writer`
    fn fetch_transaction_batch(
        &mut self,
        max_transactions: usize,
        writer: RecordWriter,
    ) -> Result<Box<dyn RemoteTransactionBatch>, StorageError>;

    /// Release the connection
    fn close(&mut self) -> Result<(), StorageError>;
}

/// Storage-side half of a transaction batch
pub trait RemoteTransactionBatch: Send {
    /// Begin the next transaction of the batch
    fn begin_next_transaction(&mut self) -> Result<(), StorageError>;

    /// Write one record into the current transaction
    fn write(&mut self, record: &[u8]) -> Result<(), StorageError>;

    /// Commit the current transaction
    fn commit(&mut self) -> Result<(), StorageError>;

    /// Roll back the current transaction
    fn abort(&mut self) -> Result<(), StorageError>;

    /// Keep open transactions alive
    fn heartbeat(&mut self) -> Result<(), StorageError>;

    /// Transactions not yet begun
    fn remaining_transactions(&self) -> usize;

    /// Release the batch; an open transaction is rolled back
    fn close(&mut self) -> Result<(), StorageError>;
}
