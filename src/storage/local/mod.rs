//! Local directory table store.
//!
//! ## Layout
//!
//! ```text
//! <root>/
//! └── <database>/
//!     └── <table>/
//!         ├── _table.json             # TableDescriptor
//!         └── continent=Asia/
//!             └── country=India/
//!                 ├── part-<ts>-<uuid>.parquet   # one file per committed transaction
//!                 └── part-<ts>-<uuid>.parquet
//! ```
//!
//! Rows written to an open transaction are buffered in the batch and only reach
//! disk on commit, as a single atomically renamed Parquet file. Every column is
//! stored as a nullable UTF-8 string; partition values live in the path.

mod config;
mod writer;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use uuid::Uuid;

use crate::endpoint::Endpoint;

use super::error::StorageError;
use super::record::{RecordWriter, Row};
use super::{RemoteTransactionBatch, StorageConnection, StorageEndpoint, TableDescriptor};

pub use config::{CompressionType, ParquetStoreConfig};
pub use writer::COMMIT_FILE_PREFIX;

/// Table metadata file name inside a table directory
pub const TABLE_METADATA_FILE: &str = "_table.json";

/// Parquet footer key holding the commit time
pub const META_COMMITTED_AT: &str = "tablesink:committed_at";
/// Parquet footer key holding the committing agent
pub const META_AGENT: &str = "tablesink:agent";
/// Parquet footer key holding the qualified table name
pub const META_TABLE: &str = "tablesink:table";

/// Store rooted at a local directory
#[derive(Debug, Clone)]
pub struct ParquetStore {
    root: PathBuf,
    config: ParquetStoreConfig,
}

impl ParquetStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        Self::with_config(root, ParquetStoreConfig::default())
    }

    /// Open a store with explicit Parquet settings
    pub fn with_config<P: AsRef<Path>>(
        root: P,
        config: ParquetStoreConfig,
    ) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root, config })
    }

    /// Store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_dir(&self, database: &str, table: &str) -> PathBuf {
        self.root
            .join(escape_path_segment(database))
            .join(escape_path_segment(table))
    }

    /// Create a table; fails if it already exists
    pub fn create_table(&self, descriptor: &TableDescriptor) -> Result<(), StorageError> {
        descriptor.validate()?;
        let dir = self.table_dir(&descriptor.database, &descriptor.table);
        let metadata_path = dir.join(TABLE_METADATA_FILE);
        if metadata_path.exists() {
            return Err(StorageError::TableExists(descriptor.qualified_name()));
        }
        fs::create_dir_all(&dir)?;
        fs::write(&metadata_path, serde_json::to_vec_pretty(descriptor)?)?;
        log::info!("created table {} at {}", descriptor.qualified_name(), dir.display());
        Ok(())
    }

    /// Load a table's descriptor
    pub fn describe(&self, database: &str, table: &str) -> Result<TableDescriptor, StorageError> {
        let path = self.table_dir(database, table).join(TABLE_METADATA_FILE);
        if !path.exists() {
            return Err(StorageError::NoSuchTable(format!("{}.{}", database, table)));
        }
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }

    /// Directory holding the endpoint's partition
    pub fn partition_dir(
        &self,
        descriptor: &TableDescriptor,
        values: &[String],
    ) -> Result<PathBuf, StorageError> {
        descriptor.check_partition(values)?;
        let mut dir = self.table_dir(&descriptor.database, &descriptor.table);
        for (key, value) in descriptor.partition_keys.iter().zip(values) {
            dir.push(format!("{}={}", key, escape_path_value(value)));
        }
        Ok(dir)
    }

    /// Committed rows visible at the endpoint
    pub fn committed_rows(&self, endpoint: &Endpoint) -> Result<u64, StorageError> {
        let descriptor = self.describe(endpoint.database(), endpoint.table())?;
        let dir = self.partition_dir(&descriptor, endpoint.partition_values())?;
        writer::commit_files(&dir)?
            .iter()
            .try_fold(0u64, |total, path| -> Result<u64, StorageError> {
                Ok(total + writer::count_rows(path)?)
            })
    }

    /// Read back every committed row at the endpoint, in commit order
    pub fn read_rows(&self, endpoint: &Endpoint) -> Result<Vec<Row>, StorageError> {
        let descriptor = self.describe(endpoint.database(), endpoint.table())?;
        let dir = self.partition_dir(&descriptor, endpoint.partition_values())?;
        let mut rows = Vec::new();
        for path in writer::commit_files(&dir)? {
            rows.extend(writer::read_rows(&path)?);
        }
        Ok(rows)
    }
}

/// Escape characters that would break the `key=value` directory layout
fn escape_path_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '/' | '\\' | '=' | '%' | ':' => escaped.push_str(&format!("%{:02X}", c as u32)),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Escape a database or table name into one directory name under the root
fn escape_path_segment(name: &str) -> String {
    let escaped = escape_path_value(name);
    match escaped.strip_prefix('.') {
        Some(rest) => format!("%2E{}", rest),
        None => escaped,
    }
}

impl StorageEndpoint for ParquetStore {
    fn connect(
        &self,
        endpoint: &Endpoint,
        create_partition: bool,
        agent: &str,
    ) -> Result<Box<dyn StorageConnection>, StorageError> {
        let descriptor = self.describe(endpoint.database(), endpoint.table())?;
        let dir = self.partition_dir(&descriptor, endpoint.partition_values())?;
        if !dir.exists() {
            if !create_partition {
                return Err(StorageError::NoSuchPartition(endpoint.to_string()));
            }
            fs::create_dir_all(&dir)?;
            log::info!("created partition {}", dir.display());
        }

        Ok(Box::new(ParquetConnection {
            config: self.config.clone(),
            descriptor,
            dir,
            agent: agent.to_string(),
            closed: false,
        }))
    }
}

struct ParquetConnection {
    config: ParquetStoreConfig,
    descriptor: TableDescriptor,
    dir: PathBuf,
    agent: String,
    closed: bool,
}

impl StorageConnection for ParquetConnection {
    fn describe_table(&mut self) -> Result<TableDescriptor, StorageError> {
        if self.closed {
            return Err(StorageError::ConnectionClosed);
        }
        Ok(self.descriptor.clone())
    }

    fn fetch_transaction_batch(
        &mut self,
        max_transactions: usize,
        writer: RecordWriter,
    ) -> Result<Box<dyn RemoteTransactionBatch>, StorageError> {
        if self.closed {
            return Err(StorageError::ConnectionClosed);
        }
        Ok(Box::new(ParquetTransactionBatch {
            config: self.config.clone(),
            columns: self.descriptor.columns.clone(),
            table: self.descriptor.qualified_name(),
            dir: self.dir.clone(),
            agent: self.agent.clone(),
            writer,
            max_transactions,
            used: 0,
            current: None,
            closed: false,
        }))
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.closed = true;
        Ok(())
    }
}

struct ParquetTransactionBatch {
    config: ParquetStoreConfig,
    columns: Vec<String>,
    table: String,
    dir: PathBuf,
    agent: String,
    writer: RecordWriter,
    max_transactions: usize,
    used: usize,
    current: Option<Vec<Row>>,
    closed: bool,
}

impl ParquetTransactionBatch {
    fn check_open(&self) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::ConnectionClosed);
        }
        Ok(())
    }
}

impl RemoteTransactionBatch for ParquetTransactionBatch {
    fn begin_next_transaction(&mut self) -> Result<(), StorageError> {
        self.check_open()?;
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
        let row = self.writer.decode(record)?;
        self.current
            .as_mut()
            .ok_or_else(|| StorageError::InvalidState("no transaction is open".to_string()))?
            .push(row);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.check_open()?;
        let rows = self
            .current
            .take()
            .ok_or_else(|| StorageError::InvalidState("no transaction is open".to_string()))?;
        if rows.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut metadata = HashMap::new();
        metadata.insert(META_COMMITTED_AT.to_string(), now.to_rfc3339());
        metadata.insert(META_AGENT.to_string(), self.agent.clone());
        metadata.insert(META_TABLE.to_string(), self.table.clone());

        // Timestamp first so file name order follows commit order
        let file_id = format!("{}-{}", now.format("%Y%m%d%H%M%S%9f"), Uuid::new_v4().simple());
        let path = writer::write_commit_file(
            &self.dir,
            &file_id,
            &self.columns,
            &rows,
            &metadata,
            &self.config,
        )?;
        log::debug!("committed {} rows to {}", rows.len(), path.display());
        Ok(())
    }

    fn abort(&mut self) -> Result<(), StorageError> {
        self.check_open()?;
        self.current = None;
        Ok(())
    }

    fn heartbeat(&mut self) -> Result<(), StorageError> {
        self.check_open()
    }

    fn remaining_transactions(&self) -> usize {
        self.max_transactions - self.used
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.closed = true;
        self.current = None;
        Ok(())
    }
}
