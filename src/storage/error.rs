/// Errors reported by a storage endpoint
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error during file operations
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error from the Arrow library while building commit batches
    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),

    /// Error from the Parquet library while writing or reading commits
    #[error("Parquet error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),

    /// Error reading or writing table metadata
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The addressed table does not exist
    #[error("Table not found: {0}")]
    NoSuchTable(String),

    /// The table already exists
    #[error("Table already exists: {0}")]
    TableExists(String),

    /// The addressed partition does not exist and was not created
    #[error("Partition not found: {0}")]
    NoSuchPartition(String),

    /// Partition values do not match the table's partition keys
    #[error("Invalid partition for {table}: {reason}")]
    InvalidPartition {
        /// Qualified table name
        table: String,
        /// What is wrong with the supplied values
        reason: String,
    },

    /// A mapped field does not name a table column
    #[error("Invalid column: {0}")]
    InvalidColumn(String),

    /// The table's storage format cannot be resolved
    #[error("Unsupported table format: {0}")]
    UnsupportedFormat(String),

    /// A record could not be decoded by the storage-side deserializer
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// Call issued in a state the remote batch does not allow
    #[error("Invalid remote state: {0}")]
    InvalidState(String),

    /// The connection or batch was already closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failure injected by a test store
    #[error("Injected failure on {0}")]
    Injected(String),

    /// A remote handle was poisoned by a panicking call
    #[error("Remote handle poisoned")]
    Poisoned,
}
