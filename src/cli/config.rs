//! TOML configuration for the `ingest` command.
//!
//! Instead of passing many CLI flags, users can describe a sink in a file:
//!
//! ```toml
//! # tablesink.toml
//! [sink]
//! storage_root = "warehouse"
//! database = "logs"
//! table = "alerts"
//! partition_values = ["2024-01-01"]
//! max_transactions = 100
//! flush_every = 1000
//! call_timeout_secs = 10
//!
//! [serializer]
//! type = "DELIMITED"
//! fieldnames = "id,,msg"
//! delimiter = ","
//! ```
//!
//! Every key of `[serializer]` other than `type` becomes a `serializer.<key>`
//! option.

use anyhow::{Context as _, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tablesink::serializer::Context;

/// Root configuration structure for tablesink.toml files.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Sink target and writer settings.
    #[serde(default)]
    pub sink: SinkConfig,

    /// Serializer selection and options.
    #[serde(default)]
    pub serializer: SerializerConfig,
}

/// Target and writer settings.
#[derive(Debug, Default, Deserialize)]
pub struct SinkConfig {
    /// Root directory of the local Parquet store.
    pub storage_root: Option<PathBuf>,

    /// Database name.
    pub database: Option<String>,

    /// Table name.
    pub table: Option<String>,

    /// Partition values, in partition key order.
    pub partition_values: Option<Vec<String>>,

    /// Transactions per batch.
    pub max_transactions: Option<usize>,

    /// Events per committed transaction.
    pub flush_every: Option<usize>,

    /// Per-call deadline in seconds.
    pub call_timeout_secs: Option<u64>,

    /// Per-transaction deadline in seconds.
    pub transaction_timeout_secs: Option<u64>,

    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: Option<u64>,

    /// Create missing partitions on connect.
    pub auto_create_partitions: Option<bool>,

    /// Agent id reported to the store.
    pub agent: Option<String>,

    /// Worker threads in the call pool.
    pub threads: Option<usize>,
}

/// Serializer alias and its options.
#[derive(Debug, Default, Deserialize)]
pub struct SerializerConfig {
    /// Serializer alias (DELIMITED or JSON).
    #[serde(rename = "type")]
    pub alias: Option<String>,

    /// Remaining keys, passed through as `serializer.<key>`.
    #[serde(flatten)]
    pub options: BTreeMap<String, String>,
}

impl SerializerConfig {
    /// Serializer context built from the options.
    pub fn context(&self) -> Context {
        self.options
            .iter()
            .map(|(key, value)| (format!("serializer.{}", key), value.clone()))
            .collect()
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
            [sink]
            storage_root = "warehouse"
            database = "logs"
            table = "alerts"
            partition_values = ["2024-01-01"]
            max_transactions = 10
            flush_every = 500
            call_timeout_secs = 5

            [serializer]
            type = "DELIMITED"
            fieldnames = "id,,msg"
            serdeSeparator = "|"
        "#;

        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.sink.database.as_deref(), Some("logs"));
        assert_eq!(
            config.sink.partition_values,
            Some(vec!["2024-01-01".to_string()])
        );
        assert_eq!(config.sink.max_transactions, Some(10));
        assert_eq!(config.sink.flush_every, Some(500));
        assert_eq!(config.serializer.alias.as_deref(), Some("DELIMITED"));

        let context = config.serializer.context();
        assert_eq!(context.get("serializer.fieldnames"), Some("id,,msg"));
        assert_eq!(context.get("serializer.serdeSeparator"), Some("|"));
        assert!(!context.contains("serializer.type"));
    }

    #[test]
    fn test_partial_config() {
        let toml = r#"
            [sink]
            table = "alerts"
        "#;

        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.sink.table.as_deref(), Some("alerts"));
        assert_eq!(config.sink.max_transactions, None);
        assert!(config.serializer.context().is_empty());
    }

    #[test]
    fn test_empty_config() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config.sink.database, None);
        assert_eq!(config.serializer.alias, None);
    }
}
