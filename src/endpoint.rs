//! Target table identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies exactly one partition of a table in a storage endpoint.
///
/// An empty `partition_values` sequence addresses an unpartitioned table.
/// Endpoints are immutable once built; a writer holds one for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    storage_uri: String,
    database: String,
    table: String,
    #[serde(default)]
    partition_values: Vec<String>,
}

impl Endpoint {
    /// Create a new endpoint
    pub fn new(
        storage_uri: impl Into<String>,
        database: impl Into<String>,
        table: impl Into<String>,
        partition_values: Vec<String>,
    ) -> Self {
        Self {
            storage_uri: storage_uri.into(),
            database: database.into(),
            table: table.into(),
            partition_values,
        }
    }

    /// Storage URI of the endpoint
    pub fn storage_uri(&self) -> &str {
        &self.storage_uri
    }

    /// Database name
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Table name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Ordered partition values (empty for unpartitioned tables)
    pub fn partition_values(&self) -> &[String] {
        &self.partition_values
    }

    /// Whether this endpoint addresses a partition rather than a whole table
    pub fn is_partitioned(&self) -> bool {
        !self.partition_values.is_empty()
    }

    /// `database.table`
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}.{}", self.storage_uri, self.database, self.table)?;
        if self.is_partitioned() {
            write!(f, "[{}]", self.partition_values.join(","))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_partitioned() {
        let endpoint = Endpoint::new(
            "mem://local",
            "testing",
            "alerts",
            vec!["Asia".to_string(), "India".to_string()],
        );
        assert_eq!(endpoint.to_string(), "mem://local/testing.alerts[Asia,India]");
        assert!(endpoint.is_partitioned());
        assert_eq!(endpoint.qualified_table(), "testing.alerts");
    }

    #[test]
    fn test_display_unpartitioned() {
        let endpoint = Endpoint::new("mem://local", "testing", "alerts", Vec::new());
        assert_eq!(endpoint.to_string(), "mem://local/testing.alerts");
        assert!(!endpoint.is_partitioned());
    }

    #[test]
    fn test_deserialize_without_partitions() {
        let endpoint: Endpoint = serde_json::from_str(
            r#"{"storage_uri":"/tmp/x","database":"db","table":"t"}"#,
        )
        .unwrap();
        assert!(endpoint.partition_values().is_empty());
    }
}
