use std::time::Duration;

use super::error::WriterError;

/// Configuration for a [`BatchWriter`](super::BatchWriter)
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Transactions per batch before the writer rotates to a new batch
    pub max_transactions: usize,

    /// Create the target partition on connect if it does not exist
    pub auto_create_partitions: bool,

    /// Deadline for a single storage call
    pub call_timeout: Duration,

    /// Deadline for all calls made inside one open transaction
    pub transaction_timeout: Duration,

    /// Minimum interval between heartbeats on the live batch
    pub heartbeat_interval: Duration,

    /// Process or source identifier reported to the storage side
    pub agent: String,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_transactions: 100,
            auto_create_partitions: true,
            call_timeout: Duration::from_secs(10),
            // Storage-side transactions typically expire after 5 minutes
            transaction_timeout: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(240),
            agent: "tablesink".to_string(),
        }
    }
}

impl WriterConfig {
    /// Small batches and short deadlines, for latency-sensitive pipelines
    pub fn low_latency() -> Self {
        Self {
            max_transactions: 10,
            call_timeout: Duration::from_secs(2),
            transaction_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(15),
            ..Self::default()
        }
    }

    /// Large batches and generous deadlines, for bulk loads
    pub fn bulk() -> Self {
        Self {
            max_transactions: 1000,
            call_timeout: Duration::from_secs(60),
            transaction_timeout: Duration::from_secs(600),
            ..Self::default()
        }
    }

    /// Check the configuration before any connection is made
    pub fn validate(&self) -> Result<(), WriterError> {
        if self.max_transactions == 0 {
            return Err(WriterError::Configuration(
                "max_transactions must be greater than zero".to_string(),
            ));
        }
        if self.call_timeout.is_zero() {
            return Err(WriterError::Configuration(
                "call_timeout must be greater than zero".to_string(),
            ));
        }
        if self.transaction_timeout.is_zero() {
            return Err(WriterError::Configuration(
                "transaction_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        assert!(WriterConfig::default().validate().is_ok());
        assert!(WriterConfig::low_latency().validate().is_ok());
        assert!(WriterConfig::bulk().validate().is_ok());
    }

    #[test]
    fn test_zero_transactions_rejected() {
        let config = WriterConfig {
            max_transactions: 0,
            ..WriterConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(WriterError::Configuration(_))
        ));
    }
}
