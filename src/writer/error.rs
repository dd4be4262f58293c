use std::fmt;
use std::time::Duration;

use crate::executor::DeadlineKind;
use crate::storage::StorageError;

use super::batch::BatchState;

/// Errors that can occur while writing to a storage endpoint
#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    /// Invalid or missing serializer or writer configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The table format cannot be resolved for the configured serializer
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// An event body could not be turned into a record
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A dispatched storage call exceeded its deadline
    #[error(
        "Call '{call}' on {endpoint}{} exceeded its {kind} deadline after {elapsed:?}",
        batch_suffix(.batch)
    )]
    CallTimeout {
        /// Name of the storage call
        call: &'static str,
        /// Which deadline fired
        kind: DeadlineKind,
        /// Time spent waiting before giving up
        elapsed: Duration,
        /// Endpoint the call was made against
        endpoint: String,
        /// Batch the call ran on, if any
        batch: Option<BatchContext>,
    },

    /// The batch has no transactions left; consumed by rotation
    #[error("Transaction batch exhausted")]
    BatchExhausted,

    /// The storage endpoint rejected or failed a call
    #[error("Transport error on {endpoint}{}: {source}", batch_suffix(.batch))]
    Transport {
        /// Endpoint the call was made against
        endpoint: String,
        /// Underlying storage error
        #[source]
        source: StorageError,
        /// Batch the call ran on, if any
        batch: Option<BatchContext>,
    },

    /// Operation attempted on a closed writer
    #[error("Writer for {0} is closed")]
    WriterClosed(String),

    /// Batch operation not allowed in the batch's current state
    #[error("Operation '{operation}' not allowed in batch state {state}")]
    InvalidState {
        /// Attempted operation
        operation: &'static str,
        /// State the batch was in
        state: BatchState,
    },

    /// The call pool has been shut down
    #[error("Call pool is shut down")]
    PoolShutdown,

    /// A dispatched call panicked on its worker
    #[error("Call '{0}' panicked")]
    CallPanicked(&'static str),
}

impl WriterError {
    /// Whether this error is a call timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::CallTimeout { .. })
    }

    /// Whether retrying the operation later may succeed.
    ///
    /// Timeouts and transport failures are retryable; configuration, data and
    /// contract errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CallTimeout { .. } | Self::Transport { .. } | Self::CallPanicked(_)
        )
    }

    pub(crate) fn transport(endpoint: impl ToString, source: StorageError) -> Self {
        Self::Transport {
            endpoint: endpoint.to_string(),
            source,
            batch: None,
        }
    }

    /// Endpoint a failed remote call was made against
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Self::CallTimeout { endpoint, .. } | Self::Transport { endpoint, .. } => {
                Some(endpoint)
            }
            _ => None,
        }
    }

    /// Batch a failed remote call ran on
    pub fn batch(&self) -> Option<&BatchContext> {
        match self {
            Self::CallTimeout { batch, .. } | Self::Transport { batch, .. } => batch.as_ref(),
            _ => None,
        }
    }

    /// Record the batch a remote call ran on
    pub(crate) fn with_batch(mut self, context: BatchContext) -> Self {
        if let Self::CallTimeout { batch, .. } | Self::Transport { batch, .. } = &mut self {
            *batch = Some(context);
        }
        self
    }
}

/// Identity and state of the batch a failed call ran on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchContext {
    /// Batch id, unique per writer
    pub id: u64,
    /// Batch state when the call was dispatched
    pub state: BatchState,
}

impl fmt::Display for BatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch {} ({})", self.id, self.state)
    }
}

fn batch_suffix(batch: &Option<BatchContext>) -> String {
    batch
        .map(|context| format!(" [{}]", context))
        .unwrap_or_default()
}
