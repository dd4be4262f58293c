//! # Transactional batch writer
//!
//! This module streams events into a storage endpoint in bounded transaction
//! batches.
//!
//! ## Design Principles
//!
//! 1. **Bounded batches**: A [`TransactionBatch`] runs at most `max_transactions`
//!    transactions. The [`BatchWriter`] replaces it transparently when it runs
//!    out or fails.
//!
//! 2. **Explicit commits**: Writes become visible only on
//!    [`BatchWriter::flush`]. Closing a writer never commits.
//!
//! 3. **Deadlines everywhere**: Every storage call is dispatched through the
//!    shared [`CallTimeoutPool`](crate::executor::CallTimeoutPool) and bounded by
//!    a call deadline and, inside a transaction, a transaction deadline.
//!
//! 4. **Local state wins**: A failed or timed-out call aborts the batch locally,
//!    whatever the storage side eventually does with it.

mod batch;
mod batch_writer;
mod config;
mod error;
mod stats;


pub use batch::{BatchState, TransactionBatch};
pub use batch_writer::BatchWriter;
pub use config::WriterConfig;
pub use error::{BatchContext, WriterError};
pub use stats::WriterStats;
