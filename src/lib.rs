//! # tablesink - Transactional Batch Writer for Partitioned Tables
//!
//! `tablesink` streams opaque event records into a partitioned table through a
//! transactional streaming protocol. Events are serialized into records, written
//! into bounded batches of storage-side transactions, and become visible only
//! when a transaction commits.
//!
//! ## Key Features
//!
//! - **Bounded Transaction Batches**: Each batch runs at most `max_transactions`
//!   transactions. Exhausted or failed batches are replaced transparently.
//!
//! - **Call Deadlines**: Every blocking storage call runs on a shared worker pool
//!   under a per-call deadline and, inside a transaction, a per-transaction
//!   deadline, so a stalled backend cannot hang the pipeline.
//!
//! - **Pluggable Serializers**: Delimited text and JSON events, selected by alias
//!   and validated once at configure time.
//!
//! - **Storage Backends**: An in-process [`MemoryStore`](storage::MemoryStore)
//!   with fault injection, and a local [`ParquetStore`](storage::ParquetStore)
//!   where every commit becomes one Parquet file.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tablesink::prelude::*;
//!
//! let store = MemoryStore::new();
//! store.create_table(TableDescriptor::new(
//!     "logs",
//!     "alerts",
//!     vec!["id".to_string(), "msg".to_string()],
//! ))?;
//!
//! let mut context = Context::new();
//! context.put("serializer.fieldnames", "id,msg");
//! let serializer = Serializer::from_context("DELIMITED", &context)?;
//!
//! let pool = Arc::new(CallTimeoutPool::new(4)?);
//! let mut writer = BatchWriter::new(
//!     Endpoint::new("mem://local", "logs", "alerts", Vec::new()),
//!     WriterConfig::default(),
//!     pool,
//!     serializer,
//!     Arc::new(store.clone()),
//!     Arc::new(SinkCounter::new("alerts")),
//! )?;
//!
//! writer.write(&Event::from("1,disk full"))?;
//! writer.flush(true)?;
//! writer.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! The library is organized into the following modules:
//!
//! - [`event`]: Immutable event payloads with headers
//! - [`endpoint`]: Identifier of a target table partition
//! - [`serializer`]: Event to record translation, selected by alias
//! - [`storage`]: The storage endpoint traits and the bundled backends
//! - [`executor`]: Worker pool enforcing call and transaction deadlines
//! - [`writer`]: Transaction batches and the rotating batch writer
//! - [`metrics`]: Atomic counters shared by the writers of a sink
//!
//! ## Delivery Semantics
//!
//! | Operation | Visible rows |
//! |-----------|--------------|
//! | `write` | none until the next flush |
//! | `flush(false)` | all writes of the active transaction |
//! | `flush(true)` | as above, then the batch is replaced |
//! | `close` | none; the active transaction is aborted |
//!
//! A timed-out commit aborts its batch and is never retried by the writer: the
//! storage side may or may not have applied it, so the caller decides.

#![warn(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![allow(clippy::too_many_arguments)]

pub mod endpoint;
pub mod event;
pub mod executor;
pub mod metrics;
pub mod serializer;
pub mod storage;
pub mod writer;

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::endpoint::Endpoint;
    pub use crate::event::Event;
    pub use crate::executor::{CallTimeoutPool, Deadline, DeadlineKind, PoolConfig, PoolStats};
    pub use crate::metrics::{CounterSnapshot, SinkCounter};
    pub use crate::serializer::{Context, Serializer, SerializerError};
    pub use crate::storage::{
        MemoryStore, ParquetStore, ParquetStoreConfig, StorageEndpoint, StorageError,
        TableDescriptor,
    };
    pub use crate::writer::{
        BatchContext, BatchState, BatchWriter, TransactionBatch, WriterConfig, WriterError,
        WriterStats,
    };
}
