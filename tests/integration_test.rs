//! Integration tests for tablesink
//!
//! These tests drive the batch writer end to end against a local Parquet store.

use std::sync::Arc;
use std::thread;

use tablesink::prelude::*;
use tablesink::storage::local::COMMIT_FILE_PREFIX;
use tempfile::tempdir;

fn alerts() -> TableDescriptor {
    TableDescriptor::new("testing", "alerts", vec!["id".into(), "msg".into()])
        .partitioned_by(vec!["continent".into(), "country".into()])
}

fn endpoint(store: &ParquetStore, country: &str) -> Endpoint {
    Endpoint::new(
        format!("file://{}", store.root().display()),
        "testing",
        "alerts",
        vec!["Asia".to_string(), country.to_string()],
    )
}

fn delimited(pairs: &[(&str, &str)]) -> Serializer {
    let context: Context = pairs.iter().copied().collect();
    Serializer::from_context("DELIMITED", &context).unwrap()
}

fn open_writer(
    store: &ParquetStore,
    endpoint: Endpoint,
    config: WriterConfig,
    serializer: Serializer,
    pool: &Arc<CallTimeoutPool>,
) -> BatchWriter {
    BatchWriter::new(
        endpoint,
        config,
        Arc::clone(pool),
        serializer,
        Arc::new(store.clone()),
        Arc::new(SinkCounter::new("it")),
    )
    .unwrap()
}

fn commit_files(store: &ParquetStore, endpoint: &Endpoint) -> usize {
    let dir = store
        .partition_dir(&alerts(), endpoint.partition_values())
        .unwrap();
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.file_name().to_string_lossy().starts_with(COMMIT_FILE_PREFIX))
                .count()
        })
        .unwrap_or(0)
}

/// Test the complete write-flush-read cycle
#[test]
fn test_write_flush_read_cycle() {
    let dir = tempdir().unwrap();
    let store = ParquetStore::open(dir.path()).unwrap();
    store.create_table(&alerts()).unwrap();
    let pool = Arc::new(CallTimeoutPool::new(2).unwrap());
    let endpoint = endpoint(&store, "India");

    let mut writer = open_writer(
        &store,
        endpoint.clone(),
        WriterConfig::default(),
        delimited(&[("serializer.fieldnames", "id,,msg,")]),
        &pool,
    );
    writer.write(&Event::from("1,xyz,Hello world,abc")).unwrap();
    writer.write(&Event::from("2,xyz,Goodbye,abc")).unwrap();
    assert_eq!(store.committed_rows(&endpoint).unwrap(), 0);

    writer.flush(true).unwrap();
    writer.close().unwrap();

    let rows = store.read_rows(&endpoint).unwrap();
    assert_eq!(
        rows,
        vec![
            vec![Some("1".to_string()), Some("Hello world".to_string())],
            vec![Some("2".to_string()), Some("Goodbye".to_string())],
        ]
    );
    assert_eq!(commit_files(&store, &endpoint), 1);
}

/// Rotation across batches leaves one file per committed transaction
#[test]
fn test_rotation_with_parquet_store() {
    let dir = tempdir().unwrap();
    let store = ParquetStore::open(dir.path()).unwrap();
    store.create_table(&alerts()).unwrap();
    let pool = Arc::new(CallTimeoutPool::new(2).unwrap());
    let endpoint = endpoint(&store, "Japan");

    let config = WriterConfig {
        max_transactions: 2,
        ..WriterConfig::default()
    };
    let mut writer = open_writer(
        &store,
        endpoint.clone(),
        config,
        delimited(&[("serializer.fieldnames", "id,msg")]),
        &pool,
    );
    for i in 0..5 {
        writer.write(&Event::new(format!("{},row {}", i, i))).unwrap();
        writer.flush(false).unwrap();
    }
    assert_eq!(writer.batches_opened(), 3);
    writer.close().unwrap();

    assert_eq!(store.committed_rows(&endpoint).unwrap(), 5);
    assert_eq!(commit_files(&store, &endpoint), 5);

    // Files sort in commit order
    let ids: Vec<_> = store
        .read_rows(&endpoint)
        .unwrap()
        .into_iter()
        .map(|row| row[0].clone().unwrap())
        .collect();
    assert_eq!(ids, vec!["0", "1", "2", "3", "4"]);
}

/// The storage side splits on the serde separator, so values containing it spill over
#[test]
fn test_serde_separator_is_used_storage_side() {
    let dir = tempdir().unwrap();
    let store = ParquetStore::open(dir.path()).unwrap();
    store.create_table(&alerts()).unwrap();
    let pool = Arc::new(CallTimeoutPool::new(2).unwrap());
    let endpoint = endpoint(&store, "Nepal");

    let mut writer = open_writer(
        &store,
        endpoint.clone(),
        WriterConfig::default(),
        delimited(&[
            ("serializer.fieldnames", "id,msg"),
            ("serializer.serdeSeparator", "|"),
        ]),
        &pool,
    );
    writer.write(&Event::from("1,plain")).unwrap();
    writer.write(&Event::from("2,left|right")).unwrap();
    writer.flush(true).unwrap();
    writer.close().unwrap();

    let rows = store.read_rows(&endpoint).unwrap();
    assert_eq!(rows[0], vec![Some("1".to_string()), Some("plain".to_string())]);
    assert_eq!(rows[1], vec![Some("2".to_string()), Some("left".to_string())]);
}

/// Closing without a flush leaves nothing on disk
#[test]
fn test_close_without_flush_discards() {
    let dir = tempdir().unwrap();
    let store = ParquetStore::open(dir.path()).unwrap();
    store.create_table(&alerts()).unwrap();
    let pool = Arc::new(CallTimeoutPool::new(2).unwrap());
    let endpoint = endpoint(&store, "Laos");

    let mut writer = open_writer(
        &store,
        endpoint.clone(),
        WriterConfig::default(),
        delimited(&[("serializer.fieldnames", "id,msg")]),
        &pool,
    );
    for i in 0..10 {
        writer.write(&Event::new(format!("{},x", i))).unwrap();
    }
    writer.close().unwrap();

    assert_eq!(store.committed_rows(&endpoint).unwrap(), 0);
    assert_eq!(commit_files(&store, &endpoint), 0);
}

/// Writers on different partitions share one call pool
#[test]
fn test_concurrent_writers_share_pool() {
    let dir = tempdir().unwrap();
    let store = ParquetStore::open(dir.path()).unwrap();
    store.create_table(&alerts()).unwrap();
    let pool = Arc::new(CallTimeoutPool::new(3).unwrap());
    let counter = Arc::new(SinkCounter::new("shared"));

    let countries = ["India", "China", "Japan", "Korea"];
    let handles: Vec<_> = countries
        .iter()
        .map(|country| {
            let store = store.clone();
            let pool = Arc::clone(&pool);
            let counter = Arc::clone(&counter);
            let endpoint = endpoint(&store, country);
            thread::spawn(move || {
                let config = WriterConfig {
                    max_transactions: 3,
                    ..WriterConfig::default()
                };
                let mut writer = BatchWriter::new(
                    endpoint,
                    config,
                    pool,
                    delimited(&[("serializer.fieldnames", "id,msg")]),
                    Arc::new(store),
                    counter,
                )
                .unwrap();
                for i in 0..50 {
                    writer.write(&Event::new(format!("{},event {}", i, i))).unwrap();
                    if i % 10 == 9 {
                        writer.flush(false).unwrap();
                    }
                }
                writer.flush(true).unwrap();
                writer.close().unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for country in countries {
        assert_eq!(store.committed_rows(&endpoint(&store, country)).unwrap(), 50);
    }
    let snapshot = counter.snapshot();
    assert_eq!(snapshot.events_committed, 200);
    assert_eq!(snapshot.transactions_committed, 20);
    assert_eq!(snapshot.connections_created, snapshot.connections_closed);
    assert_eq!(snapshot.batches_opened, snapshot.batches_closed);
}

/// A missing partition fails when auto-create is off
#[test]
fn test_missing_partition_without_auto_create() {
    let dir = tempdir().unwrap();
    let store = ParquetStore::open(dir.path()).unwrap();
    store.create_table(&alerts()).unwrap();
    let pool = Arc::new(CallTimeoutPool::new(1).unwrap());

    let config = WriterConfig {
        auto_create_partitions: false,
        ..WriterConfig::default()
    };
    let err = BatchWriter::new(
        endpoint(&store, "Bhutan"),
        config,
        pool,
        delimited(&[("serializer.fieldnames", "id,msg")]),
        Arc::new(store.clone()),
        Arc::new(SinkCounter::new("it")),
    )
    .unwrap_err();
    assert!(matches!(err, WriterError::Transport { .. }));
    assert!(!err.is_timeout());
}
