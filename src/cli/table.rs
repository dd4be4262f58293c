use anyhow::{Context, Result};
use log::info;
use std::path::PathBuf;

use tablesink::endpoint::Endpoint;
use tablesink::storage::{ParquetStore, TableDescriptor, NULL_MARKER};

/// Create a table in a local Parquet store
pub fn create(
    root: PathBuf,
    database: String,
    table: String,
    columns: Vec<String>,
    partition_keys: Vec<String>,
    format: String,
) -> Result<()> {
    let store = ParquetStore::open(&root)
        .with_context(|| format!("Failed to open store at {}", root.display()))?;
    let descriptor = TableDescriptor::new(database, table, columns)
        .partitioned_by(partition_keys)
        .with_format(format);

    store
        .create_table(&descriptor)
        .with_context(|| format!("Failed to create table {}", descriptor.qualified_name()))?;

    info!("Created table {} in {}", descriptor.qualified_name(), root.display());
    println!(
        "Created {} ({} columns, {} partition keys, format {})",
        descriptor.qualified_name(),
        descriptor.columns.len(),
        descriptor.partition_keys.len(),
        descriptor.format
    );
    Ok(())
}

/// Count committed rows in a table partition, optionally printing some
pub fn count(
    root: PathBuf,
    database: String,
    table: String,
    partition_values: Vec<String>,
    show: Option<usize>,
) -> Result<()> {
    if !root.exists() {
        anyhow::bail!("Store does not exist: {}", root.display());
    }
    let store = ParquetStore::open(&root)
        .with_context(|| format!("Failed to open store at {}", root.display()))?;
    let descriptor = store
        .describe(&database, &table)
        .with_context(|| format!("Failed to describe {}.{}", database, table))?;
    let endpoint = Endpoint::new(
        format!("file://{}", root.display()),
        database,
        table,
        partition_values,
    );

    let rows = store
        .committed_rows(&endpoint)
        .with_context(|| format!("Failed to count rows of {}", endpoint))?;
    println!("{}: {} committed rows", endpoint, rows);

    if let Some(limit) = show {
        let data = store
            .read_rows(&endpoint)
            .with_context(|| format!("Failed to read rows of {}", endpoint))?;
        println!("{}", descriptor.columns.join("\t"));
        for row in data.iter().take(limit) {
            let cells: Vec<&str> = row
                .iter()
                .map(|cell| cell.as_deref().unwrap_or(NULL_MARKER))
                .collect();
            println!("{}", cells.join("\t"));
        }
    }
    Ok(())
}
