use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::reader::{FileReader, SerializedFileReader};

use super::super::error::StorageError;
use super::super::record::Row;
use super::config::ParquetStoreConfig;

/// Prefix of committed data files; anything else in a partition directory is ignored
pub const COMMIT_FILE_PREFIX: &str = "part-";
const COMMIT_FILE_SUFFIX: &str = ".parquet";

/// Build the all-string schema for a table's data columns
fn commit_schema(columns: &[String]) -> Arc<Schema> {
    let fields: Vec<Field> = columns
        .iter()
        .map(|name| Field::new(name, DataType::Utf8, true))
        .collect();
    Arc::new(Schema::new(fields))
}

/// Write one committed transaction as a Parquet file.
///
/// The file is written under a temporary name in `dir` and renamed into place,
/// so readers never observe a partially written commit.
pub(super) fn write_commit_file(
    dir: &Path,
    file_id: &str,
    columns: &[String],
    rows: &[Row],
    metadata: &HashMap<String, String>,
    config: &ParquetStoreConfig,
) -> Result<PathBuf, StorageError> {
    let schema = commit_schema(columns);
    let arrays: Vec<ArrayRef> = (0..columns.len())
        .map(|index| {
            let values: StringArray = rows
                .iter()
                .map(|row| row.get(index).and_then(|value| value.as_deref()))
                .collect();
            Arc::new(values) as ArrayRef
        })
        .collect();
    let batch = RecordBatch::try_new(schema.clone(), arrays)?;

    let mut staging = tempfile::Builder::new()
        .prefix(".commit-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    let props = config.to_writer_properties(metadata);
    let mut writer = ArrowWriter::try_new(staging.as_file_mut(), schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    let path = dir.join(format!("{}{}{}", COMMIT_FILE_PREFIX, file_id, COMMIT_FILE_SUFFIX));
    staging
        .persist(&path)
        .map_err(|e| StorageError::IoError(e.error))?;
    Ok(path)
}

/// Committed data files in a partition directory, sorted by name
pub(super) fn commit_files(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_commit = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with(COMMIT_FILE_PREFIX) && name.ends_with(COMMIT_FILE_SUFFIX))
            .unwrap_or(false);
        if is_commit {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Row count from the Parquet footer without decoding data pages
pub(super) fn count_rows(path: &Path) -> Result<u64, StorageError> {
    let reader = SerializedFileReader::new(File::open(path)?)?;
    Ok(reader.metadata().file_metadata().num_rows().max(0) as u64)
}

/// Decode every row of a commit file
pub(super) fn read_rows(path: &Path) -> Result<Vec<Row>, StorageError> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?.build()?;
    let mut rows = Vec::new();

    for batch in reader {
        let batch = batch?;
        let columns: Vec<&StringArray> = batch
            .columns()
            .iter()
            .map(|column| {
                column.as_any().downcast_ref::<StringArray>().ok_or_else(|| {
                    StorageError::MalformedRecord(format!(
                        "{}: expected string column, found {}",
                        path.display(),
                        column.data_type()
                    ))
                })
            })
            .collect::<Result<_, _>>()?;

        for index in 0..batch.num_rows() {
            rows.push(
                columns
                    .iter()
                    .map(|column| {
                        if column.is_null(index) {
                            None
                        } else {
                            Some(column.value(index).to_string())
                        }
                    })
                    .collect(),
            );
        }
    }
    Ok(rows)
}
