//! Endpoint-bound record writers.
//!
//! A [`RecordWriter`] is produced by a serializer for one table and handed to the
//! storage side when a transaction batch is fetched. It describes how the storage
//! side turns a raw record into a table row.
//!
//! ## Delimited records
//!
//! The input line is split on the input delimiter. Each field is placed at the
//! table column named by the field-to-column mapping (empty names drop the field),
//! and the reordered fields are joined with the serde separator. The storage-side
//! deserializer then splits that line on the serde separator, so a field value
//! containing the serde separator spills into the following columns. Unmapped
//! columns are written as the `\N` null marker.

use std::collections::HashMap;

use serde_json::Value;

use super::error::StorageError;
use super::{TableDescriptor, TableFormat};

/// A decoded table row, one entry per data column (partition columns excluded)
pub type Row = Vec<Option<String>>;

/// Marker the storage-side text deserializer reads as NULL
pub const NULL_MARKER: &str = "\\N";

/// Record decoder bound to one table
#[derive(Debug, Clone)]
pub enum RecordWriter {
    /// Delimited text records
    Delimited(DelimitedRecordWriter),
    /// JSON object records
    Json(JsonRecordWriter),
}

impl RecordWriter {
    /// Decode a raw record into a row in table column order
    pub fn decode(&self, record: &[u8]) -> Result<Row, StorageError> {
        match self {
            Self::Delimited(writer) => writer.decode(record),
            Self::Json(writer) => writer.decode(record),
        }
    }

    /// Table columns this writer produces values for
    pub fn columns(&self) -> &[String] {
        match self {
            Self::Delimited(writer) => &writer.columns,
            Self::Json(writer) => &writer.columns,
        }
    }
}

fn resolve_format(descriptor: &TableDescriptor) -> Result<TableFormat, StorageError> {
    if descriptor.columns.is_empty() {
        return Err(StorageError::UnsupportedFormat(format!(
            "{} has no columns",
            descriptor.qualified_name()
        )));
    }
    TableFormat::resolve(&descriptor.format).ok_or_else(|| {
        StorageError::UnsupportedFormat(format!(
            "{} uses unknown format '{}'",
            descriptor.qualified_name(),
            descriptor.format
        ))
    })
}

/// Delimited text decoder
#[derive(Debug, Clone)]
pub struct DelimitedRecordWriter {
    delimiter: String,
    serde_separator: char,
    /// Input field position -> table column position
    field_to_table: Vec<Option<usize>>,
    columns: Vec<String>,
}

impl DelimitedRecordWriter {
    /// Bind a field-to-column mapping to a table.
    ///
    /// Column names match case-insensitively. Fails with
    /// [`StorageError::InvalidColumn`] when a non-empty field name is not a column
    /// or names a column twice.
    pub fn bind(
        field_to_column: &[String],
        delimiter: &str,
        serde_separator: char,
        descriptor: &TableDescriptor,
    ) -> Result<Self, StorageError> {
        resolve_format(descriptor)?;

        let mut used = vec![false; descriptor.columns.len()];
        let mut field_to_table = Vec::with_capacity(field_to_column.len());
        for name in field_to_column {
            if name.is_empty() {
                field_to_table.push(None);
                continue;
            }
            let position = descriptor
                .column_position(name)
                .ok_or_else(|| {
                    StorageError::InvalidColumn(format!(
                        "'{}' is not a column of {}",
                        name,
                        descriptor.qualified_name()
                    ))
                })?;
            if used[position] {
                return Err(StorageError::InvalidColumn(format!(
                    "column '{}' is mapped more than once",
                    name
                )));
            }
            used[position] = true;
            field_to_table.push(Some(position));
        }

        Ok(Self {
            delimiter: delimiter.to_string(),
            serde_separator,
            field_to_table,
            columns: descriptor.columns.clone(),
        })
    }

    /// Separator used by the storage-side deserializer
    pub fn serde_separator(&self) -> char {
        self.serde_separator
    }

    /// Reorder the input fields into table column order, joined by the serde separator
    pub fn reorder(&self, line: &str) -> String {
        let mut slots: Vec<Option<&str>> = vec![None; self.columns.len()];
        for (field, value) in line.split(self.delimiter.as_str()).enumerate() {
            if let Some(Some(column)) = self.field_to_table.get(field) {
                slots[*column] = Some(value);
            }
        }

        let separator = self.serde_separator.to_string();
        slots
            .iter()
            .map(|slot| slot.unwrap_or(NULL_MARKER))
            .collect::<Vec<_>>()
            .join(&separator)
    }

    /// Split a serde-separated line into a row
    pub fn deserialize(&self, line: &str) -> Row {
        let mut row: Row = line
            .split(self.serde_separator)
            .take(self.columns.len())
            .map(|value| {
                if value == NULL_MARKER {
                    None
                } else {
                    Some(value.to_string())
                }
            })
            .collect();
        row.resize(self.columns.len(), None);
        row
    }

    fn decode(&self, record: &[u8]) -> Result<Row, StorageError> {
        let line = std::str::from_utf8(record)
            .map_err(|e| StorageError::MalformedRecord(format!("record is not UTF-8: {}", e)))?;
        let line = line.strip_suffix('\n').unwrap_or(line);
        Ok(self.deserialize(&self.reorder(line)))
    }
}

/// JSON object decoder; top-level keys match columns case-insensitively
#[derive(Debug, Clone)]
pub struct JsonRecordWriter {
    columns: Vec<String>,
}

impl JsonRecordWriter {
    /// Bind to a table
    pub fn bind(descriptor: &TableDescriptor) -> Result<Self, StorageError> {
        resolve_format(descriptor)?;
        Ok(Self {
            columns: descriptor.columns.clone(),
        })
    }

    fn decode(&self, record: &[u8]) -> Result<Row, StorageError> {
        let object: serde_json::Map<String, Value> = serde_json::from_slice(record)
            .map_err(|e| StorageError::MalformedRecord(format!("not a JSON object: {}", e)))?;
        let lowered: HashMap<String, Value> = object
            .into_iter()
            .map(|(key, value)| (key.to_lowercase(), value))
            .collect();

        Ok(self
            .columns
            .iter()
            .map(|column| match lowered.get(&column.to_lowercase()) {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) => Some(s.clone()),
                Some(other) => Some(other.to_string()),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alerts() -> TableDescriptor {
        TableDescriptor::new("testing", "alerts", vec!["id".into(), "msg".into()])
            .partitioned_by(vec!["continent".into(), "country".into()])
    }

    fn mapping(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_reorder_skips_unmapped_fields() {
        let writer =
            DelimitedRecordWriter::bind(&mapping(&["id", "", "msg", ""]), ",", '\x01', &alerts())
                .unwrap();

        assert_eq!(writer.reorder("1,xyz,Hello world,abc"), "1\x01Hello world");
        let row = RecordWriter::Delimited(writer)
            .decode(b"1,xyz,Hello world,abc")
            .unwrap();
        assert_eq!(row, vec![Some("1".to_string()), Some("Hello world".to_string())]);
    }

    #[test]
    fn test_missing_fields_become_null() {
        let writer =
            DelimitedRecordWriter::bind(&mapping(&["id", "", "msg"]), ",", ',', &alerts()).unwrap();
        let row = RecordWriter::Delimited(writer).decode(b"7").unwrap();
        assert_eq!(row, vec![Some("7".to_string()), None]);
    }

    #[test]
    fn test_serde_separator_inside_value_spills() {
        let writer =
            DelimitedRecordWriter::bind(&mapping(&["msg", "id"]), "|", ',', &alerts()).unwrap();
        // Field order is reversed relative to the table
        assert_eq!(writer.reorder("a,b|9"), "9,a,b");
        assert_eq!(
            writer.deserialize("9,a,b"),
            vec![Some("9".to_string()), Some("a".to_string())]
        );
    }

    #[test]
    fn test_bind_rejects_unknown_column() {
        let err = DelimitedRecordWriter::bind(&mapping(&["id", "nope"]), ",", ',', &alerts())
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidColumn(_)));
    }

    #[test]
    fn test_bind_rejects_duplicate_column() {
        let err = DelimitedRecordWriter::bind(&mapping(&["id", "ID"]), ",", ',', &alerts())
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidColumn(_)));
    }

    #[test]
    fn test_bind_rejects_unknown_format() {
        let mut descriptor = alerts();
        descriptor.format = "orc-acid".to_string();
        let err = JsonRecordWriter::bind(&descriptor).unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_json_decode() {
        let writer = RecordWriter::Json(JsonRecordWriter::bind(&alerts()).unwrap());
        let row = writer.decode(br#"{"ID": 3, "msg": "hi", "extra": true}"#).unwrap();
        assert_eq!(row, vec![Some("3".to_string()), Some("hi".to_string())]);

        let row = writer.decode(br#"{"msg": null}"#).unwrap();
        assert_eq!(row, vec![None, None]);

        assert!(matches!(
            writer.decode(b"[1,2]"),
            Err(StorageError::MalformedRecord(_))
        ));
    }
}
