use bytes::Bytes;

use crate::event::Event;
use crate::storage::{DelimitedRecordWriter, TableDescriptor, TableFormat};

use super::{Context, SerializerError};

/// Input field delimiter
pub const DELIMITER_KEY: &str = "serializer.delimiter";
/// Comma-separated field-to-column mapping
pub const FIELD_NAMES_KEY: &str = "serializer.fieldnames";
/// Separator the storage-side deserializer splits on
pub const SERDE_SEPARATOR_KEY: &str = "serializer.serdeSeparator";

/// Default input field delimiter
pub const DEFAULT_DELIMITER: &str = ",";
/// Serde separator used when the delimiter is longer than one character
pub const DEFAULT_SERDE_SEPARATOR: char = '\x01';

/// Split a configured field-name list.
///
/// The input is trimmed and split on `,`. Every token is kept, including empty
/// ones, so `"id,,msg,"` yields four names; an empty name skips that input field.
pub fn parse_field_names(raw: &str) -> Vec<String> {
    raw.trim().split(',').map(str::to_string).collect()
}

/// Delimited text serializer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelimitedSerializer {
    delimiter: String,
    field_to_column: Vec<String>,
    serde_separator: char,
}

impl DelimitedSerializer {
    /// Read and validate options from the context
    pub fn from_context(context: &Context) -> Result<Self, SerializerError> {
        let mut delimiter = context.get_or(DELIMITER_KEY, DEFAULT_DELIMITER).to_string();
        if delimiter.is_empty() {
            delimiter = DEFAULT_DELIMITER.to_string();
        }

        let field_names = context.get(FIELD_NAMES_KEY).ok_or_else(|| {
            SerializerError::Configuration(format!(
                "{} not specified for the delimited serializer",
                FIELD_NAMES_KEY
            ))
        })?;

        let serde_separator = match context.get(SERDE_SEPARATOR_KEY) {
            Some(raw) => single_char(raw).ok_or_else(|| {
                SerializerError::Configuration(format!(
                    "{} must be exactly one character, got '{}'",
                    SERDE_SEPARATOR_KEY, raw
                ))
            })?,
            None => single_char(&delimiter).unwrap_or(DEFAULT_SERDE_SEPARATOR),
        };

        Ok(Self {
            delimiter,
            field_to_column: parse_field_names(field_names),
            serde_separator,
        })
    }

    /// Input field delimiter
    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// Input field position to table column name; empty names skip the field
    pub fn field_to_column(&self) -> &[String] {
        &self.field_to_column
    }

    /// Separator the storage side splits on
    pub fn serde_separator(&self) -> char {
        self.serde_separator
    }

    pub(super) fn bind(
        &self,
        descriptor: &TableDescriptor,
    ) -> Result<DelimitedRecordWriter, SerializerError> {
        match TableFormat::resolve(&descriptor.format) {
            Some(TableFormat::Text) | Some(TableFormat::Parquet) => {}
            _ => {
                return Err(SerializerError::UnsupportedFormat(format!(
                    "{} with format '{}' cannot take delimited records",
                    descriptor.qualified_name(),
                    descriptor.format
                )))
            }
        }
        DelimitedRecordWriter::bind(
            &self.field_to_column,
            &self.delimiter,
            self.serde_separator,
            descriptor,
        )
        .map_err(|e| SerializerError::UnsupportedFormat(e.to_string()))
    }

    /// Check the body is text and forward it unmodified; the storage side
    /// does the splitting
    pub(super) fn to_record(&self, event: &Event) -> Result<Bytes, SerializerError> {
        std::str::from_utf8(event.body())
            .map_err(|e| SerializerError::Serialization(format!("body is not UTF-8: {}", e)))?;
        Ok(event.body().clone())
    }
}

fn single_char(s: &str) -> Option<char> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}
