//! # Event serializers
//!
//! A [`Serializer`] is chosen once, by alias, when a sink is configured. It
//! validates its options from a [`Context`], binds a [`RecordWriter`] to the
//! target table, and turns each [`Event`] into the record bytes written into a
//! transaction.
//!
//! | Alias | Record | Table formats |
//! |-------|--------|---------------|
//! | `DELIMITED` | event body, split storage-side | text, parquet |
//! | `JSON` | event body, must be a JSON object | json, parquet |

mod context;
pub mod delimited;
pub mod json;

use bytes::Bytes;

use crate::endpoint::Endpoint;
use crate::event::Event;
use crate::storage::{RecordWriter, TableDescriptor};
use crate::writer::{TransactionBatch, WriterError};

pub use context::Context;
pub use delimited::{parse_field_names, DelimitedSerializer};
pub use json::JsonSerializer;

/// Errors raised while configuring or running a serializer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SerializerError {
    /// Missing or invalid serializer option, or unknown alias
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The table cannot take records from this serializer
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// An event body could not be turned into a record
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<SerializerError> for WriterError {
    fn from(err: SerializerError) -> Self {
        match err {
            SerializerError::Configuration(msg) => WriterError::Configuration(msg),
            SerializerError::UnsupportedFormat(msg) => WriterError::UnsupportedFormat(msg),
            SerializerError::Serialization(msg) => WriterError::Serialization(msg),
        }
    }
}

/// Serializer selected by alias
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Serializer {
    /// Delimited text events
    Delimited(DelimitedSerializer),
    /// JSON object events
    Json(JsonSerializer),
}

impl Serializer {
    /// Alias of the delimited serializer
    pub const DELIMITED: &'static str = "DELIMITED";
    /// Alias of the JSON serializer
    pub const JSON: &'static str = "JSON";

    /// Select a serializer by alias (case-insensitive) and validate its options
    pub fn from_context(alias: &str, context: &Context) -> Result<Self, SerializerError> {
        match alias.trim().to_ascii_uppercase().as_str() {
            Self::DELIMITED => Ok(Self::Delimited(DelimitedSerializer::from_context(context)?)),
            Self::JSON => Ok(Self::Json(JsonSerializer)),
            _ => Err(SerializerError::Configuration(format!(
                "unknown serializer '{}', expected {} or {}",
                alias,
                Self::DELIMITED,
                Self::JSON
            ))),
        }
    }

    /// Alias this serializer was selected by
    pub fn alias(&self) -> &'static str {
        match self {
            Self::Delimited(_) => Self::DELIMITED,
            Self::Json(_) => Self::JSON,
        }
    }

    /// Bind a record writer to the endpoint's table
    pub fn create_record_writer(
        &self,
        endpoint: &Endpoint,
        descriptor: &TableDescriptor,
    ) -> Result<RecordWriter, SerializerError> {
        let writer = match self {
            Self::Delimited(s) => RecordWriter::Delimited(s.bind(descriptor)?),
            Self::Json(s) => RecordWriter::Json(s.bind(descriptor)?),
        };
        log::debug!(
            "bound {} record writer for {} ({} columns)",
            self.alias(),
            endpoint,
            writer.columns().len()
        );
        Ok(writer)
    }

    /// Turn an event into record bytes
    pub fn to_record(&self, event: &Event) -> Result<Bytes, SerializerError> {
        match self {
            Self::Delimited(s) => s.to_record(event),
            Self::Json(s) => s.to_record(event),
        }
    }

    /// Serialize an event and write it into the batch's active transaction
    pub fn write(&self, batch: &mut TransactionBatch, event: &Event) -> Result<(), WriterError> {
        let record = self.to_record(event)?;
        batch.write(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delimited_context(field_names: &str) -> Context {
        let mut context = Context::new();
        context.put(delimited::FIELD_NAMES_KEY, field_names);
        context
    }

    #[test]
    fn test_alias_selection() {
        let s = Serializer::from_context("delimited", &delimited_context("id,msg")).unwrap();
        assert_eq!(s.alias(), Serializer::DELIMITED);

        let s = Serializer::from_context("JSON", &Context::new()).unwrap();
        assert_eq!(s.alias(), Serializer::JSON);

        let err = Serializer::from_context("avro", &Context::new()).unwrap_err();
        assert!(matches!(err, SerializerError::Configuration(_)));
    }

    #[test]
    fn test_delimited_body_is_forwarded_unmodified() {
        let s = Serializer::from_context(Serializer::DELIMITED, &delimited_context("id,,msg,"))
            .unwrap();
        let event = Event::from("1,xyz,Hello world,abc");
        assert_eq!(
            s.to_record(&event).unwrap(),
            Bytes::from_static(b"1,xyz,Hello world,abc")
        );
    }

    #[test]
    fn test_unknown_column_is_unsupported_format() {
        let s = Serializer::from_context(Serializer::DELIMITED, &delimited_context("id,nope"))
            .unwrap();
        let endpoint = Endpoint::new("mem://test", "db", "t", Vec::new());
        let descriptor = TableDescriptor::new("db", "t", vec!["id".into(), "msg".into()]);
        let err = s.create_record_writer(&endpoint, &descriptor).unwrap_err();
        assert!(matches!(err, SerializerError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_error_conversion() {
        let err: WriterError = SerializerError::Serialization("bad".into()).into();
        assert!(matches!(err, WriterError::Serialization(_)));
    }
}
