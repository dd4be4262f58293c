use bytes::Bytes;
use serde_json::Value;

use crate::event::Event;
use crate::storage::{JsonRecordWriter, TableDescriptor, TableFormat};

use super::SerializerError;

/// JSON object serializer; top-level keys map onto columns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub(super) fn bind(
        &self,
        descriptor: &TableDescriptor,
    ) -> Result<JsonRecordWriter, SerializerError> {
        match TableFormat::resolve(&descriptor.format) {
            Some(TableFormat::Json) | Some(TableFormat::Parquet) => {}
            _ => {
                return Err(SerializerError::UnsupportedFormat(format!(
                    "{} with format '{}' cannot take JSON records",
                    descriptor.qualified_name(),
                    descriptor.format
                )))
            }
        }
        JsonRecordWriter::bind(descriptor)
            .map_err(|e| SerializerError::UnsupportedFormat(e.to_string()))
    }

    /// Check the body is a JSON object and forward it unmodified
    pub(super) fn to_record(&self, event: &Event) -> Result<Bytes, SerializerError> {
        match serde_json::from_slice::<Value>(event.body()) {
            Ok(Value::Object(_)) => Ok(event.body().clone()),
            Ok(other) => Err(SerializerError::Serialization(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
            Err(e) => Err(SerializerError::Serialization(format!(
                "invalid JSON body: {}",
                e
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
