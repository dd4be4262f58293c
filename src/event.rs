//! Event payloads handed to the writer by upstream producers.

use std::collections::HashMap;

use bytes::Bytes;

/// An opaque event: a byte body plus optional string headers.
///
/// The body is reference counted, so cloning an event is cheap and the writer
/// never copies payload bytes on the way to the storage endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    body: Bytes,
    headers: HashMap<String, String>,
}

impl Event {
    /// Create an event with the given body and no headers
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            headers: HashMap::new(),
        }
    }

    /// Create an event with headers
    pub fn with_headers(body: impl Into<Bytes>, headers: HashMap<String, String>) -> Self {
        Self {
            body: body.into(),
            headers,
        }
    }

    /// Add a single header (builder style)
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Raw event body
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Event headers
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Body length in bytes
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Whether the body is empty
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

impl From<&'static str> for Event {
    fn from(body: &'static str) -> Self {
        Self::new(Bytes::from_static(body.as_bytes()))
    }
}

impl From<Vec<u8>> for Event {
    fn from(body: Vec<u8>) -> Self {
        Self::new(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_body_and_headers() {
        let event = Event::new("1,xyz,Hello world,abc").header("source", "test");

        assert_eq!(event.body().as_ref(), b"1,xyz,Hello world,abc");
        assert_eq!(event.headers().get("source").map(String::as_str), Some("test"));
        assert_eq!(event.len(), 21);
        assert!(!event.is_empty());
    }

    #[test]
    fn test_clone_shares_body() {
        let event = Event::from(vec![1u8, 2, 3]);
        let copy = event.clone();
        assert_eq!(event.body().as_ptr(), copy.body().as_ptr());
    }
}
