use std::collections::HashMap;

/// String-keyed configuration passed to a serializer at configure time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    values: HashMap<String, String>,
}

impl Context {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for `key`, if set
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Value for `key`, or `default` when unset
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Set `key` to `value`, replacing any previous value
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Whether `key` is set
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no keys are set
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_falls_back() {
        let mut context = Context::new();
        assert_eq!(context.get_or("serializer.delimiter", ","), ",");
        context.put("serializer.delimiter", "|");
        assert_eq!(context.get_or("serializer.delimiter", ","), "|");
        assert_eq!(context.len(), 1);
    }

    #[test]
    fn test_from_iter() {
        let context: Context = [("a", "1"), ("b", "2")].into_iter().collect();
        assert_eq!(context.get("b"), Some("2"));
        assert!(!context.contains("c"));
    }
}
