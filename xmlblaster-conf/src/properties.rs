use std::collections::HashMap;

use serde::de::Deserializer;
use serde::Deserialize;

/// Flat property store, e.g. `dispatch/connection/pingInterval = 10000`.
///
/// A key may carry a cluster node suffix, `dispatch/connection/pingInterval[heron]`, which
/// only applies on that node. Keys are compared case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    map: HashMap<String, String>,
}

impl Properties {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn with<K: AsRef<str>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.set(key, value);
        self
    }

    #[inline]
    pub fn set<K: AsRef<str>, V: Into<String>>(&mut self, key: K, value: V) {
        self.map.insert(key.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Global value of `key`
    #[inline]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(&key.to_ascii_lowercase()).map(|v| v.as_str())
    }

    /// Value of `key[node_id]`
    #[inline]
    pub fn get_node(&self, key: &str, node_id: &str) -> Option<&str> {
        self.map.get(&format!("{}[{}]", key, node_id).to_ascii_lowercase()).map(|v| v.as_str())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl RawValue {
    fn into_string(self) -> String {
        match self {
            RawValue::Bool(b) => b.to_string(),
            RawValue::Int(i) => i.to_string(),
            RawValue::Float(f) => f.to_string(),
            RawValue::Str(s) => s,
        }
    }
}

impl<'de> Deserialize<'de> for Properties {
    #[inline]
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = HashMap::<String, RawValue>::deserialize(deserializer)?;
        let mut props = Properties::new();
        for (k, v) in raw {
            props.set(k, v.into_string());
        }
        Ok(props)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_suffix() {
        let props = Properties::new()
            .with("queue/callback/maxEntries", "100")
            .with("queue/callback/maxEntries[heron]", "5");
        assert_eq!(props.get("queue/callback/maxentries"), Some("100"));
        assert_eq!(props.get_node("queue/callback/maxEntries", "heron"), Some("5"));
        assert_eq!(props.get_node("queue/callback/maxEntries", "avalon"), None);
        assert_eq!(props.get("queue/subject/maxEntries"), None);
        assert_eq!(props.len(), 2);
    }
}
