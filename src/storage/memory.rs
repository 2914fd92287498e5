use std::collections::BTreeMap;

use crate::{
    error::{Error, Result},
    storage::engine::{Engine, Write},
};

/// In-memory property bag, optionally limiting the byte size of each value
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    data: BTreeMap<String, String>,
    value_limit: Option<usize>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects values longer than `limit` bytes
    pub fn with_value_limit(limit: usize) -> Self {
        Self {
            data: BTreeMap::new(),
            value_limit: Some(limit),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    fn check(&self, key: &str, value: &str) -> Result<()> {
        match self.value_limit {
            Some(limit) if value.len() > limit => Err(Error::Capacity(format!(
                "value of {} is {} bytes, limit is {}",
                key,
                value.len(),
                limit
            ))),
            _ => Ok(()),
        }
    }
}

impl Engine for MemoryEngine {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        self.check(key, &value)?;
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.data.remove(key);
        Ok(())
    }

    /// All-or-nothing: no write is applied if any value is over the limit
    fn apply(&mut self, writes: Vec<Write>) -> Result<()> {
        for (key, value) in &writes {
            if let Some(value) = value {
                self.check(key, value)?;
            }
        }
        for (key, value) in writes {
            match value {
                Some(value) => {
                    self.data.insert(key, value);
                }
                None => {
                    self.data.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryEngine;
    use crate::{
        error::{Error, Result},
        storage::engine::Engine,
    };

    #[test]
    fn test_value_limit() -> Result<()> {
        let mut engine = MemoryEngine::with_value_limit(4);
        engine.set("k", "abcd".to_string())?;
        assert!(matches!(
            engine.set("k", "abcde".to_string()),
            Err(Error::Capacity(_))
        ));
        // Bytes, not characters
        assert!(matches!(
            engine.set("k", "ééé".to_string()),
            Err(Error::Capacity(_))
        ));

        let result = engine.apply(vec![
            ("a".to_string(), Some("ok".to_string())),
            ("k".to_string(), None),
            ("b".to_string(), Some("too long".to_string())),
        ]);
        assert!(matches!(result, Err(Error::Capacity(_))));
        assert_eq!(engine.get("a")?, None);
        assert_eq!(engine.get("k")?, Some("abcd".to_string()));
        Ok(())
    }
}
