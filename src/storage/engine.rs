use crate::error::Result;

/// A single write of a batch: `Some` sets the key, `None` deletes it
pub type Write = (String, Option<String>);

/// Host property bag interface (string keys to string values)
///
/// This is the only durable storage the database sees. Implementations
/// may cap the size of a single value and fail with `Error::Capacity`.
pub trait Engine {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: String) -> Result<()>;
    fn delete(&mut self, key: &str) -> Result<()>;

    /// Applies a batch of writes in order. Hosts with a native batch
    /// primitive should override this.
    fn apply(&mut self, writes: Vec<Write>) -> Result<()> {
        for (key, value) in writes {
            match value {
                Some(value) => self.set(&key, value)?,
                None => self.delete(&key)?,
            }
        }
        Ok(())
    }
}

impl<E: Engine + ?Sized> Engine for &mut E {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        (**self).set(key, value)
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        (**self).delete(key)
    }

    fn apply(&mut self, writes: Vec<Write>) -> Result<()> {
        (**self).apply(writes)
    }
}

#[cfg(test)]
mod tests {
    use super::Engine;
    use crate::{error::Result, storage::memory::MemoryEngine};

    fn test_point_opt(mut eng: impl Engine) -> Result<()> {
        assert_eq!(eng.get("not exist")?, None);

        eng.set("aa", "1234".to_string())?;
        assert_eq!(eng.get("aa")?, Some("1234".to_string()));

        eng.set("aa", "5678".to_string())?;
        assert_eq!(eng.get("aa")?, Some("5678".to_string()));

        eng.delete("aa")?;
        assert_eq!(eng.get("aa")?, None);

        assert_eq!(eng.get("")?, None);
        eng.set("", String::new())?;
        assert_eq!(eng.get("")?, Some(String::new()));
        Ok(())
    }

    fn test_apply(mut eng: impl Engine) -> Result<()> {
        eng.set("b", "old".to_string())?;
        eng.apply(vec![
            ("a".to_string(), Some("1".to_string())),
            ("b".to_string(), None),
            ("a".to_string(), Some("2".to_string())),
        ])?;
        assert_eq!(eng.get("a")?, Some("2".to_string()));
        assert_eq!(eng.get("b")?, None);
        Ok(())
    }

    #[test]
    fn test_memory() -> Result<()> {
        test_point_opt(MemoryEngine::new())?;
        test_apply(MemoryEngine::new())?;
        let mut engine = MemoryEngine::new();
        test_apply(&mut engine)?;
        assert_eq!(engine.len(), 1);
        Ok(())
    }
}
