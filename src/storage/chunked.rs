//! Persistence of one large string as a run of size-limited property values.
//!
//! Layout under a prefix `p`: chunk `i` is stored at `p:i`, and the
//! metadata record at `p:m`. The metadata is written last, so a reader
//! never trusts chunks of a save that did not complete.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    error::{Error, Result},
    storage::engine::{Engine, Write},
};

pub const DEFAULT_CHUNK_SIZE: usize = 30_000;
pub const DEFAULT_MAX_CHUNKS: usize = 8;

/// Chunked store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkedStoreOptions {
    /// Key prefix; include a namespace
    pub prefix: String,
    /// Maximum bytes per chunk
    pub chunk_size: usize,
    pub max_chunks: usize,
}

impl Default for ChunkedStoreOptions {
    fn default() -> Self {
        Self {
            prefix: "propdb".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunks: DEFAULT_MAX_CHUNKS,
        }
    }
}

/// Canonical metadata record
#[derive(Debug, Serialize, Deserialize)]
struct MetaV2 {
    v: u32,
    unit: String,
    #[serde(rename = "chunksUsed")]
    chunks_used: usize,
    #[serde(rename = "totalLength")]
    total_length: usize,
}

/// Metadata of the first layout: lengths counted in UTF-16 code units,
/// with short field names accepted
#[derive(Debug, Deserialize)]
struct MetaV1 {
    #[serde(rename = "chunksUsed")]
    chunks_used: Option<usize>,
    n: Option<usize>,
    #[serde(rename = "totalLength")]
    total_length: Option<usize>,
    l: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LengthUnit {
    Bytes,
    Utf16,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Meta {
    chunks_used: usize,
    total_length: usize,
    unit: LengthUnit,
}

/// A string value stored across numbered chunks of a property bag
pub struct ChunkedStore<E: Engine> {
    engine: E,
    options: ChunkedStoreOptions,
}

impl<E: Engine> ChunkedStore<E> {
    pub fn new(engine: E, options: ChunkedStoreOptions) -> Self {
        Self { engine, options }
    }

    pub fn options(&self) -> &ChunkedStoreOptions {
        &self.options
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn into_engine(self) -> E {
        self.engine
    }

    fn meta_key(&self) -> String {
        format!("{}:m", self.options.prefix)
    }

    fn chunk_key(&self, index: usize) -> String {
        format!("{}:{}", self.options.prefix, index)
    }

    fn parse_meta(&self, raw: &str) -> Result<Meta> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let meta = match value.get("v").and_then(|v| v.as_u64()) {
            Some(2) => {
                let meta: MetaV2 = serde_json::from_value(value)?;
                if meta.unit != "bytes" {
                    return Err(Error::CorruptData(format!(
                        "unknown length unit {}",
                        meta.unit
                    )));
                }
                Meta {
                    chunks_used: meta.chunks_used,
                    total_length: meta.total_length,
                    unit: LengthUnit::Bytes,
                }
            }
            Some(1) => {
                let meta: MetaV1 = serde_json::from_value(value)?;
                match (meta.chunks_used.or(meta.n), meta.total_length.or(meta.l)) {
                    (Some(chunks_used), Some(total_length)) => Meta {
                        chunks_used,
                        total_length,
                        unit: LengthUnit::Utf16,
                    },
                    _ => return Err(Error::CorruptData("incomplete metadata".into())),
                }
            }
            _ => return Err(Error::CorruptData("unknown metadata version".into())),
        };
        if meta.chunks_used > self.options.max_chunks {
            return Err(Error::CorruptData(format!(
                "metadata names {} chunks, maximum is {}",
                meta.chunks_used, self.options.max_chunks
            )));
        }
        Ok(meta)
    }

    /// Metadata of the current layout, None if missing
    fn read_meta(&self) -> Result<Option<Meta>> {
        match self.engine.get(&self.meta_key())? {
            Some(raw) => self.parse_meta(&raw).map(Some),
            None => Ok(None),
        }
    }

    fn read(&self, meta: Meta) -> Result<String> {
        let mut data = String::new();
        for i in 0..meta.chunks_used {
            let chunk = self
                .engine
                .get(&self.chunk_key(i))?
                .ok_or_else(|| Error::CorruptData(format!("chunk {} is missing", i)))?;
            data.push_str(&chunk);
        }
        let length = match meta.unit {
            LengthUnit::Bytes => data.len(),
            LengthUnit::Utf16 => data.encode_utf16().count(),
        };
        if length != meta.total_length {
            return Err(Error::CorruptData(format!(
                "expected length {}, got {}",
                meta.total_length, length
            )));
        }
        Ok(data)
    }

    /// Reads the stored string. Missing or inconsistent data reads as
    /// None. Data in the first layout is rewritten in the current one.
    pub fn load(&mut self) -> Result<Option<String>> {
        let meta = match self.read_meta() {
            Ok(Some(meta)) => meta,
            Ok(None) => return Ok(None),
            Err(Error::CorruptData(e)) => {
                warn!(prefix = %self.options.prefix, "unreadable metadata: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let data = match self.read(meta) {
            Ok(data) => data,
            Err(Error::CorruptData(e)) => {
                warn!(prefix = %self.options.prefix, "unreadable data: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if meta.unit == LengthUnit::Utf16 {
            info!(prefix = %self.options.prefix, "migrating chunk metadata to byte lengths");
            if let Err(e) = self.save(&data) {
                warn!(prefix = %self.options.prefix, "migration failed: {}", e);
            }
        }
        Ok(Some(data))
    }

    /// Stores a string, replacing the previous value
    pub fn save(&mut self, data: &str) -> Result<()> {
        let chunks = split_chunks(data, self.options.chunk_size);
        if chunks.len() > self.options.max_chunks {
            return Err(Error::Capacity(format!(
                "{} bytes need {} chunks of {} bytes, maximum is {}",
                data.len(),
                chunks.len(),
                self.options.chunk_size,
                self.options.max_chunks
            )));
        }
        let previous = match self.read_meta() {
            Ok(meta) => meta.map_or(0, |m| m.chunks_used),
            Err(Error::CorruptData(_)) => 0,
            Err(e) => return Err(e),
        };

        let meta = serde_json::to_string(&MetaV2 {
            v: 2,
            unit: "bytes".to_string(),
            chunks_used: chunks.len(),
            total_length: data.len(),
        })?;
        let count = chunks.len();
        let mut writes: Vec<Write> = chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| (self.chunk_key(i), Some(chunk.to_string())))
            .collect();
        writes.extend((count..previous).map(|i| (self.chunk_key(i), None)));
        writes.push((self.meta_key(), Some(meta)));

        self.engine.apply(writes)?;
        debug!(prefix = %self.options.prefix, bytes = data.len(), chunks = count, "saved");
        Ok(())
    }

    /// Deletes the chunks named by the metadata, and the metadata
    pub fn clear(&mut self) -> Result<()> {
        let chunks = match self.read_meta() {
            Ok(meta) => meta.map_or(0, |m| m.chunks_used),
            Err(Error::CorruptData(_)) => 0,
            Err(e) => return Err(e),
        };
        let mut writes: Vec<Write> = (0..chunks).map(|i| (self.chunk_key(i), None)).collect();
        writes.push((self.meta_key(), None));
        self.engine.apply(writes)
    }
}

/// Splits a string into pieces of at most `size` bytes, never inside a
/// character. A character wider than `size` gets a piece of its own.
fn split_chunks(data: &str, size: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        let mut end = size.min(rest.len());
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (chunk, tail) = rest.split_at(end);
        chunks.push(chunk);
        rest = tail;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::{ChunkedStore, ChunkedStoreOptions, split_chunks};
    use crate::{
        error::{Error, Result},
        storage::{engine::Engine, memory::MemoryEngine},
    };

    fn store(chunk_size: usize, max_chunks: usize) -> ChunkedStore<MemoryEngine> {
        ChunkedStore::new(
            MemoryEngine::new(),
            ChunkedStoreOptions {
                prefix: "db".to_string(),
                chunk_size,
                max_chunks,
            },
        )
    }

    #[test]
    fn test_split_chunks() {
        assert_eq!(split_chunks("abcdefg", 3), vec!["abc", "def", "g"]);
        assert_eq!(split_chunks("", 3), Vec::<&str>::new());
        // "é" is two bytes and never split
        assert_eq!(split_chunks("aéé", 2), vec!["a", "é", "é"]);
        assert_eq!(split_chunks("😀a", 2), vec!["😀", "a"]);
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let mut store = store(4, 8);
        store.save("hello, wörld")?;
        assert_eq!(
            store.engine().get("db:m")?,
            Some(r#"{"v":2,"unit":"bytes","chunksUsed":4,"totalLength":13}"#.to_string())
        );
        assert_eq!(store.engine().get("db:0")?, Some("hell".to_string()));
        assert_eq!(store.load()?, Some("hello, wörld".to_string()));
        Ok(())
    }

    #[test]
    fn test_stale_chunks_are_deleted() -> Result<()> {
        let mut store = store(2, 8);
        store.save("abcdefgh")?;
        assert_eq!(store.engine().len(), 5);
        store.save("xyz")?;
        assert_eq!(store.engine().len(), 3);
        assert_eq!(store.engine().get("db:2")?, None);
        assert_eq!(store.load()?, Some("xyz".to_string()));
        Ok(())
    }

    #[test]
    fn test_capacity() -> Result<()> {
        let mut store = store(2, 2);
        store.save("abcd")?;
        assert!(matches!(store.save("abcde"), Err(Error::Capacity(_))));
        assert_eq!(store.load()?, Some("abcd".to_string()));
        Ok(())
    }

    #[test]
    fn test_corrupt_data_reads_as_none() -> Result<()> {
        let mut store = store(2, 8);
        assert_eq!(store.load()?, None);

        store.save("abcd")?;
        store.engine_mut().delete("db:1")?;
        assert_eq!(store.load()?, None);

        store.save("abcd")?;
        store.engine_mut().set("db:1", "c".to_string())?;
        assert_eq!(store.load()?, None);

        store.engine_mut().set("db:m", "not json".to_string())?;
        assert_eq!(store.load()?, None);

        store
            .engine_mut()
            .set("db:m", r#"{"v":2,"unit":"bytes","chunksUsed":9,"totalLength":1}"#.to_string())?;
        assert_eq!(store.load()?, None);
        Ok(())
    }

    #[test]
    fn test_legacy_metadata_is_migrated() -> Result<()> {
        let mut store = store(3, 8);
        let engine = store.engine_mut();
        engine.set("db:0", "wör".to_string())?;
        engine.set("db:1", "ld".to_string())?;
        engine.set("db:m", r#"{"v":1,"n":2,"l":5}"#.to_string())?;

        assert_eq!(store.load()?, Some("wörld".to_string()));
        assert_eq!(
            store.engine().get("db:m")?,
            Some(r#"{"v":2,"unit":"bytes","chunksUsed":2,"totalLength":6}"#.to_string())
        );
        assert_eq!(store.load()?, Some("wörld".to_string()));
        Ok(())
    }

    #[test]
    fn test_legacy_length_counts_utf16_units() -> Result<()> {
        let mut store = store(8, 8);
        let engine = store.engine_mut();
        // 4 bytes, 1 char, 2 UTF-16 units
        engine.set("db:0", "[\"😀\"]".to_string())?;
        engine.set("db:m", r#"{"v":1,"chunksUsed":1,"totalLength":6}"#.to_string())?;

        assert_eq!(store.load()?, Some("[\"😀\"]".to_string()));
        assert_eq!(
            store.engine().get("db:m")?,
            Some(r#"{"v":2,"unit":"bytes","chunksUsed":1,"totalLength":8}"#.to_string())
        );

        // Scalar-value count is not the legacy unit
        store.clear()?;
        let engine = store.engine_mut();
        engine.set("db:0", "[\"😀\"]".to_string())?;
        engine.set("db:m", r#"{"v":1,"chunksUsed":1,"totalLength":5}"#.to_string())?;
        assert_eq!(store.load()?, None);
        Ok(())
    }

    #[test]
    fn test_length_unit_mismatch_is_rejected() -> Result<()> {
        let mut store = store(8, 8);
        store.engine_mut().set("db:0", "wörld".to_string())?;

        // Legacy header recording bytes instead of code units
        store
            .engine_mut()
            .set("db:m", r#"{"v":1,"chunksUsed":1,"totalLength":6}"#.to_string())?;
        assert_eq!(store.load()?, None);

        // Current header recording characters instead of bytes
        store
            .engine_mut()
            .set("db:m", r#"{"v":2,"unit":"bytes","chunksUsed":1,"totalLength":5}"#.to_string())?;
        assert_eq!(store.load()?, None);
        Ok(())
    }

    #[test]
    fn test_clear() -> Result<()> {
        let mut store = store(2, 8);
        store.engine_mut().set("other", "kept".to_string())?;
        store.save("abcdef")?;
        store.clear()?;
        assert_eq!(store.engine().keys().collect::<Vec<_>>(), vec!["other"]);
        assert_eq!(store.load()?, None);
        Ok(())
    }
}
