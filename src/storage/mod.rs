//! Durable storage: the host property bag and the chunked layout the
//! serialized database is written in.

pub mod chunked;
pub mod engine;
pub mod memory;

pub use chunked::{ChunkedStore, ChunkedStoreOptions};
pub use engine::Engine;
pub use memory::MemoryEngine;
