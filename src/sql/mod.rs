//! SQL processing module
//!
//! This module provides:
//! - `parser`: SQL lexer and parser
//! - `types`: SQL values and data types
//! - `schema`: Table, column and trigger definitions
//! - `snapshot`: The database image and its serialization
//! - `plan`: Execution plan generation
//! - `executor`: Query, mutation and trigger execution
//! - `engine`: Transaction abstraction over a working snapshot

pub mod parser;
pub mod types;
pub mod schema;
pub mod snapshot;
pub mod plan;
pub mod executor;
pub mod engine;
