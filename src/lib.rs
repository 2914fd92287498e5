//! propdb - an embedded SQL database for hosts whose only durable storage
//! is a flat, size-limited key/value string property bag.
//!
//! The crate provides:
//! - SQL parsing (lexer, parser, AST)
//! - Query planning and execution over an in-memory snapshot
//! - Row triggers, common table expressions and subqueries
//! - Snapshot transactions with commit/rollback
//! - Persistence as chunked JSON strings through a pluggable property store

pub mod database;
pub mod error;
pub mod sql;
pub mod storage;

pub use database::{Database, DatabaseOptions, ExecResult, QueryResult};
pub use error::{Error, Result};
pub use sql::types::Value;
