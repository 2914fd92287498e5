//! The public database handle: SQL execution over an in-memory snapshot,
//! persisted through a chunked property store.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    error::{Error, Result},
    sql::{
        engine::{self, MemoryTransaction, Transaction},
        executor::{ResultSet, output_names},
        parser::{ast::Statement, parse_script, parse_sql},
        schema::Table,
        snapshot::Snapshot,
        types::{Row, Value},
    },
    storage::{
        chunked::{ChunkedStore, ChunkedStoreOptions, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CHUNKS},
        engine::Engine,
    },
};

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseOptions {
    /// Property key prefix; include a namespace
    pub prefix: String,
    /// Maximum bytes per stored chunk
    pub chunk_size: usize,
    pub max_chunks: usize,
    /// Load the persisted data when the database is opened
    pub autoload: bool,
    /// Persist after every committed change. When off, `save` must be
    /// called explicitly.
    pub auto_save: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            prefix: "propdb".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunks: DEFAULT_MAX_CHUNKS,
            autoload: true,
            auto_save: true,
        }
    }
}

/// Outcome of `exec`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecResult {
    /// Rows inserted, updated or deleted by the statements, not counting
    /// trigger effects
    pub changes: u64,
}

/// Outcome of `query`
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    /// Value of the named column in the given row
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(index)
    }

    fn from_result_set(result: ResultSet) -> Self {
        match result {
            ResultSet::Scan { columns, rows } => Self {
                columns: output_names(&columns),
                rows,
            },
            _ => Self {
                columns: Vec::new(),
                rows: Vec::new(),
            },
        }
    }
}

fn is_read_only(stmt: &Statement) -> bool {
    match stmt {
        Statement::Select(_) => true,
        Statement::With { statement, .. } => is_read_only(statement),
        _ => false,
    }
}

/// An embedded SQL database persisted in a string property bag.
///
/// The whole dataset is held in memory. Every mutation runs against a
/// working copy that replaces the committed snapshot only when the
/// enclosing transaction succeeds.
pub struct Database<E: Engine> {
    store: ChunkedStore<E>,
    auto_save: bool,
    snapshot: Snapshot,
    /// Working copy of the active transaction
    working: Option<MemoryTransaction>,
    dirty: bool,
}

impl<E: Engine> Database<E> {
    pub fn new(engine: E, options: DatabaseOptions) -> Result<Self> {
        let store = ChunkedStore::new(
            engine,
            ChunkedStoreOptions {
                prefix: options.prefix,
                chunk_size: options.chunk_size,
                max_chunks: options.max_chunks,
            },
        );
        let mut db = Self {
            store,
            auto_save: options.auto_save,
            snapshot: Snapshot::default(),
            working: None,
            dirty: false,
        };
        if options.autoload {
            db.load()?;
        }
        Ok(db)
    }

    pub fn engine(&self) -> &E {
        self.store.engine()
    }

    pub fn into_engine(self) -> E {
        self.store.into_engine()
    }

    /// Snapshot visible to statements: the working copy inside a
    /// transaction, the committed snapshot otherwise
    fn view(&self) -> &Snapshot {
        match &self.working {
            Some(txn) => txn.snapshot(),
            None => &self.snapshot,
        }
    }

    /// Replaces the committed snapshot with the persisted one. Missing or
    /// unreadable data leaves an empty database.
    pub fn load(&mut self) -> Result<()> {
        self.snapshot = match self.store.load()? {
            Some(data) => match Snapshot::from_json(&data) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(prefix = %self.store.options().prefix, "discarding stored database: {}", e);
                    Snapshot::default()
                }
            },
            None => Snapshot::default(),
        };
        self.dirty = false;
        info!(
            prefix = %self.store.options().prefix,
            tables = self.snapshot.tables.len(),
            "database loaded"
        );
        Ok(())
    }

    /// Persists the committed snapshot
    pub fn save(&mut self) -> Result<()> {
        let data = self.snapshot.to_json()?;
        self.store.save(&data)?;
        self.dirty = false;
        info!(prefix = %self.store.options().prefix, bytes = data.len(), "database saved");
        Ok(())
    }

    /// Serializes the committed snapshot
    pub fn export(&self) -> Result<String> {
        self.snapshot.to_json()
    }

    /// Replaces the whole database with serialized data. Invalid data is
    /// rejected and leaves the database unchanged.
    pub fn import(&mut self, data: &str) -> Result<()> {
        let snapshot = Snapshot::from_json(data)?;
        self.transaction(|db| {
            if let Some(txn) = db.working.as_mut() {
                *txn.snapshot_mut() = snapshot;
            }
            Ok(())
        })
    }

    /// Empties the database and erases its persisted data
    pub fn clear(&mut self) -> Result<()> {
        self.store.clear()?;
        self.snapshot = Snapshot::default();
        if let Some(txn) = self.working.as_mut() {
            *txn.snapshot_mut() = Snapshot::default();
        }
        self.dirty = false;
        info!(prefix = %self.store.options().prefix, "database cleared");
        Ok(())
    }

    /// Runs `f` as one unit of work: its changes are committed together if
    /// it succeeds and discarded if it fails. Nested calls join the active
    /// transaction.
    pub fn transaction<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        if self.working.is_some() {
            return f(self);
        }

        self.working = Some(MemoryTransaction::new(self.snapshot.clone()));
        let result = f(self);
        let working = self.working.take();
        let value = match result {
            Ok(value) => value,
            Err(e) => {
                debug!("transaction rolled back: {}", e);
                return Err(e);
            }
        };
        if let Some(txn) = working {
            self.snapshot = txn.into_snapshot();
        }
        self.dirty = true;
        if self.auto_save {
            self.save()?;
        }
        Ok(value)
    }

    /// Runs one statement against the working copy
    fn run(&mut self, stmt: Statement) -> Result<ResultSet> {
        let txn = self
            .working
            .as_mut()
            .ok_or_else(|| Error::Internal("no active transaction".into()))?;
        let result = engine::execute(txn, stmt)?;
        if let ResultSet::Insert { count } | ResultSet::Update { count } | ResultSet::Delete { count } =
            result
        {
            txn.record_changes(count);
            txn.snapshot_mut().last_changes = count;
        }
        Ok(result)
    }

    /// Executes one or more `;` separated statements. `?` placeholders
    /// are bound to `params` in order of appearance across the script.
    pub fn exec(&mut self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        let statements = parse_script(sql, params)?;
        debug!(statements = statements.len(), "exec: {}", sql);
        self.transaction(|db| {
            let mut changes = 0;
            for stmt in statements {
                changes += db.run(stmt)?.changes();
            }
            Ok(ExecResult { changes })
        })
    }

    /// Runs a single statement and returns its rows. Read-only statements
    /// do not commit; anything else is executed like `exec`.
    pub fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let stmt = parse_sql(sql, params)?;
        debug!("query: {}", sql);
        if !is_read_only(&stmt) {
            return self.transaction(|db| db.run(stmt).map(QueryResult::from_result_set));
        }

        let result = match self.working.as_mut() {
            Some(txn) => engine::execute(txn, stmt),
            None => {
                let mut txn = MemoryTransaction::new(std::mem::take(&mut self.snapshot));
                let result = engine::execute(&mut txn, stmt);
                self.snapshot = txn.into_snapshot();
                result
            }
        }?;
        Ok(QueryResult::from_result_set(result))
    }

    /// Table names, sorted
    pub fn tables(&self) -> Vec<String> {
        self.view().tables.keys().cloned().collect()
    }

    pub fn schema(&self, table: &str) -> Option<Table> {
        self.view().tables.get(table).map(|t| t.schema.clone())
    }

    pub fn table_exists(&self, table: &str) -> bool {
        self.view().tables.contains_key(table)
    }

    pub fn column_exists(&self, table: &str, column: &str) -> bool {
        self.view()
            .tables
            .get(table)
            .is_some_and(|t| t.schema.has_column(column))
    }

    pub fn row_count(&self, table: &str) -> Result<usize> {
        self.view()
            .tables
            .get(table)
            .map(|t| t.rows.len())
            .ok_or_else(|| Error::TableNotFound(table.to_string()))
    }

    /// Integer primary key of the most recently inserted row
    pub fn last_insert_id(&self) -> Option<i64> {
        self.view().last_insert_id
    }

    /// Rows changed by the most recent INSERT, UPDATE or DELETE
    pub fn changes(&self) -> u64 {
        self.view().last_changes
    }

    /// Rows changed since the database was created, trigger effects included
    pub fn total_changes(&self) -> u64 {
        self.view().total_changes
    }

    /// Whether committed changes have not been saved yet
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::{Database, DatabaseOptions};
    use crate::{
        error::{Error, Result},
        sql::types::Value,
        storage::memory::MemoryEngine,
    };

    fn open() -> Result<Database<MemoryEngine>> {
        Database::new(MemoryEngine::new(), DatabaseOptions::default())
    }

    #[test]
    fn test_exec_and_query() -> Result<()> {
        let mut db = open()?;
        db.exec("CREATE TABLE users(id INTEGER PRIMARY KEY, name TEXT)", &[])?;
        let result = db.exec("INSERT INTO users(name) VALUES (?)", &[Value::from("Ann")])?;
        assert_eq!(result.changes, 1);
        assert_eq!(db.last_insert_id(), Some(1));

        let rows = db.query("SELECT * FROM users WHERE name = ?", &[Value::from("Ann")])?;
        assert_eq!(rows.columns, vec!["id", "name"]);
        assert_eq!(rows.rows, vec![vec![Value::Integer(1), Value::from("Ann")]]);
        assert_eq!(rows.get(0, "name"), Some(&Value::from("Ann")));
        Ok(())
    }

    #[test]
    fn test_failed_transaction_rolls_back() -> Result<()> {
        let mut db = open()?;
        db.exec("CREATE TABLE t(id INTEGER PRIMARY KEY)", &[])?;
        let result = db.transaction(|db| {
            db.exec("INSERT INTO t VALUES (1)", &[])?;
            db.exec("INSERT INTO t VALUES (1)", &[])
        });
        assert!(matches!(result, Err(Error::Constraint(_))));
        assert_eq!(db.row_count("t")?, 0);

        // A failing statement of a script undoes the whole script
        assert!(db.exec("INSERT INTO t VALUES (2); INSERT INTO t VALUES (2)", &[]).is_err());
        assert_eq!(db.row_count("t")?, 0);
        Ok(())
    }

    #[test]
    fn test_read_only_query_does_not_commit() -> Result<()> {
        let options = DatabaseOptions {
            auto_save: false,
            ..Default::default()
        };
        let mut db = Database::new(MemoryEngine::new(), options)?;
        db.exec("CREATE TABLE t(a INTEGER)", &[])?;
        db.save()?;
        assert!(!db.is_dirty());
        db.query("SELECT * FROM t", &[])?;
        assert!(!db.is_dirty());
        db.query("INSERT INTO t VALUES (1)", &[])?;
        assert!(db.is_dirty());
        Ok(())
    }
}
