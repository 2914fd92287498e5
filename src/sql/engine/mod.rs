use crate::error::{Error, Result};

use super::{
    executor::ResultSet,
    parser::ast::Statement,
    plan::Plan,
    schema::Table,
    types::Row,
};

mod memory;

pub use memory::MemoryTransaction;

/// Maximum nesting of trigger firings within one statement
pub const MAX_TRIGGER_DEPTH: usize = 32;

/// SQL transaction trait (DDL and DML operations)
///
/// The executors only ever see a transaction, never the committed state,
/// so every mutation lands in a working copy that the caller may commit
/// or discard as a whole.
pub trait Transaction {
    // DDL operations
    fn create_table(&mut self, table: Table) -> Result<()>;
    fn drop_table(&mut self, table_name: &str) -> Result<()>;
    /// Replaces a table's schema and rows, possibly under a new name
    fn replace_table(&mut self, table_name: &str, table: Table, rows: Vec<Row>) -> Result<()>;
    fn get_table(&self, table_name: &str) -> Result<Option<Table>>;
    fn table_names(&self) -> Vec<String>;

    /// Returns table info, returns error if table doesn't exist
    fn must_get_table(&self, table_name: &str) -> Result<Table> {
        self.get_table(table_name)?
            .ok_or_else(|| Error::TableNotFound(table_name.to_string()))
    }

    /// Name of the table owning the named trigger
    fn find_trigger(&self, trigger_name: &str) -> Result<Option<String>> {
        for name in self.table_names() {
            let table = self.must_get_table(&name)?;
            if table.triggers.iter().any(|t| t.name == trigger_name) {
                return Ok(Some(name));
            }
        }
        Ok(None)
    }

    // DML operations
    /// Rows of a table, in insertion order
    fn rows(&self, table_name: &str) -> Result<&[Row]>;

    fn scan_table(&self, table_name: &str) -> Result<Vec<Row>> {
        Ok(self.rows(table_name)?.to_vec())
    }

    fn insert_row(&mut self, table_name: &str, row: Row) -> Result<()>;
    /// Overwrites the row at a position captured by a scan
    fn update_row(&mut self, table_name: &str, position: usize, row: Row) -> Result<()>;
    fn delete_row(&mut self, table_name: &str, position: usize) -> Result<()>;

    /// Column names and rows of a named row source: the innermost common
    /// table expression with that name, else the catalog table
    fn read_source(&self, name: &str) -> Result<(Vec<String>, Vec<Row>)>;

    // Common table expressions, visible for the enclosing statement only
    fn push_cte_frame(&mut self);
    fn bind_cte(&mut self, name: &str, columns: Vec<String>, rows: Vec<Row>);
    fn pop_cte_frame(&mut self);

    // Trigger nesting
    fn enter_trigger(&mut self) -> Result<()>;
    fn exit_trigger(&mut self);

    // Change counters
    fn record_insert_id(&mut self, id: i64);
    /// Adds rows changed by a statement to the running total
    fn record_changes(&mut self, count: u64);
}

/// Plans and executes a parsed statement against a transaction
pub fn execute<T: Transaction + 'static>(txn: &mut T, stmt: Statement) -> Result<ResultSet> {
    Plan::build(stmt)?.execute(txn)
}
