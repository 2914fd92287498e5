use std::collections::BTreeMap;

use tracing::debug;

use crate::{
    error::{Error, Result},
    sql::{
        schema::Table,
        snapshot::{Snapshot, TableData},
        types::Row,
    },
};

use super::{MAX_TRIGGER_DEPTH, Transaction};

/// A materialized common table expression
#[derive(Debug, Clone)]
struct CteTable {
    columns: Vec<String>,
    rows: Vec<Row>,
}

/// Transaction over a private working copy of a snapshot.
///
/// Committing means taking the snapshot back with `into_snapshot`;
/// rolling back means dropping the transaction.
pub struct MemoryTransaction {
    snapshot: Snapshot,
    ctes: Vec<BTreeMap<String, CteTable>>,
    trigger_depth: usize,
}

impl MemoryTransaction {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            ctes: Vec::new(),
            trigger_depth: 0,
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn snapshot_mut(&mut self) -> &mut Snapshot {
        &mut self.snapshot
    }

    pub fn into_snapshot(self) -> Snapshot {
        self.snapshot
    }

    fn must_get_data(&mut self, table_name: &str) -> Result<&mut TableData> {
        self.snapshot
            .tables
            .get_mut(table_name)
            .ok_or_else(|| Error::TableNotFound(table_name.to_string()))
    }
}

impl Transaction for MemoryTransaction {
    fn create_table(&mut self, table: Table) -> Result<()> {
        // Check if table already exists
        if self.snapshot.tables.contains_key(&table.name) {
            return Err(Error::TableExists(table.name));
        }
        table.validate()?;
        debug!(table = %table.name, "create table");
        self.snapshot
            .tables
            .insert(table.name.clone(), TableData::new(table));
        Ok(())
    }

    fn drop_table(&mut self, table_name: &str) -> Result<()> {
        self.snapshot
            .tables
            .remove(table_name)
            .ok_or_else(|| Error::TableNotFound(table_name.to_string()))?;
        debug!(table = table_name, "drop table");
        Ok(())
    }

    fn replace_table(&mut self, table_name: &str, table: Table, rows: Vec<Row>) -> Result<()> {
        if table.name != table_name && self.snapshot.tables.contains_key(&table.name) {
            return Err(Error::TableExists(table.name));
        }
        table.validate()?;
        self.snapshot
            .tables
            .remove(table_name)
            .ok_or_else(|| Error::TableNotFound(table_name.to_string()))?;
        self.snapshot.tables.insert(
            table.name.clone(),
            TableData {
                schema: table,
                rows,
            },
        );
        Ok(())
    }

    fn get_table(&self, table_name: &str) -> Result<Option<Table>> {
        Ok(self
            .snapshot
            .tables
            .get(table_name)
            .map(|data| data.schema.clone()))
    }

    fn table_names(&self) -> Vec<String> {
        self.snapshot.tables.keys().cloned().collect()
    }

    fn find_trigger(&self, trigger_name: &str) -> Result<Option<String>> {
        Ok(self.snapshot.trigger_table(trigger_name).map(str::to_string))
    }

    fn rows(&self, table_name: &str) -> Result<&[Row]> {
        self.snapshot
            .tables
            .get(table_name)
            .map(|data| data.rows.as_slice())
            .ok_or_else(|| Error::TableNotFound(table_name.to_string()))
    }

    fn insert_row(&mut self, table_name: &str, row: Row) -> Result<()> {
        self.must_get_data(table_name)?.rows.push(row);
        Ok(())
    }

    fn update_row(&mut self, table_name: &str, position: usize, row: Row) -> Result<()> {
        let data = self.must_get_data(table_name)?;
        match data.rows.get_mut(position) {
            Some(slot) => {
                *slot = row;
                Ok(())
            }
            None => Err(Error::Internal(format!(
                "row {} of table {} does not exist",
                position, table_name
            ))),
        }
    }

    fn delete_row(&mut self, table_name: &str, position: usize) -> Result<()> {
        let data = self.must_get_data(table_name)?;
        if position >= data.rows.len() {
            return Err(Error::Internal(format!(
                "row {} of table {} does not exist",
                position, table_name
            )));
        }
        data.rows.remove(position);
        Ok(())
    }

    fn read_source(&self, name: &str) -> Result<(Vec<String>, Vec<Row>)> {
        if let Some(cte) = self.ctes.iter().rev().find_map(|frame| frame.get(name)) {
            return Ok((cte.columns.clone(), cte.rows.clone()));
        }
        let data = self
            .snapshot
            .tables
            .get(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))?;
        let columns = data.schema.columns.iter().map(|c| c.name.clone()).collect();
        Ok((columns, data.rows.clone()))
    }

    fn push_cte_frame(&mut self) {
        self.ctes.push(BTreeMap::new());
    }

    fn bind_cte(&mut self, name: &str, columns: Vec<String>, rows: Vec<Row>) {
        if self.ctes.is_empty() {
            self.ctes.push(BTreeMap::new());
        }
        if let Some(frame) = self.ctes.last_mut() {
            frame.insert(name.to_string(), CteTable { columns, rows });
        }
    }

    fn pop_cte_frame(&mut self) {
        self.ctes.pop();
    }

    fn enter_trigger(&mut self) -> Result<()> {
        if self.trigger_depth >= MAX_TRIGGER_DEPTH {
            return Err(Error::Constraint(format!(
                "too many levels of trigger recursion (limit {})",
                MAX_TRIGGER_DEPTH
            )));
        }
        self.trigger_depth += 1;
        Ok(())
    }

    fn exit_trigger(&mut self) {
        self.trigger_depth = self.trigger_depth.saturating_sub(1);
    }

    fn record_insert_id(&mut self, id: i64) {
        self.snapshot.last_insert_id = Some(id);
    }

    fn record_changes(&mut self, count: u64) {
        self.snapshot.total_changes += count;
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryTransaction;
    use crate::{
        error::{Error, Result},
        sql::{
            engine::{MAX_TRIGGER_DEPTH, Transaction},
            schema::{Column, Table},
            snapshot::Snapshot,
            types::{DataType, Value},
        },
    };

    fn table(name: &str) -> Table {
        Table {
            name: name.to_string(),
            columns: vec![Column {
                name: "a".to_string(),
                datatype: DataType::Integer,
                nullable: true,
                default: None,
                primary_key: false,
            }],
            triggers: vec![],
        }
    }

    #[test]
    fn test_rows_in_working_copy() -> Result<()> {
        let committed = Snapshot::default();
        let mut txn = MemoryTransaction::new(committed.clone());
        txn.create_table(table("t"))?;
        assert!(matches!(
            txn.create_table(table("t")),
            Err(Error::TableExists(_))
        ));

        txn.insert_row("t", vec![Value::Integer(1)])?;
        txn.insert_row("t", vec![Value::Integer(2)])?;
        txn.update_row("t", 0, vec![Value::Integer(10)])?;
        txn.delete_row("t", 1)?;
        assert_eq!(txn.scan_table("t")?, vec![vec![Value::Integer(10)]]);
        assert!(matches!(
            txn.scan_table("missing"),
            Err(Error::TableNotFound(_))
        ));

        // The committed snapshot is untouched until the working copy is taken back
        assert!(committed.tables.is_empty());
        assert_eq!(txn.into_snapshot().tables.len(), 1);
        Ok(())
    }

    #[test]
    fn test_cte_shadows_table() -> Result<()> {
        let mut txn = MemoryTransaction::new(Snapshot::default());
        txn.create_table(table("t"))?;
        txn.push_cte_frame();
        txn.bind_cte("t", vec!["x".to_string()], vec![vec![Value::from("cte")]]);
        assert_eq!(txn.read_source("t")?.0, vec!["x".to_string()]);
        txn.pop_cte_frame();
        assert_eq!(txn.read_source("t")?.0, vec!["a".to_string()]);
        Ok(())
    }

    #[test]
    fn test_trigger_depth_limit() -> Result<()> {
        let mut txn = MemoryTransaction::new(Snapshot::default());
        for _ in 0..MAX_TRIGGER_DEPTH {
            txn.enter_trigger()?;
        }
        assert!(matches!(txn.enter_trigger(), Err(Error::Constraint(_))));
        txn.exit_trigger();
        txn.enter_trigger()?;
        Ok(())
    }
}
