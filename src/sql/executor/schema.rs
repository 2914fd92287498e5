use tracing::debug;

use crate::{
    error::{Error, Result},
    sql::{
        engine::Transaction,
        executor::{Executor, ResultSet, expression::Scope},
        plan::{AlterOperation, Node},
        schema::{Column, Table, Trigger},
        types::{DataType, Row, Value},
    },
};

/// CREATE TABLE executor
pub struct CreateTable {
    schema: Table,
    if_not_exists: bool,
}

impl CreateTable {
    pub fn new(schema: Table, if_not_exists: bool) -> Box<Self> {
        Box::new(Self {
            schema,
            if_not_exists,
        })
    }
}

impl<T: Transaction> Executor<T> for CreateTable {
    fn execute(self: Box<Self>, txn: &mut T, _outer: Option<&Scope<'_>>) -> Result<ResultSet> {
        let table_name = self.schema.name.clone();
        if self.if_not_exists && txn.get_table(&table_name)?.is_some() {
            return Ok(ResultSet::CreateTable { table_name });
        }
        txn.create_table(self.schema)?;
        Ok(ResultSet::CreateTable { table_name })
    }
}

/// CREATE TABLE ... AS SELECT executor
///
/// Column types come from the first non-NULL value of each column; a
/// column without values, or with values of incompatible types, is
/// typed ANY. The new table has no primary key.
pub struct CreateTableAs {
    table_name: String,
    if_not_exists: bool,
    source: Node,
}

impl CreateTableAs {
    pub fn new(table_name: String, if_not_exists: bool, source: Node) -> Box<Self> {
        Box::new(Self {
            table_name,
            if_not_exists,
            source,
        })
    }
}

/// Type shared by every non-NULL value of a column
fn infer_type<'a>(values: impl Iterator<Item = &'a Value>) -> DataType {
    let mut inferred = None;
    for datatype in values.filter_map(|v| v.datatype()) {
        match inferred {
            None => inferred = Some(datatype),
            Some(t) if t == datatype => {}
            Some(DataType::Float) if datatype == DataType::Integer => {}
            Some(DataType::Integer) if datatype == DataType::Float => {
                inferred = Some(DataType::Float)
            }
            Some(_) => return DataType::Any,
        }
    }
    inferred.unwrap_or(DataType::Any)
}

impl<T: Transaction + 'static> Executor<T> for CreateTableAs {
    fn execute(self: Box<Self>, txn: &mut T, outer: Option<&Scope<'_>>) -> Result<ResultSet> {
        let table_name = self.table_name;
        if txn.get_table(&table_name)?.is_some() {
            if self.if_not_exists {
                return Ok(ResultSet::CreateTable { table_name });
            }
            return Err(Error::TableExists(table_name));
        }

        let ResultSet::Scan { columns, rows } =
            <dyn Executor<T>>::build(self.source).execute(txn, outer)?
        else {
            return Err(Error::Internal("Unexpected result set".into()));
        };

        let schema = Table {
            name: table_name.clone(),
            columns: columns
                .iter()
                .enumerate()
                .map(|(i, c)| Column {
                    name: c.name.clone(),
                    datatype: infer_type(rows.iter().map(|r| &r[i])),
                    nullable: true,
                    default: None,
                    primary_key: false,
                })
                .collect(),
            triggers: Vec::new(),
        };
        let rows = rows
            .into_iter()
            .map(|row| schema.validate_row(row))
            .collect::<Result<Vec<_>>>()?;
        let count = rows.len();
        txn.create_table(schema.clone())?;
        txn.replace_table(&table_name, schema, rows)?;
        debug!(table = %table_name, rows = count, "created table from query");
        Ok(ResultSet::CreateTable { table_name })
    }
}

/// DROP TABLE executor
pub struct DropTable {
    table_name: String,
    if_exists: bool,
}

impl DropTable {
    pub fn new(table_name: String, if_exists: bool) -> Box<Self> {
        Box::new(Self {
            table_name,
            if_exists,
        })
    }
}

impl<T: Transaction> Executor<T> for DropTable {
    fn execute(self: Box<Self>, txn: &mut T, _outer: Option<&Scope<'_>>) -> Result<ResultSet> {
        if self.if_exists && txn.get_table(&self.table_name)?.is_none() {
            return Ok(ResultSet::DropTable {
                table_name: self.table_name,
            });
        }
        txn.drop_table(&self.table_name)?;
        Ok(ResultSet::DropTable {
            table_name: self.table_name,
        })
    }
}

/// ALTER TABLE executor
pub struct AlterTable {
    table_name: String,
    operation: AlterOperation,
}

impl AlterTable {
    pub fn new(table_name: String, operation: AlterOperation) -> Box<Self> {
        Box::new(Self {
            table_name,
            operation,
        })
    }
}

impl<T: Transaction> Executor<T> for AlterTable {
    fn execute(self: Box<Self>, txn: &mut T, _outer: Option<&Scope<'_>>) -> Result<ResultSet> {
        let mut table = txn.must_get_table(&self.table_name)?;
        let mut rows = txn.scan_table(&self.table_name)?;

        match self.operation {
            AlterOperation::AddColumn(column) => {
                if column.primary_key {
                    return Err(Error::Constraint(format!(
                        "cannot add a PRIMARY KEY column to table {}",
                        table.name
                    )));
                }
                if table.has_column(&column.name) {
                    return Err(Error::Resolution(format!(
                        "duplicate column name: {}",
                        column.name
                    )));
                }
                let default = column.default_value();
                if !column.nullable && default.is_null() && !rows.is_empty() {
                    return Err(Error::Constraint(format!(
                        "cannot add NOT NULL column {} without a default to non-empty table {}",
                        column.name, table.name
                    )));
                }
                let default = column.validate_value(&table.name, default)?;
                rows.iter_mut().for_each(|row| row.push(default.clone()));
                table.columns.push(column);
            }
            AlterOperation::RenameColumn { from, to } => {
                let index = table.get_col_index(&from)?;
                if table.has_column(&to) {
                    return Err(Error::Resolution(format!("duplicate column name: {}", to)));
                }
                table.columns[index].name = to.clone();
                for trigger in &mut table.triggers {
                    trigger.rename_column(&from, &to);
                }
            }
            AlterOperation::DropColumn(name) => {
                let index = table.get_col_index(&name)?;
                if table.columns[index].primary_key {
                    return Err(Error::PrimaryKeyDrop {
                        table: table.name,
                        column: name,
                    });
                }
                if table.columns.len() == 1 {
                    return Err(Error::Constraint(format!(
                        "cannot drop the only column of table {}",
                        table.name
                    )));
                }
                table.columns.remove(index);
                rows.iter_mut().for_each(|row: &mut Row| {
                    row.remove(index);
                });
            }
            AlterOperation::RenameTable(new_name) => {
                if txn.get_table(&new_name)?.is_some() {
                    return Err(Error::TableExists(new_name));
                }
                table.name = new_name.clone();
                for trigger in &mut table.triggers {
                    trigger.table_name = new_name.clone();
                }
            }
        }

        let table_name = table.name.clone();
        txn.replace_table(&self.table_name, table, rows)?;
        Ok(ResultSet::AlterTable { table_name })
    }
}

/// CREATE TRIGGER executor
pub struct CreateTrigger {
    trigger: Trigger,
    if_not_exists: bool,
}

impl CreateTrigger {
    pub fn new(trigger: Trigger, if_not_exists: bool) -> Box<Self> {
        Box::new(Self {
            trigger,
            if_not_exists,
        })
    }
}

impl<T: Transaction> Executor<T> for CreateTrigger {
    fn execute(self: Box<Self>, txn: &mut T, _outer: Option<&Scope<'_>>) -> Result<ResultSet> {
        let name = self.trigger.name.clone();
        let mut table = txn.must_get_table(&self.trigger.table_name)?;
        if txn.find_trigger(&name)?.is_some() {
            if self.if_not_exists {
                return Ok(ResultSet::CreateTrigger { name });
            }
            return Err(Error::Constraint(format!("trigger {} already exists", name)));
        }

        let rows = txn.scan_table(&table.name)?;
        table.triggers.push(self.trigger);
        txn.replace_table(&table.name.clone(), table, rows)?;
        debug!(trigger = %name, "created trigger");
        Ok(ResultSet::CreateTrigger { name })
    }
}

/// DROP TRIGGER executor
pub struct DropTrigger {
    name: String,
    if_exists: bool,
}

impl DropTrigger {
    pub fn new(name: String, if_exists: bool) -> Box<Self> {
        Box::new(Self { name, if_exists })
    }
}

impl<T: Transaction> Executor<T> for DropTrigger {
    fn execute(self: Box<Self>, txn: &mut T, _outer: Option<&Scope<'_>>) -> Result<ResultSet> {
        let Some(table_name) = txn.find_trigger(&self.name)? else {
            if self.if_exists {
                return Ok(ResultSet::DropTrigger { name: self.name });
            }
            return Err(Error::Resolution(format!("no such trigger: {}", self.name)));
        };

        let mut table = txn.must_get_table(&table_name)?;
        let rows = txn.scan_table(&table_name)?;
        table.triggers.retain(|t| t.name != self.name);
        txn.replace_table(&table_name, table, rows)?;
        Ok(ResultSet::DropTrigger { name: self.name })
    }
}

#[cfg(test)]
mod tests {
    use super::infer_type;
    use crate::sql::types::{DataType, Value};

    #[test]
    fn test_infer_type() {
        let values = [Value::Null, Value::Integer(1), Value::Float(2.5)];
        assert_eq!(infer_type(values.iter()), DataType::Float);
        let values = [Value::Integer(1), Value::from("a")];
        assert_eq!(infer_type(values.iter()), DataType::Any);
        assert_eq!(infer_type([Value::Null].iter()), DataType::Any);
        assert_eq!(infer_type([Value::from("x")].iter()), DataType::String);
    }
}
