use crate::{
    error::{Error, Result},
    sql::{
        engine::Transaction,
        executor::{
            ResultSet,
            expression::{Scope, evaluate, row_matches_where},
            trigger,
        },
        parser::ast::Expression,
        plan::ConflictPolicy,
        schema::{Table, TriggerEvent, TriggerTiming},
        types::{ColumnRef, DataType, Row, Value},
    },
};

use super::Executor;

/// Table columns qualified by the table name
fn table_columns(table: &Table) -> Vec<ColumnRef> {
    table
        .columns
        .iter()
        .map(|c| ColumnRef::new(Some(table.name.clone()), c.name.clone()))
        .collect()
}

/// Builds a full table row from inserted values.
//
// insert into tbl(d, c) values(1, 2);
//    a          b       c          d
// default   default     2          1
//
// insert into tbl values(1, 2, 3);
// a       b       c          d
// 1       2       3      default
fn make_row(table: &Table, columns: Option<&[String]>, values: Row) -> Result<Row> {
    match columns {
        Some(columns) => {
            if columns.len() != values.len() {
                return Err(Error::Resolution(format!(
                    "{} values for {} columns",
                    values.len(),
                    columns.len()
                )));
            }
            let mut row: Row = table.columns.iter().map(|c| c.default_value()).collect();
            let mut assigned = vec![false; row.len()];
            for (name, value) in columns.iter().zip(values) {
                let index = table.get_col_index(name)?;
                if assigned[index] {
                    return Err(Error::Resolution(format!(
                        "column {} specified more than once",
                        name
                    )));
                }
                assigned[index] = true;
                row[index] = value;
            }
            Ok(row)
        }
        None => {
            if values.len() > table.columns.len() {
                return Err(Error::Resolution(format!(
                    "table {} has {} columns but {} values were supplied",
                    table.name,
                    table.columns.len(),
                    values.len()
                )));
            }
            let given = values.len();
            let mut row = values;
            row.extend(table.columns.iter().skip(given).map(|c| c.default_value()));
            Ok(row)
        }
    }
}

/// Position of the row whose primary key equals the row's key
fn find_conflicting_row<T: Transaction>(txn: &T, table: &Table, row: &Row) -> Result<Option<usize>> {
    let Some(pk) = table.primary_key_index() else {
        return Ok(None);
    };
    Ok(txn.rows(&table.name)?.iter().position(|r| r[pk] == row[pk]))
}

fn unique_violation(table: &Table) -> Error {
    let column = table
        .primary_key_index()
        .map(|i| table.columns[i].name.as_str())
        .unwrap_or_default();
    Error::Constraint(format!("UNIQUE constraint failed: {}.{}", table.name, column))
}

/// Finds a row captured earlier: at its old position if unchanged,
/// otherwise by value. None if a trigger removed it.
fn locate<T: Transaction>(txn: &T, table: &str, position: usize, row: &Row) -> Result<Option<usize>> {
    let rows = txn.rows(table)?;
    if rows.get(position) == Some(row) {
        return Ok(Some(position));
    }
    Ok(rows.iter().position(|r| r == row))
}

/// Applies SET assignments, evaluated against the old row
fn assign<T: Transaction + 'static>(
    txn: &mut T,
    table: &Table,
    old: &Row,
    assignments: &[(String, Expression)],
    scope: &Scope<'_>,
) -> Result<Row> {
    let mut new = old.clone();
    for (name, expr) in assignments {
        let index = table.get_col_index(name)?;
        new[index] = evaluate(expr, scope, txn)?;
    }
    table.validate_row(new)
}

/// Writes a new row, firing the insert triggers around it
fn insert_new<T: Transaction + 'static>(txn: &mut T, table: &Table, row: Row) -> Result<()> {
    trigger::fire(txn, table, TriggerTiming::Before, TriggerEvent::Insert, None, Some(&row))?;
    // A BEFORE trigger may have written the same key
    if find_conflicting_row(txn, table, &row)?.is_some() {
        return Err(unique_violation(table));
    }
    txn.insert_row(&table.name, row.clone())?;
    if let Some(Value::Integer(id)) = table.get_primary_key(&row) {
        txn.record_insert_id(*id);
    }
    trigger::fire(txn, table, TriggerTiming::After, TriggerEvent::Insert, None, Some(&row))
}

/// Overwrites a row, firing the update triggers around it. Returns false
/// if a BEFORE trigger removed the row.
fn update_existing<T: Transaction + 'static>(
    txn: &mut T,
    table: &Table,
    position: usize,
    old: Row,
    new: Row,
) -> Result<bool> {
    if let Some(pk) = table.primary_key_index() {
        let taken = new[pk] != old[pk]
            && txn
                .rows(&table.name)?
                .iter()
                .enumerate()
                .any(|(i, r)| i != position && r[pk] == new[pk]);
        if taken {
            return Err(unique_violation(table));
        }
    }

    trigger::fire(txn, table, TriggerTiming::Before, TriggerEvent::Update, Some(&old), Some(&new))?;
    let Some(position) = locate(txn, &table.name, position, &old)? else {
        return Ok(false);
    };
    txn.update_row(&table.name, position, new.clone())?;
    trigger::fire(txn, table, TriggerTiming::After, TriggerEvent::Update, Some(&old), Some(&new))?;
    Ok(true)
}

/// Positions and contents of the rows matching a predicate, captured
/// before any of them is modified
fn select_targets<T: Transaction + 'static>(
    txn: &mut T,
    table: &Table,
    predicate: Option<&Expression>,
    outer: Option<&Scope<'_>>,
) -> Result<Vec<(usize, Row)>> {
    let columns = table_columns(table);
    let rows = txn.scan_table(&table.name)?;
    let mut targets = Vec::new();
    for (position, row) in rows.into_iter().enumerate() {
        let matches = match predicate {
            Some(expr) => row_matches_where(expr, &Scope::new(&columns, &row, outer), txn)?,
            None => true,
        };
        if matches {
            targets.push((position, row));
        }
    }
    Ok(targets)
}

/// Inserts one row under a conflict policy; returns whether a row was
/// written
fn insert_one<T: Transaction + 'static>(
    txn: &mut T,
    table: &Table,
    mut row: Row,
    conflict: &ConflictPolicy,
    outer: Option<&Scope<'_>>,
) -> Result<bool> {
    // An omitted integer primary key takes the next free value
    if let Some(pk) = table.primary_key_index() {
        if row[pk].is_null() && table.columns[pk].datatype == DataType::Integer {
            let max = txn
                .rows(&table.name)?
                .iter()
                .filter_map(|r| match r[pk] {
                    Value::Integer(i) => Some(i),
                    _ => None,
                })
                .max();
            let next = match max {
                Some(max) => max.checked_add(1).ok_or_else(|| {
                    Error::Constraint(format!("primary key of table {} is exhausted", table.name))
                })?,
                None => 1,
            };
            row[pk] = Value::Integer(next);
        }
    }
    let row = table.validate_row(row)?;

    let Some(position) = find_conflicting_row(txn, table, &row)? else {
        insert_new(txn, table, row)?;
        return Ok(true);
    };
    match conflict {
        ConflictPolicy::Abort => Err(unique_violation(table)),
        ConflictPolicy::Ignore => Ok(false),
        ConflictPolicy::Replace => {
            txn.delete_row(&table.name, position)?;
            insert_new(txn, table, row)?;
            Ok(true)
        }
        ConflictPolicy::Update { columns, predicate } => {
            let existing = txn.rows(&table.name)?[position].clone();
            let excluded_columns: Vec<ColumnRef> = table
                .columns
                .iter()
                .map(|c| ColumnRef::new(Some("excluded".to_string()), c.name.clone()))
                .collect();
            let excluded = Scope::new(&excluded_columns, &row, outer);
            let table_columns = table_columns(table);
            let scope = Scope::new(&table_columns, &existing, Some(&excluded));

            if let Some(predicate) = predicate {
                if !row_matches_where(predicate, &scope, txn)? {
                    return Ok(false);
                }
            }
            let new = assign(txn, table, &existing, columns, &scope)?;
            update_existing(txn, table, position, existing, new)
        }
    }
}

/// INSERT executor
pub struct Insert<T: Transaction> {
    table_name: String,
    columns: Option<Vec<String>>,
    source: Box<dyn Executor<T>>,
    conflict: ConflictPolicy,
}

impl<T: Transaction> Insert<T> {
    pub fn new(
        table_name: String,
        columns: Option<Vec<String>>,
        source: Box<dyn Executor<T>>,
        conflict: ConflictPolicy,
    ) -> Box<Self> {
        Box::new(Self {
            table_name,
            columns,
            source,
            conflict,
        })
    }
}

impl<T: Transaction + 'static> Executor<T> for Insert<T> {
    fn execute(self: Box<Self>, txn: &mut T, outer: Option<&Scope<'_>>) -> Result<ResultSet> {
        let table = txn.must_get_table(&self.table_name)?;
        let ResultSet::Scan { rows, .. } = self.source.execute(txn, outer)? else {
            return Err(Error::Internal("Unexpected result set".into()));
        };

        let mut count = 0;
        for values in rows {
            let row = make_row(&table, self.columns.as_deref(), values)?;
            if insert_one(txn, &table, row, &self.conflict, outer)? {
                count += 1;
            }
        }
        Ok(ResultSet::Insert { count })
    }
}

/// UPDATE executor
pub struct Update {
    table_name: String,
    columns: Vec<(String, Expression)>,
    predicate: Option<Expression>,
}

impl Update {
    pub fn new(
        table_name: String,
        columns: Vec<(String, Expression)>,
        predicate: Option<Expression>,
    ) -> Box<Self> {
        Box::new(Self {
            table_name,
            columns,
            predicate,
        })
    }
}

impl<T: Transaction + 'static> Executor<T> for Update {
    fn execute(self: Box<Self>, txn: &mut T, outer: Option<&Scope<'_>>) -> Result<ResultSet> {
        let table = txn.must_get_table(&self.table_name)?;
        for (name, _) in &self.columns {
            table.get_col_index(name)?;
        }
        let columns = table_columns(&table);

        let mut count = 0;
        for (position, row) in select_targets(txn, &table, self.predicate.as_ref(), outer)? {
            let Some(position) = locate(txn, &table.name, position, &row)? else {
                continue;
            };
            let scope = Scope::new(&columns, &row, outer);
            let new = assign(txn, &table, &row, &self.columns, &scope)?;
            if update_existing(txn, &table, position, row, new)? {
                count += 1;
            }
        }
        Ok(ResultSet::Update { count })
    }
}

/// DELETE executor
pub struct Delete {
    table_name: String,
    predicate: Option<Expression>,
}

impl Delete {
    pub fn new(table_name: String, predicate: Option<Expression>) -> Box<Self> {
        Box::new(Self {
            table_name,
            predicate,
        })
    }
}

impl<T: Transaction + 'static> Executor<T> for Delete {
    fn execute(self: Box<Self>, txn: &mut T, outer: Option<&Scope<'_>>) -> Result<ResultSet> {
        let table = txn.must_get_table(&self.table_name)?;

        let mut count = 0;
        for (position, row) in select_targets(txn, &table, self.predicate.as_ref(), outer)? {
            if locate(txn, &table.name, position, &row)?.is_none() {
                continue;
            }
            trigger::fire(txn, &table, TriggerTiming::Before, TriggerEvent::Delete, Some(&row), None)?;
            let Some(position) = locate(txn, &table.name, position, &row)? else {
                continue;
            };
            txn.delete_row(&table.name, position)?;
            trigger::fire(txn, &table, TriggerTiming::After, TriggerEvent::Delete, Some(&row), None)?;
            count += 1;
        }
        Ok(ResultSet::Delete { count })
    }
}

#[cfg(test)]
mod tests {
    use super::make_row;
    use crate::{
        error::{Error, Result},
        sql::{
            schema::{Column, Table},
            types::{DataType, Value},
        },
    };

    fn table() -> Table {
        let column = |name: &str, default: Option<Value>| Column {
            name: name.to_string(),
            datatype: DataType::Any,
            nullable: true,
            default,
            primary_key: false,
        };
        Table {
            name: "tbl".to_string(),
            columns: vec![
                column("a", None),
                column("b", Some(Value::Integer(7))),
                column("c", None),
            ],
            triggers: vec![],
        }
    }

    #[test]
    fn test_make_row_with_column_list() -> Result<()> {
        let table = table();
        let columns = vec!["c".to_string(), "a".to_string()];
        assert_eq!(
            make_row(&table, Some(columns.as_slice()), vec![Value::Integer(1), Value::Integer(2)])?,
            vec![Value::Integer(2), Value::Integer(7), Value::Integer(1)]
        );

        let duplicate = vec!["a".to_string(), "a".to_string()];
        assert!(matches!(
            make_row(&table, Some(duplicate.as_slice()), vec![Value::Null, Value::Null]),
            Err(Error::Resolution(_))
        ));
        assert!(matches!(
            make_row(&table, Some(columns.as_slice()), vec![Value::Null]),
            Err(Error::Resolution(_))
        ));
        let unknown = vec!["zz".to_string()];
        assert!(matches!(
            make_row(&table, Some(unknown.as_slice()), vec![Value::Null]),
            Err(Error::Resolution(_))
        ));
        Ok(())
    }

    #[test]
    fn test_make_row_pads_with_defaults() -> Result<()> {
        let table = table();
        assert_eq!(
            make_row(&table, None, vec![Value::Integer(1)])?,
            vec![Value::Integer(1), Value::Integer(7), Value::Null]
        );
        assert!(matches!(
            make_row(&table, None, vec![Value::Null; 4]),
            Err(Error::Resolution(_))
        ));
        Ok(())
    }
}
