use std::cmp::Ordering;

use crate::{
    error::{Error, Result},
    sql::{
        engine::Transaction,
        executor::{
            ResultSet,
            expression::{Scope, evaluate, row_matches_where},
            set::dedup,
        },
        parser::ast::{Consts, Expression, OrderDirection},
        plan::ProjectionItem,
        types::{ColumnRef, Value},
    },
};

use super::Executor;

/// Table scan executor: reads a catalog table or a common table
/// expression, qualifying every column with the alias or source name
pub struct Scan {
    table_name: String,
    alias: Option<String>,
}

impl Scan {
    pub fn new(table_name: String, alias: Option<String>) -> Box<Self> {
        Box::new(Self { table_name, alias })
    }
}

impl<T: Transaction> Executor<T> for Scan {
    fn execute(self: Box<Self>, txn: &mut T, _outer: Option<&Scope<'_>>) -> Result<ResultSet> {
        let (names, rows) = txn.read_source(&self.table_name)?;
        let qualifier = self.alias.unwrap_or(self.table_name);
        Ok(ResultSet::Scan {
            columns: names
                .into_iter()
                .map(|name| ColumnRef::new(Some(qualifier.clone()), name))
                .collect(),
            rows,
        })
    }
}

/// Derived table executor: `(SELECT ...) AS alias`
pub struct SubqueryScan<T: Transaction> {
    source: Box<dyn Executor<T>>,
    alias: String,
}

impl<T: Transaction> SubqueryScan<T> {
    pub fn new(source: Box<dyn Executor<T>>, alias: String) -> Box<Self> {
        Box::new(Self { source, alias })
    }
}

impl<T: Transaction> Executor<T> for SubqueryScan<T> {
    fn execute(self: Box<Self>, txn: &mut T, outer: Option<&Scope<'_>>) -> Result<ResultSet> {
        match self.source.execute(txn, outer)? {
            ResultSet::Scan { columns, rows } => Ok(ResultSet::Scan {
                columns: columns
                    .into_iter()
                    .map(|c| ColumnRef::new(Some(self.alias.clone()), c.name))
                    .collect(),
                rows,
            }),
            _ => Err(Error::Internal("Unexpected result set".into())),
        }
    }
}

/// Literal rows of `INSERT ... VALUES`
pub struct Values {
    rows: Vec<Vec<Expression>>,
}

impl Values {
    pub fn new(rows: Vec<Vec<Expression>>) -> Box<Self> {
        Box::new(Self { rows })
    }
}

impl<T: Transaction + 'static> Executor<T> for Values {
    fn execute(self: Box<Self>, txn: &mut T, outer: Option<&Scope<'_>>) -> Result<ResultSet> {
        let scope = Scope::empty(outer);
        let mut rows = Vec::with_capacity(self.rows.len());
        for exprs in &self.rows {
            rows.push(
                exprs
                    .iter()
                    .map(|e| evaluate(e, &scope, txn))
                    .collect::<Result<Vec<_>>>()?,
            );
        }
        let width = self.rows.first().map_or(0, Vec::len);
        Ok(ResultSet::Scan {
            columns: (1..=width)
                .map(|i| ColumnRef::bare(format!("column{}", i)))
                .collect(),
            rows,
        })
    }
}

/// Source of a SELECT without FROM: a single row without columns
pub struct Nothing;

impl Nothing {
    pub fn new() -> Box<Self> {
        Box::new(Self {})
    }
}

impl<T: Transaction> Executor<T> for Nothing {
    fn execute(self: Box<Self>, _txn: &mut T, _outer: Option<&Scope<'_>>) -> Result<ResultSet> {
        Ok(ResultSet::Scan {
            columns: Vec::new(),
            rows: vec![Vec::new()],
        })
    }
}

/// WHERE / HAVING executor
pub struct Filter<T: Transaction> {
    source: Box<dyn Executor<T>>,
    predicate: Expression,
}

impl<T: Transaction> Filter<T> {
    pub fn new(source: Box<dyn Executor<T>>, predicate: Expression) -> Box<Self> {
        Box::new(Self { source, predicate })
    }
}

impl<T: Transaction + 'static> Executor<T> for Filter<T> {
    fn execute(self: Box<Self>, txn: &mut T, outer: Option<&Scope<'_>>) -> Result<ResultSet> {
        match self.source.execute(txn, outer)? {
            ResultSet::Scan { columns, rows } => {
                let mut new_rows = Vec::new();
                for row in rows {
                    let scope = Scope::new(&columns, &row, outer);
                    if row_matches_where(&self.predicate, &scope, txn)? {
                        new_rows.push(row);
                    }
                }
                Ok(ResultSet::Scan {
                    columns,
                    rows: new_rows,
                })
            }
            _ => Err(Error::Internal("Unexpected result set".into())),
        }
    }
}

/// Projection executor - computes the output columns.
///
/// ORDER BY keys are evaluated here, after the output row, so they can
/// refer to output aliases (first), source columns, or output positions
/// (integer literals). They are appended as hidden columns for `Order`.
pub struct Projection<T: Transaction> {
    source: Box<dyn Executor<T>>,
    items: Vec<ProjectionItem>,
    order_by: Vec<Expression>,
}

impl<T: Transaction> Projection<T> {
    pub fn new(
        source: Box<dyn Executor<T>>,
        items: Vec<ProjectionItem>,
        order_by: Vec<Expression>,
    ) -> Box<Self> {
        Box::new(Self {
            source,
            items,
            order_by,
        })
    }
}

/// Where an output value comes from
enum Output<'a> {
    Column(usize),
    Expr(&'a Expression),
}

impl<T: Transaction + 'static> Executor<T> for Projection<T> {
    fn execute(self: Box<Self>, txn: &mut T, outer: Option<&Scope<'_>>) -> Result<ResultSet> {
        let ResultSet::Scan { columns, rows } = self.source.execute(txn, outer)? else {
            return Err(Error::Internal("Unexpected result set".into()));
        };

        let mut new_cols = Vec::new();
        let mut outputs = Vec::new();
        for item in &self.items {
            match item {
                ProjectionItem::Wildcard => {
                    for (i, column) in columns.iter().enumerate() {
                        // Aggregate results are internal
                        if !column.name.starts_with('#') {
                            new_cols.push(column.clone());
                            outputs.push(Output::Column(i));
                        }
                    }
                }
                ProjectionItem::QualifiedWildcard(table) => {
                    let before = outputs.len();
                    for (i, column) in columns.iter().enumerate() {
                        if column.table.as_deref() == Some(table.as_str()) {
                            new_cols.push(column.clone());
                            outputs.push(Output::Column(i));
                        }
                    }
                    if outputs.len() == before {
                        return Err(Error::Resolution(format!("no such table: {}", table)));
                    }
                }
                ProjectionItem::Expr(expr, name) => {
                    new_cols.push(ColumnRef::bare(name.clone()));
                    outputs.push(Output::Expr(expr));
                }
            }
        }
        let width = new_cols.len();

        let mut new_rows = Vec::with_capacity(rows.len());
        for row in &rows {
            let scope = Scope::new(&columns, row, outer);
            let mut new_row = Vec::with_capacity(width + self.order_by.len());
            for output in &outputs {
                new_row.push(match output {
                    Output::Column(i) => row[*i].clone(),
                    Output::Expr(expr) => evaluate(expr, &scope, txn)?,
                });
            }

            for key in &self.order_by {
                let value = match key {
                    Expression::Consts(Consts::Integer(position)) => {
                        let index = usize::try_from(*position)
                            .ok()
                            .filter(|p| (1..=width).contains(p))
                            .ok_or_else(|| {
                                Error::Resolution(format!(
                                    "ORDER BY term {} out of range, expected 1 to {}",
                                    position, width
                                ))
                            })?;
                        new_row[index - 1].clone()
                    }
                    key => {
                        // Output aliases shadow source columns
                        let output = Scope::new(&new_cols, &new_row[..width], Some(&scope));
                        evaluate(key, &output, txn)?
                    }
                };
                new_row.push(value);
            }
            new_rows.push(new_row);
        }

        new_cols.extend((0..self.order_by.len()).map(|i| ColumnRef::bare(format!("#order{}", i))));
        Ok(ResultSet::Scan {
            columns: new_cols,
            rows: new_rows,
        })
    }
}

/// ORDER BY executor - stable sort on the trailing key columns appended by
/// the projection, which are then dropped
pub struct Order<T: Transaction> {
    source: Box<dyn Executor<T>>,
    directions: Vec<OrderDirection>,
}

impl<T: Transaction> Order<T> {
    pub fn new(source: Box<dyn Executor<T>>, directions: Vec<OrderDirection>) -> Box<Self> {
        Box::new(Self { source, directions })
    }
}

impl<T: Transaction> Executor<T> for Order<T> {
    fn execute(self: Box<Self>, txn: &mut T, outer: Option<&Scope<'_>>) -> Result<ResultSet> {
        match self.source.execute(txn, outer)? {
            ResultSet::Scan {
                mut columns,
                mut rows,
            } => {
                let width = columns.len().checked_sub(self.directions.len()).ok_or_else(|| {
                    Error::Internal("order keys missing from projection".into())
                })?;

                // Multi-column sort: compare rows key by key according to ORDER BY clause
                // - If comparison is Equal, continue to next key
                // - If Less/Greater, apply ASC/DESC direction and return
                rows.sort_by(|row1, row2| {
                    for (i, direction) in self.directions.iter().enumerate() {
                        match row1[width + i].sort_cmp(&row2[width + i]) {
                            Ordering::Equal => {}
                            o if *direction == OrderDirection::Asc => return o,
                            o => return o.reverse(),
                        }
                    }
                    Ordering::Equal
                });

                columns.truncate(width);
                for row in &mut rows {
                    row.truncate(width);
                }
                Ok(ResultSet::Scan { columns, rows })
            }
            _ => Err(Error::Internal("Unexpected result set".into())),
        }
    }
}

/// DISTINCT executor - keeps the first occurrence of each row
pub struct Distinct<T: Transaction> {
    source: Box<dyn Executor<T>>,
}

impl<T: Transaction> Distinct<T> {
    pub fn new(source: Box<dyn Executor<T>>) -> Box<Self> {
        Box::new(Self { source })
    }
}

impl<T: Transaction> Executor<T> for Distinct<T> {
    fn execute(self: Box<Self>, txn: &mut T, outer: Option<&Scope<'_>>) -> Result<ResultSet> {
        match self.source.execute(txn, outer)? {
            ResultSet::Scan { columns, rows } => Ok(ResultSet::Scan {
                columns,
                rows: dedup(rows),
            }),
            _ => Err(Error::Internal("Unexpected result set".into())),
        }
    }
}

/// Evaluates a LIMIT/OFFSET expression; negative means unbounded (limit)
/// or zero (offset)
fn evaluate_count<T: Transaction + 'static>(
    expr: &Expression,
    txn: &mut T,
    outer: Option<&Scope<'_>>,
) -> Result<Option<usize>> {
    match evaluate(expr, &Scope::empty(outer), txn)?.to_numeric() {
        Some(Value::Integer(i)) => Ok(usize::try_from(i).ok()),
        _ => Err(Error::TypeMismatch(format!(
            "LIMIT and OFFSET require an integer, got {}",
            expr
        ))),
    }
}

/// LIMIT executor - restricts the number of rows returned
pub struct Limit<T: Transaction> {
    source: Box<dyn Executor<T>>,
    limit: Expression,
}

impl<T: Transaction> Limit<T> {
    pub fn new(source: Box<dyn Executor<T>>, limit: Expression) -> Box<Self> {
        Box::new(Self { source, limit })
    }
}

impl<T: Transaction + 'static> Executor<T> for Limit<T> {
    fn execute(self: Box<Self>, txn: &mut T, outer: Option<&Scope<'_>>) -> Result<ResultSet> {
        let limit = evaluate_count(&self.limit, txn, outer)?.unwrap_or(usize::MAX);
        match self.source.execute(txn, outer)? {
            ResultSet::Scan { columns, rows } => Ok(ResultSet::Scan {
                columns,
                rows: rows.into_iter().take(limit).collect(),
            }),
            _ => Err(Error::Internal("Unexpected result set".into())),
        }
    }
}

/// OFFSET executor - skips the first N rows
pub struct Offset<T: Transaction> {
    source: Box<dyn Executor<T>>,
    offset: Expression,
}

impl<T: Transaction> Offset<T> {
    pub fn new(source: Box<dyn Executor<T>>, offset: Expression) -> Box<Self> {
        Box::new(Self { source, offset })
    }
}

impl<T: Transaction + 'static> Executor<T> for Offset<T> {
    fn execute(self: Box<Self>, txn: &mut T, outer: Option<&Scope<'_>>) -> Result<ResultSet> {
        let offset = evaluate_count(&self.offset, txn, outer)?.unwrap_or(0);
        match self.source.execute(txn, outer)? {
            ResultSet::Scan { columns, rows } => Ok(ResultSet::Scan {
                columns,
                rows: rows.into_iter().skip(offset).collect(),
            }),
            _ => Err(Error::Internal("Unexpected result set".into())),
        }
    }
}
