use std::collections::HashSet;

use tracing::warn;

use crate::{
    error::{Error, Result},
    sql::{
        engine::Transaction,
        executor::expression::Scope,
        plan::{CtePlan, Node},
        types::{ColumnRef, Row},
    },
};

use super::{Executor, ResultSet};

/// Iteration cap of a recursive common table expression
pub const MAX_RECURSION: usize = 10_000;

/// WITH executor - binds each common table expression in order, then runs
/// the main query. Bindings are released when the query ends, including
/// on error.
pub struct With {
    ctes: Vec<CtePlan>,
    source: Node,
}

impl With {
    pub fn new(ctes: Vec<CtePlan>, source: Node) -> Box<Self> {
        Box::new(Self { ctes, source })
    }
}

impl<T: Transaction + 'static> Executor<T> for With {
    fn execute(self: Box<Self>, txn: &mut T, outer: Option<&Scope<'_>>) -> Result<ResultSet> {
        let Self { ctes, source } = *self;
        txn.push_cte_frame();
        let result = bind_all(txn, ctes, outer)
            .and_then(|_| <dyn Executor<T>>::build(source).execute(txn, outer));
        txn.pop_cte_frame();
        result
    }
}

fn bind_all<T: Transaction + 'static>(
    txn: &mut T,
    ctes: Vec<CtePlan>,
    outer: Option<&Scope<'_>>,
) -> Result<()> {
    for cte in ctes {
        let (columns, rows) = run(txn, &cte.source, outer)?;
        let columns = column_names(&cte, &columns)?;
        let rows = match cte.recursive {
            Some((step, all)) => fixpoint(txn, &cte.name, &columns, rows, &step, all, outer)?,
            None => rows,
        };
        txn.bind_cte(&cte.name, columns, rows);
    }
    Ok(())
}

fn run<T: Transaction + 'static>(
    txn: &mut T,
    node: &Node,
    outer: Option<&Scope<'_>>,
) -> Result<(Vec<ColumnRef>, Vec<Row>)> {
    match <dyn Executor<T>>::build(node.clone()).execute(txn, outer)? {
        ResultSet::Scan { columns, rows } => Ok((columns, rows)),
        _ => Err(Error::Internal("Unexpected result set".into())),
    }
}

/// Declared column names of a CTE, or else the names of its query
fn column_names(cte: &CtePlan, columns: &[ColumnRef]) -> Result<Vec<String>> {
    if cte.columns.is_empty() {
        return Ok(columns.iter().map(|c| c.name.clone()).collect());
    }
    if cte.columns.len() != columns.len() {
        return Err(Error::Resolution(format!(
            "table {} has {} values for {} columns",
            cte.name,
            columns.len(),
            cte.columns.len()
        )));
    }
    Ok(cte.columns.clone())
}

/// Evaluates a recursive CTE: the recursive member is re-run with the CTE
/// bound to the rows of the previous iteration until it yields nothing
/// new. Without ALL, rows already produced are dropped.
fn fixpoint<T: Transaction + 'static>(
    txn: &mut T,
    name: &str,
    columns: &[String],
    anchor: Vec<Row>,
    step: &Node,
    all: bool,
    outer: Option<&Scope<'_>>,
) -> Result<Vec<Row>> {
    let mut seen: HashSet<Row> = HashSet::new();
    let mut result = Vec::new();
    let mut working = Vec::new();
    for row in anchor {
        if all || seen.insert(row.clone()) {
            working.push(row.clone());
            result.push(row);
        }
    }

    let mut iterations = 0;
    while !working.is_empty() {
        if iterations == MAX_RECURSION {
            warn!(cte = name, rows = result.len(), "recursion limit reached, result truncated");
            break;
        }
        iterations += 1;

        txn.bind_cte(name, columns.to_vec(), std::mem::take(&mut working));
        let (step_columns, rows) = run(txn, step, outer)?;
        if step_columns.len() != columns.len() {
            return Err(Error::Resolution(format!(
                "SELECTs to the left and right of UNION in {} do not have the same number of result columns",
                name
            )));
        }
        for row in rows {
            if all || seen.insert(row.clone()) {
                working.push(row.clone());
                result.push(row);
            }
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::column_names;
    use crate::{
        error::{Error, Result},
        sql::{
            plan::{CtePlan, Node},
            types::ColumnRef,
        },
    };

    fn cte(columns: &[&str]) -> CtePlan {
        CtePlan {
            name: "c".to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            source: Box::new(Node::Nothing),
            recursive: None,
        }
    }

    #[test]
    fn test_column_names() -> Result<()> {
        let columns = vec![ColumnRef::new(Some("t".to_string()), "a"), ColumnRef::bare("b")];
        assert_eq!(column_names(&cte(&[]), &columns)?, vec!["a", "b"]);
        assert_eq!(column_names(&cte(&["x", "y"]), &columns)?, vec!["x", "y"]);
        assert!(matches!(
            column_names(&cte(&["x"]), &columns),
            Err(Error::Resolution(_))
        ));
        Ok(())
    }
}
