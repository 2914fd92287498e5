use std::collections::HashSet;

use crate::{
    error::{Error, Result},
    sql::{
        engine::Transaction,
        executor::expression::Scope,
        parser::ast::SetOperator,
        types::Row,
    },
};

use super::{Executor, ResultSet};

/// Compound query executor: UNION [ALL], INTERSECT and EXCEPT.
///
/// Output columns are those of the left query. Only UNION ALL keeps
/// duplicates; the other operators return distinct rows.
pub struct SetOperation<T: Transaction> {
    op: SetOperator,
    all: bool,
    left: Box<dyn Executor<T>>,
    right: Box<dyn Executor<T>>,
}

impl<T: Transaction> SetOperation<T> {
    pub fn new(
        op: SetOperator,
        all: bool,
        left: Box<dyn Executor<T>>,
        right: Box<dyn Executor<T>>,
    ) -> Box<Self> {
        Box::new(Self {
            op,
            all,
            left,
            right,
        })
    }
}

/// Removes repeated rows, keeping the first occurrence
pub fn dedup(rows: Vec<Row>) -> Vec<Row> {
    let mut seen = HashSet::new();
    rows.into_iter().filter(|row| seen.insert(row.clone())).collect()
}

impl<T: Transaction> Executor<T> for SetOperation<T> {
    fn execute(self: Box<Self>, txn: &mut T, outer: Option<&Scope<'_>>) -> Result<ResultSet> {
        let Self {
            op,
            all,
            left,
            right,
        } = *self;
        let ResultSet::Scan {
            columns,
            rows: left,
        } = left.execute(txn, outer)?
        else {
            return Err(Error::Internal("Unexpected result set".into()));
        };
        let ResultSet::Scan {
            columns: rcols,
            rows: right,
        } = right.execute(txn, outer)?
        else {
            return Err(Error::Internal("Unexpected result set".into()));
        };
        if columns.len() != rcols.len() {
            let op = match op {
                SetOperator::Union if all => "UNION ALL",
                SetOperator::Union => "UNION",
                SetOperator::Intersect => "INTERSECT",
                SetOperator::Except => "EXCEPT",
            };
            return Err(Error::Resolution(format!(
                "SELECTs to the left and right of {} do not have the same number of result columns",
                op
            )));
        }

        let rows = match op {
            SetOperator::Union => {
                let mut rows = left;
                rows.extend(right);
                if all { rows } else { dedup(rows) }
            }
            SetOperator::Intersect => {
                let right: HashSet<Row> = right.into_iter().collect();
                dedup(left.into_iter().filter(|row| right.contains(row)).collect())
            }
            SetOperator::Except => {
                let right: HashSet<Row> = right.into_iter().collect();
                dedup(left.into_iter().filter(|row| !right.contains(row)).collect())
            }
        };
        Ok(ResultSet::Scan { columns, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::dedup;
    use crate::sql::types::Value;

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let rows = vec![
            vec![Value::Integer(2)],
            vec![Value::Integer(1)],
            vec![Value::Integer(2)],
            vec![Value::Null],
            vec![Value::Null],
        ];
        assert_eq!(
            dedup(rows),
            vec![vec![Value::Integer(2)], vec![Value::Integer(1)], vec![Value::Null]]
        );
    }
}
