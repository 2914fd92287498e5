use crate::{
    error::{Error, Result},
    sql::{
        engine::Transaction,
        executor::expression::{Scope, row_matches_where},
        parser::ast::{Expression, JoinType},
        types::{Row, Value},
    },
};

use super::{Executor, ResultSet};

/// Nested Loop Join executor - filtered Cartesian product of two sources.
///
/// LEFT joins keep unmatched left rows padded with NULLs, RIGHT joins
/// keep unmatched right rows. Output columns are always left then right.
pub struct NestedLoopJoin<T: Transaction> {
    left: Box<dyn Executor<T>>,
    right: Box<dyn Executor<T>>,
    predicate: Option<Expression>,
    join_type: JoinType,
}

impl<T: Transaction> NestedLoopJoin<T> {
    pub fn new(
        left: Box<dyn Executor<T>>,
        right: Box<dyn Executor<T>>,
        predicate: Option<Expression>,
        join_type: JoinType,
    ) -> Box<Self> {
        Box::new(Self {
            left,
            right,
            predicate,
            join_type,
        })
    }
}

impl<T: Transaction + 'static> Executor<T> for NestedLoopJoin<T> {
    fn execute(self: Box<Self>, txn: &mut T, outer: Option<&Scope<'_>>) -> Result<ResultSet> {
        // Execute left side first
        let ResultSet::Scan {
            columns: lcols,
            rows: lrows,
        } = self.left.execute(txn, outer)?
        else {
            return Err(Error::Internal("Unexpected result set".into()));
        };
        let ResultSet::Scan {
            columns: rcols,
            rows: rrows,
        } = self.right.execute(txn, outer)?
        else {
            return Err(Error::Internal("Unexpected result set".into()));
        };

        let mut new_cols = lcols.clone();
        new_cols.extend(rcols.iter().cloned());

        let mut new_rows = Vec::new();
        let matches = |txn: &mut T, row: &Row| -> Result<bool> {
            match &self.predicate {
                Some(expr) => row_matches_where(expr, &Scope::new(&new_cols, row, outer), txn),
                // No predicate means CROSS JOIN
                None => Ok(true),
            }
        };

        if self.join_type == JoinType::Right {
            for rrow in &rrows {
                let mut matched = false;
                for lrow in &lrows {
                    let row: Row = lrow.iter().chain(rrow).cloned().collect();
                    if matches(txn, &row)? {
                        new_rows.push(row);
                        matched = true;
                    }
                }
                if !matched {
                    let mut row = vec![Value::Null; lcols.len()];
                    row.extend(rrow.iter().cloned());
                    new_rows.push(row);
                }
            }
        } else {
            // Nested loop: for each left row, iterate through all right rows
            for lrow in &lrows {
                let mut matched = false;
                for rrow in &rrows {
                    let row: Row = lrow.iter().chain(rrow).cloned().collect();
                    if matches(txn, &row)? {
                        new_rows.push(row);
                        matched = true;
                    }
                }
                // For outer joins, fill with NULL if no match found
                if self.join_type == JoinType::Left && !matched {
                    let mut row = lrow.clone();
                    row.extend(std::iter::repeat_n(Value::Null, rcols.len()));
                    new_rows.push(row);
                }
            }
        }

        Ok(ResultSet::Scan {
            columns: new_cols,
            rows: new_rows,
        })
    }
}
