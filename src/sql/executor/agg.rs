use std::collections::{HashMap, HashSet};

use crate::{
    error::{Error, Result},
    sql::{
        engine::Transaction,
        executor::expression::{Scope, evaluate},
        parser::ast::Expression,
        types::{ColumnRef, Row, Value},
    },
};

use super::{Executor, ResultSet};

/// Whether a call is an aggregate: MIN and MAX are only aggregates with a
/// single argument
pub fn is_aggregate(name: &str, args: usize) -> bool {
    match name {
        "COUNT" | "SUM" | "AVG" | "TOTAL" | "GROUP_CONCAT" => true,
        "MIN" | "MAX" => args == 1,
        _ => false,
    }
}

/// Aggregate executor - groups the source rows and computes the aggregate
/// calls of each group.
///
/// Each output row is the group's first source row (NULLs for the single
/// group of an empty input) followed by one value per aggregate call, in
/// columns named `#agg0`, `#agg1`, ...
pub struct Aggregate<T: Transaction> {
    source: Box<dyn Executor<T>>,
    group_by: Vec<Expression>,
    aggregates: Vec<Expression>,
}

impl<T: Transaction> Aggregate<T> {
    pub fn new(
        source: Box<dyn Executor<T>>,
        group_by: Vec<Expression>,
        aggregates: Vec<Expression>,
    ) -> Box<Self> {
        Box::new(Self {
            source,
            group_by,
            aggregates,
        })
    }
}

impl<T: Transaction + 'static> Executor<T> for Aggregate<T> {
    fn execute(self: Box<Self>, txn: &mut T, outer: Option<&Scope<'_>>) -> Result<ResultSet> {
        let ResultSet::Scan { columns, rows } = self.source.execute(txn, outer)? else {
            return Err(Error::Internal("Unexpected result set".into()));
        };

        // Groups in order of first appearance
        let mut groups: Vec<Vec<Row>> = Vec::new();
        if self.group_by.is_empty() {
            groups.push(rows);
        } else {
            let mut index: HashMap<Vec<Value>, usize> = HashMap::new();
            for row in rows {
                let scope = Scope::new(&columns, &row, outer);
                let key = self
                    .group_by
                    .iter()
                    .map(|e| evaluate(e, &scope, txn))
                    .collect::<Result<Vec<_>>>()?;
                match index.get(&key) {
                    Some(&i) => groups[i].push(row),
                    None => {
                        index.insert(key, groups.len());
                        groups.push(vec![row]);
                    }
                }
            }
        }

        let mut new_rows = Vec::with_capacity(groups.len());
        for group in groups {
            let mut new_row = match group.first() {
                Some(row) => row.clone(),
                None => vec![Value::Null; columns.len()],
            };
            for expr in &self.aggregates {
                let Expression::Function {
                    name,
                    args,
                    distinct,
                } = expr
                else {
                    return Err(Error::Internal(format!("{} is not an aggregate", expr)));
                };

                let mut values = Vec::with_capacity(group.len());
                for row in &group {
                    let scope = Scope::new(&columns, row, outer);
                    values.push(
                        args.iter()
                            .map(|arg| evaluate(arg, &scope, txn))
                            .collect::<Result<Row>>()?,
                    );
                }
                if *distinct {
                    let mut seen = HashSet::new();
                    values.retain(|v| seen.insert(v.first().cloned().unwrap_or(Value::Null)));
                }

                let calculator = <dyn Calculator>::build(name)?;
                new_row.push(calculator.calc(&values)?);
            }
            new_rows.push(new_row);
        }

        let mut new_cols = columns;
        new_cols.extend((0..self.aggregates.len()).map(|i| ColumnRef::bare(format!("#agg{}", i))));
        Ok(ResultSet::Scan {
            columns: new_cols,
            rows: new_rows,
        })
    }
}

/// Trait for aggregate function calculations over the argument values of
/// one group, one entry per source row
pub trait Calculator {
    fn calc(&self, args: &[Row]) -> Result<Value>;
}

impl dyn Calculator {
    /// Runtime dispatch to appropriate calculator based on function name
    pub fn build(func_name: &str) -> Result<Box<dyn Calculator>> {
        Ok(match func_name {
            "COUNT" => Count::new(),
            "SUM" => Sum::new(),
            "TOTAL" => Total::new(),
            "MIN" => Min::new(),
            "MAX" => Max::new(),
            "AVG" => Avg::new(),
            "GROUP_CONCAT" => GroupConcat::new(),
            _ => {
                return Err(Error::UnknownFunction(format!(
                    "{}() is not an aggregate",
                    func_name
                )));
            }
        })
    }
}

/// First argument of each row, NULLs skipped
fn non_null(args: &[Row]) -> impl Iterator<Item = &Value> {
    args.iter()
        .filter_map(|row| row.first())
        .filter(|v| !v.is_null())
}

/// COUNT - counts rows (`COUNT(*)`) or non-null values
pub struct Count;

impl Count {
    fn new() -> Box<Self> {
        Box::new(Self {})
    }
}

impl Calculator for Count {
    fn calc(&self, args: &[Row]) -> Result<Value> {
        let count = if args.first().is_some_and(|row| row.is_empty()) {
            args.len()
        } else {
            non_null(args).count()
        };
        Ok(Value::Integer(count as i64))
    }
}

/// MIN - smallest non-null value, in ORDER BY order
pub struct Min;

impl Min {
    fn new() -> Box<Self> {
        Box::new(Self {})
    }
}

impl Calculator for Min {
    fn calc(&self, args: &[Row]) -> Result<Value> {
        Ok(non_null(args)
            .min_by(|a, b| a.sort_cmp(b))
            .cloned()
            .unwrap_or(Value::Null))
    }
}

/// MAX - largest non-null value, in ORDER BY order
pub struct Max;

impl Max {
    fn new() -> Box<Self> {
        Box::new(Self {})
    }
}

impl Calculator for Max {
    fn calc(&self, args: &[Row]) -> Result<Value> {
        Ok(non_null(args)
            .max_by(|a, b| a.sort_cmp(b))
            .cloned()
            .unwrap_or(Value::Null))
    }
}

/// SUM - integer sum while every input is an integer and it does not
/// overflow, otherwise a real; NULL without input
pub struct Sum;

impl Sum {
    fn new() -> Box<Self> {
        Box::new(Self {})
    }
}

impl Calculator for Sum {
    fn calc(&self, args: &[Row]) -> Result<Value> {
        let mut int_sum: Option<i64> = Some(0);
        let mut float_sum = 0.0;
        let mut seen = false;
        for value in non_null(args) {
            seen = true;
            match value.to_numeric() {
                Some(Value::Integer(v)) => {
                    int_sum = int_sum.and_then(|s| s.checked_add(v));
                    float_sum += v as f64;
                }
                Some(Value::Float(v)) => {
                    int_sum = None;
                    float_sum += v;
                }
                _ => {
                    return Err(Error::TypeMismatch(format!(
                        "cannot sum {} value '{}'",
                        value.type_name(),
                        value
                    )));
                }
            }
        }

        Ok(match (seen, int_sum) {
            (false, _) => Value::Null,
            (true, Some(s)) => Value::Integer(s),
            (true, None) if float_sum.is_finite() => Value::Float(float_sum),
            (true, None) => Value::Null,
        })
    }
}

/// TOTAL - like SUM, but always a real and 0.0 without input
pub struct Total;

impl Total {
    fn new() -> Box<Self> {
        Box::new(Self {})
    }
}

impl Calculator for Total {
    fn calc(&self, args: &[Row]) -> Result<Value> {
        Ok(match Sum::new().calc(args)? {
            Value::Integer(i) => Value::Float(i as f64),
            Value::Null => Value::Float(0.0),
            v => v,
        })
    }
}

/// AVG - calculates average of values in a column
pub struct Avg;

impl Avg {
    fn new() -> Box<Self> {
        Box::new(Self {})
    }
}

impl Calculator for Avg {
    fn calc(&self, args: &[Row]) -> Result<Value> {
        // AVG = SUM / COUNT
        let sum = Total::new().calc(args)?;
        let count = Count::new().calc(args)?;
        Ok(match (sum, count) {
            (_, Value::Integer(0)) => Value::Null,
            (Value::Float(s), Value::Integer(c)) => Value::Float(s / c as f64),
            _ => Value::Null,
        })
    }
}

/// GROUP_CONCAT - joins the text of non-null values with the separator
/// given as second argument (default `,`)
pub struct GroupConcat;

impl GroupConcat {
    fn new() -> Box<Self> {
        Box::new(Self {})
    }
}

impl Calculator for GroupConcat {
    fn calc(&self, args: &[Row]) -> Result<Value> {
        let mut result: Option<String> = None;
        for row in args {
            let Some(value) = row.first().filter(|v| !v.is_null()) else {
                continue;
            };
            if let Some(s) = result.as_mut() {
                match row.get(1) {
                    Some(Value::Null) => {}
                    Some(separator) => s.push_str(&separator.to_string()),
                    None => s.push(','),
                }
                s.push_str(&value.to_string());
            } else {
                result = Some(value.to_string());
            }
        }
        Ok(result.map_or(Value::Null, Value::String))
    }
}

#[cfg(test)]
mod tests {
    use super::Calculator;
    use crate::{
        error::{Error, Result},
        sql::types::{Row, Value},
    };

    fn column(values: &[Value]) -> Vec<Row> {
        values.iter().map(|v| vec![v.clone()]).collect()
    }

    fn calc(name: &str, args: &[Row]) -> Result<Value> {
        <dyn Calculator>::build(name)?.calc(args)
    }

    #[test]
    fn test_aggregates_skip_nulls() -> Result<()> {
        let values = column(&[Value::Integer(3), Value::Null, Value::Integer(5)]);
        assert_eq!(calc("COUNT", &values)?, Value::Integer(2));
        assert_eq!(calc("COUNT", &[vec![], vec![], vec![]])?, Value::Integer(3));
        assert_eq!(calc("SUM", &values)?, Value::Integer(8));
        assert_eq!(calc("AVG", &values)?, Value::Float(4.0));
        assert_eq!(calc("MIN", &values)?, Value::Integer(3));
        assert_eq!(calc("MAX", &values)?, Value::Integer(5));
        assert_eq!(calc("TOTAL", &values)?, Value::Float(8.0));
        Ok(())
    }

    #[test]
    fn test_aggregates_of_empty_input() -> Result<()> {
        let empty = column(&[Value::Null]);
        assert_eq!(calc("COUNT", &empty)?, Value::Integer(0));
        assert_eq!(calc("SUM", &empty)?, Value::Null);
        assert_eq!(calc("AVG", &[])?, Value::Null);
        assert_eq!(calc("TOTAL", &[])?, Value::Float(0.0));
        assert_eq!(calc("MAX", &[])?, Value::Null);
        assert_eq!(calc("GROUP_CONCAT", &empty)?, Value::Null);
        Ok(())
    }

    #[test]
    fn test_sum_promotes_to_real() -> Result<()> {
        let mixed = column(&[Value::Integer(1), Value::Float(0.5)]);
        assert_eq!(calc("SUM", &mixed)?, Value::Float(1.5));
        let overflow = column(&[Value::Integer(i64::MAX), Value::Integer(1)]);
        assert!(matches!(calc("SUM", &overflow)?, Value::Float(_)));
        assert!(matches!(
            calc("SUM", &column(&[Value::from("x")])),
            Err(Error::TypeMismatch(_))
        ));
        Ok(())
    }

    #[test]
    fn test_group_concat_separator() -> Result<()> {
        let rows = vec![
            vec![Value::from("a"), Value::from("; ")],
            vec![Value::Null, Value::from("; ")],
            vec![Value::Integer(2), Value::from("; ")],
        ];
        assert_eq!(calc("GROUP_CONCAT", &rows)?, Value::from("a; 2"));
        let default = column(&[Value::from("x"), Value::from("y")]);
        assert_eq!(calc("GROUP_CONCAT", &default)?, Value::from("x,y"));
        Ok(())
    }
}
