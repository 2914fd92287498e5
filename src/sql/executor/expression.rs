//! Expression evaluation against a chain of row scopes.

use std::cmp::Ordering;

use crate::{
    error::{Error, Result},
    sql::{
        engine::Transaction,
        executor::{ResultSet, agg::is_aggregate, function},
        parser::ast::{Expression, Operation, Query},
        plan::Plan,
        types::{ColumnRef, Row, Value},
    },
};

/// Columns and values a column reference is resolved against. Unresolved
/// names continue in the outer scope (the enclosing query's row, or the
/// OLD/NEW pseudo-rows of a trigger).
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub columns: &'a [ColumnRef],
    pub row: &'a [Value],
    pub outer: Option<&'a Scope<'a>>,
}

impl<'a> Scope<'a> {
    pub fn new(columns: &'a [ColumnRef], row: &'a [Value], outer: Option<&'a Scope<'a>>) -> Self {
        Self {
            columns,
            row,
            outer,
        }
    }

    /// A scope without columns of its own
    pub fn empty(outer: Option<&'a Scope<'a>>) -> Self {
        Self::new(&[], &[], outer)
    }

    pub fn resolve(&self, table: Option<&str>, name: &str) -> Result<Value> {
        let mut scope = Some(self);
        while let Some(current) = scope {
            let mut matches = current.columns.iter().enumerate().filter(|(_, c)| {
                c.name == name && table.is_none_or(|t| qualifier_matches(c.table.as_deref(), t))
            });
            match (matches.next(), matches.next()) {
                (Some((i, _)), None) => {
                    return Ok(current.row.get(i).cloned().unwrap_or(Value::Null));
                }
                (Some(_), Some(_)) => {
                    return Err(Error::Resolution(format!(
                        "ambiguous column name: {}",
                        ColumnRef::new(table.map(str::to_string), name)
                    )));
                }
                _ => scope = current.outer,
            }
        }
        Err(Error::Resolution(format!(
            "no such column: {}",
            ColumnRef::new(table.map(str::to_string), name)
        )))
    }
}

/// Table qualifiers are case-sensitive, except the pseudo-rows `OLD`,
/// `NEW` and `excluded`
fn qualifier_matches(column: Option<&str>, qualifier: &str) -> bool {
    match column {
        Some(c) if c == qualifier => true,
        Some(c @ ("OLD" | "NEW" | "excluded")) => c.eq_ignore_ascii_case(qualifier),
        _ => false,
    }
}

/// Evaluates WHERE/ON/WHEN conditions: NULL counts as false
pub fn row_matches_where<T: Transaction + 'static>(
    expr: &Expression,
    scope: &Scope<'_>,
    txn: &mut T,
) -> Result<bool> {
    Ok(evaluate(expr, scope, txn)?.is_truthy())
}

pub fn evaluate<T: Transaction + 'static>(
    expr: &Expression,
    scope: &Scope<'_>,
    txn: &mut T,
) -> Result<Value> {
    Ok(match expr {
        Expression::Field(table, name) => scope.resolve(table.as_deref(), name)?,
        Expression::Consts(c) => c.clone().into(),
        Expression::Operation(op) => evaluate_operation(op, scope, txn)?,
        Expression::Function { name, args, .. } => {
            if is_aggregate(name, args.len()) {
                return Err(Error::Resolution(format!(
                    "misuse of aggregate function {}()",
                    name
                )));
            }
            let values = args
                .iter()
                .map(|arg| evaluate(arg, scope, txn))
                .collect::<Result<Vec<_>>>()?;
            function::call(name, values)?
        }
        Expression::Subquery(query) => {
            let rows = run_subquery(query, scope, txn)?;
            if rows.len() > 1 {
                return Err(Error::SubqueryCardinality(format!(
                    "scalar subquery returned {} rows",
                    rows.len()
                )));
            }
            rows.into_iter()
                .next()
                .and_then(|row| row.into_iter().next())
                .unwrap_or(Value::Null)
        }
        Expression::Exists { query, negated } => {
            let found = match Plan::build_query((**query).clone())?.execute_in(txn, Some(scope))? {
                ResultSet::Scan { rows, .. } => !rows.is_empty(),
                _ => return Err(Error::Internal("Unexpected result set".into())),
            };
            Value::Boolean(found != *negated)
        }
        Expression::InList {
            expr,
            list,
            negated,
        } => {
            let value = evaluate(expr, scope, txn)?;
            let mut candidates = Vec::with_capacity(list.len());
            for item in list {
                candidates.push(evaluate(item, scope, txn)?);
            }
            membership(&value, candidates, *negated)
        }
        Expression::InSubquery {
            expr,
            query,
            negated,
        } => {
            let value = evaluate(expr, scope, txn)?;
            let rows = run_subquery(query, scope, txn)?;
            membership(&value, rows.into_iter().flatten().collect(), *negated)
        }
        Expression::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let value = evaluate(expr, scope, txn)?;
            let low = evaluate(low, scope, txn)?;
            let high = evaluate(high, scope, txn)?;
            let above = value.compare(&low).map(|o| o != Ordering::Less);
            let below = value.compare(&high).map(|o| o != Ordering::Greater);
            from_truth(and(above, below).map(|b| b != *negated))
        }
        Expression::Case {
            operand,
            branches,
            else_result,
        } => {
            let operand = match operand {
                Some(e) => Some(evaluate(e, scope, txn)?),
                None => None,
            };
            for (when, then) in branches {
                let when = evaluate(when, scope, txn)?;
                let taken = match &operand {
                    Some(v) => v.compare(&when) == Some(Ordering::Equal),
                    None => when.is_truthy(),
                };
                if taken {
                    return evaluate(then, scope, txn);
                }
            }
            match else_result {
                Some(e) => evaluate(e, scope, txn)?,
                None => Value::Null,
            }
        }
        Expression::Cast { expr, datatype } => evaluate(expr, scope, txn)?.cast(*datatype)?,
    })
}

fn evaluate_operation<T: Transaction + 'static>(
    op: &Operation,
    scope: &Scope<'_>,
    txn: &mut T,
) -> Result<Value> {
    let mut eval = |e: &Expression| evaluate(e, scope, txn);
    Ok(match op {
        Operation::And(l, r) => {
            let l = truth(&eval(l)?);
            if l == Some(false) {
                return Ok(Value::Boolean(false));
            }
            from_truth(and(l, truth(&eval(r)?)))
        }
        Operation::Or(l, r) => {
            let l = truth(&eval(l)?);
            if l == Some(true) {
                return Ok(Value::Boolean(true));
            }
            match (l, truth(&eval(r)?)) {
                (_, Some(true)) => Value::Boolean(true),
                (Some(false), Some(false)) => Value::Boolean(false),
                _ => Value::Null,
            }
        }
        Operation::Not(e) => from_truth(truth(&eval(e)?).map(|b| !b)),
        Operation::Equal(l, r) => compare(eval(l)?, eval(r)?, |o| o == Ordering::Equal),
        Operation::NotEqual(l, r) => compare(eval(l)?, eval(r)?, |o| o != Ordering::Equal),
        Operation::GreaterThan(l, r) => compare(eval(l)?, eval(r)?, |o| o == Ordering::Greater),
        Operation::GreaterThanOrEqual(l, r) => {
            compare(eval(l)?, eval(r)?, |o| o != Ordering::Less)
        }
        Operation::LessThan(l, r) => compare(eval(l)?, eval(r)?, |o| o == Ordering::Less),
        Operation::LessThanOrEqual(l, r) => {
            compare(eval(l)?, eval(r)?, |o| o != Ordering::Greater)
        }
        Operation::Is(l, r, negated) => {
            let (l, r) = (eval(l)?, eval(r)?);
            let same = match (l.is_null(), r.is_null()) {
                (true, true) => true,
                (false, false) => l.compare(&r) == Some(Ordering::Equal),
                _ => false,
            };
            Value::Boolean(same != *negated)
        }
        Operation::IsNull(e, negated) => Value::Boolean(eval(e)?.is_null() != *negated),
        Operation::Like(l, r, negated) => match (eval(l)?, eval(r)?) {
            (Value::Null, _) | (_, Value::Null) => Value::Null,
            (text, pattern) => {
                Value::Boolean(like(&text.to_string(), &pattern.to_string()) != *negated)
            }
        },
        Operation::Add(l, r) => arithmetic(Arithmetic::Add, eval(l)?, eval(r)?)?,
        Operation::Subtract(l, r) => arithmetic(Arithmetic::Subtract, eval(l)?, eval(r)?)?,
        Operation::Multiply(l, r) => arithmetic(Arithmetic::Multiply, eval(l)?, eval(r)?)?,
        Operation::Divide(l, r) => arithmetic(Arithmetic::Divide, eval(l)?, eval(r)?)?,
        Operation::Modulo(l, r) => arithmetic(Arithmetic::Modulo, eval(l)?, eval(r)?)?,
        Operation::Concat(l, r) => match (eval(l)?, eval(r)?) {
            (Value::Null, _) | (_, Value::Null) => Value::Null,
            (l, r) => Value::String(format!("{}{}", l, r)),
        },
        Operation::Negate(e) => match eval(e)? {
            Value::Null => Value::Null,
            v => match numeric(v)? {
                Value::Integer(i) => i
                    .checked_neg()
                    .map_or_else(|| Value::Float(-(i as f64)), Value::Integer),
                Value::Float(f) => Value::Float(-f),
                v => return Err(Error::Internal(format!("unexpected numeric value {}", v))),
            },
        },
    })
}

/// Runs a subquery with the current row as its outer scope. The result
/// must have exactly one column.
fn run_subquery<T: Transaction + 'static>(
    query: &Query,
    scope: &Scope<'_>,
    txn: &mut T,
) -> Result<Vec<Row>> {
    match Plan::build_query(query.clone())?.execute_in(txn, Some(scope))? {
        ResultSet::Scan { columns, rows } => {
            if columns.len() != 1 {
                return Err(Error::SubqueryCardinality(format!(
                    "subquery returns {} columns, expected 1",
                    columns.len()
                )));
            }
            Ok(rows)
        }
        _ => Err(Error::Internal("Unexpected result set".into())),
    }
}

/// `value [NOT] IN (candidates)`: NULL when nothing matches but a NULL
/// was involved
fn membership(value: &Value, candidates: Vec<Value>, negated: bool) -> Value {
    if value.is_null() {
        return Value::Null;
    }
    let mut unknown = false;
    for candidate in &candidates {
        match value.compare(candidate) {
            Some(Ordering::Equal) => return Value::Boolean(!negated),
            None => unknown = true,
            Some(_) => {}
        }
    }
    if unknown {
        Value::Null
    } else {
        Value::Boolean(negated)
    }
}

fn truth(value: &Value) -> Option<bool> {
    (!value.is_null()).then(|| value.is_truthy())
}

fn from_truth(truth: Option<bool>) -> Value {
    truth.map_or(Value::Null, Value::Boolean)
}

fn and(l: Option<bool>, r: Option<bool>) -> Option<bool> {
    match (l, r) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn compare(l: Value, r: Value, test: impl Fn(Ordering) -> bool) -> Value {
    from_truth(l.compare(&r).map(test))
}

#[derive(Debug, Clone, Copy)]
enum Arithmetic {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

fn numeric(value: Value) -> Result<Value> {
    value.to_numeric().ok_or_else(|| {
        Error::TypeMismatch(format!(
            "cannot use {} value '{}' in arithmetic",
            value.type_name(),
            value
        ))
    })
}

/// Non-finite results become NULL
fn float(f: f64) -> Value {
    if f.is_finite() {
        Value::Float(f)
    } else {
        Value::Null
    }
}

fn arithmetic(op: Arithmetic, l: Value, r: Value) -> Result<Value> {
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    Ok(match (numeric(l)?, numeric(r)?) {
        (Value::Integer(a), Value::Integer(b)) => {
            let exact = match op {
                Arithmetic::Add => a.checked_add(b),
                Arithmetic::Subtract => a.checked_sub(b),
                Arithmetic::Multiply => a.checked_mul(b),
                Arithmetic::Divide if b == 0 => return Ok(Value::Null),
                Arithmetic::Divide => a.checked_div(b),
                Arithmetic::Modulo if b == 0 => return Ok(Value::Null),
                Arithmetic::Modulo => Some(a.wrapping_rem(b)),
            };
            match exact {
                Some(i) => Value::Integer(i),
                // Overflow promotes to a real
                None => float_arithmetic(op, a as f64, b as f64),
            }
        }
        (a, b) => float_arithmetic(op, as_f64(&a), as_f64(&b)),
    })
}

fn float_arithmetic(op: Arithmetic, a: f64, b: f64) -> Value {
    match op {
        Arithmetic::Add => float(a + b),
        Arithmetic::Subtract => float(a - b),
        Arithmetic::Multiply => float(a * b),
        Arithmetic::Divide | Arithmetic::Modulo if b == 0.0 => Value::Null,
        Arithmetic::Divide => float(a / b),
        Arithmetic::Modulo => float(a % b),
    }
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Integer(i) => *i as f64,
        Value::Float(f) => *f,
        _ => 0.0,
    }
}

/// SQL LIKE: `%` matches any run of characters, `_` exactly one. ASCII
/// letters match case-insensitively.
pub fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().map(|c| c.to_ascii_lowercase()).collect();
    let pattern: Vec<char> = pattern.chars().map(|c| c.to_ascii_lowercase()).collect();
    let (mut t, mut p) = (0, 0);
    // Last `%` seen and the text position it is currently matched up to
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('%') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(c) if *c == '_' || *c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}

#[cfg(test)]
mod tests {
    use super::{Scope, evaluate, like};
    use crate::{
        error::{Error, Result},
        sql::{
            engine::MemoryTransaction,
            parser::parse_where_expression,
            snapshot::Snapshot,
            types::{ColumnRef, Value},
        },
    };

    fn eval_in(sql: &str, scope: &Scope<'_>) -> Result<Value> {
        let mut txn = MemoryTransaction::new(Snapshot::default());
        evaluate(&parse_where_expression(sql)?, scope, &mut txn)
    }

    fn eval(sql: &str) -> Result<Value> {
        eval_in(sql, &Scope::empty(None))
    }

    #[test]
    fn test_three_valued_logic() -> Result<()> {
        assert_eq!(eval("NULL AND FALSE")?, Value::Boolean(false));
        assert_eq!(eval("NULL AND TRUE")?, Value::Null);
        assert_eq!(eval("NULL OR TRUE")?, Value::Boolean(true));
        assert_eq!(eval("NULL OR FALSE")?, Value::Null);
        assert_eq!(eval("NOT NULL")?, Value::Null);
        assert_eq!(eval("NULL = NULL")?, Value::Null);
        assert_eq!(eval("NULL IS NULL")?, Value::Boolean(true));
        assert_eq!(eval("1 IS NOT NULL")?, Value::Boolean(true));
        assert_eq!(eval("NULL IS NOT 1")?, Value::Boolean(true));
        assert_eq!(eval("2 IN (1, NULL)")?, Value::Null);
        assert_eq!(eval("1 NOT IN (1, NULL)")?, Value::Boolean(false));
        assert_eq!(eval("5 BETWEEN 1 AND 10")?, Value::Boolean(true));
        assert_eq!(eval("5 NOT BETWEEN 1 AND NULL")?, Value::Null);
        Ok(())
    }

    #[test]
    fn test_arithmetic() -> Result<()> {
        assert_eq!(eval("7 / 2")?, Value::Integer(3));
        assert_eq!(eval("7 / 2.0")?, Value::Float(3.5));
        assert_eq!(eval("7 % 0")?, Value::Null);
        assert_eq!(eval("1.5 / 0")?, Value::Null);
        assert_eq!(eval("'3' + 4")?, Value::Integer(7));
        assert_eq!(eval("TRUE + 1")?, Value::Integer(2));
        assert_eq!(eval("9223372036854775807 + 1")?, Value::Float(9223372036854775808.0));
        assert_eq!(eval("-(2 * 3)")?, Value::Integer(-6));
        assert_eq!(eval("'a' || 1 || NULL")?, Value::Null);
        assert_eq!(eval("'a' || 1.0")?, Value::from("a1.0"));
        assert!(matches!(eval("'abc' + 1"), Err(Error::TypeMismatch(_))));
        Ok(())
    }

    #[test]
    fn test_comparison_coercion() -> Result<()> {
        assert_eq!(eval("'10' > 9")?, Value::Boolean(true));
        assert_eq!(eval("'10' > '9'")?, Value::Boolean(false));
        assert_eq!(eval("TRUE = 1")?, Value::Boolean(true));
        assert_eq!(eval("2 = 2.0")?, Value::Boolean(true));
        assert_eq!(eval("CASE 2 WHEN 1 THEN 'a' WHEN 2 THEN 'b' END")?, Value::from("b"));
        assert_eq!(eval("CASE WHEN NULL THEN 1 ELSE 0 END")?, Value::Integer(0));
        assert_eq!(eval("CAST('42' AS INTEGER)")?, Value::Integer(42));
        Ok(())
    }

    #[test]
    fn test_resolution() -> Result<()> {
        let outer_columns = vec![ColumnRef::new(Some("o".to_string()), "id")];
        let outer_row = vec![Value::Integer(7)];
        let outer = Scope::new(&outer_columns, &outer_row, None);

        let columns = vec![
            ColumnRef::new(Some("a".to_string()), "id"),
            ColumnRef::new(Some("b".to_string()), "id"),
            ColumnRef::new(Some("b".to_string()), "name"),
        ];
        let row = vec![Value::Integer(1), Value::Integer(2), Value::from("x")];
        let scope = Scope::new(&columns, &row, Some(&outer));

        assert_eq!(eval_in("b.id", &scope)?, Value::Integer(2));
        assert_eq!(eval_in("name", &scope)?, Value::from("x"));
        assert_eq!(eval_in("o.id", &scope)?, Value::Integer(7));
        assert!(matches!(eval_in("id", &scope), Err(Error::Resolution(_))));
        assert!(matches!(eval_in("missing", &scope), Err(Error::Resolution(_))));
        Ok(())
    }

    #[test]
    fn test_like() {
        assert!(like("Hello", "h%"));
        assert!(like("hello", "_ELL_"));
        assert!(like("abcabc", "%b%c"));
        assert!(like("", "%"));
        assert!(!like("abc", "a_"));
        assert!(!like("abc", "%d%"));
    }
}
