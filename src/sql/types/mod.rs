use std::{
    cmp::Ordering,
    fmt::Display,
    hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    sql::parser::ast::{Consts, Expression, Operation},
};

/// Declared column types. `Any` is an untyped column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Integer,
    Float,
    String,
    Any,
}

impl DataType {
    /// Maps a declared SQL type name onto a column type (case-insensitive).
    /// Unrecognized names give an untyped column.
    pub fn from_name(name: &str) -> DataType {
        match name.to_uppercase().as_ref() {
            "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" => DataType::Integer,
            "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" | "DECIMAL" => DataType::Float,
            "TEXT" | "STRING" | "VARCHAR" | "CHAR" | "CLOB" => DataType::String,
            "BOOL" | "BOOLEAN" => DataType::Boolean,
            _ => DataType::Any,
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DataType::Boolean => "BOOLEAN",
            DataType::Integer => "INTEGER",
            DataType::Float => "REAL",
            DataType::String => "TEXT",
            DataType::Any => "ANY",
        })
    }
}

/// Runtime value type for expressions and stored rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl Value {
    /// Creates a Value from a constant expression (a literal, optionally negated)
    pub fn from_expression(expr: Expression) -> Result<Self> {
        match expr {
            Expression::Consts(c) => Ok(c.into()),
            Expression::Operation(Operation::Negate(inner)) => {
                match Value::from_expression(*inner)? {
                    Value::Integer(i) => Ok(Value::Integer(-i)),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    v => Err(Error::TypeMismatch(format!("cannot negate {}", v))),
                }
            }
            e => Err(Error::TypeMismatch(format!("{} is not a constant", e))),
        }
    }

    /// Returns the data type of the value, or None if it's Null
    pub fn datatype(&self) -> Option<DataType> {
        match self {
            Self::Null => None,
            Self::Boolean(_) => Some(DataType::Boolean),
            Self::Integer(_) => Some(DataType::Integer),
            Self::Float(_) => Some(DataType::Float),
            Self::String(_) => Some(DataType::String),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name reported by `TYPEOF()`
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "real",
            Value::String(_) => "text",
        }
    }

    /// Numeric view of the value: booleans act as 0/1, text is parsed.
    pub fn to_numeric(&self) -> Option<Value> {
        match self {
            Value::Integer(_) | Value::Float(_) => Some(self.clone()),
            Value::Boolean(b) => Some(Value::Integer(*b as i64)),
            Value::String(s) => parse_numeric(s),
            Value::Null => None,
        }
    }

    /// WHERE-clause truthiness. NULL and non-numeric text are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => parse_numeric(s).is_some_and(|v| v.is_truthy()),
            Value::Null => false,
        }
    }

    /// SQL comparison. Returns None when either side is NULL.
    ///
    /// Numbers compare numerically, booleans act as 0/1 against anything
    /// that is not a boolean, and text against a number is compared
    /// numerically when the text parses as a number, otherwise lexically
    /// against the number's text rendering.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), _) => Value::Integer(*a as i64).compare(other),
            (_, Value::Boolean(b)) => self.compare(&Value::Integer(*b as i64)),
            (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
            (Value::String(s), n) => match parse_numeric(s) {
                Some(v) => v.compare(n),
                None => Some(s.as_str().cmp(n.to_string().as_str())),
            },
            (n, Value::String(s)) => match parse_numeric(s) {
                Some(v) => n.compare(&v),
                None => Some(n.to_string().as_str().cmp(s.as_str())),
            },
        }
    }

    /// Total ordering used by ORDER BY, MIN and MAX:
    /// NULL < numbers and booleans < text.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Boolean(_) | Value::Integer(_) | Value::Float(_) => 1,
                Value::String(_) => 2,
            }
        }
        match rank(self).cmp(&rank(other)) {
            Ordering::Equal => self.compare(other).unwrap_or(Ordering::Equal),
            o => o,
        }
    }

    /// Converts the value so it fits a column of the given type, or None if
    /// it cannot be stored there.
    pub fn coerce_to(self, datatype: DataType) -> Option<Value> {
        match (self, datatype) {
            (Value::Float(f), _) if !f.is_finite() => None,
            (v, DataType::Any) => Some(v),
            (Value::Null, _) => Some(Value::Null),
            (Value::Integer(i), DataType::Integer) => Some(Value::Integer(i)),
            (Value::Float(f), DataType::Integer)
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 =>
            {
                Some(Value::Integer(f as i64))
            }
            (Value::Integer(i), DataType::Float) => Some(Value::Float(i as f64)),
            (Value::Float(f), DataType::Float) => Some(Value::Float(f)),
            (Value::String(s), DataType::String) => Some(Value::String(s)),
            (Value::Boolean(b), DataType::Boolean) => Some(Value::Boolean(b)),
            _ => None,
        }
    }

    /// Explicit `CAST(value AS type)` conversion
    pub fn cast(self, datatype: DataType) -> Result<Value> {
        let fail = |v: &Value| Error::TypeMismatch(format!("cannot cast {} to {}", v, datatype));
        Ok(match (self, datatype) {
            (Value::Null, _) => Value::Null,
            (v, DataType::Any) => v,
            (v, DataType::String) => Value::String(v.to_string()),
            (Value::Boolean(b), DataType::Boolean) => Value::Boolean(b),
            (v, DataType::Boolean) => Value::Boolean(v.is_truthy()),
            (v, DataType::Integer) => match v.to_numeric() {
                Some(Value::Integer(i)) => Value::Integer(i),
                Some(Value::Float(f))
                    if f.is_finite() && f.trunc() >= i64::MIN as f64 && f.trunc() < i64::MAX as f64 =>
                {
                    Value::Integer(f.trunc() as i64)
                }
                _ => return Err(fail(&v)),
            },
            (v, DataType::Float) => match v.to_numeric() {
                Some(Value::Integer(i)) => Value::Float(i as f64),
                Some(Value::Float(f)) => Value::Float(f),
                _ => return Err(fail(&v)),
            },
        })
    }
}

/// Parses text as an integer or a finite real number.
pub fn parse_numeric(text: &str) -> Option<Value> {
    let text = text.trim();
    if text.is_empty() || !text.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::Integer(i));
    }
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() => Some(Value::Float(f)),
        _ => None,
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) if *b => write!(f, "TRUE"),
            Value::Boolean(_) => write!(f, "FALSE"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) if v.fract() == 0.0 && v.abs() < 1e16 => write!(f, "{:.1}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
        }
    }
}

// Stored floats are always finite, so equality is reflexive.
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(b) => b.hash(state),
            Value::Integer(i) => i.hash(state),
            // 0.0 and -0.0 compare equal
            Value::Float(f) if *f == 0.0 => 0u64.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::String(s) => s.hash(state),
        }
    }
}

impl From<Consts> for Value {
    fn from(value: Consts) -> Self {
        match value {
            Consts::Null => Value::Null,
            Consts::Boolean(b) => Value::Boolean(b),
            Consts::Integer(i) => Value::Integer(i),
            Consts::Float(f) => Value::Float(f),
            Consts::String(s) => Value::String(s),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// A row is a vector of values, aligned with a column list
pub type Row = Vec<Value>;

/// A column of a row stream, qualified by the table or alias it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub name: String,
}

impl ColumnRef {
    pub fn new(table: Option<String>, name: impl Into<String>) -> Self {
        Self {
            table,
            name: name.into(),
        }
    }

    /// An unqualified column (projection output, CTE column lists)
    pub fn bare(name: impl Into<String>) -> Self {
        Self::new(None, name)
    }
}

impl Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", table, self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::{DataType, Value, parse_numeric};
    use crate::error::{Error, Result};

    #[test]
    fn test_compare_numeric_kinds() {
        assert_eq!(Value::Integer(2).compare(&Value::Float(2.0)), Some(Ordering::Equal));
        assert_eq!(Value::Float(1.5).compare(&Value::Integer(2)), Some(Ordering::Less));
        assert_eq!(Value::Boolean(true).compare(&Value::Integer(1)), Some(Ordering::Equal));
        assert_eq!(Value::Null.compare(&Value::Null), None);
        assert_eq!(Value::Integer(1).compare(&Value::Null), None);
    }

    #[test]
    fn test_compare_text_against_numbers() {
        // numeric text compares numerically
        assert_eq!(Value::from("10").compare(&Value::Integer(9)), Some(Ordering::Greater));
        assert_eq!(Value::from(" 2.50 ").compare(&Value::Float(2.5)), Some(Ordering::Equal));
        assert_eq!(Value::Integer(3).compare(&Value::from("3")), Some(Ordering::Equal));
        // otherwise lexically against the rendered number
        assert_eq!(Value::from("abc").compare(&Value::Integer(100)), Some(Ordering::Greater));
        assert_eq!(Value::Integer(100).compare(&Value::from("1a")), Some(Ordering::Less));
        // text against text is lexical even when both look numeric
        assert_eq!(Value::from("10").compare(&Value::from("9")), Some(Ordering::Less));
        // booleans act as integers against text
        assert_eq!(Value::Boolean(true).compare(&Value::from("1")), Some(Ordering::Equal));
    }

    #[test]
    fn test_sort_order() {
        let mut values = vec![
            Value::from("b"),
            Value::Integer(3),
            Value::Null,
            Value::Float(1.5),
            Value::from("a"),
        ];
        values.sort_by(|a, b| a.sort_cmp(b));
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Float(1.5),
                Value::Integer(3),
                Value::from("a"),
                Value::from("b"),
            ]
        );
    }

    #[test]
    fn test_coerce_to_column_type() {
        assert_eq!(Value::Float(3.0).coerce_to(DataType::Integer), Some(Value::Integer(3)));
        assert_eq!(Value::Float(3.5).coerce_to(DataType::Integer), None);
        assert_eq!(Value::Integer(2).coerce_to(DataType::Float), Some(Value::Float(2.0)));
        assert_eq!(Value::from("1").coerce_to(DataType::Integer), None);
        assert_eq!(Value::Integer(1).coerce_to(DataType::Boolean), None);
        assert_eq!(Value::Null.coerce_to(DataType::String), Some(Value::Null));
        assert_eq!(Value::Float(f64::INFINITY).coerce_to(DataType::Any), None);
    }

    #[test]
    fn test_cast_to_integer() -> Result<()> {
        assert_eq!(Value::Float(-2.7).cast(DataType::Integer)?, Value::Integer(-2));
        assert_eq!(Value::from(" 12 ").cast(DataType::Integer)?, Value::Integer(12));
        assert_eq!(
            Value::Float(-9.223372036854775808e18).cast(DataType::Integer)?,
            Value::Integer(i64::MIN)
        );
        assert!(matches!(
            Value::Float(1e300).cast(DataType::Integer),
            Err(Error::TypeMismatch(_))
        ));
        assert!(matches!(
            Value::Float(9.223372036854775807e18).cast(DataType::Integer),
            Err(Error::TypeMismatch(_))
        ));
        assert!(matches!(
            Value::from("abc").cast(DataType::Integer),
            Err(Error::TypeMismatch(_))
        ));
        Ok(())
    }

    #[test]
    fn test_parse_numeric() {
        assert_eq!(parse_numeric("42"), Some(Value::Integer(42)));
        assert_eq!(parse_numeric("-0.5"), Some(Value::Float(-0.5)));
        assert_eq!(parse_numeric("inf"), None);
        assert_eq!(parse_numeric("NaN"), None);
        assert_eq!(parse_numeric(""), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Float(0.25).to_string(), "0.25");
        assert_eq!(Value::Boolean(false).to_string(), "FALSE");
    }
}
