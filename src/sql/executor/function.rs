//! Scalar SQL functions.

use crate::{
    error::{Error, Result},
    sql::types::Value,
};

/// Accepted argument counts of a scalar function (minimum, optional
/// maximum), or None if no such function exists
pub fn arity(name: &str) -> Option<(usize, Option<usize>)> {
    Some(match name {
        "ABS" | "LENGTH" | "LOWER" | "UPPER" | "TYPEOF" => (1, Some(1)),
        "IFNULL" | "NULLIF" | "INSTR" => (2, Some(2)),
        "TRIM" | "LTRIM" | "RTRIM" | "ROUND" => (1, Some(2)),
        "SUBSTR" | "SUBSTRING" => (2, Some(3)),
        "REPLACE" => (3, Some(3)),
        "COALESCE" => (2, None),
        // The one-argument form is the aggregate
        "MIN" | "MAX" => (2, None),
        _ => return None,
    })
}

/// Calls a scalar function on evaluated arguments
pub fn call(name: &str, args: Vec<Value>) -> Result<Value> {
    let mut args = args.into_iter();

    Ok(match name {
        "ABS" => match next(&mut args) {
            Value::Null => Value::Null,
            v => match v.to_numeric() {
                Some(Value::Integer(i)) => i
                    .checked_abs()
                    .map_or_else(|| Value::Float((i as f64).abs()), Value::Integer),
                Some(Value::Float(f)) => Value::Float(f.abs()),
                _ => {
                    return Err(Error::TypeMismatch(format!(
                        "ABS() of non-numeric value '{}'",
                        v
                    )));
                }
            },
        },
        "COALESCE" | "IFNULL" => {
            let mut result = Value::Null;
            for value in args.by_ref() {
                if !value.is_null() {
                    result = value;
                    break;
                }
            }
            result
        }
        "NULLIF" => {
            let (a, b) = (next(&mut args), next(&mut args));
            if a.compare(&b) == Some(std::cmp::Ordering::Equal) {
                Value::Null
            } else {
                a
            }
        }
        "LENGTH" => text(next(&mut args), |s| Value::Integer(s.chars().count() as i64)),
        "LOWER" => text(next(&mut args), |s| Value::String(s.to_lowercase())),
        "UPPER" => text(next(&mut args), |s| Value::String(s.to_uppercase())),
        "TRIM" | "LTRIM" | "RTRIM" => {
            let (value, chars) = (next(&mut args), next(&mut args));
            if value.is_null() {
                return Ok(Value::Null);
            }
            let chars: Vec<char> = match chars {
                Value::Null => vec![' '],
                c => c.to_string().chars().collect(),
            };
            let value = value.to_string();
            let trimmed = match name {
                "LTRIM" => value.trim_start_matches(chars.as_slice()),
                "RTRIM" => value.trim_end_matches(chars.as_slice()),
                _ => value.trim_matches(chars.as_slice()),
            };
            Value::String(trimmed.to_string())
        }
        "SUBSTR" | "SUBSTRING" => {
            let (value, start, length) = (next(&mut args), next(&mut args), next(&mut args));
            if value.is_null() || start.is_null() {
                return Ok(Value::Null);
            }
            let start = integer_arg(name, &start)?;
            let length = match length {
                Value::Null => None,
                l => Some(integer_arg(name, &l)?),
            };
            Value::String(substr(&value.to_string(), start, length))
        }
        "REPLACE" => {
            let (value, from, to) = (next(&mut args), next(&mut args), next(&mut args));
            if value.is_null() || from.is_null() || to.is_null() {
                return Ok(Value::Null);
            }
            let (value, from) = (value.to_string(), from.to_string());
            if from.is_empty() {
                Value::String(value)
            } else {
                Value::String(value.replace(&from, &to.to_string()))
            }
        }
        "INSTR" => {
            let (haystack, needle) = (next(&mut args), next(&mut args));
            if haystack.is_null() || needle.is_null() {
                return Ok(Value::Null);
            }
            let (haystack, needle) = (haystack.to_string(), needle.to_string());
            let position = haystack
                .find(&needle)
                .map_or(0, |byte| haystack[..byte].chars().count() + 1);
            Value::Integer(position as i64)
        }
        "ROUND" => {
            let (value, digits) = (next(&mut args), next(&mut args));
            if value.is_null() {
                return Ok(Value::Null);
            }
            let digits = match digits {
                Value::Null => 0,
                d => integer_arg(name, &d)?.clamp(0, 15),
            };
            let x = match value.to_numeric() {
                Some(Value::Integer(i)) => i as f64,
                Some(Value::Float(f)) => f,
                _ => {
                    return Err(Error::TypeMismatch(format!(
                        "ROUND() of non-numeric value '{}'",
                        value
                    )));
                }
            };
            let scale = 10f64.powi(digits as i32);
            Value::Float((x * scale).round() / scale)
        }
        "TYPEOF" => Value::String(next(&mut args).type_name().to_string()),
        "MIN" | "MAX" => {
            let values: Vec<Value> = args.collect();
            if values.iter().any(Value::is_null) {
                return Ok(Value::Null);
            }
            let pick = if name == "MIN" {
                values.into_iter().min_by(|a, b| a.sort_cmp(b))
            } else {
                values.into_iter().max_by(|a, b| a.sort_cmp(b))
            };
            pick.unwrap_or(Value::Null)
        }
        name => return Err(Error::UnknownFunction(format!("{}()", name))),
    })
}

/// Next argument; missing optional arguments read as NULL
fn next(args: &mut impl Iterator<Item = Value>) -> Value {
    args.next().unwrap_or(Value::Null)
}

/// Applies a text function to the value's text rendering; NULL stays NULL
fn text(value: Value, f: impl FnOnce(&str) -> Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(s) => f(&s),
        v => f(&v.to_string()),
    }
}

fn integer_arg(function: &str, value: &Value) -> Result<i64> {
    match value.to_numeric() {
        Some(Value::Integer(i)) => Ok(i),
        Some(Value::Float(f)) => Ok(f as i64),
        _ => Err(Error::TypeMismatch(format!(
            "{}() expects an integer argument, got '{}'",
            function, value
        ))),
    }
}

/// 1-based substring; a negative start counts from the end, a negative
/// length takes the characters before the start
fn substr(value: &str, start: i64, length: Option<i64>) -> String {
    let chars: Vec<char> = value.chars().collect();
    let len = chars.len() as i64;
    let mut p1 = start;
    let mut p2 = length.unwrap_or(len);
    if p1 < 0 {
        p1 += len;
        if p1 < 0 {
            if length.is_some() {
                p2 += p1;
            }
            p1 = 0;
        }
    } else if p1 > 0 {
        p1 -= 1;
    } else if length.is_some() && p2 > 0 {
        p2 -= 1;
    }
    if p2 < 0 {
        p1 += p2;
        p2 = -p2;
        if p1 < 0 {
            p2 += p1;
            p1 = 0;
        }
    }
    let begin = p1.clamp(0, len) as usize;
    let end = p1.saturating_add(p2.max(0)).clamp(0, len) as usize;
    chars[begin..end.max(begin)].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::{arity, call};
    use crate::{
        error::{Error, Result},
        sql::types::Value,
    };

    fn call1(name: &str, args: &[Value]) -> Result<Value> {
        call(name, args.to_vec())
    }

    #[test]
    fn test_text_functions() -> Result<()> {
        assert_eq!(call1("LENGTH", &["héllo".into()])?, Value::Integer(5));
        assert_eq!(call1("LENGTH", &[Value::Null])?, Value::Null);
        assert_eq!(call1("UPPER", &["abc".into()])?, Value::from("ABC"));
        assert_eq!(call1("TRIM", &["  x  ".into()])?, Value::from("x"));
        assert_eq!(call1("LTRIM", &["xxaxx".into(), "x".into()])?, Value::from("axx"));
        assert_eq!(call1("SUBSTR", &["hello".into(), 2.into(), 3.into()])?, Value::from("ell"));
        assert_eq!(call1("SUBSTR", &["hello".into(), (-3).into()])?, Value::from("llo"));
        assert_eq!(call1("SUBSTR", &["hello".into(), 0.into(), 2.into()])?, Value::from("h"));
        assert_eq!(call1("SUBSTR", &["hello".into(), 3.into(), (-2).into()])?, Value::from("he"));
        assert_eq!(
            call1("REPLACE", &["a-b-c".into(), "-".into(), "+".into()])?,
            Value::from("a+b+c")
        );
        assert_eq!(call1("INSTR", &["hello".into(), "ll".into()])?, Value::Integer(3));
        assert_eq!(call1("INSTR", &["hello".into(), "z".into()])?, Value::Integer(0));
        Ok(())
    }

    #[test]
    fn test_numeric_and_null_functions() -> Result<()> {
        assert_eq!(call1("ABS", &[(-3).into()])?, Value::Integer(3));
        assert_eq!(call1("ROUND", &[2.567.into(), 2.into()])?, Value::Float(2.57));
        assert_eq!(call1("ROUND", &[2.5.into()])?, Value::Float(3.0));
        assert_eq!(
            call1("COALESCE", &[Value::Null, Value::Null, 3.into()])?,
            Value::Integer(3)
        );
        assert_eq!(call1("IFNULL", &[Value::Null, "d".into()])?, Value::from("d"));
        assert_eq!(call1("NULLIF", &[1.into(), 1.into()])?, Value::Null);
        assert_eq!(call1("NULLIF", &[1.into(), 2.into()])?, Value::Integer(1));
        assert_eq!(call1("TYPEOF", &[1.5.into()])?, Value::from("real"));
        assert_eq!(call1("MAX", &[1.into(), 3.into(), 2.into()])?, Value::Integer(3));
        assert_eq!(call1("MIN", &[1.into(), Value::Null])?, Value::Null);
        assert!(matches!(
            call1("ABS", &["x".into()]),
            Err(Error::TypeMismatch(_))
        ));
        Ok(())
    }

    #[test]
    fn test_arity() {
        assert_eq!(arity("SUBSTR"), Some((2, Some(3))));
        assert_eq!(arity("COALESCE"), Some((2, None)));
        assert_eq!(arity("NOPE"), None);
    }
}
