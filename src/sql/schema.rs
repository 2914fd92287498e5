use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    sql::types::{DataType, Row, Value},
};

/// Table schema definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    /// Triggers in creation order
    #[serde(default)]
    pub triggers: Vec<Trigger>,
}

impl Table {
    /// Validates table schema
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(Error::Internal(format!("table {} has no columns", self.name)));
        }

        if self.columns.iter().filter(|c| c.primary_key).count() > 1 {
            return Err(Error::Constraint(format!(
                "multiple primary keys for table {}",
                self.name
            )));
        }

        for (i, column) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(Error::Resolution(format!(
                    "duplicate column {} in table {}",
                    column.name, self.name
                )));
            }
            if column.primary_key && column.nullable {
                return Err(Error::Internal(format!(
                    "primary key {} of table {} must not be nullable",
                    column.name, self.name
                )));
            }
            if let Some(default) = &column.default {
                column.validate_value(&self.name, default.clone())?;
            }
        }
        Ok(())
    }

    /// Position of the primary key column, if the table has one
    pub fn primary_key_index(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.primary_key)
    }

    /// Extracts primary key value from a row
    pub fn get_primary_key<'r>(&self, row: &'r Row) -> Option<&'r Value> {
        self.primary_key_index().and_then(|i| row.get(i))
    }

    /// Returns the column index for a given column name
    pub fn get_col_index(&self, col_name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == col_name)
            .ok_or_else(|| {
                Error::Resolution(format!(
                    "table {} has no column named {}",
                    self.name, col_name
                ))
            })
    }

    pub fn has_column(&self, col_name: &str) -> bool {
        self.columns.iter().any(|c| c.name == col_name)
    }

    /// Triggers matching timing and event, in creation order
    pub fn triggers_for(
        &self,
        timing: TriggerTiming,
        event: TriggerEvent,
    ) -> impl Iterator<Item = &Trigger> {
        self.triggers
            .iter()
            .filter(move |t| t.timing == timing && t.event == event)
    }

    /// Type-checks a full row against the columns, coercing values where allowed
    pub fn validate_row(&self, row: Row) -> Result<Row> {
        if row.len() != self.columns.len() {
            return Err(Error::Internal(format!(
                "row has {} values, table {} has {} columns",
                row.len(),
                self.name,
                self.columns.len()
            )));
        }
        row.into_iter()
            .zip(self.columns.iter())
            .map(|(value, column)| column.validate_value(&self.name, value))
            .collect()
    }
}

/// Column schema definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub datatype: DataType,
    pub nullable: bool,
    pub default: Option<Value>,
    /// Whether this column is the primary key
    pub primary_key: bool,
}

impl Column {
    /// Checks that a value may be stored in this column.
    ///
    /// Integer columns accept integers and integral reals, real columns
    /// widen integers, untyped columns accept anything. NULL in a NOT NULL
    /// column is a constraint violation.
    pub fn validate_value(&self, table: &str, value: Value) -> Result<Value> {
        if value.is_null() {
            if !self.nullable {
                return Err(Error::Constraint(format!(
                    "NOT NULL constraint failed: {}.{}",
                    table, self.name
                )));
            }
            return Ok(Value::Null);
        }
        let description = format!("{} value {}", value.type_name(), value);
        value.coerce_to(self.datatype).ok_or_else(|| {
            Error::TypeMismatch(format!(
                "cannot store {} in column {}.{} of type {}",
                description, table, self.name, self.datatype
            ))
        })
    }

    /// Value for the column when an insert omits it
    pub fn default_value(&self) -> Value {
        self.default.clone().unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerTiming {
    Before,
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerEvent {
    Insert,
    Update,
    Delete,
}

impl Display for TriggerTiming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TriggerTiming::Before => "BEFORE",
            TriggerTiming::After => "AFTER",
        })
    }
}

impl Display for TriggerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TriggerEvent::Insert => "INSERT",
            TriggerEvent::Update => "UPDATE",
            TriggerEvent::Delete => "DELETE",
        })
    }
}

/// A row trigger. The WHEN condition and body statements are SQL text,
/// parsed each time the trigger fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub name: String,
    pub table_name: String,
    pub timing: TriggerTiming,
    pub event: TriggerEvent,
    pub when: Option<String>,
    pub body: Vec<String>,
}

impl Trigger {
    /// Rewrites references to a renamed column of the owning table.
    ///
    /// `OLD.`, `NEW.` and table-qualified references are always rewritten.
    /// Bare references are rewritten only in statements that name the
    /// owning table. String literals and quoted identifiers are left alone.
    pub fn rename_column(&mut self, from: &str, to: &str) {
        if let Some(when) = &mut self.when {
            *when = rename_identifier(when, &self.table_name, from, to);
        }
        for stmt in &mut self.body {
            *stmt = rename_identifier(stmt, &self.table_name, from, to);
        }
    }
}

fn rename_identifier(sql: &str, table: &str, from: &str, to: &str) -> String {
    let segments = split_words(sql);
    let bare = segments.iter().any(|(word, s)| *word && *s == table);
    let mut out = String::with_capacity(sql.len());
    for (i, (word, s)) in segments.iter().enumerate() {
        let qualifier = match i.checked_sub(2).map(|q| (segments[q], segments[i - 1].1)) {
            Some(((true, q), ".")) => Some(q),
            _ => None,
        };
        let rename = *word
            && *s == from
            && match qualifier {
                Some(q) => {
                    q.eq_ignore_ascii_case("old") || q.eq_ignore_ascii_case("new") || q == table
                }
                None => bare,
            };
        out.push_str(if rename { to } else { s });
    }
    out
}

/// Splits SQL text into identifier words (`true`) and other segments.
/// Quoted text forms a single non-word segment.
fn split_words(sql: &str) -> Vec<(bool, &str)> {
    let mut segments = Vec::new();
    let mut chars = sql.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        let mut end = start + c.len_utf8();
        let word = c.is_alphabetic() || c == '_';
        if word {
            while let Some((i, n)) =
                chars.next_if(|(_, n)| n.is_alphanumeric() || *n == '_' || *n == '$')
            {
                end = i + n.len_utf8();
            }
        } else if matches!(c, '\'' | '"' | '`') {
            while let Some((i, q)) = chars.next() {
                end = i + q.len_utf8();
                if q == c {
                    match chars.next_if(|(_, n)| *n == c) {
                        Some((j, _)) => end = j + c.len_utf8(),
                        None => break,
                    }
                }
            }
        }
        segments.push((word, &sql[start..end]));
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::{Column, Table, Trigger, TriggerEvent, TriggerTiming};
    use crate::{
        error::{Error, Result},
        sql::types::{DataType, Value},
    };

    fn column(name: &str, datatype: DataType, nullable: bool, primary_key: bool) -> Column {
        Column {
            name: name.to_string(),
            datatype,
            nullable,
            default: None,
            primary_key,
        }
    }

    #[test]
    fn test_validate_schema() -> Result<()> {
        let table = Table {
            name: "t".to_string(),
            columns: vec![
                column("id", DataType::Integer, false, true),
                column("name", DataType::String, true, false),
            ],
            triggers: vec![],
        };
        table.validate()?;
        assert_eq!(table.primary_key_index(), Some(0));

        let two_keys = Table {
            columns: vec![
                column("a", DataType::Integer, false, true),
                column("b", DataType::Integer, false, true),
            ],
            ..table.clone()
        };
        assert!(matches!(two_keys.validate(), Err(Error::Constraint(_))));

        let duplicate = Table {
            columns: vec![
                column("a", DataType::Integer, true, false),
                column("a", DataType::String, true, false),
            ],
            ..table
        };
        assert!(matches!(duplicate.validate(), Err(Error::Resolution(_))));
        Ok(())
    }

    #[test]
    fn test_validate_value_types() -> Result<()> {
        let int = column("n", DataType::Integer, false, false);
        assert_eq!(int.validate_value("t", Value::Float(3.0))?, Value::Integer(3));
        assert!(matches!(
            int.validate_value("t", Value::Float(3.5)),
            Err(Error::TypeMismatch(_))
        ));
        assert!(matches!(
            int.validate_value("t", Value::from("3")),
            Err(Error::TypeMismatch(_))
        ));
        assert!(matches!(
            int.validate_value("t", Value::Null),
            Err(Error::Constraint(_))
        ));

        let real = column("r", DataType::Float, true, false);
        assert_eq!(real.validate_value("t", Value::Integer(2))?, Value::Float(2.0));
        assert_eq!(real.validate_value("t", Value::Null)?, Value::Null);

        let any = column("x", DataType::Any, true, false);
        assert_eq!(any.validate_value("t", Value::from("a"))?, Value::from("a"));
        Ok(())
    }

    #[test]
    fn test_trigger_rename_column() {
        let mut trigger = Trigger {
            name: "tr".to_string(),
            table_name: "t".to_string(),
            timing: TriggerTiming::After,
            event: TriggerEvent::Update,
            when: Some("NEW.qty > OLD.qty".to_string()),
            body: vec![
                "INSERT INTO log (msg, qty) VALUES ('qty changed', NEW.qty)".to_string(),
                "UPDATE t SET qty = qty + 1 WHERE t.qty < 0".to_string(),
            ],
        };
        trigger.rename_column("qty", "amount");
        assert_eq!(trigger.when.as_deref(), Some("NEW.amount > OLD.amount"));
        assert_eq!(
            trigger.body[0],
            "INSERT INTO log (msg, qty) VALUES ('qty changed', NEW.amount)"
        );
        assert_eq!(
            trigger.body[1],
            "UPDATE t SET amount = amount + 1 WHERE t.amount < 0"
        );
    }
}
