//! The in-memory database image and its versioned JSON serialization.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    sql::{schema::Table, types::Row},
};

/// Serialization format version written by this crate
pub const SNAPSHOT_VERSION: u32 = 1;

/// A table's schema with its rows, in insertion order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    pub schema: Table,
    pub rows: Vec<Row>,
}

impl TableData {
    pub fn new(schema: Table) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }
}

/// Complete database state: the unit of atomicity and of persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub tables: BTreeMap<String, TableData>,
    #[serde(default)]
    pub last_insert_id: Option<i64>,
    #[serde(default)]
    pub last_changes: u64,
    #[serde(default)]
    pub total_changes: u64,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            tables: BTreeMap::new(),
            last_insert_id: None,
            last_changes: 0,
            total_changes: 0,
        }
    }
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses and validates a serialized snapshot
    pub fn from_json(data: &str) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_str(data)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Name of the table owning the trigger, if any
    pub fn trigger_table(&self, trigger: &str) -> Option<&str> {
        self.tables
            .values()
            .find(|t| t.schema.triggers.iter().any(|tr| tr.name == trigger))
            .map(|t| t.schema.name.as_str())
    }

    /// Checks the structural invariants of imported data
    pub fn validate(&self) -> Result<()> {
        if self.version != SNAPSHOT_VERSION {
            return Err(Error::CorruptData(format!(
                "unsupported snapshot version {}",
                self.version
            )));
        }
        let mut trigger_names = HashSet::new();
        for (name, data) in &self.tables {
            let schema = &data.schema;
            if name != &schema.name {
                return Err(Error::CorruptData(format!(
                    "table {} is stored under name {}",
                    schema.name, name
                )));
            }
            schema
                .validate()
                .map_err(|e| Error::CorruptData(e.to_string()))?;

            for trigger in &schema.triggers {
                if trigger.table_name != schema.name || !trigger_names.insert(&trigger.name) {
                    return Err(Error::CorruptData(format!(
                        "invalid trigger {} on table {}",
                        trigger.name, schema.name
                    )));
                }
            }

            let mut keys = HashSet::new();
            for row in &data.rows {
                if row.len() != schema.columns.len() {
                    return Err(Error::CorruptData(format!(
                        "row of table {} has {} values, expected {}",
                        name,
                        row.len(),
                        schema.columns.len()
                    )));
                }
                for (value, column) in row.iter().zip(&schema.columns) {
                    let stored = column
                        .validate_value(name, value.clone())
                        .map_err(|e| Error::CorruptData(e.to_string()))?;
                    if stored != *value {
                        return Err(Error::CorruptData(format!(
                            "value {} does not fit column {}.{}",
                            value, name, column.name
                        )));
                    }
                }
                if let Some(key) = schema.get_primary_key(row) {
                    if !keys.insert(key) {
                        return Err(Error::CorruptData(format!(
                            "duplicate primary key {} in table {}",
                            key, name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Snapshot, TableData};
    use crate::{
        error::{Error, Result},
        sql::{
            schema::{Column, Table},
            types::{DataType, Value},
        },
    };

    fn users() -> TableData {
        TableData {
            schema: Table {
                name: "users".to_string(),
                columns: vec![
                    Column {
                        name: "id".to_string(),
                        datatype: DataType::Integer,
                        nullable: false,
                        default: None,
                        primary_key: true,
                    },
                    Column {
                        name: "score".to_string(),
                        datatype: DataType::Any,
                        nullable: true,
                        default: Some(Value::Float(1.5)),
                        primary_key: false,
                    },
                ],
                triggers: vec![],
            },
            rows: vec![
                vec![Value::Integer(1), Value::from("1")],
                vec![Value::Integer(2), Value::Float(2.0)],
                vec![Value::Integer(3), Value::Boolean(true)],
            ],
        }
    }

    #[test]
    fn test_json_keeps_value_kinds() -> Result<()> {
        let mut snapshot = Snapshot::default();
        snapshot.tables.insert("users".to_string(), users());
        snapshot.last_insert_id = Some(3);
        snapshot.total_changes = 3;

        let json = snapshot.to_json()?;
        assert!(json.contains(r#"{"String":"1"}"#));
        assert!(json.contains(r#"{"Float":2.0}"#));
        assert_eq!(Snapshot::from_json(&json)?, snapshot);
        Ok(())
    }

    #[test]
    fn test_import_validation() -> Result<()> {
        let mut snapshot = Snapshot::default();
        snapshot.tables.insert("users".to_string(), users());

        let mut bad_version = snapshot.clone();
        bad_version.version = 2;
        assert!(matches!(
            Snapshot::from_json(&bad_version.to_json()?),
            Err(Error::CorruptData(_))
        ));

        let mut short_row = snapshot.clone();
        if let Some(t) = short_row.tables.get_mut("users") {
            t.rows.push(vec![Value::Integer(9)]);
        }
        assert!(matches!(
            Snapshot::from_json(&short_row.to_json()?),
            Err(Error::CorruptData(_))
        ));

        let mut duplicate = snapshot;
        if let Some(t) = duplicate.tables.get_mut("users") {
            t.rows.push(vec![Value::Integer(1), Value::Null]);
        }
        assert!(matches!(
            Snapshot::from_json(&duplicate.to_json()?),
            Err(Error::CorruptData(_))
        ));

        assert!(matches!(
            Snapshot::from_json("{\"version\":1"),
            Err(Error::CorruptData(_))
        ));
        Ok(())
    }
}
