use std::collections::HashSet;

use proptest::prelude::*;
use propdb::{Database, DatabaseOptions, Value, storage::MemoryEngine};

fn open() -> Database<MemoryEngine> {
    let options = DatabaseOptions {
        auto_save: false,
        ..Default::default()
    };
    Database::new(MemoryEngine::new(), options).expect("open database")
}

fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Boolean),
        any::<i64>().prop_map(Value::Integer),
        (-1e12f64..1e12).prop_map(Value::Float),
        "[a-zA-Z0-9 'é😀]{0,12}".prop_map(Value::String),
    ]
}

#[derive(Debug, Clone)]
enum Write {
    Insert(i64, i64),
    InsertOrIgnore(i64, i64),
    InsertOrReplace(i64, i64),
    Upsert(i64, i64),
    MoveKey(i64, i64),
    Delete(i64),
}

fn write_strategy() -> impl Strategy<Value = Write> {
    let key = 0i64..8;
    let n = -5i64..5;
    prop_oneof![
        (key.clone(), n.clone()).prop_map(|(k, n)| Write::Insert(k, n)),
        (key.clone(), n.clone()).prop_map(|(k, n)| Write::InsertOrIgnore(k, n)),
        (key.clone(), n.clone()).prop_map(|(k, n)| Write::InsertOrReplace(k, n)),
        (key.clone(), n).prop_map(|(k, n)| Write::Upsert(k, n)),
        (key.clone(), key.clone()).prop_map(|(from, to)| Write::MoveKey(from, to)),
        key.prop_map(Write::Delete),
    ]
}

fn apply(db: &mut Database<MemoryEngine>, write: &Write) {
    let (sql, params) = match write {
        Write::Insert(k, n) => ("INSERT INTO t VALUES (?, ?)", vec![Value::Integer(*k), Value::Integer(*n)]),
        Write::InsertOrIgnore(k, n) => (
            "INSERT OR IGNORE INTO t VALUES (?, ?)",
            vec![Value::Integer(*k), Value::Integer(*n)],
        ),
        Write::InsertOrReplace(k, n) => (
            "INSERT OR REPLACE INTO t VALUES (?, ?)",
            vec![Value::Integer(*k), Value::Integer(*n)],
        ),
        Write::Upsert(k, n) => (
            "INSERT INTO t VALUES (?, ?) ON CONFLICT(id) DO UPDATE SET n = n + excluded.n",
            vec![Value::Integer(*k), Value::Integer(*n)],
        ),
        Write::MoveKey(from, to) => (
            "UPDATE t SET id = ? WHERE id = ?",
            vec![Value::Integer(*to), Value::Integer(*from)],
        ),
        Write::Delete(k) => ("DELETE FROM t WHERE id = ?", vec![Value::Integer(*k)]),
    };
    // Constraint failures are expected; they must leave the table intact
    let _ = db.exec(sql, &params);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn snapshot_round_trips_through_storage(values in prop::collection::vec(value_strategy(), 0..20)) {
        let mut db = open();
        db.exec("CREATE TABLE t(id INTEGER PRIMARY KEY, v ANY)", &[]).expect("create");
        for value in &values {
            db.exec("INSERT INTO t(v) VALUES (?)", std::slice::from_ref(value)).expect("insert");
        }
        db.save().expect("save");
        let exported = db.export().expect("export");

        let options = DatabaseOptions { auto_save: false, ..Default::default() };
        let reopened = Database::new(db.into_engine(), options).expect("reopen");
        prop_assert_eq!(reopened.export().expect("export"), exported);

        let mut imported = open();
        imported.import(&reopened.export().expect("export")).expect("import");
        let stored: Vec<Value> = imported
            .query("SELECT v FROM t", &[])
            .expect("select")
            .rows
            .into_iter()
            .map(|mut row| row.remove(0))
            .collect();
        prop_assert_eq!(stored, values);
    }

    #[test]
    fn primary_keys_stay_unique(writes in prop::collection::vec(write_strategy(), 0..40)) {
        let mut db = open();
        db.exec("CREATE TABLE t(id INTEGER PRIMARY KEY, n INTEGER)", &[]).expect("create");
        for write in &writes {
            apply(&mut db, write);
        }

        let rows = db.query("SELECT id FROM t", &[]).expect("select").rows;
        let keys: HashSet<Value> = rows.iter().map(|row| row[0].clone()).collect();
        prop_assert_eq!(keys.len(), rows.len());
        prop_assert!(keys.iter().all(|k| !k.is_null()));
    }
}
