mod common;

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use kical::{Error, StorageType, Value};

#[test]
fn accounts_walkthrough() {
    common::setup_logger();
    let db = common::temporary_db();

    assert_eq!(db.table("accounts").unwrap_err(), Error::NotInitialized);

    db.create_table("accounts", StorageType::Kv).unwrap();
    let table = db.table("accounts").unwrap();
    assert!(table.is_kv());
    assert!(!table.is_row_document());
    assert!(!table.is_analytical());

    let kv = table.as_kv().unwrap();
    kv.set("alice", 100).unwrap();
    assert_eq!(kv.get("alice"), Ok(Value::Integer(100)));
    assert_eq!(kv.keys(), Ok(vec!["alice".to_string()]));
}

#[test]
fn every_value_kind_round_trips() {
    common::setup_logger();
    let db = common::temporary_db();
    let table = db.create_table("values", StorageType::Kv).unwrap();
    let kv = table.as_kv().unwrap();

    let mut object = BTreeMap::new();
    object.insert("nested".to_string(), Value::Float(0.5));

    let values = vec![
        Value::String("text".into()),
        Value::Integer(-7),
        Value::Float(3.25),
        Value::Decimal("12345678901234567890.01".into()),
        Value::Time(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)),
        Value::Object(object),
        Value::Tag("vip".into()),
        Value::Enum("gold".into()),
    ];

    for (i, value) in values.iter().enumerate() {
        kv.set(&format!("k{}", i), value.clone()).unwrap();
    }
    for (i, value) in values.iter().enumerate() {
        assert_eq!(&kv.get(&format!("k{}", i)).unwrap(), value);
    }
}

#[test]
fn missing_and_deleted_keys() {
    common::setup_logger();
    let db = common::temporary_db();
    let table = db.create_table("t", StorageType::Kv).unwrap();
    let kv = table.as_kv().unwrap();

    assert_eq!(kv.get("ghost"), Err(Error::NoSuchKey));
    assert_eq!(kv.contains_key("ghost"), Ok(false));
    kv.delete("ghost").unwrap();

    kv.set("b", "2").unwrap();
    kv.set("a", "1").unwrap();
    kv.set("c", "3").unwrap();
    kv.delete("b").unwrap();

    assert_eq!(kv.keys(), Ok(vec!["a".to_string(), "c".to_string()]));
    assert_eq!(kv.get("b"), Err(Error::NoSuchKey));
}

#[test]
fn keys_never_include_metadata() {
    common::setup_logger();
    let db = common::temporary_db();
    let table = db.create_table("t", StorageType::Kv).unwrap();
    let kv = table.as_kv().unwrap();

    // names that look like metadata keys are just data keys
    kv.set("&:", "not metadata").unwrap();
    kv.set(":", "x").unwrap();

    assert_eq!(kv.keys(), Ok(vec!["&:".to_string(), ":".to_string()]));
    assert_eq!(table.meta().storage_type(), Ok(StorageType::Kv));

    kv.clear().unwrap();
    assert_eq!(kv.keys(), Ok(vec![]));
    assert_eq!(db.table("t").unwrap().storage_type(), StorageType::Kv);
}

#[test]
fn iter_decodes_in_key_order() {
    common::setup_logger();
    let db = common::temporary_db();
    let table = db.create_table("t", StorageType::Kv).unwrap();
    let kv = table.as_kv().unwrap();

    kv.set("b", 2).unwrap();
    kv.set("a", 1).unwrap();

    let entries: Vec<(String, Value)> =
        kv.iter().unwrap().collect::<kical::Result<_>>().unwrap();
    assert_eq!(
        entries,
        vec![
            ("a".to_string(), Value::Integer(1)),
            ("b".to_string(), Value::Integer(2)),
        ]
    );
}

#[test]
fn session_commit_is_atomic() {
    common::setup_logger();
    let db = common::temporary_db();
    let table = db.create_table("t", StorageType::Kv).unwrap();
    let kv = table.as_kv().unwrap();
    kv.set("alice", 100).unwrap();

    let mut session = kv.session().unwrap();
    session.set("alice", 60).unwrap();
    session.set("bob", 40).unwrap();

    // staged writes are visible inside the session only
    assert_eq!(session.get("bob"), Ok(Value::Integer(40)));
    assert_eq!(kv.get("bob"), Err(Error::NoSuchKey));
    assert_eq!(kv.get("alice"), Ok(Value::Integer(100)));
    assert_eq!(session.len(), 2);

    session.commit().unwrap();

    assert_eq!(kv.get("alice"), Ok(Value::Integer(60)));
    assert_eq!(kv.get("bob"), Ok(Value::Integer(40)));
}

#[test]
fn discarded_session_leaves_no_trace() {
    common::setup_logger();
    let db = common::temporary_db();
    let table = db.create_table("t", StorageType::Kv).unwrap();
    let kv = table.as_kv().unwrap();
    kv.set("keep", 1).unwrap();

    let mut session = kv.session().unwrap();
    session.delete("keep").unwrap();
    session.set("new", 2).unwrap();
    assert_eq!(session.contains_key("keep"), Ok(false));
    assert_eq!(session.keys(), Ok(vec!["new".to_string()]));
    session.discard();

    assert_eq!(kv.keys(), Ok(vec!["keep".to_string()]));
}
