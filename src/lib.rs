//! `kical` is a multi-model table store on top of named, ordered,
//! log-structured buckets.
//!
//! Each table lives in its own bucket. A small metadata record inside the
//! bucket says which model the table presents, and opening a table
//! resolves that record into a typed engine.
//!
//! # Examples
//!
//! ```
//! use kical::{Config, Database, Error, StorageType, Value};
//!
//! let db = Database::open(Config::new().temporary(true)).unwrap();
//!
//! // a table must be created before it can be opened
//! assert_eq!(db.table("accounts").unwrap_err(), Error::NotInitialized);
//!
//! db.create_table("accounts", StorageType::Kv).unwrap();
//!
//! let table = db.table("accounts").unwrap();
//! assert!(table.is_kv());
//!
//! let kv = table.as_kv().unwrap();
//! kv.set("alice", 100).unwrap();
//! assert_eq!(kv.get("alice"), Ok(Value::Integer(100)));
//! assert_eq!(kv.keys(), Ok(vec!["alice".to_string()]));
//!
//! // several writes applied atomically
//! let mut session = kv.session().unwrap();
//! session.set("bob", 50).unwrap();
//! session.delete("alice").unwrap();
//! session.commit().unwrap();
//! assert_eq!(kv.keys(), Ok(vec!["bob".to_string()]));
//! ```
#![deny(missing_docs)]
#![deny(future_incompatible)]
#![deny(nonstandard_style)]
#![deny(rust_2018_idioms)]

mod codec;
mod config;
mod db;
mod kv;
mod meta;
mod registry;
mod result;
mod storage;
mod table;

pub use self::{
    codec::{BincodeCodec, Codec, Value, ValueType},
    config::{Config, Durability},
    db::Database,
    kv::{Kv, Session},
    meta::{
        DATA_TAG, EXTENDED_FLAG_K, Field, Initializer, KEYS_SEPARATOR,
        METADATA_TAG, Parser, PrimaryKey, StorageType,
    },
    registry::Registry,
    result::{Error, Result},
    storage::{
        Batch, BatchKind, Bucket, CompareAndSwapError, CompareAndSwapResult,
        Driver, Iter, ReadOnlyBatch, ReadWriteBatch, SetOptions, Storage,
    },
    table::Table,
};
