//! The key/value table engine.
//!
//! A KV table maps string keys to [`Value`]s. Each entry lives in the
//! bucket at `DATA_TAG || key`, so the whole table is the contiguous
//! range of keys starting with the data tag.

use std::sync::Arc;

use crate::{
    Error, Result,
    codec::{Codec, Value},
    meta::DATA_TAG,
    storage::{Batch, BatchKind, Iter, SetOptions, Storage},
};

const DATA_START: [u8; 1] = [DATA_TAG];
const DATA_END: [u8; 1] = [DATA_TAG + 1];

fn prepare_key(key: &str) -> Vec<u8> {
    let mut prepared = Vec::with_capacity(key.len() + 1);
    prepared.push(DATA_TAG);
    prepared.extend_from_slice(key.as_bytes());
    prepared
}

fn unprepare_key(prepared: &[u8]) -> Result<String> {
    match prepared.split_first() {
        Some((&DATA_TAG, key)) => String::from_utf8(key.to_vec()).map_err(|_| {
            Error::Corruption(format!("data key {:?} is not valid UTF-8", prepared))
        }),
        _ => Err(Error::Corruption(format!(
            "key {:?} found in the data range without the data tag",
            prepared
        ))),
    }
}

// the smallest key greater than every key starting with `prefix`
fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

fn collect_keys(iter: Iter) -> Result<Vec<String>> {
    iter.map(|(k, _)| unprepare_key(&k)).collect()
}

/// A KV table.
#[derive(Clone)]
pub struct Kv {
    bucket: Arc<dyn Storage>,
    codec: Arc<dyn Codec>,
    options: SetOptions,
}

impl std::fmt::Debug for Kv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kv").field("options", &self.options).finish()
    }
}

impl Kv {
    /// Builds a KV engine over `bucket`. Every write uses `options`.
    pub fn new(
        bucket: Arc<dyn Storage>,
        codec: Arc<dyn Codec>,
        options: SetOptions,
    ) -> Kv {
        Kv { bucket, codec, options }
    }

    /// Returns the value stored at `key`, or `Error::NoSuchKey`.
    pub fn get(&self, key: &str) -> Result<Value> {
        let raw = self.bucket.get(&prepare_key(key))?;
        self.codec.decode(&raw)
    }

    /// Stores `value` at `key`, replacing any previous value.
    pub fn set<V: Into<Value>>(&self, key: &str, value: V) -> Result<()> {
        let encoded = self.codec.encode(&value.into())?;
        self.bucket.set(&prepare_key(key), &encoded, self.options)
    }

    /// Removes `key`. Removing an absent key is not an error.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.bucket.delete(&prepare_key(key), self.options)
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> Result<bool> {
        match self.bucket.get(&prepare_key(key)) {
            Ok(_) => Ok(true),
            Err(Error::NoSuchKey) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Every key in the table, ascending, as of the moment of the call.
    pub fn keys(&self) -> Result<Vec<String>> {
        collect_keys(self.bucket.iter(Some(&DATA_START[..]), Some(&DATA_END[..]))?)
    }

    /// The keys starting with `prefix`, ascending.
    pub fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let start = prepare_key(prefix);
        let end = prefix_end(&start);
        collect_keys(self.bucket.iter(Some(&start[..]), end.as_deref())?)
    }

    /// Iterates over a snapshot of the table, decoding lazily.
    pub fn iter(&self) -> Result<impl Iterator<Item = Result<(String, Value)>>> {
        let codec = self.codec.clone();
        let iter = self.bucket.iter(Some(&DATA_START[..]), Some(&DATA_END[..]))?;
        Ok(iter.map(move |(k, v)| Ok((unprepare_key(&k)?, codec.decode(&v)?))))
    }

    /// Removes every entry, leaving metadata alone.
    pub fn clear(&self) -> Result<()> {
        self.bucket.delete_range(&DATA_START, &DATA_END, self.options)
    }

    /// Starts a session whose writes become visible together on commit.
    pub fn session(&self) -> Result<Session> {
        Ok(Session {
            batch: self.bucket.batch(BatchKind::ReadWrite)?,
            codec: self.codec.clone(),
            options: self.options,
        })
    }
}

/// A group of KV writes applied atomically.
///
/// Reads through a session observe its own uncommitted writes. Dropping
/// a session without calling `commit` discards everything it staged.
pub struct Session {
    batch: Box<dyn Batch>,
    codec: Arc<dyn Codec>,
    options: SetOptions,
}

impl Session {
    /// Reads `key`, seeing this session's staged writes.
    pub fn get(&self, key: &str) -> Result<Value> {
        let raw = self.batch.get(&prepare_key(key))?;
        self.codec.decode(&raw)
    }

    /// Stages a write of `value` at `key`.
    pub fn set<V: Into<Value>>(&mut self, key: &str, value: V) -> Result<()> {
        let encoded = self.codec.encode(&value.into())?;
        self.batch.set(&prepare_key(key), &encoded, self.options)
    }

    /// Stages the removal of `key`.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        self.batch.delete(&prepare_key(key), self.options)
    }

    /// Whether `key` is present from this session's point of view.
    pub fn contains_key(&self, key: &str) -> Result<bool> {
        match self.batch.get(&prepare_key(key)) {
            Ok(_) => Ok(true),
            Err(Error::NoSuchKey) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Every key visible to this session, ascending.
    pub fn keys(&self) -> Result<Vec<String>> {
        collect_keys(self.batch.iter(Some(&DATA_START[..]), Some(&DATA_END[..]))?)
    }

    /// Number of staged operations.
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    /// Whether nothing has been staged.
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Applies every staged operation atomically.
    pub fn commit(self) -> Result<()> {
        self.batch.commit()
    }

    /// Drops every staged operation.
    pub fn discard(self) {
        drop(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Config, codec::BincodeCodec, storage::Bucket};

    fn kv() -> Kv {
        let bucket = Bucket::open("kv", &Config::new().temporary(true)).unwrap();
        Kv::new(Arc::new(bucket), Arc::new(BincodeCodec), SetOptions::default())
    }

    #[test]
    fn key_preparation() {
        assert_eq!(prepare_key("alice"), b"=alice".to_vec());
        assert_eq!(unprepare_key(b"=alice"), Ok("alice".to_string()));
        assert!(matches!(unprepare_key(b"&:"), Err(Error::Corruption(_))));
        assert!(matches!(unprepare_key(b""), Err(Error::Corruption(_))));
    }

    #[test]
    fn prefix_end_skips_saturated_bytes() {
        assert_eq!(prefix_end(b"=ab"), Some(b"=ac".to_vec()));
        assert_eq!(prefix_end(&[b'=', 0xff]), Some(b">".to_vec()));
        assert_eq!(prefix_end(&[0xff, 0xff]), None);
    }

    #[test]
    fn empty_key_is_a_valid_key() {
        let kv = kv();
        kv.set("", "empty").unwrap();
        assert_eq!(kv.get("").unwrap(), Value::from("empty"));
        assert_eq!(kv.keys().unwrap(), vec![String::new()]);
    }

    #[test]
    fn scan_prefix_and_clear() {
        let kv = kv();
        for key in ["user:1", "user:2", "users", "order:1"] {
            kv.set(key, 1).unwrap();
        }

        assert_eq!(kv.scan_prefix("user:").unwrap(), vec!["user:1", "user:2"]);
        assert_eq!(kv.scan_prefix("").unwrap().len(), 4);

        kv.clear().unwrap();
        assert!(kv.keys().unwrap().is_empty());
    }

    #[test]
    fn corrupt_value_is_a_codec_error() {
        let bucket = Bucket::open("kv", &Config::new().temporary(true)).unwrap();
        bucket.set(b"=bad", &[0xff; 4], SetOptions::default()).unwrap();
        let kv = Kv::new(Arc::new(bucket), Arc::new(BincodeCodec), SetOptions::default());

        assert!(matches!(kv.get("bad"), Err(Error::Codec(_))));
        assert_eq!(kv.keys().unwrap(), vec!["bad".to_string()]);
    }
}
