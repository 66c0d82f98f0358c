use std::fmt;
use std::sync::Arc;

use inline_array::InlineArray;
use parking_lot::{Mutex, RwLock};

use super::log::{LogOptions, LogStore};
use super::{
    Batch, BatchKind, CompareAndSwapError, CompareAndSwapResult, Index, Iter,
    ReadOnlyBatch, ReadWriteBatch, SetOptions, Storage, Update,
};
use crate::{Config, Error, Result};

/// The engine behind one bucket name.
///
/// Reads are served from an in-memory ordered index that is swapped
/// copy-on-write, so snapshots are a reference count bump. Writers are
/// serialized, append one frame to the bucket log (unless the bucket is
/// temporary) and only then publish to the index.
///
/// While any snapshot is alive (an iterator, a batch or a session), the
/// next write clones the whole index, so holding snapshots across writes
/// makes those writes O(n).
///
/// `Bucket` is a cheap handle. Clones share the same engine.
#[derive(Clone)]
pub struct Bucket {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    index: RwLock<Arc<Index>>,
    // held across log append and index publication so that the
    // log order always matches the order writes become visible
    writer: Mutex<()>,
    log: Option<LogStore>,
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("name", &self.inner.name)
            .field("temporary", &self.inner.log.is_none())
            .finish()
    }
}

impl Bucket {
    /// Opens the bucket `name` according to `config`, recovering its
    /// contents from disk unless the configuration is temporary.
    pub fn open(name: &str, config: &Config) -> Result<Bucket> {
        let (log, index) = if config.get_temporary() {
            (None, Index::new())
        } else {
            let options = LogOptions {
                buffer_size: config.get_log_buffer_size(),
                compaction_threshold: config.get_compaction_threshold(),
                zstd_level: config.get_zstd_level(),
            };
            let (log, index) =
                LogStore::recover(config.bucket_path(name), options)?;
            (Some(log), index)
        };

        log::debug!("opened bucket {:?} with {} keys", name, index.len());

        Ok(Bucket {
            inner: Arc::new(Inner {
                name: name.to_owned(),
                index: RwLock::new(Arc::new(index)),
                writer: Mutex::new(()),
                log,
            }),
        })
    }

    /// The name this bucket was opened with.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of keys currently stored, metadata included.
    pub fn len(&self) -> usize {
        self.inner.index.read().len()
    }

    /// Whether the bucket holds no keys at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn snapshot(&self) -> Arc<Index> {
        self.inner.index.read().clone()
    }

    /// Runs `f` against the current contents with all other writers
    /// excluded, then durably applies the updates it returns as one
    /// atomic frame.
    pub(crate) fn write<F>(&self, synchronized: bool, f: F) -> Result<()>
    where
        F: FnOnce(&Index) -> Vec<Update>,
    {
        let _writer = self.inner.writer.lock();

        let updates = {
            let current = self.snapshot();
            f(&current)
        };

        if updates.is_empty() {
            return Ok(());
        }

        if let Some(log) = &self.inner.log {
            log.write_batch(&updates, synchronized)?;
        }

        let mut index = self.inner.index.write();
        let index = Arc::make_mut(&mut index);
        for Update { key, value } in updates {
            match value {
                Some(value) => {
                    index.insert(key, value);
                }
                None => {
                    index.remove(&key);
                }
            }
        }

        Ok(())
    }
}

impl Storage for Bucket {
    fn get(&self, key: &[u8]) -> Result<InlineArray> {
        self.inner
            .index
            .read()
            .get(&InlineArray::from(key))
            .cloned()
            .ok_or(Error::NoSuchKey)
    }

    fn set(
        &self,
        key: &[u8],
        value: &[u8],
        options: SetOptions,
    ) -> Result<()> {
        let update = Update { key: key.into(), value: Some(value.into()) };
        self.write(options.synchronized, |_| vec![update])
    }

    fn delete(&self, key: &[u8], options: SetOptions) -> Result<()> {
        let key = InlineArray::from(key);
        self.write(options.synchronized, |current| {
            if current.contains_key(&key) {
                vec![Update { key, value: None }]
            } else {
                vec![]
            }
        })
    }

    fn delete_range(
        &self,
        start: &[u8],
        end: &[u8],
        options: SetOptions,
    ) -> Result<()> {
        if start >= end {
            return Ok(());
        }
        let (start, end) = (InlineArray::from(start), InlineArray::from(end));
        self.write(options.synchronized, |current| {
            current
                .range(start..end)
                .map(|(k, _)| Update { key: k.clone(), value: None })
                .collect()
        })
    }

    fn compare_and_swap(
        &self,
        key: &[u8],
        old: Option<&[u8]>,
        new: Option<&[u8]>,
        options: SetOptions,
    ) -> Result<CompareAndSwapResult> {
        let key = InlineArray::from(key);
        let proposed = new.map(InlineArray::from);
        let mut outcome = Ok(());

        self.write(options.synchronized, |current| {
            let existing = current.get(&key);
            if existing.map(|v| &**v) != old {
                outcome = Err(CompareAndSwapError {
                    current: existing.cloned(),
                    proposed: proposed.clone(),
                });
                return vec![];
            }
            vec![Update { key: key.clone(), value: proposed.clone() }]
        })?;

        Ok(outcome)
    }

    fn iter(&self, start: Option<&[u8]>, stop: Option<&[u8]>) -> Result<Iter> {
        Ok(Iter::new(self.snapshot(), start, stop))
    }

    fn batch(&self, kind: BatchKind) -> Result<Box<dyn Batch>> {
        Ok(match kind {
            BatchKind::ReadOnly => Box::new(ReadOnlyBatch::new(self.snapshot())),
            BatchKind::ReadWrite => Box::new(ReadWriteBatch::new(self.clone())),
        })
    }

    fn flush(&self) -> Result<()> {
        if let Some(log) = &self.inner.log {
            let _writer = self.inner.writer.lock();
            log.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temporary() -> Bucket {
        Bucket::open("test", &Config::new().temporary(true)).unwrap()
    }

    #[test]
    fn point_operations() {
        let bucket = temporary();
        let opts = SetOptions::default();

        assert_eq!(bucket.get(b"k"), Err(Error::NoSuchKey));
        bucket.set(b"k", b"v1", opts).unwrap();
        bucket.set(b"k", b"v2", opts).unwrap();
        assert_eq!(&*bucket.get(b"k").unwrap(), b"v2");

        bucket.delete(b"k", opts).unwrap();
        bucket.delete(b"k", opts).unwrap();
        assert_eq!(bucket.get(b"k"), Err(Error::NoSuchKey));
    }

    #[test]
    fn delete_range_is_half_open() {
        let bucket = temporary();
        for k in [b"a", b"b", b"c", b"d"] {
            bucket.set(k, b"", SetOptions::default()).unwrap();
        }

        bucket.delete_range(b"b", b"d", SetOptions::default()).unwrap();

        let keys: Vec<_> = bucket
            .iter(None, None)
            .unwrap()
            .map(|(k, _)| k.to_vec())
            .collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"d".to_vec()]);
    }

    #[test]
    fn iterators_ignore_later_writes() {
        let bucket = temporary();
        bucket.set(b"a", b"1", SetOptions::default()).unwrap();

        let iter = bucket.iter(None, None).unwrap();
        bucket.set(b"b", b"2", SetOptions::default()).unwrap();
        bucket.delete(b"a", SetOptions::default()).unwrap();

        let seen: Vec<_> = iter.map(|(k, v)| (k.to_vec(), v.to_vec())).collect();
        assert_eq!(seen, vec![(b"a".to_vec(), b"1".to_vec())]);
    }

    #[test]
    fn compare_and_swap_only_applies_on_match() {
        let bucket = temporary();
        let opts = SetOptions::default();

        assert_eq!(bucket.compare_and_swap(b"k", None, Some(&b"1"[..]), opts), Ok(Ok(())));

        let failed = bucket
            .compare_and_swap(b"k", None, Some(&b"2"[..]), opts)
            .unwrap()
            .unwrap_err();
        assert_eq!(failed.current.as_deref(), Some(&b"1"[..]));
        assert_eq!(&*bucket.get(b"k").unwrap(), b"1");

        assert_eq!(
            bucket.compare_and_swap(b"k", Some(&b"1"[..]), None, opts),
            Ok(Ok(()))
        );
        assert_eq!(bucket.get(b"k"), Err(Error::NoSuchKey));
    }

    #[test]
    fn clones_share_contents() {
        let a = temporary();
        let b = a.clone();
        a.set(b"k", b"v", SetOptions::default()).unwrap();
        assert_eq!(&*b.get(b"k").unwrap(), b"v");
        assert_eq!(b.len(), 1);
    }

    fn log_bytes(directory: &std::path::Path) -> u64 {
        std::fs::read_dir(directory)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "log"))
            .map(|path| std::fs::metadata(path).unwrap().len())
            .sum()
    }

    #[test]
    fn synchronized_removals_reach_the_log_file() {
        let dir = tempdir::TempDir::new("kical_bucket_sync_removals").unwrap();
        let config = Config::new().path(dir.path());
        let bucket = Bucket::open("test", &config).unwrap();
        let directory = config.bucket_path("test");
        let sync = SetOptions { synchronized: true };

        for k in [b"a", b"b", b"c", b"d"] {
            bucket.set(k, b"", sync).unwrap();
        }
        let mut on_disk = log_bytes(&directory);

        bucket.delete(b"a", sync).unwrap();
        assert!(log_bytes(&directory) > on_disk);
        on_disk = log_bytes(&directory);

        bucket.delete_range(b"b", b"c", sync).unwrap();
        assert!(log_bytes(&directory) > on_disk);
        on_disk = log_bytes(&directory);

        // one synchronized removal makes the whole batch synchronized
        let mut batch = bucket.batch(BatchKind::ReadWrite).unwrap();
        batch.set(b"e", b"", SetOptions::default()).unwrap();
        batch.delete(b"c", sync).unwrap();
        batch.commit().unwrap();
        assert!(log_bytes(&directory) > on_disk);
        on_disk = log_bytes(&directory);

        // unsynchronized removals wait in the log buffer
        bucket.delete(b"d", SetOptions::default()).unwrap();
        assert_eq!(log_bytes(&directory), on_disk);
        bucket.flush().unwrap();
        assert!(log_bytes(&directory) > on_disk);
    }
}
