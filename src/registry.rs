use std::sync::Arc;

use fnv::FnvHashMap;
use parking_lot::Mutex;

use crate::{
    Config, Error, Result,
    storage::{Bucket, Driver, Storage},
};

/// Owns every open bucket and hands out shared handles by name.
///
/// Lookup and open happen inside one critical section, so concurrent
/// callers asking for the same name always end up with handles to the
/// same engine, and a bucket is never opened twice.
pub struct Registry {
    config: Config,
    buckets: Mutex<FnvHashMap<String, Bucket>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("path", &self.config.get_path())
            .field("buckets", &self.bucket_names())
            .finish()
    }
}

fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);

    if invalid {
        Err(Error::InvalidBucketName(name.to_owned()))
    } else {
        Ok(())
    }
}

impl Registry {
    /// Creates an empty registry. Buckets are opened lazily.
    pub fn new(config: Config) -> Registry {
        Registry { config, buckets: Mutex::new(FnvHashMap::default()) }
    }

    /// The configuration every bucket is opened with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the open bucket called `name`, opening it first if
    /// needed. A failed open is not remembered.
    pub fn open_bucket(&self, name: &str) -> Result<Bucket> {
        validate_name(name)?;

        let mut buckets = self.buckets.lock();
        if let Some(bucket) = buckets.get(name) {
            return Ok(bucket.clone());
        }

        let bucket = Bucket::open(name, &self.config)?;
        buckets.insert(name.to_owned(), bucket.clone());

        Ok(bucket)
    }

    /// Names of the buckets opened so far, in no particular order.
    pub fn bucket_names(&self) -> Vec<String> {
        self.buckets.lock().keys().cloned().collect()
    }

    /// Flushes every open bucket.
    pub fn flush(&self) -> Result<()> {
        let buckets: Vec<Bucket> = self.buckets.lock().values().cloned().collect();
        for bucket in buckets {
            bucket.flush()?;
        }
        Ok(())
    }
}

impl Driver for Registry {
    fn bucket(&self, name: &str) -> Result<Arc<dyn Storage>> {
        Ok(Arc::new(self.open_bucket(name)?))
    }
}
