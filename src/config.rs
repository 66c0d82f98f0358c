use std::path::{Path, PathBuf};

use crate::storage::SetOptions;

/// Whether a write is forced to stable storage before it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    /// fsync every write before acknowledging it.
    Sync,
    /// Hand writes to the OS and return. They become durable
    /// on the next synchronized write, on `flush`, or when the
    /// bucket is dropped.
    #[default]
    Async,
}

impl Durability {
    /// The `SetOptions` that carry this durability to the storage layer.
    pub const fn set_options(self) -> SetOptions {
        SetOptions { synchronized: matches!(self, Durability::Sync) }
    }
}

/// Top-level configuration for the system.
///
/// Everything except `durability` is forwarded untouched to each
/// bucket as it is opened.
#[derive(Debug, Clone)]
pub struct Config {
    path: PathBuf,
    temporary: bool,
    durability: Durability,
    log_buffer_size: usize,
    compaction_threshold: u64,
    zstd_level: i32,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            path: "kical.default".into(),
            temporary: false,
            durability: Durability::Async,
            log_buffer_size: 64 * 1024,
            compaction_threshold: 64 * 1024,
            zstd_level: 3,
        }
    }
}

macro_rules! builder {
    ($(($name:ident, $get:ident, $set:ident, $t:ty, $desc:expr)),*) => {
        $(
            #[doc="Get "]
            #[doc=$desc]
            pub fn $get(&self) -> $t {
                self.$name.clone()
            }

            #[doc="Set "]
            #[doc=$desc]
            pub fn $set(&mut self, to: $t) {
                self.$name = to;
            }

            #[doc="Builder, set "]
            #[doc=$desc]
            pub fn $name(&self, to: $t) -> Config {
                let mut ret = self.clone();
                ret.$name = to;
                ret
            }
        )*
    }
}

impl Config {
    /// Returns a default `Config`.
    pub fn new() -> Config {
        Config::default()
    }

    builder!(
        (temporary, get_temporary, set_temporary, bool, "whether buckets live only in memory"),
        (durability, get_durability, set_durability, Durability, "the durability of table writes"),
        (log_buffer_size, get_log_buffer_size, set_log_buffer_size, usize, "size of the write buffer in front of each bucket log"),
        (compaction_threshold, get_compaction_threshold, set_compaction_threshold, u64, "number of log bytes written before the log is compacted into a snapshot"),
        (zstd_level, get_zstd_level, set_zstd_level, i32, "zstd compression level used for log frames")
    );

    /// Builder, set the base directory that holds one directory per bucket.
    pub fn path<P: AsRef<Path>>(&self, path: P) -> Config {
        let mut ret = self.clone();
        ret.path = path.as_ref().to_path_buf();
        ret
    }

    /// Get the base directory.
    pub fn get_path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn bucket_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_leaves_original_untouched() {
        let base = Config::new();
        let tuned = base.temporary(true).compaction_threshold(1024);

        assert!(!base.get_temporary());
        assert!(tuned.get_temporary());
        assert_eq!(tuned.get_compaction_threshold(), 1024);
        assert_eq!(tuned.get_durability(), Durability::Async);
    }

    #[test]
    fn durability_maps_to_set_options() {
        assert!(Durability::Sync.set_options().synchronized);
        assert!(!Durability::Async.set_options().synchronized);
    }
}
