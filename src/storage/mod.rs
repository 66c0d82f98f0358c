//! The storage adapter: buckets, batches and snapshot cursors over an
//! ordered byte keyspace.

use std::collections::BTreeMap;
use std::sync::Arc;

use inline_array::InlineArray;

use crate::Result;

mod batch;
mod bucket;
mod iter;
mod log;

pub use self::{
    batch::{ReadOnlyBatch, ReadWriteBatch},
    bucket::Bucket,
    iter::Iter,
};

/// The ordered contents of a bucket.
pub(crate) type Index = BTreeMap<InlineArray, InlineArray>;

/// Options for a single write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetOptions {
    /// Force the write to stable storage before returning.
    pub synchronized: bool,
}

/// Selects the capabilities of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// Consistent multi-key reads over a snapshot.
    ReadOnly,
    /// Reads plus staged writes that are applied atomically on commit.
    ReadWrite,
}

/// A single logged mutation. `None` represents a removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Update {
    pub key: InlineArray,
    pub value: Option<InlineArray>,
}

/// Returned by `Storage::compare_and_swap` when the current value
/// does not match the expected one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareAndSwapError {
    /// The current value which caused the CAS to fail.
    pub current: Option<InlineArray>,
    /// Returned value that was proposed unsuccessfully.
    pub proposed: Option<InlineArray>,
}

/// Compare and swap result. The outer `Result` carries storage errors.
pub type CompareAndSwapResult = std::result::Result<(), CompareAndSwapError>;

/// Opens buckets by name.
pub trait Driver: Send + Sync {
    /// Returns the handle for `name`, opening it if necessary. Every call
    /// for one name yields a handle to the same underlying bucket.
    fn bucket(&self, name: &str) -> Result<Arc<dyn Storage>>;
}

/// One named, ordered keyspace.
pub trait Storage: Send + Sync {
    /// Returns the stored value, or `Error::NoSuchKey`.
    fn get(&self, key: &[u8]) -> Result<InlineArray>;

    /// Inserts or replaces `key`.
    fn set(&self, key: &[u8], value: &[u8], options: SetOptions)
    -> Result<()>;

    /// Removes `key`. Removing an absent key is not an error.
    fn delete(&self, key: &[u8], options: SetOptions) -> Result<()>;

    /// Removes every key in `[start, end)`.
    fn delete_range(
        &self,
        start: &[u8],
        end: &[u8],
        options: SetOptions,
    ) -> Result<()>;

    /// Atomically replaces the value at `key` if it currently equals `old`.
    /// `None` stands for "absent" on either side.
    fn compare_and_swap(
        &self,
        key: &[u8],
        old: Option<&[u8]>,
        new: Option<&[u8]>,
        options: SetOptions,
    ) -> Result<CompareAndSwapResult>;

    /// A cursor over `[start, stop)` fixed at the moment of the call.
    /// Either side may be left unbounded.
    fn iter(&self, start: Option<&[u8]>, stop: Option<&[u8]>) -> Result<Iter>;

    /// Creates a batch of the requested kind.
    fn batch(&self, kind: BatchKind) -> Result<Box<dyn Batch>>;

    /// Forces every acknowledged write to stable storage.
    fn flush(&self) -> Result<()>;
}

/// A group of reads and (for `ReadWrite`) staged writes.
pub trait Batch: Send {
    /// The kind this batch was created with.
    fn kind(&self) -> BatchKind;

    /// Reads through the batch, observing its own staged writes.
    fn get(&self, key: &[u8]) -> Result<InlineArray>;

    /// Stages an insert.
    fn set(
        &mut self,
        key: &[u8],
        value: &[u8],
        options: SetOptions,
    ) -> Result<()>;

    /// Stages a removal.
    fn delete(&mut self, key: &[u8], options: SetOptions) -> Result<()>;

    /// Stages the removal of `[start, end)`.
    fn delete_range(
        &mut self,
        start: &[u8],
        end: &[u8],
        options: SetOptions,
    ) -> Result<()>;

    /// A cursor over the batch's view of `[start, stop)`.
    fn iter(&self, start: Option<&[u8]>, stop: Option<&[u8]>) -> Result<Iter>;

    /// Number of staged operations.
    fn len(&self) -> usize;

    /// Whether no operation has been staged.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies every staged operation atomically. Dropping a batch
    /// without committing discards it.
    fn commit(self: Box<Self>) -> Result<()>;
}
