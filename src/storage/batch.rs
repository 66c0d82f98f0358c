use std::collections::BTreeMap;
use std::sync::Arc;

use inline_array::InlineArray;

use super::{Batch, BatchKind, Bucket, Index, Iter, SetOptions, Update};
use crate::{Error, Result};

/// Consistent multi-key reads over the snapshot taken at creation.
pub struct ReadOnlyBatch {
    snapshot: Arc<Index>,
}

impl ReadOnlyBatch {
    pub(crate) fn new(snapshot: Arc<Index>) -> ReadOnlyBatch {
        ReadOnlyBatch { snapshot }
    }

    fn read_only() -> Error {
        Error::Unsupported("write staged on a read-only batch".into())
    }
}

impl Batch for ReadOnlyBatch {
    fn kind(&self) -> BatchKind {
        BatchKind::ReadOnly
    }

    fn get(&self, key: &[u8]) -> Result<InlineArray> {
        self.snapshot.get(&InlineArray::from(key)).cloned().ok_or(Error::NoSuchKey)
    }

    fn set(&mut self, _: &[u8], _: &[u8], _: SetOptions) -> Result<()> {
        Err(Self::read_only())
    }

    fn delete(&mut self, _: &[u8], _: SetOptions) -> Result<()> {
        Err(Self::read_only())
    }

    fn delete_range(&mut self, _: &[u8], _: &[u8], _: SetOptions) -> Result<()> {
        Err(Self::read_only())
    }

    fn iter(&self, start: Option<&[u8]>, stop: Option<&[u8]>) -> Result<Iter> {
        Ok(Iter::new(self.snapshot.clone(), start, stop))
    }

    fn len(&self) -> usize {
        0
    }

    fn commit(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Staged writes layered over the snapshot taken at creation.
///
/// Reads through the batch see its own staged writes. Nothing reaches
/// the bucket until `commit`, which applies the whole batch as one
/// atomic frame.
pub struct ReadWriteBatch {
    bucket: Bucket,
    snapshot: Arc<Index>,
    // staged point writes, `None` is a removal. always newer than any
    // range removal covering the same key.
    overlay: BTreeMap<InlineArray, Option<InlineArray>>,
    removed_ranges: Vec<(InlineArray, InlineArray)>,
    staged: usize,
    synchronized: bool,
}

impl ReadWriteBatch {
    pub(crate) fn new(bucket: Bucket) -> ReadWriteBatch {
        let snapshot = bucket.snapshot();
        ReadWriteBatch {
            bucket,
            snapshot,
            overlay: BTreeMap::new(),
            removed_ranges: vec![],
            staged: 0,
            synchronized: false,
        }
    }

    fn range_removed(&self, key: &InlineArray) -> bool {
        self.removed_ranges.iter().any(|(start, end)| start <= key && key < end)
    }

    fn view(&self, key: &InlineArray) -> Option<InlineArray> {
        match self.overlay.get(key) {
            Some(staged) => staged.clone(),
            None if self.range_removed(key) => None,
            None => self.snapshot.get(key).cloned(),
        }
    }
}

impl Batch for ReadWriteBatch {
    fn kind(&self) -> BatchKind {
        BatchKind::ReadWrite
    }

    fn get(&self, key: &[u8]) -> Result<InlineArray> {
        self.view(&InlineArray::from(key)).ok_or(Error::NoSuchKey)
    }

    fn set(
        &mut self,
        key: &[u8],
        value: &[u8],
        options: SetOptions,
    ) -> Result<()> {
        self.overlay.insert(key.into(), Some(value.into()));
        self.synchronized |= options.synchronized;
        self.staged += 1;
        Ok(())
    }

    fn delete(&mut self, key: &[u8], options: SetOptions) -> Result<()> {
        self.overlay.insert(key.into(), None);
        self.synchronized |= options.synchronized;
        self.staged += 1;
        Ok(())
    }

    fn delete_range(
        &mut self,
        start: &[u8],
        end: &[u8],
        options: SetOptions,
    ) -> Result<()> {
        self.synchronized |= options.synchronized;
        if start >= end {
            return Ok(());
        }
        let (start, end) = (InlineArray::from(start), InlineArray::from(end));
        self.overlay.retain(|k, _| !(&start <= k && k < &end));
        self.removed_ranges.push((start, end));
        self.staged += 1;
        Ok(())
    }

    fn iter(&self, start: Option<&[u8]>, stop: Option<&[u8]>) -> Result<Iter> {
        if self.overlay.is_empty() && self.removed_ranges.is_empty() {
            return Ok(Iter::new(self.snapshot.clone(), start, stop));
        }

        // materialize the merged view of just the requested range
        let base = Iter::new(self.snapshot.clone(), start, stop);
        let mut merged: Index = base
            .filter(|(k, _)| !self.overlay.contains_key(k) && !self.range_removed(k))
            .collect();

        for (k, v) in &self.overlay {
            let in_range = start.map_or(true, |s| &**k >= s)
                && stop.map_or(true, |s| &**k < s);
            if let (true, Some(v)) = (in_range, v) {
                merged.insert(k.clone(), v.clone());
            }
        }

        Ok(Iter::new(Arc::new(merged), start, stop))
    }

    fn len(&self) -> usize {
        self.staged
    }

    fn commit(self: Box<Self>) -> Result<()> {
        if self.staged == 0 {
            return Ok(());
        }

        let ReadWriteBatch { bucket, overlay, removed_ranges, synchronized, .. } =
            *self;

        bucket.write(synchronized, move |current| {
            let mut updates = vec![];

            // range removals first, surviving point writes are newer
            for (start, end) in &removed_ranges {
                updates.extend(
                    current
                        .range(start.clone()..end.clone())
                        .map(|(k, _)| Update { key: k.clone(), value: None }),
                );
            }

            for (key, value) in overlay {
                if value.is_none() && !current.contains_key(&key) {
                    continue;
                }
                updates.push(Update { key, value });
            }

            updates
        })
    }
}
