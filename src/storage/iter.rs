use std::ops::Bound;
use std::sync::Arc;

use inline_array::InlineArray;

use super::Index;

type Entry = (InlineArray, InlineArray);

/// A bidirectional, seekable cursor over a point-in-time view of a
/// bucket. Later writes to the bucket are never observed.
///
/// The cursor starts out unpositioned. `Iterator::next` positions it on
/// the first entry and then walks forward.
pub struct Iter {
    snapshot: Arc<Index>,
    lo: Bound<InlineArray>,
    hi: Bound<InlineArray>,
    current: Option<Entry>,
    started: bool,
}

impl std::fmt::Debug for Iter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Iter")
            .field("lo", &self.lo)
            .field("hi", &self.hi)
            .field("current", &self.current.as_ref().map(|(k, _)| k))
            .finish()
    }
}

fn is_empty_range(lo: &Bound<InlineArray>, hi: &Bound<InlineArray>) -> bool {
    use Bound::*;

    match (lo, hi) {
        (Included(l), Included(h)) => l > h,
        (Included(l), Excluded(h))
        | (Excluded(l), Included(h))
        | (Excluded(l), Excluded(h)) => l >= h,
        _ => false,
    }
}

fn tighter_lower(
    a: &Bound<InlineArray>,
    b: Bound<InlineArray>,
) -> Bound<InlineArray> {
    use Bound::*;

    match (a, &b) {
        (Unbounded, _) => b,
        (_, Unbounded) => a.clone(),
        (Included(x), Included(y)) | (Excluded(x), Excluded(y)) => {
            if x >= y { a.clone() } else { b }
        }
        (Included(x), Excluded(y)) => {
            if x > y { a.clone() } else { b }
        }
        (Excluded(x), Included(y)) => {
            if x >= y { a.clone() } else { b }
        }
    }
}

fn tighter_upper(
    a: &Bound<InlineArray>,
    b: Bound<InlineArray>,
) -> Bound<InlineArray> {
    use Bound::*;

    match (a, &b) {
        (Unbounded, _) => b,
        (_, Unbounded) => a.clone(),
        (Included(x), Included(y)) | (Excluded(x), Excluded(y)) => {
            if x <= y { a.clone() } else { b }
        }
        (Included(x), Excluded(y)) => {
            if x < y { a.clone() } else { b }
        }
        (Excluded(x), Included(y)) => {
            if x <= y { a.clone() } else { b }
        }
    }
}

impl Iter {
    pub(crate) fn new(
        snapshot: Arc<Index>,
        start: Option<&[u8]>,
        stop: Option<&[u8]>,
    ) -> Iter {
        let lo = start
            .map(|s| Bound::Included(InlineArray::from(s)))
            .unwrap_or(Bound::Unbounded);
        let hi = stop
            .map(|s| Bound::Excluded(InlineArray::from(s)))
            .unwrap_or(Bound::Unbounded);

        Iter { snapshot, lo, hi, current: None, started: false }
    }

    fn first_in(
        &self,
        lo: Bound<InlineArray>,
        hi: Bound<InlineArray>,
    ) -> Option<Entry> {
        if is_empty_range(&lo, &hi) {
            return None;
        }
        self.snapshot.range((lo, hi)).next().map(|(k, v)| (k.clone(), v.clone()))
    }

    fn last_in(
        &self,
        lo: Bound<InlineArray>,
        hi: Bound<InlineArray>,
    ) -> Option<Entry> {
        if is_empty_range(&lo, &hi) {
            return None;
        }
        self.snapshot
            .range((lo, hi))
            .next_back()
            .map(|(k, v)| (k.clone(), v.clone()))
    }

    /// Positions on the smallest key in range.
    pub fn seek_first(&mut self) -> bool {
        self.started = true;
        self.current = self.first_in(self.lo.clone(), self.hi.clone());
        self.valid()
    }

    /// Positions on the largest key in range.
    pub fn seek_last(&mut self) -> bool {
        self.started = true;
        self.current = self.last_in(self.lo.clone(), self.hi.clone());
        self.valid()
    }

    /// Positions on the smallest key in range that is `>= key`.
    pub fn seek_ge(&mut self, key: &[u8]) -> bool {
        self.started = true;
        let lo = tighter_lower(&self.lo, Bound::Included(key.into()));
        self.current = self.first_in(lo, self.hi.clone());
        self.valid()
    }

    /// Positions on the largest key in range that is `< key`.
    pub fn seek_lt(&mut self, key: &[u8]) -> bool {
        self.started = true;
        let hi = tighter_upper(&self.hi, Bound::Excluded(key.into()));
        self.current = self.last_in(self.lo.clone(), hi);
        self.valid()
    }

    /// Steps forward. An unpositioned cursor moves to `seek_first`, an
    /// exhausted one stays exhausted.
    pub fn move_next(&mut self) -> bool {
        if !self.started {
            return self.seek_first();
        }
        if let Some((key, _)) = self.current.take() {
            let lo = Bound::Excluded(key);
            self.current = self.first_in(lo, self.hi.clone());
        }
        self.valid()
    }

    /// Steps backward. An unpositioned cursor moves to `seek_last`, an
    /// exhausted one stays exhausted.
    pub fn move_prev(&mut self) -> bool {
        if !self.started {
            return self.seek_last();
        }
        if let Some((key, _)) = self.current.take() {
            let hi = Bound::Excluded(key);
            self.current = self.last_in(self.lo.clone(), hi);
        }
        self.valid()
    }

    /// Whether the cursor sits on an entry.
    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    /// The key under the cursor.
    pub fn key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(k, _)| &**k)
    }

    /// The value under the cursor.
    pub fn value(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(_, v)| &**v)
    }
}

impl Iterator for Iter {
    type Item = (InlineArray, InlineArray);

    fn next(&mut self) -> Option<Self::Item> {
        self.move_next();
        self.current.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(keys: &[&[u8]]) -> Arc<Index> {
        Arc::new(
            keys.iter()
                .map(|k| (InlineArray::from(*k), InlineArray::from(*k)))
                .collect(),
        )
    }

    #[test]
    fn walks_both_directions_within_bounds() {
        let snap = snapshot(&[b"a", b"b", b"c", b"d"]);
        let mut iter = Iter::new(snap, Some(&b"b"[..]), Some(&b"d"[..]));

        assert!(iter.seek_first());
        assert_eq!(iter.key(), Some(&b"b"[..]));
        assert!(iter.move_next());
        assert_eq!(iter.key(), Some(&b"c"[..]));
        assert!(!iter.move_next());
        assert!(!iter.move_prev());

        assert!(iter.seek_last());
        assert_eq!(iter.key(), Some(&b"c"[..]));
        assert!(iter.move_prev());
        assert_eq!(iter.key(), Some(&b"b"[..]));
        assert!(!iter.move_prev());
    }

    #[test]
    fn seeks_respect_bounds() {
        let snap = snapshot(&[b"a", b"b", b"c", b"d"]);
        let mut iter = Iter::new(snap, Some(&b"b"[..]), Some(&b"d"[..]));

        assert!(iter.seek_ge(b"a"));
        assert_eq!(iter.key(), Some(&b"b"[..]));
        assert!(iter.seek_ge(b"bb"));
        assert_eq!(iter.key(), Some(&b"c"[..]));
        assert!(!iter.seek_ge(b"d"));

        assert!(iter.seek_lt(b"z"));
        assert_eq!(iter.key(), Some(&b"c"[..]));
        assert!(!iter.seek_lt(b"b"));
    }

    #[test]
    fn inverted_bounds_are_empty() {
        let snap = snapshot(&[b"a", b"b"]);
        let mut iter = Iter::new(snap, Some(&b"b"[..]), Some(&b"a"[..]));
        assert!(!iter.seek_first());
        assert!(!iter.seek_last());
        assert_eq!(iter.count(), 0);
    }

    #[test]
    fn iterator_yields_ascending_pairs() {
        let snap = snapshot(&[b"c", b"a", b"b"]);
        let keys: Vec<_> =
            Iter::new(snap, None, None).map(|(k, _)| k.to_vec()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn unpositioned_cursor_walks_backward_from_the_end() {
        let snap = snapshot(&[b"a", b"b", b"c"]);
        let mut iter = Iter::new(snap, None, None);

        assert!(iter.move_prev());
        assert_eq!(iter.key(), Some(&b"c"[..]));
        assert!(iter.move_prev());
        assert_eq!(iter.key(), Some(&b"b"[..]));

        // repositioning keeps the cursor usable as an iterator
        assert!(iter.seek_last());
        assert_eq!(iter.value(), Some(&b"c"[..]));
        assert_eq!(iter.next(), None);
    }
}
