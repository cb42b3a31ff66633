//! BucketIndex: `{start, len}` descriptors over runs of a `Sequence`.
//!
//! The index never owns entries. Bucket `i` names the first node of its
//! run and how many consecutive nodes belong to it; every node whose cached
//! hash maps to `i` is inside that run and no other node is.

use crate::allocator::{AllocStrategy, Grant};
use crate::error::{Error, Result};
use crate::sequence::{Handle, Sequence};
use core::alloc::Layout;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct Bucket {
    pub(crate) start: Option<Handle>,
    pub(crate) len: usize,
}

#[derive(Debug, Default)]
pub(crate) struct BucketIndex {
    buckets: Vec<Bucket>,
}

impl BucketIndex {
    /// Zero buckets; the owner allocates lazily.
    pub(crate) fn empty() -> Self {
        Self {
            buckets: Vec::new(),
        }
    }

    fn layout_for(n: usize) -> Result<Layout> {
        Layout::array::<Bucket>(n).map_err(|_| Error::AllocationFailure {
            size: usize::MAX,
            align: core::mem::align_of::<Bucket>(),
        })
    }

    /// `n` empty buckets, granted by `alloc`. Must be handed back through
    /// `release` with the same strategy.
    pub(crate) fn allocate<A: AllocStrategy>(alloc: &A, n: usize) -> Result<Self> {
        if n == 0 {
            return Ok(Self::empty());
        }
        let grant = Grant::new(alloc, Self::layout_for(n)?)?;
        let buckets = vec![Bucket::default(); n];
        grant.keep();
        Ok(Self { buckets })
    }

    pub(crate) fn release<A: AllocStrategy>(self, alloc: &A) {
        let n = self.buckets.len();
        if n > 0 {
            if let Ok(layout) = Self::layout_for(n) {
                alloc.deallocate(layout);
            }
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Bucket for a cached hash. The index must not be empty.
    #[inline]
    pub(crate) fn index_of(&self, hash: u64) -> usize {
        debug_assert!(!self.buckets.is_empty());
        (hash % self.buckets.len() as u64) as usize
    }

    #[inline]
    pub(crate) fn get(&self, i: usize) -> Option<Bucket> {
        self.buckets.get(i).copied()
    }

    #[inline]
    pub(crate) fn bucket(&self, i: usize) -> Bucket {
        self.buckets[i]
    }

    #[inline]
    pub(crate) fn bucket_mut(&mut self, i: usize) -> &mut Bucket {
        &mut self.buckets[i]
    }

    pub(crate) fn reset(&mut self) {
        self.buckets.fill(Bucket::default());
    }

    /// Index every node of `seq` in one forward pass. `self` must be fresh.
    ///
    /// The visited prefix is always a sequence of complete runs, so the
    /// node right before the current one ends some run. If that run is the
    /// current node's bucket, the node simply extends it; otherwise the node
    /// is relinked in front of its bucket's start and becomes the new start.
    /// Either way no run is split, whatever the hash function. Returns the
    /// number of relinked nodes.
    pub(crate) fn assign_runs<T, A, F>(&mut self, seq: &mut Sequence<T, A>, hash_of: F) -> usize
    where
        A: AllocStrategy,
        F: Fn(&T) -> u64,
    {
        if self.buckets.is_empty() {
            return 0;
        }
        let mut relinked = 0;
        let mut cur = seq.first();
        while let Some(h) = cur {
            cur = seq.next(h);
            let Some(v) = seq.get(h) else { break };
            let b = self.index_of(hash_of(v));
            match self.buckets[b].start {
                None => self.buckets[b].start = Some(h),
                Some(start) => {
                    let extends = seq
                        .prev(h)
                        .and_then(|p| seq.get(p))
                        .map_or(false, |p| self.index_of(hash_of(p)) == b);
                    if !extends {
                        seq.move_before(h, start);
                        self.buckets[b].start = Some(h);
                        relinked += 1;
                    }
                }
            }
            self.buckets[b].len += 1;
        }
        relinked
    }

    /// Check the run invariant against `seq`.
    pub(crate) fn check_runs<T, A, F>(&self, seq: &Sequence<T, A>, hash_of: F) -> Result<()>
    where
        A: AllocStrategy,
        F: Fn(&T) -> u64,
    {
        if self.buckets.is_empty() {
            if seq.is_empty() {
                return Ok(());
            }
            return Err(Error::InvariantViolation(format!(
                "{} entries but no buckets",
                seq.len()
            )));
        }
        let mut expected = vec![0usize; self.buckets.len()];
        for (_, v) in seq.iter() {
            expected[self.index_of(hash_of(v))] += 1;
        }
        for (i, b) in self.buckets.iter().enumerate() {
            if b.len != expected[i] {
                return Err(Error::InvariantViolation(format!(
                    "bucket {i} records {} entries but {} hash to it",
                    b.len, expected[i]
                )));
            }
            let mut cur = match (b.start, b.len) {
                (None, 0) => continue,
                (Some(_), 0) => {
                    return Err(Error::InvariantViolation(format!(
                        "empty bucket {i} names a start node"
                    )))
                }
                (None, _) => {
                    return Err(Error::InvariantViolation(format!(
                        "bucket {i} has entries but no start node"
                    )))
                }
                (Some(start), _) => Some(start),
            };
            for step in 0..b.len {
                let Some(h) = cur else {
                    return Err(Error::InvariantViolation(format!(
                        "run of bucket {i} ends after {step} of {} nodes",
                        b.len
                    )));
                };
                let Some(v) = seq.get(h) else {
                    return Err(Error::InvariantViolation(format!(
                        "bucket {i} links a missing node"
                    )));
                };
                let got = self.index_of(hash_of(v));
                if got != i {
                    return Err(Error::InvariantViolation(format!(
                        "run of bucket {i} contains a node of bucket {got} at offset {step}"
                    )));
                }
                cur = seq.next(h);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{CountingAlloc, Global};

    fn runs(seq: &Sequence<u64>, idx: &BucketIndex) -> Vec<Vec<u64>> {
        (0..idx.len())
            .map(|i| {
                let b = idx.bucket(i);
                let mut out = Vec::new();
                let mut cur = b.start;
                for _ in 0..b.len {
                    let h = cur.unwrap();
                    out.push(*seq.get(h).unwrap());
                    cur = seq.next(h);
                }
                out
            })
            .collect()
    }

    #[test]
    fn allocate_and_release_balance_the_books() {
        let a = CountingAlloc::new();
        let idx = BucketIndex::allocate(&a, 8).unwrap();
        assert_eq!(idx.len(), 8);
        assert_eq!(a.stats().live_blocks, 1);
        assert_eq!(
            a.stats().live_bytes,
            8 * core::mem::size_of::<Bucket>()
        );
        idx.release(&a);
        assert_eq!(a.stats().live_blocks, 0);

        let none = BucketIndex::allocate(&a, 0).unwrap();
        assert!(none.is_empty());
        assert_eq!(a.stats().total_allocations, 1);
    }

    #[test]
    fn refused_bucket_array_is_reported() {
        let a = CountingAlloc::with_limit(4);
        assert!(matches!(
            BucketIndex::allocate(&a, 16),
            Err(Error::AllocationFailure { .. })
        ));
    }

    /// Identity hashes that interleave once the modulus grows: with 4
    /// buckets the keys 1, 5, 9, 13 share a run, with 8 buckets {1, 9} and
    /// {5, 13} must be pulled apart.
    #[test]
    fn assign_runs_splits_interleaved_runs() {
        let mut seq: Sequence<u64> = [13, 9, 5, 1, 2, 6].into_iter().collect();
        let mut small = BucketIndex::allocate(&Global, 4).unwrap();
        assert_eq!(small.assign_runs(&mut seq, |v| *v), 0);
        small.check_runs(&seq, |v| *v).unwrap();

        let mut big = BucketIndex::allocate(&Global, 8).unwrap();
        let moved = big.assign_runs(&mut seq, |v| *v);
        assert!(moved > 0);
        big.check_runs(&seq, |v| *v).unwrap();
        seq.check_links().unwrap();
        let r = runs(&seq, &big);
        let mut one = r[1].clone();
        one.sort();
        assert_eq!(one, vec![1, 9]);
        let mut five = r[5].clone();
        five.sort();
        assert_eq!(five, vec![5, 13]);
        assert_eq!(r[2], vec![2]);
        assert_eq!(r[6], vec![6]);
    }

    #[test]
    fn check_runs_detects_wrong_counts_and_foreign_nodes() {
        let mut seq: Sequence<u64> = [0, 1, 2, 3].into_iter().collect();
        let mut idx = BucketIndex::allocate(&Global, 2).unwrap();
        idx.assign_runs(&mut seq, |v| *v);
        idx.check_runs(&seq, |v| *v).unwrap();

        idx.bucket_mut(0).len += 1;
        assert!(matches!(
            idx.check_runs(&seq, |v| *v),
            Err(Error::InvariantViolation(_))
        ));
        idx.bucket_mut(0).len -= 1;

        // Point bucket 1 at a node of bucket 0.
        let zero = idx.bucket(0).start;
        idx.bucket_mut(1).start = zero;
        assert!(idx.check_runs(&seq, |v| *v).is_err());
    }

    #[test]
    fn empty_index_accepts_only_empty_sequence() {
        let idx = BucketIndex::empty();
        let empty: Sequence<u64> = Sequence::new();
        idx.check_runs(&empty, |v| *v).unwrap();
        let one: Sequence<u64> = [7].into_iter().collect();
        assert!(idx.check_runs(&one, |v| *v).is_err());
    }

    #[test]
    fn reset_clears_descriptors() {
        let mut seq: Sequence<u64> = [0, 1].into_iter().collect();
        let mut idx = BucketIndex::allocate(&Global, 2).unwrap();
        idx.assign_runs(&mut seq, |v| *v);
        idx.reset();
        assert_eq!(idx.bucket(0), Bucket::default());
        assert_eq!(idx.get(1).map(|b| b.len), Some(0));
        assert_eq!(idx.get(2), None);
    }
}
