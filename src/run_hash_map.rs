//! RunHashMap: a chained hash index over one shared linked sequence.
//!
//! Every entry lives exactly once in a [`Sequence`]. The [`BucketIndex`]
//! records, per bucket, where that bucket's run starts and how long it is.
//! Lookups walk at most `len` nodes of one run; inserts link the new node in
//! front of its run; erases move the run start forward when needed.

use crate::allocator::{AllocStrategy, Global, Grant};
use crate::bucket::BucketIndex;
use crate::error::{or_alloc_panic, Error, Result};
use crate::options::{buckets_for, check_load_factor, within_load, MapOptions, DEFAULT_BUCKETS};
use crate::reentrancy::DebugReentrancy;
use crate::sequence::{self, Handle, Sequence};
use crate::traits::{DefaultEq, KeyEq, KeyValue};
use core::alloc::Layout;
use core::borrow::Borrow;
use core::convert::Infallible;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::ops::Index;
use hashbrown::hash_map::DefaultHashBuilder;

/// Stored payload: the pair plus the key's hash, computed once at insertion
/// and reused by erase, rehash and copies.
#[derive(Clone, Debug)]
pub(crate) struct Entry<K, V> {
    key: K,
    value: V,
    hash: u64,
}

impl Handle {
    /// Key of the entry behind this handle; `None` once it was erased.
    pub fn key<'a, K, V, S, E, A>(&self, map: &'a RunHashMap<K, V, S, E, A>) -> Option<&'a K>
    where
        A: AllocStrategy,
    {
        map.seq.get(*self).map(|e| &e.key)
    }

    pub fn value<'a, K, V, S, E, A>(&self, map: &'a RunHashMap<K, V, S, E, A>) -> Option<&'a V>
    where
        A: AllocStrategy,
    {
        map.seq.get(*self).map(|e| &e.value)
    }

    pub fn value_mut<'a, K, V, S, E, A>(
        &self,
        map: &'a mut RunHashMap<K, V, S, E, A>,
    ) -> Option<&'a mut V>
    where
        A: AllocStrategy,
    {
        map.seq.get_mut(*self).map(|e| &mut e.value)
    }
}

/// Hash map whose buckets are contiguous runs of a shared sequence.
///
/// Handles returned by inserts stay valid until their entry is erased, across
/// growth and across O(1) moves of the whole map.
pub struct RunHashMap<K, V, S = DefaultHashBuilder, E = DefaultEq, A: AllocStrategy = Global> {
    seq: Sequence<Entry<K, V>, A>,
    index: BucketIndex,
    max_load_factor: f32,
    hasher: S,
    key_eq: E,
    reentrancy: DebugReentrancy,
}

impl<K, V> RunHashMap<K, V> {
    pub fn new() -> Self {
        Self::with_buckets(DEFAULT_BUCKETS)
    }

    pub fn with_buckets(n: usize) -> Self {
        or_alloc_panic(Self::with_options_in(
            MapOptions::new().buckets(n),
            DefaultHashBuilder::default(),
            DefaultEq,
            Global,
        ))
    }
}

impl<K, V, S> RunHashMap<K, V, S> {
    pub fn with_hasher(hasher: S) -> Self {
        or_alloc_panic(Self::with_options_in(
            MapOptions::default(),
            hasher,
            DefaultEq,
            Global,
        ))
    }
}

impl<K, V, S, E, A: AllocStrategy> RunHashMap<K, V, S, E, A> {
    /// Fully parameterized constructor. The initial bucket array is granted
    /// by `alloc`.
    pub fn with_options_in(options: MapOptions, hasher: S, key_eq: E, alloc: A) -> Result<Self> {
        options.validate()?;
        let index = BucketIndex::allocate(&alloc, options.buckets)?;
        Ok(Self {
            seq: Sequence::new_in(alloc),
            index,
            max_load_factor: options.max_load_factor,
            hasher,
            key_eq,
            reentrancy: DebugReentrancy::new(),
        })
    }

    pub fn new_in(alloc: A) -> Self
    where
        S: Default,
        E: Default,
    {
        or_alloc_panic(Self::with_options_in(
            MapOptions::default(),
            S::default(),
            E::default(),
            alloc,
        ))
    }

    // Zero buckets; allocates on first insert.
    fn unindexed(alloc: A, hasher: S, key_eq: E, max_load_factor: f32) -> Self {
        Self {
            seq: Sequence::new_in(alloc),
            index: BucketIndex::empty(),
            max_load_factor,
            hasher,
            key_eq,
            reentrancy: DebugReentrancy::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    pub fn bucket_count(&self) -> usize {
        self.index.len()
    }

    /// `len / bucket_count`, or `0.0` without buckets.
    pub fn load_factor(&self) -> f32 {
        if self.index.is_empty() {
            0.0
        } else {
            self.len() as f32 / self.index.len() as f32
        }
    }

    pub fn max_load_factor(&self) -> f32 {
        self.max_load_factor
    }

    /// Number of entries in bucket `i`; `0` when out of range.
    pub fn bucket_len(&self, i: usize) -> usize {
        self.index.get(i).map_or(0, |b| b.len)
    }

    /// First entry of bucket `i`'s run.
    pub fn bucket_start(&self, i: usize) -> Option<Handle> {
        self.index.get(i).and_then(|b| b.start)
    }

    pub fn allocator(&self) -> &A {
        self.seq.allocator()
    }

    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    pub fn key_eq(&self) -> &E {
        &self.key_eq
    }

    pub fn get_entry(&self, h: Handle) -> Option<(&K, &V)> {
        self.seq.get(h).map(|e| (&e.key, &e.value))
    }

    /// First entry in traversal order.
    pub fn first(&self) -> Option<Handle> {
        self.seq.first()
    }

    /// Entry after `h` in traversal order; `None` at the end or for a stale
    /// handle.
    pub fn next(&self, h: Handle) -> Option<Handle> {
        self.seq.next(h)
    }

    pub fn handles(&self) -> impl DoubleEndedIterator<Item = Handle> + '_ {
        self.seq.handles()
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.seq.iter(),
        }
    }

    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            inner: self.seq.iter_mut(),
        }
    }

    pub fn keys(&self) -> impl DoubleEndedIterator<Item = &K> + ExactSizeIterator + '_ {
        self.seq.iter().map(|(_, e)| &e.key)
    }

    pub fn values(&self) -> impl DoubleEndedIterator<Item = &V> + ExactSizeIterator + '_ {
        self.seq.iter().map(|(_, e)| &e.value)
    }

    pub fn values_mut(
        &mut self,
    ) -> impl DoubleEndedIterator<Item = &mut V> + ExactSizeIterator + '_ {
        self.seq.iter_mut().map(|(_, e)| &mut e.value)
    }

    /// Erase the entry behind `h` and return its successor in traversal
    /// order. A stale handle is ignored and yields `None`.
    pub fn erase(&mut self, h: Handle) -> Option<Handle> {
        let hash = self.seq.get(h)?.hash;
        self.unindex(h, hash);
        self.seq.erase(h)
    }

    /// Erase from `first` up to, not including, `last` (`None` = end).
    /// Returns `last`, or `None` if a stale handle ended the walk.
    pub fn erase_range(&mut self, first: Option<Handle>, last: Option<Handle>) -> Option<Handle> {
        let mut cur = first;
        while cur != last {
            let Some(h) = cur else { break };
            cur = self.erase(h);
        }
        cur
    }

    /// Unlink the entry behind `h` and return it by value.
    pub fn remove_entry(&mut self, h: Handle) -> Option<(K, V)> {
        self.unlink_entry(h).map(|e| (e.key, e.value))
    }

    fn unlink_entry(&mut self, h: Handle) -> Option<Entry<K, V>> {
        let hash = self.seq.get(h)?.hash;
        self.unindex(h, hash);
        self.seq.remove(h)
    }

    // Drop `h` from its run. The run start moves to the next member, or
    // clears when `h` was the last one.
    fn unindex(&mut self, h: Handle, hash: u64) {
        let next = self.seq.next(h);
        let b = self.index.index_of(hash);
        let bucket = self.index.bucket_mut(b);
        if bucket.start == Some(h) {
            bucket.start = if bucket.len > 1 { next } else { None };
        }
        bucket.len -= 1;
    }

    /// Destroy every entry; the bucket array is kept.
    pub fn clear(&mut self) {
        self.seq.clear();
        self.index.reset();
    }

    /// Grow to exactly `n` buckets and re-run every entry. No-op unless `n`
    /// exceeds the current bucket count. On failure the map is unchanged.
    pub fn try_rehash(&mut self, n: usize) -> Result<()> {
        let old = self.index.len();
        if n <= old {
            return Ok(());
        }
        let mut fresh = BucketIndex::allocate(self.seq.allocator(), n)?;
        let relinked = fresh.assign_runs(&mut self.seq, |e: &Entry<K, V>| e.hash);
        if old == 0 {
            log::trace!("allocated {n} buckets for {} entries", self.len());
        } else {
            log::debug!(
                "rehash {old} -> {n} buckets ({} entries, {relinked} relinked)",
                self.len()
            );
        }
        let stale = core::mem::replace(&mut self.index, fresh);
        stale.release(self.seq.allocator());
        Ok(())
    }

    pub fn rehash(&mut self, n: usize) {
        or_alloc_panic(self.try_rehash(n))
    }

    /// Make room for `n` entries without exceeding the load factor.
    pub fn try_reserve(&mut self, n: usize) -> Result<()> {
        self.try_rehash(buckets_for(n, self.max_load_factor))
    }

    pub fn reserve(&mut self, n: usize) {
        or_alloc_panic(self.try_reserve(n))
    }

    /// Set the growth threshold, growing at once if the map already exceeds
    /// it. On any error the previous threshold stays in place.
    pub fn set_max_load_factor(&mut self, f: f32) -> Result<()> {
        check_load_factor(f)?;
        let previous = self.max_load_factor;
        self.max_load_factor = f;
        if !within_load(self.len(), self.index.len(), f) {
            let target = buckets_for(self.len(), f).max(self.index.len().saturating_mul(2));
            if let Err(e) = self.try_rehash(target) {
                self.max_load_factor = previous;
                return Err(e);
            }
        }
        Ok(())
    }

    // Ensure `needed` entries fit under the threshold, at least doubling.
    fn grow_for(&mut self, needed: usize) -> Result<()> {
        let bc = self.index.len();
        if bc == 0 {
            return self.try_rehash(buckets_for(needed, self.max_load_factor).max(DEFAULT_BUCKETS));
        }
        if within_load(needed, bc, self.max_load_factor) {
            return Ok(());
        }
        let target = buckets_for(needed, self.max_load_factor).max(bc.saturating_mul(2));
        self.try_rehash(target)
    }

    // Link an entry whose node block was already granted at the front of its
    // run, or at the back of the sequence for an empty bucket.
    fn link_granted(&mut self, entry: Entry<K, V>) -> Handle {
        let b = self.index.index_of(entry.hash);
        let start = self.index.bucket(b).start;
        let h = self.seq.link_granted(start, entry);
        let bucket = self.index.bucket_mut(b);
        bucket.start = Some(h);
        bucket.len += 1;
        h
    }

    // Grant the node, grow if needed, then link. On failure the entry is
    // destroyed and every grant released.
    fn try_link(&mut self, entry: Entry<K, V>) -> Result<Handle> {
        let layout = Sequence::<Entry<K, V>, A>::node_layout();
        if let Err(e) = self.seq.allocator().allocate(layout) {
            self.seq.allocator().destroy(entry);
            return Err(e.into());
        }
        if let Err(e) = self.grow_for(self.len() + 1) {
            let alloc = self.seq.allocator();
            alloc.deallocate(layout);
            alloc.destroy(entry);
            return Err(e);
        }
        Ok(self.link_granted(entry))
    }

    /// Move assignment: `self` drops its entries and takes `other`'s.
    ///
    /// When the strategy propagates on move or both compare equal, storage
    /// moves in O(1) and every handle keeps resolving through `self`.
    /// Otherwise `self`'s strategy grants a bucket array and one node per
    /// entry up front, then entries move one by one (new handles, cached
    /// hashes reused). A refused grant leaves both maps unchanged.
    pub fn move_assign(&mut self, other: &mut Self) -> Result<()>
    where
        S: Clone,
        E: Clone,
    {
        if A::PROPAGATE_ON_MOVE_ASSIGNMENT || self.seq.allocator().is_equal(other.seq.allocator()) {
            self.adopt_config(other);
            let mine = core::mem::take(&mut self.index);
            mine.release(self.seq.allocator());
            self.seq.move_assign(&mut other.seq)?;
            self.index = core::mem::take(&mut other.index);
            return Ok(());
        }
        log::debug!(
            "map move falls back to element-wise transfer of {} entries",
            other.len()
        );
        let fresh = self.reserve_for(other)?;
        self.adopt_config(other);
        self.seq.clear();
        core::mem::replace(&mut self.index, fresh).release(self.seq.allocator());
        while let Some(entry) = other.seq.pop_front() {
            self.link_granted(entry);
        }
        other.index.reset();
        Ok(())
    }

    fn adopt_config(&mut self, other: &Self)
    where
        S: Clone,
        E: Clone,
    {
        self.hasher = other.hasher.clone();
        self.key_eq = other.key_eq.clone();
        self.max_load_factor = other.max_load_factor;
    }

    // Grant, from `self`'s strategy, a bucket array shaped like `other`'s
    // and a node for each of its entries. All or nothing.
    fn reserve_for(&self, other: &Self) -> Result<BucketIndex> {
        let alloc = self.seq.allocator();
        let fresh = BucketIndex::allocate(alloc, other.index.len())?;
        if let Err(e) = self.seq.reserve_nodes(other.len()) {
            fresh.release(alloc);
            return Err(e);
        }
        Ok(fresh)
    }

    /// Move out every entry in O(1). `self` is left empty with zero buckets,
    /// a clone of its strategy, hasher and equality; it allocates again on
    /// the next insert. Handles keep resolving through the returned map.
    pub fn take(&mut self) -> Self
    where
        S: Clone,
        E: Clone,
    {
        let empty = Self::unindexed(
            self.seq.allocator().clone(),
            self.hasher.clone(),
            self.key_eq.clone(),
            self.max_load_factor,
        );
        core::mem::replace(self, empty)
    }

    /// Exchange contents with `other`.
    ///
    /// O(1) when the strategy propagates on swap or both compare equal.
    /// Otherwise each side first grants the other's bucket array and nodes,
    /// then entries change places; a refused grant leaves both maps
    /// unchanged.
    pub fn try_swap(&mut self, other: &mut Self) -> Result<()>
    where
        S: Clone,
        E: Clone,
    {
        if A::PROPAGATE_ON_SWAP || self.seq.allocator().is_equal(other.seq.allocator()) {
            self.seq.try_swap(&mut other.seq)?;
            core::mem::swap(&mut self.index, &mut other.index);
            core::mem::swap(&mut self.hasher, &mut other.hasher);
            core::mem::swap(&mut self.key_eq, &mut other.key_eq);
            core::mem::swap(&mut self.max_load_factor, &mut other.max_load_factor);
            return Ok(());
        }
        log::debug!(
            "map swap falls back to element-wise transfer ({} <-> {})",
            self.len(),
            other.len()
        );
        let for_self = self.reserve_for(other)?;
        let for_other = match other.reserve_for(self) {
            Ok(index) => index,
            Err(e) => {
                self.seq.release_nodes(other.len());
                for_self.release(self.seq.allocator());
                return Err(e);
            }
        };
        let mine: Vec<Entry<K, V>> = core::iter::from_fn(|| self.seq.pop_front()).collect();
        core::mem::replace(&mut self.index, for_self).release(self.seq.allocator());
        core::mem::replace(&mut other.index, for_other).release(other.seq.allocator());
        core::mem::swap(&mut self.hasher, &mut other.hasher);
        core::mem::swap(&mut self.key_eq, &mut other.key_eq);
        core::mem::swap(&mut self.max_load_factor, &mut other.max_load_factor);
        while let Some(entry) = other.seq.pop_front() {
            self.link_granted(entry);
        }
        for entry in mine {
            other.link_granted(entry);
        }
        Ok(())
    }

    pub fn swap(&mut self, other: &mut Self)
    where
        S: Clone,
        E: Clone,
    {
        or_alloc_panic(self.try_swap(other))
    }

    // Copy every entry, in order and with its cached hash, into a map using
    // `alloc`. The source order already forms valid runs, so indexing the
    // copy relinks nothing.
    fn copy_in(&self, alloc: A) -> Result<Self>
    where
        K: Clone,
        V: Clone,
        S: Clone,
        E: Clone,
    {
        let mut out = Self::unindexed(
            alloc,
            self.hasher.clone(),
            self.key_eq.clone(),
            self.max_load_factor,
        );
        out.index = BucketIndex::allocate(out.seq.allocator(), self.index.len())?;
        for (_, e) in self.seq.iter() {
            out.seq.try_push_back(e.clone())?;
        }
        out.index.assign_runs(&mut out.seq, |e: &Entry<K, V>| e.hash);
        Ok(out)
    }

    /// Independent copy using the strategy's `select_on_copy()`.
    pub fn try_clone(&self) -> Result<Self>
    where
        K: Clone,
        V: Clone,
        S: Clone,
        E: Clone,
    {
        self.copy_in(self.seq.allocator().select_on_copy())
    }

    /// Copy assignment. The copy is built aside and swapped in, so on failure
    /// `self` is untouched.
    pub fn assign_from(&mut self, other: &Self) -> Result<()>
    where
        K: Clone,
        V: Clone,
        S: Clone,
        E: Clone,
    {
        let alloc = if A::PROPAGATE_ON_COPY_ASSIGNMENT {
            other.seq.allocator().clone()
        } else {
            self.seq.allocator().clone()
        };
        let mut copy = other.copy_in(alloc)?;
        core::mem::swap(self, &mut copy);
        Ok(())
    }
}

impl<K, V, S, E, A> RunHashMap<K, V, S, E, A>
where
    K: Hash,
    S: BuildHasher,
    A: AllocStrategy,
{
    fn make_hash<Q>(&self, q: &Q) -> u64
    where
        Q: ?Sized + Hash,
    {
        self.hasher.hash_one(q)
    }

    // Walk the run of `hash`'s bucket comparing cached hashes, then keys.
    fn probe<Q>(&self, hash: u64, q: &Q) -> Option<Handle>
    where
        Q: ?Sized,
        E: KeyEq<K, Q>,
    {
        if self.index.is_empty() {
            return None;
        }
        let bucket = self.index.bucket(self.index.index_of(hash));
        let mut cur = bucket.start;
        for _ in 0..bucket.len {
            let h = cur?;
            let e = self.seq.get(h)?;
            if e.hash == hash && KeyEq::<K, Q>::key_eq(&self.key_eq, &e.key, q) {
                return Some(h);
            }
            cur = self.seq.next(h);
        }
        None
    }

    pub fn find<Q>(&self, key: &Q) -> Option<Handle>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<K, Q>,
    {
        if self.is_empty() {
            return None;
        }
        let hash = self.make_hash(key);
        self.probe(hash, key)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<K, Q>,
    {
        self.find(key).is_some()
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<K, Q>,
    {
        let h = self.find(key)?;
        self.seq.get(h).map(|e| &e.value)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<K, Q>,
    {
        let h = self.find(key)?;
        self.seq.get_mut(h).map(|e| &mut e.value)
    }

    /// Bucket `key` hashes to; `None` while the map has no buckets.
    pub fn bucket_of<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
    {
        if self.index.is_empty() {
            return None;
        }
        Some(self.index.index_of(self.make_hash(key)))
    }

    /// Value for `key`, or [`Error::KeyNotFound`].
    pub fn at<Q>(&self, key: &Q) -> Result<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<K, Q>,
    {
        self.get(key).ok_or(Error::KeyNotFound)
    }

    pub fn at_mut<Q>(&mut self, key: &Q) -> Result<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<K, Q>,
    {
        self.get_mut(key).ok_or(Error::KeyNotFound)
    }

    /// Remove `key` and return its value.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<K, Q>,
    {
        let h = self.find(key)?;
        self.remove_entry(h).map(|(_, v)| v)
    }
}

impl<K, V, S, E, A> RunHashMap<K, V, S, E, A>
where
    K: Hash,
    S: BuildHasher,
    E: KeyEq<K>,
    A: AllocStrategy,
{
    /// Insert the pair built by `f` unless its key is already present.
    ///
    /// A scratch block for the candidate is granted before `f` runs and
    /// released once the key has been probed. Returns the handle of the new
    /// entry with `true`, or of the existing one with `false` (the candidate
    /// is destroyed). Any failure leaves the map unchanged.
    pub fn try_emplace_with<F, Er>(&mut self, f: F) -> Result<(Handle, bool)>
    where
        F: FnOnce() -> core::result::Result<(K, V), Er>,
        Er: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let scratch = Grant::new(self.seq.allocator(), Layout::new::<(K, V)>())?;
        let (key, value) = match self.seq.allocator().construct(f) {
            Ok(kv) => kv,
            Err(e) => return Err(Error::ConstructionFailure(e.into())),
        };
        let (hash, existing) = {
            let _g = self.reentrancy.enter("emplace");
            let hash = self.make_hash(&key);
            (hash, self.probe(hash, &key))
        };
        drop(scratch);
        if let Some(h) = existing {
            self.seq.allocator().destroy((key, value));
            return Ok((h, false));
        }
        let h = self.try_link(Entry { key, value, hash })?;
        Ok((h, true))
    }

    pub fn try_emplace(&mut self, key: K, value: V) -> Result<(Handle, bool)> {
        self.try_emplace_with(|| Ok::<_, Infallible>((key, value)))
    }

    /// Insert `(key, value)` unless `key` is present; see
    /// [`try_emplace_with`](Self::try_emplace_with). Panics if the strategy
    /// refuses a grant.
    pub fn emplace(&mut self, key: K, value: V) -> (Handle, bool) {
        or_alloc_panic(self.try_emplace(key, value))
    }

    pub fn try_insert<P: KeyValue<K, V>>(&mut self, pair: P) -> Result<(Handle, bool)> {
        self.try_emplace_with(|| Ok::<_, Infallible>(pair.into_key_value()))
    }

    pub fn insert<P: KeyValue<K, V>>(&mut self, pair: P) -> (Handle, bool) {
        or_alloc_panic(self.try_insert(pair))
    }

    /// Insert every pair; duplicates are skipped. Returns how many entries
    /// were added before the first failure.
    pub fn try_insert_iter<I, P>(&mut self, iter: I) -> Result<usize>
    where
        I: IntoIterator<Item = P>,
        P: KeyValue<K, V>,
    {
        let mut added = 0;
        for pair in iter {
            if self.try_insert(pair)?.1 {
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn insert_iter<I, P>(&mut self, iter: I)
    where
        I: IntoIterator<Item = P>,
        P: KeyValue<K, V>,
    {
        or_alloc_panic(self.try_insert_iter(iter));
    }

    /// Value for `key`, inserting `V::default()` first if it is missing.
    pub fn try_get_or_default(&mut self, key: K) -> Result<&mut V>
    where
        V: Default,
    {
        let h = match self.find(&key) {
            Some(h) => h,
            None => self.try_emplace(key, V::default())?.0,
        };
        Ok(self
            .seq
            .get_mut(h)
            .map(|e| &mut e.value)
            .expect("handle returned by lookup or insert is live"))
    }

    pub fn get_or_default(&mut self, key: K) -> &mut V
    where
        V: Default,
    {
        or_alloc_panic(self.try_get_or_default(key))
    }

    /// Check every structural invariant: link consistency, run contiguity
    /// and bucket counts, cached hashes, uniqueness within runs and the load
    /// factor bound.
    pub fn validate(&self) -> Result<()> {
        self.seq.check_links()?;
        self.index.check_runs(&self.seq, |e: &Entry<K, V>| e.hash)?;
        for (h, e) in self.seq.iter() {
            if self.make_hash(&e.key) != e.hash {
                return Err(Error::InvariantViolation(format!(
                    "entry {h:?} caches a stale hash"
                )));
            }
            if self.probe(e.hash, &e.key) != Some(h) {
                return Err(Error::InvariantViolation(format!(
                    "entry {h:?} is shadowed by an equal key earlier in its run"
                )));
            }
        }
        let bc = self.index.len();
        if bc > 0 && !within_load(self.len(), bc, self.max_load_factor) {
            return Err(Error::InvariantViolation(format!(
                "{} entries over {bc} buckets exceed max load factor {}",
                self.len(),
                self.max_load_factor
            )));
        }
        Ok(())
    }
}

impl<K, V, S, E, A: AllocStrategy> Drop for RunHashMap<K, V, S, E, A> {
    fn drop(&mut self) {
        let index = core::mem::take(&mut self.index);
        index.release(self.seq.allocator());
    }
}

impl<K, V, S, E, A> Default for RunHashMap<K, V, S, E, A>
where
    S: Default,
    E: Default,
    A: AllocStrategy + Default,
{
    fn default() -> Self {
        Self::new_in(A::default())
    }
}

impl<K, V, S, E, A> Clone for RunHashMap<K, V, S, E, A>
where
    K: Clone,
    V: Clone,
    S: Clone,
    E: Clone,
    A: AllocStrategy,
{
    fn clone(&self) -> Self {
        or_alloc_panic(self.try_clone())
    }
}

impl<K, V, S, E, A> fmt::Debug for RunHashMap<K, V, S, E, A>
where
    K: fmt::Debug,
    V: fmt::Debug,
    A: AllocStrategy,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.seq.iter().map(|(_, e)| (&e.key, &e.value)))
            .finish()
    }
}

impl<K, V, S, E, A, Q> Index<&Q> for RunHashMap<K, V, S, E, A>
where
    K: Hash + Borrow<Q>,
    Q: ?Sized + Hash,
    S: BuildHasher,
    E: KeyEq<K, Q>,
    A: AllocStrategy,
{
    type Output = V;

    fn index(&self, key: &Q) -> &V {
        self.get(key).expect("key not found in RunHashMap")
    }
}

impl<K, V, S, E, A, P> Extend<P> for RunHashMap<K, V, S, E, A>
where
    K: Hash,
    S: BuildHasher,
    E: KeyEq<K>,
    A: AllocStrategy,
    P: KeyValue<K, V>,
{
    fn extend<I: IntoIterator<Item = P>>(&mut self, iter: I) {
        self.insert_iter(iter);
    }
}

impl<K, V, S, E, A, P> FromIterator<P> for RunHashMap<K, V, S, E, A>
where
    K: Hash,
    S: BuildHasher + Default,
    E: KeyEq<K> + Default,
    A: AllocStrategy + Default,
    P: KeyValue<K, V>,
{
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        let mut m = Self::default();
        m.insert_iter(iter);
        m
    }
}

/// Iterator over `(Handle, &K, &V)` in traversal order.
pub struct Iter<'a, K, V> {
    inner: sequence::Iter<'a, Entry<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (Handle, &'a K, &'a V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(h, e)| (h, &e.key, &e.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a, K, V> DoubleEndedIterator for Iter<'a, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(h, e)| (h, &e.key, &e.value))
    }
}

impl<'a, K, V> ExactSizeIterator for Iter<'a, K, V> {}

/// Iterator over `(Handle, &K, &mut V)` in traversal order.
pub struct IterMut<'a, K, V> {
    inner: sequence::IterMut<'a, Entry<K, V>>,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (Handle, &'a K, &'a mut V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(h, e)| (h, &e.key, &mut e.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a, K, V> DoubleEndedIterator for IterMut<'a, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(h, e)| (h, &e.key, &mut e.value))
    }
}

impl<'a, K, V> ExactSizeIterator for IterMut<'a, K, V> {}

/// Owning iterator over `(K, V)` in traversal order.
pub struct IntoIter<K, V, A: AllocStrategy> {
    inner: sequence::IntoIter<Entry<K, V>, A>,
}

impl<K, V, A: AllocStrategy> Iterator for IntoIter<K, V, A> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        self.inner.next().map(|e| (e.key, e.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V, A: AllocStrategy> DoubleEndedIterator for IntoIter<K, V, A> {
    fn next_back(&mut self) -> Option<(K, V)> {
        self.inner.next_back().map(|e| (e.key, e.value))
    }
}

impl<K, V, S, E, A: AllocStrategy> IntoIterator for RunHashMap<K, V, S, E, A> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V, A>;

    fn into_iter(mut self) -> Self::IntoIter {
        let empty = Sequence::new_in(self.seq.allocator().clone());
        let seq = core::mem::replace(&mut self.seq, empty);
        IntoIter {
            inner: seq.into_iter(),
        }
    }
}

impl<'a, K, V, S, E, A: AllocStrategy> IntoIterator for &'a RunHashMap<K, V, S, E, A> {
    type Item = (Handle, &'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, K, V, S, E, A: AllocStrategy> IntoIterator for &'a mut RunHashMap<K, V, S, E, A> {
    type Item = (Handle, &'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}
