//! Sequence: allocator-aware doubly-linked list over a generational arena.
//!
//! Nodes live in a `SlotMap`; links are arena keys, so inserting or erasing
//! a node never moves any other node and never invalidates another
//! `Handle`. A handle stops resolving once its node is erased, even if the
//! slot is reused later.

use crate::allocator::{AllocStrategy, Global, Grant};
use crate::error::{or_alloc_panic, Error, Result};
use core::alloc::Layout;
use core::fmt;
use slotmap::{DefaultKey, SecondaryMap, SlotMap};

/// Stable reference to a node of a [`Sequence`] (and so to an entry of a
/// map built on one).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Handle(DefaultKey);

#[derive(Debug)]
struct Node<T> {
    value: T,
    prev: Option<DefaultKey>,
    next: Option<DefaultKey>,
}

pub struct Sequence<T, A: AllocStrategy = Global> {
    nodes: SlotMap<DefaultKey, Node<T>>,
    head: Option<DefaultKey>,
    tail: Option<DefaultKey>,
    alloc: A,
}

impl<T> Sequence<T> {
    pub fn new() -> Self {
        Self::new_in(Global)
    }
}

impl<T> Default for Sequence<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, A: AllocStrategy> Sequence<T, A> {
    pub fn new_in(alloc: A) -> Self {
        Self {
            nodes: SlotMap::with_key(),
            head: None,
            tail: None,
            alloc,
        }
    }

    /// `n` copies of `value`. Partially built sequences are released on
    /// failure.
    pub fn from_elem_in(n: usize, value: T, alloc: A) -> Result<Self>
    where
        T: Clone,
    {
        let mut s = Self::new_in(alloc);
        for _ in 0..n {
            s.try_push_back(value.clone())?;
        }
        Ok(s)
    }

    /// `n` default values.
    pub fn with_len_in(n: usize, alloc: A) -> Result<Self>
    where
        T: Default,
    {
        let mut s = Self::new_in(alloc);
        for _ in 0..n {
            s.try_insert_before_with(None, || Ok::<T, Error>(T::default()))?;
        }
        Ok(s)
    }

    #[inline]
    pub(crate) fn node_layout() -> Layout {
        Layout::new::<Node<T>>()
    }

    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn first(&self) -> Option<Handle> {
        self.head.map(Handle)
    }

    pub fn last(&self) -> Option<Handle> {
        self.tail.map(Handle)
    }

    /// Successor of `h`; `None` at the end or for a stale handle.
    pub fn next(&self, h: Handle) -> Option<Handle> {
        self.nodes.get(h.0).and_then(|n| n.next).map(Handle)
    }

    /// Predecessor of `h`; `None` at the front or for a stale handle.
    pub fn prev(&self, h: Handle) -> Option<Handle> {
        self.nodes.get(h.0).and_then(|n| n.prev).map(Handle)
    }

    pub fn contains(&self, h: Handle) -> bool {
        self.nodes.contains_key(h.0)
    }

    pub fn get(&self, h: Handle) -> Option<&T> {
        self.nodes.get(h.0).map(|n| &n.value)
    }

    pub fn get_mut(&mut self, h: Handle) -> Option<&mut T> {
        self.nodes.get_mut(h.0).map(|n| &mut n.value)
    }

    // Splice an unlinked node in front of `pos` (`None` appends).
    fn link_before(&mut self, k: DefaultKey, pos: Option<DefaultKey>) {
        let prev = match pos {
            Some(p) => self.nodes[p].prev,
            None => self.tail,
        };
        {
            let n = &mut self.nodes[k];
            n.prev = prev;
            n.next = pos;
        }
        match prev {
            Some(p) => self.nodes[p].next = Some(k),
            None => self.head = Some(k),
        }
        match pos {
            Some(p) => self.nodes[p].prev = Some(k),
            None => self.tail = Some(k),
        }
    }

    fn unlink(&mut self, k: DefaultKey) {
        let (prev, next) = {
            let n = &self.nodes[k];
            (n.prev, n.next)
        };
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
    }

    // Store a payload whose node block was already granted.
    fn insert_granted(&mut self, pos: Option<DefaultKey>, value: T) -> Handle {
        let k = self.nodes.insert(Node {
            value,
            prev: None,
            next: None,
        });
        self.link_before(k, pos);
        Handle(k)
    }

    /// Insert a node built by `f` before `pos` (`None` appends).
    ///
    /// The node block is granted first; if `f` fails the grant is released
    /// and the sequence is unchanged.
    ///
    /// Panics if `pos` is a stale handle.
    pub fn try_insert_before_with<E, F>(&mut self, pos: Option<Handle>, f: F) -> Result<Handle>
    where
        F: FnOnce() -> core::result::Result<T, E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if let Some(p) = pos {
            assert!(self.contains(p), "insert position is a stale handle");
        }
        let grant = Grant::new(&self.alloc, Self::node_layout())?;
        let value = match self.alloc.construct(f) {
            Ok(v) => v,
            Err(e) => return Err(Error::ConstructionFailure(e.into())),
        };
        grant.keep();
        Ok(self.insert_granted(pos.map(|p| p.0), value))
    }

    pub fn try_insert_before(&mut self, pos: Handle, value: T) -> Result<Handle> {
        self.try_insert_before_with(Some(pos), || Ok::<T, Error>(value))
    }

    pub fn insert_before(&mut self, pos: Handle, value: T) -> Handle {
        or_alloc_panic(self.try_insert_before(pos, value))
    }

    pub fn try_push_back(&mut self, value: T) -> Result<Handle> {
        self.try_insert_before_with(None, || Ok::<T, Error>(value))
    }

    pub fn push_back(&mut self, value: T) -> Handle {
        or_alloc_panic(self.try_push_back(value))
    }

    pub fn try_push_front(&mut self, value: T) -> Result<Handle> {
        let pos = self.first();
        self.try_insert_before_with(pos, || Ok::<T, Error>(value))
    }

    pub fn push_front(&mut self, value: T) -> Handle {
        or_alloc_panic(self.try_push_front(value))
    }

    /// Unlink `h` and hand its payload back. `None` for a stale handle.
    pub fn remove(&mut self, h: Handle) -> Option<T> {
        if !self.nodes.contains_key(h.0) {
            return None;
        }
        self.unlink(h.0);
        let node = self.nodes.remove(h.0)?;
        self.alloc.deallocate(Self::node_layout());
        Some(node.value)
    }

    /// Unlink and destroy `h`; returns its former successor.
    ///
    /// A stale handle is ignored and yields `None`.
    pub fn erase(&mut self, h: Handle) -> Option<Handle> {
        let next = self.nodes.get(h.0)?.next;
        self.unlink(h.0);
        if let Some(node) = self.nodes.remove(h.0) {
            self.alloc.destroy(node.value);
            self.alloc.deallocate(Self::node_layout());
        }
        next.map(Handle)
    }

    pub fn pop_front(&mut self) -> Option<T> {
        let h = self.first()?;
        self.remove(h)
    }

    pub fn pop_back(&mut self) -> Option<T> {
        let h = self.last()?;
        self.remove(h)
    }

    /// Destroy every node. O(len).
    pub fn clear(&mut self) {
        let layout = Self::node_layout();
        for (_, node) in self.nodes.drain() {
            self.alloc.destroy(node.value);
            self.alloc.deallocate(layout);
        }
        self.head = None;
        self.tail = None;
    }

    /// Relink `h` right before `anchor` without touching its payload.
    pub(crate) fn move_before(&mut self, h: Handle, anchor: Handle) {
        debug_assert_ne!(h, anchor);
        self.unlink(h.0);
        self.link_before(h.0, Some(anchor.0));
    }

    /// Link a payload whose node block the caller already obtained from
    /// this sequence's strategy. `None` appends.
    pub(crate) fn link_granted(&mut self, pos: Option<Handle>, value: T) -> Handle {
        self.insert_granted(pos.map(|p| p.0), value)
    }

    /// Walk both directions and compare against the arena size.
    pub(crate) fn check_links(&self) -> Result<()> {
        let mut count = 0usize;
        let mut prev: Option<DefaultKey> = None;
        let mut cur = self.head;
        while let Some(k) = cur {
            let Some(n) = self.nodes.get(k) else {
                return Err(Error::InvariantViolation(format!(
                    "link to missing node {k:?}"
                )));
            };
            if n.prev != prev {
                return Err(Error::InvariantViolation(format!(
                    "node {k:?} has a back link that disagrees with traversal"
                )));
            }
            count += 1;
            if count > self.nodes.len() {
                return Err(Error::InvariantViolation("cycle in forward links".into()));
            }
            prev = Some(k);
            cur = n.next;
        }
        if prev != self.tail {
            return Err(Error::InvariantViolation("tail does not end the forward walk".into()));
        }
        if count != self.nodes.len() {
            return Err(Error::InvariantViolation(format!(
                "{} nodes reachable but {} stored",
                count,
                self.nodes.len()
            )));
        }
        Ok(())
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            nodes: &self.nodes,
            front: self.head,
            back: self.tail,
            remaining: self.nodes.len(),
        }
    }

    pub fn iter_mut(&mut self) -> IterMut<'_, T> {
        let mut nodes = SecondaryMap::with_capacity(self.nodes.len());
        for (k, n) in self.nodes.iter_mut() {
            nodes.insert(k, n);
        }
        IterMut {
            remaining: nodes.len(),
            nodes,
            front: self.head,
            back: self.tail,
        }
    }

    /// Handles in sequence order.
    pub fn handles(&self) -> impl DoubleEndedIterator<Item = Handle> + '_ {
        self.iter().map(|(h, _)| h)
    }

    /// Copy every payload, in order, into a sequence using the source
    /// strategy's `select_on_copy()`.
    pub fn try_clone(&self) -> Result<Self>
    where
        T: Clone,
    {
        let mut out = Self::new_in(self.alloc.select_on_copy());
        for (_, v) in self.iter() {
            out.try_push_back(v.clone())?;
        }
        Ok(out)
    }

    /// Copy assignment: `self` becomes an independent copy of `other`.
    ///
    /// Built aside and swapped in, so on failure `self` is untouched.
    pub fn assign_from(&mut self, other: &Self) -> Result<()>
    where
        T: Clone,
    {
        let alloc = if A::PROPAGATE_ON_COPY_ASSIGNMENT {
            other.alloc.clone()
        } else {
            self.alloc.clone()
        };
        let mut tmp = Self::new_in(alloc);
        for (_, v) in other.iter() {
            tmp.try_push_back(v.clone())?;
        }
        core::mem::swap(self, &mut tmp);
        Ok(())
    }

    /// Move out every node in O(1), leaving `self` empty with a clone of its
    /// strategy. Handles keep resolving through the returned sequence.
    pub fn take(&mut self) -> Self {
        let empty = Self::new_in(self.alloc.clone());
        core::mem::replace(self, empty)
    }

    /// Move assignment: `self` drops its nodes and takes `other`'s.
    ///
    /// O(1) with handles preserved when the strategy propagates on move or
    /// both strategies are equal. Otherwise every node is granted by
    /// `self`'s strategy before any payload moves, so a refused grant leaves
    /// both sequences as they were.
    pub fn move_assign(&mut self, other: &mut Self) -> Result<()> {
        if A::PROPAGATE_ON_MOVE_ASSIGNMENT || self.alloc.is_equal(&other.alloc) {
            let mut taken = other.take();
            if !A::PROPAGATE_ON_MOVE_ASSIGNMENT {
                taken.alloc = self.alloc.clone();
            }
            *self = taken;
            return Ok(());
        }
        log::debug!(
            "sequence move falls back to element-wise transfer of {} nodes",
            other.len()
        );
        self.reserve_nodes(other.len())?;
        self.clear();
        while let Some(value) = other.pop_front() {
            self.insert_granted(None, value);
        }
        Ok(())
    }

    /// Grant `n` node blocks up front, all or none. Each must later be
    /// consumed by `link_granted` or handed back via `release_nodes`.
    pub(crate) fn reserve_nodes(&self, n: usize) -> Result<()> {
        let layout = Self::node_layout();
        for granted in 0..n {
            if let Err(e) = self.alloc.allocate(layout) {
                self.release_nodes(granted);
                return Err(e.into());
            }
        }
        Ok(())
    }

    pub(crate) fn release_nodes(&self, n: usize) {
        let layout = Self::node_layout();
        for _ in 0..n {
            self.alloc.deallocate(layout);
        }
    }

    /// Exchange contents with `other`.
    ///
    /// O(1) when the strategy propagates on swap or both are equal; the
    /// strategies themselves move only if `PROPAGATE_ON_SWAP`. Otherwise
    /// each side grants the other's nodes first, then payloads change
    /// places. A refused grant leaves both sequences untouched.
    pub fn try_swap(&mut self, other: &mut Self) -> Result<()> {
        if A::PROPAGATE_ON_SWAP || self.alloc.is_equal(&other.alloc) {
            core::mem::swap(&mut self.nodes, &mut other.nodes);
            core::mem::swap(&mut self.head, &mut other.head);
            core::mem::swap(&mut self.tail, &mut other.tail);
            if A::PROPAGATE_ON_SWAP {
                core::mem::swap(&mut self.alloc, &mut other.alloc);
            }
            return Ok(());
        }
        log::debug!(
            "sequence swap falls back to element-wise transfer ({} <-> {})",
            self.len(),
            other.len()
        );
        self.reserve_nodes(other.len())?;
        if let Err(e) = other.reserve_nodes(self.len()) {
            self.release_nodes(other.len());
            return Err(e);
        }
        let mine: Vec<T> = core::iter::from_fn(|| self.pop_front()).collect();
        while let Some(value) = other.pop_front() {
            self.insert_granted(None, value);
        }
        for value in mine {
            other.insert_granted(None, value);
        }
        Ok(())
    }

    pub fn swap(&mut self, other: &mut Self) {
        or_alloc_panic(self.try_swap(other))
    }
}

impl<T, A: AllocStrategy> Drop for Sequence<T, A> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<T: Clone, A: AllocStrategy> Clone for Sequence<T, A> {
    fn clone(&self) -> Self {
        or_alloc_panic(self.try_clone())
    }
}

impl<T: fmt::Debug, A: AllocStrategy> fmt::Debug for Sequence<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter().map(|(_, v)| v)).finish()
    }
}

impl<T: PartialEq, A: AllocStrategy> PartialEq for Sequence<T, A> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().map(|(_, v)| v).eq(other.iter().map(|(_, v)| v))
    }
}

impl<T: Eq, A: AllocStrategy> Eq for Sequence<T, A> {}

/// Front-to-back iterator yielding `(Handle, &T)`.
pub struct Iter<'a, T> {
    nodes: &'a SlotMap<DefaultKey, Node<T>>,
    front: Option<DefaultKey>,
    back: Option<DefaultKey>,
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (Handle, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let k = self.front?;
        let n = &self.nodes[k];
        self.front = n.next;
        self.remaining -= 1;
        Some((Handle(k), &n.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, T> DoubleEndedIterator for Iter<'a, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let k = self.back?;
        let n = &self.nodes[k];
        self.back = n.prev;
        self.remaining -= 1;
        Some((Handle(k), &n.value))
    }
}

impl<'a, T> ExactSizeIterator for Iter<'a, T> {}

/// Front-to-back iterator yielding `(Handle, &mut T)`.
///
/// Holds one borrow per node, handed out as the cursors reach it.
pub struct IterMut<'a, T> {
    nodes: SecondaryMap<DefaultKey, &'a mut Node<T>>,
    front: Option<DefaultKey>,
    back: Option<DefaultKey>,
    remaining: usize,
}

impl<'a, T> Iterator for IterMut<'a, T> {
    type Item = (Handle, &'a mut T);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let k = self.front?;
        let n = self.nodes.remove(k)?;
        self.front = n.next;
        self.remaining -= 1;
        Some((Handle(k), &mut n.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, T> DoubleEndedIterator for IterMut<'a, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let k = self.back?;
        let n = self.nodes.remove(k)?;
        self.back = n.prev;
        self.remaining -= 1;
        Some((Handle(k), &mut n.value))
    }
}

impl<'a, T> ExactSizeIterator for IterMut<'a, T> {}

/// Owning iterator; pops from either end.
pub struct IntoIter<T, A: AllocStrategy> {
    seq: Sequence<T, A>,
}

impl<T, A: AllocStrategy> Iterator for IntoIter<T, A> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.seq.pop_front()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.seq.len(), Some(self.seq.len()))
    }
}

impl<T, A: AllocStrategy> DoubleEndedIterator for IntoIter<T, A> {
    fn next_back(&mut self) -> Option<T> {
        self.seq.pop_back()
    }
}

impl<T, A: AllocStrategy> IntoIterator for Sequence<T, A> {
    type Item = T;
    type IntoIter = IntoIter<T, A>;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter { seq: self }
    }
}

impl<'a, T, A: AllocStrategy> IntoIterator for &'a Sequence<T, A> {
    type Item = (Handle, &'a T);
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T> FromIterator<T> for Sequence<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut s = Sequence::new();
        for v in iter {
            s.push_back(v);
        }
        s
    }
}
