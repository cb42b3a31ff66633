//! Allocation strategies.
//!
//! Node storage lives in the sequence's arena; a strategy decides whether a
//! node, a candidate entry or a bucket array may come into existence, sees
//! every release, and runs payload construction and destruction. The map
//! stores one strategy (inside its sequence) and threads it everywhere.
//!
//! Propagation flags follow the usual container rules:
//! - copy assignment adopts the source strategy only if
//!   `PROPAGATE_ON_COPY_ASSIGNMENT`;
//! - move assignment transfers storage in O(1) only if
//!   `PROPAGATE_ON_MOVE_ASSIGNMENT` or the two strategies compare equal,
//!   otherwise entries are moved one by one;
//! - swap exchanges storage in O(1) under the same rule with
//!   `PROPAGATE_ON_SWAP`.

use core::alloc::Layout;
use core::cell::Cell;
use std::rc::Rc;

/// A refused grant.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AllocError {
    pub layout: Layout,
}

/// Pluggable allocation policy.
pub trait AllocStrategy: Clone {
    const PROPAGATE_ON_COPY_ASSIGNMENT: bool = false;
    const PROPAGATE_ON_MOVE_ASSIGNMENT: bool = true;
    const PROPAGATE_ON_SWAP: bool = false;

    /// Grant a block of `layout`, or refuse.
    fn allocate(&self, layout: Layout) -> Result<(), AllocError>;

    /// Release a block previously granted with the same `layout`.
    fn deallocate(&self, layout: Layout);

    /// Build a payload inside a granted block.
    #[inline]
    fn construct<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        f()
    }

    /// Tear down a payload before its block is released.
    #[inline]
    fn destroy<T>(&self, value: T) {
        drop(value);
    }

    /// Strategy used by a copy of a container holding `self`.
    fn select_on_copy(&self) -> Self {
        self.clone()
    }

    /// Whether blocks granted by `self` may be released through `other`.
    fn is_equal(&self, other: &Self) -> bool;
}

/// Always grants. Stateless, so every instance is equal and propagation is
/// free.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Global;

impl AllocStrategy for Global {
    const PROPAGATE_ON_COPY_ASSIGNMENT: bool = true;
    const PROPAGATE_ON_MOVE_ASSIGNMENT: bool = true;
    const PROPAGATE_ON_SWAP: bool = true;

    #[inline]
    fn allocate(&self, _layout: Layout) -> Result<(), AllocError> {
        Ok(())
    }

    #[inline]
    fn deallocate(&self, _layout: Layout) {}

    #[inline]
    fn is_equal(&self, _other: &Self) -> bool {
        true
    }
}

/// Snapshot of a [`CountingAlloc`]'s counters.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct AllocStats {
    pub live_bytes: usize,
    pub live_blocks: usize,
    pub total_allocations: usize,
    pub refused: usize,
    pub constructed: usize,
    pub destroyed: usize,
}

#[derive(Debug, Default)]
struct Counters {
    live_bytes: Cell<usize>,
    live_blocks: Cell<usize>,
    total_allocations: Cell<usize>,
    refused: Cell<usize>,
    constructed: Cell<usize>,
    destroyed: Cell<usize>,
    limit: Cell<Option<usize>>,
}

/// Accounting strategy with an optional byte budget.
///
/// Clones share counters and compare equal; independently created
/// instances do not. Grants that would push `live_bytes` past the limit are
/// refused.
#[derive(Clone, Debug, Default)]
pub struct CountingAlloc {
    counters: Rc<Counters>,
}

impl CountingAlloc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(bytes: usize) -> Self {
        let a = Self::new();
        a.set_limit(Some(bytes));
        a
    }

    /// Change the byte budget; `None` removes it. Already granted blocks are
    /// unaffected.
    pub fn set_limit(&self, bytes: Option<usize>) {
        self.counters.limit.set(bytes);
    }

    pub fn stats(&self) -> AllocStats {
        let c = &self.counters;
        AllocStats {
            live_bytes: c.live_bytes.get(),
            live_blocks: c.live_blocks.get(),
            total_allocations: c.total_allocations.get(),
            refused: c.refused.get(),
            constructed: c.constructed.get(),
            destroyed: c.destroyed.get(),
        }
    }
}

impl AllocStrategy for CountingAlloc {
    const PROPAGATE_ON_COPY_ASSIGNMENT: bool = false;
    const PROPAGATE_ON_MOVE_ASSIGNMENT: bool = true;
    const PROPAGATE_ON_SWAP: bool = true;

    fn allocate(&self, layout: Layout) -> Result<(), AllocError> {
        let c = &self.counters;
        let next = c.live_bytes.get().saturating_add(layout.size());
        if matches!(c.limit.get(), Some(limit) if next > limit) {
            c.refused.set(c.refused.get() + 1);
            log::warn!(
                "allocation of {} bytes refused ({} of {:?} live)",
                layout.size(),
                c.live_bytes.get(),
                c.limit.get()
            );
            return Err(AllocError { layout });
        }
        c.live_bytes.set(next);
        c.live_blocks.set(c.live_blocks.get() + 1);
        c.total_allocations.set(c.total_allocations.get() + 1);
        Ok(())
    }

    fn deallocate(&self, layout: Layout) {
        let c = &self.counters;
        debug_assert!(c.live_blocks.get() > 0, "CountingAlloc block underflow");
        c.live_bytes.set(c.live_bytes.get().saturating_sub(layout.size()));
        c.live_blocks.set(c.live_blocks.get().saturating_sub(1));
    }

    fn construct<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let v = f()?;
        let c = &self.counters;
        c.constructed.set(c.constructed.get() + 1);
        Ok(v)
    }

    fn destroy<T>(&self, value: T) {
        let c = &self.counters;
        c.destroyed.set(c.destroyed.get() + 1);
        drop(value);
    }

    fn is_equal(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.counters, &other.counters)
    }
}

/// Wraps a strategy and forbids it from following its container on copy
/// assignment, move assignment or swap.
#[derive(Clone, Debug, Default)]
pub struct Pinned<A>(pub A);

impl<A: AllocStrategy> AllocStrategy for Pinned<A> {
    const PROPAGATE_ON_COPY_ASSIGNMENT: bool = false;
    const PROPAGATE_ON_MOVE_ASSIGNMENT: bool = false;
    const PROPAGATE_ON_SWAP: bool = false;

    #[inline]
    fn allocate(&self, layout: Layout) -> Result<(), AllocError> {
        self.0.allocate(layout)
    }

    #[inline]
    fn deallocate(&self, layout: Layout) {
        self.0.deallocate(layout)
    }

    #[inline]
    fn construct<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.0.construct(f)
    }

    #[inline]
    fn destroy<T>(&self, value: T) {
        self.0.destroy(value)
    }

    fn select_on_copy(&self) -> Self {
        Pinned(self.0.select_on_copy())
    }

    fn is_equal(&self, other: &Self) -> bool {
        self.0.is_equal(&other.0)
    }
}

/// A granted block that is released on drop unless `keep` hands it over to
/// a container. Covers unwinding out of a payload constructor.
pub(crate) struct Grant<'a, A: AllocStrategy> {
    alloc: &'a A,
    layout: Layout,
}

impl<'a, A: AllocStrategy> Grant<'a, A> {
    pub(crate) fn new(alloc: &'a A, layout: Layout) -> Result<Self, AllocError> {
        alloc.allocate(layout)?;
        Ok(Self { alloc, layout })
    }

    /// The block now belongs to whoever releases `layout` later.
    pub(crate) fn keep(self) {
        core::mem::forget(self);
    }
}

impl<'a, A: AllocStrategy> Drop for Grant<'a, A> {
    fn drop(&mut self) {
        self.alloc.deallocate(self.layout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_releases_unless_kept() {
        let a = CountingAlloc::new();
        let l = Layout::new::<u32>();
        {
            let _g = Grant::new(&a, l).unwrap();
            assert_eq!(a.stats().live_blocks, 1);
        }
        assert_eq!(a.stats().live_blocks, 0);
        Grant::new(&a, l).unwrap().keep();
        assert_eq!(a.stats().live_blocks, 1);
        a.deallocate(l);
    }

    #[test]
    fn global_always_grants_and_is_equal() {
        let g = Global;
        assert!(g.allocate(Layout::new::<[u8; 1024]>()).is_ok());
        g.deallocate(Layout::new::<[u8; 1024]>());
        assert!(g.is_equal(&Global));
        assert!(Global::PROPAGATE_ON_MOVE_ASSIGNMENT);
    }

    #[test]
    fn counting_tracks_live_blocks() {
        let a = CountingAlloc::new();
        let l = Layout::new::<u64>();
        a.allocate(l).unwrap();
        a.allocate(l).unwrap();
        assert_eq!(a.stats().live_blocks, 2);
        assert_eq!(a.stats().live_bytes, 16);
        a.deallocate(l);
        let s = a.stats();
        assert_eq!(s.live_blocks, 1);
        assert_eq!(s.live_bytes, 8);
        assert_eq!(s.total_allocations, 2);
    }

    #[test]
    fn counting_refuses_past_limit() {
        let a = CountingAlloc::with_limit(10);
        let l = Layout::new::<u64>();
        a.allocate(l).unwrap();
        let err = a.allocate(l).unwrap_err();
        assert_eq!(err.layout, l);
        assert_eq!(a.stats().refused, 1);
        assert_eq!(a.stats().live_blocks, 1);

        a.set_limit(None);
        assert!(a.allocate(l).is_ok());
    }

    #[test]
    fn counting_equality_follows_shared_counters() {
        let a = CountingAlloc::new();
        let b = a.clone();
        let c = CountingAlloc::new();
        assert!(a.is_equal(&b));
        assert!(!a.is_equal(&c));
        assert!(a.select_on_copy().is_equal(&a));
    }

    #[test]
    fn construct_and_destroy_are_counted() {
        let a = CountingAlloc::new();
        let v: Result<String, ()> = a.construct(|| Ok("x".to_string()));
        a.destroy(v.unwrap());
        let failed: Result<String, &str> = a.construct(|| Err("nope"));
        assert!(failed.is_err());
        let s = a.stats();
        assert_eq!(s.constructed, 1);
        assert_eq!(s.destroyed, 1);
    }

    #[test]
    fn pinned_never_propagates_but_delegates() {
        let inner = CountingAlloc::new();
        let p = Pinned(inner.clone());
        assert!(!Pinned::<CountingAlloc>::PROPAGATE_ON_MOVE_ASSIGNMENT);
        assert!(!Pinned::<CountingAlloc>::PROPAGATE_ON_SWAP);
        p.allocate(Layout::new::<u32>()).unwrap();
        assert_eq!(inner.stats().live_blocks, 1);
        assert!(p.is_equal(&Pinned(inner)));
    }
}
