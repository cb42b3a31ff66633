//! Debug-only reentrancy check for probe sections.
//!
//! An insertion hashes and compares keys, running user `Hash`/`KeyEq`
//! code, while it holds the map mutably. Lookups through `&self` from that
//! code may nest freely; the guard covers the insertion probe, which safe
//! code cannot reach again, and panics in debug builds if aliasing outside
//! the borrow rules re-enters it. Release builds compile the check away.

use core::cell::Cell;
use core::marker::PhantomData;

#[derive(Debug)]
pub(crate) struct DebugReentrancy {
    #[cfg(debug_assertions)]
    active: Cell<Option<&'static str>>,
    // Single-threaded structure; keep the marker even when the cell is gone.
    _nosync: PhantomData<Cell<()>>,
}

impl DebugReentrancy {
    pub(crate) const fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            active: Cell::new(None),
            _nosync: PhantomData,
        }
    }

    /// Mark `op` as running until the guard drops.
    #[inline]
    pub(crate) fn enter(&self, op: &'static str) -> ProbeGuard<'_> {
        #[cfg(debug_assertions)]
        {
            if let Some(outer) = self.active.get() {
                panic!("reentrancy detected: `{op}` entered while `{outer}` is probing");
            }
            self.active.set(Some(op));
            return ProbeGuard { owner: self };
        }

        #[cfg(not(debug_assertions))]
        {
            let _ = op;
            return ProbeGuard { _lt: PhantomData };
        }
    }
}

impl Default for DebugReentrancy {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct ProbeGuard<'a> {
    #[cfg(debug_assertions)]
    owner: &'a DebugReentrancy,
    #[cfg(not(debug_assertions))]
    _lt: PhantomData<&'a ()>,
}

impl<'a> Drop for ProbeGuard<'a> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        self.owner.active.set(None);
    }
}
