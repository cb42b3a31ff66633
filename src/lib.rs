//! run-hashmap: a chained hash map whose buckets are contiguous runs over
//! one shared doubly-linked sequence, with stable handles and pluggable
//! allocation.
//!
//! Internal Design:
//!
//! Summary
//! - Layers, leaf first:
//!   - `AllocStrategy`: grants or refuses every node, candidate entry and
//!     bucket array, observes every release, runs payload construction and
//!     destruction, and carries the propagation rules for copy, move and
//!     swap.
//!   - `Sequence<T, A>`: doubly-linked list stored in a `slotmap` arena.
//!     Links are generational keys, so a `Handle` never dangles and never
//!     aliases a later node.
//!   - `BucketIndex`: `{start, len}` per bucket. A pure view over runs of
//!     the sequence; it owns no entries.
//!   - `RunHashMap<K, V, S, E, A>`: owns the sequence (and through it the
//!     strategy), the index, the hash builder, the key equality functor and
//!     the load-factor threshold.
//!
//! Run invariant
//! - For every non-empty bucket `b`, the `len` nodes reached from `start`
//!   all hash to `b`, and no other node does. Inserts link in front of the
//!   run and become its start; erases move the start forward.
//! - Growth builds a fresh index in one forward pass. The visited prefix is
//!   always made of whole runs; a node whose bucket already has a run but
//!   whose predecessor belongs elsewhere is relinked in front of that run.
//!   This keeps runs contiguous for any hash function without touching
//!   payloads, so handles survive.
//!
//! Hashing
//! - Each entry caches its `u64` hash. Erase, rehash and copies use the
//!   cached value; `K: Hash` runs only when a key is looked up or inserted.
//! - Cached hashes are reused by copies and element-wise moves, which
//!   assumes a cloned hash builder hashes like the original.
//!
//! Failure model
//! - Every `try_` operation either succeeds or leaves the container as it
//!   was (allocation refused, constructor failed). The plain variants panic
//!   on a refused grant the way std collections abort on OOM.
//! - Element-wise move and swap (strategies that neither propagate nor
//!   compare equal) take every grant they need before moving a payload, so
//!   a refusal leaves both containers as they were.
//!
//! Reentrancy
//! - Probing runs user `Hash`/`KeyEq` code. Nested lookups through a
//!   shared reference are fine; a debug-only guard panics if the insertion
//!   probe, which holds the map mutably, is re-entered.
//!
//! Notes and non-goals
//! - Single-threaded; mutation needs `&mut`.
//! - Keys are immutable once stored; there is no `key_mut`.
//! - A map with zero buckets (after `take`, or built with `buckets(0)`) is
//!   empty and allocates its index on the first insert.

mod allocator;
mod bucket;
mod error;
mod options;
mod reentrancy;
mod run_hash_map;
mod run_hash_map_proptest;
pub mod sequence;
mod traits;

pub use allocator::{AllocError, AllocStats, AllocStrategy, CountingAlloc, Global, Pinned};
pub use error::{Error, Result};
pub use options::{MapOptions, DEFAULT_BUCKETS, DEFAULT_MAX_LOAD_FACTOR};
pub use run_hash_map::{IntoIter, Iter, IterMut, RunHashMap};
pub use sequence::{Handle, Sequence};
pub use traits::{DefaultEq, EqFn, KeyEq, KeyValue};
