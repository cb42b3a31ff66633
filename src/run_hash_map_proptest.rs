#![cfg(test)]

// Property tests for RunHashMap kept inside the crate so they can use the
// internal hasher fixtures and `validate()` after every step.

use crate::options::MapOptions;
use crate::run_hash_map::RunHashMap;
use crate::sequence::Handle;
use crate::traits::DefaultEq;
use crate::allocator::Global;
use core::hash::{BuildHasher, BuildHasherDefault, Hasher};
use hashbrown::hash_map::DefaultHashBuilder;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::{BTreeMap, HashMap};

// Hashes an integer to itself: small moduli put many keys in one bucket and
// growth splits runs that interleave.
#[derive(Default)]
struct IdentityHasher(u64);
impl Hasher for IdentityHasher {
    fn write(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.0 = (self.0 << 8) | u64::from(*b);
        }
    }
    fn write_u64(&mut self, n: u64) {
        self.0 = n;
    }
    fn finish(&self) -> u64 {
        self.0
    }
}

// Every key collides.
#[derive(Default)]
struct ConstHasher;
impl Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0
    }
}

// Keys differ only in the high bits, so every power-of-two bucket count
// sees one bucket while other counts spread them unevenly.
#[derive(Default)]
struct HighBitsHasher(u64);
impl Hasher for HighBitsHasher {
    fn write(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.0 = self.0.rotate_left(8) ^ u64::from(*b);
        }
    }
    fn write_u64(&mut self, n: u64) {
        self.0 = n << 40;
    }
    fn finish(&self) -> u64 {
        self.0
    }
}

#[derive(Clone, Debug)]
enum Op {
    Insert(u64, i32),
    Erase(u64),
    Remove(u64),
    Find(u64),
    Bump(u64),
    Rehash(usize),
    SetMaxLoadFactor(f32),
    EraseFront(usize),
    CloneCheck,
    MoveThrough,
    Clear,
}

fn arb_op() -> impl Strategy<Value = Op> {
    let key = 0u64..48;
    prop_oneof![
        6 => (key.clone(), any::<i32>()).prop_map(|(k, v)| Op::Insert(k, v)),
        3 => key.clone().prop_map(Op::Erase),
        2 => key.clone().prop_map(Op::Remove),
        3 => key.clone().prop_map(Op::Find),
        2 => key.prop_map(Op::Bump),
        1 => (0usize..96).prop_map(Op::Rehash),
        1 => proptest::sample::select(vec![0.25f32, 0.5, 1.0, 2.0, 4.0])
            .prop_map(Op::SetMaxLoadFactor),
        1 => (0usize..6).prop_map(Op::EraseFront),
        1 => Just(Op::CloneCheck),
        1 => Just(Op::MoveThrough),
        1 => Just(Op::Clear),
    ]
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(arb_op(), 1..120)
}

fn contents<S, A>(m: &RunHashMap<u64, i32, S, DefaultEq, A>) -> BTreeMap<u64, i32>
where
    A: crate::allocator::AllocStrategy,
{
    m.iter().map(|(_, k, v)| (*k, *v)).collect()
}

// Drive the map and a std model through `ops`, checking every structural
// invariant after each step.
fn run_against_model<S>(hasher: S, buckets: usize, ops: Vec<Op>) -> Result<(), TestCaseError>
where
    S: BuildHasher + Clone,
{
    let mut sut: RunHashMap<u64, i32, S> = RunHashMap::with_options_in(
        MapOptions::new().buckets(buckets),
        hasher,
        DefaultEq,
        Global,
    )
    .map_err(|e| TestCaseError::fail(e.to_string()))?;
    let mut model: HashMap<u64, i32> = HashMap::new();
    let mut live: HashMap<u64, Handle> = HashMap::new();
    let mut stale: Vec<Handle> = Vec::new();

    for op in ops {
        match op {
            Op::Insert(k, v) => {
                let already = model.contains_key(&k);
                let (h, fresh) = sut.emplace(k, v);
                prop_assert_eq!(fresh, !already);
                if fresh {
                    model.insert(k, v);
                    live.insert(k, h);
                } else {
                    prop_assert_eq!(Some(h), live.get(&k).copied());
                }
            }
            Op::Erase(k) => match live.remove(&k) {
                Some(h) => {
                    let succ = sut.next(h);
                    prop_assert_eq!(sut.erase(h), succ);
                    model.remove(&k);
                    stale.push(h);
                }
                None => prop_assert!(sut.find(&k).is_none()),
            },
            Op::Remove(k) => {
                prop_assert_eq!(sut.remove(&k), model.remove(&k));
                if let Some(h) = live.remove(&k) {
                    stale.push(h);
                }
            }
            Op::Find(k) => {
                let found = sut.find(&k);
                prop_assert_eq!(found, live.get(&k).copied());
                prop_assert_eq!(sut.get(&k), model.get(&k));
            }
            Op::Bump(k) => {
                let v = sut.get_or_default(k);
                *v = v.wrapping_add(1);
                let mv = model.entry(k).or_default();
                *mv = mv.wrapping_add(1);
                if !live.contains_key(&k) {
                    let h = sut.find(&k);
                    prop_assert!(h.is_some());
                    live.extend(h.map(|h| (k, h)));
                }
            }
            Op::Rehash(n) => {
                let before = sut.bucket_count();
                sut.rehash(n);
                prop_assert_eq!(sut.bucket_count(), before.max(n));
            }
            Op::SetMaxLoadFactor(f) => {
                prop_assert!(sut.set_max_load_factor(f).is_ok());
                prop_assert!(sut.load_factor() <= f);
            }
            Op::EraseFront(n) => {
                let order: Vec<Handle> = sut.handles().collect();
                let n = n.min(order.len());
                for h in &order[..n] {
                    let k = *h.key(&sut).unwrap();
                    model.remove(&k);
                    live.remove(&k);
                    stale.push(*h);
                }
                let last = order.get(n).copied();
                let first = sut.first();
                prop_assert_eq!(sut.erase_range(first, last), last);
            }
            Op::CloneCheck => {
                let copy = sut.clone();
                prop_assert!(copy.validate().is_ok());
                prop_assert_eq!(contents(&copy), contents(&sut));
                prop_assert_eq!(copy.bucket_count(), sut.bucket_count());
            }
            Op::MoveThrough => {
                let mut moved = sut.take();
                prop_assert!(sut.is_empty());
                prop_assert!(sut.validate().is_ok());
                sut.move_assign(&mut moved)
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert!(moved.is_empty());
            }
            Op::Clear => {
                sut.clear();
                model.clear();
                stale.extend(live.drain().map(|(_, h)| h));
            }
        }

        if let Err(e) = sut.validate() {
            return Err(TestCaseError::fail(format!("after {op:?}: {e}")));
        }
        prop_assert_eq!(sut.len(), model.len());
        prop_assert!(sut.load_factor() <= sut.max_load_factor());
        for (k, h) in &live {
            prop_assert_eq!(h.key(&sut), Some(k));
            prop_assert_eq!(h.value(&sut), model.get(k));
        }
        for h in &stale {
            prop_assert!(h.value(&sut).is_none());
        }
    }
    prop_assert_eq!(contents(&sut), model.into_iter().collect::<BTreeMap<_, _>>());
    Ok(())
}

// Property: state-machine equivalence against std::collections::HashMap
// under several hash functions. Invariants checked after every step:
// - uniqueness, lookup parity and stable handles for live entries;
// - erased and cleared handles never resolve again;
// - runs stay contiguous and bucket counts match (`validate`);
// - len / bucket_count never exceeds the max load factor.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn prop_default_hasher(ops in arb_ops(), buckets in 0usize..20) {
        run_against_model(DefaultHashBuilder::default(), buckets, ops)?;
    }

    #[test]
    fn prop_identity_hasher(ops in arb_ops(), buckets in 0usize..20) {
        run_against_model(BuildHasherDefault::<IdentityHasher>::default(), buckets, ops)?;
    }

    #[test]
    fn prop_constant_hasher(ops in arb_ops(), buckets in 0usize..20) {
        run_against_model(BuildHasherDefault::<ConstHasher>::default(), buckets, ops)?;
    }

    #[test]
    fn prop_high_bits_hasher(ops in arb_ops(), buckets in 0usize..20) {
        run_against_model(BuildHasherDefault::<HighBitsHasher>::default(), buckets, ops)?;
    }

    // Property: growing an arbitrarily ordered identity-hashed map to any
    // larger bucket count keeps every run contiguous and every handle live.
    #[test]
    fn prop_rehash_keeps_runs(
        keys in proptest::collection::vec(0u64..1024, 0..200),
        from in 1usize..16,
        to in 1usize..300,
    ) {
        let mut m: RunHashMap<u64, (), BuildHasherDefault<IdentityHasher>> =
            RunHashMap::with_options_in(
                MapOptions::new().buckets(from).max_load_factor(1000.0),
                BuildHasherDefault::default(),
                DefaultEq,
                Global,
            )
            .unwrap();
        let handles: Vec<(u64, Handle)> = keys.iter().map(|&k| (k, m.emplace(k, ()).0)).collect();
        m.rehash(to);
        prop_assert!(m.validate().is_ok());
        for (k, h) in handles {
            prop_assert_eq!(h.key(&m), Some(&k));
        }
        let total: usize = (0..m.bucket_count()).map(|b| m.bucket_len(b)).sum();
        prop_assert_eq!(total, m.len());
    }

    // Property: erasing every live handle, in any order, empties the map.
    #[test]
    fn prop_erase_all_empties(keys in proptest::collection::vec(any::<u32>(), 0..150), seed in any::<u64>()) {
        let mut m: RunHashMap<u32, u32> = RunHashMap::with_buckets(2);
        let mut hs: Vec<Handle> = keys.iter().map(|&k| m.emplace(k, k).0).collect();
        hs.sort_by_key(|h| h.key(&m).copied());
        hs.dedup();
        let mut s = seed;
        while !hs.is_empty() {
            s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
            let h = hs.swap_remove((s >> 33) as usize % hs.len());
            m.erase(h);
            prop_assert!(m.validate().is_ok());
        }
        prop_assert!(m.is_empty());
        prop_assert_eq!(m.first(), None);
    }
}
