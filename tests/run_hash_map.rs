// RunHashMap integration suite.
//
// Each test documents what behavior is being verified and which
// invariants are assumed or asserted. The core invariants exercised:
// - Uniqueness: at most one entry per key; duplicates return the
//   existing handle and leave the value alone.
// - Contiguity: every bucket's entries form one run of the sequence.
// - Load factor: len / bucket_count never exceeds the threshold after a
//   completed insert.
// - Handle stability: handles survive growth and whole-map moves and stop
//   resolving once their entry is erased.
use run_hashmap::{DefaultEq, Error, Global, Handle, MapOptions, RunHashMap};
use std::collections::BTreeSet;
use std::hash::{BuildHasherDefault, Hasher};

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

type Identity = BuildHasherDefault<IdentityHasher>;

fn identity_map<V>(buckets: usize) -> RunHashMap<u64, V, Identity> {
    RunHashMap::with_options_in(
        MapOptions::new().buckets(buckets),
        Identity::default(),
        DefaultEq,
        Global,
    )
    .expect("valid options")
}

fn run_of<V>(m: &RunHashMap<u64, V, Identity>, bucket: usize) -> Vec<u64> {
    let mut keys = Vec::new();
    let mut cur = m.bucket_start(bucket);
    for _ in 0..m.bucket_len(bucket) {
        let h = cur.expect("run shorter than recorded");
        keys.push(*h.key(m).expect("live"));
        cur = m.next(h);
    }
    keys
}

// Test: three keys sharing bucket 1 of 4 under an identity hash.
// Verifies: one contiguous run of length 3; hits inside the run, misses
// for a key of an empty bucket.
#[test]
fn identity_hash_groups_one_run() {
    let mut m = identity_map(4);
    for k in [1u64, 5, 9] {
        m.insert((k, k * 10));
    }
    assert_eq!(m.bucket_len(1), 3);
    let run: BTreeSet<u64> = run_of(&m, 1).into_iter().collect();
    assert_eq!(run, BTreeSet::from([1, 5, 9]));
    assert_eq!(m.find(&5).and_then(|h| h.value(&m).copied()), Some(50));
    assert!(m.find(&2).is_none());
    m.validate().expect("consistent");
}

// Test: growth threshold.
// Assumes: 16 initial buckets, max load factor 1.0.
// Verifies: the 17th insert grows the index to 32 buckets first.
#[test]
fn growth_doubles_before_exceeding_threshold() {
    let mut m: RunHashMap<String, usize> = RunHashMap::new();
    assert_eq!(m.bucket_count(), 16);
    for i in 0..16 {
        m.insert((format!("k{i}"), i));
    }
    assert_eq!(m.bucket_count(), 16);
    m.insert(("k16".to_string(), 16));
    assert_eq!(m.bucket_count(), 32);
    assert_eq!(m.len(), 17);
    m.validate().expect("consistent");
}

// Test: checked versus defaulting access.
// Verifies: `at` fails with KeyNotFound and changes nothing;
// `get_or_default` inserts a default value.
#[test]
fn at_versus_get_or_default() {
    let mut m: RunHashMap<String, Vec<u8>> = RunHashMap::new();
    assert!(matches!(m.at("nope"), Err(Error::KeyNotFound)));
    assert!(m.is_empty());
    m.get_or_default("nope".to_string()).push(1);
    assert_eq!(m.at("nope").expect("inserted"), &vec![1]);
    assert_eq!(m.len(), 1);
}

// Test: moving a map.
// Verifies: the source is empty afterwards, every handle resolves through
// the destination, and the source can be reused.
#[test]
fn moved_map_keeps_every_handle() {
    let mut a: RunHashMap<u64, u64> = RunHashMap::new();
    let hs: Vec<(u64, Handle)> = (0..100).map(|k| (k, a.emplace(k, k + 1).0)).collect();
    let b = a.take();
    assert!(a.is_empty());
    for (k, h) in &hs {
        assert_eq!(h.key(&b), Some(k));
        assert_eq!(h.value(&b), Some(&(k + 1)));
        assert!(h.value(&a).is_none());
    }
    a.emplace(1, 1);
    assert_eq!(a.len(), 1);
    b.validate().expect("consistent");
}

// Test: round trip and uniqueness.
// Verifies: a value inserted under k is found under k until erased; a
// second insert of k returns the first handle.
#[test]
fn round_trip_and_uniqueness() {
    let mut m: RunHashMap<&'static str, i32> = RunHashMap::new();
    let (h, fresh) = m.emplace("a", 1);
    assert!(fresh);
    assert_eq!(m.emplace("a", 2), (h, false));
    assert_eq!(m["a"], 1);
    assert_eq!(m.erase(h), None);
    assert!(m.find(&"a").is_none());
    assert!(h.value(&m).is_none());
    let (h2, fresh) = m.emplace("a", 3);
    assert!(fresh);
    assert_ne!(h, h2, "stale handles never alias new entries");
}

// Test: growth splits interleaved runs.
// Assumes: identity hash; keys congruent mod 4 but not mod 8; a threshold
// high enough that only the explicit rehash grows the index.
// Verifies: after the rehash the runs are split per bucket and stay
// contiguous; handles survive.
#[test]
fn rehash_splits_interleaved_runs() {
    let mut m: RunHashMap<u64, (), Identity> = RunHashMap::with_options_in(
        MapOptions::new().buckets(4).max_load_factor(4.0),
        Identity::default(),
        DefaultEq,
        Global,
    )
    .expect("valid options");
    let keys = [1u64, 5, 9, 13, 17, 21, 2, 6];
    let hs: Vec<Handle> = keys.iter().map(|&k| m.emplace(k, ()).0).collect();
    assert_eq!(m.bucket_count(), 4);
    m.rehash(8);
    assert_eq!(m.bucket_count(), 8);
    m.validate().expect("consistent");
    let one: BTreeSet<u64> = run_of(&m, 1).into_iter().collect();
    let five: BTreeSet<u64> = run_of(&m, 5).into_iter().collect();
    assert_eq!(one, BTreeSet::from([1, 9, 17]));
    assert_eq!(five, BTreeSet::from([5, 13, 21]));
    for (h, k) in hs.iter().zip(keys) {
        assert_eq!(h.key(&m), Some(&k));
    }
}

// Test: traversal.
// Verifies: forward traversal from `first` through `next` visits every
// entry once and ends; iteration agrees with it.
#[test]
fn traversal_is_finite_and_complete() {
    let m: RunHashMap<u32, u32> = (0..50).map(|i| (i, i)).collect();
    let mut walked = Vec::new();
    let mut cur = m.first();
    while let Some(h) = cur {
        walked.push(h);
        cur = m.next(h);
    }
    let iterated: Vec<Handle> = m.iter().map(|(h, _, _)| h).collect();
    assert_eq!(walked, iterated);
    assert_eq!(walked.len(), 50);
    let keys: BTreeSet<u32> = m.keys().copied().collect();
    assert_eq!(keys.len(), 50);
}

// Test: erasing by range and by key.
#[test]
fn erase_range_to_end() {
    let mut m: RunHashMap<u32, u32> = (0..20).map(|i| (i, i)).collect();
    let start = m.handles().nth(5);
    assert_eq!(m.erase_range(start, None), None);
    assert_eq!(m.len(), 5);
    assert_eq!(m.remove(&99), None);
    m.validate().expect("consistent");
}

// Test: a zero-bucket map is valid, empty, and allocates on first insert.
#[test]
fn zero_buckets_allocate_lazily() {
    let mut m = identity_map::<u8>(0);
    assert_eq!(m.bucket_count(), 0);
    assert_eq!(m.load_factor(), 0.0);
    assert!(m.find(&3).is_none());
    assert_eq!(m.bucket_of(&3), None);
    m.validate().expect("empty map is consistent");
    m.emplace(3, 0);
    assert!(m.bucket_count() > 0);
    assert_eq!(m.bucket_of(&3), Some(3 % m.bucket_count()));
    m.validate().expect("consistent");
}

// Test: Debug output lists entries in traversal order.
#[test]
fn debug_lists_entries() {
    let mut m = identity_map::<&str>(8);
    m.emplace(2, "b");
    m.emplace(1, "a");
    assert_eq!(format!("{m:?}"), "{2: \"b\", 1: \"a\"}");
}

// Test: values handed out by iter_mut stay writable while the iterator
// keeps advancing from both ends.
// Verifies: every write lands on its own entry; nothing is visited twice.
#[test]
fn iter_mut_items_stay_live_while_advancing() {
    let mut m = identity_map::<u64>(4);
    for k in 0..6 {
        m.emplace(k, 0);
    }
    let mut it = m.iter_mut();
    let (_, k1, v1) = it.next().expect("six entries");
    let k1 = *k1;
    let (_, k2, v2) = it.next().expect("six entries");
    let k2 = *k2;
    let (_, k3, v3) = it.next_back().expect("six entries");
    let k3 = *k3;
    *v1 = k1 + 10;
    *v2 = k2 + 10;
    *v3 = k3 + 10;
    let rest: Vec<&mut u64> = it.map(|(_, _, v)| v).collect();
    assert_eq!(rest.len(), 3);
    *v1 += 100;
    for v in rest {
        *v = 7;
    }
    assert_eq!(m.get(&k1), Some(&(k1 + 110)));
    assert_eq!(m.get(&k2), Some(&(k2 + 10)));
    assert_eq!(m.get(&k3), Some(&(k3 + 10)));
    assert_eq!(m.values().filter(|v| **v == 7).count(), 3);
    for v in m.values_mut() {
        *v = 0;
    }
    assert!(m.values().all(|v| *v == 0));
}
