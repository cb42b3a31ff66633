use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use run_hashmap::{Handle, RunHashMap};
use std::time::Duration;

fn lcg(mut s: u64) -> impl Iterator<Item = u64> {
    std::iter::from_fn(move || {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        Some(s)
    })
}

fn key(n: u64) -> String {
    format!("k{:016x}", n)
}

fn bench_insert_fresh_100k(c: &mut Criterion) {
    c.bench_function("run::insert_fresh_100k", |b| {
        b.iter_batched(
            RunHashMap::<String, u64>::new,
            |mut m| {
                for (i, x) in lcg(1).take(100_000).enumerate() {
                    m.emplace(key(x), i as u64);
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_insert_reserved_100k(c: &mut Criterion) {
    c.bench_function("run::insert_reserved_100k", |b| {
        b.iter_batched(
            || {
                let mut m = RunHashMap::<String, u64>::new();
                m.reserve(100_000);
                m
            },
            |mut m| {
                for (i, x) in lcg(3).take(100_000).enumerate() {
                    m.emplace(key(x), i as u64);
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_erase_random_10k(c: &mut Criterion) {
    c.bench_function("run::erase_random_10k_of_110k", |b| {
        b.iter_batched(
            || {
                let mut m = RunHashMap::new();
                let handles: Vec<Handle> = lcg(5)
                    .take(110_000)
                    .enumerate()
                    .map(|(i, x)| m.emplace(key(x), i as u64).0)
                    .collect();
                // Precompute 10k unique indices via LCG
                let n = handles.len();
                let mut sel = std::collections::HashSet::with_capacity(10_000);
                let mut s = 0x9e3779b97f4a7c15u64;
                while sel.len() < 10_000 {
                    s = s.wrapping_mul(2862933555777941757).wrapping_add(3037000493);
                    sel.insert((s as usize) % n);
                }
                let to_erase: Vec<Handle> = sel.into_iter().map(|i| handles[i]).collect();
                (m, to_erase)
            },
            |(mut m, to_erase)| {
                for h in to_erase {
                    m.erase(h);
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_find_hit_miss(c: &mut Criterion) {
    let mut m = RunHashMap::new();
    let keys: Vec<String> = lcg(7).take(100_000).map(key).collect();
    for (i, k) in keys.iter().enumerate() {
        m.emplace(k.clone(), i as u64);
    }
    let misses: Vec<String> = lcg(8).take(100_000).map(key).collect();

    c.bench_function("run::find_hit_100k", |b| {
        b.iter(|| {
            for k in &keys {
                black_box(m.find(k.as_str()));
            }
        })
    });
    c.bench_function("run::find_miss_100k", |b| {
        b.iter(|| {
            for k in &misses {
                black_box(m.find(k.as_str()));
            }
        })
    });
}

fn bench_handle_access(c: &mut Criterion) {
    let mut m = RunHashMap::new();
    let handles: Vec<Handle> = lcg(9)
        .take(100_000)
        .enumerate()
        .map(|(i, x)| m.emplace(key(x), i as u64).0)
        .collect();
    c.bench_function("run::handle_value_100k", |b| {
        b.iter(|| {
            let mut acc = 0u64;
            for h in &handles {
                acc = acc.wrapping_add(*h.value(&m).unwrap());
            }
            black_box(acc)
        })
    });
}

fn bench_rehash_grow(c: &mut Criterion) {
    c.bench_function("run::rehash_16_to_131072", |b| {
        b.iter_batched(
            || {
                let mut m = RunHashMap::<u64, u64>::new();
                m.set_max_load_factor(1e9).unwrap();
                for x in lcg(11).take(100_000) {
                    m.emplace(x, x);
                }
                m
            },
            |mut m| {
                m.rehash(131_072);
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_iterate(c: &mut Criterion) {
    let mut m = RunHashMap::new();
    for (i, x) in lcg(13).take(100_000).enumerate() {
        m.emplace(key(x), i as u64);
    }
    c.bench_function("run::iter_100k", |b| {
        b.iter(|| black_box(m.values().sum::<u64>()))
    });
}

fn bench_config() -> Criterion {
    Criterion::default()
        .sample_size(12)
        .measurement_time(Duration::from_secs(5))
        .warm_up_time(Duration::from_secs(1))
}

criterion_group! {
    name = benches_insert;
    config = bench_config();
    targets = bench_insert_fresh_100k, bench_insert_reserved_100k, bench_rehash_grow
}
criterion_group! {
    name = benches_ops;
    config = bench_config();
    targets = bench_erase_random_10k,
              bench_find_hit_miss,
              bench_handle_access,
              bench_iterate
}
criterion_main!(benches_insert, benches_ops);
