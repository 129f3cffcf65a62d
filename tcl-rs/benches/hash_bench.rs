use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::HashMap;
use tcl::hash::HashTable;

fn make_keys(n: usize) -> Vec<String> {
    // Variable-name-shaped keys, the dominant workload.
    (0..n).map(|i| format!("var_{i}")).collect()
}

fn bench_insert(c: &mut Criterion) {
    let keys_small = make_keys(64);
    let keys_large = make_keys(4096);

    let mut g = c.benchmark_group("hash_insert");

    g.bench_function("chained_small", |b| {
        b.iter(|| {
            let mut t: HashTable<String, usize> = HashTable::new();
            for (i, k) in keys_small.iter().enumerate() {
                t.replace(black_box(k.clone()), i);
            }
            t.len()
        })
    });
    g.bench_function("std_small", |b| {
        b.iter(|| {
            let mut t: HashMap<String, usize> = HashMap::new();
            for (i, k) in keys_small.iter().enumerate() {
                t.insert(black_box(k.clone()), i);
            }
            t.len()
        })
    });

    g.bench_function("chained_large", |b| {
        b.iter(|| {
            let mut t: HashTable<String, usize> = HashTable::new();
            for (i, k) in keys_large.iter().enumerate() {
                t.replace(black_box(k.clone()), i);
            }
            t.len()
        })
    });
    g.bench_function("std_large", |b| {
        b.iter(|| {
            let mut t: HashMap<String, usize> = HashMap::new();
            for (i, k) in keys_large.iter().enumerate() {
                t.insert(black_box(k.clone()), i);
            }
            t.len()
        })
    });

    g.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let keys = make_keys(4096);
    let mut chained: HashTable<String, usize> = HashTable::new();
    let mut std_map: HashMap<String, usize> = HashMap::new();
    for (i, k) in keys.iter().enumerate() {
        chained.replace(k.clone(), i);
        std_map.insert(k.clone(), i);
    }

    let mut g = c.benchmark_group("hash_lookup");

    g.bench_function("chained_hit", |b| {
        b.iter(|| {
            let mut hits = 0usize;
            for k in &keys {
                if chained.find(black_box(k)).is_some() {
                    hits += 1;
                }
            }
            hits
        })
    });
    g.bench_function("std_hit", |b| {
        b.iter(|| {
            let mut hits = 0usize;
            for k in &keys {
                if std_map.get(black_box(k)).is_some() {
                    hits += 1;
                }
            }
            hits
        })
    });

    let misses = make_keys(8192).split_off(4096);
    g.bench_function("chained_miss", |b| {
        b.iter(|| {
            let mut hits = 0usize;
            for k in &misses {
                if chained.find(black_box(k)).is_some() {
                    hits += 1;
                }
            }
            hits
        })
    });

    g.finish();
}

criterion_group!(benches, bench_insert, bench_lookup);
criterion_main!(benches);
