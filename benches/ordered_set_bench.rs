use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use hashed_storage::OrderedSet;
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

fn filled(seed: u64, n: usize) -> (OrderedSet<String>, Vec<String>) {
    let keys: Vec<String> = lcg(seed).take(n).map(key).collect();
    let set: OrderedSet<String> = keys.iter().cloned().collect();
    (set, keys)
}

fn bench_insert_fresh_100k(c: &mut Criterion) {
    c.bench_function("ordered_set::insert_fresh_100k", |b| {
        b.iter_batched(
            OrderedSet::<String>::new,
            |mut s| {
                for x in lcg(1).take(100_000) {
                    s.insert(key(x));
                }
                black_box(s)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_insert_reserved_100k(c: &mut Criterion) {
    c.bench_function("ordered_set::insert_reserved_100k", |b| {
        b.iter_batched(
            || OrderedSet::<String>::with_capacity(100_000),
            |mut s| {
                for x in lcg(2).take(100_000) {
                    s.insert(key(x));
                }
                black_box(s)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_contains_hit_10k(c: &mut Criterion) {
    c.bench_function("ordered_set::contains_hit_10k_on_100k", |b| {
        let (s, keys) = filled(7, 100_000);
        let n = keys.len();
        let mut r = 0x9e3779b97f4a7c15u64;
        let queries: Vec<&String> = (0..10_000)
            .map(|_| {
                r = r.wrapping_mul(2862933555777941757).wrapping_add(3037000493);
                &keys[(r as usize) % n]
            })
            .collect();
        b.iter(|| {
            for k in &queries {
                black_box(s.contains(k.as_str()));
            }
        })
    });
}

fn bench_contains_miss_10k(c: &mut Criterion) {
    c.bench_function("ordered_set::contains_miss_10k_on_100k", |b| {
        let (s, _) = filled(11, 100_000);
        let mut miss = lcg(0xdead_beef);
        b.iter(|| {
            for _ in 0..10_000 {
                let k = key(miss.next().unwrap_or_default());
                black_box(s.contains(&k));
            }
        })
    });
}

fn bench_remove_random_10k(c: &mut Criterion) {
    c.bench_function("ordered_set::remove_random_10k_of_20k", |b| {
        b.iter_batched(
            || {
                let (s, keys) = filled(5, 20_000);
                let targets: Vec<String> = keys.iter().step_by(2).cloned().collect();
                (s, targets)
            },
            |(mut s, targets)| {
                for k in &targets {
                    black_box(s.remove(k.as_str()));
                }
                black_box(s)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_index_and_iter(c: &mut Criterion) {
    c.bench_function("ordered_set::iter_all_100k", |b| {
        let (s, _) = filled(999, 100_000);
        b.iter(|| {
            let mut total = 0usize;
            for k in s.iter() {
                total = total.wrapping_add(k.len());
            }
            black_box(total)
        })
    });

    c.bench_function("ordered_set::index_all_100k", |b| {
        let (s, _) = filled(1001, 100_000);
        b.iter(|| {
            let mut total = 0usize;
            for p in 0..s.len() {
                total = total.wrapping_add(s[p].len());
            }
            black_box(total)
        })
    });
}

fn bench_clone_then_write(c: &mut Criterion) {
    c.bench_function("ordered_set::clone_then_insert_10k", |b| {
        let (s, _) = filled(31, 10_000);
        b.iter(|| {
            let mut copy = s.clone();
            copy.insert(key(0));
            black_box(copy)
        })
    });
}

fn bench_config() -> Criterion {
    Criterion::default()
        .sample_size(12)
        .measurement_time(Duration::from_secs(5))
        .warm_up_time(Duration::from_secs(1))
}

criterion_group! {
    name = benches;
    config = bench_config();
    targets = bench_insert_fresh_100k, bench_insert_reserved_100k, bench_contains_hit_10k,
        bench_contains_miss_10k, bench_remove_random_10k, bench_index_and_iter,
        bench_clone_then_write
}
criterion_main!(benches);
