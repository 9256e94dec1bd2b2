//! Benchmarks for vocabulary quantisation
//!
//! Per-frame cost is `O(d * k * L)` per descriptor; a frame quantises a
//! few hundred descriptors every detection interval.

use artrack_core::{BuildConfig, Descriptors};
use artrack_vocab::VocabularyBuilder;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn clustered_descriptors(n: usize, clusters: usize, seed: u64) -> Descriptors {
    let mut rng = StdRng::seed_from_u64(seed);
    let prototypes: Vec<Vec<u8>> = (0..clusters)
        .map(|_| (0..32).map(|_| rng.gen()).collect())
        .collect();
    let mut data = Vec::with_capacity(n * 32);
    for i in 0..n {
        let mut row = prototypes[i % clusters].clone();
        for _ in 0..3 {
            let byte = rng.gen_range(0..32);
            let bit = rng.gen_range(0..8);
            row[byte] ^= 1 << bit;
        }
        data.extend_from_slice(&row);
    }
    Descriptors::binary(n, 32, data).unwrap()
}

fn bench_quantise_frame(c: &mut Criterion) {
    let corpus = clustered_descriptors(3000, 16, 3);
    let build = VocabularyBuilder::new(BuildConfig::default())
        .build(&[&corpus], None)
        .unwrap();

    let mut group = c.benchmark_group("quantise_frame");
    for n in [100usize, 500].iter() {
        let frame = clustered_descriptors(*n, 16, 5);
        group.throughput(Throughput::Elements(*n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), n, |b, _| {
            b.iter(|| black_box(build.tree.quantise(&frame)));
        });
    }
    group.finish();
}

fn bench_build_small(c: &mut Criterion) {
    let corpus = clustered_descriptors(2000, 12, 9);
    c.bench_function("build_2k_descriptors", |b| {
        b.iter(|| {
            let out = VocabularyBuilder::new(BuildConfig::default())
                .build(&[&corpus], None)
                .unwrap();
            black_box(out.tree.vocab_size)
        });
    });
}

criterion_group!(benches, bench_quantise_frame, bench_build_small);
criterion_main!(benches);
