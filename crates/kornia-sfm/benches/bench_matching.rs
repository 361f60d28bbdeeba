use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use kornia_sfm::matching::{match_descriptors, MatcherConfig};
use kornia_sfm::regions::Descriptors;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_f32(rng: &mut StdRng, n: usize, dim: usize) -> Descriptors {
    Descriptors::F32 {
        dim: dim as u32,
        data: (0..n * dim).map(|_| rng.random::<f32>()).collect(),
    }
}

fn random_u8(rng: &mut StdRng, n: usize, dim: usize) -> Descriptors {
    Descriptors::U8 {
        dim: dim as u32,
        data: (0..n * dim).map(|_| rng.random::<u8>()).collect(),
    }
}

fn random_binary(rng: &mut StdRng, n: usize, bytes: usize) -> Descriptors {
    Descriptors::Binary {
        bytes: bytes as u32,
        data: (0..n * bytes).map(|_| rng.random::<u8>()).collect(),
    }
}

fn bench_match_descriptors(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0);
    let config = MatcherConfig::default();

    let mut group = c.benchmark_group("match_descriptors");
    for &n in &[100, 500, 1000] {
        let (d1, d2) = (random_f32(&mut rng, n, 128), random_f32(&mut rng, n, 128));
        group.bench_with_input(BenchmarkId::new("f32", n), &n, |b, _| {
            b.iter(|| std::hint::black_box(match_descriptors(&d1, &d2, &config)));
        });

        let (d1, d2) = (random_u8(&mut rng, n, 128), random_u8(&mut rng, n, 128));
        group.bench_with_input(BenchmarkId::new("u8", n), &n, |b, _| {
            b.iter(|| std::hint::black_box(match_descriptors(&d1, &d2, &config)));
        });

        let (d1, d2) = (random_binary(&mut rng, n, 32), random_binary(&mut rng, n, 32));
        group.bench_with_input(BenchmarkId::new("binary", n), &n, |b, _| {
            b.iter(|| std::hint::black_box(match_descriptors(&d1, &d2, &config)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_match_descriptors);
criterion_main!(benches);
