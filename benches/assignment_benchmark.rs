use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ndarray::Array2;
use rand::distributions::Standard;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rapport::{compatibility_matrix, optimal_matching};

fn random_latent(rows: usize, factors: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(0x5EED_A55 + seed);
    Array2::from_shape_fn((rows, factors), |_| rng.sample(Standard))
}

fn benchmark_assignment(c: &mut Criterion) {
    let sizes = [50_usize, 200, 500];
    let cohorts: Vec<_> = sizes
        .iter()
        .map(|&size| {
            let cohort_a = random_latent(size, 3, size as u64);
            let cohort_b = random_latent(size, 3, size as u64 + 1);
            (size, cohort_a, cohort_b)
        })
        .collect();

    let mut group = c.benchmark_group("assignment");
    for (size, cohort_a, cohort_b) in cohorts.iter() {
        group.throughput(Throughput::Elements((*size * *size) as u64));
        let scores = compatibility_matrix(cohort_a.view(), cohort_b.view())
            .expect("benchmark cohorts share a factor count");

        group.bench_with_input(
            BenchmarkId::new("compatibility_matrix", size),
            &(cohort_a, cohort_b),
            |b, (left, right)| {
                b.iter(|| {
                    let matrix = compatibility_matrix(black_box(left.view()), black_box(right.view()));
                    black_box(matrix)
                });
            },
        );

        group.bench_with_input(BenchmarkId::new("optimal_matching", size), &scores, |b, input| {
            b.iter(|| {
                let matches = optimal_matching(black_box(input.view()));
                black_box(matches)
            });
        });
    }
    group.finish();
}

criterion_group!(assignment, benchmark_assignment);
criterion_main!(assignment);
