use approx::assert_abs_diff_eq;
use ndarray::{Array2, Axis, array, concatenate, s};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rapport::assign::total_score;
use rapport::{FactorModel, StandardizationParams, compatibility_matrix, optimal_matching};
use std::collections::HashSet;

fn latent_cohorts(n: usize, m: usize, seed: u64) -> (Array2<f64>, Array2<f64>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let raw = Array2::from_shape_fn((n + m, 6), |(_, col)| {
        rng.gen_range(-2.0..2.0) + if col < 3 { 0.0 } else { 1.0 }
    });
    // Correlate the second half of the columns with the first.
    let mut correlated = raw.clone();
    for row in 0..n + m {
        for col in 3..6 {
            correlated[[row, col]] += 0.8 * raw[[row, col - 3]];
        }
    }

    let cohort_a = correlated.slice(s![..n, ..]).to_owned();
    let cohort_b = correlated.slice(s![n.., ..]).to_owned();
    let params = StandardizationParams::fit(cohort_a.view()).unwrap();
    let scaled_a = params.transform(cohort_a.view()).unwrap();
    let scaled_b = params.transform(cohort_b.view()).unwrap();
    let pooled = concatenate(Axis(0), &[scaled_a.view(), scaled_b.view()]).unwrap();
    let model = FactorModel::fit(pooled.view(), 2).unwrap();
    (
        model.transform(scaled_a.view()).unwrap(),
        model.transform(scaled_b.view()).unwrap(),
    )
}

#[test]
fn identical_respondents_across_cohorts_pair_up_with_a_perfect_score() {
    let cohort_a = array![[0.3, -1.2], [2.0, 2.0], [-1.0, 0.5]];
    let cohort_b = array![[5.0, 5.0], [0.3, -1.2]];

    let scores = compatibility_matrix(cohort_a.view(), cohort_b.view()).unwrap();
    assert_eq!(scores.dim(), (3, 2));
    assert_eq!(scores[[0, 1]], 1.0);

    let matches = optimal_matching(scores.view()).unwrap();
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].cohort_a, 0);
    assert_eq!(matches[0].cohort_b, 1);
    assert_eq!(matches[0].score, 1.0);
    assert_eq!(matches[1].cohort_b, 0);
}

#[test]
fn fitted_latent_scores_produce_a_valid_assignment() {
    let (latent_a, latent_b) = latent_cohorts(30, 22, 5);
    assert_eq!(latent_a.ncols(), 2);

    let scores = compatibility_matrix(latent_a.view(), latent_b.view()).unwrap();
    assert_eq!(scores.dim(), (30, 22));
    assert!(scores.iter().all(|&s| s > 0.0 && s <= 1.0));

    let matches = optimal_matching(scores.view()).unwrap();
    assert_eq!(matches.len(), 22);
    let used_a: HashSet<usize> = matches.iter().map(|pair| pair.cohort_a).collect();
    let used_b: HashSet<usize> = matches.iter().map(|pair| pair.cohort_b).collect();
    assert_eq!(used_a.len(), 22);
    assert_eq!(used_b.len(), 22);
    for pair in matches.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    for pair in &matches {
        assert_eq!(pair.score, scores[[pair.cohort_a, pair.cohort_b]]);
    }
}

#[test]
fn optimal_total_is_at_least_the_greedy_total() {
    let (latent_a, latent_b) = latent_cohorts(15, 15, 8);
    let scores = compatibility_matrix(latent_a.view(), latent_b.view()).unwrap();
    let matches = optimal_matching(scores.view()).unwrap();

    let mut taken_a = HashSet::new();
    let mut taken_b = HashSet::new();
    let mut cells: Vec<(usize, usize, f64)> = scores
        .indexed_iter()
        .map(|((a, b), &score)| (a, b, score))
        .collect();
    cells.sort_by(|x, y| y.2.total_cmp(&x.2));
    let mut greedy = 0.0;
    for (a, b, score) in cells {
        if !taken_a.contains(&a) && !taken_b.contains(&b) {
            taken_a.insert(a);
            taken_b.insert(b);
            greedy += score;
        }
    }

    assert!(total_score(&matches) >= greedy - 1e-12);
}

#[test]
fn the_same_input_always_yields_the_same_matches() {
    let (latent_a, latent_b) = latent_cohorts(12, 18, 21);
    let scores = compatibility_matrix(latent_a.view(), latent_b.view()).unwrap();
    let first = optimal_matching(scores.view()).unwrap();
    for _ in 0..3 {
        let again = optimal_matching(scores.view()).unwrap();
        assert_eq!(first, again);
    }
}

#[test]
fn transforming_twice_gives_identical_latent_scores() {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let raw = Array2::from_shape_fn((40, 5), |(row, col)| {
        (row as f64 * 0.21).cos() * (col as f64 + 1.0) + rng.gen_range(-0.5..0.5)
    });
    let scaled = StandardizationParams::fit(raw.view())
        .unwrap()
        .transform(raw.view())
        .unwrap();
    let model = FactorModel::fit(scaled.view(), 2).unwrap();

    let first = model.transform(scaled.view()).unwrap();
    let second = model.transform(scaled.view()).unwrap();
    assert_eq!(first.dim(), (40, 2));
    for (x, y) in first.iter().zip(second.iter()) {
        assert_abs_diff_eq!(x, y, epsilon = 0.0);
    }
}
