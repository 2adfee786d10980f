use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use dropfit_core::{FitConfig, FitOptions, YoungLaplaceFit, YoungLaplaceShape};

fn make_profile(bond: f64, radius: f64, apex: [f64; 2], n_per_side: usize) -> Vec<[f64; 2]> {
    let mut shape = YoungLaplaceShape::new(bond, radius);
    let mut rng = StdRng::seed_from_u64(17);

    let mut profile = Vec::with_capacity(2 * n_per_side + 1);
    for i in -(n_per_side as i64)..=(n_per_side as i64) {
        let s = 2.8 * i as f64 / n_per_side as f64;
        let p = shape.evaluate(s);
        profile.push([
            apex[0] + p.r + rng.gen_range(-0.3..0.3),
            apex[1] + p.z + rng.gen_range(-0.3..0.3),
        ]);
    }
    profile
}

fn bench_shape_solve(c: &mut Criterion) {
    c.bench_function("shape_solve_bo0p25", |b| {
        b.iter(|| {
            let mut shape = YoungLaplaceShape::new(black_box(0.25), black_box(100.0));
            black_box(shape.evaluate(1.0).r)
        })
    });
}

fn bench_shape_evaluate(c: &mut Criterion) {
    let mut shape = YoungLaplaceShape::new(0.25, 100.0);
    // Warm the cache so only interpolation is timed.
    shape.evaluate(3.5);

    c.bench_function("shape_evaluate_1k", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            for i in 0..1000 {
                let s = -3.5 + 7.0 * i as f64 / 999.0;
                acc += shape.evaluate(black_box(s)).r;
            }
            black_box(acc)
        })
    });
}

fn bench_closest_point(c: &mut Criterion) {
    let mut shape = YoungLaplaceShape::new(0.25, 100.0);
    let points: Vec<[f64; 2]> = {
        let mut rng = StdRng::seed_from_u64(5);
        (0..500)
            .map(|i| {
                let s = 2.6 * (i as f64 / 499.0 * 2.0 - 1.0);
                let p = shape.evaluate(s);
                [p.r + rng.gen_range(-1.0..1.0), p.z + rng.gen_range(-1.0..1.0)]
            })
            .collect()
    };

    c.bench_function("closest_point_500pts", |b| {
        b.iter(|| {
            let mut seed = 0.1;
            let mut acc = 0.0;
            for &p in &points {
                let found = shape.closest(black_box(p), seed, 10, 1e-6);
                seed = found.arclength;
                acc += found.e_r;
            }
            black_box(acc)
        })
    });
}

fn bench_full_fit(c: &mut Criterion) {
    let profile = make_profile(0.25, 120.0, [400.0, 300.0], 200);

    c.bench_function("fit_401pts", |b| {
        b.iter(|| {
            let fit = YoungLaplaceFit::new(
                black_box(&profile),
                FitOptions {
                    config: FitConfig {
                        max_steps: 50,
                        ..FitConfig::default()
                    },
                    ..FitOptions::default()
                },
            );
            black_box(fit.bond_number())
        })
    });
}

criterion_group!(
    hotpaths,
    bench_shape_solve,
    bench_shape_evaluate,
    bench_closest_point,
    bench_full_fit
);
criterion_main!(hotpaths);
