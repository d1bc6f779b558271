use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use twoview_linalg::linalg::mat3_from_rows;
use twoview_linalg::{Mat3F64, Vec2F64, Vec3F64};
use twoview_transform::solvers::fundamental::{fundamental_7point, fundamental_8point};
use twoview_transform::solvers::{
    find_fundamental, find_homography, FundamentalSolver, HomographySolver, RansacParams,
};
use twoview_transform::{
    FundamentalMatrix, FundamentalMethod, FundamentalParams, TransformationMatrix,
};

/// Generate a synthetic stereo pair, shifting every tenth point off its epipolar line.
fn generate_stereo_data(n: usize) -> (Vec<Vec2F64>, Vec<Vec2F64>) {
    let k = mat3_from_rows([[800.0, 0.0, 320.0], [0.0, 800.0, 240.0], [0.0, 0.0, 1.0]]);
    let r = Mat3F64::from_rotation_y(0.08) * Mat3F64::from_rotation_x(-0.04);
    let t = Vec3F64::new(-1.0, 0.1, 0.05);
    let mut x1 = Vec::with_capacity(n);
    let mut x2 = Vec::with_capacity(n);
    for i in 0..n {
        let xw = Vec3F64::new(
            ((i * 7) % 11) as f64 * 0.3 - 1.5,
            ((i * 5) % 7) as f64 * 0.3 - 0.9,
            4.0 + ((i * 3) % 5) as f64 * 0.6 + 0.15 * (i % 2) as f64,
        );
        let a = k * xw;
        let b = k * (r * xw + t);
        let outlier = if i % 10 == 0 { 40.0 } else { 0.0 };
        x1.push(Vec2F64::new(a.x / a.z, a.y / a.z));
        x2.push(Vec2F64::new(b.x / b.z, b.y / b.z + outlier));
    }
    (x1, x2)
}

/// Generate synthetic point correspondences satisfying a homography.
fn generate_homography_data(n: usize) -> (Vec<Vec2F64>, Vec<Vec2F64>) {
    let h_true = Mat3F64::from_cols(
        Vec3F64::new(1.2, 0.0, 0.001),
        Vec3F64::new(0.1, 0.9, 0.002),
        Vec3F64::new(5.0, -3.0, 1.0),
    );
    let mut x1 = Vec::with_capacity(n);
    let mut x2 = Vec::with_capacity(n);
    let side = (n as f64).sqrt().ceil() as usize;
    for i in 0..n {
        let xi = (i % side) as f64 * 2.0 - (side as f64);
        let yi = (i / side) as f64 * 1.5 - (side as f64 / 2.0);
        let hp = h_true * Vec3F64::new(xi, yi, 1.0);
        x1.push(Vec2F64::new(xi, yi));
        x2.push(Vec2F64::new(hp.x / hp.z, hp.y / hp.z));
    }
    (x1, x2)
}

fn bench_fundamental_8point(c: &mut Criterion) {
    let mut group = c.benchmark_group("fundamental_8point");
    for &n in &[8, 50, 200] {
        let (x1, x2) = generate_stereo_data(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let _ = std::hint::black_box(fundamental_8point(&x1, &x2));
            });
        });
    }
    group.finish();
}

fn bench_fundamental_7point(c: &mut Criterion) {
    let (x1, x2) = generate_stereo_data(8);
    c.bench_function("fundamental_7point", |b| {
        b.iter(|| {
            let _ = std::hint::black_box(fundamental_7point(&x1[1..], &x2[1..]));
        });
    });
}

fn bench_robust_fundamental(c: &mut Criterion) {
    let mut group = c.benchmark_group("robust_fundamental");
    let params = RansacParams::default().with_max_iterations(500);
    for &n in &[50, 200, 500] {
        let (x1, x2) = generate_stereo_data(n);
        for solver in [FundamentalSolver::Ransac, FundamentalSolver::Lmeds] {
            group.bench_with_input(
                BenchmarkId::new(format!("{solver:?}"), n),
                &n,
                |b, _| {
                    b.iter(|| {
                        let _ = std::hint::black_box(find_fundamental(&x1, &x2, solver, &params));
                    });
                },
            );
        }
    }
    group.finish();
}

fn bench_ransac_homography(c: &mut Criterion) {
    let mut group = c.benchmark_group("ransac_homography");
    let params = RansacParams::default().with_max_iterations(500).with_threshold(1e-3);
    for &n in &[25, 100, 500] {
        let (x1, x2) = generate_homography_data(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let _ = std::hint::black_box(find_homography(
                    &x1,
                    &x2,
                    HomographySolver::Ransac,
                    &params,
                ));
            });
        });
    }
    group.finish();
}

fn bench_mle_pipeline(c: &mut Criterion) {
    let (x1, x2) = generate_stereo_data(60);
    let params = FundamentalParams::default();
    c.bench_function("fundamental_mle_pipeline", |b| {
        b.iter(|| {
            let _ = std::hint::black_box(FundamentalMatrix::estimate(
                &x1,
                &x2,
                FundamentalMethod::Mle,
                &params,
            ));
        });
    });
}

fn bench_refine_matches(c: &mut Criterion) {
    let (x1, x2) = generate_stereo_data(500);
    let params = FundamentalParams::default();
    let Ok((mut f, _)) = FundamentalMatrix::estimate(&x1, &x2, FundamentalMethod::Ransac, &params)
    else {
        return;
    };
    c.bench_function("refine_matches", |b| {
        b.iter(|| {
            f.refine_matches(std::hint::black_box(1.0));
            std::hint::black_box(f.describe_error());
        });
    });
}

criterion_group!(
    benches,
    bench_fundamental_8point,
    bench_fundamental_7point,
    bench_robust_fundamental,
    bench_ransac_homography,
    bench_mle_pipeline,
    bench_refine_matches,
);
criterion_main!(benches);
