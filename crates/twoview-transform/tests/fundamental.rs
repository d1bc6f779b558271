use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use twoview_linalg::linalg::mat3_from_rows;
use twoview_linalg::svd::svd3;
use twoview_linalg::{Mat3F64, Vec2F64, Vec3F64};
use twoview_transform::solvers::fundamental::fundamental_7point;
use twoview_transform::{
    FundamentalMatrix, FundamentalMethod, FundamentalParams, MleOutcome, Observer,
    TransformError, TransformationMatrix,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Synthetic stereo pair: calibrated cameras looking at a non-planar point cloud.
fn stereo_pair(n: usize) -> (Vec<Vec2F64>, Vec<Vec2F64>) {
    let k = mat3_from_rows([[800.0, 0.0, 320.0], [0.0, 800.0, 240.0], [0.0, 0.0, 1.0]]);
    let r = Mat3F64::from_rotation_y(0.08) * Mat3F64::from_rotation_x(-0.04);
    let t = Vec3F64::new(-1.0, 0.1, 0.05);
    (0..n)
        .map(|i| {
            let xw = Vec3F64::new(
                ((i * 7) % 11) as f64 * 0.3 - 1.5,
                ((i * 5) % 7) as f64 * 0.3 - 0.9,
                4.0 + ((i * 3) % 5) as f64 * 0.6 + 0.15 * (i % 2) as f64,
            );
            let a = k * xw;
            let b = k * (r * xw + t);
            (
                Vec2F64::new(a.x / a.z, a.y / a.z),
                Vec2F64::new(b.x / b.z, b.y / b.z),
            )
        })
        .unzip()
}

fn with_outliers(n: usize, every: usize) -> (Vec<Vec2F64>, Vec<Vec2F64>) {
    let (x1, mut x2) = stereo_pair(n);
    for p in x2.iter_mut().step_by(every) {
        p.y += 60.0;
    }
    (x1, x2)
}

#[test]
fn eight_point_is_rank_two_and_exact() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let (x1, x2) = stereo_pair(20);
    let (f, summary) = FundamentalMatrix::estimate(
        &x1,
        &x2,
        FundamentalMethod::EightPoint,
        &FundamentalParams::default(),
    )?;
    assert_eq!(summary.inlier_count, 20);
    assert!(matches!(summary.refinement, MleOutcome::NotRequested));

    let s = *svd3(f.matrix()).s();
    assert!(s.z < 1e-9 * s.x);
    assert_eq!(f.rank(), 2);
    assert!(f.determinant().abs() < 1e-9);

    assert_eq!(f.error().len(), 20);
    for &d in f.error() {
        assert!((0.0..1e-6).contains(&d), "{d}");
    }

    let (e1, e2) = f.epipoles();
    assert!((*f.matrix() * e1).length() < 1e-9);
    assert!((f.matrix().transpose() * e2).length() < 1e-9);
    Ok(())
}

#[test]
fn normal_on_seven_points_with_unique_solution() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    // correspondences 10..17 give a 7-point cubic with a single real root
    let (x1, x2) = stereo_pair(17);
    let (x1, x2) = (&x1[10..], &x2[10..]);
    assert_eq!(fundamental_7point(x1, x2)?.len(), 1);

    let mut f = FundamentalMatrix::new(Mat3F64::ZERO, 7);
    let summary = f.compute(x1, x2, FundamentalMethod::Normal, &FundamentalParams::default())?;
    assert_eq!(summary.inlier_count, 7);
    assert_eq!(f.history_len(), 2);
    assert_eq!(f.rank(), 2);
    assert_eq!(f.error().len(), 7);
    for &d in f.error() {
        assert!(d <= 1e-6, "{d}");
    }
    Ok(())
}

#[test]
fn normal_on_seven_points_with_three_solutions() {
    init_logger();
    // correspondences 17..24 give a 7-point cubic with three real roots
    let (x1, x2) = stereo_pair(24);
    let (x1, x2) = (&x1[17..], &x2[17..]);
    let mut f = FundamentalMatrix::new(Mat3F64::IDENTITY, 7);
    match f.compute(x1, x2, FundamentalMethod::Normal, &FundamentalParams::default()) {
        Err(TransformError::AmbiguousEstimate { candidates }) => {
            assert_eq!(candidates.len(), 3);
            for c in candidates {
                let g = FundamentalMatrix::new(c, 7);
                for d in g.compute_error(x1, x2, None) {
                    assert!(d <= 1e-6, "{d}");
                }
            }
        }
        other => panic!("expected an ambiguous estimate, got {other:?}"),
    }
    // nothing committed
    assert_eq!(f.history_len(), 1);
    assert_eq!(*f.matrix(), Mat3F64::IDENTITY);
}

#[test]
fn robust_methods_reject_outliers() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let (x1, x2) = with_outliers(40, 5);
    for method in [
        FundamentalMethod::Ransac,
        FundamentalMethod::Lmeds,
        FundamentalMethod::Mle,
    ] {
        let (f, summary) =
            FundamentalMatrix::estimate(&x1, &x2, method, &FundamentalParams::default())?;
        assert_eq!(summary.inlier_count, 32, "{method}");
        for (i, &inlier) in f.mask().iter().enumerate() {
            assert_eq!(inlier, i % 5 != 0, "{method} index {i}");
        }
        // error covers the inliers only
        assert_eq!(f.error().len(), 32);
        assert!(f.describe_error().max < 1e-3, "{method}");
    }
    Ok(())
}

#[test]
fn mle_refines_with_enough_inliers() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let (x1, x2) = stereo_pair(20);
    let (f, summary) =
        FundamentalMatrix::estimate(&x1, &x2, FundamentalMethod::Mle, &FundamentalParams::default())?;
    match summary.refinement {
        MleOutcome::Refined { cost, .. } => assert!(cost < 1e-6, "{cost}"),
        other => panic!("expected refinement, got {other:?}"),
    }
    assert_eq!(f.rank(), 2);
    assert!(f.describe_error().max < 1e-4);
    Ok(())
}

#[test]
fn mle_falls_back_with_eight_inliers() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let (x1, x2) = stereo_pair(8);
    let (f, summary) =
        FundamentalMatrix::estimate(&x1, &x2, FundamentalMethod::Mle, &FundamentalParams::default())?;
    assert!(matches!(
        summary.refinement,
        MleOutcome::Fallback(TransformError::InsufficientCorrespondences {
            required: 9,
            actual: 8
        })
    ));
    // the linear estimate is still committed
    assert_eq!(f.history_len(), 1);
    assert_eq!(
        f.snapshot(0).map(|s| s.matrix),
        Some(*f.matrix())
    );
    assert_eq!(f.rank(), 2);
    assert!(f.describe_error().max < 1e-6);
    Ok(())
}

#[test]
fn invalid_input_is_rejected_without_side_effects() {
    init_logger();
    let (x1, x2) = stereo_pair(12);
    let mut f = FundamentalMatrix::new(Mat3F64::IDENTITY, 12);
    let params = FundamentalParams::default();

    let res = f.compute(&x1, &x2[..10], FundamentalMethod::EightPoint, &params);
    assert!(matches!(res, Err(TransformError::MismatchedLengths { .. })));

    let res = f.compute(&x1[..7], &x2[..7], FundamentalMethod::Lmeds, &params);
    assert!(matches!(
        res,
        Err(TransformError::InsufficientCorrespondences {
            required: 8,
            actual: 7
        })
    ));

    let res = f.compute(
        &x1,
        &x2,
        FundamentalMethod::Ransac,
        &params.clone().with_confidence(1.5),
    );
    assert!(matches!(
        res,
        Err(TransformError::InvalidParameter {
            name: "confidence",
            ..
        })
    ));

    assert_eq!(f.history_len(), 1);
    assert_eq!(*f.matrix(), Mat3F64::IDENTITY);
}

#[test]
fn refine_matches_is_monotonic() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let (x1, mut x2) = stereo_pair(30);
    // graded perturbations so that thresholds separate the points
    for (i, p) in x2.iter_mut().enumerate().skip(20) {
        p.y += (i - 19) as f64;
    }
    let params = FundamentalParams::default().with_reproj_threshold(0.5);
    let (mut f, summary) =
        FundamentalMatrix::estimate(&x1, &x2, FundamentalMethod::Ransac, &params)?;
    assert_eq!(summary.inlier_count, 20);

    let mut previous = usize::MAX;
    let mut previous_mask = vec![true; 30];
    for threshold in [100.0, 8.0, 4.0, 1.0, 1e-3] {
        let count = f.refine_matches(threshold);
        assert!(count <= previous);
        for (now, before) in f.mask().iter().zip(&previous_mask) {
            assert!(!now || *before);
        }
        previous = count;
        previous_mask = f.mask().to_vec();
    }
    assert_eq!(previous, 20);
    Ok(())
}

#[test]
fn refine_matches_readmits_rejected_points() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let (x1, mut x2) = stereo_pair(30);
    for (i, p) in x2.iter_mut().enumerate().skip(20) {
        p.y += (i - 19) as f64;
    }
    let params = FundamentalParams::default().with_reproj_threshold(0.5);
    let (mut f, _) = FundamentalMatrix::estimate(&x1, &x2, FundamentalMethod::Ransac, &params)?;

    assert_eq!(f.refine_matches(1e-3), 20);
    let strict = f.mask().to_vec();
    assert!(strict.iter().skip(20).all(|&m| !m));

    // the error is recomputed over every correspondence, not only the inliers
    assert_eq!(f.refine_matches(100.0), 30);
    let loose = f.mask().to_vec();
    for (now, before) in loose.iter().zip(&strict) {
        assert!(*now || !before);
    }
    assert!(loose.iter().all(|&m| m));
    assert_eq!(f.error().len(), 30);
    Ok(())
}

#[test]
fn observers_see_every_commit() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let (x1, x2) = stereo_pair(20);
    let mut f = FundamentalMatrix::new(Mat3F64::ZERO, 20);

    let calls = Arc::new(AtomicUsize::new(0));
    let inliers = Arc::new(AtomicUsize::new(0));
    let (c, n) = (calls.clone(), inliers.clone());
    let observer: Observer<FundamentalMatrix> = Arc::new(move |f: &FundamentalMatrix| {
        c.fetch_add(1, Ordering::SeqCst);
        n.store(f.mask().iter().filter(|&&m| m).count(), Ordering::SeqCst);
    });
    assert!(f.subscribe(observer.clone()));
    assert!(!f.subscribe(observer));

    f.compute(&x1, &x2, FundamentalMethod::EightPoint, &FundamentalParams::default())?;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(inliers.load(Ordering::SeqCst), 20);

    f.refine_matches(0.0);
    f.rollback(1);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(inliers.load(Ordering::SeqCst), 20);

    // a failed compute notifies nobody
    let _ = f.compute(&x1[..3], &x2[..3], FundamentalMethod::EightPoint, &FundamentalParams::default());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    Ok(())
}
