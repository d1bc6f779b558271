use serde::{Deserialize, Serialize};
use twoview_linalg::linalg::{mat3_from_rows, normalize_frobenius};
use twoview_linalg::svd::{smallest_right_singular_vectors, svd3};
use twoview_linalg::{Mat3F64, Vec2F64, Vec3F64};

use super::ransac::{lmeds, ransac, Estimator};
use super::{check_count, check_lengths, normalize_points_2d, RansacParams, RobustEstimate};
use crate::error::TransformError;

/// Solver used by [`find_fundamental`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundamentalSolver {
    /// 7-point solver on all correspondences (`n >= 7`).
    SevenPoint,
    /// Normalized 8-point least squares on all correspondences (`n >= 8`).
    EightPoint,
    /// RANSAC over 7-point samples (`n >= 8`).
    Ransac,
    /// Least median of squares over 7-point samples (`n >= 8`).
    Lmeds,
}

impl FundamentalSolver {
    /// Minimum number of correspondences the solver accepts.
    pub fn min_correspondences(self) -> usize {
        match self {
            FundamentalSolver::SevenPoint => 7,
            _ => 8,
        }
    }
}

/// Estimate the fundamental matrix using the normalized 8-point algorithm.
///
/// - `x1`: points in image 1 (length >= 8)
/// - `x2`: corresponding points in image 2 (same length)
///
/// The result satisfies `x2ᵀ F x1 = 0`, has rank 2 and unit Frobenius norm.
pub fn fundamental_8point(x1: &[Vec2F64], x2: &[Vec2F64]) -> Result<Mat3F64, TransformError> {
    check_lengths(x1, x2)?;
    check_count(x1.len(), 8)?;

    // Normalize points with similarity transforms T1, T2 to have zero mean and avg sqrt(2) distance
    let (x1n, t1) = normalize_points_2d(x1);
    let (x2n, t2) = normalize_points_2d(x2);

    // Solve Af = 0 via SVD: take the right singular vector of the smallest singular value
    let a = design_matrix(&x1n, &x2n);
    let f = smallest_right_singular_vectors(&a, 1)
        .first()
        .map(|v| mat3_from_vec9(v))
        .ok_or_else(|| TransformError::DegenerateInput("empty design matrix".to_string()))?;

    // Denormalize: F = T2^T * F * T1
    let f = t2.transpose() * project_to_rank2(&f) * t1;
    finish(f)
}

/// Estimate the fundamental matrix with the 7-point algorithm.
///
/// The two right singular vectors of the smallest singular values span a pencil
/// `F(λ) = F₂ + λ·F₁`; `det F(λ) = 0` is a cubic with one or three real roots,
/// each giving a candidate. With more than seven points the pencil is the
/// least-squares one.
pub fn fundamental_7point(
    x1: &[Vec2F64],
    x2: &[Vec2F64],
) -> Result<Vec<Mat3F64>, TransformError> {
    check_lengths(x1, x2)?;
    check_count(x1.len(), 7)?;

    let (x1n, t1) = normalize_points_2d(x1);
    let (x2n, t2) = normalize_points_2d(x2);

    let a = design_matrix(&x1n, &x2n);
    let null = smallest_right_singular_vectors(&a, 2);
    let (Some(v2), Some(v1)) = (null.first(), null.get(1)) else {
        return Err(TransformError::DegenerateInput(
            "design matrix has no two-dimensional null space".to_string(),
        ));
    };
    let f1 = mat3_from_vec9(v1);
    let f2 = mat3_from_vec9(v2);

    // det(F2 + λ F1) = a λ³ + b λ² + c λ + d, recovered from four evaluations
    let g = |lambda: f64| (f2 + f1 * lambda).determinant();
    let d = g(0.0);
    let (gp1, gm1, gp2) = (g(1.0), g(-1.0), g(2.0));
    let b = 0.5 * (gp1 + gm1) - d;
    let odd = 0.5 * (gp1 - gm1);
    let a3 = (gp2 - 4.0 * b - d - 2.0 * odd) / 6.0;
    let c = odd - a3;

    let scale = a3.abs().max(b.abs()).max(c.abs()).max(d.abs());
    let mut raw: Vec<Mat3F64> = solve_cubic_real(a3, b, c, d)
        .into_iter()
        .map(|lambda| f2 + f1 * lambda)
        .collect();
    // a vanishing cubic term puts one root at infinity, i.e. F1 itself
    if a3.abs() <= 1e-12 * scale {
        raw.push(f1);
    }

    let candidates = raw
        .iter()
        .filter_map(|f| finish(t2.transpose() * project_to_rank2(f) * t1).ok())
        .collect::<Vec<_>>();
    if candidates.is_empty() {
        return Err(TransformError::DegenerateInput(
            "7-point cubic has no real root".to_string(),
        ));
    }
    Ok(candidates)
}

/// Squared epipolar distance of a correspondence, the larger of the two images.
///
/// The distance of `x2` to the line `F·x1` and of `x1` to the line `Fᵀ·x2`.
pub fn epipolar_residual(f: &Mat3F64, x1: &Vec2F64, x2: &Vec2F64) -> f64 {
    let a = Vec3F64::new(x1.x, x1.y, 1.0);
    let b = Vec3F64::new(x2.x, x2.y, 1.0);
    let l2 = *f * a;
    let l1 = f.transpose() * b;
    let n2 = l2.x * l2.x + l2.y * l2.y;
    let n1 = l1.x * l1.x + l1.y * l1.y;
    // degenerate epipolar line in either image
    if n1 == 0.0 || n2 == 0.0 {
        return f64::INFINITY;
    }
    let v = b.dot(l2);
    let v2 = v * v;
    (v2 / n1).max(v2 / n2)
}

/// Estimate a fundamental matrix and its inlier mask.
///
/// Direct solvers label every correspondence as inlier. With exactly seven
/// points and several real solutions the 7-point solver fails with
/// [`TransformError::AmbiguousEstimate`]; with more points the candidate with
/// the lowest total residual wins.
pub fn find_fundamental(
    x1: &[Vec2F64],
    x2: &[Vec2F64],
    solver: FundamentalSolver,
    params: &RansacParams,
) -> Result<RobustEstimate, TransformError> {
    params.validate()?;
    check_lengths(x1, x2)?;
    let n = x1.len();
    check_count(n, solver.min_correspondences())?;

    match solver {
        FundamentalSolver::SevenPoint => {
            let mut candidates = fundamental_7point(x1, x2)?;
            let matrix = if candidates.len() == 1 {
                candidates.remove(0)
            } else if n == 7 {
                log::warn!(
                    "7-point solver found {} solutions for 7 correspondences",
                    candidates.len()
                );
                return Err(TransformError::AmbiguousEstimate { candidates });
            } else {
                select_by_residual(candidates, x1, x2)?
            };
            Ok(RobustEstimate {
                matrix,
                mask: Some(vec![true; n]),
            })
        }
        FundamentalSolver::EightPoint => Ok(RobustEstimate {
            matrix: fundamental_8point(x1, x2)?,
            mask: Some(vec![true; n]),
        }),
        FundamentalSolver::Ransac => ransac::<SevenPoint>(x1, x2, params)
            .map(|c| RobustEstimate {
                matrix: c.model,
                mask: Some(c.mask),
            })
            .ok_or_else(|| {
                TransformError::DegenerateInput("RANSAC found no consensus model".to_string())
            }),
        FundamentalSolver::Lmeds => lmeds::<SevenPoint>(x1, x2, params)
            .map(|c| RobustEstimate {
                matrix: c.model,
                mask: Some(c.mask),
            })
            .ok_or_else(|| {
                TransformError::DegenerateInput("LMedS found no consensus model".to_string())
            }),
    }
}

struct SevenPoint;

impl Estimator for SevenPoint {
    const SAMPLE_SIZE: usize = 7;

    fn fit(x1: &[Vec2F64], x2: &[Vec2F64]) -> Vec<Mat3F64> {
        fundamental_7point(x1, x2).unwrap_or_default()
    }

    fn refit(x1: &[Vec2F64], x2: &[Vec2F64]) -> Option<Mat3F64> {
        fundamental_8point(x1, x2).ok()
    }

    fn residual(model: &Mat3F64, x1: &Vec2F64, x2: &Vec2F64) -> f64 {
        epipolar_residual(model, x1, x2)
    }
}

fn select_by_residual(
    candidates: Vec<Mat3F64>,
    x1: &[Vec2F64],
    x2: &[Vec2F64],
) -> Result<Mat3F64, TransformError> {
    let total = |f: &Mat3F64| -> f64 {
        x1.iter()
            .zip(x2)
            .map(|(a, b)| epipolar_residual(f, a, b))
            .sum()
    };
    candidates
        .into_iter()
        .map(|f| (total(&f), f))
        .filter(|(cost, _)| !cost.is_nan())
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, f)| f)
        .ok_or_else(|| TransformError::DegenerateInput("no finite 7-point candidate".to_string()))
}

// Build design matrix A (N x 9) for x2' * F * x1 = 0
fn design_matrix(x1: &[Vec2F64], x2: &[Vec2F64]) -> faer::Mat<f64> {
    let n = x1.len();
    let mut a = faer::Mat::<f64>::zeros(n, 9);
    for (i, (p, q)) in x1.iter().zip(x2).enumerate() {
        let row = [
            q.x * p.x,
            q.x * p.y,
            q.x,
            q.y * p.x,
            q.y * p.y,
            q.y,
            p.x,
            p.y,
            1.0,
        ];
        for (j, v) in row.into_iter().enumerate() {
            a.write(i, j, v);
        }
    }
    a
}

fn mat3_from_vec9(v: &[f64]) -> Mat3F64 {
    mat3_from_rows([[v[0], v[1], v[2]], [v[3], v[4], v[5]], [v[6], v[7], v[8]]])
}

// zero the smallest singular value
fn project_to_rank2(f: &Mat3F64) -> Mat3F64 {
    let svd = svd3(f);
    let s = *svd.s();
    svd.recompose(Vec3F64::new(s.x, s.y, 0.0))
}

fn finish(f: Mat3F64) -> Result<Mat3F64, TransformError> {
    let f = normalize_frobenius(&f);
    if !f.is_finite() || f.abs_diff_eq(Mat3F64::ZERO, f64::EPSILON) {
        return Err(TransformError::DegenerateInput(
            "fundamental matrix vanished".to_string(),
        ));
    }
    Ok(f)
}

/// Real roots of `a x³ + b x² + c x + d`, degrading to lower degrees when the
/// leading coefficients vanish.
pub(crate) fn solve_cubic_real(a: f64, b: f64, c: f64, d: f64) -> Vec<f64> {
    let scale = a.abs().max(b.abs()).max(c.abs()).max(d.abs());
    if scale == 0.0 || !scale.is_finite() {
        return Vec::new();
    }
    let eps = 1e-12 * scale;
    if a.abs() <= eps {
        return solve_quadratic_real(b, c, d, eps);
    }

    let (b, c, d) = (b / a, c / a, d / a);
    // depressed cubic t³ + p t + q = 0 with x = t - b/3
    let p = c - b * b / 3.0;
    let q = 2.0 * b * b * b / 27.0 - b * c / 3.0 + d;
    let shift = -b / 3.0;
    let disc = (q / 2.0).powi(2) + (p / 3.0).powi(3);

    let mut roots = if disc > 0.0 {
        let sq = disc.sqrt();
        vec![(-q / 2.0 + sq).cbrt() + (-q / 2.0 - sq).cbrt() + shift]
    } else if p == 0.0 {
        vec![shift]
    } else {
        let r = 2.0 * (-p / 3.0).sqrt();
        let arg = (3.0 * q / (2.0 * p) * (-3.0 / p).sqrt()).clamp(-1.0, 1.0);
        let phi = arg.acos() / 3.0;
        (0..3)
            .map(|k| r * (phi - 2.0 * std::f64::consts::PI * k as f64 / 3.0).cos() + shift)
            .collect()
    };

    // Newton polish on the monic polynomial
    for x in roots.iter_mut() {
        for _ in 0..2 {
            let fx = ((*x + b) * *x + c) * *x + d;
            let dfx = (3.0 * *x + 2.0 * b) * *x + c;
            if dfx != 0.0 {
                *x -= fx / dfx;
            }
        }
    }

    roots.sort_by(f64::total_cmp);
    roots.dedup_by(|x, y| (*x - *y).abs() <= 1e-10 * (1.0 + y.abs()));
    roots
}

fn solve_quadratic_real(a: f64, b: f64, c: f64, eps: f64) -> Vec<f64> {
    if a.abs() <= eps {
        if b.abs() <= eps {
            return Vec::new();
        }
        return vec![-c / b];
    }
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return Vec::new();
    }
    let q = -0.5 * (b + b.signum() * disc.sqrt());
    if q == 0.0 {
        return vec![0.0];
    }
    let mut roots = vec![q / a, c / q];
    roots.sort_by(f64::total_cmp);
    roots.dedup();
    roots
}
