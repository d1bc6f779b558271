use serde::{Deserialize, Serialize};
use twoview_linalg::linalg::{mat3_from_rows, matrix_rank, normalize_frobenius};
use twoview_linalg::svd::smallest_right_singular_vectors;
use twoview_linalg::{Mat3F64, Vec2F64, Vec3F64};

use super::ransac::{lmeds, ransac, Estimator};
use super::{check_count, check_lengths, normalize_points_2d, RansacParams, RobustEstimate};
use crate::error::TransformError;

/// Solver used by [`find_homography`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HomographySolver {
    /// Normalized DLT least squares on all correspondences.
    LeastSquares,
    /// RANSAC over 4-point samples.
    Ransac,
    /// Least median of squares over 4-point samples.
    Lmeds,
}

/// Compute the homography matrix from four 2d point correspondences.
///
/// * `x1` - The source 2d points.
/// * `x2` - The destination 2d points.
///
/// Returns the homography from src to dst, scaled so that `h22 = 1` when possible.
pub fn homography_4pt2d(
    x1: &[Vec2F64; 4],
    x2: &[Vec2F64; 4],
) -> Result<Mat3F64, TransformError> {
    // solve -> h: 8x9 and take the smallest singular value
    let h = solve_dlt(&dlt_matrix(x1, x2))?;
    finish(h)
}

/// Normalized direct linear transform over `n >= 4` correspondences.
pub fn homography_dlt(x1: &[Vec2F64], x2: &[Vec2F64]) -> Result<Mat3F64, TransformError> {
    check_lengths(x1, x2)?;
    check_count(x1.len(), 4)?;

    let (x1n, t1) = normalize_points_2d(x1);
    let (x2n, t2) = normalize_points_2d(x2);
    let hn = solve_dlt(&dlt_matrix(&x1n, &x2n))?;

    // H = T2^-1 * Hn * T1
    finish(t2.inverse() * hn * t1)
}

/// Squared reprojection error `‖x2 − π(H·x1)‖²`; `+inf` when `x1` maps to infinity.
pub fn homography_reproj_error(h: &Mat3F64, x1: &Vec2F64, x2: &Vec2F64) -> f64 {
    let x1h = Vec3F64::new(x1.x, x1.y, 1.0);
    let hx = *h * x1h;
    if hx.z.abs() < 1e-12 {
        return f64::INFINITY;
    }
    let u = hx.x / hx.z;
    let v = hx.y / hx.z;
    let dx = u - x2.x;
    let dy = v - x2.y;
    dx * dx + dy * dy
}

/// Estimate a homography and its inlier mask.
///
/// The least-squares solver labels every correspondence as inlier.
pub fn find_homography(
    x1: &[Vec2F64],
    x2: &[Vec2F64],
    solver: HomographySolver,
    params: &RansacParams,
) -> Result<RobustEstimate, TransformError> {
    params.validate()?;
    check_lengths(x1, x2)?;
    let n = x1.len();
    check_count(n, FourPoint::SAMPLE_SIZE)?;

    let consensus = match solver {
        HomographySolver::LeastSquares => {
            return Ok(RobustEstimate {
                matrix: homography_dlt(x1, x2)?,
                mask: Some(vec![true; n]),
            })
        }
        HomographySolver::Ransac => ransac::<FourPoint>(x1, x2, params),
        HomographySolver::Lmeds => lmeds::<FourPoint>(x1, x2, params),
    };
    consensus
        .map(|c| RobustEstimate {
            matrix: c.model,
            mask: Some(c.mask),
        })
        .ok_or_else(|| {
            TransformError::DegenerateInput(format!("{solver:?} found no consensus homography"))
        })
}

struct FourPoint;

impl Estimator for FourPoint {
    const SAMPLE_SIZE: usize = 4;

    fn fit(x1: &[Vec2F64], x2: &[Vec2F64]) -> Vec<Mat3F64> {
        let (Ok(a), Ok(b)) = (
            <&[Vec2F64; 4]>::try_from(x1),
            <&[Vec2F64; 4]>::try_from(x2),
        ) else {
            return Vec::new();
        };
        homography_4pt2d(a, b).into_iter().collect()
    }

    fn refit(x1: &[Vec2F64], x2: &[Vec2F64]) -> Option<Mat3F64> {
        homography_dlt(x1, x2).ok()
    }

    fn residual(model: &Mat3F64, x1: &Vec2F64, x2: &Vec2F64) -> f64 {
        homography_reproj_error(model, x1, x2)
    }
}

// construct matrix A (2N x 9) for x2 ~ H x1
fn dlt_matrix(x1: &[Vec2F64], x2: &[Vec2F64]) -> faer::Mat<f64> {
    let mut a = faer::Mat::<f64>::zeros(2 * x1.len(), 9);
    for (i, (p, q)) in x1.iter().zip(x2).enumerate() {
        a.write(2 * i, 0, p.x);
        a.write(2 * i, 1, p.y);
        a.write(2 * i, 2, 1.0);
        a.write(2 * i, 6, -q.x * p.x);
        a.write(2 * i, 7, -q.x * p.y);
        a.write(2 * i, 8, -q.x);

        a.write(2 * i + 1, 3, p.x);
        a.write(2 * i + 1, 4, p.y);
        a.write(2 * i + 1, 5, 1.0);
        a.write(2 * i + 1, 6, -q.y * p.x);
        a.write(2 * i + 1, 7, -q.y * p.y);
        a.write(2 * i + 1, 8, -q.y);
    }
    a
}

fn solve_dlt(a: &faer::Mat<f64>) -> Result<Mat3F64, TransformError> {
    let null = smallest_right_singular_vectors(a, 1);
    let h = null
        .first()
        .ok_or_else(|| TransformError::DegenerateInput("empty DLT system".to_string()))?;
    Ok(mat3_from_rows([
        [h[0], h[1], h[2]],
        [h[3], h[4], h[5]],
        [h[6], h[7], h[8]],
    ]))
}

// normalize the homography matrix and reject singular solutions
fn finish(h: Mat3F64) -> Result<Mat3F64, TransformError> {
    let h22 = h.z_axis.z;
    let h = if h22.abs() > 1e-12 {
        h * (1.0 / h22)
    } else {
        normalize_frobenius(&h)
    };
    if !h.is_finite() || matrix_rank(&h) < 3 {
        return Err(TransformError::DegenerateInput(
            "homography is singular".to_string(),
        ));
    }
    Ok(h)
}
