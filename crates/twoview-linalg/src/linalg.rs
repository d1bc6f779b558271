use crate::svd::svd3;
use crate::{Mat3F64, Vec3F64};

/// Build a [`Mat3F64`] from row-major rows.
///
/// Example:
///
/// ```
/// use twoview_linalg::linalg::mat3_from_rows;
///
/// let m = mat3_from_rows([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]);
/// assert_eq!(m.row(0).y, 2.0);
/// assert_eq!(m.col(0).y, 4.0);
/// ```
pub fn mat3_from_rows(rows: [[f64; 3]; 3]) -> Mat3F64 {
    Mat3F64::from_cols_array_2d(&rows).transpose()
}

/// Row-major copy of a [`Mat3F64`].
pub fn mat3_to_rows(m: &Mat3F64) -> [[f64; 3]; 3] {
    m.transpose().to_cols_array_2d()
}

/// Determinant of a 3x3 matrix.
#[inline]
pub fn determinant(m: &Mat3F64) -> f64 {
    m.determinant()
}

/// Tolerance used to decide that a singular value is zero.
///
/// Matches the usual `σ_max · max(m, n) · ε` rule.
#[inline]
pub fn rank_tolerance(sigma_max: f64) -> f64 {
    sigma_max * 3.0 * f64::EPSILON
}

/// Numerical rank of a 3x3 matrix.
pub fn matrix_rank(m: &Mat3F64) -> usize {
    let s = *svd3(m).s();
    let tol = rank_tolerance(s.x);
    [s.x, s.y, s.z].iter().filter(|&&v| v > tol).count()
}

/// Ratio of the largest to the second largest singular value.
///
/// Returns `+inf` when the second singular value vanishes and `NaN` for the
/// zero matrix.
pub fn condition_number(m: &Mat3F64) -> f64 {
    let s = *svd3(m).s();
    s.x / s.y
}

/// Inverse of a 3x3 matrix, or `None` when it is numerically singular.
pub fn try_inverse(m: &Mat3F64) -> Option<Mat3F64> {
    if !m.is_finite() || matrix_rank(m) < 3 {
        return None;
    }
    Some(m.inverse())
}

/// Cross-product (skew-symmetric) matrix `[v]×` such that `[v]× · w = v × w`.
pub fn skew_symmetric(v: &Vec3F64) -> Mat3F64 {
    Mat3F64::from_cols(
        Vec3F64::new(0.0, v.z, -v.y),
        Vec3F64::new(-v.z, 0.0, v.x),
        Vec3F64::new(v.y, -v.x, 0.0),
    )
}

/// Scale a matrix to unit Frobenius norm. The zero matrix is returned unchanged.
pub fn normalize_frobenius(m: &Mat3F64) -> Mat3F64 {
    let norm = [m.x_axis, m.y_axis, m.z_axis]
        .iter()
        .map(|c| c.length_squared())
        .sum::<f64>()
        .sqrt();
    if norm > 0.0 {
        *m * (1.0 / norm)
    } else {
        *m
    }
}
