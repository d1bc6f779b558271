//! Singular value decomposition for small dense systems.
//!
//! Thin wrappers around `faer`'s SVD that guarantee the ordering the two-view
//! solvers rely on: singular values are returned in **non-increasing** order and
//! the columns of `U` and `V` are permuted accordingly, so the last column of
//! `V` is always the right singular vector of the smallest singular value.
//!
//! ```text
//! A = U Σ Vᵀ,   σ₀ ≥ σ₁ ≥ … ≥ 0
//! ```
//!
//! Two entry points are provided:
//!
//! * [`svd`] for arbitrary `m × n` design matrices (DLT, 7/8-point systems).
//! * [`svd3`] for 3×3 matrices expressed as [`Mat3F64`].
//!
//! # Example
//!
//! ```
//! use twoview_linalg::{svd::svd3, Mat3F64, Vec3F64};
//!
//! let m = Mat3F64::from_diagonal(Vec3F64::new(1.0, 3.0, 2.0));
//! let svd = svd3(&m);
//! assert!((svd.s().x - 3.0).abs() < 1e-12);
//! assert!((svd.s().z - 1.0).abs() < 1e-12);
//! ```

use crate::{Mat3F64, Vec3F64};

/// Decomposition `A = U Σ Vᵀ` of a dense matrix with sorted singular values.
#[derive(Debug, Clone)]
pub struct SvdResult {
    u: faer::Mat<f64>,
    s: Vec<f64>,
    v: faer::Mat<f64>,
}

impl SvdResult {
    /// Left singular vectors, one per column.
    #[inline]
    pub fn u(&self) -> faer::MatRef<'_, f64> {
        self.u.as_ref()
    }

    /// Singular values in non-increasing order.
    #[inline]
    pub fn s(&self) -> &[f64] {
        &self.s
    }

    /// Right singular vectors, one per column.
    #[inline]
    pub fn v(&self) -> faer::MatRef<'_, f64> {
        self.v.as_ref()
    }

    /// Copy column `j` of `V` into a vector.
    pub fn v_col(&self, j: usize) -> Vec<f64> {
        (0..self.v.nrows()).map(|i| self.v.read(i, j)).collect()
    }
}

/// Compute the full SVD of `a` with singular values sorted in non-increasing order.
pub fn svd(a: &faer::Mat<f64>) -> SvdResult {
    let decomposition = a.svd();
    let s_diag = decomposition.s_diagonal();
    let k = s_diag.nrows();

    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by(|&i, &j| s_diag.read(j).total_cmp(&s_diag.read(i)));

    let u_src = decomposition.u();
    let v_src = decomposition.v();
    let mut u = u_src.to_owned();
    let mut v = v_src.to_owned();
    for (dst, &src) in order.iter().enumerate() {
        for r in 0..u.nrows() {
            u.write(r, dst, u_src.read(r, src));
        }
        for r in 0..v.nrows() {
            v.write(r, dst, v_src.read(r, src));
        }
    }
    let s = order.iter().map(|&i| s_diag.read(i)).collect();

    SvdResult { u, s, v }
}

/// Right singular vectors of the `count` smallest singular values of `a`.
///
/// Systems with fewer rows than columns are padded with zero rows first, so the
/// returned vectors span the null space of an under-determined system. The
/// vectors are ordered from the smallest singular value upwards.
pub fn smallest_right_singular_vectors(a: &faer::Mat<f64>, count: usize) -> Vec<Vec<f64>> {
    let cols = a.ncols();
    let count = count.min(cols);
    let decomposition = if a.nrows() < cols {
        let mut padded = faer::Mat::<f64>::zeros(cols, cols);
        for i in 0..a.nrows() {
            for j in 0..cols {
                padded.write(i, j, a.read(i, j));
            }
        }
        svd(&padded)
    } else {
        svd(a)
    };
    (0..count)
        .map(|k| decomposition.v_col(cols - 1 - k))
        .collect()
}

/// SVD of a 3x3 matrix.
#[derive(Debug, Clone, Copy)]
pub struct Svd3 {
    u: Mat3F64,
    s: Vec3F64,
    v: Mat3F64,
}

impl Svd3 {
    /// Left singular vectors as columns.
    #[inline]
    pub fn u(&self) -> &Mat3F64 {
        &self.u
    }

    /// Singular values `(σ₀, σ₁, σ₂)`, non-increasing.
    #[inline]
    pub fn s(&self) -> &Vec3F64 {
        &self.s
    }

    /// Right singular vectors as columns.
    #[inline]
    pub fn v(&self) -> &Mat3F64 {
        &self.v
    }

    /// Rebuild `U · diag(s) · Vᵀ` with replacement singular values.
    pub fn recompose(&self, s: Vec3F64) -> Mat3F64 {
        self.u * Mat3F64::from_diagonal(s) * self.v.transpose()
    }
}

/// Compute the SVD of a 3x3 matrix.
pub fn svd3(m: &Mat3F64) -> Svd3 {
    let decomposition = svd(&mat3_to_faer(m));
    let s = decomposition.s();
    Svd3 {
        u: mat3_from_faer(decomposition.u()),
        s: Vec3F64::new(s[0], s[1], s[2]),
        v: mat3_from_faer(decomposition.v()),
    }
}

/// Copy a [`Mat3F64`] into a `faer` matrix.
pub fn mat3_to_faer(m: &Mat3F64) -> faer::Mat<f64> {
    faer::Mat::from_fn(3, 3, |i, j| m.col(j)[i])
}

/// Copy the leading 3x3 block of a `faer` matrix into a [`Mat3F64`].
pub fn mat3_from_faer(m: faer::MatRef<'_, f64>) -> Mat3F64 {
    Mat3F64::from_cols(
        Vec3F64::new(m.read(0, 0), m.read(1, 0), m.read(2, 0)),
        Vec3F64::new(m.read(0, 1), m.read(1, 1), m.read(2, 1)),
        Vec3F64::new(m.read(0, 2), m.read(1, 2), m.read(2, 2)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_svd3_sorted_and_recomposed() {
        let m = Mat3F64::from_cols(
            Vec3F64::new(0.1, 0.2, -0.3),
            Vec3F64::new(0.4, -0.1, 0.2),
            Vec3F64::new(-0.2, 0.5, 0.3),
        );
        let svd = svd3(&m);
        let s = *svd.s();
        assert!(s.x >= s.y && s.y >= s.z && s.z >= 0.0);

        let back = svd.recompose(s);
        assert!(back.abs_diff_eq(m, 1e-12));
    }

    #[test]
    fn test_svd_rectangular_ordering() {
        let a = faer::mat![[3.0, 0.0], [0.0, 5.0], [0.0, 0.0]];
        let res = svd(&a);
        assert_relative_eq!(res.s()[0], 5.0, epsilon = 1e-12);
        assert_relative_eq!(res.s()[1], 3.0, epsilon = 1e-12);
        // first right singular vector is aligned with the y axis
        assert_relative_eq!(res.v().read(1, 0).abs(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_null_space_of_underdetermined_system() {
        // x + y + z = 0 has a two dimensional null space
        let a = faer::mat![[1.0, 1.0, 1.0]];
        let null = smallest_right_singular_vectors(&a, 2);
        assert_eq!(null.len(), 2);
        for v in null {
            assert_relative_eq!(v[0] + v[1] + v[2], 0.0, epsilon = 1e-12);
            let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
            assert_relative_eq!(norm, 1.0, epsilon = 1e-12);
        }
    }
}
