//! Projective camera model for two-view refinement.
//!
//! Cameras are 3x4 projection matrices stored row-major. The first view is the
//! canonical camera `[I | 0]`; the second is parameterized by its 12 entries.
//! Triangulation is the linear DLT and residuals are pixel reprojection errors
//! in both views.

use twoview_linalg::linalg::{mat3_from_rows, skew_symmetric};
use twoview_linalg::svd::{smallest_right_singular_vectors, svd3};
use twoview_linalg::{Mat3F64, Vec2F64, Vec3F64};

/// Row-major 3x4 camera projection matrix.
pub type ProjectionMatrix = [[f64; 4]; 3];

/// Number of free parameters of a [`ProjectionMatrix`].
pub const CAMERA_PARAMS: usize = 12;

/// The canonical camera `[I | 0]`.
pub fn idealized_camera() -> ProjectionMatrix {
    [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
    ]
}

/// Second camera `[[e']× F | e']` compatible with `F` and the canonical first camera.
///
/// `e'` is the epipole in the second image, the left null vector of `F`.
pub fn camera_from_fundamental(f: &Mat3F64) -> ProjectionMatrix {
    let e2 = svd3(f).u().z_axis;
    let m = skew_symmetric(&e2) * *f;
    let mut p = [[0.0; 4]; 3];
    for (i, row) in p.iter_mut().enumerate() {
        let mi = m.row(i);
        *row = [mi.x, mi.y, mi.z, e2[i]];
    }
    p
}

/// Fundamental matrix `[t]× · M` of the pair `([I | 0], [M | t])`.
pub fn fundamental_from_camera(p: &ProjectionMatrix) -> Mat3F64 {
    let t = Vec3F64::new(p[0][3], p[1][3], p[2][3]);
    let m = mat3_from_rows([
        [p[0][0], p[0][1], p[0][2]],
        [p[1][0], p[1][1], p[1][2]],
        [p[2][0], p[2][1], p[2][2]],
    ]);
    skew_symmetric(&t) * m
}

/// Flatten a camera into its 12 row-major parameters.
pub fn camera_to_params(p: &ProjectionMatrix) -> [f64; CAMERA_PARAMS] {
    let mut params = [0.0; CAMERA_PARAMS];
    for (i, row) in p.iter().enumerate() {
        params[4 * i..4 * i + 4].copy_from_slice(row);
    }
    params
}

/// Rebuild a camera from 12 row-major parameters.
///
/// PRECONDITION: `params.len() >= 12`.
pub fn camera_from_params(params: &[f64]) -> ProjectionMatrix {
    let mut p = [[0.0; 4]; 3];
    for (i, row) in p.iter_mut().enumerate() {
        row.copy_from_slice(&params[4 * i..4 * i + 4]);
    }
    p
}

/// Linear triangulation of one correspondence.
///
/// Returns the homogeneous point with unit norm; points at infinity are kept
/// as such rather than divided through.
pub fn triangulate(
    p1: &ProjectionMatrix,
    p2: &ProjectionMatrix,
    x1: &Vec2F64,
    x2: &Vec2F64,
) -> [f64; 4] {
    let mut a = faer::Mat::<f64>::zeros(4, 4);
    write_dlt_row(&mut a, 0, x1.x, &p1[2], &p1[0]);
    write_dlt_row(&mut a, 1, x1.y, &p1[2], &p1[1]);
    write_dlt_row(&mut a, 2, x2.x, &p2[2], &p2[0]);
    write_dlt_row(&mut a, 3, x2.y, &p2[2], &p2[1]);

    let null = smallest_right_singular_vectors(&a, 1);
    let mut xh = [0.0; 4];
    if let Some(v) = null.first() {
        xh.copy_from_slice(&v[..4]);
    }
    xh
}

fn write_dlt_row(a: &mut faer::Mat<f64>, row: usize, x: f64, p3: &[f64; 4], p1: &[f64; 4]) {
    for j in 0..4 {
        a.write(row, j, x * p3[j] - p1[j]);
    }
}

/// Project a homogeneous 3D point, applying the perspective divide.
pub fn project(p: &ProjectionMatrix, xh: &[f64; 4]) -> Vec2F64 {
    let dot = |row: &[f64; 4]| row.iter().zip(xh).map(|(a, b)| a * b).sum::<f64>();
    let w = dot(&p[2]);
    Vec2F64::new(dot(&p[0]) / w, dot(&p[1]) / w)
}

/// Reprojection residuals of the pair `(p1, camera_from_params(params))`.
///
/// Every correspondence is triangulated with both cameras and reprojected into
/// both views, giving four residuals per point:
/// `[x1.x - x̂1.x, x1.y - x̂1.y, x2.x - x̂2.x, x2.y - x̂2.y]`.
pub fn projection_error(
    params: &[f64],
    p1: &ProjectionMatrix,
    x1: &[Vec2F64],
    x2: &[Vec2F64],
) -> Vec<f64> {
    let p2 = camera_from_params(params);
    let mut residuals = Vec::with_capacity(4 * x1.len());
    for (a, b) in x1.iter().zip(x2) {
        let xh = triangulate(p1, &p2, a, b);
        let a_hat = project(p1, &xh);
        let b_hat = project(&p2, &xh);
        residuals.extend_from_slice(&[a.x - a_hat.x, a.y - a_hat.y, b.x - b_hat.x, b.y - b_hat.y]);
    }
    residuals
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn stereo_camera() -> ProjectionMatrix {
        let r = Mat3F64::from_rotation_y(0.1) * Mat3F64::from_rotation_x(-0.05);
        let t = Vec3F64::new(-1.0, 0.1, 0.2);
        let mut p = [[0.0; 4]; 3];
        for (i, row) in p.iter_mut().enumerate() {
            let ri = r.row(i);
            *row = [ri.x, ri.y, ri.z, t[i]];
        }
        p
    }

    fn scene() -> Vec<[f64; 4]> {
        (0..12)
            .map(|i| {
                let x = ((i * 7) % 5) as f64 * 0.4 - 0.8;
                let y = ((i * 3) % 4) as f64 * 0.3 - 0.45;
                let z = 4.0 + ((i * 5) % 3) as f64 * 0.7;
                [x, y, z, 1.0]
            })
            .collect()
    }

    #[test]
    fn test_projection_error_vanishes_on_exact_data() {
        let p1 = idealized_camera();
        let p2 = stereo_camera();
        let (x1, x2): (Vec<_>, Vec<_>) = scene()
            .iter()
            .map(|xw| (project(&p1, xw), project(&p2, xw)))
            .unzip();

        let residuals = projection_error(&camera_to_params(&p2), &p1, &x1, &x2);
        assert_eq!(residuals.len(), 4 * x1.len());
        for r in residuals {
            assert_relative_eq!(r, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_fundamental_from_camera_satisfies_epipolar_constraint() {
        let p1 = idealized_camera();
        let p2 = stereo_camera();
        let f = fundamental_from_camera(&p2);
        for xw in scene() {
            let a = project(&p1, &xw);
            let b = project(&p2, &xw);
            let v = Vec3F64::new(b.x, b.y, 1.0).dot(f * Vec3F64::new(a.x, a.y, 1.0));
            assert_relative_eq!(v, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_camera_from_fundamental_roundtrip_up_to_scale() {
        let f = fundamental_from_camera(&stereo_camera());
        let p2 = camera_from_fundamental(&f);
        let f_back = fundamental_from_camera(&p2);

        // [e']x [e']x F = -|e'|^2 F, so the two agree up to scale
        let f_n = twoview_linalg::linalg::normalize_frobenius(&f);
        let b_n = twoview_linalg::linalg::normalize_frobenius(&f_back);
        let same = f_n.abs_diff_eq(b_n, 1e-9) || f_n.abs_diff_eq(-b_n, 1e-9);
        assert!(same);
    }

    #[test]
    fn test_params_roundtrip() {
        let p = stereo_camera();
        assert_eq!(camera_from_params(&camera_to_params(&p)), p);
    }
}
