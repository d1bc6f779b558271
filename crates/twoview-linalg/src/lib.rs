#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Small dense matrix utilities: determinant, rank, inverse, cross-product form.
pub mod linalg;

/// Levenberg-Marquardt nonlinear least squares.
pub mod optim;

/// Singular value decomposition backed by `faer`.
pub mod svd;

/// 3x3 matrix of `f64`, column-major.
pub type Mat3F64 = glam::DMat3;

/// 2D vector of `f64`.
pub type Vec2F64 = glam::DVec2;

/// 3D vector of `f64`.
pub type Vec3F64 = glam::DVec3;
