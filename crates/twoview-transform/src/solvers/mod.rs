//! # Robust solvers
//!
//! Minimal and least-squares solvers for the two transformation kinds, plus the
//! robust wrappers that turn them into a model and an inlier mask.
//!
//! - [`fundamental`] — 7-point and normalized 8-point fundamental matrix solvers
//! - [`homography`] — 4-point and normalized DLT homography solvers
//!
//! Both expose a `find_*` entry point that dispatches on a solver tag and
//! returns a [`RobustEstimate`].

/// 7-point and normalized 8-point fundamental matrix solvers.
pub mod fundamental;
/// 4-point and normalized DLT homography solvers.
pub mod homography;
mod ransac;

pub use fundamental::{find_fundamental, FundamentalSolver};
pub use homography::{find_homography, HomographySolver};

use serde::{Deserialize, Serialize};
use twoview_linalg::{Mat3F64, Vec2F64, Vec3F64};

use crate::error::TransformError;

/// Parameters for RANSAC and LMedS model estimation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacParams {
    /// Maximum number of sampling iterations.
    pub max_iterations: usize,
    /// Inlier threshold in pixels (unused by LMedS, which derives its own).
    pub threshold: f64,
    /// Desired probability that at least one sample is outlier free, in `(0, 1)`.
    pub confidence: f64,
    /// Optional RNG seed for deterministic runs.
    pub random_seed: Option<u64>,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            threshold: 2.0,
            confidence: 0.99,
            random_seed: Some(0),
        }
    }
}

impl RansacParams {
    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the inlier threshold in pixels.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the confidence.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Set the RNG seed; `None` seeds from the thread RNG.
    pub fn with_random_seed(mut self, seed: Option<u64>) -> Self {
        self.random_seed = seed;
        self
    }

    /// Check `threshold > 0` and `0 < confidence < 1`.
    pub fn validate(&self) -> Result<(), TransformError> {
        if self.threshold.is_nan() || self.threshold <= 0.0 {
            return Err(TransformError::InvalidParameter {
                name: "threshold",
                value: self.threshold,
            });
        }
        if self.confidence.is_nan() || self.confidence <= 0.0 || self.confidence >= 1.0 {
            return Err(TransformError::InvalidParameter {
                name: "confidence",
                value: self.confidence,
            });
        }
        Ok(())
    }
}

/// Matrix and inlier mask returned by a robust solver.
#[derive(Clone, Debug)]
pub struct RobustEstimate {
    /// Estimated 3x3 matrix.
    pub matrix: Mat3F64,
    /// Per-correspondence inlier mask; `None` when the solver produced none.
    pub mask: Option<Vec<bool>>,
}

impl RobustEstimate {
    /// Number of inliers, or `None` without a mask.
    pub fn inlier_count(&self) -> Option<usize> {
        self.mask
            .as_ref()
            .map(|mask| mask.iter().filter(|&&m| m).count())
    }
}

pub(crate) fn check_lengths(x1: &[Vec2F64], x2: &[Vec2F64]) -> Result<(), TransformError> {
    if x1.len() != x2.len() {
        return Err(TransformError::MismatchedLengths {
            left_len: x1.len(),
            right_len: x2.len(),
        });
    }
    Ok(())
}

pub(crate) fn check_count(n: usize, required: usize) -> Result<(), TransformError> {
    if n < required {
        return Err(TransformError::InsufficientCorrespondences {
            required,
            actual: n,
        });
    }
    Ok(())
}

/// Normalize points with a similarity transform `T` so they have zero mean and
/// an average distance of `sqrt(2)` from the origin.
pub(crate) fn normalize_points_2d(x: &[Vec2F64]) -> (Vec<Vec2F64>, Mat3F64) {
    let n = x.len().max(1) as f64;
    let mean = x.iter().fold(Vec2F64::ZERO, |acc, p| acc + *p) / n;
    let mean_dist = x.iter().map(|p| (*p - mean).length()).sum::<f64>() / n;
    let scale = if mean_dist > 0.0 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let xn = x.iter().map(|p| (*p - mean) * scale).collect();

    // T = [[s, 0, -s*mx], [0, s, -s*my], [0, 0, 1]]
    let t = Mat3F64::from_cols(
        Vec3F64::new(scale, 0.0, 0.0),
        Vec3F64::new(0.0, scale, 0.0),
        Vec3F64::new(-scale * mean.x, -scale * mean.y, 1.0),
    );
    (xn, t)
}
