use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use twoview_linalg::linalg::try_inverse;
use twoview_linalg::{Mat3F64, Vec2F64, Vec3F64};

use crate::error::TransformError;
use crate::solvers::{find_homography, HomographySolver, RansacParams};
use crate::stats::ResidualSet;
use crate::summary::{EstimateSummary, MleOutcome};
use crate::versioned::{selected, TransformationMatrix, VersionedMatrix};

/// Homography estimation method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HomographyMethod {
    /// RANSAC over 4-point samples.
    Ransac,
    /// Least median of squares over 4-point samples.
    Lmeds,
    /// Least squares over all correspondences.
    Normal,
}

impl HomographyMethod {
    const CHOICES: &'static str = "ransac, lmeds, normal";

    /// Solver implementing the method.
    pub fn solver(self) -> HomographySolver {
        match self {
            HomographyMethod::Ransac => HomographySolver::Ransac,
            HomographyMethod::Lmeds => HomographySolver::Lmeds,
            HomographyMethod::Normal => HomographySolver::LeastSquares,
        }
    }
}

impl fmt::Display for HomographyMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HomographyMethod::Ransac => "ransac",
            HomographyMethod::Lmeds => "lmeds",
            HomographyMethod::Normal => "normal",
        })
    }
}

impl FromStr for HomographyMethod {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ransac" => Ok(HomographyMethod::Ransac),
            "lmeds" => Ok(HomographyMethod::Lmeds),
            "normal" => Ok(HomographyMethod::Normal),
            other => Err(TransformError::InvalidMethod {
                method: other.to_string(),
                choices: Self::CHOICES,
            }),
        }
    }
}

/// Parameters of [`Homography::compute`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HomographyParams {
    /// Maximum reprojection error of an inlier, in pixels.
    pub reproj_threshold: f64,
    /// RANSAC confidence in `(0, 1)`.
    pub confidence: f64,
    /// Maximum number of robust sampling iterations.
    pub max_iterations: usize,
    /// RNG seed for robust sampling.
    pub random_seed: Option<u64>,
}

impl Default for HomographyParams {
    fn default() -> Self {
        let ransac = RansacParams::default();
        Self {
            reproj_threshold: ransac.threshold,
            confidence: ransac.confidence,
            max_iterations: ransac.max_iterations,
            random_seed: ransac.random_seed,
        }
    }
}

impl HomographyParams {
    /// Set the inlier threshold in pixels.
    pub fn with_reproj_threshold(mut self, threshold: f64) -> Self {
        self.reproj_threshold = threshold;
        self
    }

    /// Set the RANSAC confidence.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Set the maximum number of robust sampling iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the RNG seed.
    pub fn with_random_seed(mut self, seed: Option<u64>) -> Self {
        self.random_seed = seed;
        self
    }

    fn ransac(&self) -> RansacParams {
        RansacParams {
            max_iterations: self.max_iterations,
            threshold: self.reproj_threshold,
            confidence: self.confidence,
            random_seed: self.random_seed,
        }
    }
}

/// Reprojection residual of one correspondence.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResidualRow {
    /// Index of the correspondence in the input.
    pub index: usize,
    /// `b.x − (H·a).x`.
    pub x_residual: f64,
    /// `b.y − (H·a).y`.
    pub y_residual: f64,
    /// Euclidean norm of the residual.
    pub rmse: f64,
    /// `rmse / total_rms`.
    pub error_contribution: f64,
}

/// Per-correspondence reprojection residuals with aggregate RMS values.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorReport {
    /// One row per selected correspondence.
    pub rows: Vec<ResidualRow>,
    /// `sqrt(mean(x² + y²))`.
    pub total_rms: f64,
    /// `sqrt(mean(x²))`.
    pub x_rms: f64,
    /// `sqrt(mean(y²))`.
    pub y_rms: f64,
}

impl ResidualSet for ErrorReport {
    fn magnitudes(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.rmse).collect()
    }
}

/// Versioned planar homography mapping `x1` to `x2`.
#[derive(Debug)]
pub struct Homography {
    state: VersionedMatrix<Homography, ErrorReport>,
}

impl Homography {
    /// Wrap a raw matrix for `count` correspondences.
    pub fn new(matrix: Mat3F64, count: usize) -> Self {
        Self {
            state: VersionedMatrix::new(matrix, count),
        }
    }

    /// Create a homography from `x1 <-> x2`.
    ///
    /// The history starts at the estimated state: one entry, cursor 0.
    pub fn estimate(
        x1: &[Vec2F64],
        x2: &[Vec2F64],
        method: HomographyMethod,
        params: &HomographyParams,
    ) -> Result<(Self, EstimateSummary<HomographyMethod>), TransformError> {
        let mut h = Self::new(Mat3F64::ZERO, x1.len());
        let summary = h.compute(x1, x2, method, params)?;
        h.state.rebase();
        Ok((h, summary))
    }

    /// Estimate the homography from `x1 <-> x2`, commit it with its inlier
    /// mask and notify observers. Homographies are never refined.
    pub fn compute(
        &mut self,
        x1: &[Vec2F64],
        x2: &[Vec2F64],
        method: HomographyMethod,
        params: &HomographyParams,
    ) -> Result<EstimateSummary<HomographyMethod>, TransformError> {
        let estimate = find_homography(x1, x2, method.solver(), &params.ransac())?;
        let inlier_count = estimate.inlier_count().unwrap_or(x1.len());
        log::debug!("homography via {method}: {inlier_count} / {} inliers", x1.len());

        self.state.attach(x1, x2);
        self.state.commit(estimate.matrix, estimate.mask);
        self.notify_subscribers();
        Ok(EstimateSummary {
            method,
            inlier_count,
            refinement: MleOutcome::NotRequested,
        })
    }

    /// The inverse homography mapping `x2` to `x1`.
    pub fn inverse(&self) -> Result<Mat3F64, TransformError> {
        try_inverse(self.matrix()).ok_or(TransformError::SingularMatrix)
    }

    /// Map a point through the homography, with perspective divide.
    pub fn transform_point(&self, p: &Vec2F64) -> Vec2F64 {
        let q = *self.matrix() * Vec3F64::new(p.x, p.y, 1.0);
        Vec2F64::new(q.x / q.z, q.y / q.z)
    }

    /// The attached correspondences.
    pub fn correspondences(&self) -> (&[Vec2F64], &[Vec2F64]) {
        self.state.correspondences()
    }
}

impl TransformationMatrix for Homography {
    type Residuals = ErrorReport;

    fn state(&self) -> &VersionedMatrix<Self, Self::Residuals> {
        &self.state
    }

    fn state_mut(&mut self) -> &mut VersionedMatrix<Self, Self::Residuals> {
        &mut self.state
    }

    fn compute_error(&self, x1: &[Vec2F64], x2: &[Vec2F64], mask: Option<&[bool]>) -> ErrorReport {
        let mut rows: Vec<ResidualRow> = selected(x1.len().min(x2.len()), mask)
            .into_iter()
            .map(|i| {
                let projected = self.transform_point(&x1[i]);
                let x_residual = x2[i].x - projected.x;
                let y_residual = x2[i].y - projected.y;
                ResidualRow {
                    index: i,
                    x_residual,
                    y_residual,
                    rmse: x_residual.hypot(y_residual),
                    error_contribution: f64::NAN,
                }
            })
            .collect();

        let n = rows.len() as f64;
        let sx = rows.iter().map(|r| r.x_residual * r.x_residual).sum::<f64>();
        let sy = rows.iter().map(|r| r.y_residual * r.y_residual).sum::<f64>();
        let total_rms = ((sx + sy) / n).sqrt();
        for row in rows.iter_mut() {
            row.error_contribution = row.rmse / total_rms;
        }

        ErrorReport {
            rows,
            total_rms,
            x_rms: (sx / n).sqrt(),
            y_rms: (sy / n).sqrt(),
        }
    }
}
