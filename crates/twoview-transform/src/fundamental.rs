//! # Fundamental matrix
//!
//! [`FundamentalMatrix`] estimates the epipolar geometry of two uncalibrated
//! views from point correspondences, keeps it at rank 2 and optionally refines
//! it by minimizing the reprojection error of triangulated points (the gold
//! standard / MLE estimate). Every successful estimate and every mask
//! refinement is committed to the matrix history and reported to observers.
//!
//! ```
//! use twoview_transform::{FundamentalMatrix, FundamentalMethod, FundamentalParams};
//! use twoview_transform::TransformationMatrix;
//! use twoview_linalg::Mat3F64;
//!
//! let f = FundamentalMatrix::new(Mat3F64::IDENTITY, 0);
//! assert_eq!(f.history_len(), 1);
//! assert_eq!("8point".parse::<FundamentalMethod>().ok(), Some(FundamentalMethod::EightPoint));
//! let _params = FundamentalParams::default().with_reproj_threshold(1.0);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use twoview_linalg::linalg::{matrix_rank, normalize_frobenius};
use twoview_linalg::optim::{LeastSquaresResult, LevenbergMarquardt};
use twoview_linalg::svd::svd3;
use twoview_linalg::{Mat3F64, Vec2F64, Vec3F64};

use crate::camera::{
    camera_from_fundamental, camera_from_params, camera_to_params, fundamental_from_camera,
    idealized_camera, projection_error,
};
use crate::error::TransformError;
use crate::solvers::{find_fundamental, FundamentalSolver, RansacParams};
use crate::summary::{EstimateSummary, MleOutcome};
use crate::versioned::{selected, TransformationMatrix, VersionedMatrix};

/// Minimum number of inliers for the nonlinear MLE refinement.
pub const MIN_MLE_INLIERS: usize = 9;

/// Fundamental matrix estimation method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FundamentalMethod {
    /// RANSAC followed by nonlinear reprojection-error refinement.
    Mle,
    /// RANSAC over 7-point samples.
    Ransac,
    /// Least median of squares over 7-point samples.
    Lmeds,
    /// 7-point algorithm on all correspondences.
    Normal,
    /// Normalized 8-point algorithm on all correspondences.
    #[serde(rename = "8point")]
    EightPoint,
}

impl FundamentalMethod {
    const CHOICES: &'static str = "mle, ransac, lmeds, normal, 8point";

    /// Solver that produces the initial estimate.
    pub fn solver(self) -> FundamentalSolver {
        match self {
            FundamentalMethod::Mle | FundamentalMethod::Ransac => FundamentalSolver::Ransac,
            FundamentalMethod::Lmeds => FundamentalSolver::Lmeds,
            FundamentalMethod::Normal => FundamentalSolver::SevenPoint,
            FundamentalMethod::EightPoint => FundamentalSolver::EightPoint,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            FundamentalMethod::Mle => "mle",
            FundamentalMethod::Ransac => "ransac",
            FundamentalMethod::Lmeds => "lmeds",
            FundamentalMethod::Normal => "normal",
            FundamentalMethod::EightPoint => "8point",
        }
    }
}

impl fmt::Display for FundamentalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FundamentalMethod {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mle" => Ok(FundamentalMethod::Mle),
            "ransac" => Ok(FundamentalMethod::Ransac),
            "lmeds" => Ok(FundamentalMethod::Lmeds),
            "normal" => Ok(FundamentalMethod::Normal),
            "8point" => Ok(FundamentalMethod::EightPoint),
            other => Err(TransformError::InvalidMethod {
                method: other.to_string(),
                choices: Self::CHOICES,
            }),
        }
    }
}

/// Parameters of [`FundamentalMatrix::compute`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FundamentalParams {
    /// Maximum epipolar distance of an inlier, in pixels.
    pub reproj_threshold: f64,
    /// RANSAC confidence in `(0, 1)`.
    pub confidence: f64,
    /// Maximum number of robust sampling iterations.
    pub max_iterations: usize,
    /// RNG seed for robust sampling.
    pub random_seed: Option<u64>,
    /// Optimizer used by the MLE refinement.
    pub optimizer: LevenbergMarquardt,
}

impl Default for FundamentalParams {
    fn default() -> Self {
        let ransac = RansacParams::default();
        Self {
            reproj_threshold: ransac.threshold,
            confidence: ransac.confidence,
            max_iterations: ransac.max_iterations,
            random_seed: ransac.random_seed,
            optimizer: LevenbergMarquardt::default(),
        }
    }
}

impl FundamentalParams {
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

    /// Set the MLE optimizer.
    pub fn with_optimizer(mut self, optimizer: LevenbergMarquardt) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Robust solver parameters.
    pub fn ransac(&self) -> RansacParams {
        RansacParams {
            max_iterations: self.max_iterations,
            threshold: self.reproj_threshold,
            confidence: self.confidence,
            random_seed: self.random_seed,
        }
    }
}

/// Versioned fundamental matrix.
#[derive(Debug)]
pub struct FundamentalMatrix {
    state: VersionedMatrix<FundamentalMatrix, Vec<f64>>,
}

impl FundamentalMatrix {
    /// Wrap a raw matrix for `count` correspondences.
    pub fn new(matrix: Mat3F64, count: usize) -> Self {
        Self {
            state: VersionedMatrix::new(matrix, count),
        }
    }

    /// Create a matrix from `x1 <-> x2`.
    ///
    /// The history starts at the estimated state: one entry, cursor 0.
    pub fn estimate(
        x1: &[Vec2F64],
        x2: &[Vec2F64],
        method: FundamentalMethod,
        params: &FundamentalParams,
    ) -> Result<(Self, EstimateSummary<FundamentalMethod>), TransformError> {
        let mut f = Self::new(Mat3F64::ZERO, x1.len());
        let summary = f.compute(x1, x2, method, params)?;
        f.state.rebase();
        Ok((f, summary))
    }

    /// Estimate the fundamental matrix from `x1 <-> x2` such that `x2ᵀ F x1 = 0`.
    ///
    /// On success the correspondences and inlier mask are attached, the rank-2
    /// (and, for [`FundamentalMethod::Mle`], refined) matrix is committed and
    /// observers are notified. On failure nothing changes.
    pub fn compute(
        &mut self,
        x1: &[Vec2F64],
        x2: &[Vec2F64],
        method: FundamentalMethod,
        params: &FundamentalParams,
    ) -> Result<EstimateSummary<FundamentalMethod>, TransformError> {
        let estimate = find_fundamental(x1, x2, method.solver(), &params.ransac())?;
        let mask = estimate.mask.unwrap_or_else(|| vec![true; x1.len()]);
        let mut matrix = enforce_singularity(&estimate.matrix);

        let refinement = match method {
            FundamentalMethod::Mle => match refine_mle(&matrix, x1, x2, &mask, &params.optimizer) {
                Ok((refined, result)) => {
                    matrix = refined;
                    MleOutcome::Refined {
                        cost: result.cost,
                        optimality: result.optimality,
                        iterations: result.iterations,
                    }
                }
                Err(err) => {
                    log::warn!("MLE refinement skipped, keeping the linear estimate: {err}");
                    MleOutcome::Fallback(err)
                }
            },
            _ => MleOutcome::NotRequested,
        };

        let inlier_count = mask.iter().filter(|&&m| m).count();
        log::debug!(
            "fundamental matrix via {method}: {inlier_count} / {} inliers",
            x1.len()
        );

        self.state.attach(x1, x2);
        self.state.commit(matrix, Some(mask));
        self.notify_subscribers();

        Ok(EstimateSummary {
            method,
            inlier_count,
            refinement,
        })
    }

    /// Relabel every attached correspondence as inlier iff its epipolar
    /// distance is at most `threshold`. Returns the new inlier count.
    pub fn refine_matches(&mut self, threshold: f64) -> usize {
        let (x1, x2) = self.state.correspondences();
        let mask: Vec<bool> = self
            .compute_error(x1, x2, None)
            .into_iter()
            .map(|d| d <= threshold)
            .collect();
        let inliers = mask.iter().filter(|&&m| m).count();

        let matrix = *self.matrix();
        self.state.commit(matrix, Some(mask));
        self.notify_subscribers();
        inliers
    }

    /// The attached correspondences.
    pub fn correspondences(&self) -> (&[Vec2F64], &[Vec2F64]) {
        self.state.correspondences()
    }

    /// Epipoles `(e, e')` with `F e = 0` and `Fᵀ e' = 0`, as unit homogeneous vectors.
    pub fn epipoles(&self) -> (Vec3F64, Vec3F64) {
        let svd = svd3(self.matrix());
        (svd.v().z_axis, svd.u().z_axis)
    }
}

impl TransformationMatrix for FundamentalMatrix {
    type Residuals = Vec<f64>;

    fn state(&self) -> &VersionedMatrix<Self, Self::Residuals> {
        &self.state
    }

    fn state_mut(&mut self) -> &mut VersionedMatrix<Self, Self::Residuals> {
        &mut self.state
    }

    /// Distance of each `x2` to the epipolar line `F·x1`, in pixels.
    fn compute_error(&self, x1: &[Vec2F64], x2: &[Vec2F64], mask: Option<&[bool]>) -> Vec<f64> {
        let f = self.matrix();
        selected(x1.len().min(x2.len()), mask)
            .into_iter()
            .map(|i| epipolar_distance(f, &x1[i], &x2[i]))
            .collect()
    }
}

/// Distance of `x2` to the epipolar line `F·x1`; `+inf` for a degenerate line.
pub fn epipolar_distance(f: &Mat3F64, x1: &Vec2F64, x2: &Vec2F64) -> f64 {
    let line = *f * Vec3F64::new(x1.x, x1.y, 1.0);
    let norm = line.x.hypot(line.y);
    if norm == 0.0 {
        return f64::INFINITY;
    }
    line.dot(Vec3F64::new(x2.x, x2.y, 1.0)).abs() / norm
}

/// Force rank 2 by zeroing the smallest singular value when the rank is not 2.
pub fn enforce_singularity(f: &Mat3F64) -> Mat3F64 {
    if matrix_rank(f) == 2 {
        return *f;
    }
    let svd = svd3(f);
    let s = *svd.s();
    svd.recompose(Vec3F64::new(s.x, s.y, 0.0))
}

fn refine_mle(
    f: &Mat3F64,
    x1: &[Vec2F64],
    x2: &[Vec2F64],
    mask: &[bool],
    optimizer: &LevenbergMarquardt,
) -> Result<(Mat3F64, LeastSquaresResult), TransformError> {
    let (in1, in2): (Vec<Vec2F64>, Vec<Vec2F64>) = x1
        .iter()
        .zip(x2)
        .zip(mask)
        .filter(|(_, &m)| m)
        .map(|((a, b), _)| (*a, *b))
        .unzip();
    if in1.len() < MIN_MLE_INLIERS {
        return Err(TransformError::InsufficientCorrespondences {
            required: MIN_MLE_INLIERS,
            actual: in1.len(),
        });
    }

    let p1 = idealized_camera();
    let p2 = camera_from_fundamental(f);
    let result = optimizer.minimize(
        |params| projection_error(params, &p1, &in1, &in2),
        &camera_to_params(&p2),
    )?;
    log::debug!(
        "MLE refinement: cost {:e} after {} iterations ({:?})",
        result.cost,
        result.iterations,
        result.termination_reason
    );

    let refined = normalize_frobenius(&fundamental_from_camera(&camera_from_params(
        &result.params,
    )));
    if !refined.is_finite() || refined.abs_diff_eq(Mat3F64::ZERO, f64::EPSILON) {
        return Err(TransformError::DegenerateInput(
            "refined camera yields a vanishing fundamental matrix".to_string(),
        ));
    }
    Ok((refined, result))
}
