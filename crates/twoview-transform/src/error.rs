use twoview_linalg::optim::OptimizerError;
use twoview_linalg::Mat3F64;

/// Errors returned by transformation matrix estimation and queries.
#[derive(thiserror::Error, Debug)]
pub enum TransformError {
    /// Unrecognized estimation method tag.
    #[error("Unknown estimation method '{method}'. Choices are: {choices}")]
    InvalidMethod {
        /// The rejected tag.
        method: String,
        /// Accepted tags, comma separated.
        choices: &'static str,
    },

    /// An estimation parameter is out of range.
    #[error("Invalid parameter {name} = {value}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Rejected value.
        value: f64,
    },

    /// The robust estimator could not produce a model and inlier mask.
    #[error("Degenerate input: {0}")]
    DegenerateInput(String),

    /// Not enough correspondences for the requested operation.
    #[error("Need at least {required} correspondences, got {actual}")]
    InsufficientCorrespondences {
        /// Minimum number of correspondences.
        required: usize,
        /// Number of correspondences available.
        actual: usize,
    },

    /// Mismatched correspondence set lengths.
    #[error("Mismatched correspondence lengths: x1 ({left_len}) != x2 ({right_len})")]
    MismatchedLengths {
        /// Length of the first point set.
        left_len: usize,
        /// Length of the second point set.
        right_len: usize,
    },

    /// The matrix is numerically singular.
    #[error("Matrix is singular and cannot be inverted")]
    SingularMatrix,

    /// The 7-point solver returned several candidate fundamental matrices.
    #[error("7-point solver returned {} candidate matrices", .candidates.len())]
    AmbiguousEstimate {
        /// Every real-root candidate, each rank 2.
        candidates: Vec<Mat3F64>,
    },

    /// The operation is not supported by this matrix kind.
    #[error("Operation '{operation}' is not supported")]
    Unsupported {
        /// Name of the operation.
        operation: &'static str,
    },

    /// Nonlinear refinement failed.
    #[error("Optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),
}
