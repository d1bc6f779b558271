#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Projective camera model used by the MLE refinement.
pub mod camera;

/// Error types for the estimation crate.
pub mod error;

/// Versioned fundamental matrix.
pub mod fundamental;

/// Versioned planar homography.
pub mod homography;

/// Minimal, least-squares and robust solvers.
pub mod solvers;

/// Error summary statistics.
pub mod stats;

/// Outcome of an estimate.
pub mod summary;

/// History, observers and the shared trait.
pub mod versioned;

pub use error::TransformError;
pub use fundamental::{FundamentalMatrix, FundamentalMethod, FundamentalParams};
pub use homography::{ErrorReport, Homography, HomographyMethod, HomographyParams, ResidualRow};
pub use stats::{ErrorStatistics, ResidualSet};
pub use summary::{EstimateSummary, MleOutcome};
pub use versioned::{Observer, Snapshot, TransformationMatrix, VersionedMatrix, HISTORY_CAPACITY};
