use crate::error::TransformError;

/// Result of the nonlinear refinement step.
#[derive(Debug)]
pub enum MleOutcome {
    /// The method does not refine.
    NotRequested,
    /// The refined matrix replaced the linear estimate.
    Refined {
        /// Final cost `½‖r‖²` in pixels².
        cost: f64,
        /// Final gradient infinity norm.
        optimality: f64,
        /// Optimizer iterations.
        iterations: usize,
    },
    /// Refinement was skipped or failed; the linear estimate was kept.
    Fallback(TransformError),
}

/// Summary of a successful `compute` on either transformation kind.
///
/// `M` is the method tag of the kind, e.g.
/// [`FundamentalMethod`](crate::FundamentalMethod) or
/// [`HomographyMethod`](crate::HomographyMethod).
#[derive(Debug)]
pub struct EstimateSummary<M> {
    /// The method used.
    pub method: M,
    /// Number of inliers in the committed mask.
    pub inlier_count: usize,
    /// Outcome of the refinement step.
    pub refinement: MleOutcome,
}
