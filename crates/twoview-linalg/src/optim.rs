//! Levenberg-Marquardt optimizer for dense nonlinear least squares
//!
//! Minimizes the cost `½‖r(x)‖²` of a residual function `r: ℝⁿ → ℝᵐ`.
//! The Jacobian is approximated by central differences and every iteration
//! solves the damped normal equations
//!
//! ```text
//! (JᵀJ + λ·diag(JᵀJ)) δ = −Jᵀr
//! ```
//!
//! Steps that do not decrease the cost are rejected and the damping grows;
//! accepted steps shrink it.

use faer::prelude::SpSolver;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during optimization.
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// The initial parameter vector is empty.
    #[error("Parameter vector is empty")]
    EmptyParameters,

    /// The residual function produced no residuals.
    #[error("Residual function returned no residuals")]
    EmptyResiduals,

    /// The residual function changed its output dimension between calls.
    #[error("Residual dimension changed from {expected} to {actual}")]
    ResidualDimensionMismatch {
        /// Dimension at the initial parameters.
        expected: usize,
        /// Dimension returned later.
        actual: usize,
    },

    /// The cost at the initial parameters is NaN or infinite.
    #[error("Cost at the initial parameters is not finite")]
    NonFiniteInitialCost,
}

/// Reason why the optimizer terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Relative cost decrease fell below the tolerance.
    CostConverged,
    /// Gradient infinity norm fell below the tolerance.
    GradientConverged,
    /// Step norm fell below the tolerance.
    StepConverged,
    /// Maximum iterations reached.
    MaxIterations,
    /// Damping exceeded its maximum without finding a descent step.
    LambdaMaxExceeded,
}

/// Result of an optimization run.
#[derive(Debug, Clone)]
pub struct LeastSquaresResult {
    /// Parameters at termination.
    pub params: Vec<f64>,
    /// Final cost `½‖r‖²`.
    pub cost: f64,
    /// First-order optimality: infinity norm of the gradient `Jᵀr`.
    pub optimality: f64,
    /// Number of iterations performed (accepted and rejected steps).
    pub iterations: usize,
    /// Reason for termination.
    pub termination_reason: TerminationReason,
}

/// Levenberg-Marquardt optimizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LevenbergMarquardt {
    /// Initial damping parameter.
    pub lambda_init: f64,
    /// Maximum damping parameter.
    pub lambda_max: f64,
    /// Factor for lambda adaptation.
    pub lambda_factor: f64,
    /// Maximum number of iterations.
    pub max_iterations: usize,
    /// Convergence threshold for the relative cost change.
    pub cost_tolerance: f64,
    /// Convergence threshold for the gradient infinity norm.
    pub gradient_tolerance: f64,
    /// Convergence threshold for the step norm relative to the parameter norm.
    pub step_tolerance: f64,
    /// Relative step used for the central-difference Jacobian.
    pub jacobian_step: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            lambda_init: 1e-3,
            lambda_max: 1e10,
            lambda_factor: 10.0,
            max_iterations: 200,
            cost_tolerance: 1e-12,
            gradient_tolerance: 1e-10,
            step_tolerance: 1e-12,
            jacobian_step: 1e-6,
        }
    }
}

impl LevenbergMarquardt {
    /// Floor applied to the diagonal of `JᵀJ` before scaling the damping term.
    const MIN_DIAGONAL: f64 = 1e-12;

    /// Create a new optimizer with default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the relative cost tolerance.
    pub fn with_cost_tolerance(mut self, tol: f64) -> Self {
        self.cost_tolerance = tol;
        self
    }

    /// Set the gradient tolerance.
    pub fn with_gradient_tolerance(mut self, tol: f64) -> Self {
        self.gradient_tolerance = tol;
        self
    }

    /// Set the initial damping.
    pub fn with_initial_lambda(mut self, lambda: f64) -> Self {
        self.lambda_init = lambda;
        self
    }

    /// Minimize `½‖residuals(x)‖²` starting from `x0`.
    ///
    /// # Arguments
    ///
    /// * `residuals` - Residual function. Must return the same number of residuals for every input.
    /// * `x0` - Initial parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the problem is empty, if the residual dimension is
    /// inconsistent, or if the initial cost is not finite.
    pub fn minimize<F>(&self, residuals: F, x0: &[f64]) -> Result<LeastSquaresResult, OptimizerError>
    where
        F: Fn(&[f64]) -> Vec<f64>,
    {
        if x0.is_empty() {
            return Err(OptimizerError::EmptyParameters);
        }

        let mut x = x0.to_vec();
        let mut r = residuals(&x);
        if r.is_empty() {
            return Err(OptimizerError::EmptyResiduals);
        }
        let m = r.len();
        let n = x.len();

        let mut cost = half_squared_norm(&r);
        if !cost.is_finite() {
            return Err(OptimizerError::NonFiniteInitialCost);
        }

        let mut lambda = self.lambda_init;
        let mut iterations = 0;
        let mut jacobian = self.numerical_jacobian(&residuals, &x, m)?;

        loop {
            let (jtj, jtr) = normal_equations(&jacobian, &r, m, n);
            let optimality = inf_norm(&jtr);

            let finish = |x: Vec<f64>,
                          cost: f64,
                          iterations: usize,
                          reason: TerminationReason|
             -> Result<LeastSquaresResult, OptimizerError> {
                log::debug!(
                    "LM terminated after {iterations} iterations: {reason:?}, cost {cost:e}, optimality {optimality:e}"
                );
                Ok(LeastSquaresResult {
                    params: x,
                    cost,
                    optimality,
                    iterations,
                    termination_reason: reason,
                })
            };

            if optimality < self.gradient_tolerance {
                return finish(x, cost, iterations, TerminationReason::GradientConverged);
            }
            if iterations >= self.max_iterations {
                return finish(x, cost, iterations, TerminationReason::MaxIterations);
            }
            iterations += 1;

            let delta = match self.solve_damped_system(&jtj, &jtr, lambda, n) {
                Some(delta) => delta,
                None => {
                    lambda *= self.lambda_factor;
                    if lambda > self.lambda_max {
                        return finish(x, cost, iterations, TerminationReason::LambdaMaxExceeded);
                    }
                    continue;
                }
            };

            let step_norm = l2_norm(&delta);
            if step_norm < self.step_tolerance * (l2_norm(&x) + self.step_tolerance) {
                return finish(x, cost, iterations, TerminationReason::StepConverged);
            }

            let candidate: Vec<f64> = x.iter().zip(&delta).map(|(a, b)| a + b).collect();
            let r_new = residuals(&candidate);
            if r_new.len() != m {
                return Err(OptimizerError::ResidualDimensionMismatch {
                    expected: m,
                    actual: r_new.len(),
                });
            }
            let new_cost = half_squared_norm(&r_new);

            if new_cost.is_finite() && new_cost < cost {
                let relative_cost_change = (cost - new_cost) / cost.max(f64::MIN_POSITIVE);
                x = candidate;
                r = r_new;
                cost = new_cost;
                lambda = (lambda / self.lambda_factor).max(1e-12);
                jacobian = self.numerical_jacobian(&residuals, &x, m)?;

                if relative_cost_change < self.cost_tolerance {
                    let (_, jtr) = normal_equations(&jacobian, &r, m, n);
                    let optimality = inf_norm(&jtr);
                    log::debug!("LM cost converged after {iterations} iterations, cost {cost:e}");
                    return Ok(LeastSquaresResult {
                        params: x,
                        cost,
                        optimality,
                        iterations,
                        termination_reason: TerminationReason::CostConverged,
                    });
                }
            } else {
                lambda *= self.lambda_factor;
                if lambda > self.lambda_max {
                    return finish(x, cost, iterations, TerminationReason::LambdaMaxExceeded);
                }
            }
        }
    }

    /// Central-difference Jacobian, row-major `m x n`.
    fn numerical_jacobian<F>(
        &self,
        residuals: &F,
        x: &[f64],
        m: usize,
    ) -> Result<Vec<f64>, OptimizerError>
    where
        F: Fn(&[f64]) -> Vec<f64>,
    {
        let n = x.len();
        let mut jacobian = vec![0.0; m * n];
        let mut probe = x.to_vec();

        for j in 0..n {
            let h = self.jacobian_step * x[j].abs().max(1.0);

            probe[j] = x[j] + h;
            let r_plus = residuals(&probe);
            probe[j] = x[j] - h;
            let r_minus = residuals(&probe);
            probe[j] = x[j];

            for len in [r_plus.len(), r_minus.len()] {
                if len != m {
                    return Err(OptimizerError::ResidualDimensionMismatch {
                        expected: m,
                        actual: len,
                    });
                }
            }

            for row in 0..m {
                jacobian[row * n + j] = (r_plus[row] - r_minus[row]) / (2.0 * h);
            }
        }

        Ok(jacobian)
    }

    /// Solve `(JᵀJ + λ·diag(JᵀJ)) δ = −Jᵀr`. Returns `None` for a non-finite solution.
    fn solve_damped_system(
        &self,
        jtj: &faer::Mat<f64>,
        jtr: &[f64],
        lambda: f64,
        n: usize,
    ) -> Option<Vec<f64>> {
        let mut h = jtj.clone();
        for i in 0..n {
            let d = jtj.read(i, i);
            h.write(i, i, d + lambda * d.max(Self::MIN_DIAGONAL));
        }

        let rhs = faer::Mat::<f64>::from_fn(n, 1, |i, _| -jtr[i]);
        let solution = h.partial_piv_lu().solve(rhs);
        let delta: Vec<f64> = (0..n).map(|i| solution.read(i, 0)).collect();

        delta.iter().all(|v| v.is_finite()).then_some(delta)
    }
}

fn normal_equations(jacobian: &[f64], r: &[f64], m: usize, n: usize) -> (faer::Mat<f64>, Vec<f64>) {
    let mut jtj = faer::Mat::<f64>::zeros(n, n);
    let mut jtr = vec![0.0; n];
    for row in 0..m {
        let jrow = &jacobian[row * n..(row + 1) * n];
        for i in 0..n {
            jtr[i] += jrow[i] * r[row];
            for j in i..n {
                let v = jtj.read(i, j) + jrow[i] * jrow[j];
                jtj.write(i, j, v);
            }
        }
    }
    for i in 0..n {
        for j in 0..i {
            jtj.write(i, j, jtj.read(j, i));
        }
    }
    (jtj, jtr)
}

fn half_squared_norm(r: &[f64]) -> f64 {
    0.5 * r.iter().map(|v| v * v).sum::<f64>()
}

fn l2_norm(v: &[f64]) -> f64 {
    v.iter().map(|a| a * a).sum::<f64>().sqrt()
}

fn inf_norm(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |acc, a| acc.max(a.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rosenbrock() -> Result<(), OptimizerError> {
        let lm = LevenbergMarquardt::default();
        let res = lm.minimize(|p| vec![10.0 * (p[1] - p[0] * p[0]), 1.0 - p[0]], &[-1.2, 1.0])?;
        assert_relative_eq!(res.params[0], 1.0, epsilon = 1e-5);
        assert_relative_eq!(res.params[1], 1.0, epsilon = 1e-5);
        assert!(res.cost < 1e-10);
        assert_ne!(res.termination_reason, TerminationReason::LambdaMaxExceeded);
        Ok(())
    }

    #[test]
    fn test_line_fit() -> Result<(), OptimizerError> {
        // y = 2x - 1 sampled without noise
        let xs: Vec<f64> = (0..10).map(|i| i as f64 * 0.5).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 2.0 * x - 1.0).collect();
        let res = LevenbergMarquardt::new().minimize(
            |p| xs.iter().zip(&ys).map(|(x, y)| p[0] * x + p[1] - y).collect(),
            &[0.0, 0.0],
        )?;
        assert_relative_eq!(res.params[0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(res.params[1], -1.0, epsilon = 1e-6);
        assert!(res.optimality < 1e-4);
        Ok(())
    }

    #[test]
    fn test_already_optimal() -> Result<(), OptimizerError> {
        let res = LevenbergMarquardt::new().minimize(|p| vec![p[0] - 3.0], &[3.0])?;
        assert_eq!(res.termination_reason, TerminationReason::GradientConverged);
        assert_eq!(res.iterations, 0);
        Ok(())
    }

    #[test]
    fn test_empty_problem() {
        let lm = LevenbergMarquardt::new();
        assert!(matches!(
            lm.minimize(|_| vec![1.0], &[]),
            Err(OptimizerError::EmptyParameters)
        ));
        assert!(matches!(
            lm.minimize(|_| Vec::new(), &[1.0]),
            Err(OptimizerError::EmptyResiduals)
        ));
        assert!(matches!(
            lm.minimize(|_| vec![f64::NAN], &[1.0]),
            Err(OptimizerError::NonFiniteInitialCost)
        ));
    }
}
