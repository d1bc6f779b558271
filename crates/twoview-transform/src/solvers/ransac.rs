//! Sampling consensus loops shared by the fundamental and homography solvers.

use rand::rngs::StdRng;
use rand::SeedableRng;
use twoview_linalg::{Mat3F64, Vec2F64};

use super::RansacParams;
use crate::stats::median;

/// A model family that can be fitted from minimal samples of correspondences.
pub(crate) trait Estimator {
    /// Minimal number of correspondences per sample.
    const SAMPLE_SIZE: usize;

    /// Candidate models from a minimal sample. Empty when the sample is degenerate.
    fn fit(x1: &[Vec2F64], x2: &[Vec2F64]) -> Vec<Mat3F64>;

    /// Least-squares model from an inlier set.
    fn refit(x1: &[Vec2F64], x2: &[Vec2F64]) -> Option<Mat3F64>;

    /// Squared residual of one correspondence, in pixels².
    fn residual(model: &Mat3F64, x1: &Vec2F64, x2: &Vec2F64) -> f64;
}

/// Best model and mask found by a consensus loop.
#[derive(Clone, Debug)]
pub(crate) struct Consensus {
    pub model: Mat3F64,
    pub mask: Vec<bool>,
    pub inlier_count: usize,
}

/// Lower bound on the LMedS inlier scale, in pixels.
const LMEDS_MIN_SIGMA: f64 = 1e-4;

/// Inlier ratio assumed by LMedS when bounding its iteration count.
const LMEDS_INLIER_RATIO: f64 = 0.5;

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => {
            let mut tr = rand::rng();
            StdRng::from_rng(&mut tr)
        }
    }
}

/// Number of samples needed to draw one outlier-free sample with `confidence`.
fn adaptive_iterations(
    confidence: f64,
    inlier_ratio: f64,
    sample_size: usize,
    max_iterations: usize,
) -> usize {
    if confidence <= 0.0 || confidence >= 1.0 || inlier_ratio <= 0.0 {
        return max_iterations;
    }
    let denom = (1.0 - inlier_ratio.powi(sample_size as i32)).max(1e-12).ln();
    if denom >= 0.0 {
        return max_iterations;
    }
    let n_iter = ((1.0 - confidence).ln() / denom).ceil();
    (n_iter.max(1.0) as usize).min(max_iterations)
}

fn score<E: Estimator>(
    model: &Mat3F64,
    x1: &[Vec2F64],
    x2: &[Vec2F64],
    threshold_sq: f64,
) -> (Vec<bool>, usize, f64) {
    let mut mask = vec![false; x1.len()];
    let mut count = 0usize;
    let mut total = 0.0f64;
    for (i, (a, b)) in x1.iter().zip(x2).enumerate() {
        let d = E::residual(model, a, b);
        if d <= threshold_sq {
            mask[i] = true;
            count += 1;
            total += d;
        }
    }
    (mask, count, total)
}

/// Refit on the inliers and keep the refit model when it does not lose inliers.
fn polish<E: Estimator>(
    consensus: Consensus,
    x1: &[Vec2F64],
    x2: &[Vec2F64],
    threshold_sq: f64,
) -> Consensus {
    let (in1, in2): (Vec<Vec2F64>, Vec<Vec2F64>) = x1
        .iter()
        .zip(x2)
        .zip(&consensus.mask)
        .filter(|(_, &m)| m)
        .map(|((a, b), _)| (*a, *b))
        .unzip();

    let Some(model) = E::refit(&in1, &in2) else {
        return consensus;
    };
    let (mask, count, _) = score::<E>(&model, x1, x2, threshold_sq);
    if count >= consensus.inlier_count {
        Consensus {
            model,
            mask,
            inlier_count: count,
        }
    } else {
        consensus
    }
}

/// RANSAC with an adaptive iteration count, followed by a refit on the inliers.
///
/// Returns `None` if there are too few correspondences or no sample yields a
/// model with a full minimal set of inliers.
pub(crate) fn ransac<E: Estimator>(
    x1: &[Vec2F64],
    x2: &[Vec2F64],
    params: &RansacParams,
) -> Option<Consensus> {
    let n = x1.len();
    let m = E::SAMPLE_SIZE;
    if n < m || x2.len() != n {
        return None;
    }

    let mut rng = make_rng(params.random_seed);
    let threshold_sq = params.threshold * params.threshold;

    let mut best: Option<Consensus> = None;
    let mut best_score = f64::INFINITY;
    let mut required_iterations = params.max_iterations;
    let mut iterations = 0usize;
    let mut s1 = Vec::with_capacity(m);
    let mut s2 = Vec::with_capacity(m);

    while iterations < required_iterations {
        iterations += 1;
        let sample = rand::seq::index::sample(&mut rng, n, m);
        s1.clear();
        s2.clear();
        for idx in sample.iter() {
            s1.push(x1[idx]);
            s2.push(x2[idx]);
        }

        for model in E::fit(&s1, &s2) {
            let (mask, count, total) = score::<E>(&model, x1, x2, threshold_sq);
            let best_count = best.as_ref().map_or(0, |b| b.inlier_count);
            if count > best_count || (count == best_count && count > 0 && total < best_score) {
                best = Some(Consensus {
                    model,
                    mask,
                    inlier_count: count,
                });
                best_score = total;
                required_iterations = adaptive_iterations(
                    params.confidence,
                    count as f64 / n as f64,
                    m,
                    params.max_iterations,
                );
            }
        }
    }

    let best = best.filter(|b| b.inlier_count >= m)?;
    let best = polish::<E>(best, x1, x2, threshold_sq);
    log::debug!(
        "RANSAC found {} / {} inliers after {} iterations",
        best.inlier_count,
        n,
        iterations
    );
    Some(best)
}

/// Least median of squares, followed by a refit on the inliers.
///
/// The inlier threshold is derived from the best median residual with the
/// usual robust scale `2.5 · 1.4826 · (1 + 5 / (n - m)) · sqrt(median)`.
pub(crate) fn lmeds<E: Estimator>(
    x1: &[Vec2F64],
    x2: &[Vec2F64],
    params: &RansacParams,
) -> Option<Consensus> {
    let n = x1.len();
    let m = E::SAMPLE_SIZE;
    if n < m || x2.len() != n {
        return None;
    }

    let mut rng = make_rng(params.random_seed);
    let iterations = adaptive_iterations(
        params.confidence,
        LMEDS_INLIER_RATIO,
        m,
        params.max_iterations,
    );

    let mut best: Option<(Mat3F64, f64)> = None;
    let mut residuals = vec![0.0; n];
    let mut s1 = Vec::with_capacity(m);
    let mut s2 = Vec::with_capacity(m);

    for _ in 0..iterations {
        let sample = rand::seq::index::sample(&mut rng, n, m);
        s1.clear();
        s2.clear();
        for idx in sample.iter() {
            s1.push(x1[idx]);
            s2.push(x2[idx]);
        }

        for model in E::fit(&s1, &s2) {
            for (r, (a, b)) in residuals.iter_mut().zip(x1.iter().zip(x2)) {
                *r = E::residual(&model, a, b);
            }
            let med = median(&residuals);
            if med.is_finite() && best.as_ref().map_or(true, |(_, b)| med < *b) {
                best = Some((model, med));
            }
        }
    }

    let (model, med) = best?;
    let correction = if n > m {
        1.0 + 5.0 / (n - m) as f64
    } else {
        1.0
    };
    let sigma = (2.5 * 1.4826 * correction * med.sqrt()).max(LMEDS_MIN_SIGMA);
    let threshold_sq = sigma * sigma;

    let (mask, count, _) = score::<E>(&model, x1, x2, threshold_sq);
    if count < m {
        return None;
    }
    let best = polish::<E>(
        Consensus {
            model,
            mask,
            inlier_count: count,
        },
        x1,
        x2,
        threshold_sq,
    );
    log::debug!(
        "LMedS median residual {med:e}, sigma {sigma:e}, {} / {} inliers after {} iterations",
        best.inlier_count,
        n,
        iterations
    );
    Some(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adaptive_iterations() {
        // all inliers: a single sample suffices
        assert_eq!(adaptive_iterations(0.99, 1.0, 7, 2000), 1);
        // half inliers with 7-point samples
        let n = adaptive_iterations(0.99, 0.5, 7, 2000);
        assert!(n > 500 && n < 700, "{n}");
        // capped by the maximum
        assert_eq!(adaptive_iterations(0.99, 0.1, 7, 2000), 2000);
        assert_eq!(adaptive_iterations(1.0, 0.5, 7, 2000), 2000);
    }
}
