use anyhow::{bail, Result};
use serde::Serialize;

use crate::merge::MergedPeaks;

/// Parameters of the fitted normalization model `M = slope * A + intercept`.
/// Produced once per run and never mutated.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct MaFit {
    pub intercept: f64,
    pub slope: f64,
}

// Huber tuning constant and IRLS loop bounds.
const HUBER_T: f64 = 1.345;
const MAX_ITERATIONS: usize = 50;
const CONVERGENCE_TOL: f64 = 1e-8;

// Pairs with |M| beyond this are presumed artifactual and never enter the fit.
const M_VALUE_LIMIT: f64 = 10.0;

/// Fit the normalization model from trusted merged peaks.
///
/// Trusted means the merged peak's summit-to-summit distance is at most
/// `max_summit_gap` (and nonzero when `include_zero_gap` is off) and its raw
/// |M| does not exceed 10. An empty selection is a fatal error: there is no
/// basis for normalization.
pub fn fit_ma_model(
    merged: &MergedPeaks,
    max_summit_gap: u64,
    include_zero_gap: bool,
) -> Result<MaFit> {
    let mut a_values = Vec::new();
    let mut m_values = Vec::new();

    for (chrom, peaks) in &merged.peaks {
        let Some(gaps) = merged.summit_gaps.get(chrom) else {
            continue;
        };
        for (pk, &gap) in peaks.iter().zip(gaps) {
            if gap > max_summit_gap || (!include_zero_gap && gap == 0) {
                continue;
            }
            if pk.m_value.abs() > M_VALUE_LIMIT {
                continue;
            }
            a_values.push(pk.a_value);
            m_values.push(pk.m_value);
        }
    }

    if a_values.len() < 2 {
        bail!(
            "cannot fit normalization model: {} usable merged peaks after filtering \
             (summit distance cutoff {})",
            a_values.len(),
            max_summit_gap
        );
    }

    let (intercept, slope) = robust_line(&a_values, &m_values);
    Ok(MaFit { intercept, slope })
}

/// Huber-weighted iteratively reweighted least squares, seeded with the
/// ordinary fit. Residuals are standardized by their median absolute
/// deviation each round.
fn robust_line(x: &[f64], y: &[f64]) -> (f64, f64) {
    let mut weights = vec![1.0; x.len()];
    let (mut intercept, mut slope) = weighted_line(x, y, &weights);

    for _ in 0..MAX_ITERATIONS {
        let residuals: Vec<f64> = x
            .iter()
            .zip(y)
            .map(|(&xi, &yi)| yi - (slope * xi + intercept))
            .collect();
        let scale = mad_scale(&residuals);
        if scale < f64::EPSILON {
            break;
        }

        for (weight, residual) in weights.iter_mut().zip(&residuals) {
            let standardized = (residual / scale).abs();
            *weight = if standardized <= HUBER_T {
                1.0
            } else {
                HUBER_T / standardized
            };
        }

        let (next_intercept, next_slope) = weighted_line(x, y, &weights);
        let delta = (next_intercept - intercept)
            .abs()
            .max((next_slope - slope).abs());
        intercept = next_intercept;
        slope = next_slope;
        if delta < CONVERGENCE_TOL {
            break;
        }
    }

    (intercept, slope)
}

// Weighted least squares of y on x via the closed-form normal equations.
fn weighted_line(x: &[f64], y: &[f64], weights: &[f64]) -> (f64, f64) {
    let mut sum_w = 0.0;
    let mut sum_wx = 0.0;
    let mut sum_wy = 0.0;
    let mut sum_wxx = 0.0;
    let mut sum_wxy = 0.0;
    for ((&xi, &yi), &wi) in x.iter().zip(y).zip(weights) {
        sum_w += wi;
        sum_wx += wi * xi;
        sum_wy += wi * yi;
        sum_wxx += wi * xi * xi;
        sum_wxy += wi * xi * yi;
    }

    let denom = sum_w * sum_wxx - sum_wx * sum_wx;
    if denom.abs() < f64::EPSILON {
        // no spread on the A axis: flat line through the weighted mean
        return (sum_wy / sum_w, 0.0);
    }
    let slope = (sum_w * sum_wxy - sum_wx * sum_wy) / denom;
    let intercept = (sum_wy - slope * sum_wx) / sum_w;
    (intercept, slope)
}

// Median absolute deviation of the residuals, rescaled to estimate sigma.
fn mad_scale(residuals: &[f64]) -> f64 {
    let mut magnitudes: Vec<f64> = residuals.iter().map(|r| r.abs()).collect();
    magnitudes.sort_by(|a, b| a.partial_cmp(b).expect("residuals are finite"));
    let mid = magnitudes.len() / 2;
    let median = if magnitudes.len() % 2 == 0 {
        (magnitudes[mid - 1] + magnitudes[mid]) / 2.0
    } else {
        magnitudes[mid]
    };
    median / 0.6745
}
