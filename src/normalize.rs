use rayon::prelude::*;

use crate::model::MaFit;
use crate::peaks::{Peak, PeakCollection};

// Totals below this use exact binomial coefficients; larger totals switch to
// the Stirling log form to avoid overflow.
const EXACT_TOTAL_LIMIT: f64 = 20.0;

// Underflow guard applied to the log probability before exponentiation.
const LOG_P_FLOOR: f64 = -500.0;

/// Rescale one peak's sample-A density onto the fitted model and compute its
/// differential-binding significance.
///
/// The closed form solves the model equation for a density transform that is
/// self-consistent with the M and A definitions, so common peaks come out
/// with M close to zero after rescaling.
pub fn normalize_peak(pk: &mut Peak, fit: &MaFit) {
    let log2_density_b = pk.read_density_b.log2();
    let normalized_log2_density_a = (2.0 - fit.slope) * pk.read_density_a.log2()
        / (2.0 + fit.slope)
        - 2.0 * fit.intercept / (2.0 + fit.slope);

    pk.normalized_density_a = normalized_log2_density_a.exp2();
    pk.normalized_m_value = normalized_log2_density_a - log2_density_b;
    pk.normalized_a_value = (normalized_log2_density_a + log2_density_b) / 2.0;
    pk.p_value = split_significance(pk.normalized_density_a, pk.read_density_b);
}

/// Normalize every peak of the collection in place, one rayon task per
/// chromosome.
pub fn normalize_collection(pks: &mut PeakCollection, fit: &MaFit) {
    let chroms: Vec<&mut Vec<Peak>> = pks.values_mut().collect();
    chroms.into_par_iter().for_each(|peaks| {
        for pk in peaks.iter_mut() {
            normalize_peak(pk, fit);
        }
    });
}

// Two-sided probability of a count split at least this extreme under a
// fair-coin null, on rounded counts x (floored at 1) and y.
fn split_significance(density_a: f64, density_b: f64) -> f64 {
    let x = density_a.round().max(1.0);
    let y = density_b.round();
    let total = x + y;

    if total < EXACT_TOTAL_LIMIT {
        let n = total as u64;
        let tail = (-(total + 1.0)).exp2();
        let p1 = binomial(n, x as u64) * tail;
        let p2 = binomial(n, y as u64) * tail;
        p1.max(p2)
    } else {
        let log_p = total * total.ln()
            - x_ln_x(x)
            - x_ln_x(y)
            - (total + 1.0) * std::f64::consts::LN_2;
        log_p.max(LOG_P_FLOOR).exp()
    }
}

// x ln x with the limit value 0 at x = 0.
fn x_ln_x(v: f64) -> f64 {
    if v > 0.0 { v * v.ln() } else { 0.0 }
}

// Binomial coefficient in floating point; totals on this path stay below 20,
// where the product is exact.
fn binomial(n: u64, k: u64) -> f64 {
    let k = k.min(n - k);
    let mut value = 1.0;
    for i in 0..k {
        value = value * (n - i) as f64 / (i + 1) as f64;
    }
    value.round()
}
