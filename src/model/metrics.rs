//! Distances between estimated marginal distributions.
//!
//! Every function takes two variables of matching cardinality and normalizes
//! both marginals internally (with a small floor against zero sums), so the
//! inputs may be raw sample counts. These double as scoring metrics against
//! a reference solution and as the distance kernel for chain-convergence
//! diagnostics.

use crate::error::{Error, Result};
use crate::model::Variable;

const EPS: f64 = 1e-12;

/// Distance kernel signature used by convergence and adaptation.
pub type Measure = fn(&Variable, &Variable) -> f64;

fn totals(v1: &Variable, v2: &Variable) -> (f64, f64) {
    let tot1: f64 = v1.marginal.iter().sum();
    let tot2: f64 = v2.marginal.iter().sum();
    (tot1.max(EPS), tot2.max(EPS))
}

/// Maximum absolute difference between the two (normalized) distributions.
pub fn max_abs_diff(v1: &Variable, v2: &Variable) -> f64 {
    let (tot1, tot2) = totals(v1, v2);
    v1.marginal
        .iter()
        .zip(&v2.marginal)
        .map(|(&p1, &p2)| (p1 / tot1 - p2 / tot2).abs())
        .fold(0.0, f64::max)
}

/// Mean absolute difference between the two (normalized) distributions.
pub fn mean_abs_diff(v1: &Variable, v2: &Variable) -> f64 {
    if v1.card < 1 {
        return 0.0;
    }
    let (tot1, tot2) = totals(v1, v2);
    let sum: f64 = v1
        .marginal
        .iter()
        .zip(&v2.marginal)
        .map(|(&p1, &p2)| (p1 / tot1 - p2 / tot2).abs())
        .sum();
    sum / v1.card as f64
}

/// Hellinger distance: sum((sqrt(p) - sqrt(q))^2) / sqrt(2).
pub fn hellinger_diff(v1: &Variable, v2: &Variable) -> f64 {
    let (tot1, tot2) = totals(v1, v2);
    let sum: f64 = v1
        .marginal
        .iter()
        .zip(&v2.marginal)
        .map(|(&p1, &p2)| {
            let d = (p1 / tot1).sqrt() - (p2 / tot2).sqrt();
            d * d
        })
        .sum();
    sum / std::f64::consts::SQRT_2
}

// KL divergence in bits; strictly a subroutine for js_divergence, so no
// checks and inputs are assumed normalized. Zero-probability entries
// contribute nothing (the 0*log(0) = 0 convention).
fn kl_divergence(p: &[f64], q: &[f64]) -> f64 {
    p.iter()
        .zip(q)
        .map(|(&p1, &q1)| if p1 > 0.0 { p1 * (p1 / q1).log2() } else { 0.0 })
        .sum()
}

/// Jensen-Shannon divergence, the symmetric form of KL, in [0, 1] for
/// normalized inputs.
pub fn js_divergence(v1: &Variable, v2: &Variable) -> f64 {
    let (tot1, tot2) = totals(v1, v2);

    let card = v1.card;
    let mut p1n = vec![0.0; card];
    let mut p2n = vec![0.0; card];
    let mut mid = vec![0.0; card];
    for i in 0..card {
        p1n[i] = v1.marginal[i] / tot1;
        p2n[i] = v2.marginal[i] / tot2;
        mid[i] = (p1n[i] + p2n[i]) * 0.5;
    }

    0.5 * (kl_divergence(&p1n, &mid) + kl_divergence(&p2n, &mid))
}

/// All error metrics across a variable list at once.
///
/// `mean_*` fields average each pairwise distance over the un-fixed
/// variables; `max_*` fields hold the worst variable. So `mean_max_abs` is
/// the mean (over variables) of the per-variable maximum absolute error.
#[derive(Debug, Clone, Default)]
pub struct ErrorSuite {
    pub mean_mean_abs: f64,
    pub mean_max_abs: f64,
    pub mean_hellinger: f64,
    pub mean_js: f64,

    pub max_mean_abs: f64,
    pub max_max_abs: f64,
    pub max_hellinger: f64,
    pub max_js: f64,
}

impl ErrorSuite {
    /// Computes every metric over the paired lists, skipping variables fixed
    /// by evidence on either side. Errors when the lists disagree on length
    /// or cardinality, or when no un-fixed variables remain.
    pub fn new(vars1: &[Variable], vars2: &[Variable]) -> Result<ErrorSuite> {
        if vars1.len() != vars2.len() {
            return Err(Error::Contract(format!(
                "variable count mismatch {} != {}",
                vars1.len(),
                vars2.len()
            )));
        }

        for (v1, v2) in vars1.iter().zip(vars2) {
            if v1.card != v2.card {
                return Err(Error::Contract(format!(
                    "variable card mismatch {} != {} on {}",
                    v1.card, v2.card, v1.name
                )));
            }
        }

        let mut es = ErrorSuite::default();
        let mut var_count = 0usize;

        for (v1, v2) in vars1.iter().zip(vars2) {
            if v1.fixed.is_some() || v2.fixed.is_some() {
                continue;
            }
            var_count += 1;

            let d = mean_abs_diff(v1, v2);
            es.mean_mean_abs += d;
            es.max_mean_abs = es.max_mean_abs.max(d);

            let d = max_abs_diff(v1, v2);
            es.mean_max_abs += d;
            es.max_max_abs = es.max_max_abs.max(d);

            let d = hellinger_diff(v1, v2);
            es.mean_hellinger += d;
            es.max_hellinger = es.max_hellinger.max(d);

            let d = js_divergence(v1, v2);
            es.mean_js += d;
            es.max_js = es.max_js.max(d);
        }

        if var_count < 1 {
            return Err(Error::Contract("no un-fixed variables to score".into()));
        }

        let fc = var_count as f64;
        es.mean_mean_abs /= fc;
        es.mean_max_abs /= fc;
        es.mean_hellinger /= fc;
        es.mean_js /= fc;

        Ok(es)
    }
}
