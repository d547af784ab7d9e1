//! Chains: sampler + history + convergence bookkeeping.

use rayon::prelude::*;

use crate::buffer::CircularInt;
use crate::error::{Error, Result, WrapErr};
use crate::model::{Measure, Variable};
use crate::sampler::FullSampler;

/// One Markov chain: a sampler (owning its model clone), a per-variable
/// sample history sized to the convergence window, and the running state.
pub struct Chain {
    pub sampler: Box<dyn FullSampler>,
    pub convergence_window: usize,
    pub history: Vec<CircularInt>,
    pub total_sample_count: u64,
    pub last_sample: Vec<usize>,
}

impl Chain {
    /// Builds the chain and performs `burn_in` warm-up samples that update
    /// neither marginals nor history.
    pub fn new(sampler: Box<dyn FullSampler>, cw: usize, burn_in: u64) -> Result<Chain> {
        let n = sampler.model().vars.len();
        let mut ch = Chain {
            sampler,
            convergence_window: cw,
            history: (0..n).map(|_| CircularInt::new(cw)).collect(),
            total_sample_count: 0,
            last_sample: vec![0; n],
        };

        for _ in 0..burn_in {
            ch.one_sample(false).wrap_err("chain burn-in")?;
        }

        Ok(ch)
    }

    /// The chain's current variable estimates.
    pub fn variables(&self) -> &[Variable] {
        &self.sampler.model().vars
    }

    /// Takes a single sample; with `update_vars` the result is folded into
    /// the marginal counters and the history ring.
    fn one_sample(&mut self, update_vars: bool) -> Result<()> {
        let idx = self
            .sampler
            .sample(&mut self.last_sample)
            .wrap_err("taking sample")?;

        let model = self.sampler.model_mut();
        match model.vars.get_mut(idx) {
            None => {
                return Err(Error::Contract(format!(
                    "sampler returned invalid variable index {idx}"
                )))
            }
            Some(v) => {
                if v.fixed.is_some() {
                    return Err(Error::Contract(format!(
                        "sampler returned evidence variable {}",
                        v.name
                    )));
                }

                if update_vars {
                    let value = self.last_sample[idx];
                    if !v.collapsed {
                        v.marginal[value] += 1.0;
                    }
                    self.history[idx].add(value);
                    self.total_sample_count += 1;
                }
            }
        }

        Ok(())
    }

    /// Generates samples until every free variable has gained at least
    /// `convergence_window + 1` entries beyond its pre-call history.
    /// Samples run in batches of 2N between termination checks.
    pub fn advance(&mut self) -> Result<()> {
        let cw = self.convergence_window as u64;
        let thresholds: Vec<u64> = self
            .history
            .iter()
            .map(|h| h.total_seen + cw + 1)
            .collect();

        let batch_size = self.sampler.model().vars.len() * 2;

        loop {
            let keep_running = {
                let vars = &self.sampler.model().vars;
                self.history
                    .iter()
                    .enumerate()
                    .any(|(i, h)| vars[i].is_free() && h.total_seen < thresholds[i])
            };
            if !keep_running {
                break;
            }

            for _ in 0..batch_size {
                self.one_sample(true)?;
            }
        }

        Ok(())
    }

    /// Within-chain and between-chain distance for one variable: the
    /// history window is split into halves, each half becomes a count
    /// marginal, and `dist_fn` compares them (within) and compares the
    /// merged estimate against the full window (between).
    pub fn chain_dist(
        &self,
        dist_fn: Measure,
        var_idx: usize,
        merged_var: &Variable,
    ) -> Result<(f64, f64)> {
        let hist = &self.history[var_idx];
        if hist.total_seen < self.convergence_window as u64 {
            return Err(Error::Contract(format!(
                "total seen {} < convergence window {}",
                hist.total_seen, self.convergence_window
            )));
        }

        let vsrc = &self.sampler.model().vars[var_idx];
        if vsrc.card != merged_var.card {
            return Err(Error::Contract(format!(
                "variable card mismatch on {}",
                vsrc.name
            )));
        }

        let mut v1 = vsrc.clone();
        let mut v2 = vsrc.clone();
        v1.marginal.fill(1e-8);
        v2.marginal.fill(1e-8);

        for val in hist.first_half().into_iter().flatten() {
            v1.marginal[val] += 1.0;
        }
        for val in hist.second_half().into_iter().flatten() {
            v2.marginal[val] += 1.0;
        }

        let within = dist_fn(&v1, &v2);

        // Fold the halves together for the full-window estimate.
        for (a, b) in v1.marginal.iter_mut().zip(&v2.marginal) {
            *a += b;
        }
        let between = dist_fn(merged_var, &v1);

        Ok((within, between))
    }
}

/// Advances every chain concurrently and joins them all before returning.
/// A failure inside a chain task is a logic bug (e.g. the sampler updated a
/// fixed variable), so it aborts the process rather than limping on.
pub fn advance_chains(chains: &mut [Chain]) {
    chains.par_iter_mut().for_each(|ch| {
        ch.advance().expect("async sample generation failed");
    });
}

/// Combines per-chain estimates into one variable array. A variable that
/// any chain collapsed contributes that chain's analytic marginal verbatim;
/// everything else sums raw counts across chains.
pub fn merge_chains(chains: &[Chain]) -> Result<Vec<Variable>> {
    if chains.is_empty() {
        return Err(Error::Contract("cannot merge zero chains".into()));
    }
    if chains.len() == 1 {
        return Ok(chains[0].variables().to_vec());
    }

    let var_len = chains[0].variables().len();
    let mut vars = Vec::with_capacity(var_len);
    let mut from_collapse = vec![false; var_len];

    for var_idx in 0..var_len {
        let found = chains
            .iter()
            .map(|ch| &ch.variables()[var_idx])
            .find(|v| v.collapsed);
        match found {
            Some(v) => {
                from_collapse[var_idx] = true;
                vars.push(v.clone());
            }
            None => vars.push(chains[0].variables()[var_idx].clone()),
        }
    }

    for ch in &chains[1..] {
        if ch.variables().len() != var_len {
            return Err(Error::Contract(format!(
                "cannot merge chain with {} vars into {var_len} vars",
                ch.variables().len()
            )));
        }
        for (var_idx, src) in ch.variables().iter().enumerate() {
            if from_collapse[var_idx] {
                continue; // analytic marginals are never summed
            }
            for (dst, val) in vars[var_idx].marginal.iter_mut().zip(&src.marginal) {
                *dst += val;
            }
        }
    }

    Ok(vars)
}

/// Per-variable convergence diagnostics in the Gelman-Rubin style: the
/// ratio of pooled to within-chain variation, via each chain's split-window
/// distances. Values near 1 indicate convergence. Fixed and collapsed
/// variables report exactly 1. Pass pre-merged variables to avoid a repeat
/// merge; `None` merges internally.
pub fn chain_convergence(
    chains: &[Chain],
    dist_fn: Measure,
    merged: Option<&[Variable]>,
) -> Result<Vec<f64>> {
    if chains.len() < 2 {
        return Err(Error::Contract(
            "convergence requires at least 2 chains".into(),
        ));
    }

    let merged_owned;
    let merged_vars = match merged {
        Some(m) if !m.is_empty() => m,
        _ => {
            merged_owned = merge_chains(chains)?;
            &merged_owned
        }
    };

    let sample_count = chains[0].convergence_window as f64;
    let chain_count = chains.len() as f64;

    let b_norm = sample_count / (chain_count - 1.0);
    let w_factor = (sample_count - 1.0) / sample_count;
    let b_factor = (chain_count + 1.0) / (chain_count * sample_count);

    let mut vals = vec![0.0; merged_vars.len()];
    for (i, v) in merged_vars.iter().enumerate() {
        if v.collapsed || v.fixed.is_some() {
            vals[i] = 1.0;
            continue;
        }

        let mut w = 1e-8;
        let mut b = 1e-8;
        for ch in chains {
            let (w_one, b_one) = ch.chain_dist(dist_fn, i, v)?;
            w += w_one;
            b += b_one;
        }
        w /= chain_count;
        b *= b_norm;

        let vhat = (w_factor * w) + (b_factor * b);
        vals[i] = ((4.0 * vhat) / (2.0 * w)).sqrt();
    }

    Ok(vals)
}
