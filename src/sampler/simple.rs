//! The baseline single-site Gibbs sampler.

use crate::error::{Error, Result, WrapErr};
use crate::model::Model;
use crate::rng::Generator;
use crate::sampler::{FullSampler, UniformSampler};

/// Log-weights below this trigger an upward shift before exponentiation.
const STABILIZE_MIN: f64 = -8.0;
/// After shifting, the smallest log-weight sits at this value.
const STABILIZE_TARGET: f64 = 1.5;
/// Relative probability floor guaranteeing every value stays reachable.
const MIN_MASS: f64 = 1e-6;

/// Plain Gibbs: resample one variable at a time from its full conditional,
/// computed as the log-space product of every factor incident on it.
///
/// The sampler owns its model clone. Construction converts all factors to
/// log space and builds the variable → factor cross-reference; both are
/// refreshed through [`GibbsSimple::functions_changed`] after a collapse
/// rewrites the factor list.
pub struct GibbsSimple {
    model: Model,
    uni: UniformSampler,
    /// Factor indices incident on each variable.
    var_funcs: Vec<Vec<usize>>,
    /// Current state of the chain.
    last: Vec<usize>,
}

impl GibbsSimple {
    pub fn new(gen: Generator, mut model: Model) -> Result<Self> {
        if model.vars.is_empty() {
            return Err(Error::Model("cannot sample an empty model".into()));
        }

        for f in &mut model.funcs {
            f.use_log_space()
                .wrap_err(format!("converting factor {} for sampling", f.name))?;
        }

        let uni = UniformSampler::new(gen);

        let var_funcs = build_var_funcs(&model)?;

        let mut last = Vec::with_capacity(model.vars.len());
        for v in &model.vars {
            last.push(match v.fixed {
                Some(fv) => fv,
                None => uni.uni_sample(v.card)?,
            });
        }

        Ok(Self {
            model,
            uni,
            var_funcs,
            last,
        })
    }

    pub fn uniform(&self) -> &UniformSampler {
        &self.uni
    }

    /// Factor indices incident on `var_id`.
    pub fn var_funcs(&self, var_id: usize) -> &[usize] {
        &self.var_funcs[var_id]
    }

    /// Resamples variable `idx` from its full conditional given the current
    /// state, writes the updated full state into `out`, and returns `idx`.
    pub fn sample_var(&mut self, idx: usize, out: &mut [usize]) -> Result<usize> {
        if out.len() != self.model.vars.len() {
            return Err(Error::Contract(format!(
                "sample buffer size {} != variable count {}",
                out.len(),
                self.model.vars.len()
            )));
        }
        if idx >= self.model.vars.len() {
            return Err(Error::Contract(format!(
                "variable index {idx} out of range"
            )));
        }

        let card = self.model.vars[idx].card;

        let next = if self.model.vars[idx].collapsed {
            // A collapsed variable has no incident factors left; its cached
            // marginal is already the exact distribution to draw from.
            self.uni
                .weighted_sample(card, &self.model.vars[idx].marginal)
                .wrap_err(format!(
                    "drawing collapsed variable {}",
                    self.model.vars[idx].name
                ))?
        } else {
            let mut weights = vec![0.0f64; card];

            let mut call_vals = self.uni.pool().get();
            for &fi in &self.var_funcs[idx] {
                let f = &self.model.funcs[fi];

                call_vals.clear();
                call_vals.extend(f.vars.iter().map(|&vid| self.last[vid]));
                let vpos = f.vars.iter().position(|&vid| vid == idx).ok_or_else(|| {
                    Error::Contract(format!(
                        "factor {} indexed for variable {idx} but does not contain it",
                        f.name
                    ))
                })?;

                for (u, w) in weights.iter_mut().enumerate() {
                    call_vals[vpos] = u;
                    *w += f.eval(&call_vals).wrap_err(format!(
                        "evaluating factor {} for variable {}",
                        f.name, self.model.vars[idx].name
                    ))?;
                }
            }
            self.uni.pool().put(call_vals);

            // Shift up before exponentiating so small conditionals don't
            // underflow to an all-zero weight vector.
            let min_w = weights.iter().cloned().fold(f64::INFINITY, f64::min);
            if min_w < STABILIZE_MIN {
                let shift = min_w - STABILIZE_TARGET;
                for w in &mut weights {
                    *w -= shift;
                }
            }

            let mut total = 0.0;
            for w in &mut weights {
                *w = w.exp();
                total += *w;
            }

            // Minimum-mass floor: every value keeps at least MIN_MASS
            // relative probability, which Gibbs ergodicity requires.
            for w in &mut weights {
                if *w / total < MIN_MASS {
                    let add = total * MIN_MASS;
                    *w += add;
                    total += add;
                }
            }

            if !total.is_finite() || total <= 0.0 {
                return Err(Error::Numerical(format!(
                    "conditional for variable {} degenerated to total {total}",
                    self.model.vars[idx].name
                )));
            }

            self.uni
                .weighted_sample(card, &weights)
                .wrap_err(format!(
                    "drawing variable {}",
                    self.model.vars[idx].name
                ))?
        };

        self.last[idx] = next;
        out.copy_from_slice(&self.last);
        self.model.vars[idx].bump_state("Selections");
        Ok(idx)
    }

    /// Rebuilds bookkeeping after the factor list was rewritten: refreshes
    /// the cross-reference, verifies every factor stayed in log space, and
    /// re-seeds the chain state from the variables' current marginals.
    pub fn functions_changed(&mut self) -> Result<()> {
        for f in &self.model.funcs {
            if !f.is_log {
                return Err(Error::Contract(format!(
                    "factor {} is not in log space",
                    f.name
                )));
            }
        }

        let mut var_funcs = vec![Vec::new(); self.model.vars.len()];
        for (fi, f) in self.model.funcs.iter().enumerate() {
            for &vid in &f.vars {
                var_funcs[vid].push(fi);
            }
        }
        for (i, v) in self.model.vars.iter().enumerate() {
            if var_funcs[i].is_empty() && v.is_free() {
                return Err(Error::Model(format!(
                    "variable {} appears in no factor",
                    v.name
                )));
            }
        }
        self.var_funcs = var_funcs;

        self.last.clear();
        for v in &self.model.vars {
            self.last.push(match v.fixed {
                Some(fv) => fv,
                None => self
                    .uni
                    .weighted_sample(v.card, &v.marginal)
                    .wrap_err(format!("re-seeding variable {}", v.name))?,
            });
        }

        Ok(())
    }
}

fn build_var_funcs(model: &Model) -> Result<Vec<Vec<usize>>> {
    let mut var_funcs = vec![Vec::new(); model.vars.len()];
    for (fi, f) in model.funcs.iter().enumerate() {
        for &vid in &f.vars {
            var_funcs[vid].push(fi);
        }
    }
    for (i, v) in model.vars.iter().enumerate() {
        if var_funcs[i].is_empty() {
            return Err(Error::Model(format!(
                "variable {} appears in no factor",
                v.name
            )));
        }
    }
    Ok(var_funcs)
}

impl FullSampler for GibbsSimple {
    fn sample(&mut self, out: &mut [usize]) -> Result<usize> {
        let idx = self
            .uni
            .var_sample(&self.model.vars, false)
            .wrap_err("selecting variable for Gibbs step")?;
        self.sample_var(idx, out)
    }

    fn model(&self) -> &Model {
        &self.model
    }

    fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse_model;

    fn sampler_for(uai: &str, seed: u64) -> GibbsSimple {
        let model = parse_model(uai).unwrap();
        GibbsSimple::new(Generator::new(seed), model).unwrap()
    }

    #[test]
    fn construction_converts_to_log_space() {
        let s = sampler_for("MARKOV\n1\n2\n1\n1 0\n2 0.25 0.75", 42);
        assert!(s.model().funcs.iter().all(|f| f.is_log));
    }

    #[test]
    fn construction_rejects_uncovered_variable() {
        // Second variable is in no factor.
        let model = parse_model("MARKOV\n2\n2 2\n1\n1 0\n2 0.25 0.75").unwrap();
        assert!(GibbsSimple::new(Generator::new(42), model).is_err());
    }

    #[test]
    fn one_variable_frequencies_track_factor() {
        let mut s = sampler_for("MARKOV\n1\n2\n1\n1 0\n2 0.25 0.75", 42);
        let mut out = vec![0usize; 1];
        let mut ones = 0usize;
        const N: usize = 4096;
        for _ in 0..N {
            let idx = s.sample(&mut out).unwrap();
            assert_eq!(idx, 0);
            if out[0] == 1 {
                ones += 1;
            }
        }
        let freq = ones as f64 / N as f64;
        assert!(
            (freq - 0.75).abs() < 0.2,
            "empirical frequency {freq} too far from 0.75"
        );
    }

    #[test]
    fn fixed_variables_stay_pinned() {
        let uai = "MARKOV\n2\n2 2\n1\n2 0 1\n4 0.1 0.9 0.9 0.1";
        let mut model = parse_model(uai).unwrap();
        crate::model::apply_evidence(&mut model, "1 0 1").unwrap();

        let mut s = GibbsSimple::new(Generator::new(42), model).unwrap();
        let mut out = vec![0usize; 2];
        for _ in 0..500 {
            let idx = s.sample(&mut out).unwrap();
            assert_eq!(idx, 1, "only the free variable may be selected");
            assert_eq!(out[0], 1, "evidence value must persist in every sample");
        }
    }

    #[test]
    fn conditionals_follow_the_pairwise_factor() {
        // P(B=1 | A=a) is 0.9 when a=0 and 0.1 when a=1; with A fixed at 0
        // the chain should spend ~90% of its time at B=1.
        let uai = "MARKOV\n2\n2 2\n1\n2 0 1\n4 0.1 0.9 0.9 0.1";
        let mut model = parse_model(uai).unwrap();
        crate::model::apply_evidence(&mut model, "1 0 0").unwrap();

        let mut s = GibbsSimple::new(Generator::new(42), model).unwrap();
        let mut out = vec![0usize; 2];
        let mut ones = 0usize;
        const N: usize = 4000;
        for _ in 0..N {
            s.sample(&mut out).unwrap();
            if out[1] == 1 {
                ones += 1;
            }
        }
        let freq = ones as f64 / N as f64;
        assert!((freq - 0.9).abs() < 0.05, "empirical frequency {freq}");
    }

    #[test]
    fn extreme_weights_survive_stabilization() {
        // Entries spanning many orders of magnitude exercise the shift and
        // the minimum-mass floor.
        let mut s = sampler_for("MARKOV\n1\n3\n1\n1 0\n3 1e-30 1e-30 1.0", 7);
        let mut out = vec![0usize; 1];
        for _ in 0..200 {
            s.sample(&mut out).unwrap();
            assert!(out[0] < 3);
        }
    }

    #[test]
    fn selection_counter_accumulates() {
        let mut s = sampler_for("MARKOV\n1\n2\n1\n1 0\n2 0.5 0.5", 42);
        let mut out = vec![0usize; 1];
        for _ in 0..10 {
            s.sample(&mut out).unwrap();
        }
        assert_eq!(s.model().vars[0].state["Selections"], 10.0);
    }

    #[test]
    fn sample_rejects_bad_buffer() {
        let mut s = sampler_for("MARKOV\n1\n2\n1\n1 0\n2 0.5 0.5", 42);
        let mut out = vec![0usize; 3];
        assert!(s.sample(&mut out).is_err());
    }
}
