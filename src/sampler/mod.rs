//! Sampling primitives and the sampler contracts.
//!
//! Three capabilities are kept separate: drawing a full sample
//! ([`FullSampler`]), selecting which variable to resample, and drawing from
//! a weighted categorical. The latter two are methods on [`UniformSampler`],
//! which every Gibbs variant embeds.

mod adaptive;
mod chain;
mod collapsed;
mod simple;

pub use adaptive::{AdaptStrategy, ConvergenceAdapt, MAX_CHAINS};
pub use chain::{advance_chains, chain_convergence, merge_chains, Chain};
pub use collapsed::{GibbsCollapsed, NEIGHBOR_VAR_MAX};
pub use simple::GibbsSimple;

use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::model::{Model, Variable};
use crate::rng::Generator;

/// Cardinalities above this are rejected outright.
const MAX_CARD: usize = 1 << 30;

/// A sampler that produces one new full sample per call.
///
/// `sample` updates exactly one variable, copies the complete current state
/// into `out` (which must have one slot per model variable), and returns the
/// index of the variable it updated. The sampler owns its model clone;
/// chains reach the variables through `model`/`model_mut`.
pub trait FullSampler: Send {
    fn sample(&mut self, out: &mut [usize]) -> Result<usize>;
    fn model(&self) -> &Model;
    fn model_mut(&mut self) -> &mut Model;
}

/// Concurrent free list of index buffers, so per-sample scratch space is
/// reused instead of reallocated. Buffers come back empty.
#[derive(Clone, Default)]
pub struct ScratchPool {
    free: Arc<Mutex<Vec<Vec<usize>>>>,
}

impl ScratchPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Vec<usize> {
        self.free
            .lock()
            .expect("scratch pool mutex poisoned")
            .pop()
            .unwrap_or_default()
    }

    pub fn put(&self, mut buf: Vec<usize>) {
        buf.clear();
        self.free
            .lock()
            .expect("scratch pool mutex poisoned")
            .push(buf);
    }
}

/// Uniform and weighted draws over variable domains, plus variable
/// selection. Wraps the shared [`Generator`].
#[derive(Clone)]
pub struct UniformSampler {
    gen: Generator,
    pool: ScratchPool,
}

impl UniformSampler {
    pub fn new(gen: Generator) -> Self {
        Self {
            gen,
            pool: ScratchPool::new(),
        }
    }

    pub fn generator(&self) -> &Generator {
        &self.gen
    }

    pub fn pool(&self) -> &ScratchPool {
        &self.pool
    }

    /// Uniform integer in `[0, card)`.
    pub fn uni_sample(&self, card: usize) -> Result<usize> {
        if card < 1 {
            return Err(Error::Contract(format!("invalid card {card} for sampling")));
        }
        if card > MAX_CARD {
            return Err(Error::Contract(format!("card {card} exceeds {MAX_CARD}")));
        }
        if card == 1 {
            return Ok(0);
        }
        Ok(self.gen.int_below(card))
    }

    /// Draw from the categorical distribution with the given non-negative
    /// weights. Fails explicitly when the total mass vanishes.
    pub fn weighted_sample(&self, card: usize, weights: &[f64]) -> Result<usize> {
        if card < 1 || card > MAX_CARD {
            return Err(Error::Contract(format!("invalid card {card} for sampling")));
        }
        if weights.len() != card {
            return Err(Error::Contract(format!(
                "weights length {} != card {card}",
                weights.len()
            )));
        }

        let mut total = 0.0;
        for &w in weights {
            if w < 0.0 {
                return Err(Error::Contract(format!("negative weight {w}")));
            }
            total += w;
        }
        if !total.is_finite() || total <= 0.0 {
            return Err(Error::Numerical(format!(
                "weighted sample with degenerate total {total}"
            )));
        }

        let u = self.gen.float64() * total;
        let mut running = 0.0;
        for (i, &w) in weights.iter().enumerate() {
            running += w;
            if running >= u {
                return Ok(i);
            }
        }
        // Float round-off can leave running just below total.
        Ok(card - 1)
    }

    /// Picks uniformly among variables that are not fixed and, when
    /// `exclude_collapsed`, not collapsed either. Errors when nothing is
    /// eligible.
    pub fn var_sample(&self, vars: &[Variable], exclude_collapsed: bool) -> Result<usize> {
        let mut eligible = self.pool.get();

        for (i, v) in vars.iter().enumerate() {
            if v.fixed.is_some() {
                continue;
            }
            if exclude_collapsed && v.collapsed {
                continue;
            }
            eligible.push(i);
        }

        let picked = if eligible.is_empty() {
            Err(Error::Intractable(
                "no eligible variables to sample".into(),
            ))
        } else if eligible.len() == 1 {
            Ok(eligible[0])
        } else {
            Ok(eligible[self.gen.int_below(eligible.len())])
        };

        self.pool.put(eligible);
        picked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vars() -> Vec<Variable> {
        vec![Variable::new(0, 2).unwrap(), Variable::new(1, 2).unwrap()]
    }

    #[test]
    fn uni_sample_bounds() {
        let uni = UniformSampler::new(Generator::new(42));
        assert!(uni.uni_sample(0).is_err());
        assert!(uni.uni_sample(MAX_CARD + 1).is_err());
        assert_eq!(uni.uni_sample(1).unwrap(), 0);
        for _ in 0..100 {
            assert!(uni.uni_sample(3).unwrap() < 3);
        }
    }

    #[test]
    fn weighted_sample_contracts() {
        let uni = UniformSampler::new(Generator::new(42));
        assert!(uni.weighted_sample(0, &[]).is_err());
        assert!(uni.weighted_sample(MAX_CARD + 1, &[]).is_err());
        assert!(uni.weighted_sample(1, &[]).is_err());
        assert!(uni.weighted_sample(1, &[1.0, 1.0]).is_err());
        assert!(uni.weighted_sample(2, &[1.0, -1.0]).is_err());
        assert!(uni.weighted_sample(2, &[0.0, 0.0]).is_err());
        assert!(uni.weighted_sample(2, &[f64::NAN, 1.0]).is_err());
        assert_eq!(uni.weighted_sample(1, &[1.0]).unwrap(), 0);
    }

    #[test]
    fn weighted_sample_tracks_ratio() {
        let uni = UniformSampler::new(Generator::new(42));
        let weights = [100.1, 200.2];
        let mut counts = [0.0f64, 0.0];
        for _ in 0..5000 {
            counts[uni.weighted_sample(2, &weights).unwrap()] += 1.0;
        }
        let ratio = counts[0] / counts[1];
        assert!(
            (ratio - 0.5).abs() < 0.05,
            "expected ~1:2 split, got {counts:?}"
        );
    }

    #[test]
    fn var_sample_respects_flags() {
        let uni = UniformSampler::new(Generator::new(42));
        let mut vars = test_vars();

        assert!(uni.var_sample(&[], false).is_err());

        vars[0].collapsed = true;
        assert_eq!(uni.var_sample(&vars, true).unwrap(), 1);
        // Collapsed is still selectable when not excluded.
        let mut saw_zero = false;
        for _ in 0..200 {
            if uni.var_sample(&vars, false).unwrap() == 0 {
                saw_zero = true;
                break;
            }
        }
        assert!(saw_zero);

        vars[1].collapsed = true;
        assert!(uni.var_sample(&vars, true).is_err());
    }

    #[test]
    fn var_sample_never_returns_fixed() {
        let uni = UniformSampler::new(Generator::new(42));
        let mut vars = test_vars();

        vars[0].fixed = Some(0);
        for _ in 0..100 {
            assert_eq!(uni.var_sample(&vars, false).unwrap(), 1);
        }

        vars[1].fixed = Some(1);
        assert!(uni.var_sample(&vars, false).is_err());
    }

    #[test]
    fn var_sample_covers_all_eligible() {
        let uni = UniformSampler::new(Generator::new(42));
        let vars = test_vars();
        let mut seen = [false, false];
        for _ in 0..500 {
            seen[uni.var_sample(&vars, false).unwrap()] = true;
            if seen[0] && seen[1] {
                break;
            }
        }
        assert!(seen[0] && seen[1], "both variables should be selected");
    }

    #[test]
    fn scratch_pool_recycles() {
        let pool = ScratchPool::new();
        let mut a = pool.get();
        a.extend([1, 2, 3]);
        pool.put(a);
        let b = pool.get();
        assert!(b.is_empty());
        assert!(b.capacity() >= 3);
    }
}
