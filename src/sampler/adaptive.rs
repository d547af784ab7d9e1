//! Chain-set adaptation strategies.
//!
//! Between outer iterations the driver hands the chain list to a strategy.
//! The identity strategy leaves it alone; the convergence strategy finds the
//! worst-converging tractable variables and spawns new chains with those
//! variables collapsed, so the hardest marginals get exact treatment.

use crate::error::{Error, Result, WrapErr};
use crate::model::{hellinger_diff, Measure, Model};
use crate::rng::Generator;
use crate::sampler::{
    chain_convergence, merge_chains, Chain, GibbsCollapsed, NEIGHBOR_VAR_MAX,
};

/// Hard cap on the total chain count an adaptive run may grow to.
pub const MAX_CHAINS: usize = 128;

/// Minimal burn-in for freshly adapted chains; the collapse itself is the
/// primary warm-up.
const ADAPT_BURN_IN: u64 = 2;

/// How the driver grows (or doesn't grow) the chain set each iteration.
pub enum AdaptStrategy {
    /// Pass-through for non-adaptive samplers.
    Identity,
    /// Convergence-driven collapsed-chain spawning.
    Convergence(ConvergenceAdapt),
}

impl AdaptStrategy {
    /// Applies the strategy. `k` is the number of chains to add per step;
    /// the identity strategy only accepts `k == 1`.
    pub fn adapt(&self, chains: Vec<Chain>, k: usize) -> Result<Vec<Chain>> {
        match self {
            AdaptStrategy::Identity => {
                if k != 1 {
                    return Err(Error::Contract(format!(
                        "non-adaptive sampler: adding {k} chains makes no sense"
                    )));
                }
                Ok(chains)
            }
            AdaptStrategy::Convergence(c) => c.adapt(chains, k),
        }
    }
}

/// Spawns collapsed chains targeting the worst-converging variables.
pub struct ConvergenceAdapt {
    gen: Generator,
    base: Model,
    measure: Measure,
    pub max_chains: usize,
}

impl ConvergenceAdapt {
    /// `base` must be the un-collapsed model (with evidence applied); each
    /// new chain starts from a fresh clone of it. `measure` defaults to the
    /// Hellinger distance.
    pub fn new(gen: Generator, base: Model, measure: Option<Measure>) -> Self {
        Self {
            gen,
            base,
            measure: measure.unwrap_or(hellinger_diff),
            max_chains: MAX_CHAINS,
        }
    }

    fn adapt(&self, mut chains: Vec<Chain>, k: usize) -> Result<Vec<Chain>> {
        if chains.len() < 2 {
            return Err(Error::Contract(
                "adaptation requires at least 2 chains".into(),
            ));
        }
        if chains.len() >= self.max_chains {
            return Ok(chains);
        }

        // A throwaway collapsed sampler over the base model gives us
        // blanket sizes for tractability filtering.
        let probe = GibbsCollapsed::new(self.gen.clone(), self.base.clone())
            .wrap_err("building blanket probe for adaptation")?;

        let merged = merge_chains(&chains).wrap_err("merging chains for adaptation")?;

        let candidates: Vec<usize> = merged
            .iter()
            .enumerate()
            .filter(|(i, v)| {
                v.fixed.is_none() && !v.collapsed && probe.blanket_size(*i) <= NEIGHBOR_VAR_MAX
            })
            .map(|(i, _)| i)
            .collect();

        if candidates.is_empty() {
            return Ok(chains);
        }

        let chosen: Vec<usize> = if candidates.len() <= k {
            candidates
        } else {
            let conv = chain_convergence(&chains, self.measure, Some(&merged))
                .wrap_err("scoring convergence for adaptation")?;
            let mut ranked = candidates;
            ranked.sort_by(|&a, &b| conv[b].total_cmp(&conv[a]));
            ranked.truncate(k);
            ranked
        };

        let cw = chains
            .last()
            .map(|ch| ch.convergence_window)
            .expect("chain list checked non-empty above");

        for var_id in chosen {
            let mut samp = GibbsCollapsed::new(self.gen.clone(), self.base.clone())
                .wrap_err("building sampler for adapted chain")?;
            let coll = samp
                .collapse(Some(var_id))
                .wrap_err(format!("collapsing variable {var_id} for adapted chain"))?;

            let ch = Chain::new(Box::new(samp), cw, ADAPT_BURN_IN)
                .wrap_err(format!("building adapted chain for variable {}", coll.name))?;
            chains.push(ch);
        }

        Ok(chains)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse_model;
    use crate::sampler::{advance_chains, GibbsSimple};

    const TWO_VAR: &str = "MARKOV\n2\n2 2\n1\n2 0 1\n4 1 3 2 4";

    fn simple_chain(seed: u64, cw: usize) -> Chain {
        let model = parse_model(TWO_VAR).unwrap();
        let samp = GibbsSimple::new(Generator::new(seed), model).unwrap();
        Chain::new(Box::new(samp), cw, 0).unwrap()
    }

    #[test]
    fn identity_requires_k_of_one() {
        let strat = AdaptStrategy::Identity;
        let chains = vec![simple_chain(1, 8)];
        let chains = strat.adapt(chains, 1).unwrap();
        assert_eq!(chains.len(), 1);

        assert!(strat.adapt(Vec::new(), 2).is_err());
    }

    #[test]
    fn convergence_requires_two_chains() {
        let base = parse_model(TWO_VAR).unwrap();
        let strat =
            AdaptStrategy::Convergence(ConvergenceAdapt::new(Generator::new(42), base, None));
        assert!(strat.adapt(vec![simple_chain(1, 8)], 1).is_err());
    }

    #[test]
    fn convergence_adds_collapsed_chains() {
        let base = parse_model(TWO_VAR).unwrap();
        let strat = AdaptStrategy::Convergence(ConvergenceAdapt::new(
            Generator::new(42),
            base,
            None,
        ));

        let mut chains = vec![simple_chain(1, 8), simple_chain(2, 8)];
        advance_chains(&mut chains);

        // More candidates than k: convergence ranking picks the worst one.
        let chains = strat.adapt(chains, 1).unwrap();
        assert_eq!(chains.len(), 3);
        let newest = chains.last().unwrap();
        assert_eq!(
            newest
                .variables()
                .iter()
                .filter(|v| v.collapsed)
                .count(),
            1
        );
    }

    #[test]
    fn convergence_takes_all_candidates_when_k_is_large() {
        let base = parse_model(TWO_VAR).unwrap();
        let strat = AdaptStrategy::Convergence(ConvergenceAdapt::new(
            Generator::new(42),
            base,
            None,
        ));

        let chains = vec![simple_chain(1, 8), simple_chain(2, 8)];
        // k covers every candidate, so no convergence scoring is needed and
        // unadvanced chains are fine.
        let chains = strat.adapt(chains, 5).unwrap();
        assert_eq!(chains.len(), 4);
    }

    #[test]
    fn convergence_respects_chain_cap() {
        let base = parse_model(TWO_VAR).unwrap();
        let mut adapt = ConvergenceAdapt::new(Generator::new(42), base, None);
        adapt.max_chains = 2;
        let strat = AdaptStrategy::Convergence(adapt);

        let chains = vec![simple_chain(1, 8), simple_chain(2, 8)];
        let chains = strat.adapt(chains, 1).unwrap();
        assert_eq!(chains.len(), 2, "at the cap the chain list is unchanged");
    }

    #[test]
    fn convergence_with_no_candidates_is_a_noop() {
        // A 24-variable clique: every blanket exceeds the tractability cap,
        // so there is nothing to collapse.
        let n = 24usize;
        let mut uai = format!("MARKOV\n{n}\n");
        uai.push_str(&vec!["2"; n].join(" "));
        let pairs: Vec<(usize, usize)> = (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .collect();
        uai.push_str(&format!("\n{}\n", pairs.len()));
        for (i, j) in &pairs {
            uai.push_str(&format!("2 {i} {j}\n"));
        }
        for _ in &pairs {
            uai.push_str("4 1 1 1 1\n");
        }

        let mk = |seed: u64| {
            let model = parse_model(&uai).unwrap();
            let samp = GibbsSimple::new(Generator::new(seed), model).unwrap();
            Chain::new(Box::new(samp), 8, 0).unwrap()
        };

        let base = parse_model(&uai).unwrap();
        let strat =
            AdaptStrategy::Convergence(ConvergenceAdapt::new(Generator::new(42), base, None));
        let chains = strat.adapt(vec![mk(1), mk(2)], 1).unwrap();
        assert_eq!(chains.len(), 2);
    }
}
