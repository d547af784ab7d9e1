//! End-to-end inference tests over small hand-checked networks.
//!
//! The pairwise model used throughout has the factor table [1,3,2,4] over
//! two binary variables (A most significant), so the exact marginals are
//! P(A) = [0.4, 0.6] and P(B) = [0.3, 0.7].

use pgm_gibbs::model::{apply_evidence, hellinger_diff, parse_model, parse_solution};
use pgm_gibbs::rng::Generator;
use pgm_gibbs::sampler::{
    advance_chains, chain_convergence, merge_chains, AdaptStrategy, Chain, ConvergenceAdapt,
    GibbsCollapsed, GibbsSimple,
};

#[cfg(test)]
mod tests {
    use super::*;

    const PAIR_MODEL: &str = "MARKOV\n2\n2 2\n1\n2 0 1\n4 1 3 2 4";
    const SEED: u64 = 42;

    fn normalized(marginal: &[f64]) -> Vec<f64> {
        let tot: f64 = marginal.iter().sum();
        marginal.iter().map(|p| p / tot).collect()
    }

    #[test]
    fn simple_chains_recover_pairwise_marginals() {
        const N_CHAINS: u64 = 4;
        const WINDOW: usize = 256;
        const BURNIN: u64 = 500;

        let gen = Generator::new(SEED);
        let mut chains: Vec<Chain> = (0..N_CHAINS)
            .map(|_| {
                let model = parse_model(PAIR_MODEL).unwrap();
                let samp = GibbsSimple::new(gen.clone(), model).unwrap();
                Chain::new(Box::new(samp), WINDOW, BURNIN).unwrap()
            })
            .collect();

        for _ in 0..4 {
            advance_chains(&mut chains);
        }

        let merged = merge_chains(&chains).unwrap();
        let p_a = normalized(&merged[0].marginal);
        let p_b = normalized(&merged[1].marginal);

        assert!((p_a[1] - 0.6).abs() < 0.05, "P(A=1) estimate {p_a:?}");
        assert!((p_b[1] - 0.7).abs() < 0.05, "P(B=1) estimate {p_b:?}");

        let conv = chain_convergence(&chains, hellinger_diff, Some(&merged)).unwrap();
        assert!(conv.iter().all(|c| c.is_finite()), "diagnostics {conv:?}");
    }

    #[test]
    fn collapsed_chain_carries_exact_marginal_through_merge() {
        const WINDOW: usize = 64;

        let gen = Generator::new(SEED);

        let plain = {
            let model = parse_model(PAIR_MODEL).unwrap();
            let samp = GibbsSimple::new(gen.clone(), model).unwrap();
            Chain::new(Box::new(samp), WINDOW, 100).unwrap()
        };
        let collapsed = {
            let model = parse_model(PAIR_MODEL).unwrap();
            let mut samp = GibbsCollapsed::new(gen.clone(), model).unwrap();
            let v = samp.collapse(Some(0)).unwrap();
            assert!((v.marginal[0] - 0.4).abs() < 1e-5);
            Chain::new(Box::new(samp), WINDOW, 100).unwrap()
        };

        let mut chains = vec![plain, collapsed];
        for _ in 0..3 {
            advance_chains(&mut chains);
        }

        let merged = merge_chains(&chains).unwrap();
        // The collapsed position is the analytic answer, untouched by
        // count accumulation.
        assert!((merged[0].marginal[0] - 0.4).abs() < 1e-5);
        assert!((merged[0].marginal[1] - 0.6).abs() < 1e-5);

        // And the collapsed variable always reports as converged.
        let conv = chain_convergence(&chains, hellinger_diff, Some(&merged)).unwrap();
        assert_eq!(conv[0], 1.0);
    }

    #[test]
    fn adaptive_strategy_grows_and_still_converges() {
        const WINDOW: usize = 64;

        let gen = Generator::new(SEED);
        let base = parse_model(PAIR_MODEL).unwrap();

        let mut chains: Vec<Chain> = (0..2)
            .map(|_| {
                let samp = GibbsCollapsed::new(gen.clone(), base.clone()).unwrap();
                Chain::new(Box::new(samp), WINDOW, 100).unwrap()
            })
            .collect();
        advance_chains(&mut chains);

        let strat =
            AdaptStrategy::Convergence(ConvergenceAdapt::new(gen.clone(), base.clone(), None));
        chains = strat.adapt(chains, 1).unwrap();
        assert_eq!(chains.len(), 3);

        for _ in 0..3 {
            advance_chains(&mut chains);
        }

        let merged = merge_chains(&chains).unwrap();
        let collapsed_count = merged.iter().filter(|v| v.collapsed).count();
        assert_eq!(collapsed_count, 1, "one variable should be collapse-sourced");

        for v in &merged {
            let p = normalized(&v.marginal);
            let expect = if v.id == 0 { [0.4, 0.6] } else { [0.3, 0.7] };
            assert!(
                (p[0] - expect[0]).abs() < 0.06,
                "variable {} marginal {p:?} vs {expect:?}",
                v.name
            );
        }
    }

    #[test]
    fn evidence_pipeline_pins_and_conditions() {
        const WINDOW: usize = 128;

        // P(B=1 | A=0) = 0.9 with this table.
        let mut model = parse_model("MARKOV\n2\n2 2\n1\n2 0 1\n4 0.1 0.9 0.9 0.1").unwrap();
        apply_evidence(&mut model, "1 0 0").unwrap();

        let gen = Generator::new(SEED);
        let samp = GibbsSimple::new(gen.clone(), model).unwrap();
        let mut chain = Chain::new(Box::new(samp), WINDOW, 100).unwrap();
        for _ in 0..4 {
            chain.advance().unwrap();
        }

        // The fixed variable accumulates nothing; the free one conditions
        // on the evidence.
        assert_eq!(chain.history[0].total_seen, 0);
        let merged = merge_chains(std::slice::from_ref(&chain)).unwrap();
        let p_b = normalized(&merged[1].marginal);
        assert!((p_b[1] - 0.9).abs() < 0.05, "P(B=1|A=0) estimate {p_b:?}");
    }

    #[test]
    fn solution_scoring_tracks_an_improving_run() {
        let sol = parse_solution("MAR\n2\n2 0.4 0.6\n2 0.3 0.7\n").unwrap();
        let model = parse_model(PAIR_MODEL).unwrap();

        let start_score = {
            use pgm_gibbs::model::ErrorSuite;
            ErrorSuite::new(&model.vars, &sol.vars).unwrap()
        };

        let gen = Generator::new(SEED);
        let mut chains: Vec<Chain> = (0..2)
            .map(|_| {
                let samp = GibbsSimple::new(gen.clone(), model.clone()).unwrap();
                Chain::new(Box::new(samp), 256, 500).unwrap()
            })
            .collect();
        for _ in 0..4 {
            advance_chains(&mut chains);
        }

        let merged = merge_chains(&chains).unwrap();
        let end_score = {
            use pgm_gibbs::model::ErrorSuite;
            ErrorSuite::new(&merged, &sol.vars).unwrap()
        };

        assert!(
            end_score.mean_hellinger < start_score.mean_hellinger,
            "sampling should beat the uniform prior: {} vs {}",
            end_score.mean_hellinger,
            start_score.mean_hellinger
        );
        assert!(end_score.mean_max_abs < 0.05);
    }
}
