//! Runs multi-chain Gibbs over a 2x2 attractive grid and prints the
//! estimated marginals next to the exact ones.

use pgm_gibbs::model::{parse_model, ConfigIter, Model};
use pgm_gibbs::rng::Generator;
use pgm_gibbs::sampler::{advance_chains, merge_chains, Chain, GibbsSimple};

// 2x2 grid, binary variables, attractive pairwise coupling on each edge.
const GRID: &str = "MARKOV
4
2 2 2 2
4
2 0 1
2 0 2
2 1 3
2 2 3
4 2 1 1 2
4 2 1 1 2
4 2 1 1 2
4 2 1 1 2
";

fn exact_marginals(model: &Model) -> Vec<Vec<f64>> {
    let mut marginals: Vec<Vec<f64>> = model.vars.iter().map(|v| vec![0.0; v.card]).collect();
    let mut iter = ConfigIter::new(model.vars.iter(), false).unwrap();
    let mut state = vec![0usize; model.vars.len()];
    let mut call = Vec::new();
    loop {
        iter.val(&mut state).unwrap();
        let mut weight = 1.0;
        for f in &model.funcs {
            call.clear();
            call.extend(f.vars.iter().map(|&vid| state[vid]));
            weight *= f.eval(&call).unwrap();
        }
        for (i, &val) in state.iter().enumerate() {
            marginals[i][val] += weight;
        }
        if !iter.next() {
            break;
        }
    }
    for m in &mut marginals {
        let tot: f64 = m.iter().sum();
        m.iter_mut().for_each(|p| *p /= tot);
    }
    marginals
}

fn main() {
    let model = parse_model(GRID).expect("grid model parses");
    let exact = exact_marginals(&model);

    let gen = Generator::new(42);
    let mut chains: Vec<Chain> = (0..4)
        .map(|_| {
            let samp = GibbsSimple::new(gen.clone(), model.clone()).expect("sampler");
            Chain::new(Box::new(samp), 512, 1000).expect("chain")
        })
        .collect();

    for _ in 0..8 {
        advance_chains(&mut chains);
    }

    let mut merged = merge_chains(&chains).expect("merge");
    for v in &mut merged {
        v.norm_marginal().expect("normalize");
    }

    println!("variable  estimated            exact");
    for (v, ex) in merged.iter().zip(&exact) {
        println!(
            "{:>8}  [{:.4}, {:.4}]     [{:.4}, {:.4}]",
            v.name, v.marginal[0], v.marginal[1], ex[0], ex[1]
        );
    }
}
