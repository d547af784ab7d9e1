//! pgm-gibbs CLI: sampling-based marginal inference for UAI models.
//!
//! Subcommands:
//!   sample    Run (adaptive/collapsed/simple) Gibbs sampling on a model
//!   collapse  Collapse each tractable variable in isolation and score it
//!   dot       Emit a graphviz view of the model's variable adjacency

use std::fs::File;
use std::io::Write as _;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use pgm_gibbs::error::{Error, Result, WrapErr};
use pgm_gibbs::model::{
    hellinger_diff, js_divergence, max_abs_diff, mean_abs_diff, ErrorSuite, Model, Solution,
    Variable,
};
use pgm_gibbs::rng::Generator;
use pgm_gibbs::sampler::{
    advance_chains, chain_convergence, merge_chains, AdaptStrategy, Chain, ConvergenceAdapt,
    FullSampler, GibbsCollapsed, GibbsSimple,
};

#[derive(Parser)]
#[command(name = "pgm-gibbs")]
#[command(version)]
#[command(about = "(Probabilistic) graphical model sampling methods")]
struct Cli {
    /// Verbose output (every estimated variable is reported at the end)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Random seed (0 derives one from the clock)
    #[arg(short = 'e', long, global = true, default_value_t = 0)]
    seed: u64,

    /// Optional trace file for JSON output
    #[arg(short, long, global = true)]
    trace: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Gibbs sampling run
    Sample {
        /// Sampler to use: simple, collapsed, or adaptive
        #[arg(short, long)]
        sampler: String,

        /// UAI model file to read
        #[arg(short, long)]
        model: String,

        /// Apply evidence from <model>.evid
        #[arg(short = 'd', long)]
        evidence: bool,

        /// Score against the MAR solution file <model>.MAR
        #[arg(short = 'o', long)]
        solution: bool,

        /// Burn-in iteration count; negative uses 2000*n
        #[arg(short, long, default_value_t = -1)]
        burnin: i64,

        /// Convergence window; non-positive uses the burn-in size
        #[arg(short = 'w', long = "cwin", default_value_t = -1)]
        cwin: i64,

        /// Number of base chains; non-positive uses the CPU count
        #[arg(short, long, default_value_t = -1)]
        chains: i64,

        /// Chains added per adaptive step (sampler=adaptive only)
        #[arg(short = 'a', long, default_value_t = 1)]
        chainadds: usize,

        /// Maximum samples (not counting burn-in); negative uses 20000*n
        #[arg(short = 'i', long, default_value_t = -1)]
        maxiters: i64,

        /// Maximum seconds to run (0 for no limit)
        #[arg(short = 'x', long, default_value_t = 300)]
        maxsecs: u64,
    },

    /// Collapse each variable in isolation and report its analytic marginal
    Collapse {
        /// UAI model file (evidence and MAR files expected alongside)
        #[arg(short, long)]
        model: String,
    },

    /// Output a graphviz representation of the model
    Dot {
        /// UAI model file
        #[arg(short, long)]
        model: String,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::Sample { .. } => sample_cmd(cli),
        Command::Collapse { model } => collapse_cmd(cli, model),
        Command::Dot { model } => dot_cmd(cli, model),
    }
}

/// Prints an error suite, one line per metric, with negative log2 values
/// alongside (small errors read better on a log scale).
fn error_report(prefix: &str, es: &ErrorSuite, short: bool) {
    let rows = [
        ("MeanAbsError", "MAE", es.mean_mean_abs, es.max_mean_abs),
        ("MaxAbsError", "XAE", es.mean_max_abs, es.max_max_abs),
        ("Hellinger", "HEL", es.mean_hellinger, es.max_hellinger),
        ("JS-Diverge", "JSD", es.mean_js, es.max_js),
    ];

    if short {
        let mut line = String::new();
        for (_, tag, mean, max) in rows {
            line.push_str(&format!(
                "{tag}=>{mean:.6}({:7.3}),X{max:.6}({:7.3}) | ",
                -mean.log2(),
                -max.log2()
            ));
        }
        println!("{line}");
    } else {
        println!("{prefix} ... M:mean(neg log), X:max(neg log)");
        for (title, _, mean, max) in rows {
            println!(
                "{title:>15} => M:{mean:.6}({:7.3}) X:{max:.6}({:7.3})",
                -mean.log2(),
                -max.log2()
            );
        }
    }
}

fn derive_seed(seed: u64) -> u64 {
    if seed > 0 {
        return seed;
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.as_secs() ^ u64::from(now.subsec_nanos())
}

#[allow(clippy::too_many_lines)]
fn sample_cmd(cli: &Cli) -> Result<()> {
    let Command::Sample {
        sampler,
        model,
        evidence,
        solution,
        burnin,
        cwin,
        chains: chain_count,
        chainadds,
        maxiters,
        maxsecs,
    } = &cli.command
    else {
        unreachable!()
    };

    let start = Instant::now();

    println!("Reading model from {model}");
    let base = Model::from_file(model, *evidence)?;
    let n = base.vars.len();
    println!("Model has {n} vars and {} functions", base.funcs.len());

    let sol = if *solution {
        let sol_file = format!("{model}.MAR");
        let s = Solution::from_file(&sol_file)
            .wrap_err(format!("could not read solution file {sol_file}"))?;
        s.check(&base)?;
        let score = s.score(&base.vars)?;
        error_report("START", &score, false);
        Some(s)
    } else {
        None
    };

    // Fill in count-dependent defaults.
    let seed = derive_seed(cli.seed);
    let burn_in = if *burnin < 0 {
        2000 * n as u64
    } else {
        *burnin as u64
    };
    let cw = if *cwin <= 0 { burn_in as usize } else { *cwin as usize };
    let max_iters = if *maxiters < 0 {
        20_000 * n as u64
    } else {
        *maxiters as u64
    };
    let base_count = if *chain_count <= 0 {
        std::thread::available_parallelism().map_or(2, |p| p.get())
    } else {
        *chain_count as usize
    }
    .max(2);

    println!("Sampler:        {sampler}");
    println!("Burn in:        {burn_in}");
    println!("Converge win:   {cw}");
    println!("Base chains:    {base_count}");
    println!("Chain adds:     {chainadds}");
    println!("Max iters:      {max_iters}");
    println!("Max secs:       {maxsecs}");
    println!("Rnd seed:       {seed}");

    let gen = Generator::new(seed);

    println!("Creating chains and performing burn-in ({burn_in})");
    let mut chains: Vec<Chain> = Vec::with_capacity(base_count);
    for idx in 0..base_count {
        println!(" ... chain {:3} of {base_count}", idx + 1);
        let mod_copy = base.clone();

        let samp: Box<dyn FullSampler> = match sampler.to_lowercase().as_str() {
            "simple" => Box::new(GibbsSimple::new(gen.clone(), mod_copy)?),
            "collapsed" => {
                // Pre-collapse one random variable per chain.
                let mut coll = GibbsCollapsed::new(gen.clone(), mod_copy)?;
                let cv = coll
                    .collapse(None)
                    .wrap_err("could not collapse a random variable on startup")?;
                println!("     - collapsed variable {}:{}", cv.id, cv.name);
                Box::new(coll)
            }
            "adaptive" => {
                // Nothing pre-collapsed; the adaptive strategy handles it.
                Box::new(GibbsCollapsed::new(gen.clone(), mod_copy)?)
            }
            other => return Err(Error::Contract(format!("unknown sampler: {other}"))),
        };

        chains.push(Chain::new(samp, cw, burn_in)?);
    }

    let adapt = if sampler.to_lowercase() == "adaptive" {
        AdaptStrategy::Convergence(ConvergenceAdapt::new(gen.clone(), base.clone(), None))
    } else {
        if *chainadds != 1 {
            return Err(Error::Contract(format!(
                "sampler is not adaptive: chainadds={chainadds} makes no sense"
            )));
        }
        AdaptStrategy::Identity
    };

    println!("Main sampling start");
    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner} [{elapsed_precise}] {msg}")
            .expect("static template"),
    );

    let status_every = Duration::from_secs(5);
    let mut next_status = start + status_every / 2;
    let stop_time = start + Duration::from_secs(*maxsecs);
    let no_adapt_time = start + Duration::from_secs(maxsecs / 2);
    let mut keep_adapting = true;

    loop {
        advance_chains(&mut chains);

        let now = Instant::now();
        let mut keep_working = !(*maxsecs > 0 && now >= stop_time);

        let sample_count: u64 = chains.iter().map(|c| c.total_sample_count).sum();
        if max_iters > 0 && sample_count > max_iters {
            keep_working = false;
        }

        if now >= next_status || !keep_working {
            let run_secs = start.elapsed().as_secs_f64();
            progress.set_message(format!(
                "samples {sample_count:>12} | chains {:>3} | {run_secs:10.2}s",
                chains.len()
            ));
            progress.tick();

            if let Some(sol) = &sol {
                let merged = merge_chains(&chains).wrap_err("merging chains for scoring")?;
                let score = sol.score(&merged)?;
                progress.suspend(|| error_report("", &score, true));
            }
            next_status = now + status_every;
        }

        if !keep_working {
            break;
        }

        if keep_adapting && now >= no_adapt_time {
            progress.suspend(|| println!("STOPPING ADAPTATION"));
            keep_adapting = false;
        }
        if keep_adapting {
            let pre_count = chains.len();
            chains = adapt.adapt(chains, *chainadds)?;
            if chains.len() != pre_count {
                progress.suspend(|| {
                    println!("ADAPT: {} chains (was {pre_count})", chains.len())
                });
            }
        }
    }
    progress.finish_and_clear();

    // Completed: merge everything and normalize for reporting.
    let mut final_vars = merge_chains(&chains).wrap_err("final chain merge")?;
    for v in &mut final_vars {
        v.norm_marginal()?;
    }

    println!("DONE");

    if let Some(sol) = &sol {
        let score = sol.score(&final_vars)?;
        error_report("FINAL", &score, false);

        for (v, s) in final_vars.iter_mut().zip(&sol.vars) {
            for (c, &p) in s.marginal.iter().enumerate() {
                v.state.insert(format!("SOL-MAR[{c}]"), p);
            }
        }
    }

    // Record per-variable convergence (and error, when scored) diagnostics
    // in the state maps so they land in the trace.
    let diagnostics: [(&str, fn(&Variable, &Variable) -> f64); 4] = [
        ("Hell", hellinger_diff),
        ("JS", js_divergence),
        ("MaxAD", max_abs_diff),
        ("AvgAD", mean_abs_diff),
    ];
    for (tag, measure) in diagnostics {
        let conv = chain_convergence(&chains, measure, Some(&final_vars))?;
        for (v, c) in final_vars.iter_mut().zip(conv) {
            v.state.insert(format!("{tag}-Convergence"), c);
        }
        if let Some(sol) = &sol {
            for (v, s) in final_vars.iter_mut().zip(&sol.vars) {
                let err = measure(v, s);
                v.state.insert(format!("{tag}-Error"), err);
            }
        }
    }

    if cli.verbose {
        for v in &final_vars {
            match v.fixed {
                Some(fv) => println!(
                    "Variable[{}] {} (card {}) EVID={fv}",
                    v.id, v.name, v.card
                ),
                None => println!(
                    "Variable[{}] {} (card {}) {:?}",
                    v.id, v.name, v.card, v.marginal
                ),
            }
        }
    }

    if let Some(trace_file) = &cli.trace {
        write_trace(trace_file, &final_vars, &base)
            .wrap_err(format!("writing trace to {trace_file}"))?;
        println!("Trace written to {trace_file}");
    }

    Ok(())
}

/// JSON trace: evidence variables first, then estimated variables (one JSON
/// object per line), then the full model.
fn write_trace(trace_file: &str, final_vars: &[Variable], base: &Model) -> Result<()> {
    let mut f = File::create(trace_file)?;

    writeln!(f, "// EVIDENCE")?;
    for v in final_vars.iter().filter(|v| v.fixed.is_some()) {
        writeln!(f, "{}", serde_json::to_string(v).map_err(io_err)?)?;
    }

    writeln!(f, "// VARS (ESTIMATED)")?;
    for v in final_vars.iter().filter(|v| v.fixed.is_none()) {
        writeln!(f, "{}", serde_json::to_string(v).map_err(io_err)?)?;
    }

    writeln!(f, "// ENTIRE MODEL")?;
    writeln!(f, "{}", serde_json::to_string_pretty(base).map_err(io_err)?)?;

    Ok(())
}

fn io_err(e: serde_json::Error) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
}

/// Collapses every tractable variable in isolation (fresh model clone each
/// time) and scores each analytic marginal against the MAR solution.
fn collapse_cmd(cli: &Cli, model_file: &str) -> Result<()> {
    println!("Reading model from {model_file}");
    let base = Model::from_file(model_file, true)?;
    println!(
        "Model has {} vars and {} functions",
        base.vars.len(),
        base.funcs.len()
    );

    let sol_file = format!("{model_file}.MAR");
    let sol = Solution::from_file(&sol_file)
        .wrap_err(format!("could not read solution file {sol_file}"))?;
    sol.check(&base)?;

    let score = sol.score(&base.vars)?;
    error_report("START", &score, false);

    let gen = Generator::new(derive_seed(cli.seed));

    for idx in 0..base.vars.len() {
        let name = &base.vars[idx].name;
        if base.vars[idx].fixed.is_some() {
            println!("{name:>8}: SKIP (evidence)");
            continue;
        }

        let mut coll = GibbsCollapsed::new(gen.clone(), base.clone())?;
        let blanket = coll.blanket_size(idx);
        let funcs = coll.function_count(idx);
        match coll.collapse(Some(idx)) {
            Ok(v) => {
                let err = hellinger_diff(&v, &sol.vars[idx]);
                println!(
                    "{name:>8}: HELL {err:.6} | blanket {blanket:2} funcs {funcs:2} | marginal {:?} | solution {:?}",
                    v.marginal, sol.vars[idx].marginal
                );
            }
            Err(Error::Intractable(msg)) => println!("{name:>8}: SKIP ({msg})"),
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

/// Emits a `strict graph` with an edge for every variable pair sharing a
/// factor. Written to the trace file when one is given, stdout otherwise.
fn dot_cmd(cli: &Cli, model_file: &str) -> Result<()> {
    let base = Model::from_file(model_file, false)?;

    let mut adjacency: Vec<Vec<bool>> = vec![vec![false; base.vars.len()]; base.vars.len()];
    for f in &base.funcs {
        for (i, &v1) in f.vars.iter().enumerate() {
            for &v2 in &f.vars[i + 1..] {
                adjacency[v1][v2] = true;
            }
        }
    }

    let mut out = String::new();
    out.push_str("strict graph G {\n");
    for (v1, row) in adjacency.iter().enumerate() {
        for (v2, &linked) in row.iter().enumerate() {
            if linked {
                out.push_str(&format!(
                    "    {} -- {};\n",
                    base.vars[v1].name, base.vars[v2].name
                ));
            }
        }
    }
    out.push_str("}\n");

    match &cli.trace {
        Some(trace_file) => {
            std::fs::write(trace_file, &out)?;
            println!("Model graph written to {trace_file}");
        }
        None => print!("{out}"),
    }

    Ok(())
}
