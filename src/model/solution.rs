//! Reference solutions for scoring marginal estimates.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, WrapErr};
use crate::model::{parse_solution, ErrorSuite, Model, Variable};

/// A reference MAR solution: one normalized marginal per model variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    pub vars: Vec<Variable>,
}

impl Solution {
    /// Reads a UAI MAR solution file.
    pub fn from_file(filename: &str) -> Result<Solution> {
        let text = std::fs::read_to_string(filename)
            .map_err(Error::from)
            .wrap_err(format!("reading solution from {filename}"))?;
        parse_solution(&text).wrap_err(format!("parsing solution from {filename}"))
    }

    /// Validates the solution against a model (variable count and each
    /// marginal being a distribution).
    pub fn check(&self, model: &Model) -> Result<()> {
        for v in &self.vars {
            v.check()
                .wrap_err(format!("solution variable {}", v.name))?;
        }

        if self.vars.len() != model.vars.len() {
            return Err(Error::Contract(format!(
                "solution var count {} != model var count {}",
                self.vars.len(),
                model.vars.len()
            )));
        }

        Ok(())
    }

    /// Scores estimated marginals against this solution. The estimates may
    /// be raw counts; the metrics normalize internally.
    pub fn score(&self, vars: &[Variable]) -> Result<ErrorSuite> {
        ErrorSuite::new(vars, &self.vars).wrap_err("scoring against solution")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse_model;

    #[test]
    fn scores_uniform_estimate_against_known_marginal() {
        let m = parse_model("MARKOV\n1\n2\n1\n1 0\n2 0.25 0.75").unwrap();
        let sol = parse_solution("MAR\n1\n2 0.25 0.75\n").unwrap();
        sol.check(&m).unwrap();

        // Model variables start uniform, so max-abs error is 0.25.
        let es = sol.score(&m.vars).unwrap();
        assert!((es.mean_max_abs - 0.25).abs() < 1e-8);
        assert!((es.mean_mean_abs - 0.25).abs() < 1e-8);
    }

    #[test]
    fn scoring_normalizes_raw_counts() {
        let m = parse_model("MARKOV\n1\n2\n1\n1 0\n2 0.25 0.75").unwrap();
        let sol = parse_solution("MAR\n1\n2 0.25 0.75\n").unwrap();

        let mut vars = m.vars.clone();
        vars[0].marginal = vec![250.0, 250.0];
        let es = sol.score(&vars).unwrap();
        assert!((es.mean_max_abs - 0.25).abs() < 1e-8);
    }

    #[test]
    fn check_rejects_count_mismatch() {
        let m = parse_model("MARKOV\n2\n2 2\n1\n2 0 1\n4 1 1 1 1").unwrap();
        let sol = parse_solution("MAR\n1\n2 0.5 0.5\n").unwrap();
        assert!(sol.check(&m).is_err());
    }
}
