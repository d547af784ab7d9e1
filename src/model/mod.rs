//! The PGM data model: variables, factors, and the model arena.
//!
//! All entities live in the model by value and reference one another through
//! dense integer IDs (a variable's ID is its index in `vars`). Samplers keep
//! their own index cross-reference tables, so rewriting the factor list
//! during a collapse never invalidates anything but those tables.

mod factor;
mod iter;
mod metrics;
mod solution;
mod uai;
mod variable;

pub use factor::Factor;
pub use iter::ConfigIter;
pub use metrics::{
    hellinger_diff, js_divergence, max_abs_diff, mean_abs_diff, ErrorSuite, Measure,
};
pub use solution::Solution;
pub use uai::{apply_evidence, parse_model, parse_solution};
pub use variable::{letter26, Variable};

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, WrapErr};

/// Kind tag matching the UAI header token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    Bayes,
    Markov,
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelKind::Bayes => f.write_str("BAYES"),
            ModelKind::Markov => f.write_str("MARKOV"),
        }
    }
}

/// A PGM: a variable arena plus the factors defined over it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub kind: ModelKind,
    pub name: String,
    pub vars: Vec<Variable>,
    pub funcs: Vec<Factor>,
    /// Set once evidence has been applied; a second application is an error.
    pub evidence_applied: bool,
}

impl Model {
    /// Reads a UAI model file. With `use_evidence`, also reads and applies
    /// `<filename>.evid`. The model is named after the file stem.
    pub fn from_file(filename: &str, use_evidence: bool) -> Result<Model> {
        let text = std::fs::read_to_string(filename)
            .map_err(Error::from)
            .wrap_err(format!("reading model from {filename}"))?;

        let mut model =
            parse_model(&text).wrap_err(format!("parsing model from {filename}"))?;

        model.name = Path::new(filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.to_string());

        if use_evidence {
            let evid_name = format!("{filename}.evid");
            let evid = std::fs::read_to_string(&evid_name)
                .map_err(Error::from)
                .wrap_err(format!("reading evidence from {evid_name}"))?;
            apply_evidence(&mut model, &evid)
                .wrap_err(format!("applying evidence from {evid_name}"))?;
        }

        model.check().wrap_err("validating parsed model")?;
        Ok(model)
    }

    /// Validates every variable and factor, ID/index agreement, factor
    /// variable references, and that at least one variable is free to
    /// sample.
    pub fn check(&self) -> Result<()> {
        let mut any_unfixed = false;
        for (i, v) in self.vars.iter().enumerate() {
            v.check()
                .wrap_err(format!("model {} variable {}", self.name, v.name))?;
            if v.id != i {
                return Err(Error::Model(format!(
                    "model {}: variable {} has id {} at index {i}",
                    self.name, v.name, v.id
                )));
            }
            if v.fixed.is_none() {
                any_unfixed = true;
            }
        }

        if !self.vars.is_empty() && !any_unfixed {
            return Err(Error::Model(format!(
                "model {}: every variable is fixed by evidence",
                self.name
            )));
        }

        for f in &self.funcs {
            f.check()
                .wrap_err(format!("model {} factor {}", self.name, f.name))?;
            for (&vid, &card) in f.vars.iter().zip(&f.cards) {
                let v = self.vars.get(vid).ok_or_else(|| {
                    Error::Model(format!(
                        "model {}: factor {} references unknown variable {vid}",
                        self.name, f.name
                    ))
                })?;
                if v.card != card {
                    return Err(Error::Model(format!(
                        "model {}: factor {} sees card {card} for {}, variable says {}",
                        self.name, f.name, v.name, v.card
                    )));
                }
            }
        }

        Ok(())
    }
}
