//! Factors: dense tables over ordered variable tuples.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::Variable;

/// Epsilon added to zero entries before taking logs.
const LOG_EPS: f64 = 1e-6;

/// A function of model variables: a CPT in a Bayes net or a clique factor
/// in a Markov network (where entries are unnormalized weights).
///
/// Variables are referenced by their dense model IDs; `cards` carries the
/// matching cardinalities so the table can be indexed without touching the
/// model. Table entries are laid out with the first variable most
/// significant, exactly as in UAI files: for variables `[A, B]` with cards
/// `[2, 3]`, the entry for `A=a, B=b` sits at `a*3 + b`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Factor {
    pub name: String,
    /// Model IDs of the variables in this factor, in table order.
    pub vars: Vec<usize>,
    /// Cardinalities parallel to `vars`.
    pub cards: Vec<usize>,
    pub table: Vec<f64>,
    /// True once `use_log_space` converted the entries.
    pub is_log: bool,
}

fn calc_tab_size(cards: &[usize]) -> usize {
    if cards.is_empty() {
        return 0;
    }
    cards.iter().product()
}

impl Factor {
    /// Creates a zero-filled factor over the given variables.
    pub fn new(index: usize, vars: &[&Variable]) -> Result<Self> {
        let name = format!("func-{index}");
        if vars.is_empty() {
            return Err(Error::Model(format!(
                "empty variable list for factor {name}"
            )));
        }

        let cards: Vec<usize> = vars.iter().map(|v| v.card).collect();
        let tab_size = calc_tab_size(&cards);
        if tab_size < 1 {
            return Err(Error::Model(format!(
                "factor {name} has an empty table domain"
            )));
        }

        Ok(Factor {
            name,
            vars: vars.iter().map(|v| v.id).collect(),
            cards,
            table: vec![0.0; tab_size],
            is_log: false,
        })
    }

    /// Validates the table length against the variable cardinalities.
    pub fn check(&self) -> Result<()> {
        if self.vars.len() != self.cards.len() {
            return Err(Error::Model(format!(
                "factor {}: vars/cards length mismatch",
                self.name
            )));
        }

        let expect = calc_tab_size(&self.cards);
        if expect < 1 {
            return Err(Error::Model(format!(
                "factor {}: cannot calculate table size",
                self.name
            )));
        }
        if expect != self.table.len() {
            return Err(Error::Model(format!(
                "factor {}: expected table size {expect}, found {}",
                self.name,
                self.table.len()
            )));
        }

        Ok(())
    }

    /// Mixed-radix index for a value tuple, first variable most significant.
    fn calc_index(&self, values: &[usize]) -> Result<usize> {
        if values.len() != self.vars.len() {
            return Err(Error::Contract(format!(
                "factor {}: value tuple length {} != arity {}",
                self.name,
                values.len(),
                self.vars.len()
            )));
        }

        // Walk least significant to most significant; each digit has its own
        // radix.
        let mut digit = 1usize;
        let mut location = 0usize;
        for i in (0..values.len()).rev() {
            let val = values[i];
            let card = self.cards[i];
            if val >= card {
                return Err(Error::Contract(format!(
                    "factor {}: value {val} invalid for card {card} at position {i}",
                    self.name
                )));
            }
            location += digit * val;
            digit *= card;
        }

        Ok(location)
    }

    /// Looks up the table entry for a value tuple ordered like `vars`.
    pub fn eval(&self, values: &[usize]) -> Result<f64> {
        let i = self.calc_index(values)?;
        Ok(self.table[i])
    }

    /// Adds `x` to the entry for a value tuple. Only meaningful while the
    /// table is still in linear space; the collapse builder accumulates with
    /// this before converting.
    pub fn add_value(&mut self, values: &[usize], x: f64) -> Result<()> {
        if self.is_log {
            return Err(Error::Contract(format!(
                "factor {}: add_value on a log-space table",
                self.name
            )));
        }
        let i = self.calc_index(values)?;
        self.table[i] += x;
        Ok(())
    }

    /// Converts every entry to its natural log, clamping zeros up to
    /// `LOG_EPS` first. Calling twice is an error.
    pub fn use_log_space(&mut self) -> Result<()> {
        if self.is_log {
            return Err(Error::Contract(format!(
                "factor {}: already in log space",
                self.name
            )));
        }

        for v in &mut self.table {
            let x = if *v < LOG_EPS { *v + LOG_EPS } else { *v };
            *v = x.ln();
        }

        self.is_log = true;
        Ok(())
    }
}
