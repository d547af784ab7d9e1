//! Collapsed Gibbs: analytic integration of variables out of the joint.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{Error, Result, WrapErr};
use crate::model::{ConfigIter, Factor, Model, Variable};
use crate::rng::Generator;
use crate::sampler::{FullSampler, GibbsSimple};

/// Largest Markov blanket (including the variable itself) we will sum over.
/// Collapse cost is exponential in the blanket, so this caps the enumerated
/// state space.
pub const NEIGHBOR_VAR_MAX: usize = 22;

/// Prior mass seeding a collapsed marginal before accumulation.
const COLLAPSE_PRIOR: f64 = 1e-12;

/// A smart wrapper around [`GibbsSimple`] that can integrate a variable out
/// of its Markov blanket, rewriting the factor set so the remaining
/// variables sample from the marginalized joint.
pub struct GibbsCollapsed {
    base: GibbsSimple,
    /// Per variable: the set of variables co-occurring with it in any
    /// factor (its Markov blanket, including itself). Ordered so collapse
    /// enumeration and synthesized factor layouts are deterministic.
    var_neighbors: Vec<BTreeSet<usize>>,
}

impl GibbsCollapsed {
    pub fn new(gen: Generator, model: Model) -> Result<Self> {
        let base = GibbsSimple::new(gen, model)
            .wrap_err("creating base simple Gibbs sampler")?;

        let mut s = Self {
            base,
            var_neighbors: Vec::new(),
        };
        s.functions_changed()?;
        Ok(s)
    }

    /// Rebuilds the blanket map after the factor list changed.
    pub fn functions_changed(&mut self) -> Result<()> {
        let model = self.base.model();
        let mut neighbors = vec![BTreeSet::new(); model.vars.len()];

        for (i, v) in model.vars.iter().enumerate() {
            if i != v.id {
                return Err(Error::Model(format!(
                    "variable {} has id {} at index {i}",
                    v.name, v.id
                )));
            }
        }

        for idx in 0..model.vars.len() {
            for &fi in self.base.var_funcs(idx) {
                for &vid in &model.funcs[fi].vars {
                    neighbors[idx].insert(vid);
                }
            }
        }

        // A collapsed variable must have dropped out of every factor.
        for (i, v) in model.vars.iter().enumerate() {
            if v.collapsed && !neighbors[i].is_empty() {
                return Err(Error::Model(format!(
                    "variable {} is collapsed but still has a blanket",
                    v.name
                )));
            }
        }

        self.var_neighbors = neighbors;
        Ok(())
    }

    /// Blanket size for a variable (counts the variable itself).
    pub fn blanket_size(&self, var_id: usize) -> usize {
        self.var_neighbors[var_id].len()
    }

    /// Number of factors incident on a variable.
    pub fn function_count(&self, var_id: usize) -> usize {
        self.base.var_funcs(var_id).len()
    }

    /// Integrates a variable out of the joint. With `None`, picks a random
    /// free, uncollapsed variable whose blanket fits under
    /// [`NEIGHBOR_VAR_MAX`], giving up after as many tries as there are
    /// variables.
    ///
    /// The variable's exact marginal (conditioned on any evidence) is
    /// computed by enumerating its blanket, a replacement factor over the
    /// blanket minus the variable is synthesized, every factor mentioning
    /// the variable is dropped, and the variable is flagged collapsed with
    /// the analytic marginal cached on it. Returns a copy of the collapsed
    /// variable.
    pub fn collapse(&mut self, var_idx: Option<usize>) -> Result<Variable> {
        let var_idx = match var_idx {
            Some(idx) => {
                if idx >= self.base.model().vars.len() {
                    return Err(Error::Contract(format!(
                        "invalid variable index {idx}: max is {}",
                        self.base.model().vars.len() - 1
                    )));
                }
                if self.var_neighbors[idx].len() > NEIGHBOR_VAR_MAX {
                    return Err(Error::Intractable(format!(
                        "blanket of size {} exceeds cap {NEIGHBOR_VAR_MAX}",
                        self.var_neighbors[idx].len()
                    )));
                }
                idx
            }
            None => self.pick_random_target()?,
        };

        let mut coll_var = self.base.model().vars[var_idx].clone();
        if coll_var.fixed.is_some() {
            return Err(Error::Intractable(format!(
                "cannot collapse evidence variable {}",
                coll_var.name
            )));
        }
        if coll_var.collapsed {
            return Err(Error::Intractable(format!(
                "variable {} is already collapsed",
                coll_var.name
            )));
        }
        coll_var.marginal.fill(COLLAPSE_PRIOR);

        // Materialize the blanket as an ordered list. Positions in
        // `blanket` are NOT variable IDs; `xref` maps back.
        let mut blanket: Vec<usize> = Vec::with_capacity(self.var_neighbors[var_idx].len());
        let mut xref: HashMap<usize, usize> = HashMap::new();
        let mut coll_pos = None;
        let mut new_func_vars: Vec<usize> = Vec::new();
        for &vid in &self.var_neighbors[var_idx] {
            blanket.push(vid);
            xref.insert(vid, blanket.len() - 1);
            if vid == var_idx {
                coll_pos = Some(blanket.len() - 1);
            } else {
                new_func_vars.push(vid);
            }
        }
        let coll_pos = coll_pos.ok_or_else(|| {
            Error::Model(format!(
                "variable {} missing from its own blanket",
                coll_var.name
            ))
        })?;

        let funcs: Vec<usize> = self.base.var_funcs(var_idx).to_vec();
        let mut delete_names: HashSet<String> = HashSet::new();
        for &fi in &funcs {
            let f = &self.base.model().funcs[fi];
            if !f.is_log {
                return Err(Error::Contract(format!(
                    "factor {} is not in log space",
                    f.name
                )));
            }
            delete_names.insert(f.name.clone());
        }

        // The replacement factor covers the blanket minus the collapsed
        // variable. A blanket of just the variable itself (unary factors
        // only) needs no replacement: the marginal absorbs everything.
        let mut post_func = if new_func_vars.is_empty() {
            None
        } else {
            let model = self.base.model();
            let refs: Vec<&Variable> =
                new_func_vars.iter().map(|&vid| &model.vars[vid]).collect();
            let mut f = Factor::new(model.funcs.len(), &refs)?;
            f.name = format!("collapse-{}", coll_var.name);
            Some(f)
        };

        // Enumerate every blanket configuration (evidence honored),
        // multiplying the incident factors in log space and accumulating
        // the exponentiated mass into both the marginal and the
        // replacement factor.
        {
            let model = self.base.model();
            let blanket_vars = blanket.iter().map(|&vid| &model.vars[vid]);
            let mut iter = ConfigIter::new(blanket_vars, true)?;

            let pool = self.base.uniform().pool().clone();
            let mut var_state = pool.get();
            var_state.resize(blanket.len(), 0);
            let mut call_vals = pool.get();

            loop {
                iter.val(&mut var_state)?;
                let marginal_val = var_state[coll_pos];

                let mut func_result = 0.0;
                for &fi in &funcs {
                    let f = &model.funcs[fi];
                    call_vals.clear();
                    call_vals.extend(f.vars.iter().map(|&vid| var_state[xref[&vid]]));
                    func_result += f.eval(&call_vals).wrap_err(format!(
                        "collapsing {}: evaluating factor {}",
                        coll_var.name, f.name
                    ))?;
                }

                let weight = func_result.exp();
                coll_var.marginal[marginal_val] += weight;

                if let Some(post) = post_func.as_mut() {
                    call_vals.clear();
                    call_vals.extend(new_func_vars.iter().map(|&vid| var_state[xref[&vid]]));
                    post.add_value(&call_vals, weight)?;
                }

                if !iter.next() {
                    break;
                }
            }

            pool.put(var_state);
            pool.put(call_vals);
        }

        coll_var.norm_marginal()?;

        if let Some(post) = post_func.as_mut() {
            post.use_log_space()?;
        }

        // Swap the factor set: add the replacement, drop everything that
        // mentioned the collapsed variable.
        {
            let model = self.base.model_mut();
            if let Some(post) = post_func {
                model.funcs.push(post);
            }
            model.funcs.retain(|f| !delete_names.contains(&f.name));

            let dest = &mut model.vars[var_idx];
            dest.collapsed = true;
            dest.marginal.copy_from_slice(&coll_var.marginal);

            if model.funcs.is_empty() {
                let any_free = model.vars.iter().any(|v| v.is_free());
                if any_free {
                    return Err(Error::Intractable(
                        "no factors left after collapse".into(),
                    ));
                }
            }
        }

        // Both samplers track the factor list; rebuild and re-validate.
        self.base
            .functions_changed()
            .wrap_err("rebuilding base sampler after collapse")?;
        self.functions_changed()
            .wrap_err("rebuilding blanket map after collapse")?;
        self.base.model().check().wrap_err("model check after collapse")?;

        Ok(self.base.model().vars[var_idx].clone())
    }

    fn pick_random_target(&self) -> Result<usize> {
        let vars = &self.base.model().vars;
        for _ in 0..vars.len() {
            let idx = self
                .base
                .uniform()
                .var_sample(vars, true)
                .wrap_err("selecting random variable to collapse")?;
            if self.var_neighbors[idx].len() <= NEIGHBOR_VAR_MAX {
                return Ok(idx);
            }
        }
        Err(Error::Intractable(
            "no tractable variable found to collapse".into(),
        ))
    }
}

impl FullSampler for GibbsCollapsed {
    /// The factor rewrite plus the cached-marginal draw in the base sampler
    /// mean collapsed and uncollapsed variables take the same path here.
    fn sample(&mut self, out: &mut [usize]) -> Result<usize> {
        let idx = self
            .base
            .uniform()
            .var_sample(&self.base.model().vars, false)
            .wrap_err("selecting variable for collapsed Gibbs step")?;
        self.base.sample_var(idx, out)
    }

    fn model(&self) -> &Model {
        self.base.model()
    }

    fn model_mut(&mut self) -> &mut Model {
        self.base.model_mut()
    }
}
