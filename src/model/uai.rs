//! UAI file format support: models, evidence, and MAR solutions.
//!
//! The format is whitespace-delimited; a good description lives at
//! <http://www.cs.huji.ac.il/project/PASCAL/fileFormat.php>. Lines starting
//! with `c` are comments and blank lines are ignored, so parsing runs over a
//! preprocessed buffer.

use crate::error::{Error, Result, WrapErr};
use crate::model::{Factor, Model, ModelKind, Solution, Variable};

/// Strips comments and blank lines, trims the rest. Returns the cleaned
/// text and the number of surviving lines.
pub(crate) fn preprocess(data: &str) -> (String, usize) {
    let mut lines = Vec::new();
    for line in data.lines() {
        let t = line.trim();
        if t.is_empty() || t.starts_with('c') {
            continue;
        }
        lines.push(t);
    }
    (lines.join("\n"), lines.len())
}

/// Token cursor over preprocessed UAI text.
struct FieldReader<'a> {
    fields: Vec<&'a str>,
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(data: &'a str) -> Self {
        Self {
            fields: data.split_whitespace().collect(),
            pos: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.fields.len() - self.pos
    }

    fn read(&mut self) -> Result<&'a str> {
        let f = self
            .fields
            .get(self.pos)
            .ok_or_else(|| Error::Parse("unexpected end of input".into()))?;
        self.pos += 1;
        Ok(f)
    }

    fn read_usize(&mut self) -> Result<usize> {
        let s = self.read()?;
        s.parse()
            .map_err(|_| Error::Parse(format!("expected non-negative integer, found {s:?}")))
    }

    fn read_f64(&mut self) -> Result<f64> {
        let s = self.read()?;
        s.parse()
            .map_err(|_| Error::Parse(format!("expected float, found {s:?}")))
    }
}

/// Parses a UAI model file: header, cardinalities, cliques, tables.
pub fn parse_model(data: &str) -> Result<Model> {
    let (clean, _) = preprocess(data);
    let mut fr = FieldReader::new(&clean);
    if fr.remaining() < 6 {
        return Err(Error::Parse(format!(
            "invalid model data: only {} fields found",
            fr.remaining()
        )));
    }

    let kind = match fr.read().wrap_err("reading model type")? {
        "BAYES" => ModelKind::Bayes,
        "MARKOV" => ModelKind::Markov,
        other => return Err(Error::Parse(format!("unknown model type {other}"))),
    };

    let var_count = fr.read_usize().wrap_err("reading variable count")?;
    if var_count < 1 {
        return Err(Error::Parse("invalid variable count 0".into()));
    }

    let mut vars = Vec::with_capacity(var_count);
    for i in 0..var_count {
        let card = fr
            .read_usize()
            .wrap_err(format!("reading card for variable {i}"))?;
        if card < 1 {
            return Err(Error::Parse(format!("invalid card {card} for variable {i}")));
        }
        vars.push(Variable::new(i, card)?);
    }

    let func_count = fr.read_usize().wrap_err("reading clique count")?;
    if func_count < 1 {
        return Err(Error::Parse("invalid clique count 0".into()));
    }

    // Clique descriptors: size then variable indices, in table order.
    let mut funcs = Vec::with_capacity(func_count);
    for i in 0..func_count {
        let size = fr
            .read_usize()
            .wrap_err(format!("reading size of clique {i}"))?;
        if size < 1 {
            return Err(Error::Parse(format!("invalid variable count 0 for clique {i}")));
        }

        let mut fvars = Vec::with_capacity(size);
        for j in 0..size {
            let idx = fr
                .read_usize()
                .wrap_err(format!("reading variable {j} of clique {i}"))?;
            if idx >= vars.len() {
                return Err(Error::Parse(format!(
                    "invalid variable index {idx} in clique {i}"
                )));
            }
            fvars.push(&vars[idx]);
        }

        funcs.push(Factor::new(i, &fvars)?);
    }

    // Table descriptors: declared size then the entries, matching the
    // factor's own layout exactly.
    for fun in &mut funcs {
        let tab_size = fr
            .read_usize()
            .wrap_err(format!("reading table size of factor {}", fun.name))?;
        if tab_size != fun.table.len() {
            return Err(Error::Parse(format!(
                "table size {tab_size} != clique size {} on factor {}",
                fun.table.len(),
                fun.name
            )));
        }
        for t in 0..tab_size {
            fun.table[t] = fr
                .read_f64()
                .wrap_err(format!("reading entry {t} of factor {}", fun.name))?;
        }
    }

    Ok(Model {
        kind,
        name: String::new(),
        vars,
        funcs,
        evidence_applied: false,
    })
}

/// Applies a UAI evidence buffer to a model, fixing the listed variables.
///
/// Two layouts exist in the wild: a single line `N v1 x1 ... vN xN`, or two
/// lines where the first is a sample count (which must be 1) and the second
/// is the single-line form. Multi-sample evidence and re-application are
/// rejected.
pub fn apply_evidence(model: &mut Model, data: &str) -> Result<usize> {
    if model.evidence_applied {
        return Err(Error::Contract(format!(
            "model {} already has evidence applied",
            model.name
        )));
    }

    let (clean, _) = preprocess(data);
    let tokens: Vec<&str> = clean.split_whitespace().collect();

    // An absent or empty evidence file means "no evidence".
    if tokens.is_empty() {
        model.evidence_applied = true;
        return Ok(0);
    }

    let first: usize = tokens[0]
        .parse()
        .map_err(|_| Error::Parse(format!("expected integer, found {:?}", tokens[0])))?;

    let pairs_at = if tokens.len() == 1 + 2 * first {
        1 // single-line form: first token is the evidence-pair count
    } else if first == 1 && tokens.len() >= 2 {
        let n: usize = tokens[1]
            .parse()
            .map_err(|_| Error::Parse(format!("expected integer, found {:?}", tokens[1])))?;
        if tokens.len() != 2 + 2 * n {
            return Err(Error::Parse(format!(
                "evidence token count {} does not match declared count {n}",
                tokens.len()
            )));
        }
        2
    } else if first > 1 {
        return Err(Error::Parse(format!(
            "multi-sample evidence ({first} samples) is not supported"
        )));
    } else {
        return Err(Error::Parse("unrecognized evidence layout".into()));
    };

    let mut applied = 0usize;
    let mut it = tokens[pairs_at..].iter();
    while let (Some(vs), Some(xs)) = (it.next(), it.next()) {
        let vid: usize = vs
            .parse()
            .map_err(|_| Error::Parse(format!("bad evidence variable {vs:?}")))?;
        let val: usize = xs
            .parse()
            .map_err(|_| Error::Parse(format!("bad evidence value {xs:?}")))?;

        let v = model.vars.get_mut(vid).ok_or_else(|| {
            Error::Parse(format!("evidence names unknown variable {vid}"))
        })?;
        if val >= v.card {
            return Err(Error::Parse(format!(
                "evidence value {val} out of range for variable {} (card {})",
                v.name, v.card
            )));
        }

        v.fixed = Some(val);
        // Evidence collapses the marginal to a point mass.
        v.marginal.fill(0.0);
        v.marginal[val] = 1.0;
        applied += 1;
    }

    model.evidence_applied = true;
    Ok(applied)
}

/// Parses a UAI MAR solution: `MAR` header, variable count, then each
/// variable's cardinality followed by its probabilities. A leading `PR`
/// section (as Merlin emits) is skipped.
pub fn parse_solution(data: &str) -> Result<Solution> {
    let (clean, _) = preprocess(data);

    // Tolerate a PR preamble by resuming at the MAR header line.
    let mar_text = match clean.lines().position(|l| l.starts_with("MAR")) {
        Some(i) => clean.lines().skip(i).collect::<Vec<_>>().join("\n"),
        None => return Err(Error::Parse("no MAR header found in solution".into())),
    };

    let mut fr = FieldReader::new(&mar_text);
    let header = fr.read().wrap_err("reading solution header")?;
    if header != "MAR" {
        return Err(Error::Parse(format!("expected MAR header, found {header}")));
    }

    let var_count = fr.read_usize().wrap_err("reading solution variable count")?;
    let mut vars = Vec::with_capacity(var_count);
    for i in 0..var_count {
        let card = fr
            .read_usize()
            .wrap_err(format!("reading card for solution variable {i}"))?;
        let mut v = Variable::new(i, card)?;
        for c in 0..card {
            v.marginal[c] = fr
                .read_f64()
                .wrap_err(format!("reading marginal {c} of solution variable {i}"))?;
        }
        v.check()
            .wrap_err(format!("validating solution variable {i}"))?;
        vars.push(v);
    }

    Ok(Solution { vars })
}
