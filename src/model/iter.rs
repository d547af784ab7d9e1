//! Enumeration of variable configurations.

use crate::error::{Error, Result};
use crate::model::Variable;

/// Iterates every tuple in the Cartesian product of some variables' domains,
/// rightmost variable fastest (matching UAI table order).
///
/// With `honor_fixed`, any variable carrying evidence is pinned to its fixed
/// value for the whole enumeration, so the product effectively ranges over
/// the free variables only. The `val`/`next` pair reuses the caller's buffer
/// instead of allocating per step; `next` returns `false` once the
/// enumeration wraps back to its starting state.
#[derive(Debug)]
pub struct ConfigIter {
    cards: Vec<usize>,
    pinned: Vec<Option<usize>>,
    last_val: Vec<usize>,
}

impl ConfigIter {
    pub fn new<'a, I>(vars: I, honor_fixed: bool) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Variable>,
    {
        let mut cards = Vec::new();
        let mut pinned = Vec::new();
        for v in vars {
            cards.push(v.card);
            pinned.push(if honor_fixed { v.fixed } else { None });
        }

        if cards.is_empty() {
            return Err(Error::Contract(
                "at least one variable required for iteration".into(),
            ));
        }

        let last_val = pinned.iter().map(|p| p.unwrap_or(0)).collect();
        Ok(ConfigIter {
            cards,
            pinned,
            last_val,
        })
    }

    /// Copies the current configuration into `curr`, which must hold at
    /// least as many slots as there are variables.
    pub fn val(&self, curr: &mut [usize]) -> Result<()> {
        if curr.len() < self.last_val.len() {
            return Err(Error::Contract(format!(
                "destination buffer of size {} needs to be {}",
                curr.len(),
                self.last_val.len()
            )));
        }
        curr[..self.last_val.len()].copy_from_slice(&self.last_val);
        Ok(())
    }

    /// Advances to the next configuration; `false` when the space wrapped.
    pub fn next(&mut self) -> bool {
        for i in (0..self.cards.len()).rev() {
            if let Some(fv) = self.pinned[i] {
                self.last_val[i] = fv;
                continue;
            }

            let prop = self.last_val[i] + 1;
            if prop < self.cards[i] {
                self.last_val[i] = prop;
                return true;
            }
            self.last_val[i] = 0; // overflow: carry left
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(cards: &[usize]) -> Vec<Variable> {
        cards
            .iter()
            .enumerate()
            .map(|(i, &c)| Variable::new(i, c).unwrap())
            .collect()
    }

    fn collect_all(it: &mut ConfigIter, width: usize) -> Vec<Vec<usize>> {
        let mut out = Vec::new();
        let mut buf = vec![0usize; width];
        loop {
            it.val(&mut buf).unwrap();
            out.push(buf.clone());
            if !it.next() {
                break;
            }
        }
        out
    }

    #[test]
    fn empty_list_is_an_error() {
        let vs: Vec<Variable> = Vec::new();
        assert!(ConfigIter::new(vs.iter(), false).is_err());
    }

    #[test]
    fn rightmost_varies_fastest() {
        let vs = vars(&[2, 3]);
        let mut it = ConfigIter::new(vs.iter(), false).unwrap();
        let all = collect_all(&mut it, 2);
        assert_eq!(
            all,
            vec![
                vec![0, 0],
                vec![0, 1],
                vec![0, 2],
                vec![1, 0],
                vec![1, 1],
                vec![1, 2],
            ]
        );
    }

    #[test]
    fn honor_fixed_pins_evidence() {
        let mut vs = vars(&[2, 2, 2]);
        vs[1].fixed = Some(1);
        let mut it = ConfigIter::new(vs.iter(), true).unwrap();
        let all = collect_all(&mut it, 3);
        assert_eq!(
            all,
            vec![vec![0, 1, 0], vec![0, 1, 1], vec![1, 1, 0], vec![1, 1, 1]]
        );
    }

    #[test]
    fn ignored_fixed_ranges_fully() {
        let mut vs = vars(&[2, 2]);
        vs[0].fixed = Some(1);
        let mut it = ConfigIter::new(vs.iter(), false).unwrap();
        let all = collect_all(&mut it, 2);
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn all_fixed_yields_single_config() {
        let mut vs = vars(&[2, 3]);
        vs[0].fixed = Some(1);
        vs[1].fixed = Some(2);
        let mut it = ConfigIter::new(vs.iter(), true).unwrap();
        let all = collect_all(&mut it, 2);
        assert_eq!(all, vec![vec![1, 2]]);
    }
}
