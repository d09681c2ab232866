use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;
use crate::error::UlcaError;

/// Per-group scalar weight, keyed by label.
pub type WeightMap = BTreeMap<usize, f64>;

/// The three weight mappings steering the unified objective: tg weights the
/// within-group scatter to be minimized for the target selection, bg the
/// within-group scatter of the background selection, and bw the between-group
/// scatter to be maximized. Values are expected in [0,1] but are not checked
/// here; the weight optimizer enforces the range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightState {

    pub tg : WeightMap,

    pub bg : WeightMap,

    pub bw : WeightMap

}

impl WeightState {

    pub fn new(tg : WeightMap, bg : WeightMap, bw : WeightMap) -> Self {
        Self { tg, bg, bw }
    }

    /// Assigns the same target, background and between weights to all labels.
    pub fn uniform(labels : &[usize], tg : f64, bg : f64, bw : f64) -> Self {
        let fill = |v : f64| labels.iter().map(|l| (*l, v) ).collect::<WeightMap>();
        Self { tg : fill(tg), bg : fill(bg), bw : fill(bw) }
    }

    /// Starting point of an interactive session: no target scatter, all groups as
    /// background and all groups separated, which reduces the objective to LDA.
    pub fn interactive_default(labels : &[usize]) -> Self {
        Self::uniform(labels, 0.0, 1.0, 1.0)
    }

    /// Looks up the (target, background, between) weights of a label.
    pub fn get(&self, label : usize) -> Result<(f64, f64, f64), UlcaError> {
        Ok((
            lookup(&self.tg, label, "target")?,
            lookup(&self.bg, label, "background")?,
            lookup(&self.bw, label, "between")?
        ))
    }

    /// Flattens the mappings into the vector layout searched by the weight
    /// optimizer: target weights of all labels, then background, then between.
    pub fn flatten(&self, labels : &[usize]) -> Result<Vec<f64>, UlcaError> {
        let mut v = Vec::with_capacity(3 * labels.len());
        for (map, name) in [(&self.tg, "target"), (&self.bg, "background"), (&self.bw, "between")] {
            for l in labels.iter() {
                v.push(lookup(map, *l, name)?);
            }
        }
        Ok(v)
    }

    /// Inverse of flatten. Entries past the first 3 * labels.len() (such as an
    /// appended trade-off scalar) are ignored.
    pub fn unflatten(labels : &[usize], values : &[f64]) -> Result<Self, UlcaError> {
        let k = labels.len();
        if values.len() < 3 * k {
            return Err(UlcaError::ShapeMismatch(format!(
                "Weight vector has {} entries, expected at least {}",
                values.len(),
                3 * k
            )));
        }
        let take = |offset : usize| labels.iter()
            .enumerate()
            .map(|(i, l)| (*l, values[offset + i]) )
            .collect::<WeightMap>();
        Ok(Self { tg : take(0), bg : take(k), bw : take(2 * k) })
    }

}

pub(crate) fn lookup(map : &WeightMap, label : usize, mapping : &'static str) -> Result<f64, UlcaError> {
    map.get(&label).cloned().ok_or(UlcaError::MissingLabel { label, mapping })
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn flatten_follows_label_order() {
        let labels = [0, 3, 7];
        let mut w = WeightState::interactive_default(&labels);
        w.tg.insert(3, 0.5);
        let v = w.flatten(&labels).unwrap();
        assert_eq!(v, vec![0.0, 0.5, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
        let mut with_alpha = v.clone();
        with_alpha.push(2.0);
        assert_eq!(WeightState::unflatten(&labels, &with_alpha).unwrap(), w);
    }

    #[test]
    fn missing_label_is_reported() {
        let w = WeightState::uniform(&[0, 1], 1.0, 1.0, 1.0);
        match w.flatten(&[0, 1, 2]) {
            Err(UlcaError::MissingLabel { label : 2, mapping : "target" }) => { },
            other => panic!("Unexpected result: {:?}", other)
        }
    }

}
