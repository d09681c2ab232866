use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;
use crate::weights::{WeightState, WeightMap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightEntry {

    pub label : usize,

    pub val : f64

}

/// The three weight mappings as label/value lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewWeights {

    pub tg : Vec<WeightEntry>,

    pub bg : Vec<WeightEntry>,

    pub bw : Vec<WeightEntry>

}

fn entries(map : &WeightMap) -> Vec<WeightEntry> {
    map.iter().map(|(label, val)| WeightEntry { label : *label, val : *val } ).collect()
}

fn mapping(entries : &[WeightEntry]) -> WeightMap {
    entries.iter().map(|e| (e.label, e.val) ).collect()
}

impl From<&WeightState> for ViewWeights {

    fn from(w : &WeightState) -> Self {
        Self { tg : entries(&w.tg), bg : entries(&w.bg), bw : entries(&w.bw) }
    }

}

impl ViewWeights {

    /// Overwrites the entries of base named here, keeping the others.
    pub fn apply_to(&self, base : &WeightState) -> WeightState {
        let mut out = base.clone();
        out.tg.extend(mapping(&self.tg));
        out.bg.extend(mapping(&self.bg));
        out.bw.extend(mapping(&self.bw));
        out
    }

}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bound {

    pub label : String,

    pub val : f64

}

/// An embedded instance with its original feature values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedPoint {

    pub x : f64,

    pub y : f64,

    pub label : usize,

    pub feat_vals : Vec<f64>

}

/// Loadings of the first two components. The second is zero for one-dimensional
/// projections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Components {

    pub x : Vec<f64>,

    pub y : Vec<f64>,

    pub feat_names : Vec<String>

}

/// Full state of a session as consumed by the visualization layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {

    pub weights : ViewWeights,

    pub bounds : Vec<Bound>,

    pub max_upper_bound : f64,

    pub emb : Vec<EmbeddedPoint>,

    pub components : Components,

    /// Display names of the groups, keyed by label, plus the name of the trade-off bound.
    pub label_to_name : BTreeMap<String, String>

}
