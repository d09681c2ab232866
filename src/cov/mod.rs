use nalgebra::*;
use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;
use crate::data::Dataset;
use crate::weights::{WeightState, WeightMap, lookup};
use crate::error::UlcaError;

/// Scatter matrices of a single group, computed over the globally-centered data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupCov {

    /// Scatter of the group instances around the group mean (W^T W).
    pub within : DMatrix<f64>,

    /// Outer product of the group mean deviation from the global mean,
    /// scaled by the group size (n_c m_c m_c^T).
    pub between : DMatrix<f64>,

    pub size : usize

}

/// Within/between scatter for every group of a dataset. Depends only on the
/// data and labels, so it is computed once per session and reused across fits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupStats {

    groups : BTreeMap<usize, GroupCov>,

    n_features : usize

}

impl GroupStats {

    pub fn compute(data : &Dataset) -> Self {
        let d = data.n_features();
        let mut groups = BTreeMap::new();
        for label in data.labels().iter() {
            let members = data.group(*label);
            let size = members.nrows();
            let group_mean = DVector::from_iterator(d, members.column_iter().map(|c| c.mean() ));
            let mut deviations = members;
            for (j, mut col) in deviations.column_iter_mut().enumerate() {
                col.add_scalar_mut(-group_mean[j]);
            }
            let within = deviations.transpose() * &deviations;
            let between = (&group_mean * group_mean.transpose()) * (size as f64);
            groups.insert(*label, GroupCov { within, between, size });
        }
        Self { groups, n_features : d }
    }

    /// Builds the statistics from precomputed per-group matrices. All matrices must be
    /// square, symmetric up to rounding and share the same dimension.
    pub fn from_groups(groups : BTreeMap<usize, GroupCov>) -> Result<Self, UlcaError> {
        let n_features = groups.values().next().map(|g| g.within.nrows() ).ok_or(UlcaError::EmptyDataset)?;
        for (label, g) in groups.iter() {
            let shapes = [g.within.shape(), g.between.shape()];
            if shapes.iter().any(|s| *s != (n_features, n_features) ) {
                return Err(UlcaError::ShapeMismatch(format!(
                    "Scatter matrices of group {} are not {}x{}",
                    label,
                    n_features,
                    n_features
                )));
            }
            for (name, m) in [("within", &g.within), ("between", &g.between)] {
                if !is_symmetric(m) {
                    return Err(UlcaError::InvalidSetting(format!(
                        "{} scatter of group {} is not symmetric",
                        name,
                        label
                    )));
                }
            }
        }
        Ok(Self { groups, n_features })
    }

    pub fn labels(&self) -> impl Iterator<Item=usize> + '_ {
        self.groups.keys().cloned()
    }

    pub fn get(&self, label : usize) -> Option<&GroupCov> {
        self.groups.get(&label)
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_groups(&self) -> usize {
        self.groups.len()
    }

    /// Pooled within-group scatter (sum over all groups).
    pub fn total_within(&self) -> DMatrix<f64> {
        self.groups.values().fold(DMatrix::zeros(self.n_features, self.n_features), |acc, g| acc + &g.within )
    }

    /// Total between-group scatter (sum over all groups).
    pub fn total_between(&self) -> DMatrix<f64> {
        self.groups.values().fold(DMatrix::zeros(self.n_features, self.n_features), |acc, g| acc + &g.between )
    }

}

fn is_symmetric(m : &DMatrix<f64>) -> bool {
    let tol = 1e-9 * m.amax().max(1.0);
    (m - m.transpose()).amax() <= tol
}

/// Identity-regularization of the two composite matrices. None means "use the
/// default": 1 when the weights feeding that matrix sum to zero, 0 otherwise.
/// A numeric value always wins, including an explicit zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Regularization {

    pub gamma0 : Option<f64>,

    pub gamma1 : Option<f64>

}

impl Regularization {

    pub fn new(gamma0 : Option<f64>, gamma1 : Option<f64>) -> Self {
        Self { gamma0, gamma1 }
    }

}

/// The two sides of the unified objective:
/// C0 = sum(tg * within) + sum(bw * between) + gamma0 I (scatter to trade against);
/// C1 = sum(bg * within) + gamma1 I (background scatter).
#[derive(Debug, Clone)]
pub struct Composite {

    pub c0 : DMatrix<f64>,

    pub c1 : DMatrix<f64>,

    pub gamma0 : f64,

    pub gamma1 : f64,

    pub tg_total : f64,

    pub bg_total : f64,

    pub bw_total : f64

}

impl Composite {

    /// Weighted combination of the group statistics. Every label in stats must be
    /// present in each of the three weight mappings.
    pub fn combine(
        stats : &GroupStats,
        weights : &WeightState,
        reg : Regularization
    ) -> Result<Self, UlcaError> {
        let d = stats.n_features();
        let mut within_tg = DMatrix::zeros(d, d);
        let mut within_bg = DMatrix::zeros(d, d);
        let mut between = DMatrix::zeros(d, d);
        let (mut tg_total, mut bg_total, mut bw_total) = (0.0, 0.0, 0.0);
        for (label, g) in stats.groups.iter() {
            let (w_tg, w_bg, w_bw) = weights.get(*label)?;
            within_tg += &g.within * w_tg;
            within_bg += &g.within * w_bg;
            between += &g.between * w_bw;
            tg_total += w_tg;
            bg_total += w_bg;
            bw_total += w_bw;
        }

        let gamma0 = reg.gamma0.unwrap_or(if tg_total + bw_total == 0.0 { 1.0 } else { 0.0 });
        let gamma1 = reg.gamma1.unwrap_or(if bg_total == 0.0 { 1.0 } else { 0.0 });

        let ident = DMatrix::<f64>::identity(d, d);
        let c0 = within_tg + between + &ident * gamma0;
        let c1 = within_bg + &ident * gamma1;
        Ok(Self { c0, c1, gamma0, gamma1, tg_total, bg_total, bw_total })
    }

    pub fn n_features(&self) -> usize {
        self.c0.nrows()
    }

    /// Total weight feeding C0 (target plus between).
    pub fn c0_weight(&self) -> f64 {
        self.tg_total + self.bw_total
    }

    pub fn c1_weight(&self) -> f64 {
        self.bg_total
    }

    /// The trace ratio between C0 and C1 is only defined when neither matrix vanishes,
    /// which can only happen when the caller explicitly zeroed the regularization of a
    /// matrix whose weights are also all zero.
    pub fn check_ratio_defined(&self) -> Result<(), UlcaError> {
        if self.c0.iter().all(|v| *v == 0.0 ) {
            return Err(UlcaError::NumericalDegeneracy(
                String::from("C0 vanishes (zero target/between weights with gamma0 = 0)")
            ));
        }
        if self.c1.iter().all(|v| *v == 0.0 ) {
            return Err(UlcaError::NumericalDegeneracy(
                String::from("C1 vanishes (zero background weights with gamma1 = 0)")
            ));
        }
        Ok(())
    }

}

/// Weighted combination of group statistics into (C0, C1). See Composite::combine.
pub fn combine(
    stats : &GroupStats,
    w_tg : &WeightMap,
    w_bg : &WeightMap,
    w_bw : &WeightMap,
    reg : Regularization
) -> Result<(DMatrix<f64>, DMatrix<f64>), UlcaError> {
    for label in stats.labels() {
        lookup(w_tg, label, "target")?;
        lookup(w_bg, label, "background")?;
        lookup(w_bw, label, "between")?;
    }
    let weights = WeightState::new(w_tg.clone(), w_bg.clone(), w_bw.clone());
    let comp = Composite::combine(stats, &weights, reg)?;
    Ok((comp.c0, comp.c1))
}

/// tr(M^T A M).
pub fn trace_form(a : &DMatrix<f64>, m : &DMatrix<f64>) -> f64 {
    (m.transpose() * a * m).trace()
}
