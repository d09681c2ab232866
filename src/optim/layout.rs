use nalgebra::*;
use serde::{Serialize, Deserialize};
use std::collections::BTreeSet;
use crate::error::UlcaError;

/// Kind of edit the analyst applied to a group in the embedding view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interaction {
    Move,
    Scale
}

/// An edit on a single group: Move relocates its center (first two axes),
/// Scale multiplies its area by a factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Edit {
    Move { cx : f64, cy : f64 },
    Scale(f64)
}

impl Edit {

    pub fn interaction(&self) -> Interaction {
        match self {
            Edit::Move { .. } => Interaction::Move,
            Edit::Scale(_) => Interaction::Scale
        }
    }

}

/// Confidence ellipse of a group as drawn (and possibly edited) by the front end.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipse {

    pub label : usize,

    pub cx : f64,

    pub cy : f64,

    pub rx : f64,

    pub ry : f64

}

/// Per-group summary of an embedding: center and scatter area (product of the
/// population standard deviations along the two displayed axes). Rows follow the
/// ascending label order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layout {

    labels : Vec<usize>,

    centers : DMatrix<f64>,

    areas : DVector<f64>

}

impl Layout {

    pub fn from_embedding(z : &DMatrix<f64>, y : &[usize]) -> Result<Self, UlcaError> {
        if z.nrows() != y.len() {
            return Err(UlcaError::ShapeMismatch(format!(
                "Embedding has {} rows but label vector has {} entries",
                z.nrows(),
                y.len()
            )));
        }
        if z.nrows() == 0 {
            return Err(UlcaError::EmptyDataset);
        }
        let labels : Vec<usize> = y.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        let p = z.ncols();
        let mut centers = DMatrix::zeros(labels.len(), p);
        let mut areas = DVector::zeros(labels.len());
        for (g, label) in labels.iter().enumerate() {
            let rows : Vec<usize> = y.iter().enumerate().filter(|(_, l)| *l == label ).map(|(i, _)| i ).collect();
            let group = z.select_rows(rows.iter());
            let n = group.nrows() as f64;
            let mut area = 1.0;
            for (j, col) in group.column_iter().enumerate() {
                let mean = col.mean();
                centers[(g, j)] = mean;
                if j < 2 {
                    area *= (col.map(|v| (v - mean).powi(2) ).sum() / n).sqrt();
                }
            }
            areas[g] = area;
        }
        Ok(Self { labels, centers, areas })
    }

    /// Layout described by the ellipses of the front end, with area |rx| |ry|.
    pub fn from_ellipses(ellipses : &[Ellipse]) -> Result<Self, UlcaError> {
        if ellipses.is_empty() {
            return Err(UlcaError::EmptyDataset);
        }
        let mut sorted = ellipses.to_vec();
        sorted.sort_by_key(|e| e.label );
        if sorted.windows(2).any(|w| w[0].label == w[1].label ) {
            return Err(UlcaError::InvalidSetting(String::from("Duplicated ellipse label")));
        }
        let labels = sorted.iter().map(|e| e.label ).collect();
        let centers = DMatrix::from_fn(sorted.len(), 2, |i, j| if j == 0 { sorted[i].cx } else { sorted[i].cy } );
        let areas = DVector::from_iterator(sorted.len(), sorted.iter().map(|e| e.rx.abs() * e.ry.abs() ));
        Ok(Self { labels, centers, areas })
    }

    /// Copy of this layout with one group edited.
    pub fn with_edit(&self, label : usize, edit : Edit) -> Result<Self, UlcaError> {
        let ix = self.index_of(label)?;
        let mut out = self.clone();
        match edit {
            Edit::Move { cx, cy } => {
                out.centers[(ix, 0)] = cx;
                if out.centers.ncols() > 1 {
                    out.centers[(ix, 1)] = cy;
                }
            },
            Edit::Scale(factor) => {
                out.areas[ix] *= factor;
            }
        }
        Ok(out)
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels[..]
    }

    pub fn centers(&self) -> &DMatrix<f64> {
        &self.centers
    }

    pub fn areas(&self) -> &DVector<f64> {
        &self.areas
    }

    pub fn index_of(&self, label : usize) -> Result<usize, UlcaError> {
        self.labels.binary_search(&label).map_err(|_| UlcaError::MissingLabel { label, mapping : "layout" })
    }

    /// Distances between group centers (first two axes), for all pairs i < j in
    /// row-major order.
    pub fn pairwise_distances(&self) -> DVector<f64> {
        let k = self.labels.len();
        let axes = self.centers.ncols().min(2);
        let mut dists = Vec::with_capacity(k * k.saturating_sub(1) / 2);
        for i in 0..k {
            for j in (i + 1)..k {
                let d : f64 = (0..axes).map(|a| (self.centers[(i, a)] - self.centers[(j, a)]).powi(2) ).sum();
                dists.push(d.sqrt());
            }
        }
        DVector::from_vec(dists)
    }

    fn check_compatible(&self, other : &Layout) -> Result<(), UlcaError> {
        if self.labels != other.labels {
            return Err(UlcaError::ShapeMismatch(format!(
                "Layouts cover different groups ({:?} vs. {:?})",
                self.labels,
                other.labels
            )));
        }
        Ok(())
    }

}

fn area_ratio(areas : &DVector<f64>, upd : usize, other : usize) -> f64 {
    if areas[other] > 0.0 {
        areas[upd] / areas[other]
    } else {
        -1.0
    }
}

/// Mean over groups of the relative error (clipped to 1) between the ideal and the
/// actual ratio of the edited group area to each group area.
pub fn area_cost(ideal : &Layout, actual : &Layout, edited : usize) -> Result<f64, UlcaError> {
    ideal.check_compatible(actual)?;
    let upd = ideal.index_of(edited)?;
    let k = ideal.labels.len();
    let mut cost = 0.0;
    for l in 0..k {
        let ideal_ratio = area_ratio(&ideal.areas, upd, l);
        let actual_ratio = area_ratio(&actual.areas, upd, l);
        if ideal_ratio != actual_ratio {
            let err = ((ideal_ratio - actual_ratio) / ideal_ratio).abs();
            cost += if err.is_nan() { 1.0 } else { err.min(1.0) };
        }
    }
    Ok(cost / k as f64)
}

/// Relative residual between the ideal and actual vectors of pairwise center
/// distances, clipped to 1. A zero ideal vector costs 1 unless matched exactly.
pub fn dist_cost(ideal : &Layout, actual : &Layout) -> Result<f64, UlcaError> {
    ideal.check_compatible(actual)?;
    let d_ideal = ideal.pairwise_distances();
    let residual = (&d_ideal - actual.pairwise_distances()).norm();
    let norm = d_ideal.norm();
    if norm == 0.0 {
        Ok(if residual == 0.0 { 0.0 } else { 1.0 })
    } else {
        Ok((residual / norm).min(1.0))
    }
}

pub fn total_cost(ideal : &Layout, actual : &Layout, edited : usize, w_area : f64, w_dist : f64) -> Result<f64, UlcaError> {
    Ok(w_area * area_cost(ideal, actual, edited)? + w_dist * dist_cost(ideal, actual)?)
}
