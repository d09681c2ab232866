use nalgebra::*;
use serde::{Serialize, Deserialize};
use std::collections::BTreeSet;
use crate::error::UlcaError;

/// Loading labeled feature tables from delimited text files.
pub mod csv;

pub use self::csv::*;

/// A feature matrix (instances at rows, features at columns) paired with a
/// label vector assigning each instance to a group. The column means and the
/// centered matrix are computed once at construction, so the caller's matrix is
/// never modified and repeated projections do not re-center the data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {

    x : DMatrix<f64>,

    y : Vec<usize>,

    mean : DVector<f64>,

    centered : DMatrix<f64>,

    // Distinct labels in ascending order.
    labels : Vec<usize>

}

impl Dataset {

    pub fn new(x : DMatrix<f64>, y : Vec<usize>) -> Result<Self, UlcaError> {
        if x.nrows() == 0 || x.ncols() == 0 {
            return Err(UlcaError::EmptyDataset);
        }
        if x.nrows() != y.len() {
            return Err(UlcaError::ShapeMismatch(format!(
                "Data has {} instances but label vector has {} entries",
                x.nrows(),
                y.len()
            )));
        }
        let mean = DVector::from_iterator(x.ncols(), x.column_iter().map(|c| c.mean() ));
        let mut centered = x.clone();
        for (j, mut col) in centered.column_iter_mut().enumerate() {
            col.add_scalar_mut(-mean[j]);
        }
        let labels = y.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        Ok(Self { x, y, mean, centered, labels })
    }

    pub fn x(&self) -> &DMatrix<f64> {
        &self.x
    }

    pub fn y(&self) -> &[usize] {
        &self.y[..]
    }

    /// Distinct labels, in ascending order. Every vector-shaped quantity indexed by
    /// group (flattened weights, group centers, pairwise distances) follows this order.
    pub fn labels(&self) -> &[usize] {
        &self.labels[..]
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn centered(&self) -> &DMatrix<f64> {
        &self.centered
    }

    pub fn n_instances(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }

    /// Row indices of the instances carrying the informed label.
    pub fn rows_of(&self, label : usize) -> Vec<usize> {
        self.y.iter()
            .enumerate()
            .filter(|(_, l)| **l == label )
            .map(|(ix, _)| ix )
            .collect()
    }

    /// Centered rows of a single group.
    pub fn group(&self, label : usize) -> DMatrix<f64> {
        let rows = self.rows_of(label);
        self.centered.select_rows(rows.iter())
    }

    /// Projects the centered data into the columns of m (Z = X_c M).
    pub fn transform(&self, m : &DMatrix<f64>) -> Result<DMatrix<f64>, UlcaError> {
        if m.nrows() != self.n_features() {
            return Err(UlcaError::ShapeMismatch(format!(
                "Projection matrix has {} rows but data has {} features",
                m.nrows(),
                self.n_features()
            )));
        }
        Ok(&self.centered * m)
    }

    /// Returns a copy with every column scaled to zero mean and unit (population) variance.
    /// Constant columns are left at zero.
    pub fn standardized(&self) -> Self {
        let n = self.n_instances() as f64;
        let mut x = self.centered.clone();
        for mut col in x.column_iter_mut() {
            let sd = (col.norm_squared() / n).sqrt();
            if sd > 0.0 {
                col.unscale_mut(sd);
            }
        }
        let mean = DVector::zeros(x.ncols());
        let centered = x.clone();
        Self { x, y : self.y.clone(), mean, centered, labels : self.labels.clone() }
    }

}
