use nalgebra::*;
use crate::data::Dataset;
use crate::cov::{GroupStats, Regularization};
use crate::weights::WeightState;
use crate::error::UlcaError;

/// Closed-form solver: generalized eigenproblem with auto-tuned trade-off.
pub mod evd;

pub use evd::*;

/// Generic manifold-optimization engine, with predefined costs for PCA, LDA,
/// contrastive PCA and the unified objective.
pub mod manifold;

pub use manifold::*;

/// Common interface of the solvers able to fit the unified objective. Both the
/// closed-form solver and the manifold engine instantiated with UlcaCost implement
/// it, so sessions and the weight optimizer can treat them interchangeably.
/// Implementors are cloned when sessions are snapshotted.
pub trait UlcaSolver : Clone {

    /// Fits the projection for the informed weights. When alpha is None the
    /// trade-off is solved for; otherwise it is held fixed.
    fn fit_ulca(
        &mut self,
        stats : &GroupStats,
        weights : &WeightState,
        reg : Regularization,
        alpha : Option<f64>
    ) -> Result<(), UlcaError>;

    /// Projection matrix (features x components) of the last fit.
    fn projection(&self) -> Option<&DMatrix<f64>>;

    /// Replaces the projection matrix, as done after rotation alignment.
    fn set_projection(&mut self, m : DMatrix<f64>);

    /// Objective value achieved by the last fit. For the ratio objective this is
    /// tr(M^T C1 M) / tr(M^T C0 M), the inverse of the optimal trade-off, so that
    /// 1 / final_cost() is a sensible default alpha.
    fn final_cost(&self) -> Option<f64>;

    /// Trade-off used (fixed) or found (solved) by the last fit.
    fn alpha(&self) -> Option<f64>;

    fn n_components(&self) -> usize;

    fn transform(&self, data : &Dataset) -> Result<DMatrix<f64>, UlcaError> {
        let m = self.projection().ok_or(UlcaError::NotFitted)?;
        data.transform(m)
    }

    fn fit_transform(
        &mut self,
        data : &Dataset,
        weights : &WeightState,
        reg : Regularization,
        alpha : Option<f64>
    ) -> Result<DMatrix<f64>, UlcaError> {
        let stats = GroupStats::compute(data);
        self.fit_ulca(&stats, weights, reg, alpha)?;
        self.transform(data)
    }

}
