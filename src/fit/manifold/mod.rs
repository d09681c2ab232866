use nalgebra::*;
use finitediff::FiniteDiff;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Serialize, Deserialize};
use tracing::{debug, warn};
use crate::cov::{GroupStats, Regularization};
use crate::weights::WeightState;
use crate::axes::{AxisSettings, normalize_axes};
use crate::error::UlcaError;
use super::UlcaSolver;

/// Stiefel and Grassmann geometry (projection, retraction, transport).
pub mod geometry;

pub use geometry::*;

/// Riemannian trust-region solver.
pub mod trust;

pub use trust::*;

/// Predefined costs and their builders.
pub mod cost;

pub use cost::*;

/// A scalar function of a projection matrix (features x components), minimized
/// over the manifold. Objectives that do not know their gradient in closed form
/// fall back to central finite differences.
pub trait Objective {

    fn cost(&self, m : &DMatrix<f64>) -> f64;

    /// Euclidean gradient of the cost at m.
    fn gradient(&self, m : &DMatrix<f64>) -> DMatrix<f64> {
        numeric_gradient(|x| self.cost(x), m)
    }

    fn n_features(&self) -> usize;

}

/// Central-difference gradient of f at m.
pub fn numeric_gradient<F>(f : F, m : &DMatrix<f64>) -> DMatrix<f64>
where
    F : Fn(&DMatrix<f64>) -> f64
{
    let (n, p) = m.shape();
    let flat : Vec<f64> = m.as_slice().to_vec();
    let grad = flat.central_diff(&|v : &Vec<f64>| f(&DMatrix::from_column_slice(n, p, &v[..])) );
    DMatrix::from_vec(n, p, grad)
}

/// Builds the objective of a dimensionality-reduction method from its inputs.
/// Swapping the builder is all it takes to move the same engine from PCA to LDA,
/// contrastive PCA or the unified objective.
pub trait CostBuilder {

    type Input<'a>;

    fn build(&self, input : Self::Input<'_>) -> Result<Box<dyn Objective>, UlcaError>;

}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifoldSettings {

    pub n_components : usize,

    pub max_iter : usize,

    /// Riemannian gradient norm below which the search stops.
    pub min_grad_norm : f64,

    pub apply_varimax : bool,

    pub apply_consist_axes : bool,

    pub manifold : Manifold,

    /// Seed of the random starting point.
    pub seed : u64

}

impl Default for ManifoldSettings {

    fn default() -> Self {
        Self {
            n_components : 2,
            max_iter : 100,
            min_grad_norm : 1e-2,
            apply_varimax : true,
            apply_consist_axes : true,
            manifold : Manifold::Grassmann,
            seed : 0
        }
    }

}

/// Linear dimensionality reduction by manifold optimization, parametrized by the
/// cost builder. The projection is found by trust-region search from a seeded
/// random orthonormal point, then passed through the axis normalizer. Reaching the
/// iteration cap is not an error; inspect report() for how the search ended.
#[derive(Debug, Clone)]
pub struct ManifoldDr<B> {

    builder : B,

    settings : ManifoldSettings,

    m : Option<DMatrix<f64>>,

    report : Option<TrustRegionReport>

}

impl<B> ManifoldDr<B>
where
    B : CostBuilder
{

    pub fn new(builder : B, settings : ManifoldSettings) -> Self {
        Self { builder, settings, m : None, report : None }
    }

    pub fn builder(&self) -> &B {
        &self.builder
    }

    pub fn builder_mut(&mut self) -> &mut B {
        &mut self.builder
    }

    pub fn settings(&self) -> &ManifoldSettings {
        &self.settings
    }

    pub fn fit(&mut self, input : B::Input<'_>) -> Result<&mut Self, UlcaError> {
        let obj = self.builder.build(input)?;
        let n = obj.n_features();
        let p = self.settings.n_components;
        if p == 0 || p > n {
            return Err(UlcaError::InvalidSetting(format!(
                "Cannot extract {} components from {} features",
                p,
                n
            )));
        }
        let manifold = self.settings.manifold;
        let mut rng = StdRng::seed_from_u64(self.settings.seed);
        let x0 = manifold.random_point(n, p, &mut rng);
        let solver = TrustRegions::new(TrustRegionSettings {
            max_iter : self.settings.max_iter,
            min_grad_norm : self.settings.min_grad_norm,
            ..Default::default()
        });
        let report = solver.minimize(&manifold, obj.as_ref(), x0);
        if report.converged() {
            debug!("Manifold search stopped after {} iterations ({:?}), cost = {}", report.iterations, report.stop, report.cost);
        } else {
            warn!("Manifold search hit the iteration cap ({}), |grad| = {}", report.iterations, report.grad_norm);
        }
        let axes = AxisSettings {
            apply_varimax : self.settings.apply_varimax,
            apply_consist_axes : self.settings.apply_consist_axes
        };
        self.m = Some(normalize_axes(report.point.clone(), axes)?);
        self.report = Some(report);
        Ok(self)
    }

    pub fn projection(&self) -> Option<&DMatrix<f64>> {
        self.m.as_ref()
    }

    /// Cost reached by the search at the last fit.
    pub fn achieved_cost(&self) -> Option<f64> {
        self.report.as_ref().map(|r| r.cost )
    }

    pub fn report(&self) -> Option<&TrustRegionReport> {
        self.report.as_ref()
    }

}

impl ManifoldDr<UlcaCost> {

    pub fn ulca(settings : ManifoldSettings) -> Self {
        Self::new(UlcaCost::default(), settings)
    }

}

impl Default for ManifoldDr<UlcaCost> {

    fn default() -> Self {
        Self::ulca(ManifoldSettings::default())
    }

}

impl UlcaSolver for ManifoldDr<UlcaCost> {

    fn fit_ulca(
        &mut self,
        stats : &GroupStats,
        weights : &WeightState,
        reg : Regularization,
        alpha : Option<f64>
    ) -> Result<(), UlcaError> {
        self.builder.alpha = alpha;
        self.fit(UlcaProblem { stats, weights, reg })?;
        Ok(())
    }

    fn projection(&self) -> Option<&DMatrix<f64>> {
        self.m.as_ref()
    }

    fn set_projection(&mut self, m : DMatrix<f64>) {
        self.m = Some(m);
    }

    // With a fixed trade-off, the cost reported is 1 / alpha as for the closed-form
    // solver; otherwise the ratio reached by the search.
    fn final_cost(&self) -> Option<f64> {
        match self.builder.alpha {
            Some(alpha) => self.report.as_ref().map(|_| if alpha != 0.0 { 1. / alpha } else { 0.0 } ),
            None => self.achieved_cost()
        }
    }

    fn alpha(&self) -> Option<f64> {
        match self.builder.alpha {
            Some(alpha) => self.report.as_ref().map(|_| alpha ),
            None => self.achieved_cost().map(|c| if c != 0.0 { 1. / c } else { 0.0 } )
        }
    }

    fn n_components(&self) -> usize {
        self.settings.n_components
    }

}
