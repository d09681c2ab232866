use nalgebra::*;
use serde::{Serialize, Deserialize};
use tracing::{debug, warn};
use crate::cov::{GroupStats, Regularization, Composite, trace_form};
use crate::weights::WeightState;
use crate::axes::{AxisSettings, normalize_axes};
use crate::error::UlcaError;
use super::UlcaSolver;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvdSettings {

    pub n_components : usize,

    pub apply_varimax : bool,

    pub apply_consist_axes : bool,

    /// Relative change of alpha below which the fixed-point iteration stops.
    pub convergence_ratio : f64,

    pub max_iter : usize

}

impl Default for EvdSettings {

    fn default() -> Self {
        Self {
            n_components : 2,
            apply_varimax : false,
            apply_consist_axes : true,
            convergence_ratio : 1e-6,
            max_iter : 100
        }
    }

}

/// Closed-form solver of the unified objective. With a fixed trade-off alpha, the
/// projection is given by the leading eigenvectors of C0 - alpha C1. When alpha is
/// solved for, it is found by the fixed-point iteration
/// alpha <- tr(M^T C0 M) / tr(M^T C1 M) starting from alpha = 0, re-solving the
/// eigenproblem at each step. Exhausting the iteration budget is not an error:
/// the last iterate is kept.
#[derive(Debug, Clone)]
pub struct EvdUlca {

    settings : EvdSettings,

    m : Option<DMatrix<f64>>,

    alpha : Option<f64>,

    final_cost : Option<f64>,

    ratio : Option<f64>,

    n_iter : usize,

    converged : bool

}

impl Default for EvdUlca {

    fn default() -> Self {
        Self::new(EvdSettings::default())
    }

}

impl EvdUlca {

    pub fn new(settings : EvdSettings) -> Self {
        Self {
            settings,
            m : None,
            alpha : None,
            final_cost : None,
            ratio : None,
            n_iter : 0,
            converged : false
        }
    }

    pub fn settings(&self) -> &EvdSettings {
        &self.settings
    }

    pub fn fit(
        &mut self,
        stats : &GroupStats,
        weights : &WeightState,
        reg : Regularization,
        alpha : Option<f64>
    ) -> Result<&mut Self, UlcaError> {
        let comp = Composite::combine(stats, weights, reg)?;
        let p = self.settings.n_components;
        if p == 0 || p > comp.n_features() {
            return Err(UlcaError::InvalidSetting(format!(
                "Cannot extract {} components from {} features",
                p,
                comp.n_features()
            )));
        }

        let (m, alpha) = match alpha {
            Some(alpha) => {
                self.n_iter = 0;
                self.converged = true;
                (leading_eigenvectors(&comp.c0, &comp.c1, alpha, p), alpha)
            },
            None => self.solve_alpha(&comp)?
        };

        self.final_cost = Some(if alpha != 0.0 { 1. / alpha } else { 0.0 });
        let den = trace_form(&comp.c1, &m);
        self.ratio = if den != 0.0 { Some(trace_form(&comp.c0, &m) / den) } else { None };
        self.alpha = Some(alpha);
        let axes = AxisSettings {
            apply_varimax : self.settings.apply_varimax,
            apply_consist_axes : self.settings.apply_consist_axes
        };
        self.m = Some(normalize_axes(m, axes)?);
        Ok(self)
    }

    fn solve_alpha(&mut self, comp : &Composite) -> Result<(DMatrix<f64>, f64), UlcaError> {
        comp.check_ratio_defined()?;
        let p = self.settings.n_components;
        let mut alpha = 0.0;
        let mut m = leading_eigenvectors(&comp.c0, &comp.c1, alpha, p);
        self.converged = false;
        self.n_iter = 0;
        for _ in 0..self.settings.max_iter {
            let prev_alpha = alpha;
            let den = trace_form(&comp.c1, &m);
            if den == 0.0 {
                return Err(UlcaError::NumericalDegeneracy(
                    String::from("tr(M^T C1 M) vanished during the alpha iteration")
                ));
            }
            alpha = trace_form(&comp.c0, &m) / den;
            m = leading_eigenvectors(&comp.c0, &comp.c1, alpha, p);
            self.n_iter += 1;
            let improved_ratio = (prev_alpha - alpha).abs() / alpha.abs();
            debug!("alpha: {}, improved: {}", alpha, improved_ratio);
            if improved_ratio < self.settings.convergence_ratio {
                self.converged = true;
                break;
            }
        }
        if !self.converged {
            warn!("Trade-off iteration did not converge after {} iterations (alpha = {})", self.n_iter, alpha);
        }
        Ok((m, alpha))
    }

    /// tr(M^T C0 M) / tr(M^T C1 M) at the fitted projection, when defined.
    pub fn achieved_ratio(&self) -> Option<f64> {
        self.ratio
    }

    pub fn iterations(&self) -> usize {
        self.n_iter
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

}

/// Eigenvectors of C0 - alpha C1 associated with the p largest eigenvalues, in
/// descending eigenvalue order. Both composites are symmetric (GroupStats rejects
/// asymmetric scatter), so the spectrum is real; averaging with the transpose only
/// removes rounding noise.
pub fn leading_eigenvectors(c0 : &DMatrix<f64>, c1 : &DMatrix<f64>, alpha : f64, p : usize) -> DMatrix<f64> {
    let c = c0 - c1 * alpha;
    let c = (&c + c.transpose()) * 0.5;
    let eig = SymmetricEigen::new(c);
    let mut order : Vec<usize> = (0..eig.eigenvalues.len()).collect();
    order.sort_by(|a, b| {
        eig.eigenvalues[*b].partial_cmp(&eig.eigenvalues[*a]).unwrap_or(std::cmp::Ordering::Equal)
    });
    eig.eigenvectors.select_columns(order.iter().take(p))
}

impl UlcaSolver for EvdUlca {

    fn fit_ulca(
        &mut self,
        stats : &GroupStats,
        weights : &WeightState,
        reg : Regularization,
        alpha : Option<f64>
    ) -> Result<(), UlcaError> {
        self.fit(stats, weights, reg, alpha)?;
        Ok(())
    }

    fn projection(&self) -> Option<&DMatrix<f64>> {
        self.m.as_ref()
    }

    fn set_projection(&mut self, m : DMatrix<f64>) {
        self.m = Some(m);
    }

    fn final_cost(&self) -> Option<f64> {
        self.final_cost
    }

    fn alpha(&self) -> Option<f64> {
        self.alpha
    }

    fn n_components(&self) -> usize {
        self.settings.n_components
    }

}

#[cfg(test)]
mod tests {

    use super::*;
    use std::collections::BTreeMap;
    use crate::cov::GroupCov;
    use approx::assert_relative_eq;

    // Two groups with diagonal scatter: C0 = diag(4, 1) and C1 = diag(1, 2) under
    // the weights below, so the best one-dimensional trade-off is max(4/1, 1/2) = 4.
    fn diagonal_stats() -> GroupStats {
        let mut groups = BTreeMap::new();
        groups.insert(0, GroupCov {
            within : DMatrix::from_diagonal(&DVector::from_vec(vec![4.0, 1.0])),
            between : DMatrix::zeros(2, 2),
            size : 10
        });
        groups.insert(1, GroupCov {
            within : DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 2.0])),
            between : DMatrix::zeros(2, 2),
            size : 10
        });
        GroupStats::from_groups(groups).unwrap()
    }

    fn contrast_weights() -> WeightState {
        let mut w = WeightState::uniform(&[0, 1], 0.0, 0.0, 0.0);
        w.tg.insert(0, 1.0);
        w.bg.insert(1, 1.0);
        w
    }

    #[test]
    fn alpha_converges_to_known_optimum() {
        let settings = EvdSettings { n_components : 1, ..Default::default() };
        let mut evd = EvdUlca::new(settings);
        evd.fit(&diagonal_stats(), &contrast_weights(), Regularization::default(), None).unwrap();
        let alpha = evd.alpha().unwrap();
        assert!(((alpha - 4.0) / 4.0).abs() < 1e-6);
        assert!(evd.converged());
        assert_relative_eq!(evd.final_cost().unwrap(), 0.25, epsilon = 1e-9);
        let m = evd.projection().unwrap();
        assert_relative_eq!(m[(0, 0)].abs(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn fixed_alpha_picks_largest_eigenvalues() {
        let settings = EvdSettings { n_components : 1, ..Default::default() };
        let mut evd = EvdUlca::new(settings);
        // C0 - 10 C1 = diag(-6, -19): the first axis still wins.
        evd.fit(&diagonal_stats(), &contrast_weights(), Regularization::default(), Some(10.0)).unwrap();
        assert_relative_eq!(evd.projection().unwrap()[(0, 0)].abs(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(evd.final_cost().unwrap(), 0.1, epsilon = 1e-12);
        assert_eq!(evd.iterations(), 0);
    }

    #[test]
    fn all_zero_weights_give_unit_ratio() {
        let mut evd = EvdUlca::default();
        let w = WeightState::uniform(&[0, 1], 0.0, 0.0, 0.0);
        evd.fit(&diagonal_stats(), &w, Regularization::default(), None).unwrap();
        assert_relative_eq!(evd.alpha().unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(evd.final_cost().unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn zeroed_regularization_is_reported() {
        let mut evd = EvdUlca::default();
        let w = WeightState::uniform(&[0, 1], 0.0, 0.0, 0.0);
        let res = evd.fit(&diagonal_stats(), &w, Regularization::new(Some(0.0), Some(0.0)), None);
        assert!(matches!(res, Err(UlcaError::NumericalDegeneracy(_))));
    }

    #[test]
    fn too_many_components_fail() {
        let mut evd = EvdUlca::new(EvdSettings { n_components : 3, ..Default::default() });
        let res = evd.fit(&diagonal_stats(), &contrast_weights(), Regularization::default(), None);
        assert!(matches!(res, Err(UlcaError::InvalidSetting(_))));
    }

}
