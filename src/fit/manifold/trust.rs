use nalgebra::*;
use serde::{Serialize, Deserialize};
use tracing::debug;
use super::{Objective, Manifold};

/// Riemannian trust-region method with a truncated conjugate-gradient (Steihaug-Toint)
/// inner solver. The Hessian is approximated by finite differences of the
/// Riemannian gradient along the search direction, so objectives only need to
/// provide a cost and a Euclidean gradient.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustRegionSettings {

    pub max_iter : usize,

    pub min_grad_norm : f64,

    pub min_step_size : f64,

    /// Inner solver linear convergence target.
    pub kappa : f64,

    /// Inner solver superlinear convergence exponent.
    pub theta : f64,

    /// Minimum model agreement ratio for a step to be accepted.
    pub rho_prime : f64,

    pub rho_regularization : f64,

    pub min_inner_iter : usize,

    /// Defaults to the manifold dimension.
    pub max_inner_iter : Option<usize>

}

impl Default for TrustRegionSettings {

    fn default() -> Self {
        Self {
            max_iter : 100,
            min_grad_norm : 1e-2,
            min_step_size : 1e-10,
            kappa : 0.1,
            theta : 1.0,
            rho_prime : 0.1,
            rho_regularization : 1e3,
            min_inner_iter : 1,
            max_inner_iter : None
        }
    }

}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    GradientNorm,
    StepSize,
    MaxIterations
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InnerStop {
    NegativeCurvature,
    ExceededTrustRegion,
    ReachedTargetLinear,
    ReachedTargetSuperlinear,
    MaxInnerIterations,
    ModelIncreased
}

/// Outcome of a trust-region run: the best (last accepted) iterate and how the
/// search ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustRegionReport {

    pub point : DMatrix<f64>,

    pub cost : f64,

    pub grad_norm : f64,

    pub iterations : usize,

    pub stop : StopReason

}

impl TrustRegionReport {

    pub fn converged(&self) -> bool {
        self.stop != StopReason::MaxIterations
    }

}

#[derive(Debug, Clone, Default)]
pub struct TrustRegions {
    settings : TrustRegionSettings
}

impl TrustRegions {

    pub fn new(settings : TrustRegionSettings) -> Self {
        Self { settings }
    }

    fn rgrad(&self, manifold : &Manifold, obj : &dyn Objective, x : &DMatrix<f64>) -> DMatrix<f64> {
        manifold.egrad2rgrad(x, &obj.gradient(x))
    }

    // Finite-difference approximation of the Riemannian Hessian applied to v.
    fn hess(
        &self,
        manifold : &Manifold,
        obj : &dyn Objective,
        x : &DMatrix<f64>,
        grad : &DMatrix<f64>,
        v : &DMatrix<f64>
    ) -> DMatrix<f64> {
        let norm = manifold.norm(v);
        if norm < 1e-170 {
            return manifold.zero_vector(x);
        }
        let eps = 2f64.powi(-14) / norm;
        let x1 = manifold.retr(x, &(v * eps));
        let grad1 = manifold.transp(&x1, x, &self.rgrad(manifold, obj, &x1));
        manifold.proj(x, &((grad1 - grad) / eps))
    }

    /// Minimizes obj over the manifold starting from x0. Exhausting the iteration
    /// budget is not an error: the report then carries the last accepted iterate.
    pub fn minimize(&self, manifold : &Manifold, obj : &dyn Objective, x0 : DMatrix<f64>) -> TrustRegionReport {
        let (n, p) = x0.shape();
        let delta_bar = manifold.typical_dist(n, p);
        let mut delta = delta_bar / 8.;
        let mut x = x0;
        let mut fx = obj.cost(&x);
        let mut grad = self.rgrad(manifold, obj, &x);
        let mut grad_norm = manifold.norm(&grad);
        let mut iter = 0;
        let stop = loop {
            if grad_norm < self.settings.min_grad_norm {
                break StopReason::GradientNorm;
            }
            if iter >= self.settings.max_iter {
                break StopReason::MaxIterations;
            }
            iter += 1;

            let (eta, h_eta, inner_stop) = self.truncated_cg(manifold, obj, &x, &grad, delta);
            let norm_eta = manifold.norm(&eta);
            let x_prop = manifold.retr(&x, &eta);
            let fx_prop = obj.cost(&x_prop);

            let rho_reg = fx.abs().max(1.0) * f64::EPSILON * self.settings.rho_regularization;
            let rho_num = fx - fx_prop + rho_reg;
            let rho_den = -manifold.inner(&eta, &(&grad + &h_eta * 0.5)) + rho_reg;
            let model_decreased = rho_den >= 0.0;
            let rho = rho_num / rho_den;

            if rho < 0.25 || !model_decreased || rho.is_nan() {
                delta /= 4.;
            } else if rho > 0.75 && matches!(inner_stop, InnerStop::NegativeCurvature | InnerStop::ExceededTrustRegion) {
                delta = (2. * delta).min(delta_bar);
            }

            let accepted = model_decreased && rho > self.settings.rho_prime;
            if accepted {
                x = x_prop;
                fx = fx_prop;
                grad = self.rgrad(manifold, obj, &x);
                grad_norm = manifold.norm(&grad);
            }
            debug!(
                "trust-region iter {}: cost = {}, |grad| = {}, rho = {}, delta = {}, accepted = {}, inner = {:?}",
                iter, fx, grad_norm, rho, delta, accepted, inner_stop
            );
            if norm_eta < self.settings.min_step_size {
                break StopReason::StepSize;
            }
        };
        TrustRegionReport { point : x, cost : fx, grad_norm, iterations : iter, stop }
    }

    // Steihaug-Toint truncated conjugate gradient for the trust-region subproblem
    // min_eta <grad, eta> + 1/2 <eta, H eta> subject to |eta| <= delta.
    fn truncated_cg(
        &self,
        manifold : &Manifold,
        obj : &dyn Objective,
        x : &DMatrix<f64>,
        grad : &DMatrix<f64>,
        delta : f64
    ) -> (DMatrix<f64>, DMatrix<f64>, InnerStop) {
        let (n, p) = x.shape();
        let max_inner = self.settings.max_inner_iter.unwrap_or_else(|| manifold.dim(n, p) ).max(1);
        let delta_sq = delta * delta;

        let mut eta = manifold.zero_vector(x);
        let mut h_eta = manifold.zero_vector(x);
        let mut r = grad.clone();
        let norm_r0 = manifold.norm(&r);
        let mut z_r = manifold.inner(&r, &r);
        let mut d_pd = z_r;
        let mut e_pe = 0.0;
        let mut e_pd = 0.0;
        let mut mdelta = -r.clone();
        let mut model_value = 0.0;
        let mut stop = InnerStop::MaxInnerIterations;

        for j in 0..max_inner {
            let h_delta = self.hess(manifold, obj, x, grad, &mdelta);
            let d_hd = manifold.inner(&mdelta, &h_delta);
            let alpha = z_r / d_hd;
            let e_pe_new = e_pe + 2.0 * alpha * e_pd + alpha * alpha * d_pd;

            if d_hd <= 0.0 || e_pe_new >= delta_sq {
                let tau = (-e_pd + (e_pd * e_pd + d_pd * (delta_sq - e_pe)).sqrt()) / d_pd;
                eta += &mdelta * tau;
                h_eta += &h_delta * tau;
                stop = if d_hd <= 0.0 {
                    InnerStop::NegativeCurvature
                } else {
                    InnerStop::ExceededTrustRegion
                };
                break;
            }

            e_pe = e_pe_new;
            let new_eta = &eta + &mdelta * alpha;
            let new_h_eta = &h_eta + &h_delta * alpha;
            let new_model_value = manifold.inner(&new_eta, grad) + 0.5 * manifold.inner(&new_eta, &new_h_eta);
            if new_model_value >= model_value {
                stop = InnerStop::ModelIncreased;
                break;
            }
            eta = new_eta;
            h_eta = new_h_eta;
            model_value = new_model_value;

            r += &h_delta * alpha;
            let norm_r = manifold.norm(&r);
            let target = norm_r0.powf(self.settings.theta).min(self.settings.kappa);
            if j >= self.settings.min_inner_iter && norm_r <= norm_r0 * target {
                stop = if self.settings.kappa < norm_r0.powf(self.settings.theta) {
                    InnerStop::ReachedTargetLinear
                } else {
                    InnerStop::ReachedTargetSuperlinear
                };
                break;
            }

            r = manifold.proj(x, &r);
            let zold_rold = z_r;
            z_r = manifold.inner(&r, &r);
            let beta = z_r / zold_rold;
            mdelta = manifold.proj(x, &(&mdelta * beta - &r));
            e_pd = beta * (e_pd + alpha * d_pd);
            d_pd = z_r + beta * beta * d_pd;
        }
        (eta, h_eta, stop)
    }

}
