use nalgebra::*;
use argmin::core::{CostFunction, Executor, State};
use argmin::solver::neldermead::NelderMead;
use serde::{Serialize, Deserialize};
use std::cell::{Cell, RefCell};
use tracing::debug;
use crate::data::Dataset;
use crate::cov::{GroupStats, Regularization};
use crate::weights::WeightState;
use crate::fit::UlcaSolver;
use crate::align::align_embedding;
use crate::error::UlcaError;

/// Per-group layout summaries and the costs comparing an embedding to a desired layout.
pub mod layout;

pub use layout::*;

/// Cost weight attached to each interaction kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InteractionWeights {

    #[serde(rename = "move")]
    pub on_move : f64,

    #[serde(rename = "scale")]
    pub on_scale : f64

}

impl InteractionWeights {

    pub fn get(&self, interaction : Interaction) -> f64 {
        match interaction {
            Interaction::Move => self.on_move,
            Interaction::Scale => self.on_scale
        }
    }

}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightOptSettings {

    /// Iterations of the direct search. Every cost evaluation is a full refit.
    pub max_iter : u64,

    /// Search the trade-off alpha together with the weights.
    pub with_alpha : bool,

    /// Align candidate embeddings to the previous one before scoring them.
    pub apply_geom_trans : bool,

    pub w_area : InteractionWeights,

    pub w_dist : InteractionWeights,

    /// Edge length of the initial simplex.
    pub initial_step : f64,

    /// Standard deviation of the simplex costs below which the search stops.
    pub sd_tolerance : f64,

    /// Cost added per unit of box-constraint violation.
    pub penalty : f64

}

impl Default for WeightOptSettings {

    fn default() -> Self {
        Self {
            max_iter : 50,
            with_alpha : true,
            apply_geom_trans : true,
            w_area : InteractionWeights { on_move : 0.2, on_scale : 0.8 },
            w_dist : InteractionWeights { on_move : 0.8, on_scale : 0.2 },
            initial_step : 0.1,
            sd_tolerance : 1e-6,
            penalty : 1.0
        }
    }

}

/// Desired layout after a single-group edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutTarget {

    pub ideal : Layout,

    /// Label of the edited group.
    pub edited : usize,

    pub interaction : Interaction

}

impl LayoutTarget {

    /// Applies the edit to the current layout.
    pub fn from_edit(current : &Layout, edited : usize, edit : Edit) -> Result<Self, UlcaError> {
        Ok(Self { ideal : current.with_edit(edited, edit)?, edited, interaction : edit.interaction() })
    }

    pub fn from_ellipses(ellipses : &[Ellipse], edited : usize, interaction : Interaction) -> Result<Self, UlcaError> {
        Ok(Self { ideal : Layout::from_ellipses(ellipses)?, edited, interaction })
    }

    /// Weighted layout cost of an actual layout, with the area/distance balance
    /// given by the interaction kind.
    pub fn cost(&self, actual : &Layout, settings : &WeightOptSettings) -> Result<f64, UlcaError> {
        total_cost(
            &self.ideal,
            actual,
            self.edited,
            settings.w_area.get(self.interaction),
            settings.w_dist.get(self.interaction)
        )
    }

}

/// Data shared by every refit of a search.
#[derive(Debug, Clone, Copy)]
pub struct FitInputs<'a> {

    pub data : &'a Dataset,

    pub stats : &'a GroupStats,

    pub reg : Regularization

}

/// Best point of a weight search, re-evaluated at its feasible projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightOptResult {

    pub weights : WeightState,

    pub alpha : f64,

    pub cost : f64,

    /// Cost function evaluations (solver refits) spent.
    pub evaluations : usize,

    pub iterations : u64

}

#[derive(Debug, Clone)]
struct Evaluation {
    weights : WeightState,
    alpha : f64,
    cost : f64
}

// Refits the solver at arbitrary points of the search space. Points outside the
// box [0,1] (weights) x [0,inf) (alpha) are projected onto it and the distance
// travelled is charged as a penalty, which keeps the simplex inside the box.
struct WeightProblem<'a, S> {
    solver : RefCell<S>,
    inputs : FitInputs<'a>,
    labels : Vec<usize>,
    target : &'a LayoutTarget,
    z_prev : Option<&'a DMatrix<f64>>,
    fixed_alpha : Option<f64>,
    settings : &'a WeightOptSettings,
    evaluations : Cell<usize>
}

impl<'a, S> WeightProblem<'a, S>
where
    S : UlcaSolver
{

    fn clip(&self, params : &[f64]) -> (Vec<f64>, f64) {
        let n_weights = 3 * self.labels.len();
        let mut violation = 0.0;
        let clipped = params.iter().enumerate().map(|(i, v)| {
            let c = if i < n_weights { v.clamp(0.0, 1.0) } else { v.max(0.0) };
            violation += (v - c).abs();
            c
        }).collect();
        (clipped, violation)
    }

    fn evaluate(&self, params : &[f64]) -> Result<(Evaluation, f64), UlcaError> {
        let (clipped, violation) = self.clip(params);
        let weights = WeightState::unflatten(&self.labels, &clipped)?;
        let alpha = match self.fixed_alpha {
            Some(alpha) => alpha,
            None => clipped[3 * self.labels.len()]
        };
        let mut solver = self.solver.borrow_mut();
        solver.fit_ulca(self.inputs.stats, &weights, self.inputs.reg, Some(alpha))?;
        let z = solver.transform(self.inputs.data)?;
        let z = if self.settings.apply_geom_trans {
            align_embedding(self.z_prev, z)?.0
        } else {
            z
        };
        let actual = Layout::from_embedding(&z, self.inputs.data.y())?;
        let cost = self.target.cost(&actual, self.settings)?;
        self.evaluations.set(self.evaluations.get() + 1);
        debug!("weight search evaluation {}: cost = {}, violation = {}", self.evaluations.get(), cost, violation);
        Ok((Evaluation { weights, alpha, cost }, violation))
    }

}

impl<'a, S> CostFunction for &WeightProblem<'a, S>
where
    S : UlcaSolver
{

    type Param = Vec<f64>;

    type Output = f64;

    fn cost(&self, params : &Vec<f64>) -> Result<f64, argmin::core::Error> {
        let (eval, violation) = self.evaluate(&params[..])?;
        Ok(eval.cost + self.settings.penalty * violation)
    }

}

/// Backward weight optimization: searches the group weights (and optionally alpha)
/// whose refit reproduces a desired layout, with a Nelder-Mead direct search over
/// the flattened weight vector [tg..., bg..., bw..., (alpha)].
#[derive(Debug, Clone, Default)]
pub struct WeightOptimizer {
    settings : WeightOptSettings
}

impl WeightOptimizer {

    pub fn new(settings : WeightOptSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &WeightOptSettings {
        &self.settings
    }

    /// Layout cost of the embedding produced by the informed weights, as scored
    /// inside the search.
    pub fn layout_cost<S>(
        &self,
        solver : &S,
        inputs : FitInputs<'_>,
        weights : &WeightState,
        alpha : f64,
        target : &LayoutTarget,
        z_prev : Option<&DMatrix<f64>>
    ) -> Result<f64, UlcaError>
    where
        S : UlcaSolver
    {
        let problem = self.problem(solver, inputs, target, z_prev, Some(alpha));
        let params = weights.flatten(&problem.labels)?;
        Ok(problem.evaluate(&params[..])?.0.cost)
    }

    fn problem<'a, S>(
        &'a self,
        solver : &S,
        inputs : FitInputs<'a>,
        target : &'a LayoutTarget,
        z_prev : Option<&'a DMatrix<f64>>,
        fixed_alpha : Option<f64>
    ) -> WeightProblem<'a, S>
    where
        S : UlcaSolver
    {
        WeightProblem {
            solver : RefCell::new(solver.clone()),
            inputs,
            labels : inputs.data.labels().to_vec(),
            target,
            z_prev,
            fixed_alpha,
            settings : &self.settings,
            evaluations : Cell::new(0)
        }
    }

    // Start point plus one vertex per coordinate, stepping inwards when a step
    // would leave the unit box.
    fn initial_simplex(&self, x0 : &[f64], n_weights : usize) -> Vec<Vec<f64>> {
        let step = self.settings.initial_step;
        let mut simplex = vec![x0.to_vec()];
        for i in 0..x0.len() {
            let mut v = x0.to_vec();
            if i < n_weights {
                v[i] = if v[i] + step > 1.0 { v[i] - step } else { v[i] + step };
            } else {
                v[i] += step * v[i].max(1.0);
            }
            simplex.push(v);
        }
        simplex
    }

    /// Runs the search from the current weights. The solver is cloned, so the
    /// caller's instance is untouched. The returned cost is never compared to the
    /// starting one here; rejecting regressions is up to the caller.
    pub fn optimize<S>(
        &self,
        solver : &S,
        inputs : FitInputs<'_>,
        start : &WeightState,
        alpha : f64,
        target : &LayoutTarget,
        z_prev : Option<&DMatrix<f64>>
    ) -> Result<WeightOptResult, UlcaError>
    where
        S : UlcaSolver
    {
        let fixed_alpha = if self.settings.with_alpha { None } else { Some(alpha) };
        let problem = self.problem(solver, inputs, target, z_prev, fixed_alpha);
        let mut x0 = start.flatten(&problem.labels)?;
        let n_weights = x0.len();
        if self.settings.with_alpha {
            x0.push(alpha.max(0.0));
        }

        let nm = NelderMead::new(self.initial_simplex(&x0[..], n_weights))
            .with_sd_tolerance(self.settings.sd_tolerance)
            .map_err(|e| UlcaError::Optimization(e.to_string()) )?;
        let res = Executor::new(&problem, nm)
            .configure(|state| state.max_iters(self.settings.max_iter) )
            .run()
            .map_err(|e| match e.downcast::<UlcaError>() {
                Ok(e) => e,
                Err(e) => UlcaError::Optimization(e.to_string())
            })?;
        let iterations = res.state().get_iter();
        let best = res.state().get_best_param().cloned().unwrap_or(x0);

        let (eval, _) = problem.evaluate(&best[..])?;
        debug!("Weight search finished after {} iterations, cost = {}", iterations, eval.cost);
        Ok(WeightOptResult {
            weights : eval.weights,
            alpha : eval.alpha,
            cost : eval.cost,
            evaluations : problem.evaluations.get(),
            iterations
        })
    }

}

/// Normalized improvement of an achieved cost over the original one, relative to
/// the best cost known to be achievable, clamped to [0,1]. None when there was
/// nothing to improve (original <= 0) or the reference does not improve either.
pub fn precision(original : f64, achieved : f64, best : f64) -> Option<f64> {
    if original <= 0.0 || best >= original {
        return None;
    }
    Some(((original - achieved) / (original - best)).clamp(0.0, 1.0))
}
