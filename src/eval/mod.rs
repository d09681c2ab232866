use nalgebra::*;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use serde::{Serialize, Deserialize};
use std::time::Instant;
use tracing::{debug, info};
use crate::data::Dataset;
use crate::cov::{GroupStats, Regularization};
use crate::weights::WeightState;
use crate::fit::UlcaSolver;
use crate::optim::*;
use crate::error::UlcaError;

/// K-means labeling of unlabeled data.
pub mod cluster;

pub use cluster::*;

const MIN_SCALE : f64 = 0.2;

const MAX_SCALE : f64 = 5.0;

// Moves may land up to 5% beyond each side of the embedding bounding box.
const MAX_MOVING_RANGE : f64 = 1.1;

/// Settings of the precision study of the weight optimizer: random single-group
/// edits are applied to an embedding produced by random weights, and the cost
/// reached with the configured budget is compared against the cost of a much
/// longer search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalSettings {

    pub n_runs : usize,

    /// When set, the dataset labels are replaced by a k-means partition with
    /// this many clusters.
    pub n_clusters : Option<usize>,

    pub alpha : f64,

    pub gamma0 : Option<f64>,

    pub gamma1 : Option<f64>,

    /// Search budget under evaluation.
    pub max_iter : u64,

    /// Budget of the reference search.
    pub best_max_iter : u64,

    pub seed : u64

}

impl Default for EvalSettings {

    fn default() -> Self {
        Self {
            n_runs : 10,
            n_clusters : None,
            alpha : 1.0,
            gamma0 : Some(1e-3),
            gamma1 : Some(1e-3),
            max_iter : 10,
            best_max_iter : 1000,
            seed : 0
        }
    }

}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalRun {

    pub run : usize,

    pub label : usize,

    pub edit : Edit,

    pub original_cost : f64,

    pub best_cost : f64,

    /// Cost reached with the evaluated budget, never above the original.
    pub cost : f64,

    pub precision : f64,

    pub seconds : f64

}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalReport {

    pub runs : Vec<EvalRun>,

    /// Runs without room for improvement (zero original cost, or a reference
    /// search that could not improve either).
    pub skipped : usize,

    /// Size of each k-means cluster, when the labels were replaced by clustering.
    pub cluster_sizes : Option<Vec<usize>>,

    pub mean_precision : f64,

    pub var_precision : f64,

    pub mean_seconds : f64,

    pub var_seconds : f64

}

fn mean_var(v : impl Iterator<Item=f64> + Clone) -> (f64, f64) {
    let n = v.clone().count();
    if n == 0 {
        return (f64::NAN, f64::NAN);
    }
    let mean = v.clone().sum::<f64>() / n as f64;
    let var = v.map(|x| (x - mean).powi(2) ).sum::<f64>() / n as f64;
    (mean, var)
}

fn random_edit<R : Rng>(rng : &mut R, z : &DMatrix<f64>) -> Edit {
    if rng.gen_bool(0.5) {
        let mut pos = [0.0; 2];
        for (j, p) in pos.iter_mut().enumerate().take(z.ncols()) {
            let (lo, hi) = (z.column(j).min(), z.column(j).max());
            let margin = 0.5 * (hi - lo) * (MAX_MOVING_RANGE - 1.0);
            *p = if hi > lo { rng.gen_range((lo - margin)..(hi + margin)) } else { lo };
        }
        Edit::Move { cx : pos[0], cy : pos[1] }
    } else {
        Edit::Scale(rng.gen_range(MIN_SCALE..MAX_SCALE))
    }
}

/// Runs the precision study. The data is used as informed (standardize it first
/// if needed); on_run is called with the index of each run as it starts.
pub fn run_backward_eval<S, F>(
    solver : &S,
    data : &Dataset,
    settings : &EvalSettings,
    weight_opt : &WeightOptSettings,
    mut on_run : F
) -> Result<EvalReport, UlcaError>
where
    S : UlcaSolver,
    F : FnMut(usize)
{
    let mut rng = StdRng::seed_from_u64(settings.seed);
    let mut report = EvalReport::default();
    let data = match settings.n_clusters {
        Some(k) => {
            let km = KMeans::estimate(data.x(), &KMeansSettings { n_cluster : k, max_iter : 300 }, &mut rng)?;
            info!("Relabeled data with {} k-means clusters after {} iterations", km.n_clusters(), km.iterations());
            debug!("{}", km);
            report.cluster_sizes = Some((0..km.n_clusters()).map(|c| km.count_allocations(c) ).collect());
            Dataset::new(data.x().clone(), km.allocations().to_vec())?
        },
        None => data.clone()
    };
    let labels = data.labels().to_vec();
    let stats = GroupStats::compute(&data);
    let reg = Regularization::new(settings.gamma0, settings.gamma1);
    let inputs = FitInputs { data : &data, stats : &stats, reg };

    let weights = WeightState::new(
        labels.iter().map(|l| (*l, rng.gen::<f64>()) ).collect(),
        labels.iter().map(|l| (*l, rng.gen::<f64>()) ).collect(),
        labels.iter().map(|l| (*l, rng.gen::<f64>()) ).collect()
    );
    let mut fitted = solver.clone();
    fitted.fit_ulca(&stats, &weights, reg, Some(settings.alpha))?;
    let z = fitted.transform(&data)?;
    let current = Layout::from_embedding(&z, data.y())?;

    let mut base = weight_opt.clone();
    base.with_alpha = true;
    base.apply_geom_trans = false;
    let reference = WeightOptimizer::new(WeightOptSettings { max_iter : settings.best_max_iter, ..base.clone() });
    let evaluated = WeightOptimizer::new(WeightOptSettings { max_iter : settings.max_iter, ..base });

    for run in 0..settings.n_runs {
        on_run(run);
        let label = labels[rng.gen_range(0..labels.len())];
        let edit = random_edit(&mut rng, &z);
        let target = LayoutTarget::from_edit(&current, label, edit)?;
        let original_cost = target.cost(&current, evaluated.settings())?;
        if original_cost <= 0.0 {
            report.skipped += 1;
            continue;
        }
        let best_cost = reference.optimize(&fitted, inputs, &weights, settings.alpha, &target, Some(&z))?.cost;
        if best_cost >= original_cost {
            debug!("Run {}: reference search could not improve ({} >= {})", run, best_cost, original_cost);
            report.skipped += 1;
            continue;
        }
        let start = Instant::now();
        let res = evaluated.optimize(&fitted, inputs, &weights, settings.alpha, &target, Some(&z))?;
        let seconds = start.elapsed().as_secs_f64();
        let cost = res.cost.min(original_cost);
        let precision = precision(original_cost, cost, best_cost).unwrap_or(0.0);
        debug!("Run {}: original = {}, best = {}, achieved = {}, precision = {}", run, original_cost, best_cost, cost, precision);
        report.runs.push(EvalRun { run, label, edit, original_cost, best_cost, cost, precision, seconds });
    }

    let (mean_precision, var_precision) = mean_var(report.runs.iter().map(|r| r.precision ));
    let (mean_seconds, var_seconds) = mean_var(report.runs.iter().map(|r| r.seconds ));
    report.mean_precision = mean_precision;
    report.var_precision = var_precision;
    report.mean_seconds = mean_seconds;
    report.var_seconds = var_seconds;
    info!(
        "Backward evaluation: {} runs, {} skipped, mean precision = {}, mean time = {}s",
        report.runs.len(), report.skipped, mean_precision, mean_seconds
    );
    Ok(report)
}
