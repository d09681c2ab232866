use nalgebra::*;
use serde::{Serialize, Deserialize};
use crate::data::Dataset;
use crate::cov::{GroupStats, Regularization, Composite, trace_form};
use crate::weights::WeightState;
use crate::error::UlcaError;
use super::{Objective, CostBuilder};

/// tr(M^T A M), with Euclidean gradient 2 A M (A symmetric).
#[derive(Debug, Clone)]
pub struct TraceForm {
    a : DMatrix<f64>
}

impl TraceForm {

    pub fn new(a : DMatrix<f64>) -> Self {
        Self { a }
    }

    /// tr(M^T (alpha B - A) M): the linear trade-off between a matrix to be kept
    /// small (b) and one to be kept large (a).
    pub fn difference(alpha : f64, b : &DMatrix<f64>, a : &DMatrix<f64>) -> Self {
        Self { a : b * alpha - a }
    }

}

impl Objective for TraceForm {

    fn cost(&self, m : &DMatrix<f64>) -> f64 {
        trace_form(&self.a, m)
    }

    fn gradient(&self, m : &DMatrix<f64>) -> DMatrix<f64> {
        (&self.a * m) * 2.
    }

    fn n_features(&self) -> usize {
        self.a.nrows()
    }

}

/// tr(M^T N M) / tr(M^T D M). Either side can be replaced by the constant 1.
#[derive(Debug, Clone)]
pub struct TraceRatio {

    num : Option<DMatrix<f64>>,

    den : Option<DMatrix<f64>>,

    n_features : usize

}

impl TraceRatio {

    pub fn new(num : Option<DMatrix<f64>>, den : Option<DMatrix<f64>>, n_features : usize) -> Self {
        Self { num, den, n_features }
    }

    fn side(a : &Option<DMatrix<f64>>, m : &DMatrix<f64>) -> f64 {
        a.as_ref().map(|a| trace_form(a, m) ).unwrap_or(1.0)
    }

}

impl Objective for TraceRatio {

    fn cost(&self, m : &DMatrix<f64>) -> f64 {
        Self::side(&self.num, m) / Self::side(&self.den, m)
    }

    fn gradient(&self, m : &DMatrix<f64>) -> DMatrix<f64> {
        let n = Self::side(&self.num, m);
        let d = Self::side(&self.den, m);
        let mut grad = DMatrix::zeros(m.nrows(), m.ncols());
        if let Some(num) = &self.num {
            grad += (num * m) * (2. / d);
        }
        if let Some(den) = &self.den {
            grad -= (den * m) * (2. * n / (d * d));
        }
        grad
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

}

/// ||X - X M M^T||_F^2 written in terms of A = X^T X:
/// tr(A) - 2 tr(M^T A M) + tr(M^T A M M^T M). The gradient is left to finite differences.
#[derive(Debug, Clone)]
pub struct ReconstructionError {

    cov : DMatrix<f64>,

    total : f64

}

impl ReconstructionError {

    pub fn new(cov : DMatrix<f64>) -> Self {
        let total = cov.trace();
        Self { cov, total }
    }

}

impl Objective for ReconstructionError {

    fn cost(&self, m : &DMatrix<f64>) -> f64 {
        let mtam = m.transpose() * &self.cov * m;
        let mtm = m.transpose() * m;
        self.total - 2. * mtam.trace() + (mtam * mtm).trace()
    }

    fn n_features(&self) -> usize {
        self.cov.nrows()
    }

}

/// Scatter X_c^T X_c of the rows of x around their own mean, without dividing by
/// the row count, so target and background keep their relative sizes.
pub fn scatter(x : &DMatrix<f64>) -> DMatrix<f64> {
    let mut dev = x.clone();
    for mut col in dev.column_iter_mut() {
        let mean = col.mean();
        col.add_scalar_mut(-mean);
    }
    dev.transpose() * &dev
}

/// Principal component analysis: minimum reconstruction error of the centered data.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PcaCost;

impl CostBuilder for PcaCost {

    type Input<'a> = &'a Dataset;

    fn build(&self, data : &Dataset) -> Result<Box<dyn Objective>, UlcaError> {
        let xc = data.centered();
        Ok(Box::new(ReconstructionError::new(xc.transpose() * xc)))
    }

}

/// Linear discriminant analysis as the trace ratio tr(M^T S_w M) / tr(M^T S_b M)
/// of pooled within-group to between-group scatter.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LdaCost;

impl LdaCost {

    pub fn from_stats(stats : &GroupStats) -> Box<dyn Objective> {
        let d = stats.n_features();
        Box::new(TraceRatio::new(Some(stats.total_within()), Some(stats.total_between()), d))
    }

}

impl CostBuilder for LdaCost {

    type Input<'a> = &'a Dataset;

    fn build(&self, data : &Dataset) -> Result<Box<dyn Objective>, UlcaError> {
        Ok(Self::from_stats(&GroupStats::compute(data)))
    }

}

/// Target and background instance sets of contrastive methods. Both must share
/// the same features.
#[derive(Debug, Clone, Copy)]
pub struct ContrastPair<'a> {

    pub target : &'a DMatrix<f64>,

    pub background : &'a DMatrix<f64>

}

impl<'a> ContrastPair<'a> {

    fn check(&self) -> Result<usize, UlcaError> {
        if self.target.ncols() != self.background.ncols() {
            return Err(UlcaError::ShapeMismatch(format!(
                "Target has {} features but background has {}",
                self.target.ncols(),
                self.background.ncols()
            )));
        }
        if self.target.nrows() == 0 || self.background.nrows() == 0 {
            return Err(UlcaError::EmptyDataset);
        }
        Ok(self.target.ncols())
    }

}

fn contrast_objective(alpha : Option<f64>, c_tg : DMatrix<f64>, c_bg : DMatrix<f64>) -> Box<dyn Objective> {
    let d = c_tg.nrows();
    match alpha {
        Some(alpha) => Box::new(TraceForm::difference(alpha, &c_bg, &c_tg)),
        None => Box::new(TraceRatio::new(Some(c_bg), Some(c_tg), d))
    }
}

/// Contrastive PCA: keeps target variance large relative to background variance,
/// either as the ratio tr(M^T C_bg M) / tr(M^T C_tg M) (alpha None) or the linear
/// trade-off tr(M^T (alpha C_bg - C_tg) M).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CpcaCost {
    pub alpha : Option<f64>
}

impl CostBuilder for CpcaCost {

    type Input<'a> = ContrastPair<'a>;

    fn build(&self, pair : ContrastPair<'_>) -> Result<Box<dyn Objective>, UlcaError> {
        pair.check()?;
        Ok(contrast_objective(self.alpha, scatter(pair.target), scatter(pair.background)))
    }

}

/// Variant of contrastive PCA where the target scatter is taken over the
/// target and background instances stacked together.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CcpcaCost {
    pub alpha : Option<f64>
}

impl CostBuilder for CcpcaCost {

    type Input<'a> = ContrastPair<'a>;

    fn build(&self, pair : ContrastPair<'_>) -> Result<Box<dyn Objective>, UlcaError> {
        let d = pair.check()?;
        let n_tg = pair.target.nrows();
        let n = n_tg + pair.background.nrows();
        let stacked = DMatrix::from_fn(n, d, |i, j| {
            if i < n_tg {
                pair.target[(i, j)]
            } else {
                pair.background[(i - n_tg, j)]
            }
        });
        Ok(contrast_objective(self.alpha, scatter(&stacked), scatter(pair.background)))
    }

}

/// Inputs of the unified objective. The group statistics are precomputed so
/// repeated fits over the same data only pay for the weighted combination.
#[derive(Debug, Clone, Copy)]
pub struct UlcaProblem<'a> {

    pub stats : &'a GroupStats,

    pub weights : &'a WeightState,

    pub reg : Regularization

}

/// The unified objective on the composite matrices. With alpha None the cost is the
/// ratio tr(M^T C1 M) / tr(M^T C0 M), where the numerator is replaced by 1 when
/// no background weight is set and the denominator by 1 when no target or between
/// weight is set. With a fixed alpha it is the linear trade-off tr(M^T (alpha C1 - C0) M).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UlcaCost {
    pub alpha : Option<f64>
}

impl UlcaCost {

    pub fn objective(&self, comp : Composite) -> Result<Box<dyn Objective>, UlcaError> {
        let d = comp.n_features();
        match self.alpha {
            Some(alpha) => Ok(Box::new(TraceForm::difference(alpha, &comp.c1, &comp.c0))),
            None => {
                comp.check_ratio_defined()?;
                let (w1, w0) = (comp.c1_weight(), comp.c0_weight());
                let num = if w1 == 0.0 { None } else { Some(comp.c1) };
                let den = if w0 == 0.0 { None } else { Some(comp.c0) };
                Ok(Box::new(TraceRatio::new(num, den, d)))
            }
        }
    }

}

impl CostBuilder for UlcaCost {

    type Input<'a> = UlcaProblem<'a>;

    fn build(&self, problem : UlcaProblem<'_>) -> Result<Box<dyn Objective>, UlcaError> {
        let comp = Composite::combine(problem.stats, problem.weights, problem.reg)?;
        self.objective(comp)
    }

}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::fit::manifold::numeric_gradient;
    use approx::assert_relative_eq;

    fn spd() -> (DMatrix<f64>, DMatrix<f64>) {
        let a = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.0, 1.0, 3.0, 0.5, 0.0, 0.5, 2.0]);
        let b = DMatrix::from_row_slice(3, 3, &[1.0, 0.2, 0.1, 0.2, 2.0, 0.0, 0.1, 0.0, 1.5]);
        (a, b)
    }

    fn point() -> DMatrix<f64> {
        DMatrix::from_row_slice(3, 2, &[0.6, 0.0, 0.8, 0.0, 0.0, 1.0])
    }

    #[test]
    fn analytic_gradients_match_finite_differences() {
        let (a, b) = spd();
        let m = point();
        let objectives : Vec<Box<dyn Objective>> = vec![
            Box::new(TraceRatio::new(Some(a.clone()), Some(b.clone()), 3)),
            Box::new(TraceRatio::new(None, Some(b.clone()), 3)),
            Box::new(TraceRatio::new(Some(a.clone()), None, 3)),
            Box::new(TraceForm::difference(0.7, &b, &a))
        ];
        for obj in objectives.iter() {
            let fd = numeric_gradient(|x| obj.cost(x), &m);
            assert_relative_eq!(obj.gradient(&m), fd, epsilon = 1e-5);
        }
    }

    #[test]
    fn reconstruction_error_matches_residual() {
        let x = DMatrix::from_row_slice(4, 3, &[
            1.0, 2.0, 0.0,
            -1.0, 0.5, 1.0,
            0.0, -1.5, 2.0,
            0.0, -1.0, -3.0
        ]);
        let m = point();
        let obj = ReconstructionError::new(x.transpose() * &x);
        let residual = &x - &x * &m * m.transpose();
        assert_relative_eq!(obj.cost(&m), residual.norm_squared(), epsilon = 1e-10);
    }

    #[test]
    fn zero_weights_give_unit_cost() {
        let x = DMatrix::from_row_slice(4, 2, &[0.0, 1.0, 1.0, 0.0, 3.0, 3.0, 4.0, 2.0]);
        let data = Dataset::new(x, vec![0, 0, 1, 1]).unwrap();
        let stats = GroupStats::compute(&data);
        let weights = WeightState::uniform(data.labels(), 0.0, 0.0, 0.0);
        let problem = UlcaProblem { stats : &stats, weights : &weights, reg : Regularization::default() };
        let obj = UlcaCost::default().build(problem).unwrap();
        assert_relative_eq!(obj.cost(&DMatrix::identity(2, 1)), 1.0);
        let zeroed = UlcaProblem { reg : Regularization::new(Some(0.0), Some(0.0)), ..problem };
        assert!(matches!(UlcaCost::default().build(zeroed), Err(UlcaError::NumericalDegeneracy(_))));
    }

    #[test]
    fn contrast_inputs_must_share_features() {
        let tg = DMatrix::zeros(3, 2);
        let bg = DMatrix::zeros(3, 3);
        let pair = ContrastPair { target : &tg, background : &bg };
        assert!(CpcaCost::default().build(pair).is_err());
        assert!(CcpcaCost { alpha : Some(1.0) }.build(pair).is_err());
    }

    #[test]
    fn contrast_costs_use_unnormalized_scatter() {
        // Target scatter diag(2, 0), background scatter diag(0, 8).
        let tg = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, -1.0, 0.0]);
        let bg = DMatrix::from_fn(8, 2, |i, j| if j == 1 { if i % 2 == 0 { 1.0 } else { -1.0 } } else { 0.0 } );
        let pair = ContrastPair { target : &tg, background : &bg };
        let obj = CpcaCost { alpha : Some(1.0) }.build(pair).unwrap();
        assert_relative_eq!(obj.cost(&DMatrix::identity(2, 2)), 6.0, epsilon = 1e-12);
        assert_relative_eq!(obj.cost(&DMatrix::from_column_slice(2, 1, &[1.0, 0.0])), -2.0, epsilon = 1e-12);
        assert_relative_eq!(obj.cost(&DMatrix::from_column_slice(2, 1, &[0.0, 1.0])), 8.0, epsilon = 1e-12);
        let ratio = CpcaCost::default().build(pair).unwrap();
        assert_relative_eq!(ratio.cost(&DMatrix::identity(2, 2)), 4.0, epsilon = 1e-12);

        // Stacked target scatter is diag(2, 8), background diag(0, 8).
        let stacked = CcpcaCost { alpha : Some(1.0) }.build(pair).unwrap();
        assert_relative_eq!(stacked.cost(&DMatrix::identity(2, 2)), -2.0, epsilon = 1e-12);
    }

    #[test]
    fn ratio_cost_builds_from_partially_zero_weights() {
        let x = DMatrix::from_row_slice(4, 2, &[0.0, 1.0, 1.0, 0.0, 3.0, 3.0, 4.0, 2.0]);
        let data = Dataset::new(x, vec![0, 0, 1, 1]).unwrap();
        let stats = GroupStats::compute(&data);
        let weights = WeightState::uniform(data.labels(), 0.0, 1.0, 0.0);
        let problem = UlcaProblem { stats : &stats, weights : &weights, reg : Regularization::default() };
        let comp = Composite::combine(&stats, &weights, Regularization::default()).unwrap();
        let m = DMatrix::from_column_slice(2, 1, &[0.6, 0.8]);
        let obj = UlcaCost::default().build(problem).unwrap();
        assert_relative_eq!(obj.cost(&m), trace_form(&comp.c1, &m), epsilon = 1e-12);
    }

}
