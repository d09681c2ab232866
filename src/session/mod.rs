use nalgebra::*;
use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;
use tracing::{info, warn};
use crate::data::Dataset;
use crate::cov::{GroupStats, Regularization};
use crate::weights::WeightState;
use crate::fit::UlcaSolver;
use crate::align::align;
use crate::optim::*;
use crate::error::UlcaError;

/// Serializable snapshot of the session state sent to the visualization layer.
pub mod view;

pub use view::*;

/// Name under which the starting state of a session is registered.
pub const INITIAL_SNAPSHOT : &str = "-";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {

    /// Starting trade-off. When absent it is solved for at start and
    /// 1 / final_cost is used from then on.
    pub alpha : Option<f64>,

    /// Upper bound of the trade-off slider.
    pub max_alpha : f64,

    pub gamma0 : Option<f64>,

    pub gamma1 : Option<f64>

}

impl Default for SessionSettings {

    fn default() -> Self {
        Self { alpha : None, max_alpha : 10.0, gamma0 : None, gamma1 : None }
    }

}

/// Result of a layout-driven weight optimization.
#[derive(Debug, Clone)]
pub enum OptimizeOutcome {

    /// The current layout already matches the target.
    Unchanged,

    /// The search did not improve on the current layout, which is kept.
    Rejected { original : f64, achieved : f64 },

    Accepted { original : f64, result : WeightOptResult }

}

/// State of one interactive analysis: the data with its cached group statistics,
/// the weights and trade-off last applied, the fitted solver and the embedding it
/// produced. Every operation is synchronous; callers serialize concurrent requests.
#[derive(Debug, Clone)]
pub struct Session<S> {

    data : Dataset,

    stats : GroupStats,

    reg : Regularization,

    weights : WeightState,

    alpha : f64,

    max_alpha : f64,

    solver : S,

    embedding : DMatrix<f64>,

    feature_names : Vec<String>,

    label_names : BTreeMap<usize, String>,

    optimizer : WeightOptimizer,

    // Loadings registered by the front end under a user-chosen key.
    custom_components : BTreeMap<String, Vec<f64>>

}

impl<S> Session<S>
where
    S : UlcaSolver
{

    /// Fits the starting projection with the interactive default weights.
    pub fn start(
        solver : S,
        data : Dataset,
        settings : &SessionSettings,
        weight_opt : WeightOptSettings
    ) -> Result<Self, UlcaError> {
        let weights = WeightState::interactive_default(data.labels());
        Self::start_with(solver, data, weights, settings, weight_opt)
    }

    pub fn start_with(
        mut solver : S,
        data : Dataset,
        weights : WeightState,
        settings : &SessionSettings,
        weight_opt : WeightOptSettings
    ) -> Result<Self, UlcaError> {
        let stats = GroupStats::compute(&data);
        let reg = Regularization::new(settings.gamma0, settings.gamma1);
        solver.fit_ulca(&stats, &weights, reg, settings.alpha)?;
        let alpha = match settings.alpha {
            Some(alpha) => alpha,
            None => match solver.final_cost() {
                Some(c) if c != 0.0 => 1. / c,
                _ => return Err(UlcaError::NumericalDegeneracy(
                    String::from("Starting fit has zero cost, cannot derive a trade-off")
                ))
            }
        };
        let embedding = solver.transform(&data)?;
        let feature_names = (0..data.n_features()).map(|j| j.to_string() ).collect();
        let label_names = data.labels().iter().map(|l| (*l, format!("Label {}", l)) ).collect();
        info!("Session started: {} instances, {} features, {} groups, alpha = {}",
            data.n_instances(), data.n_features(), data.labels().len(), alpha);
        Ok(Self {
            data,
            stats,
            reg,
            weights,
            alpha,
            max_alpha : settings.max_alpha,
            solver,
            embedding,
            feature_names,
            label_names,
            optimizer : WeightOptimizer::new(weight_opt),
            custom_components : BTreeMap::new()
        })
    }

    pub fn with_feature_names(mut self, names : Vec<String>) -> Result<Self, UlcaError> {
        if names.len() != self.data.n_features() {
            return Err(UlcaError::ShapeMismatch(format!(
                "{} feature names for {} features",
                names.len(),
                self.data.n_features()
            )));
        }
        self.feature_names = names;
        Ok(self)
    }

    /// Replaces the display names of the informed labels.
    pub fn with_label_names(mut self, names : BTreeMap<usize, String>) -> Self {
        self.label_names.extend(names);
        self
    }

    pub fn data(&self) -> &Dataset {
        &self.data
    }

    pub fn stats(&self) -> &GroupStats {
        &self.stats
    }

    pub fn weights(&self) -> &WeightState {
        &self.weights
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn max_alpha(&self) -> f64 {
        self.max_alpha
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn embedding(&self) -> &DMatrix<f64> {
        &self.embedding
    }

    pub fn layout(&self) -> Result<Layout, UlcaError> {
        Layout::from_embedding(&self.embedding, self.data.y())
    }

    fn inputs(&self) -> FitInputs<'_> {
        FitInputs { data : &self.data, stats : &self.stats, reg : self.reg }
    }

    /// Refits with new weights and a fixed trade-off. When a previous embedding
    /// with at least one row is informed, the new projection is rotated onto it
    /// and the rotated projection is kept.
    pub fn update_embedding(
        &mut self,
        weights : WeightState,
        alpha : f64,
        previous : Option<&DMatrix<f64>>
    ) -> Result<&DMatrix<f64>, UlcaError> {
        self.solver.fit_ulca(&self.stats, &weights, self.reg, Some(alpha))?;
        let mut z = self.solver.transform(&self.data)?;
        if let Some(prev) = previous {
            if let Some(r) = align(prev, &z)? {
                let m = self.solver.projection().ok_or(UlcaError::NotFitted)? * &r;
                self.solver.set_projection(m);
                z = self.solver.transform(&self.data)?;
            }
        }
        self.weights = weights;
        self.alpha = alpha;
        self.embedding = z;
        Ok(&self.embedding)
    }

    /// Applies weight and trade-off edits coming from the front end. Weights not
    /// listed keep their current value, and the alpha bound replaces the trade-off
    /// when present. The refit is aligned to the displayed embedding.
    pub fn update_from_view(&mut self, weights : &ViewWeights, bounds : &[Bound]) -> Result<&DMatrix<f64>, UlcaError> {
        let merged = weights.apply_to(&self.weights);
        let alpha = bounds.iter()
            .find(|b| b.label == "alpha" )
            .map(|b| b.val )
            .unwrap_or(self.alpha);
        if alpha < 0.0 {
            return Err(UlcaError::InvalidSetting(format!("Negative trade-off {}", alpha)));
        }
        let previous = self.embedding.clone();
        self.update_embedding(merged, alpha, Some(&previous))
    }

    /// Runs the backward weight search towards the informed layout. The search is
    /// skipped when the displayed layout already matches, and its result is discarded
    /// unless strictly better than the displayed layout. Accepted weights are applied
    /// and the new embedding aligned to the current one.
    pub fn optimize_weights(&mut self, target : &LayoutTarget) -> Result<OptimizeOutcome, UlcaError> {
        let previous = self.embedding.clone();
        let original = target.cost(&self.layout()?, self.optimizer.settings())?;
        if original <= 0.0 {
            info!("Layout already matches the target, nothing to optimize");
            return Ok(OptimizeOutcome::Unchanged);
        }
        let result = self.optimizer.optimize(
            &self.solver,
            self.inputs(),
            &self.weights,
            self.alpha,
            target,
            Some(&previous)
        )?;
        if result.cost >= original {
            warn!("Weight search did not improve the layout (original = {}, achieved = {}), keeping current weights",
                original, result.cost);
            return Ok(OptimizeOutcome::Rejected { original, achieved : result.cost });
        }
        self.update_embedding(result.weights.clone(), result.alpha, Some(&previous))?;
        info!("Weight search accepted: cost {} -> {} in {} evaluations", original, result.cost, result.evaluations);
        Ok(OptimizeOutcome::Accepted { original, result })
    }

    /// Optimizes the weights towards the current layout with one group edited.
    pub fn edit_layout(&mut self, label : usize, edit : Edit) -> Result<OptimizeOutcome, UlcaError> {
        let target = LayoutTarget::from_edit(&self.layout()?, label, edit)?;
        self.optimize_weights(&target)
    }

    /// Optimizes the weights towards the ellipses drawn by the front end.
    pub fn edit_ellipses(
        &mut self,
        ellipses : &[Ellipse],
        label : usize,
        interaction : Interaction
    ) -> Result<OptimizeOutcome, UlcaError> {
        let target = LayoutTarget::from_ellipses(ellipses, label, interaction)?;
        self.optimize_weights(&target)
    }

    pub fn add_component(&mut self, key : &str, loadings : Vec<f64>) -> Result<(), UlcaError> {
        if loadings.len() != self.data.n_features() {
            return Err(UlcaError::ShapeMismatch(format!(
                "Component has {} loadings for {} features",
                loadings.len(),
                self.data.n_features()
            )));
        }
        self.custom_components.insert(key.to_string(), loadings);
        Ok(())
    }

    pub fn component(&self, key : &str) -> Option<&[f64]> {
        self.custom_components.get(key).map(|c| &c[..] )
    }

    pub fn view(&self) -> Result<SessionView, UlcaError> {
        let m = self.solver.projection().ok_or(UlcaError::NotFitted)?;
        let z = &self.embedding;
        let second = |mat : &DMatrix<f64>, i : usize| if mat.ncols() >= 2 { mat[(i, 1)] } else { 0.0 };
        let emb = (0..z.nrows()).map(|i| EmbeddedPoint {
            x : z[(i, 0)],
            y : second(z, i),
            label : self.data.y()[i],
            feat_vals : self.data.x().row(i).iter().cloned().collect()
        }).collect();
        let components = Components {
            x : m.column(0).iter().cloned().collect(),
            y : (0..m.nrows()).map(|i| second(m, i) ).collect(),
            feat_names : self.feature_names.clone()
        };
        let mut label_to_name = BTreeMap::new();
        label_to_name.insert(String::from("alpha"), String::from("Trade-off"));
        for (label, name) in self.label_names.iter() {
            label_to_name.insert(label.to_string(), name.clone());
        }
        Ok(SessionView {
            weights : ViewWeights::from(&self.weights),
            bounds : vec![Bound { label : String::from("alpha"), val : self.alpha }],
            max_upper_bound : self.max_alpha,
            emb,
            components,
            label_to_name
        })
    }

}

/// Named deep copies of sessions, kept in memory for later recall.
#[derive(Debug, Clone)]
pub struct SessionRegistry<S> {
    saved : BTreeMap<String, Session<S>>
}

impl<S> Default for SessionRegistry<S> {

    fn default() -> Self {
        Self { saved : BTreeMap::new() }
    }

}

impl<S> SessionRegistry<S>
where
    S : UlcaSolver
{

    /// Registry holding the starting state of a session.
    pub fn with_initial(session : &Session<S>) -> Self {
        let mut reg = Self::default();
        reg.save(INITIAL_SNAPSHOT, session);
        reg
    }

    /// Stores a copy of the session, replacing any snapshot with the same name,
    /// and returns the known names.
    pub fn save(&mut self, name : &str, session : &Session<S>) -> Vec<String> {
        self.saved.insert(name.to_string(), session.clone());
        info!("Saved session snapshot '{}'", name);
        self.names()
    }

    pub fn load(&self, name : &str) -> Result<Session<S>, UlcaError> {
        let session = self.saved.get(name).cloned().ok_or_else(|| UlcaError::UnknownSnapshot(name.to_string()) )?;
        info!("Loaded session snapshot '{}'", name);
        Ok(session)
    }

    pub fn names(&self) -> Vec<String> {
        self.saved.keys().cloned().collect()
    }

}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::fit::EvdUlca;

    fn data() -> Dataset {
        let x = DMatrix::from_row_slice(9, 3, &[
            0.0, 0.1, 1.0,
            0.5, -0.2, 0.8,
            -0.3, 0.4, 1.2,
            4.0, 1.0, 0.1,
            4.5, 1.4, -0.3,
            3.8, 0.6, 0.2,
            1.0, 5.0, -1.0,
            1.4, 4.6, -0.5,
            0.7, 5.3, -1.2
        ]);
        Dataset::new(x, vec![0, 0, 0, 1, 1, 1, 2, 2, 2]).unwrap()
    }

    fn session() -> Session<EvdUlca> {
        Session::start(EvdUlca::default(), data(), &SessionSettings::default(), WeightOptSettings::default()).unwrap()
    }

    #[test]
    fn start_derives_alpha_from_cost() {
        let s = session();
        let cost = s.solver().final_cost().unwrap();
        assert!((s.alpha() - 1. / cost).abs() < 1e-12);
        assert_eq!(s.embedding().shape(), (9, 2));
    }

    #[test]
    fn view_has_front_end_shape() {
        let s = session().with_feature_names(vec!["a".into(), "b".into(), "c".into()]).unwrap();
        let view = s.view().unwrap();
        assert_eq!(view.weights.bg.len(), 3);
        assert_eq!(view.bounds[0].label, "alpha");
        assert_eq!(view.emb.len(), 9);
        assert_eq!(view.emb[3].feat_vals, vec![4.0, 1.0, 0.1]);
        assert_eq!(view.components.x.len(), 3);
        assert_eq!(view.label_to_name["alpha"], "Trade-off");
        assert_eq!(view.label_to_name["2"], "Label 2");
        let json = serde_json::to_value(&view).unwrap();
        assert!(json["emb"][0]["x"].is_number());
        assert!(json["weights"]["tg"][0]["val"].is_number());
    }

    #[test]
    fn update_is_aligned_to_previous() {
        let mut s = session();
        let previous = s.embedding().clone();
        let weights = s.weights().clone();
        let alpha = s.alpha();
        let z = s.update_embedding(weights, alpha, Some(&previous)).unwrap().clone();
        assert!((&z - &previous).norm() < 1e-8);
        let m = s.solver().projection().unwrap().clone();
        assert!((s.data().transform(&m).unwrap() - z).norm() < 1e-10);
    }

    #[test]
    fn snapshots_are_independent_copies() {
        let mut s = session();
        let mut registry = SessionRegistry::with_initial(&s);
        let mut w = s.weights().clone();
        w.tg.insert(1, 0.7);
        let alpha = s.alpha();
        s.update_embedding(w, alpha, None).unwrap();
        assert_eq!(registry.save("edited", &s), vec![String::from("-"), String::from("edited")]);
        let initial = registry.load(INITIAL_SNAPSHOT).unwrap();
        assert_eq!(initial.weights().tg[&1], 0.0);
        assert_eq!(registry.load("edited").unwrap().weights().tg[&1], 0.7);
        assert!(matches!(registry.load("missing"), Err(UlcaError::UnknownSnapshot(_))));
    }

    #[test]
    fn unchanged_layout_skips_search() {
        let mut s = session();
        let before = s.weights().clone();
        match s.edit_layout(0, Edit::Scale(1.0)).unwrap() {
            OptimizeOutcome::Unchanged => { },
            other => panic!("Unexpected outcome: {:?}", other)
        }
        assert_eq!(s.weights(), &before);
    }

    #[test]
    fn view_edits_merge_into_weights() {
        let mut s = session();
        let edits = ViewWeights {
            tg : vec![WeightEntry { label : 2, val : 0.4 }],
            bg : Vec::new(),
            bw : vec![WeightEntry { label : 0, val : 0.1 }]
        };
        let bounds = vec![Bound { label : String::from("alpha"), val : 2.5 }];
        let previous = s.embedding().clone();
        let z = s.update_from_view(&edits, &bounds).unwrap().clone();
        assert_eq!(s.alpha(), 2.5);
        assert_eq!(s.weights().tg[&2], 0.4);
        assert_eq!(s.weights().tg[&1], 0.0);
        assert_eq!(s.weights().bw[&0], 0.1);
        assert_eq!(s.weights().bg[&1], 1.0);
        assert_eq!(z.shape(), previous.shape());

        let alpha = s.alpha();
        let unchanged = ViewWeights::from(s.weights());
        s.update_from_view(&unchanged, &[]).unwrap();
        assert_eq!(s.alpha(), alpha);
        let negative = vec![Bound { label : String::from("alpha"), val : -1.0 }];
        assert!(matches!(s.update_from_view(&edits, &negative), Err(UlcaError::InvalidSetting(_))));
    }

    #[test]
    fn custom_components_are_checked_and_kept() {
        let mut s = session();
        assert!(matches!(s.add_component("short", vec![1.0, 0.0]), Err(UlcaError::ShapeMismatch(_))));
        assert!(s.component("short").is_none());
        s.add_component("first", vec![1.0, 0.0, -0.5]).unwrap();
        assert_eq!(s.component("first"), Some(&[1.0, 0.0, -0.5][..]));
        let mut registry = SessionRegistry::with_initial(&s);
        s.add_component("first", vec![0.0, 1.0, 0.0]).unwrap();
        assert_eq!(s.component("first"), Some(&[0.0, 1.0, 0.0][..]));
        registry.save("changed", &s);
        assert_eq!(registry.load(INITIAL_SNAPSHOT).unwrap().component("first"), Some(&[1.0, 0.0, -0.5][..]));
    }

    fn ellipses_of(layout : &Layout) -> Vec<Ellipse> {
        layout.labels().iter().enumerate().map(|(i, label)| Ellipse {
            label : *label,
            cx : layout.centers()[(i, 0)],
            cy : layout.centers()[(i, 1)],
            rx : layout.areas()[i],
            ry : 1.0
        }).collect()
    }

    #[test]
    fn ellipse_edits_follow_the_guard() {
        let mut s = session();
        let layout = s.layout().unwrap();
        let before = s.weights().clone();
        match s.edit_ellipses(&ellipses_of(&layout), 0, Interaction::Scale).unwrap() {
            OptimizeOutcome::Unchanged => { },
            other => panic!("Unexpected outcome: {:?}", other)
        }
        assert_eq!(s.weights(), &before);

        let mut ellipses = ellipses_of(&layout);
        ellipses[0].rx *= 3.0;
        let embedding = s.embedding().clone();
        match s.edit_ellipses(&ellipses, 0, Interaction::Scale).unwrap() {
            OptimizeOutcome::Accepted { original, result } => {
                assert!(result.cost < original);
                assert_eq!(s.weights(), &result.weights);
            },
            OptimizeOutcome::Rejected { original, achieved } => {
                assert!(achieved >= original);
                assert_eq!(s.weights(), &before);
                assert_eq!(s.embedding(), &embedding);
            },
            OptimizeOutcome::Unchanged => panic!("Scaled ellipse cannot match the current layout")
        }
    }

    #[test]
    fn optimization_never_regresses() {
        let mut s = session();
        let layout = s.layout().unwrap();
        let target = LayoutTarget::from_edit(&layout, 1, Edit::Scale(0.5)).unwrap();
        let before = target.cost(&layout, s.optimizer.settings()).unwrap();
        match s.optimize_weights(&target).unwrap() {
            OptimizeOutcome::Accepted { original, result } => {
                assert!(result.cost < original);
                assert_eq!(original, before);
                let after = target.cost(&s.layout().unwrap(), s.optimizer.settings()).unwrap();
                assert!((after - result.cost).abs() < 1e-9);
            },
            OptimizeOutcome::Rejected { original, achieved } => assert!(achieved >= original),
            OptimizeOutcome::Unchanged => panic!("Edited layout cannot match the current one")
        }
    }

}
