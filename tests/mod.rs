use nalgebra::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Normal, Distribution};
use ulca::data::{Dataset, read_labeled_csv};
use ulca::cov::{GroupStats, Regularization, Composite, trace_form};
use ulca::weights::WeightState;
use ulca::fit::*;
use ulca::optim::*;
use ulca::session::*;
use ulca::UlcaError;

const EPS : f64 = 1E-4;

// Three groups over 13 features, only some of which separate the groups,
// standardized as the interactive front end does.
fn wine_like() -> Dataset {
    let mut rng = StdRng::seed_from_u64(178);
    let noise = Normal::new(0.0, 1.0).unwrap();
    let n_per = 30;
    let mut x = DMatrix::zeros(3 * n_per, 13);
    let mut y = Vec::new();
    for g in 0..3 {
        for i in 0..n_per {
            let r = g * n_per + i;
            for j in 0..13 {
                let shift = match (g, j % 4) {
                    (1, 0) => 3.0,
                    (2, 1) => 2.5,
                    (2, 2) => -1.5,
                    _ => 0.0
                };
                x[(r, j)] = shift + (1.0 + 0.1 * j as f64) * noise.sample(&mut rng);
            }
            y.push(g);
        }
    }
    Dataset::new(x, y).unwrap().standardized()
}

fn projector(m : &DMatrix<f64>) -> DMatrix<f64> {
    let q = m.clone().qr().q();
    &q * q.transpose()
}

fn tight() -> ManifoldSettings {
    ManifoldSettings { min_grad_norm : 1e-6, max_iter : 500, apply_varimax : false, ..Default::default() }
}

#[test]
fn lda_weights_reproduce_lda() {
    let data = wine_like();
    let stats = GroupStats::compute(&data);
    let weights = WeightState::interactive_default(data.labels());

    let mut evd = EvdUlca::new(EvdSettings { apply_consist_axes : false, ..Default::default() });
    evd.fit_ulca(&stats, &weights, Regularization::default(), None).unwrap();
    assert!(evd.converged());
    let cost = evd.final_cost().unwrap();
    assert!(cost.is_finite() && cost > 0.0);

    let mut lda = ManifoldDr::new(LdaCost, tight());
    lda.fit(&data).unwrap();
    let lda_cost = lda.achieved_cost().unwrap();
    assert!(((lda_cost - cost) / cost).abs() < EPS, "lda = {}, evd = {}", lda_cost, cost);

    let p_evd = projector(evd.projection().unwrap());
    let p_lda = projector(lda.projection().unwrap());
    assert!((p_evd - p_lda).norm() < 1e-2);
}

#[test]
fn auto_alpha_is_a_fixed_point() {
    let data = wine_like();
    let stats = GroupStats::compute(&data);
    let weights = WeightState::uniform(data.labels(), 0.5, 1.0, 1.0);
    let reg = Regularization::default();
    let mut evd = EvdUlca::default();
    evd.fit_ulca(&stats, &weights, reg, None).unwrap();
    let alpha = UlcaSolver::alpha(&evd).unwrap();

    let comp = Composite::combine(&stats, &weights, reg).unwrap();
    let m = evd.projection().unwrap();
    let ratio = trace_form(&comp.c0, m) / trace_form(&comp.c1, m);
    assert!(((ratio - alpha) / alpha).abs() < 1e-5);
    assert!((evd.final_cost().unwrap() * alpha - 1.0).abs() < 1e-12);
}

#[test]
fn solvers_agree_at_fixed_alpha() {
    let data = wine_like();
    let stats = GroupStats::compute(&data);
    let weights = WeightState::uniform(data.labels(), 0.2, 1.0, 0.8);
    let reg = Regularization::default();

    let mut evd = EvdUlca::default();
    evd.fit_ulca(&stats, &weights, reg, Some(2.0)).unwrap();
    let mut manifold = ManifoldDr::ulca(tight());
    manifold.fit_ulca(&stats, &weights, reg, Some(2.0)).unwrap();

    assert_eq!(evd.final_cost(), manifold.final_cost());
    let p_evd = projector(evd.projection().unwrap());
    let p_man = projector(manifold.projection().unwrap());
    assert!((p_evd - p_man).norm() < 1e-3);
}

#[test]
fn zero_weights_fall_back_to_identity() {
    let data = wine_like();
    let stats = GroupStats::compute(&data);
    let weights = WeightState::uniform(data.labels(), 0.0, 0.0, 0.0);
    let mut evd = EvdUlca::default();
    evd.fit_ulca(&stats, &weights, Regularization::default(), None).unwrap();
    assert!((evd.final_cost().unwrap() - 1.0).abs() < 1e-12);

    let mut manifold = ManifoldDr::ulca(tight());
    manifold.fit_ulca(&stats, &weights, Regularization::default(), None).unwrap();
    assert!((manifold.final_cost().unwrap() - 1.0).abs() < 1e-9);
}

#[test]
fn missing_label_is_reported() {
    let data = wine_like();
    let stats = GroupStats::compute(&data);
    let mut weights = WeightState::interactive_default(data.labels());
    weights.bg.remove(&2);
    let res = EvdUlca::default().fit_ulca(&stats, &weights, Regularization::default(), None);
    match res {
        Err(UlcaError::MissingLabel { label, .. }) => assert_eq!(label, 2),
        other => panic!("Unexpected result: {:?}", other)
    }
}

#[test]
fn current_layout_needs_no_search() {
    let data = wine_like();
    let stats = GroupStats::compute(&data);
    let reg = Regularization::default();
    let weights = WeightState::interactive_default(data.labels());
    let mut evd = EvdUlca::default();
    let z = evd.fit_transform(&data, &weights, reg, Some(1.5)).unwrap();
    let layout = Layout::from_embedding(&z, data.y()).unwrap();
    let target = LayoutTarget::from_edit(&layout, 0, Edit::Move { cx : layout.centers()[(0, 0)], cy : layout.centers()[(0, 1)] }).unwrap();
    assert_eq!(target.cost(&layout, &WeightOptSettings::default()).unwrap(), 0.0);

    let optimizer = WeightOptimizer::new(WeightOptSettings { max_iter : 5, ..Default::default() });
    let inputs = FitInputs { data : &data, stats : &stats, reg };
    let res = optimizer.optimize(&evd, inputs, &weights, 1.5, &target, Some(&z)).unwrap();
    assert!(res.cost < 1e-8);
    assert!(res.evaluations > 0);
}

#[test]
fn interactive_round_trip() {
    let csv = "a,b,c,label\n\
        0.0,0.1,1.0,x\n0.5,-0.2,0.8,x\n-0.3,0.4,1.2,x\n\
        4.0,1.0,0.1,y\n4.5,1.4,-0.3,y\n3.8,0.6,0.2,y\n\
        1.0,5.0,-1.0,z\n1.4,4.6,-0.5,z\n0.7,5.3,-1.2,z\n";
    let table = read_labeled_csv(csv.as_bytes(), "label").unwrap();
    assert_eq!(table.feature_names, vec!["a", "b", "c"]);
    let session = Session::start(
        ManifoldDr::ulca(ManifoldSettings::default()),
        table.data,
        &SessionSettings::default(),
        WeightOptSettings { max_iter : 10, ..Default::default() }
    ).unwrap()
        .with_feature_names(table.feature_names).unwrap()
        .with_label_names(table.label_names);
    let mut registry = SessionRegistry::with_initial(&session);

    let mut edited = registry.load(INITIAL_SNAPSHOT).unwrap();
    let outcome = edited.edit_layout(1, Edit::Scale(2.0)).unwrap();
    match outcome {
        OptimizeOutcome::Accepted { original, result } => assert!(result.cost < original),
        OptimizeOutcome::Rejected { original, achieved } => assert!(achieved >= original),
        OptimizeOutcome::Unchanged => panic!("Scaled layout cannot match the current one")
    }
    assert_eq!(registry.save("scaled", &edited), vec![String::from("-"), String::from("scaled")]);

    let view = registry.load(INITIAL_SNAPSHOT).unwrap().view().unwrap();
    assert_eq!(view.label_to_name["1"], "y");
    assert_eq!(view.components.feat_names, vec!["a", "b", "c"]);
    assert_eq!(view.emb.len(), 9);
    assert!(view.bounds[0].val > 0.0);
}
