use structopt::StructOpt;
use anyhow::{anyhow, Context};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use std::fs::File;
use std::io::Write;
use ulca::data::{load_labeled_csv, LabeledTable};
use ulca::fit::{EvdUlca, ManifoldDr, UlcaSolver};
use ulca::session::Session;
use ulca::eval::run_backward_eval;
use ulca::config::Config;

/// Unified linear comparative analysis of labeled data from the command line
#[derive(StructOpt, Debug)]
pub enum Ulca {

    /// Fits the starting projection of an interactive session and prints its
    /// state (weights, trade-off, embedding and loadings) as JSON.
    Fit {
        data : String,

        /// Name of the column holding the group labels
        #[structopt(short, long, default_value = "label")]
        label : String,

        #[structopt(short, long)]
        config : Option<String>,

        /// Solver: evd (closed form) or manifold
        #[structopt(short, long, default_value = "evd")]
        method : String,

        /// Scale features to zero mean and unit variance before fitting
        #[structopt(short, long)]
        standardize : bool,

        #[structopt(short, long)]
        output : Option<String>
    },

    /// Measures how close short weight searches get to long ones, over random
    /// single-group edits of the embedding.
    Eval {
        data : String,

        #[structopt(short, long, default_value = "label")]
        label : String,

        #[structopt(short, long)]
        config : Option<String>,

        #[structopt(short, long, default_value = "evd")]
        method : String,

        /// Relabel the data with k-means using this many clusters
        #[structopt(short = "k", long)]
        clusters : Option<usize>,

        #[structopt(short, long)]
        runs : Option<usize>,

        #[structopt(short, long)]
        output : Option<String>
    }

}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info") );
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}

fn load_config(path : &Option<String>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load_from_path(path).with_context(|| format!("Error reading config {}", path) ),
        None => Ok(Config::default())
    }
}

fn print_or_save(content : &str, opt_path : &Option<String>) -> anyhow::Result<()> {
    match opt_path {
        Some(path) => {
            let mut f = File::create(path).with_context(|| format!("Error creating {}", path) )?;
            f.write_all(content.as_bytes())?;
            Ok(())
        },
        None => { println!("{}", content); Ok(()) }
    }
}

fn fit_session<S>(solver : S, table : LabeledTable, config : &Config) -> anyhow::Result<String>
where
    S : UlcaSolver
{
    let session = Session::start(solver, table.data, &config.session, config.weight_opt.clone())?
        .with_feature_names(table.feature_names)?
        .with_label_names(table.label_names);
    Ok(serde_json::to_string_pretty(&session.view()?)?)
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    match Ulca::from_args() {
        Ulca::Fit { data, label, config, method, standardize, output } => {
            let config = load_config(&config)?;
            let mut table = load_labeled_csv(&data, &label).with_context(|| format!("Error opening table {}", data) )?;
            if standardize {
                table.data = table.data.standardized();
            }
            let json = match &method[..] {
                "evd" => fit_session(EvdUlca::new(config.evd.clone()), table, &config)?,
                "manifold" => fit_session(ManifoldDr::ulca(config.manifold.clone()), table, &config)?,
                m => return Err(anyhow!("Unknown method: {}", m))
            };
            print_or_save(&json, &output)
        },
        Ulca::Eval { data, label, config, method, clusters, runs, output } => {
            let config = load_config(&config)?;
            let table = load_labeled_csv(&data, &label).with_context(|| format!("Error opening table {}", data) )?;
            let data = table.data.standardized();
            let mut settings = config.eval.clone();
            if clusters.is_some() {
                settings.n_clusters = clusters;
            }
            if let Some(runs) = runs {
                settings.n_runs = runs;
            }
            let pb = ProgressBar::new(settings.n_runs as u64);
            pb.set_style(ProgressStyle::default_bar().template("{bar:40} {pos}/{len} runs ({elapsed})"));
            let on_run = |r : usize| pb.set_position(r as u64);
            let report = match &method[..] {
                "evd" => run_backward_eval(&EvdUlca::new(config.evd.clone()), &data, &settings, &config.weight_opt, on_run)?,
                "manifold" => run_backward_eval(&ManifoldDr::ulca(config.manifold.clone()), &data, &settings, &config.weight_opt, on_run)?,
                m => return Err(anyhow!("Unknown method: {}", m))
            };
            pb.finish_with_message("done");
            print_or_save(&serde_json::to_string_pretty(&report)?, &output)
        }
    }
}
