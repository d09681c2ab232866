/// Feature matrices paired with group labels, and loading them from delimited files.
pub mod data;

/// Per-group target, background and between weights.
pub mod weights;

/// Within/between group scatter and their weighted combination into the two
/// composite matrices of the unified objective.
pub mod cov;

/// Solvers for the unified objective: the closed-form eigen-decomposition solver and
/// the generic manifold-optimization engine (also instantiating PCA, LDA and
/// contrastive PCA).
pub mod fit;

/// Post-processing of projection matrices (varimax, sign and order canonicalization).
pub mod axes;

/// Orthogonal Procrustes alignment between successive embeddings.
pub mod align;

/// Backward search of the weights that reproduce a desired layout.
pub mod optim;

/// Interactive session state and the in-memory registry of named snapshots.
pub mod session;

/// Precision study of the backward weight search.
pub mod eval;

/// Settings of every component, loaded from JSON.
pub mod config;

pub mod error;

pub use error::UlcaError;
