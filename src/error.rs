use thiserror::Error;

/// Failures surfaced by the aggregation, fitting, alignment and optimization routines.
/// Non-convergence is never an error: solvers return their last iterate and the
/// caller inspects the achieved cost.
#[derive(Debug, Error)]
pub enum UlcaError {

    /// A label present in the data has no entry in one of the weight mappings.
    #[error("Label {label} missing from the {mapping} weight mapping")]
    MissingLabel { label : usize, mapping : &'static str },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Dataset has no instances or no features")]
    EmptyDataset,

    /// Division by a vanishing trace, when both the weights and the regularization
    /// of a composite matrix were set to zero.
    #[error("Numerical degeneracy: {0}")]
    NumericalDegeneracy(String),

    #[error("Matrix decomposition failed: {0}")]
    Decomposition(String),

    #[error("Projection requested before the solver was fitted")]
    NotFitted,

    #[error("No saved session named '{0}'")]
    UnknownSnapshot(String),

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    #[error("Weight optimization failed: {0}")]
    Optimization(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error)

}
