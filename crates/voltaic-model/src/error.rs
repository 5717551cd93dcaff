//! Error types for voltaic-model.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("circuit error: {0}")]
    Circuit(#[from] voltaic_core::Error),

    #[error("invalid sample period {0}")]
    InvalidSamplePeriod(f64),

    #[error("inconsistent nonlinear dimensions: {found} free directions for {expected} unknowns")]
    InconsistentNonlinearity { found: usize, expected: usize },

    #[error("nonlinear coupling is rank deficient in subproblem {0}")]
    RankDeficientCoupling(usize),

    #[error("failed to find an initial solution for subproblem {0}")]
    InitialSolution(usize),

    #[error("invalid dimensions for {what}: expected {expected}, got {actual}")]
    Dimension {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("non-finite solver result in subproblem {subproblem} at sample {sample}")]
    NonFinite { subproblem: usize, sample: usize },

    #[error("steady-state system is singular")]
    SingularSteadyState,

    #[error("steady-state solver failed to converge")]
    SteadyStateDiverged,
}

pub type Result<T> = std::result::Result<T, Error>;
