//! Error types for voltaic-solver.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("singular matrix")]
    SingularMatrix,

    #[error("invalid dimensions: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
