//! The Voltaic model compiler and runtime.
//!
//! [`compile`] turns a frozen [`Circuit`](voltaic_core::Circuit) and a
//! sample period into a [`DiscreteModel`]: a fixed-step state-space
//! update
//!
//! ```text
//! x[n+1] = a·x[n] + b·u[n] + c·z[n] + x0
//! y[n]   = dy·x[n] + ey·u[n] + fy·z[n] + y0
//! ```
//!
//! where `z[n]` collects the solutions of a short sequence of
//! minimum-dimensional nonlinear sub-problems, each driven by a small
//! parameter assembled from the state, the input, and the solutions of
//! earlier sub-problems. The compile pipeline works in exact rational
//! arithmetic: tableau assembly and generalized solve, nonlinearity
//! decomposition, and parameter-dimension reduction; only the finished
//! matrices are lowered to `f64`.
//!
//! [`ModelRunner`] drives the per-sample loop without allocating, and
//! [`steadystate`] / [`steadystate_install`] solve for the fixed point of
//! the state update.

mod assembly;
mod decompose;
pub mod error;
mod model;
mod reduce;
mod runner;
mod steadystate;
#[cfg(test)]
mod testutil;

pub use error::{Error, Result};
pub use model::{
    compile, default_solver_factory, simple_solver_factory, CompileOptions, DiscreteModel,
    SolverFactory, SubProblem,
};
pub use runner::ModelRunner;
pub use steadystate::{steadystate, steadystate_install};
