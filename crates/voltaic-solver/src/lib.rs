//! Numeric kernels for Voltaic.
//!
//! Two families live here:
//!
//! - **Exact kernels** ([`exact`]) over `BigRational`, used by the model
//!   compiler: the generalized solver [`gensolve`](exact::gensolve)
//!   (particular solution plus null-space basis), [`rank_factorize`]
//!   (exact `a = c·f` with full-row-rank `f`), and the full-column-rank
//!   pseudo-inverse.
//! - **Runtime kernels** in `f64`: the cached-LU [`LinearSolver`], the
//!   [`KdTree`] warm-start index, and the nonlinear solver stack
//!   [`SimpleSolver`] / [`CachingSolver`] / [`HomotopySolver`] over the
//!   [`ParametricEq`] residual contract.
//!
//! # Example: solving a parametric residual
//!
//! ```rust
//! use std::sync::Arc;
//! use nalgebra::{dvector, DMatrix, DVector};
//! use voltaic_core::Nonlinearity;
//! use voltaic_solver::{EqMemberSpec, NonlinearSolver, ParametricEq, SimpleSolver};
//!
//! /// res = z³ + p, over q = (p, z).
//! struct Cubic;
//!
//! impl Nonlinearity for Cubic {
//!     fn dims(&self) -> (usize, usize) { (1, 2) }
//!     fn eval(&self, q: &[f64], res: &mut [f64], jq: &mut [f64]) {
//!         res[0] = q[1] * q[1] * q[1] + q[0];
//!         jq[0] = 1.0;
//!         jq[1] = 3.0 * q[1] * q[1];
//!     }
//! }
//!
//! let eq = ParametricEq::new(
//!     DVector::zeros(2),
//!     DMatrix::from_column_slice(2, 1, &[1.0, 0.0]),
//!     DMatrix::from_column_slice(2, 1, &[0.0, 1.0]),
//!     vec![EqMemberSpec { law: Arc::new(Cubic), q_offset: 0, res_offset: 0 }],
//! );
//! let mut solver = SimpleSolver::new(eq, &dvector![-1.0], &dvector![1.0]);
//! let z = solver.solve(&dvector![-8.0]);
//! assert!((z[0] - 2.0).abs() < 1e-9);
//! ```

pub mod error;
pub mod exact;
pub mod kdtree;
pub mod linear;
pub mod nonlinear;

pub use error::{Error, Result};
pub use exact::{
    gensolve, nullspace, pseudo_inverse_full_col, rank, rank_factorize, reye, rmul, rsub_assign,
    rzeros, RationalMatrix,
};
pub use kdtree::KdTree;
pub use linear::LinearSolver;
pub use nonlinear::{
    CachingSolver, EqMemberSpec, HomotopySolver, NonlinearSolver, ParametricEq, SimpleSolver,
    DEFAULT_RESABSTOL, MAX_ITERATIONS,
};
