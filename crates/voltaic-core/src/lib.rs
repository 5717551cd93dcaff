//! Core circuit representation for Voltaic.
//!
//! This crate provides the data model the model compiler consumes:
//!
//! - [`Element`] - A frozen bundle of constitutive and output matrices,
//!   `mv·v + mi·i + mx·x + mxd·ẋ + mq·q = mu·u + u0`, plus an optional
//!   closed-form [`Nonlinearity`].
//! - [`Circuit`] - An ordered bag of elements wired by named nets, able to
//!   produce the stacked element matrices and the loop/cutset topology
//!   matrices of the circuit graph.
//! - [`SparseMatrix`](sparse::SparseMatrix) - Compressed-column sparse
//!   matrices over [`Rational`] (`BigRational`), the scalar of every
//!   compile-time computation.
//!
//! # Example: wiring a circuit
//!
//! ```rust
//! use voltaic_core::{Circuit, Element, ElementSpec, rat};
//!
//! // A 1 kΩ resistor: v - 1000·i = 0.
//! let resistor = Element::new(ElementSpec {
//!     nl: 1,
//!     nb: 1,
//!     mv: vec![(0, 0, rat(1.0))],
//!     mi: vec![(0, 0, rat(-1000.0))],
//!     pins: vec![("1".into(), 0, 1), ("2".into(), 0, -1)],
//!     ..Default::default()
//! })
//! .unwrap();
//!
//! let mut circ = Circuit::new();
//! let r1 = circ.add(resistor.clone());
//! let r2 = circ.add(resistor);
//! circ.connect(r1, "1", "in").unwrap();
//! circ.connect(r1, "2", "mid").unwrap();
//! circ.connect(r2, "1", "mid").unwrap();
//! circ.connect(r2, "2", "gnd").unwrap();
//!
//! let (tv, ti) = circ.topology().unwrap();
//! assert_eq!(tv.mul(&ti.transpose()).nnz(), 0);
//! ```

pub mod circuit;
pub mod element;
pub mod error;
pub mod sparse;

pub use circuit::{Circuit, ElementId};
pub use element::{Element, ElementSpec, Nonlinearity, Triplet};
pub use error::{Error, Result};
pub use sparse::SparseMatrix;

/// Exact rational scalar used throughout the model compiler.
pub type Rational = num_rational::BigRational;

/// The exact rational value of a finite `f64`.
///
/// # Panics
///
/// Panics on NaN or infinity.
pub fn rat(x: f64) -> Rational {
    Rational::from_float(x).unwrap_or_else(|| panic!("non-finite value {x}"))
}

/// Convert a rational to the nearest `f64`.
pub fn rat_to_f64(r: &Rational) -> f64 {
    use num_traits::ToPrimitive;
    r.to_f64().unwrap_or(f64::NAN)
}
