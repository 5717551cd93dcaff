//! # Voltaic
//!
//! Voltaic compiles analog circuits - netlists of linear and nonlinear
//! elements - into fixed-step discrete-time state-space simulators, and
//! runs them sample by sample.
//!
//! The compile pipeline works in exact rational arithmetic: element and
//! topology matrices are fused into one tableau, algebraic constraints
//! are eliminated by a generalized sparse solver, the remaining implicit
//! nonlinear system is split into minimum-dimensional forward-coupled
//! sub-problems, and each sub-problem's parameter space is reduced to
//! its true rank. The runtime is a tight loop: assemble each parameter,
//! call a nonlinear solver, advance the linear state update.
//!
//! ## Quick start
//!
//! ```rust
//! use voltaic::prelude::*;
//!
//! // 1 mA through 2.2 kΩ, probed.
//! let mut circ = Circuit::new();
//! let src = circ.add(current_source(1e-3));
//! let r = circ.add(resistor(2.2e3));
//! let probe = circ.add(voltage_probe());
//! for (id, pin) in [(src, "+"), (r, "1"), (probe, "+")] {
//!     circ.connect(id, pin, "n1").unwrap();
//! }
//! for (id, pin) in [(src, "-"), (r, "2"), (probe, "-")] {
//!     circ.connect(id, pin, "gnd").unwrap();
//! }
//!
//! let mut model = DiscreteModel::new(&circ, 1.0 / 44100.0).unwrap();
//! let mut runner = ModelRunner::new(&mut model, false);
//! let y = runner.run(&DMatrix::zeros(0, 8)).unwrap();
//! assert!((y[(0, 0)] - 2.2).abs() < 1e-12);
//! ```

pub use voltaic_core as core;
pub use voltaic_devices as devices;
pub use voltaic_model as model;
pub use voltaic_solver as solver;

pub use voltaic_core::{
    rat, rat_to_f64, Circuit, Element, ElementId, ElementSpec, Error as CoreError, Nonlinearity,
    Rational, SparseMatrix,
};

pub use voltaic_solver::{
    CachingSolver, Error as SolverError, HomotopySolver, KdTree, LinearSolver, NonlinearSolver,
    ParametricEq, SimpleSolver,
};

pub use voltaic_model::{
    compile, default_solver_factory, simple_solver_factory, steadystate, steadystate_install,
    CompileOptions, DiscreteModel, Error as ModelError, ModelRunner, SolverFactory,
};

pub use voltaic_devices::{
    bjt, capacitor, current_probe, current_source, diode, inductor, input_current_source,
    input_voltage_source, opamp, resistor, thermal_voltage, voltage_probe, voltage_source,
    BjtKind, BjtParams, DiodeParams,
};

/// Re-export of nalgebra's dynamic matrix type.
pub use nalgebra::DMatrix;

/// Re-export of nalgebra's dynamic vector type.
pub use nalgebra::DVector;

/// Prelude module containing the commonly used types.
///
/// ```rust
/// use voltaic::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{Circuit, CompileOptions, DiscreteModel, ModelRunner};

    pub use crate::{compile, steadystate, steadystate_install};

    pub use crate::{
        bjt, capacitor, current_probe, current_source, diode, inductor, input_current_source,
        input_voltage_source, opamp, resistor, voltage_probe, voltage_source, BjtKind, BjtParams,
        DiodeParams,
    };

    pub use crate::{DMatrix, DVector};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_builds_a_model() {
        let mut circ = Circuit::new();
        let vs = circ.add(voltage_source(9.0));
        let r = circ.add(resistor(1e3));
        circ.connect(vs, "+", "a").unwrap();
        circ.connect(r, "1", "a").unwrap();
        circ.connect(vs, "-", "gnd").unwrap();
        circ.connect(r, "2", "gnd").unwrap();

        let model = DiscreteModel::new(&circ, 1.0 / 48000.0).unwrap();
        assert_eq!(model.ny(), 0);
        assert_eq!(model.nu(), 0);
    }
}
