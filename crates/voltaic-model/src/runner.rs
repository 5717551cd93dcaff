//! The per-sample runtime loop.

use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};
use crate::model::DiscreteModel;

/// Drives a [`DiscreteModel`] over input signals.
///
/// All scratch is allocated here, once: the per-sample loop itself only
/// writes into pre-sized buffers. The runner borrows the model
/// exclusively; run separate models on separate runners for parallelism.
pub struct ModelRunner<'m> {
    model: &'m mut DiscreteModel,
    show_progress: bool,
    ucur: DVector<f64>,
    ycur: DVector<f64>,
    xnew: DVector<f64>,
    z: DVector<f64>,
    ps: Vec<DVector<f64>>,
}

impl<'m> ModelRunner<'m> {
    pub fn new(model: &'m mut DiscreteModel, show_progress: bool) -> Self {
        let nn = model.nn();
        let ps = model
            .subproblems()
            .iter()
            .map(|sp| DVector::zeros(sp.np()))
            .collect();
        Self {
            ucur: DVector::zeros(model.nu()),
            ycur: DVector::zeros(model.ny()),
            xnew: DVector::zeros(model.nx()),
            z: DVector::zeros(nn),
            ps,
            show_progress,
            model,
        }
    }

    pub fn model(&self) -> &DiscreteModel {
        self.model
    }

    /// Simulate every column of `u`, allocating the output matrix.
    pub fn run(&mut self, u: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        let mut y = DMatrix::zeros(self.model.ny(), u.ncols());
        self.run_into(&mut y, u)?;
        Ok(y)
    }

    /// Simulate every column of `u` into the pre-sized `y`.
    pub fn run_into(&mut self, y: &mut DMatrix<f64>, u: &DMatrix<f64>) -> Result<()> {
        if u.nrows() != self.model.nu() {
            return Err(Error::Dimension {
                what: "input rows",
                expected: self.model.nu(),
                actual: u.nrows(),
            });
        }
        if y.nrows() != self.model.ny() {
            return Err(Error::Dimension {
                what: "output rows",
                expected: self.model.ny(),
                actual: y.nrows(),
            });
        }
        if y.ncols() != u.ncols() {
            return Err(Error::Dimension {
                what: "output columns",
                expected: u.ncols(),
                actual: y.ncols(),
            });
        }

        let total = u.ncols();
        let stride = (total / 10).max(1);
        for n in 0..total {
            self.step(y, u, n)?;
            if self.show_progress && (n + 1) % stride == 0 {
                log::info!("simulated {}/{} samples", n + 1, total);
            }
        }
        Ok(())
    }

    /// One sample: assemble each sub-problem's parameter, solve them in
    /// block order (forward substitution over the coupling), then advance
    /// the output and state updates.
    fn step(&mut self, y: &mut DMatrix<f64>, u: &DMatrix<f64>, n: usize) -> Result<()> {
        let model = &mut *self.model;
        self.ucur.copy_from(&u.column(n));
        self.z.fill(0.0);

        for k in 0..model.subproblems.len() {
            let sp = &model.subproblems[k];
            let p = &mut self.ps[k];
            if sp.np > 0 {
                p.gemv(1.0, &sp.dq, &model.x, 0.0);
                p.gemv(1.0, &sp.eq, &self.ucur, 1.0);
                if k > 0 {
                    p.gemv(1.0, &sp.fqprev, &self.z, 1.0);
                }
            }
            let solver = &mut model.solvers[k];
            let zk = solver.solve(p);
            let finite = zk.iter().all(|v| v.is_finite());
            self.z.rows_mut(sp.z_off, sp.nn).copy_from(zk);
            if !solver.has_converged() {
                if finite {
                    log::warn!(
                        "nonlinear solver did not converge in subproblem {k} at sample {n}, \
                         continuing with its last iterate"
                    );
                } else {
                    return Err(Error::NonFinite {
                        subproblem: k,
                        sample: n,
                    });
                }
            }
        }

        self.ycur.copy_from(&model.y0);
        self.ycur.gemv(1.0, &model.dy, &model.x, 1.0);
        self.ycur.gemv(1.0, &model.ey, &self.ucur, 1.0);
        self.ycur.gemv(1.0, &model.fy, &self.z, 1.0);
        y.column_mut(n).copy_from(&self.ycur);

        self.xnew.copy_from(&model.x0);
        self.xnew.gemv(1.0, &model.a, &model.x, 1.0);
        self.xnew.gemv(1.0, &model.b, &self.ucur, 1.0);
        self.xnew.gemv(1.0, &model.c, &self.z, 1.0);
        model.x.copy_from(&self.xnew);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DiscreteModel;
    use crate::testutil::{
        capacitor, current_source, diode, resistor, voltage_probe, voltage_source,
    };
    use voltaic_core::Circuit;

    #[test]
    fn test_empty_circuit_runs_empty() {
        let circ = Circuit::new();
        let mut model = DiscreteModel::new(&circ, 1.0 / 44100.0).unwrap();
        let mut runner = ModelRunner::new(&mut model, false);
        let y = runner.run(&DMatrix::zeros(0, 16)).unwrap();
        assert_eq!((y.nrows(), y.ncols()), (0, 16));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let circ = Circuit::new();
        let mut model = DiscreteModel::new(&circ, 1.0 / 44100.0).unwrap();
        let mut runner = ModelRunner::new(&mut model, false);
        let u = DMatrix::zeros(3, 4);
        assert!(matches!(
            runner.run(&u),
            Err(Error::Dimension { what: "input rows", .. })
        ));

        let u = DMatrix::zeros(0, 4);
        let mut y = DMatrix::zeros(0, 5);
        assert!(matches!(
            runner.run_into(&mut y, &u),
            Err(Error::Dimension { what: "output columns", .. })
        ));
    }

    #[test]
    fn test_resistive_circuit_output() {
        let mut circ = Circuit::new();
        let src = circ.add(current_source(1e-3));
        let r = circ.add(resistor(2.2e3));
        let probe = circ.add(voltage_probe());
        for (id, pin) in [(src, "+"), (r, "1"), (probe, "+")] {
            circ.connect(id, pin, "n1").unwrap();
        }
        for (id, pin) in [(src, "-"), (r, "2"), (probe, "-")] {
            circ.connect(id, pin, "gnd").unwrap();
        }

        let mut model = DiscreteModel::new(&circ, 1.0 / 44100.0).unwrap();
        let mut runner = ModelRunner::new(&mut model, false);
        let y = runner.run(&DMatrix::zeros(0, 3)).unwrap();
        for n in 0..3 {
            assert!((y[(0, n)] - 2.2).abs() < 1e-12, "y = {}", y[(0, n)]);
        }
    }

    #[test]
    fn test_rc_step_response() {
        // R = C = 1, T = 1/2, V = 5: x advances by x' = 3/5·x + 2 and the
        // probe reads the midpoint capacitor voltage (x' + x)/2.
        let mut circ = Circuit::new();
        let vs = circ.add(voltage_source(5.0));
        let r = circ.add(resistor(1.0));
        let c = circ.add(capacitor(1.0));
        let probe = circ.add(voltage_probe());
        circ.connect(vs, "+", "in").unwrap();
        circ.connect(vs, "-", "gnd").unwrap();
        circ.connect(r, "1", "in").unwrap();
        circ.connect(r, "2", "out").unwrap();
        circ.connect(c, "1", "out").unwrap();
        circ.connect(c, "2", "gnd").unwrap();
        circ.connect(probe, "+", "out").unwrap();
        circ.connect(probe, "-", "gnd").unwrap();

        let mut model = DiscreteModel::new(&circ, 0.5).unwrap();
        let mut runner = ModelRunner::new(&mut model, false);
        let y = runner.run(&DMatrix::zeros(0, 40)).unwrap();

        let mut x = 0.0f64;
        for n in 0..40 {
            let x_next = 0.6 * x + 2.0;
            let expected = 0.5 * (x + x_next);
            assert!(
                (y[(0, n)] - expected).abs() < 1e-12,
                "sample {n}: {} vs {expected}",
                y[(0, n)]
            );
            x = x_next;
        }
        // Settles at the source voltage.
        assert!((y[(0, 39)] - 5.0).abs() < 1e-3);
    }

    #[test]
    fn test_diode_resistor_consistency() {
        // V -- R -- D to ground; the probe reads the diode voltage. The
        // simulated point must satisfy both branch laws.
        let (is, vt) = (1e-12, 0.025);
        let mut circ = Circuit::new();
        let vs = circ.add(voltage_source(1.0));
        let r = circ.add(resistor(1e3));
        let d = circ.add(diode(is, vt));
        let probe = circ.add(voltage_probe());
        circ.connect(vs, "+", "in").unwrap();
        circ.connect(vs, "-", "gnd").unwrap();
        circ.connect(r, "1", "in").unwrap();
        circ.connect(r, "2", "out").unwrap();
        circ.connect(d, "+", "out").unwrap();
        circ.connect(d, "-", "gnd").unwrap();
        circ.connect(probe, "+", "out").unwrap();
        circ.connect(probe, "-", "gnd").unwrap();

        let mut model = DiscreteModel::new(&circ, 1.0 / 44100.0).unwrap();
        let mut runner = ModelRunner::new(&mut model, false);
        let y = runner.run(&DMatrix::zeros(0, 2)).unwrap();

        let vd = y[(0, 1)];
        assert!(vd > 0.4 && vd < 0.8, "diode voltage {vd}");
        let i_r = (1.0 - vd) / 1e3;
        let i_d = is * ((vd / vt).exp() - 1.0);
        assert!(
            (i_r - i_d).abs() < 1e-9,
            "branch currents disagree: {i_r} vs {i_d}"
        );
    }
}
