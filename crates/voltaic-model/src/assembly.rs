//! Model-matrix assembly.
//!
//! Fuses the stacked element matrices with the circuit topology into one
//! rational tableau, solves it with the generalized solver, and splits
//! the result into the state-space and nonlinear-coupling matrices. The
//! trapezoidal rule is folded in algebraically: the tableau's state
//! column carries `mxd/t + mx/2` against the new state and the right-hand
//! side carries `mxd/t - mx/2` against the old one, which evaluates every
//! constitutive law at the step midpoint with the finite-difference
//! derivative.

use num_bigint::BigInt;
use num_traits::Zero;
use voltaic_core::sparse::SparseMatrix;
use voltaic_core::{Circuit, Rational};
use voltaic_solver::exact::{gensolve, nullspace, rmul, RationalMatrix};

use crate::error::{Error, Result};

/// Everything `gensolve` tells us about the circuit, still rational.
#[derive(Debug)]
pub(crate) struct RawMatrices {
    pub nx: usize,
    pub nu: usize,
    pub ny: usize,
    pub nq: usize,
    pub nn: usize,
    pub a: RationalMatrix,
    pub b: RationalMatrix,
    pub x0: RationalMatrix,
    pub c: RationalMatrix,
    pub dy: RationalMatrix,
    pub ey: RationalMatrix,
    pub y0: RationalMatrix,
    pub fy: RationalMatrix,
    pub q0: RationalMatrix,
    pub dq_full: RationalMatrix,
    pub eq_full: RationalMatrix,
    pub fq: RationalMatrix,
}

fn block(m: &RationalMatrix, r0: usize, nr: usize, c0: usize, nc: usize) -> RationalMatrix {
    m.view((r0, c0), (nr, nc)).into_owned()
}

pub(crate) fn model_matrices(circ: &Circuit, t: &Rational) -> Result<RawMatrices> {
    let (tv, ti) = circ.topology()?;
    let nb = circ.nb();
    let nx = circ.nx();
    let nq = circ.nq();
    let nu = circ.nu();
    let ny = circ.ny();

    let half = Rational::new(BigInt::from(1), BigInt::from(2));
    let neg_one = Rational::from_integer(BigInt::from(-1));
    let t_inv = t.recip();

    let mxd_t = circ.mxd().scale(&t_inv);
    let mx_half = circ.mx().scale(&half);
    let state_new = mxd_t.add(&mx_half);
    let state_old = mxd_t.add(&mx_half.scale(&neg_one));

    let n_loops = tv.nrows();
    let n_cuts = ti.nrows();
    let mv = circ.mv();
    let mi = circ.mi();
    let mq = circ.mq();
    let lhs_top = SparseMatrix::hstack(&[&mv, &mi, &state_new, &mq]);
    let lhs_loops = SparseMatrix::hstack(&[
        &tv,
        &SparseMatrix::zeros(n_loops, nb),
        &SparseMatrix::zeros(n_loops, nx),
        &SparseMatrix::zeros(n_loops, nq),
    ]);
    let lhs_cuts = SparseMatrix::hstack(&[
        &SparseMatrix::zeros(n_cuts, nb),
        &ti,
        &SparseMatrix::zeros(n_cuts, nx),
        &SparseMatrix::zeros(n_cuts, nq),
    ]);
    let lhs = SparseMatrix::vstack(&[&lhs_top, &lhs_loops, &lhs_cuts]);

    let u0 = circ.u0();
    let mu = circ.mu();
    let rhs_top = SparseMatrix::hstack(&[&u0, &mu, &state_old]);
    let rhs = SparseMatrix::vstack(&[&rhs_top, &SparseMatrix::zeros(n_loops + n_cuts, 1 + nu + nx)]);

    let (x, mut f) = gensolve(&lhs, &rhs);

    let xrow = 2 * nb;
    let qrow = 2 * nb + nx;
    let all_rows = 2 * nb + nx + nq;

    // Output row matrix P = [pv pi px/2 + pxd/t pq].
    let pxd_t = circ.pxd().scale(&t_inv);
    let px_half = circ.px().scale(&half);
    let p_state = pxd_t.add(&px_half);
    let pv = circ.pv();
    let pi = circ.pi();
    let pq = circ.pq();
    let p_out = SparseMatrix::hstack(&[&pv, &pi, &p_state, &pq]);

    // A null direction of fq is a free quantity no residual pins down.
    // It is deleted (the free coordinate is fixed at zero); if the state
    // update or the output depends on it, the circuit is indeterminate
    // and the deletion is an arbitrary choice.
    let fq_sp = SparseMatrix::from_dense(&block(&f, qrow, nq, 0, f.ncols()));
    let mut ns = nullspace(&fq_sp);
    if ns.ncols() > 0 {
        let c_block = block(&f, xrow, nx, 0, f.ncols());
        if rmul(&c_block, &ns).iter().any(|v| !v.is_zero()) {
            log::warn!("state update depends on an indeterminate circuit variable, setting to zero");
        }
        let fy_full = p_out.mul_dense(&f);
        if rmul(&fy_full, &ns).iter().any(|v| !v.is_zero()) {
            log::warn!("output depends on an indeterminate circuit variable, setting to zero");
        }

        while ns.ncols() > 0 {
            let (mut pi_row, mut pj_col) = (0, 0);
            let mut found = false;
            for j in 0..ns.ncols() {
                for i in 0..ns.nrows() {
                    if !ns[(i, j)].is_zero() {
                        pi_row = i;
                        pj_col = j;
                        found = true;
                        break;
                    }
                }
                if found {
                    break;
                }
            }
            if !found {
                break;
            }
            let piv = ns[(pi_row, pj_col)].clone();
            let pcol: Vec<Rational> = (0..ns.nrows()).map(|r| ns[(r, pj_col)].clone()).collect();
            for m in 0..ns.ncols() {
                if m == pj_col {
                    continue;
                }
                let factor = &ns[(pi_row, m)] / &piv;
                if factor.is_zero() {
                    continue;
                }
                for (r, pr) in pcol.iter().enumerate() {
                    if !pr.is_zero() {
                        ns[(r, m)] -= pr * &factor;
                    }
                }
            }
            f = f.remove_column(pi_row);
            ns = ns.remove_column(pj_col).remove_row(pi_row);
        }
    }

    let nn = f.ncols();
    if nn != circ.nn() {
        return Err(Error::InconsistentNonlinearity {
            found: nn,
            expected: circ.nn(),
        });
    }

    let mut dy = p_out.mul_dense(&block(&x, 0, all_rows, 1 + nu, nx));
    for (i, j, v) in px_half.iter() {
        dy[(i, j)] += v;
    }
    for (i, j, v) in pxd_t.iter() {
        dy[(i, j)] -= v;
    }
    let ey = p_out.mul_dense(&block(&x, 0, all_rows, 1, nu));
    let fy = p_out.mul_dense(&f);
    let y0 = p_out.mul_dense(&block(&x, 0, all_rows, 0, 1));

    Ok(RawMatrices {
        nx,
        nu,
        ny,
        nq,
        nn,
        a: block(&x, xrow, nx, 1 + nu, nx),
        b: block(&x, xrow, nx, 1, nu),
        x0: block(&x, xrow, nx, 0, 1),
        c: block(&f, xrow, nx, 0, nn),
        dy,
        ey,
        y0,
        fy,
        q0: block(&x, qrow, nq, 0, 1),
        dq_full: block(&x, qrow, nq, 1 + nu, nx),
        eq_full: block(&x, qrow, nq, 1, nu),
        fq: block(&f, qrow, nq, 0, nn),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{capacitor, current_source, resistor, voltage_probe, voltage_source};
    use voltaic_core::rat;

    #[test]
    fn test_resistive_circuit_is_stateless() {
        // 1 mA into 2.2 kΩ, probed: y0 = I·R exactly, no state, no inputs.
        let mut circ = Circuit::new();
        let src = circ.add(current_source(1e-3));
        let r = circ.add(resistor(2.2e3));
        let probe = circ.add(voltage_probe());
        for (id, hot) in [(src, "+"), (r, "1"), (probe, "+")] {
            circ.connect(id, hot, "n1").unwrap();
        }
        for (id, cold) in [(src, "-"), (r, "2"), (probe, "-")] {
            circ.connect(id, cold, "gnd").unwrap();
        }

        let raw = model_matrices(&circ, &rat(1.0 / 44100.0)).unwrap();
        assert_eq!((raw.nx, raw.nu, raw.ny, raw.nn), (0, 0, 1, 0));
        assert_eq!(raw.y0[(0, 0)], rat(1e-3) * rat(2.2e3));
    }

    #[test]
    fn test_rc_state_matrices_exact() {
        // V -- R -- C with R = 1, C = 1, T = 1/2:
        // k = T/(2RC) = 1/4, a = (1-k)/(1+k) = 3/5, x0 = C·V/(RC/T + 1/2) = 2.
        let mut circ = Circuit::new();
        let vs = circ.add(voltage_source(5.0));
        let r = circ.add(resistor(1.0));
        let c = circ.add(capacitor(1.0));
        circ.connect(vs, "+", "in").unwrap();
        circ.connect(vs, "-", "gnd").unwrap();
        circ.connect(r, "1", "in").unwrap();
        circ.connect(r, "2", "out").unwrap();
        circ.connect(c, "1", "out").unwrap();
        circ.connect(c, "2", "gnd").unwrap();

        let raw = model_matrices(&circ, &rat(0.5)).unwrap();
        assert_eq!((raw.nx, raw.nu, raw.nn), (1, 0, 0));
        assert_eq!(raw.a[(0, 0)], Rational::new(3.into(), 5.into()));
        assert_eq!(raw.x0[(0, 0)], rat(2.0));
    }

    #[test]
    fn test_indeterminate_current_split() {
        // Two ideal voltage sources in parallel: the current split is free.
        // One free direction must be detected and removed.
        let mut circ = Circuit::new();
        let a = circ.add(voltage_source(1.0));
        let b = circ.add(voltage_source(1.0));
        circ.connect(a, "+", "n").unwrap();
        circ.connect(b, "+", "n").unwrap();
        circ.connect(a, "-", "gnd").unwrap();
        circ.connect(b, "-", "gnd").unwrap();

        let raw = model_matrices(&circ, &rat(0.5)).unwrap();
        assert_eq!(raw.nn, 0);
    }
}
