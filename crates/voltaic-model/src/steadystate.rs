//! Steady-state analysis: the fixed point of the state update.
//!
//! Solves `x* = a·x* + b·u + c·z* + x0` together with all sub-problem
//! residuals. The state is eliminated through a pre-factored `I - a`,
//! which folds the z feedback into one combined residual over the full z
//! vector; that residual is walked in from the all-zero q point by
//! homotopy at a tightened tolerance.

use nalgebra::{DMatrix, DVector};
use voltaic_solver::{
    EqMemberSpec, HomotopySolver, LinearSolver, NonlinearSolver, ParametricEq, SimpleSolver,
};

use crate::error::{Error, Result};
use crate::model::DiscreteModel;

const STEADY_RESABSTOL: f64 = 1e-15;

/// The steady-state state vector for a constant input `u`.
pub fn steadystate(model: &DiscreteModel, u: &DVector<f64>) -> Result<DVector<f64>> {
    if u.len() != model.nu() {
        return Err(Error::Dimension {
            what: "input vector",
            expected: model.nu(),
            actual: u.len(),
        });
    }
    let nx = model.nx();

    let mut ia = DMatrix::<f64>::identity(nx, nx);
    ia -= &model.a;
    let mut lin = LinearSolver::new(nx);
    if !lin.setlhs(&ia) {
        return Err(Error::SingularSteadyState);
    }

    let solve_columns = |m: &DMatrix<f64>| -> DMatrix<f64> {
        let mut out = DMatrix::zeros(nx, m.ncols());
        let mut col = DVector::zeros(nx);
        for j in 0..m.ncols() {
            lin.solve(&mut col, &m.column(j).into_owned());
            out.set_column(j, &col);
        }
        out
    };
    let ia_b = solve_columns(&model.b);
    let ia_c = solve_columns(&model.c);
    let mut ia_x0 = DVector::zeros(nx);
    lin.solve(&mut ia_x0, &model.x0);

    // The z-independent part of the fixed point: (I-a)⁻¹·(b·u + x0).
    let mut x_base = ia_x0;
    x_base.gemv(1.0, &ia_b, u, 1.0);

    let nn = model.nn();
    let mut z = DVector::zeros(nn);
    if nn > 0 {
        let nq_total: usize = model.subproblems.iter().map(|sp| sp.q0.len()).sum();
        let mut q_target = DVector::zeros(nq_total);
        let mut fq = DMatrix::zeros(nq_total, nn);
        let mut members = Vec::new();
        let mut q_off = 0;
        for sp in &model.subproblems {
            let nq_k = sp.q0.len();

            // Constant part: q0 + pexp·(dq·(I-a)⁻¹·(b·u + x0) + eq·u).
            let mut pk = &sp.dq * &x_base;
            pk += &sp.eq * u;
            let q0k = &sp.q0 + &sp.pexp * &pk;
            q_target.rows_mut(q_off, nq_k).copy_from(&q0k);

            // z coupling: pexp·(dq·(I-a)⁻¹·c + fqprev) plus the block's
            // own diagonal coupling.
            let mut zc = &sp.dq * &ia_c;
            zc += &sp.fqprev;
            let lifted = &sp.pexp * &zc;
            fq.view_mut((q_off, 0), (nq_k, nn)).copy_from(&lifted);
            for r in 0..nq_k {
                for j in 0..sp.nn {
                    fq[(q_off + r, sp.z_off + j)] += sp.fq[(r, j)];
                }
            }

            for m in &sp.members {
                members.push(EqMemberSpec {
                    law: m.law.clone(),
                    q_offset: q_off + m.q_offset,
                    res_offset: sp.z_off + m.res_offset,
                });
            }
            q_off += nq_k;
        }

        let eq = ParametricEq::new(
            DVector::zeros(nq_total),
            DMatrix::identity(nq_total, nq_total),
            fq,
            members,
        );
        let base = SimpleSolver::new(eq, &DVector::zeros(nq_total), &DVector::zeros(nn));
        let mut solver = HomotopySolver::new(base);
        solver.set_resabstol(STEADY_RESABSTOL);
        z.copy_from(solver.solve(&q_target));
        if !solver.has_converged() {
            return Err(Error::SteadyStateDiverged);
        }
    }

    let mut x_star = x_base;
    x_star.gemv(1.0, &ia_c, &z, 1.0);
    Ok(x_star)
}

/// Compute the steady state and install it as the model's state.
pub fn steadystate_install(model: &mut DiscreteModel, u: &DVector<f64>) -> Result<DVector<f64>> {
    let x_star = steadystate(model, u)?;
    model.x.copy_from(&x_star);
    Ok(x_star)
}
