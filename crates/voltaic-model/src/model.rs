//! The compiled discrete model and the compile pipeline.

use std::fmt;

use nalgebra::{DMatrix, DVector};
use num_traits::Zero;
use voltaic_core::{rat, rat_to_f64, Circuit, Rational};
use voltaic_solver::exact::{rzeros, RationalMatrix};
use voltaic_solver::{
    CachingSolver, EqMemberSpec, HomotopySolver, NonlinearSolver, ParametricEq, SimpleSolver,
};

use crate::assembly::model_matrices;
use crate::decompose::{nldecompose, NlElem};
use crate::error::{Error, Result};
use crate::reduce::{reduce_pdims, BlockMats};

/// Options for [`compile`].
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Split the nonlinearity into minimal forward-coupled sub-problems.
    /// With `false`, all nonlinear elements form one block.
    pub decompose: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { decompose: true }
    }
}

/// Builds a solver around a sub-problem residual, seeded with a
/// known-good `(p, z)` anchor.
pub type SolverFactory =
    dyn Fn(ParametricEq, &DVector<f64>, &DVector<f64>) -> Box<dyn NonlinearSolver>;

/// The production stack: homotopy around a caching damped Newton.
pub fn default_solver_factory(
    eq: ParametricEq,
    p0: &DVector<f64>,
    z0: &DVector<f64>,
) -> Box<dyn NonlinearSolver> {
    Box::new(HomotopySolver::new(CachingSolver::new(SimpleSolver::new(
        eq, p0, z0,
    ))))
}

/// Homotopy around a plain damped Newton, no caching layer.
pub fn simple_solver_factory(
    eq: ParametricEq,
    p0: &DVector<f64>,
    z0: &DVector<f64>,
) -> Box<dyn NonlinearSolver> {
    Box::new(HomotopySolver::new(SimpleSolver::new(eq, p0, z0)))
}

/// One nonlinear sub-problem of a compiled model, in runtime (f64) form.
pub struct SubProblem {
    pub(crate) q0: DVector<f64>,
    pub(crate) pexp: DMatrix<f64>,
    pub(crate) fq: DMatrix<f64>,
    pub(crate) dq: DMatrix<f64>,
    pub(crate) eq: DMatrix<f64>,
    pub(crate) fqprev: DMatrix<f64>,
    pub(crate) members: Vec<EqMemberSpec>,
    pub(crate) z0: DVector<f64>,
    pub(crate) z_off: usize,
    pub(crate) nn: usize,
    pub(crate) np: usize,
}

impl SubProblem {
    pub fn nn(&self) -> usize {
        self.nn
    }

    pub fn np(&self) -> usize {
        self.np
    }

    /// The root the solver was anchored at during compilation.
    pub fn z0(&self) -> &DVector<f64> {
        &self.z0
    }
}

/// A circuit compiled to a fixed-step discrete-time state-space model.
///
/// Immutable after compilation except for the hidden state vector `x`,
/// which [`ModelRunner`](crate::ModelRunner) advances sample by sample
/// and [`steadystate_install`](crate::steadystate_install) overwrites.
pub struct DiscreteModel {
    pub(crate) nx: usize,
    pub(crate) nu: usize,
    pub(crate) ny: usize,
    pub(crate) a: DMatrix<f64>,
    pub(crate) b: DMatrix<f64>,
    pub(crate) c: DMatrix<f64>,
    pub(crate) x0: DVector<f64>,
    pub(crate) dy: DMatrix<f64>,
    pub(crate) ey: DMatrix<f64>,
    pub(crate) fy: DMatrix<f64>,
    pub(crate) y0: DVector<f64>,
    pub(crate) subproblems: Vec<SubProblem>,
    pub(crate) solvers: Vec<Box<dyn NonlinearSolver>>,
    pub(crate) x: DVector<f64>,
}

impl DiscreteModel {
    /// Compile with the default solver stack and options.
    pub fn new(circ: &Circuit, sample_period: f64) -> Result<Self> {
        compile(
            circ,
            sample_period,
            &default_solver_factory,
            &CompileOptions::default(),
        )
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn nu(&self) -> usize {
        self.nu
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    /// Total number of nonlinear unknowns across all sub-problems.
    pub fn nn(&self) -> usize {
        self.subproblems.iter().map(SubProblem::nn).sum()
    }

    pub fn subproblems(&self) -> &[SubProblem] {
        &self.subproblems
    }

    pub fn state(&self) -> &DVector<f64> {
        &self.x
    }

    pub fn set_state(&mut self, x: &DVector<f64>) -> Result<()> {
        if x.len() != self.nx {
            return Err(Error::Dimension {
                what: "state vector",
                expected: self.nx,
                actual: x.len(),
            });
        }
        self.x.copy_from(x);
        Ok(())
    }

    /// Reset the state to zero (the compile-time reference point).
    pub fn reset_state(&mut self) {
        self.x.fill(0.0);
    }
}

impl fmt::Debug for DiscreteModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscreteModel")
            .field("nx", &self.nx)
            .field("nu", &self.nu)
            .field("ny", &self.ny)
            .field("subproblems", &self.subproblems.len())
            .finish()
    }
}

/// Compile a circuit at the given sample period.
///
/// The pipeline: assemble the rational tableau, decompose the
/// nonlinearity, reduce parameter dimensions, fold away sub-problems with
/// constant parameters, find each remaining sub-problem's initial root,
/// and wrap each residual in a solver from `factory`.
pub fn compile(
    circ: &Circuit,
    sample_period: f64,
    factory: &SolverFactory,
    options: &CompileOptions,
) -> Result<DiscreteModel> {
    if !sample_period.is_finite() || sample_period <= 0.0 {
        return Err(Error::InvalidSamplePeriod(sample_period));
    }
    let mut raw = model_matrices(circ, &rat(sample_period))?;

    let mut nl_elems = Vec::new();
    let mut q_off = 0;
    for (index, e) in circ.elements().iter().enumerate() {
        if e.nq() > 0 {
            nl_elems.push(NlElem {
                index,
                q_off,
                nq: e.nq(),
                nn: e.nn(),
            });
        }
        q_off += e.nq();
    }

    let subsets = nldecompose(
        &mut raw.fq,
        &mut raw.c,
        &mut raw.fy,
        &nl_elems,
        options.decompose,
    );

    // Carve the per-block rational matrices out of the decomposed fq.
    let mut blocks: Vec<BlockMats> = Vec::with_capacity(subsets.len());
    let mut offsets = Vec::with_capacity(subsets.len());
    let mut z_off = 0;
    for subset in &subsets {
        let nn_k: usize = subset.iter().map(|&e| nl_elems[e].nn).sum();
        let rows: Vec<usize> = subset
            .iter()
            .flat_map(|&e| nl_elems[e].q_off..nl_elems[e].q_off + nl_elems[e].nq)
            .collect();
        let nq_k = rows.len();
        let pick = |m: &RationalMatrix, c0: usize, nc: usize| {
            RationalMatrix::from_fn(nq_k, nc, |r, c| m[(rows[r], c0 + c)].clone())
        };
        let fq = pick(&raw.fq, z_off, nn_k);
        let mut fqprev_full = pick(&raw.fq, 0, raw.nn);
        // The coupling keeps earlier blocks only; the diagonal lives in
        // `fq` and later columns are zero by construction.
        for r in 0..nq_k {
            for col in z_off..raw.nn {
                fqprev_full[(r, col)] = Rational::zero();
            }
        }
        blocks.push(BlockMats {
            q0: pick(&raw.q0, 0, 1),
            dq_full: pick(&raw.dq_full, 0, raw.nx),
            eq_full: pick(&raw.eq_full, 0, raw.nu),
            fqprev_full,
            fq,
            rows,
            pexp: rzeros(0, 0),
            dq: rzeros(0, 0),
            eq: rzeros(0, 0),
            fqprev: rzeros(0, 0),
        });
        offsets.push((z_off, nn_k));
        z_off += nn_k;
    }

    reduce_pdims(&mut blocks, &offsets, &mut raw)?;

    // Lower everything to f64.
    let a = to_f(&raw.a);
    let b = to_f(&raw.b);
    let mut c = to_f(&raw.c);
    let mut x0 = to_fv(&raw.x0);
    let dy = to_f(&raw.dy);
    let ey = to_f(&raw.ey);
    let mut fy = to_f(&raw.fy);
    let mut y0 = to_fv(&raw.y0);

    struct Pre {
        q0: DVector<f64>,
        pexp: DMatrix<f64>,
        fq: DMatrix<f64>,
        dq: DMatrix<f64>,
        eq: DMatrix<f64>,
        fqprev: DMatrix<f64>,
        members: Vec<EqMemberSpec>,
        z_off: usize,
        nn: usize,
        np: usize,
    }

    let mut pres: Vec<Pre> = Vec::with_capacity(blocks.len());
    for (k, block) in blocks.iter().enumerate() {
        let mut members = Vec::new();
        let mut local_q = 0;
        let mut local_res = 0;
        for &e in &subsets[k] {
            let el = &circ.elements()[nl_elems[e].index];
            let law = el
                .nonlinearity()
                .expect("nonlinear element carries a residual")
                .clone();
            members.push(EqMemberSpec {
                law,
                q_offset: local_q,
                res_offset: local_res,
            });
            local_q += nl_elems[e].nq;
            local_res += nl_elems[e].nn;
        }
        pres.push(Pre {
            q0: to_fv(&block.q0),
            pexp: to_f(&block.pexp),
            fq: to_f(&block.fq),
            dq: to_f(&block.dq),
            eq: to_f(&block.eq),
            fqprev: to_f(&block.fqprev),
            members,
            z_off: offsets[k].0,
            nn: offsets[k].1,
            np: block.np(),
        });
    }

    // Fold away constant-parameter sub-problems: solve once, absorb into
    // the affine terms, and drop the block.
    let mut keep = vec![true; pres.len()];
    for k in 0..pres.len() {
        if pres[k].np > 0 {
            continue;
        }
        keep[k] = false;
        let zk = initial_solution(&pres[k].q0, &pres[k].fq, &pres[k].members, pres[k].nn)
            .ok_or(Error::InitialSolution(k))?;
        x0.gemv(1.0, &c.columns(pres[k].z_off, pres[k].nn), &zk, 1.0);
        y0.gemv(1.0, &fy.columns(pres[k].z_off, pres[k].nn), &zk, 1.0);
        for m in k + 1..pres.len() {
            let coupling = pres[m].fqprev.columns(pres[k].z_off, pres[k].nn) * &zk;
            let shift = &pres[m].pexp * &coupling;
            pres[m].q0 += shift;
        }
    }

    // Renumber the surviving blocks and compact the z column space.
    let kept: Vec<usize> = (0..pres.len()).filter(|&k| keep[k]).collect();
    let nn_new: usize = kept.iter().map(|&k| pres[k].nn).sum();
    let mut c_new = DMatrix::zeros(raw.nx, nn_new);
    let mut fy_new = DMatrix::zeros(raw.ny, nn_new);
    let mut new_off = 0;
    for &k in &kept {
        c_new
            .columns_mut(new_off, pres[k].nn)
            .copy_from(&c.columns(pres[k].z_off, pres[k].nn));
        fy_new
            .columns_mut(new_off, pres[k].nn)
            .copy_from(&fy.columns(pres[k].z_off, pres[k].nn));
        new_off += pres[k].nn;
    }
    c = c_new;
    fy = fy_new;

    let mut subproblems = Vec::with_capacity(kept.len());
    let mut solvers = Vec::with_capacity(kept.len());
    let mut new_off = 0;
    for &k in &kept {
        let pre = &pres[k];
        let mut fqprev = DMatrix::zeros(pre.np, nn_new);
        let mut col = 0;
        for &m in &kept {
            fqprev
                .columns_mut(col, pres[m].nn)
                .copy_from(&pre.fqprev.columns(pres[m].z_off, pres[m].nn));
            col += pres[m].nn;
        }

        let z0 = initial_solution(&pre.q0, &pre.fq, &pre.members, pre.nn)
            .ok_or(Error::InitialSolution(k))?;
        let eq_obj = ParametricEq::new(
            pre.q0.clone(),
            pre.pexp.clone(),
            pre.fq.clone(),
            pre.members.clone(),
        );
        let p0 = DVector::zeros(pre.np);
        solvers.push(factory(eq_obj, &p0, &z0));
        subproblems.push(SubProblem {
            q0: pre.q0.clone(),
            pexp: pre.pexp.clone(),
            fq: pre.fq.clone(),
            dq: pre.dq.clone(),
            eq: pre.eq.clone(),
            fqprev,
            members: pre.members.clone(),
            z0,
            z_off: new_off,
            nn: pre.nn,
            np: pre.np,
        });
        new_off += pre.nn;
    }

    Ok(DiscreteModel {
        nx: raw.nx,
        nu: raw.nu,
        ny: raw.ny,
        a,
        b,
        c,
        x0,
        dy,
        ey,
        fy,
        y0,
        subproblems,
        solvers,
        x: DVector::zeros(raw.nx),
    })
}

/// Root of one sub-problem at its constant q offset, found by homotopy
/// over the q space from the all-zero point (which every practical
/// element satisfies). `None` when the continuation gives up.
pub(crate) fn initial_solution(
    q0: &DVector<f64>,
    fq: &DMatrix<f64>,
    members: &[EqMemberSpec],
    nn: usize,
) -> Option<DVector<f64>> {
    let nq = q0.len();
    let eq = ParametricEq::new(
        DVector::zeros(nq),
        DMatrix::identity(nq, nq),
        fq.clone(),
        members.to_vec(),
    );
    let base = SimpleSolver::new(eq, &DVector::zeros(nq), &DVector::zeros(nn));
    let mut solver = HomotopySolver::new(base);
    let z = solver.solve(q0).clone();
    if solver.has_converged() {
        Some(z)
    } else {
        None
    }
}

fn to_f(m: &RationalMatrix) -> DMatrix<f64> {
    DMatrix::from_fn(m.nrows(), m.ncols(), |i, j| rat_to_f64(&m[(i, j)]))
}

fn to_fv(m: &RationalMatrix) -> DVector<f64> {
    DVector::from_fn(m.nrows(), |i, _| rat_to_f64(&m[(i, 0)]))
}
