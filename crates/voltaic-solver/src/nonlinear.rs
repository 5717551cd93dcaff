//! Nonlinear solver stack.
//!
//! A compiled sub-problem is a [`ParametricEq`]: a stack of element
//! residuals whose coupled quantities are an affine function of a small
//! parameter `p` and the unknown `z`,
//!
//! ```text
//! q = q0 + pexp·p + fq·z        res(q) = 0
//! ```
//!
//! Solvers implement [`NonlinearSolver`]: given `p` and the previous
//! solution as seed, find `z` with `‖res‖∞` below tolerance. The stack is
//! built from three layers:
//!
//! - [`SimpleSolver`] - damped Newton with a cached LU factorization and
//!   first-order seed extrapolation between calls,
//! - [`CachingSolver`] - warm starts from the nearest previously-solved
//!   parameter, held in a K-D tree,
//! - [`HomotopySolver`] - continuation from the last known-good parameter
//!   when the direct attempt fails.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use voltaic_core::Nonlinearity;

use crate::kdtree::KdTree;
use crate::linear::LinearSolver;

/// Default residual tolerance (infinity norm).
pub const DEFAULT_RESABSTOL: f64 = 1e-10;

/// Iteration budget of the damped Newton loop.
pub const MAX_ITERATIONS: usize = 500;

const ALPHA_MIN: f64 = 1.0 / 64.0;

/// One element's share of a sub-problem residual.
#[derive(Clone)]
pub struct EqMemberSpec {
    pub law: Arc<dyn Nonlinearity>,
    /// Offset of the element's `q` values within the sub-problem.
    pub q_offset: usize,
    /// Offset of the element's residual rows within the sub-problem.
    pub res_offset: usize,
}

struct EqMember {
    law: Arc<dyn Nonlinearity>,
    q_off: usize,
    nq: usize,
    res_off: usize,
    nn: usize,
    /// Scratch for ∂res/∂q, reused by `eval` and `calc_jp`.
    jq: DMatrix<f64>,
}

/// The residual object handed to a solver: `res(q0 + pexp·p + fq·z) = 0`.
pub struct ParametricEq {
    nn: usize,
    np: usize,
    nq: usize,
    q0: DVector<f64>,
    pexp: DMatrix<f64>,
    fq: DMatrix<f64>,
    members: Vec<EqMember>,
    /// `q0 + pexp·p` of the current parameter.
    p_full: DVector<f64>,
    q: DVector<f64>,
}

impl ParametricEq {
    /// Assemble a sub-problem residual.
    ///
    /// # Panics
    ///
    /// Panics when the member layout does not tile the `q` and residual
    /// spaces implied by the matrix dimensions.
    pub fn new(
        q0: DVector<f64>,
        pexp: DMatrix<f64>,
        fq: DMatrix<f64>,
        members: Vec<EqMemberSpec>,
    ) -> Self {
        let nq = q0.len();
        assert_eq!(pexp.nrows(), nq, "pexp row count");
        assert_eq!(fq.nrows(), nq, "fq row count");
        let np = pexp.ncols();
        let nn = fq.ncols();

        let members: Vec<EqMember> = members
            .into_iter()
            .map(|m| {
                let (mnn, mnq) = m.law.dims();
                assert!(m.q_offset + mnq <= nq, "member q range");
                assert!(m.res_offset + mnn <= nn, "member residual range");
                EqMember {
                    law: m.law,
                    q_off: m.q_offset,
                    nq: mnq,
                    res_off: m.res_offset,
                    nn: mnn,
                    jq: DMatrix::zeros(mnn, mnq),
                }
            })
            .collect();
        let covered: usize = members.iter().map(|m| m.nn).sum();
        assert_eq!(covered, nn, "members must cover the residual");

        Self {
            nn,
            np,
            nq,
            q0,
            pexp,
            fq,
            members,
            p_full: DVector::zeros(nq),
            q: DVector::zeros(nq),
        }
    }

    pub fn nn(&self) -> usize {
        self.nn
    }

    pub fn np(&self) -> usize {
        self.np
    }

    pub fn nq(&self) -> usize {
        self.nq
    }

    /// Install the parameter: `p_full = q0 + pexp·p`.
    pub fn set_p(&mut self, p: &DVector<f64>) {
        self.p_full.copy_from(&self.q0);
        self.p_full.gemv(1.0, &self.pexp, p, 1.0);
    }

    /// Residual and Jacobian `∂res/∂z` at `z`, under the parameter last
    /// installed by [`set_p`](Self::set_p).
    pub fn eval(&mut self, z: &DVector<f64>, res: &mut DVector<f64>, j: &mut DMatrix<f64>) {
        self.q.copy_from(&self.p_full);
        self.q.gemv(1.0, &self.fq, z, 1.0);
        for m in &mut self.members {
            let q = &self.q.as_slice()[m.q_off..m.q_off + m.nq];
            let r = &mut res.as_mut_slice()[m.res_off..m.res_off + m.nn];
            m.law.eval(q, r, m.jq.as_mut_slice());
            j.view_mut((m.res_off, 0), (m.nn, self.nn)).gemm(
                1.0,
                &m.jq,
                &self.fq.view((m.q_off, 0), (m.nq, self.nn)),
                0.0,
            );
        }
    }

    /// `∂res/∂p = (∂res/∂q)·pexp`, from the Jacobian blocks of the last
    /// [`eval`](Self::eval).
    pub fn calc_jp(&self, jp: &mut DMatrix<f64>) {
        for m in &self.members {
            jp.view_mut((m.res_off, 0), (m.nn, self.np)).gemm(
                1.0,
                &m.jq,
                &self.pexp.view((m.q_off, 0), (m.nq, self.np)),
                0.0,
            );
        }
    }
}

/// Contract shared by every nonlinear solver layer.
///
/// `solve` seeds from the previous solution (or an extrapolation of it)
/// and reports convergence through [`has_converged`](Self::has_converged)
/// rather than an error: the caller decides whether a non-converged but
/// finite result is usable.
pub trait NonlinearSolver {
    fn solve(&mut self, p: &DVector<f64>) -> &DVector<f64>;

    /// The solution of the last `solve` call.
    fn z(&self) -> &DVector<f64>;

    fn has_converged(&self) -> bool;

    /// Work performed by the last `solve` call.
    fn iterations(&self) -> usize;

    fn set_resabstol(&mut self, tol: f64);

    /// Install a known-good `(p, z)` pair as seed and anchor.
    fn set_origin(&mut self, p: &DVector<f64>, z: &DVector<f64>);

    fn origin_p(&self) -> &DVector<f64>;

    fn origin_z(&self) -> &DVector<f64>;

    fn np(&self) -> usize;

    fn nn(&self) -> usize;
}

/// Damped Newton iteration with a cached LU factorization.
///
/// Between calls the solver keeps the Jacobians of its last converged
/// point and extrapolates the seed to first order in the parameter
/// change. The damping factor starts at one for every call and adapts to
/// the observed residual reduction.
pub struct SimpleSolver {
    eq: ParametricEq,
    z: DVector<f64>,
    res: DVector<f64>,
    j: DMatrix<f64>,
    jp: DMatrix<f64>,
    dz: DVector<f64>,
    dp: DVector<f64>,
    rhs: DVector<f64>,
    lin: LinearSolver,
    origin_p: DVector<f64>,
    origin_z: DVector<f64>,
    origin_valid: bool,
    resabstol: f64,
    iters: usize,
    converged: bool,
}

impl SimpleSolver {
    pub fn new(eq: ParametricEq, p0: &DVector<f64>, z0: &DVector<f64>) -> Self {
        let nn = eq.nn();
        let np = eq.np();
        assert_eq!(p0.len(), np);
        assert_eq!(z0.len(), nn);
        let mut solver = Self {
            z: DVector::zeros(nn),
            res: DVector::zeros(nn),
            j: DMatrix::zeros(nn, nn),
            jp: DMatrix::zeros(nn, np),
            dz: DVector::zeros(nn),
            dp: DVector::zeros(np),
            rhs: DVector::zeros(nn),
            lin: LinearSolver::new(nn),
            origin_p: p0.clone(),
            origin_z: z0.clone(),
            origin_valid: false,
            resabstol: DEFAULT_RESABSTOL,
            iters: 0,
            converged: false,
            eq,
        };
        solver.set_origin(p0, z0);
        solver.z.copy_from(z0);
        solver
    }
}

impl NonlinearSolver for SimpleSolver {
    fn solve(&mut self, p: &DVector<f64>) -> &DVector<f64> {
        self.converged = false;
        self.iters = 0;
        if self.eq.nn() == 0 {
            self.converged = true;
            return &self.z;
        }

        self.z.copy_from(&self.origin_z);
        if self.origin_valid && self.eq.np() > 0 {
            // First-order seed: z ≈ z₀ - J⁻¹·Jp·(p - p₀).
            self.dp.copy_from(p);
            self.dp -= &self.origin_p;
            self.rhs.gemv(1.0, &self.jp, &self.dp, 0.0);
            self.lin.solve(&mut self.dz, &self.rhs);
            self.z -= &self.dz;
        }

        self.eq.set_p(p);
        let mut alpha = 1.0f64;
        let mut prev_norm = f64::INFINITY;
        for it in 0..MAX_ITERATIONS {
            self.iters = it + 1;
            self.eq.eval(&self.z, &mut self.res, &mut self.j);
            let norm = self.res.amax();
            if !norm.is_finite() {
                break;
            }
            if norm <= self.resabstol {
                self.converged = true;
                break;
            }
            if it > 0 {
                if norm <= 0.5 * prev_norm {
                    alpha = (2.0 * alpha).min(1.0);
                } else {
                    alpha = (0.5 * alpha).max(ALPHA_MIN);
                }
            }
            prev_norm = norm;
            if !self.lin.setlhs(&self.j) {
                break;
            }
            self.lin.solve(&mut self.dz, &self.res);
            self.z.axpy(-alpha, &self.dz, 1.0);
        }

        if self.converged {
            // Refresh the extrapolation origin at the solution.
            self.origin_valid = self.lin.setlhs(&self.j);
            if self.origin_valid {
                self.eq.calc_jp(&mut self.jp);
            }
            self.origin_p.copy_from(p);
            self.origin_z.copy_from(&self.z);
        } else {
            // The factorization no longer matches the origin Jacobians;
            // seed the next call from the origin point itself.
            self.origin_valid = false;
        }
        &self.z
    }

    fn z(&self) -> &DVector<f64> {
        &self.z
    }

    fn has_converged(&self) -> bool {
        self.converged
    }

    fn iterations(&self) -> usize {
        self.iters
    }

    fn set_resabstol(&mut self, tol: f64) {
        self.resabstol = tol;
    }

    fn set_origin(&mut self, p: &DVector<f64>, z: &DVector<f64>) {
        if self.eq.nn() > 0 {
            self.eq.set_p(p);
            self.eq.eval(z, &mut self.res, &mut self.j);
            self.origin_valid = self.lin.setlhs(&self.j);
            if self.origin_valid {
                self.eq.calc_jp(&mut self.jp);
            }
        }
        self.origin_p.copy_from(p);
        self.origin_z.copy_from(z);
    }

    fn origin_p(&self) -> &DVector<f64> {
        &self.origin_p
    }

    fn origin_z(&self) -> &DVector<f64> {
        &self.origin_z
    }

    fn np(&self) -> usize {
        self.eq.np()
    }

    fn nn(&self) -> usize {
        self.eq.nn()
    }
}

/// Default capacity of the caching solver's parameter store.
pub const CACHE_CAPACITY: usize = 4096;

/// Warm-starts a base solver from the nearest previously-solved
/// parameter.
///
/// Solutions are inserted only when they were expensive (the base solver
/// needed more than a handful of iterations) and genuinely new (farther
/// than a minimum separation from the nearest cached parameter); cheap
/// solves mean the cache already had a good seed nearby.
pub struct CachingSolver<S> {
    base: S,
    tree: KdTree,
    ps: Vec<DVector<f64>>,
    zs: Vec<DVector<f64>>,
    last_seed: Option<usize>,
    min_separation: f64,
    iteration_gate: usize,
    converged: bool,
}

impl<S: NonlinearSolver> CachingSolver<S> {
    pub fn new(base: S) -> Self {
        let p0 = base.origin_p().clone();
        let z0 = base.origin_z().clone();
        let mut tree = KdTree::with_capacity(p0.len(), CACHE_CAPACITY);
        tree.insert(p0.as_slice(), 0);
        Self {
            base,
            tree,
            ps: vec![p0],
            zs: vec![z0],
            last_seed: Some(0),
            min_separation: 1e-12,
            iteration_gate: 5,
            converged: false,
        }
    }

    /// Number of cached parameter/solution pairs.
    pub fn cache_len(&self) -> usize {
        self.tree.len()
    }
}

impl<S: NonlinearSolver> NonlinearSolver for CachingSolver<S> {
    fn solve(&mut self, p: &DVector<f64>) -> &DVector<f64> {
        let seed = self.tree.nearest(p.as_slice());
        if let Some((item, _)) = seed {
            if self.last_seed != Some(item) {
                self.base.set_origin(&self.ps[item], &self.zs[item]);
                self.last_seed = Some(item);
            }
        }
        self.base.solve(p);
        self.converged = self.base.has_converged();

        if self.converged && self.base.iterations() > self.iteration_gate {
            let far_enough = seed
                .map(|(_, d2)| d2.sqrt() > self.min_separation)
                .unwrap_or(true);
            if far_enough {
                let id = self.ps.len();
                self.ps.push(p.clone());
                self.zs.push(self.base.z().clone());
                if let Some(evicted) = self.tree.insert(p.as_slice(), id) {
                    // Reclaim the retired entry's buffers.
                    self.ps[evicted] = DVector::zeros(0);
                    self.zs[evicted] = DVector::zeros(0);
                }
                self.last_seed = Some(id);
            }
        }
        self.base.z()
    }

    fn z(&self) -> &DVector<f64> {
        self.base.z()
    }

    fn has_converged(&self) -> bool {
        self.converged
    }

    fn iterations(&self) -> usize {
        self.base.iterations()
    }

    fn set_resabstol(&mut self, tol: f64) {
        self.base.set_resabstol(tol);
    }

    fn set_origin(&mut self, p: &DVector<f64>, z: &DVector<f64>) {
        self.base.set_origin(p, z);
        self.last_seed = None;
    }

    fn origin_p(&self) -> &DVector<f64> {
        self.base.origin_p()
    }

    fn origin_z(&self) -> &DVector<f64> {
        self.base.origin_z()
    }

    fn np(&self) -> usize {
        self.base.np()
    }

    fn nn(&self) -> usize {
        self.base.nn()
    }
}

const MIN_HOMOTOPY_STEP: f64 = 1.0 / 1_048_576.0; // 2⁻²⁰

/// Parameter continuation around a base solver.
///
/// The direct attempt runs first. On failure the parameter is walked from
/// the base solver's last known-good anchor toward the target along
/// `p(λ) = (1-λ)·p_anchor + λ·p_target`, halving the step on failure and
/// doubling it on success, carrying each intermediate solution forward as
/// the next seed.
pub struct HomotopySolver<S> {
    base: S,
    start_p: DVector<f64>,
    pa: DVector<f64>,
    converged: bool,
    iters: usize,
}

impl<S: NonlinearSolver> HomotopySolver<S> {
    pub fn new(base: S) -> Self {
        let np = base.np();
        Self {
            base,
            start_p: DVector::zeros(np),
            pa: DVector::zeros(np),
            converged: false,
            iters: 0,
        }
    }
}

impl<S: NonlinearSolver> NonlinearSolver for HomotopySolver<S> {
    fn solve(&mut self, p: &DVector<f64>) -> &DVector<f64> {
        self.iters = 1;
        self.base.solve(p);
        self.converged = self.base.has_converged();
        if self.converged {
            return self.base.z();
        }

        self.start_p.copy_from(self.base.origin_p());
        let mut lambda_good = 0.0f64;
        let mut step = 0.5f64;
        loop {
            let lambda = (lambda_good + step).min(1.0);
            self.pa.copy_from(&self.start_p);
            self.pa *= 1.0 - lambda;
            self.pa.axpy(lambda, p, 1.0);

            self.iters += 1;
            self.base.solve(&self.pa);
            if self.base.has_converged() {
                if lambda >= 1.0 {
                    self.converged = true;
                    break;
                }
                lambda_good = lambda;
                step *= 2.0;
            } else {
                step *= 0.5;
                if step < MIN_HOMOTOPY_STEP {
                    break;
                }
            }
        }
        self.base.z()
    }

    fn z(&self) -> &DVector<f64> {
        self.base.z()
    }

    fn has_converged(&self) -> bool {
        self.converged
    }

    fn iterations(&self) -> usize {
        self.iters
    }

    fn set_resabstol(&mut self, tol: f64) {
        self.base.set_resabstol(tol);
    }

    fn set_origin(&mut self, p: &DVector<f64>, z: &DVector<f64>) {
        self.base.set_origin(p, z);
    }

    fn origin_p(&self) -> &DVector<f64> {
        self.base.origin_p()
    }

    fn origin_z(&self) -> &DVector<f64> {
        self.base.origin_z()
    }

    fn np(&self) -> usize {
        self.base.np()
    }

    fn nn(&self) -> usize {
        self.base.nn()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    /// res = z² - 1 + p, expressed over q = (p, z).
    struct Circle;

    impl Nonlinearity for Circle {
        fn dims(&self) -> (usize, usize) {
            (1, 2)
        }

        fn eval(&self, q: &[f64], res: &mut [f64], jq: &mut [f64]) {
            res[0] = q[1] * q[1] - 1.0 + q[0];
            jq[0] = 1.0;
            jq[1] = 2.0 * q[1];
        }
    }

    fn circle_eq() -> ParametricEq {
        let q0 = DVector::zeros(2);
        let pexp = DMatrix::from_column_slice(2, 1, &[1.0, 0.0]);
        let fq = DMatrix::from_column_slice(2, 1, &[0.0, 1.0]);
        ParametricEq::new(
            q0,
            pexp,
            fq,
            vec![EqMemberSpec {
                law: Arc::new(Circle),
                q_offset: 0,
                res_offset: 0,
            }],
        )
    }

    fn anchored_simple() -> SimpleSolver {
        // z = 1 solves the equation at p = 0.
        SimpleSolver::new(circle_eq(), &dvector![0.0], &dvector![1.0])
    }

    #[test]
    fn test_simple_solver_converges() {
        let mut solver = anchored_simple();
        let z = solver.solve(&dvector![0.5]).clone();
        assert!(solver.converged);
        assert!((z[0] - 0.5f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_simple_solver_tracks_parameter() {
        let mut solver = anchored_simple();
        for i in 0..100 {
            let p = dvector![0.9 * (i as f64) / 100.0];
            solver.solve(&p);
            assert!(solver.has_converged(), "failed at p = {}", p[0]);
        }
        // Warm seeds keep the iteration count small on a smooth sweep.
        assert!(solver.iterations() < 10);
    }

    #[test]
    fn test_homotopy_near_fold() {
        let mut solver = HomotopySolver::new(anchored_simple());
        let z = solver.solve(&dvector![0.999_999]).clone();
        assert!(solver.has_converged());
        assert!((z[0] - 0.001).abs() < 1e-6);
    }

    #[test]
    fn test_homotopy_fails_past_fold() {
        let mut solver = HomotopySolver::new(anchored_simple());
        solver.solve(&dvector![2.0]);
        assert!(!solver.has_converged(), "no real solution for p > 1");
    }

    #[test]
    fn test_caching_solver_correctness() {
        let mut plain = anchored_simple();
        let mut cached = CachingSolver::new(anchored_simple());
        for i in 0..200 {
            let p = dvector![0.99 * ((i * 37) % 100) as f64 / 100.0];
            let a = plain.solve(&p)[0];
            let b = cached.solve(&p)[0];
            assert!(cached.has_converged());
            assert!((a - b).abs() < 1e-8, "p = {}: {a} vs {b}", p[0]);
        }
    }

    #[test]
    fn test_parametric_eq_jacobians() {
        let mut eq = circle_eq();
        eq.set_p(&dvector![0.25]);
        let mut res = DVector::zeros(1);
        let mut j = DMatrix::zeros(1, 1);
        eq.eval(&dvector![2.0], &mut res, &mut j);
        assert!((res[0] - (4.0 - 1.0 + 0.25)).abs() < 1e-15);
        assert!((j[(0, 0)] - 4.0).abs() < 1e-15);

        let mut jp = DMatrix::zeros(1, 1);
        eq.calc_jp(&mut jp);
        assert!((jp[(0, 0)] - 1.0).abs() < 1e-15);
    }
}
