//! Dense LU factorization with a reusable, allocation-free solve path.

use nalgebra::{DMatrix, DVector};

/// LU factorization with partial pivoting over a fixed dimension.
///
/// The factor storage and pivot vector are allocated once; `setlhs`
/// refactors in place so the per-sample loop never allocates. A singular
/// left-hand side is reported by `setlhs` returning `false`, leaving the
/// previous factorization unusable until the next successful call.
#[derive(Debug, Clone)]
pub struct LinearSolver {
    n: usize,
    lu: DMatrix<f64>,
    piv: Vec<usize>,
    ok: bool,
}

impl LinearSolver {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            lu: DMatrix::zeros(n, n),
            piv: vec![0; n],
            ok: false,
        }
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    /// Whether the last `setlhs` produced a usable factorization.
    pub fn is_factorized(&self) -> bool {
        self.ok
    }

    /// Install and factor a new left-hand side. Returns `false` when the
    /// matrix is singular; no error is raised.
    pub fn setlhs(&mut self, a: &DMatrix<f64>) -> bool {
        assert_eq!(a.nrows(), self.n);
        assert_eq!(a.ncols(), self.n);
        self.lu.copy_from(a);
        self.ok = true;
        for k in 0..self.n {
            let mut p = k;
            let mut best = self.lu[(k, k)].abs();
            for i in k + 1..self.n {
                let cand = self.lu[(i, k)].abs();
                if cand > best {
                    best = cand;
                    p = i;
                }
            }
            if best == 0.0 || !best.is_finite() {
                self.ok = false;
                return false;
            }
            self.piv[k] = p;
            if p != k {
                self.lu.swap_rows(p, k);
            }
            let d = self.lu[(k, k)];
            for i in k + 1..self.n {
                self.lu[(i, k)] /= d;
                let l = self.lu[(i, k)];
                if l != 0.0 {
                    for j in k + 1..self.n {
                        let u = self.lu[(k, j)];
                        self.lu[(i, j)] -= l * u;
                    }
                }
            }
        }
        true
    }

    /// Solve `A·y = x` into `y`. `y` and `x` may alias via
    /// [`solve_in_place`](Self::solve_in_place).
    pub fn solve(&self, y: &mut DVector<f64>, x: &DVector<f64>) {
        y.copy_from(x);
        self.solve_in_place(y);
    }

    /// Solve `A·y = y` in place using the cached factorization.
    pub fn solve_in_place(&self, y: &mut DVector<f64>) {
        debug_assert!(self.ok, "solve without a valid factorization");
        assert_eq!(y.len(), self.n);
        for k in 0..self.n {
            let p = self.piv[k];
            if p != k {
                y.swap_rows(k, p);
            }
        }
        // L has unit diagonal.
        for i in 1..self.n {
            let mut acc = y[i];
            for j in 0..i {
                acc -= self.lu[(i, j)] * y[j];
            }
            y[i] = acc;
        }
        for i in (0..self.n).rev() {
            let mut acc = y[i];
            for j in i + 1..self.n {
                acc -= self.lu[(i, j)] * y[j];
            }
            y[i] = acc / self.lu[(i, i)];
        }
    }
}
