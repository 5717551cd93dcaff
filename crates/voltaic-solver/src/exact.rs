//! Exact linear algebra over rationals.
//!
//! These kernels run at model-compile time only. Working in `BigRational`
//! makes every rank decision exact: a pivot is zero or it is not, so the
//! row reductions cannot lose rank to round-off.

use nalgebra::DMatrix;
use num_traits::{One, Signed, Zero};
use voltaic_core::sparse::SparseMatrix;
use voltaic_core::Rational;

use crate::error::{Error, Result};

/// Dense matrix over exact rationals.
pub type RationalMatrix = DMatrix<Rational>;

/// All-zero rational matrix.
pub fn rzeros(nrows: usize, ncols: usize) -> RationalMatrix {
    RationalMatrix::from_element(nrows, ncols, Rational::zero())
}

/// Rational identity matrix.
pub fn reye(n: usize) -> RationalMatrix {
    RationalMatrix::from_fn(n, n, |i, j| {
        if i == j {
            Rational::one()
        } else {
            Rational::zero()
        }
    })
}

/// Dense rational product `a * b`.
pub fn rmul(a: &RationalMatrix, b: &RationalMatrix) -> RationalMatrix {
    assert_eq!(a.ncols(), b.nrows(), "rational product dimension mismatch");
    let mut out = rzeros(a.nrows(), b.ncols());
    for k in 0..a.ncols() {
        for j in 0..b.ncols() {
            if b[(k, j)].is_zero() {
                continue;
            }
            for i in 0..a.nrows() {
                if !a[(i, k)].is_zero() {
                    out[(i, j)] += &a[(i, k)] * &b[(k, j)];
                }
            }
        }
    }
    out
}

/// In-place `a -= b`.
pub fn rsub_assign(a: &mut RationalMatrix, b: &RationalMatrix) {
    assert_eq!(a.shape(), b.shape(), "rational sum dimension mismatch");
    for j in 0..a.ncols() {
        for i in 0..a.nrows() {
            if !b[(i, j)].is_zero() {
                a[(i, j)] -= &b[(i, j)];
            }
        }
    }
}

/// Solve `A·(X + H·k) = B` for a particular solution `X` and a basis `H`
/// of the null space of `A`, starting from `X = 0`, `H = I`.
///
/// Rows of `A` are visited in ascending nonzero count. For each row the
/// pivot is the null-space column with the fewest nonzeros among those
/// whose projection is at least a tenth of the largest, which keeps `H`
/// sparse. Rows whose projection onto the remaining null space vanishes
/// are redundant (or inconsistent) and are skipped.
pub fn gensolve(a: &SparseMatrix, b: &SparseMatrix) -> (RationalMatrix, RationalMatrix) {
    assert_eq!(a.nrows(), b.nrows(), "gensolve row count mismatch");
    let m = a.nrows();
    let n = a.ncols();
    let bc = b.ncols();

    let at = a.transpose();
    let bt = b.transpose();
    let mut x = rzeros(n, bc);
    let mut h = reye(n);

    let nnz = a.row_nnz();
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by_key(|&i| nnz[i]);

    let tenth = Rational::new(1.into(), 10.into());

    for &i in &order {
        let hc = h.ncols();
        if hc == 0 {
            break;
        }

        // s = a_i · H
        let mut s = vec![Rational::zero(); hc];
        for (k, v) in at.col(i) {
            for (j, sj) in s.iter_mut().enumerate() {
                if !h[(k, j)].is_zero() {
                    *sj += v * &h[(k, j)];
                }
            }
        }
        let mut max_abs = Rational::zero();
        for sj in &s {
            let mag = sj.abs();
            if mag > max_abs {
                max_abs = mag;
            }
        }
        if max_abs.is_zero() {
            continue;
        }

        let thresh = &max_abs * &tenth;
        let mut pivot = usize::MAX;
        let mut pivot_nnz = usize::MAX;
        for (j, sj) in s.iter().enumerate() {
            if sj.abs() >= thresh {
                let count = (0..n).filter(|&r| !h[(r, j)].is_zero()).count();
                if count < pivot_nnz {
                    pivot_nnz = count;
                    pivot = j;
                }
            }
        }
        let j = pivot;
        let sj = s[j].clone();
        let q: Vec<Rational> = (0..n).map(|r| h[(r, j)].clone()).collect();

        // X += q · (b_i - a_i·X) / s_j
        let mut w = vec![Rational::zero(); bc];
        for (c, v) in bt.col(i) {
            w[c] = v.clone();
        }
        for (k, v) in at.col(i) {
            for (c, wc) in w.iter_mut().enumerate() {
                if !x[(k, c)].is_zero() {
                    *wc -= v * &x[(k, c)];
                }
            }
        }
        for (c, wc) in w.iter().enumerate() {
            if wc.is_zero() {
                continue;
            }
            let f = wc / &sj;
            for (r, qr) in q.iter().enumerate() {
                if !qr.is_zero() {
                    x[(r, c)] += qr * &f;
                }
            }
        }

        // H <- H without column j, remaining columns deflated by q
        for jj in 0..hc {
            if jj == j || s[jj].is_zero() {
                continue;
            }
            let f = &s[jj] / &sj;
            for (r, qr) in q.iter().enumerate() {
                if !qr.is_zero() {
                    h[(r, jj)] -= qr * &f;
                }
            }
        }
        h = h.remove_column(j);
    }

    (x, h)
}

/// Basis of the null space of `a`.
pub fn nullspace(a: &SparseMatrix) -> RationalMatrix {
    gensolve(a, &SparseMatrix::zeros(a.nrows(), 0)).1
}

/// Rank of `a`, via the dimension of its null space.
pub fn rank(a: &SparseMatrix) -> usize {
    a.ncols() - nullspace(a).ncols()
}

/// Factor `a = c · f` with `f` of full row rank.
///
/// Left-null directions of `a` are eliminated one pivot at a time: each
/// one removes a row of `f` and the matching column of `c` while keeping
/// the product exact.
pub fn rank_factorize(a: &SparseMatrix) -> (RationalMatrix, RationalMatrix) {
    let mut f = a.to_dense();
    let mut c = reye(a.nrows());
    let mut ns = nullspace(&a.transpose());

    while ns.ncols() > 0 {
        let (mut pi, mut pj) = (0, 0);
        let mut best = Rational::zero();
        for j in 0..ns.ncols() {
            for i in 0..ns.nrows() {
                let mag = ns[(i, j)].abs();
                if mag > best {
                    best = mag;
                    pi = i;
                    pj = j;
                }
            }
        }
        debug_assert!(!best.is_zero(), "null basis contains a zero column");
        let piv = ns[(pi, pj)].clone();

        // Fold row pi of f into the other columns of c, then drop it.
        let ccol: Vec<Rational> = (0..c.nrows()).map(|r| c[(r, pi)].clone()).collect();
        for jj in 0..c.ncols() {
            if jj == pi {
                continue;
            }
            let factor = &ns[(jj, pj)] / &piv;
            if factor.is_zero() {
                continue;
            }
            for (r, cr) in ccol.iter().enumerate() {
                if !cr.is_zero() {
                    c[(r, jj)] -= cr * &factor;
                }
            }
        }
        c = c.remove_column(pi);
        f = f.remove_row(pi);

        // Deflate the remaining null directions and drop the pivot.
        let pcol: Vec<Rational> = (0..ns.nrows()).map(|r| ns[(r, pj)].clone()).collect();
        for m in 0..ns.ncols() {
            if m == pj {
                continue;
            }
            let factor = &ns[(pi, m)] / &piv;
            if factor.is_zero() {
                continue;
            }
            for (r, pr) in pcol.iter().enumerate() {
                if !pr.is_zero() {
                    ns[(r, m)] -= pr * &factor;
                }
            }
        }
        ns = ns.remove_column(pj).remove_row(pi);
    }

    (c, f)
}

/// `(fqᵀ·fq)⁻¹·fqᵀ` for a full-column-rank `fq`.
///
/// Fails with [`Error::SingularMatrix`] when `fq` does not have full
/// column rank (the Gram matrix is then singular).
pub fn pseudo_inverse_full_col(fq: &RationalMatrix) -> Result<RationalMatrix> {
    let fqt = fq.transpose();
    let gram = rmul(&fqt, fq);
    let (x, _) = gensolve(
        &SparseMatrix::from_dense(&gram),
        &SparseMatrix::from_dense(&fqt),
    );
    if rmul(&gram, &x) != fqt {
        return Err(Error::SingularMatrix);
    }
    Ok(x)
}
