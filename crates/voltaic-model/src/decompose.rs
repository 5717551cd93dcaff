//! Nonlinearity decomposition.
//!
//! Finds an invertible right transform of the nonlinear coupling matrix
//! `fq` that splits its columns into blocks, one per subset of nonlinear
//! elements, such that each subset's rows touch only its own block and
//! earlier ones. The runtime can then solve the sub-problems smallest
//! first, feeding each solution forward.

use num_traits::Zero;
use voltaic_solver::exact::{reye, rmul, RationalMatrix};

/// One nonlinear element's place in the global q/z index spaces.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NlElem {
    /// Index into the circuit's element list.
    pub index: usize,
    /// First global q row of this element.
    pub q_off: usize,
    pub nq: usize,
    pub nn: usize,
}

/// Decompose `fq`, applying every accepted column transform to `c` and
/// `fy` as well (they share the z index space). Returns the extracted
/// subsets as indices into `elems`, in solve order.
pub(crate) fn nldecompose(
    fq: &mut RationalMatrix,
    c: &mut RationalMatrix,
    fy: &mut RationalMatrix,
    elems: &[NlElem],
    decompose: bool,
) -> Vec<Vec<usize>> {
    if elems.is_empty() {
        return Vec::new();
    }
    if !decompose {
        return vec![(0..elems.len()).collect()];
    }

    let mut remaining: Vec<usize> = (0..elems.len()).collect();
    let mut subsets = Vec::new();
    let mut col_off = 0;

    while !remaining.is_empty() {
        let mut accepted: Option<(Vec<usize>, usize)> = None;
        'sizes: for sz in 1..=remaining.len() {
            for combo in combinations(remaining.len(), sz) {
                let subset: Vec<usize> = combo.iter().map(|&i| remaining[i]).collect();
                let nn_s: usize = subset.iter().map(|&e| elems[e].nn).sum();
                let rows: Vec<usize> = subset
                    .iter()
                    .flat_map(|&e| elems[e].q_off..elems[e].q_off + elems[e].nq)
                    .collect();
                let width = fq.ncols() - col_off;
                let sub = RationalMatrix::from_fn(rows.len(), width, |r, cc| {
                    fq[(rows[r], col_off + cc)].clone()
                });
                if let Some(transform) = tryextract(&sub, nn_s) {
                    apply_trailing(fq, col_off, &transform);
                    apply_trailing(c, col_off, &transform);
                    apply_trailing(fy, col_off, &transform);
                    accepted = Some((combo, nn_s));
                    break 'sizes;
                }
            }
        }
        // The full remaining set always extracts (its rows span exactly
        // the remaining columns), so `accepted` is never empty here.
        let Some((combo, nn_s)) = accepted else {
            subsets.push(remaining.clone());
            break;
        };
        let subset: Vec<usize> = combo.iter().map(|&i| remaining[i]).collect();
        for &i in combo.iter().rev() {
            remaining.remove(i);
        }
        subsets.push(subset);
        col_off += nn_s;
    }
    subsets
}

/// Search for an invertible column transform that confines `sub`'s
/// nonzeros to its first `numcols` columns. Succeeds iff the column rank
/// of `sub` is at most `numcols`; the transform is accumulated by exact
/// Gauss-Jordan elimination on the columns.
fn tryextract(sub: &RationalMatrix, numcols: usize) -> Option<RationalMatrix> {
    let n = sub.ncols();
    if n == numcols {
        return Some(reye(n));
    }
    let mut w = sub.clone();
    let mut a = reye(n);
    let mut rank = 0;
    for row in 0..w.nrows() {
        let Some(pc) = (rank..n).find(|&cc| !w[(row, cc)].is_zero()) else {
            continue;
        };
        if rank == numcols {
            // One pivot too many: this subset needs more columns than it
            // brings unknowns.
            return None;
        }
        w.swap_columns(rank, pc);
        a.swap_columns(rank, pc);
        let piv = w[(row, rank)].clone();
        for cc in rank + 1..n {
            let f = &w[(row, cc)] / &piv;
            if f.is_zero() {
                continue;
            }
            for rr in 0..w.nrows() {
                let s = &w[(rr, rank)] * &f;
                if !s.is_zero() {
                    w[(rr, cc)] -= s;
                }
            }
            for rr in 0..n {
                let s = &a[(rr, rank)] * &f;
                if !s.is_zero() {
                    a[(rr, cc)] -= s;
                }
            }
        }
        rank += 1;
    }
    Some(a)
}

/// `m[:, col_off..] ← m[:, col_off..] · t`.
fn apply_trailing(m: &mut RationalMatrix, col_off: usize, t: &RationalMatrix) {
    let width = m.ncols() - col_off;
    assert_eq!(t.nrows(), width);
    let trailing = m.view((0, col_off), (m.nrows(), width)).into_owned();
    let product = rmul(&trailing, t);
    m.view_mut((0, col_off), (m.nrows(), width)).copy_from(&product);
}

/// All k-subsets of `0..n` in lexicographic order.
fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    let mut current = Vec::with_capacity(k);
    fn rec(start: usize, n: usize, k: usize, current: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if current.len() == k {
            out.push(current.clone());
            return;
        }
        for i in start..n {
            current.push(i);
            rec(i + 1, n, k, current, out);
            current.pop();
        }
    }
    rec(0, n, k, &mut current, &mut out);
    out
}
