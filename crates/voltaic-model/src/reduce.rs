//! Parameter-dimension reduction.
//!
//! Each sub-problem's coupled quantities move inside an affine subspace
//! of its q-space. Rank-factorizing `[dq_full | eq_full | fqprev_full]`
//! finds a minimal parameter; projecting the lift `pexp` onto the
//! orthogonal complement of colspan(fq) then drops the components that
//! merely translate the solver's coordinate.
//!
//! The translation is not free: the solver's `z` ends up shifted by
//! `fq⁺·(dq_full·x + eq_full·u + fqprev_full·z)` relative to the true
//! nullspace coordinate, and the state update, the output, and the
//! coupling into later sub-problems all read `z`. Every shift therefore
//! has a matching compensation:
//!
//! ```text
//! a  -= cₖ·R_d      b  -= cₖ·R_e      c  -= cₖ·R_f
//! dy -= fyₖ·R_d     ey -= fyₖ·R_e     fy -= fyₖ·R_f
//! dq_fullₘ -= Fₘₖ·R_d   (m > k, analogously for eq, fqprev)
//! ```
//!
//! with `R_* = fq⁺ₖ·*_fullₖ` and `Fₘₖ` the block-k column slice of
//! block m's coupling. Influence flows strictly forward through the
//! block order, so one ordered pass settles everything.

use voltaic_core::sparse::SparseMatrix;
use voltaic_solver::exact::{
    pseudo_inverse_full_col, rank_factorize, rmul, rsub_assign, rzeros, RationalMatrix,
};

use crate::assembly::RawMatrices;
use crate::error::{Error, Result};

/// Per-sub-problem matrices, rational, before and after reduction.
#[derive(Debug)]
pub(crate) struct BlockMats {
    /// Global q rows of this block (element q ranges, concatenated).
    pub rows: Vec<usize>,
    pub q0: RationalMatrix,
    pub dq_full: RationalMatrix,
    pub eq_full: RationalMatrix,
    /// Coupling to earlier blocks over the full z space; own-block and
    /// later columns are zero.
    pub fqprev_full: RationalMatrix,
    /// The diagonal coupling block, full column rank.
    pub fq: RationalMatrix,
    // Filled by `reduce_pdims`:
    pub pexp: RationalMatrix,
    pub dq: RationalMatrix,
    pub eq: RationalMatrix,
    pub fqprev: RationalMatrix,
}

impl BlockMats {
    pub fn nq(&self) -> usize {
        self.rows.len()
    }

    pub fn nn(&self) -> usize {
        self.fq.ncols()
    }

    pub fn np(&self) -> usize {
        self.pexp.ncols()
    }
}

/// Reduce every block's parameter dimension, compensating the state,
/// output, and forward-coupling matrices for the induced z shift.
///
/// `offsets[k]` is `(z_offset, nn)` of block k.
pub(crate) fn reduce_pdims(
    blocks: &mut [BlockMats],
    offsets: &[(usize, usize)],
    raw: &mut RawMatrices,
) -> Result<()> {
    for k in 0..blocks.len() {
        let (z_off, nn_k) = offsets[k];
        let nq_k = blocks[k].nq();

        // Minimal parameter: [dq_full | eq_full | fqprev_full] = pexp · parts.
        let mut joined = rzeros(nq_k, raw.nx + raw.nu + raw.nn);
        joined
            .view_mut((0, 0), (nq_k, raw.nx))
            .copy_from(&blocks[k].dq_full);
        joined
            .view_mut((0, raw.nx), (nq_k, raw.nu))
            .copy_from(&blocks[k].eq_full);
        joined
            .view_mut((0, raw.nx + raw.nu), (nq_k, raw.nn))
            .copy_from(&blocks[k].fqprev_full);
        let (pexp, parts) = rank_factorize(&SparseMatrix::from_dense(&joined));
        let np0 = pexp.ncols();
        let dq = parts.view((0, 0), (np0, raw.nx)).into_owned();
        let eq = parts.view((0, raw.nx), (np0, raw.nu)).into_owned();
        let fqprev = parts.view((0, raw.nx + raw.nu), (np0, raw.nn)).into_owned();

        let pinv = pseudo_inverse_full_col(&blocks[k].fq)
            .map_err(|_| Error::RankDeficientCoupling(k))?;

        // Compensation for the z shift the projection below introduces.
        let r_d = rmul(&pinv, &blocks[k].dq_full);
        let r_e = rmul(&pinv, &blocks[k].eq_full);
        let r_f = rmul(&pinv, &blocks[k].fqprev_full);

        let c_k = raw.c.view((0, z_off), (raw.nx, nn_k)).into_owned();
        rsub_assign(&mut raw.a, &rmul(&c_k, &r_d));
        rsub_assign(&mut raw.b, &rmul(&c_k, &r_e));
        rsub_assign(&mut raw.c, &rmul(&c_k, &r_f));
        let fy_k = raw.fy.view((0, z_off), (raw.ny, nn_k)).into_owned();
        rsub_assign(&mut raw.dy, &rmul(&fy_k, &r_d));
        rsub_assign(&mut raw.ey, &rmul(&fy_k, &r_e));
        rsub_assign(&mut raw.fy, &rmul(&fy_k, &r_f));

        for m in k + 1..blocks.len() {
            let nq_m = blocks[m].nq();
            let f_mk = blocks[m]
                .fqprev_full
                .view((0, z_off), (nq_m, nn_k))
                .into_owned();
            rsub_assign(&mut blocks[m].dq_full, &rmul(&f_mk, &r_d));
            rsub_assign(&mut blocks[m].eq_full, &rmul(&f_mk, &r_e));
            rsub_assign(&mut blocks[m].fqprev_full, &rmul(&f_mk, &r_f));
        }

        // Project the lift off colspan(fq); adopt the shorter lift if the
        // projection lost rank.
        let mut pexp_proj = pexp;
        let shift = rmul(&blocks[k].fq, &rmul(&pinv, &pexp_proj));
        rsub_assign(&mut pexp_proj, &shift);
        let (pexp_short, cofactor) = rank_factorize(&SparseMatrix::from_dense(&pexp_proj));
        if pexp_short.ncols() < np0 {
            blocks[k].pexp = pexp_short;
            blocks[k].dq = rmul(&cofactor, &dq);
            blocks[k].eq = rmul(&cofactor, &eq);
            blocks[k].fqprev = rmul(&cofactor, &fqprev);
        } else {
            blocks[k].pexp = pexp_proj;
            blocks[k].dq = dq;
            blocks[k].eq = eq;
            blocks[k].fqprev = fqprev;
        }
    }
    Ok(())
}
