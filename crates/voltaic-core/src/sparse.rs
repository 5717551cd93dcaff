//! Compressed-column sparse matrices over exact rationals.
//!
//! The model compiler does all of its row reduction in `BigRational`
//! arithmetic so that rank decisions are exact. Only a small set of
//! operations is needed: block assembly, multiplication, transposition,
//! column manipulation, nonzero bookkeeping, and conversion to dense.

use nalgebra::DMatrix;
use num_traits::{One, Signed, Zero};

use crate::Rational;

/// A sparse matrix in compressed-column form with `BigRational` entries.
///
/// Stored zeros are never kept: every explicit entry is nonzero.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    nrows: usize,
    ncols: usize,
    /// Column start offsets, length `ncols + 1`.
    col_ptr: Vec<usize>,
    /// Row index per stored entry, sorted within each column.
    row_idx: Vec<usize>,
    values: Vec<Rational>,
}

impl SparseMatrix {
    /// An all-zero matrix.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            col_ptr: vec![0; ncols + 1],
            row_idx: Vec::new(),
            values: Vec::new(),
        }
    }

    /// The n-by-n identity.
    pub fn identity(n: usize) -> Self {
        Self {
            nrows: n,
            ncols: n,
            col_ptr: (0..=n).collect(),
            row_idx: (0..n).collect(),
            values: vec![Rational::one(); n],
        }
    }

    /// Build from `(row, col, value)` triplets. Duplicate positions are
    /// summed; entries that are (or sum to) zero are dropped.
    ///
    /// # Panics
    ///
    /// Panics if any index is out of range.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        triplets: &[(usize, usize, Rational)],
    ) -> Self {
        for &(r, c, _) in triplets {
            assert!(r < nrows && c < ncols, "triplet ({r}, {c}) out of range");
        }
        let mut sorted = triplets.to_vec();
        sorted.sort_by(|a, b| (a.1, a.0).cmp(&(b.1, b.0)));

        let mut merged: Vec<(usize, usize, Rational)> = Vec::with_capacity(sorted.len());
        for (r, c, v) in sorted {
            match merged.last_mut() {
                Some(last) if last.0 == r && last.1 == c => last.2 += v,
                _ => merged.push((r, c, v)),
            }
        }

        let mut col_ptr = vec![0usize; ncols + 1];
        let mut row_idx = Vec::with_capacity(merged.len());
        let mut values = Vec::with_capacity(merged.len());
        for (r, c, v) in merged {
            if v.is_zero() {
                continue;
            }
            row_idx.push(r);
            values.push(v);
            col_ptr[c + 1] += 1;
        }
        for c in 0..ncols {
            col_ptr[c + 1] += col_ptr[c];
        }
        Self {
            nrows,
            ncols,
            col_ptr,
            row_idx,
            values,
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Entry at `(i, j)`, zero if not stored.
    pub fn get(&self, i: usize, j: usize) -> Rational {
        let lo = self.col_ptr[j];
        let hi = self.col_ptr[j + 1];
        match self.row_idx[lo..hi].binary_search(&i) {
            Ok(k) => self.values[lo + k].clone(),
            Err(_) => Rational::zero(),
        }
    }

    /// Iterate the stored entries of column `j` as `(row, &value)`.
    pub fn col(&self, j: usize) -> impl Iterator<Item = (usize, &Rational)> {
        let lo = self.col_ptr[j];
        let hi = self.col_ptr[j + 1];
        self.row_idx[lo..hi]
            .iter()
            .copied()
            .zip(self.values[lo..hi].iter())
    }

    /// Iterate all stored entries as `(row, col, &value)`.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &Rational)> {
        (0..self.ncols).flat_map(move |j| self.col(j).map(move |(i, v)| (i, j, v)))
    }

    /// Number of stored entries in each row.
    pub fn row_nnz(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.nrows];
        for &r in &self.row_idx {
            counts[r] += 1;
        }
        counts
    }

    pub fn transpose(&self) -> SparseMatrix {
        let mut triplets = Vec::with_capacity(self.nnz());
        for (i, j, v) in self.iter() {
            triplets.push((j, i, v.clone()));
        }
        SparseMatrix::from_triplets(self.ncols, self.nrows, &triplets)
    }

    /// Sparse-sparse product `self * other`.
    pub fn mul(&self, other: &SparseMatrix) -> SparseMatrix {
        assert_eq!(self.ncols, other.nrows, "sparse product dimension mismatch");
        let mut triplets = Vec::new();
        let mut acc: Vec<Rational> = vec![Rational::zero(); self.nrows];
        let mut touched: Vec<usize> = Vec::new();
        for j in 0..other.ncols {
            for (k, bv) in other.col(j) {
                for (i, av) in self.col(k) {
                    if acc[i].is_zero() && !touched.contains(&i) {
                        touched.push(i);
                    }
                    acc[i] += av * bv;
                }
            }
            for &i in &touched {
                let v = std::mem::replace(&mut acc[i], Rational::zero());
                if !v.is_zero() {
                    triplets.push((i, j, v));
                }
            }
            touched.clear();
        }
        SparseMatrix::from_triplets(self.nrows, other.ncols, &triplets)
    }

    /// Sparse-dense product `self * other`.
    pub fn mul_dense(&self, other: &DMatrix<Rational>) -> DMatrix<Rational> {
        assert_eq!(self.ncols, other.nrows(), "product dimension mismatch");
        let mut out = DMatrix::from_element(self.nrows, other.ncols(), Rational::zero());
        for (i, k, v) in self.iter() {
            for j in 0..other.ncols() {
                if !other[(k, j)].is_zero() {
                    out[(i, j)] += v * &other[(k, j)];
                }
            }
        }
        out
    }

    /// Elementwise sum.
    pub fn add(&self, other: &SparseMatrix) -> SparseMatrix {
        assert_eq!(
            (self.nrows, self.ncols),
            (other.nrows, other.ncols),
            "sparse sum dimension mismatch"
        );
        let mut triplets: Vec<(usize, usize, Rational)> =
            self.iter().map(|(i, j, v)| (i, j, v.clone())).collect();
        triplets.extend(other.iter().map(|(i, j, v)| (i, j, v.clone())));
        SparseMatrix::from_triplets(self.nrows, self.ncols, &triplets)
    }

    /// Multiply every entry by `s`.
    pub fn scale(&self, s: &Rational) -> SparseMatrix {
        if s.is_zero() {
            return SparseMatrix::zeros(self.nrows, self.ncols);
        }
        let mut out = self.clone();
        for v in &mut out.values {
            *v *= s;
        }
        out
    }

    /// Remove column `j`, shifting later columns left.
    pub fn remove_column(&self, j: usize) -> SparseMatrix {
        assert!(j < self.ncols);
        let mut triplets = Vec::with_capacity(self.nnz());
        for (i, c, v) in self.iter() {
            if c < j {
                triplets.push((i, c, v.clone()));
            } else if c > j {
                triplets.push((i, c - 1, v.clone()));
            }
        }
        SparseMatrix::from_triplets(self.nrows, self.ncols - 1, &triplets)
    }

    /// Horizontal concatenation. All blocks must agree on row count.
    pub fn hstack(blocks: &[&SparseMatrix]) -> SparseMatrix {
        let nrows = blocks.first().map_or(0, |b| b.nrows);
        let mut triplets = Vec::new();
        let mut col_off = 0;
        for b in blocks {
            assert_eq!(b.nrows, nrows, "hstack row count mismatch");
            for (i, j, v) in b.iter() {
                triplets.push((i, col_off + j, v.clone()));
            }
            col_off += b.ncols;
        }
        SparseMatrix::from_triplets(nrows, col_off, &triplets)
    }

    /// Vertical concatenation. All blocks must agree on column count.
    pub fn vstack(blocks: &[&SparseMatrix]) -> SparseMatrix {
        let ncols = blocks.first().map_or(0, |b| b.ncols);
        let mut triplets = Vec::new();
        let mut row_off = 0;
        for b in blocks {
            assert_eq!(b.ncols, ncols, "vstack column count mismatch");
            for (i, j, v) in b.iter() {
                triplets.push((row_off + i, j, v.clone()));
            }
            row_off += b.nrows;
        }
        SparseMatrix::from_triplets(row_off, ncols, &triplets)
    }

    /// Block-diagonal concatenation.
    pub fn block_diag(blocks: &[&SparseMatrix]) -> SparseMatrix {
        let mut triplets = Vec::new();
        let mut row_off = 0;
        let mut col_off = 0;
        for b in blocks {
            for (i, j, v) in b.iter() {
                triplets.push((row_off + i, col_off + j, v.clone()));
            }
            row_off += b.nrows;
            col_off += b.ncols;
        }
        SparseMatrix::from_triplets(row_off, col_off, &triplets)
    }

    pub fn to_dense(&self) -> DMatrix<Rational> {
        let mut out = DMatrix::from_element(self.nrows, self.ncols, Rational::zero());
        for (i, j, v) in self.iter() {
            out[(i, j)] = v.clone();
        }
        out
    }

    pub fn from_dense(m: &DMatrix<Rational>) -> SparseMatrix {
        let mut triplets = Vec::new();
        for j in 0..m.ncols() {
            for i in 0..m.nrows() {
                if !m[(i, j)].is_zero() {
                    triplets.push((i, j, m[(i, j)].clone()));
                }
            }
        }
        SparseMatrix::from_triplets(m.nrows(), m.ncols(), &triplets)
    }

    /// Largest absolute value among stored entries, zero when empty.
    pub fn max_abs(&self) -> Rational {
        let mut best = Rational::zero();
        for v in &self.values {
            let a = v.abs();
            if a > best {
                best = a;
            }
        }
        best
    }
}
