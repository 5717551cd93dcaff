//! Circuit graph: an ordered bag of elements wired together by named nets.

use std::collections::HashSet;

use indexmap::IndexMap;
use nalgebra::DMatrix;
use num_bigint::BigInt;

use crate::element::Element;
use crate::error::{Error, Result};
use crate::sparse::SparseMatrix;
use crate::Rational;

/// Identifies an element within one circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(pub(crate) usize);

impl ElementId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy)]
struct Terminal {
    element: usize,
    branch: usize,
    polarity: i8,
}

/// A circuit: elements in insertion order plus a net map.
///
/// Nets are created on first use; a net named `"gnd"` is just a net. The
/// circuit is frozen by convention once handed to the model compiler.
#[derive(Default)]
pub struct Circuit {
    elements: Vec<Element>,
    nets: IndexMap<String, Vec<Terminal>>,
    connected: HashSet<(usize, usize, i8)>,
}

impl Circuit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an element, keeping insertion order.
    pub fn add(&mut self, element: Element) -> ElementId {
        self.elements.push(element);
        ElementId(self.elements.len() - 1)
    }

    /// Attach `pin` of element `id` to the net named `net`. Every
    /// terminal the pin fans out to joins the net.
    pub fn connect(&mut self, id: ElementId, pin: &str, net: &str) -> Result<()> {
        let element = &self.elements[id.0];
        let terminals = element
            .pin(pin)
            .ok_or_else(|| Error::UnknownPin(pin.to_string()))?
            .to_vec();
        for &(branch, polarity) in &terminals {
            if self.connected.contains(&(id.0, branch, polarity)) {
                return Err(Error::PinAlreadyConnected(pin.to_string()));
            }
        }
        for (branch, polarity) in terminals {
            self.connected.insert((id.0, branch, polarity));
            self.nets.entry(net.to_string()).or_default().push(Terminal {
                element: id.0,
                branch,
                polarity,
            });
        }
        Ok(())
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    pub fn nb(&self) -> usize {
        self.elements.iter().map(Element::nb).sum()
    }

    pub fn nx(&self) -> usize {
        self.elements.iter().map(Element::nx).sum()
    }

    pub fn nq(&self) -> usize {
        self.elements.iter().map(Element::nq).sum()
    }

    pub fn nu(&self) -> usize {
        self.elements.iter().map(Element::nu).sum()
    }

    pub fn ny(&self) -> usize {
        self.elements.iter().map(Element::ny).sum()
    }

    pub fn nl(&self) -> usize {
        self.elements.iter().map(Element::nl).sum()
    }

    pub fn nn(&self) -> usize {
        self.elements.iter().map(Element::nn).sum()
    }

    pub fn mv(&self) -> SparseMatrix {
        self.block_diag(Element::mv)
    }

    pub fn mi(&self) -> SparseMatrix {
        self.block_diag(Element::mi)
    }

    pub fn mx(&self) -> SparseMatrix {
        self.block_diag(Element::mx)
    }

    pub fn mxd(&self) -> SparseMatrix {
        self.block_diag(Element::mxd)
    }

    pub fn mq(&self) -> SparseMatrix {
        self.block_diag(Element::mq)
    }

    pub fn mu(&self) -> SparseMatrix {
        self.block_diag(Element::mu)
    }

    pub fn u0(&self) -> SparseMatrix {
        if self.elements.is_empty() {
            // The constant column survives even with nothing to stack.
            return SparseMatrix::zeros(0, 1);
        }
        let blocks: Vec<&SparseMatrix> = self.elements.iter().map(Element::u0).collect();
        SparseMatrix::vstack(&blocks)
    }

    pub fn pv(&self) -> SparseMatrix {
        self.block_diag(Element::pv)
    }

    pub fn pi(&self) -> SparseMatrix {
        self.block_diag(Element::pi)
    }

    pub fn px(&self) -> SparseMatrix {
        self.block_diag(Element::px)
    }

    pub fn pxd(&self) -> SparseMatrix {
        self.block_diag(Element::pxd)
    }

    pub fn pq(&self) -> SparseMatrix {
        self.block_diag(Element::pq)
    }

    fn block_diag(&self, get: impl Fn(&Element) -> &SparseMatrix) -> SparseMatrix {
        let blocks: Vec<&SparseMatrix> = self.elements.iter().map(get).collect();
        SparseMatrix::block_diag(&blocks)
    }

    /// Global branch offset of each element.
    pub fn branch_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.elements.len());
        let mut off = 0;
        for e in &self.elements {
            offsets.push(off);
            off += e.nb();
        }
        offsets
    }

    /// Node-branch incidence matrix: +1 at a branch's positive terminal,
    /// -1 at its negative terminal. Rows follow net insertion order.
    ///
    /// Fails if any terminal of any branch is unconnected.
    pub fn incidence(&self) -> Result<DMatrix<i64>> {
        let offsets = self.branch_offsets();
        for (ei, e) in self.elements.iter().enumerate() {
            for b in 0..e.nb() {
                for pol in [1i8, -1] {
                    if !self.connected.contains(&(ei, b, pol)) {
                        return Err(Error::UnconnectedTerminal {
                            element: ei,
                            branch: b,
                        });
                    }
                }
            }
        }
        let nb = self.nb();
        let mut inc = DMatrix::<i64>::zeros(self.nets.len(), nb);
        for (row, terminals) in self.nets.values().enumerate() {
            for t in terminals {
                inc[(row, offsets[t.element] + t.branch)] += i64::from(t.polarity);
            }
        }
        Ok(inc)
    }

    /// Fundamental loop and cutset matrices `(tv, ti)` of the circuit
    /// graph, satisfying `tv·v = 0`, `ti·i = 0` and `tv·tiᵀ = 0`.
    ///
    /// Derived by integer Gauss-Jordan elimination of the incidence
    /// matrix: pivot columns form a spanning tree, the reduced rows are
    /// the cutsets, and each remaining column closes one loop.
    pub fn topology(&self) -> Result<(SparseMatrix, SparseMatrix)> {
        let mut inc = self.incidence()?;
        let (n_nets, nb) = inc.shape();

        let mut tree = vec![false; nb];
        let mut rank = 0;
        for col in 0..nb {
            if rank == n_nets {
                break;
            }
            let Some(pivot) = (rank..n_nets).find(|&r| inc[(r, col)] != 0) else {
                continue;
            };
            tree[col] = true;
            inc.swap_rows(pivot, rank);
            if inc[(rank, col)] < 0 {
                for j in 0..nb {
                    inc[(rank, j)] = -inc[(rank, j)];
                }
            }
            for r in 0..n_nets {
                if r == rank {
                    continue;
                }
                let f = inc[(r, col)];
                if f != 0 {
                    for j in 0..nb {
                        inc[(r, j)] -= f * inc[(rank, j)];
                    }
                }
            }
            rank += 1;
        }

        let mut ti_triplets = Vec::new();
        for r in 0..rank {
            for j in 0..nb {
                let v = inc[(r, j)];
                if v != 0 {
                    ti_triplets.push((r, j, int_rat(v)));
                }
            }
        }
        let ti = SparseMatrix::from_triplets(rank, nb, &ti_triplets);

        // One loop per non-tree branch: the link itself plus the tree
        // branches of its cutset column, negated.
        let tree_cols: Vec<usize> = (0..nb).filter(|&j| tree[j]).collect();
        let link_cols: Vec<usize> = (0..nb).filter(|&j| !tree[j]).collect();
        let mut tv_triplets = Vec::new();
        for (li, &lc) in link_cols.iter().enumerate() {
            tv_triplets.push((li, lc, int_rat(1)));
            for (ri, &tc) in tree_cols.iter().enumerate() {
                let v = inc[(ri, lc)];
                if v != 0 {
                    tv_triplets.push((li, tc, int_rat(-v)));
                }
            }
        }
        let tv = SparseMatrix::from_triplets(link_cols.len(), nb, &tv_triplets);

        Ok((tv, ti))
    }
}

fn int_rat(v: i64) -> Rational {
    Rational::from_integer(BigInt::from(v))
}

impl std::fmt::Debug for Circuit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Circuit")
            .field("elements", &self.elements.len())
            .field("nets", &self.nets.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementSpec;
    use crate::rat;

    fn two_pin(mv: f64, mi: f64) -> Element {
        Element::new(ElementSpec {
            nl: 1,
            nb: 1,
            mv: vec![(0, 0, rat(mv))],
            mi: vec![(0, 0, rat(mi))],
            pins: vec![("1".into(), 0, 1), ("2".into(), 0, -1)],
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_connect_unknown_pin() {
        let mut circ = Circuit::new();
        let r = circ.add(two_pin(1.0, -1.0));
        assert!(matches!(
            circ.connect(r, "3", "a"),
            Err(Error::UnknownPin(_))
        ));
    }

    #[test]
    fn test_connect_twice_rejected() {
        let mut circ = Circuit::new();
        let r = circ.add(two_pin(1.0, -1.0));
        circ.connect(r, "1", "a").unwrap();
        assert!(matches!(
            circ.connect(r, "1", "b"),
            Err(Error::PinAlreadyConnected(_))
        ));
    }

    #[test]
    fn test_unconnected_terminal_detected() {
        let mut circ = Circuit::new();
        let r = circ.add(two_pin(1.0, -1.0));
        circ.connect(r, "1", "a").unwrap();
        assert!(matches!(
            circ.incidence(),
            Err(Error::UnconnectedTerminal { .. })
        ));
    }

    #[test]
    fn test_single_loop_topology() {
        let mut circ = Circuit::new();
        let a = circ.add(two_pin(1.0, 0.0));
        let b = circ.add(two_pin(1.0, -1.0));
        circ.connect(a, "1", "top").unwrap();
        circ.connect(b, "1", "top").unwrap();
        circ.connect(a, "2", "gnd").unwrap();
        circ.connect(b, "2", "gnd").unwrap();

        let (tv, ti) = circ.topology().unwrap();
        assert_eq!((tv.nrows(), tv.ncols()), (1, 2));
        assert_eq!((ti.nrows(), ti.ncols()), (1, 2));
        // Same pair of nodes: equal voltages, opposing currents.
        assert_eq!(tv.get(0, 0), -tv.get(0, 1));
        assert_eq!(ti.get(0, 0), ti.get(0, 1));
    }

    #[test]
    fn test_loop_cut_orthogonality() {
        // A ring of three branches through three nets.
        let mut circ = Circuit::new();
        let e1 = circ.add(two_pin(1.0, 0.0));
        let e2 = circ.add(two_pin(1.0, -1.0));
        let e3 = circ.add(two_pin(1.0, -2.0));
        circ.connect(e1, "1", "n1").unwrap();
        circ.connect(e1, "2", "n2").unwrap();
        circ.connect(e2, "1", "n2").unwrap();
        circ.connect(e2, "2", "n3").unwrap();
        circ.connect(e3, "1", "n3").unwrap();
        circ.connect(e3, "2", "n1").unwrap();

        let (tv, ti) = circ.topology().unwrap();
        let product = tv.mul(&ti.transpose());
        assert_eq!(product.nnz(), 0, "tv * ti' must vanish");
        // Three branches, one independent loop, two cutsets.
        assert_eq!(tv.nrows(), 1);
        assert_eq!(ti.nrows(), 2);
    }

    #[test]
    fn test_empty_circuit() {
        let circ = Circuit::new();
        let (tv, ti) = circ.topology().unwrap();
        assert_eq!((tv.nrows(), tv.ncols()), (0, 0));
        assert_eq!((ti.nrows(), ti.ncols()), (0, 0));
        assert_eq!(circ.nb(), 0);
    }
}
