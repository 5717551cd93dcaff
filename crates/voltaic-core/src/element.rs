//! The element matrix bundle and the nonlinearity contract.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::sparse::SparseMatrix;
use crate::Rational;

/// A closed-form residual for an element's nonlinear port.
///
/// An element with `nn` nonlinear unknowns and `nq` coupled quantities
/// supplies `res(q)` together with its Jacobian `∂res/∂q`. The model
/// compiler decides what `q` is at runtime; the element only ever sees the
/// assembled values.
pub trait Nonlinearity: Send + Sync {
    /// `(nn, nq)`: residual dimension and coupled-quantity dimension.
    fn dims(&self) -> (usize, usize);

    /// Evaluate the residual and its Jacobian at `q`.
    ///
    /// `res` has length `nn`; `jq` is the `nn`-by-`nq` Jacobian in
    /// column-major order (`jq[r + c * nn] = ∂res_r/∂q_c`).
    fn eval(&self, q: &[f64], res: &mut [f64], jq: &mut [f64]);
}

/// A `(row, col, value)` entry for element matrix construction.
pub type Triplet = (usize, usize, Rational);

/// Raw description of an element, consumed by [`Element::new`].
///
/// The constitutive law is
/// `mv·v + mi·i + mx·x + mxd·ẋ + mq·q = mu·u + u0` with `nl` rows
/// (sources on the right), and the output law is
/// `y = pv·v + pi·i + px·x + pxd·ẋ + pq·q` with `ny` rows.
#[derive(Default)]
pub struct ElementSpec {
    pub nl: usize,
    pub nb: usize,
    pub nx: usize,
    pub nq: usize,
    pub nu: usize,
    pub ny: usize,
    pub mv: Vec<Triplet>,
    pub mi: Vec<Triplet>,
    pub mx: Vec<Triplet>,
    pub mxd: Vec<Triplet>,
    pub mq: Vec<Triplet>,
    pub mu: Vec<Triplet>,
    /// Constant term, `(row, value)` pairs.
    pub u0: Vec<(usize, Rational)>,
    pub pv: Vec<Triplet>,
    pub pi: Vec<Triplet>,
    pub px: Vec<Triplet>,
    pub pxd: Vec<Triplet>,
    pub pq: Vec<Triplet>,
    /// `(pin name, branch, polarity)` with polarity +1 or -1. A pin
    /// named more than once attaches to every listed terminal (a BJT's
    /// base pin touches both of its branches).
    pub pins: Vec<(String, usize, i8)>,
    pub nonlinearity: Option<Arc<dyn Nonlinearity>>,
}

/// A frozen circuit element: constitutive and output matrices plus the
/// optional nonlinearity. Built once, never mutated.
#[derive(Clone)]
pub struct Element {
    nl: usize,
    nb: usize,
    nx: usize,
    nq: usize,
    nu: usize,
    ny: usize,
    mv: SparseMatrix,
    mi: SparseMatrix,
    mx: SparseMatrix,
    mxd: SparseMatrix,
    mq: SparseMatrix,
    mu: SparseMatrix,
    u0: SparseMatrix,
    pv: SparseMatrix,
    pi: SparseMatrix,
    px: SparseMatrix,
    pxd: SparseMatrix,
    pq: SparseMatrix,
    pins: IndexMap<String, Vec<(usize, i8)>>,
    nonlinearity: Option<Arc<dyn Nonlinearity>>,
}

fn check_triplets(name: &str, triplets: &[Triplet], nrows: usize, ncols: usize) -> Result<()> {
    for &(r, c, _) in triplets {
        if r >= nrows || c >= ncols {
            return Err(Error::InvalidElement(format!(
                "{name} entry ({r}, {c}) outside {nrows}x{ncols}"
            )));
        }
    }
    Ok(())
}

impl Element {
    pub fn new(spec: ElementSpec) -> Result<Element> {
        let ElementSpec {
            nl,
            nb,
            nx,
            nq,
            nu,
            ny,
            mv,
            mi,
            mx,
            mxd,
            mq,
            mu,
            u0,
            pv,
            pi,
            px,
            pxd,
            pq,
            pins,
            nonlinearity,
        } = spec;

        if nb + nx + nq < nl {
            return Err(Error::InvalidElement(format!(
                "{nl} equations for {} unknowns",
                nb + nx + nq
            )));
        }
        let nn = nb + nx + nq - nl;

        check_triplets("mv", &mv, nl, nb)?;
        check_triplets("mi", &mi, nl, nb)?;
        check_triplets("mx", &mx, nl, nx)?;
        check_triplets("mxd", &mxd, nl, nx)?;
        check_triplets("mq", &mq, nl, nq)?;
        check_triplets("mu", &mu, nl, nu)?;
        check_triplets("pv", &pv, ny, nb)?;
        check_triplets("pi", &pi, ny, nb)?;
        check_triplets("px", &px, ny, nx)?;
        check_triplets("pxd", &pxd, ny, nx)?;
        check_triplets("pq", &pq, ny, nq)?;
        for &(r, _) in &u0 {
            if r >= nl {
                return Err(Error::InvalidElement(format!("u0 row {r} outside {nl}")));
            }
        }

        match &nonlinearity {
            Some(f) => {
                if nq == 0 {
                    return Err(Error::InvalidElement(
                        "nonlinearity without coupled quantities".into(),
                    ));
                }
                if f.dims() != (nn, nq) {
                    let (fnn, fnq) = f.dims();
                    return Err(Error::InvalidElement(format!(
                        "nonlinearity is {fnn}x{fnq}, element needs {nn}x{nq}"
                    )));
                }
            }
            None => {
                if nq != 0 || nn != 0 {
                    return Err(Error::InvalidElement(format!(
                        "{nn} unknowns and {nq} coupled quantities without a residual"
                    )));
                }
            }
        }

        let mut pin_map: IndexMap<String, Vec<(usize, i8)>> = IndexMap::new();
        for (name, branch, pol) in pins {
            if branch >= nb {
                return Err(Error::InvalidElement(format!(
                    "pin {name} references branch {branch} of {nb}"
                )));
            }
            if pol != 1 && pol != -1 {
                return Err(Error::InvalidElement(format!("pin {name} polarity {pol}")));
            }
            let terminals = pin_map.entry(name.clone()).or_default();
            if terminals.contains(&(branch, pol)) {
                return Err(Error::InvalidElement(format!(
                    "pin {name} lists terminal ({branch}, {pol}) twice"
                )));
            }
            terminals.push((branch, pol));
        }

        let u0_triplets: Vec<Triplet> = u0.into_iter().map(|(r, v)| (r, 0, v)).collect();

        Ok(Element {
            nl,
            nb,
            nx,
            nq,
            nu,
            ny,
            mv: SparseMatrix::from_triplets(nl, nb, &mv),
            mi: SparseMatrix::from_triplets(nl, nb, &mi),
            mx: SparseMatrix::from_triplets(nl, nx, &mx),
            mxd: SparseMatrix::from_triplets(nl, nx, &mxd),
            mq: SparseMatrix::from_triplets(nl, nq, &mq),
            mu: SparseMatrix::from_triplets(nl, nu, &mu),
            u0: SparseMatrix::from_triplets(nl, 1, &u0_triplets),
            pv: SparseMatrix::from_triplets(ny, nb, &pv),
            pi: SparseMatrix::from_triplets(ny, nb, &pi),
            px: SparseMatrix::from_triplets(ny, nx, &px),
            pxd: SparseMatrix::from_triplets(ny, nx, &pxd),
            pq: SparseMatrix::from_triplets(ny, nq, &pq),
            pins: pin_map,
            nonlinearity,
        })
    }

    pub fn nl(&self) -> usize {
        self.nl
    }

    pub fn nb(&self) -> usize {
        self.nb
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn nq(&self) -> usize {
        self.nq
    }

    pub fn nu(&self) -> usize {
        self.nu
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    /// Number of nonlinear unknowns, `nb + nx + nq - nl`.
    pub fn nn(&self) -> usize {
        self.nb + self.nx + self.nq - self.nl
    }

    pub fn mv(&self) -> &SparseMatrix {
        &self.mv
    }

    pub fn mi(&self) -> &SparseMatrix {
        &self.mi
    }

    pub fn mx(&self) -> &SparseMatrix {
        &self.mx
    }

    pub fn mxd(&self) -> &SparseMatrix {
        &self.mxd
    }

    pub fn mq(&self) -> &SparseMatrix {
        &self.mq
    }

    pub fn mu(&self) -> &SparseMatrix {
        &self.mu
    }

    pub fn u0(&self) -> &SparseMatrix {
        &self.u0
    }

    pub fn pv(&self) -> &SparseMatrix {
        &self.pv
    }

    pub fn pi(&self) -> &SparseMatrix {
        &self.pi
    }

    pub fn px(&self) -> &SparseMatrix {
        &self.px
    }

    pub fn pxd(&self) -> &SparseMatrix {
        &self.pxd
    }

    pub fn pq(&self) -> &SparseMatrix {
        &self.pq
    }

    /// The terminals a pin attaches to.
    pub fn pin(&self, name: &str) -> Option<&[(usize, i8)]> {
        self.pins.get(name).map(Vec::as_slice)
    }

    pub fn pin_names(&self) -> impl Iterator<Item = &str> {
        self.pins.keys().map(String::as_str)
    }

    pub fn nonlinearity(&self) -> Option<&Arc<dyn Nonlinearity>> {
        self.nonlinearity.as_ref()
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("nl", &self.nl)
            .field("nb", &self.nb)
            .field("nx", &self.nx)
            .field("nq", &self.nq)
            .field("nu", &self.nu)
            .field("ny", &self.ny)
            .field("nonlinear", &self.nonlinearity.is_some())
            .finish()
    }
}
