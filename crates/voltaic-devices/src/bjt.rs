//! BJT element using the Ebers-Moll transport model.

use std::sync::Arc;

use voltaic_core::{rat, Element, ElementSpec, Nonlinearity};

use crate::diode::thermal_voltage;

/// BJT type (NPN or PNP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BjtKind {
    Npn,
    Pnp,
}

/// BJT model parameters (Ebers-Moll).
#[derive(Debug, Clone, Copy)]
pub struct BjtParams {
    /// Saturation current (A). Default: 1e-12.
    pub is: f64,
    /// Emission coefficient. Default: 1.0.
    pub n: f64,
    /// Forward current gain. Default: 100.
    pub bf: f64,
    /// Reverse current gain. Default: 1.
    pub br: f64,
}

impl Default for BjtParams {
    fn default() -> Self {
        Self {
            is: 1e-12,
            n: 1.0,
            bf: 100.0,
            br: 1.0,
        }
    }
}

/// Ebers-Moll over q = (v_be, v_bc, i_be, i_bc), where i_be and i_bc are
/// the currents of the base-emitter and base-collector branches. With
/// the transport current `it = if - ir`,
///
/// ```text
/// i_be = pol·(it + if/bf)        i_bc = pol·(-it + ir/br)
/// ```
///
/// and `pol` flips every junction for PNP.
struct EbersMoll {
    is: f64,
    nvt: f64,
    bf: f64,
    br: f64,
    pol: f64,
}

impl Nonlinearity for EbersMoll {
    fn dims(&self) -> (usize, usize) {
        (2, 4)
    }

    fn eval(&self, q: &[f64], res: &mut [f64], jq: &mut [f64]) {
        let ef = (self.pol * q[0] / self.nvt).exp();
        let er = (self.pol * q[1] / self.nvt).exp();
        let i_f = self.is * (ef - 1.0);
        let i_r = self.is * (er - 1.0);
        let it = i_f - i_r;

        res[0] = q[2] - self.pol * (it + i_f / self.bf);
        res[1] = q[3] - self.pol * (-it + i_r / self.br);

        // pol² = 1 throughout.
        let gf = self.is * ef / self.nvt;
        let gr = self.is * er / self.nvt;
        jq[0] = -gf * (1.0 + 1.0 / self.bf); // ∂res0/∂v_be
        jq[1] = gf; // ∂res1/∂v_be
        jq[2] = gr; // ∂res0/∂v_bc
        jq[3] = -gr * (1.0 + 1.0 / self.br); // ∂res1/∂v_bc
        jq[4] = 1.0;
        jq[5] = 0.0;
        jq[6] = 0.0;
        jq[7] = 1.0;
    }
}

/// A bipolar transistor. Pins `"b"`, `"e"`, `"c"`; the base pin attaches
/// to both internal branches (base-emitter and base-collector).
pub fn bjt(kind: BjtKind, params: BjtParams) -> Element {
    let pol = match kind {
        BjtKind::Npn => 1.0,
        BjtKind::Pnp => -1.0,
    };
    let nvt = params.n * thermal_voltage(300.15);
    Element::new(ElementSpec {
        nl: 4,
        nb: 2,
        nq: 4,
        mv: vec![(0, 0, rat(1.0)), (1, 1, rat(1.0))],
        mi: vec![(2, 0, rat(1.0)), (3, 1, rat(1.0))],
        mq: vec![
            (0, 0, rat(-1.0)),
            (1, 1, rat(-1.0)),
            (2, 2, rat(-1.0)),
            (3, 3, rat(-1.0)),
        ],
        pins: vec![
            ("b".into(), 0, 1),
            ("b".into(), 1, 1),
            ("e".into(), 0, -1),
            ("c".into(), 1, -1),
        ],
        nonlinearity: Some(Arc::new(EbersMoll {
            is: params.is,
            nvt,
            bf: params.bf,
            br: params.br,
            pol,
        })),
        ..Default::default()
    })
    .expect("bjt spec is well formed")
}
