//! Diode element using the Shockley equation.

use std::sync::Arc;

use voltaic_core::{rat, Element, ElementSpec, Nonlinearity};

/// Diode model parameters.
#[derive(Debug, Clone, Copy)]
pub struct DiodeParams {
    /// Saturation current (A). Default: 1e-14.
    pub is: f64,
    /// Emission coefficient. Default: 1.0.
    pub n: f64,
}

impl Default for DiodeParams {
    fn default() -> Self {
        Self { is: 1e-14, n: 1.0 }
    }
}

/// Thermal voltage at a given temperature.
pub fn thermal_voltage(temp_k: f64) -> f64 {
    const K_BOLTZMANN: f64 = 1.380649e-23;
    const Q_ELECTRON: f64 = 1.602176634e-19;
    K_BOLTZMANN * temp_k / Q_ELECTRON
}

/// Shockley law over q = (v, i): `is·(e^(v/(n·vt)) - 1) - i = 0`.
///
/// No voltage limiting: an overflowing exponent turns the residual
/// non-finite, which the solver stack treats as a failed step and
/// backtracks.
struct ShockleyLaw {
    is: f64,
    nvt: f64,
}

impl Nonlinearity for ShockleyLaw {
    fn dims(&self) -> (usize, usize) {
        (1, 2)
    }

    fn eval(&self, q: &[f64], res: &mut [f64], jq: &mut [f64]) {
        let e = (q[0] / self.nvt).exp();
        res[0] = self.is * (e - 1.0) - q[1];
        jq[0] = self.is * e / self.nvt;
        jq[1] = -1.0;
    }
}

/// A diode. Pins `"+"` (anode) and `"-"` (cathode).
pub fn diode(params: DiodeParams) -> Element {
    let nvt = params.n * thermal_voltage(300.15);
    Element::new(ElementSpec {
        nl: 2,
        nb: 1,
        nq: 2,
        mv: vec![(0, 0, rat(1.0))],
        mi: vec![(1, 0, rat(1.0))],
        mq: vec![(0, 0, rat(-1.0)), (1, 1, rat(-1.0))],
        pins: vec![("+".into(), 0, 1), ("-".into(), 0, -1)],
        nonlinearity: Some(Arc::new(ShockleyLaw {
            is: params.is,
            nvt,
        })),
        ..Default::default()
    })
    .expect("diode spec is well formed")
}
