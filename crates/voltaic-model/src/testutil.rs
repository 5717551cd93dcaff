//! Minimal element fixtures for in-crate tests.
//!
//! The real element library lives in voltaic-devices; these fixtures keep
//! the compiler's own tests free of that dependency cycle.

use std::sync::Arc;

use voltaic_core::{rat, Element, ElementSpec, Nonlinearity};

pub(crate) fn resistor(r: f64) -> Element {
    Element::new(ElementSpec {
        nl: 1,
        nb: 1,
        mv: vec![(0, 0, rat(1.0))],
        mi: vec![(0, 0, rat(-r))],
        pins: vec![("1".into(), 0, 1), ("2".into(), 0, -1)],
        ..Default::default()
    })
    .unwrap()
}

pub(crate) fn capacitor(c: f64) -> Element {
    Element::new(ElementSpec {
        nl: 2,
        nb: 1,
        nx: 1,
        mv: vec![(0, 0, rat(c))],
        mi: vec![(1, 0, rat(1.0))],
        mx: vec![(0, 0, rat(-1.0))],
        mxd: vec![(1, 0, rat(-1.0))],
        pins: vec![("1".into(), 0, 1), ("2".into(), 0, -1)],
        ..Default::default()
    })
    .unwrap()
}

pub(crate) fn voltage_source(v: f64) -> Element {
    Element::new(ElementSpec {
        nl: 1,
        nb: 1,
        mv: vec![(0, 0, rat(1.0))],
        u0: vec![(0, rat(v))],
        pins: vec![("+".into(), 0, 1), ("-".into(), 0, -1)],
        ..Default::default()
    })
    .unwrap()
}

pub(crate) fn input_voltage_source() -> Element {
    Element::new(ElementSpec {
        nl: 1,
        nb: 1,
        nu: 1,
        mv: vec![(0, 0, rat(1.0))],
        mu: vec![(0, 0, rat(1.0))],
        pins: vec![("+".into(), 0, 1), ("-".into(), 0, -1)],
        ..Default::default()
    })
    .unwrap()
}

pub(crate) fn current_source(i: f64) -> Element {
    Element::new(ElementSpec {
        nl: 1,
        nb: 1,
        mi: vec![(0, 0, rat(1.0))],
        u0: vec![(0, rat(-i))],
        pins: vec![("+".into(), 0, 1), ("-".into(), 0, -1)],
        ..Default::default()
    })
    .unwrap()
}

pub(crate) fn voltage_probe() -> Element {
    Element::new(ElementSpec {
        nl: 1,
        nb: 1,
        ny: 1,
        mi: vec![(0, 0, rat(1.0))],
        pv: vec![(0, 0, rat(1.0))],
        pins: vec![("+".into(), 0, 1), ("-".into(), 0, -1)],
        ..Default::default()
    })
    .unwrap()
}

/// Shockley diode law over q = (v, i).
pub(crate) struct DiodeLaw {
    pub is: f64,
    pub vt: f64,
}

impl Nonlinearity for DiodeLaw {
    fn dims(&self) -> (usize, usize) {
        (1, 2)
    }

    fn eval(&self, q: &[f64], res: &mut [f64], jq: &mut [f64]) {
        let e = (q[0] / self.vt).exp();
        res[0] = self.is * (e - 1.0) - q[1];
        jq[0] = self.is * e / self.vt;
        jq[1] = -1.0;
    }
}

pub(crate) fn diode(is: f64, vt: f64) -> Element {
    Element::new(ElementSpec {
        nl: 2,
        nb: 1,
        nq: 2,
        mv: vec![(0, 0, rat(1.0))],
        mi: vec![(1, 0, rat(1.0))],
        mq: vec![(0, 0, rat(-1.0)), (1, 1, rat(-1.0))],
        pins: vec![("+".into(), 0, 1), ("-".into(), 0, -1)],
        nonlinearity: Some(Arc::new(DiodeLaw { is, vt })),
        ..Default::default()
    })
    .unwrap()
}
