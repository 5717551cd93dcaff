//! Independent sources, fixed-value and input-driven.
//!
//! Conventions: a voltage source holds its `"+"` pin at `v` above `"-"`;
//! a current source pushes its current out of the `"+"` pin. Input-driven
//! variants add one row to the model's input vector `u` instead of a
//! fixed value.

use voltaic_core::{rat, Element, ElementSpec};

/// A fixed voltage source. Pins `"+"` and `"-"`.
pub fn voltage_source(v: f64) -> Element {
    Element::new(ElementSpec {
        nl: 1,
        nb: 1,
        mv: vec![(0, 0, rat(1.0))],
        u0: vec![(0, rat(v))],
        pins: vec![("+".into(), 0, 1), ("-".into(), 0, -1)],
        ..Default::default()
    })
    .expect("voltage source spec is well formed")
}

/// A voltage source driven by one input row. Pins `"+"` and `"-"`.
pub fn input_voltage_source() -> Element {
    Element::new(ElementSpec {
        nl: 1,
        nb: 1,
        nu: 1,
        mv: vec![(0, 0, rat(1.0))],
        mu: vec![(0, 0, rat(1.0))],
        pins: vec![("+".into(), 0, 1), ("-".into(), 0, -1)],
        ..Default::default()
    })
    .expect("input voltage source spec is well formed")
}

/// A fixed current source delivering `i` out of its `"+"` pin.
pub fn current_source(i: f64) -> Element {
    Element::new(ElementSpec {
        nl: 1,
        nb: 1,
        mi: vec![(0, 0, rat(1.0))],
        u0: vec![(0, rat(-i))],
        pins: vec![("+".into(), 0, 1), ("-".into(), 0, -1)],
        ..Default::default()
    })
    .expect("current source spec is well formed")
}

/// A current source driven by one input row, delivering `u` out of its
/// `"+"` pin.
pub fn input_current_source() -> Element {
    Element::new(ElementSpec {
        nl: 1,
        nb: 1,
        nu: 1,
        mi: vec![(0, 0, rat(1.0))],
        mu: vec![(0, 0, rat(-1.0))],
        pins: vec![("+".into(), 0, 1), ("-".into(), 0, -1)],
        ..Default::default()
    })
    .expect("input current source spec is well formed")
}
