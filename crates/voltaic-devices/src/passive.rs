//! Passive elements: resistor, capacitor, inductor.

use voltaic_core::{rat, Element, ElementSpec};

/// A linear resistor, `v = r·i`. Pins `"1"` (positive) and `"2"`.
pub fn resistor(r: f64) -> Element {
    Element::new(ElementSpec {
        nl: 1,
        nb: 1,
        mv: vec![(0, 0, rat(1.0))],
        mi: vec![(0, 0, rat(-r))],
        pins: vec![("1".into(), 0, 1), ("2".into(), 0, -1)],
        ..Default::default()
    })
    .expect("resistor spec is well formed")
}

/// A linear capacitor with the stored charge as its state:
/// `c·v = x`, `i = ẋ`. Pins `"1"` and `"2"`.
pub fn capacitor(c: f64) -> Element {
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
    .expect("capacitor spec is well formed")
}

/// A linear inductor with the flux as its state:
/// `l·i = x`, `v = ẋ`. Pins `"1"` and `"2"`.
pub fn inductor(l: f64) -> Element {
    Element::new(ElementSpec {
        nl: 2,
        nb: 1,
        nx: 1,
        mi: vec![(0, 0, rat(l))],
        mv: vec![(1, 0, rat(1.0))],
        mx: vec![(0, 0, rat(-1.0))],
        mxd: vec![(1, 0, rat(-1.0))],
        pins: vec![("1".into(), 0, 1), ("2".into(), 0, -1)],
        ..Default::default()
    })
    .expect("inductor spec is well formed")
}
