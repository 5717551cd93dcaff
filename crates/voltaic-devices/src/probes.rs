//! Measurement probes. Each adds one row to the model output.

use voltaic_core::{rat, Element, ElementSpec};

/// An ideal voltmeter: open circuit, reports the voltage from `"+"` to
/// `"-"`.
pub fn voltage_probe() -> Element {
    Element::new(ElementSpec {
        nl: 1,
        nb: 1,
        ny: 1,
        mi: vec![(0, 0, rat(1.0))],
        pv: vec![(0, 0, rat(1.0))],
        pins: vec![("+".into(), 0, 1), ("-".into(), 0, -1)],
        ..Default::default()
    })
    .expect("voltage probe spec is well formed")
}

/// An ideal ammeter: short circuit, reports the current entering `"+"`.
pub fn current_probe() -> Element {
    Element::new(ElementSpec {
        nl: 1,
        nb: 1,
        ny: 1,
        mv: vec![(0, 0, rat(1.0))],
        pi: vec![(0, 0, rat(1.0))],
        pins: vec![("+".into(), 0, 1), ("-".into(), 0, -1)],
        ..Default::default()
    })
    .expect("current probe spec is well formed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probes_add_outputs() {
        assert_eq!(voltage_probe().ny(), 1);
        assert_eq!(current_probe().ny(), 1);
        assert_eq!(voltage_probe().nn(), 0);
    }
}
