//! Ideal operational amplifier.

use voltaic_core::{rat, Element, ElementSpec};

/// An ideal op-amp (nullor): the input branch carries no current and no
/// voltage, the output branch does whatever the surrounding feedback
/// demands. Pins `"in+"`, `"in-"`, `"out+"`, `"out-"`.
///
/// Without feedback the output is genuinely undetermined; the model
/// compiler detects that and warns.
pub fn opamp() -> Element {
    Element::new(ElementSpec {
        nl: 2,
        nb: 2,
        mv: vec![(0, 0, rat(1.0))],
        mi: vec![(1, 0, rat(1.0))],
        pins: vec![
            ("in+".into(), 0, 1),
            ("in-".into(), 0, -1),
            ("out+".into(), 1, 1),
            ("out-".into(), 1, -1),
        ],
        ..Default::default()
    })
    .expect("opamp spec is well formed")
}
