//! Element library for Voltaic.
//!
//! Every constructor returns a frozen
//! [`Element`](voltaic_core::Element): the matrix bundle the model
//! compiler consumes, plus a closed-form residual for the nonlinear
//! devices. Wiring conventions live with each constructor; two-terminal
//! elements expose `"1"`/`"2"` or `"+"`/`"-"` pins.

pub mod bjt;
pub mod diode;
pub mod opamp;
pub mod passive;
pub mod probes;
pub mod sources;

pub use bjt::{bjt, BjtKind, BjtParams};
pub use diode::{diode, thermal_voltage, DiodeParams};
pub use opamp::opamp;
pub use passive::{capacitor, inductor, resistor};
pub use probes::{current_probe, voltage_probe};
pub use sources::{
    current_source, input_current_source, input_voltage_source, voltage_source,
};
