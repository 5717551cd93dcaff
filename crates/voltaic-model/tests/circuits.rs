//! End-to-end circuit tests against closed-form expectations.

use nalgebra::{DMatrix, DVector};
use voltaic_core::Circuit;
use voltaic_devices::{
    bjt, capacitor, current_probe, current_source, diode, input_voltage_source, opamp, resistor,
    thermal_voltage, voltage_probe, voltage_source, BjtKind, BjtParams, DiodeParams,
};
use voltaic_model::{
    compile, default_solver_factory, simple_solver_factory, steadystate_install, CompileOptions,
    DiscreteModel, ModelRunner,
};

const FS: f64 = 44100.0;

#[test]
fn test_resistor_current_source_dc() {
    let mut circ = Circuit::new();
    let src = circ.add(current_source(1e-3));
    let r = circ.add(resistor(2.2e3));
    let probe = circ.add(voltage_probe());
    for (id, pin) in [(src, "+"), (r, "1"), (probe, "+")] {
        circ.connect(id, pin, "n1").unwrap();
    }
    for (id, pin) in [(src, "-"), (r, "2"), (probe, "-")] {
        circ.connect(id, pin, "gnd").unwrap();
    }

    let mut model = DiscreteModel::new(&circ, 1.0 / FS).unwrap();
    let mut runner = ModelRunner::new(&mut model, false);
    let y = runner.run(&DMatrix::zeros(0, 4)).unwrap();
    for n in 0..4 {
        assert!((y[(0, n)] - 2.2).abs() < 1e-12);
    }
}

#[test]
fn test_diode_resistor_matches_shockley() {
    // Drive with exactly the voltage that pushes I through the pair:
    // V = I·R + n·vt·ln(I/is + 1); the diode then drops the log term.
    let (is, n, r_ohm, i): (f64, f64, f64, f64) = (1e-12, 1.0, 2.2e3, 1e-3);
    let vt = thermal_voltage(300.15);
    let vd_expected = n * vt * ((i / is) + 1.0).ln();
    let v_in = i * r_ohm + vd_expected;

    let mut circ = Circuit::new();
    let vs = circ.add(voltage_source(v_in));
    let r = circ.add(resistor(r_ohm));
    let d = circ.add(diode(DiodeParams { is, n }));
    let probe = circ.add(voltage_probe());
    circ.connect(vs, "+", "in").unwrap();
    circ.connect(vs, "-", "gnd").unwrap();
    circ.connect(r, "1", "in").unwrap();
    circ.connect(r, "2", "out").unwrap();
    circ.connect(d, "+", "out").unwrap();
    circ.connect(d, "-", "gnd").unwrap();
    circ.connect(probe, "+", "out").unwrap();
    circ.connect(probe, "-", "gnd").unwrap();

    let mut model = DiscreteModel::new(&circ, 1.0 / FS).unwrap();
    let mut runner = ModelRunner::new(&mut model, false);
    let y = runner.run(&DMatrix::zeros(0, 2)).unwrap();
    assert!(
        (y[(0, 1)] - vd_expected).abs() < 1e-6,
        "diode voltage {} vs {}",
        y[(0, 1)],
        vd_expected
    );
}

/// Ebers-Moll branch currents as the device defines them.
fn ebers_moll(p: &BjtParams, pol: f64, v_be: f64, v_bc: f64) -> (f64, f64) {
    let nvt = p.n * thermal_voltage(300.15);
    let i_f = p.is * ((pol * v_be / nvt).exp() - 1.0);
    let i_r = p.is * ((pol * v_bc / nvt).exp() - 1.0);
    let it = i_f - i_r;
    (pol * (it + i_f / p.bf), pol * (-it + i_r / p.br))
}

fn bjt_fixture(kind: BjtKind, ib: f64, vce: f64) -> (DMatrix<f64>, BjtParams) {
    let params = BjtParams::default();
    let mut circ = Circuit::new();
    let ib_src = circ.add(current_source(ib));
    let vce_src = circ.add(voltage_source(vce));
    let q = circ.add(bjt(kind, params));
    let c_probe = circ.add(current_probe());
    let e_probe = circ.add(current_probe());

    circ.connect(ib_src, "+", "b").unwrap();
    circ.connect(ib_src, "-", "gnd").unwrap();
    circ.connect(vce_src, "+", "c_src").unwrap();
    circ.connect(vce_src, "-", "gnd").unwrap();
    circ.connect(c_probe, "+", "c_src").unwrap();
    circ.connect(c_probe, "-", "c").unwrap();
    circ.connect(q, "b", "b").unwrap();
    circ.connect(q, "c", "c").unwrap();
    circ.connect(q, "e", "e").unwrap();
    circ.connect(e_probe, "+", "e").unwrap();
    circ.connect(e_probe, "-", "gnd").unwrap();

    let mut model = DiscreteModel::new(&circ, 1.0 / FS).unwrap();
    let mut runner = ModelRunner::new(&mut model, false);
    let y = runner.run(&DMatrix::zeros(0, 2)).unwrap();
    (y, params)
}

fn check_bjt(kind: BjtKind, pol: f64) {
    let ib = pol * 10e-6;
    let vce = pol * 5.0;
    let (y, params) = bjt_fixture(kind, ib, vce);

    // Reference point: bisect v_be until the base current matches.
    let base_current = |v_be: f64| {
        let (i_be, i_bc) = ebers_moll(&params, pol, v_be, v_be - vce);
        i_be + i_bc
    };
    let (mut lo, mut hi) = (0.0f64, pol * 0.9);
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if pol * (base_current(mid) - ib) < 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let v_be = 0.5 * (lo + hi);
    let (i_be, i_bc) = ebers_moll(&params, pol, v_be, v_be - vce);

    // Probe order follows element insertion: collector first, emitter
    // second. The collector probe reads -i_bc, the emitter probe i_be.
    let ic_sim = y[(0, 1)];
    let ie_sim = y[(1, 1)];
    let scale = (pol * ib * params.bf).abs();
    assert!(
        (ic_sim - (-i_bc)).abs() < 1e-4 * scale,
        "{kind:?}: collector {ic_sim} vs {}",
        -i_bc
    );
    assert!(
        (ie_sim - i_be).abs() < 1e-4 * scale,
        "{kind:?}: emitter {ie_sim} vs {i_be}"
    );
    // Forward active: emitter and collector currents differ by the small
    // base current only.
    assert!((ie_sim - ic_sim).abs() < 0.05 * ic_sim.abs() + 1e-12);
}

#[test]
fn test_bjt_npn_forward_active() {
    check_bjt(BjtKind::Npn, 1.0);
}

#[test]
fn test_bjt_pnp_forward_active() {
    check_bjt(BjtKind::Pnp, -1.0);
}

fn clipper_circuit() -> Circuit {
    let mut circ = Circuit::new();
    let vin = circ.add(input_voltage_source());
    let r = circ.add(resistor(1e3));
    let c = circ.add(capacitor(47e-9));
    let d = circ.add(diode(DiodeParams {
        is: 1e-12,
        n: 1.0,
    }));
    let probe = circ.add(voltage_probe());
    circ.connect(vin, "+", "in").unwrap();
    circ.connect(vin, "-", "gnd").unwrap();
    circ.connect(r, "1", "in").unwrap();
    circ.connect(r, "2", "out").unwrap();
    circ.connect(c, "1", "out").unwrap();
    circ.connect(c, "2", "gnd").unwrap();
    circ.connect(d, "+", "out").unwrap();
    circ.connect(d, "-", "gnd").unwrap();
    circ.connect(probe, "+", "out").unwrap();
    circ.connect(probe, "-", "gnd").unwrap();
    circ
}

fn sine_input(samples: usize, amplitude: f64, freq: f64) -> DMatrix<f64> {
    DMatrix::from_fn(1, samples, |_, n| {
        amplitude * (2.0 * std::f64::consts::PI * freq * n as f64 / FS).sin()
    })
}

#[test]
fn test_diode_clipper_clips() {
    let circ = clipper_circuit();
    let mut model = DiscreteModel::new(&circ, 1.0 / FS).unwrap();
    let mut runner = ModelRunner::new(&mut model, false);
    let u = sine_input(44100, 2.0, 1000.0);
    let y = runner.run(&u).unwrap();
    assert_eq!((y.nrows(), y.ncols()), (1, 44100));

    let max = y.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min = y.iter().cloned().fold(f64::INFINITY, f64::min);
    // The diode clamps the positive half far below the 2 V drive; the
    // negative half passes nearly unattenuated.
    assert!(max < 1.0, "positive peak {max}");
    assert!(min < -1.2, "negative peak {min}");
    assert!(y.iter().all(|v| v.is_finite()));
}

#[test]
fn test_solver_stacks_agree() {
    let u = sine_input(2048, 2.0, 1000.0);

    let circ = clipper_circuit();
    let mut cached = compile(
        &circ,
        1.0 / FS,
        &default_solver_factory,
        &CompileOptions::default(),
    )
    .unwrap();
    let y_cached = ModelRunner::new(&mut cached, false).run(&u).unwrap();

    let mut plain = compile(
        &circ,
        1.0 / FS,
        &simple_solver_factory,
        &CompileOptions::default(),
    )
    .unwrap();
    let y_plain = ModelRunner::new(&mut plain, false).run(&u).unwrap();

    let diff = (&y_cached - &y_plain).amax();
    assert!(diff < 1e-6, "solver stacks diverged by {diff}");
}

#[test]
fn test_decompose_off_matches() {
    let u = sine_input(512, 2.0, 1000.0);
    let circ = clipper_circuit();

    let mut on = DiscreteModel::new(&circ, 1.0 / FS).unwrap();
    let y_on = ModelRunner::new(&mut on, false).run(&u).unwrap();

    let mut off = compile(
        &circ,
        1.0 / FS,
        &default_solver_factory,
        &CompileOptions { decompose: false },
    )
    .unwrap();
    let y_off = ModelRunner::new(&mut off, false).run(&u).unwrap();

    assert!((&y_on - &y_off).amax() < 1e-6);
}

#[test]
fn test_steadystate_fixed_point_with_input() {
    let circ = clipper_circuit();
    let mut model = DiscreteModel::new(&circ, 1.0 / FS).unwrap();
    steadystate_install(&mut model, &DVector::zeros(1)).unwrap();
    let before = model.state().clone();
    let mut runner = ModelRunner::new(&mut model, false);
    runner.run(&DMatrix::zeros(1, 1)).unwrap();
    assert!((runner.model().state() - &before).amax() < 1e-10);
}

#[test]
fn test_steadystate_nonzero_input_matches_dc_point() {
    // Clipper held at 1 V: the capacitor goes quiet and the output node
    // sits where the resistor and diode laws meet,
    // (u - vd)/R = is·(e^(vd/vt) - 1). The state is the capacitor charge.
    let (is, r_ohm, cap) = (1e-12, 1e3, 47e-9);
    let vt = thermal_voltage(300.15);
    let u_dc = 1.0;

    let branch_gap = |vd: f64| (u_dc - vd) / r_ohm - is * ((vd / vt).exp() - 1.0);
    let (mut lo, mut hi) = (0.0f64, 1.0f64);
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if branch_gap(mid) > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let vd_ref = 0.5 * (lo + hi);

    let circ = clipper_circuit();
    let mut model = DiscreteModel::new(&circ, 1.0 / FS).unwrap();
    let u = DVector::from_element(1, u_dc);
    let x = steadystate_install(&mut model, &u).unwrap();
    assert!(
        (x[0] / cap - vd_ref).abs() < 1e-9,
        "output node {} vs {}",
        x[0] / cap,
        vd_ref
    );

    // And it is a fixed point under that same input.
    let before = model.state().clone();
    let mut runner = ModelRunner::new(&mut model, false);
    runner.run(&DMatrix::from_element(1, 1, u_dc)).unwrap();
    assert!((runner.model().state() - &before).amax() < 1e-10);
}

#[test]
fn test_opamp_follower() {
    let mut circ = Circuit::new();
    let vs = circ.add(voltage_source(3.0));
    let op = circ.add(opamp());
    let probe = circ.add(voltage_probe());
    circ.connect(vs, "+", "s").unwrap();
    circ.connect(vs, "-", "gnd").unwrap();
    circ.connect(op, "in+", "s").unwrap();
    circ.connect(op, "in-", "out").unwrap();
    circ.connect(op, "out+", "out").unwrap();
    circ.connect(op, "out-", "gnd").unwrap();
    circ.connect(probe, "+", "out").unwrap();
    circ.connect(probe, "-", "gnd").unwrap();

    let mut model = DiscreteModel::new(&circ, 1.0 / FS).unwrap();
    let mut runner = ModelRunner::new(&mut model, false);
    let y = runner.run(&DMatrix::zeros(0, 1)).unwrap();
    assert!((y[(0, 0)] - 3.0).abs() < 1e-12);
}

#[test]
fn test_open_loop_opamp_compiles_with_arbitrary_output() {
    // No feedback: the output voltage is indeterminate. Compilation
    // warns, picks an arbitrary value, and the model still runs.
    let mut circ = Circuit::new();
    let op = circ.add(opamp());
    let probe = circ.add(voltage_probe());
    circ.connect(op, "in+", "gnd").unwrap();
    circ.connect(op, "in-", "gnd").unwrap();
    circ.connect(op, "out+", "out").unwrap();
    circ.connect(op, "out-", "gnd").unwrap();
    circ.connect(probe, "+", "out").unwrap();
    circ.connect(probe, "-", "gnd").unwrap();

    let mut model = DiscreteModel::new(&circ, 1.0 / FS).unwrap();
    let mut runner = ModelRunner::new(&mut model, false);
    let y = runner.run(&DMatrix::zeros(0, 1)).unwrap();
    assert!(y[(0, 0)].is_finite());
}
