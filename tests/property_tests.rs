//! Property and fuzz-style tests for robustness of core data structures.
//!
//! Runs on the host only; proptest is not available for embedded targets.

#![cfg(not(target_os = "espidf"))]

use std::sync::Arc;

use bioreactor::adapters::log_sink::LogEventSink;
use bioreactor::adapters::sim::SimulatedPlant;
use bioreactor::adapters::time::ManualClock;
use bioreactor::app::commands::{AppCommand, Args};
use bioreactor::app::service::AppService;
use bioreactor::config::{SystemConfig, VolumeConfig};
use bioreactor::fsm::ProcessState;
use bioreactor::volume::VolumeLedger;
use proptest::prelude::*;

fn ledger() -> VolumeLedger {
    VolumeLedger::new(&SystemConfig::default().volume)
}

fn bounds(config: &VolumeConfig) -> (f32, f32) {
    (config.min_l, config.max_allowed_l())
}

// ── Volume ledger bounds ──────────────────────────────────────

#[derive(Debug, Clone)]
enum VolumeOp {
    Record(f32, &'static str),
    Reconcile,
}

/// Mostly plausible deltas, with huge and extreme ones mixed in.
fn arb_delta() -> impl Strategy<Value = f32> {
    prop_oneof![
        4 => -5.0f32..5.0,
        2 => -1.0e6f32..1.0e6,
        1 => Just(f32::MAX),
        1 => Just(f32::MIN),
    ]
}

fn arb_volume_op() -> impl Strategy<Value = VolumeOp> {
    let source = prop_oneof![Just("NaOH"), Just("Nutrient"), Just("Microalgae"), Just("Removed")];
    prop_oneof![
        3 => (arb_delta(), source).prop_map(|(a, s)| VolumeOp::Record(a, s)),
        1 => Just(VolumeOp::Reconcile),
    ]
}

proptest! {
    /// Once a baseline is set the ledger never leaves [min, max allowed],
    /// whatever sequence of deltas arrives.
    #[test]
    fn ledger_stays_within_bounds(
        initial in 0.6f32..8.9,
        ops in proptest::collection::vec(arb_volume_op(), 1..=40),
    ) {
        let clock = Arc::new(ManualClock::new());
        let sim = SimulatedPlant::new(clock);
        let mut v = ledger();
        let (min, max) = bounds(&SystemConfig::default().volume);
        v.set_initial_volume(initial).unwrap();

        for op in &ops {
            match op {
                VolumeOp::Record(amount, source) => { let _ = v.record_volume_change(*amount, source); }
                VolumeOp::Reconcile => v.update_volume(&sim),
            }
            prop_assert!(v.current_volume() >= min - 1e-4);
            prop_assert!(v.current_volume() <= max + 1e-4);
        }
        v.update_volume(&sim);
        prop_assert!(v.current_volume() >= min - 1e-4 && v.current_volume() <= max + 1e-4);
        prop_assert!(v.available_volume() >= -1e-4);
    }

    /// An out-of-range baseline is refused and changes nothing.
    #[test]
    fn invalid_initial_volume_is_a_no_op(
        first in 0.6f32..8.9,
        bad in prop_oneof![-100.0f32..=0.0, 9.0001f32..100.0],
    ) {
        let mut v = ledger();
        v.set_initial_volume(first).unwrap();
        prop_assert!(v.set_initial_volume(bad).is_err());
        prop_assert_eq!(v.current_volume(), first);
        prop_assert!(v.has_baseline());
    }

    /// Arbitrary operator text never panics the tokenizer or router.
    #[test]
    fn command_parsing_never_panics(line in ".{0,200}") {
        let _ = Args::parse(&line);
        let _ = AppCommand::parse(&line);
    }
}

// ── State machine: at most one program ────────────────────────

#[derive(Debug, Clone)]
enum FsmOp {
    Start(&'static str),
    Stop,
    Pause,
    Resume,
    Tick(u64),
}

fn arb_fsm_op() -> impl Strategy<Value = FsmOp> {
    prop_oneof![
        Just(FsmOp::Start("mix 600 1")),
        Just(FsmOp::Start("cip 70 2")),
        Just(FsmOp::Start("drain 50 30")),
        Just(FsmOp::Start("tests")),
        Just(FsmOp::Stop),
        Just(FsmOp::Pause),
        Just(FsmOp::Resume),
        (0u64..90_000).prop_map(FsmOp::Tick),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever the command order, at most one program is current and the
    /// published state agrees with it.
    #[test]
    fn at_most_one_program_is_current(
        ops in proptest::collection::vec(arb_fsm_op(), 1..=30),
    ) {
        let clock = Arc::new(ManualClock::new());
        let sim = Arc::new(SimulatedPlant::fermenter(clock.clone()));
        let app = AppService::new(
            SystemConfig::default(),
            sim.clone(),
            sim.clone(),
            clock.clone(),
            Arc::new(LogEventSink::new()),
        ).unwrap();
        app.handle_command("set_initial_volume 5").unwrap();

        for op in &ops {
            let before = app.current_program();
            match op {
                FsmOp::Start(line) => {
                    let started = app.handle_command(line).is_ok();
                    if before.is_some() {
                        prop_assert!(!started, "start accepted while {before:?} was current");
                    }
                }
                FsmOp::Stop => { let _ = app.handle_command("stop"); }
                FsmOp::Pause => { let _ = app.handle_command("pause"); }
                FsmOp::Resume => { let _ = app.handle_command("resume"); }
                FsmOp::Tick(ms) => {
                    clock.advance(*ms);
                    app.control_tick();
                }
            }

            let state = app.state();
            match app.current_program() {
                Some(_) => prop_assert!(state.is_active(), "program current in {state}"),
                None => prop_assert!(!state.is_active(), "no program but state {state}"),
            }
        }

        app.shutdown();
        prop_assert!(app.current_program().is_none());
        prop_assert_ne!(app.state(), ProcessState::Running);
    }
}
