//! Integration tests for the AppService → state machine → actuators pipeline.
//!
//! Operator lines go in through `handle_command`; assertions are made on the
//! mock bus call history and the events the core emitted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use bioreactor::app::events::AppEvent;
use bioreactor::app::ports::{ActuatorBus, Clock};
use bioreactor::control::manager::Variable;
use bioreactor::error::Error;
use bioreactor::fsm::{ProcessState, TickOutcome};
use bioreactor::fsm::settle::SettleOutcome;
use bioreactor::names;

use crate::mock_hw::{ActuatorCall, rig};

// ── Starting ──────────────────────────────────────────────────

#[test]
fn unregistered_program_is_not_found() {
    let r = rig();
    assert_eq!(r.app.fsm().start_program("Autoclave", "autoclave 1"), Err(Error::NotFound));
    assert_eq!(r.app.state(), ProcessState::Idle);
    assert!(r.bus.calls().is_empty());
}

#[test]
fn second_start_conflicts_and_leaves_first_running() {
    let r = rig();
    r.app.handle_command("mix 600").unwrap();
    r.bus.clear_calls();

    assert!(matches!(r.app.handle_command("cip 80 30"), Err(Error::Conflict(_))));
    assert_eq!(r.app.current_program(), Some("Mix"));
    assert_eq!(r.app.state(), ProcessState::Running);
    assert!(r.bus.calls().is_empty(), "rejected start must not touch actuators");
}

#[test]
fn fermentation_without_volume_is_refused() {
    let r = rig();
    let result = r.app.handle_command("fermentation 30 7 40 1 1 24 2 batch");
    assert!(matches!(result, Err(Error::Precondition(_))));
    assert_eq!(r.app.state(), ProcessState::Idle);
    assert!(r.bus.running().is_empty());
}

#[test]
fn fermentation_starts_its_loops_and_stirrer() {
    let r = rig();
    r.app.handle_command("set_initial_volume 5").unwrap();
    r.app.handle_command("fermentation 30 7 40 1 1 24 2 batch").unwrap();
    assert_eq!(r.app.state(), ProcessState::Running);
    assert!(r.bus.running().contains(&names::STIRRING_MOTOR.to_owned()));

    let pid = r.app.plant().pid();
    assert!(pid.is_running(Variable::Temperature));
}

// ── Stopping ──────────────────────────────────────────────────

#[test]
fn stop_turns_every_owned_actuator_off() {
    let r = rig();
    r.app.handle_command("mix 600").unwrap();
    assert_eq!(r.bus.running(), [names::STIRRING_MOTOR]);

    r.app.handle_command("stop").unwrap();
    assert_eq!(r.app.state(), ProcessState::Stopped);
    assert!(r.bus.running().is_empty());
    assert!(r.bus.calls().contains(&ActuatorCall::Stop { name: names::STIRRING_MOTOR.to_owned() }));
    assert_eq!(
        r.sink.count(|e| matches!(e, AppEvent::StateChanged { to: ProcessState::Stopped, .. })),
        1
    );
}

#[test]
fn stop_with_other_name_is_ignored() {
    let r = rig();
    r.app.handle_command("mix 600").unwrap();
    r.app.handle_command("stop CIP").unwrap();
    assert_eq!(r.app.state(), ProcessState::Running);
    r.app.handle_command("stop mix").unwrap();
    assert_eq!(r.app.state(), ProcessState::Stopped);
}

#[test]
fn stuck_actuator_times_out_into_error() {
    let r = rig();
    r.bus.set_stuck(names::STIRRING_MOTOR);
    r.app.handle_command("mix 600").unwrap();

    let before = r.clock.now_ms();
    let outcome = r.app.fsm().stop_all_programs().unwrap();
    assert!(matches!(outcome, SettleOutcome::TimedOut { ref still_running } if still_running[..] == [names::STIRRING_MOTOR]));
    assert_eq!(r.clock.now_ms() - before, 5_000);
    assert_eq!(r.app.state(), ProcessState::Error);
    assert_eq!(r.sink.count(|e| matches!(e, AppEvent::SettleTimedOut { .. })), 1);

    // Stop was re-issued while waiting.
    let stops = r
        .bus
        .calls()
        .iter()
        .filter(|c| matches!(c, ActuatorCall::Stop { name } if name == names::STIRRING_MOTOR))
        .count();
    assert!(stops > 2, "expected repeated stop commands, got {stops}");

    // A successful start leaves Error.
    r.app.handle_command("cip 60 10").unwrap();
    assert_eq!(r.app.state(), ProcessState::Running);
}

#[test]
fn timed_mix_completes_and_settles() {
    let r = rig();
    r.app.handle_command("mix 800 1").unwrap();
    assert_eq!(r.app.control_tick(), TickOutcome::Ran);

    r.clock.advance(60_000);
    let outcome = r.app.control_tick();
    assert_eq!(
        outcome,
        TickOutcome::Completed { program: "Mix", settle: SettleOutcome::Clean }
    );
    assert_eq!(r.app.state(), ProcessState::Completed);
    assert!(r.bus.running().is_empty());
    assert_eq!(r.app.control_tick(), TickOutcome::Idle);
}

// ── Safety ────────────────────────────────────────────────────

#[test]
fn critical_water_temperature_stops_once() {
    let r = rig();
    r.app.handle_command("mix 600").unwrap();
    r.bus.set_sensor(names::WATER_TEMP_SENSOR, 46.0);

    let report = r.app.safety_tick().unwrap();
    assert!(report.stop_required);
    assert_eq!(r.app.state(), ProcessState::Stopped);
    assert!(r.bus.running().is_empty());
    assert_eq!(r.sink.count(|e| matches!(e, AppEvent::SafetyStop(_))), 1);
    assert_eq!(r.sink.count(|e| matches!(e, AppEvent::FaultsChanged(f) if *f != 0)), 1);

    // Not due yet.
    assert!(r.app.safety_tick().is_none());

    // Still critical on the next check, but nothing left to stop.
    r.clock.advance(1_000);
    assert!(r.app.safety_tick().unwrap().stop_required);
    assert_eq!(
        r.sink.count(|e| matches!(e, AppEvent::StateChanged { to: ProcessState::Stopped, .. })),
        1
    );
}

#[test]
fn sensor_failure_is_a_warning_only() {
    let r = rig();
    r.app.handle_command("mix 600").unwrap();
    r.bus.fail_sensor(names::PH_SENSOR);

    let report = r.app.safety_tick().unwrap();
    assert!(!report.stop_required);
    assert_ne!(report.faults, 0);
    assert_eq!(r.app.state(), ProcessState::Running);
}

// ── Volume ────────────────────────────────────────────────────

#[test]
fn pump_delivery_is_reconciled_into_the_ledger() {
    let r = rig();
    r.app.handle_command("set_initial_volume 5.0").unwrap();
    r.bus.add_delivered(names::NUTRIENT_PUMP, 200.0);

    r.app.plant().reconcile_volume();
    let info = r.app.telemetry().volume;
    assert!((info.current_l - 5.2).abs() < 1e-4);
    assert!((info.cumulative.nutrient - 0.2).abs() < 1e-4);
    assert_eq!(r.bus.volume_added(names::NUTRIENT_PUMP), 0.0);
}

#[test]
fn unknown_volume_source_is_rejected() {
    let r = rig();
    r.app.handle_command("set_initial_volume 5").unwrap();
    assert!(r.app.handle_command("adjust_volume Glucose 0.5").is_err());
    assert_eq!(r.app.telemetry().volume.current_l, 5.0);

    r.app.handle_command("adjust_volume Removed 0.5").unwrap();
    assert!((r.app.telemetry().volume.current_l - 4.5).abs() < 1e-4);
}

#[test]
fn status_publishes_telemetry() {
    let r = rig();
    r.app.handle_command("mix 700").unwrap();
    r.app.handle_command("status").unwrap();
    let events = r.sink.events();
    let Some(AppEvent::Telemetry(t)) = events.last() else {
        panic!("expected telemetry, got {events:?}");
    };
    assert_eq!(t.program, Some("Mix"));
    assert_eq!(t.actuator(names::STIRRING_MOTOR), Some(700));
    assert_eq!(t.reading(names::WATER_TEMP_SENSOR), Some(25.0));
}

// ── Concurrency ───────────────────────────────────────────────

#[test]
fn stop_races_with_control_and_starts() {
    let r = rig();
    r.app.handle_command("mix 600").unwrap();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        let control = s.spawn(|| {
            let mut ticks = 0u32;
            while !done.load(Ordering::SeqCst) {
                r.app.control_tick();
                let snapshot = r.app.fsm().snapshot();
                assert_eq!(
                    snapshot.program.is_some(),
                    snapshot.state.is_active(),
                    "{:?} current in {}",
                    snapshot.program,
                    snapshot.state
                );
                ticks += 1;
            }
            ticks
        });
        s.spawn(|| {
            for i in 0..200 {
                let line = if i % 2 == 0 { "mix 600" } else { "cip 60 10000" };
                let _ = r.app.handle_command(line);
            }
        });
        s.spawn(|| {
            for _ in 0..200 {
                r.app.fsm().stop_all_programs();
            }
        });
        s.spawn(|| {
            for _ in 0..50 {
                r.app.handle_command("pause").ok();
                r.app.handle_command("resume").ok();
            }
        });
        thread::sleep(std::time::Duration::from_millis(50));
        done.store(true, Ordering::SeqCst);
        assert!(control.join().unwrap() > 0);
    });

    // Every starter has finished: a stop now is final.
    r.app.fsm().stop_all_programs();
    assert_eq!(r.app.control_tick(), TickOutcome::Idle);
    assert_eq!(r.app.current_program(), None);
    assert_eq!(r.app.state(), ProcessState::Stopped);
    assert!(r.bus.running().is_empty(), "left running: {:?}", r.bus.running());
}

#[test]
fn safety_stop_wins_over_concurrent_starts() {
    let r = rig();
    r.app.handle_command("mix 600").unwrap();
    r.bus.set_sensor(names::WATER_TEMP_SENSOR, 46.0);

    thread::scope(|s| {
        s.spawn(|| {
            for _ in 0..100 {
                let _ = r.app.handle_command("mix 600");
                r.app.control_tick();
            }
        });
        s.spawn(|| {
            for _ in 0..100 {
                r.clock.advance(1_000);
                r.app.safety_tick();
            }
        });
    });

    // The condition persists, so the next check stops whatever got in last.
    r.clock.advance(1_000);
    assert!(r.app.safety_tick().unwrap().stop_required);
    assert_eq!(r.app.current_program(), None);
    assert_eq!(r.app.state(), ProcessState::Stopped);
    assert!(r.bus.running().is_empty());
    assert!(r.sink.count(|e| matches!(e, AppEvent::SafetyStop(_))) >= 1);
}
