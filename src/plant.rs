//! Shared handles to the plant collaborators.
//!
//! Built once at startup and cloned into every program and task. The
//! PID manager and the volume ledger each sit behind their own mutex; they
//! are locked only after the state-machine lock (never before) and never
//! while holding each other.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::app::ports::{ActuatorBus, Clock, SensorBus};
use crate::control::manager::PidManager;
use crate::error::ActuatorError;
use crate::volume::VolumeLedger;

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// A panicking task must not leave the controller unable to stop actuators.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cheap-to-clone bundle of the collaborators programs drive.
#[derive(Clone)]
pub struct Plant {
    pub sensors: Arc<dyn SensorBus>,
    pub actuators: Arc<dyn ActuatorBus>,
    pub clock: Arc<dyn Clock>,
    pub pid: Arc<Mutex<PidManager>>,
    pub volume: Arc<Mutex<VolumeLedger>>,
}

impl Plant {
    pub fn new(
        sensors: Arc<dyn SensorBus>,
        actuators: Arc<dyn ActuatorBus>,
        clock: Arc<dyn Clock>,
        pid: PidManager,
        volume: VolumeLedger,
    ) -> Self {
        Self {
            sensors,
            actuators,
            clock,
            pid: Arc::new(Mutex::new(pid)),
            volume: Arc::new(Mutex::new(volume)),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn pid(&self) -> MutexGuard<'_, PidManager> {
        lock(&self.pid)
    }

    pub fn volume(&self) -> MutexGuard<'_, VolumeLedger> {
        lock(&self.volume)
    }

    /// Run one PID manager cycle against the plant's buses.
    pub fn update_loops(&self) {
        let now = self.now_ms();
        self.pid()
            .update_all(self.sensors.as_ref(), self.actuators.as_ref(), now);
    }

    /// Pull actuator-reported volumes into the ledger and reconcile.
    pub fn reconcile_volume(&self) {
        self.volume().update_volume(self.actuators.as_ref());
    }

    /// Command every named actuator off, logging failures.
    pub fn stop_actuators(&self, names: &[&'static str]) {
        for name in names {
            match self.actuators.stop_actuator(name) {
                Ok(()) => {}
                Err(ActuatorError::NotFound) => log::debug!("stop {name}: not fitted"),
                Err(e) => log::warn!("stop {name}: {e}"),
            }
        }
    }
}

/// Plant over an in-memory simulator and a manual clock, for unit tests.
#[cfg(test)]
pub(crate) fn test_plant() -> (
    Plant,
    Arc<crate::adapters::sim::SimulatedPlant>,
    Arc<crate::adapters::time::ManualClock>,
) {
    use crate::adapters::sim::SimulatedPlant;
    use crate::adapters::time::ManualClock;
    use crate::config::SystemConfig;

    let config = SystemConfig::default();
    let clock = Arc::new(ManualClock::new());
    let sim = Arc::new(SimulatedPlant::new(clock.clone()));
    let plant = Plant::new(
        sim.clone(),
        sim.clone(),
        clock.clone(),
        PidManager::new(&config),
        VolumeLedger::new(&config.volume),
    );
    (plant, sim, clock)
}
