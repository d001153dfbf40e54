//! Bounded wait for actuators to confirm they are off.
//!
//! Run by the state machine after a program stops, with the machine lock
//! released so the safety task is never blocked behind it. Each poll
//! re-issues the stop command to anything still running; the poll delay
//! starts at `poll_ms` and doubles up to `max_poll_ms`.

use heapless::Vec;
use log::{debug, warn};
use serde::Serialize;

use crate::app::ports::{ActuatorBus, Clock};
use crate::config::TimingConfig;

/// Upper bound on actuators a single program owns.
pub const MAX_SETTLE: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlePolicy {
    pub timeout_ms: u64,
    pub poll_ms: u64,
    pub max_poll_ms: u64,
}

impl SettlePolicy {
    pub fn from_timing(timing: &TimingConfig) -> Self {
        Self {
            timeout_ms: u64::from(timing.settle_timeout_ms),
            poll_ms: u64::from(timing.settle_poll_ms).max(1),
            max_poll_ms: u64::from(timing.settle_max_poll_ms.max(timing.settle_poll_ms)).max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SettleOutcome {
    Clean,
    TimedOut { still_running: Vec<&'static str, MAX_SETTLE> },
}

impl SettleOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }
}

fn running(actuators: &dyn ActuatorBus, names: &[&'static str]) -> Vec<&'static str, MAX_SETTLE> {
    names
        .iter()
        .copied()
        .filter(|n| actuators.is_actuator_running(n))
        .take(MAX_SETTLE)
        .collect()
}

/// Poll until none of `names` is running or the policy times out.
pub fn wait_for_settle(
    actuators: &dyn ActuatorBus,
    clock: &dyn Clock,
    names: &[&'static str],
    policy: &SettlePolicy,
) -> SettleOutcome {
    let started = clock.now_ms();
    let mut delay = policy.poll_ms;
    loop {
        let still_running = running(actuators, names);
        if still_running.is_empty() {
            debug!("settled after {} ms", clock.now_ms().saturating_sub(started));
            return SettleOutcome::Clean;
        }
        let waited = clock.now_ms().saturating_sub(started);
        if waited >= policy.timeout_ms {
            warn!("actuators still running after {waited} ms: {still_running:?}");
            return SettleOutcome::TimedOut { still_running };
        }
        for name in &still_running {
            if let Err(e) = actuators.stop_actuator(name) {
                debug!("re-stop {name}: {e}");
            }
        }
        clock.sleep_ms(delay.min(policy.timeout_ms - waited));
        delay = (delay * 2).min(policy.max_poll_ms);
    }
}
