//! Closed-loop control.
//!
//! - [`pid`]: the bare PID arithmetic.
//! - [`pid_loop`]: one regulated variable with throttling, hysteresis and
//!   two-phase gain scheduling.
//! - [`manager`]: the set of loops, their actuator routing and stirring.

pub mod manager;
pub mod pid;
pub mod pid_loop;
