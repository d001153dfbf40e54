//! Application core wiring.
//!
//! The domain rules live in [`crate::fsm`], [`crate::programs`],
//! [`crate::control`], [`crate::volume`] and [`crate::safety`]. This module
//! holds what ties them to the outside world: the **port traits** in
//! [`ports`], inbound [`commands`] and their [`intake`] queue, outbound [`events`], and the
//! [`service`] that the periodic tasks drive.

pub mod commands;
pub mod events;
pub mod intake;
pub mod ports;
pub mod service;
