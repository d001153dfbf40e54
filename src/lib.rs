//! Bioreactor process-control core.
//!
//! Exposes the pure-logic modules for integration testing and for board
//! firmware that supplies its own sensor and actuator adapters.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod control;
pub mod error;
pub mod fsm;
pub mod names;
pub mod plant;
pub mod programs;
pub mod safety;
pub mod volume;
