//! Event-driven molecular dynamics.
//!
//! A [`config::WorldConfig`] describes particles, species, interactions,
//! boundaries and system events; [`core::Simulation`] predicts every event
//! analytically and executes them in time order.

pub mod config;
pub mod core;
pub mod error;
pub mod output;

#[cfg(feature = "python")]
mod python;

pub use crate::config::WorldConfig;
pub use crate::core::Simulation;
pub use crate::error::{Error, Result};
