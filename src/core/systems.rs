//! Timed system events: periodic sampling, the compression cell rebuild and
//! the Andersen thermostat. They share the event queue with particle events
//! and re-arm every time they fire.

use rand::Rng;
use rand_distr::{Distribution, Exp};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum SystemKind {
    /// Record a [`Sample`] every `period`.
    Ticker { period: f64 },
    /// Rebuild the cell list before growing interactions outgrow it.
    CompressionRebuild,
    /// Redraw a random particle's velocity; events arrive as a Poisson
    /// process with mean spacing `mean_time`.
    AndersenThermostat {
        mean_time: f64,
        sqrt_t: f64,
        species: Option<usize>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct System {
    pub name: String,
    pub kind: SystemKind,
}

impl System {
    pub fn new(name: impl Into<String>, kind: SystemKind) -> Result<Self> {
        let name = name.into();
        let positive = |what: &str, x: f64| {
            if x.is_finite() && x > 0.0 {
                Ok(())
            } else {
                Err(Error::InvalidParam(format!(
                    "{what} of system '{name}' must be finite and > 0"
                )))
            }
        };
        match &kind {
            SystemKind::Ticker { period } => positive("period", *period)?,
            SystemKind::CompressionRebuild => {}
            SystemKind::AndersenThermostat {
                mean_time, sqrt_t, ..
            } => {
                positive("mean time", *mean_time)?;
                positive("temperature", *sqrt_t)?;
            }
        }
        Ok(Self { name, kind })
    }
}

/// One row of the ticker's sample log.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Sample {
    pub time: f64,
    pub event_count: u64,
    pub kinetic_energy: f64,
    pub internal_energy: f64,
}

/// Delay from `now` until the narrowest cell (`min_cell_dim`) equals the
/// longest interaction, whose length at `t = 0` is `max_orig_range` and
/// which grows as `1 + growth_rate * t`. `None` when it never does.
pub fn compression_rebuild_delay(
    min_cell_dim: f64,
    max_orig_range: f64,
    growth_rate: f64,
    now: f64,
) -> Option<f64> {
    if !(growth_rate > 0.0) || !(max_orig_range > 0.0) {
        return None;
    }
    let at = (min_cell_dim / max_orig_range - 1.0) / growth_rate;
    if at.is_finite() {
        Some((at - now).max(0.0))
    } else {
        None
    }
}

/// Exponentially distributed waiting time with the given mean.
pub fn thermostat_delay<R: Rng + ?Sized>(mean_time: f64, rng: &mut R) -> Result<f64> {
    let exp = Exp::new(1.0 / mean_time)
        .map_err(|e| Error::InvalidParam(format!("thermostat rate: {e}")))?;
    Ok(exp.sample(rng))
}
