//! Snapshots of a running simulation and the trajectory writers.
//!
//! Snapshots are only taken between events, when every particle has been
//! streamed to the current time.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::core::event::EventType;
use crate::core::sim::Simulation;
use crate::core::systems::Sample;
use crate::core::vector::Vector;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Extended xyz: a count line, a comment line, one line per particle.
    Xyz,
    /// One JSON document holding every frame.
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xyz" => Ok(OutputFormat::Xyz),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format '{other}' (expected xyz or json)")),
        }
    }
}

/// Consistent state of every particle at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub time: f64,
    pub event_count: u64,
    /// Species name per particle ID.
    pub species: Vec<String>,
    pub positions: Vec<Vector>,
    pub velocities: Vec<Vector>,
}

impl Snapshot {
    pub fn capture(sim: &Simulation) -> Self {
        let names = sim.species();
        Self {
            time: sim.time(),
            event_count: sim.event_count(),
            species: sim
                .particles()
                .iter()
                .map(|p| names[p.species].name.clone())
                .collect(),
            positions: sim.positions(),
            velocities: sim.velocities(),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Streams frames in xyz form as they are captured.
pub struct XyzWriter<W: Write> {
    out: W,
    frames: usize,
}

impl<W: Write> XyzWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, frames: 0 }
    }

    pub fn write_frame(&mut self, snap: &Snapshot) -> Result<()> {
        writeln!(self.out, "{}", snap.len())?;
        writeln!(
            self.out,
            "time={:.12e} events={} columns=name:x:y:z:vx:vy:vz",
            snap.time, snap.event_count
        )?;
        for ((name, r), v) in snap
            .species
            .iter()
            .zip(&snap.positions)
            .zip(&snap.velocities)
        {
            writeln!(
                self.out,
                "{name} {:.12e} {:.12e} {:.12e} {:.12e} {:.12e} {:.12e}",
                r[0], r[1], r[2], v[0], v[1], v[2]
            )?;
        }
        self.out.flush()?;
        self.frames += 1;
        Ok(())
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Everything the JSON output holds about a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport<'a> {
    pub frames: &'a [Snapshot],
    pub samples: &'a [Sample],
    pub event_counts: Vec<(EventType, u64)>,
    pub stale_events: u64,
    pub kinetic_energy: f64,
    pub internal_energy: f64,
}

impl<'a> RunReport<'a> {
    pub fn new(sim: &'a Simulation, frames: &'a [Snapshot]) -> Self {
        Self {
            frames,
            samples: sim.samples(),
            event_counts: sim.event_counts(),
            stale_events: sim.stale_count(),
            kinetic_energy: sim.kinetic_energy(),
            internal_energy: sim.internal_energy(),
        }
    }
}

pub fn write_json<W: Write>(mut out: W, report: &RunReport<'_>) -> Result<()> {
    serde_json::to_writer_pretty(&mut out, report)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}
