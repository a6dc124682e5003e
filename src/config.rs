//! JSON world description.
//!
//! A [`WorldConfig`] is read with `serde_json`, checked with
//! [`WorldConfig::validate`] and turned into a [`World`] by
//! [`WorldConfig::build`].

use std::collections::HashMap;
use std::path::Path;

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::core::boundary::{Boundary, BoundaryKind};
use crate::core::interaction::{Interaction, InteractionKind, PairSelector};
use crate::core::liouvillean::Liouvillean;
use crate::core::locals::{Local, LocalKind};
use crate::core::particle::{Particle, DIM};
use crate::core::roots::{PlateGeometry, PlateRootParams};
use crate::core::sim::{Simulation, World};
use crate::core::species::Species;
use crate::core::systems::{System, SystemKind};
use crate::core::vector::{self, Matrix, Vector};
use crate::error::{Error, Result};

fn default_elasticity() -> f64 {
    1.0
}

fn default_boundary() -> BoundaryKind {
    BoundaryKind::Periodic
}

fn default_max_speed() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    pub box_size: Vector,
    #[serde(default = "default_boundary")]
    pub boundary: BoundaryKind,
    pub species: Vec<SpeciesConfig>,
    #[serde(default)]
    pub interactions: Vec<InteractionConfig>,
    /// Rigid clusters, as lists of particle IDs.
    #[serde(default)]
    pub structures: Vec<Vec<usize>>,
    #[serde(default)]
    pub locals: Vec<LocalConfig>,
    #[serde(default)]
    pub systems: Vec<SystemConfig>,
    pub particles: ParticlesConfig,
    #[serde(default)]
    pub dynamics: Liouvillean,
    #[serde(default)]
    pub min_cell_size: Option<f64>,
    #[serde(default)]
    pub plate_root: PlateRootParams,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// A species covering particle IDs `start..end`. A `null` mass is infinite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeciesConfig {
    pub name: String,
    pub mass: Option<f64>,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionConfig {
    pub name: String,
    /// Species pair by name; absent means every pair.
    #[serde(default)]
    pub species: Option<(String, String)>,
    #[serde(default)]
    pub clustered: bool,
    #[serde(flatten)]
    pub law: LawConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LawConfig {
    HardSphere {
        diameter: f64,
        #[serde(default = "default_elasticity")]
        elasticity: f64,
    },
    SquareWell {
        diameter: f64,
        lambda: f64,
        well_depth: f64,
        #[serde(default = "default_elasticity")]
        elasticity: f64,
    },
    ParallelCubes {
        width: f64,
        #[serde(default = "default_elasticity")]
        elasticity: f64,
        #[serde(default)]
        rotation: Option<Matrix>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    pub name: String,
    #[serde(default)]
    pub species: Option<String>,
    #[serde(flatten)]
    pub kind: LocalKindConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LocalKindConfig {
    Wall {
        origin: Vector,
        normal: Vector,
        #[serde(default = "default_elasticity")]
        elasticity: f64,
    },
    ThermalWall {
        origin: Vector,
        normal: Vector,
        temperature: f64,
    },
    Cylinder {
        origin: Vector,
        axis: Vector,
        radius: f64,
        #[serde(default = "default_elasticity")]
        elasticity: f64,
    },
    OscillatingPlate {
        origin: Vector,
        normal: Vector,
        delta: f64,
        omega: f64,
        #[serde(default)]
        phase: f64,
        sigma: f64,
        #[serde(default = "default_elasticity")]
        elasticity: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: SystemKindConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SystemKindConfig {
    Ticker {
        period: f64,
    },
    CompressionRebuild,
    AndersenThermostat {
        mean_time: f64,
        temperature: f64,
        #[serde(default)]
        species: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticleState {
    pub r: Vector,
    pub v: Vector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticlesConfig {
    /// One entry per particle, in ID order.
    Explicit(Vec<ParticleState>),
    /// Non-overlapping random placement with uniform velocity components in
    /// `[-max_speed, max_speed]`.
    Random {
        count: usize,
        #[serde(default = "default_max_speed")]
        max_speed: f64,
    },
}

impl ParticlesConfig {
    pub fn count(&self) -> usize {
        match self {
            ParticlesConfig::Explicit(list) => list.len(),
            ParticlesConfig::Random { count, .. } => *count,
        }
    }
}

impl WorldConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    fn species_index(&self) -> HashMap<&str, usize> {
        self.species
            .iter()
            .enumerate()
            .map(|(k, s)| (s.name.as_str(), k))
            .collect()
    }

    fn lookup(index: &HashMap<&str, usize>, name: &str, who: &str) -> Result<usize> {
        index
            .get(name)
            .copied()
            .ok_or_else(|| Error::Config(format!("{who} refers to unknown species '{name}'")))
    }

    /// Check cross references and ranges without building anything.
    pub fn validate(&self) -> Result<()> {
        let n = self.particles.count();
        if n == 0 {
            return Err(Error::Config("no particles".into()));
        }
        if !self.box_size.iter().all(|&l| l.is_finite() && l > 0.0) {
            return Err(Error::Config("box_size components must be finite and > 0".into()));
        }
        if self.species.is_empty() {
            return Err(Error::Config("at least one species is required".into()));
        }
        let index = self.species_index();
        if index.len() != self.species.len() {
            return Err(Error::Config("species names must be unique".into()));
        }

        let mut ranges: Vec<(usize, usize, &str)> = self
            .species
            .iter()
            .map(|s| (s.start, s.end, s.name.as_str()))
            .collect();
        ranges.sort_unstable();
        let mut next = 0;
        for (start, end, name) in ranges {
            if start != next || end <= start {
                return Err(Error::Config(format!(
                    "species '{name}' covers {start}..{end}; species ranges must tile 0..{n} without gaps or overlap"
                )));
            }
            next = end;
        }
        if next != n {
            return Err(Error::Config(format!(
                "species ranges cover 0..{next} but there are {n} particles"
            )));
        }

        for it in &self.interactions {
            if let Some((a, b)) = &it.species {
                Self::lookup(&index, a, &format!("interaction '{}'", it.name))?;
                Self::lookup(&index, b, &format!("interaction '{}'", it.name))?;
            }
        }
        for l in &self.locals {
            if let Some(s) = &l.species {
                Self::lookup(&index, s, &format!("local '{}'", l.name))?;
            }
        }
        for s in &self.systems {
            if let SystemKindConfig::AndersenThermostat {
                species: Some(name),
                ..
            } = &s.kind
            {
                Self::lookup(&index, name, &format!("system '{}'", s.name))?;
            }
        }
        for (k, members) in self.structures.iter().enumerate() {
            if let Some(bad) = members.iter().find(|&&id| id >= n) {
                return Err(Error::Config(format!(
                    "structure {k} references particle {bad}, but there are {n} particles"
                )));
            }
        }
        if let Some(h) = self.min_cell_size {
            if !(h.is_finite() && h > 0.0) {
                return Err(Error::Config("min_cell_size must be finite and > 0".into()));
            }
        }
        Ok(())
    }

    /// Validate and convert into the engine's world description.
    pub fn build(&self) -> Result<World> {
        self.validate()?;
        let index = self.species_index();
        let boundary = Boundary::new(self.boundary, self.box_size)?;

        let species = self
            .species
            .iter()
            .map(|s| Species::new(s.name.clone(), s.mass.unwrap_or(f64::INFINITY)))
            .collect::<Result<Vec<_>>>()?;

        let mut interactions = Vec::with_capacity(self.interactions.len());
        for it in &self.interactions {
            let selector = match &it.species {
                Some((a, b)) => PairSelector::Species(index[a.as_str()], index[b.as_str()]),
                None => PairSelector::All,
            };
            let kind = match it.law {
                LawConfig::HardSphere {
                    diameter,
                    elasticity,
                } => InteractionKind::HardSphere {
                    diameter,
                    elasticity,
                },
                LawConfig::SquareWell {
                    diameter,
                    lambda,
                    well_depth,
                    elasticity,
                } => InteractionKind::SquareWell {
                    diameter,
                    lambda,
                    well_depth,
                    elasticity,
                },
                LawConfig::ParallelCubes {
                    width,
                    elasticity,
                    rotation,
                } => InteractionKind::ParallelCubes {
                    width,
                    elasticity,
                    rotation: rotation.unwrap_or_else(vector::identity),
                },
            };
            interactions.push(Interaction::new(it.name.clone(), kind, selector)?.clustered(it.clustered));
        }

        let mut locals = Vec::with_capacity(self.locals.len());
        for l in &self.locals {
            let sel = l.species.as_ref().map(|s| index[s.as_str()]);
            let kind = match l.kind {
                LocalKindConfig::Wall {
                    origin,
                    normal,
                    elasticity,
                } => LocalKind::Wall {
                    origin,
                    nhat: normal,
                    elasticity,
                },
                LocalKindConfig::ThermalWall {
                    origin,
                    normal,
                    temperature,
                } => LocalKind::AndersenWall {
                    origin,
                    nhat: normal,
                    sqrt_t: temperature.sqrt(),
                },
                LocalKindConfig::Cylinder {
                    origin,
                    axis,
                    radius,
                    elasticity,
                } => LocalKind::Cylinder {
                    origin,
                    axis,
                    radius,
                    elasticity,
                },
                LocalKindConfig::OscillatingPlate {
                    origin,
                    normal,
                    delta,
                    omega,
                    phase,
                    sigma,
                    elasticity,
                } => LocalKind::OscillatingPlate {
                    geometry: PlateGeometry {
                        origin,
                        nhat: normal,
                        delta,
                        omega,
                        phase,
                        sigma,
                    },
                    elasticity,
                },
            };
            locals.push(Local::new(l.name.clone(), kind, sel)?);
        }

        let mut systems = Vec::with_capacity(self.systems.len());
        for s in &self.systems {
            let kind = match &s.kind {
                SystemKindConfig::Ticker { period } => SystemKind::Ticker { period: *period },
                SystemKindConfig::CompressionRebuild => SystemKind::CompressionRebuild,
                SystemKindConfig::AndersenThermostat {
                    mean_time,
                    temperature,
                    species,
                } => SystemKind::AndersenThermostat {
                    mean_time: *mean_time,
                    sqrt_t: temperature.sqrt(),
                    species: species.as_ref().map(|name| index[name.as_str()]),
                },
            };
            systems.push(System::new(s.name.clone(), kind)?);
        }

        let mut species_of = vec![0usize; self.particles.count()];
        for (k, s) in self.species.iter().enumerate() {
            species_of[s.start..s.end].iter_mut().for_each(|x| *x = k);
        }
        let particles = match &self.particles {
            ParticlesConfig::Explicit(list) => list
                .iter()
                .enumerate()
                .map(|(id, st)| Particle::new(id, st.r, st.v, species_of[id]))
                .collect::<Result<Vec<_>>>()?,
            ParticlesConfig::Random { count, max_speed } => {
                let separation = interactions
                    .iter()
                    .map(|it| match it.kind {
                        InteractionKind::HardSphere { diameter, .. }
                        | InteractionKind::SquareWell { diameter, .. } => diameter,
                        InteractionKind::ParallelCubes { width, .. } => width * (DIM as f64).sqrt(),
                    })
                    .fold(0.0, f64::max);
                random_particles(&boundary, *count, separation, *max_speed, &species_of, self.seed)?
            }
        };

        Ok(World {
            boundary,
            species,
            interactions,
            structures: self.structures.clone(),
            locals,
            systems,
            particles,
            liouvillean: self.dynamics,
            min_cell_size: self.min_cell_size,
            plate_params: self.plate_root,
            seed: self.seed,
        })
    }

    /// Build the world and initialise a simulation from it.
    pub fn into_simulation(&self) -> Result<Simulation> {
        Simulation::new(self.build()?)
    }
}

/// Check whether a candidate position overlaps any existing particle.
fn overlaps_existing(particles: &[Particle], r: &Vector, separation: f64, bc: &Boundary) -> bool {
    let min2 = separation * separation;
    particles.iter().any(|p| {
        let mut d = vector::sub(r, &p.r);
        bc.minimum_image(&mut d);
        vector::norm2(&d) < min2
    })
}

/// Rejection-sample `count` positions at least `separation` apart.
fn random_particles(
    bc: &Boundary,
    count: usize,
    separation: f64,
    max_speed: f64,
    species_of: &[usize],
    seed: Option<u64>,
) -> Result<Vec<Particle>> {
    if !(max_speed.is_finite() && max_speed >= 0.0) {
        return Err(Error::Config("max_speed must be finite and >= 0".into()));
    }
    let mut rng: StdRng = match seed {
        Some(s) => SeedableRng::seed_from_u64(s),
        None => SeedableRng::seed_from_u64(rand::rng().random()),
    };
    // Keep centres off reflective faces by half a separation.
    let margin = match bc.kind {
        BoundaryKind::Periodic => 0.0,
        BoundaryKind::Reflective => 0.5 * separation,
    };
    for &l in &bc.size {
        if l <= 2.0 * margin {
            return Err(Error::Config("box too small for the particle size".into()));
        }
    }
    let max_attempts = 1_000_000usize;
    let mut particles: Vec<Particle> = Vec::with_capacity(count);
    for id in 0..count {
        let mut attempts = 0usize;
        let r = loop {
            if attempts >= max_attempts {
                return Err(Error::Config(format!(
                    "failed to place particle {id} without overlap; try fewer particles or a bigger box"
                )));
            }
            attempts += 1;
            let mut r = [0.0_f64; DIM];
            for (k, r_k) in r.iter_mut().enumerate() {
                let half = 0.5 * bc.size[k] - margin;
                *r_k = rng.random_range(-half..half);
            }
            if !overlaps_existing(&particles, &r, separation, bc) {
                break r;
            }
        };
        let mut v = [0.0_f64; DIM];
        if max_speed > 0.0 {
            v.iter_mut()
                .for_each(|x| *x = rng.random_range(-max_speed..=max_speed));
        }
        particles.push(Particle::new(id, r, v, species_of[id])?);
    }
    Ok(particles)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEAD_ON: &str = r#"{
        "box_size": [10.0, 10.0, 10.0],
        "species": [{"name": "A", "mass": 1.0, "start": 0, "end": 2}],
        "interactions": [{"name": "hs", "type": "hard_sphere", "diameter": 1.0}],
        "particles": {"explicit": [
            {"r": [-2.0, 0.0, 0.0], "v": [1.0, 0.0, 0.0]},
            {"r": [2.0, 0.0, 0.0], "v": [-1.0, 0.0, 0.0]}
        ]},
        "seed": 3
    }"#;

    #[test]
    fn parses_minimal_world() -> Result<()> {
        let cfg = WorldConfig::from_json_str(HEAD_ON)?;
        assert_eq!(cfg.boundary, BoundaryKind::Periodic);
        assert_eq!(cfg.dynamics, Liouvillean::Newtonian);
        let world = cfg.build()?;
        assert_eq!(world.particles.len(), 2);
        assert_eq!(world.interactions[0].max_distance(), 1.0);
        Ok(())
    }

    #[test]
    fn parses_every_section() -> Result<()> {
        let text = r#"{
            "box_size": [8.0, 8.0, 8.0],
            "boundary": "reflective",
            "species": [
                {"name": "A", "mass": 1.0, "start": 0, "end": 3},
                {"name": "Fixed", "mass": null, "start": 3, "end": 4}
            ],
            "interactions": [
                {"name": "sw", "type": "square_well", "diameter": 1.0, "lambda": 1.5,
                 "well_depth": 1.0, "species": ["A", "A"], "clustered": true},
                {"name": "rest", "type": "hard_sphere", "diameter": 1.0, "elasticity": 0.9}
            ],
            "structures": [[0, 1]],
            "locals": [
                {"name": "plate", "type": "oscillating_plate", "origin": [0.0, 0.0, 0.0],
                 "normal": [0.0, 0.0, 1.0], "delta": 0.1, "omega": 2.0, "sigma": 0.5},
                {"name": "hot", "type": "thermal_wall", "origin": [0.0, 0.0, 3.0],
                 "normal": [0.0, 0.0, -1.0], "temperature": 2.0, "species": "A"}
            ],
            "systems": [
                {"name": "tick", "type": "ticker", "period": 0.5},
                {"name": "bath", "type": "andersen_thermostat", "mean_time": 1.0, "temperature": 1.0}
            ],
            "particles": {"random": {"count": 4}},
            "dynamics": {"type": "newtonian"},
            "plate_root": {"tolerance": 1e-9},
            "seed": 11
        }"#;
        let cfg = WorldConfig::from_json_str(text)?;
        let world = cfg.build()?;
        assert!(world.species[1].is_fixed());
        assert_eq!(world.particles[3].species, 1);
        assert!(world.interactions[0].clustered);
        assert_eq!(world.plate_params.tolerance, 1e-9);
        assert_eq!(world.plate_params.max_iterations, PlateRootParams::default().max_iterations);
        match &world.locals[1].kind {
            LocalKind::AndersenWall { sqrt_t, .. } => assert!((sqrt_t - 2f64.sqrt()).abs() < 1e-15),
            other => panic!("unexpected local {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn species_ranges_must_tile_the_particles() -> Result<()> {
        let mut cfg = WorldConfig::from_json_str(HEAD_ON)?;
        cfg.species[0].end = 1;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        Ok(())
    }

    #[test]
    fn unknown_species_names_are_rejected() -> Result<()> {
        let mut cfg = WorldConfig::from_json_str(HEAD_ON)?;
        cfg.interactions[0].species = Some(("A".into(), "B".into()));
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("'B'"));
        Ok(())
    }

    #[test]
    fn random_placement_respects_separation() -> Result<()> {
        let bc = Boundary::new(BoundaryKind::Periodic, [6.0; DIM])?;
        let species = vec![0; 20];
        let parts = random_particles(&bc, 20, 1.0, 1.0, &species, Some(5))?;
        for (a, p) in parts.iter().enumerate() {
            assert!(!overlaps_existing(&parts[..a], &p.r, 1.0, &bc));
            assert!(p.v.iter().all(|x| x.abs() <= 1.0));
        }
        Ok(())
    }

    #[test]
    fn malformed_json_is_a_json_error() {
        let err = WorldConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }
}
