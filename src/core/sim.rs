use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use log::{debug, info, trace, warn};
use rand::{rng, rngs::StdRng, Rng, SeedableRng};

use crate::core::boundary::{Boundary, BoundaryKind};
use crate::core::cells::CellList;
use crate::core::event::{Event, EventKind, EventType};
use crate::core::interaction::{CaptureMap, Interaction, InteractionKind, InteractionTable};
use crate::core::liouvillean::{pair_mut, EventData, Liouvillean};
use crate::core::locals::Local;
use crate::core::particle::{Particle, DIM};
use crate::core::queue::EventQueue;
use crate::core::roots::{self, PairData, PlateRootParams};
use crate::core::species::{Species, Structures};
use crate::core::systems::{self, Sample, System, SystemKind};
use crate::core::vector::{self, Vector, ZERO};
use crate::error::{Error, Result};

/// Small numeric tolerance for time checks.
const EPS_TIME: f64 = 1e-12;

/// Safety factor applied to the cell size when the compression rebuild fires.
const REBUILD_MARGIN: f64 = 1.0001;

/// Static description of a world, consumed once by [`Simulation::new`].
#[derive(Debug, Clone)]
pub struct World {
    pub boundary: Boundary,
    pub species: Vec<Species>,
    pub interactions: Vec<Interaction>,
    /// Rigid clusters as lists of particle IDs.
    pub structures: Vec<Vec<usize>>,
    pub locals: Vec<Local>,
    pub systems: Vec<System>,
    pub particles: Vec<Particle>,
    pub liouvillean: Liouvillean,
    /// Override for the minimum cell width; defaults to the longest
    /// interaction range.
    pub min_cell_size: Option<f64>,
    pub plate_params: PlateRootParams,
    pub seed: Option<u64>,
}

/// When [`Simulation::run`] should return.
#[derive(Debug, Clone, Default)]
pub struct StopCondition {
    /// Executed events in this call.
    pub max_events: Option<u64>,
    /// Absolute simulation time.
    pub max_time: Option<f64>,
    /// Checked once per event.
    pub stop_flag: Option<Arc<AtomicBool>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EventLimit,
    TimeLimit,
    Interrupted,
    /// Nothing left to happen and no time limit to stream to.
    QueueExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub events: u64,
    pub time: f64,
    pub reason: StopReason,
}

/// Event-driven simulation of a fixed set of particles.
///
/// Queue slots `0..N` belong to the particles and `N..N + S` to the system
/// events. Particle positions are streamed lazily: `particles[i].r` is exact
/// at `particles[i].last_update`, which may lag the global clock.
#[derive(Debug)]
pub struct Simulation {
    time_now: f64,
    boundary: Boundary,
    liouvillean: Liouvillean,
    particles: Vec<Particle>,
    masses: Vec<f64>,
    species: Vec<Species>,
    interactions: InteractionTable,
    structures: Structures,
    locals: Vec<Local>,
    systems: Vec<System>,
    system_targets: Vec<Vec<usize>>,
    captures: CaptureMap,
    cells: CellList,
    queue: EventQueue,
    /// Local object each particle last collided with, while still current.
    last_local: Vec<Option<usize>>,
    plate_params: PlateRootParams,
    rng: StdRng,
    event_count: u64,
    stale_count: u64,
    counters: [u64; EventType::COUNT],
    internal_energy: f64,
    samples: Vec<Sample>,
}

impl Simulation {
    /// Validate the world, build the cell list and capture map, and schedule
    /// the initial events.
    pub fn new(world: World) -> Result<Self> {
        let World {
            boundary,
            species,
            interactions,
            structures,
            mut locals,
            systems,
            mut particles,
            liouvillean,
            min_cell_size,
            plate_params,
            seed,
        } = world;

        let n = particles.len();
        if n == 0 {
            return Err(Error::Config("world has no particles".into()));
        }
        if species.is_empty() {
            return Err(Error::Config("world has no species".into()));
        }
        for (idx, p) in particles.iter().enumerate() {
            if p.id != idx {
                return Err(Error::Config(format!(
                    "particle at index {idx} has id {}; ids must be 0..N in order",
                    p.id
                )));
            }
            if p.species >= species.len() {
                return Err(Error::Config(format!(
                    "particle {idx} refers to unknown species {}",
                    p.species
                )));
            }
        }
        let compressing = matches!(liouvillean, Liouvillean::Compression { .. });
        for it in &interactions {
            if let InteractionKind::ParallelCubes { .. } = it.kind {
                if compressing {
                    return Err(Error::Config(format!(
                        "interaction '{}': parallel cubes do not support compression dynamics",
                        it.name
                    )));
                }
                if it.clustered {
                    return Err(Error::Config(format!(
                        "interaction '{}': parallel cubes cannot be clustered",
                        it.name
                    )));
                }
            }
        }
        if liouvillean.growth_rate() < 0.0 || !liouvillean.growth_rate().is_finite() {
            return Err(Error::Config("growth rate must be finite and >= 0".into()));
        }

        for p in particles.iter_mut() {
            p.last_update = 0.0;
            match boundary.kind {
                BoundaryKind::Periodic => boundary.wrap(&mut p.r),
                BoundaryKind::Reflective => {
                    if !boundary.contains(&p.r, 1e-9) {
                        return Err(Error::Config(format!(
                            "particle {} lies outside the reflective box",
                            p.id
                        )));
                    }
                }
            }
        }
        if boundary.kind == BoundaryKind::Reflective {
            locals.extend(Local::box_walls(&boundary.size));
        }

        let structures = Structures::new(n, structures)?;
        let masses: Vec<f64> = particles.iter().map(|p| species[p.species].mass).collect();
        let table = InteractionTable::new(interactions, species.len());

        let longest = table.longest();
        let cell_size = match min_cell_size {
            Some(hint) if hint < longest => {
                return Err(Error::Config(format!(
                    "min_cell_size {hint} is below the longest interaction range {longest}"
                )));
            }
            Some(hint) => hint,
            None if longest > 0.0 => longest,
            None => boundary.size.iter().copied().fold(f64::INFINITY, f64::min),
        };
        let positions: Vec<Vector> = particles.iter().map(|p| p.r).collect();
        let cells = CellList::build(&boundary, cell_size, &positions)?;

        let mut system_targets = Vec::with_capacity(systems.len());
        for sys in &systems {
            let targets = match &sys.kind {
                SystemKind::AndersenThermostat { species: sel, .. } => particles
                    .iter()
                    .filter(|p| sel.is_none_or(|s| s == p.species) && masses[p.id].is_finite())
                    .map(|p| p.id)
                    .collect(),
                SystemKind::CompressionRebuild if !compressing => {
                    return Err(Error::Config(format!(
                        "system '{}' needs compression dynamics",
                        sys.name
                    )));
                }
                _ => Vec::new(),
            };
            system_targets.push(targets);
        }

        let rng: StdRng = match seed {
            Some(s) => SeedableRng::seed_from_u64(s),
            None => SeedableRng::seed_from_u64(rng().random()),
        };

        let n_systems = systems.len();
        let n_interactions = table.len();
        let mut sim = Self {
            time_now: 0.0,
            boundary,
            liouvillean,
            particles,
            masses,
            species,
            interactions: table,
            structures,
            locals,
            systems,
            system_targets,
            captures: CaptureMap::new(n_interactions),
            cells,
            queue: EventQueue::new(n + n_systems),
            last_local: vec![None; n],
            plate_params,
            rng,
            event_count: 0,
            stale_count: 0,
            counters: [0; EventType::COUNT],
            internal_energy: 0.0,
            samples: Vec::new(),
        };

        sim.detect_captures();
        for i in 0..n {
            sim.full_update(i)?;
        }
        for s in 0..n_systems {
            sim.arm_system(s)?;
        }
        info!(
            "initialised {} particles, {} interactions, {} locals, {} systems, cells {:?} of {:?}",
            n,
            n_interactions,
            sim.locals.len(),
            n_systems,
            sim.cells.n_cells(),
            sim.cells.cell_dimensions()
        );
        Ok(sim)
    }

    /// Returns current simulation time.
    pub fn time(&self) -> f64 {
        self.time_now
    }

    /// Number of particles.
    pub fn num_particles(&self) -> usize {
        self.particles.len()
    }

    /// Executed events (particle, cell and system events).
    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    /// Stale queue entries discarded so far.
    pub fn stale_count(&self) -> u64 {
        self.stale_count
    }

    /// Executed events broken down by type.
    pub fn event_counts(&self) -> Vec<(EventType, u64)> {
        EventType::ALL
            .iter()
            .map(|&t| (t, self.counters[t.index()]))
            .collect()
    }

    pub fn count_of(&self, event_type: EventType) -> u64 {
        self.counters[event_type.index()]
    }

    /// Particle records; positions are exact at each record's `last_update`.
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn mass(&self, id: usize) -> f64 {
        self.masses[id]
    }

    pub fn species(&self) -> &[Species] {
        &self.species
    }

    pub fn boundary(&self) -> &Boundary {
        &self.boundary
    }

    pub fn liouvillean(&self) -> &Liouvillean {
        &self.liouvillean
    }

    pub fn cells(&self) -> &CellList {
        &self.cells
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Pairs currently inside a square well.
    pub fn captured_pairs(&self) -> usize {
        (0..self.interactions.len())
            .map(|k| self.captures.count(k))
            .sum()
    }

    /// Positions at the current time, folded into the primary box.
    pub fn positions(&self) -> Vec<Vector> {
        self.particles
            .iter()
            .map(|p| {
                let mut r = p.position_at(self.time_now);
                self.boundary.wrap(&mut r);
                r
            })
            .collect()
    }

    /// Velocities as a Vec of fixed-size arrays.
    pub fn velocities(&self) -> Vec<Vector> {
        self.particles.iter().map(|p| p.v).collect()
    }

    /// Time of the queue head; it may still turn out to be stale.
    pub fn next_event_time(&self) -> Option<f64> {
        self.queue.peek().map(|(_, e)| e.time_f64())
    }

    pub fn kinetic_energy(&self) -> f64 {
        self.particles
            .iter()
            .map(|p| p.kinetic_energy(self.masses[p.id]))
            .sum()
    }

    /// Potential energy stored in captured square-well pairs.
    pub fn internal_energy(&self) -> f64 {
        self.internal_energy
    }

    pub fn total_energy(&self) -> f64 {
        self.kinetic_energy() + self.internal_energy
    }

    /// Total momentum of the finite-mass particles.
    pub fn momentum(&self) -> Vector {
        let mut out = ZERO;
        for p in &self.particles {
            let m = self.masses[p.id];
            if m.is_finite() {
                vector::add_scaled(&mut out, &p.v, m);
            }
        }
        out
    }

    /// `2 KE / (DIM * N)` over the finite-mass particles.
    pub fn temperature(&self) -> f64 {
        let mobile = self.masses.iter().filter(|m| m.is_finite()).count();
        if mobile == 0 {
            return 0.0;
        }
        2.0 * self.kinetic_energy() / (DIM as f64 * mobile as f64)
    }

    pub fn number_density(&self) -> f64 {
        self.particles.len() as f64 / self.boundary.volume()
    }

    /// Fraction of the box excluded by the particles' self interactions at
    /// the current length scale.
    pub fn packing_fraction(&self) -> f64 {
        let scale = self.liouvillean.length_scale(self.time_now).powi(DIM as i32);
        let excluded: f64 = self
            .particles
            .iter()
            .filter_map(|p| self.interactions.index_for(p.species, p.species))
            .map(|k| self.interactions.get(k).excluded_volume())
            .sum();
        excluded * scale / self.boundary.volume()
    }

    /// Shift every finite-mass velocity so the centre-of-mass velocity is
    /// `target`. All predictions are recomputed.
    pub fn set_com_velocity(&mut self, target: Vector) -> Result<()> {
        self.stream_all()?;
        let mut total_mass = 0.0;
        for &m in &self.masses {
            if m.is_finite() {
                total_mass += m;
            }
        }
        if total_mass == 0.0 {
            return Ok(());
        }
        let com = vector::scale(&self.momentum(), 1.0 / total_mass);
        let shift = vector::sub(&target, &com);
        for p in self.particles.iter_mut() {
            if self.masses[p.id].is_finite() {
                p.v = vector::add(&p.v, &shift);
            }
            p.bump_generation();
        }
        self.last_local.iter_mut().for_each(|l| *l = None);
        self.rebuild_all_predictions()
    }

    /// Run events up to and including `target_time`, then set the clock to it.
    pub fn advance_to(&mut self, target_time: f64) -> Result<RunSummary> {
        self.run(&StopCondition {
            max_time: Some(target_time),
            ..StopCondition::default()
        })
    }

    /// Execute exactly `n` events, unless the queue empties first.
    pub fn run_events(&mut self, n: u64) -> Result<RunSummary> {
        self.run(&StopCondition {
            max_events: Some(n),
            ..StopCondition::default()
        })
    }

    /// Main event loop.
    pub fn run(&mut self, stop: &StopCondition) -> Result<RunSummary> {
        if let Some(t) = stop.max_time {
            if !t.is_finite() {
                return Err(Error::InvalidParam("max_time must be finite".into()));
            }
            if t < self.time_now - EPS_TIME {
                return Err(Error::InvalidParam(format!(
                    "max_time {t} is earlier than the current time {}",
                    self.time_now
                )));
            }
        }
        let start = self.event_count;
        let limit = stop.max_time.unwrap_or(f64::INFINITY);
        let reason = loop {
            if let Some(flag) = &stop.stop_flag {
                if flag.load(AtomicOrdering::Relaxed) {
                    break StopReason::Interrupted;
                }
            }
            if let Some(max) = stop.max_events {
                if self.event_count - start >= max {
                    break StopReason::EventLimit;
                }
            }
            if self.step(limit)?.is_none() {
                match stop.max_time {
                    Some(t) => {
                        self.time_now = self.time_now.max(t);
                        break StopReason::TimeLimit;
                    }
                    None => break StopReason::QueueExhausted,
                }
            }
        };
        let summary = RunSummary {
            events: self.event_count - start,
            time: self.time_now,
            reason,
        };
        debug!("run stopped: {summary:?}");
        Ok(summary)
    }

    /// Execute the next valid event, if any, at or before `limit`.
    ///
    /// Stale heads are discarded and their owner re-predicted on the way.
    pub fn step(&mut self, limit: f64) -> Result<Option<EventType>> {
        loop {
            let Some((slot, ev)) = self.queue.peek().map(|(s, e)| (s, *e)) else {
                return Ok(None);
            };
            if ev.time_f64() > limit {
                return Ok(None);
            }
            self.queue.pop();
            if !self.is_current(&ev) {
                self.stale_count += 1;
                debug!("stale {:?} at t={} in slot {slot}; re-predicting", ev.kind, ev.time_f64());
                self.full_update(slot)?;
                continue;
            }

            self.advance_clock(&ev)?;
            let event_type = match ev.kind {
                EventKind::Interaction { i, j } => self.run_interaction(&ev, i, j)?,
                EventKind::Local { i, local } => self.run_local(i, local)?,
                EventKind::Cell { i, axis, dir } => self.run_cell(i, axis, dir)?,
                EventKind::System { id } => self.run_system(id)?,
            };
            self.event_count += 1;
            self.counters[event_type.index()] += 1;
            trace!(
                "event {} t={} {:?} -> {:?}",
                self.event_count,
                self.time_now,
                ev.kind,
                event_type
            );
            return Ok(Some(event_type));
        }
    }

    fn is_current(&self, ev: &Event) -> bool {
        match ev.kind {
            EventKind::Interaction { i, j } => ev.is_valid(
                self.particles[i].generation,
                Some(self.particles[j].generation),
            ),
            EventKind::Local { i, .. } | EventKind::Cell { i, .. } => {
                ev.is_valid(self.particles[i].generation, None)
            }
            EventKind::System { .. } => true,
        }
    }

    fn advance_clock(&mut self, ev: &Event) -> Result<()> {
        let t = ev.time_f64();
        if t < self.time_now - EPS_TIME * self.time_now.abs().max(1.0) {
            let (a, b) = ev.kind.particles();
            let ids: Vec<usize> = a.into_iter().chain(b).collect();
            return Err(Error::invariant(
                t,
                &ids,
                format!("event earlier than the clock (t_now={})", self.time_now),
            ));
        }
        self.time_now = self.time_now.max(t);
        Ok(())
    }

    fn stream(&mut self, i: usize) -> Result<()> {
        self.liouvillean
            .stream_particle(&mut self.particles[i], self.time_now)
    }

    fn stream_all(&mut self) -> Result<()> {
        for p in self.particles.iter_mut() {
            self.liouvillean.stream_particle(p, self.time_now)?;
        }
        Ok(())
    }

    fn rebuild_all_predictions(&mut self) -> Result<()> {
        for i in 0..self.particles.len() {
            self.full_update(i)?;
        }
        Ok(())
    }

    /// Minimum-image separation and relative velocity of a pair at the
    /// current time.
    fn pair_data(&self, i: usize, j: usize) -> PairData {
        let (pi, pj) = (&self.particles[i], &self.particles[j]);
        let mut rij = vector::sub(&pi.position_at(self.time_now), &pj.position_at(self.time_now));
        self.boundary.minimum_image(&mut rij);
        PairData::new(rij, vector::sub(&pi.v, &pj.v))
    }

    /// Drop every event owned by particle `i` and predict afresh against
    /// its cell, neighbours and locals.
    fn full_update(&mut self, i: usize) -> Result<()> {
        self.repredict(i, None)
    }

    /// `full_update` for a particle that has just entered its cell through
    /// the face `entered`.
    fn repredict(&mut self, i: usize, entered: Option<(usize, i64)>) -> Result<()> {
        self.queue.clear(i);
        self.push_cell_event(i, entered)?;
        self.push_local_events(i)?;
        let cell = self.cells.cell_of(i);
        let partners: Vec<usize> = self
            .cells
            .neighbours(cell)
            .iter()
            .flat_map(|&c| self.cells.members(c).iter().copied())
            .filter(|&j| j != i)
            .collect();
        for j in partners {
            self.push_pair_event(i, j)?;
        }
        Ok(())
    }

    fn push_cell_event(&mut self, i: usize, entered: Option<(usize, i64)>) -> Result<()> {
        let p = &self.particles[i];
        let r = p.position_at(self.time_now);
        if let Some((dt, axis, dir)) = self.cells.exit(i, &r, &p.v, entered, self.time_now)? {
            let ev = Event::new(
                self.time_now + dt,
                EventKind::Cell { i, axis, dir },
                EventType::Cell,
                p.generation,
                None,
            )?;
            self.queue.push(i, ev);
        }
        Ok(())
    }

    fn push_local_events(&mut self, i: usize) -> Result<()> {
        let p = &self.particles[i];
        let mut found = Vec::new();
        for (l, local) in self.locals.iter().enumerate() {
            if !local.applies_to(p.species) {
                continue;
            }
            let just_hit = self.last_local[i] == Some(l);
            if let Some((dt, event_type)) =
                local.predict(p, self.time_now, just_hit, &self.plate_params)
            {
                found.push(Event::new(
                    self.time_now + dt,
                    EventKind::Local { i, local: l },
                    event_type,
                    p.generation,
                    None,
                )?);
            }
        }
        for ev in found {
            self.queue.push(i, ev);
        }
        Ok(())
    }

    /// Predict the next event of pair `(i, j)` and queue it on `i`'s slot.
    fn push_pair_event(&mut self, i: usize, j: usize) -> Result<()> {
        if let Some(ev) = self.predict_pair(i, j)? {
            self.queue.push(i, ev);
        }
        Ok(())
    }

    fn predict_pair(&self, i: usize, j: usize) -> Result<Option<Event>> {
        if self.structures.same_body(i, j) {
            return Ok(None);
        }
        let (pi, pj) = (&self.particles[i], &self.particles[j]);
        let Some(k) = self.interactions.index_for(pi.species, pj.species) else {
            return Ok(None);
        };
        let dat = self.pair_data(i, j);
        let t = self.time_now;
        let liou = &self.liouvillean;
        let found = match self.interactions.get(k).kind {
            InteractionKind::HardSphere { diameter, .. } => {
                liou.sphere_in_root(&dat, diameter, t).map(|dt| (dt, EventType::Core))
            }
            InteractionKind::SquareWell {
                diameter, lambda, ..
            } => {
                if self.captures.is_captured(k, i, j) {
                    let core = liou.sphere_in_root(&dat, diameter, t).map(|dt| (dt, EventType::Core));
                    let out = liou
                        .sphere_out_root(&dat, diameter * lambda, t)
                        .map(|dt| (dt, EventType::WellKeDown));
                    match (core, out) {
                        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
                        (a, b) => a.or(b),
                    }
                } else {
                    liou.sphere_in_root(&dat, diameter * lambda, t)
                        .map(|dt| (dt, EventType::WellKeUp))
                }
            }
            InteractionKind::ParallelCubes {
                width, rotation, ..
            } => roots::cube_cube_in_root(&dat, width, &rotation).map(|root| (root.dt, EventType::Core)),
        };
        let Some((dt, event_type)) = found else {
            return Ok(None);
        };
        let (a, b) = if i < j { (i, j) } else { (j, i) };
        Event::new(
            t + dt,
            EventKind::Interaction { i: a, j: b },
            event_type,
            self.particles[a].generation,
            Some(self.particles[b].generation),
        )
        .map(Some)
    }

    /// Mark the participants of a resolved event as changed and re-predict.
    /// `local` records the local object the event was with, if any.
    fn commit(&mut self, data: &EventData, local: Option<usize>) -> Result<()> {
        trace!(
            "{:?}: {} particles changed, dKE={} dU={} impulse={:?}",
            data.event_type,
            data.changes.len(),
            data.delta_ke(),
            data.delta_u,
            data.impulse
        );
        for c in &data.changes {
            self.particles[c.id].bump_generation();
            self.last_local[c.id] = local;
        }
        self.internal_energy += data.delta_u;
        for c in &data.changes {
            self.full_update(c.id)?;
        }
        Ok(())
    }

    fn run_interaction(&mut self, ev: &Event, i: usize, j: usize) -> Result<EventType> {
        let now = self.time_now;
        self.stream(i)?;
        self.stream(j)?;
        let (si, sj) = (self.particles[i].species, self.particles[j].species);
        let k = self
            .interactions
            .index_for(si, sj)
            .ok_or_else(|| Error::invariant(now, &[i, j], "no interaction for queued pair"))?;
        let interaction = self.interactions.get(k);
        let (kind, clustered) = (interaction.kind, interaction.clustered);
        let mut rij = vector::sub(&self.particles[i].r, &self.particles[j].r);
        self.boundary.minimum_image(&mut rij);

        let data = match kind {
            InteractionKind::HardSphere {
                diameter,
                elasticity,
            } => self.collide(i, j, rij, diameter, elasticity, clustered)?,
            InteractionKind::SquareWell {
                diameter,
                lambda,
                well_depth,
                elasticity,
            } => match ev.event_type {
                EventType::WellKeUp => {
                    let data = self.well_crossing(i, j, rij, well_depth, diameter * lambda, clustered)?;
                    if data.event_type != EventType::Bounce {
                        self.captures.capture(k, i, j);
                    }
                    data
                }
                EventType::WellKeDown => {
                    let data = self.well_crossing(i, j, rij, -well_depth, diameter * lambda, clustered)?;
                    if data.event_type != EventType::Bounce {
                        self.captures.release(k, i, j);
                    }
                    data
                }
                _ => self.collide(i, j, rij, diameter, elasticity, clustered)?,
            },
            InteractionKind::ParallelCubes {
                elasticity,
                rotation,
                ..
            } => {
                let (mi, mj) = (self.masses[i], self.masses[j]);
                let (pi, pj) = pair_mut(&mut self.particles, i, j)?;
                self.liouvillean
                    .parallel_cube_collision(pi, mi, pj, mj, rij, elasticity, &rotation, now)?
            }
        };
        self.commit(&data, None)?;
        Ok(data.event_type)
    }

    fn collide(&mut self, i: usize, j: usize, rij: Vector, d0: f64, e: f64, clustered: bool) -> Result<EventData> {
        let now = self.time_now;
        if clustered {
            let (b1, b2) = (self.structures.body_of(i), self.structures.body_of(j));
            let bc = self.boundary;
            return self.liouvillean.multibody_collision(
                &mut self.particles,
                &self.masses,
                &b1,
                &b2,
                e,
                |r: &mut Vector| bc.minimum_image(r),
                now,
            );
        }
        let (mi, mj) = (self.masses[i], self.masses[j]);
        let (pi, pj) = pair_mut(&mut self.particles, i, j)?;
        self.liouvillean
            .smooth_spheres_collision(pi, mi, pj, mj, rij, e, d0, now)
    }

    fn well_crossing(
        &mut self,
        i: usize,
        j: usize,
        rij: Vector,
        delta_ke: f64,
        d0: f64,
        clustered: bool,
    ) -> Result<EventData> {
        let now = self.time_now;
        if clustered {
            let (b1, b2) = (self.structures.body_of(i), self.structures.body_of(j));
            let bc = self.boundary;
            return self.liouvillean.multibody_well_event(
                &mut self.particles,
                &self.masses,
                &b1,
                &b2,
                delta_ke,
                |r: &mut Vector| bc.minimum_image(r),
                now,
            );
        }
        let (mi, mj) = (self.masses[i], self.masses[j]);
        let (pi, pj) = pair_mut(&mut self.particles, i, j)?;
        self.liouvillean
            .sphere_well_event(pi, mi, pj, mj, rij, delta_ke, d0, now)
    }

    fn run_local(&mut self, i: usize, l: usize) -> Result<EventType> {
        self.stream(i)?;
        let data = self.locals[l].resolve(
            &self.liouvillean,
            &mut self.particles[i],
            self.masses[i],
            self.time_now,
            &self.plate_params,
            &mut self.rng,
        )?;
        self.commit(&data, Some(l))?;
        Ok(data.event_type)
    }

    /// Move particle `i` into the next cell. Only the cell event and pairs in
    /// newly adjacent cells are predicted; the generation is unchanged.
    fn run_cell(&mut self, i: usize, axis: usize, dir: i64) -> Result<EventType> {
        self.stream(i)?;
        let old = self.cells.cell_of(i);
        let Some(new) = self.cells.across(old, axis, dir) else {
            return Err(Error::invariant(
                self.time_now,
                &[i],
                format!("cell transition through the closed face {axis}/{dir} of cell {old}"),
            ));
        };
        let before = self.particles[i].r;
        self.boundary.wrap(&mut self.particles[i].r);
        self.cells.move_particle(i, new);

        if self.particles[i].r != before {
            // Crossed the box face: locals see a different position.
            self.repredict(i, Some((axis, dir)))?;
            return Ok(EventType::Cell);
        }
        self.push_cell_event(i, Some((axis, dir)))?;
        let old_nb = self.cells.neighbours(old).to_vec();
        let partners: Vec<usize> = self
            .cells
            .neighbours(new)
            .iter()
            .filter(|&&c| old_nb.binary_search(&c).is_err())
            .flat_map(|&c| self.cells.members(c).iter().copied())
            .filter(|&j| j != i)
            .collect();
        for j in partners {
            self.push_pair_event(i, j)?;
        }
        Ok(EventType::Cell)
    }

    fn arm_system(&mut self, s: usize) -> Result<()> {
        let slot = self.particles.len() + s;
        self.queue.clear(slot);
        let delay = match self.systems[s].kind {
            SystemKind::Ticker { period } => Some(period),
            SystemKind::CompressionRebuild => systems::compression_rebuild_delay(
                self.cells.min_cell_dimension(),
                self.interactions.longest(),
                self.liouvillean.growth_rate(),
                self.time_now,
            ),
            SystemKind::AndersenThermostat { mean_time, .. } => {
                if self.system_targets[s].is_empty() {
                    None
                } else {
                    Some(systems::thermostat_delay(mean_time, &mut self.rng)?)
                }
            }
        };
        if let Some(dt) = delay {
            self.queue.push(slot, Event::system(self.time_now + dt, s)?);
        }
        Ok(())
    }

    fn run_system(&mut self, s: usize) -> Result<EventType> {
        debug!("system '{}' fires at t={}", self.systems[s].name, self.time_now);
        let event_type = match self.systems[s].kind {
            SystemKind::Ticker { .. } => {
                self.samples.push(Sample {
                    time: self.time_now,
                    event_count: self.event_count,
                    kinetic_energy: self.kinetic_energy(),
                    internal_energy: self.internal_energy,
                });
                EventType::NonEvent
            }
            SystemKind::CompressionRebuild => {
                self.rebuild_cells()?;
                EventType::NonEvent
            }
            SystemKind::AndersenThermostat { sqrt_t, .. } => {
                let targets = &self.system_targets[s];
                let i = targets[self.rng.random_range(0..targets.len())];
                self.stream(i)?;
                let data = self.liouvillean.random_gaussian_event(
                    &mut self.particles[i],
                    self.masses[i],
                    sqrt_t,
                    &mut self.rng,
                    self.time_now,
                )?;
                self.commit(&data, None)?;
                data.event_type
            }
        };
        self.arm_system(s)?;
        Ok(event_type)
    }

    /// Rebuild the cell list for the interaction lengths at the current time.
    fn rebuild_cells(&mut self) -> Result<()> {
        self.stream_all()?;
        for p in self.particles.iter_mut() {
            self.boundary.wrap(&mut p.r);
        }
        let range = self.interactions.longest() * self.liouvillean.length_scale(self.time_now);
        let smallest_box = self.boundary.size.iter().copied().fold(f64::INFINITY, f64::min);
        if self.boundary.kind == BoundaryKind::Periodic && 2.0 * range > smallest_box {
            return Err(Error::invariant(
                self.time_now,
                &[],
                format!("interaction range {range} exceeds half the box"),
            ));
        }
        let min_size = REBUILD_MARGIN * self.cells.min_cell_dimension().max(range);
        let positions: Vec<Vector> = self.particles.iter().map(|p| p.r).collect();
        self.cells.rebuild(&self.boundary, min_size, &positions)?;
        info!(
            "rebuilt cells at t={} for range {range}: {:?} of {:?}",
            self.time_now,
            self.cells.n_cells(),
            self.cells.cell_dimensions()
        );
        if self.cells.min_cell_dimension() < range {
            warn!("cells narrower than the interaction range after rebuild");
        }
        self.rebuild_all_predictions()
    }

    /// Seed the capture map from the initial configuration.
    fn detect_captures(&mut self) {
        let n = self.particles.len();
        for i in 0..n {
            let cell = self.cells.cell_of(i);
            let partners: Vec<usize> = self
                .cells
                .neighbours(cell)
                .iter()
                .flat_map(|&c| self.cells.members(c).iter().copied())
                .filter(|&j| j > i)
                .collect();
            for j in partners {
                if self.structures.same_body(i, j) {
                    continue;
                }
                let (si, sj) = (self.particles[i].species, self.particles[j].species);
                let Some(k) = self.interactions.index_for(si, sj) else {
                    continue;
                };
                let dat = self.pair_data(i, j);
                let (core, well) = match self.interactions.get(k).kind {
                    InteractionKind::HardSphere { diameter, .. } => (diameter, None),
                    InteractionKind::SquareWell {
                        diameter,
                        lambda,
                        well_depth,
                        ..
                    } => (diameter, Some((diameter * lambda, well_depth))),
                    InteractionKind::ParallelCubes { .. } => continue,
                };
                if roots::sphere_overlap(&dat, core * core) {
                    warn!("particles {i} and {j} overlap in the initial configuration");
                }
                if let Some((outer, depth)) = well {
                    if roots::sphere_overlap(&dat, outer * outer) {
                        self.captures.capture(k, i, j);
                        self.internal_energy -= depth;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::boundary::BoundaryKind;
    use crate::core::interaction::PairSelector;
    use approx::assert_relative_eq;

    fn at(x: f64, vx: f64, id: usize) -> Particle {
        let mut r = ZERO;
        r[0] = x;
        let mut v = ZERO;
        v[0] = vx;
        Particle::new(id, r, v, 0).expect("finite")
    }

    fn world(particles: Vec<Particle>, kind: InteractionKind) -> Result<World> {
        Ok(World {
            boundary: Boundary::new(BoundaryKind::Periodic, [10.0; DIM])?,
            species: vec![Species::new("A", 1.0)?],
            interactions: vec![Interaction::new("main", kind, PairSelector::All)?],
            structures: Vec::new(),
            locals: Vec::new(),
            systems: Vec::new(),
            particles,
            liouvillean: Liouvillean::Newtonian,
            min_cell_size: None,
            plate_params: PlateRootParams::default(),
            seed: Some(1),
        })
    }

    fn hard(d: f64, e: f64) -> InteractionKind {
        InteractionKind::HardSphere {
            diameter: d,
            elasticity: e,
        }
    }

    #[test]
    fn rejects_out_of_order_ids() -> Result<()> {
        let w = world(vec![at(0.0, 0.0, 1)], hard(1.0, 1.0))?;
        assert!(matches!(Simulation::new(w), Err(Error::Config(_))));
        Ok(())
    }

    #[test]
    fn cell_hint_below_range_is_rejected() -> Result<()> {
        let mut w = world(vec![at(0.0, 0.0, 0)], hard(2.0, 1.0))?;
        w.min_cell_size = Some(1.0);
        assert!(Simulation::new(w).is_err());
        Ok(())
    }

    #[test]
    fn head_on_pair_collides_at_analytic_time() -> Result<()> {
        let w = world(vec![at(-2.0, 1.0, 0), at(2.0, -1.0, 1)], hard(1.0, 1.0))?;
        let mut sim = Simulation::new(w)?;
        loop {
            match sim.step(f64::INFINITY)? {
                Some(EventType::Core) => break,
                Some(_) => continue,
                None => panic!("queue ran dry before the collision"),
            }
        }
        assert_relative_eq!(sim.time(), 1.5, epsilon = 1e-12);
        let v = sim.velocities();
        assert_relative_eq!(v[0][0], -1.0, epsilon = 1e-12);
        assert_relative_eq!(v[1][0], 1.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn advance_to_without_events_moves_the_clock() -> Result<()> {
        let w = world(vec![at(0.0, 0.0, 0)], hard(1.0, 1.0))?;
        let mut sim = Simulation::new(w)?;
        let summary = sim.advance_to(3.0)?;
        assert_eq!(summary.reason, StopReason::TimeLimit);
        assert_eq!(sim.time(), 3.0);
        assert!(sim.advance_to(1.0).is_err());
        Ok(())
    }

    #[test]
    fn stop_flag_interrupts() -> Result<()> {
        let w = world(vec![at(-2.0, 1.0, 0), at(2.0, -1.0, 1)], hard(1.0, 1.0))?;
        let mut sim = Simulation::new(w)?;
        let flag = Arc::new(AtomicBool::new(true));
        let summary = sim.run(&StopCondition {
            stop_flag: Some(flag),
            ..StopCondition::default()
        })?;
        assert_eq!(summary.reason, StopReason::Interrupted);
        assert_eq!(summary.events, 0);
        Ok(())
    }

    #[test]
    fn initial_captures_set_internal_energy() -> Result<()> {
        let well = InteractionKind::SquareWell {
            diameter: 1.0,
            lambda: 1.5,
            well_depth: 2.0,
            elasticity: 1.0,
        };
        let w = world(vec![at(-0.6, 0.0, 0), at(0.6, 0.0, 1)], well)?;
        let sim = Simulation::new(w)?;
        assert_eq!(sim.captured_pairs(), 1);
        assert_relative_eq!(sim.internal_energy(), -2.0);
        Ok(())
    }

    #[test]
    fn com_velocity_is_removed() -> Result<()> {
        let w = world(vec![at(-2.0, 1.0, 0), at(2.0, 3.0, 1)], hard(1.0, 1.0))?;
        let mut sim = Simulation::new(w)?;
        sim.set_com_velocity(ZERO)?;
        for x in sim.momentum() {
            assert_relative_eq!(x, 0.0, epsilon = 1e-14);
        }
        assert_relative_eq!(sim.velocities()[0][0], -1.0);
        Ok(())
    }

    #[test]
    fn density_and_packing_fraction() -> Result<()> {
        let w = world(vec![at(-2.0, 0.0, 0), at(2.0, 0.0, 1)], hard(1.0, 1.0))?;
        let sim = Simulation::new(w)?;
        assert_relative_eq!(sim.number_density(), 2.0 / 1000.0);
        let ball = 4.0 / 3.0 * std::f64::consts::PI * 0.125;
        assert_relative_eq!(sim.packing_fraction(), 2.0 * ball / 1000.0, max_relative = 1e-12);
        Ok(())
    }
}
