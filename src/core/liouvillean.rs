//! Streaming and collision response.
//!
//! The Liouvillean owns the equations of motion: how a particle moves between
//! events and how velocities change at one. Every resolution function expects
//! its participants to be up to date at the event time and returns a change
//! record with per-particle kinetic-energy deltas.

use rand::Rng;
use rand_distr::StandardNormal;

use crate::core::event::EventType;
use crate::core::particle::{Particle, DIM};
use crate::core::roots::{self, PairData, PlateGeometry};
use crate::core::vector::{self, dot, mat_mul, mat_mul_transpose, Matrix, Vector, ZERO};
use crate::error::{Error, Result};

/// Allowed slack when checking that a particle is up to date.
const EPS_TIME: f64 = 1e-12;

/// Velocity change of one particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticleDelta {
    pub id: usize,
    pub old_v: Vector,
    pub new_v: Vector,
    pub delta_ke: f64,
}

/// Change record produced by resolving one event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventData {
    pub event_type: EventType,
    pub changes: Vec<ParticleDelta>,
    /// Impulse transferred from particle (or body) 1 to 2, when meaningful.
    pub impulse: Vector,
    /// Change of interaction (well) energy.
    pub delta_u: f64,
}

impl EventData {
    pub fn delta_ke(&self) -> f64 {
        self.changes.iter().map(|c| c.delta_ke).sum()
    }
}

/// Reduced mass with the infinite-mass cases handled: one infinite mass gives
/// the other, two give zero (no momentum transfer).
#[inline]
pub fn reduced_mass(m1: f64, m2: f64) -> f64 {
    match (m1.is_infinite(), m2.is_infinite()) {
        (true, true) => 0.0,
        (true, false) => m2,
        (false, true) => m1,
        (false, false) => m1 * m2 / (m1 + m2),
    }
}

#[inline]
fn kinetic(mass: f64, v: &Vector) -> f64 {
    if mass.is_infinite() {
        0.0
    } else {
        0.5 * mass * vector::norm2(v)
    }
}

/// Apply `v += dv_scale * dp` and record the change.
fn kick(p: &mut Particle, mass: f64, dp: &Vector, sign: f64) -> ParticleDelta {
    let old_v = p.v;
    if mass.is_finite() {
        vector::add_scaled(&mut p.v, dp, sign / mass);
    }
    ParticleDelta {
        id: p.id,
        old_v,
        new_v: p.v,
        delta_ke: kinetic(mass, &p.v) - kinetic(mass, &old_v),
    }
}

fn reset_velocity(p: &mut Particle, mass: f64, v: Vector) -> ParticleDelta {
    let old_v = p.v;
    // Products with a zero basis component can yield -0.0.
    let v = v.map(|x| x + 0.0);
    p.v = v;
    ParticleDelta {
        id: p.id,
        old_v,
        new_v: v,
        delta_ke: kinetic(mass, &v) - kinetic(mass, &old_v),
    }
}

fn check_impulse(dp: &Vector, t: f64, ids: &[usize], what: &str) -> Result<()> {
    if vector::is_finite(dp) {
        Ok(())
    } else {
        Err(Error::invariant(t, ids, format!("non-finite impulse in {what}")))
    }
}

/// Equations of motion between events.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Liouvillean {
    /// Free flight at constant velocity.
    Newtonian,
    /// Free flight while every interaction length grows as `1 + growth_rate * t`.
    Compression { growth_rate: f64 },
}

impl Default for Liouvillean {
    fn default() -> Self {
        Liouvillean::Newtonian
    }
}

impl Liouvillean {
    /// Factor applied to interaction lengths at absolute time `t`.
    #[inline]
    pub fn length_scale(&self, t: f64) -> f64 {
        match *self {
            Liouvillean::Newtonian => 1.0,
            Liouvillean::Compression { growth_rate } => 1.0 + growth_rate * t,
        }
    }

    /// Time derivative of [`Self::length_scale`].
    #[inline]
    pub fn growth_rate(&self) -> f64 {
        match *self {
            Liouvillean::Newtonian => 0.0,
            Liouvillean::Compression { growth_rate } => growth_rate,
        }
    }

    /// Bring a particle's position up to absolute time `t`.
    ///
    /// Streaming backwards is an invariant violation.
    pub fn stream_particle(&self, p: &mut Particle, t: f64) -> Result<()> {
        let dt = t - p.last_update;
        if dt < -EPS_TIME {
            return Err(Error::invariant(
                t,
                &[p.id],
                format!("cannot stream backwards from t={}", p.last_update),
            ));
        }
        if dt > 0.0 {
            for (x, &vk) in p.r.iter_mut().zip(p.v.iter()) {
                *x += vk * dt;
            }
            p.last_update = t;
        }
        Ok(())
    }

    /// True if `p` is current at `t`.
    #[inline]
    pub fn is_up_to_date(&self, p: &Particle, t: f64) -> bool {
        (p.last_update - t).abs() <= EPS_TIME * t.abs().max(1.0)
    }

    fn require_up_to_date(&self, parts: &[&Particle], t: f64) -> Result<()> {
        if cfg!(debug_assertions) {
            for p in parts {
                if !self.is_up_to_date(p, t) {
                    return Err(Error::invariant(
                        t,
                        &[p.id],
                        format!("particle not streamed to event time (last update {})", p.last_update),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Approach time for a pair with base contact distance `d0`, predicted at
    /// absolute time `t`.
    pub fn sphere_in_root(&self, dat: &PairData, d0: f64, t: f64) -> Option<f64> {
        match self {
            Liouvillean::Newtonian => roots::sphere_sphere_in_root(dat, d0 * d0),
            Liouvillean::Compression { growth_rate } => {
                roots::growing_sphere_in_root(dat, d0 * self.length_scale(t), d0 * growth_rate)
            }
        }
    }

    /// Separation time for a pair inside base distance `d0`.
    pub fn sphere_out_root(&self, dat: &PairData, d0: f64, t: f64) -> Option<f64> {
        match self {
            Liouvillean::Newtonian => roots::sphere_sphere_out_root(dat, d0 * d0),
            Liouvillean::Compression { growth_rate } => {
                roots::growing_sphere_out_root(dat, d0 * self.length_scale(t), d0 * growth_rate)
            }
        }
    }

    /// Smooth-sphere collision with restitution `e`. `rij` must already be
    /// the minimum image of `p1 - p2`.
    #[allow(clippy::too_many_arguments)]
    pub fn smooth_spheres_collision(
        &self,
        p1: &mut Particle,
        m1: f64,
        p2: &mut Particle,
        m2: f64,
        rij: Vector,
        e: f64,
        d0: f64,
        t: f64,
    ) -> Result<EventData> {
        self.require_up_to_date(&[p1, p2], t)?;
        let vij = vector::sub(&p1.v, &p2.v);
        let r2 = vector::norm2(&rij);
        let mu = reduced_mass(m1, m2);
        // Closing speed measured against the (possibly growing) contact surface.
        let rvdot = dot(&rij, &vij) - d0 * self.growth_rate() * r2.sqrt();
        let dp = if mu == 0.0 {
            ZERO
        } else {
            vector::scale(&rij, (1.0 + e) * mu * rvdot / r2)
        };
        check_impulse(&dp, t, &[p1.id, p2.id], "sphere collision")?;
        let c1 = kick(p1, m1, &dp, -1.0);
        let c2 = kick(p2, m2, &dp, 1.0);
        Ok(EventData {
            event_type: EventType::Core,
            changes: vec![c1, c2],
            impulse: dp,
            delta_u: 0.0,
        })
    }

    /// Crossing of a square-well edge with kinetic energy change `delta_ke`
    /// (positive on capture, negative on release).
    ///
    /// Returns `Bounce` when a releasing pair cannot afford the energy,
    /// otherwise `WellKeUp` / `WellKeDown` by the sign of `delta_ke`.
    #[allow(clippy::too_many_arguments)]
    pub fn sphere_well_event(
        &self,
        p1: &mut Particle,
        m1: f64,
        p2: &mut Particle,
        m2: f64,
        rij: Vector,
        delta_ke: f64,
        d0: f64,
        t: f64,
    ) -> Result<EventData> {
        self.require_up_to_date(&[p1, p2], t)?;
        let vij = vector::sub(&p1.v, &p2.v);
        let r2 = vector::norm2(&rij);
        let rvdot = dot(&rij, &vij) - d0 * self.growth_rate() * r2.sqrt();
        let mu = reduced_mass(m1, m2);
        let (event_type, dp) = well_impulse(&rij, rvdot, r2, mu, delta_ke);
        check_impulse(&dp, t, &[p1.id, p2.id], "square-well event")?;
        let c1 = kick(p1, m1, &dp, -1.0);
        let c2 = kick(p2, m2, &dp, 1.0);
        let delta_u = match event_type {
            EventType::Bounce => 0.0,
            _ => -delta_ke,
        };
        Ok(EventData {
            event_type,
            changes: vec![c1, c2],
            impulse: dp,
            delta_u,
        })
    }

    /// Face collision between two parallel cubes sharing the frame `rot`.
    #[allow(clippy::too_many_arguments)]
    pub fn parallel_cube_collision(
        &self,
        p1: &mut Particle,
        m1: f64,
        p2: &mut Particle,
        m2: f64,
        rij: Vector,
        e: f64,
        rot: &Matrix,
        t: f64,
    ) -> Result<EventData> {
        self.require_up_to_date(&[p1, p2], t)?;
        let r_rot = mat_mul(rot, &rij);
        let v_rot = mat_mul(rot, &vector::sub(&p1.v, &p2.v));
        let mut axis = 0;
        for k in 1..DIM {
            if r_rot[k].abs() > r_rot[axis].abs() {
                axis = k;
            }
        }
        let mut dp_rot = ZERO;
        dp_rot[axis] = (1.0 + e) * reduced_mass(m1, m2) * v_rot[axis];
        let dp = mat_mul_transpose(rot, &dp_rot);
        check_impulse(&dp, t, &[p1.id, p2.id], "cube collision")?;
        let c1 = kick(p1, m1, &dp, -1.0);
        let c2 = kick(p2, m2, &dp, 1.0);
        Ok(EventData {
            event_type: EventType::Core,
            changes: vec![c1, c2],
            impulse: dp,
            delta_u: 0.0,
        })
    }

    /// Reflection off a plane with unit normal `nhat`, restitution `e`.
    pub fn wall_collision(&self, p: &mut Particle, mass: f64, nhat: &Vector, e: f64, t: f64) -> Result<EventData> {
        self.require_up_to_date(&[p], t)?;
        let vn = dot(nhat, &p.v);
        let new_v = {
            let mut v = p.v;
            vector::add_scaled(&mut v, nhat, -(1.0 + e) * vn);
            v
        };
        let change = reset_velocity(p, mass, new_v);
        Ok(EventData {
            event_type: EventType::Wall,
            changes: vec![change],
            impulse: ZERO,
            delta_u: 0.0,
        })
    }

    /// Thermal (Andersen) wall: redraw the velocity from the wall's
    /// distribution. Tangential components are Gaussian, the normal component
    /// (along `nhat`, away from the wall) Rayleigh distributed.
    #[allow(clippy::too_many_arguments)]
    pub fn andersen_wall_collision<R: Rng + ?Sized>(
        &self,
        p: &mut Particle,
        mass: f64,
        nhat: &Vector,
        sqrt_t: f64,
        rng: &mut R,
        t: f64,
    ) -> Result<EventData> {
        self.require_up_to_date(&[p], t)?;
        let factor = sqrt_t / mass.sqrt();
        let mut v = ZERO;
        for vk in v.iter_mut() {
            let z: f64 = rng.sample(StandardNormal);
            *vk = z * factor;
        }
        let u: f64 = rng.random();
        let vn = dot(&v, nhat);
        let rayleigh = factor * (-2.0 * (1.0 - u).ln()).sqrt();
        vector::add_scaled(&mut v, nhat, rayleigh - vn);
        let change = reset_velocity(p, mass, v);
        Ok(EventData {
            event_type: EventType::ThermalWall,
            changes: vec![change],
            impulse: ZERO,
            delta_u: 0.0,
        })
    }

    /// Redraw a particle's velocity from the Maxwell-Boltzmann distribution at
    /// temperature `sqrt_t^2`.
    pub fn random_gaussian_event<R: Rng + ?Sized>(
        &self,
        p: &mut Particle,
        mass: f64,
        sqrt_t: f64,
        rng: &mut R,
        t: f64,
    ) -> Result<EventData> {
        self.require_up_to_date(&[p], t)?;
        let factor = sqrt_t / mass.sqrt();
        let mut v = ZERO;
        for vk in v.iter_mut() {
            let z: f64 = rng.sample(StandardNormal);
            *vk = z * factor;
        }
        let change = reset_velocity(p, mass, v);
        Ok(EventData {
            event_type: EventType::Gaussian,
            changes: vec![change],
            impulse: ZERO,
            delta_u: 0.0,
        })
    }

    /// Collision with the inside of a cylinder (axis through `origin` along
    /// unit `axis`).
    #[allow(clippy::too_many_arguments)]
    pub fn cylinder_collision(
        &self,
        p: &mut Particle,
        mass: f64,
        origin: &Vector,
        axis: &Vector,
        e: f64,
        t: f64,
    ) -> Result<EventData> {
        self.require_up_to_date(&[p], t)?;
        let mut radial = vector::sub(&p.r, origin);
        let along = dot(&radial, axis);
        vector::add_scaled(&mut radial, axis, -along);
        let nhat = vector::unit(&radial).ok_or_else(|| {
            Error::invariant(t, &[p.id], "particle on cylinder axis at a cylinder event")
        })?;
        let mut data = self.wall_collision(p, mass, &nhat, e, t)?;
        data.event_type = EventType::Wall;
        Ok(data)
    }

    /// Collision with a driven (infinite-mass) oscillating plate. The particle
    /// is first placed exactly on the contact surface; collisions slower than
    /// `elastic_snap_speed` are made elastic.
    #[allow(clippy::too_many_arguments)]
    pub fn oscillating_plate_collision(
        &self,
        p: &mut Particle,
        mass: f64,
        plate: &PlateGeometry,
        side: f64,
        e: f64,
        elastic_snap_speed: f64,
        t: f64,
    ) -> Result<EventData> {
        self.require_up_to_date(&[p], t)?;
        let target = plate.offset(t) + side * plate.sigma;
        let current = dot(&vector::sub(&p.r, &plate.origin), &plate.nhat);
        vector::add_scaled(&mut p.r, &plate.nhat, target - current);

        let u = dot(&p.v, &plate.nhat) - plate.speed(t);
        let e = if u.abs() < elastic_snap_speed { 1.0 } else { e };
        let mut v = p.v;
        vector::add_scaled(&mut v, &plate.nhat, -(1.0 + e) * u);
        let change = reset_velocity(p, mass, v);
        Ok(EventData {
            event_type: EventType::Wall,
            changes: vec![change],
            impulse: ZERO,
            delta_u: 0.0,
        })
    }

    /// Rigid-body collision between two clusters. Each cluster is reduced to
    /// its centre of mass, the two-body impulse is computed, and every member
    /// receives the same velocity change `dP / M`.
    pub fn multibody_collision(
        &self,
        parts: &mut [Particle],
        masses: &[f64],
        body1: &[usize],
        body2: &[usize],
        e: f64,
        min_image: impl Fn(&mut Vector),
        t: f64,
    ) -> Result<EventData> {
        let (rij, vij, mass1, mass2) = self.bodies(parts, masses, body1, body2, &min_image, t)?;
        let r2 = vector::norm2(&rij);
        let mu = reduced_mass(mass1, mass2);
        let rvdot = dot(&rij, &vij);
        let dp = if mu == 0.0 {
            ZERO
        } else {
            vector::scale(&rij, (1.0 + e) * mu * rvdot / r2)
        };
        let ids: Vec<usize> = body1.iter().chain(body2.iter()).copied().collect();
        check_impulse(&dp, t, &ids, "multibody collision")?;
        let changes = distribute(parts, masses, body1, body2, mass1, mass2, &dp);
        Ok(EventData {
            event_type: EventType::Core,
            changes,
            impulse: dp,
            delta_u: 0.0,
        })
    }

    /// Square-well crossing between two clusters; see [`Self::sphere_well_event`].
    #[allow(clippy::too_many_arguments)]
    pub fn multibody_well_event(
        &self,
        parts: &mut [Particle],
        masses: &[f64],
        body1: &[usize],
        body2: &[usize],
        delta_ke: f64,
        min_image: impl Fn(&mut Vector),
        t: f64,
    ) -> Result<EventData> {
        let (rij, vij, mass1, mass2) = self.bodies(parts, masses, body1, body2, &min_image, t)?;
        let r2 = vector::norm2(&rij);
        let mu = reduced_mass(mass1, mass2);
        let (event_type, dp) = well_impulse(&rij, dot(&rij, &vij), r2, mu, delta_ke);
        let ids: Vec<usize> = body1.iter().chain(body2.iter()).copied().collect();
        check_impulse(&dp, t, &ids, "multibody well event")?;
        let changes = distribute(parts, masses, body1, body2, mass1, mass2, &dp);
        let delta_u = match event_type {
            EventType::Bounce => 0.0,
            _ => -delta_ke,
        };
        Ok(EventData {
            event_type,
            changes,
            impulse: dp,
            delta_u,
        })
    }

    /// Stream every member to `t` and return the centre-of-mass separation,
    /// relative velocity and total masses of both bodies.
    fn bodies(
        &self,
        parts: &mut [Particle],
        masses: &[f64],
        body1: &[usize],
        body2: &[usize],
        min_image: &impl Fn(&mut Vector),
        t: f64,
    ) -> Result<(Vector, Vector, f64, f64)> {
        let mut com = |body: &[usize]| -> Result<(Vector, Vector, f64)> {
            // Member positions are taken relative to the first member so
            // clusters straddling a periodic face stay contiguous.
            let anchor = parts[body[0]].position_at(t);
            let mut pos = ZERO;
            let mut vel = ZERO;
            let mut mass = 0.0;
            for &id in body {
                self.stream_particle(&mut parts[id], t)?;
                let m = masses[id];
                let mut rel = vector::sub(&parts[id].r, &anchor);
                min_image(&mut rel);
                if m.is_infinite() {
                    // A fixed member pins the whole body.
                    return Ok((vector::add(&anchor, &rel), parts[id].v, f64::INFINITY));
                }
                vector::add_scaled(&mut pos, &rel, m);
                vector::add_scaled(&mut vel, &parts[id].v, m);
                mass += m;
            }
            pos = vector::add(&anchor, &vector::scale(&pos, 1.0 / mass));
            Ok((pos, vector::scale(&vel, 1.0 / mass), mass))
        };
        let (pos1, vel1, mass1) = com(body1)?;
        let (pos2, vel2, mass2) = com(body2)?;
        let mut rij = vector::sub(&pos1, &pos2);
        min_image(&mut rij);
        Ok((rij, vector::sub(&vel1, &vel2), mass1, mass2))
    }
}

/// Impulse for a well crossing. The three outcomes are exhaustive.
fn well_impulse(rij: &Vector, rvdot: f64, r2: f64, mu: f64, delta_ke: f64) -> (EventType, Vector) {
    if mu == 0.0 {
        return (EventType::Bounce, ZERO);
    }
    let sqrt_arg = rvdot * rvdot + 2.0 * r2 * delta_ke / mu;
    if delta_ke < 0.0 && sqrt_arg < 0.0 {
        return (EventType::Bounce, vector::scale(rij, 2.0 * mu * rvdot / r2));
    }
    let event_type = if delta_ke < 0.0 {
        EventType::WellKeDown
    } else {
        EventType::WellKeUp
    };
    let root = sqrt_arg.sqrt();
    let factor = if rvdot < 0.0 {
        2.0 * delta_ke / (root - rvdot)
    } else {
        -2.0 * delta_ke / (rvdot + root)
    };
    (event_type, vector::scale(rij, factor))
}

fn distribute(
    parts: &mut [Particle],
    masses: &[f64],
    body1: &[usize],
    body2: &[usize],
    mass1: f64,
    mass2: f64,
    dp: &Vector,
) -> Vec<ParticleDelta> {
    let mut changes = Vec::with_capacity(body1.len() + body2.len());
    for (body, total, sign) in [(body1, mass1, -1.0), (body2, mass2, 1.0)] {
        let dv = if total.is_finite() {
            vector::scale(dp, sign / total)
        } else {
            ZERO
        };
        for &id in body {
            let p = &mut parts[id];
            let old_v = p.v;
            if masses[id].is_finite() {
                p.v = vector::add(&p.v, &dv);
            }
            changes.push(ParticleDelta {
                id,
                old_v,
                new_v: p.v,
                delta_ke: kinetic(masses[id], &p.v) - kinetic(masses[id], &old_v),
            });
        }
    }
    changes
}

/// Two distinct mutable particles out of a slice.
pub fn pair_mut(parts: &mut [Particle], i: usize, j: usize) -> Result<(&mut Particle, &mut Particle)> {
    if i == j {
        return Err(Error::InvalidParam(format!(
            "a pair event needs two distinct particles, got {i} twice"
        )));
    }
    Ok(if i < j {
        let (a, b) = parts.split_at_mut(j);
        (&mut a[i], &mut b[0])
    } else {
        let (a, b) = parts.split_at_mut(i);
        (&mut b[0], &mut a[j])
    })
}
