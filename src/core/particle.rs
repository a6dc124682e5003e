use crate::core::vector::Vector;
use crate::error::{Error, Result};

/// Spatial dimension of this build. All kernels loop over `0..DIM`.
pub const DIM: usize = 3;

/// A particle record in the store.
///
/// Fields:
/// - `id`: stable identifier, equal to the particle's index in the store
/// - `r`: position at `last_update`
/// - `v`: velocity
/// - `species`: index into the species table
/// - `last_update`: time at which `r` is exact; streaming is lazy
/// - `generation`: incremented on every state change, stamps queued events
#[derive(Debug, Clone)]
pub struct Particle {
    /// Stable particle identifier.
    pub id: usize,
    /// Position at `last_update`.
    pub r: Vector,
    /// Velocity.
    pub v: Vector,
    /// Species index.
    pub species: usize,
    /// Time the position was last brought up to date.
    pub last_update: f64,
    /// State-generation counter (for event invalidation).
    pub generation: u64,
}

impl Particle {
    /// Create a new particle after validating invariants.
    ///
    /// Errors:
    /// - `Error::InvalidParam` if any component is NaN/inf.
    pub fn new(id: usize, r: Vector, v: Vector, species: usize) -> Result<Self> {
        if !r.iter().all(|x| x.is_finite()) {
            return Err(Error::InvalidParam(format!(
                "position of particle {id} must be finite"
            )));
        }
        if !v.iter().all(|x| x.is_finite()) {
            return Err(Error::InvalidParam(format!(
                "velocity of particle {id} must be finite"
            )));
        }
        // A stored -0.0 component would give a -inf cell exit time.
        let v = v.map(|x| x + 0.0);
        Ok(Self {
            id,
            r,
            v,
            species,
            last_update: 0.0,
            generation: 0,
        })
    }

    /// Increment the generation counter, invalidating every queued event that
    /// was predicted with the previous value.
    #[inline]
    pub fn bump_generation(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    /// Position extrapolated to `t` without mutating the record.
    #[inline]
    pub fn position_at(&self, t: f64) -> Vector {
        let dt = t - self.last_update;
        let mut r = self.r;
        for (x, &vk) in r.iter_mut().zip(self.v.iter()) {
            *x += vk * dt;
        }
        r
    }

    /// Kinetic energy for a given mass; zero for infinite-mass particles.
    #[inline]
    pub fn kinetic_energy(&self, mass: f64) -> f64 {
        if !mass.is_finite() {
            return 0.0;
        }
        let vsq: f64 = self.v.iter().map(|&c| c * c).sum();
        0.5 * mass * vsq
    }
}
