//! Particle-local objects: walls, thermal walls, cylinders and oscillating
//! plates. Each one predicts and resolves events against single particles.

use log::warn;
use rand::Rng;

use crate::core::event::EventType;
use crate::core::liouvillean::{EventData, Liouvillean};
use crate::core::particle::{Particle, DIM};
use crate::core::roots::{self, PlateGeometry, PlateRootParams};
use crate::core::vector::{self, dot, Vector, ZERO};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum LocalKind {
    /// Plane through `origin`; `nhat` points into the region particles live in.
    Wall {
        origin: Vector,
        nhat: Vector,
        elasticity: f64,
    },
    /// Plane that re-thermalises particles at temperature `sqrt_t^2`.
    AndersenWall {
        origin: Vector,
        nhat: Vector,
        sqrt_t: f64,
    },
    /// Particles are confined inside an infinite cylinder.
    Cylinder {
        origin: Vector,
        axis: Vector,
        radius: f64,
        elasticity: f64,
    },
    /// Driven plate of infinite mass.
    OscillatingPlate {
        geometry: PlateGeometry,
        elasticity: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Local {
    pub name: String,
    pub kind: LocalKind,
    /// Species this object acts on; `None` for all.
    pub species: Option<usize>,
}

fn unit_or_err(name: &str, what: &str, v: &Vector) -> Result<Vector> {
    vector::unit(v).ok_or_else(|| {
        Error::InvalidParam(format!("{what} of local '{name}' must be a non-zero finite vector"))
    })
}

fn check_e(name: &str, e: f64) -> Result<()> {
    if (0.0..=1.0).contains(&e) {
        Ok(())
    } else {
        Err(Error::InvalidParam(format!(
            "elasticity of local '{name}' must lie in [0, 1]"
        )))
    }
}

impl Local {
    /// Validate parameters and normalise direction vectors.
    pub fn new(name: impl Into<String>, kind: LocalKind, species: Option<usize>) -> Result<Self> {
        let name = name.into();
        let kind = match kind {
            LocalKind::Wall {
                origin,
                nhat,
                elasticity,
            } => {
                check_e(&name, elasticity)?;
                LocalKind::Wall {
                    origin,
                    nhat: unit_or_err(&name, "normal", &nhat)?,
                    elasticity,
                }
            }
            LocalKind::AndersenWall {
                origin,
                nhat,
                sqrt_t,
            } => {
                if !(sqrt_t.is_finite() && sqrt_t > 0.0) {
                    return Err(Error::InvalidParam(format!(
                        "temperature of thermal wall '{name}' must be finite and > 0"
                    )));
                }
                LocalKind::AndersenWall {
                    origin,
                    nhat: unit_or_err(&name, "normal", &nhat)?,
                    sqrt_t,
                }
            }
            LocalKind::Cylinder {
                origin,
                axis,
                radius,
                elasticity,
            } => {
                check_e(&name, elasticity)?;
                if !(radius.is_finite() && radius > 0.0) {
                    return Err(Error::InvalidParam(format!(
                        "radius of cylinder '{name}' must be finite and > 0"
                    )));
                }
                LocalKind::Cylinder {
                    origin,
                    axis: unit_or_err(&name, "axis", &axis)?,
                    radius,
                    elasticity,
                }
            }
            LocalKind::OscillatingPlate {
                mut geometry,
                elasticity,
            } => {
                check_e(&name, elasticity)?;
                geometry.nhat = unit_or_err(&name, "normal", &geometry.nhat)?;
                let finite = [geometry.delta, geometry.omega, geometry.phase, geometry.sigma]
                    .iter()
                    .all(|x| x.is_finite());
                if !finite || geometry.sigma < 0.0 {
                    return Err(Error::InvalidParam(format!(
                        "plate '{name}' needs finite parameters and sigma >= 0"
                    )));
                }
                LocalKind::OscillatingPlate {
                    geometry,
                    elasticity,
                }
            }
        };
        Ok(Self {
            name,
            kind,
            species,
        })
    }

    /// The `2 * DIM` elastic walls closing a box of extent `size` centred on
    /// the origin.
    pub fn box_walls(size: &Vector) -> Vec<Local> {
        let mut out = Vec::with_capacity(2 * DIM);
        for k in 0..DIM {
            for sign in [-1.0, 1.0] {
                let mut origin = ZERO;
                origin[k] = sign * 0.5 * size[k];
                let mut nhat = ZERO;
                nhat[k] = -sign;
                out.push(Local {
                    name: format!("box-{}{k}", if sign < 0.0 { "low" } else { "high" }),
                    kind: LocalKind::Wall {
                        origin,
                        nhat,
                        elasticity: 1.0,
                    },
                    species: None,
                });
            }
        }
        out
    }

    #[inline]
    pub fn applies_to(&self, species: usize) -> bool {
        self.species.is_none_or(|s| s == species)
    }

    /// Time until `p` (exact at absolute time `t`) hits this object.
    ///
    /// `just_hit` marks that the particle's last event was with this object;
    /// only the plate search needs it.
    pub fn predict(
        &self,
        p: &Particle,
        t: f64,
        just_hit: bool,
        plate_params: &PlateRootParams,
    ) -> Option<(f64, EventType)> {
        let r = p.position_at(t);
        match &self.kind {
            LocalKind::Wall { origin, nhat, .. } => {
                let dist = dot(&vector::sub(&r, origin), nhat);
                roots::wall_root(dist, dot(&p.v, nhat)).map(|dt| (dt, EventType::Wall))
            }
            LocalKind::AndersenWall { origin, nhat, .. } => {
                let dist = dot(&vector::sub(&r, origin), nhat);
                roots::wall_root(dist, dot(&p.v, nhat)).map(|dt| (dt, EventType::ThermalWall))
            }
            LocalKind::Cylinder {
                origin,
                axis,
                radius,
                ..
            } => roots::cylinder_root(&vector::sub(&r, origin), &p.v, axis, *radius)
                .map(|dt| (dt, EventType::Wall)),
            LocalKind::OscillatingPlate { geometry, .. } => {
                let root =
                    roots::oscillating_plate_root(&r, &p.v, t, geometry, just_hit, plate_params)?;
                if root.clamped {
                    warn!(
                        "particle {} inside the contact shell of plate '{}' at t={t}; clamping",
                        p.id, self.name
                    );
                }
                Some((root.dt, EventType::Wall))
            }
        }
    }

    /// Apply the collision to `p`, which must be current at `t`.
    #[allow(clippy::too_many_arguments)]
    pub fn resolve<R: Rng + ?Sized>(
        &self,
        liouvillean: &Liouvillean,
        p: &mut Particle,
        mass: f64,
        t: f64,
        plate_params: &PlateRootParams,
        rng: &mut R,
    ) -> Result<EventData> {
        match &self.kind {
            LocalKind::Wall {
                nhat, elasticity, ..
            } => liouvillean.wall_collision(p, mass, nhat, *elasticity, t),
            LocalKind::AndersenWall { nhat, sqrt_t, .. } => {
                liouvillean.andersen_wall_collision(p, mass, nhat, *sqrt_t, rng, t)
            }
            LocalKind::Cylinder {
                origin,
                axis,
                elasticity,
                ..
            } => liouvillean.cylinder_collision(p, mass, origin, axis, *elasticity, t),
            LocalKind::OscillatingPlate {
                geometry,
                elasticity,
            } => {
                let rel = dot(&vector::sub(&p.r, &geometry.origin), &geometry.nhat);
                let side = if rel - geometry.offset(t) >= 0.0 { 1.0 } else { -1.0 };
                liouvillean.oscillating_plate_collision(
                    p,
                    mass,
                    geometry,
                    side,
                    *elasticity,
                    plate_params.elastic_snap_speed,
                    t,
                )
            }
        }
    }
}
