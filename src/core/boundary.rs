use crate::core::particle::DIM;
use crate::core::vector::Vector;
use crate::error::{Error, Result};

/// How the primary box is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryKind {
    /// Minimum-image periodic wrapping.
    Periodic,
    /// Hard walls on every face of the box.
    Reflective,
}

/// The primary simulation box, centred on the origin: each axis spans
/// `[-size/2, size/2]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Boundary {
    pub kind: BoundaryKind,
    pub size: Vector,
}

impl Boundary {
    pub fn new(kind: BoundaryKind, size: Vector) -> Result<Self> {
        if !size.iter().all(|&l| l.is_finite() && l > 0.0) {
            return Err(Error::InvalidParam(
                "box size components must be finite and > 0".into(),
            ));
        }
        Ok(Self { kind, size })
    }

    /// Map a separation vector onto its nearest periodic image.
    #[inline]
    pub fn minimum_image(&self, rij: &mut Vector) {
        if self.kind == BoundaryKind::Periodic {
            for (x, &l) in rij.iter_mut().zip(self.size.iter()) {
                *x -= l * (*x / l).round();
            }
        }
    }

    /// Fold a position back into the primary box, each axis onto the
    /// half-open interval `[-size/2, size/2)`.
    #[inline]
    pub fn wrap(&self, r: &mut Vector) {
        if self.kind == BoundaryKind::Periodic {
            for (x, &l) in r.iter_mut().zip(self.size.iter()) {
                *x -= l * (*x / l + 0.5).floor();
            }
        }
    }

    pub fn volume(&self) -> f64 {
        self.size.iter().product()
    }

    /// True when `r` lies inside the primary box (within `slack`).
    pub fn contains(&self, r: &Vector, slack: f64) -> bool {
        (0..DIM).all(|k| r[k].abs() <= 0.5 * self.size[k] + slack)
    }
}
