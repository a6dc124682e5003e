//! Pair interaction laws and the square-well capture state.

use std::collections::HashSet;

use crate::core::particle::DIM;
use crate::core::vector::Matrix;
use crate::error::{Error, Result};

/// Pair interaction law. Lengths are values at `t = 0`; under compression
/// dynamics they scale with the Liouvillean's length factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InteractionKind {
    /// Hard spheres of contact distance `diameter`.
    HardSphere { diameter: f64, elasticity: f64 },
    /// Hard core `diameter` surrounded by a well of outer diameter
    /// `lambda * diameter` and depth `well_depth`.
    SquareWell {
        diameter: f64,
        lambda: f64,
        well_depth: f64,
        elasticity: f64,
    },
    /// Parallel cubes of side `width` whose common frame is `rotation`.
    ParallelCubes {
        width: f64,
        elasticity: f64,
        rotation: Matrix,
    },
}

/// Which species pairs an interaction applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairSelector {
    All,
    Species(usize, usize),
}

impl PairSelector {
    #[inline]
    pub fn matches(&self, a: usize, b: usize) -> bool {
        match *self {
            PairSelector::All => true,
            PairSelector::Species(x, y) => (x == a && y == b) || (x == b && y == a),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    pub name: String,
    pub kind: InteractionKind,
    pub selector: PairSelector,
    /// Resolve collisions between the rigid clusters containing the pair.
    pub clustered: bool,
}

impl Interaction {
    pub fn new(name: impl Into<String>, kind: InteractionKind, selector: PairSelector) -> Result<Self> {
        let name = name.into();
        let check_e = |e: f64| {
            if (0.0..=1.0).contains(&e) {
                Ok(())
            } else {
                Err(Error::InvalidParam(format!(
                    "elasticity of interaction '{name}' must lie in [0, 1]"
                )))
            }
        };
        let check_len = |what: &str, x: f64| {
            if x.is_finite() && x > 0.0 {
                Ok(())
            } else {
                Err(Error::InvalidParam(format!(
                    "{what} of interaction '{name}' must be finite and > 0"
                )))
            }
        };
        match &kind {
            InteractionKind::HardSphere {
                diameter,
                elasticity,
            } => {
                check_len("diameter", *diameter)?;
                check_e(*elasticity)?;
            }
            InteractionKind::SquareWell {
                diameter,
                lambda,
                well_depth,
                elasticity,
            } => {
                check_len("diameter", *diameter)?;
                check_e(*elasticity)?;
                if !(lambda.is_finite() && *lambda > 1.0) {
                    return Err(Error::InvalidParam(format!(
                        "lambda of interaction '{name}' must be > 1"
                    )));
                }
                if !well_depth.is_finite() {
                    return Err(Error::InvalidParam(format!(
                        "well depth of interaction '{name}' must be finite"
                    )));
                }
            }
            InteractionKind::ParallelCubes {
                width, elasticity, ..
            } => {
                check_len("width", *width)?;
                check_e(*elasticity)?;
            }
        }
        Ok(Self {
            name,
            kind,
            selector,
            clustered: false,
        })
    }

    pub fn clustered(mut self, clustered: bool) -> Self {
        self.clustered = clustered;
        self
    }

    /// Largest centre separation at which the pair can still interact, at
    /// unit length scale.
    pub fn max_distance(&self) -> f64 {
        match self.kind {
            InteractionKind::HardSphere { diameter, .. } => diameter,
            InteractionKind::SquareWell {
                diameter, lambda, ..
            } => diameter * lambda,
            InteractionKind::ParallelCubes { width, .. } => width * (DIM as f64).sqrt(),
        }
    }

    /// Volume excluded by one particle interacting through this law.
    pub fn excluded_volume(&self) -> f64 {
        match self.kind {
            InteractionKind::HardSphere { diameter, .. }
            | InteractionKind::SquareWell { diameter, .. } => ball_volume(diameter),
            InteractionKind::ParallelCubes { width, .. } => width.powi(DIM as i32),
        }
    }

    pub fn is_well(&self) -> bool {
        matches!(self.kind, InteractionKind::SquareWell { .. })
    }
}

/// Volume of a `DIM`-ball of the given diameter.
fn ball_volume(diameter: f64) -> f64 {
    let r = 0.5 * diameter;
    match DIM {
        1 => 2.0 * r,
        2 => std::f64::consts::PI * r * r,
        _ => 4.0 / 3.0 * std::f64::consts::PI * r * r * r,
    }
}

/// Species-pair lookup built once at initialisation.
#[derive(Debug, Clone)]
pub struct InteractionTable {
    interactions: Vec<Interaction>,
    n_species: usize,
    lookup: Vec<Option<usize>>,
}

impl InteractionTable {
    /// First matching interaction wins for each species pair.
    pub fn new(interactions: Vec<Interaction>, n_species: usize) -> Self {
        let mut lookup = vec![None; n_species * n_species];
        for a in 0..n_species {
            for b in 0..n_species {
                lookup[a * n_species + b] =
                    interactions.iter().position(|it| it.selector.matches(a, b));
            }
        }
        Self {
            interactions,
            n_species,
            lookup,
        }
    }

    #[inline]
    pub fn index_for(&self, sa: usize, sb: usize) -> Option<usize> {
        self.lookup
            .get(sa * self.n_species + sb)
            .copied()
            .flatten()
    }

    #[inline]
    pub fn get(&self, idx: usize) -> &Interaction {
        &self.interactions[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interaction> {
        self.interactions.iter()
    }

    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// Longest interaction distance at unit length scale.
    pub fn longest(&self) -> f64 {
        self.interactions
            .iter()
            .map(Interaction::max_distance)
            .fold(0.0, f64::max)
    }
}

/// Pairs currently inside a square well, one set per interaction.
#[derive(Debug, Clone, Default)]
pub struct CaptureMap {
    pairs: Vec<HashSet<(usize, usize)>>,
}

impl CaptureMap {
    pub fn new(n_interactions: usize) -> Self {
        Self {
            pairs: vec![HashSet::new(); n_interactions],
        }
    }

    #[inline]
    fn key(a: usize, b: usize) -> (usize, usize) {
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }

    pub fn is_captured(&self, interaction: usize, a: usize, b: usize) -> bool {
        self.pairs[interaction].contains(&Self::key(a, b))
    }

    pub fn capture(&mut self, interaction: usize, a: usize, b: usize) {
        self.pairs[interaction].insert(Self::key(a, b));
    }

    pub fn release(&mut self, interaction: usize, a: usize, b: usize) {
        self.pairs[interaction].remove(&Self::key(a, b));
    }

    pub fn count(&self, interaction: usize) -> usize {
        self.pairs[interaction].len()
    }

    pub fn clear(&mut self) {
        self.pairs.iter_mut().for_each(HashSet::clear);
    }
}
