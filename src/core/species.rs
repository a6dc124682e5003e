//! Static species and structure tables.
//!
//! Particles refer to species by index; structures (rigid clusters) are flat
//! lists of particle IDs with a reverse lookup table.

use crate::error::{Error, Result};

/// A particle species. `mass` may be `f64::INFINITY` for fixed particles.
#[derive(Debug, Clone, PartialEq)]
pub struct Species {
    pub name: String,
    pub mass: f64,
}

impl Species {
    pub fn new(name: impl Into<String>, mass: f64) -> Result<Self> {
        let name = name.into();
        if mass.is_nan() || mass <= 0.0 {
            return Err(Error::InvalidParam(format!(
                "mass of species '{name}' must be > 0 (infinite allowed)"
            )));
        }
        Ok(Self { name, mass })
    }

    #[inline]
    pub fn is_fixed(&self) -> bool {
        self.mass.is_infinite()
    }
}

/// Rigid clusters of particles that collide as single bodies.
#[derive(Debug, Clone, Default)]
pub struct Structures {
    members: Vec<Vec<usize>>,
    owner: Vec<Option<usize>>,
}

impl Structures {
    /// Build the table for `n` particles from lists of member IDs.
    pub fn new(n: usize, members: Vec<Vec<usize>>) -> Result<Self> {
        let mut owner = vec![None; n];
        for (s, list) in members.iter().enumerate() {
            if list.is_empty() {
                return Err(Error::Config(format!("structure {s} has no members")));
            }
            for &id in list {
                let slot = owner.get_mut(id).ok_or_else(|| {
                    Error::Config(format!("structure {s} references unknown particle {id}"))
                })?;
                if let Some(other) = slot.replace(s) {
                    return Err(Error::Config(format!(
                        "particle {id} belongs to structures {other} and {s}"
                    )));
                }
            }
        }
        Ok(Self { members, owner })
    }

    #[inline]
    pub fn structure_of(&self, id: usize) -> Option<usize> {
        self.owner.get(id).copied().flatten()
    }

    /// The members of the cluster containing `id`, or just `id`.
    pub fn body_of(&self, id: usize) -> Vec<usize> {
        match self.structure_of(id) {
            Some(s) => self.members[s].clone(),
            None => vec![id],
        }
    }

    /// True when both particles belong to the same cluster.
    #[inline]
    pub fn same_body(&self, a: usize, b: usize) -> bool {
        matches!((self.structure_of(a), self.structure_of(b)), (Some(x), Some(y)) if x == y)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
