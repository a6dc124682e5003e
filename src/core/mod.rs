//! Core simulation data structures and the event-driven engine.
//!
//! Leaves first: `vector`, `particle`, `roots` and `boundary` are pure;
//! `liouvillean` moves and collides particles; `cells`, `event` and `queue`
//! organise the search; `sim` owns everything and runs the loop.

pub mod boundary;
pub mod cells;
pub mod event;
pub mod interaction;
pub mod liouvillean;
pub mod locals;
pub mod particle;
pub mod queue;
pub mod roots;
pub mod sim;
pub mod species;
pub mod systems;
pub mod vector;

pub use boundary::{Boundary, BoundaryKind};
pub use event::{Event, EventKind, EventType};
pub use interaction::{Interaction, InteractionKind, PairSelector};
pub use liouvillean::Liouvillean;
pub use locals::{Local, LocalKind};
pub use particle::{Particle, DIM};
pub use sim::{RunSummary, Simulation, StopCondition, StopReason, World};
pub use species::Species;
pub use systems::{Sample, System, SystemKind};
