use crate::error::{Error, Result};
use ordered_float::NotNan;
use std::cmp::Ordering;

/// Physical classification of an event, used for resolution and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Hard-core collision.
    Core,
    /// Failed escape from a square well.
    Bounce,
    /// Entry into a square well.
    WellKeUp,
    /// Escape from a square well.
    WellKeDown,
    /// Reflection off a wall, cylinder or plate.
    Wall,
    /// Thermalising wall collision.
    ThermalWall,
    /// Velocity redrawn by the thermostat.
    Gaussian,
    /// Cell boundary crossing.
    Cell,
    /// System event with no particle dynamics.
    NonEvent,
}

impl EventType {
    pub const COUNT: usize = 9;

    pub const ALL: [EventType; Self::COUNT] = [
        EventType::Core,
        EventType::Bounce,
        EventType::WellKeUp,
        EventType::WellKeDown,
        EventType::Wall,
        EventType::ThermalWall,
        EventType::Gaussian,
        EventType::Cell,
        EventType::NonEvent,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Who takes part in an event.
///
/// Tie-breaking for deterministic ordering at equal times goes
/// `Interaction` < `Local` < `Cell` < `System`, then by ascending IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Two-particle interaction between `i` and `j` (`i < j`).
    Interaction { i: usize, j: usize },
    /// Particle `i` hits local object `local`.
    Local { i: usize, local: usize },
    /// Particle `i` leaves its cell through the face on `axis` in direction
    /// `dir` (+1/-1).
    Cell { i: usize, axis: usize, dir: i64 },
    /// Timed system event `id`.
    System { id: usize },
}

impl EventKind {
    #[inline]
    fn order_key(&self) -> (u8, usize, usize) {
        match *self {
            EventKind::Interaction { i, j } => (0, i, j),
            EventKind::Local { i, local } => (1, i, local),
            EventKind::Cell { i, .. } => (2, i, 0),
            EventKind::System { id } => (3, id, 0),
        }
    }

    /// Particle IDs taking part, first one owning the event.
    pub fn particles(&self) -> (Option<usize>, Option<usize>) {
        match *self {
            EventKind::Interaction { i, j } => (Some(i), Some(j)),
            EventKind::Local { i, .. } | EventKind::Cell { i, .. } => (Some(i), None),
            EventKind::System { .. } => (None, None),
        }
    }
}

/// A predicted event.
///
/// `gen_i` / `gen_j` are the participants' generation counters at
/// prediction time; the event is stale once either counter moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub time: NotNan<f64>,
    pub kind: EventKind,
    pub event_type: EventType,
    pub gen_i: u64,
    pub gen_j: Option<u64>,
}

impl Event {
    /// Create a new event, validating that time is finite and non-NaN.
    pub fn new(
        time: f64,
        kind: EventKind,
        event_type: EventType,
        gen_i: u64,
        gen_j: Option<u64>,
    ) -> Result<Self> {
        if !time.is_finite() {
            return Err(Error::MathError(format!(
                "event time must be finite, got {time} for {kind:?}"
            )));
        }
        let time = NotNan::new(time)
            .map_err(|_| Error::MathError("event time cannot be NaN".into()))?;
        Ok(Self {
            time,
            kind,
            event_type,
            gen_i,
            gen_j,
        })
    }

    /// A system event; these carry no stamps.
    pub fn system(time: f64, id: usize) -> Result<Self> {
        Self::new(time, EventKind::System { id }, EventType::NonEvent, 0, None)
    }

    /// Returns the raw f64 event time.
    #[inline]
    pub fn time_f64(&self) -> f64 {
        self.time.into_inner()
    }

    /// Validate against the participants' current generation counters.
    #[inline]
    pub fn is_valid(&self, gen_i_now: u64, gen_j_now: Option<u64>) -> bool {
        if self.gen_i != gen_i_now {
            return false;
        }
        match (self.gen_j, gen_j_now) {
            (Some(a), Some(b)) => a == b,
            (None, _) => true,
            (Some(_), None) => false,
        }
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.kind.order_key().cmp(&other.kind.order_key()))
            .then_with(|| self.event_type.cmp(&other.event_type))
            .then_with(|| {
                (self.gen_i, self.gen_j.unwrap_or(0)).cmp(&(other.gen_i, other.gen_j.unwrap_or(0)))
            })
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use EventKind::{Cell, Interaction, Local, System};

    #[test]
    fn new_event_rejects_non_finite_time() {
        let kind = Interaction { i: 1, j: 2 };
        assert!(Event::new(f64::NAN, kind, EventType::Core, 0, Some(0)).is_err());
        let err = Event::new(f64::INFINITY, kind, EventType::Core, 0, Some(0)).unwrap_err();
        assert!(err.to_string().contains("finite"));
    }

    #[test]
    fn ordering_by_time() -> Result<()> {
        let e1 = Event::new(1.0, Interaction { i: 0, j: 1 }, EventType::Core, 0, Some(0))?;
        let e2 = Event::new(2.0, Local { i: 0, local: 0 }, EventType::Wall, 0, None)?;
        assert!(e1 < e2);
        Ok(())
    }

    #[test]
    fn ties_break_by_kind_then_ids() -> Result<()> {
        let t = 5.0;
        let pair = Event::new(t, Interaction { i: 0, j: 3 }, EventType::Core, 3, Some(4))?;
        let pair_low = Event::new(t, Interaction { i: 0, j: 1 }, EventType::Core, 9, Some(9))?;
        let wall = Event::new(t, Local { i: 0, local: 1 }, EventType::Wall, 3, None)?;
        let cell = Event::new(t, Cell { i: 0, axis: 0, dir: 1 }, EventType::Cell, 3, None)?;
        let sys = Event::system(t, 0)?;
        let mut all = vec![sys, cell, wall, pair, pair_low];
        all.sort();
        assert_eq!(all, vec![pair_low, pair, wall, cell, sys]);
        Ok(())
    }

    #[test]
    fn is_valid_checks_generations() -> Result<()> {
        let pp = Event::new(1.0, Interaction { i: 1, j: 2 }, EventType::Core, 10, Some(20))?;
        assert!(pp.is_valid(10, Some(20)));
        assert!(!pp.is_valid(11, Some(20)));
        assert!(!pp.is_valid(10, Some(21)));
        assert!(!pp.is_valid(10, None));

        let pw = Event::new(1.0, Local { i: 3, local: 0 }, EventType::Wall, 7, None)?;
        assert!(pw.is_valid(7, None));
        assert!(pw.is_valid(7, Some(999)));
        Ok(())
    }

    #[test]
    fn system_events_have_no_participants() -> Result<()> {
        let e = Event::system(2.0, 4)?;
        assert_eq!(e.kind.particles(), (None, None));
        assert_eq!(e.event_type, EventType::NonEvent);
        assert_eq!(System { id: 4 }, e.kind);
        Ok(())
    }
}
