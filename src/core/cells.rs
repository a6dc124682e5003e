//! Cell list over the primary box.
//!
//! The grid is indexed periodically on every axis; with fewer than three
//! cells along an axis the neighbour list is deduplicated so each cell
//! appears once. Under a reflective boundary the outer faces are closed and
//! no transition is predicted through them.

use crate::core::boundary::{Boundary, BoundaryKind};
use crate::core::particle::DIM;
use crate::core::roots;
use crate::core::vector::{Vector, ZERO};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct CellList {
    n_cells: [usize; DIM],
    width: Vector,
    box_size: Vector,
    periodic: bool,
    members: Vec<Vec<usize>>,
    cell_of: Vec<usize>,
    /// Index of each particle inside its cell's member list.
    slot: Vec<usize>,
    neighbours: Vec<Vec<usize>>,
}

impl CellList {
    /// Build a grid whose cells are at least `min_cell_size` wide and place
    /// every particle by position.
    pub fn build(bc: &Boundary, min_cell_size: f64, positions: &[Vector]) -> Result<Self> {
        if !(min_cell_size.is_finite() && min_cell_size > 0.0) {
            return Err(Error::InvalidParam(format!(
                "minimum cell size must be finite and > 0, got {min_cell_size}"
            )));
        }
        let mut n_cells = [1usize; DIM];
        let mut width = ZERO;
        for k in 0..DIM {
            n_cells[k] = ((bc.size[k] / min_cell_size).floor() as usize).max(1);
            width[k] = bc.size[k] / n_cells[k] as f64;
        }
        let total: usize = n_cells.iter().product();
        let mut list = Self {
            n_cells,
            width,
            box_size: bc.size,
            periodic: bc.kind == BoundaryKind::Periodic,
            members: vec![Vec::new(); total],
            cell_of: vec![0; positions.len()],
            slot: vec![0; positions.len()],
            neighbours: Vec::with_capacity(total),
        };
        for cell in 0..total {
            let nb = list.compute_neighbours(cell);
            list.neighbours.push(nb);
        }
        for (id, r) in positions.iter().enumerate() {
            let cell = list.cell_index(r);
            list.insert(id, cell);
        }
        Ok(list)
    }

    /// Rebuild in place with a new minimum cell size.
    pub fn rebuild(&mut self, bc: &Boundary, min_cell_size: f64, positions: &[Vector]) -> Result<()> {
        *self = Self::build(bc, min_cell_size, positions)?;
        Ok(())
    }

    #[inline]
    pub fn n_cells(&self) -> [usize; DIM] {
        self.n_cells
    }

    /// Cell widths along each axis.
    #[inline]
    pub fn cell_dimensions(&self) -> Vector {
        self.width
    }

    /// Narrowest cell width.
    pub fn min_cell_dimension(&self) -> f64 {
        self.width.iter().copied().fold(f64::INFINITY, f64::min)
    }

    fn coords(&self, cell: usize) -> [usize; DIM] {
        let mut c = [0usize; DIM];
        let mut rest = cell;
        for k in 0..DIM {
            c[k] = rest % self.n_cells[k];
            rest /= self.n_cells[k];
        }
        c
    }

    fn index(&self, c: &[usize; DIM]) -> usize {
        let mut idx = 0;
        for k in (0..DIM).rev() {
            idx = idx * self.n_cells[k] + c[k];
        }
        idx
    }

    /// Cell containing `r`. Positions slightly outside the box wrap, or clamp
    /// to the edge cell when the box is closed.
    pub fn cell_index(&self, r: &Vector) -> usize {
        let mut c = [0usize; DIM];
        for k in 0..DIM {
            let x = (r[k] + 0.5 * self.box_size[k]) / self.width[k];
            let n = self.n_cells[k] as i64;
            let raw = x.floor() as i64;
            c[k] = if self.periodic {
                raw.rem_euclid(n) as usize
            } else {
                raw.clamp(0, n - 1) as usize
            };
        }
        self.index(&c)
    }

    fn compute_neighbours(&self, cell: usize) -> Vec<usize> {
        let base = self.coords(cell);
        let mut out = Vec::with_capacity(3usize.pow(DIM as u32));
        for mut code in 0..3usize.pow(DIM as u32) {
            let mut c = [0usize; DIM];
            for k in 0..DIM {
                let offset = (code % 3) as i64 - 1;
                code /= 3;
                let n = self.n_cells[k] as i64;
                c[k] = (base[k] as i64 + offset).rem_euclid(n) as usize;
            }
            out.push(self.index(&c));
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// The cell itself plus its neighbours, each once, ascending.
    #[inline]
    pub fn neighbours(&self, cell: usize) -> &[usize] {
        &self.neighbours[cell]
    }

    #[inline]
    pub fn members(&self, cell: usize) -> &[usize] {
        &self.members[cell]
    }

    #[inline]
    pub fn cell_of(&self, id: usize) -> usize {
        self.cell_of[id]
    }

    /// Cell across the face of `cell` on `axis`, in direction `dir` (+1/-1).
    /// `None` for a closed face of a reflective box.
    pub fn across(&self, cell: usize, axis: usize, dir: i64) -> Option<usize> {
        let mut c = self.coords(cell);
        if self.closed_face(&c, axis, dir) {
            return None;
        }
        let n = self.n_cells[axis] as i64;
        c[axis] = (c[axis] as i64 + dir).rem_euclid(n) as usize;
        Some(self.index(&c))
    }

    #[inline]
    fn closed_face(&self, c: &[usize; DIM], axis: usize, dir: i64) -> bool {
        !self.periodic && if dir < 0 { c[axis] == 0 } else { c[axis] + 1 == self.n_cells[axis] }
    }

    fn insert(&mut self, id: usize, cell: usize) {
        self.cell_of[id] = cell;
        self.slot[id] = self.members[cell].len();
        self.members[cell].push(id);
    }

    fn remove(&mut self, id: usize) {
        let cell = self.cell_of[id];
        let at = self.slot[id];
        self.members[cell].swap_remove(at);
        if let Some(&moved) = self.members[cell].get(at) {
            self.slot[moved] = at;
        }
    }

    /// Move particle `id` into `to`.
    pub fn move_particle(&mut self, id: usize, to: usize) {
        self.remove(id);
        self.insert(id, to);
    }

    /// Time until a particle at `r` (current) moving with `v` leaves its
    /// recorded cell, with the exit axis and direction. `None` when every
    /// open face is out of reach.
    ///
    /// `entered` names the face `(axis, dir)` the particle has just crossed
    /// into this cell; its offset on that axis is taken as exactly the face.
    ///
    /// Closed faces of a reflective box are never exits. A `-0.0` velocity
    /// component is an invariant violation in debug builds; negative exit
    /// times (round-off just past a face) clamp to zero.
    pub fn exit(
        &self,
        id: usize,
        r: &Vector,
        v: &Vector,
        entered: Option<(usize, i64)>,
        t: f64,
    ) -> Result<Option<(f64, usize, i64)>> {
        let c = self.coords(self.cell_of[id]);
        let mut best: Option<(f64, usize, i64)> = None;
        for k in 0..DIM {
            if v[k] == 0.0 {
                if v[k].is_sign_negative() && cfg!(debug_assertions) {
                    return Err(Error::invariant(
                        t,
                        &[id],
                        format!("negative-zero velocity on cell exit axis {k}"),
                    ));
                }
                continue;
            }
            let dir = if v[k] < 0.0 { -1 } else { 1 };
            if self.closed_face(&c, k, dir) {
                continue;
            }
            // Offset from the cell's lower face, periodic images folded into
            // the half-open interval [-L/2, L/2) around the cell centre.
            let centre = -0.5 * self.box_size[k] + (c[k] as f64 + 0.5) * self.width[k];
            let mut d = r[k] - centre;
            if self.periodic {
                d -= self.box_size[k] * (d / self.box_size[k] + 0.5).floor();
            }
            let rpos = match entered {
                Some((axis, d_in)) if axis == k && d_in == dir => {
                    if dir > 0 { 0.0 } else { self.width[k] }
                }
                _ => d + 0.5 * self.width[k],
            };
            let dt = roots::cell_face_time(rpos, v[k], self.width[k]);
            if dt.is_nan() {
                continue;
            }
            if best.is_none_or(|(tb, _, _)| dt < tb) {
                best = Some((dt, k, dir));
            }
        }
        Ok(best.filter(|(dt, _, _)| dt.is_finite()).map(|(dt, k, dir)| (dt.max(0.0), k, dir)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn periodic(l: f64) -> Result<Boundary> {
        Boundary::new(BoundaryKind::Periodic, [l; DIM])
    }

    #[test]
    fn grid_respects_minimum_size() -> Result<()> {
        let cells = CellList::build(&periodic(10.0)?, 3.0, &[])?;
        assert_eq!(cells.n_cells(), [3; DIM]);
        for w in cells.cell_dimensions() {
            assert!(w >= 3.0);
        }
        Ok(())
    }

    #[test]
    fn small_grids_dedupe_neighbours() -> Result<()> {
        let cells = CellList::build(&periodic(4.0)?, 2.0, &[])?;
        assert_eq!(cells.n_cells(), [2; DIM]);
        assert_eq!(cells.neighbours(0).len(), 2usize.pow(DIM as u32));
        let single = CellList::build(&periodic(4.0)?, 5.0, &[])?;
        assert_eq!(single.neighbours(0), &[0]);
        Ok(())
    }

    #[test]
    fn particles_are_placed_and_moved() -> Result<()> {
        let positions = vec![[-4.9; DIM], [4.9; DIM], [0.0; DIM]];
        let mut cells = CellList::build(&periodic(10.0)?, 2.0, &positions)?;
        let a = cells.cell_of(0);
        let b = cells.cell_of(1);
        assert_ne!(a, b);
        assert!(cells.neighbours(a).contains(&b), "corner cells touch through the box");
        cells.move_particle(0, b);
        assert_eq!(cells.members(b).len(), 2);
        assert!(cells.members(a).is_empty());
        Ok(())
    }

    #[test]
    fn exit_time_and_wrap_across_the_box() -> Result<()> {
        let mut r = [0.5; DIM];
        r[0] = 4.5;
        let cells = CellList::build(&periodic(10.0)?, 2.0, &[r])?;
        let mut v = ZERO;
        v[0] = 1.0;
        let (dt, axis, dir) = cells.exit(0, &r, &v, None, 0.0)?.expect("moving particle exits");
        assert!((dt - 0.5).abs() < 1e-12);
        assert_eq!((axis, dir), (0, 1));
        let next = cells.across(cells.cell_of(0), axis, dir).expect("periodic face is open");
        let mut wrapped = r;
        wrapped[0] = -5.0 + 1e-9;
        assert_eq!(next, cells.cell_index(&wrapped));
        Ok(())
    }

    #[test]
    fn reflective_box_has_closed_faces() -> Result<()> {
        let bc = Boundary::new(BoundaryKind::Reflective, [10.0; DIM])?;
        let mut r = [0.5; DIM];
        r[0] = 4.5;
        let cells = CellList::build(&bc, 2.0, &[r])?;
        let mut v = ZERO;
        v[0] = 1.0;
        assert!(cells.exit(0, &r, &v, None, 0.0)?.is_none());
        Ok(())
    }

    #[test]
    fn closed_faces_leave_the_other_axes_open() -> Result<()> {
        let bc = Boundary::new(BoundaryKind::Reflective, [10.0; DIM])?;
        let mut r = [4.5, -0.5, 0.5];
        let cells = CellList::build(&bc, 2.0, &[r])?;
        let mut v = ZERO;
        v[0] = 1.0;
        v[1] = -0.5;
        // Sitting on, or a hair past, the outer face while heading out of the box.
        for x in [5.0, 5.0 + 1e-12] {
            r[0] = x;
            let (dt, axis, dir) = cells.exit(0, &r, &v, None, 0.0)?.expect("y face is open");
            assert_eq!((axis, dir), (1, -1));
            assert!((dt - 1.0).abs() < 1e-12);
        }
        let cell = cells.cell_of(0);
        assert!(cells.across(cell, 0, 1).is_none());
        assert_eq!(cells.across(cell, 0, -1), Some(cells.cell_index(&[2.5, -0.5, 0.5])));
        Ok(())
    }

    #[test]
    fn entry_face_is_pinned_on_a_single_cell_axis() -> Result<()> {
        let bc = periodic(10.0)?;
        let r = [-5.0, 0.0, 0.0];
        let cells = CellList::build(&bc, 20.0, &[r])?;
        let mut v = ZERO;
        v[0] = 0.1;
        let (dt, axis, dir) = cells.exit(0, &r, &v, None, 0.0)?.expect("exits");
        assert_eq!((axis, dir), (0, 1));
        assert!((dt - 100.0).abs() < 1e-9);
        // Just streamed onto the +L/2 face and re-entered the same cell.
        let (dt, _, _) = cells.exit(0, &[5.0, 0.0, 0.0], &v, Some((0, 1)), 100.0)?.expect("exits");
        assert!((dt - 100.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn negative_zero_exit_is_rejected_in_debug() -> Result<()> {
        if !cfg!(debug_assertions) {
            return Ok(());
        }
        let r = [1.0; DIM];
        let cells = CellList::build(&periodic(10.0)?, 2.0, &[r])?;
        let mut v = [0.5; DIM];
        v[1] = -0.0;
        let err = cells.exit(0, &r, &v, None, 3.0).unwrap_err();
        assert!(matches!(err, Error::Invariant { .. }));
        Ok(())
    }
}
