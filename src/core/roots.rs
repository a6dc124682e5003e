//! Collision-time kernels.
//!
//! Every function here is pure and deterministic. "No event" is reported as
//! `None`; NaN or non-finite intermediate results also map to `None` so they
//! never reach the event queue.

use crate::core::particle::DIM;
use crate::core::vector::{dot, mat_mul, Matrix, Vector};

/// Relative state of a particle pair, as seen from particle 2.
#[derive(Debug, Clone, Copy)]
pub struct PairData {
    pub rij: Vector,
    pub vij: Vector,
    pub rvdot: f64,
    pub r2: f64,
    pub v2: f64,
}

impl PairData {
    pub fn new(rij: Vector, vij: Vector) -> Self {
        Self {
            rij,
            vij,
            rvdot: dot(&rij, &vij),
            r2: dot(&rij, &rij),
            v2: dot(&vij, &vij),
        }
    }
}

#[inline]
fn finite_time(dt: f64) -> Option<f64> {
    if dt.is_finite() {
        Some(dt.max(0.0))
    } else {
        None
    }
}

/// Time until two spheres approaching each other reach separation `sqrt(d2)`.
///
/// Uses `(d2 - r2) / (rvdot - sqrt(arg))`, which avoids the cancellation of
/// the textbook form when `rvdot < 0`. A pair that is already overlapping
/// and still approaching gets `dt = 0`.
pub fn sphere_sphere_in_root(dat: &PairData, d2: f64) -> Option<f64> {
    if dat.rvdot >= 0.0 {
        return None;
    }
    let arg = dat.rvdot * dat.rvdot - dat.v2 * (dat.r2 - d2);
    if arg <= 0.0 {
        return None;
    }
    finite_time((d2 - dat.r2) / (dat.rvdot - arg.sqrt()))
}

/// Time until a pair inside a sphere of diameter `sqrt(d2)` leaves it.
pub fn sphere_sphere_out_root(dat: &PairData, d2: f64) -> Option<f64> {
    let dt = ((dat.rvdot * dat.rvdot - dat.v2 * (dat.r2 - d2)).sqrt() - dat.rvdot) / dat.v2;
    if dt.is_nan() {
        // Not separating.
        return None;
    }
    finite_time(dt)
}

/// True when the pair is closer than `sqrt(d2)`.
#[inline]
pub fn sphere_overlap(dat: &PairData, d2: f64) -> bool {
    (dat.r2 - d2) < 0.0
}

/// Approach root for a contact distance that grows linearly in time,
/// `d(t) = d + dd * t`. With `dd == 0` this is [`sphere_sphere_in_root`].
pub fn growing_sphere_in_root(dat: &PairData, d: f64, dd: f64) -> Option<f64> {
    // a t^2 + 2 b t + c = 0
    let a = dat.v2 - dd * dd;
    let b = dat.rvdot - d * dd;
    let c = dat.r2 - d * d;
    if b >= 0.0 {
        return None;
    }
    let disc = b * b - a * c;
    if disc <= 0.0 {
        return None;
    }
    finite_time(c / (disc.sqrt() - b))
}

/// Separation root for a linearly growing contact distance.
pub fn growing_sphere_out_root(dat: &PairData, d: f64, dd: f64) -> Option<f64> {
    let a = dat.v2 - dd * dd;
    let b = dat.rvdot - d * dd;
    let c = dat.r2 - d * d;
    let disc = b * b - a * c;
    if disc < 0.0 || (a <= 0.0 && b <= 0.0) {
        return None;
    }
    let s = disc.sqrt();
    let dt = if b >= 0.0 { c / (-b - s) } else { (s - b) / a };
    if dt.is_nan() {
        return None;
    }
    finite_time(dt)
}

/// Entry root of a cube-cube collision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubeRoot {
    pub dt: f64,
    /// Axis (in the rotated frame) along which the faces meet.
    pub axis: usize,
}

/// Swept slab test for two parallel cubes of side `d`, after rotating the
/// relative state into the cubes' frame.
pub fn cube_cube_in_root(dat: &PairData, d: f64, rot: &Matrix) -> Option<CubeRoot> {
    let rij = mat_mul(rot, &dat.rij);
    let vij = mat_mul(rot, &dat.vij);

    // The largest separation must be shrinking.
    let mut largest = 0;
    for k in 1..DIM {
        if rij[k].abs() > rij[largest].abs() {
            largest = k;
        }
    }
    if rij[largest] * vij[largest] >= 0.0 {
        return None;
    }

    let mut tin_max = f64::NEG_INFINITY;
    let mut tout_min = f64::INFINITY;
    let mut axis = 0;
    for k in 0..DIM {
        let t1 = (d - rij[k]) / vij[k];
        let t2 = (-d - rij[k]) / vij[k];
        if t1.is_nan() || t2.is_nan() {
            return None;
        }
        let (tin, tout) = if t1 < t2 { (t1, t2) } else { (t2, t1) };
        if tin > tin_max {
            tin_max = tin;
            axis = k;
        }
        if tout < tout_min {
            tout_min = tout;
        }
    }
    if tin_max >= tout_min {
        return None;
    }
    finite_time(tin_max).map(|dt| CubeRoot { dt, axis })
}

/// Time for a point at signed distance `dist` from a plane (positive on the
/// side `nhat` points to), moving with normal speed `vn`, to reach it. Only
/// approach (`vn < 0`) counts; a point already past the plane fires at once.
pub fn wall_root(dist: f64, vn: f64) -> Option<f64> {
    if !(vn < 0.0) {
        return None;
    }
    finite_time(-dist / vn)
}

/// Time for a point inside an infinite cylinder of radius `radius` (axis
/// through the origin along unit `axis`) to reach the cylinder surface.
pub fn cylinder_root(rel: &Vector, v: &Vector, axis: &Vector, radius: f64) -> Option<f64> {
    let ra = dot(rel, axis);
    let va = dot(v, axis);
    let mut rp = *rel;
    let mut vp = *v;
    for k in 0..DIM {
        rp[k] -= ra * axis[k];
        vp[k] -= va * axis[k];
    }
    let dat = PairData::new(rp, vp);
    sphere_sphere_out_root(&dat, radius * radius)
}

/// Time for a point at `rpos` along one axis (measured from the cell's
/// lower face) moving at `v` to reach the face of a cell of extent `width`
/// it is heading for. `+inf` for `v == 0`.
#[inline]
pub fn cell_face_time(rpos: f64, v: f64, width: f64) -> f64 {
    if v < 0.0 {
        -rpos / v
    } else if v > 0.0 {
        (width - rpos) / v
    } else {
        f64::INFINITY
    }
}

/// Tolerances of the oscillating-plate search.
///
/// These are tuning parameters rather than physical constants.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PlateRootParams {
    /// Distance below which the particle is considered touching.
    pub tolerance: f64,
    /// Iteration cap for the bracketing scan plus the refinement.
    pub max_iterations: usize,
    /// Fraction (<= 1) of the curvature-derived safe interval skipped after
    /// the particle has just hit the plate.
    pub repeat_nudge: f64,
    /// Relative normal speed below which a plate collision is made elastic.
    pub elastic_snap_speed: f64,
}

impl Default for PlateRootParams {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iterations: 100_000,
            repeat_nudge: 1.0,
            elastic_snap_speed: 1e-6,
        }
    }
}

/// An oscillating plate: the mid-plane sits at
/// `nhat·(x - origin) = delta * cos(omega * (t + phase))` and contact occurs
/// at distance `sigma` from it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlateGeometry {
    pub origin: Vector,
    pub nhat: Vector,
    pub delta: f64,
    pub omega: f64,
    pub phase: f64,
    pub sigma: f64,
}

impl PlateGeometry {
    /// Plate mid-plane offset at absolute time `t`.
    #[inline]
    pub fn offset(&self, t: f64) -> f64 {
        self.delta * (self.omega * (t + self.phase)).cos()
    }

    /// Plate normal speed at absolute time `t`.
    #[inline]
    pub fn speed(&self, t: f64) -> f64 {
        -self.delta * self.omega * (self.omega * (t + self.phase)).sin()
    }
}

/// Result of an oscillating-plate search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlateRoot {
    pub dt: f64,
    /// +1 when the particle is on the `+nhat` side of the plate.
    pub side: f64,
    /// The starting configuration had drifted inside the contact shell.
    pub clamped: bool,
}

/// Earliest contact between a point particle at `r` (exact at absolute time
/// `t`) moving with `v` and an oscillating plate.
///
/// `just_hit` must be set when this particle's last event was a collision
/// with this plate, so the root it is sitting on is skipped.
pub fn oscillating_plate_root(
    r: &Vector,
    v: &Vector,
    t: f64,
    plate: &PlateGeometry,
    just_hit: bool,
    params: &PlateRootParams,
) -> Option<PlateRoot> {
    let mut rel = *r;
    for k in 0..DIM {
        rel[k] -= plate.origin[k];
    }
    let x0 = dot(&rel, &plate.nhat);
    let vn = dot(v, &plate.nhat);
    let f0 = x0 - plate.offset(t);
    let side = if f0 >= 0.0 { 1.0 } else { -1.0 };

    // Gap to contact, and its derivative.
    let g = |tau: f64| side * (x0 + vn * tau - plate.offset(t + tau)) - plate.sigma;
    let dg = |tau: f64| side * (vn - plate.speed(t + tau));

    let vmax = vn.abs() + (plate.delta * plate.omega).abs();
    let amax = (plate.delta * plate.omega * plate.omega).abs();
    if !(vmax > 0.0) {
        return None;
    }

    let g0 = g(0.0);
    let dg0 = dg(0.0);
    let clamped = g0 < 0.0;
    if clamped && dg0 < 0.0 {
        // Drifted into the shell while still closing: collide immediately.
        return Some(PlateRoot {
            dt: 0.0,
            side,
            clamped,
        });
    }

    let mut lo = 0.0_f64;
    if just_hit || clamped || g0 <= params.tolerance {
        // Treat as touching and skip the current root using the curvature
        // bound g(tau) >= g'(0) tau - amax tau^2 / 2.
        let nudge = if dg0 > 0.0 && amax > 0.0 {
            params.repeat_nudge * 2.0 * dg0 / amax
        } else if dg0 > 0.0 {
            return None;
        } else {
            params.tolerance / vmax
        };
        lo = nudge.max(params.tolerance / vmax);
    }

    // Band of particle positions (in the side frame) where contact is possible.
    let y0 = side * x0;
    let yv = side * vn;
    let band_hi = plate.sigma + plate.delta.abs();
    let band_lo = plate.sigma - plate.delta.abs();
    if y0 > band_hi {
        if yv >= 0.0 {
            return None;
        }
        lo = lo.max((y0 - band_hi) / -yv);
    }
    let hi = if yv < 0.0 {
        (y0 - band_lo) / -yv
    } else if yv > 0.0 {
        (band_hi - y0) / yv
    } else if plate.omega != 0.0 {
        lo + 2.0 * std::f64::consts::PI / plate.omega.abs()
    } else {
        return None;
    };
    if !(hi >= lo) || !hi.is_finite() {
        return None;
    }

    let dt = bracketed_first_root(&g, &dg, lo, hi, vmax, params)?;
    Some(PlateRoot { dt, side, clamped })
}

/// First zero of `g` in `[lo, hi]`, assuming `|g'| <= vmax`.
///
/// Conservative advancement (`tau += g / vmax`) cannot step over the first
/// root. When the step gets short it switches to a Newton/bisection hybrid
/// on the bracket found by a look-ahead step.
fn bracketed_first_root<G, D>(
    g: &G,
    dg: &D,
    lo: f64,
    hi: f64,
    vmax: f64,
    params: &PlateRootParams,
) -> Option<f64>
where
    G: Fn(f64) -> f64,
    D: Fn(f64) -> f64,
{
    let tol = params.tolerance;
    let min_step = tol / vmax;
    let mut tau = lo;
    let mut iterations = 0usize;

    while tau <= hi {
        iterations += 1;
        if iterations > params.max_iterations {
            return None;
        }
        let gt = g(tau);
        if gt.is_nan() {
            return None;
        }
        if gt.abs() <= tol {
            return Some(tau);
        }
        if gt < 0.0 {
            // Only reachable at `lo` when the nudge overshot; take it as contact.
            return Some(tau);
        }
        let step = gt / vmax;
        if step > 1e3 * min_step {
            tau += step;
            continue;
        }
        // Close to the surface: look ahead for a sign change.
        let ahead = (tau + 1e3 * min_step).min(hi);
        if g(ahead) <= 0.0 {
            return refine(g, dg, tau, ahead, tol, params.max_iterations);
        }
        tau += step.max(min_step);
    }
    None
}

/// Newton iteration safeguarded by bisection on `[a, b]` with `g(a) > 0 >= g(b)`.
fn refine<G, D>(g: &G, dg: &D, mut a: f64, mut b: f64, tol: f64, max_iter: usize) -> Option<f64>
where
    G: Fn(f64) -> f64,
    D: Fn(f64) -> f64,
{
    let mut x = 0.5 * (a + b);
    for _ in 0..max_iter {
        let gx = g(x);
        if gx.is_nan() {
            return None;
        }
        if gx.abs() <= tol || (b - a) <= tol {
            return Some(x);
        }
        if gx > 0.0 {
            a = x;
        } else {
            b = x;
        }
        let slope = dg(x);
        let newton = x - gx / slope;
        x = if slope != 0.0 && newton > a && newton < b {
            newton
        } else {
            0.5 * (a + b)
        };
    }
    Some(a)
}
