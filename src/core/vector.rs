//! Small helpers over fixed-size `[f64; DIM]` vectors.

use crate::core::particle::DIM;

/// A `DIM`-component vector.
pub type Vector = [f64; DIM];

/// A `DIM x DIM` matrix, row major.
pub type Matrix = [[f64; DIM]; DIM];

pub const ZERO: Vector = [0.0; DIM];

#[inline]
pub fn dot(a: &Vector, b: &Vector) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[inline]
pub fn norm2(a: &Vector) -> f64 {
    dot(a, a)
}

#[inline]
pub fn sub(a: &Vector, b: &Vector) -> Vector {
    let mut out = ZERO;
    for ((o, &x), &y) in out.iter_mut().zip(a.iter()).zip(b.iter()) {
        *o = x - y;
    }
    out
}

#[inline]
pub fn add(a: &Vector, b: &Vector) -> Vector {
    let mut out = ZERO;
    for ((o, &x), &y) in out.iter_mut().zip(a.iter()).zip(b.iter()) {
        *o = x + y;
    }
    out
}

#[inline]
pub fn scale(a: &Vector, s: f64) -> Vector {
    let mut out = *a;
    out.iter_mut().for_each(|x| *x *= s);
    out
}

/// `a += b * s`
#[inline]
pub fn add_scaled(a: &mut Vector, b: &Vector, s: f64) {
    for (x, &y) in a.iter_mut().zip(b.iter()) {
        *x += y * s;
    }
}

#[inline]
pub fn is_finite(a: &Vector) -> bool {
    a.iter().all(|x| x.is_finite())
}

/// Returns `a / |a|`, or `None` for a (near) zero vector.
pub fn unit(a: &Vector) -> Option<Vector> {
    let n = norm2(a).sqrt();
    if !n.is_finite() || n <= f64::EPSILON {
        return None;
    }
    Some(scale(a, 1.0 / n))
}

pub fn identity() -> Matrix {
    let mut m = [[0.0; DIM]; DIM];
    for (k, row) in m.iter_mut().enumerate() {
        row[k] = 1.0;
    }
    m
}

/// `m * a`
pub fn mat_mul(m: &Matrix, a: &Vector) -> Vector {
    let mut out = ZERO;
    for (o, row) in out.iter_mut().zip(m.iter()) {
        *o = dot(row, a);
    }
    out
}

/// `mᵀ * a`
pub fn mat_mul_transpose(m: &Matrix, a: &Vector) -> Vector {
    let mut out = ZERO;
    for (row, &ak) in m.iter().zip(a.iter()) {
        add_scaled(&mut out, row, ak);
    }
    out
}
