use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tolerance for coordinate comparisons when validating field geometry.
pub const GEOMETRY_EPSILON: f64 = 1e-9;

const PIVOT_EPSILON: f64 = 1e-12;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("point correspondences are degenerate (collinear or repeated points)")]
    Degenerate,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(self, other: Point2) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Planar projective transform built from four exact point correspondences.
///
/// The source quad is always an axis-aligned rectangle in this codebase, so
/// the four correspondences determine the matrix exactly and a direct linear
/// solve suffices (no least-squares refinement).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    m: [[f64; 3]; 3],
}

impl Homography {
    /// Solves for the homography mapping `src[i]` onto `dst[i]`.
    ///
    /// With h33 fixed to 1 the eight remaining coefficients satisfy one
    /// linear system of eight equations, two per correspondence.
    pub fn from_quad_to_quad(src: &[Point2; 4], dst: &[Point2; 4]) -> Result<Self, GeometryError> {
        let mut a = [[0.0f64; 9]; 8];
        for (i, (s, d)) in src.iter().zip(dst.iter()).enumerate() {
            let rx = 2 * i;
            let ry = rx + 1;
            a[rx] = [s.x, s.y, 1.0, 0.0, 0.0, 0.0, -s.x * d.x, -s.y * d.x, d.x];
            a[ry] = [0.0, 0.0, 0.0, s.x, s.y, 1.0, -s.x * d.y, -s.y * d.y, d.y];
        }

        let h = solve_8x8(&mut a)?;
        Ok(Self {
            m: [
                [h[0], h[1], h[2]],
                [h[3], h[4], h[5]],
                [h[6], h[7], 1.0],
            ],
        })
    }

    /// Applies the transform with perspective divide.
    pub fn apply(&self, p: Point2) -> Result<Point2, GeometryError> {
        let w = self.m[2][0] * p.x + self.m[2][1] * p.y + self.m[2][2];
        if w.abs() < PIVOT_EPSILON {
            return Err(GeometryError::Degenerate);
        }
        let x = self.m[0][0] * p.x + self.m[0][1] * p.y + self.m[0][2];
        let y = self.m[1][0] * p.x + self.m[1][1] * p.y + self.m[1][2];
        Ok(Point2::new(x / w, y / w))
    }
}

/// Gaussian elimination with partial pivoting over the augmented system.
fn solve_8x8(a: &mut [[f64; 9]; 8]) -> Result<[f64; 8], GeometryError> {
    for col in 0..8 {
        let mut pivot_row = col;
        for row in (col + 1)..8 {
            if a[row][col].abs() > a[pivot_row][col].abs() {
                pivot_row = row;
            }
        }
        if a[pivot_row][col].abs() < PIVOT_EPSILON {
            return Err(GeometryError::Degenerate);
        }
        a.swap(col, pivot_row);

        let pivot = a[col][col];
        for entry in a[col].iter_mut() {
            *entry /= pivot;
        }
        for row in 0..8 {
            if row == col {
                continue;
            }
            let factor = a[row][col];
            if factor == 0.0 {
                continue;
            }
            for k in 0..9 {
                a[row][k] -= factor * a[col][k];
            }
        }
    }

    let mut h = [0.0f64; 8];
    for (i, value) in h.iter_mut().enumerate() {
        *value = a[i][8];
    }
    Ok(h)
}

/// True when the four points form an axis-aligned rectangle: exactly two
/// distinct X values, exactly two distinct Y values, and all four
/// combinations present. Vertex order does not matter here.
pub fn is_axis_aligned_rectangle(points: &[Point2; 4]) -> bool {
    let xs = distinct_values(points.map(|p| p.x));
    let ys = distinct_values(points.map(|p| p.y));
    if xs.len() != 2 || ys.len() != 2 {
        return false;
    }
    for &x in &xs {
        for &y in &ys {
            let corner_present = points
                .iter()
                .any(|p| (p.x - x).abs() < GEOMETRY_EPSILON && (p.y - y).abs() < GEOMETRY_EPSILON);
            if !corner_present {
                return false;
            }
        }
    }
    true
}

fn distinct_values(values: [f64; 4]) -> Vec<f64> {
    let mut distinct: Vec<f64> = Vec::with_capacity(2);
    for v in values {
        if !distinct.iter().any(|&d| (d - v).abs() < GEOMETRY_EPSILON) {
            distinct.push(v);
        }
    }
    distinct
}
