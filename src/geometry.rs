//! Small fixed-size vector and matrix math
//!
//! Calibration and the boot-frame transform only ever need 3-vectors and
//! row-major 3×3 rotation matrices, so this module carries exactly that and
//! nothing more. Everything is `Copy` and allocation-free.

use serde::{Deserialize, Serialize};

/// A 3-component vector. Units depend on context (g, deg/s, unitless).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Dot product.
    pub fn dot(&self, other: &Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Cross product: self × other.
    pub fn cross(&self, other: &Vec3) -> Vec3 {
        Vec3 {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    /// Euclidean length.
    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Unit-length copy, or `None` when the vector is (numerically) zero.
    pub fn normalized(&self) -> Option<Vec3> {
        let n = self.norm();
        if n > 1e-12 {
            Some(self.scaled(1.0 / n))
        } else {
            None
        }
    }

    pub fn scaled(&self, k: f64) -> Vec3 {
        Vec3 {
            x: self.x * k,
            y: self.y * k,
            z: self.z * k,
        }
    }

    pub fn sub(&self, other: &Vec3) -> Vec3 {
        Vec3 {
            x: self.x - other.x,
            y: self.y - other.y,
            z: self.z - other.z,
        }
    }

    /// Component of `self` orthogonal to the unit vector `axis`.
    pub fn rejected_from(&self, axis: &Vec3) -> Vec3 {
        self.sub(&axis.scaled(self.dot(axis)))
    }

    /// Angle between two vectors in degrees. Zero-length inputs yield 0.
    pub fn angle_to_degrees(&self, other: &Vec3) -> f64 {
        match (self.normalized(), other.normalized()) {
            (Some(a), Some(b)) => a.dot(&b).clamp(-1.0, 1.0).acos().to_degrees(),
            _ => 0.0,
        }
    }
}

/// A row-major 3×3 matrix. Rows are the boot-frame basis vectors expressed
/// in the sensor frame, so `m.mul_vec(v)` maps sensor coordinates into the
/// boot frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mat3 {
    pub rows: [Vec3; 3],
}

impl Mat3 {
    pub const IDENTITY: Mat3 = Mat3 {
        rows: [
            Vec3 {
                x: 1.0,
                y: 0.0,
                z: 0.0,
            },
            Vec3 {
                x: 0.0,
                y: 1.0,
                z: 0.0,
            },
            Vec3 {
                x: 0.0,
                y: 0.0,
                z: 1.0,
            },
        ],
    };

    pub fn from_rows(x: Vec3, y: Vec3, z: Vec3) -> Self {
        Self { rows: [x, y, z] }
    }

    /// Matrix-vector product.
    pub fn mul_vec(&self, v: &Vec3) -> Vec3 {
        Vec3 {
            x: self.rows[0].dot(v),
            y: self.rows[1].dot(v),
            z: self.rows[2].dot(v),
        }
    }

    /// Rows mutually orthogonal and unit length within `tol`.
    pub fn is_orthonormal(&self, tol: f64) -> bool {
        for i in 0..3 {
            if (self.rows[i].norm() - 1.0).abs() > tol {
                return false;
            }
            for j in (i + 1)..3 {
                if self.rows[i].dot(&self.rows[j]).abs() > tol {
                    return false;
                }
            }
        }
        true
    }

    /// Maximum absolute elementwise difference from another matrix.
    pub fn max_abs_diff(&self, other: &Mat3) -> f64 {
        let mut worst: f64 = 0.0;
        for i in 0..3 {
            let d = self.rows[i].sub(&other.rows[i]);
            worst = worst.max(d.x.abs()).max(d.y.abs()).max(d.z.abs());
        }
        worst
    }
}
