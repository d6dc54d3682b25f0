//! Rigid-body poses in the world frame.
//!
//! A [`Pose`] is a translation plus a unit [`Quaternion`] (w, x, y, z
//! convention).  Sensor-relative detections become world poses by composing
//! them onto the sensor pose:
//!
//! ```rust
//! use kitcell_perception::pose::{Pose, Quaternion, Vec3};
//!
//! let sensor = Pose::new(Vec3::new(-2.3, 3.0, 1.8), Quaternion::identity());
//! let detection = Pose::new(Vec3::new(0.1, 0.0, -0.9), Quaternion::identity());
//! let world = sensor.compose(&detection);
//! assert!((world.position.z - 0.9).abs() < 1e-9);
//! ```

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Vec3
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn scale(self, k: f64) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Quaternion
// ────────────────────────────────────────────────────────────────────────────

/// Unit quaternion. Callers constructing one by hand must keep |q| = 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

impl Quaternion {
    pub const fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    pub const fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Fixed-axis roll, pitch, yaw (applied X then Y then Z).
    pub fn from_rpy(roll: f64, pitch: f64, yaw: f64) -> Self {
        let (sr, cr) = (roll * 0.5).sin_cos();
        let (sp, cp) = (pitch * 0.5).sin_cos();
        let (sy, cy) = (yaw * 0.5).sin_cos();
        Self::new(
            cr * cp * cy + sr * sp * sy,
            sr * cp * cy - cr * sp * sy,
            cr * sp * cy + sr * cp * sy,
            cr * cp * sy - sr * sp * cy,
        )
    }

    pub fn from_yaw(yaw: f64) -> Self {
        Self::from_rpy(0.0, 0.0, yaw)
    }

    /// Rotation about world Z extracted from this quaternion.
    pub fn yaw(self) -> f64 {
        let siny = 2.0 * (self.w * self.z + self.x * self.y);
        let cosy = 1.0 - 2.0 * (self.y * self.y + self.z * self.z);
        siny.atan2(cosy)
    }

    /// Hamilton product.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let r = self.mul(p).mul(self.conjugate());
        Vec3::new(r.x, r.y, r.z)
    }
}

/// End-effector orientation for a top-down grasp: tool Z points at the floor
/// and `rotation` spins the tool about world Z.
pub fn tool_orientation(rotation: f64) -> Quaternion {
    Quaternion::from_rpy(0.0, PI, rotation)
}

// ────────────────────────────────────────────────────────────────────────────
// Pose
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    #[serde(default)]
    pub orientation: Quaternion,
}

impl Pose {
    pub const fn new(position: Vec3, orientation: Quaternion) -> Self {
        Self {
            position,
            orientation,
        }
    }

    pub const fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }

    pub fn from_xyz_yaw(x: f64, y: f64, z: f64, yaw: f64) -> Self {
        Self::new(Vec3::new(x, y, z), Quaternion::from_yaw(yaw))
    }

    /// `self` = T_A_B, `other` = T_B_C, result = T_A_C.
    pub fn compose(&self, other: &Pose) -> Pose {
        let position = self
            .position
            .add(self.orientation.rotate(other.position));
        Pose::new(position, self.orientation.mul(other.orientation))
    }

    pub fn inverse(&self) -> Pose {
        let inv = self.orientation.conjugate();
        Pose::new(inv.rotate(self.position.scale(-1.0)), inv)
    }

    pub fn yaw(&self) -> f64 {
        self.orientation.yaw()
    }

    /// Same orientation, position shifted by `offset`.
    pub fn translated(&self, offset: Vec3) -> Pose {
        Pose::new(self.position.add(offset), self.orientation)
    }
}
