//! Pinhole and orthographic cameras.
//!
//! Pixel `(0, 0)` is the top-left corner of the image. Rays pass through
//! pixel centers. The camera looks from `eye` toward `target`; `up` only
//! needs to be non-parallel to the view direction.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use plume_types::{PlumeError, PlumeResult};

/// Projection model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    /// Rays diverge from `eye`. `sensor_size` is in the units of `focal_length`.
    #[default]
    Perspective,
    /// Rays are parallel to the view direction. `sensor_size` is in world units.
    Orthographic,
}

/// A world-space ray. `direction` is unit length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    /// Point at parameter `t`.
    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Slab intersection with the axis-aligned box `[min, max]`.
    ///
    /// Returns the parameter interval `(t_enter, t_exit)` clipped to
    /// `t >= 0`, or `None` when the ray misses the box or only touches it.
    pub fn intersect_box(&self, min: Vec3, max: Vec3) -> Option<(f32, f32)> {
        let mut t_enter = 0.0_f32;
        let mut t_exit = f32::INFINITY;
        for axis in 0..3 {
            let o = self.origin[axis];
            let d = self.direction[axis];
            if d.abs() < 1e-12 {
                if o < min[axis] || o > max[axis] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d;
            let (t0, t1) = {
                let a = (min[axis] - o) * inv;
                let b = (max[axis] - o) * inv;
                if a <= b {
                    (a, b)
                } else {
                    (b, a)
                }
            };
            t_enter = t_enter.max(t0);
            t_exit = t_exit.min(t1);
            if t_exit <= t_enter {
                return None;
            }
        }
        Some((t_enter, t_exit))
    }
}

/// Camera intrinsics and extrinsics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub projection: Projection,
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Distance from the pinhole to the sensor plane (perspective only).
    pub focal_length: f32,
    /// Sensor `(width, height)`.
    pub sensor_size: [f32; 2],
    /// Image `(width, height)` in pixels.
    pub resolution: [usize; 2],
}

impl Camera {
    /// Creates a perspective camera.
    pub fn perspective(
        eye: Vec3,
        target: Vec3,
        focal_length: f32,
        sensor_size: [f32; 2],
        resolution: [usize; 2],
    ) -> Self {
        Self {
            projection: Projection::Perspective,
            eye,
            target,
            up: Vec3::Y,
            focal_length,
            sensor_size,
            resolution,
        }
    }

    /// Creates an orthographic camera whose sensor covers `sensor_size`
    /// world units.
    pub fn orthographic(
        eye: Vec3,
        target: Vec3,
        sensor_size: [f32; 2],
        resolution: [usize; 2],
    ) -> Self {
        Self {
            projection: Projection::Orthographic,
            eye,
            target,
            up: Vec3::Y,
            focal_length: 1.0,
            sensor_size,
            resolution,
        }
    }

    /// Replaces the up vector.
    pub fn with_up(mut self, up: Vec3) -> Self {
        self.up = up;
        self
    }

    pub fn width(&self) -> usize {
        self.resolution[0]
    }

    pub fn height(&self) -> usize {
        self.resolution[1]
    }

    pub fn pixel_count(&self) -> usize {
        self.resolution[0] * self.resolution[1]
    }

    /// Checks that the camera produces a well-defined ray per pixel.
    pub fn validate(&self) -> PlumeResult<()> {
        if self.resolution[0] == 0 || self.resolution[1] == 0 {
            return Err(PlumeError::InvalidConfig(format!(
                "camera resolution must be non-zero, got {}x{}",
                self.resolution[0], self.resolution[1]
            )));
        }
        let finite = self.eye.is_finite()
            && self.target.is_finite()
            && self.up.is_finite()
            && self.focal_length.is_finite()
            && self.sensor_size.iter().all(|s| s.is_finite());
        if !finite {
            return Err(PlumeError::InvalidConfig(
                "camera parameters must be finite".into(),
            ));
        }
        if self.sensor_size.iter().any(|&s| s <= 0.0) {
            return Err(PlumeError::InvalidConfig(format!(
                "sensor size must be positive, got {:?}",
                self.sensor_size
            )));
        }
        if self.projection == Projection::Perspective && self.focal_length <= 0.0 {
            return Err(PlumeError::InvalidConfig(format!(
                "focal length must be positive, got {}",
                self.focal_length
            )));
        }
        let forward = self.target - self.eye;
        if forward.length_squared() == 0.0 {
            return Err(PlumeError::InvalidConfig(
                "camera eye and target coincide".into(),
            ));
        }
        if forward.normalize().cross(self.up).length_squared() < 1e-12 {
            return Err(PlumeError::InvalidConfig(
                "camera up vector is parallel to the view direction".into(),
            ));
        }
        Ok(())
    }

    /// Orthonormal `(right, up, forward)` basis. Assumes a valid camera.
    pub fn basis(&self) -> (Vec3, Vec3, Vec3) {
        let forward = (self.target - self.eye).normalize();
        let right = forward.cross(self.up).normalize();
        let up = right.cross(forward);
        (right, up, forward)
    }

    /// Ray through the center of pixel `(px, py)`.
    pub fn ray(&self, px: usize, py: usize) -> Ray {
        let (right, up, forward) = self.basis();
        self.ray_with_basis(px, py, right, up, forward)
    }

    /// [`ray`](Self::ray) with a precomputed basis.
    #[inline]
    pub fn ray_with_basis(&self, px: usize, py: usize, right: Vec3, up: Vec3, forward: Vec3) -> Ray {
        let [w, h] = self.resolution;
        let sx = ((px as f32 + 0.5) / w as f32 - 0.5) * self.sensor_size[0];
        let sy = (0.5 - (py as f32 + 0.5) / h as f32) * self.sensor_size[1];
        match self.projection {
            Projection::Perspective => Ray {
                origin: self.eye,
                direction: (forward * self.focal_length + right * sx + up * sy).normalize(),
            },
            Projection::Orthographic => Ray {
                origin: self.eye + right * sx + up * sy,
                direction: forward,
            },
        }
    }
}
