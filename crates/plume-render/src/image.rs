//! Rendered images and image-space gradients.
//!
//! Both types are row-major with pixel `(0, 0)` at the top left. Radiance
//! is interleaved RGB.

use plume_gpu::{ComputeBuffer, DeviceBackend};
use plume_types::{PlumeError, PlumeResult};

use crate::camera::Camera;
use crate::config::Tonemap;

/// Output of a forward render: RGB radiance plus transmittance.
#[derive(Debug)]
pub struct RenderedImage {
    width: usize,
    height: usize,
    radiance: ComputeBuffer,
    transmittance: ComputeBuffer,
}

impl RenderedImage {
    /// Device-allocated image of zero radiance and zero transmittance.
    pub fn zeros(device: &dyn DeviceBackend, width: usize, height: usize) -> PlumeResult<Self> {
        Ok(Self {
            width,
            height,
            radiance: device.allocate(3 * width * height)?,
            transmittance: device.allocate(width * height)?,
        })
    }

    /// Untracked image from host channels.
    pub fn from_host(
        width: usize,
        height: usize,
        radiance: Vec<f32>,
        transmittance: Vec<f32>,
    ) -> PlumeResult<Self> {
        let pixels = width * height;
        if radiance.len() != 3 * pixels || transmittance.len() != pixels {
            return Err(PlumeError::ShapeMismatch(format!(
                "{width}x{height} image needs {} radiance and {pixels} transmittance values, got {} and {}",
                3 * pixels,
                radiance.len(),
                transmittance.len()
            )));
        }
        Ok(Self {
            width,
            height,
            radiance: ComputeBuffer::from_data(radiance),
            transmittance: ComputeBuffer::from_data(transmittance),
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Interleaved RGB radiance.
    pub fn radiance(&self) -> &[f32] {
        self.radiance.as_slice()
    }

    pub fn transmittance(&self) -> &[f32] {
        self.transmittance.as_slice()
    }

    pub(crate) fn channels_mut(&mut self) -> (&mut [f32], &mut [f32]) {
        (
            self.radiance.as_mut_slice(),
            self.transmittance.as_mut_slice(),
        )
    }

    /// RGB radiance of pixel `(x, y)`.
    pub fn pixel(&self, x: usize, y: usize) -> [f32; 3] {
        let n = 3 * (y * self.width + x);
        let r = self.radiance.as_slice();
        [r[n], r[n + 1], r[n + 2]]
    }

    /// Opacity `1 - T` of pixel `(x, y)`.
    pub fn alpha(&self, x: usize, y: usize) -> f32 {
        1.0 - self.transmittance.as_slice()[y * self.width + x]
    }

    pub fn alpha_channel(&self) -> Vec<f32> {
        self.transmittance
            .as_slice()
            .iter()
            .map(|t| 1.0 - t)
            .collect()
    }

    /// Display copy of the radiance.
    pub fn tonemapped(&self, mode: Tonemap) -> Vec<f32> {
        mode.apply(self.radiance.as_slice())
    }

    pub fn count_non_finite(&self) -> usize {
        self.radiance.count_non_finite() + self.transmittance.count_non_finite()
    }

    /// Host copy that does not count against any device budget.
    pub fn to_host(&self) -> RenderedImage {
        Self {
            width: self.width,
            height: self.height,
            radiance: ComputeBuffer::from_data(self.radiance.to_vec()),
            transmittance: ComputeBuffer::from_data(self.transmittance.to_vec()),
        }
    }
}

/// Gradient of a loss with respect to a [`RenderedImage`].
///
/// `radiance` matches the RGB layout; `alpha` is per pixel and refers to
/// `1 - transmittance`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageGradient {
    width: usize,
    height: usize,
    radiance: Vec<f32>,
    alpha: Vec<f32>,
}

impl ImageGradient {
    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            radiance: vec![0.0; 3 * width * height],
            alpha: vec![0.0; width * height],
        }
    }

    /// Builds a gradient from host channels, checking both lengths.
    pub fn new(
        width: usize,
        height: usize,
        radiance: Vec<f32>,
        alpha: Vec<f32>,
    ) -> PlumeResult<Self> {
        let pixels = width * height;
        if radiance.len() != 3 * pixels || alpha.len() != pixels {
            return Err(PlumeError::ShapeMismatch(format!(
                "{width}x{height} image gradient needs {} radiance and {pixels} alpha values, got {} and {}",
                3 * pixels,
                radiance.len(),
                alpha.len()
            )));
        }
        Ok(Self {
            width,
            height,
            radiance,
            alpha,
        })
    }

    /// Gradient on radiance only.
    pub fn from_radiance(width: usize, height: usize, radiance: Vec<f32>) -> PlumeResult<Self> {
        Self::new(width, height, radiance, vec![0.0; width * height])
    }

    /// Gradient on alpha only.
    pub fn from_alpha(width: usize, height: usize, alpha: Vec<f32>) -> PlumeResult<Self> {
        Self::new(width, height, vec![0.0; 3 * width * height], alpha)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn radiance(&self) -> &[f32] {
        &self.radiance
    }

    pub fn alpha(&self) -> &[f32] {
        &self.alpha
    }

    pub fn set_radiance(&mut self, x: usize, y: usize, value: [f32; 3]) {
        let n = 3 * (y * self.width + x);
        self.radiance[n..n + 3].copy_from_slice(&value);
    }

    pub fn set_alpha(&mut self, x: usize, y: usize, value: f32) {
        self.alpha[y * self.width + x] = value;
    }

    /// Fails with `ShapeMismatch` unless the gradient matches `camera`'s resolution.
    pub fn ensure_matches(&self, camera: &Camera) -> PlumeResult<()> {
        if [self.width, self.height] == camera.resolution {
            Ok(())
        } else {
            Err(PlumeError::ShapeMismatch(format!(
                "image gradient is {}x{}, camera renders {}x{}",
                self.width, self.height, camera.resolution[0], camera.resolution[1]
            )))
        }
    }

    pub fn count_non_finite(&self) -> usize {
        self.radiance
            .iter()
            .chain(&self.alpha)
            .filter(|v| !v.is_finite())
            .count()
    }
}
