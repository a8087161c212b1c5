//! Renderer configuration.
//!
//! Optical parameters, ray-march sampling, and the compositing mode.

use serde::{Deserialize, Serialize};

use plume_grid::GridShape;
use plume_types::constants::{DEFAULT_ABSORPTION, DEFAULT_STEP_SCALE, TRANSMITTANCE_EPSILON};
use plume_types::{PlumeError, PlumeResult};

/// Rec. 709 luma weights.
pub const REC709_LUMA: [f32; 3] = [0.2126, 0.7152, 0.0722];

/// How samples along a ray are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    /// Emission-absorption with self-attenuation.
    #[default]
    BeerLambert,
    /// Emission summed without attenuation. Transmittance still reports
    /// `exp(-σ·∫ρ)`.
    Additive,
    /// Brightest emitted sample per channel. The ray is treated as a
    /// homogeneous medium of the densest sample for transmittance.
    Max,
    /// Dimmest emitted sample per channel, thinnest sample for transmittance.
    Min,
    /// Unweighted mean over the samples.
    Mean,
}

impl BlendMode {
    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::BeerLambert => "beer_lambert",
            BlendMode::Additive => "additive",
            BlendMode::Max => "max",
            BlendMode::Min => "min",
            BlendMode::Mean => "mean",
        }
    }

    /// Every mode, compositing ones first.
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::BeerLambert,
            BlendMode::Additive,
            BlendMode::Max,
            BlendMode::Min,
            BlendMode::Mean,
        ]
    }

    /// True for the modes that reduce samples instead of compositing them.
    pub fn is_reduction(&self) -> bool {
        matches!(self, BlendMode::Max | BlendMode::Min | BlendMode::Mean)
    }
}

/// Post-processing applied to radiance for display.
///
/// Not part of the differentiable path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tonemap {
    #[default]
    None,
    /// `max(x, 0)`.
    ClipNegative,
    /// `clamp(x, 0, 1)`.
    Saturate,
    /// Shift negative images so their minimum is 0, then scale so the
    /// brightest value is 1.
    Normalize,
}

impl Tonemap {
    /// Applies the mapping to interleaved radiance values.
    pub fn apply(&self, radiance: &[f32]) -> Vec<f32> {
        match self {
            Tonemap::None => radiance.to_vec(),
            Tonemap::ClipNegative => radiance.iter().map(|&x| x.max(0.0)).collect(),
            Tonemap::Saturate => radiance.iter().map(|&x| x.clamp(0.0, 1.0)).collect(),
            Tonemap::Normalize => {
                let finite = || radiance.iter().copied().filter(|x| x.is_finite());
                let shift = finite().fold(0.0_f32, f32::min);
                let peak = finite().map(|x| x - shift).fold(0.0_f32, f32::max);
                if peak > 0.0 {
                    radiance.iter().map(|&x| (x - shift) / peak).collect()
                } else {
                    radiance.iter().map(|&x| x - shift).collect()
                }
            }
        }
    }
}

/// Configuration for the ray marcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Absorption coefficient σ per world unit per unit density.
    pub absorption: f32,

    /// Fixed world-space step length. When unset the step is
    /// `voxel_size * step_scale`.
    pub step_length: Option<f32>,

    /// Step length as a fraction of the voxel size.
    pub step_scale: f32,

    /// Rays stop this far past the eye (world units).
    pub max_distance: Option<f32>,

    /// Transmittance below which marching stops.
    pub transmittance_epsilon: f32,

    pub blend: BlendMode,

    /// Fraction of incoming light scattered toward the camera.
    pub scattering_ratio: f32,

    /// RGB light color, used where no light grid is attached.
    pub light_color: [f32; 3],

    /// Render grey images: incoming light is reduced to one channel with
    /// `luma` and broadcast back to RGB.
    pub monochrome: bool,

    /// Channel weights of the grey conversion.
    pub luma: [f32; 3],

    /// RGB radiance behind the volume, composited through transmittance.
    pub background: [f32; 3],
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            absorption: DEFAULT_ABSORPTION,
            step_length: None,
            step_scale: DEFAULT_STEP_SCALE,
            max_distance: None,
            transmittance_epsilon: TRANSMITTANCE_EPSILON,
            blend: BlendMode::BeerLambert,
            scattering_ratio: 1.0,
            light_color: [1.0, 1.0, 1.0],
            monochrome: false,
            luma: REC709_LUMA,
            background: [0.0, 0.0, 0.0],
        }
    }
}

impl RenderConfig {
    /// Coarse sampling for quick iterations.
    pub fn debug() -> Self {
        Self {
            step_scale: 1.0,
            ..Default::default()
        }
    }

    /// Fine sampling and a tighter cutoff.
    pub fn high_quality() -> Self {
        Self {
            step_scale: 0.25,
            transmittance_epsilon: 1e-8,
            ..Default::default()
        }
    }

    /// World-space step length on `shape`.
    pub fn step_for(&self, shape: &GridShape) -> f32 {
        self.step_length
            .unwrap_or(shape.voxel_size * self.step_scale)
    }

    /// Radiance scattered toward the camera per unit density under incoming
    /// light `light_in`.
    #[inline]
    pub fn scatter(&self, light_in: [f32; 3]) -> [f32; 3] {
        let light = if self.monochrome {
            let grey: f32 = light_in.iter().zip(&self.luma).map(|(l, w)| l * w).sum();
            [grey; 3]
        } else {
            light_in
        };
        light.map(|c| c * self.scattering_ratio)
    }

    pub fn validate(&self) -> PlumeResult<()> {
        if !(self.absorption.is_finite() && self.absorption >= 0.0) {
            return Err(PlumeError::InvalidConfig(format!(
                "absorption must be finite and non-negative, got {}",
                self.absorption
            )));
        }
        if !(self.step_scale.is_finite() && self.step_scale > 0.0) {
            return Err(PlumeError::InvalidConfig(format!(
                "step_scale must be positive, got {}",
                self.step_scale
            )));
        }
        if let Some(step) = self.step_length {
            if !(step.is_finite() && step > 0.0) {
                return Err(PlumeError::InvalidConfig(format!(
                    "step_length must be positive, got {step}"
                )));
            }
        }
        if let Some(d) = self.max_distance {
            if d.is_nan() || d <= 0.0 {
                return Err(PlumeError::InvalidConfig(format!(
                    "max_distance must be positive, got {d}"
                )));
            }
        }
        if !(0.0..1.0).contains(&self.transmittance_epsilon) {
            return Err(PlumeError::InvalidConfig(format!(
                "transmittance_epsilon must be in [0, 1), got {}",
                self.transmittance_epsilon
            )));
        }
        let colors = self
            .light_color
            .iter()
            .chain(&self.background)
            .chain(&self.luma)
            .chain(std::iter::once(&self.scattering_ratio));
        for &c in colors {
            if !c.is_finite() {
                return Err(PlumeError::InvalidConfig(
                    "light, background, luma and scattering ratio must be finite".into(),
                ));
            }
        }
        Ok(())
    }
}
