//! Per-voxel incoming light.
//!
//! A light grid stores the light arriving at each cell center of the
//! density grid, either as one grey channel or as three RGB channels. The
//! ray marcher samples it with the same stencil as the density, so a sample
//! emits `scattering_ratio * light_in` per unit density. Light is an input
//! constant and receives no gradient.

use plume_gpu::{ComputeBuffer, DeviceBackend};
use plume_grid::{GridShape, Stencil};
use plume_types::{PlumeError, PlumeResult};

#[derive(Debug)]
enum Channels {
    Grey(ComputeBuffer),
    Rgb([ComputeBuffer; 3]),
}

/// Incoming light on the cell centers of a grid.
#[derive(Debug)]
pub struct LightGrid {
    shape: GridShape,
    channels: Channels,
}

impl LightGrid {
    /// Uploads host data: `cell_count` grey values, or the red, green and
    /// blue arrays back to back.
    pub fn from_host(
        device: &dyn DeviceBackend,
        shape: GridShape,
        host: &[f32],
    ) -> PlumeResult<Self> {
        shape.validate()?;
        let n = shape.cell_count();
        if let Some((i, v)) = host
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite() || **v < 0.0)
        {
            return Err(PlumeError::InvalidField(format!(
                "light must be finite and non-negative, got {v} at element {i}"
            )));
        }
        let channels = if host.len() == n {
            Channels::Grey(device.upload(host)?)
        } else if host.len() == 3 * n {
            Channels::Rgb([
                device.upload(&host[..n])?,
                device.upload(&host[n..2 * n])?,
                device.upload(&host[2 * n..])?,
            ])
        } else {
            return Err(PlumeError::ShapeMismatch(format!(
                "light grid needs {n} or {} values, got {}",
                3 * n,
                host.len()
            )));
        };
        Ok(Self { shape, channels })
    }

    /// The same RGB light in every cell.
    pub fn uniform(
        device: &dyn DeviceBackend,
        shape: GridShape,
        rgb: [f32; 3],
    ) -> PlumeResult<Self> {
        let n = shape.cell_count();
        let host: Vec<f32> = rgb.iter().flat_map(|&c| vec![c; n]).collect();
        Self::from_host(device, shape, &host)
    }

    pub fn shape(&self) -> &GridShape {
        &self.shape
    }

    pub fn is_monochrome(&self) -> bool {
        matches!(self.channels, Channels::Grey(_))
    }

    /// Light at the position covered by `stencil`. Grey light is broadcast
    /// to all three channels.
    #[inline]
    pub fn sample(&self, stencil: &Stencil) -> [f32; 3] {
        match &self.channels {
            Channels::Grey(l) => [stencil.sample(l.as_slice()); 3],
            Channels::Rgb([r, g, b]) => [
                stencil.sample(r.as_slice()),
                stencil.sample(g.as_slice()),
                stencil.sample(b.as_slice()),
            ],
        }
    }
}
