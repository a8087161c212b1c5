//! Engine configuration.
//!
//! One struct gathers everything a device context needs: the sequence
//! grid, renderer and advection parameters, the frame time step, the
//! device memory budget and whether outputs are screened for NaN/Inf.

use serde::{Deserialize, Serialize};

use plume_advect::AdvectionConfig;
use plume_grid::GridShape;
use plume_render::RenderConfig;
use plume_types::constants::{DEFAULT_DT, DEFAULT_MEMORY_BUDGET};
use plume_types::{PlumeError, PlumeResult};

/// Configuration for a [`DeviceContext`](crate::DeviceContext).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Time step between consecutive frames.
    pub dt: f32,

    /// Device memory budget in bytes.
    pub memory_budget_bytes: usize,

    /// Screen kernel outputs for NaN/Inf.
    pub check_numerics: bool,

    /// Resolution and voxel size shared by every field.
    pub grid: GridShape,

    pub render: RenderConfig,

    pub advection: AdvectionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dt: DEFAULT_DT,
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET,
            check_numerics: true,
            grid: GridShape {
                nx: 32,
                ny: 32,
                nz: 32,
                voxel_size: 1.0 / 32.0,
            },
            render: RenderConfig::default(),
            advection: AdvectionConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Small grid and coarse sampling for quick iterations.
    pub fn debug() -> Self {
        Self {
            grid: GridShape {
                nx: 8,
                ny: 8,
                nz: 8,
                voxel_size: 1.0 / 8.0,
            },
            render: RenderConfig::debug(),
            ..Default::default()
        }
    }

    /// Fine grid, fine sampling and the midpoint back-trace.
    pub fn high_quality() -> Self {
        Self {
            grid: GridShape {
                nx: 64,
                ny: 64,
                nz: 64,
                voxel_size: 1.0 / 64.0,
            },
            render: RenderConfig::high_quality(),
            advection: AdvectionConfig::high_quality(),
            ..Default::default()
        }
    }

    /// Replaces the grid.
    pub fn with_grid(mut self, grid: GridShape) -> Self {
        self.grid = grid;
        self
    }

    /// Parses a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> PlumeResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| PlumeError::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> PlumeResult<String> {
        toml::to_string(self).map_err(|e| PlumeError::Serialization(e.to_string()))
    }

    /// Checks every section.
    pub fn validate(&self) -> PlumeResult<()> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(PlumeError::InvalidConfig(format!(
                "Time step dt must be positive and finite, got {}",
                self.dt
            )));
        }
        if self.memory_budget_bytes == 0 {
            return Err(PlumeError::InvalidConfig(
                "Memory budget must be non-zero".into(),
            ));
        }
        self.grid.validate()?;
        self.render.validate()?;
        self.advection.validate_dt(self.dt)
    }
}
