//! Engine event types.
//!
//! Events are lightweight value types tagged with the frame index they
//! belong to. Wall times are in seconds.

use serde::{Deserialize, Serialize};

/// Compute kernels launched by the device context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelKind {
    AdvectForward,
    AdvectBackward,
    RenderForward,
    RenderBackward,
}

impl KernelKind {
    pub fn name(&self) -> &'static str {
        match self {
            KernelKind::AdvectForward => "advect_forward",
            KernelKind::AdvectBackward => "advect_backward",
            KernelKind::RenderForward => "render_forward",
            KernelKind::RenderBackward => "render_backward",
        }
    }

    pub fn is_backward(&self) -> bool {
        matches!(self, KernelKind::AdvectBackward | KernelKind::RenderBackward)
    }
}

/// An event emitted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    /// Frame index (0-indexed). Context-level events use the current frame.
    pub frame: u32,
    pub kind: EventKind,
}

/// Event payload variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    /// A kernel finished.
    Kernel {
        kernel: KernelKind,
        /// Cells or pixels processed.
        elements: usize,
        wall_time: f64,
    },

    /// Device memory after an operation.
    Memory {
        in_use: usize,
        peak: usize,
        live_allocations: usize,
    },

    /// Non-finite values found in an output.
    NumericWarning { what: String, count: usize },

    /// Forward rollout started.
    RolloutBegin { steps: u32 },

    /// Forward rollout finished.
    RolloutEnd { wall_time: f64 },

    /// Gradient propagation through the tape finished.
    BackwardComplete { nodes: usize, wall_time: f64 },

    /// Custom event for extensibility.
    Custom {
        label: String,
        /// JSON-encoded payload.
        payload: String,
    },
}

impl EngineEvent {
    pub fn new(frame: u32, kind: EventKind) -> Self {
        Self { frame, kind }
    }

    /// Shorthand for a kernel event.
    pub fn kernel(frame: u32, kernel: KernelKind, elements: usize, wall_time: f64) -> Self {
        Self::new(
            frame,
            EventKind::Kernel {
                kernel,
                elements,
                wall_time,
            },
        )
    }
}
