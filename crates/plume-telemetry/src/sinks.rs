//! Pluggable event sinks.

use std::sync::{Arc, Mutex};

use crate::events::{EngineEvent, EventKind};

/// Trait for event consumers.
pub trait EventSink: Send {
    /// Process a single event.
    fn handle(&mut self, event: &EngineEvent);

    /// Called when the engine shuts down.
    fn finalize(&mut self) {}

    fn name(&self) -> &str;
}

/// Collects events into a shared `Vec`.
///
/// Clones share storage, so a clone kept by the caller sees every event the
/// registered sink receives.
#[derive(Debug, Clone, Default)]
pub struct VecSink {
    events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the events received so far.
    pub fn events(&self) -> Vec<EngineEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self.events.lock() {
            Ok(events) => events.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total kernel wall time in seconds, split into (forward, backward).
    pub fn kernel_seconds(&self) -> (f64, f64) {
        self.events()
            .iter()
            .fold((0.0, 0.0), |(fwd, bwd), e| match &e.kind {
                EventKind::Kernel {
                    kernel, wall_time, ..
                } if kernel.is_backward() => (fwd, bwd + wall_time),
                EventKind::Kernel { wall_time, .. } => (fwd + wall_time, bwd),
                _ => (fwd, bwd),
            })
    }
}

impl EventSink for VecSink {
    fn handle(&mut self, event: &EngineEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }

    fn name(&self) -> &str {
        "vec_sink"
    }
}

/// Logs events through `tracing`.
///
/// Kernel and memory events go out at `debug`, numeric warnings at `warn`,
/// everything else at `info`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl TracingSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for TracingSink {
    fn handle(&mut self, event: &EngineEvent) {
        match &event.kind {
            EventKind::Kernel {
                kernel,
                elements,
                wall_time,
            } => tracing::debug!(
                frame = event.frame,
                kernel = kernel.name(),
                elements,
                wall_time,
                "kernel"
            ),
            EventKind::Memory { in_use, peak, .. } => {
                tracing::debug!(frame = event.frame, in_use, peak, "memory")
            }
            EventKind::NumericWarning { what, count } => {
                tracing::warn!(frame = event.frame, what = %what, count, "numeric_warning")
            }
            other => tracing::info!(frame = event.frame, event = ?other, "engine_event"),
        }
    }

    fn name(&self) -> &str {
        "tracing_sink"
    }
}
