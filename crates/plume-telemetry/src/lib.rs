//! # plume-telemetry
//!
//! Event bus for engine telemetry. The device context emits structured
//! events (kernel launches with wall time, memory high-water marks,
//! numeric warnings, rollout boundaries) that pluggable sinks consume.

pub mod bus;
pub mod events;
pub mod sinks;

pub use bus::EventBus;
pub use events::{EngineEvent, EventKind, KernelKind};
pub use sinks::{EventSink, TracingSink, VecSink};
