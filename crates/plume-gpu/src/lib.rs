//! # plume-gpu
//!
//! Device memory and compute abstraction layer for the Plume core.
//!
//! Provides a [`DeviceBackend`] trait with one implementation:
//! - [`CpuDevice`]: rayon-parallel host implementation (always available)
//!
//! Every buffer the kernels produce is allocated through a backend, which
//! charges it against a [`MemoryPool`] budget. The returned [`Allocation`]
//! guard hands the bytes back when the buffer is dropped, so memory is
//! released on every exit path.

pub mod atomic;
pub mod backend;
pub mod buffers;
pub mod memory;

pub use atomic::AtomicBuffer;
pub use backend::{CpuDevice, DeviceBackend};
pub use buffers::ComputeBuffer;
pub use memory::{Allocation, MemoryPool, MemoryStats};
