//! Compute backend trait and the CPU device.
//!
//! The [`DeviceBackend`] trait is the allocation and dispatch seam that
//! every kernel receives explicitly. There is no global device state: a
//! backend value is created by the caller, passed to each call, and its
//! pool counters describe exactly the buffers that value has handed out.

use rayon::prelude::*;
use tracing::trace;

use plume_types::constants::DEFAULT_MEMORY_BUDGET;
use plume_types::{PlumeError, PlumeResult};

use crate::atomic::AtomicBuffer;
use crate::buffers::ComputeBuffer;
use crate::memory::{MemoryPool, MemoryStats};

const F32_BYTES: usize = std::mem::size_of::<f32>();

/// Trait for compute devices.
///
/// # Implementations
/// - [`CpuDevice`]: rayon-parallel host implementation
pub trait DeviceBackend: Send + Sync {
    /// Returns the backend name (e.g., "cpu").
    fn name(&self) -> &str;

    /// Returns true if the backend runs on an accelerator.
    fn is_gpu(&self) -> bool;

    /// Allocates a zero-filled buffer of `len` elements.
    fn allocate(&self, len: usize) -> PlumeResult<ComputeBuffer>;

    /// Allocates a zeroed scatter-add accumulator of `len` elements.
    fn allocate_atomic(&self, len: usize) -> PlumeResult<AtomicBuffer>;

    /// Current memory counters.
    fn memory(&self) -> MemoryStats;

    /// Uploads host data into a new device buffer.
    fn upload(&self, host: &[f32]) -> PlumeResult<ComputeBuffer> {
        let mut buffer = self.allocate(host.len())?;
        buffer.copy_from_slice(host)?;
        Ok(buffer)
    }

    /// Apply a per-element operation: `out[i] = a[i] + scale * b[i]`.
    ///
    /// Used to merge gradient contributions.
    fn axpy(
        &self,
        a: &ComputeBuffer,
        b: &ComputeBuffer,
        scale: f32,
        out: &mut ComputeBuffer,
    ) -> PlumeResult<()>;

    /// Compute the dot product of two buffers in `f64`.
    fn dot(&self, a: &ComputeBuffer, b: &ComputeBuffer) -> PlumeResult<f64>;

    /// Fill a buffer with a constant value.
    fn fill(&self, buffer: &mut ComputeBuffer, value: f32);
}

/// Host device. Kernels run on the rayon thread pool.
#[derive(Debug, Clone)]
pub struct CpuDevice {
    pool: MemoryPool,
}

impl CpuDevice {
    /// Creates a CPU device with the default memory budget.
    pub fn new() -> Self {
        Self::with_budget(DEFAULT_MEMORY_BUDGET)
    }

    /// Creates a CPU device limited to `budget` bytes.
    pub fn with_budget(budget: usize) -> Self {
        Self {
            pool: MemoryPool::new(budget),
        }
    }

    fn bytes_for(len: usize) -> PlumeResult<usize> {
        len.checked_mul(F32_BYTES).ok_or(PlumeError::DeviceAllocation {
            requested: usize::MAX,
            available: 0,
        })
    }
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBackend for CpuDevice {
    fn name(&self) -> &str {
        "cpu"
    }

    fn is_gpu(&self) -> bool {
        false
    }

    fn allocate(&self, len: usize) -> PlumeResult<ComputeBuffer> {
        let allocation = self.pool.reserve(Self::bytes_for(len)?)?;
        trace!(len, "allocate buffer");
        Ok(ComputeBuffer::tracked(vec![0.0; len], allocation))
    }

    fn allocate_atomic(&self, len: usize) -> PlumeResult<AtomicBuffer> {
        let allocation = self.pool.reserve(Self::bytes_for(len)?)?;
        trace!(len, "allocate accumulator");
        Ok(AtomicBuffer::tracked(len, allocation))
    }

    fn memory(&self) -> MemoryStats {
        self.pool.stats()
    }

    fn axpy(
        &self,
        a: &ComputeBuffer,
        b: &ComputeBuffer,
        scale: f32,
        out: &mut ComputeBuffer,
    ) -> PlumeResult<()> {
        if a.len() != b.len() || a.len() != out.len() {
            return Err(PlumeError::ShapeMismatch(format!(
                "AXPY buffer lengths differ: {} / {} / {}",
                a.len(),
                b.len(),
                out.len()
            )));
        }

        out.as_mut_slice()
            .par_iter_mut()
            .zip(a.as_slice().par_iter().zip(b.as_slice().par_iter()))
            .for_each(|(o, (&x, &y))| *o = x + scale * y);

        Ok(())
    }

    fn dot(&self, a: &ComputeBuffer, b: &ComputeBuffer) -> PlumeResult<f64> {
        if a.len() != b.len() {
            return Err(PlumeError::ShapeMismatch(format!(
                "dot product buffer lengths differ: {} / {}",
                a.len(),
                b.len()
            )));
        }

        Ok(a
            .as_slice()
            .iter()
            .zip(b.as_slice())
            .map(|(&x, &y)| x as f64 * y as f64)
            .sum())
    }

    fn fill(&self, buffer: &mut ComputeBuffer, value: f32) {
        buffer.as_mut_slice().par_iter_mut().for_each(|x| *x = value);
    }
}
