//! Device buffer abstraction.
//!
//! In the CPU device a buffer is a `Vec<f32>` plus the allocation guard
//! that charges it against the device budget. Untracked buffers (host
//! staging, test fixtures) carry no guard.

use plume_types::{PlumeError, PlumeResult};

use crate::memory::Allocation;

/// A flat `f32` buffer resident on a compute device.
#[derive(Debug)]
pub struct ComputeBuffer {
    /// Element storage.
    data: Vec<f32>,
    /// Budget reservation, released on drop.
    allocation: Option<Allocation>,
}

impl ComputeBuffer {
    /// Creates an untracked buffer filled with zeros.
    pub fn zeros(len: usize) -> Self {
        Self {
            data: vec![0.0; len],
            allocation: None,
        }
    }

    /// Creates an untracked buffer from existing data.
    pub fn from_data(data: Vec<f32>) -> Self {
        Self {
            data,
            allocation: None,
        }
    }

    pub(crate) fn tracked(data: Vec<f32>, allocation: Allocation) -> Self {
        Self {
            data,
            allocation: Some(allocation),
        }
    }

    /// Returns the number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size in bytes.
    pub fn byte_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// True when the buffer is charged against a device budget.
    pub fn is_tracked(&self) -> bool {
        self.allocation.is_some()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Copies host data into the buffer. Lengths must match exactly.
    pub fn copy_from_slice(&mut self, src: &[f32]) -> PlumeResult<()> {
        if src.len() != self.data.len() {
            return Err(PlumeError::ShapeMismatch(format!(
                "host buffer has {} elements, device buffer has {}",
                src.len(),
                self.data.len()
            )));
        }
        self.data.copy_from_slice(src);
        Ok(())
    }

    /// Copies the contents back to host memory.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.clone()
    }

    /// Number of NaN or infinite elements.
    pub fn count_non_finite(&self) -> usize {
        self.data.iter().filter(|v| !v.is_finite()).count()
    }
}
