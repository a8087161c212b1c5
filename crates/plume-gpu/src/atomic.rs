//! Scatter-add accumulation buffer.
//!
//! Adjoint kernels run one task per pixel or cell and scatter their
//! contributions into shared gradient storage. Values are kept as `f32`
//! bit patterns in `AtomicU32` and added with a compare-exchange loop, so
//! concurrent contributions never get lost. Summation order is not fixed,
//! results can differ in the last bits between runs.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::buffers::ComputeBuffer;
use crate::memory::Allocation;

/// Concurrent `f32` accumulator.
#[derive(Debug)]
pub struct AtomicBuffer {
    cells: Vec<AtomicU32>,
    allocation: Option<Allocation>,
}

impl AtomicBuffer {
    /// Creates an untracked zeroed accumulator.
    pub fn zeros(len: usize) -> Self {
        Self {
            cells: (0..len).map(|_| AtomicU32::new(0.0f32.to_bits())).collect(),
            allocation: None,
        }
    }

    pub(crate) fn tracked(len: usize, allocation: Allocation) -> Self {
        let mut buf = Self::zeros(len);
        buf.allocation = Some(allocation);
        buf
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Atomically adds `value` to element `index`.
    #[inline]
    pub fn add(&self, index: usize, value: f32) {
        if value == 0.0 {
            return;
        }
        let cell = &self.cells[index];
        let mut current = cell.load(Ordering::Relaxed);
        loop {
            let next = (f32::from_bits(current) + value).to_bits();
            match cell.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Reads element `index`.
    #[inline]
    pub fn load(&self, index: usize) -> f32 {
        f32::from_bits(self.cells[index].load(Ordering::Relaxed))
    }

    /// Freezes the accumulator into a plain buffer, keeping its reservation.
    pub fn into_buffer(self) -> ComputeBuffer {
        let data = self
            .cells
            .into_iter()
            .map(|c| f32::from_bits(c.into_inner()))
            .collect();
        match self.allocation {
            Some(allocation) => ComputeBuffer::tracked(data, allocation),
            None => ComputeBuffer::from_data(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn concurrent_adds_are_not_lost() {
        let acc = AtomicBuffer::zeros(4);
        (0..10_000).into_par_iter().for_each(|i| acc.add(i % 4, 1.0));
        let out = acc.into_buffer();
        assert_eq!(out.as_slice(), &[2500.0, 2500.0, 2500.0, 2500.0]);
    }
}
