//! Byte-budgeted memory pool with RAII allocation guards.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use plume_types::{PlumeError, PlumeResult};

#[derive(Debug)]
struct PoolState {
    budget: usize,
    in_use: AtomicUsize,
    peak: AtomicUsize,
    live: AtomicUsize,
}

/// Tracks device memory usage against a fixed budget.
///
/// Cloning a pool yields another view of the same counters.
#[derive(Debug, Clone)]
pub struct MemoryPool {
    state: Arc<PoolState>,
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Total budget in bytes.
    pub budget: usize,
    /// Bytes currently held by live allocations.
    pub in_use: usize,
    /// High-water mark of `in_use`.
    pub peak: usize,
    /// Number of live allocations.
    pub live_allocations: usize,
}

impl MemoryStats {
    /// Bytes still available under the budget.
    pub fn available(&self) -> usize {
        self.budget.saturating_sub(self.in_use)
    }
}

impl MemoryPool {
    /// Creates a pool with the given byte budget.
    pub fn new(budget: usize) -> Self {
        Self {
            state: Arc::new(PoolState {
                budget,
                in_use: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                live: AtomicUsize::new(0),
            }),
        }
    }

    /// Reserves `bytes` from the budget.
    ///
    /// Fails with [`PlumeError::DeviceAllocation`] when the budget would be
    /// exceeded. Nothing is reserved on failure.
    pub fn reserve(&self, bytes: usize) -> PlumeResult<Allocation> {
        let state = &self.state;
        let mut current = state.in_use.load(Ordering::Acquire);
        loop {
            let next = current.checked_add(bytes).filter(|&n| n <= state.budget);
            let Some(next) = next else {
                return Err(PlumeError::DeviceAllocation {
                    requested: bytes,
                    available: state.budget.saturating_sub(current),
                });
            };
            match state.in_use.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    state.peak.fetch_max(next, Ordering::AcqRel);
                    state.live.fetch_add(1, Ordering::AcqRel);
                    return Ok(Allocation {
                        bytes,
                        pool: Arc::clone(&self.state),
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns current counters.
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            budget: self.state.budget,
            in_use: self.state.in_use.load(Ordering::Acquire),
            peak: self.state.peak.load(Ordering::Acquire),
            live_allocations: self.state.live.load(Ordering::Acquire),
        }
    }
}

/// A reservation against a [`MemoryPool`]. Dropping it returns the bytes.
#[derive(Debug)]
pub struct Allocation {
    bytes: usize,
    pool: Arc<PoolState>,
}

impl Allocation {
    /// Size of the reservation in bytes.
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.pool.in_use.fetch_sub(self.bytes, Ordering::AcqRel);
        self.pool.live.fetch_sub(1, Ordering::AcqRel);
    }
}
