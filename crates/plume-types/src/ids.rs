//! Strongly-typed handles for device-resident objects.
//!
//! Newtype wrappers prevent passing an image handle where a
//! field handle is expected.

use serde::{Deserialize, Serialize};

/// Handle to a density or velocity field owned by a device context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldHandle(pub u64);

/// Handle to a rendered image owned by a device context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageHandle(pub u64);

impl FieldHandle {
    /// Returns the raw identifier.
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl ImageHandle {
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for FieldHandle {
    fn from(val: u64) -> Self {
        Self(val)
    }
}

impl From<u64> for ImageHandle {
    fn from(val: u64) -> Self {
        Self(val)
    }
}

impl std::fmt::Display for FieldHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "field#{}", self.0)
    }
}

impl std::fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "image#{}", self.0)
    }
}
