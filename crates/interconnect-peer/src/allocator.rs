use std::collections::BTreeSet;

use crate::error::{PeerError, Result};

/// Stride between identifiers allocated by one endpoint.
pub const ID_STRIDE: u32 = 2;

/// Hands out identifiers from the lattice `start, start + increment, ...`
/// bounded by `max`, always returning the lowest free value.
///
/// The two endpoints of a connection use disjoint lattices (even and odd
/// starts with stride 2), so locally allocated ids never collide with ids
/// allocated by the remote side.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    start: u32,
    increment: u32,
    max: u32,
    allocated: BTreeSet<u32>,
}

impl IdAllocator {
    /// Create an allocator over `start..=max` in steps of `increment`.
    pub fn new(start: u32, increment: u32, max: u32) -> Result<Self> {
        if increment == 0 {
            return Err(PeerError::InvalidArgument(
                "id increment must be greater than zero".to_string(),
            ));
        }
        if start > max {
            return Err(PeerError::InvalidArgument(format!(
                "id start {start} exceeds max {max}"
            )));
        }
        Ok(Self {
            start,
            increment,
            max,
            allocated: BTreeSet::new(),
        })
    }

    /// Allocator spanning the whole `u32` range.
    pub fn with_stride(start: u32, increment: u32) -> Result<Self> {
        Self::new(start, increment, u32::MAX)
    }

    /// Allocator over one of the two interleaved parities (`parity % 2`)
    /// with stride [`ID_STRIDE`].
    pub fn interleaved(parity: u32) -> Self {
        Self {
            start: parity % ID_STRIDE,
            increment: ID_STRIDE,
            max: u32::MAX,
            allocated: BTreeSet::new(),
        }
    }

    /// Allocate the lowest free identifier.
    pub fn next(&mut self) -> Result<u32> {
        let step = u64::from(self.increment);
        let mut candidate = u64::from(self.start);
        // Only lattice values are ever inserted, so the first gap in the
        // ordered set is the lowest free slot.
        for &taken in &self.allocated {
            let taken = u64::from(taken);
            if taken == candidate {
                candidate += step;
            } else if taken > candidate {
                break;
            }
        }
        if candidate > u64::from(self.max) {
            return Err(PeerError::IdSpaceExhausted { max: self.max });
        }
        let id = candidate as u32;
        self.allocated.insert(id);
        Ok(id)
    }

    /// Release an identifier. Unknown values are ignored.
    pub fn remove(&mut self, id: u32) -> bool {
        self.allocated.remove(&id)
    }

    /// Release every identifier.
    pub fn reset(&mut self) {
        self.allocated.clear();
    }

    pub fn contains(&self, id: u32) -> bool {
        self.allocated.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.allocated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocated.is_empty()
    }
}
