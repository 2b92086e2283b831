//! # Linear Allocator
//!
//! A bump allocator for temporary allocations that are freed all at once.

use std::cell::RefCell;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::allocator::{foreign_handle, validate_request, Allocator, Growable};
use crate::error::{AllocError, AllocResult};
use crate::handle::{AllocatorId, MemoryHandle, Origin};
use crate::region::{align_up, Region, RegionCell, MAX_ALIGN};
use crate::stats::AllocStats;

/// Configuration for a linear allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinearConfig {
    /// Total capacity in bytes.
    pub capacity: usize,
}

impl LinearConfig {
    /// Checks the configuration.
    pub fn validate(&self) -> AllocResult<()> {
        if self.capacity == 0 {
            return Err(AllocError::invalid_config("linear capacity must be non-zero"));
        }
        Ok(())
    }
}

struct LinearState {
    offset: usize,
    /// Alignment padding in front of each padded live allocation, by offset.
    padding: HashMap<usize, usize>,
    stats: AllocStats,
}

/// A bump-pointer allocator.
///
/// Allocations are fast (just bump an offset). Individual frees release
/// nothing; memory comes back all at once through [`LinearAllocator::reset`].
///
/// # Thread Safety
///
/// This allocator is NOT thread-safe. Use one per thread or put it in an
/// arena.
pub struct LinearAllocator {
    id: AllocatorId,
    region: RegionCell,
    state: RefCell<LinearState>,
}

impl LinearAllocator {
    /// Creates a linear allocator with its own region of `capacity` bytes.
    pub fn new(capacity: usize) -> AllocResult<Self> {
        LinearConfig { capacity }.validate()?;
        let region = Region::zeroed(capacity).ok_or(AllocError::OutOfCapacity {
            size: capacity,
            align: MAX_ALIGN,
        })?;
        Ok(Self::with_region(region))
    }

    /// Creates a linear allocator over an existing region.
    #[must_use]
    pub fn with_region(region: Region) -> Self {
        Self {
            id: AllocatorId::next(),
            region: RegionCell::new(region),
            state: RefCell::new(LinearState {
                offset: 0,
                padding: HashMap::new(),
                stats: AllocStats::default(),
            }),
        }
    }

    /// Identity stamped into every handle this allocator produces.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> AllocatorId {
        self.id
    }

    /// Total capacity in bytes.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Bytes consumed so far, including alignment padding.
    #[must_use]
    pub fn used(&self) -> usize {
        self.state.borrow().offset
    }

    /// Bytes still available.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.region.len() - self.state.borrow().offset
    }

    /// Resets the allocator, invalidating all previous allocations.
    ///
    /// Outstanding handles must not be used or freed afterwards.
    pub fn reset(&self) {
        let mut state = self.state.borrow_mut();
        state.offset = 0;
        state.padding.clear();
        state.stats.clear_current();
    }
}

impl Allocator for LinearAllocator {
    fn try_allocate_raw(
        &self,
        size: usize,
        align: usize,
        origin: Origin,
    ) -> AllocResult<MemoryHandle> {
        validate_request(size, align, MAX_ALIGN)?;

        let capacity = self.region.len();
        let mut state = self.state.borrow_mut();
        if size > capacity {
            return Err(AllocError::CapacityExceeded {
                requested: size,
                max: capacity,
            });
        }

        let aligned = align_up(state.offset, align);
        let end = aligned
            .checked_add(size)
            .filter(|&end| end <= capacity)
            .ok_or(AllocError::OutOfCapacity { size, align })?;

        let padding = aligned - state.offset;
        state.offset = end;
        if padding > 0 {
            state.padding.insert(aligned, padding);
        }
        state.stats.record_alloc(size, padding, origin);

        Ok(MemoryHandle::new(self.id, aligned, size, align, origin))
    }

    /// Individual frees release no memory; only statistics move.
    fn deallocate(&self, handle: MemoryHandle) {
        if !self.owns(&handle) {
            foreign_handle("LinearAllocator", &handle);
            return;
        }
        let mut state = self.state.borrow_mut();
        let padding = state.padding.remove(&handle.offset()).unwrap_or(0);
        state.stats.record_free(handle.size(), padding, handle.origin());
    }

    fn owns(&self, handle: &MemoryHandle) -> bool {
        handle.owner() == Some(self.id) && handle.end() <= self.state.borrow().offset
    }

    fn stats(&self) -> AllocStats {
        self.state.borrow().stats
    }

    fn access(&self, handle: &MemoryHandle, f: &mut dyn FnMut(&mut [u8])) -> bool {
        self.owns(handle) && self.region.access(handle.offset(), handle.size(), f)
    }
}

impl Growable for LinearAllocator {
    type Config = LinearConfig;

    fn id(&self) -> AllocatorId {
        self.id
    }

    fn validate(config: &LinearConfig) -> AllocResult<()> {
        config.validate()
    }

    fn region_size(config: &LinearConfig) -> usize {
        config.capacity
    }

    fn from_region(config: &LinearConfig, region: Region) -> Result<Self, (AllocError, Region)> {
        if region.len() < config.capacity {
            return Err((AllocError::invalid_config("region smaller than capacity"), region));
        }
        Ok(Self::with_region(region))
    }

    fn into_region(self) -> Region {
        self.region.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_allocation() {
        let linear = LinearAllocator::new(1024).unwrap();
        let a = linear.allocate(10, 1);
        let b = linear.allocate(16, 16);

        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset(), 16);
        assert_eq!(linear.used(), 32);
        assert_eq!(linear.remaining(), 992);
        assert!(!a.overlaps(&b));

        linear.deallocate(a);
        linear.deallocate(b);
        // Frees do not rewind the cursor
        assert_eq!(linear.used(), 32);
    }

    #[test]
    fn test_linear_reset() {
        let linear = LinearAllocator::new(64).unwrap();
        let _ = linear.allocate(64, 8);
        assert!(linear.allocate(1, 1).is_empty());

        linear.reset();
        assert_eq!(linear.used(), 0);
        assert!(linear.allocate(64, 8).is_valid());
    }

    #[test]
    fn test_linear_failures() {
        let linear = LinearAllocator::new(1024).unwrap();
        assert_eq!(
            linear.try_allocate(1536, 8),
            Err(AllocError::CapacityExceeded {
                requested: 1536,
                max: 1024
            })
        );

        let _ = linear.allocate(1000, 8);
        assert_eq!(
            linear.try_allocate(100, 8),
            Err(AllocError::OutOfCapacity { size: 100, align: 8 })
        );
    }

    #[test]
    fn test_linear_bytes_are_addressable() {
        let linear = LinearAllocator::new(128).unwrap();
        let handle = linear.allocate(4, 4);
        linear.with_bytes(&handle, |bytes| bytes.copy_from_slice(&[1, 2, 3, 4]));
        assert_eq!(linear.with_bytes(&handle, |bytes| bytes.to_vec()), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_linear_nested_access() {
        let linear = LinearAllocator::new(128).unwrap();
        let a = linear.allocate(8, 8);
        let b = linear.allocate(8, 8);

        let mut inner = None;
        assert!(linear.access(&a, &mut |_| {
            inner = Some(linear.access(&b, &mut |_| {}));
        }));
        // Refused rather than a double borrow
        assert_eq!(inner, Some(false));

        // Bookkeeping stays usable from inside an access
        let mut grown = MemoryHandle::EMPTY;
        assert!(linear.access(&a, &mut |_| grown = linear.allocate(8, 8)));
        assert!(linear.owns(&grown));
    }

    #[cfg(feature = "stats")]
    #[test]
    fn test_linear_padding_round_trip() {
        let linear = LinearAllocator::new(128).unwrap();
        let _head = linear.allocate(1, 1);
        let before = linear.stats();

        let padded = linear.allocate(8, 8);
        assert_eq!(linear.stats().payload.current_overhead, 7);

        linear.deallocate(padded);
        let after = linear.stats();
        assert_eq!(after.payload.current_used, before.payload.current_used);
        assert_eq!(after.payload.current_overhead, before.payload.current_overhead);
    }

    #[test]
    fn test_linear_rejects_zero_capacity() {
        assert!(matches!(
            LinearAllocator::new(0),
            Err(AllocError::InvalidConfig(_))
        ));
    }
}
