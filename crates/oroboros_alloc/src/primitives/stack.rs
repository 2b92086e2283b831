//! # Stack Allocator
//!
//! LIFO allocator: frees must arrive in reverse order of allocation.
//! Markers allow releasing a whole frame of allocations at once.

use std::cell::RefCell;

use serde::{Deserialize, Serialize};

use crate::allocator::{foreign_handle, validate_request, Allocator, Growable};
use crate::error::{AllocError, AllocResult};
use crate::handle::{AllocatorId, MemoryHandle, Origin};
use crate::region::{align_up, Region, RegionCell, MAX_ALIGN};
use crate::stats::AllocStats;

/// Configuration for a stack allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackConfig {
    /// Total capacity in bytes.
    pub capacity: usize,
}

impl StackConfig {
    /// Checks the configuration.
    pub fn validate(&self) -> AllocResult<()> {
        if self.capacity == 0 {
            return Err(AllocError::invalid_config("stack capacity must be non-zero"));
        }
        Ok(())
    }
}

/// Position in a stack allocator.
///
/// Rewinding to a marker releases every allocation made after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackMarker {
    depth: usize,
    top: usize,
}

/// One live allocation.
#[derive(Clone, Copy)]
struct Frame {
    /// Top of the stack before this allocation (start of its padding).
    prev_top: usize,
    offset: usize,
    size: usize,
    origin: Origin,
}

struct StackState {
    top: usize,
    frames: Vec<Frame>,
    stats: AllocStats,
}

impl StackState {
    fn pop_frame(&mut self) -> Option<Frame> {
        let frame = self.frames.pop()?;
        self.top = frame.prev_top;
        self.stats
            .record_free(frame.size, frame.offset - frame.prev_top, frame.origin);
        Some(frame)
    }
}

/// A LIFO allocator over a fixed region.
///
/// # Thread Safety
///
/// This allocator is NOT thread-safe.
pub struct StackAllocator {
    id: AllocatorId,
    region: RegionCell,
    state: RefCell<StackState>,
}

impl StackAllocator {
    /// Creates a stack allocator with its own region of `capacity` bytes.
    pub fn new(capacity: usize) -> AllocResult<Self> {
        StackConfig { capacity }.validate()?;
        let region = Region::zeroed(capacity).ok_or(AllocError::OutOfCapacity {
            size: capacity,
            align: MAX_ALIGN,
        })?;
        Ok(Self::with_region(region))
    }

    /// Creates a stack allocator over an existing region.
    #[must_use]
    pub fn with_region(region: Region) -> Self {
        Self {
            id: AllocatorId::next(),
            region: RegionCell::new(region),
            state: RefCell::new(StackState {
                top: 0,
                frames: Vec::new(),
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

    /// Current top of the stack in bytes.
    #[must_use]
    pub fn used(&self) -> usize {
        self.state.borrow().top
    }

    /// Number of live allocations.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.state.borrow().frames.len()
    }

    /// Captures the current position.
    #[must_use]
    pub fn marker(&self) -> StackMarker {
        let state = self.state.borrow();
        StackMarker {
            depth: state.frames.len(),
            top: state.top,
        }
    }

    /// Releases every allocation made after `marker`.
    ///
    /// Handles for those allocations must not be used afterwards. A marker
    /// that lies above the current top is ignored in release builds.
    pub fn rewind(&self, marker: StackMarker) {
        let mut state = self.state.borrow_mut();
        debug_assert!(
            marker.depth <= state.frames.len(),
            "stack marker is newer than the current top"
        );
        while state.frames.len() > marker.depth {
            state.pop_frame();
        }
        debug_assert!(
            state.frames.len() < marker.depth || state.top == marker.top,
            "stack marker does not match the rewound top"
        );
    }
}

impl Allocator for StackAllocator {
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

        let prev_top = state.top;
        let offset = align_up(prev_top, align);
        let end = offset
            .checked_add(size)
            .filter(|&end| end <= capacity)
            .ok_or(AllocError::OutOfCapacity { size, align })?;

        state.frames.push(Frame {
            prev_top,
            offset,
            size,
            origin,
        });
        state.top = end;
        state.stats.record_alloc(size, offset - prev_top, origin);

        Ok(MemoryHandle::new(self.id, offset, size, align, origin))
    }

    /// Frees the most recent live allocation.
    ///
    /// Freeing anything else breaks LIFO order: debug builds assert, release
    /// builds log and leave the stack untouched.
    fn deallocate(&self, handle: MemoryHandle) {
        if handle.owner() != Some(self.id) {
            foreign_handle("StackAllocator", &handle);
            return;
        }

        let mut state = self.state.borrow_mut();
        let is_top = state
            .frames
            .last()
            .is_some_and(|frame| frame.offset == handle.offset() && frame.size == handle.size());
        if !is_top {
            debug_assert!(false, "StackAllocator: free out of LIFO order");
            tracing::error!(offset = handle.offset(), "stack free out of LIFO order ignored");
            return;
        }
        state.pop_frame();
    }

    fn owns(&self, handle: &MemoryHandle) -> bool {
        handle.owner() == Some(self.id) && handle.end() <= self.state.borrow().top
    }

    fn stats(&self) -> AllocStats {
        self.state.borrow().stats
    }

    fn access(&self, handle: &MemoryHandle, f: &mut dyn FnMut(&mut [u8])) -> bool {
        self.owns(handle) && self.region.access(handle.offset(), handle.size(), f)
    }
}

impl Growable for StackAllocator {
    type Config = StackConfig;

    fn id(&self) -> AllocatorId {
        self.id
    }

    fn validate(config: &StackConfig) -> AllocResult<()> {
        config.validate()
    }

    fn region_size(config: &StackConfig) -> usize {
        config.capacity
    }

    fn from_region(config: &StackConfig, region: Region) -> Result<Self, (AllocError, Region)> {
        if region.len() < config.capacity {
            return Err((AllocError::invalid_config("region smaller than capacity"), region));
        }
        Ok(Self::with_region(region))
    }

    fn into_region(self) -> Region {
        self.region.into_inner()
    }
}
