//! # Free-List Allocator
//!
//! Variable-size allocator over an address-ordered list of free ranges.
//! Freed ranges are coalesced with free neighbours on both sides.

use std::cell::RefCell;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::allocator::{foreign_handle, validate_request, Allocator, Growable};
use crate::error::{AllocError, AllocResult};
use crate::handle::{AllocatorId, MemoryHandle, Origin};
use crate::region::{align_up, Region, RegionCell, MAX_ALIGN};
use crate::stats::{AllocStats, FragmentationStats};

/// How a free range is chosen for a request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitPolicy {
    /// Lowest-addressed range that fits.
    #[default]
    FirstFit,
    /// Smallest range that fits; ties go to the lowest address.
    BestFit,
}

/// Configuration for a free-list allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeListConfig {
    /// Total capacity in bytes.
    pub capacity: usize,
    /// Range selection policy.
    #[serde(default)]
    pub fit: FitPolicy,
}

impl FreeListConfig {
    /// Checks the configuration.
    pub fn validate(&self) -> AllocResult<()> {
        if self.capacity == 0 {
            return Err(AllocError::invalid_config(
                "free-list capacity must be non-zero",
            ));
        }
        Ok(())
    }
}

struct FreeListState {
    /// Free ranges: start offset to length.
    free: BTreeMap<usize, usize>,
    stats: AllocStats,
}

impl FreeListState {
    /// Aligned start of the request inside the range, if it fits.
    fn fit_in(start: usize, len: usize, size: usize, align: usize) -> Option<usize> {
        let aligned = align_up(start, align);
        let end = aligned.checked_add(size)?;
        (end <= start + len).then_some(aligned)
    }

    fn find(&self, size: usize, align: usize, fit: FitPolicy) -> Option<(usize, usize, usize)> {
        let mut candidates = self.free.iter().filter_map(|(&start, &len)| {
            Self::fit_in(start, len, size, align).map(|aligned| (start, len, aligned))
        });
        match fit {
            FitPolicy::FirstFit => candidates.next(),
            // min_by_key keeps the first minimum, i.e. the lowest address
            FitPolicy::BestFit => candidates.min_by_key(|&(_, len, _)| len),
        }
    }

    /// Returns true if `[offset, offset + size)` touches any free byte.
    fn overlaps_free(&self, offset: usize, size: usize) -> bool {
        let end = offset + size;
        let before = self
            .free
            .range(..=offset)
            .next_back()
            .is_some_and(|(&start, &len)| start + len > offset);
        let inside = self.free.range(offset..end).next().is_some();
        before || inside
    }

    /// Returns a range to the free list, merging with adjacent neighbours.
    fn insert_coalescing(&mut self, offset: usize, size: usize) {
        let mut start = offset;
        let mut len = size;

        if let Some((&next_start, &next_len)) = self.free.range(offset + size..).next() {
            if next_start == offset + size {
                self.free.remove(&next_start);
                len += next_len;
            }
        }
        if let Some((&prev_start, &prev_len)) = self.free.range(..offset).next_back() {
            if prev_start + prev_len == offset {
                self.free.remove(&prev_start);
                start = prev_start;
                len += prev_len;
            }
        }
        self.free.insert(start, len);
    }
}

/// A general-purpose allocator with coalescing free ranges.
///
/// # Thread Safety
///
/// This allocator is NOT thread-safe.
pub struct FreeListAllocator {
    id: AllocatorId,
    config: FreeListConfig,
    region: RegionCell,
    state: RefCell<FreeListState>,
}

impl FreeListAllocator {
    /// Creates a free-list allocator of `capacity` bytes.
    pub fn new(capacity: usize, fit: FitPolicy) -> AllocResult<Self> {
        let config = FreeListConfig { capacity, fit };
        config.validate()?;
        let region = Region::zeroed(capacity).ok_or(AllocError::OutOfCapacity {
            size: capacity,
            align: MAX_ALIGN,
        })?;
        Ok(Self::build(config, region))
    }

    fn build(config: FreeListConfig, region: Region) -> Self {
        Self {
            id: AllocatorId::next(),
            config,
            region: RegionCell::new(region),
            state: RefCell::new(FreeListState {
                free: BTreeMap::from([(0, config.capacity)]),
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

    /// Range selection policy.
    #[inline]
    #[must_use]
    pub const fn fit(&self) -> FitPolicy {
        self.config.fit
    }

    /// Total free bytes.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.state.borrow().free.values().sum()
    }

    /// Reports how scattered the free ranges are.
    #[must_use]
    pub fn fragmentation(&self) -> FragmentationStats {
        let state = self.state.borrow();
        FragmentationStats::calculate(
            state.free.values().sum(),
            state.free.values().copied().max().unwrap_or(0),
            state.free.len(),
        )
    }
}

impl Allocator for FreeListAllocator {
    fn try_allocate_raw(
        &self,
        size: usize,
        align: usize,
        origin: Origin,
    ) -> AllocResult<MemoryHandle> {
        validate_request(size, align, MAX_ALIGN)?;
        if size > self.config.capacity {
            return Err(AllocError::CapacityExceeded {
                requested: size,
                max: self.config.capacity,
            });
        }

        let mut state = self.state.borrow_mut();
        let (start, len, aligned) = state
            .find(size, align, self.config.fit)
            .ok_or(AllocError::OutOfCapacity { size, align })?;

        state.free.remove(&start);
        if aligned > start {
            state.free.insert(start, aligned - start);
        }
        let end = aligned + size;
        if end < start + len {
            state.free.insert(end, start + len - end);
        }
        state.stats.record_alloc(size, 0, origin);

        Ok(MemoryHandle::new(self.id, aligned, size, align, origin))
    }

    fn deallocate(&self, handle: MemoryHandle) {
        if handle.owner() != Some(self.id) || handle.end() > self.config.capacity {
            foreign_handle("FreeListAllocator", &handle);
            return;
        }

        let mut state = self.state.borrow_mut();
        if state.overlaps_free(handle.offset(), handle.size()) {
            debug_assert!(
                false,
                "FreeListAllocator: double free at offset {}",
                handle.offset()
            );
            tracing::error!(offset = handle.offset(), "free-list double free ignored");
            return;
        }
        state.insert_coalescing(handle.offset(), handle.size());
        state.stats.record_free(handle.size(), 0, handle.origin());
    }

    fn owns(&self, handle: &MemoryHandle) -> bool {
        handle.owner() == Some(self.id)
            && handle.size() > 0
            && handle.end() <= self.config.capacity
            && !self
                .state
                .borrow()
                .overlaps_free(handle.offset(), handle.size())
    }

    fn stats(&self) -> AllocStats {
        self.state.borrow().stats
    }

    fn access(&self, handle: &MemoryHandle, f: &mut dyn FnMut(&mut [u8])) -> bool {
        self.owns(handle) && self.region.access(handle.offset(), handle.size(), f)
    }
}

impl Growable for FreeListAllocator {
    type Config = FreeListConfig;

    fn id(&self) -> AllocatorId {
        self.id
    }

    fn validate(config: &FreeListConfig) -> AllocResult<()> {
        config.validate()
    }

    fn region_size(config: &FreeListConfig) -> usize {
        config.capacity
    }

    fn from_region(
        config: &FreeListConfig,
        region: Region,
    ) -> Result<Self, (AllocError, Region)> {
        if let Err(error) = config.validate() {
            return Err((error, region));
        }
        if region.len() < config.capacity {
            return Err((AllocError::invalid_config("region smaller than capacity"), region));
        }
        Ok(Self::build(*config, region))
    }

    fn into_region(self) -> Region {
        self.region.into_inner()
    }
}
