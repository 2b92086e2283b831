//! # Pool Allocator
//!
//! Fixed-size block allocator for objects that are frequently allocated and freed.

use std::cell::RefCell;

use serde::{Deserialize, Serialize};

use crate::allocator::{foreign_handle, validate_request, Allocator, Growable};
use crate::error::{AllocError, AllocResult};
use crate::handle::{AllocatorId, MemoryHandle, Origin};
use crate::region::{align_up, Region, RegionCell, MAX_ALIGN, MIN_ALIGN};
use crate::stats::AllocStats;

/// Configuration for a pool allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Largest request one block can serve, in bytes.
    pub block_size: usize,
    /// Number of blocks.
    pub block_count: usize,
}

impl PoolConfig {
    /// Checks the configuration.
    pub fn validate(&self) -> AllocResult<()> {
        if self.block_size == 0 || self.block_count == 0 {
            return Err(AllocError::invalid_config(
                "pool block size and block count must be non-zero",
            ));
        }
        if self.block_size > usize::MAX - MIN_ALIGN {
            return Err(AllocError::invalid_config("pool block size overflows usize"));
        }
        self.stride()
            .checked_mul(self.block_count)
            .map(|_| ())
            .ok_or_else(|| AllocError::invalid_config("pool capacity overflows usize"))
    }

    /// Distance between consecutive blocks.
    #[inline]
    #[must_use]
    pub const fn stride(&self) -> usize {
        align_up(self.block_size, MIN_ALIGN)
    }

    /// Total bytes the pool occupies.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.stride() * self.block_count
    }

    /// Largest alignment every block start satisfies.
    #[inline]
    #[must_use]
    pub const fn block_align(&self) -> usize {
        let natural = 1 << self.stride().trailing_zeros();
        if natural > MAX_ALIGN {
            MAX_ALIGN
        } else {
            natural
        }
    }
}

struct PoolState {
    /// Free block indices, used as a stack.
    free_list: Vec<usize>,
    in_use: Vec<bool>,
    stats: AllocStats,
}

/// A pool of equally sized blocks.
///
/// Allocation and free are O(1): a block index is popped from or pushed onto
/// the free list. A fresh pool hands out blocks in ascending index order;
/// after that, the most recently freed block is reused first.
///
/// # Thread Safety
///
/// This pool is NOT thread-safe. Use one pool per thread or put it in an
/// arena.
///
/// # Example
///
/// ```rust,ignore
/// let pool = PoolAllocator::new(64, 1024)?;
///
/// // O(1), no system allocation
/// let handle = pool.allocate(48, 16);
///
/// // O(1), block goes back on the free list
/// pool.deallocate(handle);
/// ```
pub struct PoolAllocator {
    id: AllocatorId,
    config: PoolConfig,
    region: RegionCell,
    state: RefCell<PoolState>,
}

impl PoolAllocator {
    /// Creates a pool of `block_count` blocks of `block_size` bytes.
    pub fn new(block_size: usize, block_count: usize) -> AllocResult<Self> {
        let config = PoolConfig {
            block_size,
            block_count,
        };
        config.validate()?;
        let region = Region::zeroed(config.capacity()).ok_or(AllocError::OutOfCapacity {
            size: config.capacity(),
            align: MAX_ALIGN,
        })?;
        Ok(Self::build(config, region))
    }

    /// Expects a validated config and a region of at least its capacity.
    fn build(config: PoolConfig, region: Region) -> Self {
        Self {
            id: AllocatorId::next(),
            config,
            region: RegionCell::new(region),
            state: RefCell::new(PoolState {
                free_list: (0..config.block_count).rev().collect(),
                in_use: vec![false; config.block_count],
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

    /// Returns the block size.
    #[inline]
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.config.block_size
    }

    /// Returns the total number of blocks.
    #[inline]
    #[must_use]
    pub const fn block_count(&self) -> usize {
        self.config.block_count
    }

    /// Returns the number of free blocks.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.state.borrow().free_list.len()
    }

    /// Returns the number of blocks in use.
    #[must_use]
    pub fn allocated_count(&self) -> usize {
        self.config.block_count - self.free_count()
    }

    /// Maps a handle to its block index if it sits on a block boundary.
    fn block_index(&self, handle: &MemoryHandle) -> Option<usize> {
        let stride = self.config.stride();
        let index = handle.offset() / stride;
        (handle.offset() % stride == 0 && index < self.config.block_count).then_some(index)
    }
}

impl Allocator for PoolAllocator {
    fn try_allocate_raw(
        &self,
        size: usize,
        align: usize,
        origin: Origin,
    ) -> AllocResult<MemoryHandle> {
        validate_request(size, align, MAX_ALIGN)?;
        if size > self.config.block_size {
            return Err(AllocError::CapacityExceeded {
                requested: size,
                max: self.config.block_size,
            });
        }
        let block_align = self.config.block_align();
        if align > block_align {
            return Err(AllocError::AlignmentViolation {
                align,
                max: block_align,
            });
        }

        let mut state = self.state.borrow_mut();
        let index = state
            .free_list
            .pop()
            .ok_or(AllocError::OutOfCapacity { size, align })?;
        state.in_use[index] = true;

        let stride = self.config.stride();
        state.stats.record_alloc(size, stride - size, origin);

        Ok(MemoryHandle::new(self.id, index * stride, size, align, origin))
    }

    fn deallocate(&self, handle: MemoryHandle) {
        let index = match self.block_index(&handle) {
            Some(index) if handle.owner() == Some(self.id) => index,
            _ => {
                foreign_handle("PoolAllocator", &handle);
                return;
            }
        };

        let mut state = self.state.borrow_mut();
        if !state.in_use[index] {
            debug_assert!(false, "PoolAllocator: double free of block {index}");
            tracing::error!(index, "pool double free ignored");
            return;
        }
        state.in_use[index] = false;
        state.free_list.push(index);
        state.stats.record_free(
            handle.size(),
            self.config.stride() - handle.size(),
            handle.origin(),
        );
    }

    fn owns(&self, handle: &MemoryHandle) -> bool {
        handle.owner() == Some(self.id)
            && handle.size() <= self.config.block_size
            && self
                .block_index(handle)
                .is_some_and(|index| self.state.borrow().in_use[index])
    }

    fn stats(&self) -> AllocStats {
        self.state.borrow().stats
    }

    fn access(&self, handle: &MemoryHandle, f: &mut dyn FnMut(&mut [u8])) -> bool {
        self.owns(handle) && self.region.access(handle.offset(), handle.size(), f)
    }
}

impl Growable for PoolAllocator {
    type Config = PoolConfig;

    fn id(&self) -> AllocatorId {
        self.id
    }

    fn validate(config: &PoolConfig) -> AllocResult<()> {
        config.validate()
    }

    fn region_size(config: &PoolConfig) -> usize {
        config.capacity()
    }

    fn from_region(config: &PoolConfig, region: Region) -> Result<Self, (AllocError, Region)> {
        if let Err(error) = config.validate() {
            return Err((error, region));
        }
        if region.len() < config.capacity() {
            return Err((AllocError::invalid_config("region smaller than pool"), region));
        }
        Ok(Self::build(*config, region))
    }

    fn into_region(self) -> Region {
        self.region.into_inner()
    }
}
