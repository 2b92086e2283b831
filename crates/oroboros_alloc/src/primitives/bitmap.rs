//! # Bitmap Allocator
//!
//! Tracks fixed-size blocks with one bit each. Requests take the first run
//! of free blocks long enough to hold them.

use std::cell::RefCell;

use serde::{Deserialize, Serialize};

use crate::allocator::{foreign_handle, validate_request, Allocator, Growable};
use crate::error::{AllocError, AllocResult};
use crate::handle::{AllocatorId, MemoryHandle, Origin};
use crate::region::{Region, RegionCell, MAX_ALIGN};
use crate::stats::AllocStats;

const WORD_BITS: usize = u64::BITS as usize;

/// Configuration for a bitmap allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitmapConfig {
    /// Size of one block in bytes (power of two).
    pub block_size: usize,
    /// Number of blocks.
    pub block_count: usize,
}

impl BitmapConfig {
    /// Checks the configuration.
    pub fn validate(&self) -> AllocResult<()> {
        if !self.block_size.is_power_of_two() {
            return Err(AllocError::invalid_config(
                "bitmap block size must be a power of two",
            ));
        }
        if self.block_count == 0 {
            return Err(AllocError::invalid_config(
                "bitmap block count must be non-zero",
            ));
        }
        self.block_size
            .checked_mul(self.block_count)
            .map(|_| ())
            .ok_or_else(|| AllocError::invalid_config("bitmap capacity overflows usize"))
    }

    /// Total bytes managed.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.block_size * self.block_count
    }

    /// Largest alignment a block start satisfies.
    #[inline]
    #[must_use]
    pub const fn max_align(&self) -> usize {
        if self.block_size < MAX_ALIGN {
            self.block_size
        } else {
            MAX_ALIGN
        }
    }
}

struct BitmapState {
    /// One bit per block, set while the block is in use.
    words: Vec<u64>,
    stats: AllocStats,
}

impl BitmapState {
    #[inline]
    fn is_set(&self, block: usize) -> bool {
        self.words[block / WORD_BITS] & (1 << (block % WORD_BITS)) != 0
    }

    fn set_run(&mut self, start: usize, len: usize, used: bool) {
        for block in start..start + len {
            let mask = 1u64 << (block % WORD_BITS);
            if used {
                self.words[block / WORD_BITS] |= mask;
            } else {
                self.words[block / WORD_BITS] &= !mask;
            }
        }
    }

    fn run_is_set(&self, start: usize, len: usize) -> bool {
        (start..start + len).all(|block| self.is_set(block))
    }

    /// First-fit search for `needed` consecutive free blocks.
    fn find_run(&self, needed: usize, block_count: usize) -> Option<usize> {
        let mut run_start = 0;
        let mut run_len = 0;
        let mut block = 0;

        while block < block_count {
            // Skip whole words that are full
            if block % WORD_BITS == 0 && self.words[block / WORD_BITS] == u64::MAX {
                block += WORD_BITS;
                run_start = block;
                run_len = 0;
                continue;
            }

            if self.is_set(block) {
                run_start = block + 1;
                run_len = 0;
            } else {
                run_len += 1;
                if run_len == needed {
                    return Some(run_start);
                }
            }
            block += 1;
        }
        None
    }
}

/// A block allocator backed by an occupancy bitmap.
///
/// # Thread Safety
///
/// This allocator is NOT thread-safe.
pub struct BitmapAllocator {
    id: AllocatorId,
    config: BitmapConfig,
    region: RegionCell,
    state: RefCell<BitmapState>,
}

impl BitmapAllocator {
    /// Creates a bitmap allocator over `block_count` blocks of `block_size`
    /// bytes.
    pub fn new(block_size: usize, block_count: usize) -> AllocResult<Self> {
        let config = BitmapConfig {
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

    fn build(config: BitmapConfig, region: Region) -> Self {
        Self {
            id: AllocatorId::next(),
            config,
            region: RegionCell::new(region),
            state: RefCell::new(BitmapState {
                words: vec![0; config.block_count.div_ceil(WORD_BITS)],
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

    /// Returns the number of free blocks.
    #[must_use]
    pub fn free_blocks(&self) -> usize {
        let used: usize = self
            .state
            .borrow()
            .words
            .iter()
            .map(|word| word.count_ones() as usize)
            .sum();
        self.config.block_count - used
    }

    /// Block range covered by a handle, if it fits inside the bitmap.
    fn block_run(&self, handle: &MemoryHandle) -> Option<(usize, usize)> {
        let block_size = self.config.block_size;
        if handle.offset() % block_size != 0 || handle.size() == 0 {
            return None;
        }
        let start = handle.offset() / block_size;
        let len = handle.size().div_ceil(block_size);
        (start + len <= self.config.block_count).then_some((start, len))
    }
}

impl Allocator for BitmapAllocator {
    fn try_allocate_raw(
        &self,
        size: usize,
        align: usize,
        origin: Origin,
    ) -> AllocResult<MemoryHandle> {
        validate_request(size, align, self.config.max_align())?;
        let capacity = self.config.capacity();
        if size > capacity {
            return Err(AllocError::CapacityExceeded {
                requested: size,
                max: capacity,
            });
        }

        let block_size = self.config.block_size;
        let needed = size.div_ceil(block_size);

        let mut state = self.state.borrow_mut();
        let start = state
            .find_run(needed, self.config.block_count)
            .ok_or(AllocError::OutOfCapacity { size, align })?;
        state.set_run(start, needed, true);
        state
            .stats
            .record_alloc(size, needed * block_size - size, origin);

        Ok(MemoryHandle::new(
            self.id,
            start * block_size,
            size,
            align,
            origin,
        ))
    }

    fn deallocate(&self, handle: MemoryHandle) {
        let (start, len) = match self.block_run(&handle) {
            Some(run) if handle.owner() == Some(self.id) => run,
            _ => {
                foreign_handle("BitmapAllocator", &handle);
                return;
            }
        };

        let mut state = self.state.borrow_mut();
        if !state.run_is_set(start, len) {
            debug_assert!(false, "BitmapAllocator: double free at block {start}");
            tracing::error!(block = start, "bitmap double free ignored");
            return;
        }
        state.set_run(start, len, false);
        state.stats.record_free(
            handle.size(),
            len * self.config.block_size - handle.size(),
            handle.origin(),
        );
    }

    fn owns(&self, handle: &MemoryHandle) -> bool {
        handle.owner() == Some(self.id)
            && self
                .block_run(handle)
                .is_some_and(|(start, len)| self.state.borrow().run_is_set(start, len))
    }

    fn stats(&self) -> AllocStats {
        self.state.borrow().stats
    }

    fn access(&self, handle: &MemoryHandle, f: &mut dyn FnMut(&mut [u8])) -> bool {
        self.owns(handle) && self.region.access(handle.offset(), handle.size(), f)
    }
}

impl Growable for BitmapAllocator {
    type Config = BitmapConfig;

    fn id(&self) -> AllocatorId {
        self.id
    }

    fn validate(config: &BitmapConfig) -> AllocResult<()> {
        config.validate()
    }

    fn region_size(config: &BitmapConfig) -> usize {
        config.capacity()
    }

    fn from_region(config: &BitmapConfig, region: Region) -> Result<Self, (AllocError, Region)> {
        if let Err(error) = config.validate() {
            return Err((error, region));
        }
        if region.len() < config.capacity() {
            return Err((AllocError::invalid_config("region smaller than bitmap"), region));
        }
        Ok(Self::build(*config, region))
    }

    fn into_region(self) -> Region {
        self.region.into_inner()
    }
}
