//! # Buddy Allocator
//!
//! Power-of-two blocks that split on demand and merge with their buddy on
//! free. Free blocks of each order are kept address-ordered, so the lowest
//! address is always split first.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::allocator::{foreign_handle, validate_request, Allocator, Growable};
use crate::error::{AllocError, AllocResult};
use crate::handle::{AllocatorId, MemoryHandle, Origin};
use crate::region::{Region, RegionCell, MAX_ALIGN};
use crate::stats::{AllocStats, FragmentationStats};

/// Configuration for a buddy allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuddyConfig {
    /// Total capacity in bytes (power of two).
    pub capacity: usize,
    /// Smallest block handed out (power of two).
    #[serde(default = "default_min_block")]
    pub min_block: usize,
}

const fn default_min_block() -> usize {
    16
}

impl BuddyConfig {
    /// Checks the configuration.
    pub fn validate(&self) -> AllocResult<()> {
        if !self.capacity.is_power_of_two() || !self.min_block.is_power_of_two() {
            return Err(AllocError::invalid_config(
                "buddy capacity and minimum block must be powers of two",
            ));
        }
        if self.min_block > self.capacity {
            return Err(AllocError::invalid_config(
                "buddy minimum block exceeds capacity",
            ));
        }
        Ok(())
    }

    /// Order of the whole region.
    #[inline]
    const fn max_order(&self) -> usize {
        (self.capacity / self.min_block).trailing_zeros() as usize
    }
}

struct BuddyState {
    /// Free block offsets, indexed by order.
    free: Vec<BTreeSet<usize>>,
    /// Order of every live block, keyed by offset.
    live: HashMap<usize, usize>,
    stats: AllocStats,
}

/// A binary buddy allocator.
///
/// # Thread Safety
///
/// This allocator is NOT thread-safe.
pub struct BuddyAllocator {
    id: AllocatorId,
    config: BuddyConfig,
    region: RegionCell,
    state: RefCell<BuddyState>,
}

impl BuddyAllocator {
    /// Creates a buddy allocator of `capacity` bytes whose smallest block is
    /// `min_block` bytes.
    pub fn new(capacity: usize, min_block: usize) -> AllocResult<Self> {
        let config = BuddyConfig {
            capacity,
            min_block,
        };
        config.validate()?;
        let region = Region::zeroed(capacity).ok_or(AllocError::OutOfCapacity {
            size: capacity,
            align: MAX_ALIGN,
        })?;
        Ok(Self::build(config, region))
    }

    fn build(config: BuddyConfig, region: Region) -> Self {
        let max_order = config.max_order();
        let mut free = vec![BTreeSet::new(); max_order + 1];
        free[max_order].insert(0);

        Self {
            id: AllocatorId::next(),
            config,
            region: RegionCell::new(region),
            state: RefCell::new(BuddyState {
                free,
                live: HashMap::new(),
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
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.config.capacity
    }

    #[inline]
    const fn block_size(&self, order: usize) -> usize {
        self.config.min_block << order
    }

    /// Total free bytes.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        let state = self.state.borrow();
        state
            .free
            .iter()
            .enumerate()
            .map(|(order, blocks)| blocks.len() * self.block_size(order))
            .sum()
    }

    /// Size of the largest free block, or 0 when full.
    #[must_use]
    pub fn largest_free_block(&self) -> usize {
        let state = self.state.borrow();
        state
            .free
            .iter()
            .rposition(|blocks| !blocks.is_empty())
            .map_or(0, |order| self.block_size(order))
    }

    /// Reports how scattered the free blocks are.
    #[must_use]
    pub fn fragmentation(&self) -> FragmentationStats {
        let fragments = self
            .state
            .borrow()
            .free
            .iter()
            .map(BTreeSet::len)
            .sum();
        FragmentationStats::calculate(self.free_bytes(), self.largest_free_block(), fragments)
    }

    /// Order of the smallest block that can hold the request.
    fn order_for(&self, size: usize, align: usize) -> usize {
        let block = size.max(align).max(self.config.min_block).next_power_of_two();
        (block / self.config.min_block).trailing_zeros() as usize
    }

    fn live_order(&self, handle: &MemoryHandle) -> Option<usize> {
        let order = *self.state.borrow().live.get(&handle.offset())?;
        (handle.size() <= self.block_size(order)).then_some(order)
    }
}

impl Allocator for BuddyAllocator {
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
        let order = self.order_for(size, align);

        let mut state = self.state.borrow_mut();
        let mut current = (order..state.free.len())
            .find(|&candidate| !state.free[candidate].is_empty())
            .ok_or(AllocError::OutOfCapacity { size, align })?;
        let offset = state.free[current]
            .pop_first()
            .ok_or(AllocError::OutOfCapacity { size, align })?;

        // Split down, keeping the lower half and freeing the upper one
        while current > order {
            current -= 1;
            let upper = offset + self.block_size(current);
            state.free[current].insert(upper);
        }

        state.live.insert(offset, order);
        state
            .stats
            .record_alloc(size, self.block_size(order) - size, origin);

        Ok(MemoryHandle::new(self.id, offset, size, align, origin))
    }

    fn deallocate(&self, handle: MemoryHandle) {
        if handle.owner() != Some(self.id) {
            foreign_handle("BuddyAllocator", &handle);
            return;
        }
        let Some(order) = self.live_order(&handle) else {
            debug_assert!(
                false,
                "BuddyAllocator: double free at offset {}",
                handle.offset()
            );
            tracing::error!(offset = handle.offset(), "buddy double free ignored");
            return;
        };

        let mut state = self.state.borrow_mut();
        state.live.remove(&handle.offset());
        state.stats.record_free(
            handle.size(),
            self.block_size(order) - handle.size(),
            handle.origin(),
        );

        let max_order = self.config.max_order();
        let mut offset = handle.offset();
        let mut order = order;
        while order < max_order {
            let buddy = offset ^ self.block_size(order);
            if !state.free[order].remove(&buddy) {
                break;
            }
            offset = offset.min(buddy);
            order += 1;
        }
        state.free[order].insert(offset);
    }

    fn owns(&self, handle: &MemoryHandle) -> bool {
        handle.owner() == Some(self.id) && self.live_order(handle).is_some()
    }

    fn stats(&self) -> AllocStats {
        self.state.borrow().stats
    }

    fn access(&self, handle: &MemoryHandle, f: &mut dyn FnMut(&mut [u8])) -> bool {
        self.owns(handle) && self.region.access(handle.offset(), handle.size(), f)
    }
}

impl Growable for BuddyAllocator {
    type Config = BuddyConfig;

    fn id(&self) -> AllocatorId {
        self.id
    }

    fn validate(config: &BuddyConfig) -> AllocResult<()> {
        config.validate()
    }

    fn region_size(config: &BuddyConfig) -> usize {
        config.capacity
    }

    fn from_region(config: &BuddyConfig, region: Region) -> Result<Self, (AllocError, Region)> {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buddy_split_and_merge() {
        let buddy = BuddyAllocator::new(1024, 16).unwrap();
        let a = buddy.allocate(100, 8);
        let b = buddy.allocate(100, 8);
        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset(), 128);
        assert_eq!(buddy.free_bytes(), 768);
        assert_eq!(buddy.largest_free_block(), 512);

        buddy.deallocate(a);
        buddy.deallocate(b);
        assert_eq!(buddy.largest_free_block(), 1024);

        let whole = buddy.allocate(1000, 8);
        assert!(whole.is_valid());
        assert_eq!(whole.offset(), 0);
        assert_eq!(buddy.free_bytes(), 0);
        buddy.deallocate(whole);
    }

    #[test]
    fn test_buddy_lowest_address_first() {
        let buddy = BuddyAllocator::new(256, 32).unwrap();
        let a = buddy.allocate(32, 8);
        let b = buddy.allocate(32, 8);
        let c = buddy.allocate(32, 8);
        assert_eq!((a.offset(), b.offset(), c.offset()), (0, 32, 64));

        buddy.deallocate(b);
        let d = buddy.allocate(16, 8);
        assert_eq!(d.offset(), 32);

        buddy.deallocate(a);
        buddy.deallocate(c);
        buddy.deallocate(d);
        assert_eq!(buddy.largest_free_block(), 256);
    }

    #[test]
    fn test_buddy_alignment_rounds_block() {
        let buddy = BuddyAllocator::new(1024, 16).unwrap();
        let small = buddy.allocate(8, 8);
        let aligned = buddy.allocate(8, 64);
        assert_eq!(aligned.offset() % 64, 0);
        assert_eq!(aligned.offset(), 64);
        buddy.deallocate(small);
        buddy.deallocate(aligned);
    }

    #[test]
    fn test_buddy_rejections() {
        let buddy = BuddyAllocator::new(512, 16).unwrap();
        assert_eq!(
            buddy.try_allocate(600, 8),
            Err(AllocError::CapacityExceeded {
                requested: 600,
                max: 512
            })
        );
        let _full = buddy.allocate(512, 8);
        assert_eq!(
            buddy.try_allocate(16, 8),
            Err(AllocError::OutOfCapacity { size: 16, align: 8 })
        );
        assert!(matches!(
            BuddyAllocator::new(1000, 16),
            Err(AllocError::InvalidConfig(_))
        ));
        assert!(matches!(
            BuddyAllocator::new(64, 128),
            Err(AllocError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_buddy_fragmentation() {
        let buddy = BuddyAllocator::new(1024, 64).unwrap();
        let handles: Vec<_> = (0..16).map(|_| buddy.allocate(64, 8)).collect();
        assert_eq!(buddy.free_bytes(), 0);

        // Free every other block: nothing can merge
        let mut kept = Vec::new();
        for (index, handle) in handles.into_iter().enumerate() {
            if index % 2 == 0 {
                buddy.deallocate(handle);
            } else {
                kept.push(handle);
            }
        }
        let report = buddy.fragmentation();
        assert_eq!(report.total_free, 512);
        assert_eq!(report.largest_block, 64);
        assert_eq!(report.fragment_count, 8);
        assert!(report.is_fragmented());

        for handle in kept {
            buddy.deallocate(handle);
        }
        let report = buddy.fragmentation();
        assert_eq!(report.fragment_count, 1);
        assert_eq!(report.fragmentation_percent, 0);
    }

    #[cfg(feature = "stats")]
    #[test]
    fn test_buddy_overhead_is_rounding() {
        let buddy = BuddyAllocator::new(1024, 16).unwrap();
        let handle = buddy.allocate(100, 8);
        assert_eq!(buddy.stats().payload.current_overhead, 28);
        buddy.deallocate(handle);
        assert_eq!(buddy.stats().payload.current_overhead, 0);
    }
}
