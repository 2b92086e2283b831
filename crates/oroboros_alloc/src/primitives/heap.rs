//! # Heap Allocator
//!
//! Defers every request to the system allocator. This is the ultimate
//! source of memory: it serves payload directly and hands out regions to
//! arenas through [`Backing`].
//!
//! ## Thread Safety
//!
//! Unlike the other primitives this one is `Sync`, mirroring the system
//! allocator it wraps. The live-allocation table sits behind a re-entrant
//! lock so `access` callbacks can reach other live allocations.

use std::cell::RefCell;
use std::collections::HashMap;

use parking_lot::ReentrantMutex;

use crate::allocator::{foreign_handle, reentrant_free, validate_request, Allocator, Backing};
use crate::error::{AllocError, AllocResult};
use crate::handle::{AllocatorId, MemoryHandle, Origin};
use crate::region::{Region, MAX_ALIGN};
use crate::stats::AllocStats;

/// One live payload allocation.
struct LiveBlock {
    len: usize,
    region: RefCell<Region>,
}

/// Bookkeeping for live system allocations.
#[derive(Default)]
struct HeapState {
    /// Live payload allocations keyed by base address.
    live: HashMap<usize, LiveBlock>,
    /// Bytes currently reserved from the system (payload and regions).
    reserved: usize,
    stats: AllocStats,
}

/// Allocator that forwards to the system heap, with an optional byte budget.
///
/// # Example
///
/// ```rust,ignore
/// let heap = HeapAllocator::new();
/// let handle = heap.allocate(256, 16);
/// heap.with_bytes(&handle, |bytes| bytes.fill(0xAB));
/// heap.deallocate(handle);
/// ```
pub struct HeapAllocator {
    id: AllocatorId,
    limit: Option<usize>,
    state: ReentrantMutex<RefCell<HeapState>>,
}

impl HeapAllocator {
    /// Creates an unbounded heap allocator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: AllocatorId::next(),
            limit: None,
            state: ReentrantMutex::new(RefCell::new(HeapState::default())),
        }
    }

    /// Creates a heap allocator that refuses to reserve more than `limit`
    /// bytes in total (payload plus regions, after cache-line rounding).
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new()
        }
    }

    /// Identity stamped into every handle this allocator produces.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> AllocatorId {
        self.id
    }

    /// Configured byte budget, if any.
    #[inline]
    #[must_use]
    pub const fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Number of live payload allocations.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.state.lock().borrow().live.len()
    }

    /// Bytes currently reserved from the system.
    #[must_use]
    pub fn reserved_bytes(&self) -> usize {
        self.state.lock().borrow().reserved
    }

    /// Runs `f` with the bookkeeping borrowed mutably.
    ///
    /// Returns `None` when called from inside an `access` callback on this
    /// heap, which holds the bookkeeping shared.
    fn with_state<R>(&self, f: impl FnOnce(&mut HeapState) -> R) -> Option<R> {
        let guard = self.state.lock();
        let mut state = guard.try_borrow_mut().ok()?;
        Some(f(&mut state))
    }

    /// Reserves a region for `size` bytes, honouring the budget.
    ///
    /// Sizes whose cache-line rounding overflows are refused like any other
    /// request the system cannot serve.
    fn reserve(&self, state: &mut HeapState, size: usize) -> Option<Region> {
        let rounded = size.checked_next_multiple_of(MAX_ALIGN)?;
        if let Some(limit) = self.limit {
            let fits = state
                .reserved
                .checked_add(rounded)
                .is_some_and(|total| total <= limit);
            if !fits {
                tracing::debug!(
                    requested = rounded,
                    reserved = state.reserved,
                    limit,
                    "heap budget exhausted"
                );
                return None;
            }
        }
        let region = Region::zeroed(size)?;
        state.reserved += region.reserved();
        Some(region)
    }
}

impl Default for HeapAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator for HeapAllocator {
    fn try_allocate_raw(
        &self,
        size: usize,
        align: usize,
        origin: Origin,
    ) -> AllocResult<MemoryHandle> {
        validate_request(size, align, MAX_ALIGN)?;

        let offset = self
            .with_state(|state| {
                let region = self.reserve(state, size)?;
                let offset = region.base_addr();
                let overhead = region.reserved() - size;
                state.stats.record_alloc(size, overhead, origin);
                state.live.insert(
                    offset,
                    LiveBlock {
                        len: size,
                        region: RefCell::new(region),
                    },
                );
                Some(offset)
            })
            .flatten()
            .ok_or(AllocError::OutOfCapacity { size, align })?;

        Ok(MemoryHandle::new(self.id, offset, size, align, origin))
    }

    fn deallocate(&self, handle: MemoryHandle) {
        if handle.owner() != Some(self.id) {
            foreign_handle("HeapAllocator", &handle);
            return;
        }

        let freed = self.with_state(|state| {
            let region = state.live.remove(&handle.offset())?.region.into_inner();
            state.reserved -= region.reserved();
            state.stats.record_free(
                handle.size(),
                region.reserved() - handle.size(),
                handle.origin(),
            );
            Some(())
        });
        match freed {
            Some(Some(())) => {}
            Some(None) => foreign_handle("HeapAllocator", &handle),
            None => reentrant_free("HeapAllocator", &handle),
        }
    }

    fn owns(&self, handle: &MemoryHandle) -> bool {
        if handle.owner() != Some(self.id) {
            return false;
        }
        let guard = self.state.lock();
        let state = guard.borrow();
        state
            .live
            .get(&handle.offset())
            .is_some_and(|block| handle.size() <= block.len)
    }

    fn stats(&self) -> AllocStats {
        self.state.lock().borrow().stats
    }

    fn access(&self, handle: &MemoryHandle, f: &mut dyn FnMut(&mut [u8])) -> bool {
        if handle.owner() != Some(self.id) {
            return false;
        }
        let guard = self.state.lock();
        let state = guard.borrow();
        let Some(block) = state.live.get(&handle.offset()) else {
            return false;
        };
        let Ok(mut region) = block.region.try_borrow_mut() else {
            tracing::trace!(
                offset = handle.offset(),
                "allocation busy with an enclosing access"
            );
            return false;
        };
        let Some(bytes) = region.slice_mut(0, handle.size()) else {
            return false;
        };
        f(bytes);
        true
    }
}

impl Backing for HeapAllocator {
    fn acquire(&self, size: usize) -> Option<Region> {
        self.with_state(|state| {
            let region = self.reserve(state, size)?;
            let overhead = region.reserved() - region.len();
            state.stats.record_alloc(region.len(), overhead, Origin::Backing);
            Some(region)
        })
        .flatten()
    }

    fn release(&self, region: Region) {
        let len = region.len();
        let released = self.with_state(|state| {
            let overhead = region.reserved() - region.len();
            state.reserved -= region.reserved();
            state.stats.record_free(region.len(), overhead, Origin::Backing);
        });
        if released.is_none() {
            debug_assert!(
                false,
                "HeapAllocator: region released from inside an access callback"
            );
            tracing::error!(len, "region released from inside an access callback");
        }
    }
}
