//! # Fallback Arena
//!
//! A fixed pair of allocators: requests go to the primary first and spill
//! over to the secondary when the primary refuses them.

use crate::allocator::Allocator;
use crate::error::AllocResult;
use crate::handle::{MemoryHandle, Origin};
use crate::stats::AllocStats;

/// Primary allocator with a secondary to fall back on.
///
/// Adds no locking of its own: the pair is `Sync` exactly when both members
/// are.
///
/// # Example
///
/// ```rust,ignore
/// let scratch = FallbackArena::new(LinearAllocator::new(1024)?, HeapAllocator::new());
///
/// // Too large for the linear allocator, served by the heap
/// let handle = scratch.allocate(1536, 8);
/// scratch.deallocate(handle);
/// ```
pub struct FallbackArena<P, S> {
    primary: P,
    secondary: S,
}

impl<P: Allocator, S: Allocator> FallbackArena<P, S> {
    /// Pairs `primary` with `secondary`.
    #[must_use]
    pub const fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }

    /// The allocator tried first.
    #[inline]
    #[must_use]
    pub const fn primary(&self) -> &P {
        &self.primary
    }

    /// The allocator tried when the primary fails.
    #[inline]
    #[must_use]
    pub const fn secondary(&self) -> &S {
        &self.secondary
    }

    /// Splits the pair back into its members.
    #[must_use]
    pub fn into_parts(self) -> (P, S) {
        (self.primary, self.secondary)
    }
}

impl<P: Allocator, S: Allocator> Allocator for FallbackArena<P, S> {
    /// Tries the primary, then the secondary.
    ///
    /// When both refuse, the secondary's reason is returned.
    fn try_allocate_raw(
        &self,
        size: usize,
        align: usize,
        origin: Origin,
    ) -> AllocResult<MemoryHandle> {
        self.primary
            .try_allocate_raw(size, align, origin)
            .or_else(|error| {
                tracing::trace!(code = error.code(), "primary refused, falling back");
                self.secondary.try_allocate_raw(size, align, origin)
            })
    }

    fn deallocate(&self, handle: MemoryHandle) {
        if self.primary.owns(&handle) {
            self.primary.deallocate(handle);
        } else {
            self.secondary.deallocate(handle);
        }
    }

    fn owns(&self, handle: &MemoryHandle) -> bool {
        self.primary.owns(handle) || self.secondary.owns(handle)
    }

    fn stats(&self) -> AllocStats {
        self.primary.stats() + self.secondary.stats()
    }

    fn access(&self, handle: &MemoryHandle, f: &mut dyn FnMut(&mut [u8])) -> bool {
        if self.primary.owns(handle) {
            self.primary.access(handle, f)
        } else {
            self.secondary.access(handle, f)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AllocError;
    use crate::primitives::{HeapAllocator, LinearAllocator, PoolAllocator};

    #[test]
    fn test_fallback_spills_to_secondary() {
        let arena = FallbackArena::new(LinearAllocator::new(1024).unwrap(), HeapAllocator::new());

        let small = arena.allocate(512, 8);
        assert!(arena.primary().owns(&small));

        let large = arena.allocate(1536, 8);
        assert!(large.is_valid());
        assert!(!arena.primary().owns(&large));
        assert!(arena.secondary().owns(&large));
        assert!(arena.owns(&large));

        arena.deallocate(large);
        assert_eq!(arena.secondary().live_allocations(), 0);
        arena.deallocate(small);
    }

    #[test]
    fn test_both_refuse() {
        let arena = FallbackArena::new(
            PoolAllocator::new(32, 1).unwrap(),
            PoolAllocator::new(32, 1).unwrap(),
        );
        let a = arena.allocate(32, 8);
        let b = arena.allocate(32, 8);
        assert_eq!(
            arena.try_allocate(32, 8),
            Err(AllocError::OutOfCapacity { size: 32, align: 8 })
        );

        // `b` came from the secondary and must be routed there
        assert!(arena.secondary().owns(&b));
        arena.deallocate(b);
        assert_eq!(arena.secondary().free_count(), 1);
        arena.deallocate(a);
        assert_eq!(arena.primary().free_count(), 1);
    }

    #[test]
    fn test_access_routes_to_owner() {
        let arena = FallbackArena::new(LinearAllocator::new(64).unwrap(), HeapAllocator::new());
        let spilled = arena.allocate(128, 8);
        assert_eq!(
            arena.with_bytes(&spilled, |bytes| {
                bytes[127] = 9;
                bytes.len()
            }),
            Some(128)
        );
        assert_eq!(arena.with_bytes(&spilled, |bytes| bytes[127]), Some(9));
        arena.deallocate(spilled);
    }

    #[test]
    fn test_fallbacks_nest() {
        let inner = FallbackArena::new(
            PoolAllocator::new(16, 1).unwrap(),
            PoolAllocator::new(64, 1).unwrap(),
        );
        let outer = FallbackArena::new(inner, HeapAllocator::new());

        let a = outer.allocate(16, 8);
        let b = outer.allocate(16, 8);
        let c = outer.allocate(16, 8);
        assert!(outer.primary().primary().owns(&a));
        assert!(outer.primary().secondary().owns(&b));
        assert!(outer.secondary().owns(&c));

        outer.deallocate(c);
        outer.deallocate(b);
        outer.deallocate(a);
        let (inner, heap) = outer.into_parts();
        assert_eq!(heap.live_allocations(), 0);
        assert_eq!(inner.primary().free_count(), 1);
    }

    #[cfg(feature = "stats")]
    #[test]
    fn test_fallback_stats_combine() {
        let arena = FallbackArena::new(LinearAllocator::new(64).unwrap(), HeapAllocator::new());
        let a = arena.allocate(64, 8);
        let b = arena.allocate(64, 8);
        assert_eq!(arena.stats().payload.current_used, 128);

        arena.deallocate(b);
        arena.deallocate(a);
        assert_eq!(arena.stats().payload.current_used, 0);
    }
}
