//! # Memory Handles
//!
//! A [`MemoryHandle`] describes one allocation: which allocator produced it,
//! where it lives inside that allocator's memory, and how large it is.
//!
//! Handles are move-only. [`Allocator::deallocate`](crate::Allocator::deallocate)
//! takes the handle by value, so a handle cannot be freed twice without first
//! being reconstructed by hand.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identity of one allocator instance.
///
/// Every primitive draws a fresh id at construction, so a handle's owner
/// matches exactly one live instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AllocatorId(NonZeroU64);

impl AllocatorId {
    /// Draws the next id from the global counter.
    #[must_use]
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let raw = COUNTER.fetch_add(1, Ordering::Relaxed);
        // Starts at 1 and a u64 never wraps in practice.
        Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    /// Raw id value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

/// Who asked for an allocation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Ordinary user data.
    #[default]
    Payload,
    /// Memory an allocator requested for its own bookkeeping.
    Backing,
}

/// Description of a single allocation.
///
/// An empty handle ([`MemoryHandle::EMPTY`]) means "no allocation" and has no
/// owner. Check [`MemoryHandle::is_valid`] before use.
#[must_use = "a valid handle must be returned to its allocator"]
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MemoryHandle {
    owner: Option<AllocatorId>,
    offset: usize,
    size: usize,
    align: usize,
    origin: Origin,
}

impl MemoryHandle {
    /// The empty handle returned on allocation failure.
    pub const EMPTY: Self = Self {
        owner: None,
        offset: 0,
        size: 0,
        align: 0,
        origin: Origin::Payload,
    };

    #[inline]
    pub(crate) const fn new(
        owner: AllocatorId,
        offset: usize,
        size: usize,
        align: usize,
        origin: Origin,
    ) -> Self {
        Self {
            owner: Some(owner),
            offset,
            size,
            align,
            origin,
        }
    }

    /// Returns true if this handle describes a live allocation.
    #[inline]
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.owner.is_some()
    }

    /// Returns true for the empty handle.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.owner.is_none()
    }

    /// Identity of the allocator instance that produced this handle.
    #[inline]
    #[must_use]
    pub const fn owner(&self) -> Option<AllocatorId> {
        self.owner
    }

    /// Offset of the first byte inside the owner's memory.
    ///
    /// For the heap strategy this is the address of the system allocation.
    #[inline]
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Requested size in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Requested alignment in bytes.
    #[inline]
    #[must_use]
    pub const fn align(&self) -> usize {
        self.align
    }

    /// One past the last byte of the allocation.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> usize {
        self.offset + self.size
    }

    /// Origin flag used to tag statistics.
    #[inline]
    #[must_use]
    pub const fn origin(&self) -> Origin {
        self.origin
    }

    /// Returns true if the allocation was made for allocator bookkeeping.
    #[inline]
    #[must_use]
    pub const fn is_backing(&self) -> bool {
        matches!(self.origin, Origin::Backing)
    }

    /// Returns true if both handles come from the same instance and their
    /// byte ranges intersect.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.is_valid()
            && self.owner == other.owner
            && self.offset < other.end()
            && other.offset < self.end()
    }
}
