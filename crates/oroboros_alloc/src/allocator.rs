//! # Allocator Contract
//!
//! Every strategy and every arena implements [`Allocator`]. Composables are
//! generic over it, so nesting costs no dynamic dispatch; `Box<dyn Allocator>`
//! is available when heterogeneous strategies must share a container.
//!
//! ## Thread Safety
//!
//! The contract itself promises nothing. Primitives keep their state in
//! single-threaded cells (`Send`, not `Sync`); arenas add a lock.

use std::sync::Arc;

use crate::error::{AllocError, AllocResult};
use crate::handle::{AllocatorId, MemoryHandle, Origin};
use crate::region::Region;
use crate::stats::AllocStats;

/// The uniform allocator contract.
pub trait Allocator {
    /// Allocates `size` bytes aligned to `align`, tagged with `origin`.
    ///
    /// This is the diagnostic form: the error names why nothing was handed
    /// out. No state changes on failure.
    fn try_allocate_raw(
        &self,
        size: usize,
        align: usize,
        origin: Origin,
    ) -> AllocResult<MemoryHandle>;

    /// Returns an allocation to this allocator, consuming the handle.
    ///
    /// A handle this allocator does not own is a caller bug: debug builds
    /// assert, release builds log and ignore it.
    fn deallocate(&self, handle: MemoryHandle);

    /// Returns true if `handle` was produced by this allocator and lies inside
    /// the memory it manages.
    fn owns(&self, handle: &MemoryHandle) -> bool;

    /// Snapshot of the usage counters.
    fn stats(&self) -> AllocStats;

    /// Runs `f` over exactly the bytes described by `handle`.
    ///
    /// Returns false, without calling `f`, if the handle is not owned here.
    ///
    /// `f` may call back into the same allocator. A nested `access` that
    /// would alias bytes an enclosing call already holds returns false
    /// instead of panicking or blocking; [`Allocator::copy`] moves bytes
    /// between two allocations without nesting. The heap and the expandable
    /// arena also refuse to allocate or free from inside `f`.
    fn access(&self, handle: &MemoryHandle, f: &mut dyn FnMut(&mut [u8])) -> bool;

    /// Allocates payload memory, returning the error on failure.
    #[inline]
    fn try_allocate(&self, size: usize, align: usize) -> AllocResult<MemoryHandle> {
        self.try_allocate_raw(size, align, Origin::Payload)
    }

    /// Allocates payload memory, returning [`MemoryHandle::EMPTY`] on failure.
    #[inline]
    fn allocate(&self, size: usize, align: usize) -> MemoryHandle {
        empty_on_failure(self.try_allocate_raw(size, align, Origin::Payload))
    }

    /// Allocates bookkeeping memory, returning [`MemoryHandle::EMPTY`] on
    /// failure.
    #[inline]
    fn allocate_backing(&self, size: usize, align: usize) -> MemoryHandle {
        empty_on_failure(self.try_allocate_raw(size, align, Origin::Backing))
    }

    /// Frees `handle` only if this allocator owns it.
    ///
    /// Unlike [`Allocator::deallocate`] a foreign handle is reported instead
    /// of asserted on.
    fn checked_deallocate(&self, handle: MemoryHandle) -> AllocResult<()> {
        if self.owns(&handle) {
            self.deallocate(handle);
            Ok(())
        } else {
            Err(AllocError::InvalidOwnership {
                owner: handle.owner(),
            })
        }
    }

    /// Copies the bytes of `src` to the start of `dst`.
    ///
    /// Returns false, leaving `dst` untouched, if either handle is not owned
    /// here or `dst` is smaller than `src`.
    fn copy(&self, src: &MemoryHandle, dst: &MemoryHandle) -> bool {
        if dst.size() < src.size() {
            return false;
        }
        let mut staged = Vec::new();
        if !self.access(src, &mut |bytes| staged.extend_from_slice(bytes)) {
            return false;
        }
        self.access(dst, &mut |bytes| bytes[..staged.len()].copy_from_slice(&staged))
    }

    /// Runs `f` over the handle's bytes and returns its result.
    fn with_bytes<R, F>(&self, handle: &MemoryHandle, f: F) -> Option<R>
    where
        Self: Sized,
        F: FnOnce(&mut [u8]) -> R,
    {
        let mut f = Some(f);
        let mut result = None;
        self.access(handle, &mut |bytes| {
            if let Some(f) = f.take() {
                result = Some(f(bytes));
            }
        });
        result
    }
}

/// A strategy that an [`ExpandableArena`](crate::ExpandableArena) can build
/// on demand from a region supplied by its backing.
pub trait Growable: Allocator + Send + Sized {
    /// Construction parameters shared by every instance of one arena.
    type Config: Clone + Send + Sync;

    /// Identity stamped into the handles this instance produces.
    fn id(&self) -> AllocatorId;

    /// Rejects configurations no instance could be built from.
    fn validate(config: &Self::Config) -> AllocResult<()>;

    /// Region size one instance needs.
    fn region_size(config: &Self::Config) -> usize;

    /// Builds a fresh instance over `region`.
    ///
    /// On failure the region is handed back so it can be released.
    fn from_region(config: &Self::Config, region: Region) -> Result<Self, (AllocError, Region)>;

    /// Tears the instance down and returns its region.
    fn into_region(self) -> Region;
}

/// Source of regions for arenas.
///
/// Only arena bookkeeping flows through a backing: the regions that new
/// strategy instances manage.
pub trait Backing: Send + Sync {
    /// Reserves a zeroed region of `size` bytes.
    fn acquire(&self, size: usize) -> Option<Region>;

    /// Gives a region back.
    fn release(&self, region: Region);
}

/// Maps a diagnostic result onto the empty-handle convention.
#[inline]
fn empty_on_failure(result: AllocResult<MemoryHandle>) -> MemoryHandle {
    result.unwrap_or_else(|error| {
        tracing::trace!(code = error.code(), %error, "allocation failed");
        MemoryHandle::EMPTY
    })
}

/// Checks the request shape shared by every strategy.
#[inline]
pub(crate) fn validate_request(size: usize, align: usize, max_align: usize) -> AllocResult<()> {
    if size == 0 {
        return Err(AllocError::ZeroSize);
    }
    if !align.is_power_of_two() || align > max_align {
        return Err(AllocError::AlignmentViolation {
            align,
            max: max_align,
        });
    }
    Ok(())
}

/// Reports a handle presented to the wrong allocator.
#[cold]
pub(crate) fn foreign_handle(allocator: &'static str, handle: &MemoryHandle) {
    debug_assert!(
        false,
        "{allocator}: handle owned by {:?} freed through the wrong allocator",
        handle.owner()
    );
    tracing::error!(allocator, owner = ?handle.owner(), "foreign handle ignored");
}

/// Reports a free attempted from inside an `access` callback on the same
/// allocator.
#[cold]
pub(crate) fn reentrant_free(allocator: &'static str, handle: &MemoryHandle) {
    debug_assert!(false, "{allocator}: free from inside an access callback");
    tracing::error!(
        allocator,
        offset = handle.offset(),
        "free from inside an access callback ignored"
    );
}

impl<A: Allocator + ?Sized> Allocator for &A {
    #[inline]
    fn try_allocate_raw(
        &self,
        size: usize,
        align: usize,
        origin: Origin,
    ) -> AllocResult<MemoryHandle> {
        (**self).try_allocate_raw(size, align, origin)
    }

    #[inline]
    fn deallocate(&self, handle: MemoryHandle) {
        (**self).deallocate(handle);
    }

    #[inline]
    fn owns(&self, handle: &MemoryHandle) -> bool {
        (**self).owns(handle)
    }

    #[inline]
    fn stats(&self) -> AllocStats {
        (**self).stats()
    }

    #[inline]
    fn access(&self, handle: &MemoryHandle, f: &mut dyn FnMut(&mut [u8])) -> bool {
        (**self).access(handle, f)
    }
}

impl<A: Allocator + ?Sized> Allocator for Box<A> {
    #[inline]
    fn try_allocate_raw(
        &self,
        size: usize,
        align: usize,
        origin: Origin,
    ) -> AllocResult<MemoryHandle> {
        (**self).try_allocate_raw(size, align, origin)
    }

    #[inline]
    fn deallocate(&self, handle: MemoryHandle) {
        (**self).deallocate(handle);
    }

    #[inline]
    fn owns(&self, handle: &MemoryHandle) -> bool {
        (**self).owns(handle)
    }

    #[inline]
    fn stats(&self) -> AllocStats {
        (**self).stats()
    }

    #[inline]
    fn access(&self, handle: &MemoryHandle, f: &mut dyn FnMut(&mut [u8])) -> bool {
        (**self).access(handle, f)
    }
}

impl<A: Allocator + ?Sized> Allocator for Arc<A> {
    #[inline]
    fn try_allocate_raw(
        &self,
        size: usize,
        align: usize,
        origin: Origin,
    ) -> AllocResult<MemoryHandle> {
        (**self).try_allocate_raw(size, align, origin)
    }

    #[inline]
    fn deallocate(&self, handle: MemoryHandle) {
        (**self).deallocate(handle);
    }

    #[inline]
    fn owns(&self, handle: &MemoryHandle) -> bool {
        (**self).owns(handle)
    }

    #[inline]
    fn stats(&self) -> AllocStats {
        (**self).stats()
    }

    #[inline]
    fn access(&self, handle: &MemoryHandle, f: &mut dyn FnMut(&mut [u8])) -> bool {
        (**self).access(handle, f)
    }
}
