//! # Backing Regions
//!
//! A [`Region`] is an owned, zeroed block of memory whose base address sits on
//! a cache-line boundary. Fixed-capacity strategies carve their allocations
//! out of one region, so an offset aligned to `N <= MAX_ALIGN` is also an
//! address aligned to `N`.

use std::cell::RefCell;

use bytemuck::{Pod, Zeroable};

/// Largest alignment any strategy honours (one cache line).
pub const MAX_ALIGN: usize = 64;

/// Smallest granularity used for block strides.
pub const MIN_ALIGN: usize = 8;

/// One cache line of raw bytes.
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C, align(64))]
struct CacheLine([u8; MAX_ALIGN]);

/// Rounds `value` up to the next multiple of `align` (a power of two).
#[inline]
#[must_use]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Owned, cache-line aligned memory handed to a strategy.
pub struct Region {
    lines: Box<[CacheLine]>,
    len: usize,
}

impl Region {
    /// Allocates a zeroed region of `len` bytes from the system allocator.
    ///
    /// Returns `None` if the system refuses the memory instead of aborting.
    #[must_use]
    pub fn zeroed(len: usize) -> Option<Self> {
        let count = len.div_ceil(MAX_ALIGN);
        let mut lines = Vec::new();
        lines.try_reserve_exact(count).ok()?;
        lines.resize(count, CacheLine::zeroed());
        Some(Self {
            lines: lines.into_boxed_slice(),
            len,
        })
    }

    /// Usable length in bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true for a zero-length region.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes actually reserved from the system, including line rounding.
    #[inline]
    #[must_use]
    pub fn reserved(&self) -> usize {
        self.lines.len() * MAX_ALIGN
    }

    /// Address of the first byte.
    #[inline]
    #[must_use]
    pub fn base_addr(&self) -> usize {
        self.lines.as_ptr() as usize
    }

    /// The whole usable region.
    #[inline]
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<CacheLine, u8>(&self.lines[..])[..self.len]
    }

    /// The whole usable region, mutably.
    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<CacheLine, u8>(&mut self.lines[..])[..self.len]
    }

    /// `len` bytes starting at `offset`, if they lie inside the region.
    #[inline]
    pub fn slice_mut(&mut self, offset: usize, len: usize) -> Option<&mut [u8]> {
        let end = offset.checked_add(len)?;
        self.bytes_mut().get_mut(offset..end)
    }

    /// Returns true if `[offset, offset + len)` lies inside the region.
    #[inline]
    #[must_use]
    pub const fn contains(&self, offset: usize, len: usize) -> bool {
        match offset.checked_add(len) {
            Some(end) => end <= self.len,
            None => false,
        }
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("base", &format_args!("{:#x}", self.base_addr()))
            .field("len", &self.len)
            .finish()
    }
}

/// A strategy's region, borrowed only while caller code reads or writes
/// allocation bytes.
///
/// Bookkeeping lives in a separate cell, so code running inside
/// [`RegionCell::access`] may still allocate, free or query ownership on the
/// same strategy. A nested `access` is refused instead of panicking.
pub(crate) struct RegionCell {
    len: usize,
    region: RefCell<Region>,
}

impl RegionCell {
    pub(crate) fn new(region: Region) -> Self {
        Self {
            len: region.len(),
            region: RefCell::new(region),
        }
    }

    /// Usable length in bytes.
    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    /// Runs `f` over `len` bytes at `offset`.
    ///
    /// Returns false if the range lies outside the region or an enclosing
    /// `access` already holds it.
    pub(crate) fn access(&self, offset: usize, len: usize, f: &mut dyn FnMut(&mut [u8])) -> bool {
        let Ok(mut region) = self.region.try_borrow_mut() else {
            tracing::trace!(offset, len, "region busy with an enclosing access");
            return false;
        };
        match region.slice_mut(offset, len) {
            Some(bytes) => {
                f(bytes);
                true
            }
            None => false,
        }
    }

    pub(crate) fn into_inner(self) -> Region {
        self.region.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_is_cache_line_aligned() {
        let region = Region::zeroed(100).unwrap();
        assert_eq!(region.base_addr() % MAX_ALIGN, 0);
        assert_eq!(region.len(), 100);
        assert_eq!(region.reserved(), 128);
        assert!(region.bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_region_slices() {
        let mut region = Region::zeroed(64).unwrap();
        region.slice_mut(8, 4).unwrap().copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(&region.bytes()[8..12], &[1, 2, 3, 4]);
        assert!(region.slice_mut(60, 8).is_none());
        assert!(region.contains(0, 64));
        assert!(!region.contains(1, 64));
        assert!(!region.contains(usize::MAX, 2));
    }

    #[test]
    fn test_region_cell_refuses_nested_access() {
        let cell = RegionCell::new(Region::zeroed(64).unwrap());
        assert_eq!(cell.len(), 64);

        let mut nested = None;
        assert!(cell.access(0, 8, &mut |outer| {
            outer.fill(1);
            nested = Some(cell.access(8, 8, &mut |_| {}));
        }));
        assert_eq!(nested, Some(false));

        assert!(!cell.access(60, 8, &mut |_| {}));
        assert_eq!(&cell.into_inner().bytes()[..9], &[1, 1, 1, 1, 1, 1, 1, 1, 0]);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(64, 64), 64);
        assert_eq!(align_up(65, 16), 80);
    }
}
