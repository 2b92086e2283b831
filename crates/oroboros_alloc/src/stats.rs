//! # Allocation Statistics
//!
//! Usage counters kept per allocator and aggregated per arena, plus
//! free-space fragmentation reports.
//!
//! Recording compiles to nothing unless the `stats` feature is enabled; without
//! it usage snapshots are always zeroed. Fragmentation reports are computed on
//! demand and do not depend on the feature.

use std::fmt;
use std::ops::Add;

use crate::handle::Origin;

/// Counters for one origin class.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UsageCounters {
    /// Bytes currently handed out.
    pub current_used: usize,
    /// High-water mark of `current_used`.
    pub peak_used: usize,
    /// Bytes currently lost to padding, rounding or block granularity.
    pub current_overhead: usize,
    /// High-water mark of `current_overhead`.
    pub peak_overhead: usize,
}

impl UsageCounters {
    #[inline]
    fn grow(&mut self, used: usize, overhead: usize) {
        self.current_used += used;
        self.current_overhead += overhead;
        self.peak_used = self.peak_used.max(self.current_used);
        self.peak_overhead = self.peak_overhead.max(self.current_overhead);
    }

    #[inline]
    fn shrink(&mut self, used: usize, overhead: usize) {
        debug_assert!(self.current_used >= used, "stats underflow (used)");
        debug_assert!(self.current_overhead >= overhead, "stats underflow (overhead)");
        self.current_used = self.current_used.saturating_sub(used);
        self.current_overhead = self.current_overhead.saturating_sub(overhead);
    }
}

impl Add for UsageCounters {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            current_used: self.current_used + rhs.current_used,
            peak_used: self.peak_used + rhs.peak_used,
            current_overhead: self.current_overhead + rhs.current_overhead,
            peak_overhead: self.peak_overhead + rhs.peak_overhead,
        }
    }
}

/// Snapshot of an allocator's counters, split by [`Origin`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocStats {
    /// Counters for user allocations.
    pub payload: UsageCounters,
    /// Counters for allocator bookkeeping.
    pub backing: UsageCounters,
}

impl AllocStats {
    /// Returns true when statistics are compiled in.
    #[inline]
    #[must_use]
    pub const fn enabled() -> bool {
        cfg!(feature = "stats")
    }

    /// Counters for one origin.
    #[inline]
    #[must_use]
    pub const fn for_origin(&self, origin: Origin) -> &UsageCounters {
        match origin {
            Origin::Payload => &self.payload,
            Origin::Backing => &self.backing,
        }
    }

    #[inline]
    fn for_origin_mut(&mut self, origin: Origin) -> &mut UsageCounters {
        match origin {
            Origin::Payload => &mut self.payload,
            Origin::Backing => &mut self.backing,
        }
    }

    /// Records an allocation of `used` bytes that cost `overhead` extra bytes.
    #[inline]
    pub fn record_alloc(&mut self, used: usize, overhead: usize, origin: Origin) {
        if Self::enabled() {
            self.for_origin_mut(origin).grow(used, overhead);
        }
    }

    /// Records the release of an allocation previously passed to
    /// [`AllocStats::record_alloc`].
    #[inline]
    pub fn record_free(&mut self, used: usize, overhead: usize, origin: Origin) {
        if Self::enabled() {
            self.for_origin_mut(origin).shrink(used, overhead);
        }
    }

    /// Folds the change between two snapshots of a child allocator into this
    /// aggregate, for the given origin only.
    pub fn absorb(&mut self, before: &Self, after: &Self, origin: Origin) {
        if !Self::enabled() {
            return;
        }
        let before = before.for_origin(origin);
        let after = after.for_origin(origin);
        let target = self.for_origin_mut(origin);

        let used_up = after.current_used.saturating_sub(before.current_used);
        let over_up = after.current_overhead.saturating_sub(before.current_overhead);
        target.grow(used_up, over_up);

        let used_down = before.current_used.saturating_sub(after.current_used);
        let over_down = before.current_overhead.saturating_sub(after.current_overhead);
        target.shrink(used_down, over_down);
    }

    /// Drops current usage to zero for both origins, keeping the peaks.
    ///
    /// Used by bulk resets that invalidate every outstanding handle.
    #[inline]
    pub fn clear_current(&mut self) {
        for counters in [&mut self.payload, &mut self.backing] {
            counters.current_used = 0;
            counters.current_overhead = 0;
        }
    }

    /// Sum of both origins' current usage.
    #[inline]
    #[must_use]
    pub const fn total_used(&self) -> usize {
        self.payload.current_used + self.backing.current_used
    }
}

impl Add for AllocStats {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            payload: self.payload + rhs.payload,
            backing: self.backing + rhs.backing,
        }
    }
}

/// Shape of an allocator's free space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FragmentationStats {
    /// Total free bytes across all fragments.
    pub total_free: usize,
    /// Size of the largest contiguous free block in bytes.
    pub largest_block: usize,
    /// Number of distinct free fragments.
    pub fragment_count: usize,
    /// External fragmentation, `100 * (1 - largest_block / total_free)`.
    pub fragmentation_percent: u8,
}

impl FragmentationStats {
    /// Builds a report from free-space measurements.
    #[must_use]
    pub fn calculate(total_free: usize, largest_block: usize, fragment_count: usize) -> Self {
        let fragmentation_percent = if total_free == 0 {
            0
        } else {
            let wasted = total_free - largest_block.min(total_free);
            let percent = wasted
                .checked_mul(100)
                .map_or_else(|| wasted / (total_free / 100), |scaled| scaled / total_free);
            u8::try_from(percent.min(100)).unwrap_or(100)
        };

        Self {
            total_free,
            largest_block,
            fragment_count,
            fragmentation_percent,
        }
    }

    /// Returns true when more than half of the free space is unusable for a
    /// request of the largest block's size.
    #[inline]
    #[must_use]
    pub const fn is_fragmented(&self) -> bool {
        self.fragmentation_percent > 50
    }
}

impl fmt::Display for FragmentationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes free in {} fragments (largest {} bytes, {}% fragmented)",
            self.total_free, self.fragment_count, self.largest_block, self.fragmentation_percent
        )
    }
}

#[cfg(test)]
mod fragmentation_tests {
    use super::*;

    #[test]
    fn test_fragmentation_percent() {
        let stats = FragmentationStats::calculate(1000, 500, 5);
        assert_eq!(stats.fragmentation_percent, 50);
        assert!(!stats.is_fragmented());

        let stats = FragmentationStats::calculate(1000, 100, 10);
        assert_eq!(stats.fragmentation_percent, 90);
        assert!(stats.is_fragmented());
    }

    #[test]
    fn test_fragmentation_edges() {
        assert_eq!(FragmentationStats::calculate(0, 0, 0).fragmentation_percent, 0);
        assert_eq!(FragmentationStats::calculate(64, 64, 1).fragmentation_percent, 0);
        assert_eq!(
            FragmentationStats::calculate(usize::MAX, 0, 2).fragmentation_percent,
            100
        );
    }

    #[test]
    fn test_fragmentation_display() {
        let text = FragmentationStats::calculate(256, 128, 2).to_string();
        assert_eq!(text, "256 bytes free in 2 fragments (largest 128 bytes, 50% fragmented)");
    }
}

#[cfg(all(test, feature = "stats"))]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_free() {
        let mut stats = AllocStats::default();
        stats.record_alloc(100, 28, Origin::Payload);
        stats.record_alloc(50, 0, Origin::Backing);

        assert_eq!(stats.payload.current_used, 100);
        assert_eq!(stats.payload.current_overhead, 28);
        assert_eq!(stats.backing.current_used, 50);
        assert_eq!(stats.total_used(), 150);

        stats.record_free(100, 28, Origin::Payload);
        assert_eq!(stats.payload.current_used, 0);
        assert_eq!(stats.payload.peak_used, 100);
        assert_eq!(stats.payload.peak_overhead, 28);
    }

    #[test]
    fn test_absorb_delta() {
        let mut aggregate = AllocStats::default();
        let before = AllocStats::default();
        let mut after = before;
        after.record_alloc(64, 8, Origin::Payload);

        aggregate.absorb(&before, &after, Origin::Payload);
        assert_eq!(aggregate.payload.current_used, 64);
        assert_eq!(aggregate.payload.current_overhead, 8);

        aggregate.absorb(&after, &before, Origin::Payload);
        assert_eq!(aggregate.payload.current_used, 0);
        assert_eq!(aggregate.payload.peak_used, 64);
        assert_eq!(aggregate.backing, UsageCounters::default());
    }

    #[test]
    fn test_add_combines_counters() {
        let mut a = AllocStats::default();
        let mut b = AllocStats::default();
        a.record_alloc(10, 1, Origin::Payload);
        b.record_alloc(20, 2, Origin::Payload);

        let sum = a + b;
        assert_eq!(sum.payload.current_used, 30);
        assert_eq!(sum.payload.current_overhead, 3);
    }
}
