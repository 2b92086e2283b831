//! # OROBOROS Alloc
//!
//! Composable allocation strategies behind one allocator contract:
//! - Move-only [`MemoryHandle`]s that name their owning allocator
//! - Seven primitive strategies over fixed, cache-line aligned regions
//! - Arenas that grow on demand or fall back to a second allocator
//!
//! ## Architecture Rules
//!
//! 1. **Failure is a value** - Allocation failure is an empty handle, never a panic
//! 2. **Locks live in arenas** - Primitives are `Send` but not `Sync`
//! 3. **Stats are optional** - The `stats` feature compiles counters in or out
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use oroboros_alloc::{Allocator, ExpandableArena, HeapAllocator, PoolAllocator, PoolConfig};
//!
//! let arena = ExpandableArena::<PoolAllocator>::new(
//!     Arc::new(HeapAllocator::new()),
//!     PoolConfig { block_size: 64, block_count: 4 },
//! )?;
//!
//! let handles: Vec<_> = (0..5).map(|_| arena.allocate(64, 8)).collect();
//! assert_eq!(arena.instance_count(), 2);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod allocator;
pub mod composable;
pub mod config;
pub mod error;
pub mod handle;
pub mod primitives;
pub mod region;
pub mod stats;

pub use allocator::{Allocator, Backing, Growable};
pub use composable::{ExpandableArena, FallbackArena};
pub use config::ArenaConfig;
pub use error::{AllocError, AllocResult};
pub use handle::{AllocatorId, MemoryHandle, Origin};
pub use primitives::{
    BitmapAllocator, BitmapConfig, BuddyAllocator, BuddyConfig, FitPolicy, FreeListAllocator,
    FreeListConfig, HeapAllocator, LinearAllocator, LinearConfig, PoolAllocator, PoolConfig,
    StackAllocator, StackConfig, StackMarker,
};
pub use region::{Region, MAX_ALIGN, MIN_ALIGN};
pub use stats::{AllocStats, FragmentationStats, UsageCounters};
