//! # Primitive Strategies
//!
//! Single-instance allocators. Each one owns its memory and stamps its own
//! identity into the handles it returns.
//!
//! ## Choosing a Strategy
//!
//! - Frame-scoped scratch data: [`LinearAllocator`] or [`StackAllocator`]
//! - Many objects of one size: [`PoolAllocator`] or [`BitmapAllocator`]
//! - Mixed sizes with frequent frees: [`BuddyAllocator`] or [`FreeListAllocator`]
//! - Anything else, and backing for arenas: [`HeapAllocator`]

mod bitmap;
mod buddy;
mod free_list;
mod heap;
mod linear;
mod pool;
mod stack;

pub use bitmap::{BitmapAllocator, BitmapConfig};
pub use buddy::{BuddyAllocator, BuddyConfig};
pub use free_list::{FitPolicy, FreeListAllocator, FreeListConfig};
pub use heap::HeapAllocator;
pub use linear::{LinearAllocator, LinearConfig};
pub use pool::{PoolAllocator, PoolConfig};
pub use stack::{StackAllocator, StackConfig, StackMarker};
