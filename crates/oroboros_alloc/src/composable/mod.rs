//! # Composable Arenas
//!
//! Arenas built out of other allocators.
//!
//! - [`ExpandableArena`]: grows by appending strategy instances, one lock
//! - [`FallbackArena`]: primary allocator with a secondary to spill into

mod expandable;
mod fallback;

pub use expandable::ExpandableArena;
pub use fallback::FallbackArena;
