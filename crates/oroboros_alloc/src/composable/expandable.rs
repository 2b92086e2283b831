//! # Expandable Arena
//!
//! A growable collection of strategy instances behind one lock. When every
//! instance refuses a request, the arena takes a region from its backing,
//! builds one more instance over it and retries there.
//!
//! Instances are never removed or compacted, so everything an instance hands
//! out stays put for the arena's lifetime.
//!
//! The lock is re-entrant: an `access` callback may reach allocations in
//! other instances of the same arena. Allocating or freeing from inside a
//! callback is refused.

use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::ReentrantMutex;

use crate::allocator::{
    foreign_handle, reentrant_free, validate_request, Allocator, Backing, Growable,
};
use crate::config::ArenaConfig;
use crate::error::{AllocError, AllocResult};
use crate::handle::{AllocatorId, MemoryHandle, Origin};
use crate::region::MAX_ALIGN;
use crate::stats::AllocStats;

struct ArenaState<S> {
    /// Instances in creation order.
    instances: Vec<S>,
    /// Aggregate of every instance's counters.
    stats: AllocStats,
    growth_events: usize,
}

/// A thread-safe arena that grows by appending strategy instances.
///
/// # Example
///
/// ```rust,ignore
/// let backing = Arc::new(HeapAllocator::new());
/// let arena = ExpandableArena::<PoolAllocator>::new(
///     backing,
///     PoolConfig { block_size: 64, block_count: 1024 },
/// )?;
///
/// let handle = arena.allocate(48, 16);
/// arena.deallocate(handle);
/// ```
pub struct ExpandableArena<S: Growable> {
    name: String,
    max_instances: Option<usize>,
    strategy: S::Config,
    backing: Arc<dyn Backing>,
    state: ReentrantMutex<RefCell<ArenaState<S>>>,
}

impl<S: Growable> ExpandableArena<S> {
    /// Creates an empty, unbounded arena.
    ///
    /// The first allocation builds the first instance.
    pub fn new(backing: Arc<dyn Backing>, strategy: S::Config) -> AllocResult<Self> {
        Self::with_config(backing, ArenaConfig::new(strategy))
    }

    /// Creates an empty arena from a full configuration.
    pub fn with_config(
        backing: Arc<dyn Backing>,
        config: ArenaConfig<S::Config>,
    ) -> AllocResult<Self> {
        S::validate(&config.strategy)?;
        if config.max_instances == Some(0) {
            return Err(AllocError::invalid_config(
                "arena max_instances must be at least 1",
            ));
        }

        Ok(Self {
            name: config.name,
            max_instances: config.max_instances,
            strategy: config.strategy,
            backing,
            state: ReentrantMutex::new(RefCell::new(ArenaState {
                instances: Vec::new(),
                stats: AllocStats::default(),
                growth_events: 0,
            })),
        })
    }

    /// Label used in log output.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured instance cap.
    #[must_use]
    pub const fn max_instances(&self) -> Option<usize> {
        self.max_instances
    }

    /// Configuration every instance is built from.
    #[must_use]
    pub const fn strategy_config(&self) -> &S::Config {
        &self.strategy
    }

    /// Number of strategy instances.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.state.lock().borrow().instances.len()
    }

    /// Identities of the instances, in creation order.
    #[must_use]
    pub fn instance_ids(&self) -> Vec<AllocatorId> {
        self.state
            .lock()
            .borrow()
            .instances
            .iter()
            .map(Growable::id)
            .collect()
    }

    /// Number of instances appended after the first one.
    #[must_use]
    pub fn growth_events(&self) -> usize {
        self.state.lock().borrow().growth_events
    }

    /// Builds one more instance and serves the request from it.
    ///
    /// The instance is kept only if the allocation succeeds; otherwise its
    /// region goes straight back to the backing.
    ///
    /// `exceeded` carries the `CapacityExceeded` reported by the existing
    /// instances, if any. When growth is refused that error is returned, as
    /// a new instance could not have served the request either.
    fn grow(
        &self,
        state: &mut ArenaState<S>,
        size: usize,
        align: usize,
        origin: Origin,
        exceeded: Option<AllocError>,
    ) -> AllocResult<MemoryHandle> {
        let out_of_capacity = exceeded.unwrap_or(AllocError::OutOfCapacity { size, align });

        if let Some(max) = self.max_instances {
            if state.instances.len() >= max {
                tracing::warn!(arena = %self.name, max, "arena reached its instance limit");
                return Err(out_of_capacity);
            }
        }
        if state.instances.try_reserve(1).is_err() {
            return Err(out_of_capacity);
        }

        let region_size = S::region_size(&self.strategy);
        let Some(region) = self.backing.acquire(region_size) else {
            tracing::warn!(arena = %self.name, region_size, "backing refused a region");
            return Err(out_of_capacity);
        };
        let instance = match S::from_region(&self.strategy, region) {
            Ok(instance) => instance,
            Err((error, region)) => {
                self.backing.release(region);
                return Err(error);
            }
        };

        let result = tracked(&instance, &mut state.stats, origin, |instance| {
            instance.try_allocate_raw(size, align, origin)
        });
        match result {
            Ok(handle) => {
                state.instances.push(instance);
                // Building the first instance is initialisation, not growth
                if state.instances.len() > 1 {
                    state.growth_events += 1;
                }
                tracing::debug!(
                    arena = %self.name,
                    instances = state.instances.len(),
                    region_size,
                    "arena grew"
                );
                Ok(handle)
            }
            Err(error) => {
                self.backing.release(instance.into_region());
                Err(match error {
                    AllocError::OutOfCapacity { .. } => AllocError::CapacityExceeded {
                        requested: size,
                        max: region_size,
                    },
                    other => other,
                })
            }
        }
    }
}

/// Runs `op` on one instance and folds the change in its counters into the
/// arena aggregate.
#[inline]
fn tracked<S: Allocator, R>(
    instance: &S,
    aggregate: &mut AllocStats,
    origin: Origin,
    op: impl FnOnce(&S) -> R,
) -> R {
    if !AllocStats::enabled() {
        return op(instance);
    }
    let before = instance.stats();
    let result = op(instance);
    aggregate.absorb(&before, &instance.stats(), origin);
    result
}

impl<S: Growable> Allocator for ExpandableArena<S> {
    fn try_allocate_raw(
        &self,
        size: usize,
        align: usize,
        origin: Origin,
    ) -> AllocResult<MemoryHandle> {
        validate_request(size, align, MAX_ALIGN)?;

        let guard = self.state.lock();
        let Ok(mut cell) = guard.try_borrow_mut() else {
            tracing::debug!(
                arena = %self.name,
                "allocation from inside an access callback refused"
            );
            return Err(AllocError::OutOfCapacity { size, align });
        };
        let state = &mut *cell;

        let mut exceeded = None;
        for instance in &state.instances {
            let result = tracked(instance, &mut state.stats, origin, |instance| {
                instance.try_allocate_raw(size, align, origin)
            });
            match result {
                Ok(handle) => return Ok(handle),
                Err(AllocError::OutOfCapacity { .. }) => {}
                Err(error @ AllocError::CapacityExceeded { .. }) => exceeded = Some(error),
                // Every instance shares one config, so the rest would agree
                Err(error) => return Err(error),
            }
        }

        self.grow(state, size, align, origin, exceeded)
    }

    fn deallocate(&self, handle: MemoryHandle) {
        let guard = self.state.lock();
        let Ok(mut cell) = guard.try_borrow_mut() else {
            reentrant_free("ExpandableArena", &handle);
            return;
        };
        let state = &mut *cell;

        let Some(index) = state
            .instances
            .iter()
            .position(|instance| instance.owns(&handle))
        else {
            drop(cell);
            drop(guard);
            foreign_handle("ExpandableArena", &handle);
            return;
        };

        let origin = handle.origin();
        tracked(&state.instances[index], &mut state.stats, origin, |instance| {
            instance.deallocate(handle);
        });
    }

    fn owns(&self, handle: &MemoryHandle) -> bool {
        let guard = self.state.lock();
        let Ok(state) = guard.try_borrow() else {
            return false;
        };
        state.instances.iter().any(|instance| instance.owns(handle))
    }

    fn stats(&self) -> AllocStats {
        self.state.lock().borrow().stats
    }

    fn access(&self, handle: &MemoryHandle, f: &mut dyn FnMut(&mut [u8])) -> bool {
        let guard = self.state.lock();
        let Ok(state) = guard.try_borrow() else {
            return false;
        };
        state
            .instances
            .iter()
            .find(|instance| instance.owns(handle))
            .is_some_and(|instance| instance.access(handle, f))
    }
}

impl<S: Growable> Drop for ExpandableArena<S> {
    fn drop(&mut self) {
        let instances = std::mem::take(&mut self.state.lock().borrow_mut().instances);
        for instance in instances {
            self.backing.release(instance.into_region());
        }
    }
}
