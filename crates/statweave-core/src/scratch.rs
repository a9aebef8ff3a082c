//! Per-batch scratch arena ([`WorldData`]).
//!
//! Every mutation walks the observer graph and folds modifier terms. The
//! buffers for that work are allocated once per batch, sized from the number
//! of entities the batch processes, and cleared (not freed) after each
//! operation.

use std::collections::HashSet;
use std::ops::{Deref, DerefMut};

use crate::accessor::StatAccessor;
use crate::modifier::ModifierTerms;
use crate::stat::StatHandle;
use crate::storage::WorldBinding;

/// One frame of the iterative observer walk: the stat being expanded and the
/// next observer entry of its entity to look at.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WalkFrame {
    pub(crate) handle: StatHandle,
    pub(crate) next_observer: usize,
}

/// Working buffers shared by all evaluator operations.
#[derive(Debug, Default)]
pub(crate) struct Scratch {
    pub(crate) visited: HashSet<StatHandle>,
    pub(crate) on_stack: HashSet<StatHandle>,
    pub(crate) stack: Vec<WalkFrame>,
    /// Stats to recompute, in dependency order once the walk is finished.
    pub(crate) order: Vec<StatHandle>,
    pub(crate) terms: ModifierTerms,
}

impl Scratch {
    pub(crate) fn with_capacity(count: usize) -> Self {
        Self {
            visited: HashSet::with_capacity(count),
            on_stack: HashSet::with_capacity(count),
            stack: Vec::with_capacity(count),
            order: Vec::with_capacity(count),
            terms: ModifierTerms::with_capacity(count),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.visited.clear();
        self.on_stack.clear();
        self.stack.clear();
        self.order.clear();
        self.terms.clear();
    }
}

/// Clears the scratch when an operation ends, on every return path.
pub(crate) struct ScratchGuard<'a> {
    scratch: &'a mut Scratch,
    capacity_hint: usize,
}

impl<'a> ScratchGuard<'a> {
    pub(crate) fn new(scratch: &'a mut Scratch, capacity_hint: usize) -> Self {
        scratch.clear();
        Self {
            scratch,
            capacity_hint,
        }
    }
}

impl Deref for ScratchGuard<'_> {
    type Target = Scratch;

    fn deref(&self) -> &Scratch {
        self.scratch
    }
}

impl DerefMut for ScratchGuard<'_> {
    fn deref_mut(&mut self) -> &mut Scratch {
        self.scratch
    }
}

impl Drop for ScratchGuard<'_> {
    fn drop(&mut self) {
        let used = self.scratch.order.len();
        if used > self.capacity_hint {
            tracing::trace!(
                used,
                capacity_hint = self.capacity_hint,
                "scratch grew past its capacity hint"
            );
        }
        self.scratch.clear();
    }
}

// ---------------------------------------------------------------------------
// WorldData
// ---------------------------------------------------------------------------

/// Scratch arena owned by one batch.
///
/// Created from the accessor the batch runs with and a capacity hint (usually
/// the number of entities in the batch). It is tied to the accessor's epoch:
/// using it after the world changed structure panics, so a `WorldData` never
/// outlives the batch that created it. Dropping it releases the buffers.
///
/// ```
/// use statweave_core::prelude::*;
///
/// let mut world = StatWorld::new();
/// let hp = world.register_stat_type("health");
/// let layout = world.register_layout(StatLayout::new().with_stat(hp, 10.0));
/// let entity = world.spawn(layout).unwrap();
///
/// let accessor = StatAccessor::new(&world);
/// let mut scratch = WorldData::new(&accessor, 1);
/// let handle = world.stat_handle(entity, hp).unwrap();
/// accessor
///     .try_set_stat_base_value(&mut world, handle, 25.0, &mut scratch)
///     .unwrap();
/// assert_eq!(accessor.try_get_stat(&world, handle).unwrap().value, 25.0);
/// ```
#[derive(Debug)]
pub struct WorldData {
    binding: WorldBinding,
    capacity_hint: usize,
    scratch: Scratch,
}

impl WorldData {
    pub fn new(accessor: &StatAccessor, count: usize) -> Self {
        Self {
            binding: accessor.binding(),
            capacity_hint: count,
            scratch: Scratch::with_capacity(count),
        }
    }

    pub fn capacity_hint(&self) -> usize {
        self.capacity_hint
    }

    /// Start an operation: check the binding and hand out cleared buffers.
    pub(crate) fn begin(&mut self, accessor_binding: WorldBinding) -> ScratchGuard<'_> {
        assert_eq!(
            self.binding, accessor_binding,
            "WorldData used outside the batch it was created for"
        );
        ScratchGuard::new(&mut self.scratch, self.capacity_hint)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
