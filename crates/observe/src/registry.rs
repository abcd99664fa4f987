//! Identity registry: the bidirectional original <-> wrapper association.
//!
//! Both directions are keyed by [`HeapId`], so only heap entries can ever be
//! registered; primitives are unrepresentable as keys. Neither map holds a
//! refcount. The heap calls [`IdentityRegistry::forget`] whenever it frees a
//! slot, which is what makes the association weak: once either side of a pair
//! dies the pair is gone, and a reused slot id never inherits a stale entry.

use ahash::AHashMap;

use crate::heap::HeapId;

#[derive(Debug, Default)]
pub(crate) struct IdentityRegistry {
    /// original -> wrapper
    forward: AHashMap<HeapId, HeapId>,
    /// wrapper -> original
    reverse: AHashMap<HeapId, HeapId>,
}

impl IdentityRegistry {
    /// Registers a fresh pair.
    ///
    /// The caller must have checked that `original` has no wrapper yet; a second
    /// registration would break the one-wrapper-per-original invariant.
    pub fn record_wrapping(&mut self, original: HeapId, wrapper: HeapId) {
        debug_assert!(
            !self.forward.contains_key(&original),
            "IdentityRegistry: {original:?} already has a wrapper"
        );
        debug_assert!(
            !self.reverse.contains_key(&wrapper),
            "IdentityRegistry: {wrapper:?} is already registered as a wrapper"
        );
        self.forward.insert(original, wrapper);
        self.reverse.insert(wrapper, original);
    }

    /// Returns the wrapper recorded for `original`, if any.
    #[must_use]
    pub fn wrapper_of(&self, original: HeapId) -> Option<HeapId> {
        self.forward.get(&original).copied()
    }

    /// True iff `candidate` was registered as a wrapper.
    #[must_use]
    pub fn is_wrapper(&self, candidate: HeapId) -> bool {
        self.reverse.contains_key(&candidate)
    }

    /// Returns the original a wrapper was created for.
    #[must_use]
    pub fn original_of(&self, wrapper: HeapId) -> Option<HeapId> {
        self.reverse.get(&wrapper).copied()
    }

    /// Drops every pairing that mentions `id`, on either side.
    pub fn forget(&mut self, id: HeapId) {
        if let Some(wrapper) = self.forward.remove(&id) {
            self.reverse.remove(&wrapper);
        }
        if let Some(original) = self.reverse.remove(&id) {
            self.forward.remove(&original);
        }
        debug_assert_eq!(self.forward.len(), self.reverse.len(), "IdentityRegistry: directions diverged");
    }

    /// Number of registered pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.forward.len()
    }
}
