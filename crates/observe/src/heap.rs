use std::{cell::Cell, collections::BTreeMap, fmt, mem::ManuallyDrop};

use smallvec::SmallVec;

use crate::{
    registry::IdentityRegistry,
    resource::{ResourceError, ResourceTracker},
    types::{List, Map, Observed, PropertyDescriptor, Record, Set},
    value::Value,
};

/// Snapshot of the arena and its identity registry.
///
/// Every live wrapper has exactly one registry pair, so `wrappers()` and
/// `registry_entries` move together; [`HeapDiff::registry_in_step`] checks that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    pub live_objects: usize,
    /// Slots freed and waiting for reuse.
    pub free_slots: usize,
    /// Live entries by kind: "Record", "Observed", "List", "Map" or "Set".
    pub objects_by_type: BTreeMap<&'static str, usize>,
    /// Original/wrapper pairs held by the registry.
    pub registry_entries: usize,
    /// Allocations charged so far, when the tracker counts them.
    pub tracker_allocations: Option<usize>,
    /// Bytes currently charged, when the tracker measures memory.
    pub tracker_memory_bytes: Option<usize>,
}

impl HeapStats {
    /// Number of live wrappers.
    #[must_use]
    pub fn wrappers(&self) -> usize {
        self.count_of("Observed")
    }

    #[must_use]
    pub fn count_of(&self, kind: &str) -> usize {
        self.objects_by_type.get(kind).copied().unwrap_or(0)
    }

    /// Computes `after - self`.
    #[must_use]
    pub fn diff(&self, after: &Self) -> HeapDiff {
        let mut objects_by_type = BTreeMap::new();
        for &kind in self.objects_by_type.keys().chain(after.objects_by_type.keys()) {
            let delta = signed_delta(self.count_of(kind), after.count_of(kind));
            if delta != 0 {
                objects_by_type.insert(kind, delta);
            }
        }
        let memory_bytes = match (self.tracker_memory_bytes, after.tracker_memory_bytes) {
            (Some(before), Some(now)) => Some(signed_delta(before, now)),
            _ => None,
        };
        HeapDiff {
            live_objects: signed_delta(self.live_objects, after.live_objects),
            objects_by_type,
            wrappers: signed_delta(self.wrappers(), after.wrappers()),
            registry_entries: signed_delta(self.registry_entries, after.registry_entries),
            memory_bytes,
        }
    }
}

/// Change between two [`HeapStats`] snapshots.
///
/// `objects_by_type` lists only the kinds whose count changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapDiff {
    pub live_objects: isize,
    pub objects_by_type: BTreeMap<&'static str, isize>,
    pub wrappers: isize,
    pub registry_entries: isize,
    /// Only present when both snapshots measured memory.
    pub memory_bytes: Option<isize>,
}

impl HeapDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live_objects == 0
            && self.objects_by_type.is_empty()
            && self.registry_entries == 0
            && self.memory_bytes.is_none_or(|d| d == 0)
    }

    /// True when wrappers and registry pairs were created and released together.
    #[must_use]
    pub fn registry_in_step(&self) -> bool {
        self.wrappers == self.registry_entries
    }
}

impl fmt::Display for HeapDiff {
    /// One line, for example `+2 objects (Observed +1, Record +1); wrappers +1, registry +1`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("no change");
        }
        write!(f, "{:+} objects", self.live_objects)?;
        if !self.objects_by_type.is_empty() {
            let kinds: Vec<String> = self
                .objects_by_type
                .iter()
                .map(|(kind, delta)| format!("{kind} {delta:+}"))
                .collect();
            write!(f, " ({})", kinds.join(", "))?;
        }
        write!(f, "; wrappers {:+}, registry {:+}", self.wrappers, self.registry_entries)?;
        if let Some(bytes) = self.memory_bytes
            && bytes != 0
        {
            write!(f, "; memory {bytes:+} bytes")?;
        }
        if !self.registry_in_step() {
            f.write_str(" [registry out of step]")?;
        }
        Ok(())
    }
}

fn signed_delta(before: usize, after: usize) -> isize {
    (after as isize).wrapping_sub(before as isize)
}

/// Unique identifier for values stored inside the heap arena.
///
/// This is the identity the registry keys on. Ids are slot indices, so a freed
/// id may be handed out again; the registry is purged on every free so a reused
/// slot never inherits a stale pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapId(usize);

impl HeapId {
    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index)
    }
}

/// Every value that must live in the arena.
#[derive(Debug)]
pub(crate) enum HeapData {
    /// A plain keyed record: the only kind the wrapping engine wraps.
    Record(Record),
    /// An ordered sequence. Opaque to the wrapping engine.
    List(List),
    /// A keyed collection. Opaque to the wrapping engine.
    Map(Map),
    /// A unique-value collection. Opaque to the wrapping engine.
    Set(Set),
    /// An observed wrapper around a record.
    Observed(Observed),
}

impl HeapData {
    /// Static name of the variant, used by [`HeapStats`].
    fn variant_name(&self) -> &'static str {
        match self {
            Self::Record(_) => "Record",
            Self::List(_) => "List",
            Self::Map(_) => "Map",
            Self::Set(_) => "Set",
            Self::Observed(_) => "Observed",
        }
    }

    /// Approximate size in bytes, reported to the resource tracker.
    fn estimate_size(&self) -> usize {
        let payload = match self {
            Self::Record(r) => r.estimate_size(),
            Self::List(l) => l.estimate_size(),
            Self::Map(m) => m.estimate_size(),
            Self::Set(s) => s.estimate_size(),
            Self::Observed(_) => 0,
        };
        std::mem::size_of::<Self>() + payload
    }

    /// Whether this entry can hold references to other heap entries.
    fn has_refs(&self) -> bool {
        let mut ids = Vec::new();
        self.collect_child_ids(&mut ids);
        !ids.is_empty()
    }

    /// Pushes the ids of every heap entry this one references (non-consuming).
    fn collect_child_ids(&self, work_list: &mut Vec<HeapId>) {
        match self {
            Self::Record(record) => record.collect_child_ids(work_list),
            Self::List(list) => {
                for value in list.as_slice() {
                    value.push_ref_id(work_list);
                }
            }
            Self::Map(map) => {
                for (key, value) in map.entries() {
                    key.push_ref_id(work_list);
                    value.push_ref_id(work_list);
                }
            }
            Self::Set(set) => {
                for value in set.as_slice() {
                    value.push_ref_id(work_list);
                }
            }
            Self::Observed(observed) => work_list.push(observed.target()),
        }
    }

    /// Returns the record payload, if this entry is a plain record.
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Returns the mutable record payload, if this entry is a plain record.
    pub fn as_record_mut(&mut self) -> Option<&mut Record> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }
}

/// A single arena slot: the refcount plus the payload.
///
/// The refcount lives in a `Cell` so that `inc_ref` only needs shared access to
/// the heap, which lets `Value::clone_with_heap` work while a record is borrowed.
#[derive(Debug)]
struct HeapValue {
    refcount: Cell<usize>,
    /// Bytes charged to the tracker for this entry; exactly this much is
    /// credited back when the entry is freed.
    charged: usize,
    data: HeapData,
}

/// Reference-counted arena that backs every record, collection, and wrapper.
///
/// Uses a free list to reuse slots from freed values. When a value is freed via
/// `dec_ref` or a garbage collection sweep, its slot is added to the free list
/// and the identity registry forgets every pairing that mentions it. The
/// registry never holds a refcount, so it can never be the reason a slot
/// survives.
///
/// Generic over `T: ResourceTracker`; with `NoLimitTracker` all checks compile away.
#[derive(Debug)]
pub(crate) struct Heap<T: ResourceTracker> {
    entries: Vec<Option<HeapValue>>,
    /// IDs of freed slots available for reuse. Populated by `dec_ref`, consumed by `allocate`.
    free_list: Vec<HeapId>,
    /// Resource tracker for enforcing limits.
    tracker: T,
    /// Original/wrapper pairings. Non-owning.
    registry: IdentityRegistry,
    /// True if reference cycles may exist. Set when a container stores a Ref,
    /// cleared after GC completes. When false, GC can skip mark-sweep entirely.
    may_have_cycles: bool,
}

impl<T: ResourceTracker> Heap<T> {
    /// Creates a new heap with the given resource tracker.
    pub fn new(capacity: usize, tracker: T) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            tracker,
            registry: IdentityRegistry::default(),
            may_have_cycles: false,
        }
    }

    /// Returns the resource tracker.
    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Returns the identity registry.
    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    /// Returns the identity registry mutably.
    pub fn registry_mut(&mut self) -> &mut IdentityRegistry {
        &mut self.registry
    }

    /// Marks that a reference cycle may exist in the heap.
    ///
    /// Call this when a container stores a reference to another heap object.
    #[inline]
    pub fn mark_potential_cycle(&mut self) {
        self.may_have_cycles = true;
    }

    /// Allocates a new heap entry with a refcount of one.
    ///
    /// Returns `Err(ResourceError)` if allocation would exceed configured limits.
    /// The references held by `data` are released in that case.
    pub fn allocate(&mut self, data: HeapData) -> Result<HeapId, ResourceError> {
        let mut charged = 0;
        let outcome = self.tracker.on_allocate(|| {
            charged = data.estimate_size();
            charged
        });
        if let Err(err) = outcome {
            self.release_data(data);
            return Err(err);
        }
        if data.has_refs() {
            self.may_have_cycles = true;
        }

        let new_entry = HeapValue {
            refcount: Cell::new(1),
            charged,
            data,
        };

        let id = if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(new_entry);
            id
        } else {
            let id = self.entries.len();
            self.entries.push(Some(new_entry));
            HeapId(id)
        };

        Ok(id)
    }

    /// Charges `bytes` of in-place growth to an entry, before it grows.
    ///
    /// On error nothing is charged and the caller must not apply the update.
    pub fn charge_growth(&mut self, id: HeapId, bytes: usize) -> Result<(), ResourceError> {
        self.tracker.on_container_insert(|| bytes)?;
        self.entries
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .expect("Heap::charge_growth: object already freed")
            .charged += bytes;
        Ok(())
    }

    /// Credits back whatever an entry was charged beyond its current size.
    ///
    /// Called after every in-place update, so rejected or shrinking updates do
    /// not keep their charge. Growth that was never charged is not counted.
    pub fn settle_charge(&mut self, id: HeapId) {
        if self.tracker.current_memory_bytes().is_none() {
            return;
        }
        let entry = self
            .entries
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .expect("Heap::settle_charge: object already freed");
        let actual = entry.data.estimate_size();
        if actual < entry.charged {
            let excess = entry.charged - actual;
            entry.charged = actual;
            self.tracker.on_free(|| excess);
        }
    }

    /// Increments the reference count for an existing heap entry.
    ///
    /// # Panics
    /// Panics if the value ID is invalid or the value has already been freed.
    pub fn inc_ref(&self, id: HeapId) {
        let value = self
            .entries
            .get(id.index())
            .expect("Heap::inc_ref: slot missing")
            .as_ref()
            .expect("Heap::inc_ref: object already freed");
        value.refcount.set(value.refcount.get() + 1);
    }

    /// Decrements the reference count and frees the value (plus children) once it hits zero.
    ///
    /// When a value is freed, its slot ID is added to the free list for reuse and
    /// any registry pairing that mentions it is dropped.
    ///
    /// # Panics
    /// Panics if the value ID is invalid or the value has already been freed.
    pub fn dec_ref(&mut self, id: HeapId) {
        let value = {
            let slot = self.entries.get_mut(id.index()).expect("Heap::dec_ref: slot missing");
            let entry = slot.as_mut().expect("Heap::dec_ref: object already freed");
            let count = entry.refcount.get();
            if count > 1 {
                entry.refcount.set(count - 1);
                return;
            }
            slot.take().expect("Heap::dec_ref: object already freed")
        };

        self.registry.forget(id);
        self.free_list.push(id);
        self.tracker.on_free(|| value.charged);
        self.release_data(value.data);
    }

    /// Releases every reference held by `data`, then drops it.
    fn release_data(&mut self, data: HeapData) {
        let mut child_ids = Vec::new();
        data.collect_child_ids(&mut child_ids);
        drop(data);
        for child_id in child_ids {
            self.dec_ref(child_id);
        }
    }

    /// Returns an immutable reference to the heap data stored at the given ID.
    ///
    /// # Panics
    /// Panics if the value ID is invalid or the value has already been freed.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        &self
            .entries
            .get(id.index())
            .expect("Heap::get: slot missing")
            .as_ref()
            .expect("Heap::get: object already freed")
            .data
    }

    /// Returns a mutable reference to the heap data stored at the given ID.
    ///
    /// # Panics
    /// Panics if the value ID is invalid or the value has already been freed.
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self
            .entries
            .get_mut(id.index())
            .expect("Heap::get_mut: slot missing")
            .as_mut()
            .expect("Heap::get_mut: object already freed")
            .data
    }

    /// Returns the current refcount for a heap value, or 0 when freed.
    #[cfg(test)]
    #[must_use]
    pub fn get_refcount(&self, id: HeapId) -> usize {
        self.entries
            .get(id.index())
            .and_then(Option::as_ref)
            .map_or(0, |entry| entry.refcount.get())
    }

    /// Builds a [`HeapStats`] snapshot of the current arena.
    pub fn heap_stats(&self) -> HeapStats {
        let mut live_objects: usize = 0;
        let mut free_slots: usize = 0;
        let mut objects_by_type: BTreeMap<&'static str, usize> = BTreeMap::new();

        for slot in &self.entries {
            match slot {
                Some(entry) => {
                    live_objects += 1;
                    *objects_by_type.entry(entry.data.variant_name()).or_insert(0) += 1;
                }
                None => free_slots += 1,
            }
        }

        HeapStats {
            live_objects,
            free_slots,
            objects_by_type,
            registry_entries: self.registry.len(),
            tracker_allocations: self.tracker.allocation_count(),
            tracker_memory_bytes: self.tracker.current_memory_bytes(),
        }
    }

    /// Frees reference cycles that nothing outside the heap can reach.
    ///
    /// Roots are found by trial deletion: an entry's refcount minus the
    /// references other entries hold on it leaves the references held by the
    /// host. Every entry with such a reference survives, along with everything
    /// it reaches, so a handle the host still holds is never swept. A swept
    /// entry releases its references to survivors, and every swept id is purged
    /// from the registry exactly as in `dec_ref`.
    ///
    /// Returns the number of entries freed.
    pub fn collect_garbage(&mut self) -> usize {
        if !self.may_have_cycles {
            return 0;
        }

        let mut internal_refs = vec![0usize; self.entries.len()];
        let mut children = Vec::new();
        for entry in self.entries.iter().flatten() {
            children.clear();
            entry.data.collect_child_ids(&mut children);
            for child in &children {
                internal_refs[child.index()] += 1;
            }
        }

        let mut work_list: Vec<HeapId> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(idx, slot)| {
                slot.as_ref()
                    .is_some_and(|entry| entry.refcount.get() > internal_refs[*idx])
            })
            .map(|(idx, _)| HeapId(idx))
            .collect();

        // Mark phase: Vec<bool> instead of a set, ids are dense.
        let mut reachable: Vec<bool> = vec![false; self.entries.len()];
        while let Some(id) = work_list.pop() {
            let idx = id.index();
            if reachable[idx] {
                continue;
            }
            reachable[idx] = true;
            if let Some(Some(entry)) = self.entries.get(idx) {
                entry.data.collect_child_ids(&mut work_list);
            }
        }

        // Sweep phase: take every unreachable entry out before releasing anything,
        // so edges between swept entries are never followed.
        let mut swept: SmallVec<[(HeapId, HeapValue); 8]> = SmallVec::new();
        for (idx, slot) in self.entries.iter_mut().enumerate() {
            if reachable[idx] {
                continue;
            }
            if let Some(value) = slot.take() {
                swept.push((HeapId(idx), value));
            }
        }

        let freed = swept.len();
        let mut survivor_refs = Vec::new();
        for (id, value) in swept {
            self.registry.forget(id);
            self.free_list.push(id);
            self.tracker.on_free(|| value.charged);
            value.data.collect_child_ids(&mut survivor_refs);
        }
        for child_id in survivor_refs {
            if reachable[child_id.index()] {
                self.dec_ref(child_id);
            }
        }

        // survivors still pointing into the heap may close a cycle once the
        // host lets go of them
        self.may_have_cycles = reachable
            .iter()
            .zip(&internal_refs)
            .any(|(&kept, &refs)| kept && refs > 0);
        freed
    }
}

/// Trait for types that require heap access for proper cleanup.
///
/// Rust's standard `Drop` trait cannot decrement heap reference counts because it has no
/// access to the `Heap`. This trait provides an explicit drop-with-heap method so that
/// ref-counted values (and containers of them) can properly decrement their counts when
/// they are no longer needed.
///
/// Prefer [`defer_drop!`] or [`HeapGuard`] to guarantee cleanup automatically rather than
/// inserting manual calls in every branch.
pub(crate) trait DropWithHeap<T: ResourceTracker> {
    /// Consume `self` and decrement reference counts for any heap-allocated values contained within.
    fn drop_with_heap(self, heap: &mut Heap<T>);
}

impl<T: ResourceTracker> DropWithHeap<T> for Value {
    #[inline]
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        Self::drop_with_heap(self, heap);
    }
}

impl<T: ResourceTracker> DropWithHeap<T> for PropertyDescriptor {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        if let Self::Data { value, .. } = self {
            value.drop_with_heap(heap);
        }
    }
}

impl<T: ResourceTracker, U: DropWithHeap<T>> DropWithHeap<T> for Option<U> {
    #[inline]
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        if let Some(value) = self {
            value.drop_with_heap(heap);
        }
    }
}

impl<T: ResourceTracker, U: DropWithHeap<T>> DropWithHeap<T> for Vec<U> {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        for value in self {
            value.drop_with_heap(heap);
        }
    }
}

/// Gives [`HeapGuard`] access to a heap through whatever owns it.
pub(crate) trait ContainsHeap<T: ResourceTracker> {
    fn heap_mut(&mut self) -> &mut Heap<T>;
}

impl<T: ResourceTracker> ContainsHeap<T> for Heap<T> {
    #[inline]
    fn heap_mut(&mut self) -> &mut Self {
        self
    }
}

/// RAII guard that ensures a [`DropWithHeap`] value is cleaned up on every code path.
///
/// The guard's `Drop` impl calls [`DropWithHeap::drop_with_heap`] automatically, so
/// cleanup happens whether the scope exits normally, via `?`, or an early return.
pub(crate) struct HeapGuard<'a, T: ResourceTracker, H: ContainsHeap<T>, V: DropWithHeap<T>> {
    // manually dropped because it needs to be dropped by move.
    value: ManuallyDrop<V>,
    heap: &'a mut H,
    _tracker: std::marker::PhantomData<T>,
}

impl<'a, T: ResourceTracker, H: ContainsHeap<T>, V: DropWithHeap<T>> HeapGuard<'a, T, H, V> {
    /// Creates a new `HeapGuard` for the given value and heap.
    #[inline]
    pub fn new(value: V, heap: &'a mut H) -> Self {
        Self {
            value: ManuallyDrop::new(value),
            heap,
            _tracker: std::marker::PhantomData,
        }
    }

    /// Borrows the value (immutably) and heap (mutably) out of the guard.
    ///
    /// This is what [`defer_drop!`] calls internally.
    #[inline]
    pub fn as_parts(&mut self) -> (&V, &mut H) {
        (&self.value, self.heap)
    }
}

impl<T: ResourceTracker, H: ContainsHeap<T>, V: DropWithHeap<T>> Drop for HeapGuard<'_, T, H, V> {
    fn drop(&mut self) {
        // SAFETY: [DH] - value is never manually dropped until this point
        unsafe { ManuallyDrop::take(&mut self.value) }.drop_with_heap(self.heap.heap_mut());
    }
}

/// The preferred way to ensure a [`DropWithHeap`] value is cleaned up on every code path.
///
/// Creates a [`HeapGuard`] and immediately rebinds `$value` as `&V` and `$heap` as
/// `&mut H` via [`HeapGuard::as_parts`]. The owned value is released when the scope
/// exits, whether by normal completion, `?`, or an early return.
///
/// # Limitation
///
/// The macro rebinds `$heap` as a new `let` binding, so it cannot be used when `$heap`
/// is `self`. In `&mut self` methods, first assign `let heap = &mut self.heap;`.
#[macro_export]
macro_rules! defer_drop {
    ($value:ident, $heap:ident) => {
        let mut _guard = $crate::heap::HeapGuard::new($value, $heap);
        #[allow(
            clippy::allow_attributes,
            reason = "the reborrowed parts may not both be used in every case, so allow unused vars to avoid warnings"
        )]
        #[allow(unused_variables)]
        let ($value, $heap) = _guard.as_parts();
    };
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::resource::{LimitedTracker, NoLimitTracker, ResourceLimits};

    fn record_with(heap: &mut Heap<NoLimitTracker>, key: &str, value: Value) -> HeapId {
        let mut properties = IndexMap::new();
        properties.insert(key.to_owned(), PropertyDescriptor::data(value));
        heap.allocate(HeapData::Record(Record::from_properties(properties)))
            .unwrap()
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut heap = Heap::new(4, NoLimitTracker);
        let first = heap.allocate(HeapData::List(List::default())).unwrap();
        heap.dec_ref(first);
        let second = heap.allocate(HeapData::List(List::default())).unwrap();
        assert_eq!(first, second);
        assert_eq!(heap.heap_stats().live_objects, 1);
        heap.dec_ref(second);
    }

    #[test]
    fn dec_ref_releases_children() {
        let mut heap = Heap::new(4, NoLimitTracker);
        let child = heap.allocate(HeapData::Record(Record::default())).unwrap();
        let parent = record_with(&mut heap, "child", Value::Ref(child));
        assert_eq!(heap.get_refcount(child), 1);

        heap.dec_ref(parent);
        assert_eq!(heap.get_refcount(child), 0);
        assert_eq!(heap.heap_stats().live_objects, 0);
    }

    #[test]
    fn freeing_a_wrapper_purges_registry_pairing() {
        let mut heap = Heap::new(4, NoLimitTracker);
        let target = heap.allocate(HeapData::Record(Record::default())).unwrap();
        heap.inc_ref(target);
        let wrapper = heap.allocate(HeapData::Observed(Observed::new(target))).unwrap();
        heap.registry_mut().record_wrapping(target, wrapper);
        assert_eq!(heap.registry().wrapper_of(target), Some(wrapper));

        heap.dec_ref(wrapper);
        assert_eq!(heap.registry().wrapper_of(target), None);
        assert!(!heap.registry().is_wrapper(wrapper));
        assert_eq!(heap.get_refcount(target), 1);
        heap.dec_ref(target);
    }

    /// Builds `a <-> b` and returns both ids, each held once by the host.
    fn cycle(heap: &mut Heap<NoLimitTracker>) -> (HeapId, HeapId) {
        let a = heap.allocate(HeapData::Record(Record::default())).unwrap();
        heap.inc_ref(a);
        let b = record_with(heap, "a", Value::Ref(a));
        heap.inc_ref(b);
        let HeapData::Record(record) = heap.get_mut(a) else {
            panic!("expected record");
        };
        assert!(record.set("b", Value::Ref(b)).success);
        heap.mark_potential_cycle();
        (a, b)
    }

    #[test]
    fn collect_garbage_frees_unreachable_cycle() {
        let mut heap = Heap::new(4, NoLimitTracker);
        let (a, b) = cycle(&mut heap);
        heap.dec_ref(a);
        heap.dec_ref(b);

        let survivor = heap.allocate(HeapData::Record(Record::default())).unwrap();
        assert_eq!(heap.collect_garbage(), 2);
        assert_eq!(heap.heap_stats().live_objects, 1);
        assert_eq!(heap.get_refcount(survivor), 1);
        heap.dec_ref(survivor);
    }

    #[test]
    fn collect_garbage_keeps_entries_the_host_still_holds() {
        let mut heap = Heap::new(4, NoLimitTracker);
        let (a, b) = cycle(&mut heap);
        heap.dec_ref(b);
        // a wrapper held only by the host, unreachable from any record
        heap.inc_ref(b);
        let wrapper = heap.allocate(HeapData::Observed(Observed::new(b))).unwrap();

        assert_eq!(heap.collect_garbage(), 0);
        assert_eq!(heap.heap_stats().live_objects, 3);
        assert_eq!(heap.get_refcount(wrapper), 1);

        heap.dec_ref(wrapper);
        heap.dec_ref(a);
        assert_eq!(heap.heap_stats().live_objects, 2);
        assert_eq!(heap.collect_garbage(), 2, "the surviving cycle is collected once released");
        assert_eq!(heap.heap_stats().live_objects, 0);
    }

    #[test]
    fn growth_charge_is_credited_back_in_full() {
        let limits = ResourceLimits::new().max_memory(4096);
        let mut heap = Heap::new(4, LimitedTracker::new(limits));
        let id = heap.allocate(HeapData::Record(Record::default())).unwrap();
        let base = heap.tracker().current_memory_bytes().unwrap();

        heap.charge_growth(id, 100).unwrap();
        assert_eq!(heap.tracker().current_memory_bytes(), Some(base + 100));
        // nothing was stored, so the charge is handed back
        heap.settle_charge(id);
        assert_eq!(heap.tracker().current_memory_bytes(), Some(base));

        let err = heap.charge_growth(id, 8192).unwrap_err();
        assert!(matches!(err, ResourceError::Memory { limit: 4096, .. }));
        heap.dec_ref(id);
        assert_eq!(heap.tracker().current_memory_bytes(), Some(0));
    }

    #[test]
    fn heap_diff_tracks_wrappers_against_registry() {
        let mut heap = Heap::new(4, NoLimitTracker);
        let target = heap.allocate(HeapData::Record(Record::default())).unwrap();
        let before = heap.heap_stats();
        heap.inc_ref(target);
        let wrapper = heap.allocate(HeapData::Observed(Observed::new(target))).unwrap();

        let unpaired = before.diff(&heap.heap_stats());
        assert!(!unpaired.registry_in_step());
        assert_eq!(
            unpaired.to_string(),
            "+1 objects (Observed +1); wrappers +1, registry +0 [registry out of step]"
        );

        heap.registry_mut().record_wrapping(target, wrapper);
        let paired = before.diff(&heap.heap_stats());
        assert!(paired.registry_in_step());
        assert_eq!(paired.objects_by_type.get("Observed"), Some(&1));

        heap.dec_ref(wrapper);
        let after = heap.heap_stats();
        assert!(before.diff(&after).is_empty());
        assert_eq!(before.diff(&after).to_string(), "no change");
        heap.dec_ref(target);
    }
}
