use crate::{
    error::{AccessError, AccessResult},
    heap::{DropWithHeap, Heap, HeapStats},
    object::{InvalidInputError, Object},
    observe::{self, Receiver},
    resource::{NoLimitTracker, ResourceError, ResourceTracker},
    tracer::{AccessTracer, NoopTracer},
    types::{PropertyDescriptor, Record},
    value::{Value, ValueKind},
};

/// Owns a heap of records, their wrappers, and the tracer that observes them.
///
/// All operations take `&mut self`, so wrapper creation (look up, then allocate
/// and register) can never interleave with another operation on the same
/// session. A session is `Send`; hosts that share one across threads put it
/// behind a single lock.
///
/// Values returned by the session are owned: each `Value::Ref` accounts for one
/// reference and must eventually be passed to [`release`](Self::release) (or
/// consumed by another call that takes a `Value`). Leaked references only keep
/// memory alive; they never break identity.
#[derive(Debug)]
pub struct ReactiveSession<T: ResourceTracker = NoLimitTracker, Tr: AccessTracer = NoopTracer> {
    heap: Heap<T>,
    tracer: Tr,
}

impl ReactiveSession {
    /// Creates a session with no resource limits and no tracing.
    #[must_use]
    pub fn new() -> Self {
        Self::with_tracker(NoLimitTracker)
    }
}

impl Default for ReactiveSession {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ResourceTracker> ReactiveSession<T, NoopTracer> {
    /// Creates a session whose heap is governed by `tracker`.
    #[must_use]
    pub fn with_tracker(tracker: T) -> Self {
        Self {
            heap: Heap::new(16, tracker),
            tracer: NoopTracer,
        }
    }
}

impl<T: ResourceTracker, Tr: AccessTracer> ReactiveSession<T, Tr> {
    /// Replaces the tracer. Usually called right after construction.
    #[must_use]
    pub fn with_tracer<Tr2: AccessTracer>(self, tracer: Tr2) -> ReactiveSession<T, Tr2> {
        ReactiveSession { heap: self.heap, tracer }
    }

    /// Moves a host value onto the heap, returning an owned raw value.
    ///
    /// # Errors
    /// Fails on output-only input or when a resource limit is hit; nothing stays
    /// allocated in that case.
    pub fn alloc(&mut self, object: Object) -> Result<Value, InvalidInputError> {
        object.to_value(&mut self.heap)
    }

    /// Returns the observed wrapper for `value`.
    ///
    /// Records get their unique wrapper, created on first call. Wrappers and
    /// every non-record value come back unchanged. The input reference is
    /// consumed either way.
    ///
    /// # Errors
    /// Fails only when allocating a new wrapper hits a resource limit; the input
    /// is released in that case.
    pub fn reactive(&mut self, value: Value) -> Result<Value, ResourceError> {
        observe::wrap(&mut self.heap, &mut self.tracer, value)
    }

    /// Reads `key` from a record or wrapper.
    ///
    /// Through a wrapper the read is reported to the tracer and record results are
    /// returned as their wrappers. On a plain record the read is raw. Missing keys
    /// read as `Value::Undefined`.
    ///
    /// # Errors
    /// Fails when `receiver` is not a record, or when wrapping the result hits a
    /// resource limit.
    pub fn get(&mut self, receiver: &Value, key: &str) -> AccessResult<Value> {
        match Receiver::resolve(&self.heap, receiver)? {
            Receiver::Raw(id) => Ok(observe::get_field(&self.heap, id, key)),
            Receiver::Observed { target } => Ok(observe::read(&mut self.heap, &mut self.tracer, target, key)?),
        }
    }

    /// Assigns `key` on a record or wrapper; `value` is consumed.
    ///
    /// Returns whether the record accepted the assignment. Values are stored as
    /// given, so assigning a wrapper stores the wrapper.
    ///
    /// # Errors
    /// Fails when `receiver` is not a record, or when growing the record would
    /// break a resource limit. `value` is released in both cases.
    pub fn set(&mut self, receiver: &Value, key: &str, value: Value) -> AccessResult<bool> {
        let receiver = match Receiver::resolve(&self.heap, receiver) {
            Ok(receiver) => receiver,
            Err(err) => {
                value.drop_with_heap(&mut self.heap);
                return Err(err);
            }
        };
        Ok(match receiver {
            Receiver::Raw(id) => observe::set_field(&mut self.heap, id, key, value)?,
            Receiver::Observed { target } => observe::write(&mut self.heap, &mut self.tracer, target, key, value)?,
        })
    }

    /// Deletes `key` from a record or wrapper. Deleting an absent key succeeds.
    ///
    /// # Errors
    /// Fails when `receiver` is not a record.
    pub fn delete(&mut self, receiver: &Value, key: &str) -> AccessResult<bool> {
        Ok(match Receiver::resolve(&self.heap, receiver)? {
            Receiver::Raw(id) => observe::delete_field(&mut self.heap, id, key),
            Receiver::Observed { target } => observe::delete(&mut self.heap, &mut self.tracer, target, key),
        })
    }

    /// Defines a property on the record behind `receiver`, without notifications.
    ///
    /// # Errors
    /// Fails when `receiver` is not a record, or when growing the record would
    /// break a resource limit.
    pub fn define_property(&mut self, receiver: &Value, key: &str, desc: PropertyDescriptor) -> AccessResult<bool> {
        let target = match Receiver::resolve(&self.heap, receiver) {
            Ok(receiver) => receiver.target(),
            Err(err) => {
                desc.drop_with_heap(&mut self.heap);
                return Err(err);
            }
        };
        Ok(observe::define_field(&mut self.heap, target, key, desc)?)
    }

    /// Enumerable own keys of the record behind `receiver`, in insertion order.
    ///
    /// # Errors
    /// Fails when `receiver` is not a record.
    pub fn keys(&self, receiver: &Value) -> AccessResult<Vec<String>> {
        self.inspect(receiver, Record::keys)
    }

    /// Makes the record behind `receiver` non-extensible.
    ///
    /// # Errors
    /// Fails when `receiver` is not a record.
    pub fn prevent_extensions(&mut self, receiver: &Value) -> AccessResult<()> {
        self.modify(receiver, Record::prevent_extensions)
    }

    /// Seals the record behind `receiver`.
    ///
    /// # Errors
    /// Fails when `receiver` is not a record.
    pub fn seal(&mut self, receiver: &Value) -> AccessResult<()> {
        self.modify(receiver, Record::seal)
    }

    /// Freezes the record behind `receiver`.
    ///
    /// # Errors
    /// Fails when `receiver` is not a record.
    pub fn freeze(&mut self, receiver: &Value) -> AccessResult<()> {
        self.modify(receiver, Record::freeze)
    }

    /// # Errors
    /// Fails when `receiver` is not a record.
    pub fn is_frozen(&self, receiver: &Value) -> AccessResult<bool> {
        self.inspect(receiver, Record::is_frozen)
    }

    /// # Errors
    /// Fails when `receiver` is not a record.
    pub fn is_sealed(&self, receiver: &Value) -> AccessResult<bool> {
        self.inspect(receiver, Record::is_sealed)
    }

    /// # Errors
    /// Fails when `receiver` is not a record.
    pub fn is_extensible(&self, receiver: &Value) -> AccessResult<bool> {
        self.inspect(receiver, Record::is_extensible)
    }

    /// Returns the raw record behind a wrapper, or a copy of `value` itself.
    #[must_use]
    pub fn to_raw(&self, value: &Value) -> Value {
        let raw = value
            .ref_id()
            .and_then(|id| self.heap.registry().original_of(id))
            .map_or_else(|| value.copy_for_extend(), Value::Ref);
        raw.clone_with_heap(&self.heap)
    }

    /// True iff `value` is a wrapper created by [`reactive`](Self::reactive).
    #[must_use]
    pub fn is_reactive(&self, value: &Value) -> bool {
        value.ref_id().is_some_and(|id| self.heap.registry().is_wrapper(id))
    }

    /// Classifies `value`. Wrappers classify as records.
    #[must_use]
    pub fn kind(&self, value: &Value) -> ValueKind {
        value.kind(&self.heap)
    }

    /// Snapshots `value` as a host object. Reads are raw, wrappers are transparent.
    ///
    /// # Errors
    /// Fails when the graph is nested deeper than the tracker allows.
    pub fn to_object(&self, value: &Value) -> Result<Object, ResourceError> {
        Object::from_value(value, &self.heap)
    }

    /// Takes another reference to `value`.
    #[must_use]
    pub fn clone_value(&self, value: &Value) -> Value {
        value.clone_with_heap(&self.heap)
    }

    /// Releases a reference obtained from this session.
    pub fn release(&mut self, value: Value) {
        value.drop_with_heap(&mut self.heap);
    }

    /// Frees reference cycles, wrapper cycles included, that no value held
    /// outside the session can reach.
    ///
    /// Every value the host still holds survives together with everything it
    /// reaches. Returns the number of entries freed.
    pub fn collect_garbage(&mut self) -> usize {
        self.heap.collect_garbage()
    }

    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.heap_stats()
    }

    /// Number of live original/wrapper pairs.
    #[must_use]
    pub fn registry_len(&self) -> usize {
        self.heap.registry().len()
    }

    #[must_use]
    pub fn tracker(&self) -> &T {
        self.heap.tracker()
    }

    #[must_use]
    pub fn tracer(&self) -> &Tr {
        &self.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut Tr {
        &mut self.tracer
    }

    /// Consumes the session, returning its tracer.
    pub fn into_tracer(self) -> Tr {
        self.tracer
    }

    fn inspect<R>(&self, receiver: &Value, f: impl FnOnce(&Record) -> R) -> AccessResult<R> {
        let target = Receiver::resolve(&self.heap, receiver)?.target();
        Ok(f(observe::record(&self.heap, target)))
    }

    fn modify(&mut self, receiver: &Value, f: impl FnOnce(&mut Record)) -> Result<(), AccessError> {
        let target = Receiver::resolve(&self.heap, receiver)?.target();
        f(observe::record_mut(&mut self.heap, target));
        Ok(())
    }
}
