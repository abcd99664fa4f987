//! The wrapping engine: lazy, identity-preserving observed records.
//!
//! [`wrap`] turns a record into its unique wrapper, creating it on first use.
//! Reads through a wrapper wrap their result, so nested records are wrapped
//! lazily, one level per read, and a cyclic graph never recurses more than the
//! caller asks for. Writes and deletes forward to the target unchanged.
//!
//! Every function here takes ownership of the `Value`s it is given and returns
//! owned values; the registry itself holds no references.

use crate::{
    defer_drop,
    error::AccessError,
    heap::{DropWithHeap, Heap, HeapData, HeapId},
    resource::{ResourceError, ResourceTracker},
    tracer::AccessTracer,
    types::{Assignment, Observed, PropertyDescriptor, Record, Removal},
    value::{Value, ValueKind},
};

/// Where an access should be directed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Receiver {
    /// A plain record: raw access, no notifications.
    Raw(HeapId),
    /// A wrapper: intercepted access on its target.
    Observed { target: HeapId },
}

impl Receiver {
    /// Resolves a value to the record an access should touch.
    pub fn resolve(heap: &Heap<impl ResourceTracker>, value: &Value) -> Result<Self, AccessError> {
        if let Value::Ref(id) = value {
            match heap.get(*id) {
                HeapData::Record(_) => return Ok(Self::Raw(*id)),
                HeapData::Observed(observed) => {
                    return Ok(Self::Observed {
                        target: observed.target(),
                    });
                }
                HeapData::List(_) | HeapData::Map(_) | HeapData::Set(_) => {}
            }
        }
        Err(AccessError::NotARecord { kind: value.kind(heap) })
    }

    /// The record that holds the data.
    pub fn target(self) -> HeapId {
        match self {
            Self::Raw(id) | Self::Observed { target: id } => id,
        }
    }
}

/// Only plain records are wrapped. Wrappers classify as records too, which is
/// what lets rule 3 of [`wrap`] recognise them.
pub(crate) fn is_eligible(heap: &Heap<impl ResourceTracker>, value: &Value) -> bool {
    value.kind(heap) == ValueKind::Record
}

/// Returns the unique wrapper for `value`, creating it on first use.
///
/// 1. Values that are not records come back unchanged.
/// 2. A record that already has a wrapper yields that wrapper.
/// 3. A wrapper comes back unchanged.
/// 4. Otherwise a new wrapper is allocated and registered.
///
/// The input reference is consumed: in case 4 it moves into the wrapper, and in
/// case 2 it is released. On allocation failure the input is released too.
pub(crate) fn wrap<T: ResourceTracker>(
    heap: &mut Heap<T>,
    tracer: &mut impl AccessTracer,
    value: Value,
) -> Result<Value, ResourceError> {
    if !is_eligible(heap, &value) {
        return Ok(value);
    }
    let Some(original) = value.ref_id() else {
        return Ok(value);
    };

    if let Some(wrapper) = heap.registry().wrapper_of(original) {
        defer_drop!(value, heap);
        heap.inc_ref(wrapper);
        return Ok(Value::Ref(wrapper));
    }

    if heap.registry().is_wrapper(original) {
        return Ok(value);
    }

    let wrapper = heap.allocate(HeapData::Observed(Observed::new(original)))?;
    heap.registry_mut().record_wrapping(original, wrapper);
    tracer.on_wrap(original, wrapper);
    Ok(Value::Ref(wrapper))
}

/// Intercepted read: raw lookup on `target`, notification, then wrap the result.
pub(crate) fn read<T: ResourceTracker>(
    heap: &mut Heap<T>,
    tracer: &mut impl AccessTracer,
    target: HeapId,
    key: &str,
) -> Result<Value, ResourceError> {
    let value = get_field(heap, target, key);
    tracer.on_read(target, key);
    wrap(heap, tracer, value)
}

/// Intercepted write: raw assignment on `target`, then notification.
///
/// A write refused by the resource tracker never reached the record, so it is
/// not reported.
pub(crate) fn write<T: ResourceTracker>(
    heap: &mut Heap<T>,
    tracer: &mut impl AccessTracer,
    target: HeapId,
    key: &str,
    value: Value,
) -> Result<bool, ResourceError> {
    let assigned = value.copy_for_extend();
    let success = set_field(heap, target, key, value)?;
    tracer.on_write(target, key, &assigned, success);
    Ok(success)
}

/// Intercepted delete: raw removal on `target`, then notification.
pub(crate) fn delete<T: ResourceTracker>(
    heap: &mut Heap<T>,
    tracer: &mut impl AccessTracer,
    target: HeapId,
    key: &str,
) -> bool {
    let success = delete_field(heap, target, key);
    tracer.on_delete(target, key, success);
    success
}

/// `[[Get]]` on a record, returning an owned value.
///
/// Getters run against the raw record, so reads they make are not observed.
pub(crate) fn get_field(heap: &Heap<impl ResourceTracker>, target: HeapId, key: &str) -> Value {
    let borrowed = record(heap, target).get_borrowed(key);
    borrowed.clone_with_heap(heap)
}

/// `[[Set]]` on a record. Values are stored exactly as given, wrappers included.
///
/// Growth is charged to the tracker first; when it is refused the record is
/// untouched and `value` is released.
pub(crate) fn set_field<T: ResourceTracker>(
    heap: &mut Heap<T>,
    target: HeapId,
    key: &str,
    value: Value,
) -> Result<bool, ResourceError> {
    let growth = record(heap, target).growth_for_set(key, &value);
    if growth > 0
        && let Err(err) = heap.charge_growth(target, growth)
    {
        value.drop_with_heap(heap);
        return Err(err);
    }
    let stores_ref = value.ref_id().is_some();
    let Assignment { success, released } = record_mut(heap, target).set(key, value);
    released.drop_with_heap(heap);
    heap.settle_charge(target);
    if success && stores_ref {
        heap.mark_potential_cycle();
    }
    Ok(success)
}

/// `[[DefineOwnProperty]]` on a record, charged like [`set_field`].
pub(crate) fn define_field<T: ResourceTracker>(
    heap: &mut Heap<T>,
    target: HeapId,
    key: &str,
    desc: PropertyDescriptor,
) -> Result<bool, ResourceError> {
    let growth = record(heap, target).growth_for_define(key, &desc);
    if growth > 0
        && let Err(err) = heap.charge_growth(target, growth)
    {
        desc.drop_with_heap(heap);
        return Err(err);
    }
    let stores_ref = desc.value().and_then(Value::ref_id).is_some();
    let Removal { success, released } = record_mut(heap, target).define_own_property(key, desc);
    released.drop_with_heap(heap);
    heap.settle_charge(target);
    if success && stores_ref {
        heap.mark_potential_cycle();
    }
    Ok(success)
}

/// `[[Delete]]` on a record.
pub(crate) fn delete_field<T: ResourceTracker>(heap: &mut Heap<T>, target: HeapId, key: &str) -> bool {
    let Removal { success, released } = record_mut(heap, target).delete(key);
    released.drop_with_heap(heap);
    heap.settle_charge(target);
    success
}

pub(crate) fn record(heap: &Heap<impl ResourceTracker>, id: HeapId) -> &Record {
    heap.get(id)
        .as_record()
        .expect("observe::record: receiver resolved to a non-record")
}

pub(crate) fn record_mut(heap: &mut Heap<impl ResourceTracker>, id: HeapId) -> &mut Record {
    heap.get_mut(id)
        .as_record_mut()
        .expect("observe::record_mut: receiver resolved to a non-record")
}
