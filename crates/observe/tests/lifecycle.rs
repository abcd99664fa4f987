//! Lifecycle tests: the wrapper association is weak, cycles are collectable, and
//! resource limits are enforced without leaking, and the access log is exact.

use observe::{
    AccessError, InvalidInputError, LimitedTracker, Object, ReactiveSession, ResourceError, ResourceLimits,
    ResourceTracker, StderrTracer, Value, ValueKind,
};
use pretty_assertions::assert_eq;

fn empty_record() -> Object {
    Object::record::<&str>([])
}

// =============================================================================
// 1. Weak association
// =============================================================================

/// Releasing the last host references frees both sides and the registry entry.
#[test]
fn releasing_everything_empties_heap_and_registry() {
    let mut session = ReactiveSession::new();
    let raw = session
        .alloc(Object::record([("inner", Object::record([("x", Object::Int(1))]))]))
        .unwrap();
    let w = session.reactive(raw).unwrap();
    let inner = session.get(&w, "inner").unwrap();
    assert_eq!(session.registry_len(), 2);
    assert_eq!(session.heap_stats().objects_by_type.get("Observed"), Some(&2));

    session.release(inner);
    assert_eq!(session.registry_len(), 1, "inner wrapper died with its last handle");
    session.release(w);

    let stats = session.heap_stats();
    assert_eq!(stats.live_objects, 0);
    assert_eq!(stats.registry_entries, 0);
}

/// The registry does not keep a wrapper alive: once it is released, the next
/// wrap creates a fresh one.
#[test]
fn dropped_wrapper_is_recreated_on_next_wrap() {
    let mut session = ReactiveSession::new();
    let raw = session.alloc(empty_record()).unwrap();
    let keep = session.clone_value(&raw);

    let w = session.reactive(raw).unwrap();
    session.release(w);
    assert_eq!(session.registry_len(), 0);
    assert_eq!(session.heap_stats().live_objects, 1);

    let keep_copy = session.clone_value(&keep);
    let w = session.reactive(keep_copy).unwrap();
    assert!(session.is_reactive(&w));
    assert_eq!(session.registry_len(), 1);

    session.release(w);
    session.release(keep);
    assert_eq!(session.heap_stats().live_objects, 0);
}

/// A wrapper alone keeps its record alive.
#[test]
fn wrapper_keeps_its_target_alive() {
    let mut session = ReactiveSession::new();
    let raw = session.alloc(Object::record([("v", Object::Int(5))])).unwrap();
    let w = session.reactive(raw).unwrap();

    assert_eq!(session.heap_stats().live_objects, 2);
    assert_eq!(session.get(&w, "v").unwrap(), Value::Int(5));
    session.release(w);
    assert_eq!(session.heap_stats().live_objects, 0);
}

/// Wrapping shows up in heap diffs as one wrapper and one registry pair.
#[test]
fn heap_diff_reports_the_new_wrapper() {
    let mut session = ReactiveSession::new();
    let raw = session.alloc(empty_record()).unwrap();
    let before = session.heap_stats();
    let w = session.reactive(raw).unwrap();
    let diff = before.diff(&session.heap_stats());

    assert_eq!(diff.live_objects, 1);
    assert_eq!(diff.registry_entries, 1);
    assert!(diff.registry_in_step());
    assert_eq!(diff.to_string(), "+1 objects (Observed +1); wrappers +1, registry +1");

    let before_release = session.heap_stats();
    session.release(w);
    let diff = before_release.diff(&session.heap_stats());
    assert_eq!(diff.to_string(), "-2 objects (Observed -1, Record -1); wrappers -1, registry -1");
}

// =============================================================================
// 2. Cycles
// =============================================================================

/// Reading around a cycle returns the wrappers already created, one level per read.
#[test]
fn cyclic_reads_are_lazy_and_stable() {
    let mut session = ReactiveSession::new();
    let a = session.alloc(Object::record([("name", Object::from("a"))])).unwrap();
    let b = session.alloc(Object::record([("name", Object::from("b"))])).unwrap();
    let a_copy = session.clone_value(&a);
    let b_copy = session.clone_value(&b);
    assert!(session.set(&a, "next", b_copy).unwrap());
    assert!(session.set(&b, "next", a_copy).unwrap());
    session.release(b);

    let wa = session.reactive(a).unwrap();
    assert_eq!(session.registry_len(), 1);
    let wb = session.get(&wa, "next").unwrap();
    assert_eq!(session.registry_len(), 2);
    let wa_again = session.get(&wb, "next").unwrap();
    assert_eq!(wa_again, wa);
    assert_eq!(session.registry_len(), 2);

    assert_eq!(
        session.to_object(&wa).unwrap().to_string(),
        "{ name: 'a', next: { name: 'b', next: <cycle> } }"
    );

    for value in [wa_again, wb, wa] {
        session.release(value);
    }
    assert_eq!(session.registry_len(), 0);
    assert_eq!(session.heap_stats().live_objects, 2, "the raw cycle outlives refcounting");
    assert_eq!(session.collect_garbage(), 2);
    assert_eq!(session.heap_stats().live_objects, 0);
}

/// A record that stores its own wrapper forms a cycle through the wrapper; the
/// collector frees both and clears the registry.
#[test]
fn cycle_through_a_wrapper_is_collected() {
    let mut session = ReactiveSession::new();
    let raw = session.alloc(empty_record()).unwrap();
    let w = session.reactive(raw).unwrap();
    let self_ref = session.clone_value(&w);
    assert!(session.set(&w, "me", self_ref).unwrap());
    session.release(w);

    assert_eq!(session.registry_len(), 1);
    assert_eq!(session.heap_stats().live_objects, 2);
    assert_eq!(session.collect_garbage(), 2);
    assert_eq!(session.registry_len(), 0);
    assert_eq!(session.heap_stats().live_objects, 0);
}

/// Host-held values survive collection, and references from swept entries are released.
#[test]
fn collection_keeps_host_values_and_releases_their_counts() {
    let mut session = ReactiveSession::new();
    let survivor = session.alloc(empty_record()).unwrap();
    let a = session.alloc(empty_record()).unwrap();
    let a_copy = session.clone_value(&a);
    let survivor_copy = session.clone_value(&survivor);
    assert!(session.set(&a, "me", a_copy).unwrap());
    assert!(session.set(&a, "kept", survivor_copy).unwrap());
    session.release(a);

    assert_eq!(session.collect_garbage(), 1);
    session.release(survivor);
    assert_eq!(session.heap_stats().live_objects, 0);
}

/// Nested wrappers are referenced only by the host, never by the record graph.
/// Collection must keep them, and their slots must not be handed out again.
#[test]
fn collection_never_sweeps_a_held_nested_wrapper() {
    let mut session = ReactiveSession::new();
    let raw = session
        .alloc(Object::record([("hobby", Object::record([("run", Object::from(true))]))]))
        .unwrap();
    let state = session.reactive(raw).unwrap();
    let hobby = session.get(&state, "hobby").unwrap();
    let loner = session.alloc(empty_record()).unwrap();
    let loner_copy = session.clone_value(&loner);
    assert!(session.set(&loner, "me", loner_copy).unwrap());
    session.release(loner);

    assert_eq!(session.collect_garbage(), 1, "only the unreachable self-cycle goes");
    assert!(session.is_reactive(&hobby));
    assert_eq!(session.registry_len(), 2);

    let other = session.alloc(Object::List(vec![])).unwrap();
    assert_ne!(other, hobby);
    assert_eq!(session.kind(&hobby), ValueKind::Record);
    assert_eq!(session.get(&hobby, "run").unwrap(), Value::Bool(true));

    for value in [other, hobby, state] {
        session.release(value);
    }
    assert_eq!(session.heap_stats().live_objects, 0);
    assert_eq!(session.registry_len(), 0);
}

/// A cycle that survives one collection because the host holds it is freed by
/// a later collection once the host lets go.
#[test]
fn released_cycle_is_collected_on_a_later_pass() {
    let mut session = ReactiveSession::new();
    let a = session.alloc(empty_record()).unwrap();
    let a_copy = session.clone_value(&a);
    assert!(session.set(&a, "me", a_copy).unwrap());

    assert_eq!(session.collect_garbage(), 0);
    session.release(a);
    assert_eq!(session.collect_garbage(), 1);
    assert_eq!(session.heap_stats().live_objects, 0);
}

// =============================================================================
// 3. Resource limits
// =============================================================================

/// Hitting the allocation limit while wrapping releases the input.
#[test]
fn allocation_limit_fails_wrap_without_leaking() {
    let limits = ResourceLimits::new().max_allocations(2);
    let mut session = ReactiveSession::with_tracker(LimitedTracker::new(limits));
    let raw = session
        .alloc(Object::record([("inner", empty_record())]))
        .unwrap();
    assert_eq!(session.heap_stats().tracker_allocations, Some(2));

    let err = session.reactive(raw).unwrap_err();
    assert_eq!(err, ResourceError::Allocation { limit: 2, count: 3 });
    assert_eq!(session.heap_stats().live_objects, 0);
    assert_eq!(session.registry_len(), 0);
}

/// A read that needs a new wrapper reports the limit as an access error.
#[test]
fn allocation_limit_surfaces_on_read() {
    let limits = ResourceLimits::new().max_allocations(3);
    let mut session = ReactiveSession::with_tracker(LimitedTracker::new(limits));
    let raw = session
        .alloc(Object::record([("inner", empty_record())]))
        .unwrap();
    let w = session.reactive(raw).unwrap();

    let err = session.get(&w, "inner").unwrap_err();
    assert!(matches!(err, AccessError::Resource(ResourceError::Allocation { .. })));
    assert_eq!(err.to_string(), "allocation limit exceeded: 4 > 3");
    session.release(w);
    assert_eq!(session.heap_stats().live_objects, 0);
}

/// Every new key is an in-place growth and counts against the allocation budget;
/// replacing a value with one no larger does not.
#[test]
fn new_keys_count_against_the_allocation_budget() {
    let limits = ResourceLimits::new().max_allocations(3);
    let mut session = ReactiveSession::with_tracker(LimitedTracker::new(limits));
    let raw = session.alloc(empty_record()).unwrap();
    let w = session.reactive(raw).unwrap();

    assert!(session.set(&w, "a", Value::Int(1)).unwrap());
    assert!(session.set(&w, "a", Value::Int(2)).unwrap());
    let err = session.set(&w, "b", Value::Int(1)).unwrap_err();
    assert_eq!(err, AccessError::Resource(ResourceError::Allocation { limit: 3, count: 4 }));
    assert_eq!(session.keys(&w).unwrap(), vec!["a".to_owned()]);
    session.release(w);
}

/// Record growth is charged against the memory limit, and the charge is
/// handed back in full once everything is released.
#[test]
fn record_growth_is_bounded_by_the_memory_limit() {
    let limits = ResourceLimits::new().max_memory(4096);
    let mut session = ReactiveSession::with_tracker(LimitedTracker::new(limits));
    let raw = session.alloc(empty_record()).unwrap();
    let w = session.reactive(raw).unwrap();

    let err = session.set(&w, "k0", Value::from("x".repeat(64 * 1024))).unwrap_err();
    assert!(matches!(err, AccessError::Resource(ResourceError::Memory { limit: 4096, .. })));
    assert!(session.keys(&w).unwrap().is_empty());

    let mut stored = 0;
    for i in 0..1000 {
        match session.set(&w, &format!("k{i}"), Value::from("y".repeat(100))) {
            Ok(accepted) => {
                assert!(accepted);
                stored += 1;
            }
            Err(err) => {
                assert!(matches!(err, AccessError::Resource(ResourceError::Memory { .. })));
                break;
            }
        }
    }
    assert!(stored > 0 && stored < 1000, "stored {stored} keys");
    assert!(session.tracker().current_memory_bytes().unwrap() <= 4096);

    // shrinking in place hands bytes back
    let before = session.tracker().current_memory_bytes().unwrap();
    assert!(session.set(&w, "k0", Value::Null).unwrap());
    assert!(session.tracker().current_memory_bytes().unwrap() < before);

    session.release(w);
    assert_eq!(session.tracker().current_memory_bytes(), Some(0));
}

/// Nesting deeper than the configured depth is refused on import and export.
#[test]
fn depth_limit_bounds_import_and_export() {
    fn nested(levels: usize) -> Object {
        (0..levels).fold(Object::Null, |inner, _| Object::record([("inner", inner)]))
    }

    let limits = ResourceLimits::new().max_depth(Some(4));
    let mut session = ReactiveSession::with_tracker(LimitedTracker::new(limits));
    let err = session.alloc(nested(6)).unwrap_err();
    assert!(matches!(err, InvalidInputError::Resource(ResourceError::Depth { limit: 4, .. })));

    let value = session.alloc(nested(4)).unwrap();
    assert_eq!(session.to_object(&value).unwrap(), nested(4));
    session.release(value);
}

/// `ResourceLimits` loads from host configuration; absent fields mean no limit.
#[test]
fn resource_limits_round_trip_through_json() {
    let limits = ResourceLimits::new().max_allocations(100).max_memory(1 << 20);
    let json = serde_json::to_string(&limits).unwrap();
    let back: ResourceLimits = serde_json::from_str(&json).unwrap();
    assert_eq!(back, limits);

    let partial: ResourceLimits = serde_json::from_str(r#"{"max_allocations": 5}"#).unwrap();
    assert_eq!(partial, ResourceLimits::default().max_allocations(5));
}

// =============================================================================
// 4. Access log
// =============================================================================

/// The access log names the target record, not the wrapper, on every line.
#[test]
fn access_log_reports_session_operations() {
    let mut session = ReactiveSession::new().with_tracer(StderrTracer::to_writer(Vec::new(), None));
    let raw = session.alloc(Object::record([("k", Object::Int(1))])).unwrap();
    let w = session.reactive(raw).unwrap();
    assert_eq!(session.get(&w, "k").unwrap(), Value::Int(1));
    assert!(session.set(&w, "k", Value::Int(2)).unwrap());
    session.freeze(&w).unwrap();
    assert!(!session.delete(&w, "k").unwrap());
    session.release(w);

    let log = String::from_utf8(session.into_tracer().into_writer()).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(
        lines,
        vec![
            "WRAP object#0 -> object#1",
            "GET  object#0.k",
            "SET  object#0.k = 2",
            "DEL  object#0.k (rejected)",
        ]
    );
}
