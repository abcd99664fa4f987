//! Access tracing for observed records.
//!
//! Every intercepted operation on a wrapper notifies the session's tracer. The
//! tracer is the external collaborator that a change-tracking layer would hook
//! into; this crate only reports, it never reacts. When using [`NoopTracer`]
//! every hook compiles away via monomorphization, exactly like
//! [`NoLimitTracker`](crate::resource::NoLimitTracker) for resource checks.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (production default) |
//! | [`StderrTracer`] | Human-readable access log to stderr |
//! | [`RecordingTracer`] | Full event log for tests and post-mortem |
//! | [`CountingTracer`] | Per-operation and per-key counters |
//!
//! ```ignore
//! let mut session = ReactiveSession::new().with_tracer(RecordingTracer::new());
//! // ... wrap and access records ...
//! let events = session.tracer().events();
//! ```
//!
//! Hooks only ever see the *target* record, never the wrapper, and receive
//! values by reference. They run after the operation completed, so a hook
//! observes the post-operation state.

use std::{fmt, io};

use ahash::AHashMap;

use crate::{heap::HeapId, value::Value};

/// An access event, as captured by [`RecordingTracer`].
///
/// `Write::value` is a shallow copy of the assigned value. For heap references it
/// carries the id only and owns no reference, so it must not be released.
#[derive(Debug, PartialEq)]
pub enum AccessEvent {
    /// A key was read through a wrapper.
    Read { target: HeapId, key: String },
    /// A key was assigned through a wrapper.
    Write {
        target: HeapId,
        key: String,
        value: Value,
        /// False when the record rejected the assignment.
        success: bool,
    },
    /// A key was deleted through a wrapper.
    Delete {
        target: HeapId,
        key: String,
        success: bool,
    },
    /// A wrapper was created for a record.
    Wrap { original: HeapId, wrapper: HeapId },
}

/// Trait for observing intercepted record access.
///
/// All methods have default no-op implementations, so [`NoopTracer`] requires
/// zero lines of code. Implementations only override the hooks they care about.
pub trait AccessTracer: fmt::Debug {
    /// Called after a key was read through a wrapper.
    ///
    /// # Arguments
    /// * `target` - The wrapped record
    /// * `key` - The property key
    #[inline(always)]
    fn on_read(&mut self, _target: HeapId, _key: &str) {}

    /// Called after an assignment through a wrapper, accepted or not.
    ///
    /// # Arguments
    /// * `target` - The wrapped record
    /// * `key` - The property key
    /// * `value` - The value that was assigned
    /// * `success` - Whether the record accepted the assignment
    #[inline(always)]
    fn on_write(&mut self, _target: HeapId, _key: &str, _value: &Value, _success: bool) {}

    /// Called after a delete through a wrapper, accepted or not.
    #[inline(always)]
    fn on_delete(&mut self, _target: HeapId, _key: &str, _success: bool) {}

    /// Called when a new wrapper was created and registered.
    #[inline(always)]
    fn on_wrap(&mut self, _original: HeapId, _wrapper: HeapId) {}
}

/// A tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl AccessTracer for NoopTracer {}

/// Tracer that prints a human-readable access log, to stderr by default.
///
/// Output format:
/// ```text
/// WRAP object#0 -> object#2
/// GET  object#0.name
/// SET  object#0.name = 'B'
/// SET  object#0.id = 7 (rejected)
/// DEL  object#0.name
/// ```
///
/// [`StderrTracer::to_writer`] sends the same lines to any `io::Write`.
/// Write errors are ignored; a broken log never fails an access.
#[derive(Debug)]
pub struct StderrTracer<W: io::Write = io::Stderr> {
    out: W,
    /// Maximum number of lines before going quiet. None = unlimited.
    limit: Option<usize>,
    count: usize,
    stopped: bool,
}

impl StderrTracer {
    /// Creates a new stderr tracer with no line limit.
    #[must_use]
    pub fn new() -> Self {
        Self::to_writer(io::stderr(), None)
    }

    /// Creates a new stderr tracer that stops after `limit` lines.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self::to_writer(io::stderr(), Some(limit))
    }
}

impl<W: io::Write> StderrTracer<W> {
    /// Creates a tracer that writes its log to `out`.
    #[must_use]
    pub fn to_writer(out: W, limit: Option<usize>) -> Self {
        Self {
            out,
            limit,
            count: 0,
            stopped: false,
        }
    }

    /// Consumes the tracer, returning its writer.
    pub fn into_writer(self) -> W {
        self.out
    }

    fn emit(&mut self, line: fmt::Arguments<'_>) {
        if self.stopped {
            return;
        }
        let _ = writeln!(self.out, "{line}");
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            let _ = writeln!(self.out, "--- trace limit reached ({limit} lines) ---");
            self.stopped = true;
        }
    }
}

impl Default for StderrTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: io::Write + fmt::Debug> AccessTracer for StderrTracer<W> {
    fn on_read(&mut self, target: HeapId, key: &str) {
        self.emit(format_args!("GET  object#{}.{key}", target.index()));
    }

    fn on_write(&mut self, target: HeapId, key: &str, value: &Value, success: bool) {
        let suffix = if success { "" } else { " (rejected)" };
        self.emit(format_args!("SET  object#{}.{key} = {value}{suffix}", target.index()));
    }

    fn on_delete(&mut self, target: HeapId, key: &str, success: bool) {
        let suffix = if success { "" } else { " (rejected)" };
        self.emit(format_args!("DEL  object#{}.{key}{suffix}", target.index()));
    }

    fn on_wrap(&mut self, original: HeapId, wrapper: HeapId) {
        self.emit(format_args!("WRAP object#{} -> object#{}", original.index(), wrapper.index()));
    }
}

/// Tracer that records every access as an [`AccessEvent`].
#[derive(Debug)]
pub struct RecordingTracer {
    events: Vec<AccessEvent>,
    limit: Option<usize>,
}

impl RecordingTracer {
    /// Creates a new recording tracer with no event limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            limit: None,
        }
    }

    /// Creates a new recording tracer that stops recording after `limit` events.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Vec::with_capacity(limit.min(1024)),
            limit: Some(limit),
        }
    }

    /// Returns the recorded events.
    #[must_use]
    pub fn events(&self) -> &[AccessEvent] {
        &self.events
    }

    /// Drains the recorded events, leaving the tracer empty.
    pub fn take_events(&mut self) -> Vec<AccessEvent> {
        std::mem::take(&mut self.events)
    }

    /// Returns the number of events recorded.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    fn push(&mut self, event: AccessEvent) {
        if self.limit.is_some_and(|l| self.events.len() >= l) {
            return;
        }
        self.events.push(event);
    }
}

impl Default for RecordingTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessTracer for RecordingTracer {
    fn on_read(&mut self, target: HeapId, key: &str) {
        self.push(AccessEvent::Read {
            target,
            key: key.to_owned(),
        });
    }

    fn on_write(&mut self, target: HeapId, key: &str, value: &Value, success: bool) {
        self.push(AccessEvent::Write {
            target,
            key: key.to_owned(),
            value: value.copy_for_extend(),
            success,
        });
    }

    fn on_delete(&mut self, target: HeapId, key: &str, success: bool) {
        self.push(AccessEvent::Delete {
            target,
            key: key.to_owned(),
            success,
        });
    }

    fn on_wrap(&mut self, original: HeapId, wrapper: HeapId) {
        self.push(AccessEvent::Wrap { original, wrapper });
    }
}

/// Tracer that counts accesses per operation and per key.
///
/// Retrieve results via [`CountingTracer::report`].
#[derive(Debug, Default)]
pub struct CountingTracer {
    reads: u64,
    writes: u64,
    rejected_writes: u64,
    deletes: u64,
    rejected_deletes: u64,
    wraps: u64,
    /// Accesses of any kind, keyed by property name.
    per_key: AHashMap<String, u64>,
}

/// Summary report from a [`CountingTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessReport {
    pub reads: u64,
    /// Accepted writes.
    pub writes: u64,
    pub rejected_writes: u64,
    /// Accepted deletes.
    pub deletes: u64,
    pub rejected_deletes: u64,
    pub wraps: u64,
    /// Per-key access counts, most accessed first, ties broken by key.
    pub keys: Vec<(String, u64)>,
}

impl CountingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a report from the collected counters.
    #[must_use]
    pub fn report(&self) -> AccessReport {
        let mut keys: Vec<_> = self.per_key.iter().map(|(k, &v)| (k.clone(), v)).collect();
        keys.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        AccessReport {
            reads: self.reads,
            writes: self.writes,
            rejected_writes: self.rejected_writes,
            deletes: self.deletes,
            rejected_deletes: self.rejected_deletes,
            wraps: self.wraps,
            keys,
        }
    }

    fn touch(&mut self, key: &str) {
        if let Some(count) = self.per_key.get_mut(key) {
            *count += 1;
        } else {
            self.per_key.insert(key.to_owned(), 1);
        }
    }
}

impl AccessTracer for CountingTracer {
    fn on_read(&mut self, _target: HeapId, key: &str) {
        self.reads += 1;
        self.touch(key);
    }

    fn on_write(&mut self, _target: HeapId, key: &str, _value: &Value, success: bool) {
        if success {
            self.writes += 1;
        } else {
            self.rejected_writes += 1;
        }
        self.touch(key);
    }

    fn on_delete(&mut self, _target: HeapId, key: &str, success: bool) {
        if success {
            self.deletes += 1;
        } else {
            self.rejected_deletes += 1;
        }
        self.touch(key);
    }

    fn on_wrap(&mut self, _original: HeapId, _wrapper: HeapId) {
        self.wraps += 1;
    }
}

impl fmt::Display for AccessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Access Report ===")?;
        writeln!(f, "Reads:    {}", self.reads)?;
        writeln!(f, "Writes:   {} ({} rejected)", self.writes, self.rejected_writes)?;
        writeln!(f, "Deletes:  {} ({} rejected)", self.deletes, self.rejected_deletes)?;
        writeln!(f, "Wrappers: {}", self.wraps)?;
        writeln!(f)?;
        writeln!(f, "--- Keys ---")?;
        for (key, count) in &self.keys {
            writeln!(f, "  {key:<20} {count:>8}")?;
        }
        Ok(())
    }
}
