#![doc = include_str!("../../../README.md")]
// first to include defer_drop macro
mod heap;

mod error;
mod object;
mod observe;
mod registry;
mod resource;
mod session;
pub mod tracer;
mod types;
mod value;

pub use crate::{
    error::{AccessError, AccessResult},
    heap::{HeapDiff, HeapId, HeapStats},
    object::{ConversionError, InvalidInputError, Object},
    resource::{LimitedTracker, MAX_DATA_DEPTH, NoLimitTracker, ResourceError, ResourceLimits, ResourceTracker},
    session::ReactiveSession,
    tracer::{AccessEvent, AccessReport, AccessTracer, CountingTracer, NoopTracer, RecordingTracer, StderrTracer},
    types::{Getter, PropertyDescriptor, Record, Setter},
    value::{FunctionId, Value, ValueKind},
};
