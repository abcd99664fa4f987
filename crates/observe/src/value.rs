use std::fmt;

use crate::{
    heap::{Heap, HeapData, HeapId},
    resource::ResourceTracker,
};

/// Stable host-managed function identifier.
///
/// Functions are immediate values: the heap never owns them and the wrapping
/// engine always passes them through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct FunctionId(u32);

impl FunctionId {
    /// Creates a function ID from a raw integer.
    #[must_use]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw integer identifier.
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Runtime classification of a value.
///
/// Observed wrappers classify as the kind of their target (always `Record`),
/// the same way a proxy of a plain object still reports itself as a plain object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ValueKind {
    Undefined,
    Null,
    Bool,
    Int,
    Float,
    Str,
    Function,
    Record,
    List,
    Map,
    Set,
}

/// A value as seen by the heap and the wrapping engine.
///
/// Immediate variants are plain data. `Ref` is an owned reference into the heap:
/// each `Ref` a caller holds accounts for exactly one refcount and must be released
/// with [`ReactiveSession::release`](crate::ReactiveSession::release) when no longer needed.
///
/// `Clone` is not derived; [`ReactiveSession::clone_value`](crate::ReactiveSession::clone_value)
/// takes a second reference. `PartialEq` compares heap references by identity,
/// which is the identity that wrapping preserves.
#[derive(Debug, PartialEq)]
pub enum Value {
    /// The "absent" value: missing properties and getter-less accessors read as this.
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Box<str>),
    Function(FunctionId),
    Ref(HeapId),
}

impl Value {
    /// Returns the heap id when this value is a heap reference.
    #[must_use]
    pub fn ref_id(&self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(*id),
            _ => None,
        }
    }

    /// Classifies this value. Wrappers report the kind of their target.
    pub(crate) fn kind(&self, heap: &Heap<impl ResourceTracker>) -> ValueKind {
        match self {
            Self::Undefined => ValueKind::Undefined,
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Str(_) => ValueKind::Str,
            Self::Function(_) => ValueKind::Function,
            Self::Ref(id) => match heap.get(*id) {
                HeapData::Record(_) | HeapData::Observed(_) => ValueKind::Record,
                HeapData::List(_) => ValueKind::List,
                HeapData::Map(_) => ValueKind::Map,
                HeapData::Set(_) => ValueKind::Set,
            },
        }
    }

    /// SameValue comparison: like `==` but `NaN` equals itself and `0.0` differs from `-0.0`.
    #[must_use]
    pub fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan()),
            _ => self == other,
        }
    }

    /// Clones a value with proper heap reference counting.
    ///
    /// For immediate values this performs a simple copy. For heap references this
    /// increments the reference count and returns a new reference to the same slot.
    #[must_use]
    pub(crate) fn clone_with_heap(&self, heap: &Heap<impl ResourceTracker>) -> Self {
        match self {
            Self::Ref(id) => {
                heap.inc_ref(*id);
                Self::Ref(*id)
            }
            other => other.clone_immediate(),
        }
    }

    /// Drops a value, decrementing its heap reference count if applicable.
    ///
    /// For immediate values this is a no-op. For heap references the count is
    /// decremented and the slot (plus children) is freed when it reaches zero.
    #[inline]
    pub(crate) fn drop_with_heap(self, heap: &mut Heap<impl ResourceTracker>) {
        if let Self::Ref(id) = self {
            heap.dec_ref(id);
        }
    }

    /// Copies an immediate value without heap interaction.
    ///
    /// # Panics
    /// Panics on `Ref`: heap references must go through `clone_with_heap`.
    #[must_use]
    pub(crate) fn clone_immediate(&self) -> Self {
        match self {
            Self::Ref(_) => panic!("Ref clones must go through clone_with_heap to maintain refcounts"),
            _ => self.copy_for_extend(),
        }
    }

    /// Creates a shallow copy without incrementing reference counts.
    ///
    /// IMPORTANT: for `Ref` this copies the id but does NOT take a reference. The copy
    /// is a borrowed view; callers must either `inc_ref` it or never release it.
    #[must_use]
    pub(crate) fn copy_for_extend(&self) -> Self {
        match self {
            Self::Undefined => Self::Undefined,
            Self::Null => Self::Null,
            Self::Bool(b) => Self::Bool(*b),
            Self::Int(i) => Self::Int(*i),
            Self::Float(f) => Self::Float(*f),
            Self::Str(s) => Self::Str(s.clone()),
            Self::Function(f) => Self::Function(*f),
            Self::Ref(id) => Self::Ref(*id),
        }
    }

    /// Pushes the heap id of this value (if any) onto `stack`.
    ///
    /// Used when a container is freed: the collected ids are released after the
    /// container's own slot is gone.
    pub(crate) fn push_ref_id(&self, stack: &mut Vec<HeapId>) {
        if let Self::Ref(id) = self {
            stack.push(*id);
        }
    }

    /// Bytes this value owns outside its own footprint, for memory accounting.
    pub(crate) fn payload_size(&self) -> usize {
        match self {
            Self::Str(s) => s.len(),
            _ => 0,
        }
    }

    /// True when this value is the absent value.
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Returns the string payload, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Str(s) => write!(f, "'{s}'"),
            Self::Function(id) => write!(f, "[function#{}]", id.raw()),
            Self::Ref(id) => write!(f, "object#{}", id.index()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s.into_boxed_str())
    }
}

impl From<FunctionId> for Value {
    fn from(id: FunctionId) -> Self {
        Self::Function(id)
    }
}
