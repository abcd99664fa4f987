use std::fmt::{self, Write};

use ahash::AHashSet;
use indexmap::IndexMap;

use crate::{
    heap::{DropWithHeap, Heap, HeapData, HeapId},
    resource::{ResourceError, ResourceTracker},
    types::{List, Map, PropertyDescriptor, Record, Set},
    value::{FunctionId, Value},
};

/// A host value that can be moved onto the heap or read back from it.
///
/// This is the public-facing value tree. It owns all its data and needs no heap,
/// so it can be built, cloned and compared freely. [`ReactiveSession::alloc`]
/// turns an `Object` into a heap graph; [`ReactiveSession::to_object`] snapshots
/// a heap graph back into an `Object` without going through interception.
///
/// `Record` fields become writable, enumerable, configurable data properties.
/// Accessor properties are read through their getter when exported.
///
/// `Cycle` is output-only: it marks a back-edge found while exporting a cyclic
/// graph.
///
/// [`ReactiveSession::alloc`]: crate::ReactiveSession::alloc
/// [`ReactiveSession::to_object`]: crate::ReactiveSession::to_object
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Host function handle.
    Function(FunctionId),
    /// Plain record with insertion-ordered fields.
    Record(IndexMap<String, Self>),
    List(Vec<Self>),
    /// Key/value pairs in insertion order. Repeated keys keep the last value.
    Map(Vec<(Self, Self)>),
    /// Unique values in insertion order. Duplicates are dropped.
    Set(Vec<Self>),
    /// A back-edge to a container that is already being exported.
    Cycle(HeapId),
}

impl Object {
    /// Builds a record from `(key, value)` pairs.
    pub fn record<K: Into<String>>(fields: impl IntoIterator<Item = (K, Self)>) -> Self {
        Self::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Returns the field `key` of a record, if this is one.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Record(fields) => fields.get(key),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "str",
            Self::Function(_) => "function",
            Self::Record(_) => "record",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Set(_) => "set",
            Self::Cycle(_) => "cycle",
        }
    }

    /// Converts this `Object` into a `Value`, allocating containers on the heap.
    ///
    /// Every container costs one allocation, checked by the heap's tracker, and
    /// nesting is bounded by the tracker's depth limit. On failure everything
    /// allocated so far is released again.
    ///
    /// # Errors
    /// Returns `InvalidInputError` for output-only variants and when a resource
    /// limit is hit.
    pub(crate) fn to_value(self, heap: &mut Heap<impl ResourceTracker>) -> Result<Value, InvalidInputError> {
        self.to_value_inner(heap, 0)
    }

    fn to_value_inner(self, heap: &mut Heap<impl ResourceTracker>, depth: usize) -> Result<Value, InvalidInputError> {
        match self {
            Self::Undefined => Ok(Value::Undefined),
            Self::Null => Ok(Value::Null),
            Self::Bool(b) => Ok(Value::Bool(b)),
            Self::Int(i) => Ok(Value::Int(i)),
            Self::Float(f) => Ok(Value::Float(f)),
            Self::String(s) => Ok(Value::from(s)),
            Self::Function(id) => Ok(Value::Function(id)),
            Self::Record(fields) => {
                heap.tracker().check_depth(depth)?;
                let mut properties = IndexMap::with_capacity(fields.len());
                for (key, field) in fields {
                    match field.to_value_inner(heap, depth + 1) {
                        Ok(value) => {
                            properties.insert(key, PropertyDescriptor::data(value));
                        }
                        Err(err) => {
                            properties.into_values().collect::<Vec<_>>().drop_with_heap(heap);
                            return Err(err);
                        }
                    }
                }
                let id = heap.allocate(HeapData::Record(Record::from_properties(properties)))?;
                Ok(Value::Ref(id))
            }
            Self::List(items) => {
                heap.tracker().check_depth(depth)?;
                let values = convert_all(items, heap, depth + 1)?;
                Ok(Value::Ref(heap.allocate(HeapData::List(List::new(values)))?))
            }
            Self::Map(pairs) => {
                heap.tracker().check_depth(depth)?;
                let flat: Vec<Self> = pairs.into_iter().flat_map(|(k, v)| [k, v]).collect();
                let mut flat = convert_all(flat, heap, depth + 1)?.into_iter();
                let mut entries = Vec::with_capacity(flat.len() / 2);
                while let (Some(key), Some(value)) = (flat.next(), flat.next()) {
                    entries.push((key, value));
                }
                let (map, displaced) = Map::from_pairs(entries);
                displaced.drop_with_heap(heap);
                Ok(Value::Ref(heap.allocate(HeapData::Map(map))?))
            }
            Self::Set(items) => {
                heap.tracker().check_depth(depth)?;
                let values = convert_all(items, heap, depth + 1)?;
                let (set, duplicates) = Set::from_values(values);
                duplicates.drop_with_heap(heap);
                Ok(Value::Ref(heap.allocate(HeapData::Set(set))?))
            }
            Self::Cycle(_) => Err(InvalidInputError::invalid_type("cycle")),
        }
    }

    /// Snapshots a value without consuming it.
    ///
    /// Wrappers are transparent: they export as their target record. Reads here
    /// are raw, so no access is reported to a tracer.
    pub(crate) fn from_value(value: &Value, heap: &Heap<impl ResourceTracker>) -> Result<Self, ResourceError> {
        let mut visited = AHashSet::new();
        Self::from_value_inner(value, heap, &mut visited, 0)
    }

    /// The `visited` set holds the containers on the current path; meeting one
    /// again yields `Object::Cycle`.
    fn from_value_inner(
        value: &Value,
        heap: &Heap<impl ResourceTracker>,
        visited: &mut AHashSet<HeapId>,
        depth: usize,
    ) -> Result<Self, ResourceError> {
        let id = match value {
            Value::Undefined => return Ok(Self::Undefined),
            Value::Null => return Ok(Self::Null),
            Value::Bool(b) => return Ok(Self::Bool(*b)),
            Value::Int(i) => return Ok(Self::Int(*i)),
            Value::Float(f) => return Ok(Self::Float(*f)),
            Value::Str(s) => return Ok(Self::String(s.to_string())),
            Value::Function(id) => return Ok(Self::Function(*id)),
            Value::Ref(id) => *id,
        };

        if visited.contains(&id) {
            return Ok(Self::Cycle(id));
        }
        heap.tracker().check_depth(depth)?;
        visited.insert(id);

        let result = match heap.get(id) {
            HeapData::Record(record) => {
                let mut fields = IndexMap::with_capacity(record.len());
                for key in record.keys() {
                    let field = record.get_borrowed(&key);
                    let object = Self::from_value_inner(&field, heap, visited, depth + 1)?;
                    fields.insert(key, object);
                }
                Self::Record(fields)
            }
            HeapData::List(list) => Self::List(export_all(list.as_slice(), heap, visited, depth + 1)?),
            HeapData::Map(map) => Self::Map(
                map.entries()
                    .map(|(k, v)| {
                        Ok((
                            Self::from_value_inner(k, heap, visited, depth + 1)?,
                            Self::from_value_inner(v, heap, visited, depth + 1)?,
                        ))
                    })
                    .collect::<Result<_, ResourceError>>()?,
            ),
            HeapData::Set(set) => Self::Set(export_all(set.as_slice(), heap, visited, depth + 1)?),
            HeapData::Observed(observed) => {
                Self::from_value_inner(&Value::Ref(observed.target()), heap, visited, depth)?
            }
        };

        visited.remove(&id);
        Ok(result)
    }

    fn repr_fmt(&self, f: &mut impl Write) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::String(s) => write!(f, "'{s}'"),
            Self::Function(id) => write!(f, "[function#{}]", id.raw()),
            Self::Record(fields) => {
                if fields.is_empty() {
                    return f.write_str("{}");
                }
                f.write_str("{ ")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: ")?;
                    value.repr_fmt(f)?;
                }
                f.write_str(" }")
            }
            Self::List(items) => {
                f.write_char('[')?;
                repr_seq(items, f)?;
                f.write_char(']')
            }
            Self::Map(pairs) => {
                write!(f, "Map({}) {{", pairs.len())?;
                for (i, (key, value)) in pairs.iter().enumerate() {
                    f.write_str(if i > 0 { ", " } else { " " })?;
                    key.repr_fmt(f)?;
                    f.write_str(" => ")?;
                    value.repr_fmt(f)?;
                }
                f.write_str(if pairs.is_empty() { "}" } else { " }" })
            }
            Self::Set(items) => {
                write!(f, "Set({}) {{", items.len())?;
                if !items.is_empty() {
                    f.write_char(' ')?;
                    repr_seq(items, f)?;
                    f.write_char(' ')?;
                }
                f.write_char('}')
            }
            Self::Cycle(_) => f.write_str("<cycle>"),
        }
    }
}

fn repr_seq(items: &[Object], f: &mut impl Write) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        item.repr_fmt(f)?;
    }
    Ok(())
}

/// Converts a batch of objects, releasing the converted prefix if one fails.
fn convert_all(
    items: Vec<Object>,
    heap: &mut Heap<impl ResourceTracker>,
    depth: usize,
) -> Result<Vec<Value>, InvalidInputError> {
    let mut values = Vec::with_capacity(items.len());
    for item in items {
        match item.to_value_inner(heap, depth) {
            Ok(value) => values.push(value),
            Err(err) => {
                values.drop_with_heap(heap);
                return Err(err);
            }
        }
    }
    Ok(values)
}

fn export_all(
    values: &[Value],
    heap: &Heap<impl ResourceTracker>,
    visited: &mut AHashSet<HeapId>,
    depth: usize,
) -> Result<Vec<Object>, ResourceError> {
    values
        .iter()
        .map(|value| Object::from_value_inner(value, heap, visited, depth))
        .collect()
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.repr_fmt(f)
    }
}

impl From<bool> for Object {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Object {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Object {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Object {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Object {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<FunctionId> for Object {
    fn from(id: FunctionId) -> Self {
        Self::Function(id)
    }
}

/// Error returned when a `Object` cannot be converted to the requested Rust type.
#[derive(Debug)]
pub struct ConversionError {
    /// The type name that was expected (e.g., "int", "str").
    pub expected: &'static str,
    /// The actual type name of the `Object`.
    pub actual: &'static str,
}

impl ConversionError {
    #[must_use]
    pub fn new(expected: &'static str, actual: &'static str) -> Self {
        Self { expected, actual }
    }
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}, got {}", self.expected, self.actual)
    }
}

impl std::error::Error for ConversionError {}

/// Error returned when a `Object` cannot be moved onto the heap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidInputError {
    /// The variant is output-only.
    InvalidType(&'static str),
    /// A resource limit was exceeded during conversion.
    Resource(ResourceError),
}

impl InvalidInputError {
    #[must_use]
    pub fn invalid_type(type_name: &'static str) -> Self {
        Self::InvalidType(type_name)
    }
}

impl fmt::Display for InvalidInputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidType(type_name) => write!(f, "'{type_name}' is not a valid input value"),
            Self::Resource(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for InvalidInputError {}

impl From<ResourceError> for InvalidInputError {
    fn from(err: ResourceError) -> Self {
        Self::Resource(err)
    }
}

impl TryFrom<&Object> for i64 {
    type Error = ConversionError;

    fn try_from(value: &Object) -> Result<Self, Self::Error> {
        match value {
            Object::Int(i) => Ok(*i),
            _ => Err(ConversionError::new("int", value.type_name())),
        }
    }
}

impl TryFrom<&Object> for bool {
    type Error = ConversionError;

    fn try_from(value: &Object) -> Result<Self, Self::Error> {
        match value {
            Object::Bool(b) => Ok(*b),
            _ => Err(ConversionError::new("bool", value.type_name())),
        }
    }
}

impl TryFrom<&Object> for String {
    type Error = ConversionError;

    fn try_from(value: &Object) -> Result<Self, Self::Error> {
        match value {
            Object::String(s) => Ok(s.clone()),
            _ => Err(ConversionError::new("str", value.type_name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{LimitedTracker, NoLimitTracker, ResourceLimits};

    fn nested(levels: usize) -> Object {
        let mut object = Object::Null;
        for _ in 0..levels {
            object = Object::record([("inner", object)]);
        }
        object
    }

    #[test]
    fn record_display_reads_like_a_literal() {
        let object = Object::record([
            ("name", Object::from("A")),
            ("hobby", Object::record([("run", Object::from(true))])),
            ("tags", Object::List(vec![Object::Int(1), Object::Null])),
        ]);
        assert_eq!(object.to_string(), "{ name: 'A', hobby: { run: true }, tags: [1, null] }");
    }

    #[test]
    fn depth_limit_rejects_deep_imports_and_releases_partial_work() {
        let limits = ResourceLimits::new().max_depth(Some(3));
        let mut heap = Heap::new(8, LimitedTracker::new(limits));
        let err = nested(5).to_value(&mut heap).unwrap_err();
        assert!(matches!(err, InvalidInputError::Resource(ResourceError::Depth { limit: 3, .. })));
        assert_eq!(heap.heap_stats().live_objects, 0);

        let value = nested(3).to_value(&mut heap).unwrap();
        assert_eq!(heap.heap_stats().live_objects, 3);
        value.drop_with_heap(&mut heap);
    }

    #[test]
    fn cycle_is_output_only() {
        let mut heap = Heap::new(1, NoLimitTracker);
        let err = Object::Cycle(HeapId::from_index(0)).to_value(&mut heap).unwrap_err();
        assert_eq!(err.to_string(), "'cycle' is not a valid input value");
    }

    #[test]
    fn map_and_set_collapse_duplicates_on_import() {
        let mut heap = Heap::new(4, NoLimitTracker);
        let map = Object::Map(vec![
            (Object::from("a"), Object::Int(1)),
            (Object::from("a"), Object::Int(2)),
        ]);
        let value = map.to_value(&mut heap).unwrap();
        let exported = Object::from_value(&value, &heap).unwrap();
        assert_eq!(exported, Object::Map(vec![(Object::from("a"), Object::Int(2))]));
        value.drop_with_heap(&mut heap);

        let set = Object::Set(vec![Object::Int(1), Object::Int(1)]).to_value(&mut heap).unwrap();
        assert_eq!(Object::from_value(&set, &heap).unwrap().to_string(), "Set(1) { 1 }");
        set.drop_with_heap(&mut heap);
    }

    #[test]
    fn conversions_report_the_actual_type() {
        let err = i64::try_from(&Object::from("x")).unwrap_err();
        assert_eq!(err.to_string(), "expected int, got str");
        assert_eq!(String::try_from(&Object::from("x")).unwrap(), "x");
        assert!(bool::try_from(&Object::Bool(true)).unwrap());
    }
}
