//! Plain keyed records with property descriptors.
//!
//! Records follow the ordinary-object rules of an ES-style object model:
//! data properties can be non-writable, accessor properties route reads and
//! writes through host functions, non-configurable properties cannot be
//! deleted, and non-extensible records reject new keys. Every rejection is
//! reported as a `false` success flag, never as an error.

use indexmap::IndexMap;

use crate::{heap::HeapId, value::Value};

/// Computed-read hook for an accessor property.
///
/// The returned value is a *borrowed* view: an immediate, or a `Ref` that the
/// record itself already owns (see [`Record::view`]). The heap takes its own
/// reference before handing the result to a caller.
pub type Getter = fn(&Record) -> Value;

/// Computed-write hook for an accessor property.
///
/// Receives the assigned value by ownership. Whatever the setter does not keep
/// (a displaced field value, or the input itself) must be returned so the heap
/// can release it.
pub type Setter = fn(&mut Record, Value) -> Option<Value>;

/// A property descriptor: either a data slot or an accessor pair.
#[derive(Debug)]
pub enum PropertyDescriptor {
    /// Data descriptor: has `value` and `writable`.
    Data {
        value: Value,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    },
    /// Accessor descriptor: has `get` and/or `set`.
    Accessor {
        get: Option<Getter>,
        set: Option<Setter>,
        enumerable: bool,
        configurable: bool,
    },
}

impl PropertyDescriptor {
    /// Create a default data descriptor (writable, enumerable, configurable).
    #[must_use]
    pub fn data(value: Value) -> Self {
        Self::Data {
            value,
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Create an enumerable data descriptor that rejects writes and deletes.
    #[must_use]
    pub fn read_only(value: Value) -> Self {
        Self::Data {
            value,
            writable: false,
            enumerable: true,
            configurable: false,
        }
    }

    /// Create an enumerable, configurable accessor descriptor.
    #[must_use]
    pub fn accessor(get: Option<Getter>, set: Option<Setter>) -> Self {
        Self::Accessor {
            get,
            set,
            enumerable: true,
            configurable: true,
        }
    }

    /// Is this descriptor configurable?
    #[must_use]
    pub fn is_configurable(&self) -> bool {
        match self {
            Self::Data { configurable, .. } | Self::Accessor { configurable, .. } => *configurable,
        }
    }

    /// Is this descriptor enumerable?
    #[must_use]
    pub fn is_enumerable(&self) -> bool {
        match self {
            Self::Data { enumerable, .. } | Self::Accessor { enumerable, .. } => *enumerable,
        }
    }

    /// Is this a data descriptor?
    #[must_use]
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data { .. })
    }

    /// Is this a data descriptor with writable=true?
    #[must_use]
    pub fn is_writable(&self) -> bool {
        match self {
            Self::Data { writable, .. } => *writable,
            Self::Accessor { .. } => false,
        }
    }

    /// Get the value if this is a data descriptor.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Data { value, .. } => Some(value),
            Self::Accessor { .. } => None,
        }
    }

    fn set_non_configurable(&mut self) {
        match self {
            Self::Data { configurable, .. } | Self::Accessor { configurable, .. } => *configurable = false,
        }
    }

    fn set_non_writable(&mut self) {
        if let Self::Data { writable, .. } = self {
            *writable = false;
        }
    }
}

/// Result of a `[[Set]]`: whether it was accepted, plus whatever value the
/// record no longer holds and the heap must release.
#[derive(Debug)]
pub(crate) struct Assignment {
    pub success: bool,
    pub released: Option<Value>,
}

impl Assignment {
    fn accepted(released: Option<Value>) -> Self {
        Self {
            success: true,
            released,
        }
    }

    fn rejected(value: Value) -> Self {
        Self {
            success: false,
            released: Some(value),
        }
    }
}

/// Result of a `[[Delete]]` or `[[DefineOwnProperty]]`: success plus the
/// descriptor that left the record, if any.
#[derive(Debug)]
pub(crate) struct Removal {
    pub success: bool,
    pub released: Option<PropertyDescriptor>,
}

/// A plain record: insertion-ordered properties plus the extensible flag.
#[derive(Debug)]
pub struct Record {
    properties: IndexMap<String, PropertyDescriptor>,
    extensible: bool,
}

impl Default for Record {
    fn default() -> Self {
        Self {
            properties: IndexMap::new(),
            extensible: true,
        }
    }
}

impl Record {
    pub(crate) fn from_properties(properties: IndexMap<String, PropertyDescriptor>) -> Self {
        Self {
            properties,
            extensible: true,
        }
    }

    /// Returns the own property descriptor for `key`.
    #[must_use]
    pub fn get_own_property(&self, key: &str) -> Option<&PropertyDescriptor> {
        self.properties.get(key)
    }

    /// Does this record have an own property `key`?
    #[must_use]
    pub fn has_own_property(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    /// Returns the value of a data property. Accessors yield `None`.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.properties.get(key).and_then(PropertyDescriptor::value)
    }

    /// Returns a borrowed copy of a data property, suitable as a [`Getter`] result.
    ///
    /// Missing keys and accessor properties read as `Undefined`. The copy does not
    /// own a reference; it is only valid as a getter's return value.
    #[must_use]
    pub fn view(&self, key: &str) -> Value {
        self.field(key).map_or(Value::Undefined, Value::copy_for_extend)
    }

    /// Writes a data property unconditionally, ignoring `writable` and `extensible`.
    ///
    /// Intended for [`Setter`] implementations that keep a backing field. Returns the
    /// displaced data value, which the setter should hand back to the heap.
    pub fn put_field(&mut self, key: &str, value: Value) -> Option<Value> {
        match self.properties.get_mut(key) {
            Some(PropertyDescriptor::Data { value: slot, .. }) => Some(std::mem::replace(slot, value)),
            _ => self
                .properties
                .insert(key.to_owned(), PropertyDescriptor::data(value))
                .and_then(|old| match old {
                    PropertyDescriptor::Data { value, .. } => Some(value),
                    PropertyDescriptor::Accessor { .. } => None,
                }),
        }
    }

    /// `[[Get]]` without a receiver: returns a borrowed view of the property value.
    ///
    /// Data properties yield their value, accessors run their getter, and missing
    /// keys or getter-less accessors yield `Undefined`.
    pub(crate) fn get_borrowed(&self, key: &str) -> Value {
        match self.properties.get(key) {
            Some(PropertyDescriptor::Data { value, .. }) => value.copy_for_extend(),
            Some(PropertyDescriptor::Accessor { get: Some(getter), .. }) => getter(self),
            Some(PropertyDescriptor::Accessor { get: None, .. }) | None => Value::Undefined,
        }
    }

    /// `[[Set]]`: assigns `value` to `key` following ordinary-object rules.
    pub(crate) fn set(&mut self, key: &str, value: Value) -> Assignment {
        if let Some(PropertyDescriptor::Data {
            value: slot,
            writable: true,
            ..
        }) = self.properties.get_mut(key)
        {
            let old = std::mem::replace(slot, value);
            return Assignment::accepted(Some(old));
        }

        let setter = match self.properties.get(key) {
            Some(PropertyDescriptor::Accessor { set: Some(setter), .. }) => *setter,
            Some(_) => return Assignment::rejected(value),
            None if self.extensible => {
                self.properties.insert(key.to_owned(), PropertyDescriptor::data(value));
                return Assignment::accepted(None);
            }
            None => return Assignment::rejected(value),
        };
        Assignment::accepted(setter(self, value))
    }

    /// `[[Delete]]`: removes `key`. Absent keys delete successfully;
    /// non-configurable properties are kept and the delete reports failure.
    pub(crate) fn delete(&mut self, key: &str) -> Removal {
        let Some(desc) = self.properties.get(key) else {
            return Removal {
                success: true,
                released: None,
            };
        };
        if !desc.is_configurable() {
            return Removal {
                success: false,
                released: None,
            };
        }
        Removal {
            success: true,
            released: self.properties.shift_remove(key),
        }
    }

    /// `[[DefineOwnProperty]]`: defines or updates a property.
    ///
    /// Rejected definitions hand `desc` back in `released`; accepted ones hand back
    /// the descriptor they replaced.
    pub(crate) fn define_own_property(&mut self, key: &str, desc: PropertyDescriptor) -> Removal {
        let compatible = match self.properties.get(key) {
            Some(current) => current.is_configurable() || redefinition_allowed(current, &desc),
            None => self.extensible,
        };
        if !compatible {
            return Removal {
                success: false,
                released: Some(desc),
            };
        }
        Removal {
            success: true,
            released: self.properties.insert(key.to_owned(), desc),
        }
    }

    /// Own keys of enumerable properties, in insertion order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.properties
            .iter()
            .filter(|(_, desc)| desc.is_enumerable())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Iterates over own properties in insertion order.
    pub fn properties(&self) -> impl Iterator<Item = (&str, &PropertyDescriptor)> {
        self.properties.iter().map(|(key, desc)| (key.as_str(), desc))
    }

    /// Number of own properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// True when the record has no own properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    #[must_use]
    pub fn is_extensible(&self) -> bool {
        self.extensible
    }

    /// Makes this record non-extensible: new keys are rejected.
    pub fn prevent_extensions(&mut self) {
        self.extensible = false;
    }

    /// Makes every own property non-configurable and the record non-extensible.
    pub fn seal(&mut self) {
        self.extensible = false;
        for desc in self.properties.values_mut() {
            desc.set_non_configurable();
        }
    }

    /// Seals the record and additionally makes every data property non-writable.
    pub fn freeze(&mut self) {
        self.extensible = false;
        for desc in self.properties.values_mut() {
            desc.set_non_configurable();
            desc.set_non_writable();
        }
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        !self.extensible && self.properties.values().all(|d| !d.is_configurable())
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        !self.extensible
            && self
                .properties
                .values()
                .all(|d| !d.is_configurable() && !d.is_writable())
    }

    pub(crate) fn collect_child_ids(&self, work_list: &mut Vec<HeapId>) {
        for desc in self.properties.values() {
            if let PropertyDescriptor::Data { value, .. } = desc {
                value.push_ref_id(work_list);
            }
        }
    }

    pub(crate) fn estimate_size(&self) -> usize {
        self.properties
            .iter()
            .map(|(key, desc)| slot_size(key) + desc.value().map_or(0, Value::payload_size))
            .sum()
    }

    /// Bytes a `[[Set]]` of `value` on `key` adds to the record; zero when the
    /// assignment cannot grow it.
    ///
    /// A setter may store the value under any key, so it is charged as a new slot.
    pub(crate) fn growth_for_set(&self, key: &str, value: &Value) -> usize {
        match self.properties.get(key) {
            Some(PropertyDescriptor::Data {
                value: old, writable: true, ..
            }) => value.payload_size().saturating_sub(old.payload_size()),
            Some(PropertyDescriptor::Accessor { set: Some(_), .. }) => slot_size(key) + value.payload_size(),
            Some(_) => 0,
            None if self.extensible => slot_size(key) + value.payload_size(),
            None => 0,
        }
    }

    /// Bytes a `[[DefineOwnProperty]]` of `desc` on `key` adds to the record.
    pub(crate) fn growth_for_define(&self, key: &str, desc: &PropertyDescriptor) -> usize {
        let incoming = desc.value().map_or(0, Value::payload_size);
        match self.properties.get(key) {
            Some(current) => incoming.saturating_sub(current.value().map_or(0, Value::payload_size)),
            None if self.extensible => slot_size(key) + incoming,
            None => 0,
        }
    }
}

fn slot_size(key: &str) -> usize {
    key.len() + std::mem::size_of::<PropertyDescriptor>()
}

/// Rules for changing a non-configurable property.
///
/// The replacement must stay non-configurable, keep its enumerability and
/// kind, and may not loosen or change a non-writable value or swap accessor
/// functions.
fn redefinition_allowed(current: &PropertyDescriptor, desc: &PropertyDescriptor) -> bool {
    if desc.is_configurable() || desc.is_enumerable() != current.is_enumerable() {
        return false;
    }
    match (current, desc) {
        (
            PropertyDescriptor::Data {
                value: current_value,
                writable: current_writable,
                ..
            },
            PropertyDescriptor::Data {
                value: new_value,
                writable: new_writable,
                ..
            },
        ) => *current_writable || (!*new_writable && current_value.same_value(new_value)),
        (
            PropertyDescriptor::Accessor {
                get: cur_get,
                set: cur_set,
                ..
            },
            PropertyDescriptor::Accessor {
                get: new_get,
                set: new_set,
                ..
            },
        ) => {
            cur_get.map(|f| f as usize) == new_get.map(|f| f as usize)
                && cur_set.map(|f| f as usize) == new_set.map(|f| f as usize)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_name(record: &Record) -> Value {
        let first = record.field("first").and_then(Value::as_str).unwrap_or_default();
        let last = record.field("last").and_then(Value::as_str).unwrap_or_default();
        Value::from(format!("{first} {last}"))
    }

    fn set_first(record: &mut Record, value: Value) -> Option<Value> {
        record.put_field("first", value)
    }

    fn person() -> Record {
        let mut record = Record::default();
        record.set("first", Value::from("Ada"));
        record.set("last", Value::from("Lovelace"));
        record
    }

    #[test]
    fn writable_data_set_replaces_and_releases_old_value() {
        let mut record = person();
        let outcome = record.set("first", Value::from("Grace"));
        assert!(outcome.success);
        assert_eq!(outcome.released, Some(Value::from("Ada")));
        assert_eq!(record.field("first"), Some(&Value::from("Grace")));
    }

    #[test]
    fn read_only_set_is_rejected_and_hands_value_back() {
        let mut record = Record::default();
        record.define_own_property("id", PropertyDescriptor::read_only(Value::Int(1)));
        let outcome = record.set("id", Value::Int(2));
        assert!(!outcome.success);
        assert_eq!(outcome.released, Some(Value::Int(2)));
        assert_eq!(record.field("id"), Some(&Value::Int(1)));
    }

    #[test]
    fn non_extensible_record_rejects_new_keys_but_accepts_updates() {
        let mut record = person();
        record.prevent_extensions();
        assert!(!record.set("age", Value::Int(36)).success);
        assert!(record.set("first", Value::from("Augusta")).success);
        assert!(!record.has_own_property("age"));
    }

    #[test]
    fn accessor_get_and_set_run_host_functions() {
        let mut record = person();
        record.define_own_property("full", PropertyDescriptor::accessor(Some(full_name), Some(set_first)));
        assert_eq!(record.get_borrowed("full"), Value::from("Ada Lovelace"));

        let outcome = record.set("full", Value::from("Grace"));
        assert!(outcome.success);
        assert_eq!(outcome.released, Some(Value::from("Ada")));
        assert_eq!(record.get_borrowed("full"), Value::from("Grace Lovelace"));
    }

    #[test]
    fn getter_only_accessor_rejects_writes() {
        let mut record = person();
        record.define_own_property("full", PropertyDescriptor::accessor(Some(full_name), None));
        assert!(!record.set("full", Value::from("x")).success);
    }

    #[test]
    fn delete_respects_configurability() {
        let mut record = person();
        let removal = record.delete("first");
        assert!(removal.success);
        assert!(removal.released.is_some());
        assert!(record.delete("missing").success);

        record.seal();
        assert!(!record.delete("last").success);
        assert!(record.has_own_property("last"));
        assert!(record.is_sealed());
        assert!(!record.is_frozen());
    }

    #[test]
    fn freeze_makes_data_read_only() {
        let mut record = person();
        record.freeze();
        assert!(record.is_frozen());
        assert!(!record.set("first", Value::from("x")).success);
    }

    #[test]
    fn non_configurable_redefinition_rules() {
        let mut record = Record::default();
        record.define_own_property("id", PropertyDescriptor::read_only(Value::Int(1)));
        // same value, same attributes: allowed
        assert!(record.define_own_property("id", PropertyDescriptor::read_only(Value::Int(1))).success);
        // changing the value of a non-writable property: rejected
        assert!(!record.define_own_property("id", PropertyDescriptor::read_only(Value::Int(2))).success);
        // becoming configurable again: rejected
        assert!(!record.define_own_property("id", PropertyDescriptor::data(Value::Int(1))).success);
    }

    #[test]
    fn keys_skip_non_enumerable_properties() {
        let mut record = person();
        record.define_own_property(
            "hidden",
            PropertyDescriptor::Data {
                value: Value::Null,
                writable: true,
                enumerable: false,
                configurable: true,
            },
        );
        assert_eq!(record.keys(), vec!["first".to_owned(), "last".to_owned()]);
        assert_eq!(record.len(), 3);
    }
}
