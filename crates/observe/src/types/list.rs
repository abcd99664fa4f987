use crate::value::Value;

/// An ordered sequence of values.
///
/// Lists live on the heap so they can be shared and can hold records, but the
/// wrapping engine never wraps them: a list read through an observed record is
/// returned as the raw list.
#[derive(Debug, Default)]
pub(crate) struct List {
    items: Vec<Value>,
}

impl List {
    pub fn new(items: Vec<Value>) -> Self {
        Self { items }
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.items
    }

    pub fn estimate_size(&self) -> usize {
        self.items
            .iter()
            .map(|v| std::mem::size_of::<Value>() + v.payload_size())
            .sum()
    }
}
