use crate::heap::HeapId;

/// An observed wrapper: the interception layer in front of one record.
///
/// Holds a strong reference to its target, released when the wrapper is freed.
/// The wrapper has no properties of its own; every access is forwarded.
#[derive(Debug)]
pub(crate) struct Observed {
    target: HeapId,
}

impl Observed {
    /// The caller transfers one reference to `target` into the wrapper.
    pub fn new(target: HeapId) -> Self {
        Self { target }
    }

    pub fn target(&self) -> HeapId {
        self.target
    }
}
