use std::fmt;

use crate::{resource::ResourceError, value::ValueKind};

/// Error returned by session operations that need a record receiver.
///
/// Rejected assignments and deletes are *not* errors; they are reported as a
/// `false` success flag. This type only covers misuse by the host and resource
/// exhaustion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// The receiver is not a record (or a wrapper of one).
    NotARecord { kind: ValueKind },
    /// A resource limit was hit while wrapping a read result or growing a record.
    Resource(ResourceError),
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotARecord { kind } => write!(f, "cannot access properties of a {kind} value"),
            Self::Resource(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for AccessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Resource(err) => Some(err),
            Self::NotARecord { .. } => None,
        }
    }
}

impl From<ResourceError> for AccessError {
    fn from(err: ResourceError) -> Self {
        Self::Resource(err)
    }
}

pub type AccessResult<T> = Result<T, AccessError>;
