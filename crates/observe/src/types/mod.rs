mod collection;
mod list;
mod observed;
mod record;

pub(crate) use collection::{Map, Set};
pub(crate) use list::List;
pub(crate) use observed::Observed;
pub(crate) use record::{Assignment, Removal};
pub use record::{Getter, PropertyDescriptor, Record, Setter};
