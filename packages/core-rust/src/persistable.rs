//! Objects eligible for persistence.
//!
//! Every persistable type carries a stable type tag that selects its
//! formatter. Objects are handled as `dyn Persistable` by the dispatch layer
//! and downcast back to their concrete type by the formatter that owns them.

use std::any::Any;
use std::fmt::Debug;

use crate::property::PropertySet;

/// An object that can be written to and read from storage.
pub trait Persistable: Any + Debug + Send + Sync {
    /// Stable identifier used to look up this object's formatter.
    fn type_tag(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl dyn Persistable + '_ {
    /// Returns `true` if the concrete type is `T`.
    #[must_use]
    pub fn is<T: Persistable>(&self) -> bool {
        self.as_any().is::<T>()
    }

    #[must_use]
    pub fn downcast_ref<T: Persistable>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Persistable>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    /// Consumes the box and returns the concrete object, or `None` if the
    /// run-time type is not `T`.
    #[must_use]
    pub fn downcast<T: Persistable>(self: Box<Self>) -> Option<Box<T>> {
        self.into_any().downcast::<T>().ok()
    }
}

impl Persistable for PropertySet {
    fn type_tag(&self) -> &'static str {
        crate::PROPERTY_SET_TYPE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}
