//! Field, property and method handles.
//!
//! Each handle wraps one raw member handle plus a shared, memoized metadata record. Member
//! lookups by name search the owner type first and then its base types, so inherited
//! members are found through derived types.
//!
//! # Key Components
//!
//! - [`Field`] - Declared type, storage and accessibility of a field
//! - [`Property`] - Accessor methods and value type of a property
//! - [`Method`] - Signature, modifiers and accessibility of a method
//! - [`Visibility`] - Member accessibility, ordered by restrictiveness

mod field;
mod method;
mod property;
mod visibility;

pub use field::Field;
pub use method::Method;
pub use property::Property;
pub use visibility::Visibility;

/// Drops the memoized metadata of every field, property and method.
pub(crate) fn reset_member_caches() {
    field::FIELD_CACHE.reset();
    property::PROPERTY_CACHE.reset();
    method::METHOD_CACHE.reset();
}
