//! Typed views over managed sequences.
//!
//! [`Array`] accesses element storage directly, one memory copy or reference store per
//! element. [`List`] has no direct storage access: every operation is a managed call of the
//! list's own methods through a [`crate::MethodInvoker`].
//!
//! Native element types without a managed counterpart can still be stored in an array:
//! their values are laid out back to back in a `System.Byte[]`, see [`Array::is_raw`].

mod array;
mod list;

pub use array::Array;
pub use list::List;

use crate::{domain::Domain, marshal::MonoConverter, types::Type, Result};

/// Managed type for the native element type `T`, invalid if `T` has none.
///
/// Types without a static name and without a value representation map to `System.Object`.
fn element_type_of<T: MonoConverter>(domain: &Domain) -> Result<Type> {
    match T::managed_type_name() {
        Some(name) => domain.resolve_type(&name),
        None if T::value_size().is_none() => domain.resolve_type("System.Object"),
        None => Ok(Type::invalid()),
    }
}
