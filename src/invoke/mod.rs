//! Signature-checked invokers.
//!
//! An invoker binds one managed member to a static Rust signature. The binding is checked
//! once, when the invoker is created; afterwards every call only marshals values and
//! performs the runtime call.
//!
//! # Key Components
//!
//! - [`MethodInvoker`] - `fn(A) -> R` over a managed method, with virtual dispatch
//! - [`FieldInvoker`] - typed reads and writes of field storage
//! - [`PropertyInvoker`] - typed accessor calls, indexed or not
//! - [`ArgList`] - the tuple encoding of argument lists
//!
//! The `get_*_value`/`set_*_value` helpers resolve and access a member in one step and
//! report failure as `None`/`false` instead of an error.

mod args;
mod field;
mod method;
mod property;

pub use args::ArgList;
pub use field::{
    get_field_value, get_static_field_value, make_field_invoker, set_field_value,
    set_static_field_value, FieldInvoker,
};
pub use method::{make_method_invoker, MethodInvoker};
pub use property::{get_property_value, make_property_invoker, set_property_value, PropertyInvoker};

use crate::types::Type;

impl AsRef<Type> for Type {
    fn as_ref(&self) -> &Type {
        self
    }
}
