//! Value conversion and argument marshaling across the native/managed boundary.
//!
//! A native value crosses the boundary in two steps. [`MonoConverter::to_managed`] turns it
//! into a [`ManagedValue`]: either the raw bytes of a value type, or a (possibly null)
//! managed reference. [`to_mono_arg`] then produces the pointer the runtime expects in one
//! parameter slot, given the parameter's declared type. Results travel the other way
//! through [`MonoConverter::from_managed`].
//!
//! # Key Components
//!
//! - [`Blittable`] - Plain-data native types with a byte-exact managed representation
//! - [`MonoConverter`] - The per-type conversion contract, open for user types
//! - [`to_mono_arg`] - Calling-convention pointer for one argument slot
//! - [`ManagedWrapper`] - Native state attached to managed instances
//! - [`managed_converter!`] - Converter for a native type carried by a managed wrapper class
//!
//! # Extending the Converters
//!
//! Any `Copy` struct mirroring a managed struct becomes convertible by implementing
//! [`Blittable`]. Native types without a managed layout, such as resource handles or
//! shared state, are carried by an instance of a managed wrapper class instead:
//!
//! ```rust,ignore
//! #[derive(Clone)]
//! struct Session {
//!     id: u64,
//! }
//!
//! monobridge::managed_converter!(Session, "Game.NativeSession");
//! ```

mod arg;
mod blittable;
mod converter;
mod wrapper;

pub use arg::to_mono_arg;
pub use blittable::Blittable;
pub use converter::{ManagedValue, MonoConverter};
pub use wrapper::{ManagedWrapper, WrappedNative};
