// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! # monobridge
//!
//! A type-checked reflection and invocation bridge for embedded Mono managed runtimes.
//! `monobridge` wraps the opaque handles of a managed virtual machine (assemblies, types,
//! fields, properties, methods and objects) in value-semantic Rust types, and lets native
//! code construct managed objects, read and write their state, and call managed methods
//! with signature-checked argument marshaling.
//!
//! # Architecture
//!
//! The crate is organized bottom-up, following the way a value travels across the
//! native/managed boundary:
//!
//! - **Runtime boundary**: [`runtime::Runtime`] mirrors the subset of the embedding API the
//!   bridge consumes. Raw handles are opaque pointer newtypes compared by identity.
//! - **Handle wrappers**: [`Type`], [`Field`], [`Property`], [`Method`], [`Object`] and
//!   [`MonoString`] wrap one raw handle each and expose identity and metadata queries.
//! - **Metadata caches**: derived metadata is memoized per raw handle and shared between
//!   wrappers, see [`types::reset_all_caches`].
//! - **Type resolution**: [`Assembly::get_type_full`] maps dotted, nested and ambiguous
//!   names onto type handles.
//! - **Marshaling**: [`marshal::to_mono_arg`] produces the calling-convention pointer for a
//!   parameter slot, [`marshal::MonoConverter`] converts values in both directions.
//! - **Invokers**: [`MethodInvoker`], [`FieldInvoker`] and [`PropertyInvoker`] bind a member
//!   to a static Rust signature and perform the actual call, read or write.
//! - **Containers**: [`Array`] and [`List`] are typed views over managed sequences.
//!
//! An in-process implementation of the runtime lives in [`emulation`]. It backs the test
//! suite and hosts that do not ship a native runtime.
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use monobridge::prelude::*;
//!
//! jit::init(JitConfig::default())?;
//! let domain = Domain::current()?;
//! let assembly = domain.get_assembly("Game.dll", true)?;
//!
//! let player = assembly.get_type("Game", "Player");
//! let object = player.new_instance(&domain)?;
//!
//! let heal = make_method_invoker::<(i32,), i32>(&player, "Heal")?;
//! let health = heal.invoke_on(&object, (25,))?;
//! println!("health: {health}");
//! # Ok::<(), monobridge::Error>(())
//! ```
//!
//! # Thread Safety
//!
//! Metadata caches are concurrent maps and the current domain lives behind a lock, so the
//! bridge can be shared between threads. Managed calls themselves are synchronous and
//! block the calling thread until the managed side returns or throws.

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use monobridge::prelude::*;
///
/// jit::init(JitConfig::default())?;
/// let corlib = Assembly::corlib()?;
/// let int32 = corlib.get_type("System", "Int32");
/// assert!(int32.is_valuetype());
/// # Ok::<(), monobridge::Error>(())
/// ```
pub mod prelude;

/// The runtime boundary: raw handles, attribute flags and the [`runtime::Runtime`] trait.
pub mod runtime;

/// An in-process managed runtime implementing [`runtime::Runtime`].
///
/// The emulation keeps a managed heap of stable-address objects, class metadata built
/// through [`emulation::AssemblyBuilder`], native-closure method bodies, and a small
/// `corlib` with the primitive types, strings, exceptions and the generic list.
pub mod emulation;

/// Type handles, metadata caches and the type-name resolver.
pub mod types;

/// Field, property and method handles.
pub mod members;

/// Managed object and string handles.
pub mod object;

/// Argument marshaling and the converter registry.
pub mod marshal;

/// Signature-checked method, field and property invokers.
pub mod invoke;

/// Typed views over managed arrays and generic lists.
pub mod containers;

/// Managed execution domains.
pub mod domain;

/// Loaded assemblies and name-based type resolution.
pub mod assembly;

/// Scoped GC pins and collector statistics.
pub mod gc;

/// Managed exception capture and stack-frame extraction.
pub mod exception;

/// Categorized log handlers.
pub mod logger;

/// Runtime bootstrap configuration.
pub mod config;

/// Bootstrap and shutdown of the managed runtime.
pub mod jit;

/// `monobridge` Result type
pub type Result<T> = std::result::Result<T, Error>;

/// `monobridge` Error type
pub use error::Error;

pub use assembly::Assembly;
pub use config::{DebuggingConfig, JitConfig};
pub use containers::{Array, List};
pub use domain::Domain;
pub use exception::{extract_relevant_stack_frame, ManagedExceptionInfo, StackFrameInfo};
pub use gc::GcHandle;
pub use invoke::{
    make_field_invoker, make_method_invoker, make_property_invoker, FieldInvoker, MethodInvoker,
    PropertyInvoker,
};
pub use members::{Field, Method, Property, Visibility};
pub use object::{MonoString, Object};
pub use types::Type;
