//! # monobridge Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the monobridge library. Import this module to get quick access to everything a
//! host needs to load assemblies, look up types and call into managed code.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all monobridge operations
pub use crate::Error;

/// The result type used throughout monobridge
pub use crate::Result;

/// Details of a managed exception thrown during a call
pub use crate::exception::{ManagedExceptionInfo, StackFrameInfo};

// ================================================================================================
// Bootstrap
// ================================================================================================

/// Runtime bootstrap and shutdown
pub use crate::jit;

/// Bootstrap configuration
pub use crate::config::{init_tracing, DebuggingConfig, JitConfig};

/// Categorized log handlers
pub use crate::logger::{log_message, set_log_handler};

// ================================================================================================
// Domains, Assemblies and Types
// ================================================================================================

/// Execution domains and loaded assemblies
pub use crate::{assembly::Assembly, domain::Domain};

/// Type handles and the metadata cache reset
pub use crate::types::{reset_all_caches, Type};

/// Member handles
pub use crate::members::{Field, Method, Property, Visibility};

/// Managed objects and strings
pub use crate::object::{MonoString, Object};

// ================================================================================================
// Marshaling and Invocation
// ================================================================================================

/// Value conversion between Rust and managed representations
pub use crate::marshal::{Blittable, ManagedValue, ManagedWrapper, MonoConverter};

/// Signature-checked invokers
pub use crate::invoke::{
    get_field_value, get_property_value, get_static_field_value, make_field_invoker,
    make_method_invoker, make_property_invoker, set_field_value, set_property_value,
    set_static_field_value, FieldInvoker, MethodInvoker, PropertyInvoker,
};

// ================================================================================================
// Containers and GC
// ================================================================================================

/// Typed views over managed sequences
pub use crate::containers::{Array, List};

/// Scoped GC pins
pub use crate::gc::{pin_object, with_pinned, GcHandle};
