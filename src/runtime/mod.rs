//! The runtime boundary.
//!
//! This module defines the only surface through which the bridge talks to a managed
//! virtual machine: the [`Runtime`] trait, the opaque raw handles it traffics in, and the
//! attribute flag words it reports. A process installs exactly one runtime with
//! [`install`]; every wrapper in the crate reaches it through [`get`].
//!
//! # Key Components
//!
//! - [`Runtime`] - The embedding API subset consumed by the bridge
//! - [`ClassPtr`], [`ObjectPtr`], ... - Identity-compared raw handles
//! - [`flags`] - ECMA-335 attribute constants and flag groups
//!
//! # Raw Pointer Conventions
//!
//! The value-level entry points follow the embedding API of the Mono runtime:
//!
//! - An argument slot for a **value-type** parameter points at the unboxed value bytes.
//! - An argument slot for a **reference-type** parameter *is* the object pointer (or null).
//! - Field reads write the value bytes for value-type fields and an object pointer for
//!   reference-type fields into the output location.
//! - Field writes take the value address for value-type fields and the object pointer
//!   itself for reference-type fields.

use std::{
    ffi::c_void,
    sync::{Arc, OnceLock},
};

use crate::{Error, Result};

pub mod flags;
mod handles;

pub use handles::{
    AssemblyPtr, AssemblyReference, ClassPtr, DomainPtr, FieldPtr, ImagePtr, MethodPtr,
    ObjectPtr, PropertyPtr,
};

/// Outcome of a managed call: the (boxed) return value, or the thrown exception object.
pub type InvokeResult = std::result::Result<Option<ObjectPtr>, ObjectPtr>;

/// The subset of the managed runtime's embedding API consumed by the bridge.
///
/// Implementations must be callable from any thread. Queries that take a handle may assume
/// the handle was produced by the same runtime and is still alive.
pub trait Runtime: Send + Sync {
    // ----- classes -----------------------------------------------------------------------

    /// Looks up a class by namespace and simple name in an image.
    fn class_from_name(&self, image: ImagePtr, namespace: &str, name: &str) -> Option<ClassPtr>;
    /// Simple name of a class.
    fn class_name(&self, class: ClassPtr) -> String;
    /// Namespace of a class, empty for nested classes.
    fn class_namespace(&self, class: ClassPtr) -> String;
    /// Full display name, `+`-separated for nesting and `<...>`-decorated for generics.
    fn class_display_name(&self, class: ClassPtr) -> String;
    /// Size and alignment of the unboxed value.
    fn class_value_size(&self, class: ClassPtr) -> (usize, usize);
    /// Array rank, 0 for non-array classes.
    fn class_rank(&self, class: ClassPtr) -> u32;
    /// Raw `TypeAttributes` word.
    fn class_flags(&self, class: ClassPtr) -> u32;
    /// Whether instances are value types.
    fn class_is_valuetype(&self, class: ClassPtr) -> bool;
    /// Whether the class is an enumeration.
    fn class_is_enum(&self, class: ClassPtr) -> bool;
    /// Direct base class.
    fn class_parent(&self, class: ClassPtr) -> Option<ClassPtr>;
    /// Enclosing class of a nested class.
    fn class_nesting_type(&self, class: ClassPtr) -> Option<ClassPtr>;
    /// Immediate nested classes.
    fn class_nested_types(&self, class: ClassPtr) -> Vec<ClassPtr>;
    /// Whether `class` equals or derives from `parent`.
    fn class_is_subclass_of(&self, class: ClassPtr, parent: ClassPtr) -> bool;
    /// Element class of an array class.
    fn class_element_class(&self, class: ClassPtr) -> Option<ClassPtr>;
    /// Underlying integral class of an enumeration.
    fn class_enum_basetype(&self, class: ClassPtr) -> Option<ClassPtr>;
    /// Fields declared directly on the class.
    fn class_fields(&self, class: ClassPtr) -> Vec<FieldPtr>;
    /// Properties declared directly on the class.
    fn class_properties(&self, class: ClassPtr) -> Vec<PropertyPtr>;
    /// Methods declared directly on the class.
    fn class_methods(&self, class: ClassPtr) -> Vec<MethodPtr>;
    /// Field declared directly on the class.
    fn class_field_from_name(&self, class: ClassPtr, name: &str) -> Option<FieldPtr>;
    /// Property declared directly on the class.
    fn class_property_from_name(&self, class: ClassPtr, name: &str) -> Option<PropertyPtr>;
    /// Method declared directly on the class, with `argc` parameters or any arity if `None`.
    fn class_method_from_name(
        &self,
        class: ClassPtr,
        name: &str,
        argc: Option<usize>,
    ) -> Option<MethodPtr>;
    /// Method declared directly on the class matching a `Name(Type1,Type2)` description.
    fn class_method_from_desc(&self, class: ClassPtr, desc: &str) -> Option<MethodPtr>;
    /// Custom attribute instances applied to the class.
    fn class_custom_attrs(&self, class: ClassPtr) -> Vec<ObjectPtr>;
    /// Closes an open generic class over the given type arguments.
    fn class_inflate_generic(&self, open: ClassPtr, args: &[ClassPtr]) -> Option<ClassPtr>;
    /// Generic type arguments of a closed generic class.
    fn class_generic_args(&self, class: ClassPtr) -> Vec<ClassPtr>;
    /// Image that defines the class.
    fn class_image(&self, class: ClassPtr) -> ImagePtr;
    /// Reflection `System.Type` instance for a class.
    fn type_get_object(&self, domain: DomainPtr, class: ClassPtr) -> ObjectPtr;
    /// Class represented by a reflection `System.Type` instance.
    fn reflection_type_get_class(&self, object: ObjectPtr) -> Option<ClassPtr>;

    // ----- fields ------------------------------------------------------------------------

    /// Name of a field.
    fn field_name(&self, field: FieldPtr) -> String;
    /// `Namespace.Class:field` name of a field.
    fn field_full_name(&self, field: FieldPtr) -> String;
    /// Declared type of a field.
    fn field_type(&self, field: FieldPtr) -> ClassPtr;
    /// Declaring class of a field.
    fn field_parent(&self, field: FieldPtr) -> ClassPtr;
    /// Raw `FieldAttributes` word.
    fn field_flags(&self, field: FieldPtr) -> u32;
    /// Custom attribute instances applied to the field.
    fn field_custom_attrs(&self, field: FieldPtr) -> Vec<ObjectPtr>;
    /// Reads an instance field into `out`.
    ///
    /// # Safety
    /// `out` must be valid for writes of the field's value size, or of one pointer for
    /// reference-typed fields.
    unsafe fn field_get_value(&self, object: ObjectPtr, field: FieldPtr, out: *mut c_void);
    /// Writes an instance field from `value`.
    ///
    /// # Safety
    /// `value` must point at the field's value size bytes, or be an object pointer (or null)
    /// for reference-typed fields.
    unsafe fn field_set_value(&self, object: ObjectPtr, field: FieldPtr, value: *mut c_void);
    /// Reads a static field into `out`.
    ///
    /// # Safety
    /// Same contract as [`Runtime::field_get_value`].
    unsafe fn field_static_get_value(&self, domain: DomainPtr, field: FieldPtr, out: *mut c_void);
    /// Writes a static field from `value`.
    ///
    /// # Safety
    /// Same contract as [`Runtime::field_set_value`].
    unsafe fn field_static_set_value(
        &self,
        domain: DomainPtr,
        field: FieldPtr,
        value: *mut c_void,
    );
    /// Reads an instance field as an object, boxing value-typed fields.
    fn field_get_value_object(
        &self,
        domain: DomainPtr,
        field: FieldPtr,
        object: ObjectPtr,
    ) -> Option<ObjectPtr>;

    // ----- properties --------------------------------------------------------------------

    /// Name of a property.
    fn property_name(&self, property: PropertyPtr) -> String;
    /// Declaring class of a property.
    fn property_parent(&self, property: PropertyPtr) -> ClassPtr;
    /// Raw `PropertyAttributes` word.
    fn property_flags(&self, property: PropertyPtr) -> u32;
    /// Getter accessor.
    fn property_get_method(&self, property: PropertyPtr) -> Option<MethodPtr>;
    /// Setter accessor.
    fn property_set_method(&self, property: PropertyPtr) -> Option<MethodPtr>;
    /// Custom attribute instances applied to the property.
    fn property_custom_attrs(&self, property: PropertyPtr) -> Vec<ObjectPtr>;

    // ----- methods -----------------------------------------------------------------------

    /// Simple name of a method.
    fn method_name(&self, method: MethodPtr) -> String;
    /// `Namespace.Class:Method (params)` name of a method.
    fn method_full_name(&self, method: MethodPtr) -> String;
    /// Declaring class of a method.
    fn method_class(&self, method: MethodPtr) -> ClassPtr;
    /// Raw `MethodAttributes` and `MethodImplAttributes` words.
    fn method_flags(&self, method: MethodPtr) -> (u32, u32);
    /// Declared parameter classes, in order.
    fn method_param_types(&self, method: MethodPtr) -> Vec<ClassPtr>;
    /// Declared return class, `System.Void` for procedures.
    fn method_return_type(&self, method: MethodPtr) -> ClassPtr;
    /// Custom attribute instances applied to the method.
    fn method_custom_attrs(&self, method: MethodPtr) -> Vec<ObjectPtr>;
    /// Most-derived override of `method` for the runtime class of `object`.
    fn object_get_virtual_method(&self, object: ObjectPtr, method: MethodPtr) -> MethodPtr;
    /// Calls a method.
    ///
    /// # Safety
    /// `args` must hold one slot per declared parameter, following the module-level
    /// pointer conventions, and every slot must stay valid for the duration of the call.
    unsafe fn runtime_invoke(
        &self,
        method: MethodPtr,
        this: Option<ObjectPtr>,
        args: &[*mut c_void],
    ) -> InvokeResult;

    // ----- objects -----------------------------------------------------------------------

    /// Runtime class of an object.
    fn object_get_class(&self, object: ObjectPtr) -> ClassPtr;
    /// Allocates an instance without running any constructor.
    fn object_new(&self, domain: DomainPtr, class: ClassPtr) -> Option<ObjectPtr>;
    /// Runs the parameterless constructor of an instance.
    fn runtime_object_init(&self, object: ObjectPtr) -> std::result::Result<(), ObjectPtr>;
    /// Boxes a value.
    ///
    /// # Safety
    /// `data` must point at the class's value size readable bytes.
    unsafe fn value_box(&self, domain: DomainPtr, class: ClassPtr, data: *const c_void)
        -> ObjectPtr;
    /// Address of the value payload of a boxed object.
    fn object_unbox(&self, object: ObjectPtr) -> *mut c_void;
    /// Calls `ToString` on an object, returning a string object.
    fn object_to_string(&self, object: ObjectPtr) -> InvokeResult;

    // ----- strings -----------------------------------------------------------------------

    /// Allocates a string from UTF-8 text.
    fn string_new(&self, domain: DomainPtr, text: &str) -> ObjectPtr;
    /// Allocates a string from UTF-16 code units.
    fn string_new_utf16(&self, domain: DomainPtr, units: &[u16]) -> ObjectPtr;
    /// UTF-16 code units of a string object.
    fn string_chars(&self, string: ObjectPtr) -> Vec<u16>;

    // ----- arrays ------------------------------------------------------------------------

    /// Allocates a zero-initialized single-dimensional array.
    fn array_new(&self, domain: DomainPtr, element: ClassPtr, len: usize) -> Option<ObjectPtr>;
    /// Number of elements of an array.
    fn array_length(&self, array: ObjectPtr) -> usize;
    /// Address of `index * element_size` bytes into the array payload, null if out of range.
    fn array_addr(&self, array: ObjectPtr, element_size: usize, index: usize) -> *mut c_void;
    /// Stores a reference into a reference-element array.
    fn array_setref(&self, array: ObjectPtr, index: usize, value: Option<ObjectPtr>);
    /// Loads a reference from a reference-element array.
    fn array_getref(&self, array: ObjectPtr, index: usize) -> Option<ObjectPtr>;

    // ----- gc ----------------------------------------------------------------------------

    /// Creates a strong handle for an object, pinning it if requested.
    fn gchandle_new(&self, object: ObjectPtr, pinned: bool) -> u32;
    /// Releases a strong handle.
    fn gchandle_free(&self, handle: u32);
    /// Object referenced by a handle.
    fn gchandle_get_target(&self, handle: u32) -> Option<ObjectPtr>;
    /// Bytes reserved by the managed heap.
    fn gc_heap_size(&self) -> u64;
    /// Bytes in use by live objects.
    fn gc_used_size(&self) -> u64;
    /// Forces a collection up to and including `generation`.
    fn gc_collect(&self, generation: i32);
    /// Highest generation supported by the collector.
    fn gc_max_generation(&self) -> i32;

    // ----- exceptions --------------------------------------------------------------------

    /// Allocates an exception object of a named class with the given message.
    fn exception_from_name_msg(
        &self,
        image: ImagePtr,
        namespace: &str,
        name: &str,
        message: &str,
    ) -> Option<ObjectPtr>;

    // ----- domains and assemblies --------------------------------------------------------

    /// Creates a named domain.
    fn domain_create(&self, name: &str) -> Option<DomainPtr>;
    /// Currently active domain.
    fn domain_get(&self) -> Option<DomainPtr>;
    /// Friendly name a domain was created with.
    fn domain_friendly_name(&self, domain: DomainPtr) -> String;
    /// Activates a domain on the calling thread.
    fn domain_set(&self, domain: DomainPtr) -> bool;
    /// Unloads a domain and everything loaded into it.
    fn domain_unload(&self, domain: DomainPtr);
    /// Opens an assembly from a path, sharing an already loaded image.
    fn domain_assembly_open(&self, domain: DomainPtr, path: &str) -> Option<AssemblyPtr>;
    /// Opens an image from an in-memory copy of its file.
    fn image_open_from_data(&self, data: &[u8], name: &str) -> Result<ImagePtr>;
    /// Loads an assembly from an opened image.
    fn assembly_load_from(&self, image: ImagePtr, name: &str) -> Option<AssemblyPtr>;
    /// Image of an assembly.
    fn assembly_image(&self, assembly: AssemblyPtr) -> ImagePtr;
    /// Simple name of an assembly.
    fn assembly_name(&self, assembly: AssemblyPtr) -> String;
    /// File name the image was loaded from.
    fn image_filename(&self, image: ImagePtr) -> String;
    /// Every class defined in the image, nested classes included.
    fn image_types(&self, image: ImagePtr) -> Vec<ClassPtr>;
    /// Assembly references recorded in the image manifest.
    fn image_references(&self, image: ImagePtr) -> Vec<AssemblyReference>;
    /// The core library image.
    fn corlib(&self) -> ImagePtr;
    /// Sets the directories probed for assemblies.
    fn set_assemblies_path(&self, path: &str);
}

static RUNTIME: OnceLock<Arc<dyn Runtime>> = OnceLock::new();

/// Installs the process-wide runtime.
///
/// # Errors
/// Returns [`Error::AlreadyInitialized`] if a runtime has been installed before.
pub fn install(runtime: Arc<dyn Runtime>) -> Result<()> {
    RUNTIME.set(runtime).map_err(|_| Error::AlreadyInitialized)?;
    tracing::debug!("managed runtime installed");
    Ok(())
}

/// Returns the installed runtime.
///
/// # Errors
/// Returns [`Error::RuntimeNotInitialized`] if no runtime has been installed.
pub fn get() -> Result<&'static dyn Runtime> {
    RUNTIME
        .get()
        .map(|runtime| runtime.as_ref())
        .ok_or(Error::RuntimeNotInitialized)
}

/// Whether a runtime has been installed.
#[must_use]
pub fn is_installed() -> bool {
    RUNTIME.get().is_some()
}
