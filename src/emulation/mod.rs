//! In-process emulated managed runtime.
//!
//! This module provides [`EmulatedRuntime`], a complete implementation of the
//! [`Runtime`] boundary that runs inside the host process. Classes are defined in code with
//! [`AssemblyBuilder`] and friends, methods are native closures, and objects live on a
//! [`heap::ManagedHeap`] whose addresses never change. The bridge cannot tell it apart from
//! an embedded virtual machine: every raw handle is a real, stable address, and the raw
//! pointer conventions of the embedding API are honoured byte for byte.
//!
//! # Architecture
//!
//! - [`metadata`] - Arena-allocated class, member, image and domain records
//! - [`heap`] - Object storage, strong handles and collector statistics
//! - [`call`] - Native method bodies and their call frames
//! - [`manifest`] - The on-disk image format
//! - `builder` - Definition builders and image instantiation
//! - `corlib` - The core library every image links against
//!
//! # Key Components
//!
//! - [`EmulatedRuntime`] - The runtime itself
//! - [`shared`] - The process-wide instance, installed as the bridge runtime on first use
//! - [`AssemblyBuilder`], [`ClassBuilder`], [`FieldBuilder`], [`PropertyBuilder`],
//!   [`MethodBuilder`] - Definition builders
//! - [`NativeCall`], [`EmValue`] - What a method body sees and returns
//!
//! # Loading Assemblies
//!
//! Definitions are registered by name. Opening an assembly resolves a path in this order:
//!
//! 1. An image already opened from the same path (shared loads)
//! 2. A manifest file at the path, or under one of the assemblies directories
//! 3. A registered definition named after the file stem
//!
//! # Example
//!
//! ```rust,ignore
//! use monobridge::emulation::{self, AssemblyBuilder, ClassBuilder};
//!
//! let runtime = emulation::shared()?;
//! runtime.register(AssemblyBuilder::new("Game").class(ClassBuilder::new("Game", "Player")));
//! ```

use std::{
    ffi::c_void,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock, RwLock},
};

use dashmap::DashMap;

pub mod call;
pub mod heap;
pub mod manifest;
pub(crate) mod metadata;

mod builder;
mod corlib;

pub use builder::{
    AssemblyBuilder, ClassBuilder, FieldBuilder, MethodBuilder, PropertyBuilder,
    COMPILER_GENERATED,
};
pub use call::{CallResult, EmValue, NativeBody, NativeCall};
pub use heap::GcStats;
pub use manifest::ImageManifest;

use crate::{
    emulation::{
        heap::{HeapObject, ManagedHeap, ObjectPayload, RawBuffer, POINTER_SIZE},
        metadata::{
            Arena, AssemblyDef, ClassDef, ClassKind, DomainDef, FieldDef, GenericInstance,
            ImageDef, Layout, MethodDef, PropertyDef,
        },
    },
    runtime::{
        self,
        flags::{FieldAttributes, MethodModifiers},
        AssemblyPtr, AssemblyReference, ClassPtr, DomainPtr, FieldPtr, ImagePtr, InvokeResult,
        MethodPtr, ObjectPtr, PropertyPtr, Runtime,
    },
    Error, Result,
};

/// Name of the root domain created with every runtime.
pub const ROOT_DOMAIN_NAME: &str = "monobridge";

/// Highest generation reported by the emulated collector.
const MAX_GENERATION: i32 = 1;

static SHARED: OnceLock<Arc<EmulatedRuntime>> = OnceLock::new();

/// Returns the process-wide emulated runtime, creating it on first use.
///
/// The first call also installs the runtime as the bridge runtime unless another runtime
/// has been installed already.
///
/// # Errors
/// Returns an error if the core library can not be built.
pub fn shared() -> Result<Arc<EmulatedRuntime>> {
    if let Some(runtime) = SHARED.get() {
        return Ok(runtime.clone());
    }

    let created = EmulatedRuntime::new()?;
    let runtime = SHARED.get_or_init(|| created).clone();
    match runtime::install(runtime.clone()) {
        Ok(()) | Err(Error::AlreadyInitialized) => Ok(runtime),
        Err(error) => Err(error),
    }
}

/// An in-process managed runtime.
pub struct EmulatedRuntime {
    classes: Arena<ClassDef>,
    fields: Arena<FieldDef>,
    properties: Arena<PropertyDef>,
    methods: Arena<MethodDef>,
    images: Arena<ImageDef>,
    assemblies: Arena<AssemblyDef>,
    domains: Arena<DomainDef>,
    heap: ManagedHeap,
    corlib: OnceLock<ImagePtr>,
    root_domain: OnceLock<DomainPtr>,
    current_domain: RwLock<Option<DomainPtr>>,
    live_domains: DashMap<usize, ()>,
    array_classes: DashMap<usize, ClassPtr>,
    generic_instances: DashMap<(usize, Vec<usize>), ClassPtr>,
    definitions: DashMap<String, AssemblyBuilder>,
    loaded_images: DashMap<String, ImagePtr>,
    assemblies_path: RwLock<Vec<PathBuf>>,
}

impl EmulatedRuntime {
    /// Creates a runtime with its core library and root domain.
    ///
    /// # Errors
    /// Returns an error if the core library definition does not resolve.
    pub fn new() -> Result<Arc<Self>> {
        let runtime = EmulatedRuntime {
            classes: Arena::default(),
            fields: Arena::default(),
            properties: Arena::default(),
            methods: Arena::default(),
            images: Arena::default(),
            assemblies: Arena::default(),
            domains: Arena::default(),
            heap: ManagedHeap::new(),
            corlib: OnceLock::new(),
            root_domain: OnceLock::new(),
            current_domain: RwLock::new(None),
            live_domains: DashMap::new(),
            array_classes: DashMap::new(),
            generic_instances: DashMap::new(),
            definitions: DashMap::new(),
            loaded_images: DashMap::new(),
            assemblies_path: RwLock::new(Vec::new()),
        };

        let corlib = corlib::definition().instantiate(&runtime, "mscorlib.dll")?;
        runtime.loaded_images.insert("mscorlib.dll".to_string(), corlib);

        let root = runtime.insert_domain(DomainDef::new(ROOT_DOMAIN_NAME));
        let _ = runtime.root_domain.set(root);
        *write_lock!(runtime.current_domain) = Some(root);

        tracing::debug!(classes = runtime.classes.len(), "emulated runtime created");
        Ok(Arc::new(runtime))
    }

    /// Registers an assembly definition, making it loadable by name.
    ///
    /// Registering a definition with the same name again replaces it for future loads.
    pub fn register(&self, assembly: AssemblyBuilder) {
        tracing::debug!(assembly = %assembly.name, "registered emulated assembly");
        self.definitions.insert(assembly.name.clone(), assembly);
    }

    /// Whether a definition with the given assembly name is registered.
    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// The root domain.
    #[must_use]
    pub fn root_domain(&self) -> Option<DomainPtr> {
        self.root_domain.get().copied()
    }

    /// Collector statistics.
    #[must_use]
    pub fn gc_stats(&self) -> GcStats {
        self.heap.stats()
    }

    /// Number of live heap objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.heap.len()
    }

    /// Runs a method with decoded arguments.
    ///
    /// Exceptions leaving the method get a stack frame for it appended to their trace.
    pub fn invoke_method(
        &self,
        method: MethodPtr,
        this: Option<ObjectPtr>,
        args: Vec<EmValue>,
    ) -> CallResult {
        let def = self.method_def(method);
        tracing::trace!(method = %def.name, args = args.len(), "emulated invoke");

        let outcome = if def.flags & MethodModifiers::STATIC.bits() == 0 && this.is_none() {
            Err(self.throw_from(
                method,
                "System",
                "NullReferenceException",
                "Object reference not set to an instance of an object",
            ))
        } else {
            match &def.body {
                Some(body) => body(&NativeCall::new(self, method, this, args)),
                None => Err(self.throw_from(
                    method,
                    "System",
                    "MissingMethodException",
                    &format!("Method '{}' has no implementation", def.name),
                )),
            }
        };

        outcome.map_err(|exception| {
            self.append_frame(exception, method);
            exception
        })
    }

    /// Formats an object the way `System.Object.ToString` does.
    #[must_use]
    pub fn format_object(&self, object: ObjectPtr) -> String {
        let Some(heap_object) = self.heap.get(object) else {
            return String::new();
        };
        let class = self.class_def(heap_object.class);

        match (&heap_object.payload, &class.kind) {
            (ObjectPayload::String(units), _) => String::from_utf16_lossy(units),
            (ObjectPayload::Data(data), ClassKind::Primitive { size, .. }) => {
                format_primitive(&class.name, &data.read(0, *size))
            }
            (ObjectPayload::Data(data), ClassKind::Enum) => {
                let size = data.len();
                let bytes = data.read(0, size);
                self.enum_literal_name(heap_object.class, &bytes)
                    .unwrap_or_else(|| format_integer(&bytes))
            }
            (ObjectPayload::Type(described), _) => self.display_name(*described),
            _ => self.display_name(heap_object.class),
        }
    }

    /// Reads a string object, lossily decoding unpaired surrogates.
    #[must_use]
    pub fn read_string(&self, string: ObjectPtr) -> String {
        String::from_utf16_lossy(&self.string_chars(string))
    }

    /// Allocates a string object in the current domain.
    pub fn alloc_string(&self, text: &str) -> ObjectPtr {
        let units: Vec<u16> = text.encode_utf16().collect();
        self.alloc_string_units(&units)
    }

    /// Reads an instance field by name, searching the object's class and its bases.
    #[must_use]
    pub fn read_instance_field(&self, object: ObjectPtr, name: &str) -> Option<EmValue> {
        let heap_object = self.heap.get(object)?;
        let field = self.find_instance_field(heap_object.class, name)?;
        let ObjectPayload::Data(data) = &heap_object.payload else {
            return None;
        };

        let offset = self.field_offset(&field);
        if self.class_def(field.ty).kind.is_valuetype() {
            let size = self.layout(field.ty).value_size;
            Some(EmValue::Value(data.read(offset, size)))
        } else {
            Some(EmValue::Ref(data.read_ref(offset)))
        }
    }

    /// Writes an instance field by name. Returns `false` if the field does not exist or
    /// the value does not fit it.
    pub fn write_instance_field(&self, object: ObjectPtr, name: &str, value: &EmValue) -> bool {
        let Some(heap_object) = self.heap.get(object) else {
            return false;
        };
        let Some(field) = self.find_instance_field(heap_object.class, name) else {
            return false;
        };
        let ObjectPayload::Data(data) = &heap_object.payload else {
            return false;
        };

        let offset = self.field_offset(&field);
        let is_value = self.class_def(field.ty).kind.is_valuetype();
        match value {
            EmValue::Value(bytes) if is_value && bytes.len() == self.layout(field.ty).value_size => {
                data.write(offset, bytes);
                true
            }
            EmValue::Ref(reference) if !is_value => {
                data.write_ref(offset, *reference);
                true
            }
            _ => false,
        }
    }

    /// Creates an exception object of a corlib class, falling back to
    /// `System.Exception` for unknown names.
    #[must_use]
    pub fn throw_from(
        &self,
        method: MethodPtr,
        namespace: &str,
        name: &str,
        message: &str,
    ) -> ObjectPtr {
        let class = self
            .corlib_class(namespace, name)
            .or_else(|| self.corlib_class("System", "Exception"));
        let exception = match class {
            Some(class) => self.new_exception(class, message),
            None => self.alloc_string(message),
        };
        tracing::trace!(
            method = %self.method_def(method).name,
            exception = %name,
            "emulated throw"
        );
        exception
    }

    // ----- records -----------------------------------------------------------------------

    pub(crate) fn insert_class(&self, def: ClassDef) -> ClassPtr {
        ClassPtr::from_non_null(self.classes.insert(def))
    }

    pub(crate) fn insert_field(&self, def: FieldDef) -> FieldPtr {
        FieldPtr::from_non_null(self.fields.insert(def))
    }

    pub(crate) fn insert_property(&self, def: PropertyDef) -> PropertyPtr {
        PropertyPtr::from_non_null(self.properties.insert(def))
    }

    pub(crate) fn insert_method(&self, def: MethodDef) -> MethodPtr {
        MethodPtr::from_non_null(self.methods.insert(def))
    }

    pub(crate) fn insert_image(&self, def: ImageDef) -> ImagePtr {
        ImagePtr::from_non_null(self.images.insert(def))
    }

    fn insert_domain(&self, def: DomainDef) -> DomainPtr {
        let domain = DomainPtr::from_non_null(self.domains.insert(def));
        self.live_domains.insert(domain.addr(), ());
        domain
    }

    pub(crate) fn class_def(&self, class: ClassPtr) -> Arc<ClassDef> {
        self.classes.get(class.addr())
    }

    pub(crate) fn field_def(&self, field: FieldPtr) -> Arc<FieldDef> {
        self.fields.get(field.addr())
    }

    pub(crate) fn property_def(&self, property: PropertyPtr) -> Arc<PropertyDef> {
        self.properties.get(property.addr())
    }

    pub(crate) fn method_def(&self, method: MethodPtr) -> Arc<MethodDef> {
        self.methods.get(method.addr())
    }

    pub(crate) fn image_def(&self, image: ImagePtr) -> Arc<ImageDef> {
        self.images.get(image.addr())
    }

    fn domain_def(&self, domain: DomainPtr) -> Arc<DomainDef> {
        self.domains.get(domain.addr())
    }

    pub(crate) fn corlib_image(&self) -> Option<ImagePtr> {
        self.corlib.get().copied()
    }

    pub(crate) fn find_class(&self, image: ImagePtr, namespace: &str, name: &str) -> Option<ClassPtr> {
        self.image_def(image)
            .top_level
            .get(&(namespace.to_string(), name.to_string()))
            .map(|entry| *entry.value())
    }

    pub(crate) fn corlib_class(&self, namespace: &str, name: &str) -> Option<ClassPtr> {
        self.find_class(self.corlib_image()?, namespace, name)
    }

    pub(crate) fn nested_class(&self, class: ClassPtr, name: &str) -> Option<ClassPtr> {
        let def = self.class_def(class);
        def.nested
            .iter()
            .map(|(_, nested)| *nested)
            .find(|nested| self.class_def(*nested).name == name)
    }

    // ----- layout ------------------------------------------------------------------------

    fn layout(&self, class: ClassPtr) -> Layout {
        let def = self.class_def(class);
        *def.layout.get_or_init(|| self.compute_layout(class, &def))
    }

    fn compute_layout(&self, class: ClassPtr, def: &ClassDef) -> Layout {
        match &def.kind {
            ClassKind::Primitive { size, align } => Layout {
                instance_size: *size,
                value_size: *size,
                align: *align,
            },
            ClassKind::Void => Layout {
                instance_size: 0,
                value_size: 0,
                align: 1,
            },
            ClassKind::Enum => {
                let (size, align) = self
                    .class_enum_basetype(class)
                    .map_or((4, 4), |base| self.slot(base));
                for (_, field) in def.fields.iter() {
                    let field = self.field_def(*field);
                    if !field.is_static() {
                        let _ = field.offset.set(0);
                    }
                }
                Layout {
                    instance_size: size,
                    value_size: size,
                    align,
                }
            }
            ClassKind::Value => {
                let (end, align) = self.place_fields(def, 0, 1);
                let size = end.next_multiple_of(align).max(1);
                Layout {
                    instance_size: size,
                    value_size: size,
                    align,
                }
            }
            ClassKind::Reference
            | ClassKind::String
            | ClassKind::Array { .. }
            | ClassKind::GenericParam { .. } => {
                let start = def
                    .parent()
                    .map_or(0, |parent| self.layout(parent).instance_size);
                let (end, _) = self.place_fields(def, start, POINTER_SIZE);
                Layout {
                    instance_size: end,
                    value_size: POINTER_SIZE,
                    align: POINTER_SIZE,
                }
            }
        }
    }

    /// Assigns sequential offsets to the instance fields of a class.
    fn place_fields(&self, def: &ClassDef, start: usize, min_align: usize) -> (usize, usize) {
        let mut offset = start;
        let mut align = min_align;
        for (_, field) in def.fields.iter() {
            let field = self.field_def(*field);
            if field.is_static() {
                continue;
            }
            let (size, field_align) = self.slot(field.ty);
            offset = offset.next_multiple_of(field_align.max(1));
            let _ = field.offset.set(offset);
            offset += size;
            align = align.max(field_align);
        }
        (offset, align)
    }

    /// Size and alignment of a storage slot holding a value of `class`.
    fn slot(&self, class: ClassPtr) -> (usize, usize) {
        if self.class_def(class).kind.is_valuetype() {
            let layout = self.layout(class);
            (layout.value_size, layout.align)
        } else {
            (POINTER_SIZE, POINTER_SIZE)
        }
    }

    fn field_offset(&self, field: &FieldDef) -> usize {
        let _ = self.layout(field.parent);
        field.offset.get().copied().unwrap_or(0)
    }

    fn find_instance_field(&self, class: ClassPtr, name: &str) -> Option<Arc<FieldDef>> {
        let mut current = Some(class);
        while let Some(class) = current {
            let def = self.class_def(class);
            let found = def
                .fields
                .iter()
                .map(|(_, field)| self.field_def(*field))
                .find(|field| field.name == name && !field.is_static());
            if found.is_some() {
                return found;
            }
            current = def.parent();
        }
        None
    }

    fn static_storage<'a>(&self, field: &'a FieldDef) -> &'a RawBuffer {
        field.static_data.get_or_init(|| match &field.constant {
            Some(bytes) => RawBuffer::from_slice(bytes),
            None => RawBuffer::zeroed(self.slot(field.ty).0),
        })
    }

    // ----- names -------------------------------------------------------------------------

    fn display_name(&self, class: ClassPtr) -> String {
        let def = self.class_def(class);
        if let ClassKind::Array { element, .. } = &def.kind {
            return format!("{}[]", self.display_name(*element));
        }
        if let Some(generic) = &def.generic {
            let definition = self.display_name(generic.definition);
            let base = definition.split('`').next().unwrap_or(&definition);
            let args = generic
                .args
                .iter()
                .map(|arg| self.display_name(*arg))
                .collect::<Vec<_>>()
                .join(",");
            return format!("{base}<{args}>");
        }
        match def.nesting {
            Some(outer) => format!("{}+{}", self.display_name(outer), def.name),
            None if def.namespace.is_empty() => def.name.clone(),
            None => format!("{}.{}", def.namespace, def.name),
        }
    }

    fn enum_literal_name(&self, class: ClassPtr, value: &[u8]) -> Option<String> {
        let def = self.class_def(class);
        def.fields
            .iter()
            .map(|(_, field)| self.field_def(*field))
            .find(|field| field.constant.as_deref() == Some(value))
            .map(|field| field.name.clone())
    }

    fn matches_desc(&self, method: &MethodDef, desc: &str) -> bool {
        let desc = desc.trim();
        let desc = match desc.split_once(':') {
            Some((_, rest)) => rest.trim(),
            None => desc,
        };
        let (name, params) = match desc.find('(') {
            Some(open) => (
                desc[..open].trim(),
                Some(desc[open + 1..].trim().trim_end_matches(')')),
            ),
            None => (desc, None),
        };
        if name != method.name {
            return false;
        }

        let Some(params) = params else {
            return true;
        };
        if params.trim().is_empty() {
            return method.params.is_empty();
        }

        let wanted = builder::split_generic_args(params);
        wanted.len() == method.params.len()
            && wanted
                .iter()
                .zip(&method.params)
                .all(|(wanted, param)| canonical_type_name(wanted) == self.display_name(*param))
    }

    // ----- generics ----------------------------------------------------------------------

    pub(crate) fn array_class(&self, element: ClassPtr) -> ClassPtr {
        if let Some(existing) = self.array_classes.get(&element.addr()) {
            return *existing.value();
        }

        let element_def = self.class_def(element);
        let mut def = ClassDef::new(
            &element_def.namespace,
            &format!("{}[]", element_def.name),
            crate::runtime::flags::TypeAttributes::PUBLIC
                | crate::runtime::flags::TypeAttributes::SEALED
                | crate::runtime::flags::TypeAttributes::SERIALIZABLE,
            ClassKind::Array { element, rank: 1 },
            element_def.image,
            None,
        );
        let _ = def.parent.set(self.corlib_class("System", "Array"));
        let class = self.insert_class(def);

        *self
            .array_classes
            .entry(element.addr())
            .or_insert(class)
            .value()
    }

    pub(crate) fn inflate(&self, definition: ClassPtr, args: &[ClassPtr]) -> Option<ClassPtr> {
        let def = self.class_def(definition);
        if def.generic_params.is_empty() || def.generic_params.len() != args.len() {
            return None;
        }

        let key = (
            definition.addr(),
            args.iter().map(|arg| arg.addr()).collect::<Vec<_>>(),
        );
        if let Some(existing) = self.generic_instances.get(&key) {
            return Some(*existing.value());
        }

        let mut closed = ClassDef::new(
            &def.namespace,
            &def.name,
            def.flags,
            def.kind.clone(),
            def.image,
            def.nesting,
        );
        closed.generic = Some(GenericInstance {
            definition,
            args: args.to_vec(),
        });
        let class = self.insert_class(closed);

        // Registered before the members so self-referencing members resolve to this class.
        let class = *self.generic_instances.entry(key).or_insert(class).value();
        let closed = self.class_def(class);
        if closed.parent.get().is_some() {
            return Some(class);
        }

        let _ = closed
            .parent
            .set(def.parent().map(|parent| self.substitute(parent, args)));
        for (_, attribute) in def.attributes.iter() {
            closed.attributes.push(*attribute);
        }

        for (_, field) in def.fields.iter() {
            let field = self.field_def(*field);
            let copy = self.insert_field(FieldDef {
                name: field.name.clone(),
                ty: self.substitute(field.ty, args),
                parent: class,
                flags: field.flags,
                offset: OnceLock::new(),
                constant: field.constant.clone(),
                static_data: OnceLock::new(),
                attributes: copy_attributes(&field.attributes),
            });
            closed.fields.push(copy);
        }

        let mut mapped = Vec::new();
        for (_, method) in def.methods.iter() {
            let source = self.method_def(*method);
            let copy = self.insert_method(MethodDef {
                name: source.name.clone(),
                class,
                flags: source.flags,
                impl_flags: source.impl_flags,
                params: source
                    .params
                    .iter()
                    .map(|param| self.substitute(*param, args))
                    .collect(),
                ret: self.substitute(source.ret, args),
                body: source.body.clone(),
                source: source.source.clone(),
                attributes: copy_attributes(&source.attributes),
            });
            mapped.push((*method, copy));
            closed.methods.push(copy);
        }
        let remap = |method: Option<MethodPtr>| {
            method.and_then(|method| {
                mapped
                    .iter()
                    .find(|(open, _)| *open == method)
                    .map(|(_, copy)| *copy)
            })
        };

        for (_, property) in def.properties.iter() {
            let property = self.property_def(*property);
            let copy = self.insert_property(PropertyDef {
                name: property.name.clone(),
                parent: class,
                flags: property.flags,
                getter: remap(property.getter),
                setter: remap(property.setter),
                attributes: copy_attributes(&property.attributes),
            });
            closed.properties.push(copy);
        }

        tracing::debug!(class = %self.display_name(class), "inflated generic class");
        Some(class)
    }

    fn substitute(&self, ty: ClassPtr, args: &[ClassPtr]) -> ClassPtr {
        let def = self.class_def(ty);
        match &def.kind {
            ClassKind::GenericParam { index } => args.get(*index).copied().unwrap_or(ty),
            ClassKind::Array { element, .. } => {
                let element = self.substitute(*element, args);
                self.array_class(element)
            }
            _ => match &def.generic {
                Some(generic) => {
                    let inner: Vec<ClassPtr> = generic
                        .args
                        .iter()
                        .map(|arg| self.substitute(*arg, args))
                        .collect();
                    self.inflate(generic.definition, &inner).unwrap_or(ty)
                }
                None => ty,
            },
        }
    }

    // ----- objects -----------------------------------------------------------------------

    pub(crate) fn alloc_instance(&self, class: ClassPtr) -> ObjectPtr {
        let payload = match self.class_def(class).kind {
            ClassKind::String => ObjectPayload::String(Vec::new()),
            _ => ObjectPayload::Data(RawBuffer::zeroed(self.layout(class).instance_size)),
        };
        self.heap.alloc(class, payload)
    }

    pub(crate) fn alloc_array(&self, element: ClassPtr, len: usize) -> Option<ObjectPtr> {
        let element_def = self.class_def(element);
        if matches!(element_def.kind, ClassKind::Void | ClassKind::GenericParam { .. }) {
            return None;
        }
        let element_size = self.slot(element).0;
        let data = RawBuffer::zeroed(element_size.checked_mul(len)?);
        Some(self.heap.alloc(
            self.array_class(element),
            ObjectPayload::Array {
                element_size,
                len,
                data,
            },
        ))
    }

    fn alloc_string_units(&self, units: &[u16]) -> ObjectPtr {
        match self.corlib_class("System", "String") {
            Some(class) => self.heap.alloc(class, ObjectPayload::String(units.to_vec())),
            None => unreachable!("corlib defines System.String"),
        }
    }

    fn box_bytes(&self, class: ClassPtr, bytes: &[u8]) -> ObjectPtr {
        let size = self.layout(class).value_size;
        let buffer = RawBuffer::zeroed(size);
        let len = bytes.len().min(size);
        buffer.write(0, &bytes[..len]);
        self.heap.alloc(class, ObjectPayload::Data(buffer))
    }

    /// The heap object behind `object` if its class declares or inherits `field`.
    fn field_storage(&self, object: ObjectPtr, field: &FieldDef) -> Option<Arc<HeapObject>> {
        let heap_object = self.heap_object(object)?;
        if !self.class_is_subclass_of(heap_object.class, field.parent) {
            tracing::debug!(
                field = %field.name,
                object = %format_args!("{:#x}", object.addr()),
                "field accessed on an object of an unrelated class"
            );
            return None;
        }
        Some(heap_object)
    }

    fn heap_object(&self, object: ObjectPtr) -> Option<Arc<HeapObject>> {
        self.heap.get(object)
    }

    fn new_exception(&self, class: ClassPtr, message: &str) -> ObjectPtr {
        let exception = self.alloc_instance(class);
        let message = self.alloc_string(message);
        self.write_instance_field(exception, "_message", &EmValue::object(message));
        exception
    }

    fn append_frame(&self, exception: ObjectPtr, method: MethodPtr) {
        let Some(EmValue::Ref(trace)) = self.read_instance_field(exception, "_stackTrace") else {
            return;
        };
        let def = self.method_def(method);

        let params = def
            .params
            .iter()
            .map(|param| self.display_name(*param))
            .collect::<Vec<_>>()
            .join(", ");
        let location = match &def.source {
            Some((file, line)) => format!("{file}:{line}"),
            None => "<filename unknown>:0".to_string(),
        };
        let frame = format!(
            "  at {}.{} ({params}) [0x00000] in {location}",
            self.display_name(def.class),
            def.name
        );

        let text = match trace {
            Some(existing) => {
                let existing = self.read_string(existing);
                if existing.is_empty() {
                    frame
                } else {
                    format!("{existing}\n{frame}")
                }
            }
            None => frame,
        };
        let text = self.alloc_string(&text);
        self.write_instance_field(exception, "_stackTrace", &EmValue::object(text));

        if let Some(EmValue::Ref(None)) = self.read_instance_field(exception, "_source") {
            let source = self.image_def(self.class_def(def.class).image).name.clone();
            let source = self.alloc_string(&source);
            self.write_instance_field(exception, "_source", &EmValue::object(source));
        }
    }

    fn decode_arg(&self, param: ClassPtr, slot: *mut c_void) -> std::result::Result<EmValue, ()> {
        if !self.class_def(param).kind.is_valuetype() {
            return Ok(EmValue::Ref(ObjectPtr::from_ptr(slot)));
        }
        if slot.is_null() {
            return Err(());
        }
        let size = self.layout(param).value_size;
        // SAFETY: value-type slots point at the parameter's value bytes.
        let bytes = unsafe { std::slice::from_raw_parts(slot.cast::<u8>(), size) };
        Ok(EmValue::Value(bytes.to_vec()))
    }

    // ----- assemblies --------------------------------------------------------------------

    fn instantiate_definition(&self, manifest: &ImageManifest, filename: &str) -> Result<ImagePtr> {
        let Some(definition) = self
            .definitions
            .get(&manifest.name)
            .map(|entry| entry.value().clone())
        else {
            return Err(Error::AssemblyLoad(filename.to_string()));
        };

        let mut definition = definition;
        definition.version = manifest.version;
        definition.references.clone_from(&manifest.references);
        definition.instantiate(self, filename)
    }

    fn open_image_path(&self, path: &str) -> Option<ImagePtr> {
        if let Some(image) = self.loaded_images.get(path) {
            return Some(*image.value());
        }

        let image = match self.probe(Path::new(path)) {
            Some(file) => std::fs::read(&file)
                .map_err(Error::from)
                .and_then(|data| self.image_open_from_data(&data, path)),
            None => {
                let stem = Path::new(path)
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .unwrap_or(path);
                let manifest = match self.definitions.get(stem) {
                    Some(definition) => definition.manifest(),
                    None => return None,
                };
                self.instantiate_definition(&manifest, path)
            }
        };

        match image {
            Ok(image) => {
                self.loaded_images.insert(path.to_string(), image);
                Some(image)
            }
            Err(error) => {
                tracing::debug!(path, %error, "emulated image load failed");
                None
            }
        }
    }

    fn probe(&self, path: &Path) -> Option<PathBuf> {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        if path.is_absolute() {
            return None;
        }
        read_lock!(self.assemblies_path)
            .iter()
            .map(|dir| dir.join(path))
            .find(|candidate| candidate.is_file())
    }
}

impl std::fmt::Debug for EmulatedRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulatedRuntime")
            .field("classes", &self.classes.len())
            .field("images", &self.images.len())
            .field("heap", &self.heap)
            .finish_non_exhaustive()
    }
}

fn copy_attributes(attributes: &boxcar::Vec<ObjectPtr>) -> boxcar::Vec<ObjectPtr> {
    let copy = boxcar::Vec::new();
    for (_, attribute) in attributes.iter() {
        copy.push(*attribute);
    }
    copy
}

/// Maps C# keyword aliases in a method description to full type names.
fn canonical_type_name(name: &str) -> String {
    let name = name.trim();
    if let Some(element) = name.strip_suffix("[]") {
        return format!("{}[]", canonical_type_name(element));
    }
    let full = match name {
        "bool" => "System.Boolean",
        "char" => "System.Char",
        "sbyte" => "System.SByte",
        "byte" => "System.Byte",
        "short" => "System.Int16",
        "ushort" => "System.UInt16",
        "int" => "System.Int32",
        "uint" => "System.UInt32",
        "long" => "System.Int64",
        "ulong" => "System.UInt64",
        "float" | "single" => "System.Single",
        "double" => "System.Double",
        "intptr" => "System.IntPtr",
        "uintptr" => "System.UIntPtr",
        "string" => "System.String",
        "object" => "System.Object",
        "void" => "System.Void",
        other => other,
    };
    full.to_string()
}

fn format_integer(bytes: &[u8]) -> String {
    match *bytes {
        [b] => b.to_string(),
        [a, b] => i16::from_ne_bytes([a, b]).to_string(),
        [a, b, c, d] => i32::from_ne_bytes([a, b, c, d]).to_string(),
        [a, b, c, d, e, f, g, h] => i64::from_ne_bytes([a, b, c, d, e, f, g, h]).to_string(),
        _ => String::new(),
    }
}

fn format_primitive(name: &str, bytes: &[u8]) -> String {
    fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes[..N]);
        out
    }

    match name {
        "Boolean" => String::from(if bytes[0] != 0 { "True" } else { "False" }),
        "Char" => char::from_u32(u32::from(u16::from_ne_bytes(array(bytes))))
            .map(String::from)
            .unwrap_or_default(),
        "SByte" => i8::from_ne_bytes(array(bytes)).to_string(),
        "Byte" => bytes[0].to_string(),
        "Int16" => i16::from_ne_bytes(array(bytes)).to_string(),
        "UInt16" => u16::from_ne_bytes(array(bytes)).to_string(),
        "Int32" => i32::from_ne_bytes(array(bytes)).to_string(),
        "UInt32" => u32::from_ne_bytes(array(bytes)).to_string(),
        "Int64" => i64::from_ne_bytes(array(bytes)).to_string(),
        "UInt64" => u64::from_ne_bytes(array(bytes)).to_string(),
        "Single" => f32::from_ne_bytes(array(bytes)).to_string(),
        "Double" => f64::from_ne_bytes(array(bytes)).to_string(),
        "IntPtr" => isize::from_ne_bytes(array(bytes)).to_string(),
        "UIntPtr" => usize::from_ne_bytes(array(bytes)).to_string(),
        _ => format_integer(bytes),
    }
}

impl Runtime for EmulatedRuntime {
    fn class_from_name(&self, image: ImagePtr, namespace: &str, name: &str) -> Option<ClassPtr> {
        self.find_class(image, namespace, name)
    }

    fn class_name(&self, class: ClassPtr) -> String {
        self.class_def(class).name.clone()
    }

    fn class_namespace(&self, class: ClassPtr) -> String {
        self.class_def(class).namespace.clone()
    }

    fn class_display_name(&self, class: ClassPtr) -> String {
        self.display_name(class)
    }

    fn class_value_size(&self, class: ClassPtr) -> (usize, usize) {
        let layout = self.layout(class);
        (layout.value_size, layout.align)
    }

    fn class_rank(&self, class: ClassPtr) -> u32 {
        match self.class_def(class).kind {
            ClassKind::Array { rank, .. } => rank,
            _ => 0,
        }
    }

    fn class_flags(&self, class: ClassPtr) -> u32 {
        self.class_def(class).flags
    }

    fn class_is_valuetype(&self, class: ClassPtr) -> bool {
        self.class_def(class).kind.is_valuetype()
    }

    fn class_is_enum(&self, class: ClassPtr) -> bool {
        self.class_def(class).kind == ClassKind::Enum
    }

    fn class_parent(&self, class: ClassPtr) -> Option<ClassPtr> {
        self.class_def(class).parent()
    }

    fn class_nesting_type(&self, class: ClassPtr) -> Option<ClassPtr> {
        self.class_def(class).nesting
    }

    fn class_nested_types(&self, class: ClassPtr) -> Vec<ClassPtr> {
        self.class_def(class)
            .nested
            .iter()
            .map(|(_, nested)| *nested)
            .collect()
    }

    fn class_is_subclass_of(&self, class: ClassPtr, parent: ClassPtr) -> bool {
        let mut current = Some(class);
        while let Some(candidate) = current {
            if candidate == parent {
                return true;
            }
            current = self.class_def(candidate).parent();
        }
        false
    }

    fn class_element_class(&self, class: ClassPtr) -> Option<ClassPtr> {
        match self.class_def(class).kind {
            ClassKind::Array { element, .. } => Some(element),
            ClassKind::Enum => self.class_enum_basetype(class),
            _ => None,
        }
    }

    fn class_enum_basetype(&self, class: ClassPtr) -> Option<ClassPtr> {
        let def = self.class_def(class);
        if def.kind != ClassKind::Enum {
            return None;
        }
        def.fields
            .iter()
            .map(|(_, field)| self.field_def(*field))
            .find(|field| !field.is_static())
            .map(|field| field.ty)
    }

    fn class_fields(&self, class: ClassPtr) -> Vec<FieldPtr> {
        self.class_def(class)
            .fields
            .iter()
            .map(|(_, field)| *field)
            .collect()
    }

    fn class_properties(&self, class: ClassPtr) -> Vec<PropertyPtr> {
        self.class_def(class)
            .properties
            .iter()
            .map(|(_, property)| *property)
            .collect()
    }

    fn class_methods(&self, class: ClassPtr) -> Vec<MethodPtr> {
        self.class_def(class)
            .methods
            .iter()
            .map(|(_, method)| *method)
            .collect()
    }

    fn class_field_from_name(&self, class: ClassPtr, name: &str) -> Option<FieldPtr> {
        self.class_def(class)
            .fields
            .iter()
            .map(|(_, field)| *field)
            .find(|field| self.field_def(*field).name == name)
    }

    fn class_property_from_name(&self, class: ClassPtr, name: &str) -> Option<PropertyPtr> {
        self.class_def(class)
            .properties
            .iter()
            .map(|(_, property)| *property)
            .find(|property| self.property_def(*property).name == name)
    }

    fn class_method_from_name(
        &self,
        class: ClassPtr,
        name: &str,
        argc: Option<usize>,
    ) -> Option<MethodPtr> {
        self.class_def(class)
            .methods
            .iter()
            .map(|(_, method)| *method)
            .find(|method| {
                let def = self.method_def(*method);
                def.name == name && argc.map_or(true, |argc| def.params.len() == argc)
            })
    }

    fn class_method_from_desc(&self, class: ClassPtr, desc: &str) -> Option<MethodPtr> {
        self.class_def(class)
            .methods
            .iter()
            .map(|(_, method)| *method)
            .find(|method| self.matches_desc(&self.method_def(*method), desc))
    }

    fn class_custom_attrs(&self, class: ClassPtr) -> Vec<ObjectPtr> {
        self.class_def(class)
            .attributes
            .iter()
            .map(|(_, attribute)| *attribute)
            .collect()
    }

    fn class_inflate_generic(&self, open: ClassPtr, args: &[ClassPtr]) -> Option<ClassPtr> {
        self.inflate(open, args)
    }

    fn class_generic_args(&self, class: ClassPtr) -> Vec<ClassPtr> {
        self.class_def(class)
            .generic
            .as_ref()
            .map(|generic| generic.args.clone())
            .unwrap_or_default()
    }

    fn class_image(&self, class: ClassPtr) -> ImagePtr {
        self.class_def(class).image
    }

    fn type_get_object(&self, domain: DomainPtr, class: ClassPtr) -> ObjectPtr {
        let def = self.domain_def(domain);
        let object = *def.type_objects
            .entry(class.addr())
            .or_insert_with(|| match self.corlib_class("System", "Type") {
                Some(type_class) => self.heap.alloc(type_class, ObjectPayload::Type(class)),
                None => unreachable!("corlib defines System.Type"),
            })
            .value();
        object
    }

    fn reflection_type_get_class(&self, object: ObjectPtr) -> Option<ClassPtr> {
        match self.heap_object(object)?.payload {
            ObjectPayload::Type(class) => Some(class),
            _ => None,
        }
    }

    fn field_name(&self, field: FieldPtr) -> String {
        self.field_def(field).name.clone()
    }

    fn field_full_name(&self, field: FieldPtr) -> String {
        let def = self.field_def(field);
        format!("{}:{}", self.display_name(def.parent), def.name)
    }

    fn field_type(&self, field: FieldPtr) -> ClassPtr {
        self.field_def(field).ty
    }

    fn field_parent(&self, field: FieldPtr) -> ClassPtr {
        self.field_def(field).parent
    }

    fn field_flags(&self, field: FieldPtr) -> u32 {
        self.field_def(field).flags
    }

    fn field_custom_attrs(&self, field: FieldPtr) -> Vec<ObjectPtr> {
        self.field_def(field)
            .attributes
            .iter()
            .map(|(_, attribute)| *attribute)
            .collect()
    }

    unsafe fn field_get_value(&self, object: ObjectPtr, field: FieldPtr, out: *mut c_void) {
        let def = self.field_def(field);
        if def.is_static() {
            return self.field_static_get_value_impl(&def, out);
        }
        let Some(heap_object) = self.field_storage(object, &def) else {
            return;
        };
        let ObjectPayload::Data(data) = &heap_object.payload else {
            return;
        };

        let offset = self.field_offset(&def);
        if self.class_def(def.ty).kind.is_valuetype() {
            let bytes = data.read(offset, self.layout(def.ty).value_size);
            // SAFETY: the caller provides room for the field's value size.
            unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), out.cast::<u8>(), bytes.len()) };
        } else {
            let target = data.read_ref(offset).map_or(std::ptr::null_mut(), ObjectPtr::as_ptr);
            // SAFETY: the caller provides room for one pointer.
            unsafe { out.cast::<*mut c_void>().write_unaligned(target) };
        }
    }

    unsafe fn field_set_value(&self, object: ObjectPtr, field: FieldPtr, value: *mut c_void) {
        let def = self.field_def(field);
        if def.is_static() {
            return self.field_static_set_value_impl(&def, value);
        }
        let Some(heap_object) = self.field_storage(object, &def) else {
            return;
        };
        let ObjectPayload::Data(data) = &heap_object.payload else {
            return;
        };

        let offset = self.field_offset(&def);
        if self.class_def(def.ty).kind.is_valuetype() {
            if value.is_null() {
                return;
            }
            let size = self.layout(def.ty).value_size;
            // SAFETY: value-type writes point at the field's value bytes.
            let bytes = unsafe { std::slice::from_raw_parts(value.cast::<u8>(), size) };
            data.write(offset, bytes);
        } else {
            data.write_ref(offset, ObjectPtr::from_ptr(value));
        }
    }

    unsafe fn field_static_get_value(&self, _domain: DomainPtr, field: FieldPtr, out: *mut c_void) {
        let def = self.field_def(field);
        self.field_static_get_value_impl(&def, out);
    }

    unsafe fn field_static_set_value(
        &self,
        _domain: DomainPtr,
        field: FieldPtr,
        value: *mut c_void,
    ) {
        let def = self.field_def(field);
        self.field_static_set_value_impl(&def, value);
    }

    fn field_get_value_object(
        &self,
        _domain: DomainPtr,
        field: FieldPtr,
        object: ObjectPtr,
    ) -> Option<ObjectPtr> {
        let def = self.field_def(field);
        let heap_object = self.field_storage(object, &def)?;
        let ObjectPayload::Data(data) = &heap_object.payload else {
            return None;
        };

        let offset = self.field_offset(&def);
        if self.class_def(def.ty).kind.is_valuetype() {
            let bytes = data.read(offset, self.layout(def.ty).value_size);
            Some(self.box_bytes(def.ty, &bytes))
        } else {
            data.read_ref(offset)
        }
    }

    fn property_name(&self, property: PropertyPtr) -> String {
        self.property_def(property).name.clone()
    }

    fn property_parent(&self, property: PropertyPtr) -> ClassPtr {
        self.property_def(property).parent
    }

    fn property_flags(&self, property: PropertyPtr) -> u32 {
        self.property_def(property).flags
    }

    fn property_get_method(&self, property: PropertyPtr) -> Option<MethodPtr> {
        self.property_def(property).getter
    }

    fn property_set_method(&self, property: PropertyPtr) -> Option<MethodPtr> {
        self.property_def(property).setter
    }

    fn property_custom_attrs(&self, property: PropertyPtr) -> Vec<ObjectPtr> {
        self.property_def(property)
            .attributes
            .iter()
            .map(|(_, attribute)| *attribute)
            .collect()
    }

    fn method_name(&self, method: MethodPtr) -> String {
        self.method_def(method).name.clone()
    }

    fn method_full_name(&self, method: MethodPtr) -> String {
        let def = self.method_def(method);
        let params = def
            .params
            .iter()
            .map(|param| self.display_name(*param))
            .collect::<Vec<_>>()
            .join(",");
        format!("{}:{} ({params})", self.display_name(def.class), def.name)
    }

    fn method_class(&self, method: MethodPtr) -> ClassPtr {
        self.method_def(method).class
    }

    fn method_flags(&self, method: MethodPtr) -> (u32, u32) {
        let def = self.method_def(method);
        (def.flags, def.impl_flags)
    }

    fn method_param_types(&self, method: MethodPtr) -> Vec<ClassPtr> {
        self.method_def(method).params.clone()
    }

    fn method_return_type(&self, method: MethodPtr) -> ClassPtr {
        self.method_def(method).ret
    }

    fn method_custom_attrs(&self, method: MethodPtr) -> Vec<ObjectPtr> {
        self.method_def(method)
            .attributes
            .iter()
            .map(|(_, attribute)| *attribute)
            .collect()
    }

    fn object_get_virtual_method(&self, object: ObjectPtr, method: MethodPtr) -> MethodPtr {
        let def = self.method_def(method);
        if def.flags & MethodModifiers::VIRTUAL.bits() == 0 {
            return method;
        }

        let mut current = Some(self.object_get_class(object));
        while let Some(class) = current {
            let class_def = self.class_def(class);
            let found = class_def.methods.iter().map(|(_, m)| *m).find(|candidate| {
                let candidate_def = self.method_def(*candidate);
                candidate_def.name == def.name
                    && candidate_def.params == def.params
                    && candidate_def.flags & MethodModifiers::VIRTUAL.bits() != 0
            });
            if let Some(found) = found {
                return found;
            }
            current = class_def.parent();
        }
        method
    }

    unsafe fn runtime_invoke(
        &self,
        method: MethodPtr,
        this: Option<ObjectPtr>,
        args: &[*mut c_void],
    ) -> InvokeResult {
        let def = self.method_def(method);
        if args.len() != def.params.len() {
            return Err(self.throw_from(
                method,
                "System",
                "ArgumentException",
                "Parameter count mismatch",
            ));
        }

        let mut decoded = Vec::with_capacity(args.len());
        for (index, (param, slot)) in def.params.iter().zip(args).enumerate() {
            match self.decode_arg(*param, *slot) {
                Ok(value) => decoded.push(value),
                Err(()) => {
                    return Err(self.throw_from(
                        method,
                        "System",
                        "ArgumentNullException",
                        &format!("Value-type argument {index} is null"),
                    ))
                }
            }
        }

        match self.invoke_method(method, this, decoded)? {
            EmValue::Void => Ok(None),
            EmValue::Ref(object) => Ok(object),
            EmValue::Value(bytes) => {
                if self.class_def(def.ret).kind.is_valuetype() {
                    Ok(Some(self.box_bytes(def.ret, &bytes)))
                } else {
                    Err(self.throw_from(
                        method,
                        "System",
                        "InvalidCastException",
                        "Value returned for a reference-typed result",
                    ))
                }
            }
        }
    }

    fn object_get_class(&self, object: ObjectPtr) -> ClassPtr {
        match self.heap_object(object) {
            Some(heap_object) => heap_object.class,
            None => panic!("object {:#x} is not owned by this runtime", object.addr()),
        }
    }

    fn object_new(&self, _domain: DomainPtr, class: ClassPtr) -> Option<ObjectPtr> {
        let def = self.class_def(class);
        let open_generic = !def.generic_params.is_empty() && def.generic.is_none();
        match def.kind {
            ClassKind::Void | ClassKind::GenericParam { .. } | ClassKind::Array { .. } => None,
            _ if open_generic => None,
            _ => Some(self.alloc_instance(class)),
        }
    }

    fn runtime_object_init(&self, object: ObjectPtr) -> std::result::Result<(), ObjectPtr> {
        // Each parameterless constructor implicitly chains to its base, so run them root first.
        let mut ctors = Vec::new();
        let mut current = Some(self.object_get_class(object));
        while let Some(class) = current {
            ctors.extend(self.class_method_from_name(class, ".ctor", Some(0)));
            current = self.class_def(class).parent();
        }
        for ctor in ctors.into_iter().rev() {
            self.invoke_method(ctor, Some(object), Vec::new())?;
        }
        Ok(())
    }

    unsafe fn value_box(&self, _domain: DomainPtr, class: ClassPtr, data: *const c_void) -> ObjectPtr {
        let size = self.layout(class).value_size;
        if data.is_null() || size == 0 {
            return self.box_bytes(class, &[]);
        }
        // SAFETY: the caller guarantees `size` readable bytes.
        let bytes = unsafe { std::slice::from_raw_parts(data.cast::<u8>(), size) };
        self.box_bytes(class, bytes)
    }

    fn object_unbox(&self, object: ObjectPtr) -> *mut c_void {
        match self.heap_object(object).as_deref() {
            Some(HeapObject {
                payload: ObjectPayload::Data(data),
                ..
            }) => data.addr(0),
            _ => std::ptr::null_mut(),
        }
    }

    fn object_to_string(&self, object: ObjectPtr) -> InvokeResult {
        let Some(base) = self
            .corlib_class("System", "Object")
            .and_then(|object_class| self.class_method_from_name(object_class, "ToString", Some(0)))
        else {
            return Ok(Some(self.alloc_string(&self.format_object(object))));
        };

        let method = self.object_get_virtual_method(object, base);
        match self.invoke_method(method, Some(object), Vec::new())? {
            EmValue::Ref(string) => Ok(string),
            _ => Ok(None),
        }
    }

    fn string_new(&self, _domain: DomainPtr, text: &str) -> ObjectPtr {
        self.alloc_string(text)
    }

    fn string_new_utf16(&self, _domain: DomainPtr, units: &[u16]) -> ObjectPtr {
        self.alloc_string_units(units)
    }

    fn string_chars(&self, string: ObjectPtr) -> Vec<u16> {
        match self.heap_object(string) {
            Some(heap_object) => match &heap_object.payload {
                ObjectPayload::String(units) => units.clone(),
                _ => Vec::new(),
            },
            None => Vec::new(),
        }
    }

    fn array_new(&self, _domain: DomainPtr, element: ClassPtr, len: usize) -> Option<ObjectPtr> {
        self.alloc_array(element, len)
    }

    fn array_length(&self, array: ObjectPtr) -> usize {
        match self.heap_object(array).as_deref() {
            Some(HeapObject {
                payload: ObjectPayload::Array { len, .. },
                ..
            }) => *len,
            _ => 0,
        }
    }

    fn array_addr(&self, array: ObjectPtr, element_size: usize, index: usize) -> *mut c_void {
        let Some(heap_object) = self.heap_object(array) else {
            return std::ptr::null_mut();
        };
        let ObjectPayload::Array { len, data, .. } = &heap_object.payload else {
            return std::ptr::null_mut();
        };
        let end = index
            .checked_add(1)
            .and_then(|count| count.checked_mul(element_size));
        match end {
            Some(end) if index < *len && end <= data.len() => data.addr(index * element_size),
            _ => std::ptr::null_mut(),
        }
    }

    fn array_setref(&self, array: ObjectPtr, index: usize, value: Option<ObjectPtr>) {
        if let Some(heap_object) = self.heap_object(array) {
            if let ObjectPayload::Array {
                element_size,
                len,
                data,
            } = &heap_object.payload
            {
                if index < *len && *element_size == POINTER_SIZE {
                    data.write_ref(index * POINTER_SIZE, value);
                }
            }
        }
    }

    fn array_getref(&self, array: ObjectPtr, index: usize) -> Option<ObjectPtr> {
        let heap_object = self.heap_object(array)?;
        match &heap_object.payload {
            ObjectPayload::Array {
                element_size,
                len,
                data,
            } if index < *len && *element_size == POINTER_SIZE => {
                data.read_ref(index * POINTER_SIZE)
            }
            _ => None,
        }
    }

    fn gchandle_new(&self, object: ObjectPtr, pinned: bool) -> u32 {
        self.heap.new_handle(object, pinned)
    }

    fn gchandle_free(&self, handle: u32) {
        self.heap.free_handle(handle);
    }

    fn gchandle_get_target(&self, handle: u32) -> Option<ObjectPtr> {
        self.heap.handle_target(handle)
    }

    fn gc_heap_size(&self) -> u64 {
        self.heap.heap_size()
    }

    fn gc_used_size(&self) -> u64 {
        self.heap.used_size()
    }

    fn gc_collect(&self, generation: i32) {
        self.heap.collect(generation.clamp(0, MAX_GENERATION));
    }

    fn gc_max_generation(&self) -> i32 {
        MAX_GENERATION
    }

    fn exception_from_name_msg(
        &self,
        image: ImagePtr,
        namespace: &str,
        name: &str,
        message: &str,
    ) -> Option<ObjectPtr> {
        let class = self
            .find_class(image, namespace, name)
            .or_else(|| self.corlib_class(namespace, name))?;
        Some(self.new_exception(class, message))
    }

    fn domain_create(&self, name: &str) -> Option<DomainPtr> {
        let domain = self.insert_domain(DomainDef::new(name));
        tracing::debug!(name, "emulated domain created");
        Some(domain)
    }

    fn domain_get(&self) -> Option<DomainPtr> {
        *read_lock!(self.current_domain)
    }

    fn domain_friendly_name(&self, domain: DomainPtr) -> String {
        self.domain_def(domain).name.clone()
    }

    fn domain_set(&self, domain: DomainPtr) -> bool {
        if !self.live_domains.contains_key(&domain.addr()) {
            return false;
        }
        *write_lock!(self.current_domain) = Some(domain);
        true
    }

    fn domain_unload(&self, domain: DomainPtr) {
        if self.live_domains.remove(&domain.addr()).is_none() {
            return;
        }
        let def = self.domain_def(domain);
        def.assemblies.clear();
        def.type_objects.clear();

        let mut current = write_lock!(self.current_domain);
        if *current == Some(domain) {
            *current = self
                .root_domain()
                .filter(|root| self.live_domains.contains_key(&root.addr()));
        }
        tracing::debug!(name = %def.name, "emulated domain unloaded");
    }

    fn domain_assembly_open(&self, domain: DomainPtr, path: &str) -> Option<AssemblyPtr> {
        if !self.live_domains.contains_key(&domain.addr()) {
            return None;
        }
        let def = self.domain_def(domain);
        if let Some(assembly) = def.assemblies.get(path) {
            return Some(*assembly.value());
        }

        let image = self.open_image_path(path)?;
        let assembly = self.assembly_load_from(image, path)?;
        def.assemblies.insert(path.to_string(), assembly);
        Some(assembly)
    }

    fn image_open_from_data(&self, data: &[u8], name: &str) -> Result<ImagePtr> {
        let manifest =
            ImageManifest::from_bytes(data).map_err(|_| Error::AssemblyLoad(name.to_string()))?;
        self.instantiate_definition(&manifest, name)
    }

    fn assembly_load_from(&self, image: ImagePtr, _name: &str) -> Option<AssemblyPtr> {
        let name = self.image_def(image).name.clone();
        Some(AssemblyPtr::from_non_null(
            self.assemblies.insert(AssemblyDef { name, image }),
        ))
    }

    fn assembly_image(&self, assembly: AssemblyPtr) -> ImagePtr {
        self.assemblies.get(assembly.addr()).image
    }

    fn assembly_name(&self, assembly: AssemblyPtr) -> String {
        self.assemblies.get(assembly.addr()).name.clone()
    }

    fn image_filename(&self, image: ImagePtr) -> String {
        self.image_def(image).filename.clone()
    }

    fn image_types(&self, image: ImagePtr) -> Vec<ClassPtr> {
        self.image_def(image)
            .classes
            .iter()
            .map(|(_, class)| *class)
            .collect()
    }

    fn image_references(&self, image: ImagePtr) -> Vec<AssemblyReference> {
        self.image_def(image).references.clone()
    }

    fn corlib(&self) -> ImagePtr {
        match self.corlib_image() {
            Some(image) => image,
            None => unreachable!("corlib is built by EmulatedRuntime::new"),
        }
    }

    fn set_assemblies_path(&self, path: &str) {
        let dirs: Vec<PathBuf> = std::env::split_paths(path).collect();
        tracing::debug!(dirs = dirs.len(), "emulated assemblies path set");
        *write_lock!(self.assemblies_path) = dirs;
    }
}

impl EmulatedRuntime {
    fn field_static_get_value_impl(&self, def: &FieldDef, out: *mut c_void) {
        let storage = self.static_storage(def);
        if self.class_def(def.ty).kind.is_valuetype() {
            let bytes = storage.read(0, storage.len());
            // SAFETY: the caller provides room for the field's value size.
            unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), out.cast::<u8>(), bytes.len()) };
        } else {
            let target = storage.read_ref(0).map_or(std::ptr::null_mut(), ObjectPtr::as_ptr);
            // SAFETY: the caller provides room for one pointer.
            unsafe { out.cast::<*mut c_void>().write_unaligned(target) };
        }
    }

    fn field_static_set_value_impl(&self, def: &FieldDef, value: *mut c_void) {
        if def.flags & FieldAttributes::LITERAL != 0 {
            return;
        }
        let storage = self.static_storage(def);
        if self.class_def(def.ty).kind.is_valuetype() {
            if value.is_null() {
                return;
            }
            // SAFETY: value-type writes point at the field's value bytes.
            let bytes = unsafe { std::slice::from_raw_parts(value.cast::<u8>(), storage.len()) };
            storage.write(0, bytes);
        } else {
            storage.write_ref(0, ObjectPtr::from_ptr(value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> Arc<EmulatedRuntime> {
        EmulatedRuntime::new().unwrap()
    }

    #[test]
    fn test_corlib_primitives() {
        let rt = runtime();
        let int32 = rt.corlib_class("System", "Int32").unwrap();
        assert_eq!(rt.class_value_size(int32), (4, 4));
        assert!(rt.class_is_valuetype(int32));
        assert_eq!(rt.class_display_name(int32), "System.Int32");

        let value_type = rt.corlib_class("System", "ValueType").unwrap();
        assert!(rt.class_is_subclass_of(int32, value_type));
    }

    #[test]
    fn test_struct_layout() {
        let rt = runtime();
        rt.register(
            AssemblyBuilder::new("Layout").class(
                ClassBuilder::new("Layout", "Mixed")
                    .value_type()
                    .field("a", "System.Byte")
                    .field("b", "System.Int32")
                    .field("c", "System.Int16"),
            ),
        );
        let domain = rt.root_domain().unwrap();
        let assembly = rt.domain_assembly_open(domain, "Layout.dll").unwrap();
        let image = rt.assembly_image(assembly);
        let mixed = rt.class_from_name(image, "Layout", "Mixed").unwrap();

        assert_eq!(rt.class_value_size(mixed), (12, 4));
        let b = rt.class_field_from_name(mixed, "b").unwrap();
        assert_eq!(rt.field_offset(&rt.field_def(b)), 4);
    }

    #[test]
    fn test_generic_inflation_is_cached() {
        let rt = runtime();
        let list = rt
            .corlib_class("System.Collections.Generic", "List`1")
            .unwrap();
        let int32 = rt.corlib_class("System", "Int32").unwrap();

        let first = rt.class_inflate_generic(list, &[int32]).unwrap();
        let second = rt.class_inflate_generic(list, &[int32]).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            rt.class_display_name(first),
            "System.Collections.Generic.List<System.Int32>"
        );
        assert_eq!(rt.class_generic_args(first), vec![int32]);

        let add = rt.class_method_from_name(first, "Add", Some(1)).unwrap();
        assert_eq!(rt.method_param_types(add), vec![int32]);
        assert!(rt.class_inflate_generic(list, &[]).is_none());
    }

    #[test]
    fn test_method_desc_aliases() {
        let rt = runtime();
        let list = rt
            .corlib_class("System.Collections.Generic", "List`1")
            .unwrap();
        let string = rt.corlib_class("System", "String").unwrap();
        let closed = rt.class_inflate_generic(list, &[string]).unwrap();

        assert!(rt.class_method_from_desc(closed, "Add(string)").is_some());
        assert!(rt.class_method_from_desc(closed, "Add(System.String)").is_some());
        assert!(rt.class_method_from_desc(closed, "List`1:RemoveAt(int)").is_some());
        assert!(rt.class_method_from_desc(closed, "Add(int)").is_none());
        assert!(rt.class_method_from_desc(closed, "Clear()").is_some());
    }

    #[test]
    fn test_strings_and_boxing() {
        let rt = runtime();
        let domain = rt.root_domain().unwrap();
        let text = rt.string_new(domain, "héllo");
        assert_eq!(rt.read_string(text), "héllo");

        let int32 = rt.corlib_class("System", "Int32").unwrap();
        let value = 42i32;
        let boxed = unsafe { rt.value_box(domain, int32, (&value as *const i32).cast()) };
        let unboxed = rt.object_unbox(boxed);
        assert_eq!(unsafe { *(unboxed as *const i32) }, 42);
        assert_eq!(rt.format_object(boxed), "42");

        let string = rt.object_to_string(boxed).unwrap().unwrap();
        assert_eq!(rt.read_string(string), "42");
    }

    #[test]
    fn test_exception_frames() {
        let rt = runtime();
        let object = rt.corlib_class("System", "Object").unwrap();
        let to_string = rt.class_method_from_name(object, "ToString", Some(0)).unwrap();

        let exception = rt
            .invoke_method(to_string, None, Vec::new())
            .unwrap_err();
        assert_eq!(
            rt.class_display_name(rt.object_get_class(exception)),
            "System.NullReferenceException"
        );
        let Some(EmValue::Ref(Some(trace))) = rt.read_instance_field(exception, "_stackTrace")
        else {
            panic!("missing stack trace");
        };
        assert!(rt.read_string(trace).contains("System.Object.ToString"));
    }

    #[test]
    fn test_domains() {
        let rt = runtime();
        let root = rt.domain_get().unwrap();
        let child = rt.domain_create("child").unwrap();
        assert!(rt.domain_set(child));
        assert_eq!(rt.domain_get(), Some(child));

        rt.domain_unload(child);
        assert_eq!(rt.domain_get(), Some(root));
        assert!(!rt.domain_set(child));
        assert!(rt.domain_assembly_open(child, "mscorlib.dll").is_none());
    }

    #[test]
    fn test_object_init_runs_base_constructors() {
        let rt = runtime();
        rt.register(
            AssemblyBuilder::new("Chain")
                .class(
                    ClassBuilder::new("Chain", "Base")
                        .field("hp", "System.Int32")
                        .field("armor", "System.Int32")
                        .constructor(|call| {
                            let this = call.this_or_throw()?;
                            call.set_field_value(this, "hp", 10i32)?;
                            call.set_field_value(this, "armor", 1i32)?;
                            Ok(EmValue::Void)
                        }),
                )
                .class(ClassBuilder::new("Chain", "Plain").parent("Chain.Base"))
                .class(
                    ClassBuilder::new("Chain", "Armored")
                        .parent("Chain.Base")
                        .constructor(|call| {
                            let this = call.this_or_throw()?;
                            let armor = call.field_value::<i32>(this, "armor")?;
                            call.set_field_value(this, "armor", armor + 4)?;
                            Ok(EmValue::Void)
                        }),
                ),
        );
        let domain = rt.root_domain().unwrap();
        let assembly = rt.domain_assembly_open(domain, "Chain.dll").unwrap();
        let image = rt.assembly_image(assembly);

        let plain = rt.object_new(domain, rt.class_from_name(image, "Chain", "Plain").unwrap()).unwrap();
        rt.runtime_object_init(plain).unwrap();
        assert_eq!(rt.read_instance_field(plain, "hp"), Some(EmValue::of(10i32)));

        let armored = rt.object_new(domain, rt.class_from_name(image, "Chain", "Armored").unwrap()).unwrap();
        rt.runtime_object_init(armored).unwrap();
        assert_eq!(rt.read_instance_field(armored, "hp"), Some(EmValue::of(10i32)));
        assert_eq!(rt.read_instance_field(armored, "armor"), Some(EmValue::of(5i32)));
    }

    #[test]
    fn test_field_access_on_unrelated_object() {
        let rt = runtime();
        rt.register(
            AssemblyBuilder::new("Sizes")
                .class(ClassBuilder::new("Sizes", "Small").field("a", "System.Byte"))
                .class(
                    ClassBuilder::new("Sizes", "Big")
                        .field("a", "System.Int64")
                        .field("b", "System.Int64")
                        .field("c", "System.Int64")
                        .field("d", "System.Int64"),
                ),
        );
        let domain = rt.root_domain().unwrap();
        let assembly = rt.domain_assembly_open(domain, "Sizes.dll").unwrap();
        let image = rt.assembly_image(assembly);
        let small = rt.class_from_name(image, "Sizes", "Small").unwrap();
        let big = rt.class_from_name(image, "Sizes", "Big").unwrap();
        let d = rt.class_field_from_name(big, "d").unwrap();

        let object = rt.object_new(domain, small).unwrap();
        assert_eq!(rt.field_get_value_object(domain, d, object), None);

        let mut out = -1i64;
        let mut value = 7i64;
        unsafe {
            rt.field_set_value(object, d, (&mut value as *mut i64).cast());
            rt.field_get_value(object, d, (&mut out as *mut i64).cast());
        }
        assert_eq!(out, -1);
    }

    #[test]
    fn test_array_storage() {
        let rt = runtime();
        let domain = rt.root_domain().unwrap();
        let string = rt.corlib_class("System", "String").unwrap();
        let array = rt.array_new(domain, string, 3).unwrap();
        assert_eq!(rt.array_length(array), 3);
        assert_eq!(rt.class_display_name(rt.object_get_class(array)), "System.String[]");

        let value = rt.string_new(domain, "x");
        rt.array_setref(array, 1, Some(value));
        assert_eq!(rt.array_getref(array, 1), Some(value));
        assert_eq!(rt.array_getref(array, 0), None);
        assert!(rt.array_addr(array, POINTER_SIZE, 3).is_null());
    }
}
