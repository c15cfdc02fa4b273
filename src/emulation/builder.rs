//! Definition builders for emulated assemblies.
//!
//! An [`AssemblyBuilder`] describes an assembly: its classes, their fields, properties and
//! methods, and the native closures implementing those methods. Builders are plain values;
//! registering one with [`EmulatedRuntime::register`](crate::emulation::EmulatedRuntime::register)
//! makes it loadable by name, path or manifest, and every load instantiates a fresh image
//! from the definition.
//!
//! # Type Names
//!
//! Types are referenced by their display names and resolved when an image is instantiated,
//! first against the image itself and then against `corlib`:
//!
//! - `System.Int32`, `Game.Player` - namespace-qualified names
//! - `Game.Outer+Inner` - nested classes
//! - `System.Int32[]` - single-dimensional arrays
//! - `System.Collections.Generic.List<Game.Item>` - closed generic classes
//! - `T` - a type parameter of the declaring class
//!
//! # Example
//!
//! ```rust,ignore
//! let game = AssemblyBuilder::new("Game").class(
//!     ClassBuilder::new("Game", "Player")
//!         .field("health", "System.Int32")
//!         .auto_property("Name", "System.String")
//!         .method(
//!             MethodBuilder::new("Heal")
//!                 .param("System.Int32")
//!                 .returns("System.Int32")
//!                 .body(|call| { /* ... */ Ok(EmValue::Void) }),
//!         ),
//! );
//! runtime.register(game);
//! ```

use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
};

use crate::{
    emulation::{
        call::{CallResult, EmValue, NativeBody, NativeCall},
        manifest::ImageManifest,
        metadata::{ClassDef, ClassKind, FieldDef, ImageDef, MethodDef, PropertyDef},
        EmulatedRuntime,
    },
    runtime::{
        flags::{FieldAttributes, MethodAccessFlags, MethodModifiers, TypeAttributes},
        AssemblyReference, ClassPtr, FieldPtr, ImagePtr, MethodPtr, PropertyPtr,
    },
    Error, Result,
};

/// Name of the compiler-generated marker attribute.
pub const COMPILER_GENERATED: &str = "System.Runtime.CompilerServices.CompilerGeneratedAttribute";

/// Type name standing for the declaring class itself.
const SELF_TYPE: &str = "<self>";

/// Classification requested by a [`ClassBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BuilderKind {
    Reference,
    Value,
    Enum(String),
    Primitive { size: usize, align: usize },
    Void,
    String,
}

/// Describes an emulated assembly.
#[derive(Clone)]
pub struct AssemblyBuilder {
    pub(crate) name: String,
    pub(crate) version: [u16; 4],
    pub(crate) references: Vec<AssemblyReference>,
    pub(crate) classes: Vec<ClassBuilder>,
    pub(crate) core_library: bool,
}

impl AssemblyBuilder {
    /// Starts an assembly definition with version `1.0.0.0` referencing `mscorlib`.
    #[must_use]
    pub fn new(name: &str) -> Self {
        AssemblyBuilder {
            name: name.to_string(),
            version: [1, 0, 0, 0],
            references: vec![AssemblyReference {
                name: "mscorlib".to_string(),
                version: [4, 0, 0, 0],
            }],
            classes: Vec::new(),
            core_library: false,
        }
    }

    /// Marks the definition as the core library: no references, and its image becomes the
    /// runtime's `corlib` as soon as it is created.
    pub(crate) fn core_library(mut self) -> Self {
        self.references.clear();
        self.core_library = true;
        self
    }

    /// Sets the assembly version.
    #[must_use]
    pub fn version(mut self, major: u16, minor: u16, build: u16, revision: u16) -> Self {
        self.version = [major, minor, build, revision];
        self
    }

    /// Records a reference to another assembly.
    #[must_use]
    pub fn reference(mut self, name: &str, version: [u16; 4]) -> Self {
        self.references.push(AssemblyReference {
            name: name.to_string(),
            version,
        });
        self
    }

    /// Adds a top-level class.
    #[must_use]
    pub fn class(mut self, class: ClassBuilder) -> Self {
        self.classes.push(class);
        self
    }

    /// Assembly name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Manifest written to disk for this assembly.
    #[must_use]
    pub fn manifest(&self) -> ImageManifest {
        ImageManifest {
            name: self.name.clone(),
            version: self.version,
            references: self.references.clone(),
        }
    }
}

/// Describes an emulated class.
#[derive(Clone)]
pub struct ClassBuilder {
    pub(crate) namespace: String,
    pub(crate) name: String,
    pub(crate) flags: u32,
    pub(crate) kind: BuilderKind,
    pub(crate) parent: Option<String>,
    pub(crate) generic_params: Vec<String>,
    pub(crate) fields: Vec<FieldBuilder>,
    pub(crate) properties: Vec<PropertyBuilder>,
    pub(crate) methods: Vec<MethodBuilder>,
    pub(crate) nested: Vec<ClassBuilder>,
    pub(crate) attributes: Vec<String>,
}

impl ClassBuilder {
    /// Starts a public reference class.
    #[must_use]
    pub fn new(namespace: &str, name: &str) -> Self {
        ClassBuilder {
            namespace: namespace.to_string(),
            name: name.to_string(),
            flags: TypeAttributes::PUBLIC,
            kind: BuilderKind::Reference,
            parent: None,
            generic_params: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
            nested: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Starts a nested class, to be added with [`ClassBuilder::nested_class`].
    #[must_use]
    pub fn nested(name: &str) -> Self {
        let mut class = ClassBuilder::new("", name);
        class.flags = TypeAttributes::NESTED_PUBLIC;
        class
    }

    /// Makes the class a value type deriving from `System.ValueType`.
    #[must_use]
    pub fn value_type(mut self) -> Self {
        self.kind = BuilderKind::Value;
        self.flags |= TypeAttributes::SEALED;
        self
    }

    /// Makes the class an enumeration over an integral corlib type.
    #[must_use]
    pub fn enumeration(mut self, underlying: &str) -> Self {
        self.kind = BuilderKind::Enum(underlying.to_string());
        self.flags |= TypeAttributes::SEALED;
        self.fields.push(FieldBuilder::new("value__", underlying).special_name());
        self
    }

    pub(crate) fn primitive(mut self, size: usize, align: usize) -> Self {
        self.kind = BuilderKind::Primitive { size, align };
        self.flags |= TypeAttributes::SEALED;
        self
    }

    pub(crate) fn void_type(mut self) -> Self {
        self.kind = BuilderKind::Void;
        self
    }

    pub(crate) fn string_type(mut self) -> Self {
        self.kind = BuilderKind::String;
        self.flags |= TypeAttributes::SEALED;
        self
    }

    /// Sets the base class by display name.
    #[must_use]
    pub fn parent(mut self, name: &str) -> Self {
        self.parent = Some(name.to_string());
        self
    }

    /// ORs raw `TypeAttributes` into the class flags.
    #[must_use]
    pub fn flags(mut self, flags: u32) -> Self {
        self.flags |= flags;
        self
    }

    /// Marks the class abstract.
    #[must_use]
    pub fn abstract_class(self) -> Self {
        self.flags(TypeAttributes::ABSTRACT)
    }

    /// Marks the class sealed.
    #[must_use]
    pub fn sealed(self) -> Self {
        self.flags(TypeAttributes::SEALED)
    }

    /// Marks the class as an interface.
    #[must_use]
    pub fn interface(self) -> Self {
        self.flags(TypeAttributes::INTERFACE | TypeAttributes::ABSTRACT)
    }

    /// Marks the class serializable.
    #[must_use]
    pub fn serializable(self) -> Self {
        self.flags(TypeAttributes::SERIALIZABLE)
    }

    /// Declares type parameters, turning the class into an open generic definition.
    ///
    /// The arity suffix (`` `1 ``) is appended to the class name.
    #[must_use]
    pub fn generic_params(mut self, params: &[&str]) -> Self {
        self.generic_params = params.iter().map(|p| (*p).to_string()).collect();
        self.name = format!("{}`{}", self.name, params.len());
        self
    }

    /// Adds a public instance field.
    #[must_use]
    pub fn field(self, name: &str, ty: &str) -> Self {
        self.add_field(FieldBuilder::new(name, ty))
    }

    /// Adds a public static field.
    #[must_use]
    pub fn static_field(self, name: &str, ty: &str) -> Self {
        self.add_field(FieldBuilder::new(name, ty).static_field())
    }

    /// Adds a fully described field.
    #[must_use]
    pub fn add_field(mut self, field: FieldBuilder) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds a literal field holding one value of an enumeration.
    #[must_use]
    pub fn enum_value(mut self, name: &str, value: i64) -> Self {
        let BuilderKind::Enum(underlying) = &self.kind else {
            return self;
        };
        let size = match underlying.as_str() {
            "System.Byte" | "System.SByte" => 1,
            "System.Int16" | "System.UInt16" => 2,
            "System.Int64" | "System.UInt64" => 8,
            _ => 4,
        };
        let bytes = value.to_le_bytes()[..size].to_vec();
        self.fields
            .push(FieldBuilder::new(name, SELF_TYPE).constant(bytes));
        self
    }

    /// Adds a property.
    #[must_use]
    pub fn property(mut self, property: PropertyBuilder) -> Self {
        self.properties.push(property);
        self
    }

    /// Adds a read/write property backed by a compiler-generated field.
    #[must_use]
    pub fn auto_property(self, name: &str, ty: &str) -> Self {
        let backing = format!("<{name}>k__BackingField");
        let getter_field = backing.clone();
        let setter_field = backing.clone();
        let property = PropertyBuilder::new(name, ty)
            .getter(move |call| {
                let this = call.this_or_throw()?;
                call.runtime()
                    .read_instance_field(this, &getter_field)
                    .ok_or_else(|| call.throw("System", "MissingFieldException", &getter_field))
            })
            .setter(move |call| {
                let this = call.this_or_throw()?;
                let value = call.arg(0).cloned().unwrap_or(EmValue::null());
                if call
                    .runtime()
                    .write_instance_field(this, &setter_field, &value)
                {
                    Ok(EmValue::Void)
                } else {
                    Err(call.throw("System", "MissingFieldException", &setter_field))
                }
            });

        self.add_field(
            FieldBuilder::new(&backing, ty)
                .private()
                .attribute(COMPILER_GENERATED),
        )
        .property(property)
    }

    /// Adds a method.
    #[must_use]
    pub fn method(mut self, method: MethodBuilder) -> Self {
        self.methods.push(method);
        self
    }

    /// Adds a parameterless instance constructor.
    ///
    /// Object initialization runs the parameterless constructors of the base classes
    /// first, the way a compiler-inserted `base()` call would.
    #[must_use]
    pub fn constructor<F>(self, body: F) -> Self
    where
        F: Fn(&NativeCall<'_>) -> CallResult + Send + Sync + 'static,
    {
        self.method(
            MethodBuilder::new(".ctor")
                .flags(MethodModifiers::SPECIAL_NAME.bits() | MethodModifiers::RTSPECIAL_NAME.bits())
                .body(body),
        )
    }

    /// Adds a nested class.
    #[must_use]
    pub fn nested_class(mut self, class: ClassBuilder) -> Self {
        self.nested.push(class);
        self
    }

    /// Applies a custom attribute by class display name.
    #[must_use]
    pub fn attribute(mut self, class: &str) -> Self {
        self.attributes.push(class.to_string());
        self
    }
}

/// Describes a field.
#[derive(Clone)]
pub struct FieldBuilder {
    pub(crate) name: String,
    pub(crate) ty: String,
    pub(crate) flags: u32,
    pub(crate) constant: Option<Vec<u8>>,
    pub(crate) attributes: Vec<String>,
}

impl FieldBuilder {
    /// Starts a public instance field.
    #[must_use]
    pub fn new(name: &str, ty: &str) -> Self {
        FieldBuilder {
            name: name.to_string(),
            ty: ty.to_string(),
            flags: FieldAttributes::PUBLIC,
            constant: None,
            attributes: Vec::new(),
        }
    }

    /// Replaces the access bits.
    #[must_use]
    pub fn access(mut self, access: u32) -> Self {
        self.flags = (self.flags & !FieldAttributes::FIELD_ACCESS_MASK)
            | (access & FieldAttributes::FIELD_ACCESS_MASK);
        self
    }

    /// Makes the field private.
    #[must_use]
    pub fn private(self) -> Self {
        self.access(FieldAttributes::PRIVATE)
    }

    /// Makes the field static.
    #[must_use]
    pub fn static_field(mut self) -> Self {
        self.flags |= FieldAttributes::STATIC;
        self
    }

    /// Makes the field init-only.
    #[must_use]
    pub fn readonly(mut self) -> Self {
        self.flags |= FieldAttributes::INIT_ONLY;
        self
    }

    /// Makes the field a literal with the given value bytes.
    #[must_use]
    pub fn constant(mut self, bytes: Vec<u8>) -> Self {
        self.flags |= FieldAttributes::STATIC | FieldAttributes::LITERAL | FieldAttributes::HAS_DEFAULT;
        self.constant = Some(bytes);
        self
    }

    fn special_name(mut self) -> Self {
        self.flags |= FieldAttributes::SPECIAL_NAME | FieldAttributes::RTSPECIAL_NAME;
        self
    }

    /// Applies a custom attribute by class display name.
    #[must_use]
    pub fn attribute(mut self, class: &str) -> Self {
        self.attributes.push(class.to_string());
        self
    }
}

/// Describes a property and its accessor methods.
#[derive(Clone)]
pub struct PropertyBuilder {
    pub(crate) name: String,
    pub(crate) ty: String,
    pub(crate) index: Option<String>,
    pub(crate) is_static: bool,
    pub(crate) flags: u32,
    pub(crate) getter: Option<MethodBuilder>,
    pub(crate) setter: Option<MethodBuilder>,
    pub(crate) attributes: Vec<String>,
}

impl PropertyBuilder {
    /// Starts a property of the given type.
    #[must_use]
    pub fn new(name: &str, ty: &str) -> Self {
        PropertyBuilder {
            name: name.to_string(),
            ty: ty.to_string(),
            index: None,
            is_static: false,
            flags: 0,
            getter: None,
            setter: None,
            attributes: Vec::new(),
        }
    }

    /// Makes the property an indexer taking one index of the given type.
    ///
    /// Must be called before the accessors are added.
    #[must_use]
    pub fn indexed(mut self, index: &str) -> Self {
        self.index = Some(index.to_string());
        self
    }

    /// Makes the property static. Must be called before the accessors are added.
    #[must_use]
    pub fn static_property(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// ORs raw `PropertyAttributes` into the property flags.
    #[must_use]
    pub fn flags(mut self, flags: u32) -> Self {
        self.flags |= flags;
        self
    }

    /// Adds a public getter `get_<Name>`.
    #[must_use]
    pub fn getter<F>(self, body: F) -> Self
    where
        F: Fn(&NativeCall<'_>) -> CallResult + Send + Sync + 'static,
    {
        self.getter_with(MethodAccessFlags::PUBLIC.bits(), body)
    }

    /// Adds a getter with the given access bits.
    #[must_use]
    pub fn getter_with<F>(mut self, access: u32, body: F) -> Self
    where
        F: Fn(&NativeCall<'_>) -> CallResult + Send + Sync + 'static,
    {
        let mut method = MethodBuilder::new(&format!("get_{}", self.name))
            .returns(&self.ty)
            .access(access)
            .flags(MethodModifiers::SPECIAL_NAME.bits())
            .body(body);
        if let Some(index) = &self.index {
            method = method.param(index);
        }
        if self.is_static {
            method = method.static_method();
        }
        self.getter = Some(method);
        self
    }

    /// Adds a public setter `set_<Name>`.
    #[must_use]
    pub fn setter<F>(self, body: F) -> Self
    where
        F: Fn(&NativeCall<'_>) -> CallResult + Send + Sync + 'static,
    {
        self.setter_with(MethodAccessFlags::PUBLIC.bits(), body)
    }

    /// Adds a setter with the given access bits.
    #[must_use]
    pub fn setter_with<F>(mut self, access: u32, body: F) -> Self
    where
        F: Fn(&NativeCall<'_>) -> CallResult + Send + Sync + 'static,
    {
        let mut method = MethodBuilder::new(&format!("set_{}", self.name))
            .access(access)
            .flags(MethodModifiers::SPECIAL_NAME.bits());
        if let Some(index) = &self.index {
            method = method.param(index);
        }
        method = method.param(&self.ty).body(body);
        if self.is_static {
            method = method.static_method();
        }
        self.setter = Some(method);
        self
    }

    /// Applies a custom attribute by class display name.
    #[must_use]
    pub fn attribute(mut self, class: &str) -> Self {
        self.attributes.push(class.to_string());
        self
    }
}

/// Describes a method.
#[derive(Clone)]
pub struct MethodBuilder {
    pub(crate) name: String,
    pub(crate) params: Vec<String>,
    pub(crate) ret: String,
    pub(crate) flags: u32,
    pub(crate) impl_flags: u32,
    pub(crate) body: Option<NativeBody>,
    pub(crate) source: Option<(String, u32)>,
    pub(crate) attributes: Vec<String>,
}

impl MethodBuilder {
    /// Starts a public instance procedure without parameters.
    #[must_use]
    pub fn new(name: &str) -> Self {
        MethodBuilder {
            name: name.to_string(),
            params: Vec::new(),
            ret: "System.Void".to_string(),
            flags: MethodAccessFlags::PUBLIC.bits() | MethodModifiers::HIDE_BY_SIG.bits(),
            impl_flags: 0,
            body: None,
            source: None,
            attributes: Vec::new(),
        }
    }

    /// Appends a parameter.
    #[must_use]
    pub fn param(mut self, ty: &str) -> Self {
        self.params.push(ty.to_string());
        self
    }

    /// Sets the return type.
    #[must_use]
    pub fn returns(mut self, ty: &str) -> Self {
        self.ret = ty.to_string();
        self
    }

    /// Replaces the access bits.
    #[must_use]
    pub fn access(mut self, access: u32) -> Self {
        let mask = MethodAccessFlags::all().bits();
        self.flags = (self.flags & !mask) | (access & mask);
        self
    }

    /// Makes the method private.
    #[must_use]
    pub fn private(self) -> Self {
        self.access(MethodAccessFlags::PRIVATE.bits())
    }

    /// ORs raw `MethodAttributes` into the method flags.
    #[must_use]
    pub fn flags(mut self, flags: u32) -> Self {
        self.flags |= flags;
        self
    }

    /// ORs raw `MethodImplAttributes` into the implementation flags.
    #[must_use]
    pub fn impl_flags(mut self, flags: u32) -> Self {
        self.impl_flags |= flags;
        self
    }

    /// Makes the method static.
    #[must_use]
    pub fn static_method(self) -> Self {
        self.flags(MethodModifiers::STATIC.bits())
    }

    /// Makes the method virtual.
    #[must_use]
    pub fn virtual_method(self) -> Self {
        self.flags(MethodModifiers::VIRTUAL.bits())
    }

    /// Makes the method abstract and virtual, without a body.
    #[must_use]
    pub fn abstract_method(mut self) -> Self {
        self.body = None;
        self.flags(MethodModifiers::VIRTUAL.bits() | MethodModifiers::ABSTRACT.bits())
    }

    /// Records the source location reported in stack traces through this method.
    #[must_use]
    pub fn source(mut self, file: &str, line: u32) -> Self {
        self.source = Some((file.to_string(), line));
        self
    }

    /// Sets the native implementation.
    #[must_use]
    pub fn body<F>(mut self, body: F) -> Self
    where
        F: Fn(&NativeCall<'_>) -> CallResult + Send + Sync + 'static,
    {
        self.body = Some(Arc::new(body));
        self
    }

    /// Applies a custom attribute by class display name.
    #[must_use]
    pub fn attribute(mut self, class: &str) -> Self {
        self.attributes.push(class.to_string());
        self
    }
}

/// Scratch state of one image instantiation.
struct Instantiation<'a> {
    runtime: &'a EmulatedRuntime,
    image: ImagePtr,
    generic_scopes: HashMap<usize, Vec<ClassPtr>>,
}

impl<'a> Instantiation<'a> {
    /// Resolves a display name in the scope of a class.
    fn resolve(&self, scope: ClassPtr, name: &str) -> Result<ClassPtr> {
        let name = name.trim();
        if name == SELF_TYPE {
            return Ok(scope);
        }

        if let Some(params) = self.generic_scopes.get(&scope.addr()) {
            let def = self.runtime.class_def(scope);
            if let Some(index) = def.generic_params.iter().position(|p| p == name) {
                return Ok(params[index]);
            }
        }

        if let Some(element) = name.strip_suffix("[]") {
            let element = self.resolve(scope, element)?;
            return Ok(self.runtime.array_class(element));
        }

        if let Some(open) = name.find('<') {
            let inner = name[open + 1..]
                .strip_suffix('>')
                .ok_or_else(|| Error::Error(format!("Malformed generic type name {name}")))?;
            let args = split_generic_args(inner)
                .into_iter()
                .map(|arg| self.resolve(scope, arg))
                .collect::<Result<Vec<_>>>()?;
            let definition = format!("{}`{}", &name[..open], args.len());
            let definition = self.resolve(scope, &definition)?;
            return self
                .runtime
                .inflate(definition, &args)
                .ok_or_else(|| Error::Error(format!("Can not instantiate {name}")));
        }

        self.lookup(name)
            .ok_or_else(|| Error::Error(format!("Unknown type {name}")))
    }

    fn lookup(&self, name: &str) -> Option<ClassPtr> {
        let mut segments = name.split('+');
        let outer = segments.next()?;
        let (namespace, simple) = match outer.rfind('.') {
            Some(dot) => (&outer[..dot], &outer[dot + 1..]),
            None => ("", outer),
        };

        let mut current = self
            .runtime
            .find_class(self.image, namespace, simple)
            .or_else(|| {
                let corlib = self.runtime.corlib_image()?;
                self.runtime.find_class(corlib, namespace, simple)
            })?;

        for nested in segments {
            current = self.runtime.nested_class(current, nested)?;
        }
        Some(current)
    }
}

/// Splits generic arguments at top-level commas.
pub(crate) fn split_generic_args(inner: &str) -> Vec<&str> {
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (index, ch) in inner.char_indices() {
        match ch {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                args.push(inner[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
    }
    args.push(inner[start..].trim());
    args
}

impl AssemblyBuilder {
    /// Instantiates a fresh image from this definition.
    pub(crate) fn instantiate(&self, runtime: &EmulatedRuntime, filename: &str) -> Result<ImagePtr> {
        let image = runtime.insert_image(ImageDef {
            name: self.name.clone(),
            filename: filename.to_string(),
            version: self.version,
            classes: boxcar::Vec::new(),
            top_level: dashmap::DashMap::new(),
            references: self.references.clone(),
        });
        if self.core_library {
            let _ = runtime.corlib.set(image);
        }

        let mut state = Instantiation {
            runtime,
            image,
            generic_scopes: HashMap::new(),
        };

        let mut created = Vec::new();
        for class in &self.classes {
            declare_class(&mut state, class, None, &mut created);
        }

        for (ptr, class) in &created {
            let parent = resolve_parent(&state, *ptr, class)?;
            let def = runtime.class_def(*ptr);
            let _ = def.parent.set(parent);
        }

        let mut pending = Vec::new();
        for (ptr, class) in &created {
            define_members(&state, *ptr, class, &mut pending)?;
        }

        // Attribute instances are allocated last, once every layout in the image is final.
        for (target, scope, names) in pending {
            for name in names {
                let attribute = instantiate_attribute(&state, scope, name)?;
                match target {
                    AttributeTarget::Class(class) => runtime.class_def(class).attributes.push(attribute),
                    AttributeTarget::Field(field) => runtime.field_def(field).attributes.push(attribute),
                    AttributeTarget::Method(method) => runtime.method_def(method).attributes.push(attribute),
                    AttributeTarget::Property(property) => {
                        runtime.property_def(property).attributes.push(attribute)
                    }
                };
            }
        }

        tracing::debug!(
            assembly = %self.name,
            classes = created.len(),
            filename,
            "instantiated emulated image"
        );
        Ok(image)
    }
}

fn declare_class<'b>(
    state: &mut Instantiation<'_>,
    class: &'b ClassBuilder,
    nesting: Option<ClassPtr>,
    created: &mut Vec<(ClassPtr, &'b ClassBuilder)>,
) {
    let kind = match &class.kind {
        BuilderKind::Reference => ClassKind::Reference,
        BuilderKind::Value => ClassKind::Value,
        BuilderKind::Enum(_) => ClassKind::Enum,
        BuilderKind::Primitive { size, align } => ClassKind::Primitive {
            size: *size,
            align: *align,
        },
        BuilderKind::Void => ClassKind::Void,
        BuilderKind::String => ClassKind::String,
    };

    let namespace = if nesting.is_some() { "" } else { &class.namespace };
    let mut def = ClassDef::new(namespace, &class.name, class.flags, kind, state.image, nesting);
    def.generic_params = class.generic_params.clone();
    let ptr = state.runtime.insert_class(def);

    if !class.generic_params.is_empty() {
        let params = class
            .generic_params
            .iter()
            .enumerate()
            .map(|(index, name)| {
                state.runtime.insert_class(ClassDef::new(
                    "",
                    name,
                    0,
                    ClassKind::GenericParam { index },
                    state.image,
                    None,
                ))
            })
            .collect();
        state.generic_scopes.insert(ptr.addr(), params);
    }

    let image = state.runtime.image_def(state.image);
    image.classes.push(ptr);
    match nesting {
        Some(outer) => {
            state.runtime.class_def(outer).nested.push(ptr);
        }
        None => {
            image
                .top_level
                .insert((class.namespace.clone(), class.name.clone()), ptr);
        }
    }

    created.push((ptr, class));
    for nested in &class.nested {
        declare_class(state, nested, Some(ptr), created);
    }
}

fn resolve_parent(
    state: &Instantiation<'_>,
    ptr: ClassPtr,
    class: &ClassBuilder,
) -> Result<Option<ClassPtr>> {
    if let Some(parent) = &class.parent {
        return state.resolve(ptr, parent).map(Some);
    }
    if class.flags & TypeAttributes::INTERFACE != 0
        || (class.namespace == "System" && class.name == "Object")
    {
        return Ok(None);
    }

    let default = match &class.kind {
        BuilderKind::Value | BuilderKind::Primitive { .. } | BuilderKind::Void => "System.ValueType",
        BuilderKind::Enum(_) => "System.Enum",
        BuilderKind::Reference | BuilderKind::String => "System.Object",
    };
    state.resolve(ptr, default).map(Some)
}

/// Member whose custom attributes are allocated after all members exist.
#[derive(Clone, Copy)]
enum AttributeTarget {
    Class(ClassPtr),
    Field(FieldPtr),
    Method(MethodPtr),
    Property(PropertyPtr),
}

type PendingAttributes<'b> = Vec<(AttributeTarget, ClassPtr, &'b [String])>;

fn define_members<'b>(
    state: &Instantiation<'_>,
    ptr: ClassPtr,
    class: &'b ClassBuilder,
    pending: &mut PendingAttributes<'b>,
) -> Result<()> {
    let runtime = state.runtime;
    let def = runtime.class_def(ptr);
    pending.push((AttributeTarget::Class(ptr), ptr, &class.attributes));

    for field in &class.fields {
        let ty = state.resolve(ptr, &field.ty)?;
        let field_ptr: FieldPtr = runtime.insert_field(FieldDef {
            name: field.name.clone(),
            ty,
            parent: ptr,
            flags: field.flags,
            offset: OnceLock::new(),
            constant: field.constant.clone(),
            static_data: OnceLock::new(),
            attributes: boxcar::Vec::new(),
        });
        pending.push((AttributeTarget::Field(field_ptr), ptr, &field.attributes));
        def.fields.push(field_ptr);
    }

    for method in &class.methods {
        let method_ptr = define_method(state, ptr, method, pending)?;
        def.methods.push(method_ptr);
    }

    for property in &class.properties {
        let getter = property
            .getter
            .as_ref()
            .map(|m| define_method(state, ptr, m, pending))
            .transpose()?;
        let setter = property
            .setter
            .as_ref()
            .map(|m| define_method(state, ptr, m, pending))
            .transpose()?;
        for accessor in getter.iter().chain(setter.iter()) {
            def.methods.push(*accessor);
        }

        let property_ptr: PropertyPtr = runtime.insert_property(PropertyDef {
            name: property.name.clone(),
            parent: ptr,
            flags: property.flags,
            getter,
            setter,
            attributes: boxcar::Vec::new(),
        });
        pending.push((AttributeTarget::Property(property_ptr), ptr, &property.attributes));
        def.properties.push(property_ptr);
    }

    Ok(())
}

fn define_method<'b>(
    state: &Instantiation<'_>,
    class: ClassPtr,
    method: &'b MethodBuilder,
    pending: &mut PendingAttributes<'b>,
) -> Result<MethodPtr> {
    let params = method
        .params
        .iter()
        .map(|param| state.resolve(class, param))
        .collect::<Result<Vec<_>>>()?;
    let ret = state.resolve(class, &method.ret)?;

    let method_ptr = state.runtime.insert_method(MethodDef {
        name: method.name.clone(),
        class,
        flags: method.flags,
        impl_flags: method.impl_flags,
        params,
        ret,
        body: method.body.clone(),
        source: method.source.clone(),
        attributes: boxcar::Vec::new(),
    });
    pending.push((AttributeTarget::Method(method_ptr), class, &method.attributes));
    Ok(method_ptr)
}

fn instantiate_attribute(
    state: &Instantiation<'_>,
    scope: ClassPtr,
    name: &str,
) -> Result<crate::runtime::ObjectPtr> {
    let class = state.resolve(scope, name)?;
    Ok(state.runtime.alloc_instance(class))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_generic_args() {
        assert_eq!(split_generic_args("System.Int32"), vec!["System.Int32"]);
        assert_eq!(
            split_generic_args("System.String, System.Collections.Generic.List<System.Int32>"),
            vec!["System.String", "System.Collections.Generic.List<System.Int32>"]
        );
        assert_eq!(
            split_generic_args("A<B,C>,D"),
            vec!["A<B,C>", "D"]
        );
    }

    #[test]
    fn test_generic_params_suffix_name() {
        let class = ClassBuilder::new("Ns", "Pair").generic_params(&["K", "V"]);
        assert_eq!(class.name, "Pair`2");
        assert_eq!(class.generic_params, vec!["K", "V"]);
    }

    #[test]
    fn test_enum_values_sized_to_underlying() {
        let class = ClassBuilder::new("Game", "Flags")
            .enumeration("System.Byte")
            .enum_value("A", 1)
            .enum_value("B", 2);

        assert_eq!(class.fields.len(), 3);
        assert_eq!(class.fields[0].name, "value__");
        assert_eq!(class.fields[2].constant.as_deref(), Some(&[2u8][..]));
        assert_eq!(class.fields[2].ty, SELF_TYPE);
    }

    #[test]
    fn test_auto_property_shape() {
        let class = ClassBuilder::new("Game", "Player").auto_property("Name", "System.String");

        assert_eq!(class.fields[0].name, "<Name>k__BackingField");
        assert_eq!(class.fields[0].attributes, vec![COMPILER_GENERATED.to_string()]);
        let property = &class.properties[0];
        assert_eq!(property.getter.as_ref().unwrap().name, "get_Name");
        assert_eq!(property.setter.as_ref().unwrap().params, vec!["System.String"]);
    }

    #[test]
    fn test_indexer_accessor_params() {
        let property = PropertyBuilder::new("Item", "System.Int32")
            .indexed("System.Int32")
            .getter(|_| Ok(EmValue::Void))
            .setter(|_| Ok(EmValue::Void));

        assert_eq!(property.getter.as_ref().unwrap().params, vec!["System.Int32"]);
        assert_eq!(
            property.setter.as_ref().unwrap().params,
            vec!["System.Int32", "System.Int32"]
        );
    }
}
