//! The [`Type`] handle.

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::{
    domain::Domain,
    marshal::Blittable,
    members::{Field, Method, Property},
    object::Object,
    runtime::{
        self,
        flags::{FieldAttributes, TypeAttributes},
        ClassPtr, Runtime,
    },
    types::{cache::MetaCache, hash::type_hash, names::strip_namespace},
    Error, Result,
};

pub(crate) static TYPE_CACHE: MetaCache<TypeMeta> = MetaCache::new("type");

const LIST_PREFIX: &str = "System.Collections.Generic.List<";

/// Derived metadata of a class, computed once per class handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TypeMeta {
    pub(crate) namespace: String,
    pub(crate) name: String,
    pub(crate) fullname: String,
    pub(crate) hash: u64,
    pub(crate) size: usize,
    pub(crate) align: usize,
    pub(crate) rank: u32,
    pub(crate) flags: u32,
    pub(crate) is_valuetype: bool,
    pub(crate) is_enum: bool,
}

impl TypeMeta {
    fn compute(rt: &dyn Runtime, class: ClassPtr) -> Self {
        let fullname = rt.class_display_name(class);
        let name = if rt.class_generic_args(class).is_empty() {
            rt.class_name(class)
        } else {
            strip_namespace(&fullname)
        };
        let (size, align) = rt.class_value_size(class);

        TypeMeta {
            namespace: rt.class_namespace(class),
            hash: type_hash(&fullname),
            name,
            fullname,
            size,
            align,
            rank: rt.class_rank(class),
            flags: rt.class_flags(class),
            is_valuetype: rt.class_is_valuetype(class),
            is_enum: rt.class_is_enum(class),
        }
    }
}

/// A handle to one managed type.
///
/// `Type` is a cheap, clonable view over a class handle plus its cached metadata. An
/// invalid `Type` (see [`Type::invalid`]) is the result of a failed resolution: its
/// metadata queries return empty defaults, and operations that need the class return
/// [`Error::InvalidHandle`].
///
/// Equality and hashing follow the class handle identity.
#[derive(Clone, Default)]
pub struct Type {
    class: Option<ClassPtr>,
    meta: Option<Arc<TypeMeta>>,
}

impl Type {
    /// The invalid type.
    #[must_use]
    pub fn invalid() -> Self {
        Type::default()
    }

    /// Wraps a class handle of the installed runtime.
    ///
    /// # Errors
    /// Returns [`Error::RuntimeNotInitialized`] if no runtime is installed.
    pub fn from_ptr(class: ClassPtr) -> Result<Self> {
        Ok(Type::wrap(runtime::get()?, class))
    }

    pub(crate) fn wrap(rt: &dyn Runtime, class: ClassPtr) -> Self {
        let meta = TYPE_CACHE.get_or_compute(class.addr(), || TypeMeta::compute(rt, class));
        Type {
            class: Some(class),
            meta: Some(meta),
        }
    }

    pub(crate) fn wrap_opt(rt: &dyn Runtime, class: Option<ClassPtr>) -> Self {
        class.map_or_else(Type::invalid, |class| Type::wrap(rt, class))
    }

    /// The type described by a reflection `System.Type` object.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] for an invalid object.
    pub fn from_reflection_object(object: &Object) -> Result<Self> {
        let (rt, ptr) = object.handle()?;
        Ok(Type::wrap_opt(rt, rt.reflection_type_get_class(ptr)))
    }

    /// The reflection `System.Type` object of this type in `domain`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] for an invalid type.
    pub fn reflection_object(&self, domain: &Domain) -> Result<Object> {
        let (rt, class) = self.handle()?;
        Ok(Object::wrap(rt, rt.type_get_object(domain.as_ptr(), class)))
    }

    /// Whether this handle refers to a type.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.class.is_some()
    }

    /// The raw class handle.
    #[must_use]
    pub fn as_ptr(&self) -> Option<ClassPtr> {
        self.class
    }

    pub(crate) fn handle(&self) -> Result<(&'static dyn Runtime, ClassPtr)> {
        let class = self.class.ok_or(Error::InvalidHandle("type"))?;
        Ok((runtime::get()?, class))
    }

    fn query(&self) -> Option<(&'static dyn Runtime, ClassPtr)> {
        self.handle().ok()
    }

    fn meta(&self) -> Option<&TypeMeta> {
        self.meta.as_deref()
    }

    /// Namespace, empty for nested types.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.meta().map_or("", |meta| meta.namespace.as_str())
    }

    /// Simple name; for generic instances the display name without namespaces.
    #[must_use]
    pub fn name(&self) -> &str {
        self.meta().map_or("", |meta| meta.name.as_str())
    }

    /// Full display name.
    #[must_use]
    pub fn fullname(&self) -> &str {
        self.meta().map_or("", |meta| meta.fullname.as_str())
    }

    /// CRC-64 of the full display name, 0 for the invalid type.
    #[must_use]
    pub fn hash(&self) -> u64 {
        self.meta().map_or(0, |meta| meta.hash)
    }

    /// Size of the unboxed value.
    #[must_use]
    pub fn size(&self) -> usize {
        self.meta().map_or(0, |meta| meta.size)
    }

    /// Alignment of the unboxed value.
    #[must_use]
    pub fn align(&self) -> usize {
        self.meta().map_or(0, |meta| meta.align)
    }

    /// Array rank, 0 for non-array types.
    #[must_use]
    pub fn rank(&self) -> u32 {
        self.meta().map_or(0, |meta| meta.rank)
    }

    /// Raw `TypeAttributes` word.
    #[must_use]
    pub fn flags(&self) -> u32 {
        self.meta().map_or(0, |meta| meta.flags)
    }

    /// Whether instances are value types.
    #[must_use]
    pub fn is_valuetype(&self) -> bool {
        self.meta().is_some_and(|meta| meta.is_valuetype)
    }

    /// Whether this is an enumeration.
    #[must_use]
    pub fn is_enum(&self) -> bool {
        self.meta().is_some_and(|meta| meta.is_enum)
    }

    /// A value type that is not an enumeration.
    #[must_use]
    pub fn is_struct(&self) -> bool {
        self.is_valuetype() && !self.is_enum()
    }

    /// A reference type.
    #[must_use]
    pub fn is_class(&self) -> bool {
        self.valid() && !self.is_valuetype()
    }

    /// Whether this is an array type.
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.rank() > 0
    }

    /// Whether the type is abstract.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.flags() & TypeAttributes::ABSTRACT != 0
    }

    /// Whether the type is sealed.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.flags() & TypeAttributes::SEALED != 0
    }

    /// Whether the type is an interface.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.flags() & TypeAttributes::INTERFACE != 0
    }

    /// Whether the type is marked serializable.
    #[must_use]
    pub fn is_serializable(&self) -> bool {
        self.flags() & TypeAttributes::SERIALIZABLE != 0
    }

    /// Whether this is `System.String`.
    #[must_use]
    pub fn is_string(&self) -> bool {
        self.query().is_some_and(|(rt, class)| {
            rt.class_from_name(rt.corlib(), "System", "String") == Some(class)
        })
    }

    /// Whether this is a closed `System.Collections.Generic.List<T>`.
    #[must_use]
    pub fn is_list(&self) -> bool {
        self.fullname().starts_with(LIST_PREFIX)
    }

    /// Element type of an array, or the `Item` type of a generic list.
    #[must_use]
    pub fn element_type(&self) -> Type {
        let Some((rt, class)) = self.query() else {
            return Type::invalid();
        };
        if self.is_array() {
            return Type::wrap_opt(rt, rt.class_element_class(class));
        }
        if self.is_list() {
            return self
                .property("Item")
                .map_or_else(|_| Type::invalid(), |item| item.property_type().clone());
        }
        Type::invalid()
    }

    /// Whether the type has a base type.
    #[must_use]
    pub fn has_base_type(&self) -> bool {
        self.query()
            .is_some_and(|(rt, class)| rt.class_parent(class).is_some())
    }

    /// Direct base type, invalid for `System.Object` and interfaces.
    #[must_use]
    pub fn base_type(&self) -> Type {
        self.query()
            .map_or_else(Type::invalid, |(rt, class)| Type::wrap_opt(rt, rt.class_parent(class)))
    }

    /// Immediate nested types.
    #[must_use]
    pub fn nested_types(&self) -> Vec<Type> {
        self.query().map_or_else(Vec::new, |(rt, class)| {
            rt.class_nested_types(class)
                .into_iter()
                .map(|nested| Type::wrap(rt, nested))
                .collect()
        })
    }

    /// Whether this type equals or derives from `base`.
    #[must_use]
    pub fn is_derived_from(&self, base: &Type) -> bool {
        match (self.query(), base.class) {
            (Some((rt, class)), Some(parent)) => rt.class_is_subclass_of(class, parent),
            _ => false,
        }
    }

    /// Underlying integral type of an enumeration.
    #[must_use]
    pub fn enum_base_type(&self) -> Type {
        self.query().map_or_else(Type::invalid, |(rt, class)| {
            Type::wrap_opt(rt, rt.class_enum_basetype(class))
        })
    }

    /// Literal values of an enumeration, in declaration order.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] for an invalid type and
    /// [`Error::TypeLayoutMismatch`] if `T` is not the size of the underlying type.
    pub fn enum_values<T: Blittable>(&self) -> Result<Vec<(T, String)>> {
        let (rt, class) = self.handle()?;
        if !self.is_enum() {
            return Ok(Vec::new());
        }
        self.check_layout::<T>()?;

        let domain = Domain::current()?;
        let literal = FieldAttributes::STATIC | FieldAttributes::LITERAL;
        let mut values = Vec::new();
        for field in rt.class_fields(class) {
            if rt.field_flags(field) & literal != literal {
                continue;
            }
            let mut buffer = vec![0u8; self.size()];
            // SAFETY: the buffer holds the underlying value size, checked against T above.
            unsafe {
                rt.field_static_get_value(domain.as_ptr(), field, buffer.as_mut_ptr().cast());
            }
            if let Some(value) = T::from_bytes(&buffer) {
                values.push((value, rt.field_name(field)));
            }
        }
        Ok(values)
    }

    /// Checks that the native type `T` has this type's value layout.
    ///
    /// The sizes must agree and the native alignment may not be looser than the managed.
    ///
    /// # Errors
    /// Returns [`Error::TypeLayoutMismatch`] on disagreement.
    pub fn check_layout<T>(&self) -> Result<()> {
        let native_size = std::mem::size_of::<T>();
        let native_align = std::mem::align_of::<T>();
        if self.size() == native_size && native_align <= self.align().max(1) {
            return Ok(());
        }
        Err(Error::TypeLayoutMismatch {
            type_name: self.fullname().to_string(),
            managed_size: self.size(),
            managed_align: self.align(),
            native_size,
            native_align,
        })
    }

    /// A field of this type or one of its bases.
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if no such field exists.
    pub fn field(&self, name: &str) -> Result<Field> {
        Field::new(self, name)
    }

    /// A property of this type or one of its bases.
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if no such property exists.
    pub fn property(&self, name: &str) -> Result<Property> {
        Property::new(self, name)
    }

    /// A method by name or by `Name(Type1,Type2)` description.
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if no method matches.
    pub fn method(&self, name_or_desc: &str) -> Result<Method> {
        Method::new(self, name_or_desc)
    }

    /// A method by name and parameter count.
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if no method matches.
    pub fn method_with_arity(&self, name: &str, argc: usize) -> Result<Method> {
        Method::with_arity(self, name, argc)
    }

    /// Fields of this type, preceded by those of its bases if `include_base` is set.
    #[must_use]
    pub fn fields(&self, include_base: bool) -> Vec<Field> {
        self.collect_members(include_base, |rt, class, owner| {
            rt.class_fields(class)
                .into_iter()
                .map(|field| Field::wrap(rt, field, owner))
                .collect()
        })
    }

    /// Properties of this type, preceded by those of its bases if `include_base` is set.
    #[must_use]
    pub fn properties(&self, include_base: bool) -> Vec<Property> {
        self.collect_members(include_base, |rt, class, owner| {
            rt.class_properties(class)
                .into_iter()
                .map(|property| Property::wrap(rt, property, owner))
                .collect()
        })
    }

    /// Methods of this type, preceded by those of its bases if `include_base` is set.
    #[must_use]
    pub fn methods(&self, include_base: bool) -> Vec<Method> {
        self.collect_members(include_base, |rt, class, _| {
            rt.class_methods(class)
                .into_iter()
                .map(|method| Method::wrap(rt, method))
                .collect()
        })
    }

    fn collect_members<M, F>(&self, include_base: bool, members: F) -> Vec<M>
    where
        F: Fn(&'static dyn Runtime, ClassPtr, &Type) -> Vec<M>,
    {
        let Some((rt, _)) = self.query() else {
            return Vec::new();
        };

        let mut chain = vec![self.clone()];
        if include_base {
            let mut current = self.base_type();
            while let Some(class) = current.class {
                chain.push(current.clone());
                current = Type::wrap_opt(rt, rt.class_parent(class));
            }
        }

        chain
            .iter()
            .rev()
            .filter_map(|owner| owner.class.map(|class| members(rt, class, owner)))
            .flatten()
            .collect()
    }

    /// Custom attribute instances applied to this type.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] for an invalid type.
    pub fn attributes(&self) -> Result<Vec<Object>> {
        let (rt, class) = self.handle()?;
        Ok(rt
            .class_custom_attrs(class)
            .into_iter()
            .map(|attribute| Object::wrap(rt, attribute))
            .collect())
    }

    /// Whether an attribute with the given full name is applied to this type.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] for an invalid type.
    pub fn has_attribute(&self, full_name: &str) -> Result<bool> {
        Ok(self
            .attributes()?
            .iter()
            .any(|attribute| attribute.get_type().fullname() == full_name))
    }

    /// Creates an instance in `domain`, running the parameterless constructor of reference
    /// types.
    ///
    /// # Errors
    /// See [`Object::new_instance`].
    pub fn new_instance(&self, domain: &Domain) -> Result<Object> {
        Object::new_instance(domain, self)
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.class.hash(state);
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.class {
            Some(class) => write!(f, "Type({}, {:#x})", self.fullname(), class.addr()),
            None => write!(f, "Type(<invalid>)"),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.fullname())
    }
}
