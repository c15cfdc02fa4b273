//! Metadata records of the emulated runtime.
//!
//! Every class, field, property, method, image, assembly and domain is one record stored
//! in an [`Arena`]. A record's address is its raw handle, so handles are stable and
//! comparable exactly like the pointers handed out by a native runtime.
//!
//! Records are immutable once registered, except for append-only member lists
//! (`boxcar::Vec`) and lazily computed values (`OnceLock`) such as the instance layout.

use std::{
    ffi::c_void,
    fmt,
    ptr::NonNull,
    sync::{Arc, OnceLock},
};

use dashmap::DashMap;

use crate::{
    emulation::{call::NativeBody, heap::RawBuffer},
    runtime::{
        AssemblyPtr, AssemblyReference, ClassPtr, FieldPtr, ImagePtr, MethodPtr, ObjectPtr,
        PropertyPtr,
    },
};

/// Identity-keyed storage of metadata records.
///
/// Records are never removed, so every handle handed out stays valid for the lifetime of
/// the arena.
pub struct Arena<T> {
    records: DashMap<usize, Arc<T>>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Arena {
            records: DashMap::new(),
        }
    }
}

impl<T> Arena<T> {
    /// Stores a record and returns its address.
    pub fn insert(&self, record: T) -> NonNull<c_void> {
        let record = Arc::new(record);
        let ptr = NonNull::from(record.as_ref()).cast::<c_void>();
        self.records.insert(ptr.as_ptr() as usize, record);
        ptr
    }

    /// Looks up a record by address.
    #[must_use]
    pub fn try_get(&self, addr: usize) -> Option<Arc<T>> {
        self.records.get(&addr).map(|entry| entry.value().clone())
    }

    /// Looks up a record by address.
    ///
    /// # Panics
    /// Panics if the address was not produced by this arena. Handles are only ever created
    /// by the runtime that owns them, so this is a caller bug.
    #[must_use]
    pub fn get(&self, addr: usize) -> Arc<T> {
        match self.try_get(addr) {
            Some(record) => record,
            None => panic!("handle {addr:#x} is not owned by this runtime"),
        }
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the arena holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Classification of an emulated class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassKind {
    /// A reference type with instance fields
    Reference,
    /// A user-defined value type laid out from its instance fields
    Value,
    /// A built-in value type with a fixed layout
    Primitive {
        /// Value size in bytes
        size: usize,
        /// Value alignment in bytes
        align: usize,
    },
    /// An enumeration, laid out as its `value__` field
    Enum,
    /// `System.Void`
    Void,
    /// `System.String`
    String,
    /// A single-dimensional array class
    Array {
        /// Element class
        element: ClassPtr,
        /// Array rank
        rank: u32,
    },
    /// A type parameter of an open generic class
    GenericParam {
        /// Position in the parameter list
        index: usize,
    },
}

impl ClassKind {
    /// Whether instances of this kind are value types.
    #[must_use]
    pub fn is_valuetype(&self) -> bool {
        matches!(
            self,
            ClassKind::Value | ClassKind::Primitive { .. } | ClassKind::Enum | ClassKind::Void
        )
    }
}

/// Instance layout of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Bytes of instance field storage, base classes included
    pub instance_size: usize,
    /// Size of the value as stored in a slot
    pub value_size: usize,
    /// Alignment of the value as stored in a slot
    pub align: usize,
}

/// Generic instantiation data of a closed generic class.
#[derive(Debug, Clone)]
pub struct GenericInstance {
    /// The open generic definition
    pub definition: ClassPtr,
    /// Type arguments
    pub args: Vec<ClassPtr>,
}

/// A class record.
pub struct ClassDef {
    /// Simple name, including the generic arity suffix for generic definitions
    pub name: String,
    /// Namespace, empty for nested classes
    pub namespace: String,
    /// Raw `TypeAttributes`
    pub flags: u32,
    /// Classification
    pub kind: ClassKind,
    /// Defining image
    pub image: ImagePtr,
    /// Enclosing class
    pub nesting: Option<ClassPtr>,
    /// Base class, resolved after all classes of an image are registered
    pub parent: OnceLock<Option<ClassPtr>>,
    /// Immediate nested classes
    pub nested: boxcar::Vec<ClassPtr>,
    /// Declared fields
    pub fields: boxcar::Vec<FieldPtr>,
    /// Declared properties
    pub properties: boxcar::Vec<PropertyPtr>,
    /// Declared methods
    pub methods: boxcar::Vec<MethodPtr>,
    /// Custom attribute instances
    pub attributes: boxcar::Vec<ObjectPtr>,
    /// Type parameter names of a generic definition
    pub generic_params: Vec<String>,
    /// Instantiation data of a closed generic class
    pub generic: Option<GenericInstance>,
    /// Lazily computed layout
    pub layout: OnceLock<Layout>,
}

impl ClassDef {
    /// Creates a class record without members.
    #[must_use]
    pub fn new(
        namespace: &str,
        name: &str,
        flags: u32,
        kind: ClassKind,
        image: ImagePtr,
        nesting: Option<ClassPtr>,
    ) -> Self {
        ClassDef {
            name: name.to_string(),
            namespace: namespace.to_string(),
            flags,
            kind,
            image,
            nesting,
            parent: OnceLock::new(),
            nested: boxcar::Vec::new(),
            fields: boxcar::Vec::new(),
            properties: boxcar::Vec::new(),
            methods: boxcar::Vec::new(),
            attributes: boxcar::Vec::new(),
            generic_params: Vec::new(),
            generic: None,
            layout: OnceLock::new(),
        }
    }

    /// Base class, `None` for roots and unresolved classes.
    #[must_use]
    pub fn parent(&self) -> Option<ClassPtr> {
        self.parent.get().copied().flatten()
    }
}

impl fmt::Debug for ClassDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDef")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// A field record.
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Declared type
    pub ty: ClassPtr,
    /// Declaring class
    pub parent: ClassPtr,
    /// Raw `FieldAttributes`
    pub flags: u32,
    /// Offset into the instance payload, assigned by the layout pass
    pub offset: OnceLock<usize>,
    /// Constant value bytes of a literal field
    pub constant: Option<Vec<u8>>,
    /// Storage of a static field
    pub static_data: OnceLock<RawBuffer>,
    /// Custom attribute instances
    pub attributes: boxcar::Vec<ObjectPtr>,
}

impl FieldDef {
    /// Whether the field is static (literal fields included).
    #[must_use]
    pub fn is_static(&self) -> bool {
        use crate::runtime::flags::FieldAttributes;
        self.flags & (FieldAttributes::STATIC | FieldAttributes::LITERAL) != 0
    }
}

/// A method record.
pub struct MethodDef {
    /// Method name
    pub name: String,
    /// Declaring class
    pub class: ClassPtr,
    /// Raw `MethodAttributes`
    pub flags: u32,
    /// Raw `MethodImplAttributes`
    pub impl_flags: u32,
    /// Declared parameter types
    pub params: Vec<ClassPtr>,
    /// Declared return type
    pub ret: ClassPtr,
    /// Native implementation, `None` for abstract methods
    pub body: Option<NativeBody>,
    /// Source file and line reported in stack traces
    pub source: Option<(String, u32)>,
    /// Custom attribute instances
    pub attributes: boxcar::Vec<ObjectPtr>,
}

/// A property record.
pub struct PropertyDef {
    /// Property name
    pub name: String,
    /// Declaring class
    pub parent: ClassPtr,
    /// Raw `PropertyAttributes`
    pub flags: u32,
    /// Getter accessor
    pub getter: Option<MethodPtr>,
    /// Setter accessor
    pub setter: Option<MethodPtr>,
    /// Custom attribute instances
    pub attributes: boxcar::Vec<ObjectPtr>,
}

/// An image record.
pub struct ImageDef {
    /// Assembly simple name
    pub name: String,
    /// File name the image was opened from
    pub filename: String,
    /// Assembly version
    pub version: [u16; 4],
    /// Every class defined by the image, in definition order
    pub classes: boxcar::Vec<ClassPtr>,
    /// Top-level classes by namespace and name
    pub top_level: DashMap<(String, String), ClassPtr>,
    /// Referenced assemblies
    pub references: Vec<AssemblyReference>,
}

/// An assembly record.
pub struct AssemblyDef {
    /// Assembly simple name
    pub name: String,
    /// Image of the assembly
    pub image: ImagePtr,
}

/// A domain record.
pub struct DomainDef {
    /// Friendly name
    pub name: String,
    /// Assemblies opened in this domain, by path
    pub assemblies: DashMap<String, AssemblyPtr>,
    /// Reflection type objects handed out in this domain, by class address
    pub type_objects: DashMap<usize, ObjectPtr>,
}

impl DomainDef {
    /// Creates an empty domain record.
    #[must_use]
    pub fn new(name: &str) -> Self {
        DomainDef {
            name: name.to_string(),
            assemblies: DashMap::new(),
            type_objects: DashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_identity() {
        let arena: Arena<String> = Arena::default();
        let a = arena.insert("a".to_string());
        let b = arena.insert("b".to_string());

        assert_ne!(a, b);
        assert_eq!(arena.get(a.as_ptr() as usize).as_str(), "a");
        assert_eq!(arena.get(b.as_ptr() as usize).as_str(), "b");
        assert!(arena.try_get(0x10).is_none());
        assert_eq!(arena.len(), 2);
    }

    #[test]
    #[should_panic(expected = "not owned by this runtime")]
    fn test_arena_foreign_handle() {
        let arena: Arena<u32> = Arena::default();
        let _ = arena.get(0xdead);
    }

    #[test]
    fn test_kind_classification() {
        assert!(ClassKind::Enum.is_valuetype());
        assert!(ClassKind::Primitive { size: 4, align: 4 }.is_valuetype());
        assert!(!ClassKind::String.is_valuetype());
        assert!(!ClassKind::Reference.is_valuetype());
    }
}
