//! Opaque raw handles into runtime-owned memory.
//!
//! Every handle is a non-null pointer newtype with identity semantics: equality,
//! ordering and hashing use the address only. The bridge never dereferences a handle
//! itself; all access goes through [`crate::runtime::Runtime`].

raw_handle!(
    /// A managed class (`MonoClass*`)
    ClassPtr
);

raw_handle!(
    /// A field of a managed class (`MonoClassField*`)
    FieldPtr
);

raw_handle!(
    /// A property of a managed class (`MonoProperty*`)
    PropertyPtr
);

raw_handle!(
    /// A method of a managed class (`MonoMethod*`)
    MethodPtr
);

raw_handle!(
    /// A managed heap object or boxed value (`MonoObject*`)
    ObjectPtr
);

raw_handle!(
    /// A loaded metadata image (`MonoImage*`)
    ImagePtr
);

raw_handle!(
    /// A loaded assembly (`MonoAssembly*`)
    AssemblyPtr
);

raw_handle!(
    /// A managed execution domain (`MonoDomain*`)
    DomainPtr
);

/// A reference from one assembly to another, as recorded in its manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyReference {
    /// Simple name of the referenced assembly
    pub name: String,
    /// Major, minor, build and revision numbers
    pub version: [u16; 4],
}

impl std::fmt::Display for AssemblyReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [major, minor, build, revision] = self.version;
        write!(f, "{} Version={major}.{minor}.{build}.{revision}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use std::ptr::NonNull;

    use super::*;

    #[test]
    fn test_handle_identity() {
        let mut a = 1u64;
        let mut b = 2u64;
        let pa = ClassPtr::from_ptr((&mut a as *mut u64).cast()).unwrap();
        let pa2 = ClassPtr::from_non_null(NonNull::from(&mut a).cast());
        let pb = ClassPtr::from_ptr((&mut b as *mut u64).cast()).unwrap();

        assert_eq!(pa, pa2);
        assert_ne!(pa, pb);
        assert_eq!(pa.addr(), pa2.addr());
        assert!(ClassPtr::from_ptr(std::ptr::null_mut()).is_none());
    }

    #[test]
    fn test_reference_display() {
        let reference = AssemblyReference {
            name: "mscorlib".to_string(),
            version: [4, 0, 0, 0],
        };
        assert_eq!(reference.to_string(), "mscorlib Version=4.0.0.0");
    }
}
