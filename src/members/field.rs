use std::{fmt, sync::Arc};

use crate::{
    members::Visibility,
    object::Object,
    runtime::{flags::FieldAttributes, FieldPtr, Runtime},
    types::{MetaCache, Type},
    Result,
};

pub(crate) static FIELD_CACHE: MetaCache<FieldMeta> = MetaCache::new("field");

/// Name given by the C# compiler to the storage of an auto-implemented property.
const BACKING_FIELD_SUFFIX: &str = ">k__BackingField";

const COMPILER_GENERATED: &str = "System.Runtime.CompilerServices.CompilerGeneratedAttribute";

pub(crate) struct FieldMeta {
    name: String,
    fullname: String,
    full_declname: String,
    flags: u32,
    visibility: Visibility,
    ty: Type,
    declaring: Type,
}

impl FieldMeta {
    fn compute(rt: &dyn Runtime, field: FieldPtr) -> Self {
        let name = rt.field_name(field);
        let flags = rt.field_flags(field);
        let ty = Type::wrap(rt, rt.field_type(field));
        let visibility = Visibility::from_access_flags(flags);
        let storage = if flags & FieldAttributes::STATIC != 0 {
            " static "
        } else {
            " "
        };

        FieldMeta {
            full_declname: format!("{visibility}{storage}{} {name}", ty.fullname()),
            fullname: rt.field_full_name(field),
            name,
            flags,
            visibility,
            ty,
            declaring: Type::wrap(rt, rt.field_parent(field)),
        }
    }
}

/// A handle to one field of a managed type.
///
/// Fields are looked up through a [`Type`] and remember it as their owner; the declaring
/// type may be a base class of the owner.
#[derive(Clone)]
pub struct Field {
    field: FieldPtr,
    owner: Type,
    meta: Arc<FieldMeta>,
}

impl Field {
    /// Looks up a field of `owner` or one of its base types.
    ///
    /// # Errors
    /// Returns [`crate::Error::MemberNotFound`] if the field does not exist, and
    /// [`crate::Error::InvalidHandle`] for an invalid owner.
    pub fn new(owner: &Type, name: &str) -> Result<Self> {
        let (rt, class) = owner.handle()?;
        let mut current = Some(class);
        while let Some(candidate) = current {
            if let Some(field) = rt.class_field_from_name(candidate, name) {
                return Ok(Field::wrap(rt, field, owner));
            }
            current = rt.class_parent(candidate);
        }
        Err(member_not_found!("field", name, owner.name()))
    }

    pub(crate) fn wrap(rt: &dyn Runtime, field: FieldPtr, owner: &Type) -> Self {
        Field {
            meta: FIELD_CACHE.get_or_compute(field.addr(), || FieldMeta::compute(rt, field)),
            field,
            owner: owner.clone(),
        }
    }

    /// The raw field handle.
    #[must_use]
    pub fn as_ptr(&self) -> FieldPtr {
        self.field
    }

    /// Type the field was looked up on.
    #[must_use]
    pub fn owner(&self) -> &Type {
        &self.owner
    }

    /// Type that declares the field.
    #[must_use]
    pub fn declaring_type(&self) -> &Type {
        &self.meta.declaring
    }

    /// Field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// `Namespace.Class:field`.
    #[must_use]
    pub fn fullname(&self) -> &str {
        &self.meta.fullname
    }

    /// Declaration as written in C#, e.g. `public static System.Int32 MaxLevel`.
    #[must_use]
    pub fn full_declname(&self) -> &str {
        &self.meta.full_declname
    }

    /// Declared type of the field.
    #[must_use]
    pub fn field_type(&self) -> &Type {
        &self.meta.ty
    }

    /// Declared accessibility.
    #[must_use]
    pub fn visibility(&self) -> Visibility {
        self.meta.visibility
    }

    /// Raw `FieldAttributes` word.
    #[must_use]
    pub fn flags(&self) -> u32 {
        self.meta.flags
    }

    /// Whether the field is static.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.meta.flags & FieldAttributes::STATIC != 0
    }

    /// Whether the field is `readonly`.
    #[must_use]
    pub fn is_readonly(&self) -> bool {
        self.meta.flags & FieldAttributes::INIT_ONLY != 0
    }

    /// Whether the field is a compile-time constant.
    #[must_use]
    pub fn is_const(&self) -> bool {
        self.meta.flags & FieldAttributes::LITERAL != 0
    }

    /// Whether the field holds a value type.
    #[must_use]
    pub fn is_valuetype(&self) -> bool {
        self.meta.ty.is_valuetype()
    }

    /// Custom attribute instances applied to the field.
    ///
    /// # Errors
    /// Returns [`crate::Error::RuntimeNotInitialized`] if no runtime is installed.
    pub fn attributes(&self) -> Result<Vec<Object>> {
        let rt = crate::runtime::get()?;
        Ok(rt
            .field_custom_attrs(self.field)
            .into_iter()
            .map(|attribute| Object::wrap(rt, attribute))
            .collect())
    }

    /// Whether an attribute with the given full name is applied to the field.
    ///
    /// # Errors
    /// Returns [`crate::Error::RuntimeNotInitialized`] if no runtime is installed.
    pub fn has_attribute(&self, full_name: &str) -> Result<bool> {
        Ok(self
            .attributes()?
            .iter()
            .any(|attribute| attribute.get_type().fullname() == full_name))
    }

    /// Whether the field is the compiler-generated storage of an auto-property.
    ///
    /// # Errors
    /// Returns [`crate::Error::RuntimeNotInitialized`] if no runtime is installed.
    pub fn is_backing_field(&self) -> Result<bool> {
        if self.has_attribute(COMPILER_GENERATED)? {
            return Ok(true);
        }
        let name = self.name();
        Ok(name.starts_with('<') && name.contains(BACKING_FIELD_SUFFIX))
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.field == other.field
    }
}

impl Eq for Field {}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Field({})", self.fullname())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test::game_type, Error};

    #[test]
    fn test_field_metadata() {
        let player = game_type("Game", "Player");
        let count = player.field("count").unwrap();
        assert_eq!(count.name(), "count");
        assert_eq!(count.fullname(), "Game.Player:count");
        assert_eq!(count.full_declname(), "public System.Int32 count");
        assert!(!count.is_static());
        assert!(count.is_valuetype());
        assert_eq!(count.visibility(), Visibility::Public);

        let secret = player.field("secret").unwrap();
        assert_eq!(secret.visibility(), Visibility::Private);
        assert_eq!(secret.full_declname(), "private System.String secret");
        assert!(!secret.is_valuetype());
    }

    #[test]
    fn test_inherited_field() {
        let enemy = game_type("Game", "Enemy");
        let health = enemy.field("health").unwrap();
        assert_eq!(health.owner(), &enemy);
        assert_eq!(health.declaring_type(), &game_type("Game", "Actor"));
    }

    #[test]
    fn test_missing_field() {
        let err = game_type("Game", "Player").field("mana").unwrap_err();
        assert!(matches!(err, Error::MemberNotFound { kind: "field", .. }));
        assert_eq!(
            err.to_string(),
            "NATIVE::Could not get field : mana for class Player"
        );
    }

    #[test]
    fn test_const_and_backing_fields() {
        let player = game_type("Game", "Player");
        let max = player.field("MaxLevel").unwrap();
        assert!(max.is_const() && max.is_static());
        assert_eq!(max.full_declname(), "public static System.Int32 MaxLevel");

        let backing = player.field("<Name>k__BackingField").unwrap();
        assert!(backing.is_backing_field().unwrap());
        assert!(backing.has_attribute(COMPILER_GENERATED).unwrap());
        assert!(!player.field("count").unwrap().is_backing_field().unwrap());
    }
}
