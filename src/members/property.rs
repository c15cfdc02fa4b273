use std::{fmt, sync::Arc};

use crate::{
    members::{Method, Visibility},
    object::Object,
    runtime::{flags::PropertyAttributes, PropertyPtr, Runtime},
    types::{MetaCache, Type},
    Result,
};

pub(crate) static PROPERTY_CACHE: MetaCache<PropertyMeta> = MetaCache::new("property");

pub(crate) struct PropertyMeta {
    name: String,
    fullname: String,
    full_declname: String,
    flags: u32,
    ty: Type,
    getter: Option<Method>,
    setter: Option<Method>,
}

impl PropertyMeta {
    fn compute(rt: &dyn Runtime, property: PropertyPtr) -> Self {
        let name = rt.property_name(property);
        let getter = rt
            .property_get_method(property)
            .map(|method| Method::wrap(rt, method));
        let setter = rt
            .property_set_method(property)
            .map(|method| Method::wrap(rt, method));

        // Without a getter the value type is the last parameter of the setter.
        let ty = match (&getter, &setter) {
            (Some(getter), _) => getter.return_type().clone(),
            (None, Some(setter)) => setter.param_types().last().cloned().unwrap_or_default(),
            (None, None) => Type::invalid(),
        };

        let visibility = accessor_visibility(getter.as_ref(), setter.as_ref());
        let is_static = getter.as_ref().or(setter.as_ref()).is_some_and(Method::is_static);
        let storage = if is_static { " static " } else { " " };
        let declaring = Type::wrap(rt, rt.property_parent(property));

        PropertyMeta {
            full_declname: format!("{visibility}{storage}{} {name}", ty.fullname()),
            fullname: format!("{}:{name}", declaring.fullname()),
            name,
            flags: rt.property_flags(property),
            ty,
            getter,
            setter,
        }
    }
}

/// The most restrictive accessor visibility; a missing accessor does not restrict.
fn accessor_visibility(getter: Option<&Method>, setter: Option<&Method>) -> Visibility {
    [getter, setter]
        .into_iter()
        .flatten()
        .map(Method::visibility)
        .fold(Visibility::Public, Visibility::most_restrictive)
}

/// A handle to one property of a managed type.
#[derive(Clone)]
pub struct Property {
    property: PropertyPtr,
    owner: Type,
    meta: Arc<PropertyMeta>,
}

impl Property {
    /// Looks up a property of `owner` or one of its base types.
    ///
    /// # Errors
    /// Returns [`crate::Error::MemberNotFound`] if the property does not exist, and
    /// [`crate::Error::InvalidHandle`] for an invalid owner.
    pub fn new(owner: &Type, name: &str) -> Result<Self> {
        let (rt, class) = owner.handle()?;
        let mut current = Some(class);
        while let Some(candidate) = current {
            if let Some(property) = rt.class_property_from_name(candidate, name) {
                return Ok(Property::wrap(rt, property, owner));
            }
            current = rt.class_parent(candidate);
        }
        Err(member_not_found!("property", name, owner.name()))
    }

    pub(crate) fn wrap(rt: &dyn Runtime, property: PropertyPtr, owner: &Type) -> Self {
        Property {
            meta: PROPERTY_CACHE
                .get_or_compute(property.addr(), || PropertyMeta::compute(rt, property)),
            property,
            owner: owner.clone(),
        }
    }

    /// The raw property handle.
    #[must_use]
    pub fn as_ptr(&self) -> PropertyPtr {
        self.property
    }

    /// Type the property was looked up on.
    #[must_use]
    pub fn owner(&self) -> &Type {
        &self.owner
    }

    /// Property name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// `Namespace.Class:Property`.
    #[must_use]
    pub fn fullname(&self) -> &str {
        &self.meta.fullname
    }

    /// Declaration as written in C#, e.g. `public System.String Name`.
    #[must_use]
    pub fn full_declname(&self) -> &str {
        &self.meta.full_declname
    }

    /// Value type of the property, the return type of its getter.
    #[must_use]
    pub fn property_type(&self) -> &Type {
        &self.meta.ty
    }

    /// The getter accessor.
    #[must_use]
    pub fn get_method(&self) -> Option<&Method> {
        self.meta.getter.as_ref()
    }

    /// The setter accessor.
    #[must_use]
    pub fn set_method(&self) -> Option<&Method> {
        self.meta.setter.as_ref()
    }

    /// The most restrictive visibility of the accessors.
    #[must_use]
    pub fn visibility(&self) -> Visibility {
        accessor_visibility(self.get_method(), self.set_method())
    }

    /// Whether the accessors are static.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.get_method()
            .or(self.set_method())
            .is_some_and(Method::is_static)
    }

    /// Whether the property has no setter.
    #[must_use]
    pub fn is_readonly(&self) -> bool {
        self.meta.setter.is_none()
    }

    /// Whether the getter takes index parameters.
    #[must_use]
    pub fn is_indexed(&self) -> bool {
        self.get_method()
            .is_some_and(|getter| !getter.param_types().is_empty())
    }

    /// Raw `PropertyAttributes` word.
    #[must_use]
    pub fn flags(&self) -> u32 {
        self.meta.flags
    }

    /// Whether the property name is special.
    #[must_use]
    pub fn is_special_name(&self) -> bool {
        self.meta.flags & PropertyAttributes::SPECIAL_NAME != 0
    }

    /// Whether the property has a default value.
    #[must_use]
    pub fn has_default(&self) -> bool {
        self.meta.flags & PropertyAttributes::HAS_DEFAULT != 0
    }

    /// Custom attribute instances applied to the property.
    ///
    /// # Errors
    /// Returns [`crate::Error::RuntimeNotInitialized`] if no runtime is installed.
    pub fn attributes(&self) -> Result<Vec<Object>> {
        let rt = crate::runtime::get()?;
        Ok(rt
            .property_custom_attrs(self.property)
            .into_iter()
            .map(|attribute| Object::wrap(rt, attribute))
            .collect())
    }

    /// Whether an attribute with the given full name is applied to the property.
    ///
    /// # Errors
    /// Returns [`crate::Error::RuntimeNotInitialized`] if no runtime is installed.
    pub fn has_attribute(&self, full_name: &str) -> Result<bool> {
        Ok(self
            .attributes()?
            .iter()
            .any(|attribute| attribute.get_type().fullname() == full_name))
    }
}

impl PartialEq for Property {
    fn eq(&self, other: &Self) -> bool {
        self.property == other.property
    }
}

impl Eq for Property {}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Property({})", self.fullname())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::game_type;

    #[test]
    fn test_auto_property() {
        let player = game_type("Game", "Player");
        let name = player.property("Name").unwrap();
        assert_eq!(name.fullname(), "Game.Player:Name");
        assert_eq!(name.property_type().fullname(), "System.String");
        assert_eq!(name.full_declname(), "public System.String Name");
        assert!(!name.is_readonly() && !name.is_static() && !name.is_indexed());
        assert_eq!(name.get_method().unwrap().name(), "get_Name");
        assert_eq!(name.set_method().unwrap().name(), "set_Name");
    }

    #[test]
    fn test_restricted_setter_visibility() {
        let player = game_type("Game", "Player");
        let level = player.property("Level").unwrap();
        assert_eq!(level.visibility(), Visibility::Private);
        assert_eq!(level.get_method().unwrap().visibility(), Visibility::Public);
    }

    #[test]
    fn test_readonly_static_property() {
        let player = game_type("Game", "Player");
        let total = player.property("Total").unwrap();
        assert!(total.is_readonly());
        assert!(total.is_static());
        assert_eq!(total.full_declname(), "public static System.Int32 Total");
    }

    #[test]
    fn test_inherited_property() {
        let enemy = game_type("Game", "Enemy");
        let alive = enemy.property("IsAlive").unwrap();
        assert_eq!(alive.fullname(), "Game.Actor:IsAlive");
        assert_eq!(alive.owner(), &enemy);
        assert!(enemy.property("Missing").is_err());
    }
}
