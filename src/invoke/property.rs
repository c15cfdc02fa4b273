use std::{fmt, marker::PhantomData};

use crate::{
    invoke::MethodInvoker,
    marshal::MonoConverter,
    members::{Method, Property},
    object::Object,
    types::Type,
    Error, Result,
};

/// A property bound to the native value type `T`.
///
/// Every access is a call of the matching accessor method through a [`MethodInvoker`].
/// Indexed properties take the index as an extra leading argument.
pub struct PropertyInvoker<T> {
    property: Property,
    _value: PhantomData<fn() -> T>,
}

impl<T: MonoConverter> PropertyInvoker<T> {
    /// Binds an already resolved property.
    ///
    /// # Errors
    /// Returns [`Error::SignatureMismatch`] if `check_signature` is set and `T` is not
    /// compatible with the property type.
    pub fn from_property(property: Property, check_signature: bool) -> Result<Self> {
        if check_signature && !T::is_compatible(property.property_type()) {
            return Err(Error::SignatureMismatch(format!(
                "{} is {}, native type is {}",
                property.fullname(),
                property.property_type().fullname(),
                T::managed_type_name().as_deref().unwrap_or("unknown")
            )));
        }
        Ok(PropertyInvoker {
            property,
            _value: PhantomData,
        })
    }

    /// The bound property.
    #[must_use]
    pub fn property(&self) -> &Property {
        &self.property
    }

    fn getter(&self) -> Result<Method> {
        self.property.get_method().cloned().ok_or_else(|| {
            member_not_found!(
                "method",
                format!("get_{}", self.property.name()),
                self.property.owner().name()
            )
        })
    }

    fn setter(&self) -> Result<Method> {
        self.property.set_method().cloned().ok_or_else(|| {
            member_not_found!(
                "method",
                format!("set_{}", self.property.name()),
                self.property.owner().name()
            )
        })
    }

    /// Reads a static property.
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if there is no getter and
    /// [`Error::ManagedException`] if the getter throws.
    pub fn get(&self) -> Result<T> {
        MethodInvoker::<(), T>::from_method(self.getter()?, false)?.invoke(())
    }

    /// Reads the property of `object`.
    ///
    /// # Errors
    /// Same as [`PropertyInvoker::get`].
    pub fn get_on(&self, object: &Object) -> Result<T> {
        MethodInvoker::<(), T>::from_method(self.getter()?, false)?.invoke_on(object, ())
    }

    /// Writes a static property.
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if there is no setter and
    /// [`Error::ManagedException`] if the setter throws.
    pub fn set(&self, value: T) -> Result<()> {
        MethodInvoker::<(T,), ()>::from_method(self.setter()?, false)?.invoke((value,))
    }

    /// Writes the property of `object`.
    ///
    /// # Errors
    /// Same as [`PropertyInvoker::set`].
    pub fn set_on(&self, object: &Object, value: T) -> Result<()> {
        MethodInvoker::<(T,), ()>::from_method(self.setter()?, false)?
            .invoke_on(object, (value,))
    }

    /// Reads a static indexed property.
    ///
    /// # Errors
    /// Same as [`PropertyInvoker::get`].
    pub fn get_indexed<I: MonoConverter>(&self, index: I) -> Result<T> {
        MethodInvoker::<(I,), T>::from_method(self.getter()?, false)?.invoke((index,))
    }

    /// Reads an indexed property of `object`.
    ///
    /// # Errors
    /// Same as [`PropertyInvoker::get`].
    pub fn get_indexed_on<I: MonoConverter>(&self, object: &Object, index: I) -> Result<T> {
        MethodInvoker::<(I,), T>::from_method(self.getter()?, false)?
            .invoke_on(object, (index,))
    }

    /// Writes a static indexed property.
    ///
    /// # Errors
    /// Same as [`PropertyInvoker::set`].
    pub fn set_indexed<I: MonoConverter>(&self, index: I, value: T) -> Result<()> {
        MethodInvoker::<(I, T), ()>::from_method(self.setter()?, false)?.invoke((index, value))
    }

    /// Writes an indexed property of `object`.
    ///
    /// # Errors
    /// Same as [`PropertyInvoker::set`].
    pub fn set_indexed_on<I: MonoConverter>(&self, object: &Object, index: I, value: T) -> Result<()> {
        MethodInvoker::<(I, T), ()>::from_method(self.setter()?, false)?
            .invoke_on(object, (index, value))
    }
}

impl<T> Clone for PropertyInvoker<T> {
    fn clone(&self) -> Self {
        PropertyInvoker {
            property: self.property.clone(),
            _value: PhantomData,
        }
    }
}

impl<T> fmt::Debug for PropertyInvoker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyInvoker({})", self.property.fullname())
    }
}

/// Resolves a property of `owner` by name and binds it to `T`.
///
/// # Errors
/// Returns [`Error::MemberNotFound`] if the property does not exist and
/// [`Error::SignatureMismatch`] if `T` is not compatible with its type.
pub fn make_property_invoker<T: MonoConverter>(
    owner: &impl AsRef<Type>,
    name: &str,
) -> Result<PropertyInvoker<T>> {
    PropertyInvoker::from_property(Property::new(owner.as_ref(), name)?, true)
}

/// Reads an instance property, `None` on any failure.
#[must_use]
pub fn get_property_value<T: MonoConverter>(object: &Object, name: &str) -> Option<T> {
    make_property_invoker::<T>(object, name)
        .and_then(|property| property.get_on(object))
        .map_err(|error| tracing::debug!(property = name, %error, "optional property read failed"))
        .ok()
}

/// Writes an instance property, `false` on any failure.
pub fn set_property_value<T: MonoConverter>(object: &Object, name: &str, value: T) -> bool {
    make_property_invoker::<T>(object, name)
        .and_then(|property| property.set_on(object, value))
        .map_err(|error| tracing::debug!(property = name, %error, "optional property write failed"))
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{domain, fixture, game_type};

    #[test]
    fn test_auto_property() {
        let player = game_type("Game", "Player").new_instance(&domain()).unwrap();
        let name = make_property_invoker::<String>(&player, "Name").unwrap();
        assert_eq!(name.get_on(&player).unwrap(), "");
        name.set_on(&player, "Mira".to_string()).unwrap();
        assert_eq!(name.get_on(&player).unwrap(), "Mira");
    }

    #[test]
    fn test_static_readonly_property() {
        let player_type = game_type("Game", "Player");
        let total = make_property_invoker::<i32>(&player_type, "Total").unwrap();
        let before = total.get().unwrap();
        player_type.new_instance(&domain()).unwrap();
        assert!(total.get().unwrap() > before);

        let error = total.set(0).unwrap_err();
        assert!(matches!(error, Error::MemberNotFound { kind: "method", ref name, .. } if name == "set_Total"));
    }

    #[test]
    fn test_inherited_property_on_derived_instance() {
        let enemy = game_type("Game", "Enemy").new_instance(&domain()).unwrap();
        assert_eq!(get_property_value::<bool>(&enemy, "IsAlive"), Some(true));
        assert_eq!(get_property_value::<bool>(&enemy, "Missing"), None);
        assert!(!set_property_value(&enemy, "IsAlive", false));
    }

    #[test]
    fn test_indexed_list_item() {
        let int32 = fixture().corlib().get_type("System", "Int32");
        let list_type = crate::containers::List::<i32>::list_type(&int32).unwrap();
        let list = crate::containers::List::<i32>::new(&domain(), &[4, 5, 6]).unwrap();

        let item = make_property_invoker::<i32>(&list_type, "Item").unwrap();
        assert!(item.property().is_indexed());
        assert_eq!(item.get_indexed_on(list.as_object(), 1i32).unwrap(), 5);
        item.set_indexed_on(list.as_object(), 1i32, 50).unwrap();
        assert_eq!(item.get_indexed_on(list.as_object(), 1i32).unwrap(), 50);

        let error = item.get_indexed_on(list.as_object(), 9i32).unwrap_err();
        assert_eq!(
            error.managed_exception().unwrap().type_name,
            "System.ArgumentOutOfRangeException"
        );
    }

    #[test]
    fn test_property_signature_checked() {
        let player_type = game_type("Game", "Player");
        assert!(matches!(
            make_property_invoker::<i32>(&player_type, "Name"),
            Err(Error::SignatureMismatch(_))
        ));
    }
}
