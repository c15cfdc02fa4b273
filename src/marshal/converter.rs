use std::collections::VecDeque;

use crate::{
    containers::{Array, List},
    domain::Domain,
    marshal::Blittable,
    object::{MonoString, Object},
    runtime::ObjectPtr,
    types::Type,
    Error, Result,
};

/// Full name of the generic list definition, without generic arguments.
const LIST_NAME: &str = "System.Collections.Generic.List";

/// A value in its managed representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagedValue {
    /// Unboxed value-type bytes
    Value(Vec<u8>),
    /// A managed reference, `None` for null
    Object(Option<ObjectPtr>),
}

impl ManagedValue {
    /// The managed reference, `None` for null references and plain values.
    #[must_use]
    pub fn as_object(&self) -> Option<ObjectPtr> {
        match self {
            ManagedValue::Object(object) => *object,
            ManagedValue::Value(_) => None,
        }
    }
}

/// Conversion between a native type and its managed representation.
///
/// Implementations exist for every [`Blittable`] type, for [`Object`], [`Type`],
/// [`String`], [`MonoString`], `Vec<T>` and [`Array`] (managed arrays), `VecDeque<T>`
/// and [`List`] (managed generic lists), `()` for discarded results, and
/// [`ManagedValue`] for values that are already converted.
///
/// The type-level queries drive signature checking: an invoker whose native signature
/// names a type that is not [`MonoConverter::is_compatible`] with the declared managed
/// type is rejected before any call is attempted.
pub trait MonoConverter: Sized {
    /// Full name of the managed counterpart, if it is known statically.
    fn managed_type_name() -> Option<String>;

    /// Whether a managed value of type `ty` can be converted to and from `Self`.
    fn is_compatible(ty: &Type) -> bool;

    /// Whether a managed return value of type `ty` can be converted to `Self`.
    fn accepts_return(ty: &Type) -> bool {
        Self::is_compatible(ty)
    }

    /// Size of the native value when it is stored as raw bytes.
    fn value_size() -> Option<usize> {
        None
    }

    /// Converts the value into its managed representation.
    ///
    /// # Errors
    /// Returns an error if a managed object can not be created for the value.
    fn to_managed(&self) -> Result<ManagedValue>;

    /// Converts a managed representation back to the native type.
    ///
    /// # Errors
    /// Returns an error if the managed value does not hold a `Self`.
    fn from_managed(value: ManagedValue) -> Result<Self>;
}

impl<T: Blittable> MonoConverter for T {
    fn managed_type_name() -> Option<String> {
        T::MANAGED_NAME.map(str::to_string)
    }

    fn is_compatible(ty: &Type) -> bool {
        match T::MANAGED_NAME {
            Some(name) => {
                ty.fullname() == name || (ty.is_enum() && ty.enum_base_type().fullname() == name)
            }
            None => ty.is_valuetype() && ty.check_layout::<T>().is_ok(),
        }
    }

    fn value_size() -> Option<usize> {
        Some(std::mem::size_of::<T>())
    }

    fn to_managed(&self) -> Result<ManagedValue> {
        Ok(ManagedValue::Value(self.to_bytes()))
    }

    fn from_managed(value: ManagedValue) -> Result<Self> {
        match value {
            ManagedValue::Value(bytes) => T::from_bytes(&bytes).ok_or_else(|| {
                Error::Error(format!(
                    "Expected {} bytes for a native value, got {}",
                    std::mem::size_of::<T>(),
                    bytes.len()
                ))
            }),
            ManagedValue::Object(Some(object)) => Object::from_ptr(object)?.unbox_value::<T>(),
            ManagedValue::Object(None) => Err(Error::InvalidHandle("object")),
        }
    }
}

/// A value that is already in its managed representation passes through unchanged.
impl MonoConverter for ManagedValue {
    fn managed_type_name() -> Option<String> {
        None
    }

    fn is_compatible(_ty: &Type) -> bool {
        true
    }

    fn to_managed(&self) -> Result<ManagedValue> {
        Ok(self.clone())
    }

    fn from_managed(value: ManagedValue) -> Result<Self> {
        Ok(value)
    }
}

impl MonoConverter for Object {
    fn managed_type_name() -> Option<String> {
        None
    }

    fn is_compatible(_ty: &Type) -> bool {
        true
    }

    fn to_managed(&self) -> Result<ManagedValue> {
        Ok(ManagedValue::Object(self.as_ptr()))
    }

    fn from_managed(value: ManagedValue) -> Result<Self> {
        match value {
            ManagedValue::Object(Some(object)) => Object::from_ptr(object),
            ManagedValue::Object(None) => Ok(Object::invalid()),
            ManagedValue::Value(_) => Err(Error::NotSupported(
                "an unboxed value can not be viewed as an object".to_string(),
            )),
        }
    }
}

impl MonoConverter for Type {
    fn managed_type_name() -> Option<String> {
        Some("System.Type".to_string())
    }

    fn is_compatible(ty: &Type) -> bool {
        ty.fullname() == "System.Type"
    }

    fn to_managed(&self) -> Result<ManagedValue> {
        if !self.valid() {
            return Ok(ManagedValue::Object(None));
        }
        let reflection = self.reflection_object(&Domain::current()?)?;
        Ok(ManagedValue::Object(reflection.as_ptr()))
    }

    fn from_managed(value: ManagedValue) -> Result<Self> {
        match Object::from_managed(value)? {
            object if object.valid() => Type::from_reflection_object(&object),
            _ => Ok(Type::invalid()),
        }
    }
}

impl MonoConverter for MonoString {
    fn managed_type_name() -> Option<String> {
        Some("System.String".to_string())
    }

    fn is_compatible(ty: &Type) -> bool {
        ty.is_string()
    }

    fn to_managed(&self) -> Result<ManagedValue> {
        Ok(ManagedValue::Object(self.as_ptr()))
    }

    fn from_managed(value: ManagedValue) -> Result<Self> {
        MonoString::from_object(Object::from_managed(value)?)
    }
}

impl MonoConverter for String {
    fn managed_type_name() -> Option<String> {
        MonoString::managed_type_name()
    }

    fn is_compatible(ty: &Type) -> bool {
        ty.is_string()
    }

    // Strings are always created in the current domain.
    fn to_managed(&self) -> Result<ManagedValue> {
        MonoString::new(&Domain::current()?, self)?.to_managed()
    }

    fn from_managed(value: ManagedValue) -> Result<Self> {
        let object = Object::from_managed(value)?;
        if !object.valid() {
            return Ok(String::new());
        }
        Ok(MonoString::from_object(object)?.as_utf8())
    }
}

impl<T: MonoConverter> MonoConverter for Array<T> {
    fn managed_type_name() -> Option<String> {
        T::managed_type_name().map(|element| format!("{element}[]"))
    }

    fn is_compatible(ty: &Type) -> bool {
        ty.is_array() && T::is_compatible(&ty.element_type())
    }

    fn to_managed(&self) -> Result<ManagedValue> {
        Ok(ManagedValue::Object(self.as_ptr()))
    }

    fn from_managed(value: ManagedValue) -> Result<Self> {
        Array::from_object(Object::from_managed(value)?)
    }
}

impl<T: MonoConverter> MonoConverter for Vec<T> {
    fn managed_type_name() -> Option<String> {
        Array::<T>::managed_type_name()
    }

    fn is_compatible(ty: &Type) -> bool {
        Array::<T>::is_compatible(ty)
    }

    fn to_managed(&self) -> Result<ManagedValue> {
        Array::new(&Domain::current()?, self)?.to_managed()
    }

    fn from_managed(value: ManagedValue) -> Result<Self> {
        let object = Object::from_managed(value)?;
        if !object.valid() {
            return Ok(Vec::new());
        }
        Array::<T>::from_object(object)?.to_vec()
    }
}

impl<T: MonoConverter> MonoConverter for List<T> {
    fn managed_type_name() -> Option<String> {
        T::managed_type_name().map(|element| format!("{LIST_NAME}<{element}>"))
    }

    fn is_compatible(ty: &Type) -> bool {
        ty.is_list() && T::is_compatible(&ty.element_type())
    }

    fn to_managed(&self) -> Result<ManagedValue> {
        Ok(ManagedValue::Object(self.as_ptr()))
    }

    fn from_managed(value: ManagedValue) -> Result<Self> {
        List::from_object(Object::from_managed(value)?)
    }
}

impl<T: MonoConverter> MonoConverter for VecDeque<T> {
    fn managed_type_name() -> Option<String> {
        List::<T>::managed_type_name()
    }

    fn is_compatible(ty: &Type) -> bool {
        List::<T>::is_compatible(ty)
    }

    fn to_managed(&self) -> Result<ManagedValue> {
        List::new(&Domain::current()?, self.iter())?.to_managed()
    }

    fn from_managed(value: ManagedValue) -> Result<Self> {
        let object = Object::from_managed(value)?;
        if !object.valid() {
            return Ok(VecDeque::new());
        }
        List::<T>::from_object(object)?.to_deque()
    }
}

/// The discarded result of a procedure, or of a function whose result is not needed.
impl MonoConverter for () {
    fn managed_type_name() -> Option<String> {
        Some("System.Void".to_string())
    }

    fn is_compatible(ty: &Type) -> bool {
        ty.fullname() == "System.Void"
    }

    fn accepts_return(_ty: &Type) -> bool {
        true
    }

    fn to_managed(&self) -> Result<ManagedValue> {
        Err(Error::NotSupported("System.Void has no value".to_string()))
    }

    fn from_managed(_value: ManagedValue) -> Result<Self> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{domain, fixture, game_type};

    #[test]
    fn test_primitive_compatibility() {
        let corlib = fixture().corlib();
        let int32 = corlib.get_type("System", "Int32");
        let single = corlib.get_type("System", "Single");
        assert!(i32::is_compatible(&int32));
        assert!(!i32::is_compatible(&single));
        assert!(!u32::is_compatible(&int32));
        assert!(f32::is_compatible(&single));
        assert_eq!(bool::managed_type_name().as_deref(), Some("System.Boolean"));
    }

    #[test]
    fn test_enum_accepts_underlying_type() {
        let color = game_type("Game", "Color");
        assert!(u8::is_compatible(&color));
        assert!(!i32::is_compatible(&color));
    }

    #[test]
    fn test_value_round_trip() {
        let value = (-12345i32).to_managed().unwrap();
        assert_eq!(value, ManagedValue::Value((-12345i32).to_ne_bytes().to_vec()));
        assert_eq!(i32::from_managed(value).unwrap(), -12345);
        assert!(i32::from_managed(ManagedValue::Object(None)).is_err());
        assert!(i64::from_managed(ManagedValue::Value(vec![1, 2])).is_err());
    }

    #[test]
    fn test_boxed_value_is_unboxed() {
        let domain = domain();
        let int32 = fixture().corlib().get_type("System", "Int32");
        let boxed = Object::box_value(&domain, &int32, 77i32).unwrap();
        assert_eq!(i32::from_managed(boxed.to_managed().unwrap()).unwrap(), 77);
        assert!(matches!(
            i64::from_managed(boxed.to_managed().unwrap()),
            Err(Error::TypeLayoutMismatch { .. })
        ));
    }

    #[test]
    fn test_string_conversion() {
        fixture();
        let value = "héllo wörld".to_string().to_managed().unwrap();
        assert!(value.as_object().is_some());
        assert_eq!(String::from_managed(value).unwrap(), "héllo wörld");
        assert_eq!(String::from_managed(ManagedValue::Object(None)).unwrap(), "");
    }

    #[test]
    fn test_type_conversion() {
        let player = game_type("Game", "Player");
        let value = player.to_managed().unwrap();
        assert_eq!(Type::from_managed(value).unwrap(), player);
        assert!(!Type::from_managed(ManagedValue::Object(None)).unwrap().valid());
    }

    #[test]
    fn test_container_names() {
        assert_eq!(Vec::<i32>::managed_type_name().as_deref(), Some("System.Int32[]"));
        assert_eq!(
            VecDeque::<String>::managed_type_name().as_deref(),
            Some("System.Collections.Generic.List<System.String>")
        );
        assert_eq!(Vec::<Object>::managed_type_name(), None);
    }

    #[test]
    fn test_unit_accepts_any_return() {
        let int32 = fixture().corlib().get_type("System", "Int32");
        assert!(<()>::accepts_return(&int32));
        assert!(!<()>::is_compatible(&int32));
        assert!(<()>::from_managed(ManagedValue::Object(None)).is_ok());
    }
}
