//! Managed object and string handles.
//!
//! An [`Object`] is a non-owning reference to a managed instance: the collector owns the
//! instance, the handle only carries its identity and its runtime [`Type`]. Use a
//! [`crate::GcHandle`] to keep an instance alive across calls that may collect.

mod string;

pub use string::MonoString;

use std::{ffi::c_void, fmt};

use crate::{
    domain::Domain,
    exception::managed_error,
    marshal::Blittable,
    runtime::{self, ObjectPtr, Runtime},
    types::Type,
    Error, Result,
};

/// A handle to one managed object.
///
/// Equality follows object identity. The invalid object stands for a null reference.
#[derive(Clone, Default)]
pub struct Object {
    object: Option<ObjectPtr>,
    ty: Type,
}

impl Object {
    /// The invalid object, a null reference.
    #[must_use]
    pub fn invalid() -> Self {
        Object::default()
    }

    /// Wraps a raw object of the installed runtime.
    ///
    /// # Errors
    /// Returns [`Error::RuntimeNotInitialized`] if no runtime is installed.
    pub fn from_ptr(object: ObjectPtr) -> Result<Self> {
        Ok(Object::wrap(runtime::get()?, object))
    }

    pub(crate) fn wrap(rt: &dyn Runtime, object: ObjectPtr) -> Self {
        Object {
            object: Some(object),
            ty: Type::wrap(rt, rt.object_get_class(object)),
        }
    }

    pub(crate) fn wrap_opt(rt: &dyn Runtime, object: Option<ObjectPtr>) -> Self {
        object.map_or_else(Object::invalid, |object| Object::wrap(rt, object))
    }

    pub(crate) fn handle(&self) -> Result<(&'static dyn Runtime, ObjectPtr)> {
        let object = self.object.ok_or(Error::InvalidHandle("object"))?;
        Ok((runtime::get()?, object))
    }

    /// Creates an instance of `ty` in `domain`.
    ///
    /// Value types are boxed zero-initialized. Reference types are allocated and their
    /// parameterless constructor, if any, is run.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] for an invalid type, [`Error::NotSupported`] for
    /// types that have no instances (open generics, `System.Void`, arrays) and
    /// [`Error::ManagedException`] if the constructor throws.
    pub fn new_instance(domain: &Domain, ty: &Type) -> Result<Self> {
        let (rt, class) = ty.handle()?;
        if ty.is_valuetype() {
            let zeroed = vec![0u8; ty.size()];
            // SAFETY: the buffer holds the value size of the class.
            let object = unsafe { rt.value_box(domain.as_ptr(), class, zeroed.as_ptr().cast()) };
            return Ok(Object::wrap(rt, object));
        }

        let object = rt
            .object_new(domain.as_ptr(), class)
            .ok_or_else(|| Error::NotSupported(format!("Can not create an instance of {ty}")))?;
        rt.runtime_object_init(object)
            .map_err(|exception| managed_error(rt, exception))?;
        tracing::trace!(class = %ty, "created managed instance");
        Ok(Object::wrap(rt, object))
    }

    /// Boxes a plain value as an instance of the value type `ty`.
    ///
    /// # Errors
    /// Returns [`Error::TypeLayoutMismatch`] if `T` does not have the layout of `ty`, and
    /// [`Error::NotSupported`] if `ty` is not a value type.
    pub fn box_value<T: Blittable>(domain: &Domain, ty: &Type, value: T) -> Result<Self> {
        let (rt, class) = ty.handle()?;
        if !ty.is_valuetype() {
            return Err(Error::NotSupported(format!("Can not box a value as {ty}")));
        }
        ty.check_layout::<T>()?;

        let bytes = value.to_bytes();
        // SAFETY: the layout check guarantees the class value size is `bytes.len()`.
        let object = unsafe { rt.value_box(domain.as_ptr(), class, bytes.as_ptr().cast()) };
        Ok(Object::wrap(rt, object))
    }

    /// Reads the payload of a boxed value.
    ///
    /// # Errors
    /// Returns [`Error::TypeLayoutMismatch`] if `T` does not have the layout of the boxed
    /// type, and [`Error::NotSupported`] if the object is not a boxed value.
    pub fn unbox_value<T: Blittable>(&self) -> Result<T> {
        let payload = self.payload::<T>()?;
        // SAFETY: the payload holds size_of::<T>() bytes, checked by `payload`.
        let bytes = unsafe {
            std::slice::from_raw_parts(payload.cast::<u8>(), std::mem::size_of::<T>())
        };
        T::from_bytes(bytes).ok_or_else(|| {
            Error::Error(format!("Invalid {} value", self.ty.fullname()))
        })
    }

    /// Overwrites the payload of a boxed value.
    ///
    /// # Errors
    /// Same as [`Object::unbox_value`].
    pub fn set_value<T: Blittable>(&self, value: T) -> Result<()> {
        let payload = self.payload::<T>()?;
        let bytes = value.to_bytes();
        // SAFETY: the payload holds size_of::<T>() bytes, checked by `payload`.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), payload.cast::<u8>(), bytes.len());
        }
        Ok(())
    }

    fn payload<T>(&self) -> Result<*mut c_void> {
        let (rt, object) = self.handle()?;
        if !self.ty.is_valuetype() {
            return Err(Error::NotSupported(format!(
                "{} is not a boxed value",
                self.ty.fullname()
            )));
        }
        self.ty.check_layout::<T>()?;

        let payload = rt.object_unbox(object);
        if payload.is_null() {
            return Err(Error::InvalidHandle("boxed value"));
        }
        Ok(payload)
    }

    /// Calls `ToString` on the object.
    ///
    /// # Errors
    /// Returns [`Error::ManagedException`] if `ToString` throws.
    pub fn to_string_value(&self) -> Result<String> {
        let (rt, object) = self.handle()?;
        match rt.object_to_string(object) {
            Ok(string) => Ok(MonoString::from_object(Object::wrap_opt(rt, string))?.as_utf8()),
            Err(exception) => Err(managed_error(rt, exception)),
        }
    }

    /// Runtime type of the object, invalid for the invalid object.
    #[must_use]
    pub fn get_type(&self) -> &Type {
        &self.ty
    }

    /// Whether this handle refers to an object.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.object.is_some()
    }

    /// The raw object.
    #[must_use]
    pub fn as_ptr(&self) -> Option<ObjectPtr> {
        self.object
    }
}

impl AsRef<Type> for Object {
    fn as_ref(&self) -> &Type {
        &self.ty
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.object == other.object
    }
}

impl Eq for Object {}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.object {
            Some(object) => write!(f, "Object({}, {:#x})", self.ty.fullname(), object.addr()),
            None => write!(f, "Object(null)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{domain, fixture, game_type};

    #[test]
    fn test_invalid_object() {
        let object = Object::invalid();
        assert!(!object.valid());
        assert!(!object.get_type().valid());
        assert!(matches!(object.to_string_value(), Err(Error::InvalidHandle("object"))));
    }

    #[test]
    fn test_new_reference_instance_runs_constructor() {
        let domain = domain();
        let player = game_type("Game", "Player").new_instance(&domain).unwrap();
        assert_eq!(player.get_type().fullname(), "Game.Player");
        assert_eq!(player.get_type().field("count").unwrap().name(), "count");

        let level = crate::invoke::get_field_value::<i32>(&player, "count");
        assert_eq!(level, Some(1));
    }

    #[test]
    fn test_new_value_instance_is_zeroed() {
        let domain = domain();
        let int64 = fixture().corlib().get_type("System", "Int64");
        let zero = int64.new_instance(&domain).unwrap();
        assert_eq!(zero.unbox_value::<i64>().unwrap(), 0);

        zero.set_value(-9i64).unwrap();
        assert_eq!(zero.unbox_value::<i64>().unwrap(), -9);
    }

    #[test]
    fn test_box_value_checks_layout() {
        let domain = domain();
        let corlib = fixture().corlib();
        let double = corlib.get_type("System", "Double");
        assert!(matches!(
            Object::box_value(&domain, &double, 1i32),
            Err(Error::TypeLayoutMismatch { .. })
        ));
        assert!(matches!(
            Object::box_value(&domain, &corlib.get_type("System", "String"), 1i32),
            Err(Error::NotSupported(_))
        ));

        let boxed = Object::box_value(&domain, &double, 2.5f64).unwrap();
        assert_eq!(boxed.to_string_value().unwrap(), "2.5");
    }

    #[test]
    fn test_open_generic_has_no_instances() {
        let domain = domain();
        let open = fixture()
            .corlib()
            .get_type("System.Collections.Generic", "List`1");
        assert!(matches!(
            Object::new_instance(&domain, &open),
            Err(Error::NotSupported(_))
        ));
    }

    #[test]
    fn test_identity() {
        let domain = domain();
        let player = game_type("Game", "Player");
        let first = player.new_instance(&domain).unwrap();
        let second = player.new_instance(&domain).unwrap();
        assert_ne!(first, second);
        assert_eq!(first, Object::from_ptr(first.as_ptr().unwrap()).unwrap());
    }
}
