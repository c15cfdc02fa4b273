use std::{ffi::c_void, fmt, marker::PhantomData};

use crate::{
    domain::Domain,
    marshal::{to_mono_arg, ManagedValue, MonoConverter},
    members::Field,
    object::Object,
    runtime::{self, ObjectPtr, Runtime},
    types::Type,
    Error, Result,
};

/// A field bound to the native value type `T`.
///
/// Reads and writes go straight to field storage, without a managed call. Values of
/// value-typed fields are read as boxed objects before conversion, so `T` may be
/// [`Object`] for any field.
pub struct FieldInvoker<T> {
    field: Field,
    _value: PhantomData<fn() -> T>,
}

impl<T: MonoConverter> FieldInvoker<T> {
    /// Binds an already resolved field.
    ///
    /// # Errors
    /// Returns [`Error::SignatureMismatch`] if `check_signature` is set and `T` is not
    /// compatible with the declared field type.
    pub fn from_field(field: Field, check_signature: bool) -> Result<Self> {
        if check_signature && !T::is_compatible(field.field_type()) {
            return Err(Error::SignatureMismatch(format!(
                "{} is {}, native type is {}",
                field.fullname(),
                field.field_type().fullname(),
                T::managed_type_name().as_deref().unwrap_or("unknown")
            )));
        }
        Ok(FieldInvoker {
            field,
            _value: PhantomData,
        })
    }

    /// The bound field.
    #[must_use]
    pub fn field(&self) -> &Field {
        &self.field
    }

    /// Reads a static field.
    ///
    /// # Errors
    /// Returns [`Error::NotSupported`] for instance fields and a conversion error if the
    /// value can not be converted to `T`.
    pub fn get(&self) -> Result<T> {
        self.require_static()?;
        let rt = runtime::get()?;
        let domain = Domain::current()?;
        let ty = self.field.field_type();
        let (_, class) = ty.handle()?;

        if ty.is_valuetype() {
            let mut buffer = vec![0u8; ty.size()];
            // SAFETY: the buffer holds the value size of the field type.
            let boxed = unsafe {
                rt.field_static_get_value(domain.as_ptr(), self.field.as_ptr(), buffer.as_mut_ptr().cast());
                rt.value_box(domain.as_ptr(), class, buffer.as_ptr().cast())
            };
            return T::from_managed(ManagedValue::Object(Some(boxed)));
        }

        let mut target: *mut c_void = std::ptr::null_mut();
        // SAFETY: reference fields write one object pointer.
        unsafe {
            rt.field_static_get_value(
                domain.as_ptr(),
                self.field.as_ptr(),
                std::ptr::addr_of_mut!(target).cast(),
            );
        }
        T::from_managed(ManagedValue::Object(ObjectPtr::from_ptr(target)))
    }

    /// Reads the field of `object`, or the static field if the field is static.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] for an invalid object,
    /// [`Error::SignatureMismatch`] if the object's type does not have the field and a
    /// conversion error if the value can not be converted to `T`.
    pub fn get_on(&self, object: &Object) -> Result<T> {
        if self.field.is_static() {
            return self.get();
        }
        let (rt, target) = self.receiver(object)?;
        let domain = Domain::current()?;
        let value = rt.field_get_value_object(domain.as_ptr(), self.field.as_ptr(), target);
        T::from_managed(ManagedValue::Object(value))
    }

    /// Writes a static field.
    ///
    /// # Errors
    /// Returns [`Error::NotSupported`] for instance fields and [`Error::ArgumentMarshal`]
    /// if the value does not fit the field.
    pub fn set(&self, value: T) -> Result<()> {
        self.require_static()?;
        let rt = runtime::get()?;
        let domain = Domain::current()?;
        let mut value = value.to_managed()?;
        let slot = self.slot(&mut value)?;
        // SAFETY: the slot follows the field-write conventions and outlives the call.
        unsafe { rt.field_static_set_value(domain.as_ptr(), self.field.as_ptr(), slot) };
        Ok(())
    }

    /// Writes the field of `object`, or the static field if the field is static.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] for an invalid object,
    /// [`Error::SignatureMismatch`] if the object's type does not have the field and
    /// [`Error::ArgumentMarshal`] if the value does not fit the field.
    pub fn set_on(&self, object: &Object, value: T) -> Result<()> {
        if self.field.is_static() {
            return self.set(value);
        }
        let (rt, target) = self.receiver(object)?;
        let mut value = value.to_managed()?;
        let slot = self.slot(&mut value)?;
        // SAFETY: the slot follows the field-write conventions and outlives the call.
        unsafe { rt.field_set_value(target, self.field.as_ptr(), slot) };
        Ok(())
    }

    fn receiver(&self, object: &Object) -> Result<(&'static dyn Runtime, ObjectPtr)> {
        let handle = object.handle()?;
        let declaring = self.field.declaring_type();
        if !object.get_type().is_derived_from(declaring) {
            return Err(Error::SignatureMismatch(format!(
                "{} is not a member of {}",
                self.field.fullname(),
                object.get_type().fullname()
            )));
        }
        Ok(handle)
    }

    fn slot(&self, value: &mut ManagedValue) -> Result<*mut c_void> {
        let declared = self.field.field_type();
        to_mono_arg(value, declared).ok_or_else(|| Error::ArgumentMarshal {
            index: 0,
            expected: declared.fullname().to_string(),
        })
    }

    fn require_static(&self) -> Result<()> {
        if self.field.is_static() {
            return Ok(());
        }
        Err(Error::NotSupported(format!(
            "{} is an instance field",
            self.field.fullname()
        )))
    }
}

impl<T> Clone for FieldInvoker<T> {
    fn clone(&self) -> Self {
        FieldInvoker {
            field: self.field.clone(),
            _value: PhantomData,
        }
    }
}

impl<T> fmt::Debug for FieldInvoker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldInvoker({})", self.field.fullname())
    }
}

/// Resolves a field of `owner` by name and binds it to `T`.
///
/// # Errors
/// Returns [`Error::MemberNotFound`] if the field does not exist and
/// [`Error::SignatureMismatch`] if `T` is not compatible with its type.
pub fn make_field_invoker<T: MonoConverter>(
    owner: &impl AsRef<Type>,
    name: &str,
) -> Result<FieldInvoker<T>> {
    FieldInvoker::from_field(Field::new(owner.as_ref(), name)?, true)
}

fn soften<T>(member: &str, outcome: Result<T>) -> Option<T> {
    outcome
        .map_err(|error| tracing::debug!(member, %error, "optional member access failed"))
        .ok()
}

/// Reads an instance field, `None` on any failure.
#[must_use]
pub fn get_field_value<T: MonoConverter>(object: &Object, name: &str) -> Option<T> {
    soften(
        name,
        make_field_invoker::<T>(object, name).and_then(|field| field.get_on(object)),
    )
}

/// Writes an instance field, `false` on any failure.
pub fn set_field_value<T: MonoConverter>(object: &Object, name: &str, value: T) -> bool {
    soften(
        name,
        make_field_invoker::<T>(object, name).and_then(|field| field.set_on(object, value)),
    )
    .is_some()
}

/// Reads a static field, `None` on any failure.
#[must_use]
pub fn get_static_field_value<T: MonoConverter>(ty: &Type, name: &str) -> Option<T> {
    soften(
        name,
        make_field_invoker::<T>(ty, name).and_then(|field| field.get()),
    )
}

/// Writes a static field, `false` on any failure.
pub fn set_static_field_value<T: MonoConverter>(ty: &Type, name: &str, value: T) -> bool {
    soften(
        name,
        make_field_invoker::<T>(ty, name).and_then(|field| field.set(value)),
    )
    .is_some()
}
