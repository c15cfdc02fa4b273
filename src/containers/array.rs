use std::{fmt, marker::PhantomData};

use crate::{
    containers::element_type_of,
    domain::Domain,
    marshal::{to_mono_arg, ManagedValue, MonoConverter},
    object::Object,
    runtime::{ObjectPtr, Runtime},
    types::Type,
    Error, Result,
};

const RAW_ELEMENT: &str = "System.Byte";

/// A typed view over a managed one-dimensional array.
///
/// Value-type elements are copied in and out of the element storage, reference-type
/// elements are read and stored as references without boxing.
///
/// ```rust,ignore
/// let scores = Array::new(&domain, &[10i32, 20, 30])?;
/// scores.set(1, 25)?;
/// assert_eq!(scores.to_vec()?, vec![10, 25, 30]);
/// ```
pub struct Array<T> {
    object: Object,
    element: Type,
    /// Element size when `T` values are stored as raw bytes in a `System.Byte[]`.
    raw: Option<usize>,
    _element: PhantomData<fn() -> T>,
}

impl<T: MonoConverter> Array<T> {
    /// Allocates an array in `domain` holding a copy of `values`.
    ///
    /// The element type is the managed counterpart of `T`. Plain native types without a
    /// counterpart are stored as raw bytes.
    ///
    /// # Errors
    /// Returns [`Error::NotSupported`] if `T` has neither a managed counterpart nor a
    /// value representation, and any error of [`Array::set`].
    pub fn new(domain: &Domain, values: &[T]) -> Result<Self> {
        let element = element_type_of::<T>(domain)?;
        let array = if element.valid() {
            Self::with_element_type(domain, &element, values.len())?
        } else {
            let size = T::value_size().ok_or_else(|| {
                Error::NotSupported(format!(
                    "No managed element type for {}",
                    std::any::type_name::<T>()
                ))
            })?;
            Self::new_raw(domain, size, values.len())?
        };

        for (index, value) in values.iter().enumerate() {
            array.store(index, value)?;
        }
        Ok(array)
    }

    /// Allocates an array of `len` default elements of type `element`.
    ///
    /// # Errors
    /// Returns [`Error::SignatureMismatch`] if `T` is not compatible with `element` and
    /// [`Error::NotSupported`] if the runtime can not allocate the array.
    pub fn with_element_type(domain: &Domain, element: &Type, len: usize) -> Result<Self> {
        let (rt, class) = element.handle()?;
        if !T::is_compatible(element) {
            return Err(Error::SignatureMismatch(format!(
                "{} array requested for native type {}",
                element.fullname(),
                std::any::type_name::<T>()
            )));
        }
        let array = rt
            .array_new(domain.as_ptr(), class, len)
            .ok_or_else(|| Error::NotSupported(format!("Can not allocate a {element} array")))?;
        tracing::trace!(element = %element, len, "allocated managed array");

        Ok(Array {
            object: Object::wrap(rt, array),
            element: element.clone(),
            raw: None,
            _element: PhantomData,
        })
    }

    fn new_raw(domain: &Domain, size: usize, len: usize) -> Result<Self> {
        let bytes = domain.resolve_type(RAW_ELEMENT)?;
        let (rt, class) = bytes.handle()?;
        let array = rt
            .array_new(domain.as_ptr(), class, len * size)
            .ok_or_else(|| Error::NotSupported("Can not allocate a raw byte array".to_string()))?;
        tracing::debug!(
            native = std::any::type_name::<T>(),
            size,
            len,
            "no managed element type, storing raw bytes"
        );

        Ok(Array {
            object: Object::wrap(rt, array),
            element: bytes,
            raw: Some(size),
            _element: PhantomData,
        })
    }

    /// Views a managed array as an array of `T`.
    ///
    /// A `System.Byte[]` whose elements `T` is not compatible with is viewed as raw bytes
    /// when `T` has a value representation.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] for the invalid object, [`Error::Error`] if the
    /// object is not an array and [`Error::SignatureMismatch`] if `T` is not compatible
    /// with the element type.
    pub fn from_object(object: Object) -> Result<Self> {
        if !object.valid() {
            return Err(Error::InvalidHandle("array"));
        }
        let ty = object.get_type();
        if !ty.is_array() {
            return Err(Error::Error(format!("{} is not an array", ty.fullname())));
        }

        let element = ty.element_type();
        let raw = if T::is_compatible(&element) {
            None
        } else if element.fullname() == RAW_ELEMENT && T::value_size().is_some() {
            T::value_size()
        } else {
            return Err(Error::SignatureMismatch(format!(
                "{} viewed as an array of {}",
                ty.fullname(),
                std::any::type_name::<T>()
            )));
        };

        Ok(Array {
            object,
            element,
            raw,
            _element: PhantomData,
        })
    }

    fn array(&self) -> Result<(&'static dyn Runtime, ObjectPtr)> {
        self.object.handle()
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        let Ok((rt, array)) = self.array() else {
            return 0;
        };
        let len = rt.array_length(array);
        match self.raw {
            Some(size) if size > 0 => len / size,
            _ => len,
        }
    }

    /// Whether the array has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Managed element type, `System.Byte` for raw arrays.
    #[must_use]
    pub fn element_type(&self) -> &Type {
        &self.element
    }

    /// Whether `T` values are stored as raw bytes.
    #[must_use]
    pub fn is_raw(&self) -> bool {
        self.raw.is_some()
    }

    /// The array as an object.
    #[must_use]
    pub fn as_object(&self) -> &Object {
        &self.object
    }

    /// The raw array object.
    #[must_use]
    pub fn as_ptr(&self) -> Option<ObjectPtr> {
        self.object.as_ptr()
    }

    fn check_index(&self, index: usize) -> Result<()> {
        let len = self.len();
        if index >= len {
            return Err(Error::Error(format!(
                "Index {index} out of range for an array of length {len}"
            )));
        }
        Ok(())
    }

    fn address(
        rt: &dyn Runtime,
        array: ObjectPtr,
        element_size: usize,
        index: usize,
    ) -> Result<*mut u8> {
        let address = rt.array_addr(array, element_size, index).cast::<u8>();
        if address.is_null() {
            return Err(Error::InvalidHandle("array element"));
        }
        Ok(address)
    }

    fn boxed_element(&self, rt: &'static dyn Runtime, array: ObjectPtr, index: usize) -> Result<ObjectPtr> {
        let (_, class) = self.element.handle()?;
        let domain = Domain::current()?;
        let address = Self::address(rt, array, self.element.size(), index)?;
        // SAFETY: the element address holds one value of the element class.
        Ok(unsafe { rt.value_box(domain.as_ptr(), class, address.cast_const().cast()) })
    }

    fn load(&self, index: usize) -> Result<ManagedValue> {
        self.check_index(index)?;
        let (rt, array) = self.array()?;

        let (address, size) = match self.raw {
            Some(size) => (Self::address(rt, array, 1, index * size)?, size),
            None if !self.element.is_valuetype() => {
                return Ok(ManagedValue::Object(rt.array_getref(array, index)));
            }
            None if T::value_size().is_none() => {
                return Ok(ManagedValue::Object(Some(self.boxed_element(rt, array, index)?)));
            }
            None => {
                let size = self.element.size();
                (Self::address(rt, array, size, index)?, size)
            }
        };
        // SAFETY: `address` points at one in-bounds element of `size` bytes.
        let bytes = unsafe { std::slice::from_raw_parts(address.cast_const(), size) };
        Ok(ManagedValue::Value(bytes.to_vec()))
    }

    fn store(&self, index: usize, value: &T) -> Result<()> {
        self.check_index(index)?;
        let (rt, array) = self.array()?;
        let mut managed = value.to_managed()?;
        let marshal_error = || Error::ArgumentMarshal {
            index,
            expected: self.element.fullname().to_string(),
        };

        if let Some(size) = self.raw {
            let ManagedValue::Value(bytes) = managed else {
                return Err(marshal_error());
            };
            if bytes.len() != size {
                return Err(marshal_error());
            }
            let address = Self::address(rt, array, 1, index * size)?;
            // SAFETY: the byte array holds `size` bytes per element and the index is checked.
            unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), address, size) };
            return Ok(());
        }

        let slot = to_mono_arg(&mut managed, &self.element).ok_or_else(marshal_error)?;
        if self.element.is_valuetype() {
            let size = self.element.size();
            let address = Self::address(rt, array, size, index)?;
            // SAFETY: the slot points at one value of the element class, checked by
            // `to_mono_arg`, and the destination is one element of the same size.
            unsafe { std::ptr::copy_nonoverlapping(slot.cast::<u8>().cast_const(), address, size) };
        } else {
            rt.array_setref(array, index, ObjectPtr::from_ptr(slot));
        }
        Ok(())
    }

    /// Reads the element at `index`.
    ///
    /// # Errors
    /// Returns [`Error::Error`] for an index out of range and a conversion error if the
    /// element can not be converted to `T`.
    pub fn get(&self, index: usize) -> Result<T> {
        T::from_managed(self.load(index)?)
    }

    /// Writes the element at `index`.
    ///
    /// # Errors
    /// Returns [`Error::Error`] for an index out of range and [`Error::ArgumentMarshal`]
    /// if the value does not fit the element type.
    pub fn set(&self, index: usize, value: T) -> Result<()> {
        self.store(index, &value)
    }

    /// Reads the element at `index` as an object, boxing value-type elements.
    ///
    /// # Errors
    /// Returns [`Error::Error`] for an index out of range and [`Error::NotSupported`] for
    /// raw arrays.
    pub fn get_object(&self, index: usize) -> Result<Object> {
        if self.raw.is_some() {
            return Err(Error::NotSupported(
                "raw array elements have no managed type".to_string(),
            ));
        }
        self.check_index(index)?;
        let (rt, array) = self.array()?;
        if !self.element.is_valuetype() {
            return Ok(Object::wrap_opt(rt, rt.array_getref(array, index)));
        }

        Ok(Object::wrap(rt, self.boxed_element(rt, array, index)?))
    }

    /// Copies every element into a vector.
    ///
    /// # Errors
    /// Returns the first element conversion error.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        (0..self.len()).map(|index| self.get(index)).collect()
    }
}

impl<T> Clone for Array<T> {
    fn clone(&self) -> Self {
        Array {
            object: self.object.clone(),
            element: self.element.clone(),
            raw: self.raw,
            _element: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Array<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("element", &self.element.fullname())
            .field("raw", &self.raw)
            .field("object", &self.object)
            .finish()
    }
}
