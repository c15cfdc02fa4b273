use std::{collections::VecDeque, fmt, marker::PhantomData};

use crate::{
    containers::element_type_of,
    domain::Domain,
    invoke::{ArgList, MethodInvoker},
    marshal::{ManagedValue, MonoConverter},
    members::Method,
    object::Object,
    runtime::ObjectPtr,
    types::Type,
    Error, Result,
};

const LIST_NAMESPACE: &str = "System.Collections.Generic";
const LIST_DEFINITION: &str = "List`1";

/// A typed view over a managed `System.Collections.Generic.List<T>`.
///
/// Every operation calls the list's own managed method; element access never touches
/// list storage directly.
///
/// ```rust,ignore
/// let names = List::new(&domain, &["a".to_string(), "b".to_string()])?;
/// names.add("c".to_string())?;
/// assert_eq!(names.len()?, 3);
/// ```
pub struct List<T> {
    object: Object,
    element: Type,
    _element: PhantomData<fn() -> T>,
}

impl<T: MonoConverter> List<T> {
    /// Closes the generic list definition over `element`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] for an invalid element type and
    /// [`Error::NotSupported`] if the runtime has no generic list or can not inflate it.
    pub fn list_type(element: &Type) -> Result<Type> {
        let (rt, class) = element.handle()?;
        let open = rt
            .class_from_name(rt.corlib(), LIST_NAMESPACE, LIST_DEFINITION)
            .ok_or_else(|| Error::NotSupported(format!("No {LIST_NAMESPACE}.{LIST_DEFINITION}")))?;
        let closed = rt.class_inflate_generic(open, &[class]).ok_or_else(|| {
            Error::NotSupported(format!("Can not close {LIST_DEFINITION} over {element}"))
        })?;
        Ok(Type::wrap(rt, closed))
    }

    /// Creates a list in `domain` holding the given values.
    ///
    /// # Errors
    /// Returns [`Error::NotSupported`] if `T` has no managed counterpart,
    /// [`Error::ManagedException`] if the list constructor or `Add` throws.
    pub fn new<'a>(domain: &Domain, values: impl IntoIterator<Item = &'a T>) -> Result<Self>
    where
        T: 'a,
    {
        let element = element_type_of::<T>(domain)?;
        if !element.valid() {
            return Err(Error::NotSupported(format!(
                "No managed element type for {}",
                std::any::type_name::<T>()
            )));
        }

        let list = List {
            object: Self::list_type(&element)?.new_instance(domain)?,
            element,
            _element: PhantomData,
        };
        for value in values {
            list.add_managed(value.to_managed()?)?;
        }
        tracing::trace!(list = %list.object.get_type(), "created managed list");
        Ok(list)
    }

    /// Views a managed list as a list of `T`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] for the invalid object, [`Error::Error`] if the
    /// object is not a generic list and [`Error::SignatureMismatch`] if `T` is not
    /// compatible with the element type.
    pub fn from_object(object: Object) -> Result<Self> {
        if !object.valid() {
            return Err(Error::InvalidHandle("list"));
        }
        let ty = object.get_type();
        if !ty.is_list() {
            return Err(Error::Error(format!("{} is not a generic list", ty.fullname())));
        }
        let element = ty.element_type();
        if !T::is_compatible(&element) {
            return Err(Error::SignatureMismatch(format!(
                "{} viewed as a list of {}",
                ty.fullname(),
                std::any::type_name::<T>()
            )));
        }

        Ok(List {
            object,
            element,
            _element: PhantomData,
        })
    }

    /// Managed element type.
    #[must_use]
    pub fn element_type(&self) -> &Type {
        &self.element
    }

    /// The list as an object.
    #[must_use]
    pub fn as_object(&self) -> &Object {
        &self.object
    }

    /// The raw list object.
    #[must_use]
    pub fn as_ptr(&self) -> Option<ObjectPtr> {
        self.object.as_ptr()
    }

    fn invoker<A: ArgList, R: MonoConverter>(&self, name: &str) -> Result<MethodInvoker<A, R>> {
        let method = Method::with_arity(self.object.get_type(), name, A::ARITY)?;
        MethodInvoker::from_method(method, false)
    }

    fn managed_index(index: usize) -> Result<i32> {
        i32::try_from(index).map_err(|_| Error::ArgumentMarshal {
            index: 0,
            expected: "System.Int32".to_string(),
        })
    }

    fn add_managed(&self, value: ManagedValue) -> Result<()> {
        self.invoker::<(ManagedValue,), ()>("Add")?
            .invoke_on(&self.object, (value,))
    }

    /// Appends a value.
    ///
    /// # Errors
    /// Returns [`Error::ArgumentMarshal`] if the value does not fit the element type.
    pub fn add(&self, value: T) -> Result<()> {
        self.add_managed(value.to_managed()?)
    }

    /// Reads the element at `index`.
    ///
    /// # Errors
    /// Returns [`Error::ManagedException`] with `System.ArgumentOutOfRangeException` for
    /// an index out of range.
    pub fn get(&self, index: usize) -> Result<T> {
        self.invoker::<(i32,), T>("get_Item")?
            .invoke_on(&self.object, (Self::managed_index(index)?,))
    }

    /// Writes the element at `index`.
    ///
    /// # Errors
    /// Same as [`List::get`], and [`Error::ArgumentMarshal`] if the value does not fit.
    pub fn set(&self, index: usize, value: T) -> Result<()> {
        self.invoker::<(i32, ManagedValue), ()>("set_Item")?
            .invoke_on(&self.object, (Self::managed_index(index)?, value.to_managed()?))
    }

    /// Removes the element at `index`, shifting the following elements down.
    ///
    /// # Errors
    /// Same as [`List::get`].
    pub fn remove_at(&self, index: usize) -> Result<()> {
        self.invoker::<(i32,), ()>("RemoveAt")?
            .invoke_on(&self.object, (Self::managed_index(index)?,))
    }

    /// Removes every element.
    ///
    /// # Errors
    /// Returns [`Error::ManagedException`] if `Clear` throws.
    pub fn clear(&self) -> Result<()> {
        self.invoker::<(), ()>("Clear")?.invoke_on(&self.object, ())
    }

    /// Number of elements.
    ///
    /// # Errors
    /// Returns [`Error::ManagedException`] if `Count` throws.
    pub fn len(&self) -> Result<usize> {
        let count = self
            .invoker::<(), i32>("get_Count")?
            .invoke_on(&self.object, ())?;
        usize::try_from(count).map_err(|_| Error::Error(format!("Invalid list count {count}")))
    }

    /// Whether the list has no elements.
    ///
    /// # Errors
    /// Same as [`List::len`].
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Copies every element into a vector.
    ///
    /// # Errors
    /// Returns the first call or conversion error.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        (0..self.len()?).map(|index| self.get(index)).collect()
    }

    /// Copies every element into a deque.
    ///
    /// # Errors
    /// Same as [`List::to_vec`].
    pub fn to_deque(&self) -> Result<VecDeque<T>> {
        (0..self.len()?).map(|index| self.get(index)).collect()
    }
}

impl<T> Clone for List<T> {
    fn clone(&self) -> Self {
        List {
            object: self.object.clone(),
            element: self.element.clone(),
            _element: PhantomData,
        }
    }
}

impl<T> fmt::Debug for List<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("List")
            .field("element", &self.element.fullname())
            .field("object", &self.object)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{domain, fixture, game_type};

    #[test]
    fn test_list_type() {
        let corlib = fixture().corlib();
        let int32 = corlib.get_type("System", "Int32");
        let list_type = List::<i32>::list_type(&int32).unwrap();
        assert_eq!(list_type.name(), "List<Int32>");
        assert_eq!(list_type.fullname(), "System.Collections.Generic.List<System.Int32>");
        assert!(list_type.is_list());
        assert_eq!(list_type.element_type(), int32);
        assert_eq!(List::<i32>::list_type(&int32).unwrap(), list_type);
        assert!(matches!(
            List::<i32>::list_type(&Type::invalid()),
            Err(Error::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_add_get_set() {
        let domain = domain();
        let list = List::new(&domain, &[1i32, 2, 3]).unwrap();
        assert_eq!(list.len().unwrap(), 3);
        list.add(4).unwrap();
        assert_eq!(list.len().unwrap(), 4);
        assert_eq!(list.get(3).unwrap(), 4);

        list.set(0, 10).unwrap();
        assert_eq!(list.to_vec().unwrap(), vec![10, 2, 3, 4]);
    }

    #[test]
    fn test_remove_at_shifts() {
        let domain = domain();
        let list = List::new(&domain, &["a".to_string(), "b".to_string(), "c".to_string()]).unwrap();
        let next = list.get(2).unwrap();
        list.remove_at(1).unwrap();
        assert_eq!(list.get(1).unwrap(), next);
        assert_eq!(list.len().unwrap(), 2);

        list.clear().unwrap();
        assert!(list.is_empty().unwrap());
    }

    #[test]
    fn test_out_of_range_is_managed_exception() {
        let list = List::<i32>::new(&domain(), &[]).unwrap();
        let error = list.get(0).unwrap_err();
        let info = error.managed_exception().unwrap();
        assert_eq!(info.type_name, "System.ArgumentOutOfRangeException");
        assert!(list.remove_at(0).is_err());
    }

    #[test]
    fn test_object_elements() {
        let domain = domain();
        let player_type = game_type("Game", "Player");
        let element_list = List::<Object>::list_type(&player_type).unwrap();
        let players = List::<Object>::from_object(element_list.new_instance(&domain).unwrap()).unwrap();
        assert_eq!(players.element_type(), &player_type);

        let player = player_type.new_instance(&domain).unwrap();
        players.add(player.clone()).unwrap();
        players.add(Object::invalid()).unwrap();
        assert_eq!(players.get(0).unwrap(), player);
        assert!(!players.get(1).unwrap().valid());
    }

    #[test]
    fn test_from_object_checks_element_type() {
        let domain = domain();
        let list = List::new(&domain, &[1.0f32]).unwrap();
        assert!(List::<f32>::from_object(list.as_object().clone()).is_ok());
        assert!(matches!(
            List::<i32>::from_object(list.as_object().clone()),
            Err(Error::SignatureMismatch(_))
        ));
        let player = game_type("Game", "Player").new_instance(&domain).unwrap();
        assert!(List::<i32>::from_object(player).is_err());
    }

    #[test]
    fn test_deque_round_trip() {
        fixture();
        let values = VecDeque::from(vec![3u8, 1, 2]);
        let managed = values.to_managed().unwrap();
        assert_eq!(VecDeque::<u8>::from_managed(managed).unwrap(), values);
    }
}
