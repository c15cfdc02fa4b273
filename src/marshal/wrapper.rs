use dashmap::DashMap;

use crate::{
    domain::Domain,
    gc::{self, GcHandle},
    object::Object,
    runtime::ObjectPtr,
    types::Type,
    Error, Result,
};

struct Attached<T> {
    value: T,
    // Keeps the carrier alive while the native value is attached.
    _pin: GcHandle,
}

/// Associates native values with the managed instances that carry them.
///
/// A managed wrapper class has no fields for native state. Instead, each native value is
/// attached to a freshly created instance of the class, and the instance is pinned until
/// the value is detached again, so its identity stays valid as a registry key.
///
/// ```rust,ignore
/// let sessions = ManagedWrapper::<Session>::new();
/// let carrier = sessions.create(&domain, &session_type, Session { id: 7 })?;
/// assert_eq!(sessions.native(&carrier).map(|session| session.id), Some(7));
/// ```
pub struct ManagedWrapper<T> {
    entries: DashMap<ObjectPtr, Attached<T>>,
}

impl<T> ManagedWrapper<T> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        ManagedWrapper {
            entries: DashMap::new(),
        }
    }

    /// Creates an instance of `ty` in `domain` and attaches `value` to it.
    ///
    /// # Errors
    /// Returns an error if the instance can not be created.
    pub fn create(&self, domain: &Domain, ty: &Type, value: T) -> Result<Object> {
        let carrier = Object::new_instance(domain, ty)?;
        self.attach(&carrier, value)?;
        Ok(carrier)
    }

    /// Attaches `value` to an existing instance, replacing a previously attached value.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] for an invalid object.
    pub fn attach(&self, carrier: &Object, value: T) -> Result<()> {
        let key = carrier.as_ptr().ok_or(Error::InvalidHandle("object"))?;
        let pin = gc::pin_object(carrier)?;
        self.entries.insert(key, Attached { value, _pin: pin });
        Ok(())
    }

    /// A copy of the value attached to `carrier`.
    #[must_use]
    pub fn native(&self, carrier: &Object) -> Option<T>
    where
        T: Clone,
    {
        self.with_native(carrier, T::clone)
    }

    /// Runs `f` on the value attached to `carrier`.
    pub fn with_native<R, F>(&self, carrier: &Object, f: F) -> Option<R>
    where
        F: FnOnce(&T) -> R,
    {
        let key = carrier.as_ptr()?;
        self.entries.get(&key).map(|entry| f(&entry.value))
    }

    /// Detaches and returns the value attached to `carrier`, releasing its pin.
    pub fn detach(&self, carrier: &Object) -> Option<T> {
        let key = carrier.as_ptr()?;
        self.entries.remove(&key).map(|(_, attached)| attached.value)
    }

    /// Number of attached values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no value is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for ManagedWrapper<T> {
    fn default() -> Self {
        ManagedWrapper::new()
    }
}

/// A native type carried across the boundary by a managed wrapper class.
///
/// Implemented by [`managed_converter!`](crate::managed_converter).
pub trait WrappedNative: Clone + Send + Sync + 'static {
    /// Full name of the managed wrapper class.
    const CLASS_NAME: &'static str;

    /// The process-wide registry of attached values of this type.
    fn wrapper() -> &'static ManagedWrapper<Self>;

    /// Detaches the value carried by `carrier` and unpins the carrier.
    fn release(carrier: &Object) -> Option<Self> {
        Self::wrapper().detach(carrier)
    }
}

/// Implements [`MonoConverter`](crate::marshal::MonoConverter) for a `Clone` native type
/// carried by instances of a managed wrapper class.
///
/// Converting a value to the managed side creates a new wrapper instance in the current
/// domain and attaches a clone of the value. Converting back looks the attached value up.
///
/// Each conversion to the managed side hands a pinned carrier to the managed code. The
/// carrier and its clone stay registered until [`WrappedNative::release`] is called for
/// it, typically once the managed side has dropped its reference.
///
/// ```rust,ignore
/// #[derive(Clone)]
/// struct Session {
///     id: u64,
/// }
///
/// monobridge::managed_converter!(Session, "Game.NativeSession");
/// ```
#[macro_export]
macro_rules! managed_converter {
    ($native:ty, $class:literal) => {
        impl $crate::marshal::WrappedNative for $native {
            const CLASS_NAME: &'static str = $class;

            fn wrapper() -> &'static $crate::marshal::ManagedWrapper<Self> {
                static WRAPPER: std::sync::OnceLock<$crate::marshal::ManagedWrapper<$native>> =
                    std::sync::OnceLock::new();
                WRAPPER.get_or_init($crate::marshal::ManagedWrapper::new)
            }
        }

        impl $crate::marshal::MonoConverter for $native {
            fn managed_type_name() -> Option<String> {
                Some($class.to_string())
            }

            fn is_compatible(ty: &$crate::Type) -> bool {
                ty.fullname() == $class
            }

            fn to_managed(&self) -> $crate::Result<$crate::marshal::ManagedValue> {
                let domain = $crate::Domain::current()?;
                let ty = domain.resolve_type($class)?;
                let carrier = <$native as $crate::marshal::WrappedNative>::wrapper().create(
                    &domain,
                    &ty,
                    self.clone(),
                )?;
                Ok($crate::marshal::ManagedValue::Object(carrier.as_ptr()))
            }

            fn from_managed(value: $crate::marshal::ManagedValue) -> $crate::Result<Self> {
                let carrier =
                    <$crate::Object as $crate::marshal::MonoConverter>::from_managed(value)?;
                <$native as $crate::marshal::WrappedNative>::wrapper()
                    .native(&carrier)
                    .ok_or_else(|| {
                        $crate::Error::Error(format!(
                            "No native value attached to {}",
                            carrier.get_type()
                        ))
                    })
            }
        }
    };
}
