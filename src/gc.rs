//! Scoped GC pins and collector statistics.
//!
//! A [`GcHandle`] keeps one managed object alive and at a fixed address for as long as it
//! is locked. Pins are released on drop, on every exit path.

use std::fmt;

use crate::{
    containers::{Array, List},
    marshal::{ManagedValue, MonoConverter},
    object::Object,
    runtime, Result,
};

/// A scoped pin of one managed object.
///
/// ```rust,ignore
/// let mut pin = GcHandle::new();
/// pin.pin(&player)?;
/// // `player` can not be collected or moved here.
/// pin.unpin();
/// ```
#[derive(Default)]
pub struct GcHandle {
    handle: u32,
    object: Object,
}

impl GcHandle {
    /// An unlocked handle.
    #[must_use]
    pub fn new() -> Self {
        GcHandle::default()
    }

    /// Pins `object`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidHandle`] for the invalid object.
    ///
    /// # Panics
    /// Panics if the handle already pins an object.
    pub fn pin(&mut self, object: &Object) -> Result<()> {
        assert!(!self.is_locked(), "GcHandle already pins an object");
        let (rt, target) = object.handle()?;
        self.handle = rt.gchandle_new(target, true);
        self.object = object.clone();
        tracing::trace!(handle = self.handle, object = ?object, "pinned object");
        Ok(())
    }

    /// Releases the pin. Does nothing if the handle is unlocked.
    pub fn unpin(&mut self) {
        if !self.is_locked() {
            return;
        }
        if let Ok(rt) = runtime::get() {
            rt.gchandle_free(self.handle);
        }
        tracing::trace!(handle = self.handle, "released pin");
        self.handle = 0;
        self.object = Object::invalid();
    }

    /// Whether the handle currently pins an object.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.handle != 0
    }

    /// The runtime's handle number, 0 when unlocked.
    #[must_use]
    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// The pinned object, invalid when unlocked.
    #[must_use]
    pub fn object(&self) -> Object {
        if !self.is_locked() {
            return Object::invalid();
        }
        match runtime::get() {
            Ok(rt) => Object::wrap_opt(rt, rt.gchandle_get_target(self.handle)),
            Err(_) => Object::invalid(),
        }
    }

    /// The pinned object converted to `T`.
    ///
    /// # Errors
    /// Returns the conversion error of `T`.
    pub fn object_as<T: MonoConverter>(&self) -> Result<T> {
        T::from_managed(ManagedValue::Object(self.object().as_ptr()))
    }
}

impl Drop for GcHandle {
    fn drop(&mut self) {
        self.unpin();
    }
}

impl fmt::Debug for GcHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcHandle")
            .field("handle", &self.handle)
            .field("object", &self.object)
            .finish()
    }
}

/// Pins `object` for the lifetime of the returned handle.
///
/// # Errors
/// Returns [`crate::Error::InvalidHandle`] for the invalid object.
pub fn pin_object(object: &Object) -> Result<GcHandle> {
    let mut handle = GcHandle::new();
    handle.pin(object)?;
    Ok(handle)
}

/// Pins the storage of an array.
///
/// # Errors
/// Same as [`pin_object`].
pub fn pin_array<T: MonoConverter>(array: &Array<T>) -> Result<GcHandle> {
    pin_object(array.as_object())
}

/// Pins a generic list object.
///
/// # Errors
/// Same as [`pin_object`].
pub fn pin_list<T: MonoConverter>(list: &List<T>) -> Result<GcHandle> {
    pin_object(list.as_object())
}

/// Runs `f` while `object` is pinned.
///
/// # Errors
/// Same as [`pin_object`].
pub fn with_pinned<R>(object: &Object, f: impl FnOnce(&Object) -> R) -> Result<R> {
    let _pin = pin_object(object)?;
    Ok(f(object))
}

/// Bytes reserved by the managed heap.
///
/// # Errors
/// Returns [`crate::Error::RuntimeNotInitialized`] if no runtime is installed.
pub fn heap_size() -> Result<u64> {
    Ok(runtime::get()?.gc_heap_size())
}

/// Bytes in use on the managed heap.
///
/// # Errors
/// Returns [`crate::Error::RuntimeNotInitialized`] if no runtime is installed.
pub fn used_size() -> Result<u64> {
    Ok(runtime::get()?.gc_used_size())
}

/// Highest generation of the collector.
///
/// # Errors
/// Returns [`crate::Error::RuntimeNotInitialized`] if no runtime is installed.
pub fn max_generation() -> Result<i32> {
    Ok(runtime::get()?.gc_max_generation())
}

/// Forces a collection of `generation` and all younger generations.
///
/// Generations above [`max_generation`] collect everything.
///
/// # Errors
/// Returns [`crate::Error::RuntimeNotInitialized`] if no runtime is installed.
pub fn collect(generation: i32) -> Result<()> {
    let rt = runtime::get()?;
    let generation = generation.min(rt.gc_max_generation());
    tracing::debug!(generation, "forcing collection");
    rt.gc_collect(generation);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        emulation,
        test::{domain, game_type},
        Error,
    };

    #[test]
    fn test_pin_lifecycle() {
        let player = game_type("Game", "Player").new_instance(&domain()).unwrap();
        let mut pin = GcHandle::new();
        assert!(!pin.is_locked());
        assert!(!pin.object().valid());

        pin.pin(&player).unwrap();
        assert!(pin.is_locked());
        assert_ne!(pin.handle(), 0);
        assert_eq!(pin.object(), player);

        pin.unpin();
        assert!(!pin.is_locked());
        pin.unpin();
        assert_eq!(pin.handle(), 0);
    }

    #[test]
    #[should_panic(expected = "already pins")]
    fn test_double_pin_panics() {
        let player = game_type("Game", "Player").new_instance(&domain()).unwrap();
        let mut pin = pin_object(&player).unwrap();
        let _ = pin.pin(&player);
    }

    #[test]
    fn test_invalid_object_is_not_pinned() {
        assert!(matches!(pin_object(&Object::invalid()), Err(Error::InvalidHandle("object"))));
    }

    #[test]
    fn test_with_pinned_and_object_as() {
        let domain = domain();
        let text = domain.new_string("pinned").unwrap();
        let length = with_pinned(text.as_object(), |object| {
            let pin = pin_object(object).unwrap();
            pin.object_as::<String>().unwrap().len()
        })
        .unwrap();
        assert_eq!(length, 6);

        let array = Array::new(&domain, &[1u16, 2]).unwrap();
        let pin = pin_array(&array).unwrap();
        assert_eq!(pin.object_as::<Vec<u16>>().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_pins_show_in_stats() {
        let runtime = emulation::shared().unwrap();
        let player = game_type("Game", "Player").new_instance(&domain()).unwrap();
        let pin = pin_object(&player).unwrap();
        assert!(runtime.gc_stats().pinned >= 1);
        drop(pin);
    }

    #[test]
    fn test_statistics() {
        domain();
        assert!(max_generation().unwrap() >= 0);
        assert!(heap_size().unwrap() >= used_size().unwrap());
        let before = emulation::shared().unwrap().gc_stats().collections;
        collect(i32::MAX).unwrap();
        assert!(emulation::shared().unwrap().gc_stats().collections > before);
    }
}
