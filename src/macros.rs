#![allow(unused_macros)]

/// Helper macro for locking items
///
/// ```rust, ignore
///  let mut data = lock!(my_mutex);
///  data.push(42);
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().expect("Failed to acquire lock")
    };
}

/// Helper macro for reading locked items
///
/// ```rust, ignore
///  let domain = read_lock!(CURRENT_DOMAIN);
/// ```
macro_rules! read_lock {
    ($arc_rwlock:expr) => {
        $arc_rwlock.read().expect("Failed to acquire read lock")
    };
}

/// Helper macro for writing to locked items
///
/// ```rust, ignore
///  let mut handlers = write_lock!(self.handlers);
///  handlers.insert(category, handler);
/// ```
macro_rules! write_lock {
    ($arc_rwlock:expr) => {
        $arc_rwlock.write().expect("Failed to acquire write lock")
    };
}

/// Helper macro for reading locked items, propagating poisoning as
/// [`crate::Error::LockError`]
///
/// ```rust, ignore
///  let domain = try_read_lock!(CURRENT).clone();
/// ```
macro_rules! try_read_lock {
    ($arc_rwlock:expr) => {
        $arc_rwlock.read().map_err(|_| crate::Error::LockError)?
    };
}

/// Helper macro for writing to locked items, propagating poisoning as
/// [`crate::Error::LockError`]
///
/// ```rust, ignore
///  *try_write_lock!(CURRENT) = Some(domain);
/// ```
macro_rules! try_write_lock {
    ($arc_rwlock:expr) => {
        $arc_rwlock.write().map_err(|_| crate::Error::LockError)?
    };
}

/// Generates an opaque, identity-compared wrapper around a raw runtime pointer.
///
/// ```rust, ignore
/// raw_handle!(
///     /// A managed class
///     ClassPtr
/// );
/// ```
macro_rules! raw_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(std::ptr::NonNull<std::ffi::c_void>);

        // Handles are identities into runtime-owned memory, never dereferenced by the bridge.
        unsafe impl Send for $name {}
        unsafe impl Sync for $name {}

        impl $name {
            /// Wraps a raw pointer, returning `None` for null.
            #[must_use]
            pub fn from_ptr(ptr: *mut std::ffi::c_void) -> Option<Self> {
                std::ptr::NonNull::new(ptr).map(Self)
            }

            /// Wraps a non-null pointer.
            #[must_use]
            pub const fn from_non_null(ptr: std::ptr::NonNull<std::ffi::c_void>) -> Self {
                Self(ptr)
            }

            /// Returns the raw pointer.
            #[must_use]
            pub fn as_ptr(self) -> *mut std::ffi::c_void {
                self.0.as_ptr()
            }

            /// Returns the address, used as identity key in the metadata caches.
            #[must_use]
            pub fn addr(self) -> usize {
                self.0.as_ptr() as usize
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.addr())
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, RwLock};

    use crate::{Error, Result};

    fn read_value(lock: &RwLock<i32>) -> Result<i32> {
        Ok(*try_read_lock!(lock))
    }

    fn write_value(lock: &RwLock<i32>, value: i32) -> Result<()> {
        *try_write_lock!(lock) = value;
        Ok(())
    }

    #[test]
    fn test_poisoned_lock_is_an_error() {
        let lock = Arc::new(RwLock::new(1));
        write_value(&lock, 2).unwrap();
        assert_eq!(read_value(&lock).unwrap(), 2);

        let poisoner = lock.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.write().unwrap();
            panic!("poison");
        })
        .join();

        assert!(matches!(read_value(&lock), Err(Error::LockError)));
        assert!(matches!(write_value(&lock, 3), Err(Error::LockError)));
    }
}
