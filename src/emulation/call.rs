//! Native method bodies of the emulated runtime.
//!
//! Every method of an emulated class is implemented by a [`NativeBody`]: a closure that
//! receives the decoded call in a [`NativeCall`] and returns an [`EmValue`], or the
//! exception object it throws.
//!
//! # Example
//!
//! ```rust,ignore
//! MethodBuilder::new("Heal")
//!     .param("System.Int32")
//!     .returns("System.Int32")
//!     .body(|call| {
//!         let this = call.this_or_throw()?;
//!         let amount: i32 = call.value(0)?;
//!         let health: i32 = call.field_value(this, "health")?;
//!         call.set_field_value(this, "health", health + amount)?;
//!         Ok(EmValue::of(health + amount))
//!     })
//! ```

use std::sync::Arc;

use crate::{
    emulation::EmulatedRuntime,
    marshal::Blittable,
    runtime::{ClassPtr, MethodPtr, ObjectPtr},
};

/// Result of a native method body: the return value or the thrown exception object.
pub type CallResult = std::result::Result<EmValue, ObjectPtr>;

/// Implementation of an emulated method.
pub type NativeBody = Arc<dyn Fn(&NativeCall<'_>) -> CallResult + Send + Sync>;

/// A value crossing an emulated call boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmValue {
    /// No value, returned by procedures
    Void,
    /// Unboxed value-type bytes
    Value(Vec<u8>),
    /// A managed reference, possibly null
    Ref(Option<ObjectPtr>),
}

impl EmValue {
    /// Wraps a plain value.
    #[must_use]
    pub fn of<T: Blittable>(value: T) -> Self {
        EmValue::Value(value.to_bytes())
    }

    /// Wraps a non-null reference.
    #[must_use]
    pub fn object(object: ObjectPtr) -> Self {
        EmValue::Ref(Some(object))
    }

    /// The null reference.
    #[must_use]
    pub fn null() -> Self {
        EmValue::Ref(None)
    }

    /// Decodes a plain value.
    #[must_use]
    pub fn as_value<T: Blittable>(&self) -> Option<T> {
        match self {
            EmValue::Value(bytes) => T::from_bytes(bytes),
            _ => None,
        }
    }

    /// The reference carried by this value.
    #[must_use]
    pub fn as_object(&self) -> Option<ObjectPtr> {
        match self {
            EmValue::Ref(object) => *object,
            _ => None,
        }
    }
}

/// A decoded call into a native method body.
pub struct NativeCall<'a> {
    runtime: &'a EmulatedRuntime,
    method: MethodPtr,
    this: Option<ObjectPtr>,
    args: Vec<EmValue>,
}

impl<'a> NativeCall<'a> {
    pub(crate) fn new(
        runtime: &'a EmulatedRuntime,
        method: MethodPtr,
        this: Option<ObjectPtr>,
        args: Vec<EmValue>,
    ) -> Self {
        NativeCall {
            runtime,
            method,
            this,
            args,
        }
    }

    /// The runtime executing the call.
    #[must_use]
    pub fn runtime(&self) -> &'a EmulatedRuntime {
        self.runtime
    }

    /// The method being executed.
    #[must_use]
    pub fn method(&self) -> MethodPtr {
        self.method
    }

    /// The receiver of an instance call.
    #[must_use]
    pub fn this(&self) -> Option<ObjectPtr> {
        self.this
    }

    /// The receiver, throwing `System.NullReferenceException` for static calls.
    ///
    /// # Errors
    /// Returns the thrown exception object if there is no receiver.
    pub fn this_or_throw(&self) -> std::result::Result<ObjectPtr, ObjectPtr> {
        self.this.ok_or_else(|| {
            self.throw(
                "System",
                "NullReferenceException",
                "Object reference not set to an instance of an object",
            )
        })
    }

    /// Number of arguments.
    #[must_use]
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Raw argument at `index`.
    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&EmValue> {
        self.args.get(index)
    }

    /// Decodes a plain-value argument, throwing `System.ArgumentException` if absent.
    ///
    /// # Errors
    /// Returns the thrown exception object if the argument is missing or not a value.
    pub fn value<T: Blittable>(&self, index: usize) -> std::result::Result<T, ObjectPtr> {
        self.args
            .get(index)
            .and_then(EmValue::as_value::<T>)
            .ok_or_else(|| {
                self.throw(
                    "System",
                    "ArgumentException",
                    &format!("Argument {index} is not a valid value"),
                )
            })
    }

    /// Reference argument at `index`, `None` for null or missing arguments.
    #[must_use]
    pub fn object(&self, index: usize) -> Option<ObjectPtr> {
        self.args.get(index).and_then(EmValue::as_object)
    }

    /// String argument at `index`, `None` for null or missing arguments.
    #[must_use]
    pub fn string(&self, index: usize) -> Option<String> {
        self.object(index).map(|string| self.runtime.read_string(string))
    }

    /// Reads a plain-value instance field of `object`.
    ///
    /// # Errors
    /// Throws `System.MissingFieldException` if the field does not exist.
    pub fn field_value<T: Blittable>(
        &self,
        object: ObjectPtr,
        name: &str,
    ) -> std::result::Result<T, ObjectPtr> {
        self.runtime
            .read_instance_field(object, name)
            .and_then(|value| value.as_value::<T>())
            .ok_or_else(|| self.missing_field(name))
    }

    /// Writes a plain-value instance field of `object`.
    ///
    /// # Errors
    /// Throws `System.MissingFieldException` if the field does not exist.
    pub fn set_field_value<T: Blittable>(
        &self,
        object: ObjectPtr,
        name: &str,
        value: T,
    ) -> std::result::Result<(), ObjectPtr> {
        if self
            .runtime
            .write_instance_field(object, name, &EmValue::of(value))
        {
            Ok(())
        } else {
            Err(self.missing_field(name))
        }
    }

    /// Reads a reference instance field of `object`.
    ///
    /// # Errors
    /// Throws `System.MissingFieldException` if the field does not exist.
    pub fn field_object(
        &self,
        object: ObjectPtr,
        name: &str,
    ) -> std::result::Result<Option<ObjectPtr>, ObjectPtr> {
        match self.runtime.read_instance_field(object, name) {
            Some(EmValue::Ref(value)) => Ok(value),
            _ => Err(self.missing_field(name)),
        }
    }

    /// Writes a reference instance field of `object`.
    ///
    /// # Errors
    /// Throws `System.MissingFieldException` if the field does not exist.
    pub fn set_field_object(
        &self,
        object: ObjectPtr,
        name: &str,
        value: Option<ObjectPtr>,
    ) -> std::result::Result<(), ObjectPtr> {
        if self
            .runtime
            .write_instance_field(object, name, &EmValue::Ref(value))
        {
            Ok(())
        } else {
            Err(self.missing_field(name))
        }
    }

    /// Allocates a managed string and wraps it as a return value.
    #[must_use]
    pub fn new_string(&self, text: &str) -> EmValue {
        EmValue::object(self.runtime.alloc_string(text))
    }

    /// Class that declares the executing method.
    #[must_use]
    pub fn declaring_class(&self) -> ClassPtr {
        self.runtime.method_def(self.method).class
    }

    /// Creates an exception object of a corlib class, with a stack trace through the
    /// executing method.
    #[must_use]
    pub fn throw(&self, namespace: &str, name: &str, message: &str) -> ObjectPtr {
        self.runtime
            .throw_from(self.method, namespace, name, message)
    }

    fn missing_field(&self, name: &str) -> ObjectPtr {
        self.throw(
            "System",
            "MissingFieldException",
            &format!("Field '{name}' not found"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emvalue_accessors() {
        let value = EmValue::of(1234i32);
        assert_eq!(value.as_value::<i32>(), Some(1234));
        assert_eq!(value.as_object(), None);

        assert_eq!(EmValue::null().as_object(), None);
        assert_eq!(EmValue::Void.as_value::<i32>(), None);
        assert_eq!(EmValue::of(true).as_value::<bool>(), Some(true));
    }
}
