//! Managed exception capture.
//!
//! When a managed call returns with a pending exception, the exception object is read
//! through its standard `Message`, `Source` and `StackTrace` properties and surfaced as
//! [`Error::ManagedException`]. [`extract_relevant_stack_frame`] pulls the first source
//! location out of a stack trace for short diagnostics.

use std::{fmt, sync::OnceLock};

use regex::Regex;

use crate::{
    invoke::make_property_invoker,
    object::Object,
    runtime::{self, ObjectPtr, Runtime},
    Error, Result,
};

/// Details of an exception thrown on the managed side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedExceptionInfo {
    /// Full name of the exception class, e.g. `System.ArgumentException`
    pub type_name: String,
    /// The exception message
    pub message: String,
    /// Name of the assembly or application that raised the exception
    pub source: String,
    /// The managed stack trace, one frame per line
    pub stack_trace: String,
}

impl ManagedExceptionInfo {
    /// Reads the details of an exception object.
    ///
    /// Properties that can not be read are left empty.
    #[must_use]
    pub fn from_object(exception: &Object) -> Self {
        let read = |name: &str| {
            make_property_invoker::<String>(exception, name)
                .and_then(|property| property.get_on(exception))
                .unwrap_or_default()
        };

        ManagedExceptionInfo {
            type_name: exception.get_type().fullname().to_string(),
            message: read("Message"),
            source: read("Source"),
            stack_trace: read("StackTrace"),
        }
    }

    /// The first source location in the stack trace.
    #[must_use]
    pub fn relevant_frame(&self) -> Option<StackFrameInfo> {
        extract_relevant_stack_frame(&self.stack_trace)
    }
}

impl fmt::Display for ManagedExceptionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})\n{}", self.type_name, self.message, self.stack_trace)
    }
}

/// Converts a thrown exception object into an [`Error::ManagedException`].
pub(crate) fn managed_error(rt: &dyn Runtime, exception: ObjectPtr) -> Error {
    let info = ManagedExceptionInfo::from_object(&Object::wrap(rt, exception));
    tracing::debug!(
        exception = %info.type_name,
        message = %info.message,
        "managed call threw"
    );
    info.into()
}

/// Creates an exception object of a corlib exception class.
///
/// The object is only created, not thrown; pass it to managed code or inspect it with
/// [`ManagedExceptionInfo::from_object`].
///
/// # Errors
/// Returns [`Error::RuntimeNotInitialized`] if no runtime is installed and
/// [`Error::NotSupported`] if the class does not exist.
pub fn create_exception(namespace: &str, name: &str, message: &str) -> Result<Object> {
    let rt = runtime::get()?;
    let exception = rt
        .exception_from_name_msg(rt.corlib(), namespace, name, message)
        .ok_or_else(|| Error::NotSupported(format!("No exception class {namespace}.{name}")))?;
    Ok(Object::wrap(rt, exception))
}

/// Raises a corlib exception to the caller as [`Error::ManagedException`].
///
/// Always returns `Err`, so `return raise_exception(..)` unwinds like a managed `throw`.
///
/// ```rust,no_run
/// use monobridge::{exception::raise_exception, Result};
///
/// fn checked_level(level: i32) -> Result<i32> {
///     if level < 0 {
///         return raise_exception("System", "ArgumentOutOfRangeException", "level");
///     }
///     Ok(level)
/// }
/// ```
///
/// # Errors
/// Returns the raised exception, or the error of [`create_exception`] if it could not be
/// created.
pub fn raise_exception<T>(namespace: &str, name: &str, message: &str) -> Result<T> {
    let exception = create_exception(namespace, name, message)?;
    Err(ManagedExceptionInfo::from_object(&exception).into())
}

/// A source location referenced by a stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrameInfo {
    /// Path of the source file as it appears in the trace
    pub file_name: String,
    /// One-based line number
    pub line: u32,
}

impl fmt::Display for StackFrameInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file_name, self.line)
    }
}

fn frame_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"([^\s]+\.cs):(\d+)").expect("valid frame pattern"))
}

/// Finds the first `<file>.cs:<line>` reference in a stack trace, scanning line by line.
///
/// ```rust
/// use monobridge::extract_relevant_stack_frame;
///
/// let trace = "  at Game.Player.Heal (System.Int32) [0x00000] in /src/Player.cs:42";
/// let frame = extract_relevant_stack_frame(trace).unwrap();
/// assert_eq!(frame.file_name, "/src/Player.cs");
/// assert_eq!(frame.line, 42);
/// ```
#[must_use]
pub fn extract_relevant_stack_frame(stack_trace: &str) -> Option<StackFrameInfo> {
    stack_trace.lines().find_map(|line| {
        let captures = frame_pattern().captures(line)?;
        Some(StackFrameInfo {
            file_name: captures.get(1)?.as_str().to_string(),
            line: captures.get(2)?.as_str().parse().ok()?,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::fixture;

    #[test]
    fn test_first_frame_wins() {
        let trace = "\
  at Game.Inventory.Add (Game.Item) [0x00010] in <filename unknown>:0
  at Game.Player.Pickup (Game.Item) [0x00004] in C:\\Game\\Player.cs:118
  at Game.World.Tick () [0x00020] in /home/dev/World.cs:7";
        let frame = extract_relevant_stack_frame(trace).unwrap();
        assert_eq!(frame.file_name, "C:\\Game\\Player.cs");
        assert_eq!(frame.line, 118);
        assert_eq!(frame.to_string(), "C:\\Game\\Player.cs:118");
    }

    #[test]
    fn test_no_frame() {
        assert_eq!(extract_relevant_stack_frame(""), None);
        assert_eq!(
            extract_relevant_stack_frame("  at Game.Player.Heal () [0x0] in <filename unknown>:0"),
            None
        );
        assert_eq!(extract_relevant_stack_frame("Player.cs:99999999999"), None);
    }

    #[test]
    fn test_create_and_read_exception() {
        fixture();
        let exception = create_exception("System", "InvalidOperationException", "bad state").unwrap();
        let info = ManagedExceptionInfo::from_object(&exception);
        assert_eq!(info.type_name, "System.InvalidOperationException");
        assert_eq!(info.message, "bad state");
        assert_eq!(info.source, "");
        assert_eq!(info.to_string(), "System.InvalidOperationException(bad state)\n");

        let error = Error::from(info);
        assert_eq!(error.to_string(), "System.InvalidOperationException(bad state)\n");
        assert!(error.managed_exception().is_some());
    }

    #[test]
    fn test_unknown_exception_class() {
        fixture();
        assert!(matches!(
            create_exception("System", "NoSuchException", "x"),
            Err(Error::NotSupported(_))
        ));
        assert!(matches!(
            raise_exception::<()>("System", "NoSuchException", "x"),
            Err(Error::NotSupported(_))
        ));
    }

    #[test]
    fn test_raise_returns_managed_error() {
        fixture();
        let error = raise_exception::<i32>("System", "ArgumentException", "negative").unwrap_err();
        let info = error.managed_exception().unwrap();
        assert_eq!(info.type_name, "System.ArgumentException");
        assert_eq!(info.message, "negative");
    }
}
