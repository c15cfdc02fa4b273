use thiserror::Error;

use crate::exception::ManagedExceptionInfo;

/// Builds an [`Error::MemberNotFound`] in the native message format.
///
/// ```rust, ignore
/// return Err(member_not_found!("field", name, self.name()));
/// ```
macro_rules! member_not_found {
    ($kind:expr, $name:expr, $class:expr) => {
        crate::Error::MemberNotFound {
            kind: $kind,
            name: $name.to_string(),
            class: $class.to_string(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// # Error Categories
///
/// ## Resolution Errors
/// - [`Error::MemberNotFound`] - A named field, property or method does not exist
/// - [`Error::InvalidHandle`] - An operation was attempted on an invalid (null) handle
///
/// ## Invocation Errors
/// - [`Error::SignatureMismatch`] - An invoker was requested with an incompatible signature
/// - [`Error::ArgumentMarshal`] - An argument could not be passed to the declared parameter
/// - [`Error::ManagedException`] - The managed side threw during a call
/// - [`Error::TypeLayoutMismatch`] - Native and managed value layouts disagree
///
/// ## Runtime Lifecycle Errors
/// - [`Error::RuntimeNotInitialized`] - No runtime has been installed
/// - [`Error::AlreadyInitialized`] - A runtime was installed twice
/// - [`Error::AssemblyLoad`] - An assembly could not be opened
///
/// ## Generic Errors
/// - [`Error::NotSupported`], [`Error::Io`], [`Error::LockError`], [`Error::Error`]
///
/// Resolution of a *type* by name never produces an error; an invalid [`crate::Type`] is
/// returned instead, since probing for types that may not exist is an expected pattern.
#[derive(Error, Debug)]
pub enum Error {
    /// A field, property or method requested by name does not exist on the class or any of
    /// its base classes.
    ///
    /// Raised when constructing a member handle or an invoker by name.
    #[error("NATIVE::Could not get {kind} : {name} for class {class}")]
    MemberNotFound {
        /// The member kind, `"field"`, `"property"` or `"method"`
        kind: &'static str,
        /// The requested member name or method description
        name: String,
        /// The name of the class that was searched
        class: String,
    },

    /// An invoker was requested for a member whose managed signature does not match the
    /// static Rust signature.
    ///
    /// Raised at invoker construction, before any call is attempted.
    #[error("NATIVE::Method thunk requested with incompatible signature - {0}")]
    SignatureMismatch(String),

    /// The managed runtime reported a pending exception after a call.
    ///
    /// Carries the managed exception's type name, message, source and stack trace.
    #[error("{0}")]
    ManagedException(Box<ManagedExceptionInfo>),

    /// An argument could not be marshaled into the declared parameter slot.
    ///
    /// A boxed value whose class differs from the declared value-type parameter, a
    /// reference where a value type is required, or a null where a value is required.
    #[error("Argument {index} can not be passed as {expected}")]
    ArgumentMarshal {
        /// Zero-based parameter index
        index: usize,
        /// Full name of the declared parameter type
        expected: String,
    },

    /// The size or alignment of a native value type disagrees with the managed type it is
    /// bound to.
    #[error("Different type layouts for {type_name} - managed {managed_size}/{managed_align}, native {native_size}/{native_align}")]
    TypeLayoutMismatch {
        /// Full name of the managed type
        type_name: String,
        /// Managed value size
        managed_size: usize,
        /// Managed value alignment
        managed_align: usize,
        /// Native value size
        native_size: usize,
        /// Native value alignment
        native_align: usize,
    },

    /// An operation other than a validity check was attempted on an invalid handle.
    #[error("Invalid {0} handle")]
    InvalidHandle(&'static str),

    /// No managed runtime has been installed for this process.
    #[error("The managed runtime has not been initialized")]
    RuntimeNotInitialized,

    /// A managed runtime has already been installed for this process.
    #[error("The managed runtime has already been initialized")]
    AlreadyInitialized,

    /// An assembly could not be opened or loaded.
    #[error("NATIVE::Could not open assembly with path : {0}")]
    AssemblyLoad(String),

    /// The requested operation is not supported by the installed runtime.
    #[error("Not supported - {0}")]
    NotSupported(String),

    /// File I/O error.
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// A process-wide lock was poisoned by a panicking thread.
    #[error("Failed to lock target")]
    LockError,

    /// Generic error for miscellaneous cases.
    #[error("{0}")]
    Error(String),
}

impl Error {
    /// Returns the managed exception details if this error was raised by the managed side.
    #[must_use]
    pub fn managed_exception(&self) -> Option<&ManagedExceptionInfo> {
        match self {
            Error::ManagedException(info) => Some(info),
            _ => None,
        }
    }
}

impl From<ManagedExceptionInfo> for Error {
    fn from(info: ManagedExceptionInfo) -> Self {
        Error::ManagedException(Box::new(info))
    }
}
