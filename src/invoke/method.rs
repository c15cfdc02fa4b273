use std::{fmt, marker::PhantomData};

use crate::{
    exception::managed_error,
    invoke::ArgList,
    marshal::{to_mono_arg, ManagedValue, MonoConverter},
    members::Method,
    object::Object,
    runtime,
    types::Type,
    Error, Result,
};

/// A method bound to the native signature `fn(A) -> R`.
///
/// `A` is `()` or a tuple of argument types, `R` the result type; `()` discards any
/// result. Construct one with [`make_method_invoker`] or [`MethodInvoker::from_method`].
///
/// ```rust,ignore
/// let heal = make_method_invoker::<(i32,), i32>(&player_type, "Heal")?;
/// let health = heal.invoke_on(&player, (25,))?;
/// ```
pub struct MethodInvoker<A, R> {
    method: Method,
    _signature: PhantomData<fn(A) -> R>,
}

impl<A: ArgList, R: MonoConverter> MethodInvoker<A, R> {
    /// Binds an already resolved method.
    ///
    /// # Errors
    /// Returns [`Error::SignatureMismatch`] if `check_signature` is set and the native
    /// signature does not match the declared one.
    pub fn from_method(method: Method, check_signature: bool) -> Result<Self> {
        if check_signature {
            check_method_signature::<A, R>(&method)?;
        }
        Ok(MethodInvoker {
            method,
            _signature: PhantomData,
        })
    }

    /// The bound method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Calls the method without a receiver.
    ///
    /// # Errors
    /// Returns [`Error::ArgumentMarshal`] if an argument can not be passed,
    /// [`Error::ManagedException`] if the method throws, and a conversion error if the
    /// result can not be converted to `R`.
    pub fn invoke(&self, args: A) -> Result<R> {
        self.call(None, &args)
    }

    /// Calls the method on `receiver`, dispatching to its most derived override.
    ///
    /// An invalid receiver is passed as a null reference.
    ///
    /// # Errors
    /// Same as [`MethodInvoker::invoke`].
    pub fn invoke_on(&self, receiver: &Object, args: A) -> Result<R> {
        self.call(receiver.as_ptr(), &args)
    }

    fn call(&self, this: Option<crate::runtime::ObjectPtr>, args: &A) -> Result<R> {
        let rt = runtime::get()?;
        let method = match this {
            Some(receiver) => {
                let resolved = rt.object_get_virtual_method(receiver, self.method.as_ptr());
                if resolved == self.method.as_ptr() {
                    self.method.clone()
                } else {
                    Method::from_ptr(resolved)?
                }
            }
            None => self.method.clone(),
        };

        let mut values = args.to_managed()?;
        let params = method.param_types();
        let mut slots = Vec::with_capacity(values.len());
        for (index, value) in values.iter_mut().enumerate() {
            let declared = params.get(index).cloned().unwrap_or_default();
            let slot = to_mono_arg(value, &declared).ok_or_else(|| Error::ArgumentMarshal {
                index,
                expected: declared.fullname().to_string(),
            })?;
            slots.push(slot);
        }

        tracing::trace!(method = method.fullname(), args = slots.len(), "invoking managed method");
        // SAFETY: one slot per argument, built for the declared parameter types, backed by
        // `values` which outlives the call.
        let outcome = unsafe { rt.runtime_invoke(method.as_ptr(), this, &slots) };
        match outcome {
            Ok(result) => R::from_managed(ManagedValue::Object(result)),
            Err(exception) => Err(managed_error(rt, exception)),
        }
    }
}

impl<A, R> Clone for MethodInvoker<A, R> {
    fn clone(&self) -> Self {
        MethodInvoker {
            method: self.method.clone(),
            _signature: PhantomData,
        }
    }
}

impl<A, R> fmt::Debug for MethodInvoker<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodInvoker({})", self.method.fullname())
    }
}

/// Checks that arity, every parameter and the return type of `method` match `fn(A) -> R`.
fn check_method_signature<A: ArgList, R: MonoConverter>(method: &Method) -> Result<()> {
    let params = method.param_types();
    if params.len() != A::ARITY {
        return Err(Error::SignatureMismatch(format!(
            "{} takes {} arguments, native signature has {}",
            method.fullname(),
            params.len(),
            A::ARITY
        )));
    }

    for (index, param) in params.iter().enumerate() {
        if !A::is_compatible(index, param) {
            return Err(Error::SignatureMismatch(format!(
                "{} argument {index} is {}, native type is {}",
                method.fullname(),
                param.fullname(),
                A::managed_name(index).as_deref().unwrap_or("unknown")
            )));
        }
    }

    if !R::accepts_return(method.return_type()) {
        return Err(Error::SignatureMismatch(format!(
            "{} returns {}, native type is {}",
            method.fullname(),
            method.return_type().fullname(),
            R::managed_type_name().as_deref().unwrap_or("unknown")
        )));
    }
    Ok(())
}

/// Resolves a method of `owner` by name and binds it to `fn(A) -> R`.
///
/// When every argument type has a statically known managed name, the overload is selected
/// by the description `Name(Type1,Type2)`; otherwise by name and arity. `owner` may be a
/// [`Type`] or an [`Object`].
///
/// # Errors
/// Returns [`Error::MemberNotFound`] if no method matches and
/// [`Error::SignatureMismatch`] if the signatures disagree.
pub fn make_method_invoker<A, R>(owner: &impl AsRef<Type>, name: &str) -> Result<MethodInvoker<A, R>>
where
    A: ArgList,
    R: MonoConverter,
{
    let owner = owner.as_ref();
    let method = match A::managed_names() {
        Some(names) => Method::new(owner, &format!("{name}({})", names.join(",")))?,
        None => Method::with_arity(owner, name, A::ARITY)?,
    };
    MethodInvoker::from_method(method, true)
}
