use crate::{
    marshal::{ManagedValue, MonoConverter},
    types::Type,
    Result,
};

/// A native argument list: `()` or a tuple of up to eight [`MonoConverter`] values.
pub trait ArgList {
    /// Number of arguments.
    const ARITY: usize;

    /// Managed full names of the argument types, `None` if any of them is not known
    /// statically.
    fn managed_names() -> Option<Vec<String>>;

    /// Managed full name of the argument type at `index`.
    fn managed_name(index: usize) -> Option<String>;

    /// Whether the argument at `index` can be passed to a parameter declared as `ty`.
    fn is_compatible(index: usize, ty: &Type) -> bool;

    /// Converts every argument to its managed representation.
    ///
    /// # Errors
    /// Returns the first conversion error.
    fn to_managed(&self) -> Result<Vec<ManagedValue>>;
}

macro_rules! impl_arg_list {
    ($arity:expr; $($arg:ident : $index:tt),*) => {
        impl<$($arg: MonoConverter),*> ArgList for ($($arg,)*) {
            const ARITY: usize = $arity;

            fn managed_names() -> Option<Vec<String>> {
                Some(vec![$($arg::managed_type_name()?),*])
            }

            #[allow(unused_variables)]
            fn managed_name(index: usize) -> Option<String> {
                match index {
                    $($index => $arg::managed_type_name(),)*
                    _ => None,
                }
            }

            #[allow(unused_variables)]
            fn is_compatible(index: usize, ty: &Type) -> bool {
                match index {
                    $($index => $arg::is_compatible(ty),)*
                    _ => false,
                }
            }

            fn to_managed(&self) -> Result<Vec<ManagedValue>> {
                Ok(vec![$(self.$index.to_managed()?),*])
            }
        }
    };
}

impl_arg_list!(0;);
impl_arg_list!(1; A0: 0);
impl_arg_list!(2; A0: 0, A1: 1);
impl_arg_list!(3; A0: 0, A1: 1, A2: 2);
impl_arg_list!(4; A0: 0, A1: 1, A2: 2, A3: 3);
impl_arg_list!(5; A0: 0, A1: 1, A2: 2, A3: 3, A4: 4);
impl_arg_list!(6; A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5);
impl_arg_list!(7; A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5, A6: 6);
impl_arg_list!(8; A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5, A6: 6, A7: 7);
