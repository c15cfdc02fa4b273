use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use crate::{
    members::Visibility,
    object::Object,
    runtime::{
        flags::{MethodImplOptions, MethodModifiers},
        MethodPtr, Runtime,
    },
    types::{MetaCache, Type},
    Result,
};

pub(crate) static METHOD_CACHE: MetaCache<MethodMeta> = MetaCache::new("method");

pub(crate) struct MethodMeta {
    name: String,
    fullname: String,
    full_declname: String,
    visibility: Visibility,
    modifiers: MethodModifiers,
    impl_options: MethodImplOptions,
    declaring: Type,
    return_type: Type,
    params: OnceLock<Vec<Type>>,
}

impl MethodMeta {
    fn compute(rt: &dyn Runtime, method: MethodPtr) -> Self {
        let (flags, impl_flags) = rt.method_flags(method);
        let visibility = Visibility::from_access_flags(flags);
        let modifiers = MethodModifiers::from_method_flags(flags);
        let fullname = rt.method_full_name(method);
        let storage = if modifiers.contains(MethodModifiers::STATIC) {
            " static "
        } else {
            " "
        };

        MethodMeta {
            name: rt.method_name(method),
            full_declname: format!("{visibility}{storage}{fullname}"),
            fullname,
            visibility,
            modifiers,
            impl_options: MethodImplOptions::from_impl_flags(impl_flags),
            declaring: Type::wrap(rt, rt.method_class(method)),
            return_type: Type::wrap(rt, rt.method_return_type(method)),
            params: OnceLock::new(),
        }
    }
}

/// A handle to one method of a managed type.
#[derive(Clone)]
pub struct Method {
    method: MethodPtr,
    meta: Arc<MethodMeta>,
}

impl Method {
    /// Looks up a method of `owner` or one of its base types by name, or by a
    /// `Name(Type1,Type2)` description selecting one overload.
    ///
    /// Parameter types in a description are full type names; C# keyword aliases such as
    /// `int` or `string` are accepted.
    ///
    /// # Errors
    /// Returns [`crate::Error::MemberNotFound`] if no method matches, and
    /// [`crate::Error::InvalidHandle`] for an invalid owner.
    pub fn new(owner: &Type, name_or_desc: &str) -> Result<Self> {
        Method::search(owner, name_or_desc, |rt, class| {
            rt.class_method_from_desc(class, name_or_desc)
        })
    }

    /// Looks up a method of `owner` or one of its base types by name and parameter count.
    ///
    /// # Errors
    /// Returns [`crate::Error::MemberNotFound`] if no method matches, and
    /// [`crate::Error::InvalidHandle`] for an invalid owner.
    pub fn with_arity(owner: &Type, name: &str, argc: usize) -> Result<Self> {
        Method::search(owner, name, |rt, class| {
            rt.class_method_from_name(class, name, Some(argc))
        })
    }

    fn search<F>(owner: &Type, requested: &str, find: F) -> Result<Self>
    where
        F: Fn(&dyn Runtime, crate::runtime::ClassPtr) -> Option<MethodPtr>,
    {
        let (rt, class) = owner.handle()?;
        let mut current = Some(class);
        while let Some(candidate) = current {
            if let Some(method) = find(rt, candidate) {
                return Ok(Method::wrap(rt, method));
            }
            current = rt.class_parent(candidate);
        }
        Err(member_not_found!("method", requested, owner.name()))
    }

    /// Wraps a raw method handle of the installed runtime.
    ///
    /// # Errors
    /// Returns [`crate::Error::RuntimeNotInitialized`] if no runtime is installed.
    pub fn from_ptr(method: MethodPtr) -> Result<Self> {
        Ok(Method::wrap(crate::runtime::get()?, method))
    }

    pub(crate) fn wrap(rt: &dyn Runtime, method: MethodPtr) -> Self {
        Method {
            meta: METHOD_CACHE.get_or_compute(method.addr(), || MethodMeta::compute(rt, method)),
            method,
        }
    }

    /// The raw method handle.
    #[must_use]
    pub fn as_ptr(&self) -> MethodPtr {
        self.method
    }

    /// Method name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// `Namespace.Class:Method (ParamType1,ParamType2)`.
    #[must_use]
    pub fn fullname(&self) -> &str {
        &self.meta.fullname
    }

    /// Visibility and storage followed by the full name.
    #[must_use]
    pub fn full_declname(&self) -> &str {
        &self.meta.full_declname
    }

    /// Type that declares the method.
    #[must_use]
    pub fn declaring_type(&self) -> &Type {
        &self.meta.declaring
    }

    /// Declared return type, `System.Void` for procedures.
    #[must_use]
    pub fn return_type(&self) -> &Type {
        &self.meta.return_type
    }

    /// Declared parameter types, queried once and cached.
    #[must_use]
    pub fn param_types(&self) -> &[Type] {
        self.meta.params.get_or_init(|| match crate::runtime::get() {
            Ok(rt) => rt
                .method_param_types(self.method)
                .into_iter()
                .map(|param| Type::wrap(rt, param))
                .collect(),
            Err(_) => Vec::new(),
        })
    }

    /// Declared accessibility.
    #[must_use]
    pub fn visibility(&self) -> Visibility {
        self.meta.visibility
    }

    /// Method modifier flags.
    #[must_use]
    pub fn modifiers(&self) -> MethodModifiers {
        self.meta.modifiers
    }

    /// Implementation option flags.
    #[must_use]
    pub fn impl_options(&self) -> MethodImplOptions {
        self.meta.impl_options
    }

    /// Whether the method is static.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.meta.modifiers.contains(MethodModifiers::STATIC)
    }

    /// Whether the method is virtual.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.meta.modifiers.contains(MethodModifiers::VIRTUAL)
    }

    /// Whether the method is abstract.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.meta.modifiers.contains(MethodModifiers::ABSTRACT)
    }

    /// Whether the implementation is forwarded through P/Invoke.
    #[must_use]
    pub fn is_pinvoke(&self) -> bool {
        self.meta.modifiers.contains(MethodModifiers::PINVOKE_IMPL)
    }

    /// Whether the method name is special, as for accessors and constructors.
    #[must_use]
    pub fn is_special_name(&self) -> bool {
        self.meta.modifiers.contains(MethodModifiers::SPECIAL_NAME)
    }

    /// Whether the method is implemented inside the runtime.
    #[must_use]
    pub fn is_internal_call(&self) -> bool {
        self.meta
            .impl_options
            .contains(MethodImplOptions::INTERNAL_CALL)
    }

    /// Whether the method body is single threaded.
    #[must_use]
    pub fn is_synchronized(&self) -> bool {
        self.meta
            .impl_options
            .contains(MethodImplOptions::SYNCHRONIZED)
    }

    /// Custom attribute instances applied to the method.
    ///
    /// # Errors
    /// Returns [`crate::Error::RuntimeNotInitialized`] if no runtime is installed.
    pub fn attributes(&self) -> Result<Vec<Object>> {
        let rt = crate::runtime::get()?;
        Ok(rt
            .method_custom_attrs(self.method)
            .into_iter()
            .map(|attribute| Object::wrap(rt, attribute))
            .collect())
    }

    /// Whether an attribute with the given full name is applied to the method.
    ///
    /// # Errors
    /// Returns [`crate::Error::RuntimeNotInitialized`] if no runtime is installed.
    pub fn has_attribute(&self, full_name: &str) -> Result<bool> {
        Ok(self
            .attributes()?
            .iter()
            .any(|attribute| attribute.get_type().fullname() == full_name))
    }
}

impl PartialEq for Method {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method
    }
}

impl Eq for Method {}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Method({})", self.fullname())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::game_type;

    #[test]
    fn test_method_metadata() {
        let player = game_type("Game", "Player");
        let heal = player.method("Heal").unwrap();
        assert_eq!(heal.fullname(), "Game.Player:Heal (System.Int32)");
        assert_eq!(heal.full_declname(), "public Game.Player:Heal (System.Int32)");
        assert_eq!(heal.return_type().fullname(), "System.Int32");
        assert_eq!(heal.param_types().len(), 1);
        assert_eq!(heal.param_types()[0].fullname(), "System.Int32");
        assert!(!heal.is_static() && !heal.is_virtual());
    }

    #[test]
    fn test_overload_selection() {
        let player = game_type("Game", "Player");
        let by_int = player.method("Damage(System.Int32)").unwrap();
        let by_alias = player.method("Damage(int)").unwrap();
        let by_pair = player.method("Damage(System.Int32,System.Single)").unwrap();
        assert_eq!(by_int, by_alias);
        assert_ne!(by_int, by_pair);
        assert_eq!(player.method_with_arity("Damage", 2).unwrap(), by_pair);
        assert!(player.method_with_arity("Damage", 3).is_err());
    }

    #[test]
    fn test_inherited_virtual_method() {
        let enemy = game_type("Game", "Enemy");
        let describe = game_type("Game", "Actor").method("Describe").unwrap();
        assert!(describe.is_virtual());

        let found = enemy.method("Describe").unwrap();
        assert_eq!(found.declaring_type().fullname(), "Game.Enemy");
        assert!(enemy.method("Attack").is_ok());
        assert!(game_type("Game", "Actor").method("Attack").is_err());
    }

    #[test]
    fn test_accessor_and_static_flags() {
        let player = game_type("Game", "Player");
        let getter = player.method("get_Name").unwrap();
        assert!(getter.is_special_name());

        let create = player.method("Create").unwrap();
        assert!(create.is_static());
        assert!(create.full_declname().starts_with("public static "));
    }

    #[test]
    fn test_method_attributes() {
        let player = game_type("Game", "Player");
        let heal = player.method("Heal").unwrap();
        assert!(heal.has_attribute("Game.ActionAttribute").unwrap());
        assert!(!player.method("Create").unwrap().has_attribute("Game.ActionAttribute").unwrap());
    }
}
