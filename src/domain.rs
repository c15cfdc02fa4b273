//! Managed execution domains.
//!
//! A [`Domain`] owns the assemblies loaded into it. The process has one current domain,
//! held behind a lock so that any thread can reach it; objects, arrays, lists and strings
//! are created in it unless a domain is passed explicitly.

use std::sync::{Arc, RwLock};

use dashmap::DashMap;

use crate::{
    assembly::Assembly,
    object::MonoString,
    runtime::{self, DomainPtr, Runtime},
    types::{reset_all_caches, split_generic_name, Type},
    Error, Result,
};

static CURRENT: RwLock<Option<Domain>> = RwLock::new(None);

struct DomainInner {
    domain: DomainPtr,
    name: String,
    assemblies: DashMap<String, Assembly>,
    named: DashMap<String, Assembly>,
}

/// A managed execution domain and the assemblies loaded into it.
///
/// Clones share the assembly caches.
#[derive(Clone)]
pub struct Domain {
    inner: Arc<DomainInner>,
}

impl Domain {
    fn wrap(rt: &dyn Runtime, domain: DomainPtr) -> Self {
        Domain {
            inner: Arc::new(DomainInner {
                domain,
                name: rt.domain_friendly_name(domain),
                assemblies: DashMap::new(),
                named: DashMap::new(),
            }),
        }
    }

    /// Creates a new domain. It does not become the current domain.
    ///
    /// # Errors
    /// Returns [`Error::NotSupported`] if the runtime can not create domains.
    pub fn new(name: &str) -> Result<Self> {
        let rt = runtime::get()?;
        let domain = rt
            .domain_create(name)
            .ok_or_else(|| Error::NotSupported(format!("Can not create domain {name}")))?;
        tracing::debug!(name, "created domain");
        Ok(Domain::wrap(rt, domain))
    }

    /// The current domain.
    ///
    /// If the runtime switched domains behind the bridge's back, the runtime's current
    /// domain is adopted.
    ///
    /// # Errors
    /// Returns [`Error::RuntimeNotInitialized`] if no runtime is installed,
    /// [`Error::InvalidHandle`] if the runtime has no current domain and
    /// [`Error::LockError`] if the current-domain lock is poisoned.
    pub fn current() -> Result<Self> {
        let rt = runtime::get()?;
        let active = rt.domain_get().ok_or(Error::InvalidHandle("domain"))?;

        let known = try_read_lock!(CURRENT).clone();
        if let Some(domain) = known.filter(|domain| domain.as_ptr() == active) {
            return Ok(domain);
        }

        let mut current = try_write_lock!(CURRENT);
        match current.as_ref() {
            Some(domain) if domain.as_ptr() == active => Ok(domain.clone()),
            _ => {
                let domain = Domain::wrap(rt, active);
                tracing::debug!(name = domain.name(), "adopted current domain");
                *current = Some(domain.clone());
                Ok(domain)
            }
        }
    }

    /// Makes this the current domain.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] if the runtime rejects the domain, e.g. after it
    /// has been unloaded.
    pub fn set_current(&self) -> Result<()> {
        let rt = runtime::get()?;
        if !rt.domain_set(self.as_ptr()) {
            return Err(Error::InvalidHandle("domain"));
        }
        *try_write_lock!(CURRENT) = Some(self.clone());
        tracing::debug!(name = self.name(), "switched current domain");
        Ok(())
    }

    /// The raw domain handle.
    #[must_use]
    pub fn as_ptr(&self) -> DomainPtr {
        self.inner.domain
    }

    /// Friendly name of the domain.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Loads an assembly from `path`, or returns it from the cache if it was loaded
    /// through this domain before.
    ///
    /// A `shared` load lets the runtime reuse an image that is already open. Otherwise
    /// the file is mapped and a private image is opened from its bytes.
    ///
    /// # Errors
    /// Returns [`Error::AssemblyLoad`] if the assembly can not be opened.
    pub fn get_assembly(&self, path: &str, shared: bool) -> Result<Assembly> {
        if let Some(assembly) = self.inner.assemblies.get(path) {
            return Ok(assembly.clone());
        }

        let assembly = Assembly::load(self, path, shared)?;
        self.inner
            .assemblies
            .insert(path.to_string(), assembly.clone());
        Ok(assembly)
    }

    /// Registers `assembly` under an alias for [`Domain::get_named_assembly`].
    pub fn name_assembly(&self, name: &str, assembly: &Assembly) {
        self.inner.named.insert(name.to_string(), assembly.clone());
    }

    /// An assembly registered with [`Domain::name_assembly`].
    #[must_use]
    pub fn get_named_assembly(&self, name: &str) -> Option<Assembly> {
        self.inner.named.get(name).map(|entry| entry.value().clone())
    }

    /// Every assembly loaded through this domain.
    #[must_use]
    pub fn assemblies(&self) -> Vec<Assembly> {
        self.inner
            .assemblies
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Resolves a full type name against the loaded assemblies, then the core library.
    ///
    /// Closed generic display names such as `System.Collections.Generic.List<System.Int32>`
    /// are resolved by closing the generic definition over the resolved arguments.
    /// Returns an invalid [`Type`] if nothing matches.
    ///
    /// # Errors
    /// Returns [`Error::RuntimeNotInitialized`] if no runtime is installed.
    pub fn resolve_type(&self, full_name: &str) -> Result<Type> {
        let rt = runtime::get()?;
        if let Some((definition, args)) = split_generic_name(full_name) {
            return self.resolve_generic(rt, definition, &args);
        }

        for assembly in self.assemblies() {
            let ty = assembly.get_type_full(full_name);
            if ty.valid() {
                return Ok(ty);
            }
        }
        Ok(Assembly::corlib()?.get_type_full(full_name))
    }

    fn resolve_generic(&self, rt: &dyn Runtime, definition: &str, args: &[&str]) -> Result<Type> {
        let mut classes = Vec::with_capacity(args.len());
        for arg in args {
            match self.resolve_type(arg)?.as_ptr() {
                Some(class) => classes.push(class),
                None => return Ok(Type::invalid()),
            }
        }

        let open = self.resolve_type(&format!("{definition}`{}", args.len()))?;
        let Some(open) = open.as_ptr() else {
            return Ok(Type::invalid());
        };
        Ok(Type::wrap_opt(rt, rt.class_inflate_generic(open, &classes)))
    }

    /// Allocates a managed string in this domain.
    ///
    /// # Errors
    /// Returns [`Error::RuntimeNotInitialized`] if no runtime is installed.
    pub fn new_string(&self, text: &str) -> Result<MonoString> {
        MonoString::new(self, text)
    }

    /// Sets the directories the runtime probes for assemblies, separated like `PATH`.
    ///
    /// # Errors
    /// Returns [`Error::RuntimeNotInitialized`] if no runtime is installed.
    pub fn set_assemblies_path(&self, path: &str) -> Result<()> {
        runtime::get()?.set_assemblies_path(path);
        Ok(())
    }

    /// Unloads the domain and everything loaded into it.
    ///
    /// Handles created before the unload must not be used afterwards: every metadata
    /// cache is reset, since the runtime may reuse the addresses of unloaded classes.
    ///
    /// # Errors
    /// Returns [`Error::RuntimeNotInitialized`] if no runtime is installed.
    pub fn unload(self) -> Result<()> {
        let rt = runtime::get()?;
        rt.domain_unload(self.as_ptr());
        self.inner.assemblies.clear();
        self.inner.named.clear();
        reset_all_caches();

        let mut current = try_write_lock!(CURRENT);
        if current
            .as_ref()
            .is_some_and(|domain| domain.as_ptr() == self.as_ptr())
        {
            *current = None;
        }
        tracing::debug!(name = self.name(), "unloaded domain");
        Ok(())
    }
}

impl PartialEq for Domain {
    fn eq(&self, other: &Self) -> bool {
        self.as_ptr() == other.as_ptr()
    }
}

impl Eq for Domain {}

impl std::fmt::Debug for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Domain")
            .field("name", &self.inner.name)
            .field("assemblies", &self.inner.assemblies.len())
            .finish()
    }
}

/// The current domain, see [`Domain::current`].
///
/// # Errors
/// Same as [`Domain::current`].
pub fn current_domain() -> Result<Domain> {
    Domain::current()
}

/// Makes `domain` the current domain, see [`Domain::set_current`].
///
/// # Errors
/// Same as [`Domain::set_current`].
pub fn set_current_domain(domain: &Domain) -> Result<()> {
    domain.set_current()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{emulation::ROOT_DOMAIN_NAME, test::{domain, fixture}};

    #[test]
    fn test_current_is_stable() {
        let first = domain();
        let second = current_domain().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.name(), ROOT_DOMAIN_NAME);
    }

    #[test]
    fn test_assembly_cache() {
        let domain = domain();
        let first = domain.get_assembly("Game.dll", true).unwrap();
        let second = domain.get_assembly("Game.dll", true).unwrap();
        assert_eq!(first, second);
        assert!(domain.assemblies().contains(&first));

        domain.name_assembly("game", &first);
        assert_eq!(domain.get_named_assembly("game"), Some(first));
        assert_eq!(domain.get_named_assembly("missing"), None);
    }

    #[test]
    fn test_missing_assembly() {
        let error = domain().get_assembly("NoSuchAssembly.dll", true).unwrap_err();
        assert!(matches!(error, Error::AssemblyLoad(_)));
        assert_eq!(
            error.to_string(),
            "NATIVE::Could not open assembly with path : NoSuchAssembly.dll"
        );
    }

    #[test]
    fn test_resolve_type() {
        let domain = domain();
        fixture();
        assert_eq!(
            domain.resolve_type("Game.World+Zone").unwrap().fullname(),
            "Game.World+Zone"
        );
        assert!(domain.resolve_type("System.String").unwrap().is_string());
        assert!(!domain.resolve_type("Game.Nothing").unwrap().valid());

        let list = domain
            .resolve_type("System.Collections.Generic.List<Game.Player>")
            .unwrap();
        assert!(list.is_list());
        assert_eq!(list.element_type().fullname(), "Game.Player");
        assert!(!domain
            .resolve_type("System.Collections.Generic.List<Game.Nothing>")
            .unwrap()
            .valid());
    }

    #[test]
    fn test_new_string() {
        let text = domain().new_string("hello").unwrap();
        assert_eq!(text.as_utf8(), "hello");
    }
}
