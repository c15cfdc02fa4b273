//! Loaded assemblies.

use std::{fmt, fs::File, path::Path};

use memmap2::Mmap;

use crate::{
    domain::Domain,
    runtime::{self, AssemblyPtr, ImagePtr},
    types::{resolve, resolve_in_namespace, Type},
    Error, Result,
};

/// A loaded assembly and its image.
///
/// Type lookups never fail: a name that does not resolve yields an invalid [`Type`].
#[derive(Clone)]
pub struct Assembly {
    assembly: Option<AssemblyPtr>,
    image: ImagePtr,
    name: String,
}

impl Assembly {
    /// Loads the assembly at `path` into `domain`.
    ///
    /// Prefer [`Domain::get_assembly`], which caches loaded assemblies per path.
    ///
    /// # Errors
    /// Returns [`Error::AssemblyLoad`] if the file can not be read or is not an image the
    /// runtime understands.
    pub fn load(domain: &Domain, path: &str, shared: bool) -> Result<Self> {
        let rt = runtime::get()?;
        let load_error = || Error::AssemblyLoad(path.to_string());

        let assembly = if shared {
            rt.domain_assembly_open(domain.as_ptr(), path)
                .ok_or_else(load_error)?
        } else {
            let file = File::open(path).map_err(|error| {
                tracing::debug!(path, %error, "assembly file not readable");
                load_error()
            })?;
            // SAFETY: the mapping is read-only and dropped once the image has copied it.
            let data = unsafe { Mmap::map(&file) }.map_err(|_| load_error())?;
            let image = rt.image_open_from_data(&data, path).map_err(|_| load_error())?;
            rt.assembly_load_from(image, path).ok_or_else(load_error)?
        };

        let image = rt.assembly_image(assembly);
        let name = rt.assembly_name(assembly);
        tracing::debug!(path, name = %name, shared, "loaded assembly");
        Ok(Assembly {
            assembly: Some(assembly),
            image,
            name,
        })
    }

    /// The core library.
    ///
    /// # Errors
    /// Returns [`Error::RuntimeNotInitialized`] if no runtime is installed.
    pub fn corlib() -> Result<Self> {
        let rt = runtime::get()?;
        let image = rt.corlib();
        let filename = rt.image_filename(image);
        let name = Path::new(&filename)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&filename)
            .to_string();
        Ok(Assembly {
            assembly: None,
            image,
            name,
        })
    }

    /// The raw assembly handle, `None` for the core library.
    #[must_use]
    pub fn as_ptr(&self) -> Option<AssemblyPtr> {
        self.assembly
    }

    /// The image holding the assembly's metadata.
    #[must_use]
    pub fn image(&self) -> ImagePtr {
        self.image
    }

    /// Simple name of the assembly.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File name the image was loaded from.
    #[must_use]
    pub fn filename(&self) -> String {
        runtime::get().map_or_else(|_| String::new(), |rt| rt.image_filename(self.image))
    }

    /// Looks up a type by namespace and name.
    ///
    /// `name` may be a nested path such as `Outer+Inner` or `Outer.Inner`.
    #[must_use]
    pub fn get_type(&self, namespace: &str, name: &str) -> Type {
        resolve_in_namespace(self.image, namespace, name).unwrap_or_default()
    }

    /// Looks up a type by its full name, see [`crate::types::resolve`].
    #[must_use]
    pub fn get_type_full(&self, full_name: &str) -> Type {
        resolve(self.image, full_name).unwrap_or_default()
    }

    /// Every type defined in the assembly, nested types included.
    #[must_use]
    pub fn types(&self) -> Vec<Type> {
        let Ok(rt) = runtime::get() else {
            return Vec::new();
        };
        rt.image_types(self.image)
            .into_iter()
            .map(|class| Type::wrap(rt, class))
            .collect()
    }

    /// Every type of the assembly that derives from `base`, `base` itself excluded.
    #[must_use]
    pub fn types_derived_from(&self, base: &Type) -> Vec<Type> {
        self.types()
            .into_iter()
            .filter(|ty| ty != base && ty.is_derived_from(base))
            .collect()
    }

    /// The assembly references of the image, one `<name> Version=a.b.c.d` line each.
    #[must_use]
    pub fn dump_references(&self) -> String {
        let Ok(rt) = runtime::get() else {
            return String::new();
        };
        rt.image_references(self.image)
            .iter()
            .map(|reference| format!("{reference}\n"))
            .collect()
    }
}

impl PartialEq for Assembly {
    fn eq(&self, other: &Self) -> bool {
        self.image == other.image
    }
}

impl Eq for Assembly {}

impl fmt::Debug for Assembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Assembly({})", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{fixture, game_type};

    #[test]
    fn test_corlib() {
        fixture();
        let corlib = Assembly::corlib().unwrap();
        assert_eq!(corlib.name(), "mscorlib");
        assert!(corlib.as_ptr().is_none());
        assert!(corlib.get_type("System", "Int32").is_valuetype());
        assert!(!corlib.get_type("System", "Int128").valid());
    }

    #[test]
    fn test_nested_lookup() {
        let game = fixture().game();
        assert_eq!(game.name(), "Game");
        assert_eq!(game.get_type("Game", "World+Zone").fullname(), "Game.World+Zone");
        assert_eq!(game.get_type_full("Game.World.Zone.Cell").fullname(), "Game.World+Zone+Cell");
        assert_eq!(
            game.get_type_full("Game.Systems.Physics.Body").fullname(),
            "Game.Systems.Physics.Body"
        );
    }

    #[test]
    fn test_types_derived_from() {
        let game = fixture().game();
        let actor = game_type("Game", "Actor");
        let derived = game.types_derived_from(&actor);
        assert!(derived.contains(&game_type("Game", "Enemy")));
        assert!(!derived.contains(&actor));
        assert!(!derived.contains(&game_type("Game", "Player")));
        assert!(game.types().len() > derived.len());
    }

    #[test]
    fn test_dump_references() {
        let game = fixture().game();
        assert_eq!(game.dump_references(), "mscorlib Version=4.0.0.0\n");
        assert_eq!(Assembly::corlib().unwrap().dump_references(), "");
    }
}
