//! Integration tests for loading assemblies from image files on disk.

mod common;

use std::fs;

use common::{arena, arena_definition, setup};
use monobridge::{prelude::*, runtime::AssemblyReference};

#[test]
fn test_private_load_from_file() -> Result<()> {
    let domain = setup()?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("Arena.dll");
    fs::write(&path, arena_definition().manifest().to_bytes()?)?;
    let path = path.to_string_lossy().into_owned();

    let private = domain.get_assembly(&path, false)?;
    assert_eq!(private.name(), "Arena");
    assert_eq!(private.filename(), path);
    assert_ne!(private, arena()?);
    assert!(private.get_type("Arena", "Boss").valid());
    assert_ne!(private.get_type("Arena", "Boss"), arena()?.get_type("Arena", "Boss"));

    assert_eq!(domain.get_assembly(&path, false)?, private);
    Ok(())
}

#[test]
fn test_manifest_references_are_reported() -> Result<()> {
    let domain = setup()?;
    let mut manifest = arena_definition().manifest();
    manifest.references.push(AssemblyReference {
        name: "Arena.Data".to_string(),
        version: [1, 2, 3, 4],
    });

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("ArenaWithData.dll");
    fs::write(&path, manifest.to_bytes()?)?;

    let loaded = domain.get_assembly(&path.to_string_lossy(), false)?;
    assert_eq!(
        loaded.dump_references(),
        "mscorlib Version=4.0.0.0\nArena.Data Version=1.2.3.4\n"
    );
    Ok(())
}

#[test]
fn test_unreadable_files_fail_to_load() -> Result<()> {
    let domain = setup()?;
    let dir = tempfile::tempdir()?;

    let missing = dir.path().join("Missing.dll");
    let missing = missing.to_string_lossy();
    let error = domain.get_assembly(&missing, false).unwrap_err();
    assert_eq!(
        error.to_string(),
        format!("NATIVE::Could not open assembly with path : {missing}")
    );

    let garbage = dir.path().join("Garbage.dll");
    fs::write(&garbage, b"MZ\x90\x00 not an image")?;
    assert!(matches!(
        domain.get_assembly(&garbage.to_string_lossy(), false),
        Err(Error::AssemblyLoad(_))
    ));
    Ok(())
}
