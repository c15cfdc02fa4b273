//! Integration tests for type resolution and metadata queries through the public API.

mod common;

use common::{arena, arena_type, setup};
use monobridge::{prelude::*, types::type_hash};

#[test]
fn test_dotted_and_nested_names_resolve_to_the_same_type() -> Result<()> {
    let arena = arena()?;
    let stats = arena.get_type_full("Arena.Unit+Stats");
    assert!(stats.valid());
    assert_eq!(stats.fullname(), "Arena.Unit+Stats");
    assert_eq!(arena.get_type_full("Arena.Unit.Stats"), stats);
    assert_eq!(arena.get_type("Arena", "Unit.Stats"), stats);
    assert_eq!(stats.base_type().fullname(), "System.Object");
    Ok(())
}

#[test]
fn test_deep_namespace_value_type() -> Result<()> {
    let tile = arena()?.get_type_full("Arena.Maps.Tile");
    assert_eq!(tile.namespace(), "Arena.Maps");
    assert!(tile.is_valuetype());
    assert!(tile.is_struct());
    assert_eq!(tile.size(), 4);
    Ok(())
}

#[test]
fn test_unknown_names_are_invalid() -> Result<()> {
    let arena = arena()?;
    assert!(!arena.get_type_full("Arena.Nope").valid());
    assert!(!arena.get_type_full("Arena.Boss+Stats").valid());
    assert!(!arena.get_type("Arena", "").valid());
    Ok(())
}

#[test]
fn test_domain_resolves_across_assemblies() -> Result<()> {
    let domain = setup()?;
    assert_eq!(domain.resolve_type("Arena.Boss")?.fullname(), "Arena.Boss");
    assert!(domain.resolve_type("System.Double")?.is_valuetype());

    let units = domain.resolve_type("System.Collections.Generic.List<Arena.Unit>")?;
    assert!(units.is_list());
    assert_eq!(units.name(), "List<Unit>");
    assert_eq!(units.element_type(), arena_type("Arena", "Unit")?);
    Ok(())
}

#[test]
fn test_hierarchy_and_derived_types() -> Result<()> {
    let arena = arena()?;
    let unit = arena.get_type("Arena", "Unit");
    let boss = arena.get_type("Arena", "Boss");
    assert!(boss.is_derived_from(&unit));
    assert_eq!(arena.types_derived_from(&unit), vec![boss.clone()]);

    let names: Vec<String> = boss
        .methods(true)
        .iter()
        .map(|method| method.name().to_string())
        .collect();
    assert!(names.iter().any(|name| name == "Hit"));
    assert!(boss.methods(false).iter().all(|method| method.name() != "Hit"));
    Ok(())
}

#[test]
fn test_hash_is_stable_across_cache_resets() -> Result<()> {
    let unit = arena_type("Arena", "Unit")?;
    let hash = unit.hash();
    assert_eq!(hash, type_hash("Arena.Unit"));

    reset_all_caches();
    let again = arena_type("Arena", "Unit")?;
    assert_eq!(again, unit);
    assert_eq!(again.hash(), hash);
    Ok(())
}

#[test]
fn test_member_metadata() -> Result<()> {
    let unit = arena_type("Arena", "Unit")?;
    let hit = unit.method("Hit(int)")?;
    assert_eq!(hit.fullname(), "Arena.Unit:Hit (System.Int32)");
    assert_eq!(hit.visibility(), Visibility::Public);

    let tag = unit.property("Tag")?;
    assert_eq!(tag.full_declname(), "public System.String Tag");
    let backing = unit.field("<Tag>k__BackingField")?;
    assert!(backing.is_backing_field()?);
    assert_eq!(
        unit.field("mana").unwrap_err().to_string(),
        "NATIVE::Could not get field : mana for class Unit"
    );
    Ok(())
}
