//! Integration tests for arrays, generic lists and GC pins.

mod common;

use std::collections::VecDeque;

use common::{arena_type, setup};
use monobridge::{gc, prelude::*};

#[test]
fn test_array_of_objects() -> Result<()> {
    let domain = setup()?;
    let unit_type = arena_type("Arena", "Unit")?;
    let units = Array::<Object>::with_element_type(&domain, &unit_type, 3)?;
    assert_eq!(units.len(), 3);
    assert_eq!(units.as_object().get_type().fullname(), "Arena.Unit[]");

    let boss = arena_type("Arena", "Boss")?.new_instance(&domain)?;
    units.set(2, boss.clone())?;
    assert_eq!(units.get(2)?, boss);
    assert!(!units.get(0)?.valid());
    assert!(units.get(3).is_err());
    Ok(())
}

#[test]
fn test_array_converts_to_vec() -> Result<()> {
    let domain = setup()?;
    let values = Array::new(&domain, &[1.5f64, -2.0, 8.25])?;
    let back = Vec::<f64>::from_managed(values.as_object().to_managed()?)?;
    assert_eq!(back, vec![1.5, -2.0, 8.25]);
    assert_eq!(values.to_vec()?, back);
    Ok(())
}

#[test]
fn test_list_operations() -> Result<()> {
    let domain = setup()?;
    let tags = List::new(&domain, &["north".to_string(), "south".to_string()])?;
    tags.add("east".to_string())?;
    assert_eq!(tags.len()?, 3);
    assert_eq!(tags.element_type().fullname(), "System.String");

    tags.set(0, "west".to_string())?;
    tags.remove_at(1)?;
    assert_eq!(tags.to_vec()?, vec!["west".to_string(), "east".to_string()]);

    let error = tags.get(5).unwrap_err();
    assert_eq!(
        error.managed_exception().map(|info| info.type_name.as_str()),
        Some("System.ArgumentOutOfRangeException")
    );

    tags.clear()?;
    assert!(tags.is_empty()?);
    Ok(())
}

#[test]
fn test_list_of_arena_objects() -> Result<()> {
    let domain = setup()?;
    let unit_type = arena_type("Arena", "Unit")?;
    let list_type = List::<Object>::list_type(&unit_type)?;
    assert_eq!(list_type.fullname(), "System.Collections.Generic.List<Arena.Unit>");

    let units = List::<Object>::from_object(list_type.new_instance(&domain)?)?;
    let unit = unit_type.new_instance(&domain)?;
    units.add(unit.clone())?;
    assert_eq!(units.get(0)?, unit);
    Ok(())
}

#[test]
fn test_deque_passes_as_list() -> Result<()> {
    setup()?;
    let queue: VecDeque<i32> = (1..=4).collect();
    let managed = queue.to_managed()?;
    let list = List::<i32>::from_object(Object::from_ptr(managed.as_object().expect("list"))?)?;
    assert_eq!(list.len()?, 4);
    assert_eq!(list.to_deque()?, queue);
    Ok(())
}

#[test]
fn test_pins_are_scoped() -> Result<()> {
    let domain = setup()?;
    let unit = arena_type("Arena", "Unit")?.new_instance(&domain)?;

    let handle = {
        let pin = pin_object(&unit)?;
        assert!(pin.is_locked());
        assert_eq!(pin.object(), unit);
        pin.handle()
    };
    assert_ne!(handle, 0);

    let hp = with_pinned(&unit, |object| get_field_value::<i32>(object, "hp"))?;
    assert_eq!(hp, Some(10));

    gc::collect(0)?;
    assert_eq!(get_field_value::<i32>(&unit, "hp"), Some(10));
    assert!(gc::heap_size()? >= gc::used_size()?);
    Ok(())
}
