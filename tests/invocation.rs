//! Integration tests for invokers, virtual dispatch and managed exceptions.

mod common;

use common::{arena_type, setup, UNIT_SOURCE};
use monobridge::prelude::*;

#[test]
fn test_method_invoker_mutates_instance() -> Result<()> {
    let domain = setup()?;
    let unit_type = arena_type("Arena", "Unit")?;
    let unit = unit_type.new_instance(&domain)?;

    let hit = make_method_invoker::<(i32,), i32>(&unit_type, "Hit")?;
    assert_eq!(hit.invoke_on(&unit, (3,))?, 7);
    assert_eq!(hit.invoke_on(&unit, (7,))?, 0);
    assert_eq!(get_field_value::<i32>(&unit, "hp"), Some(0));
    assert_eq!(get_property_value::<bool>(&unit, "Alive"), Some(false));
    Ok(())
}

#[test]
fn test_virtual_dispatch_through_base_invoker() -> Result<()> {
    let domain = setup()?;
    let name = make_method_invoker::<(), String>(&arena_type("Arena", "Unit")?, "Name")?;

    let unit = arena_type("Arena", "Unit")?.new_instance(&domain)?;
    let boss = arena_type("Arena", "Boss")?.new_instance(&domain)?;
    assert_eq!(name.invoke_on(&unit, ())?, "unit");
    assert_eq!(name.invoke_on(&boss, ())?, "boss");
    Ok(())
}

#[test]
fn test_inherited_members_on_derived_instance() -> Result<()> {
    let domain = setup()?;
    let boss = arena_type("Arena", "Boss")?.new_instance(&domain)?;
    let hp = make_field_invoker::<i32>(&boss, "hp")?;
    assert_eq!(hp.get_on(&boss)?, 10);

    let tag = make_property_invoker::<String>(&boss, "Tag")?;
    tag.set_on(&boss, "final".to_string())?;
    assert_eq!(tag.get_on(&boss)?, "final");
    Ok(())
}

#[test]
fn test_signature_is_checked_at_construction() -> Result<()> {
    setup()?;
    let unit_type = arena_type("Arena", "Unit")?;
    assert!(matches!(
        make_method_invoker::<(String,), i32>(&unit_type, "Hit"),
        Err(Error::MemberNotFound { .. })
    ));
    assert!(matches!(
        MethodInvoker::<(i64,), i32>::from_method(unit_type.method("Hit")?, true),
        Err(Error::SignatureMismatch(_))
    ));
    assert!(matches!(
        make_property_invoker::<i32>(&unit_type, "Tag"),
        Err(Error::SignatureMismatch(_))
    ));
    Ok(())
}

#[test]
fn test_managed_exception_carries_source_frame() -> Result<()> {
    let domain = setup()?;
    let unit_type = arena_type("Arena", "Unit")?;
    let unit = unit_type.new_instance(&domain)?;
    let crash = make_method_invoker::<(), ()>(&unit_type, "Crash")?;

    let error = crash.invoke_on(&unit, ()).unwrap_err();
    let info = error.managed_exception().expect("managed exception");
    assert_eq!(info.type_name, "System.InvalidOperationException");
    assert_eq!(info.message, "unit crashed");
    assert!(info.stack_trace.contains("Arena.Unit.Crash"));
    assert!(error
        .to_string()
        .starts_with("System.InvalidOperationException(unit crashed)\n"));

    let frame = info.relevant_frame().expect("frame with a source file");
    assert_eq!(frame.file_name, UNIT_SOURCE);
    assert_eq!(frame.line, 17);
    Ok(())
}

#[test]
fn test_exception_object_round_trip() -> Result<()> {
    setup()?;
    let exception =
        monobridge::exception::create_exception("System", "ArgumentException", "bad argument")?;
    let info = ManagedExceptionInfo::from_object(&exception);
    assert_eq!(info.type_name, "System.ArgumentException");
    assert_eq!(info.message, "bad argument");
    assert_eq!(info.relevant_frame(), None);

    let raised =
        monobridge::exception::raise_exception::<()>("System", "ArgumentException", "bad argument")
            .unwrap_err();
    assert_eq!(raised.managed_exception(), Some(&info));
    Ok(())
}
