//! Shared setup for the integration tests.
//!
//! Registers the `Arena` assembly with the emulated runtime and loads it into the current
//! domain once per test binary.

#![allow(dead_code)]

use std::sync::OnceLock;

use monobridge::{
    emulation::{self, AssemblyBuilder, ClassBuilder, EmValue, MethodBuilder, PropertyBuilder},
    Assembly, Domain, Result, Type,
};

pub const UNIT_SOURCE: &str = "/work/arena/Unit.cs";

pub fn arena_definition() -> AssemblyBuilder {
    AssemblyBuilder::new("Arena")
        .class(
            ClassBuilder::new("Arena", "Unit")
                .field("hp", "System.Int32")
                .auto_property("Tag", "System.String")
                .property(PropertyBuilder::new("Alive", "System.Boolean").getter(|call| {
                    let this = call.this_or_throw()?;
                    Ok(EmValue::of(call.field_value::<i32>(this, "hp")? > 0))
                }))
                .constructor(|call| {
                    let this = call.this_or_throw()?;
                    call.set_field_value(this, "hp", 10i32)?;
                    Ok(EmValue::Void)
                })
                .method(
                    MethodBuilder::new("Hit")
                        .param("System.Int32")
                        .returns("System.Int32")
                        .body(|call| {
                            let this = call.this_or_throw()?;
                            let hp = call.field_value::<i32>(this, "hp")? - call.value::<i32>(0)?;
                            call.set_field_value(this, "hp", hp)?;
                            Ok(EmValue::of(hp))
                        }),
                )
                .method(
                    MethodBuilder::new("Name")
                        .virtual_method()
                        .returns("System.String")
                        .body(|call| Ok(call.new_string("unit"))),
                )
                .method(
                    MethodBuilder::new("Crash")
                        .source(UNIT_SOURCE, 17)
                        .body(|call| {
                            Err(call.throw("System", "InvalidOperationException", "unit crashed"))
                        }),
                )
                .nested_class(ClassBuilder::nested("Stats").field("level", "System.Int32")),
        )
        .class(
            ClassBuilder::new("Arena", "Boss").parent("Arena.Unit").method(
                MethodBuilder::new("Name")
                    .virtual_method()
                    .returns("System.String")
                    .body(|call| Ok(call.new_string("boss"))),
            ),
        )
        .class(ClassBuilder::new("Arena.Maps", "Tile").value_type().field("x", "System.Int32"))
}

pub fn arena() -> Result<Assembly> {
    static LOADED: OnceLock<()> = OnceLock::new();
    if LOADED.get().is_none() {
        emulation::shared()?.register(arena_definition());
        let _ = LOADED.set(());
    }
    Domain::current()?.get_assembly("Arena.dll", true)
}

/// Installs the runtime, loads `Arena` and returns the current domain.
///
/// Call first in every test: nothing else installs the runtime.
pub fn setup() -> Result<Domain> {
    arena()?;
    Domain::current()
}

pub fn arena_type(namespace: &str, name: &str) -> Result<Type> {
    Ok(arena()?.get_type(namespace, name))
}
