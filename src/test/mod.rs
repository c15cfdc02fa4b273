//! The `Game` assembly every unit test runs against.
//!
//! The assembly is registered with the shared emulated runtime and loaded into the current
//! domain once per test binary. Tests must not unload the root domain.

use std::sync::{
    atomic::{AtomicI32, Ordering},
    OnceLock,
};

use crate::{
    assembly::Assembly,
    domain::Domain,
    emulation::{
        self, AssemblyBuilder, CallResult, ClassBuilder, EmValue, FieldBuilder, MethodBuilder,
        NativeCall, PropertyBuilder,
    },
    runtime::{flags::MethodAccessFlags, Runtime},
    types::Type,
};

/// Instances of `Game.Player` constructed so far, read by `Game.Player.Total`.
static PLAYERS_CREATED: AtomicI32 = AtomicI32::new(0);

pub struct Fixture {
    corlib: Assembly,
    game: Assembly,
}

impl Fixture {
    pub fn corlib(&self) -> Assembly {
        self.corlib.clone()
    }

    pub fn game(&self) -> Assembly {
        self.game.clone()
    }
}

pub fn fixture() -> &'static Fixture {
    static FIXTURE: OnceLock<Fixture> = OnceLock::new();
    FIXTURE.get_or_init(|| {
        let runtime = emulation::shared().unwrap();
        runtime.register(game_assembly());
        let game = Domain::current()
            .unwrap()
            .get_assembly("Game.dll", true)
            .unwrap();
        Fixture {
            corlib: Assembly::corlib().unwrap(),
            game,
        }
    })
}

pub fn domain() -> Domain {
    fixture();
    Domain::current().unwrap()
}

pub fn game_type(namespace: &str, name: &str) -> Type {
    let ty = fixture().game().get_type(namespace, name);
    assert!(ty.valid(), "no fixture type {namespace}.{name}");
    ty
}

fn game_assembly() -> AssemblyBuilder {
    AssemblyBuilder::new("Game")
        .class(ClassBuilder::new("Game", "ActionAttribute").parent("System.Attribute"))
        .class(player())
        .class(actor())
        .class(enemy())
        .class(
            ClassBuilder::new("Game", "Color")
                .enumeration("System.Byte")
                .enum_value("Red", 0)
                .enum_value("Green", 1)
                .enum_value("Blue", 2),
        )
        .class(
            ClassBuilder::new("Game", "World").nested_class(
                ClassBuilder::nested("Zone").nested_class(ClassBuilder::nested("Cell")),
            ),
        )
        .class(ClassBuilder::new("Game", "Outer").nested_class(ClassBuilder::nested("Inner")))
        .class(ClassBuilder::new("Game.Outer", "Inner"))
        .class(ClassBuilder::new("Game.Systems.Physics", "Body").field("mass", "System.Single"))
        .class(ClassBuilder::new("", "Globals").static_field("seed", "System.Int32"))
        .class(ClassBuilder::new("Game", "NativeSession"))
        .class(
            ClassBuilder::new("Game", "SessionHost").method(
                MethodBuilder::new("Echo")
                    .static_method()
                    .param("Game.NativeSession")
                    .returns("Game.NativeSession")
                    .body(|call| Ok(EmValue::Ref(call.object(0)))),
            ),
        )
}

fn player() -> ClassBuilder {
    ClassBuilder::new("Game", "Player")
        .field("health", "System.Int32")
        .field("count", "System.Int32")
        .add_field(FieldBuilder::new("secret", "System.String").private())
        .add_field(FieldBuilder::new("MaxLevel", "System.Int32").constant(99i32.to_le_bytes().to_vec()))
        .static_field("motto", "System.String")
        .add_field(FieldBuilder::new("level", "System.Int32").private())
        .auto_property("Name", "System.String")
        .property(
            PropertyBuilder::new("Level", "System.Int32")
                .getter(|call| {
                    let this = call.this_or_throw()?;
                    Ok(EmValue::of(call.field_value::<i32>(this, "level")?))
                })
                .setter_with(MethodAccessFlags::PRIVATE.bits(), |call| {
                    let this = call.this_or_throw()?;
                    call.set_field_value(this, "level", call.value::<i32>(0)?)?;
                    Ok(EmValue::Void)
                }),
        )
        .property(
            PropertyBuilder::new("Total", "System.Int32")
                .static_property()
                .getter(|_| Ok(EmValue::of(PLAYERS_CREATED.load(Ordering::SeqCst)))),
        )
        .constructor(|call| {
            let this = call.this_or_throw()?;
            call.set_field_value(this, "health", 100i32)?;
            call.set_field_value(this, "count", 1i32)?;
            PLAYERS_CREATED.fetch_add(1, Ordering::SeqCst);
            Ok(EmValue::Void)
        })
        .method(
            MethodBuilder::new("Heal")
                .param("System.Int32")
                .returns("System.Int32")
                .attribute("Game.ActionAttribute")
                .body(|call| adjust_health(call, call.value::<i32>(0)?)),
        )
        .method(
            MethodBuilder::new("Damage")
                .param("System.Int32")
                .returns("System.Int32")
                .body(|call| adjust_health(call, -call.value::<i32>(0)?)),
        )
        .method(
            MethodBuilder::new("Damage")
                .param("System.Int32")
                .param("System.Single")
                .returns("System.Int32")
                .body(|call| {
                    let amount = call.value::<i32>(0)? as f32 * call.value::<f32>(1)?;
                    adjust_health(call, -(amount as i32))
                }),
        )
        .method(
            MethodBuilder::new("Create")
                .static_method()
                .param("System.String")
                .returns("Game.Player")
                .body(create_player),
        )
        .method(
            MethodBuilder::new("Explode")
                .source("/src/Game/Player.cs", 42)
                .body(|call| {
                    Err(call.throw("System", "InvalidOperationException", "player exploded"))
                }),
        )
}

fn adjust_health(call: &NativeCall<'_>, delta: i32) -> CallResult {
    let this = call.this_or_throw()?;
    let health = call.field_value::<i32>(this, "health")? + delta;
    call.set_field_value(this, "health", health)?;
    Ok(EmValue::of(health))
}

fn create_player(call: &NativeCall<'_>) -> CallResult {
    let rt = call.runtime();
    let player = rt
        .domain_get()
        .and_then(|domain| rt.object_new(domain, call.declaring_class()))
        .ok_or_else(|| call.throw("System", "InvalidOperationException", "No current domain"))?;
    rt.runtime_object_init(player)?;
    rt.write_instance_field(player, "<Name>k__BackingField", &EmValue::Ref(call.object(0)));
    Ok(EmValue::object(player))
}

fn actor() -> ClassBuilder {
    ClassBuilder::new("Game", "Actor")
        .abstract_class()
        .field("health", "System.Int32")
        .property(PropertyBuilder::new("IsAlive", "System.Boolean").getter(|call| {
            let this = call.this_or_throw()?;
            Ok(EmValue::of(call.field_value::<i32>(this, "health")? > 0))
        }))
        .method(
            MethodBuilder::new("Describe")
                .virtual_method()
                .returns("System.String")
                .body(|call| Ok(call.new_string("actor"))),
        )
}

fn enemy() -> ClassBuilder {
    ClassBuilder::new("Game", "Enemy")
        .parent("Game.Actor")
        .field("damage", "System.Int32")
        .constructor(|call| {
            let this = call.this_or_throw()?;
            call.set_field_value(this, "health", 50i32)?;
            call.set_field_value(this, "damage", 5i32)?;
            Ok(EmValue::Void)
        })
        .method(
            MethodBuilder::new("Describe")
                .virtual_method()
                .returns("System.String")
                .body(|call| Ok(call.new_string("enemy"))),
        )
        .method(
            MethodBuilder::new("Attack")
                .returns("System.Int32")
                .body(|call| {
                    let this = call.this_or_throw()?;
                    Ok(EmValue::of(call.field_value::<i32>(this, "damage")?))
                }),
        )
}
