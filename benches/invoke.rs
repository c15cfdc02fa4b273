#![allow(unused)]
extern crate monobridge;

use criterion::{criterion_group, criterion_main, Criterion};
use monobridge::{
    emulation::{self, AssemblyBuilder, ClassBuilder, EmValue, MethodBuilder},
    prelude::*,
};
use std::hint::black_box;

fn bench_assembly() -> Assembly {
    let runtime = emulation::shared().expect("emulated runtime");
    runtime.register(
        AssemblyBuilder::new("Bench").class(
            ClassBuilder::new("Bench.Deep.Namespace", "Counter")
                .field("value", "System.Int32")
                .method(
                    MethodBuilder::new("Add")
                        .param("System.Int32")
                        .returns("System.Int32")
                        .body(|call| {
                            let this = call.this_or_throw()?;
                            let value = call
                                .field_value::<i32>(this, "value")?
                                .wrapping_add(call.value::<i32>(0)?);
                            call.set_field_value(this, "value", value)?;
                            Ok(EmValue::of(value))
                        }),
                )
                .nested_class(ClassBuilder::nested("Inner").nested_class(ClassBuilder::nested("Leaf"))),
        ),
    );
    Domain::current()
        .and_then(|domain| domain.get_assembly("Bench.dll", true))
        .expect("bench assembly")
}

/// Benchmark name-based type resolution
///
/// Dotted names are ambiguous between namespaces and nesting; the resolver tries every
/// split, so deep names are the expensive case.
fn bench_type_resolution(c: &mut Criterion) {
    let assembly = bench_assembly();

    let mut group = c.benchmark_group("type_resolution");
    group.bench_function("namespaced", |b| {
        b.iter(|| black_box(assembly.get_type_full(black_box("Bench.Deep.Namespace.Counter"))));
    });
    group.bench_function("nested_plus", |b| {
        b.iter(|| {
            black_box(assembly.get_type_full(black_box("Bench.Deep.Namespace.Counter+Inner+Leaf")))
        });
    });
    group.bench_function("nested_dotted", |b| {
        b.iter(|| {
            black_box(assembly.get_type_full(black_box("Bench.Deep.Namespace.Counter.Inner.Leaf")))
        });
    });
    group.finish();
}

/// Benchmark invoker construction and calls
///
/// Construction resolves and checks the signature once; a call only marshals values.
fn bench_invocation(c: &mut Criterion) {
    let assembly = bench_assembly();
    let domain = Domain::current().expect("domain");
    let counter_type = assembly.get_type("Bench.Deep.Namespace", "Counter");
    let counter = counter_type.new_instance(&domain).expect("counter");

    let mut group = c.benchmark_group("invocation");
    group.bench_function("make_method_invoker", |b| {
        b.iter(|| black_box(make_method_invoker::<(i32,), i32>(&counter_type, "Add").unwrap()));
    });

    let add = make_method_invoker::<(i32,), i32>(&counter_type, "Add").expect("Add");
    group.bench_function("invoke_on", |b| {
        b.iter(|| black_box(add.invoke_on(&counter, (black_box(1),)).unwrap()));
    });

    let value = make_field_invoker::<i32>(&counter_type, "value").expect("value");
    group.bench_function("field_get_on", |b| {
        b.iter(|| black_box(value.get_on(&counter).unwrap()));
    });
    group.finish();
}

criterion_group!(benches, bench_type_resolution, bench_invocation);
criterion_main!(benches);
