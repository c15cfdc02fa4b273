//! Property tests: native values survive a trip through their managed representation.

mod common;

use std::collections::VecDeque;

use monobridge::{
    marshal::{Blittable, ManagedValue, MonoConverter},
    prelude::*,
};
use proptest::prelude::*;

/// Native mirror of `Arena.Maps.Tile`.
#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(C)]
struct Tile {
    x: i32,
}

unsafe impl Blittable for Tile {}

fn setup() {
    common::setup().expect("arena assembly");
}

fn round_trip<T: MonoConverter>(value: &T) -> T {
    T::from_managed(value.to_managed().expect("to managed")).expect("from managed")
}

fn boxed_round_trip<T: Blittable>(ty: &Type, value: T) -> T {
    let domain = Domain::current().expect("domain");
    let boxed = Object::box_value(&domain, ty, value).expect("box");
    T::from_managed(ManagedValue::Object(boxed.as_ptr())).expect("unbox")
}

proptest! {
    #[test]
    fn test_primitives_round_trip(a in any::<i32>(), b in any::<u64>(), c in any::<i8>(), flag in any::<bool>()) {
        setup();
        prop_assert_eq!(round_trip(&a), a);
        prop_assert_eq!(round_trip(&b), b);
        prop_assert_eq!(round_trip(&c), c);
        prop_assert_eq!(round_trip(&flag), flag);
    }

    #[test]
    fn test_boxing_round_trip(a in any::<i32>(), b in any::<u64>(), c in any::<i8>(), flag in any::<bool>(), x in any::<i32>()) {
        setup();
        let corlib = Assembly::corlib().expect("corlib");
        prop_assert_eq!(boxed_round_trip(&corlib.get_type("System", "Int32"), a), a);
        prop_assert_eq!(boxed_round_trip(&corlib.get_type("System", "UInt64"), b), b);
        prop_assert_eq!(boxed_round_trip(&corlib.get_type("System", "SByte"), c), c);
        prop_assert_eq!(boxed_round_trip(&corlib.get_type("System", "Boolean"), flag), flag);

        let tile = common::arena_type("Arena.Maps", "Tile").expect("tile");
        prop_assert_eq!(boxed_round_trip(&tile, Tile { x }), Tile { x });
    }

    #[test]
    fn test_floats_round_trip_bitwise(x in any::<f64>(), y in any::<f32>()) {
        setup();
        prop_assert_eq!(round_trip(&x).to_bits(), x.to_bits());
        prop_assert_eq!(round_trip(&y).to_bits(), y.to_bits());
    }

    #[test]
    fn test_strings_round_trip(text in "\\PC{0,64}") {
        setup();
        prop_assert_eq!(round_trip(&text), text.clone());

        let managed = MonoString::new(&Domain::current().expect("domain"), &text).expect("string");
        prop_assert_eq!(managed.as_utf8(), text.clone());
        let actual_utf16 = managed.as_utf16();
        let expected_utf16 = text.encode_utf16().collect::<Vec<_>>();
        prop_assert_eq!(actual_utf16.as_slice(), expected_utf16.as_slice());
    }

    #[test]
    fn test_arrays_round_trip(values in prop::collection::vec(any::<i16>(), 0..32)) {
        setup();
        prop_assert_eq!(round_trip(&values), values.clone());
    }

    #[test]
    fn test_lists_round_trip(values in prop::collection::vec_deque(any::<u32>(), 0..16)) {
        setup();
        let back: VecDeque<u32> = round_trip(&values);
        prop_assert_eq!(back, values);
    }
}
