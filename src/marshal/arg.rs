use std::ffi::c_void;

use crate::{marshal::ManagedValue, runtime, types::Type};

/// Produces the pointer the runtime expects in one parameter slot declared as `declared`.
///
/// - Plain value bytes are passed by address. They are rejected for a declared reference
///   type and for a declared value type of a different size.
/// - A reference is passed as the object pointer itself, or null, when the declared type
///   is a reference type or unknown (an invalid [`Type`]).
/// - A reference passed to a value-type parameter must be a non-null boxed value whose
///   class is exactly the declared class. The slot then points at the boxed payload.
///
/// Returns `None` if the value can not be passed. The returned pointer borrows from
/// `value` (or from the boxed object) and is only valid for the call it is made for.
#[must_use]
pub fn to_mono_arg(value: &mut ManagedValue, declared: &Type) -> Option<*mut c_void> {
    match value {
        ManagedValue::Value(bytes) => {
            if declared.valid() && (!declared.is_valuetype() || declared.size() != bytes.len()) {
                return None;
            }
            Some(bytes.as_mut_ptr().cast())
        }
        ManagedValue::Object(object) => {
            if !declared.valid() || !declared.is_valuetype() {
                return Some(object.map_or(std::ptr::null_mut(), |object| object.as_ptr()));
            }

            let object = (*object)?;
            let rt = runtime::get().ok()?;
            let class = rt.object_get_class(object);
            if !rt.class_is_valuetype(class) || declared.as_ptr() != Some(class) {
                return None;
            }
            Some(rt.object_unbox(object))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        object::Object,
        test::{domain, fixture, game_type},
    };

    #[test]
    fn test_plain_value_slots() {
        let int32 = fixture().corlib().get_type("System", "Int32");
        let string = fixture().corlib().get_type("System", "String");

        let mut value = ManagedValue::Value(5i32.to_ne_bytes().to_vec());
        let slot = to_mono_arg(&mut value, &int32).unwrap();
        assert_eq!(unsafe { slot.cast::<i32>().read_unaligned() }, 5);

        assert!(to_mono_arg(&mut value, &Type::invalid()).is_some());
        assert!(to_mono_arg(&mut value, &string).is_none());
        let mut short = ManagedValue::Value(vec![1, 2]);
        assert!(to_mono_arg(&mut short, &int32).is_none());
    }

    #[test]
    fn test_reference_slots() {
        let string = fixture().corlib().get_type("System", "String");
        let domain = domain();
        let text = domain.new_string("abc").unwrap();

        let mut value = ManagedValue::Object(text.as_ptr());
        let slot = to_mono_arg(&mut value, &string).unwrap();
        assert_eq!(Some(slot), text.as_ptr().map(|object| object.as_ptr()));

        let mut null = ManagedValue::Object(None);
        assert_eq!(to_mono_arg(&mut null, &string), Some(std::ptr::null_mut()));
    }

    #[test]
    fn test_boxed_value_slots() {
        let int32 = fixture().corlib().get_type("System", "Int32");
        let single = fixture().corlib().get_type("System", "Single");
        let domain = domain();
        let boxed = Object::box_value(&domain, &int32, 41i32).unwrap();

        let mut value = ManagedValue::Object(boxed.as_ptr());
        let slot = to_mono_arg(&mut value, &int32).unwrap();
        assert_eq!(unsafe { slot.cast::<i32>().read_unaligned() }, 41);

        // No coercion between value types, and no null for a value parameter.
        assert!(to_mono_arg(&mut value, &single).is_none());
        assert!(to_mono_arg(&mut ManagedValue::Object(None), &int32).is_none());
    }

    #[test]
    fn test_reference_instance_for_value_parameter() {
        let int32 = fixture().corlib().get_type("System", "Int32");
        let domain = domain();
        let player = game_type("Game", "Player").new_instance(&domain).unwrap();

        let mut value = ManagedValue::Object(player.as_ptr());
        assert!(to_mono_arg(&mut value, &int32).is_none());
    }
}
