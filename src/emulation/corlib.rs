//! The emulated core library.
//!
//! Defines the classes every emulated image links against: the `System.Object` root, the
//! value type roots and primitives, strings, arrays, reflection types, attributes, the
//! exception hierarchy and the open generic `System.Collections.Generic.List`1`.

use crate::{
    emulation::{
        builder::{AssemblyBuilder, ClassBuilder, FieldBuilder, MethodBuilder, PropertyBuilder},
        call::{CallResult, EmValue, NativeCall},
        heap::{ObjectPayload, POINTER_SIZE},
        metadata::ClassKind,
        EmulatedRuntime,
    },
    runtime::{flags::TypeAttributes, ClassPtr, ObjectPtr, Runtime},
};

const PRIMITIVES: &[(&str, usize)] = &[
    ("Boolean", 1),
    ("Char", 2),
    ("SByte", 1),
    ("Byte", 1),
    ("Int16", 2),
    ("UInt16", 2),
    ("Int32", 4),
    ("UInt32", 4),
    ("Int64", 8),
    ("UInt64", 8),
    ("Single", 4),
    ("Double", 8),
    ("IntPtr", POINTER_SIZE),
    ("UIntPtr", POINTER_SIZE),
];

/// `(name, parent)` pairs of the exception hierarchy below `System.Exception`.
const EXCEPTIONS: &[(&str, &str)] = &[
    ("SystemException", "System.Exception"),
    ("InvalidOperationException", "System.SystemException"),
    ("ArgumentException", "System.SystemException"),
    ("ArgumentNullException", "System.ArgumentException"),
    ("ArgumentOutOfRangeException", "System.ArgumentException"),
    ("NullReferenceException", "System.SystemException"),
    ("IndexOutOfRangeException", "System.SystemException"),
    ("NotSupportedException", "System.SystemException"),
    ("InvalidCastException", "System.SystemException"),
    ("MissingMemberException", "System.SystemException"),
    ("MissingFieldException", "System.MissingMemberException"),
    ("MissingMethodException", "System.MissingMemberException"),
];

/// Definition of `mscorlib`.
pub(crate) fn definition() -> AssemblyBuilder {
    let mut corlib = AssemblyBuilder::new("mscorlib")
        .version(4, 0, 0, 0)
        .core_library()
        .class(object_class())
        .class(
            ClassBuilder::new("System", "ValueType")
                .abstract_class()
                .serializable(),
        )
        .class(
            ClassBuilder::new("System", "Enum")
                .parent("System.ValueType")
                .abstract_class()
                .serializable(),
        )
        .class(ClassBuilder::new("System", "Void").void_type())
        .class(string_class())
        .class(array_class())
        .class(type_class())
        .class(
            ClassBuilder::new("System", "Attribute")
                .abstract_class()
                .serializable(),
        )
        .class(
            ClassBuilder::new("System.Runtime.CompilerServices", "CompilerGeneratedAttribute")
                .parent("System.Attribute")
                .sealed(),
        )
        .class(exception_class())
        .class(list_class());

    for (name, size) in PRIMITIVES {
        corlib = corlib.class(
            ClassBuilder::new("System", name)
                .primitive(*size, *size)
                .serializable(),
        );
    }
    for (name, parent) in EXCEPTIONS {
        corlib = corlib.class(
            ClassBuilder::new("System", name)
                .parent(parent)
                .serializable()
                .constructor(|_| Ok(EmValue::Void)),
        );
    }
    corlib
}

fn object_class() -> ClassBuilder {
    ClassBuilder::new("System", "Object")
        .serializable()
        .constructor(|_| Ok(EmValue::Void))
        .method(
            MethodBuilder::new("ToString")
                .returns("System.String")
                .virtual_method()
                .body(|call| {
                    let this = call.this_or_throw()?;
                    Ok(call.new_string(&call.runtime().format_object(this)))
                }),
        )
        .method(
            MethodBuilder::new("GetHashCode")
                .returns("System.Int32")
                .virtual_method()
                .body(|call| {
                    let this = call.this_or_throw()?;
                    // Identity hash folded to 32 bits.
                    let addr = this.addr() as u64;
                    Ok(EmValue::of((addr ^ (addr >> 32)) as i32))
                }),
        )
        .method(
            MethodBuilder::new("Equals")
                .param("System.Object")
                .returns("System.Boolean")
                .virtual_method()
                .body(|call| {
                    let this = call.this_or_throw()?;
                    Ok(EmValue::of(call.object(0) == Some(this)))
                }),
        )
        .method(
            MethodBuilder::new("GetType")
                .returns("System.Type")
                .body(|call| {
                    let this = call.this_or_throw()?;
                    let runtime = call.runtime();
                    let Some(domain) = runtime.domain_get().or_else(|| runtime.root_domain())
                    else {
                        return Err(call.throw("System", "InvalidOperationException", "No domain"));
                    };
                    let class = runtime.object_get_class(this);
                    Ok(EmValue::object(runtime.type_get_object(domain, class)))
                }),
        )
}

fn string_class() -> ClassBuilder {
    ClassBuilder::new("System", "String")
        .string_type()
        .serializable()
        .method(
            MethodBuilder::new("ToString")
                .returns("System.String")
                .virtual_method()
                .body(|call| Ok(EmValue::Ref(call.this()))),
        )
        .property(
            PropertyBuilder::new("Length", "System.Int32").getter(|call| {
                let this = call.this_or_throw()?;
                let len = call.runtime().string_chars(this).len();
                Ok(EmValue::of(i32::try_from(len).unwrap_or(i32::MAX)))
            }),
        )
}

fn array_class() -> ClassBuilder {
    ClassBuilder::new("System", "Array")
        .abstract_class()
        .serializable()
        .property(
            PropertyBuilder::new("Length", "System.Int32").getter(|call| {
                let this = call.this_or_throw()?;
                let len = call.runtime().array_length(this);
                Ok(EmValue::of(i32::try_from(len).unwrap_or(i32::MAX)))
            }),
        )
}

fn type_class() -> ClassBuilder {
    fn described(call: &NativeCall<'_>) -> Result<ClassPtr, ObjectPtr> {
        let this = call.this_or_throw()?;
        call.runtime()
            .reflection_type_get_class(this)
            .ok_or_else(|| call.throw("System", "InvalidCastException", "Not a type object"))
    }

    ClassBuilder::new("System", "Type")
        .flags(TypeAttributes::SERIALIZABLE)
        .property(PropertyBuilder::new("Name", "System.String").getter(|call| {
            let class = described(call)?;
            Ok(call.new_string(&call.runtime().class_name(class)))
        }))
        .property(
            PropertyBuilder::new("FullName", "System.String").getter(|call| {
                let class = described(call)?;
                Ok(call.new_string(&call.runtime().class_display_name(class)))
            }),
        )
}

fn exception_class() -> ClassBuilder {
    fn reference_field(call: &NativeCall<'_>, name: &str) -> CallResult {
        let this = call.this_or_throw()?;
        Ok(EmValue::Ref(call.field_object(this, name)?))
    }

    ClassBuilder::new("System", "Exception")
        .serializable()
        .add_field(FieldBuilder::new("_message", "System.String").private())
        .add_field(FieldBuilder::new("_source", "System.String").private())
        .add_field(FieldBuilder::new("_stackTrace", "System.String").private())
        .add_field(FieldBuilder::new("_innerException", "System.Exception").private())
        .constructor(|_| Ok(EmValue::Void))
        .property(
            PropertyBuilder::new("Message", "System.String")
                .getter(|call| reference_field(call, "_message")),
        )
        .property(
            PropertyBuilder::new("Source", "System.String")
                .getter(|call| reference_field(call, "_source"))
                .setter(|call| {
                    let this = call.this_or_throw()?;
                    call.set_field_object(this, "_source", call.object(0))?;
                    Ok(EmValue::Void)
                }),
        )
        .property(
            PropertyBuilder::new("StackTrace", "System.String")
                .getter(|call| reference_field(call, "_stackTrace")),
        )
        .property(
            PropertyBuilder::new("InnerException", "System.Exception")
                .getter(|call| reference_field(call, "_innerException")),
        )
        .method(
            MethodBuilder::new("ToString")
                .returns("System.String")
                .virtual_method()
                .body(|call| {
                    let this = call.this_or_throw()?;
                    let runtime = call.runtime();
                    let read = |name: &str| -> Result<String, ObjectPtr> {
                        Ok(call
                            .field_object(this, name)?
                            .map(|string| runtime.read_string(string))
                            .unwrap_or_default())
                    };

                    let class = runtime.class_display_name(runtime.object_get_class(this));
                    let message = read("_message")?;
                    let trace = read("_stackTrace")?;
                    let mut text = format!("{class}: {message}");
                    if !trace.is_empty() {
                        text.push('\n');
                        text.push_str(&trace);
                    }
                    Ok(call.new_string(&text))
                }),
        )
}

/// Storage state of one list instance.
struct ListState {
    items: ObjectPtr,
    size: usize,
}

fn list_state(call: &NativeCall<'_>) -> Result<(ObjectPtr, ListState), ObjectPtr> {
    let this = call.this_or_throw()?;
    let items = call
        .field_object(this, "_items")?
        .ok_or_else(|| call.throw("System", "InvalidOperationException", "List not initialized"))?;
    let size: i32 = call.field_value(this, "_size")?;
    Ok((
        this,
        ListState {
            items,
            size: usize::try_from(size).unwrap_or(0),
        },
    ))
}

fn store_list_state(
    call: &NativeCall<'_>,
    this: ObjectPtr,
    state: &ListState,
) -> Result<(), ObjectPtr> {
    call.set_field_object(this, "_items", Some(state.items))?;
    call.set_field_value(this, "_size", i32::try_from(state.size).unwrap_or(i32::MAX))?;
    let version: i32 = call.field_value(this, "_version")?;
    call.set_field_value(this, "_version", version.wrapping_add(1))
}

fn list_index(call: &NativeCall<'_>, state: &ListState, arg: usize) -> Result<usize, ObjectPtr> {
    let index: i32 = call.value(arg)?;
    match usize::try_from(index) {
        Ok(index) if index < state.size => Ok(index),
        _ => Err(call.throw(
            "System",
            "ArgumentOutOfRangeException",
            "Index was out of range. Must be non-negative and less than the size of the collection.",
        )),
    }
}

fn list_element_class(call: &NativeCall<'_>) -> Result<ClassPtr, ObjectPtr> {
    call.runtime()
        .class_generic_args(call.declaring_class())
        .first()
        .copied()
        .ok_or_else(|| call.throw("System", "InvalidOperationException", "Open generic list"))
}

fn list_class() -> ClassBuilder {
    ClassBuilder::new("System.Collections.Generic", "List")
        .generic_params(&["T"])
        .serializable()
        .add_field(FieldBuilder::new("_items", "T[]").private())
        .add_field(FieldBuilder::new("_size", "System.Int32").private())
        .add_field(FieldBuilder::new("_version", "System.Int32").private())
        .constructor(|call| {
            let this = call.this_or_throw()?;
            let element = list_element_class(call)?;
            let items = call
                .runtime()
                .alloc_array(element, 0)
                .ok_or_else(|| call.throw("System", "NotSupportedException", "Element type"))?;
            call.set_field_object(this, "_items", Some(items))?;
            Ok(EmValue::Void)
        })
        .method(MethodBuilder::new("Add").param("T").body(|call| {
            let (this, mut state) = list_state(call)?;
            let value = call.arg(0).cloned().unwrap_or(EmValue::null());
            let runtime = call.runtime();

            let capacity = runtime.array_length(state.items);
            if state.size == capacity {
                let element = list_element_class(call)?;
                state.items = runtime
                    .grow_array(state.items, element, (capacity * 2).max(4))
                    .ok_or_else(|| call.throw("System", "InvalidOperationException", "Grow"))?;
            }
            if !runtime.store_element(state.items, state.size, &value) {
                return Err(call.throw("System", "InvalidCastException", "Element type mismatch"));
            }
            state.size += 1;
            store_list_state(call, this, &state)?;
            Ok(EmValue::Void)
        }))
        .method(
            MethodBuilder::new("RemoveAt")
                .param("System.Int32")
                .body(|call| {
                    let (this, mut state) = list_state(call)?;
                    let index = list_index(call, &state, 0)?;
                    call.runtime().shift_down(state.items, index, state.size);
                    state.size -= 1;
                    store_list_state(call, this, &state)?;
                    Ok(EmValue::Void)
                }),
        )
        .method(MethodBuilder::new("Clear").body(|call| {
            let (this, mut state) = list_state(call)?;
            call.runtime().clear_elements(state.items, state.size);
            state.size = 0;
            store_list_state(call, this, &state)?;
            Ok(EmValue::Void)
        }))
        .property(
            PropertyBuilder::new("Count", "System.Int32").getter(|call| {
                let (_, state) = list_state(call)?;
                Ok(EmValue::of(i32::try_from(state.size).unwrap_or(i32::MAX)))
            }),
        )
        .property(
            PropertyBuilder::new("Item", "T")
                .indexed("System.Int32")
                .getter(|call| {
                    let (_, state) = list_state(call)?;
                    let index = list_index(call, &state, 0)?;
                    call.runtime()
                        .load_element(state.items, index)
                        .ok_or_else(|| call.throw("System", "IndexOutOfRangeException", "Item"))
                })
                .setter(|call| {
                    let (this, state) = list_state(call)?;
                    let index = list_index(call, &state, 0)?;
                    let value = call.arg(1).cloned().unwrap_or(EmValue::null());
                    if !call.runtime().store_element(state.items, index, &value) {
                        return Err(call.throw(
                            "System",
                            "InvalidCastException",
                            "Element type mismatch",
                        ));
                    }
                    store_list_state(call, this, &state)?;
                    Ok(EmValue::Void)
                }),
        )
}

/// Element-level array storage used by the collection classes.
impl EmulatedRuntime {
    pub(crate) fn load_element(&self, array: ObjectPtr, index: usize) -> Option<EmValue> {
        let object = self.heap.get(array)?;
        let ObjectPayload::Array {
            element_size,
            len,
            data,
        } = &object.payload
        else {
            return None;
        };
        if index >= *len {
            return None;
        }

        let offset = index * element_size;
        if self.element_is_value(object.class) {
            Some(EmValue::Value(data.read(offset, *element_size)))
        } else {
            Some(EmValue::Ref(data.read_ref(offset)))
        }
    }

    pub(crate) fn store_element(&self, array: ObjectPtr, index: usize, value: &EmValue) -> bool {
        let Some(object) = self.heap.get(array) else {
            return false;
        };
        let ObjectPayload::Array {
            element_size,
            len,
            data,
        } = &object.payload
        else {
            return false;
        };
        if index >= *len {
            return false;
        }

        let offset = index * element_size;
        match (value, self.element_is_value(object.class)) {
            (EmValue::Value(bytes), true) if bytes.len() == *element_size => {
                data.write(offset, bytes);
                true
            }
            (EmValue::Ref(reference), false) => {
                data.write_ref(offset, *reference);
                true
            }
            _ => false,
        }
    }

    /// Copies an array into a new array of `len` elements.
    fn grow_array(&self, array: ObjectPtr, element: ClassPtr, len: usize) -> Option<ObjectPtr> {
        let old = self.heap.get(array)?;
        let ObjectPayload::Array { data: old_data, .. } = &old.payload else {
            return None;
        };
        let grown = self.alloc_array(element, len)?;
        let new = self.heap.get(grown)?;
        if let ObjectPayload::Array { data, .. } = &new.payload {
            let count = old_data.len().min(data.len());
            data.write(0, &old_data.read(0, count));
        }
        Some(grown)
    }

    /// Moves elements `index + 1 .. size` down by one and clears the vacated slot.
    fn shift_down(&self, array: ObjectPtr, index: usize, size: usize) {
        let Some(object) = self.heap.get(array) else {
            return;
        };
        let ObjectPayload::Array {
            element_size, data, ..
        } = &object.payload
        else {
            return;
        };

        let start = (index + 1) * element_size;
        let end = size * element_size;
        if start < end {
            let tail = data.read(start, end - start);
            data.write(index * element_size, &tail);
        }
        data.write((size - 1) * element_size, &vec![0u8; *element_size]);
    }

    fn clear_elements(&self, array: ObjectPtr, size: usize) {
        if let Some(object) = self.heap.get(array) {
            if let ObjectPayload::Array {
                element_size, data, ..
            } = &object.payload
            {
                data.write(0, &vec![0u8; size * element_size]);
            }
        }
    }

    fn element_is_value(&self, array_class: ClassPtr) -> bool {
        match self.class_def(array_class).kind {
            ClassKind::Array { element, .. } => self.class_def(element).kind.is_valuetype(),
            _ => false,
        }
    }
}
