use std::mem::size_of;

/// A plain-data native type whose bytes can be copied to and from managed value storage.
///
/// Primitive implementations name their corlib counterpart through
/// [`Blittable::MANAGED_NAME`]; user structs mirroring a managed struct leave it `None`
/// and are bound to the managed type at runtime, where their layout is checked against it.
///
/// ```rust,ignore
/// #[derive(Clone, Copy, Debug, PartialEq)]
/// #[repr(C)]
/// struct Vector3 {
///     x: f32,
///     y: f32,
///     z: f32,
/// }
///
/// unsafe impl Blittable for Vector3 {}
/// ```
///
/// A managed struct with alignment gaps is mirrored with explicit padding fields, so the
/// native type has no implicit padding:
///
/// ```rust,ignore
/// #[derive(Clone, Copy)]
/// #[repr(C)]
/// struct Mixed {
///     a: u8,
///     _pad: [u8; 3],
///     b: i32,
/// }
/// ```
///
/// # Safety
/// - The type must contain no padding bytes: [`Blittable::to_bytes`] copies every byte of
///   the value, and padding is uninitialized memory.
/// - Every bit pattern of `size_of::<Self>()` bytes must be a valid value, unless
///   [`Blittable::from_bytes`] is overridden to validate it.
pub unsafe trait Blittable: Copy + Send + Sync + 'static {
    /// Full name of the matching managed primitive type.
    const MANAGED_NAME: Option<&'static str> = None;

    /// Copies the value into a byte vector.
    ///
    /// Padding-free types only, see the trait's safety contract.
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; size_of::<Self>()];
        // SAFETY: the destination holds exactly size_of::<Self>() bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(
                (self as *const Self).cast::<u8>(),
                bytes.as_mut_ptr(),
                size_of::<Self>(),
            );
        }
        bytes
    }

    /// Reads a value from the leading bytes of `bytes`, `None` if there are too few.
    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < size_of::<Self>() {
            return None;
        }
        // SAFETY: length checked above, every bit pattern is valid per the trait contract.
        Some(unsafe { bytes.as_ptr().cast::<Self>().read_unaligned() })
    }
}

macro_rules! blittable_primitive {
    ($($native:ty => $managed:literal),* $(,)?) => {
        $(
            unsafe impl Blittable for $native {
                const MANAGED_NAME: Option<&'static str> = Some($managed);
            }
        )*
    };
}

blittable_primitive! {
    i8 => "System.SByte",
    u8 => "System.Byte",
    i16 => "System.Int16",
    u16 => "System.UInt16",
    i32 => "System.Int32",
    u32 => "System.UInt32",
    i64 => "System.Int64",
    u64 => "System.UInt64",
    f32 => "System.Single",
    f64 => "System.Double",
    isize => "System.IntPtr",
    usize => "System.UIntPtr",
}

unsafe impl Blittable for bool {
    const MANAGED_NAME: Option<&'static str> = Some("System.Boolean");

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes.first().map(|byte| *byte != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq)]
    #[repr(C)]
    struct Pair {
        a: i32,
        b: f32,
    }

    unsafe impl Blittable for Pair {}

    #[derive(Clone, Copy, Debug, PartialEq)]
    #[repr(C)]
    struct Mixed {
        a: u8,
        _pad0: [u8; 3],
        b: i32,
        c: i16,
        _pad1: [u8; 2],
    }

    unsafe impl Blittable for Mixed {}

    #[test]
    fn test_primitive_bytes() {
        assert_eq!(0x0102_0304i32.to_bytes(), 0x0102_0304i32.to_ne_bytes().to_vec());
        assert_eq!(i32::from_bytes(&[1, 0]), None);
        assert_eq!(bool::from_bytes(&[2]), Some(true));
        assert_eq!(bool::from_bytes(&[]), None);
        assert_eq!(f64::MANAGED_NAME, Some("System.Double"));
    }

    #[test]
    fn test_struct_bytes() {
        let pair = Pair { a: -7, b: 1.5 };
        let bytes = pair.to_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(Pair::from_bytes(&bytes), Some(pair));
        assert_eq!(Pair::MANAGED_NAME, None);
    }

    #[test]
    fn test_explicit_padding_is_copied() {
        let mixed = Mixed {
            a: 1,
            _pad0: [0; 3],
            b: -1,
            c: 2,
            _pad1: [0; 2],
        };
        let bytes = mixed.to_bytes();
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[1..4], &[0u8; 3]);
        assert_eq!(&bytes[4..8], &(-1i32).to_ne_bytes());
        assert_eq!(Mixed::from_bytes(&bytes), Some(mixed));
    }
}
