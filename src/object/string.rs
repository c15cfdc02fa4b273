use std::fmt;

use widestring::{U16String, U32String};

use crate::{domain::Domain, object::Object, runtime::ObjectPtr, Error, Result};

/// A handle to a managed `System.String`.
///
/// Managed strings are sequences of UTF-16 code units and may contain unpaired
/// surrogates. [`MonoString::as_utf16`] returns the units unchanged, the other
/// accessors decode lossily.
#[derive(Clone, PartialEq, Eq)]
pub struct MonoString {
    object: Object,
}

impl MonoString {
    /// Allocates a string from UTF-8 text in `domain`.
    ///
    /// # Errors
    /// Returns [`Error::RuntimeNotInitialized`] if no runtime is installed.
    pub fn new(domain: &Domain, text: &str) -> Result<Self> {
        let rt = crate::runtime::get()?;
        let string = rt.string_new(domain.as_ptr(), text);
        Ok(MonoString {
            object: Object::wrap(rt, string),
        })
    }

    /// Allocates a string from UTF-16 code units in `domain`.
    ///
    /// # Errors
    /// Returns [`Error::RuntimeNotInitialized`] if no runtime is installed.
    pub fn from_utf16(domain: &Domain, units: &[u16]) -> Result<Self> {
        let rt = crate::runtime::get()?;
        let string = rt.string_new_utf16(domain.as_ptr(), units);
        Ok(MonoString {
            object: Object::wrap(rt, string),
        })
    }

    /// Views an object as a string.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] for the invalid object and [`Error::Error`] if the
    /// object is not a string.
    pub fn from_object(object: Object) -> Result<Self> {
        if !object.valid() {
            return Err(Error::InvalidHandle("string"));
        }
        if !object.get_type().is_string() {
            return Err(Error::Error(format!(
                "{} is not a string",
                object.get_type().fullname()
            )));
        }
        Ok(MonoString { object })
    }

    /// The string as an object.
    #[must_use]
    pub fn as_object(&self) -> &Object {
        &self.object
    }

    /// The raw string object.
    #[must_use]
    pub fn as_ptr(&self) -> Option<ObjectPtr> {
        self.object.as_ptr()
    }

    fn units(&self) -> Vec<u16> {
        match self.object.handle() {
            Ok((rt, string)) => rt.string_chars(string),
            Err(_) => Vec::new(),
        }
    }

    /// Number of UTF-16 code units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units().len()
    }

    /// Whether the string is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The string as UTF-8, replacing unpaired surrogates.
    #[must_use]
    pub fn as_utf8(&self) -> String {
        String::from_utf16_lossy(&self.units())
    }

    /// The UTF-16 code units.
    #[must_use]
    pub fn as_utf16(&self) -> U16String {
        U16String::from_vec(self.units())
    }

    /// The string as UTF-32, replacing unpaired surrogates.
    #[must_use]
    pub fn as_utf32(&self) -> U32String {
        U32String::from_vec(
            char::decode_utf16(self.units())
                .map(|unit| u32::from(unit.unwrap_or(char::REPLACEMENT_CHARACTER)))
                .collect::<Vec<u32>>(),
        )
    }
}

impl fmt::Display for MonoString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_utf8())
    }
}

impl fmt::Debug for MonoString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MonoString({:?})", self.as_utf8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{domain, game_type};

    #[test]
    fn test_encodings() {
        let text = MonoString::new(&domain(), "Grüße 🦀").unwrap();
        assert_eq!(text.as_utf8(), "Grüße 🦀");
        assert_eq!(text.len(), 8);
        assert_eq!(text.as_utf16().to_string_lossy(), "Grüße 🦀");
        assert_eq!(text.as_utf32().len(), 7);
        assert_eq!(text.to_string(), "Grüße 🦀");
    }

    #[test]
    fn test_unpaired_surrogate() {
        let units = [0x0041, 0xD800, 0x0042];
        let text = MonoString::from_utf16(&domain(), &units).unwrap();
        assert_eq!(text.as_utf16().as_slice(), &units);
        assert_eq!(text.as_utf8(), "A\u{FFFD}B");
    }

    #[test]
    fn test_from_object_checks_type() {
        let domain = domain();
        let text = MonoString::new(&domain, "x").unwrap();
        assert_eq!(MonoString::from_object(text.as_object().clone()).unwrap(), text);

        let player = game_type("Game", "Player").new_instance(&domain).unwrap();
        assert!(MonoString::from_object(player).is_err());
        assert!(matches!(
            MonoString::from_object(Object::invalid()),
            Err(Error::InvalidHandle("string"))
        ));
    }
}
