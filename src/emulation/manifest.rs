//! On-disk image format of the emulated runtime.
//!
//! Emulated assemblies are defined in code through
//! [`AssemblyBuilder`](crate::emulation::AssemblyBuilder); what lands on disk is a small
//! manifest naming the definition, its version and its references. Opening an image from a
//! file or from bytes parses the manifest and instantiates the registered definition.
//!
//! # Format
//!
//! ```text
//! magic      "MBIM"
//! version    u16        format version, currently 1
//! name       u16 + utf8 assembly name
//! asm ver    4 x u16    major, minor, build, revision
//! refs       u16        reference count, followed by refs
//!   name     u16 + utf8
//!   version  4 x u16
//! ```
//!
//! All integers are little-endian.

use crate::{runtime::AssemblyReference, Error, Result};

/// Magic bytes at the start of every emulated image.
pub const MANIFEST_MAGIC: &[u8; 4] = b"MBIM";

/// Current format version.
pub const MANIFEST_VERSION: u16 = 1;

/// Parsed image manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageManifest {
    /// Assembly simple name
    pub name: String,
    /// Assembly version
    pub version: [u16; 4],
    /// Referenced assemblies
    pub references: Vec<AssemblyReference>,
}

impl ImageManifest {
    /// Serializes the manifest.
    ///
    /// # Errors
    /// Returns [`Error::Error`] if a name or the reference list exceeds `u16::MAX`.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(MANIFEST_MAGIC);
        out.extend_from_slice(&MANIFEST_VERSION.to_le_bytes());
        write_str(&mut out, &self.name)?;
        write_version(&mut out, self.version);

        let count = u16::try_from(self.references.len())
            .map_err(|_| Error::Error("Too many assembly references".to_string()))?;
        out.extend_from_slice(&count.to_le_bytes());
        for reference in &self.references {
            write_str(&mut out, &reference.name)?;
            write_version(&mut out, reference.version);
        }
        Ok(out)
    }

    /// Parses a manifest.
    ///
    /// # Errors
    /// Returns [`Error::Error`] for a missing magic, an unknown format version or a
    /// truncated manifest.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut reader = Reader { data, offset: 0 };

        if reader.take(4)? != MANIFEST_MAGIC {
            return Err(Error::Error("Not an emulated image".to_string()));
        }
        let format = reader.u16()?;
        if format != MANIFEST_VERSION {
            return Err(Error::Error(format!(
                "Unsupported image format version {format}"
            )));
        }

        let name = reader.string()?;
        let version = reader.version()?;
        let count = reader.u16()?;
        let mut references = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let name = reader.string()?;
            let version = reader.version()?;
            references.push(AssemblyReference { name, version });
        }

        Ok(ImageManifest {
            name,
            version,
            references,
        })
    }
}

fn write_str(out: &mut Vec<u8>, value: &str) -> Result<()> {
    let len = u16::try_from(value.len())
        .map_err(|_| Error::Error(format!("Name too long - {value}")))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

fn write_version(out: &mut Vec<u8>, version: [u16; 4]) {
    for part in version {
        out.extend_from_slice(&part.to_le_bytes());
    }
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| Error::Error("Truncated image manifest".to_string()))?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn string(&mut self) -> Result<String> {
        let len = usize::from(self.u16()?);
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::Error("Invalid UTF-8 in image manifest".to_string()))
    }

    fn version(&mut self) -> Result<[u16; 4]> {
        Ok([self.u16()?, self.u16()?, self.u16()?, self.u16()?])
    }
}
