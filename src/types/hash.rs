//! Stable type hashes.
//!
//! A type's hash is the CRC-64/ECMA-182 checksum of its full display name, computed with
//! the reflected polynomial, a zero initial value and no final xor. The value only depends
//! on the name, so it is stable across processes and runtime sessions.

use crc::{Algorithm, Crc};

/// CRC-64 over the ECMA-182 polynomial, reflected, without initial value or final xor.
const CRC_64_ECMA_182_REFLECTED: Algorithm<u64> = Algorithm {
    width: 64,
    poly: 0x42F0_E1EB_A9EA_3693,
    init: 0,
    refin: true,
    refout: true,
    xorout: 0,
    check: 0x2B9C_7EE4_E278_0C8A,
    residue: 0,
};

const TYPE_HASHER: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182_REFLECTED);

/// Computes the CRC-64 of a byte sequence.
#[must_use]
pub fn crc64(data: &[u8]) -> u64 {
    TYPE_HASHER.checksum(data)
}

/// Computes the hash of a type from its full display name.
///
/// ```rust
/// use monobridge::types::type_hash;
///
/// assert_eq!(type_hash("System.Int32"), type_hash("System.Int32"));
/// assert_ne!(type_hash("System.Int32"), type_hash("System.Int64"));
/// ```
#[must_use]
pub fn type_hash(full_name: &str) -> u64 {
    crc64(full_name.as_bytes())
}
