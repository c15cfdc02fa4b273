//! Type handles and their supporting machinery.
//!
//! # Key Components
//!
//! - [`Type`] - Value-semantic handle to one managed class
//! - [`resolve`] - Name-based type resolution with nested-name disambiguation
//! - [`type_hash`] - Stable CRC-64 hash of a full type name
//! - [`strip_namespace`] - Namespace-free rendering of generic display names
//! - [`reset_all_caches`] - Drops every memoized type and member record
//!
//! # Metadata Caches
//!
//! Types, fields, properties and methods each memoize their derived metadata per raw
//! handle. Raw handles are only unique within one runtime session: after a domain unload
//! the runtime may hand out the same address for a different class. Whoever unloads a
//! domain must call [`reset_all_caches`]; [`crate::Domain::unload`] does so.

mod cache;
mod hash;
mod names;
mod resolver;
mod ty;

pub(crate) use cache::MetaCache;
pub use hash::{crc64, type_hash};
pub use names::strip_namespace;
pub(crate) use names::split_generic_name;
pub use resolver::{resolve, resolve_in_namespace};
pub(crate) use resolver::resolve_class;
pub use ty::Type;

/// Drops the memoized metadata of every type, field, property and method.
pub fn reset_all_caches() {
    ty::TYPE_CACHE.reset();
    crate::members::reset_member_caches();
}

/// Number of memoized type records.
#[must_use]
pub fn cached_type_count() -> usize {
    ty::TYPE_CACHE.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{fixture, game_type};

    #[test]
    fn test_reset_recomputes_identical_metadata() {
        let first = game_type("Game", "Player");
        let second = fixture().game().get_type("Game", "Player");
        assert_eq!(first.name(), second.name());
        assert_eq!(first.fullname(), second.fullname());
        assert_eq!(first.hash(), second.hash());

        reset_all_caches();
        let third = game_type("Game", "Player");
        assert_eq!(first, third);
        assert_eq!(first.fullname(), third.fullname());
        assert_eq!(first.hash(), third.hash());
        assert!(cached_type_count() >= 1);
    }
}
