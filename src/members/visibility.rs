use strum::{Display, EnumCount, EnumIter};

use crate::runtime::flags::{FieldAttributes, MEMBER_ACCESS_MASK};

/// Accessibility of a field, property or method.
///
/// Variants are ordered from most to least restrictive, following the ECMA-335 member
/// access values. The most restrictive of two visibilities is therefore the lesser one,
/// which is how a property's visibility is derived from its accessors.
///
/// Rendered as the C# keyword:
///
/// ```rust
/// use monobridge::Visibility;
///
/// assert_eq!(Visibility::ProtectedInternal.to_string(), "protected internal");
/// assert!(Visibility::Private < Visibility::Public);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter, EnumCount,
)]
pub enum Visibility {
    /// Accessible only by the declaring type
    #[strum(serialize = "private")]
    Private,
    /// Accessible by derived types in the same assembly
    #[strum(serialize = "private protected")]
    PrivateProtected,
    /// Accessible within the assembly
    #[strum(serialize = "internal")]
    Internal,
    /// Accessible by the declaring type and derived types
    #[strum(serialize = "protected")]
    Protected,
    /// Accessible by derived types and within the assembly
    #[strum(serialize = "protected internal")]
    ProtectedInternal,
    /// Accessible by everyone
    #[strum(serialize = "public")]
    Public,
}

impl Visibility {
    /// Decodes the access bits of a raw field or method attribute word.
    ///
    /// Compiler-controlled members are reported as private.
    #[must_use]
    pub fn from_access_flags(flags: u32) -> Self {
        match flags & MEMBER_ACCESS_MASK {
            FieldAttributes::FAM_AND_ASSEM => Visibility::PrivateProtected,
            FieldAttributes::ASSEMBLY => Visibility::Internal,
            FieldAttributes::FAMILY => Visibility::Protected,
            FieldAttributes::FAM_OR_ASSEM => Visibility::ProtectedInternal,
            FieldAttributes::PUBLIC => Visibility::Public,
            _ => Visibility::Private,
        }
    }

    /// The more restrictive of two visibilities.
    #[must_use]
    pub fn most_restrictive(self, other: Visibility) -> Visibility {
        self.min(other)
    }
}
