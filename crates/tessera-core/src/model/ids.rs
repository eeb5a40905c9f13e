//! Strongly-typed identifiers for project entities.
//!
//! Every entity in a project is addressed by a small `u64` newtype. Ids are
//! stable across renames and moves, which is what lets a [`Command`] be
//! replayed against an independent copy of the project.
//!
//! [`Command`]: crate::command::Command

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Raw numeric value.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

entity_id!(
    /// Identifies a table.
    TableId,
    "t"
);
entity_id!(
    /// Identifies a column within its table.
    ColumnId,
    "c"
);
entity_id!(
    /// Identifies a row within its table (and within variant deltas of that table).
    RowId,
    "r"
);
entity_id!(
    /// Identifies a saved view of a table.
    ViewId,
    "v"
);
entity_id!(
    /// Identifies a linked document.
    DocumentId,
    "d"
);
entity_id!(
    /// Identifies a block within its document.
    BlockId,
    "b"
);
entity_id!(
    /// Identifies a table variant. [`VariantId::DEFAULT`] is the base data.
    VariantId,
    "var"
);
entity_id!(
    /// Identifies a bound formula expression (e.g. a document binding).
    ExprId,
    "x"
);
entity_id!(
    /// Identifies one on-screen instance of a view or binding.
    InstanceId,
    "i"
);

impl VariantId {
    /// The default variant: the table's own rows, no delta applied.
    pub const DEFAULT: Self = Self(0);

    /// Returns `true` for the default variant.
    #[must_use]
    pub const fn is_default(self) -> bool {
        self.0 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_prefix() {
        assert_eq!(TableId(7).to_string(), "t7");
        assert_eq!(VariantId(3).to_string(), "var3");
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&RowId(42)).expect("serialize");
        assert_eq!(json, "42");
        let back: RowId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, RowId(42));
    }

    #[test]
    fn default_variant_is_zero() {
        assert!(VariantId::DEFAULT.is_default());
        assert!(!VariantId(1).is_default());
    }
}
