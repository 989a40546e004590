//! Entity identifiers
//!
//! Every entity gets its own ULID newtype so that a `DocumentId` can never be
//! passed where a `RequirementId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Ulid);

        impl $name {
            /// Generate a new identifier
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ulid::from_string(s).map(Self)
            }
        }
    };
}

define_id!(
    /// Project identifier
    ProjectId
);
define_id!(
    /// Uploaded document identifier
    DocumentId
);
define_id!(
    /// Requirement identifier (internal, not the user-facing code)
    RequirementId
);
define_id!(
    /// Matrix entry identifier
    MatrixEntryId
);
define_id!(
    /// User identifier
    UserId
);
define_id!(
    /// Audit row identifier
    AuditId
);
