//! Identifier types for the coupon inventory domain.
//!
//! Identifiers are surrogate keys issued by the database (`BIGINT`), wrapped
//! so a coupon id can never be passed where a user id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! surrogate_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            #[doc = concat!("Wrap a raw database key as a `", stringify!($name), "`")]
            #[must_use]
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Get the raw database key
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

surrogate_id!(
    /// Identifier of a coupon definition
    CouponId
);

surrogate_id!(
    /// Identifier of a marketplace user
    UserId
);

surrogate_id!(
    /// Surrogate identity of an inventory record
    InventoryId
);

surrogate_id!(
    /// Identifier of a coupon granted to a user
    GrantId
);
