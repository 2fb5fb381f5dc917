//! # Identifiers
//!
//! Opaque 128-bit identifiers, one newtype per entity kind so that a
//! `UserId` can never be passed where a `SubAccountId` is expected.
//!
//! # Examples
//!
//! ```
//! use trade_accounts::domain::value_objects::ids::{SubAccountId, UserId};
//!
//! let user = UserId::new_v4();
//! let parsed: UserId = user.to_string().parse().unwrap();
//! assert_eq!(user, parsed);
//!
//! let sub = SubAccountId::new(user.get());
//! assert_eq!(sub.get(), user.get());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Wraps an existing UUID.
            #[inline]
            #[must_use]
            pub const fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Generates a new random (v4) identifier.
            #[must_use]
            pub fn new_v4() -> Self {
                Self(Uuid::new_v4())
            }

            /// Returns the inner UUID.
            #[inline]
            #[must_use]
            pub const fn get(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Identifier of a [`User`](crate::domain::entities::User).
    UserId
);
uuid_id!(
    /// Identifier of an [`OAuthIdentity`](crate::domain::entities::OAuthIdentity).
    OAuthIdentityId
);
uuid_id!(
    /// Identifier of an [`ExchangeBinding`](crate::domain::entities::ExchangeBinding).
    ExchangeBindingId
);
uuid_id!(
    /// Identifier of a [`Trading`](crate::domain::entities::Trading).
    TradingId
);
uuid_id!(
    /// Identifier of a [`SubAccount`](crate::domain::entities::SubAccount).
    SubAccountId
);
uuid_id!(
    /// Identifier of a [`Transaction`](crate::domain::entities::Transaction).
    TransactionId
);
uuid_id!(
    /// Identifier of a [`TradingActivityLog`](crate::domain::entities::TradingActivityLog).
    TradingLogId
);
uuid_id!(
    /// Identifier of an [`EventProcessingRecord`](crate::domain::entities::EventProcessingRecord).
    EventRecordId
);
