//! Newtype identifiers.
//!
//! Every cross-entity reference in this engine is an id, never a borrowed or
//! owned struct (no object cycles between entities). Each entity kind gets its own
//! newtype so the compiler rejects passing a `RequirementId` where an
//! `AvailabilityId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
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

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

id_type!(PartnerId);
id_type!(PartnerDocumentId);
id_type!(CommodityId);
id_type!(RequirementId);
id_type!(AvailabilityId);
id_type!(MatchId);
id_type!(NegotiationId);
id_type!(OfferId);
id_type!(MessageId);
id_type!(OutboxId);
id_type!(AuditId);
id_type!(UserId);
id_type!(EventId);
