use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::DecodeError;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self { Self(Uuid::new_v4()) }

            pub fn from_uuid(uuid: Uuid) -> Self { Self(uuid) }

            pub fn parse(s: &str) -> Result<Self, DecodeError> {
                Uuid::parse_str(s).map(Self).map_err(|_| DecodeError::InvalidUuid(s.to_string()))
            }
        }

        impl Default for $name {
            fn default() -> Self { Self::new() }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self { Self(uuid) }
        }

        impl std::str::FromStr for $name {
            type Err = DecodeError;
            fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
        }
    };
}

uuid_id!(EntityId);
uuid_id!(AttrId);
uuid_id!(TxId);
uuid_id!(ClientEventId);

/// Server-assigned session identifier. Opaque from the client's perspective
/// (spec §4.4.1): stored verbatim, never parsed or generated locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}
