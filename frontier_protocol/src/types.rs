// Identifier newtypes for games and clients.
//
// Both IDs are short opaque strings minted by the lobby service: exactly
// eight ASCII letters or digits. The newtypes refuse anything else at
// construction time and at deserialization time (`serde(try_from)`), so a
// `GameId` or `ClientId` value in memory is always well formed.
//
// `ClientId` is also the key of per-player maps throughout the simulation
// and relay, so it derives `Ord` and serializes as a plain JSON string
// (usable as an object key).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::validate::SchemaError;

const ID_LEN: usize = 8;

fn is_valid_id(s: &str) -> bool {
    s.len() == ID_LEN && s.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Identifier of one game session (`^[A-Za-z0-9]{8}$`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GameId(String);

/// Identifier of one client within a game (`^[A-Za-z0-9]{8}$`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientId(String);

macro_rules! id_impls {
    ($ty:ident, $field:literal) => {
        impl $ty {
            pub fn new(s: impl Into<String>) -> Result<Self, SchemaError> {
                let s = s.into();
                if is_valid_id(&s) {
                    Ok(Self(s))
                } else {
                    Err(SchemaError::invalid(
                        $field,
                        format!("{s:?} is not 8 ASCII letters or digits"),
                    ))
                }
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $ty {
            type Error = SchemaError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::new(s)
            }
        }

        impl From<$ty> for String {
            fn from(id: $ty) -> String {
                id.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_impls!(GameId, "gameID");
id_impls!(ClientId, "clientID");
