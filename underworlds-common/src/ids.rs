//! Identifiers used throughout Underworlds.
//!
//! All ids are 128-bit UUIDs on the wire, string-encoded. `Node` ordering
//! is lexicographic over the id's string form. `Ord` is derived directly on
//! the `Uuid` newtype rather than reimplemented over the string: for the
//! standard hyphenated encoding the two orderings agree byte-for-byte,
//! which `ordering_matches_string_form` below checks.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! make_id {
    {$(
        $(#[$meta:meta])*
        $vis:vis struct $ident:ident;
    )*} => {$(
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        $vis struct $ident(Uuid);

        impl $ident {
            /// Generates a new, randomly-chosen id.
            pub fn random() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $ident {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.hyphenated().fmt(f)
            }
        }

        impl std::str::FromStr for $ident {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    )*}
}

make_id! {
    /// Identifies a node. Stable for the node's lifetime.
    pub struct NodeId;

    /// Identifies a situation.
    pub struct SituationId;

    /// Identifies a client, assigned by the server at `hello`.
    pub struct ClientId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_matches_string_form() {
        let a = NodeId::random();
        let b = NodeId::random();
        assert_eq!(a.cmp(&b), a.to_string().cmp(&b.to_string()));
    }

    #[test]
    fn round_trips_through_display_and_from_str() {
        let id = NodeId::random();
        let parsed: NodeId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
