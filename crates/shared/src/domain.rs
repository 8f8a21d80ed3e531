use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id_newtype!(MatrixUserId);
string_id_newtype!(RoomId);
string_id_newtype!(RoomAlias);
string_id_newtype!(EventId);

/// Local view of the relay's own membership in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Membership {
    NotJoined,
    Invited,
    Joined,
}

impl Membership {
    /// An invite only moves a room we are not in yet; a joined room stays joined.
    pub fn on_invite(self) -> Self {
        match self {
            Membership::NotJoined | Membership::Invited => Membership::Invited,
            Membership::Joined => Membership::Joined,
        }
    }

    pub fn on_joined(self) -> Self {
        Membership::Joined
    }

    pub fn on_left(self) -> Self {
        Membership::NotJoined
    }
}

/// Membership value carried by `m.room.member` events on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipKind {
    Invite,
    Join,
    Leave,
    Ban,
    Knock,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Connecting,
    Prepared,
}

/// Durable chat credentials derived once per blockchain account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatIdentity {
    pub user_id: MatrixUserId,
    pub access_token: String,
    pub home_server: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub alias: Option<RoomAlias>,
    pub membership: Membership,
}
