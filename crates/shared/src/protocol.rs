//! Client-server wire types for the subset of the Matrix API the relay speaks.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::{EventId, MatrixUserId, MembershipKind, RoomId};

pub const LOGIN_TYPE_PASSWORD: &str = "m.login.password";
pub const LOGIN_TYPE_DUMMY: &str = "m.login.dummy";
pub const IDENTIFIER_TYPE_USER: &str = "m.id.user";
pub const EVENT_TYPE_MESSAGE: &str = "m.room.message";
pub const EVENT_TYPE_MEMBER: &str = "m.room.member";
pub const MSGTYPE_TEXT: &str = "m.text";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIdentifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub identifier: UserIdentifier,
    pub password: String,
}

impl LoginRequest {
    pub fn password(username: &str, password: &str) -> Self {
        Self {
            kind: LOGIN_TYPE_PASSWORD.to_string(),
            identifier: UserIdentifier {
                kind: IDENTIFIER_TYPE_USER.to_string(),
                user: username.to_string(),
            },
            password: password.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthData {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub auth: AuthData,
}

/// Body returned by both login and register.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub user_id: Option<MatrixUserId>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub home_server: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

/// A 401 from register carrying the user-interactive auth session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInteractiveAuth {
    #[serde(default)]
    pub session: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityResponse {
    #[serde(default)]
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomAliasResponse {
    pub room_id: RoomId,
    #[serde(default)]
    pub servers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResponse {
    pub room_id: RoomId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResponse {
    pub event_id: EventId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextMessageContent {
    pub msgtype: String,
    pub body: String,
}

impl TextMessageContent {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            msgtype: MSGTYPE_TEXT.to_string(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingRequest {
    pub typing: bool,
    pub timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayNameRequest {
    pub displayname: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatrixErrorBody {
    #[serde(default)]
    pub errcode: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncResponse {
    pub next_batch: String,
    #[serde(default)]
    pub rooms: SyncRooms,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncRooms {
    #[serde(default)]
    pub join: HashMap<RoomId, JoinedRoom>,
    #[serde(default)]
    pub invite: HashMap<RoomId, InvitedRoom>,
    #[serde(default)]
    pub leave: HashMap<RoomId, LeftRoom>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinedRoom {
    #[serde(default)]
    pub timeline: Timeline,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeftRoom {
    #[serde(default)]
    pub timeline: Timeline,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvitedRoom {
    #[serde(default)]
    pub invite_state: InviteState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InviteState {
    #[serde(default)]
    pub events: Vec<RoomEvent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub events: Vec<RoomEvent>,
    #[serde(default)]
    pub limited: bool,
}

/// Timeline and stripped state events share this shape; unknown fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub sender: MatrixUserId,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberContent {
    pub membership: MembershipKind,
}
