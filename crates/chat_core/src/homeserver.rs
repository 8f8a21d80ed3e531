use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{ChatIdentity, EventId, MatrixUserId, RoomAlias, RoomId},
    protocol::{
        AuthData, AuthResponse, AvailabilityResponse, DisplayNameRequest, JoinResponse,
        LoginRequest, MatrixErrorBody, RegisterRequest, RoomAliasResponse, SendResponse,
        SyncResponse, TextMessageContent, TypingRequest, UserInteractiveAuth, EVENT_TYPE_MESSAGE,
        LOGIN_TYPE_DUMMY,
    },
};
use thiserror::Error;
use tracing::debug;
use url::Url;

const CLIENT_API_PREFIX: [&str; 3] = ["_matrix", "client", "v3"];
/// Extra time granted to the HTTP request beyond the server-side long-poll timeout.
const SYNC_REQUEST_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum HomeserverError {
    #[error("invalid homeserver url {0}")]
    InvalidUrl(String),
    #[error("homeserver returned {status}: {errcode} {message}")]
    Http {
        status: u16,
        errcode: String,
        message: String,
    },
    #[error("homeserver request failed: {0}")]
    Transport(String),
    #[error("unexpected homeserver response: {0}")]
    Decode(String),
}

impl HomeserverError {
    /// Server-side failures, rate limiting and dropped connections are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            HomeserverError::Http { status, .. } => *status >= 500 || *status == 429,
            HomeserverError::Transport(_) => true,
            HomeserverError::InvalidUrl(_) | HomeserverError::Decode(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            HomeserverError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for HomeserverError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            HomeserverError::Decode(value.to_string())
        } else {
            HomeserverError::Transport(value.to_string())
        }
    }
}

/// Unauthenticated account endpoints used while bootstrapping an identity.
#[async_trait]
pub trait Homeserver: Send + Sync {
    fn base_url(&self) -> &str;
    async fn username_available(&self, username: &str) -> Result<bool, HomeserverError>;
    async fn register(&self, username: &str, password: &str)
        -> Result<AuthResponse, HomeserverError>;
    async fn login(&self, username: &str, password: &str) -> Result<AuthResponse, HomeserverError>;
}

/// Endpoints that act on behalf of a logged-in identity.
#[async_trait]
pub trait ChatApi: Send + Sync {
    fn user_id(&self) -> &MatrixUserId;
    async fn resolve_alias(&self, alias: &RoomAlias) -> Result<RoomId, HomeserverError>;
    async fn join_room(&self, room: &str) -> Result<RoomId, HomeserverError>;
    async fn leave_room(&self, room_id: &RoomId) -> Result<(), HomeserverError>;
    async fn send_text(&self, room_id: &RoomId, body: &str) -> Result<EventId, HomeserverError>;
    async fn send_typing(
        &self,
        room_id: &RoomId,
        typing: bool,
        display: Duration,
    ) -> Result<(), HomeserverError>;
    async fn set_display_name(&self, name: &str) -> Result<(), HomeserverError>;
    async fn sync(
        &self,
        since: Option<&str>,
        timeout: Duration,
    ) -> Result<SyncResponse, HomeserverError>;
}

#[derive(Clone, Debug)]
pub struct HttpHomeserver {
    http: Client,
    base: Url,
    base_url: String,
}

impl HttpHomeserver {
    pub fn new(base_url: &str) -> Result<Self, HomeserverError> {
        let trimmed = base_url.trim_end_matches('/');
        let base = Url::parse(trimmed).map_err(|_| HomeserverError::InvalidUrl(base_url.into()))?;
        if base.cannot_be_a_base() {
            return Err(HomeserverError::InvalidUrl(base_url.into()));
        }
        Ok(Self {
            http: Client::new(),
            base,
            base_url: trimmed.to_string(),
        })
    }

    /// Client bound to the given credentials, sharing this connection pool.
    pub fn authenticated(&self, identity: &ChatIdentity) -> MatrixClient {
        MatrixClient {
            server: self.clone(),
            user_id: identity.user_id.clone(),
            access_token: identity.access_token.clone(),
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, HomeserverError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| HomeserverError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(CLIENT_API_PREFIX)
            .extend(segments);
        Ok(url)
    }

    async fn post_register(
        &self,
        request: &RegisterRequest,
    ) -> Result<Response, HomeserverError> {
        Ok(self
            .http
            .post(self.endpoint(&["register"])?)
            .json(request)
            .send()
            .await?)
    }
}

#[async_trait]
impl Homeserver for HttpHomeserver {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn username_available(&self, username: &str) -> Result<bool, HomeserverError> {
        let res = self
            .http
            .get(self.endpoint(&["register", "available"])?)
            .query(&[("username", username)])
            .send()
            .await?;
        let body: AvailabilityResponse = decode(res).await?;
        Ok(body.available)
    }

    async fn register(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AuthResponse, HomeserverError> {
        let mut request = RegisterRequest {
            username: username.to_string(),
            password: password.to_string(),
            auth: AuthData {
                kind: LOGIN_TYPE_DUMMY.to_string(),
                session: None,
            },
        };
        let res = self.post_register(&request).await?;
        if res.status() != StatusCode::UNAUTHORIZED {
            return decode(res).await;
        }

        // Dummy auth still has to be completed inside the server's UI-auth session.
        let challenge: UserInteractiveAuth = res.json().await.unwrap_or_default();
        let Some(session) = challenge.session else {
            return Err(HomeserverError::Http {
                status: StatusCode::UNAUTHORIZED.as_u16(),
                errcode: "M_UNAUTHORIZED".into(),
                message: "registration requires auth but no session was offered".into(),
            });
        };
        debug!(%username, "register: completing dummy auth stage");
        request.auth.session = Some(session);
        decode(self.post_register(&request).await?).await
    }

    async fn login(&self, username: &str, password: &str) -> Result<AuthResponse, HomeserverError> {
        let res = self
            .http
            .post(self.endpoint(&["login"])?)
            .json(&LoginRequest::password(username, password))
            .send()
            .await?;
        decode(res).await
    }
}

#[derive(Clone, Debug)]
pub struct MatrixClient {
    server: HttpHomeserver,
    user_id: MatrixUserId,
    access_token: String,
}

impl MatrixClient {
    async fn put_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<T, HomeserverError> {
        let res = self
            .server
            .http
            .put(self.server.endpoint(segments)?)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await?;
        decode(res).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<T, HomeserverError> {
        let res = self
            .server
            .http
            .post(self.server.endpoint(segments)?)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await?;
        decode(res).await
    }
}

#[async_trait]
impl ChatApi for MatrixClient {
    fn user_id(&self) -> &MatrixUserId {
        &self.user_id
    }

    async fn resolve_alias(&self, alias: &RoomAlias) -> Result<RoomId, HomeserverError> {
        let res = self
            .server
            .http
            .get(self.server.endpoint(&["directory", "room", alias.as_str()])?)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let body: RoomAliasResponse = decode(res).await?;
        Ok(body.room_id)
    }

    async fn join_room(&self, room: &str) -> Result<RoomId, HomeserverError> {
        let body: JoinResponse = self
            .post_json(&["join", room], &serde_json::json!({}))
            .await?;
        Ok(body.room_id)
    }

    async fn leave_room(&self, room_id: &RoomId) -> Result<(), HomeserverError> {
        let _: serde_json::Value = self
            .post_json(&["rooms", room_id.as_str(), "leave"], &serde_json::json!({}))
            .await?;
        Ok(())
    }

    async fn send_text(&self, room_id: &RoomId, body: &str) -> Result<EventId, HomeserverError> {
        let txn_id = uuid::Uuid::new_v4().simple().to_string();
        let res: SendResponse = self
            .put_json(
                &["rooms", room_id.as_str(), "send", EVENT_TYPE_MESSAGE, &txn_id],
                &TextMessageContent::text(body),
            )
            .await?;
        Ok(res.event_id)
    }

    async fn send_typing(
        &self,
        room_id: &RoomId,
        typing: bool,
        display: Duration,
    ) -> Result<(), HomeserverError> {
        let _: serde_json::Value = self
            .put_json(
                &["rooms", room_id.as_str(), "typing", self.user_id.as_str()],
                &TypingRequest {
                    typing,
                    timeout: display.as_millis() as u64,
                },
            )
            .await?;
        Ok(())
    }

    async fn set_display_name(&self, name: &str) -> Result<(), HomeserverError> {
        let _: serde_json::Value = self
            .put_json(
                &["profile", self.user_id.as_str(), "displayname"],
                &DisplayNameRequest {
                    displayname: name.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    async fn sync(
        &self,
        since: Option<&str>,
        timeout: Duration,
    ) -> Result<SyncResponse, HomeserverError> {
        let timeout_ms = timeout.as_millis().to_string();
        let mut query = vec![("timeout", timeout_ms.as_str())];
        if let Some(since) = since {
            query.push(("since", since));
        }
        let res = self
            .server
            .http
            .get(self.server.endpoint(&["sync"])?)
            .bearer_auth(&self.access_token)
            .query(&query)
            .timeout(timeout + SYNC_REQUEST_GRACE)
            .send()
            .await?;
        decode(res).await
    }
}

async fn decode<T: DeserializeOwned>(res: Response) -> Result<T, HomeserverError> {
    let status = res.status();
    if status.is_success() {
        return res
            .json()
            .await
            .map_err(|e| HomeserverError::Decode(e.to_string()));
    }
    let body: MatrixErrorBody = res.json().await.unwrap_or_default();
    Err(HomeserverError::Http {
        status: status.as_u16(),
        errcode: body.errcode.unwrap_or_else(|| "M_UNKNOWN".into()),
        message: body.error.unwrap_or_default(),
    })
}

#[cfg(test)]
#[path = "tests/homeserver_tests.rs"]
mod tests;
