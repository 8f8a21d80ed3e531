use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use shared::{
    domain::{
        ChatIdentity, EventId, MatrixUserId, Membership, MembershipKind, RoomAlias, RoomId,
        RoomSummary, SyncState,
    },
    protocol::{SyncResponse, EVENT_TYPE_MESSAGE},
};
use signer::{codec, format_address, Address};
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    events::{events_from_sync, ChatEvent, MembershipEvent, TimelineEvent},
    homeserver::{ChatApi, HomeserverError},
    typing::{TypingRegistry, TYPING_DISPLAY, TYPING_INTERVAL},
};

const SYNC_LONG_POLL: Duration = Duration::from_secs(30);
const SYNC_BACKOFF_INITIAL: Duration = Duration::from_secs(5);
const SYNC_BACKOFF_MAX: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub typing_interval: Duration,
    pub typing_display: Duration,
    pub sync_long_poll: Duration,
    pub sync_backoff_initial: Duration,
    pub sync_backoff_max: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            typing_interval: TYPING_INTERVAL,
            typing_display: TYPING_DISPLAY,
            sync_long_poll: SYNC_LONG_POLL,
            sync_backoff_initial: SYNC_BACKOFF_INITIAL,
            sync_backoff_max: SYNC_BACKOFF_MAX,
        }
    }
}

/// A live chat message whose signature proves its sender holds `recovered`.
///
/// Published to every `subscribe_verified` receiver; nothing is kept when there are none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedMessage {
    pub room_id: RoomId,
    pub sender: MatrixUserId,
    pub recovered: Address,
    pub payload: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipAction {
    Ignored,
    Joined,
    AlreadyJoined,
    JoinFailed,
    Left,
}

#[derive(Debug)]
pub struct RoomDelivery {
    pub room_id: RoomId,
    pub result: Result<EventId, HomeserverError>,
}

/// Live connection for one chat identity: room table, keepalives, sync loop.
pub struct ChatSession {
    api: Arc<dyn ChatApi>,
    identity: ChatIdentity,
    options: SessionOptions,
    rooms: Mutex<HashMap<RoomId, RoomSummary>>,
    typing: TypingRegistry,
    sync_state: watch::Sender<SyncState>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
    verified: broadcast::Sender<VerifiedMessage>,
}

impl ChatSession {
    pub fn new(api: Arc<dyn ChatApi>, identity: ChatIdentity, options: SessionOptions) -> Arc<Self> {
        let (sync_state, _) = watch::channel(SyncState::Connecting);
        let (verified, _) = broadcast::channel(256);
        let typing = TypingRegistry::new(
            Arc::clone(&api),
            options.typing_interval,
            options.typing_display,
        );
        Arc::new(Self {
            api,
            identity,
            options,
            rooms: Mutex::new(HashMap::new()),
            typing,
            sync_state,
            sync_task: Mutex::new(None),
            verified,
        })
    }

    pub fn identity(&self) -> &ChatIdentity {
        &self.identity
    }

    pub fn user_id(&self) -> &MatrixUserId {
        &self.identity.user_id
    }

    pub fn api(&self) -> &dyn ChatApi {
        self.api.as_ref()
    }

    pub fn sync_state(&self) -> SyncState {
        *self.sync_state.borrow()
    }

    pub fn is_prepared(&self) -> bool {
        self.sync_state() == SyncState::Prepared
    }

    pub fn subscribe_verified(&self) -> broadcast::Receiver<VerifiedMessage> {
        self.verified.subscribe()
    }

    /// Joins the configured rooms, performs the initial sync and starts the live sync loop.
    ///
    /// Returns once the session is `Prepared`.
    pub async fn start(self: &Arc<Self>, aliases: &[RoomAlias]) -> Result<()> {
        for alias in aliases {
            self.join_alias(alias).await?;
        }

        let initial = self
            .sync_with_backoff(None, Duration::ZERO)
            .await
            .context("initial sync failed")?;
        self.absorb_sync(&initial, true).await;
        self.sync_state.send_replace(SyncState::Prepared);
        info!(user_id = %self.identity.user_id, "synced");

        let session = Arc::clone(self);
        let since = initial.next_batch;
        let handle = tokio::spawn(async move { session.run_sync_loop(since).await });
        *self.sync_task.lock().await = Some(handle);

        self.wait_prepared().await;
        Ok(())
    }

    pub async fn wait_prepared(&self) {
        let mut rx = self.sync_state.subscribe();
        let _ = rx.wait_for(|state| *state == SyncState::Prepared).await;
    }

    pub async fn join_alias(&self, alias: &RoomAlias) -> Result<RoomId> {
        let resolved = self
            .api
            .resolve_alias(alias)
            .await
            .with_context(|| format!("failed to resolve room alias {alias}"))?;
        let room_id = self
            .api
            .join_room(resolved.as_str())
            .await
            .with_context(|| format!("failed to join room {alias}"))?;
        self.mark_joined(&room_id, Some(alias.clone())).await;
        info!(%alias, %room_id, "joined room");
        Ok(room_id)
    }

    pub async fn leave_room(&self, room_id: &RoomId) -> Result<()> {
        self.api
            .leave_room(room_id)
            .await
            .with_context(|| format!("failed to leave room {room_id}"))?;
        self.mark_left(room_id).await;
        info!(%room_id, "left room");
        Ok(())
    }

    pub async fn joined_rooms(&self) -> Vec<RoomId> {
        let rooms = self.rooms.lock().await;
        let mut joined: Vec<RoomId> = rooms
            .values()
            .filter(|room| room.membership == Membership::Joined)
            .map(|room| room.room_id.clone())
            .collect();
        joined.sort();
        joined
    }

    pub async fn room(&self, room_id: &RoomId) -> Option<RoomSummary> {
        self.rooms.lock().await.get(room_id).cloned()
    }

    pub async fn typing_rooms(&self) -> Vec<RoomId> {
        self.typing.active_rooms().await
    }

    /// Sends `body` to every joined room in turn; a failed room does not stop the rest.
    pub async fn broadcast(&self, body: &str) -> Vec<RoomDelivery> {
        let mut deliveries = Vec::new();
        for room_id in self.joined_rooms().await {
            let result = self.api.send_text(&room_id, body).await;
            if let Err(err) = &result {
                warn!(%room_id, %err, "failed to deliver message to room");
            }
            deliveries.push(RoomDelivery { room_id, result });
        }
        deliveries
    }

    pub async fn handle_event(&self, event: ChatEvent) {
        match event {
            ChatEvent::Membership(event) => {
                self.handle_membership(&event).await;
            }
            ChatEvent::Timeline(event) => {
                self.handle_timeline(&event);
            }
        }
    }

    pub async fn handle_membership(&self, event: &MembershipEvent) -> MembershipAction {
        if event.user_id != self.identity.user_id {
            return MembershipAction::Ignored;
        }

        match event.membership {
            MembershipKind::Invite => self.accept_invite(&event.room_id).await,
            MembershipKind::Join => {
                if self.mark_joined(&event.room_id, None).await {
                    MembershipAction::Joined
                } else {
                    MembershipAction::AlreadyJoined
                }
            }
            MembershipKind::Leave | MembershipKind::Ban => {
                self.mark_left(&event.room_id).await;
                info!(room_id = %event.room_id, "no longer in room");
                MembershipAction::Left
            }
            MembershipKind::Knock | MembershipKind::Unknown => MembershipAction::Ignored,
        }
    }

    async fn accept_invite(&self, room_id: &RoomId) -> MembershipAction {
        {
            let mut rooms = self.rooms.lock().await;
            let room = rooms.entry(room_id.clone()).or_insert_with(|| RoomSummary {
                room_id: room_id.clone(),
                alias: None,
                membership: Membership::NotJoined,
            });
            if room.membership == Membership::Joined {
                debug!(%room_id, "ignoring invite for joined room");
                return MembershipAction::AlreadyJoined;
            }
            room.membership = room.membership.on_invite();
        }

        match self.api.join_room(room_id.as_str()).await {
            Ok(_) => {
                self.mark_joined(room_id, None).await;
                info!(%room_id, "auto-joined room");
                MembershipAction::Joined
            }
            Err(err) => {
                warn!(%room_id, %err, "failed to accept room invite");
                MembershipAction::JoinFailed
            }
        }
    }

    /// Verifies live messages; backfill, non-message events and unsigned traffic are dropped silently.
    pub fn handle_timeline(&self, event: &TimelineEvent) -> Option<VerifiedMessage> {
        if event.backfill || event.event_type != EVENT_TYPE_MESSAGE {
            return None;
        }
        let body = event.body.as_deref()?;
        let codec::VerifyOutcome::Valid { recovered, payload } =
            codec::verify(body, event.sender.as_str())
        else {
            return None;
        };

        debug!(
            room_id = %event.room_id,
            sender = %event.sender,
            address = %format_address(&recovered),
            "verified message"
        );
        let message = VerifiedMessage {
            room_id: event.room_id.clone(),
            sender: event.sender.clone(),
            recovered,
            payload,
        };
        let _ = self.verified.send(message.clone());
        Some(message)
    }

    /// Cancels the sync loop and every typing keepalive.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.sync_task.lock().await.take() {
            handle.abort();
        }
        self.typing.shutdown().await;
        debug!(user_id = %self.identity.user_id, "chat session shut down");
    }

    async fn absorb_sync(&self, sync: &SyncResponse, initial: bool) {
        for room_id in sync.rooms.join.keys() {
            self.mark_joined(room_id, None).await;
        }
        for event in events_from_sync(sync, initial) {
            self.handle_event(event).await;
        }
    }

    /// Returns true when the room was not joined before.
    async fn mark_joined(&self, room_id: &RoomId, alias: Option<RoomAlias>) -> bool {
        let newly_joined = {
            let mut rooms = self.rooms.lock().await;
            let room = rooms.entry(room_id.clone()).or_insert_with(|| RoomSummary {
                room_id: room_id.clone(),
                alias: None,
                membership: Membership::NotJoined,
            });
            if alias.is_some() {
                room.alias = alias;
            }
            let was_joined = room.membership == Membership::Joined;
            room.membership = room.membership.on_joined();
            !was_joined
        };
        self.typing.start(room_id).await;
        newly_joined
    }

    async fn mark_left(&self, room_id: &RoomId) {
        if let Some(room) = self.rooms.lock().await.get_mut(room_id) {
            room.membership = room.membership.on_left();
        }
        self.typing.stop(room_id).await;
    }

    async fn run_sync_loop(self: Arc<Self>, mut since: String) {
        loop {
            match self
                .sync_with_backoff(Some(&since), self.options.sync_long_poll)
                .await
            {
                Ok(batch) => {
                    self.absorb_sync(&batch, false).await;
                    since = batch.next_batch;
                }
                Err(err) => {
                    error!(%err, "sync loop stopped");
                    return;
                }
            }
        }
    }

    /// Retries transient failures with doubling delays; anything else is returned.
    async fn sync_with_backoff(
        &self,
        since: Option<&str>,
        timeout: Duration,
    ) -> Result<SyncResponse, HomeserverError> {
        let mut delay = self.options.sync_backoff_initial;
        loop {
            match self.api.sync(since, timeout).await {
                Ok(batch) => return Ok(batch),
                Err(err) if err.is_transient() => {
                    warn!(%err, delay_secs = delay.as_secs_f64(), "sync failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.options.sync_backoff_max);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some(handle) = self.sync_task.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
