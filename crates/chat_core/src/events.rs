use shared::{
    domain::{MatrixUserId, MembershipKind, RoomId},
    protocol::{MemberContent, RoomEvent, SyncResponse, EVENT_TYPE_MEMBER},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEvent {
    pub room_id: RoomId,
    pub event_type: String,
    pub sender: MatrixUserId,
    pub body: Option<String>,
    /// Historical or paginated delivery; never verified.
    pub backfill: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipEvent {
    pub room_id: RoomId,
    pub user_id: MatrixUserId,
    pub membership: MembershipKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Timeline(TimelineEvent),
    Membership(MembershipEvent),
}

/// Flattens a sync batch into the events the session reacts to.
///
/// Everything in the initial batch is marked as backfill. A `limited`
/// timeline later on only means older events were skipped; what it carries is live. Membership changes inside backfilled timelines are
/// history and are dropped; pending invites are always reported.
pub fn events_from_sync(sync: &SyncResponse, initial: bool) -> Vec<ChatEvent> {
    let mut events = Vec::new();

    for (room_id, room) in &sync.rooms.join {
        let backfill = initial;
        for event in &room.timeline.events {
            push_room_event(&mut events, room_id, event, backfill);
        }
    }

    for (room_id, room) in &sync.rooms.invite {
        for event in &room.invite_state.events {
            if let Some(membership) = membership_event(room_id, event) {
                events.push(ChatEvent::Membership(membership));
            }
        }
    }

    for (room_id, room) in &sync.rooms.leave {
        for event in &room.timeline.events {
            if let Some(membership) = membership_event(room_id, event) {
                events.push(ChatEvent::Membership(membership));
            }
        }
    }

    events
}

fn push_room_event(events: &mut Vec<ChatEvent>, room_id: &RoomId, event: &RoomEvent, backfill: bool) {
    if event.kind == EVENT_TYPE_MEMBER {
        if let Some(membership) = membership_event(room_id, event).filter(|_| !backfill) {
            events.push(ChatEvent::Membership(membership));
        }
        return;
    }
    let body = event
        .content
        .get("body")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    events.push(ChatEvent::Timeline(TimelineEvent {
        room_id: room_id.clone(),
        event_type: event.kind.clone(),
        sender: event.sender.clone(),
        body,
        backfill,
    }));
}

fn membership_event(room_id: &RoomId, event: &RoomEvent) -> Option<MembershipEvent> {
    if event.kind != EVENT_TYPE_MEMBER {
        return None;
    }
    let state_key = event.state_key.as_deref()?;
    let content: MemberContent = serde_json::from_value(event.content.clone()).ok()?;
    Some(MembershipEvent {
        room_id: room_id.clone(),
        user_id: MatrixUserId::new(state_key),
        membership: content.membership,
    })
}

#[cfg(test)]
#[path = "tests/events_tests.rs"]
mod tests;
