use super::*;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex as StdMutex,
};

use async_trait::async_trait;
use shared::{
    domain::{EventId, MatrixUserId, RoomAlias},
    protocol::SyncResponse,
};

use crate::homeserver::HomeserverError;

#[derive(Default)]
struct TypingRecorder {
    user_id: MatrixUserId,
    calls: StdMutex<Vec<(RoomId, bool, Duration)>>,
    fail: AtomicBool,
}

impl TypingRecorder {
    fn calls(&self) -> Vec<(RoomId, bool, Duration)> {
        self.calls.lock().expect("calls").clone()
    }

    fn count_for(&self, room_id: &RoomId) -> usize {
        self.calls().iter().filter(|(room, ..)| room == room_id).count()
    }
}

#[async_trait]
impl ChatApi for TypingRecorder {
    fn user_id(&self) -> &MatrixUserId {
        &self.user_id
    }

    async fn resolve_alias(&self, _alias: &RoomAlias) -> Result<RoomId, HomeserverError> {
        unimplemented!("not used by typing keepalives")
    }

    async fn join_room(&self, _room: &str) -> Result<RoomId, HomeserverError> {
        unimplemented!("not used by typing keepalives")
    }

    async fn leave_room(&self, _room_id: &RoomId) -> Result<(), HomeserverError> {
        unimplemented!("not used by typing keepalives")
    }

    async fn send_text(&self, _room_id: &RoomId, _body: &str) -> Result<EventId, HomeserverError> {
        unimplemented!("not used by typing keepalives")
    }

    async fn send_typing(
        &self,
        room_id: &RoomId,
        typing: bool,
        display: Duration,
    ) -> Result<(), HomeserverError> {
        self.calls
            .lock()
            .expect("calls")
            .push((room_id.clone(), typing, display));
        if self.fail.load(Ordering::SeqCst) {
            return Err(HomeserverError::Transport("offline".into()));
        }
        Ok(())
    }

    async fn set_display_name(&self, _name: &str) -> Result<(), HomeserverError> {
        unimplemented!("not used by typing keepalives")
    }

    async fn sync(
        &self,
        _since: Option<&str>,
        _timeout: Duration,
    ) -> Result<SyncResponse, HomeserverError> {
        unimplemented!("not used by typing keepalives")
    }
}

fn registry(api: &Arc<TypingRecorder>) -> TypingRegistry {
    TypingRegistry::new(api.clone(), TYPING_INTERVAL, TYPING_DISPLAY)
}

#[tokio::test(start_paused = true)]
async fn keepalive_fires_once_per_interval() {
    let api = Arc::new(TypingRecorder::default());
    let typing = registry(&api);
    let room = RoomId::new("!lobby:example.org");

    assert!(typing.start(&room).await);
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(api.calls().is_empty());

    tokio::time::sleep(Duration::from_secs(7)).await;
    let calls = api.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls
        .iter()
        .all(|call| *call == (room.clone(), true, Duration::from_secs(1))));
}

#[tokio::test(start_paused = true)]
async fn second_start_does_not_double_the_rate() {
    let api = Arc::new(TypingRecorder::default());
    let typing = registry(&api);
    let room = RoomId::new("!lobby:example.org");

    assert!(typing.start(&room).await);
    assert!(!typing.start(&room).await);
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(api.count_for(&room), 2);
    assert_eq!(typing.active_rooms().await, vec![room]);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_only_that_room() {
    let api = Arc::new(TypingRecorder::default());
    let typing = registry(&api);
    let lobby = RoomId::new("!lobby:example.org");
    let ops = RoomId::new("!ops:example.org");

    typing.start(&lobby).await;
    typing.start(&ops).await;
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(typing.stop(&lobby).await);
    assert!(!typing.stop(&lobby).await);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(api.count_for(&lobby), 1);
    assert_eq!(api.count_for(&ops), 5);
    assert_eq!(typing.active_rooms().await, vec![ops]);
}

#[tokio::test(start_paused = true)]
async fn failures_are_logged_and_keepalive_continues() {
    let api = Arc::new(TypingRecorder::default());
    api.fail.store(true, Ordering::SeqCst);
    let typing = registry(&api);
    let room = RoomId::new("!lobby:example.org");

    typing.start(&room).await;
    tokio::time::sleep(Duration::from_secs(16)).await;
    assert_eq!(api.count_for(&room), 3);
}

#[tokio::test(start_paused = true)]
async fn shutdown_and_drop_cancel_everything() {
    let api = Arc::new(TypingRecorder::default());
    let typing = registry(&api);
    let room = RoomId::new("!lobby:example.org");

    typing.start(&room).await;
    typing.shutdown().await;
    assert!(typing.active_rooms().await.is_empty());

    typing.start(&room).await;
    drop(typing);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(api.calls().is_empty());
}
