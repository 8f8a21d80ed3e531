use std::{collections::HashMap, sync::Arc, time::Duration};

use shared::domain::RoomId;
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, warn};

use crate::homeserver::ChatApi;

pub const TYPING_INTERVAL: Duration = Duration::from_secs(5);
pub const TYPING_DISPLAY: Duration = Duration::from_secs(1);

/// One repeating typing notification per room, cancelled on `stop`, `shutdown` or drop.
pub struct TypingRegistry {
    api: Arc<dyn ChatApi>,
    interval: Duration,
    display: Duration,
    tasks: Mutex<HashMap<RoomId, JoinHandle<()>>>,
}

impl TypingRegistry {
    pub fn new(api: Arc<dyn ChatApi>, interval: Duration, display: Duration) -> Self {
        Self {
            api,
            interval,
            display,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns false when the room already has a running keepalive.
    pub async fn start(&self, room_id: &RoomId) -> bool {
        let mut tasks = self.tasks.lock().await;
        if tasks.get(room_id).is_some_and(|task| !task.is_finished()) {
            return false;
        }

        let api = Arc::clone(&self.api);
        let room = room_id.clone();
        let period = self.interval;
        let display = self.display;
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = api.send_typing(&room, true, display).await {
                    warn!(room_id = %room, %err, "typing notification failed");
                }
            }
        });
        tasks.insert(room_id.clone(), handle);
        debug!(%room_id, "typing keepalive started");
        true
    }

    pub async fn stop(&self, room_id: &RoomId) -> bool {
        let Some(handle) = self.tasks.lock().await.remove(room_id) else {
            return false;
        };
        handle.abort();
        debug!(%room_id, "typing keepalive stopped");
        true
    }

    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }

    pub async fn active_rooms(&self) -> Vec<RoomId> {
        let tasks = self.tasks.lock().await;
        let mut rooms: Vec<RoomId> = tasks
            .iter()
            .filter(|(_, task)| !task.is_finished())
            .map(|(room_id, _)| room_id.clone())
            .collect();
        rooms.sort();
        rooms
    }
}

impl Drop for TypingRegistry {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.get_mut().drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/typing_tests.rs"]
mod tests;
