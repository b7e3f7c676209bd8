use crate::lan::proto::TaskComplete;
use crate::lan::service::{LanService, SubscriptionId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Title used when a completed task has an empty one.
pub const FALLBACK_TASK_TITLE: &str = "Completed task";

const NOTIFY_TITLE: &str = "Task completed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

/// The fields of a task that matter for completion broadcasts, captured
/// before and after an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: i64,
    pub title: String,
    pub status: TaskStatus,
}

/// A broadcast fires only on the edge into `Done`. Updates that keep a task
/// done, or where either side of the update is missing, stay silent.
pub fn should_broadcast_completion(before: Option<&TaskSnapshot>, after: Option<&TaskSnapshot>) -> bool {
    match (before, after) {
        (Some(before), Some(after)) => {
            before.status != TaskStatus::Done && after.status == TaskStatus::Done
        }
        _ => false,
    }
}

/// Task id and title to announce for this update, if it completed the task.
pub fn completion_broadcast_title(
    before: Option<&TaskSnapshot>,
    after: Option<&TaskSnapshot>,
) -> Option<(i64, String)> {
    if !should_broadcast_completion(before, after) {
        return None;
    }
    let after = after?;
    let title =
        if after.title.is_empty() { FALLBACK_TASK_TITLE.to_string() } else { after.title.clone() };
    Some((after.id, title))
}

/// Hook for the task-update path. Sends the completion announcement when the
/// update crossed into `Done` and returns whether one went out. Send errors
/// are logged and swallowed so a failed broadcast never fails the update.
pub async fn maybe_broadcast_task_complete(
    service: &LanService,
    before: Option<&TaskSnapshot>,
    after: Option<&TaskSnapshot>,
) -> bool {
    let Some((task_id, title)) = completion_broadcast_title(before, after) else {
        return false;
    };
    match service.send_task_complete(task_id, &title).await {
        Ok(()) => true,
        Err(error) => {
            warn!("failed to broadcast completion of task {task_id}: {error}");
            false
        }
    }
}

/// Something that can surface a desktop-style notification.
pub trait Notifier {
    fn notify(&self, title: &str, body: &str);
    fn beep(&self);
}

/// Wire peer completion announcements to `notifier`. Returns the handle to
/// detach with [`LanService::off_task_complete`].
pub fn notify_on_task_complete(
    service: &LanService,
    notifier: Arc<dyn Notifier + Send + Sync>,
) -> SubscriptionId {
    service.on_task_complete(move |msg: &TaskComplete| {
        let body = format!("{} finished task \"{}\"", msg.from_name, msg.task_title);
        notifier.notify(NOTIFY_TITLE, &body);
        notifier.beep();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::lan::presence::PresenceRegistry;
    use crate::metrics::Metrics;
    use crate::store::MessageStore;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snapshot(id: i64, title: &str, status: TaskStatus) -> TaskSnapshot {
        TaskSnapshot { id, title: title.to_string(), status }
    }

    fn test_service(device_id: &str) -> Arc<LanService> {
        let config = Config::new(device_id.to_string(), "Tester".to_string());
        let presence = Arc::new(PresenceRegistry::new(config.offline_after_ms));
        let store = Arc::new(MessageStore::open_in_memory().unwrap());
        let metrics = Arc::new(Metrics::new());
        Arc::new(LanService::new(config, presence, store, metrics))
    }

    #[test]
    fn test_broadcast_fires_only_on_edge_into_done() {
        let todo = snapshot(7, "ship it", TaskStatus::Todo);
        let doing = snapshot(7, "ship it", TaskStatus::InProgress);
        let done = snapshot(7, "ship it", TaskStatus::Done);

        assert_eq!(
            completion_broadcast_title(Some(&doing), Some(&done)),
            Some((7, "ship it".to_string()))
        );
        assert_eq!(
            completion_broadcast_title(Some(&todo), Some(&done)),
            Some((7, "ship it".to_string()))
        );
        assert_eq!(completion_broadcast_title(Some(&doing), Some(&doing)), None);
        assert_eq!(completion_broadcast_title(Some(&done), Some(&done)), None);
        assert_eq!(completion_broadcast_title(Some(&done), Some(&doing)), None);
        assert_eq!(completion_broadcast_title(None, Some(&done)), None);
        assert_eq!(completion_broadcast_title(Some(&doing), None), None);
        assert_eq!(completion_broadcast_title(None, None), None);
    }

    #[test]
    fn test_empty_title_gets_fallback() {
        let before = snapshot(3, "", TaskStatus::InProgress);
        let after = snapshot(3, "", TaskStatus::Done);
        assert_eq!(
            completion_broadcast_title(Some(&before), Some(&after)),
            Some((3, FALLBACK_TASK_TITLE.to_string()))
        );
    }

    #[tokio::test]
    async fn test_maybe_broadcast_swallows_send_failure() {
        let service = test_service("me");
        let before = snapshot(1, "t", TaskStatus::Todo);
        let after = snapshot(1, "t", TaskStatus::Done);
        // not started, so the send fails; that must not bubble up
        assert!(!maybe_broadcast_task_complete(&service, Some(&before), Some(&after)).await);
        assert!(!maybe_broadcast_task_complete(&service, Some(&after), Some(&after)).await);
    }

    struct RecordingNotifier {
        notifications: Mutex<Vec<(String, String)>>,
        beeps: AtomicUsize,
    }

    impl RecordingNotifier {
        fn new() -> Self {
            Self { notifications: Mutex::new(Vec::new()), beeps: AtomicUsize::new(0) }
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, title: &str, body: &str) {
            self.notifications.lock().unwrap().push((title.to_string(), body.to_string()));
        }

        fn beep(&self) {
            self.beeps.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[tokio::test]
    async fn test_peer_completion_raises_notification() {
        let service = test_service("me");
        let notifier = Arc::new(RecordingNotifier::new());
        notify_on_task_complete(&service, notifier.clone());

        let src: SocketAddr = "192.168.1.20:53210".parse().unwrap();
        let own = br#"{"type":"task-complete","from":"me","fromName":"Me","taskId":1,"taskTitle":"mine","ts":5}"#;
        service.handle_datagram(own, src);
        let peer = br#"{"type":"task-complete","from":"peer","fromName":"Bob","taskId":2,"taskTitle":"deploy","ts":6}"#;
        service.handle_datagram(peer, src);

        let notifications = notifier.notifications.lock().unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].0, "Task completed");
        assert_eq!(notifications[0].1, "Bob finished task \"deploy\"");
        assert_eq!(notifier.beeps.load(Ordering::Relaxed), 1);
    }
}
