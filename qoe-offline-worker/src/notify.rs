//! Notification channel
//!
//! Every notification carries a tag. Showing a notification whose tag is
//! already on screen replaces it instead of stacking a second one.

use crate::error::WorkerError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Notification as handed to the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    pub tag: String,
    pub icon: Option<String>,
    pub renotify: bool,
}

pub trait NotificationSink: Send + Sync {
    fn show(&self, notification: &NotificationRequest) -> Result<(), WorkerError>;
    fn close(&self, tag: &str) -> Result<(), WorkerError>;
}

/// Whether a desktop notification service is reachable from this process
pub fn notification_service_available() -> bool {
    #[cfg(all(unix, not(target_os = "macos")))]
    {
        notify_rust::get_server_information().is_ok()
    }
    #[cfg(not(all(unix, not(target_os = "macos"))))]
    {
        true
    }
}

/// Server ids of live notifications per tag. Each live notification has
/// exactly one click waiter; replacing it in place keeps that waiter.
struct ClickTracker {
    live: Arc<Mutex<HashMap<String, u32>>>,
    clicks: Option<mpsc::UnboundedSender<String>>,
}

impl ClickTracker {
    fn new(clicks: Option<mpsc::UnboundedSender<String>>) -> Self {
        Self {
            live: Arc::default(),
            clicks,
        }
    }

    fn live_id(&self, tag: &str) -> Option<u32> {
        self.live.lock().get(tag).copied()
    }

    /// Record that `tag` is on screen as `id`. Returns a waiter to run unless
    /// one already watches this id.
    fn shown(&self, tag: &str, id: u32) -> Option<ClickWaiter> {
        let previous = self.live.lock().insert(tag.to_string(), id);
        if previous == Some(id) {
            return None;
        }
        self.clicks.clone().map(|clicks| ClickWaiter {
            tag: tag.to_string(),
            id,
            live: self.live.clone(),
            clicks,
        })
    }

    fn forget(&self, tag: &str) {
        self.live.lock().remove(tag);
    }
}

/// Watches one notification until it is clicked or dismissed
struct ClickWaiter {
    tag: String,
    id: u32,
    live: Arc<Mutex<HashMap<String, u32>>>,
    clicks: mpsc::UnboundedSender<String>,
}

impl ClickWaiter {
    fn on_action(&self, action: &str) {
        if action == "default" {
            let _ = self.clicks.send(self.tag.clone());
        }
    }

    /// The notification is gone; the next alert with this tag is a fresh one
    fn finish(self) {
        let mut live = self.live.lock();
        if live.get(&self.tag) == Some(&self.id) {
            live.remove(&self.tag);
        }
    }
}

/// Desktop notifications through the OS notification service
pub struct DesktopNotifier {
    app_name: String,
    tracker: ClickTracker,
}

impl DesktopNotifier {
    /// `clicks` receives the tag of each clicked notification
    pub fn new(app_name: &str, clicks: Option<mpsc::UnboundedSender<String>>) -> Self {
        Self {
            app_name: app_name.to_string(),
            tracker: ClickTracker::new(clicks),
        }
    }
}

impl NotificationSink for DesktopNotifier {
    fn show(&self, request: &NotificationRequest) -> Result<(), WorkerError> {
        let mut notification = notify_rust::Notification::new();
        notification
            .appname(&self.app_name)
            .summary(&request.title)
            .body(&request.body);
        if let Some(icon) = &request.icon {
            notification.icon(icon);
        }

        #[cfg(all(unix, not(target_os = "macos")))]
        {
            if let Some(id) = self.tracker.live_id(&request.tag) {
                notification.id(id);
            }
            notification.action("default", "Open");

            let handle = notification
                .show()
                .map_err(|e| WorkerError::Notification(e.to_string()))?;

            if let Some(waiter) = self.tracker.shown(&request.tag, handle.id()) {
                std::thread::spawn(move || {
                    handle.wait_for_action(|action| waiter.on_action(action));
                    waiter.finish();
                });
            }
        }

        #[cfg(not(all(unix, not(target_os = "macos"))))]
        {
            notification
                .show()
                .map_err(|e| WorkerError::Notification(e.to_string()))?;
        }

        debug!("notification shown (tag: {})", request.tag);
        Ok(())
    }

    fn close(&self, tag: &str) -> Result<(), WorkerError> {
        // the server dismisses a clicked notification itself
        self.tracker.forget(tag);
        Ok(())
    }
}

/// Keeps notifications in memory, one per tag. Used on headless hosts and in tests.
#[derive(Default)]
pub struct MemoryNotifier {
    visible: Mutex<Vec<NotificationRequest>>,
    shown_count: Mutex<usize>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications currently on screen
    pub fn visible(&self) -> Vec<NotificationRequest> {
        self.visible.lock().clone()
    }

    /// Total number of `show` calls
    pub fn shown_count(&self) -> usize {
        *self.shown_count.lock()
    }
}

impl NotificationSink for MemoryNotifier {
    fn show(&self, notification: &NotificationRequest) -> Result<(), WorkerError> {
        let mut visible = self.visible.lock();
        visible.retain(|n| n.tag != notification.tag);
        visible.push(notification.clone());
        *self.shown_count.lock() += 1;
        Ok(())
    }

    fn close(&self, tag: &str) -> Result<(), WorkerError> {
        self.visible.lock().retain(|n| n.tag != tag);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(title: &str, tag: &str) -> NotificationRequest {
        NotificationRequest {
            title: title.into(),
            body: "Slow link".into(),
            tag: tag.into(),
            icon: None,
            renotify: true,
        }
    }

    #[test]
    fn test_same_tag_replaces() {
        let sink = MemoryNotifier::new();
        sink.show(&alert("first", "qoe-alert")).unwrap();
        sink.show(&alert("second", "qoe-alert")).unwrap();
        sink.show(&alert("other", "qoe")).unwrap();

        let visible = sink.visible();
        assert_eq!(visible.len(), 2);
        assert!(visible.iter().any(|n| n.title == "second"));
        assert!(!visible.iter().any(|n| n.title == "first"));
        assert_eq!(sink.shown_count(), 3);
    }

    #[test]
    fn test_replaced_notification_keeps_one_click_waiter() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tracker = ClickTracker::new(Some(tx));

        let waiter = tracker.shown("qoe-alert", 7).unwrap();
        assert_eq!(tracker.live_id("qoe-alert"), Some(7));
        // same tag shown again replaces id 7 in place
        assert!(tracker.shown("qoe-alert", 7).is_none());

        waiter.on_action("default");
        waiter.finish();
        assert_eq!(rx.try_recv().unwrap(), "qoe-alert");
        assert!(rx.try_recv().is_err());
        assert_eq!(tracker.live_id("qoe-alert"), None);

        // after the click the next alert gets a new waiter
        assert!(tracker.shown("qoe-alert", 8).is_some());
    }

    #[test]
    fn test_dismissed_notification_sends_no_click() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tracker = ClickTracker::new(Some(tx));

        let waiter = tracker.shown("qoe", 3).unwrap();
        waiter.on_action("__closed");
        waiter.finish();
        assert!(rx.try_recv().is_err());
        assert_eq!(tracker.live_id("qoe"), None);
    }

    #[test]
    fn test_close_removes_tag() {
        let sink = MemoryNotifier::new();
        sink.show(&alert("first", "qoe")).unwrap();
        sink.close("qoe").unwrap();
        assert!(sink.visible().is_empty());
    }
}
