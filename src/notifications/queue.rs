//! Disk-backed outage queue (spec §4.5, §6 "Notification queue file (JSON)").

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::notifications::EventKind;
use crate::persistence::atomic::write_atomically;

/// One message that could not be delivered synchronously.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationQueueItem {
    /// Destination id the message is addressed to.
    pub recipient: String,
    /// Event kind that produced the message.
    pub event_kind: EventKind,
    /// Rendered message body.
    pub body: String,
    /// When the message was first attempted.
    pub enqueued_at: DateTime<Utc>,
}

/// The outage queue file: a JSON array of [`NotificationQueueItem`], appended
/// to on delivery failure and drained front-to-back on recovery (spec §8
/// property 7: "Queue ordering").
#[derive(Debug, Clone, Default)]
pub struct NotificationQueue {
    path: PathBuf,
    items: Vec<NotificationQueueItem>,
}

impl NotificationQueue {
    /// Load the queue from `path`, or start empty if it does not exist yet
    /// (spec §4.5: "Queue survives process restart: it is read on startup").
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is not valid JSON.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let items = match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text)
                .with_context(|| format!("parsing notification queue {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e).with_context(|| format!("reading queue {}", path.display())),
        };
        Ok(Self { path, items })
    }

    /// Append one item and persist.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn push(&mut self, item: NotificationQueueItem) -> Result<()> {
        self.items.push(item);
        self.persist().await
    }

    /// True when the queue has undelivered messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Queued items in enqueue order, oldest first.
    #[must_use]
    pub fn items(&self) -> &[NotificationQueueItem] {
        &self.items
    }

    /// Remove the oldest `count` items and persist the remainder.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn pop_front(&mut self, count: usize) -> Result<()> {
        self.items.drain(0..count.min(self.items.len()));
        self.persist().await
    }

    async fn persist(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.items)?;
        write_atomically(&self.path, &json).await
    }

    /// Default path for the notification queue file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        Path::new("ttslo_notification_queue.json").to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let mut queue = NotificationQueue::load(path.clone()).await.unwrap();
        queue
            .push(NotificationQueueItem {
                recipient: "123".to_owned(),
                event_kind: EventKind::TslFilled,
                body: "filled".to_owned(),
                enqueued_at: Utc::now(),
            })
            .await
            .unwrap();

        let reloaded = NotificationQueue::load(path).await.unwrap();
        assert_eq!(reloaded.items().len(), 1);
        assert_eq!(reloaded.items()[0].recipient, "123");
    }

    #[tokio::test]
    async fn pop_front_preserves_remaining_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let mut queue = NotificationQueue::load(path).await.unwrap();
        for i in 0..3 {
            queue
                .push(NotificationQueueItem {
                    recipient: i.to_string(),
                    event_kind: EventKind::ApiError,
                    body: format!("msg {i}"),
                    enqueued_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        queue.pop_front(2).await.unwrap();
        assert_eq!(queue.items().len(), 1);
        assert_eq!(queue.items()[0].recipient, "2");
    }
}
