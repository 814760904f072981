//! Fire-and-forget announcements of transmutation state changes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Topic {
    #[serde(rename = "transmutation:started")]
    TransmutationStarted,
    #[serde(rename = "transmutation:updated")]
    TransmutationUpdated,
    #[serde(rename = "transmutation:cancelled")]
    TransmutationCancelled,
    #[serde(rename = "transmutation:completed")]
    TransmutationCompleted,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::TransmutationStarted => "transmutation:started",
            Topic::TransmutationUpdated => "transmutation:updated",
            Topic::TransmutationCancelled => "transmutation:cancelled",
            Topic::TransmutationCompleted => "transmutation:completed",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub topic: Topic,
    pub payload: serde_json::Value,
    pub emitted_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to encode notification payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Non-blocking notification sink. Returns how many listeners received it.
pub trait Notifier: Send + Sync {
    fn emit(&self, topic: Topic, payload: serde_json::Value) -> Result<usize, NotifyError>;
}

/// In-process fan-out over a broadcast channel. Slow subscribers lag and
/// drop old notifications rather than blocking the emitter.
pub struct NotificationHub {
    sender: broadcast::Sender<Notification>,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Notifier for NotificationHub {
    fn emit(&self, topic: Topic, payload: serde_json::Value) -> Result<usize, NotifyError> {
        let notification = Notification {
            topic,
            payload,
            emitted_at: Utc::now(),
        };
        // Sending with no subscribers is not a failure.
        Ok(self.sender.send(notification).unwrap_or(0))
    }
}
