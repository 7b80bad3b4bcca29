//! User-visible status channel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub at: DateTime<Utc>,
    pub connection: String,
    pub level: StatusLevel,
    pub message: String,
}

/// Broadcasts status events. Every event is logged as well, so nothing is lost when
/// nobody subscribes.
#[derive(Clone)]
pub struct StatusChannel {
    sender: broadcast::Sender<StatusEvent>,
}

impl Default for StatusChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusChannel {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, connection: &str, level: StatusLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            StatusLevel::Info => info!(connection, "{}", message),
            StatusLevel::Warning => warn!(connection, "{}", message),
            StatusLevel::Error => error!(connection, "{}", message),
        }
        // No receivers is fine
        let _ = self.sender.send(StatusEvent {
            at: Utc::now(),
            connection: connection.to_string(),
            level,
            message,
        });
    }

    pub fn info(&self, connection: &str, message: impl Into<String>) {
        self.publish(connection, StatusLevel::Info, message);
    }

    pub fn error(&self, connection: &str, message: impl Into<String>) {
        self.publish(connection, StatusLevel::Error, message);
    }
}
