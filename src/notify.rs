//! Notification sink (C7): fire-and-forget status/heartbeat/recovery events.
//!
//! The core never depends on a concrete transport. `NotificationSink` is the
//! seam; `BroadcastSink` is the one in-process implementation, built on
//! `tokio::sync::broadcast` the way the rest of the pack wires up fan-out
//! event channels. A failure to notify (no receivers, full lagged buffer)
//! is logged and discarded -- it must never fail the command or the queue.

use serde::Serialize;
use tokio::sync::broadcast;

/// `notifications/commandStatus` payload.
#[derive(Debug, Clone, Serialize)]
pub struct CommandStatusEvent {
    pub session_id: String,
    pub command_id: String,
    pub command: String,
    pub status: String,
    pub progress: Option<f64>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub timestamp_ms: u64,
}

/// `notifications/commandHeartbeat` payload.
#[derive(Debug, Clone, Serialize)]
pub struct CommandHeartbeatEvent {
    pub session_id: String,
    pub command_id: String,
    pub command: String,
    pub elapsed_seconds: f64,
    pub elapsed_display: String,
    pub details: Option<String>,
    pub timestamp_ms: u64,
}

/// `notifications/sessionRecovery` payload.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecoveryEvent {
    pub session_id: String,
    pub reason: String,
    pub recovery_step: String,
    pub success: bool,
    pub message: String,
    pub affected_commands: Vec<String>,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum NotificationEvent {
    CommandStatus(CommandStatusEvent),
    CommandHeartbeat(CommandHeartbeatEvent),
    SessionRecovery(SessionRecoveryEvent),
}

/// Fire-and-forget event sink consumed by the session/queue/recovery layer.
///
/// Implementations must not block the caller and must never propagate an
/// error back into command execution -- this trait's single method returns
/// nothing on purpose.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: NotificationEvent);
}

/// Broadcasts events to any number of subscribers (e.g. the MCP transport
/// layer forwarding them as JSON-RPC notifications). Publishing with no
/// subscribers is a no-op, not an error.
pub struct BroadcastSink {
    tx: broadcast::Sender<NotificationEvent>,
}

impl BroadcastSink {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl NotificationSink for BroadcastSink {
    fn notify(&self, event: NotificationEvent) {
        // `send` only errors when there are zero receivers; that is a
        // routine state (no transport subscribed yet), not a fault.
        let _ = self.tx.send(event);
    }
}

/// Current time in milliseconds since the epoch, for event timestamps.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_with_no_subscribers_does_not_panic() {
        let sink = BroadcastSink::new(16);
        sink.notify(NotificationEvent::CommandStatus(CommandStatusEvent {
            session_id: "s1".into(),
            command_id: "c1".into(),
            command: "lm".into(),
            status: "Completed".into(),
            progress: None,
            message: None,
            error: None,
            timestamp_ms: now_ms(),
        }));
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let sink = BroadcastSink::new(16);
        let mut rx = sink.subscribe();
        sink.notify(NotificationEvent::CommandHeartbeat(CommandHeartbeatEvent {
            session_id: "s1".into(),
            command_id: "c1".into(),
            command: "lm".into(),
            elapsed_seconds: 1.0,
            elapsed_display: "1s".into(),
            details: None,
            timestamp_ms: now_ms(),
        }));
        let received = rx.recv().await.unwrap();
        matches!(received, NotificationEvent::CommandHeartbeat(_));
    }
}
