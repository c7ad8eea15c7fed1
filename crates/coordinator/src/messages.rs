//! Frames pushed by the coordinator over the notification websocket.

use serde_json::Value;

/// Frame type sent when a new job is queued on the coordinator.
pub const MSG_TYPE_PENDING_IMAGE: &str = "pending_image";

/// Frame type sent when this worker's assignment changed.
pub const MSG_TYPE_WORKER_CONFIG_UPDATED: &str = "worker_config_updated";

/// Hint delivered to the job poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// A job is waiting in the coordinator queue.
    PendingJob,
    /// This worker's model assignment changed.
    ConfigUpdated,
}

/// A decoded websocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Handshake acknowledgement after the token was accepted.
    Connected,
    Notification(Notification),
    /// A well-formed frame of a type this worker ignores.
    Unknown(String),
}

/// Decode one text frame.
pub fn parse_frame(text: &str) -> Result<Frame, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;

    if value.get("connected").and_then(Value::as_bool) == Some(true) {
        return Ok(Frame::Connected);
    }

    let frame = match value.get("type").and_then(Value::as_str) {
        Some(MSG_TYPE_PENDING_IMAGE) => Frame::Notification(Notification::PendingJob),
        Some(MSG_TYPE_WORKER_CONFIG_UPDATED) => Frame::Notification(Notification::ConfigUpdated),
        Some(other) => Frame::Unknown(other.to_string()),
        None => Frame::Unknown(String::new()),
    };
    Ok(frame)
}
