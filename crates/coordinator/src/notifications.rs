//! Push notifications from the coordinator.
//!
//! The coordinator exposes a websocket at the root of its host. After
//! connecting the worker sends its token as the first frame; from then on
//! the server pushes small JSON frames announcing pending jobs and
//! configuration changes. These are hints only: they are offered to a
//! bounded mailbox and dropped when the poller has not drained the
//! previous one. Nothing here ever reports to the error kill switch.
//!
//! Sessions are recycled every few minutes and reconnected with
//! exponential backoff after failures.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::backoff::{Backoff, BackoffConfig};
use crate::error::ChannelError;
use crate::messages::{self, Frame, Notification};

/// Timing parameters for the notification channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// How long a single receive waits before the loop re-checks the
    /// session deadline.
    pub read_timeout: Duration,
    /// How long to wait for mailbox room before dropping a notification.
    pub enqueue_timeout: Duration,
    /// Sessions are closed and reopened after this long.
    pub session_lifetime: Duration,
    pub reconnect: BackoffConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(1),
            enqueue_timeout: Duration::from_millis(100),
            session_lifetime: Duration::from_secs(5 * 60),
            reconnect: BackoffConfig::default(),
        }
    }
}

/// Outcome of offering a notification to the mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Delivered,
    /// The mailbox stayed full for the whole enqueue timeout.
    Dropped,
    /// The receiving side is gone.
    Closed,
}

/// Offer `notification` to `mailbox`, waiting at most `wait` for room.
pub async fn offer(
    mailbox: &mpsc::Sender<Notification>,
    notification: Notification,
    wait: Duration,
) -> Offer {
    match tokio::time::timeout(wait, mailbox.send(notification)).await {
        Ok(Ok(())) => Offer::Delivered,
        Ok(Err(_)) => Offer::Closed,
        Err(_) => {
            tracing::debug!(?notification, "Mailbox full, dropping notification");
            Offer::Dropped
        }
    }
}

/// Derive the websocket URL from the coordinator's HTTP base URL.
///
/// `http` maps to `ws`; every other scheme maps to `wss`.
pub fn ws_url_from_api(api_url: &str) -> Result<String, ChannelError> {
    let (scheme, host) = api_url
        .split_once("://")
        .ok_or_else(|| ChannelError::InvalidUrl(api_url.to_string()))?;
    let host = host.trim_end_matches('/');
    if host.is_empty() {
        return Err(ChannelError::InvalidUrl(api_url.to_string()));
    }
    let ws_scheme = if scheme == "http" { "ws" } else { "wss" };
    Ok(format!("{ws_scheme}://{host}"))
}

/// Why a session ended without an error.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Expired,
    Cancelled,
    MailboxClosed,
}

/// Long-lived websocket client feeding the poller's mailbox.
pub struct NotificationChannel {
    ws_url: String,
    token: String,
    config: ChannelConfig,
}

impl NotificationChannel {
    pub fn new(api_url: &str, token: impl Into<String>) -> Result<Self, ChannelError> {
        Ok(Self {
            ws_url: ws_url_from_api(api_url)?,
            token: token.into(),
            config: ChannelConfig::default(),
        })
    }

    pub fn with_config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Run until `cancel` fires or the mailbox receiver is dropped.
    ///
    /// Connection failures are logged and retried with backoff; the
    /// backoff resets whenever a connection is established.
    pub async fn run(&self, mailbox: mpsc::Sender<Notification>, cancel: CancellationToken) {
        let mut backoff = Backoff::new(self.config.reconnect.clone());

        loop {
            if cancel.is_cancelled() {
                break;
            }

            tracing::info!(url = %self.ws_url, "Connecting to notification websocket");
            match self.run_session(&mailbox, &cancel, &mut backoff).await {
                Ok(SessionEnd::Expired) => {
                    tracing::debug!("Notification session expired, reconnecting");
                    continue;
                }
                Ok(SessionEnd::Cancelled) => break,
                Ok(SessionEnd::MailboxClosed) => {
                    tracing::info!("Notification mailbox closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Notification session failed");
                }
            }

            let delay = backoff.next_delay();
            tracing::info!(delay_ms = delay.as_millis() as u64, "Reconnecting to notification websocket");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!("Notification channel stopped");
    }

    /// Drive a single websocket session until it expires, fails, or is
    /// cancelled.
    async fn run_session(
        &self,
        mailbox: &mpsc::Sender<Notification>,
        cancel: &CancellationToken,
        backoff: &mut Backoff,
    ) -> Result<SessionEnd, ChannelError> {
        let (ws_stream, _response) = tokio::select! {
            _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            result = connect_async(self.ws_url.as_str()) => result.map_err(|e| {
                ChannelError::Connection(format!("Failed to connect to {}: {e}", self.ws_url))
            })?,
        };
        backoff.reset();

        let (mut sink, mut stream) = ws_stream.split();
        sink.send(Message::Text(self.token.clone()))
            .await
            .map_err(|e| ChannelError::Protocol(format!("Failed to send token: {e}")))?;
        tracing::info!("Notification websocket connected");

        let deadline = Instant::now() + self.config.session_lifetime;
        while Instant::now() < deadline {
            let received = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = sink.close().await;
                    return Ok(SessionEnd::Cancelled);
                }
                received = tokio::time::timeout(self.config.read_timeout, stream.next()) => received,
            };

            match received {
                Err(_elapsed) => continue,
                Ok(Some(Ok(Message::Text(text)))) => {
                    if !self.dispatch(&text, mailbox).await {
                        return Ok(SessionEnd::MailboxClosed);
                    }
                }
                Ok(Some(Ok(Message::Close(frame)))) => {
                    return Err(ChannelError::Protocol(format!(
                        "Coordinator closed websocket: {frame:?}"
                    )));
                }
                Ok(Some(Ok(_))) => {
                    // Ping/Pong handled by tungstenite; binary frames ignored.
                }
                Ok(Some(Err(e))) => return Err(ChannelError::Protocol(e.to_string())),
                Ok(None) => return Err(ChannelError::Protocol("stream exhausted".into())),
            }
        }

        let _ = sink.close().await;
        Ok(SessionEnd::Expired)
    }

    /// Decode a frame and offer any notification to the mailbox.
    /// Returns `false` once the mailbox is closed.
    async fn dispatch(&self, text: &str, mailbox: &mpsc::Sender<Notification>) -> bool {
        match messages::parse_frame(text) {
            Ok(Frame::Connected) => {
                tracing::debug!("Coordinator acknowledged websocket token");
                true
            }
            Ok(Frame::Notification(notification)) => {
                offer(mailbox, notification, self.config.enqueue_timeout).await != Offer::Closed
            }
            Ok(Frame::Unknown(kind)) => {
                tracing::debug!(kind = %kind, "Ignoring notification");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, raw = %text, "Malformed notification");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn https_maps_to_wss() {
        assert_eq!(
            ws_url_from_api("https://www.aibrush.art").unwrap(),
            "wss://www.aibrush.art"
        );
    }

    #[test]
    fn http_maps_to_ws() {
        assert_eq!(
            ws_url_from_api("http://localhost:3000/").unwrap(),
            "ws://localhost:3000"
        );
    }

    #[test]
    fn url_without_scheme_is_rejected() {
        assert_matches!(ws_url_from_api("localhost:3000"), Err(ChannelError::InvalidUrl(_)));
        assert_matches!(ws_url_from_api("http://"), Err(ChannelError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn offer_drops_when_mailbox_is_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let wait = Duration::from_millis(20);

        assert_eq!(offer(&tx, Notification::PendingJob, wait).await, Offer::Delivered);
        assert_eq!(offer(&tx, Notification::ConfigUpdated, wait).await, Offer::Dropped);

        assert_eq!(rx.recv().await, Some(Notification::PendingJob));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn offer_reports_closed_mailbox() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert_eq!(
            offer(&tx, Notification::PendingJob, Duration::from_millis(20)).await,
            Offer::Closed
        );
    }
}
