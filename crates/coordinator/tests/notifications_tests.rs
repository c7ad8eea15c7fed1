//! Notification channel exercised against an in-process websocket server.

use std::time::Duration;

use aibrush_coordinator::backoff::BackoffConfig;
use aibrush_coordinator::messages::Notification;
use aibrush_coordinator::notifications::{ChannelConfig, NotificationChannel};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

fn fast_config() -> ChannelConfig {
    ChannelConfig {
        read_timeout: Duration::from_millis(50),
        enqueue_timeout: Duration::from_millis(20),
        session_lifetime: Duration::from_secs(60),
        reconnect: BackoffConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
        },
    }
}

async fn recv(rx: &mut mpsc::Receiver<Notification>) -> Option<Notification> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("notification within timeout")
}

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let api_url = format!("http://{}", listener.local_addr().unwrap());
    (listener, api_url)
}

#[tokio::test]
async fn token_is_sent_first_and_notifications_are_delivered() {
    let (listener, api_url) = bind().await;

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

        let first = ws.next().await.unwrap().unwrap();
        assert_eq!(first, Message::Text("secret-token".into()));

        for frame in [
            r#"{"connected": true}"#,
            r#"{"type": "pending_image", "id": "img-1"}"#,
            r#"{"type": "image_updated", "id": "img-1"}"#,
            "garbage",
            r#"{"type": "worker_config_updated"}"#,
        ] {
            ws.send(Message::Text(frame.into())).await.unwrap();
        }

        // Hold the connection open until the client hangs up.
        while let Some(Ok(_)) = ws.next().await {}
    });

    let channel = NotificationChannel::new(&api_url, "secret-token")
        .unwrap()
        .with_config(fast_config());
    let (tx, mut rx) = mpsc::channel(4);
    let cancel = CancellationToken::new();
    let run = tokio::spawn({
        let cancel = cancel.clone();
        async move { channel.run(tx, cancel).await }
    });

    assert_eq!(recv(&mut rx).await, Some(Notification::PendingJob));
    assert_eq!(recv(&mut rx).await, Some(Notification::ConfigUpdated));

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("channel should stop on cancel")
        .unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn reconnects_after_server_closes() {
    let (listener, api_url) = bind().await;

    let server = tokio::spawn(async move {
        // First session: accept the token then close.
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        let _token = ws.next().await;
        ws.close(None).await.unwrap();

        // Second session: deliver one hint.
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        let _token = ws.next().await;
        ws.send(Message::Text(r#"{"type": "pending_image"}"#.into()))
            .await
            .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let channel = NotificationChannel::new(&api_url, "t")
        .unwrap()
        .with_config(fast_config());
    let (tx, mut rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let run = tokio::spawn({
        let cancel = cancel.clone();
        async move { channel.run(tx, cancel).await }
    });

    let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("hint after reconnect");
    assert_eq!(got, Some(Notification::PendingJob));

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn unreachable_coordinator_stops_on_cancel() {
    // Bind then drop to get a port nobody listens on.
    let (listener, api_url) = bind().await;
    drop(listener);

    let channel = NotificationChannel::new(&api_url, "t")
        .unwrap()
        .with_config(fast_config());
    let (tx, _rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let run = tokio::spawn({
        let cancel = cancel.clone();
        async move { channel.run(tx, cancel).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("channel should stop while backing off")
        .unwrap();
}
