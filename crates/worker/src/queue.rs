//! Bounded inter-stage queues with poison-pill shutdown.
//!
//! Each queue carries [`Envelope`]s. Consumers exit their loop when they
//! take a [`Envelope::Shutdown`], so stopping a stage with N consumers
//! means pushing N poison values after its producers have stopped.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::error::WorkerError;

#[derive(Debug)]
pub enum Envelope<T> {
    Work(T),
    Shutdown,
}

/// Producer side of a stage queue.
#[derive(Debug)]
pub struct Outbox<T> {
    name: &'static str,
    tx: mpsc::Sender<Envelope<T>>,
}

impl<T> Clone for Outbox<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
        }
    }
}

impl<T> Outbox<T> {
    /// Push an item, waiting for room when the queue is full.
    pub async fn send(&self, item: T) -> Result<(), WorkerError> {
        self.tx
            .send(Envelope::Work(item))
            .await
            .map_err(|_| WorkerError::QueueClosed(self.name))
    }

    /// Push one shutdown marker per consumer.
    pub async fn poison(&self, consumers: usize) {
        for _ in 0..consumers {
            if self.tx.send(Envelope::Shutdown).await.is_err() {
                break;
            }
        }
        tracing::debug!(queue = self.name, consumers, "Queue poisoned");
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Free slots right now.
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }
}

/// Consumer side of a stage queue, shareable between pool workers.
#[derive(Debug)]
pub struct Inbox<T> {
    rx: Arc<Mutex<mpsc::Receiver<Envelope<T>>>>,
}

impl<T> Clone for Inbox<T> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
        }
    }
}

impl<T> Inbox<T> {
    /// Next work item, or `None` once this consumer should stop.
    pub async fn recv(&self) -> Option<T> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(Envelope::Work(item)) => Some(item),
            Some(Envelope::Shutdown) | None => None,
        }
    }
}

/// Create a bounded stage queue.
pub fn channel<T>(name: &'static str, capacity: usize) -> (Outbox<T>, Inbox<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        Outbox { name, tx },
        Inbox {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn one_poison_stops_one_consumer() {
        let (tx, rx) = channel::<u32>("test", 4);
        tx.send(1).await.unwrap();
        tx.poison(2).await;

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, None);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn full_queue_blocks_producer() {
        let (tx, rx) = channel::<u32>("test", 1);
        tx.send(1).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), tx.send(2)).await;
        assert!(blocked.is_err(), "second send should wait for room");

        assert_eq!(rx.recv().await, Some(1));
        tx.send(2).await.unwrap();
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test]
    async fn send_after_consumers_drop_fails() {
        let (tx, rx) = channel::<u32>("updates", 1);
        drop(rx);
        assert!(matches!(tx.send(1).await, Err(WorkerError::QueueClosed("updates"))));
    }

    #[tokio::test]
    async fn shared_inbox_spreads_work() {
        let (tx, rx) = channel::<u32>("work", 4);
        let a = rx.clone();
        let b = rx;

        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();

        let mut got = vec![a.recv().await.unwrap(), b.recv().await.unwrap()];
        got.sort();
        assert_eq!(got, vec![1, 2]);
    }
}
