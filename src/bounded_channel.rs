// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity queues connecting the pipeline stages.
//!
//! Producers wait when the queue is full, so a slow consumer throttles the
//! stage feeding it instead of letting memory grow. The same queue can be fed
//! from a blocking thread (the tailer) and drained from an async task.

use flume::{Receiver, Sender};
use std::fmt;
use std::time::Duration;

pub struct BoundedSender<T> {
    tx: Sender<T>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SendError {
    Disconnected,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Disconnected => write!(f, "channel disconnected"),
        }
    }
}

impl std::error::Error for SendError {}

#[derive(Debug, PartialEq, Eq)]
pub enum SendTimeoutError<T> {
    /// The queue stayed full for the whole wait, the item is handed back.
    Timeout(T),
    Disconnected,
}

impl<T> BoundedSender<T> {
    pub async fn send(&self, item: T) -> Result<(), SendError> {
        match self.tx.send_async(item).await {
            Ok(()) => Ok(()),
            Err(_e) => Err(SendError::Disconnected), // receiver closed
        }
    }

    /// Blocking send, waits until there is capacity in the queue.
    /// Only call this from a dedicated OS thread.
    pub fn send_blocking(&self, item: T) -> Result<(), SendError> {
        match self.tx.send(item) {
            Ok(()) => Ok(()),
            Err(_e) => Err(SendError::Disconnected),
        }
    }

    /// Blocking send that gives up after `timeout`, returning the item so the
    /// caller can check for shutdown and try again.
    pub fn send_timeout(&self, item: T, timeout: Duration) -> Result<(), SendTimeoutError<T>> {
        match self.tx.send_timeout(item, timeout) {
            Ok(()) => Ok(()),
            Err(flume::SendTimeoutError::Timeout(item)) => Err(SendTimeoutError::Timeout(item)),
            Err(flume::SendTimeoutError::Disconnected(_)) => Err(SendTimeoutError::Disconnected),
        }
    }
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    /// Waits for the next item. Returns None once every sender is dropped and
    /// the queue has been drained.
    pub async fn next(&mut self) -> Option<T> {
        match self.rx.recv_async().await {
            Ok(item) => Some(item),
            Err(_e) => None, // disconnected
        }
    }
}

pub fn bounded<T>(size: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(size);

    (BoundedSender { tx }, BoundedReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::{SendError, SendTimeoutError, bounded};
    use std::time::Duration;
    use tokio_test::{assert_ok, assert_pending, assert_ready, task::spawn};

    #[tokio::test]
    async fn basics() {
        let (tx, mut rx) = bounded(3);

        let msg = 10;

        let mut send1 = spawn(async { tx.send(msg).await });
        let mut recv1 = spawn(async { rx.next().await });

        assert_pending!(recv1.poll());

        assert_ok!(assert_ready!(send1.poll()));

        assert!(recv1.is_woken());
        assert_eq!(Some(msg), assert_ready!(recv1.poll()));

        drop(send1);
        drop(recv1);

        let mut recv2 = spawn(async { rx.next().await });

        drop(tx);
        // closed and drained
        assert_eq!(None, assert_ready!(recv2.poll()));
    }

    #[tokio::test]
    async fn sender_blocks_on_full() {
        let (tx, mut rx) = bounded(1);

        let mut send1 = spawn(async { tx.send(1).await });
        assert_ok!(assert_ready!(send1.poll()));
        drop(send1);

        let mut send2 = spawn(async { tx.send(2).await });
        assert_pending!(send2.poll());

        assert_eq!(Some(1), rx.next().await);
        assert_ok!(assert_ready!(send2.poll()));
        assert_eq!(Some(2), rx.next().await);
    }

    #[tokio::test]
    async fn items_queued_before_close_are_still_delivered() {
        let (tx, mut rx) = bounded(4);
        for i in 0..3 {
            tx.send(i).await.unwrap();
        }
        drop(tx);

        assert_eq!(Some(0), rx.next().await);
        assert_eq!(Some(1), rx.next().await);
        assert_eq!(Some(2), rx.next().await);
        assert_eq!(None, rx.next().await);
    }

    #[tokio::test]
    async fn send_timeout_returns_item_when_full() {
        let (tx, mut rx) = bounded(1);
        tx.send_blocking("a").unwrap();

        let res = tx.send_timeout("b", Duration::from_millis(5));
        assert_eq!(Err(SendTimeoutError::Timeout("b")), res);

        assert_eq!(Some("a"), rx.next().await);
        assert_eq!(Ok(()), tx.send_timeout("b", Duration::from_millis(5)));
    }

    #[tokio::test]
    async fn sender_fails_on_rx_close() {
        let (tx, rx) = bounded(1);

        let mut send1 = spawn(async { tx.send(10).await });

        drop(rx);
        assert_eq!(Err(SendError::Disconnected), assert_ready!(send1.poll()));
        assert_eq!(Err(SendError::Disconnected), tx.send_blocking(11));
    }
}
