//! Output channel: bounded, ordered hand-off from the ingestion loop to the
//! consumer.
//!
//! A full channel suspends the publisher (backpressure); nothing is dropped
//! and nothing is buffered beyond the capacity.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::IngestError;
use crate::types::StreamItem;

/// Why a publish did not deliver its item.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PublishError {
    /// Cancellation fired while waiting for room; the item was not delivered.
    #[error("publish cancelled")]
    Cancelled,
    /// The consumer dropped its subscription.
    #[error("subscription closed")]
    Closed,
}

/// Constructor for the publisher/subscription pair.
pub struct OutputChannel;

impl OutputChannel {
    /// Create a channel holding at most `capacity` undelivered items.
    pub fn bounded(capacity: usize) -> Result<(Publisher, Subscription), IngestError> {
        if capacity == 0 {
            return Err(IngestError::ConfigInvalid(
                "output channel capacity must be greater than zero".into(),
            ));
        }
        let (tx, rx) = mpsc::channel(capacity);
        Ok((Publisher { tx }, Subscription { rx }))
    }
}

/// Producer side. There is exactly one, owned by the ingestion loop.
#[derive(Debug)]
pub struct Publisher {
    tx: mpsc::Sender<StreamItem>,
}

impl Publisher {
    /// Deliver `item`, waiting while the channel is full.
    ///
    /// If `cancel` fires first the wait is abandoned and the item is dropped
    /// undelivered.
    pub async fn publish(
        &self,
        item: StreamItem,
        cancel: &CancellationToken,
    ) -> Result<(), PublishError> {
        if cancel.is_cancelled() {
            return Err(PublishError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PublishError::Cancelled),
            sent = self.tx.send(item) => sent.map_err(|_| PublishError::Closed),
        }
    }

    /// Returns `true` once the subscription is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side: an ordered stream of [`StreamItem`]s.
///
/// Ends (`None`) once the loop has stopped and every item was drained.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<StreamItem>,
}

impl Subscription {
    /// Wait for the next item.
    pub async fn recv(&mut self) -> Option<StreamItem> {
        self.rx.recv().await
    }

    /// Take the next item if one is ready.
    pub fn try_recv(&mut self) -> Option<StreamItem> {
        self.rx.try_recv().ok()
    }

    /// Share this subscription between several consumers. Each item is
    /// delivered to exactly one of them, in order of their `recv` calls.
    pub fn shared(self) -> SharedSubscription {
        SharedSubscription {
            inner: Arc::new(Mutex::new(self)),
        }
    }
}

impl Stream for Subscription {
    type Item = StreamItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// A cloneable handle for multiple consumers draining one subscription.
#[derive(Debug, Clone)]
pub struct SharedSubscription {
    inner: Arc<Mutex<Subscription>>,
}

impl SharedSubscription {
    /// Wait for the next item.
    pub async fn recv(&self) -> Option<StreamItem> {
        self.inner.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{hash_from_u64, Invalidation};
    use std::time::Duration;

    fn item(n: u64) -> StreamItem {
        StreamItem::Invalidated(Invalidation {
            tx_hash: hash_from_u64(n),
            block_number: n,
            block_hash: hash_from_u64(n),
        })
    }

    #[test]
    fn zero_capacity_rejected() {
        assert!(matches!(
            OutputChannel::bounded(0),
            Err(IngestError::ConfigInvalid(_))
        ));
    }

    #[tokio::test]
    async fn preserves_order() {
        let (publisher, mut sub) = OutputChannel::bounded(8).unwrap();
        let cancel = CancellationToken::new();
        for n in 0..5 {
            publisher.publish(item(n), &cancel).await.unwrap();
        }
        for n in 0..5 {
            assert_eq!(sub.recv().await.unwrap().tx_hash(), hash_from_u64(n));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn full_channel_blocks_until_drained() {
        let (publisher, mut sub) = OutputChannel::bounded(1).unwrap();
        let cancel = CancellationToken::new();
        publisher.publish(item(1), &cancel).await.unwrap();

        let blocked =
            tokio::time::timeout(Duration::from_millis(100), publisher.publish(item(2), &cancel))
                .await;
        assert!(blocked.is_err(), "second publish must wait for the consumer");

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let res = publisher.publish(item(2), &cancel).await;
                (publisher, res)
            })
        };
        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        assert_eq!(sub.recv().await.unwrap().tx_hash(), hash_from_u64(1));
        let (_publisher, res) = task.await.unwrap();
        assert!(res.is_ok());
        assert_eq!(sub.recv().await.unwrap().tx_hash(), hash_from_u64(2));
    }

    #[tokio::test]
    async fn cancellation_while_blocked_drops_item() {
        let (publisher, mut sub) = OutputChannel::bounded(1).unwrap();
        let cancel = CancellationToken::new();
        publisher.publish(item(1), &cancel).await.unwrap();

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { publisher.publish(item(2), &cancel).await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();
        assert_eq!(task.await.unwrap(), Err(PublishError::Cancelled));

        assert_eq!(sub.recv().await.unwrap().tx_hash(), hash_from_u64(1));
        // Publisher is gone, so the stream ends without the second item.
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn closed_subscription_reported() {
        let (publisher, sub) = OutputChannel::bounded(1).unwrap();
        drop(sub);
        let cancel = CancellationToken::new();
        assert_eq!(
            publisher.publish(item(1), &cancel).await,
            Err(PublishError::Closed)
        );
        assert!(publisher.is_closed());
    }

    #[tokio::test]
    async fn shared_subscription_splits_items() {
        let (publisher, sub) = OutputChannel::bounded(4).unwrap();
        let cancel = CancellationToken::new();
        let shared = sub.shared();
        let other = shared.clone();
        publisher.publish(item(1), &cancel).await.unwrap();
        publisher.publish(item(2), &cancel).await.unwrap();
        assert_eq!(shared.recv().await.unwrap().tx_hash(), hash_from_u64(1));
        assert_eq!(other.recv().await.unwrap().tx_hash(), hash_from_u64(2));
    }

    #[tokio::test]
    async fn subscription_is_a_stream() {
        use futures::StreamExt;
        let (publisher, sub) = OutputChannel::bounded(4).unwrap();
        let cancel = CancellationToken::new();
        publisher.publish(item(1), &cancel).await.unwrap();
        publisher.publish(item(2), &cancel).await.unwrap();
        drop(publisher);
        let all: Vec<_> = sub.collect().await;
        assert_eq!(all.len(), 2);
    }
}
