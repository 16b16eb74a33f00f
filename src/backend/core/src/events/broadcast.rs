//! Fan-out of recovery events to any number of subscribers.
//!
//! Backed by a bounded `tokio::sync::broadcast` channel: publishing never
//! blocks, and a subscriber that falls behind skips the oldest events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{trace, warn};

use super::event::RecoveryEvent;

/// Delivery counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastStats {
    pub published: u64,
    /// Sum over events of the subscribers connected at publish time.
    pub delivered: u64,
    pub dropped_without_subscribers: u64,
    /// Events skipped by slow subscribers.
    pub lagged: u64,
    pub subscribers: usize,
}

pub struct EventBroadcaster {
    sender: broadcast::Sender<RecoveryEvent>,
    seq: AtomicU64,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    lagged: Arc<AtomicU64>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            seq: AtomicU64::new(0),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            lagged: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event; returns its sequence number.
    pub fn publish(&self, mut event: RecoveryEvent) -> u64 {
        event.seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let seq = event.seq;
        let name = event.name;
        self.published.fetch_add(1, Ordering::Relaxed);

        match self.sender.send(event) {
            Ok(receivers) => {
                self.delivered.fetch_add(receivers as u64, Ordering::Relaxed);
                trace!(event = %name, seq, receivers, "event published");
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        seq
    }

    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
            lagged: Arc::clone(&self.lagged),
        }
    }

    /// Subscribe as a stream; lag is logged and skipped.
    pub fn stream(&self) -> impl Stream<Item = RecoveryEvent> + Send + 'static {
        let lagged = Arc::clone(&self.lagged);
        BroadcastStream::new(self.sender.subscribe()).filter_map(move |item| {
            let lagged = Arc::clone(&lagged);
            async move {
                match item {
                    Ok(event) => Some(event),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        lagged.fetch_add(skipped, Ordering::Relaxed);
                        warn!(skipped, "event stream subscriber lagged");
                        None
                    }
                }
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped_without_subscribers: self.dropped.load(Ordering::Relaxed),
            lagged: self.lagged.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("stats", &self.stats())
            .finish()
    }
}

/// A single subscriber.
pub struct EventSubscription {
    receiver: broadcast::Receiver<RecoveryEvent>,
    lagged: Arc<AtomicU64>,
}

impl EventSubscription {
    /// Next event, or `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<RecoveryEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.lagged.fetch_add(skipped, Ordering::Relaxed);
                    warn!(skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<RecoveryEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    self.lagged.fetch_add(skipped, Ordering::Relaxed);
                    warn!(skipped, "event subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }

    /// Drain everything currently queued.
    pub fn drain(&mut self) -> Vec<RecoveryEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::{EventLevel, EventName};

    #[test]
    fn test_publish_without_subscribers_never_blocks() {
        let broadcaster = EventBroadcaster::new(4);
        for i in 0..10 {
            broadcaster.publish(RecoveryEvent::log(EventLevel::Info, format!("msg {}", i)));
        }
        let stats = broadcaster.stats();
        assert_eq!(stats.published, 10);
        assert_eq!(stats.dropped_without_subscribers, 10);
        assert_eq!(stats.delivered, 0);
    }

    #[tokio::test]
    async fn test_order_preserved_per_subscriber() {
        let broadcaster = EventBroadcaster::new(16);
        let mut first = broadcaster.subscribe();
        let mut second = broadcaster.subscribe();

        for i in 0..5 {
            broadcaster.publish(RecoveryEvent::log(EventLevel::Info, format!("msg {}", i)));
        }

        for sub in [&mut first, &mut second] {
            let seqs: Vec<_> = sub.drain().into_iter().map(|e| e.seq).collect();
            assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        }
        assert_eq!(broadcaster.stats().delivered, 10);
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest() {
        let broadcaster = EventBroadcaster::new(4);
        let mut slow = broadcaster.subscribe();

        for i in 0..10 {
            broadcaster.publish(RecoveryEvent::log(EventLevel::Info, format!("msg {}", i)));
        }

        let seqs: Vec<_> = slow.drain().into_iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![7, 8, 9, 10]);
        assert_eq!(broadcaster.stats().lagged, 6);

        // Still subscribed after lagging
        broadcaster.publish(RecoveryEvent::connected());
        assert_eq!(slow.recv().await.map(|e| e.name), Some(EventName::Connected));
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_forgotten() {
        let broadcaster = EventBroadcaster::new(4);
        let sub = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 1);
        drop(sub);
        assert_eq!(broadcaster.subscriber_count(), 0);
        broadcaster.publish(RecoveryEvent::connected());
        assert_eq!(broadcaster.stats().dropped_without_subscribers, 1);
    }

    #[tokio::test]
    async fn test_stream_yields_events() {
        let broadcaster = EventBroadcaster::new(8);
        let stream = broadcaster.stream();
        broadcaster.publish(RecoveryEvent::state_change("diagnosing", "Running diagnostics"));

        let mut stream = Box::pin(stream);
        let event = stream.next().await.unwrap();
        assert_eq!(event.name, EventName::StateChange);
        assert_eq!(event.payload["state"], "diagnosing");
    }
}
