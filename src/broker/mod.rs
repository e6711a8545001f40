//! Pub/sub broker: channel-name → subscriber mailboxes, with non-blocking
//! fan-out.
//!
//! Each subscriber owns a bounded mailbox; the broker holds the sending half
//! for fan-out. A publish never blocks on a slow subscriber: when a mailbox
//! is full the message is dropped for that subscriber only. Mailboxes are
//! removed and closed when the owning subscription drops, so a subscriber
//! that disconnects stops receiving within one publish.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use log::debug;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::consts::MAILBOX_CAPACITY;

/// Handle to the shared broker state. Cloning is shallow.
#[derive(Debug, Clone, Default)]
pub struct Broker {
    shared: Arc<BrokerShared>,
}

#[derive(Debug, Default)]
struct BrokerShared {
    /// The channel map is guarded by its own lock, independent of the store
    /// lock: publish takes the read lock, subscribe/unsubscribe take the
    /// write lock briefly.
    channels: RwLock<HashMap<String, Vec<Mailbox>>>,

    /// Distinguishes mailboxes on the same channel so drop can remove the
    /// right one.
    next_id: AtomicU64,
}

#[derive(Debug)]
struct Mailbox {
    id: u64,
    tx: mpsc::Sender<Bytes>,
}

impl Broker {
    pub fn new() -> Broker {
        Broker::default()
    }

    /// Register a new subscriber on `channel`.
    ///
    /// The returned `Subscription` owns the receiving half of the mailbox;
    /// dropping it unregisters the mailbox from the channel and closes it.
    pub fn subscribe(&self, channel: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);

        let mut channels = self.shared.channels.write().unwrap();
        channels
            .entry(channel.to_string())
            .or_default()
            .push(Mailbox { id, tx });

        debug!("subscriber {} joined channel {}", id, channel);

        Subscription {
            rx,
            _guard: MailboxGuard {
                shared: self.shared.clone(),
                channel: channel.to_string(),
                id,
            },
        }
    }

    /// Fan `message` out to every subscriber of `channel` without blocking.
    /// Full mailboxes drop the message for that subscriber only. Returns the
    /// number of mailboxes the message was delivered to; zero subscribers is
    /// not an error.
    pub fn publish(&self, channel: &str, message: Bytes) -> usize {
        let channels = self.shared.channels.read().unwrap();

        let Some(mailboxes) = channels.get(channel) else {
            return 0;
        };

        let mut delivered = 0;
        for mailbox in mailboxes {
            match mailbox.tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(
                        "mailbox {} on channel {} is full, dropping message",
                        mailbox.id, channel
                    );
                }
                // The subscription dropped between our read lock and this
                // send; its guard will prune the mailbox shortly.
                Err(TrySendError::Closed(_)) => {}
            }
        }

        delivered
    }

    /// Number of active subscribers on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        let channels = self.shared.channels.read().unwrap();
        channels.get(channel).map(Vec::len).unwrap_or(0)
    }
}

/// One subscriber's end of a channel: the owned mailbox receiver plus the
/// guard that unregisters it on drop.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<Bytes>,
    _guard: MailboxGuard,
}

impl Subscription {
    /// Receive the next published message, waiting if necessary.
    ///
    /// Returns `None` once the mailbox is closed and drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

#[derive(Debug)]
struct MailboxGuard {
    shared: Arc<BrokerShared>,
    channel: String,
    id: u64,
}

impl Drop for MailboxGuard {
    fn drop(&mut self) {
        let mut channels = self.shared.channels.write().unwrap();

        if let Some(mailboxes) = channels.get_mut(&self.channel) {
            mailboxes.retain(|mailbox| mailbox.id != self.id);
            if mailboxes.is_empty() {
                channels.remove(&self.channel);
            }
        }

        debug!("subscriber {} left channel {}", self.id, self.channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let broker = Broker::new();
        let mut sub = broker.subscribe("news");

        broker.publish("news", Bytes::from("first"));
        broker.publish("news", Bytes::from("second"));
        broker.publish("news", Bytes::from("third"));

        assert_eq!(sub.recv().await, Some(Bytes::from("first")));
        assert_eq!(sub.recv().await, Some(Bytes::from("second")));
        assert_eq!(sub.recv().await, Some(Bytes::from("third")));
    }

    #[tokio::test]
    async fn fans_out_to_every_subscriber() {
        let broker = Broker::new();
        let mut a = broker.subscribe("news");
        let mut b = broker.subscribe("news");

        assert_eq!(broker.publish("news", Bytes::from("hello")), 2);
        assert_eq!(a.recv().await, Some(Bytes::from("hello")));
        assert_eq!(b.recv().await, Some(Bytes::from("hello")));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let broker = Broker::new();
        assert_eq!(broker.publish("empty", Bytes::from("nobody home")), 0);
    }

    #[tokio::test]
    async fn full_mailbox_drops_silently() {
        let broker = Broker::new();
        let mut sub = broker.subscribe("busy");

        for i in 0..MAILBOX_CAPACITY + 5 {
            broker.publish("busy", Bytes::from(format!("m{}", i)));
        }

        // The first MAILBOX_CAPACITY messages survive, the rest were dropped.
        for i in 0..MAILBOX_CAPACITY {
            assert_eq!(sub.recv().await, Some(Bytes::from(format!("m{}", i))));
        }
        assert_eq!(broker.subscriber_count("busy"), 1);
    }

    #[tokio::test]
    async fn drop_unregisters_mailbox() {
        let broker = Broker::new();

        let sub = broker.subscribe("fleeting");
        assert_eq!(broker.subscriber_count("fleeting"), 1);

        drop(sub);
        assert_eq!(broker.subscriber_count("fleeting"), 0);
        assert_eq!(broker.publish("fleeting", Bytes::from("late")), 0);
    }

    #[tokio::test]
    async fn channels_are_independent() {
        let broker = Broker::new();
        let mut a = broker.subscribe("alpha");
        let _b = broker.subscribe("beta");

        broker.publish("alpha", Bytes::from("only alpha"));
        assert_eq!(a.recv().await, Some(Bytes::from("only alpha")));
        assert_eq!(broker.subscriber_count("beta"), 1);
    }
}
