//! In-process publisher/subscriber fabric.
//!
//! Works only on a single node. Delivery is at-least-once: every copy
//! handed to a subscriber is tracked for an Ack or Nack; a Nack or a
//! timeout routes the message to the distinguished `undeliverable`
//! topic. Duplicate suppression is the activity store's job, keyed by
//! activity ID.
//!
//! To distribute the load across a cluster, a persistent message queue
//! (such as RabbitMQ or Kafka) should be used instead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::error::{AppError, Result};
use crate::metrics::{PUBSUB_ACKS_TOTAL, PUBSUB_PUBLISHED_TOTAL, PUBSUB_UNDELIVERABLE_TOTAL};
use crate::service::lifecycle::Lifecycle;

/// The topic receiving messages that were nacked or timed out.
pub const UNDELIVERABLE_TOPIC: &str = "undeliverable";

/// Configuration for the publisher/subscriber.
#[derive(Debug, Clone)]
pub struct Config {
    /// The time to wait for an Ack or a Nack.
    pub timeout: Duration,

    /// The maximum number of concurrently tracked message copies.
    pub concurrency: usize,

    /// The channel buffer size for subscriptions and publishes.
    pub buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            concurrency: 20,
            buffer_size: 20,
        }
    }
}

impl From<&crate::config::PubSubConfig> for Config {
    fn from(cfg: &crate::config::PubSubConfig) -> Self {
        Self {
            timeout: cfg.timeout(),
            concurrency: cfg.concurrency,
            buffer_size: cfg.buffer_size,
        }
    }
}

/// The acknowledgement outcome reported by a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Acknowledgement {
    Ack,
    Nack,
}

/// A message delivered over the fabric.
///
/// Clones share the acknowledgement handle, so exactly one of
/// [`Message::ack`] and [`Message::nack`] takes effect per delivered
/// copy.
#[derive(Clone)]
pub struct Message {
    id: String,
    payload: Vec<u8>,
    ack: Arc<Mutex<Option<oneshot::Sender<Acknowledgement>>>>,
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl Message {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            payload,
            ack: Arc::new(Mutex::new(None)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Acknowledge successful processing of this copy.
    pub fn ack(&self) {
        self.send_acknowledgement(Acknowledgement::Ack);
    }

    /// Reject this copy; it will be routed to the undeliverable topic.
    pub fn nack(&self) {
        self.send_acknowledgement(Acknowledgement::Nack);
    }

    fn send_acknowledgement(&self, acknowledgement: Acknowledgement) {
        let sender = match self.ack.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };

        if let Some(sender) = sender {
            let _ = sender.send(acknowledgement);
        }
    }

    /// A per-subscriber copy with its own acknowledgement channel.
    fn copy(&self) -> (Message, oneshot::Receiver<Acknowledgement>) {
        let (ack_tx, ack_rx) = oneshot::channel();

        let copy = Message {
            id: self.id.clone(),
            payload: self.payload.clone(),
            ack: Arc::new(Mutex::new(Some(ack_tx))),
        };

        (copy, ack_rx)
    }
}

struct Entry {
    topic: String,
    messages: Vec<Message>,
}

/// A tracked message copy awaiting its acknowledgement.
struct Tracked {
    message: Message,
    ack_rx: oneshot::Receiver<Acknowledgement>,
}

type SubscriberMap = Arc<RwLock<HashMap<String, Vec<mpsc::Sender<Message>>>>>;

/// A single-node publisher/subscriber over bounded channels.
///
/// One publisher task drains the publish channel and fans each message
/// out to every subscriber of its topic; an ack-dispatcher task hands
/// each tracked copy to an independent checker task.
pub struct PubSub {
    lifecycle: Lifecycle,
    service_name: String,
    subscribers: SubscriberMap,
    buffer_size: usize,
    publish_tx: mpsc::Sender<Entry>,
    ack_tx: Mutex<Option<mpsc::Sender<Tracked>>>,
    done_tx: mpsc::Sender<oneshot::Sender<()>>,
}

impl PubSub {
    /// Create a new publisher/subscriber. The service starts
    /// immediately.
    pub fn new(service_name: &str, config: Config) -> Self {
        let subscribers: SubscriberMap = Arc::new(RwLock::new(HashMap::new()));

        let (publish_tx, publish_rx) = mpsc::channel(config.buffer_size);
        let (ack_tx, ack_rx) = mpsc::channel(config.concurrency);
        let (done_tx, done_rx) = mpsc::channel(1);

        tokio::spawn(process_messages(
            service_name.to_string(),
            publish_rx,
            done_rx,
            Arc::clone(&subscribers),
            ack_tx.clone(),
        ));

        tokio::spawn(process_acks(
            service_name.to_string(),
            ack_rx,
            Arc::clone(&subscribers),
            config.timeout,
        ));

        let pubsub = Self {
            lifecycle: Lifecycle::new(&format!("pubsub-{}", service_name)),
            service_name: service_name.to_string(),
            subscribers,
            buffer_size: config.buffer_size,
            publish_tx,
            ack_tx: Mutex::new(Some(ack_tx)),
            done_tx,
        };

        // The service is usable as soon as it is constructed.
        pubsub.lifecycle.start();

        pubsub
    }

    /// Subscribe to a topic.
    ///
    /// Returns the channel over which messages are delivered; it is
    /// closed when [`PubSub::stop`] is called.
    pub fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Message>> {
        if !self.lifecycle.is_started() {
            return Err(AppError::NotStarted);
        }

        tracing::debug!(service = %self.service_name, topic = %topic, "subscribing to topic");

        let (tx, rx) = mpsc::channel(self.buffer_size);

        self.subscribers
            .write()
            .map_err(|e| AppError::Store(format!("subscriber lock poisoned: {}", e)))?
            .entry(topic.to_string())
            .or_default()
            .push(tx);

        Ok(rx)
    }

    /// Publish messages to a topic.
    ///
    /// Enqueues a fan-out entry on the bounded publish channel and
    /// blocks when it is full; that back-pressure is the only flow
    /// control on normal topics.
    pub async fn publish(&self, topic: &str, messages: Vec<Message>) -> Result<()> {
        if !self.lifecycle.is_started() {
            return Err(AppError::NotStarted);
        }

        PUBSUB_PUBLISHED_TOTAL
            .with_label_values(&[topic])
            .inc_by(messages.len() as u64);

        self.publish_tx
            .send(Entry {
                topic: topic.to_string(),
                messages,
            })
            .await
            .map_err(|_| AppError::NotStarted)
    }

    /// Stop the publisher/subscriber.
    ///
    /// Waits for the publisher task to acknowledge shutdown, then
    /// closes every subscriber channel and the ack channel. Idempotent.
    pub async fn stop(&self) {
        if !self.lifecycle.stop() {
            return;
        }

        tracing::info!(service = %self.service_name, "stopping publisher/subscriber");

        let (stopped_tx, stopped_rx) = oneshot::channel();

        if self.done_tx.send(stopped_tx).await.is_ok() {
            let _ = stopped_rx.await;
        }

        tracing::debug!(service = %self.service_name, "closing subscriber channels");

        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.clear();
        }

        if let Ok(mut ack_tx) = self.ack_tx.lock() {
            ack_tx.take();
        }

        tracing::info!(service = %self.service_name, "publisher/subscriber stopped");
    }

    pub fn state(&self) -> crate::service::lifecycle::State {
        self.lifecycle.state()
    }
}

/// The publisher task: drains the publish channel until told to stop.
async fn process_messages(
    service_name: String,
    mut publish_rx: mpsc::Receiver<Entry>,
    mut done_rx: mpsc::Receiver<oneshot::Sender<()>>,
    subscribers: SubscriberMap,
    ack_tx: mpsc::Sender<Tracked>,
) {
    loop {
        tokio::select! {
            entry = publish_rx.recv() => match entry {
                Some(entry) => {
                    publish_entry(&service_name, entry, &subscribers, &ack_tx).await;
                }
                None => return,
            },
            stopped_tx = done_rx.recv() => {
                if let Some(stopped_tx) = stopped_tx {
                    let _ = stopped_tx.send(());
                }

                tracing::debug!(service = %service_name, "publisher has stopped");

                return;
            }
        }
    }
}

async fn publish_entry(
    service_name: &str,
    entry: Entry,
    subscribers: &SubscriberMap,
    ack_tx: &mpsc::Sender<Tracked>,
) {
    // Snapshot the senders under the read lock; the sends below must
    // not hold it.
    let senders: Vec<mpsc::Sender<Message>> = match subscribers.read() {
        Ok(map) => map.get(&entry.topic).cloned().unwrap_or_default(),
        Err(_) => return,
    };

    for sender in &senders {
        for message in &entry.messages {
            // Copy the message so that the Ack/Nack is specific to a
            // subscriber.
            let (copy, ack_rx) = message.copy();

            tracing::debug!(service = %service_name, message = %copy.id(), topic = %entry.topic, "publishing message");

            if sender.send(copy.clone()).await.is_err() {
                // Subscriber went away; nothing to track.
                continue;
            }

            if ack_tx
                .send(Tracked {
                    message: copy,
                    ack_rx,
                })
                .await
                .is_err()
            {
                return;
            }
        }
    }
}

/// The ack-dispatcher task: hands each tracked copy to its own checker.
async fn process_acks(
    service_name: String,
    mut ack_rx: mpsc::Receiver<Tracked>,
    subscribers: SubscriberMap,
    timeout: Duration,
) {
    while let Some(tracked) = ack_rx.recv().await {
        tokio::spawn(check(
            service_name.clone(),
            tracked,
            Arc::clone(&subscribers),
            timeout,
        ));
    }
}

/// Await one of Ack, Nack or timeout for a single message copy.
async fn check(service_name: String, tracked: Tracked, subscribers: SubscriberMap, timeout: Duration) {
    tracing::debug!(service = %service_name, message = %tracked.message.id(), "checking for ack/nack on message");

    match tokio::time::timeout(timeout, tracked.ack_rx).await {
        Ok(Ok(Acknowledgement::Ack)) => {
            PUBSUB_ACKS_TOTAL.with_label_values(&["ack"]).inc();

            tracing::debug!(service = %service_name, message = %tracked.message.id(),
                "message was successfully acknowledged");
        }
        Ok(Ok(Acknowledgement::Nack)) | Ok(Err(_)) => {
            PUBSUB_ACKS_TOTAL.with_label_values(&["nack"]).inc();

            tracing::info!(service = %service_name, message = %tracked.message.id(),
                "message was not successfully acknowledged, posting to undeliverable queue");

            post_to_undeliverable(&service_name, tracked.message, &subscribers);
        }
        Err(_) => {
            PUBSUB_ACKS_TOTAL.with_label_values(&["timeout"]).inc();

            tracing::warn!(service = %service_name, message = %tracked.message.id(), timeout = ?timeout,
                "timed out waiting for ack/nack, posting to undeliverable queue");

            post_to_undeliverable(&service_name, tracked.message, &subscribers);
        }
    }
}

/// Offer the message to every undeliverable subscriber without
/// blocking. A blocked send here could deadlock the checker behind a
/// stalled consumer, so a full channel drops the message instead.
fn post_to_undeliverable(service_name: &str, message: Message, subscribers: &SubscriberMap) {
    let senders: Vec<mpsc::Sender<Message>> = match subscribers.read() {
        Ok(map) => map.get(UNDELIVERABLE_TOPIC).cloned().unwrap_or_default(),
        Err(_) => return,
    };

    for sender in senders {
        match sender.try_send(message.clone()) {
            Ok(()) => {
                PUBSUB_UNDELIVERABLE_TOTAL
                    .with_label_values(&["queued"])
                    .inc();

                tracing::info!(service = %service_name, message = %message.id(),
                    "message was added to the undeliverable queue");
            }
            Err(_) => {
                PUBSUB_UNDELIVERABLE_TOTAL
                    .with_label_values(&["dropped"])
                    .inc();

                tracing::warn!(service = %service_name, message = %message.id(),
                    "message could not be added to the undeliverable queue and will be dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(timeout: Duration) -> Config {
        Config {
            timeout,
            concurrency: 4,
            buffer_size: 4,
        }
    }

    #[tokio::test]
    async fn publish_delivers_to_all_subscribers() {
        let pubsub = PubSub::new("service1", test_config(Duration::from_secs(5)));

        let mut sub1 = pubsub.subscribe("activities").unwrap();
        let mut sub2 = pubsub.subscribe("activities").unwrap();

        let message = Message::new(b"anchor event".to_vec());
        pubsub
            .publish("activities", vec![message.clone()])
            .await
            .unwrap();

        let got1 = sub1.recv().await.unwrap();
        let got2 = sub2.recv().await.unwrap();

        assert_eq!(got1.id(), message.id());
        assert_eq!(got2.id(), message.id());
        assert_eq!(got1.payload(), b"anchor event");

        got1.ack();
        got2.ack();

        pubsub.stop().await;
    }

    #[tokio::test]
    async fn nacked_message_goes_to_undeliverable() {
        let pubsub = PubSub::new("service1", test_config(Duration::from_secs(5)));

        let mut undeliverable = pubsub.subscribe(UNDELIVERABLE_TOPIC).unwrap();
        let mut sub = pubsub.subscribe("activities").unwrap();

        let message = Message::new(b"poison".to_vec());
        pubsub
            .publish("activities", vec![message.clone()])
            .await
            .unwrap();

        let got = sub.recv().await.unwrap();
        got.nack();

        let dead = undeliverable.recv().await.unwrap();
        assert_eq!(dead.id(), message.id());

        // The message must not reappear on the original topic.
        assert!(sub.try_recv().is_err());

        pubsub.stop().await;
    }

    #[tokio::test]
    async fn unacknowledged_message_times_out_to_undeliverable() {
        let pubsub = PubSub::new("service1", test_config(Duration::from_millis(50)));

        let mut undeliverable = pubsub.subscribe(UNDELIVERABLE_TOPIC).unwrap();
        let mut sub = pubsub.subscribe("activities").unwrap();

        let message = Message::new(b"slow".to_vec());
        pubsub
            .publish("activities", vec![message.clone()])
            .await
            .unwrap();

        // Receive but never acknowledge.
        let _held = sub.recv().await.unwrap();

        let dead = tokio::time::timeout(Duration::from_secs(2), undeliverable.recv())
            .await
            .expect("undeliverable message within the timeout")
            .unwrap();
        assert_eq!(dead.id(), message.id());

        pubsub.stop().await;
    }

    #[tokio::test]
    async fn stop_closes_subscriber_channels() {
        let pubsub = PubSub::new("service1", test_config(Duration::from_secs(5)));

        let mut sub = pubsub.subscribe("activities").unwrap();

        pubsub.stop().await;

        assert!(sub.recv().await.is_none());
        assert_eq!(pubsub.state(), crate::service::lifecycle::State::Stopped);

        // Stop is idempotent.
        pubsub.stop().await;
    }

    #[tokio::test]
    async fn publish_after_stop_fails() {
        let pubsub = PubSub::new("service1", test_config(Duration::from_secs(5)));

        pubsub.stop().await;

        let err = pubsub
            .publish("activities", vec![Message::new(Vec::new())])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotStarted));

        assert!(pubsub.subscribe("activities").is_err());
    }

    #[tokio::test]
    async fn topic_isolation() {
        let pubsub = PubSub::new("service1", test_config(Duration::from_secs(5)));

        let mut other = pubsub.subscribe("other").unwrap();
        let mut sub = pubsub.subscribe("activities").unwrap();

        pubsub
            .publish("activities", vec![Message::new(b"m".to_vec())])
            .await
            .unwrap();

        let got = sub.recv().await.unwrap();
        got.ack();

        assert!(other.try_recv().is_err());

        pubsub.stop().await;
    }
}
