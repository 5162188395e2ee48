// libs/call-session-cell/src/services/signaling.rs
//! Signaling transport port and the in-memory relay used by tests and
//! single-process demos.
//!
//! The relay is a named publish/subscribe channel per appointment. Payloads
//! are opaque JSON values; delivery is best-effort while both peers are
//! subscribed, FIFO per sender, and a publisher never receives its own
//! message back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::models::CallSessionError;

/// Channel key for one appointment's call attempt.
pub fn channel_key(prefix: &str, appointment_id: Uuid) -> String {
    format!("{}{}", prefix, appointment_id)
}

/// Relay contract consumed by the call core. The transport performs no
/// interpretation of payloads.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    async fn subscribe(
        &self,
        channel_key: &str,
    ) -> Result<Box<dyn SignalingChannel>, CallSessionError>;
}

/// A live subscription to one channel. Dropping the handle unsubscribes.
#[async_trait]
pub trait SignalingChannel: Send {
    /// Broadcast a payload to every other subscriber of the channel.
    async fn publish(&self, payload: Value) -> Result<(), CallSessionError>;

    /// Next inbound payload; `None` when the subscription is gone (the
    /// relay dropped it or `unsubscribe` was called).
    async fn recv(&mut self) -> Option<Value>;

    async fn unsubscribe(&mut self);
}

// ==============================================================================
// IN-MEMORY RELAY
// ==============================================================================

type Subscribers = Vec<(u64, mpsc::UnboundedSender<Value>)>;

/// In-memory signaling relay: named channels fanning out to all current
/// subscribers except the publisher.
#[derive(Clone, Default)]
pub struct InMemorySignalingHub {
    inner: Arc<HubInner>,
}

#[derive(Default)]
struct HubInner {
    channels: Mutex<HashMap<String, Subscribers>>,
    next_subscriber_id: AtomicU64,
    published: AtomicU64,
}

impl InMemorySignalingHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of payloads accepted for delivery, across all channels.
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self, channel_key: &str) -> usize {
        match self.inner.channels.lock() {
            Ok(channels) => channels.get(channel_key).map(|s| s.len()).unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Drop every subscription on a channel, simulating a relay-side
    /// disconnect: each subscriber's `recv` starts returning `None`.
    pub fn drop_channel(&self, channel_key: &str) {
        if let Ok(mut channels) = self.inner.channels.lock() {
            channels.remove(channel_key);
        }
    }

    fn remove_subscriber(&self, channel_key: &str, subscriber_id: u64) {
        if let Ok(mut channels) = self.inner.channels.lock() {
            let emptied = match channels.get_mut(channel_key) {
                Some(subscribers) => {
                    subscribers.retain(|(id, _)| *id != subscriber_id);
                    subscribers.is_empty()
                }
                None => false,
            };
            if emptied {
                channels.remove(channel_key);
            }
        }
    }

    fn fan_out(
        &self,
        channel_key: &str,
        sender_id: u64,
        payload: Value,
    ) -> Result<(), CallSessionError> {
        let mut channels = self
            .inner
            .channels
            .lock()
            .map_err(|_| CallSessionError::transport("relay state poisoned"))?;

        let subscribers = channels
            .get_mut(channel_key)
            .ok_or_else(|| CallSessionError::transport("channel is gone"))?;

        for (id, tx) in subscribers.iter() {
            if *id != sender_id {
                // Best-effort: a receiver that went away mid-send is dropped
                // on its next unsubscribe.
                let _ = tx.send(payload.clone());
            }
        }
        self.inner.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl SignalingTransport for InMemorySignalingHub {
    async fn subscribe(
        &self,
        channel_key: &str,
    ) -> Result<Box<dyn SignalingChannel>, CallSessionError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber_id = self.inner.next_subscriber_id.fetch_add(1, Ordering::SeqCst);

        let mut channels = self
            .inner
            .channels
            .lock()
            .map_err(|_| CallSessionError::transport("relay state poisoned"))?;
        channels
            .entry(channel_key.to_string())
            .or_default()
            .push((subscriber_id, tx));
        drop(channels);

        debug!(channel_key, subscriber_id, "subscribed to signaling channel");

        Ok(Box::new(HubChannel {
            hub: self.clone(),
            channel_key: channel_key.to_string(),
            subscriber_id,
            rx,
            subscribed: true,
        }))
    }
}

struct HubChannel {
    hub: InMemorySignalingHub,
    channel_key: String,
    subscriber_id: u64,
    rx: mpsc::UnboundedReceiver<Value>,
    subscribed: bool,
}

#[async_trait]
impl SignalingChannel for HubChannel {
    async fn publish(&self, payload: Value) -> Result<(), CallSessionError> {
        if !self.subscribed {
            return Err(CallSessionError::transport("publish after unsubscribe"));
        }
        self.hub
            .fan_out(&self.channel_key, self.subscriber_id, payload)
    }

    async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    async fn unsubscribe(&mut self) {
        if self.subscribed {
            self.subscribed = false;
            self.hub
                .remove_subscriber(&self.channel_key, self.subscriber_id);
            self.rx.close();
            debug!(
                channel_key = %self.channel_key,
                subscriber_id = self.subscriber_id,
                "unsubscribed from signaling channel"
            );
        }
    }
}

impl Drop for HubChannel {
    fn drop(&mut self) {
        if self.subscribed {
            self.hub
                .remove_subscriber(&self.channel_key, self.subscriber_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fan_out_skips_the_publisher() {
        let hub = InMemorySignalingHub::new();
        let a = hub.subscribe("video-call-1").await.unwrap();
        let mut b = hub.subscribe("video-call-1").await.unwrap();

        a.publish(json!({"type": "offer"})).await.unwrap();

        assert_eq!(b.recv().await, Some(json!({"type": "offer"})));
        assert_eq!(hub.published_count(), 1);
    }

    #[tokio::test]
    async fn test_per_sender_fifo_order() {
        let hub = InMemorySignalingHub::new();
        let a = hub.subscribe("video-call-1").await.unwrap();
        let mut b = hub.subscribe("video-call-1").await.unwrap();

        for n in 0..5 {
            a.publish(json!({ "seq": n })).await.unwrap();
        }
        for n in 0..5 {
            assert_eq!(b.recv().await, Some(json!({ "seq": n })));
        }
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let hub = InMemorySignalingHub::new();
        let a = hub.subscribe("video-call-1").await.unwrap();
        let _b = hub.subscribe("video-call-1").await.unwrap();
        let mut c = hub.subscribe("video-call-2").await.unwrap();

        a.publish(json!("hello")).await.unwrap();

        // Nothing crosses channels; c would hang forever on recv.
        assert_eq!(
            tokio::time::timeout(std::time::Duration::from_millis(50), c.recv())
                .await
                .ok(),
            None
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_then_publish_fails() {
        let hub = InMemorySignalingHub::new();
        let mut a = hub.subscribe("video-call-1").await.unwrap();
        let _b = hub.subscribe("video-call-1").await.unwrap();

        a.unsubscribe().await;
        assert_eq!(hub.subscriber_count("video-call-1"), 1);
        assert!(a.publish(json!("late")).await.is_err());

        // Idempotent.
        a.unsubscribe().await;
        assert_eq!(hub.subscriber_count("video-call-1"), 1);
    }

    #[tokio::test]
    async fn test_dropped_channel_closes_receivers() {
        let hub = InMemorySignalingHub::new();
        let mut a = hub.subscribe("video-call-1").await.unwrap();

        hub.drop_channel("video-call-1");
        assert_eq!(a.recv().await, None);
        assert!(a.publish(json!("late")).await.is_err());
    }

    #[test]
    fn test_channel_key_format() {
        let id = Uuid::nil();
        assert_eq!(
            channel_key("video-call-", id),
            "video-call-00000000-0000-0000-0000-000000000000"
        );
    }
}
