use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{BusMessage, BusSubscription, ChannelPattern, MessageBus, Subscription};
use crate::error::BusError;

/// Single-process bus on a tokio broadcast channel.
///
/// A subscriber that falls more than `capacity` messages behind skips the
/// overflow; viewers recover the missed lines from the store on reconnect.
pub struct LocalBus {
    tx: broadcast::Sender<BusMessage>,
    online: AtomicBool,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            online: AtomicBool::new(true),
        }
    }

    /// Simulate losing (or regaining) the connection to the bus.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn ensure_online(&self) -> Result<(), BusError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BusError::Unavailable("local bus offline".into()))
        }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(4096)
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    fn name(&self) -> &str {
        "local"
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError> {
        self.ensure_online()?;
        // No receivers is not an error: nobody is listening on that channel.
        let _ = self.tx.send(BusMessage {
            channel: channel.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<BusSubscription, BusError> {
        self.ensure_online()?;
        Ok(Box::new(LocalSubscription {
            rx: self.tx.subscribe(),
            pattern: ChannelPattern::parse(pattern),
        }))
    }
}

struct LocalSubscription {
    rx: broadcast::Receiver<BusMessage>,
    pattern: ChannelPattern,
}

#[async_trait]
impl Subscription for LocalSubscription {
    async fn recv(&mut self) -> Result<BusMessage, BusError> {
        loop {
            match self.rx.recv().await {
                Ok(msg) if self.pattern.matches(&msg.channel) => return Ok(msg),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "bus subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(BusError::Closed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_sees_only_matching_channels() {
        let bus = LocalBus::new(16);
        let mut sub = bus.subscribe("tasklog:a").await.unwrap();

        bus.publish("tasklog:b", "skip".into()).await.unwrap();
        bus.publish("tasklog:a", "take".into()).await.unwrap();

        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.channel, "tasklog:a");
        assert_eq!(msg.payload, "take");
    }

    #[tokio::test]
    async fn per_channel_fifo_is_preserved() {
        let bus = LocalBus::new(64);
        let mut sub = bus.subscribe("tasklog:*").await.unwrap();
        for i in 0..10 {
            bus.publish("tasklog:x", i.to_string()).await.unwrap();
        }
        for i in 0..10 {
            assert_eq!(sub.recv().await.unwrap().payload, i.to_string());
        }
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() {
        let bus = LocalBus::new(4);
        let sub = bus.subscribe("tasklog:*").await.unwrap();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn offline_bus_rejects_publish_and_subscribe() {
        let bus = LocalBus::new(4);
        bus.set_online(false);
        assert!(matches!(
            bus.publish("tasklog:a", "x".into()).await,
            Err(BusError::Unavailable(_))
        ));
        assert!(bus.subscribe("tasklog:*").await.is_err());

        bus.set_online(true);
        assert!(bus.publish("tasklog:a", "x".into()).await.is_ok());
    }

    #[tokio::test]
    async fn lagged_subscriber_skips_and_continues() {
        let bus = LocalBus::new(2);
        let mut sub = bus.subscribe("tasklog:*").await.unwrap();
        for i in 0..5 {
            bus.publish("tasklog:a", i.to_string()).await.unwrap();
        }
        // capacity 2: the oldest three are gone
        assert_eq!(sub.recv().await.unwrap().payload, "3");
        assert_eq!(sub.recv().await.unwrap().payload, "4");
    }
}
