//! Named-channel publish/subscribe between job workers and stream servers.
//!
//! Producers and consumers never share memory through this interface: payloads
//! are serialized strings, and a subscriber only sees what was published after
//! it subscribed.

mod local;

use async_trait::async_trait;

use crate::error::BusError;

pub use local::LocalBus;

pub const CHANNEL_PREFIX: &str = "tasklog:";

/// Pattern that matches every job channel.
pub const ALL_JOBS_PATTERN: &str = "tasklog:*";

pub fn channel_for(job_id: &str) -> String {
    format!("{CHANNEL_PREFIX}{job_id}")
}

pub fn job_id_from_channel(channel: &str) -> Option<&str> {
    channel
        .strip_prefix(CHANNEL_PREFIX)
        .filter(|id| !id.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub channel: String,
    pub payload: String,
}

/// An exact channel name, or a prefix followed by `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelPattern {
    Exact(String),
    Prefix(String),
}

impl ChannelPattern {
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => ChannelPattern::Prefix(prefix.to_string()),
            None => ChannelPattern::Exact(pattern.to_string()),
        }
    }

    pub fn matches(&self, channel: &str) -> bool {
        match self {
            ChannelPattern::Exact(name) => name == channel,
            ChannelPattern::Prefix(prefix) => channel.starts_with(prefix.as_str()),
        }
    }
}

#[async_trait]
pub trait Subscription: Send {
    /// Next message on a matching channel. `Err(BusError::Closed)` ends the
    /// subscription; dropping the value unsubscribes.
    async fn recv(&mut self) -> Result<BusMessage, BusError>;
}

pub type BusSubscription = Box<dyn Subscription>;

#[async_trait]
pub trait MessageBus: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError>;

    async fn subscribe(&self, pattern: &str) -> Result<BusSubscription, BusError>;
}
