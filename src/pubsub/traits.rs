// Broker traits — the seam between the subscription listener and whatever
// carries pub/sub messages (in-process channels, Redis).
//
// A subscription connection is split in two halves: the sink issues
// commands, the stream yields replies. The listener hands the stream to a
// reader task and keeps the sink for subscribe/unsubscribe/ping.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKind {
    Channel,
    Pattern,
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionKind::Channel => write!(f, "channel"),
            SubscriptionKind::Pattern => write!(f, "pattern"),
        }
    }
}

/// One reply read from a subscription connection.
///
/// `count` is the connection's total number of channel and pattern
/// subscriptions after the (un)subscribe took effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Subscribed {
        kind: SubscriptionKind,
        name: String,
        count: usize,
    },
    Unsubscribed {
        kind: SubscriptionKind,
        name: String,
        count: usize,
    },
    Message {
        channel: String,
        payload: String,
    },
    PatternMessage {
        pattern: String,
        channel: String,
        payload: String,
    },
}

/// Command half of a subscription connection.
#[async_trait]
pub trait SubscriptionSink: Send {
    async fn subscribe(&mut self, channels: &[String]) -> Result<()>;

    async fn psubscribe(&mut self, patterns: &[String]) -> Result<()>;

    async fn unsubscribe(&mut self, channels: &[String]) -> Result<()>;

    async fn punsubscribe(&mut self, patterns: &[String]) -> Result<()>;

    /// Round-trip to the broker. Fails when the connection is gone.
    async fn ping(&mut self) -> Result<()>;
}

/// Reply half of a subscription connection.
#[async_trait]
pub trait SubscriptionStream: Send {
    /// The next reply, `Ok(None)` once the connection is closed.
    async fn next_reply(&mut self) -> Result<Option<Reply>>;
}

/// A freshly opened subscription connection.
pub struct Subscriber {
    pub sink: Box<dyn SubscriptionSink>,
    pub stream: Box<dyn SubscriptionStream>,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a dedicated subscription connection.
    async fn subscriber(&self) -> Result<Subscriber>;

    /// Publish `payload` on `channel`. Returns how many subscriptions received it.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize>;
}
