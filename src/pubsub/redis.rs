// RedisBroker — pub/sub over Redis for multi-process deployments.
//
// redis::aio::PubSub is not split into halves here, so a driver task owns it
// and serves commands from the sink over an mpsc channel, while forwarding
// published messages to the reply queue. Subscription acks carry running
// counts tracked by the driver. Keepalive pings and publishes go over a
// separate multiplexed connection.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{MultiplexedConnection, PubSub};
use redis::{Client, Msg};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::traits::{
    Broker, Reply, Subscriber, SubscriptionKind, SubscriptionSink, SubscriptionStream,
};

pub struct RedisBroker {
    client: Client,
}

impl RedisBroker {
    pub fn open(url: &str) -> Result<Self> {
        let client = Client::open(url).context("Invalid Redis URL")?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis")
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn subscriber(&self) -> Result<Subscriber> {
        let pubsub = self
            .client
            .get_async_pubsub()
            .await
            .context("Failed to open Redis subscription connection")?;
        let conn = self.connection().await?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (reply_tx, replies) = mpsc::unbounded_channel();
        tokio::spawn(drive(pubsub, command_rx, reply_tx));

        Ok(Subscriber {
            sink: Box::new(RedisSink { commands, conn }),
            stream: Box::new(RedisStream { replies }),
        })
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        let mut conn = self.connection().await?;
        let receivers: usize = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("Failed to publish to Redis channel {channel}"))?;
        Ok(receivers)
    }
}

enum Command {
    Subscribe(SubscriptionKind, Vec<String>, oneshot::Sender<Result<()>>),
    Unsubscribe(SubscriptionKind, Vec<String>, oneshot::Sender<Result<()>>),
}

enum Step {
    Message(Option<Msg>),
    Command(Option<Command>),
}

/// Owns the PubSub connection until the sink is dropped or Redis goes away.
async fn drive(
    mut pubsub: PubSub,
    mut commands: mpsc::UnboundedReceiver<Command>,
    replies: mpsc::UnboundedSender<Result<Reply>>,
) {
    let mut channels = BTreeSet::new();
    let mut patterns = BTreeSet::new();

    loop {
        let step = {
            let messages = pubsub.on_message();
            tokio::pin!(messages);
            tokio::select! {
                msg = messages.next() => Step::Message(msg),
                cmd = commands.recv() => Step::Command(cmd),
            }
        };

        match step {
            Step::Message(Some(msg)) => {
                if let Some(reply) = message_reply(&msg) {
                    if replies.send(Ok(reply)).is_err() {
                        break;
                    }
                }
            }
            Step::Message(None) => {
                warn!("Redis subscription connection closed");
                let _ = replies.send(Err(anyhow::anyhow!("Redis subscription connection closed")));
                break;
            }
            Step::Command(None) => break,
            Step::Command(Some(Command::Subscribe(kind, names, done))) => {
                let mut result = Ok(());
                for name in names {
                    let sent = match kind {
                        SubscriptionKind::Channel => pubsub.subscribe(&name).await,
                        SubscriptionKind::Pattern => pubsub.psubscribe(&name).await,
                    };
                    if let Err(e) = sent {
                        result = Err(anyhow::Error::new(e).context(format!("Failed to subscribe to {name}")));
                        break;
                    }
                    match kind {
                        SubscriptionKind::Channel => channels.insert(name.clone()),
                        SubscriptionKind::Pattern => patterns.insert(name.clone()),
                    };
                    let count = channels.len() + patterns.len();
                    let _ = replies.send(Ok(Reply::Subscribed { kind, name, count }));
                }
                let _ = done.send(result);
            }
            Step::Command(Some(Command::Unsubscribe(kind, names, done))) => {
                let mut result = Ok(());
                for name in names {
                    let sent = match kind {
                        SubscriptionKind::Channel => pubsub.unsubscribe(&name).await,
                        SubscriptionKind::Pattern => pubsub.punsubscribe(&name).await,
                    };
                    if let Err(e) = sent {
                        result = Err(anyhow::Error::new(e).context(format!("Failed to unsubscribe from {name}")));
                        break;
                    }
                    match kind {
                        SubscriptionKind::Channel => channels.remove(&name),
                        SubscriptionKind::Pattern => patterns.remove(&name),
                    };
                    let count = channels.len() + patterns.len();
                    let _ = replies.send(Ok(Reply::Unsubscribed { kind, name, count }));
                }
                let _ = done.send(result);
            }
        }
    }

    debug!("Redis subscription driver stopped");
}

fn message_reply(msg: &Msg) -> Option<Reply> {
    let channel = msg.get_channel_name().to_string();
    let payload: String = match msg.get_payload() {
        Ok(p) => p,
        Err(e) => {
            warn!(channel = %channel, error = %e, "Dropping non-UTF-8 Redis message");
            return None;
        }
    };
    if msg.from_pattern() {
        let pattern: String = msg.get_pattern().ok()?;
        Some(Reply::PatternMessage {
            pattern,
            channel,
            payload,
        })
    } else {
        Some(Reply::Message { channel, payload })
    }
}

struct RedisSink {
    commands: mpsc::UnboundedSender<Command>,
    conn: MultiplexedConnection,
}

impl RedisSink {
    async fn request(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<()>>) -> Command,
    ) -> Result<()> {
        let (done, ack) = oneshot::channel();
        self.commands
            .send(build(done))
            .map_err(|_| anyhow::anyhow!("Redis subscription connection is closed"))?;
        ack.await
            .context("Redis subscription connection is closed")?
    }
}

#[async_trait]
impl SubscriptionSink for RedisSink {
    async fn subscribe(&mut self, channels: &[String]) -> Result<()> {
        let names = channels.to_vec();
        self.request(|done| Command::Subscribe(SubscriptionKind::Channel, names, done))
            .await
    }

    async fn psubscribe(&mut self, patterns: &[String]) -> Result<()> {
        let names = patterns.to_vec();
        self.request(|done| Command::Subscribe(SubscriptionKind::Pattern, names, done))
            .await
    }

    async fn unsubscribe(&mut self, channels: &[String]) -> Result<()> {
        let names = channels.to_vec();
        self.request(|done| Command::Unsubscribe(SubscriptionKind::Channel, names, done))
            .await
    }

    async fn punsubscribe(&mut self, patterns: &[String]) -> Result<()> {
        let names = patterns.to_vec();
        self.request(|done| Command::Unsubscribe(SubscriptionKind::Pattern, names, done))
            .await
    }

    async fn ping(&mut self) -> Result<()> {
        if self.commands.is_closed() {
            anyhow::bail!("Redis subscription connection is closed");
        }
        let _: String = redis::cmd("PING")
            .query_async(&mut self.conn)
            .await
            .context("Redis PING failed")?;
        Ok(())
    }
}

struct RedisStream {
    replies: mpsc::UnboundedReceiver<Result<Reply>>,
}

#[async_trait]
impl SubscriptionStream for RedisStream {
    async fn next_reply(&mut self) -> Result<Option<Reply>> {
        self.replies.recv().await.transpose()
    }
}
