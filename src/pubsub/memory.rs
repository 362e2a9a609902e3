// MemoryBroker — in-process pub/sub for single-process deployments and tests.
//
// Every subscription connection registers an unbounded reply queue in a
// shared registry. Publishing walks the registry under a std Mutex and pushes
// replies synchronously, so a publish that returns has already queued the
// message for every matching subscriber. Patterns use Redis-style globs
// (`*`, `?`, `[...]`).

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use globset::{GlobBuilder, GlobMatcher};
use tokio::sync::mpsc;
use tracing::debug;

use super::traits::{
    Broker, Reply, Subscriber, SubscriptionKind, SubscriptionSink, SubscriptionStream,
};

type ReplySender = mpsc::UnboundedSender<Result<Reply>>;

struct Connection {
    replies: ReplySender,
    channels: BTreeSet<String>,
    patterns: Vec<(String, GlobMatcher)>,
}

impl Connection {
    fn count(&self) -> usize {
        self.channels.len() + self.patterns.len()
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    connections: HashMap<u64, Connection>,
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    registry: Arc<Mutex<Registry>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open subscription connections.
    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    /// Total channel and pattern subscriptions across all connections.
    pub fn subscription_count(&self) -> usize {
        self.lock().connections.values().map(Connection::count).sum()
    }

    /// Drop every subscription connection as if the broker went away.
    /// Each stream yields an error and then closes; later commands fail.
    pub fn disconnect_all(&self) {
        let connections: Vec<Connection> = self.lock().connections.drain().map(|(_, c)| c).collect();
        debug!(connections = connections.len(), "Disconnecting all subscribers");
        for conn in connections {
            let _ = conn
                .replies
                .send(Err(anyhow::anyhow!("Connection reset by broker")));
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn subscriber(&self) -> Result<Subscriber> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut registry = self.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.connections.insert(
                id,
                Connection {
                    replies: tx,
                    channels: BTreeSet::new(),
                    patterns: Vec::new(),
                },
            );
            id
        };

        Ok(Subscriber {
            sink: Box::new(MemorySink {
                id,
                registry: self.registry.clone(),
            }),
            stream: Box::new(MemoryStream { replies: rx }),
        })
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        let registry = self.lock();
        let mut delivered = 0;
        for conn in registry.connections.values() {
            if conn.channels.contains(channel) {
                let reply = Reply::Message {
                    channel: channel.to_string(),
                    payload: payload.to_string(),
                };
                if conn.replies.send(Ok(reply)).is_ok() {
                    delivered += 1;
                }
            }
            for (pattern, matcher) in &conn.patterns {
                if matcher.is_match(channel) {
                    let reply = Reply::PatternMessage {
                        pattern: pattern.clone(),
                        channel: channel.to_string(),
                        payload: payload.to_string(),
                    };
                    if conn.replies.send(Ok(reply)).is_ok() {
                        delivered += 1;
                    }
                }
            }
        }
        Ok(delivered)
    }
}

struct MemorySink {
    id: u64,
    registry: Arc<Mutex<Registry>>,
}

impl MemorySink {
    /// Run `f` against this sink's connection, failing if it was disconnected.
    fn with_connection<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Connection) -> Result<()>,
    {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = registry
            .connections
            .get_mut(&self.id)
            .context("Subscription connection is closed")?;
        f(conn)
    }
}

fn ack(conn: &Connection, reply: Reply) -> Result<()> {
    conn.replies
        .send(Ok(reply))
        .map_err(|_| anyhow::anyhow!("Subscription connection is closed"))
}

fn compile_pattern(pattern: &str) -> Result<GlobMatcher> {
    let glob = GlobBuilder::new(pattern)
        .literal_separator(false)
        .backslash_escape(true)
        .build()
        .with_context(|| format!("Invalid subscription pattern {pattern:?}"))?;
    Ok(glob.compile_matcher())
}

#[async_trait]
impl SubscriptionSink for MemorySink {
    async fn subscribe(&mut self, channels: &[String]) -> Result<()> {
        self.with_connection(|conn| {
            for channel in channels {
                conn.channels.insert(channel.clone());
                let count = conn.count();
                ack(
                    conn,
                    Reply::Subscribed {
                        kind: SubscriptionKind::Channel,
                        name: channel.clone(),
                        count,
                    },
                )?;
            }
            Ok(())
        })
    }

    async fn psubscribe(&mut self, patterns: &[String]) -> Result<()> {
        let compiled = patterns
            .iter()
            .map(|p| Ok((p.clone(), compile_pattern(p)?)))
            .collect::<Result<Vec<_>>>()?;
        self.with_connection(|conn| {
            for (pattern, matcher) in compiled {
                if !conn.patterns.iter().any(|(p, _)| *p == pattern) {
                    conn.patterns.push((pattern.clone(), matcher));
                }
                let count = conn.count();
                ack(
                    conn,
                    Reply::Subscribed {
                        kind: SubscriptionKind::Pattern,
                        name: pattern,
                        count,
                    },
                )?;
            }
            Ok(())
        })
    }

    async fn unsubscribe(&mut self, channels: &[String]) -> Result<()> {
        self.with_connection(|conn| {
            for channel in channels {
                conn.channels.remove(channel);
                let count = conn.count();
                ack(
                    conn,
                    Reply::Unsubscribed {
                        kind: SubscriptionKind::Channel,
                        name: channel.clone(),
                        count,
                    },
                )?;
            }
            Ok(())
        })
    }

    async fn punsubscribe(&mut self, patterns: &[String]) -> Result<()> {
        self.with_connection(|conn| {
            for pattern in patterns {
                conn.patterns.retain(|(p, _)| p != pattern);
                let count = conn.count();
                ack(
                    conn,
                    Reply::Unsubscribed {
                        kind: SubscriptionKind::Pattern,
                        name: pattern.clone(),
                        count,
                    },
                )?;
            }
            Ok(())
        })
    }

    async fn ping(&mut self) -> Result<()> {
        self.with_connection(|_| Ok(()))
    }
}

impl Drop for MemorySink {
    fn drop(&mut self) {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.connections.remove(&self.id);
    }
}

struct MemoryStream {
    replies: mpsc::UnboundedReceiver<Result<Reply>>,
}

#[async_trait]
impl SubscriptionStream for MemoryStream {
    async fn next_reply(&mut self) -> Result<Option<Reply>> {
        self.replies.recv().await.transpose()
    }
}
