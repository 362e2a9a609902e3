// Subscription listener — subscribes to channels/patterns on a broker and
// feeds the replies to an event handler until cancelled or failed.
//
// Lifecycle (published on a watch channel):
//   Connecting → Subscribing → Active → Draining → Terminated
//
// Started is delivered only once the broker reports as many subscriptions as
// were requested. On the way out the listener unsubscribes everything and
// waits (bounded by one keepalive interval) for the broker to confirm a
// count of zero. The reader task is always joined before run() returns.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::traits::{Broker, Reply, Subscriber, SubscriptionSink, SubscriptionStream};

pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(5);

/// Replies buffered between the reader task and the listener loop.
const REPLY_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerState {
    Connecting,
    Subscribing,
    Active,
    Draining,
    Terminated,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ListenerState::Connecting => "connecting",
            ListenerState::Subscribing => "subscribing",
            ListenerState::Active => "active",
            ListenerState::Draining => "draining",
            ListenerState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Every requested subscription is confirmed.
    Started { subscriptions: usize },
    Message { channel: String, payload: String },
    PatternMessage {
        pattern: String,
        channel: String,
        payload: String,
    },
    /// The connection failed; the listener terminates after this event.
    Error { cause: String },
}

#[async_trait]
pub trait EventHandler: Send {
    /// Handle one event. An error stops the listener and is returned from `run`.
    async fn handle(&mut self, event: &Event) -> Result<()>;
}

/// Why the listen loop stopped.
enum Exit {
    Cancelled,
    /// Handler or keepalive failure; the connection may still be usable.
    Failed(anyhow::Error),
    /// The connection itself is gone; nothing to unsubscribe from.
    Lost(anyhow::Error),
}

pub struct Listener {
    broker: Arc<dyn Broker>,
    channels: Vec<String>,
    patterns: Vec<String>,
    keepalive: Duration,
    state: watch::Sender<ListenerState>,
}

impl Listener {
    pub fn new(broker: Arc<dyn Broker>, channels: Vec<String>, patterns: Vec<String>) -> Self {
        let (state, _) = watch::channel(ListenerState::Terminated);
        Self {
            broker,
            channels,
            patterns,
            keepalive: DEFAULT_KEEPALIVE,
            state,
        }
    }

    pub fn keepalive(mut self, interval: Duration) -> Self {
        self.keepalive = interval;
        self
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ListenerState) {
        debug!(%state, "Listener state");
        self.state.send_replace(state);
    }

    /// Listen until `cancel` fires or something fails.
    ///
    /// Returns `Ok(())` after a clean cancellation. Handler errors, keepalive
    /// failures and lost connections are returned as errors. There is no
    /// retry here; supervisors call `run` again.
    pub async fn run<H>(&self, handler: &mut H, cancel: &CancellationToken) -> Result<()>
    where
        H: EventHandler + ?Sized,
    {
        if self.channels.is_empty() && self.patterns.is_empty() {
            anyhow::bail!("Listener needs at least one channel or pattern to subscribe to");
        }

        self.set_state(ListenerState::Connecting);
        let result = self.connect_and_listen(handler, cancel).await;
        self.set_state(ListenerState::Terminated);
        result
    }

    async fn connect_and_listen<H>(&self, handler: &mut H, cancel: &CancellationToken) -> Result<()>
    where
        H: EventHandler + ?Sized,
    {
        let Subscriber { mut sink, stream } = self.broker.subscriber().await?;

        self.set_state(ListenerState::Subscribing);
        let (tx, mut replies) = mpsc::channel(REPLY_BUFFER);
        let reader = spawn_reader(stream, tx);

        let exit = self.listen(sink.as_mut(), &mut replies, handler, cancel).await;

        self.set_state(ListenerState::Draining);
        let drained = match exit {
            Exit::Lost(_) => Ok(()),
            _ => self.drain(sink.as_mut(), &mut replies).await,
        };

        reader.abort();
        let _ = reader.await;

        match exit {
            Exit::Cancelled => {
                info!(channels = ?self.channels, patterns = ?self.patterns, "Listener stopped");
                drained
            }
            Exit::Failed(e) | Exit::Lost(e) => {
                if let Err(drain_err) = drained {
                    debug!(error = %drain_err, "Unsubscribe failed while shutting down");
                }
                Err(e)
            }
        }
    }

    async fn listen<H>(
        &self,
        sink: &mut dyn SubscriptionSink,
        replies: &mut mpsc::Receiver<Result<Reply>>,
        handler: &mut H,
        cancel: &CancellationToken,
    ) -> Exit
    where
        H: EventHandler + ?Sized,
    {
        if let Err(e) = self.subscribe_all(sink).await {
            return Exit::Lost(e);
        }

        let expected = self.channels.len() + self.patterns.len();
        let mut started = false;
        let mut keepalive = time::interval_at(Instant::now() + self.keepalive, self.keepalive);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Exit::Cancelled,

                _ = keepalive.tick() => {
                    if let Err(e) = sink.ping().await {
                        let e = e.context("Keepalive ping failed");
                        warn!(error = %e, "Subscription connection unresponsive");
                        deliver_error(handler, &e).await;
                        return Exit::Failed(e);
                    }
                }

                reply = replies.recv() => {
                    let event = match reply {
                        Some(Ok(Reply::Subscribed { kind, name, count })) => {
                            debug!(%kind, name = %name, count, "Subscribed");
                            if started || count != expected {
                                continue;
                            }
                            started = true;
                            self.set_state(ListenerState::Active);
                            info!(subscriptions = count, "Listener active");
                            Event::Started { subscriptions: count }
                        }
                        Some(Ok(Reply::Unsubscribed { kind, name, count })) => {
                            debug!(%kind, name = %name, count, "Unsubscribed");
                            continue;
                        }
                        Some(Ok(Reply::Message { channel, payload })) => {
                            Event::Message { channel, payload }
                        }
                        Some(Ok(Reply::PatternMessage { pattern, channel, payload })) => {
                            Event::PatternMessage { pattern, channel, payload }
                        }
                        Some(Err(e)) => {
                            deliver_error(handler, &e).await;
                            return Exit::Lost(e);
                        }
                        None => {
                            let e = anyhow::anyhow!("Subscription connection closed");
                            deliver_error(handler, &e).await;
                            return Exit::Lost(e);
                        }
                    };

                    if let Err(e) = handler.handle(&event).await {
                        warn!(error = %e, "Event handler failed, stopping listener");
                        return Exit::Failed(e);
                    }
                }
            }
        }
    }

    async fn subscribe_all(&self, sink: &mut dyn SubscriptionSink) -> Result<()> {
        if !self.channels.is_empty() {
            sink.subscribe(&self.channels).await?;
        }
        if !self.patterns.is_empty() {
            sink.psubscribe(&self.patterns).await?;
        }
        Ok(())
    }

    /// Unsubscribe everything and wait for the broker to confirm.
    /// Messages that arrive in the meantime are dropped.
    async fn drain(
        &self,
        sink: &mut dyn SubscriptionSink,
        replies: &mut mpsc::Receiver<Result<Reply>>,
    ) -> Result<()> {
        if !self.channels.is_empty() {
            sink.unsubscribe(&self.channels).await?;
        }
        if !self.patterns.is_empty() {
            sink.punsubscribe(&self.patterns).await?;
        }

        let deadline = time::sleep(self.keepalive);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    debug!("Timed out waiting for unsubscribe confirmation");
                    return Ok(());
                }
                reply = replies.recv() => match reply {
                    Some(Ok(Reply::Unsubscribed { count: 0, .. })) => return Ok(()),
                    Some(Ok(reply)) => debug!(?reply, "Dropping reply while draining"),
                    Some(Err(_)) | None => return Ok(()),
                },
            }
        }
    }
}

fn spawn_reader(
    mut stream: Box<dyn SubscriptionStream>,
    tx: mpsc::Sender<Result<Reply>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match stream.next_reply().await {
                Ok(Some(reply)) => {
                    if tx.send(Ok(reply)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
    })
}

async fn deliver_error<H>(handler: &mut H, error: &anyhow::Error)
where
    H: EventHandler + ?Sized,
{
    let event = Event::Error {
        cause: format!("{error:#}"),
    };
    if let Err(e) = handler.handle(&event).await {
        debug!(error = %e, "Event handler failed on error event");
    }
}
