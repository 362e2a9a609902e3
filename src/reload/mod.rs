// Reload coordinator — listens for reload notifications and rebuilds the
// dictionary cache from the term store.
//
// A payload equal to the reload command (trimmed, case-insensitive) on the
// reload channel triggers DictionaryCache::reload. Everything else is logged
// and ignored. A failed reload leaves the previous snapshot serving and the
// listener running.
//
// run() supervises the listener: when the subscription connection fails and a
// resubscribe delay is configured it waits and subscribes again.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::db::TermStore;
use crate::dictionary::DictionaryCache;
use crate::pubsub::listener::DEFAULT_KEEPALIVE;
use crate::pubsub::{Broker, Event, EventHandler, Listener, ListenerState};

pub const DEFAULT_CHANNEL: &str = "dictionary_up";
pub const DEFAULT_COMMAND: &str = "up";

/// What happens after a successful reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReloadPolicy {
    /// Keep listening for further reload commands.
    #[default]
    Persistent,
    /// Stop listening after the first successful reload.
    OneShot,
}

impl fmt::Display for ReloadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReloadPolicy::Persistent => write!(f, "persistent"),
            ReloadPolicy::OneShot => write!(f, "one-shot"),
        }
    }
}

impl FromStr for ReloadPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "persistent" => Ok(ReloadPolicy::Persistent),
            "one-shot" | "oneshot" | "once" => Ok(ReloadPolicy::OneShot),
            other => anyhow::bail!("Unknown reload policy {other:?} (expected persistent or one-shot)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReloadSettings {
    pub channel: String,
    pub command: String,
    pub policy: ReloadPolicy,
    pub keepalive: Duration,
    /// Wait before subscribing again after the listener fails. `None` means
    /// the failure is returned from `run` instead.
    pub resubscribe_delay: Option<Duration>,
}

impl Default for ReloadSettings {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            command: DEFAULT_COMMAND.to_string(),
            policy: ReloadPolicy::default(),
            keepalive: DEFAULT_KEEPALIVE,
            resubscribe_delay: Some(Duration::from_secs(5)),
        }
    }
}

/// Reload progress, shared with the status command and the web API.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReloadStatus {
    pub subscribed: bool,
    pub reload_count: u64,
    pub term_count: usize,
    pub last_reload_at: Option<String>,
    pub last_error: Option<String>,
}

pub type SharedReloadStatus = Arc<RwLock<ReloadStatus>>;

pub struct ReloadCoordinator {
    cache: Arc<DictionaryCache>,
    store: Arc<dyn TermStore>,
    settings: ReloadSettings,
    listener: Listener,
    status: SharedReloadStatus,
}

impl ReloadCoordinator {
    pub fn new(
        cache: Arc<DictionaryCache>,
        store: Arc<dyn TermStore>,
        broker: Arc<dyn Broker>,
        settings: ReloadSettings,
    ) -> Self {
        info!(
            channel = %settings.channel,
            command = %settings.command,
            policy = %settings.policy,
            "Reload coordinator configured"
        );
        let listener = Listener::new(broker, vec![settings.channel.clone()], Vec::new())
            .keepalive(settings.keepalive);
        let status = ReloadStatus {
            term_count: cache.snapshot().len(),
            ..ReloadStatus::default()
        };
        Self {
            cache,
            store,
            settings,
            listener,
            status: Arc::new(RwLock::new(status)),
        }
    }

    pub fn status(&self) -> SharedReloadStatus {
        self.status.clone()
    }

    pub fn settings(&self) -> &ReloadSettings {
        &self.settings
    }

    pub fn listener_state(&self) -> ListenerState {
        self.listener.state()
    }

    pub fn watch_listener(&self) -> watch::Receiver<ListenerState> {
        self.listener.watch_state()
    }

    /// Listen for reload commands until `cancel` fires, a one-shot reload
    /// completes, or the listener fails with no resubscribe delay configured.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        loop {
            let session = cancel.child_token();
            let mut handler = ReloadHandler {
                coordinator: self,
                session: session.clone(),
                finished: false,
            };
            let result = self.listener.run(&mut handler, &session).await;
            self.status.write().await.subscribed = false;

            if cancel.is_cancelled() || handler.finished {
                return result;
            }

            let err = match result {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            self.status.write().await.last_error = Some(format!("{err:#}"));

            let Some(delay) = self.settings.resubscribe_delay else {
                return Err(err);
            };
            warn!(
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "Reload listener failed, resubscribing"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn handle_payload(&self, channel: &str, payload: &str) -> bool {
        if channel != self.settings.channel {
            info!(channel, "Ignoring message on unexpected channel");
            return false;
        }
        let command = payload.trim().to_lowercase();
        if command != self.settings.command.trim().to_lowercase() {
            info!(channel, payload, "Ignoring unrecognized reload payload");
            return false;
        }

        match self.cache.reload(self.store.as_ref()).await {
            Ok(count) => {
                let mut status = self.status.write().await;
                status.reload_count += 1;
                status.term_count = count;
                status.last_reload_at = Some(chrono::Utc::now().to_rfc3339());
                status.last_error = None;
                info!(terms = count, reloads = status.reload_count, "Dictionary reloaded");
                true
            }
            Err(e) => {
                error!(error = %e, "Dictionary reload failed, keeping previous snapshot");
                self.status.write().await.last_error = Some(format!("{e:#}"));
                false
            }
        }
    }
}

struct ReloadHandler<'a> {
    coordinator: &'a ReloadCoordinator,
    /// Cancelled by a one-shot reload to stop this listener session.
    session: CancellationToken,
    finished: bool,
}

#[async_trait]
impl<'a> EventHandler for ReloadHandler<'a> {
    async fn handle(&mut self, event: &Event) -> Result<()> {
        let reloaded = match event {
            Event::Started { subscriptions } => {
                info!(subscriptions, "Listening for reload commands");
                self.coordinator.status.write().await.subscribed = true;
                false
            }
            Event::Message { channel, payload } => {
                self.coordinator.handle_payload(channel, payload).await
            }
            Event::PatternMessage { channel, payload, .. } => {
                self.coordinator.handle_payload(channel, payload).await
            }
            Event::Error { cause } => {
                error!(cause = %cause, "Reload subscription failed");
                let mut status = self.coordinator.status.write().await;
                status.subscribed = false;
                status.last_error = Some(cause.clone());
                false
            }
        };

        if reloaded && self.coordinator.settings.policy == ReloadPolicy::OneShot {
            info!("One-shot reload complete, stopping listener");
            self.finished = true;
            self.session.cancel();
        }
        Ok(())
    }
}

/// Ask every listening process to reload its dictionary.
/// Returns how many subscriptions received the command.
pub async fn publish_reload(broker: &dyn Broker, channel: &str, command: &str) -> Result<usize> {
    let receivers = broker.publish(channel, command).await?;
    info!(channel, receivers, "Published reload command");
    Ok(receivers)
}
