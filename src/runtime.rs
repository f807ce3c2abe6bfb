//! Bot runtime: drives messaging sessions and reacts to their lifecycle.
//!
//! One `run` call owns the bot until it stops for good. Each session is a
//! full re-initialization of the client; a close that is not an explicit
//! logout is retried with exponential backoff (reset after a stable run),
//! bounded by the configured attempt budget so a persistent failure cannot
//! turn into a restart storm.

use crate::client::{ClientEvent, MessageKind, MessagingClient, SessionEnd};
use crate::config::ReconnectConfig;
use crate::events::{DashboardBus, DashboardEvent};
use crate::filing::{FilingEngine, FilingOutcome};
use crate::qr;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// A session that survives this long is considered stable; the next failure
/// starts from the initial backoff and a fresh attempt budget.
const STABLE_SESSION: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Consecutive failed sessions before giving up. 0 = retry forever.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_secs(config.initial_backoff_secs.max(1)),
            max_backoff: Duration::from_secs(
                config.max_backoff_secs.max(config.initial_backoff_secs.max(1)),
            ),
        }
    }
}

pub struct BotRuntime {
    client: Arc<dyn MessagingClient>,
    engine: Arc<FilingEngine>,
    bus: DashboardBus,
    policy: ReconnectPolicy,
}

impl BotRuntime {
    pub fn new(
        client: Arc<dyn MessagingClient>,
        engine: Arc<FilingEngine>,
        bus: DashboardBus,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            client,
            engine,
            bus,
            policy,
        }
    }

    /// Run sessions until logout or the attempt budget is spent.
    pub async fn run(self) {
        let mut backoff = self.policy.initial_backoff;
        let mut attempts = 0u32;

        loop {
            let started = tokio::time::Instant::now();
            match self.run_session().await {
                Ok(end) if end.reason.is_logged_out() => {
                    self.bus
                        .publish(DashboardEvent::ConnectionClose(end.reason.code));
                    tracing::warn!(
                        "🚫 Session logged out. Delete the auth folder and scan the QR code again."
                    );
                    return;
                }
                Ok(end) => {
                    self.bus
                        .publish(DashboardEvent::ConnectionClose(end.reason.code));
                    tracing::warn!("❌ Connection closed: {}", end.reason.code);
                }
                Err(e) => {
                    tracing::error!("❌ Messaging session failed: {e:#}");
                }
            }

            if started.elapsed() >= STABLE_SESSION {
                backoff = self.policy.initial_backoff;
                attempts = 0;
            }

            attempts += 1;
            if self.policy.max_attempts != 0 && attempts >= self.policy.max_attempts {
                tracing::error!("Giving up after {attempts} consecutive reconnect attempts");
                return;
            }

            tracing::info!("🔁 Reconnecting in {}s...", backoff.as_secs());
            tokio::time::sleep(backoff).await;
            backoff = std::cmp::min(backoff * 2, self.policy.max_backoff);
        }
    }

    /// One full client session: spawn the client, consume its events until it
    /// stops emitting, then report why it ended.
    async fn run_session(&self) -> Result<SessionEnd> {
        let (tx, mut rx) = mpsc::channel::<ClientEvent>(64);
        let client = Arc::clone(&self.client);
        let session = tokio::spawn(async move { client.run(tx).await });

        while let Some(event) = rx.recv().await {
            self.handle_event(event).await;
        }

        session.await?
    }

    async fn handle_event(&self, event: ClientEvent) {
        match event {
            ClientEvent::Qr(payload) => {
                tracing::info!("📲 Scan the QR code shown on the dashboard");
                match qr::to_data_url(&payload) {
                    Ok(url) => self.bus.publish(DashboardEvent::Qr(url)),
                    Err(e) => tracing::error!("Failed to render QR code: {e:#}"),
                }
            }
            ClientEvent::Open => {
                tracing::info!("✅ Bot connected to the messaging platform");
                self.bus.publish(DashboardEvent::ConnectionOpen);
            }
            ClientEvent::Message(msg) => match msg.kind {
                MessageKind::Text(text) => self.handle_text(&msg.sender, &text),
                MessageKind::Image(media) => {
                    let bytes = match self.client.download_media(&media).await {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            // Dropped, not retried.
                            tracing::error!("❌ Failed to download image: {e:#}");
                            return;
                        }
                    };
                    self.handle_image(&msg.sender, &bytes).await;
                }
            },
        }
    }

    fn handle_text(&self, sender: &str, text: &str) {
        match self.engine.set_folder(sender, text) {
            FilingOutcome::FolderSet { folder, previous } => {
                if let Some(tally) = previous {
                    if tally.images > 0 {
                        tracing::info!(
                            "📝 [{sender}] '{}' received {} images",
                            tally.folder,
                            tally.images
                        );
                    }
                }
                tracing::info!("📁 [{sender}] Folder configured: {folder}");
            }
            FilingOutcome::Ignored => {
                tracing::debug!("[{sender}] blank text message ignored");
            }
            FilingOutcome::Rejected => {
                tracing::warn!("⚠️ [{sender}] Folder name {text:?} has no usable characters, keeping the previous folder");
            }
            outcome => {
                tracing::debug!("[{sender}] unexpected text outcome: {outcome:?}");
            }
        }
    }

    async fn handle_image(&self, sender: &str, bytes: &[u8]) {
        match self.engine.file_image(sender, bytes).await {
            Ok(FilingOutcome::Saved { folder, path, .. }) => {
                tracing::info!("📸 [{sender}] Image saved in '{folder}': {}", path.display());
            }
            Ok(FilingOutcome::Discarded) => {
                tracing::warn!("⚠️ [{sender}] Image received with no folder configured");
            }
            Ok(outcome) => {
                tracing::debug!("[{sender}] unexpected image outcome: {outcome:?}");
            }
            Err(e) => {
                // The process keeps running; the image is lost.
                tracing::error!("❌ [{sender}] Failed to store image: {e}");
            }
        }
    }
}
