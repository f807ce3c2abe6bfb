//! Messaging client seam.
//!
//! All protocol work — authentication, encryption, QR pairing, session
//! persistence — belongs to the external messaging client. This module
//! defines the event-stream contract the rest of the bot consumes, plus the
//! bridge-backed implementation that delegates to an external process.

pub mod bridge;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::sync::mpsc;

pub use bridge::BridgeClient;

/// Opaque handle for downloading a piece of inbound media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Text(String),
    Image(MediaRef),
}

/// One inbound message from the platform's addressing scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Opaque sender identity string.
    pub sender: String,
    pub kind: MessageKind,
}

/// Platform status code attached to a session close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectReason {
    pub code: u16,
}

impl DisconnectReason {
    /// The platform signalled an explicit logout; stored credentials are dead.
    pub const LOGGED_OUT: u16 = 401;
    /// Generic connection loss, used when the client reports no code.
    pub const CONNECTION_LOST: u16 = 408;

    pub fn new(code: u16) -> Self {
        Self { code }
    }

    pub fn is_logged_out(self) -> bool {
        self.code == Self::LOGGED_OUT
    }
}

/// Events a client session emits while it is alive. Session close is not an
/// event; it is the session's return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A pairing QR payload is available for display.
    Qr(String),
    /// The session is connected and authenticated.
    Open,
    /// An inbound message arrived.
    Message(InboundMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEnd {
    pub reason: DisconnectReason,
}

/// A connection-capable messaging client. `run` performs one full session:
/// initialize, emit events until the platform closes the connection, report
/// why. Restarting after a close is the caller's decision.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, events: mpsc::Sender<ClientEvent>) -> Result<SessionEnd>;

    /// Fetch the bytes behind an inbound media reference. No retry and no
    /// timeout; a failure drops the message.
    async fn download_media(&self, media: &MediaRef) -> Result<Vec<u8>>;
}

/// Delete all stored session credentials. Idempotent; the operator restarts
/// the process afterwards to re-pair.
pub async fn purge_credentials(auth_dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(auth_dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| {
            format!("Failed to delete credentials at {}", auth_dir.display())
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logged_out_code_matches_platform_convention() {
        assert!(DisconnectReason::new(401).is_logged_out());
        assert!(!DisconnectReason::new(428).is_logged_out());
        assert!(!DisconnectReason::new(DisconnectReason::CONNECTION_LOST).is_logged_out());
    }

    #[tokio::test]
    async fn purge_removes_credentials_and_tolerates_absence() {
        let temp = tempfile::tempdir().unwrap();
        let auth = temp.path().join("auth");
        std::fs::create_dir_all(auth.join("keys")).unwrap();
        std::fs::write(auth.join("creds.json"), b"{}").unwrap();

        purge_credentials(&auth).await.unwrap();
        assert!(!auth.exists());

        // Second purge is a no-op, not an error.
        purge_credentials(&auth).await.unwrap();
    }
}
