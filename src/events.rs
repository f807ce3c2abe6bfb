//! Dashboard event bus.
//!
//! Everything the browser dashboard sees — log lines, QR codes, connection
//! state — flows through one broadcast channel. WebSocket handlers subscribe;
//! the tracing layer and the bot runtime publish.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A server→client frame on the dashboard WebSocket.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum DashboardEvent {
    /// A log line produced anywhere in the process.
    Log(String),
    /// A freshly rendered pairing QR code as a PNG data URL.
    Qr(String),
    /// The messaging session closed with the given platform status code.
    ConnectionClose(u16),
    /// The messaging session is open.
    ConnectionOpen,
}

/// Broadcast fan-out to all connected dashboard clients.
///
/// Slow or absent subscribers never block publishers; lagged receivers skip
/// ahead. The most recent QR code is cached so a browser that connects after
/// pairing started still gets something to scan.
#[derive(Clone)]
pub struct DashboardBus {
    tx: broadcast::Sender<DashboardEvent>,
    latest_qr: Arc<Mutex<Option<String>>>,
}

impl DashboardBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            latest_qr: Arc::new(Mutex::new(None)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.tx.subscribe()
    }

    /// Publish to every connected client. A send error only means nobody is
    /// listening right now, which is fine.
    pub fn publish(&self, event: DashboardEvent) {
        if let DashboardEvent::Qr(ref url) = event {
            *self.latest_qr.lock() = Some(url.clone());
        }
        let _ = self.tx.send(event);
    }

    /// The most recently issued QR code, if any.
    pub fn latest_qr(&self) -> Option<String> {
        self.latest_qr.lock().clone()
    }
}
