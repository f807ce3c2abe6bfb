//! Bridge-backed messaging client.
//!
//! The bridge is an external binary that owns the actual platform session and
//! speaks newline-delimited JSON on its stdio: events flow out on stdout,
//! commands (currently only media downloads) flow in on stdin. Spawning and
//! binary discovery follow the sidecar conventions used elsewhere in this
//! codebase's lineage: env var override, workspace candidates, then PATH.
//!
//! Wire frames (one JSON object per line):
//!   out: {"event":"qr","data":"..."}
//!        {"event":"open"}
//!        {"event":"message","sender":"...","text":"..."}
//!        {"event":"message","sender":"...","media_id":"..."}
//!        {"event":"media","media_id":"...","data":"<base64>"}   (reply)
//!        {"event":"close","code":401}
//!   in:  {"cmd":"download","media_id":"..."}

use super::{
    ClientEvent, DisconnectReason, InboundMessage, MediaRef, MessageKind, MessagingClient,
    SessionEnd,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

const BRIDGE_BIN_ENV: &str = "SNAPFILE_BRIDGE_BIN";
const BRIDGE_BIN_NAME: &str = "snapfile-bridge";

type DownloadResult = std::result::Result<Vec<u8>, String>;

/// Outstanding download requests keyed by media id. Shared with the stdout
/// reader task, which resolves entries as `media` frames arrive.
#[derive(Default)]
struct PendingDownloads(Mutex<HashMap<String, oneshot::Sender<DownloadResult>>>);

impl PendingDownloads {
    fn insert(&self, media_id: String, tx: oneshot::Sender<DownloadResult>) {
        self.0.lock().insert(media_id, tx);
    }

    fn remove(&self, media_id: &str) -> Option<oneshot::Sender<DownloadResult>> {
        self.0.lock().remove(media_id)
    }

    fn fail_all(&self, reason: &str) {
        let mut pending = self.0.lock();
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(reason.to_string()));
        }
    }
}

pub struct BridgeClient {
    configured_binary: Option<PathBuf>,
    auth_dir: PathBuf,
    pending: Arc<PendingDownloads>,
    /// Stdin writer of the active session, if one is running.
    commands: Mutex<Option<mpsc::Sender<String>>>,
}

impl BridgeClient {
    pub fn new(configured_binary: Option<PathBuf>, auth_dir: impl Into<PathBuf>) -> Self {
        Self {
            configured_binary,
            auth_dir: auth_dir.into(),
            pending: Arc::new(PendingDownloads::default()),
            commands: Mutex::new(None),
        }
    }

    /// Locate the bridge binary: explicit config, env override, workspace
    /// candidates, then PATH.
    fn resolve_binary(&self) -> Result<PathBuf> {
        if let Some(ref configured) = self.configured_binary {
            if configured.exists() {
                return Ok(configured.clone());
            }
            anyhow::bail!(
                "Configured bridge binary {} does not exist",
                configured.display()
            );
        }

        if let Some(path) = std::env::var(BRIDGE_BIN_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
        {
            let pb = PathBuf::from(path);
            if pb.exists() {
                return Ok(pb);
            }
        }

        let candidates = [
            Path::new("./bridge").join(BRIDGE_BIN_NAME),
            PathBuf::from(format!("./{BRIDGE_BIN_NAME}")),
        ];
        for candidate in candidates {
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        which::which(BRIDGE_BIN_NAME).with_context(|| {
            format!(
                "No messaging bridge found. Install '{BRIDGE_BIN_NAME}' on PATH or set {BRIDGE_BIN_ENV}."
            )
        })
    }

}

enum FrameAction {
    Emit(ClientEvent),
    End(SessionEnd),
}

/// Turn one inbound frame into an action for the delivery loop. Media frames
/// resolve their pending download right here, in the reader task, so a reply
/// can never queue behind a slow event consumer.
fn classify_frame(pending: &PendingDownloads, frame: BridgeFrame) -> Option<FrameAction> {
    match frame {
        BridgeFrame::Qr { data } => Some(FrameAction::Emit(ClientEvent::Qr(data))),
        BridgeFrame::Open => Some(FrameAction::Emit(ClientEvent::Open)),
        BridgeFrame::Message {
            sender,
            text,
            media_id,
        } => {
            let kind = match (text, media_id) {
                (Some(text), _) => MessageKind::Text(text),
                (None, Some(id)) => MessageKind::Image(MediaRef { id }),
                (None, None) => {
                    tracing::debug!("bridge message frame with no payload, skipping");
                    return None;
                }
            };
            Some(FrameAction::Emit(ClientEvent::Message(InboundMessage {
                sender,
                kind,
            })))
        }
        BridgeFrame::Media {
            media_id,
            data,
            error,
        } => {
            let result = match (data, error) {
                (Some(b64), _) => BASE64
                    .decode(b64.as_bytes())
                    .map_err(|e| format!("bridge sent undecodable media: {e}")),
                (None, Some(err)) => Err(err),
                (None, None) => Err("bridge sent empty media frame".to_string()),
            };
            if let Some(tx) = pending.remove(&media_id) {
                let _ = tx.send(result);
            } else {
                tracing::warn!("bridge media frame for unknown request {media_id}");
            }
            None
        }
        BridgeFrame::Close { code } => Some(FrameAction::End(SessionEnd {
            reason: DisconnectReason::new(code.unwrap_or(DisconnectReason::CONNECTION_LOST)),
        })),
    }
}

#[async_trait]
impl MessagingClient for BridgeClient {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn run(&self, events: mpsc::Sender<ClientEvent>) -> Result<SessionEnd> {
        let bin_path = self.resolve_binary()?;

        let mut child = Command::new(&bin_path)
            .arg("--auth")
            .arg(&self.auth_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start bridge '{}'", bin_path.display()))?;

        let mut stdin = child.stdin.take().context("Bridge stdin unavailable")?;
        let stdout = child.stdout.take().context("Bridge stdout unavailable")?;

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<String>(32);
        *self.commands.lock() = Some(cmd_tx);
        let writer = tokio::spawn(async move {
            while let Some(line) = cmd_rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                    || stdin.flush().await.is_err()
                {
                    break;
                }
            }
        });

        // The reader task owns stdout and never awaits the event channel, so
        // a consumer that is busy downloading media cannot stall the loop
        // that resolves its download. Actions queue unbounded in between.
        let (action_tx, mut action_rx) = mpsc::unbounded_channel::<FrameAction>();
        let pending = Arc::clone(&self.pending);
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    // EOF or a broken pipe: the bridge died without a close frame.
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("bridge stdout read failed: {e}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let frame = match serde_json::from_str::<BridgeFrame>(&line) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::debug!("unparseable bridge frame ({e}): {line}");
                        continue;
                    }
                };
                match classify_frame(&pending, frame) {
                    Some(action) => {
                        let ended = matches!(action, FrameAction::End(_));
                        if action_tx.send(action).is_err() || ended {
                            break;
                        }
                    }
                    None => {}
                }
            }
        });

        let mut end = SessionEnd {
            reason: DisconnectReason::new(DisconnectReason::CONNECTION_LOST),
        };
        while let Some(action) = action_rx.recv().await {
            match action {
                FrameAction::Emit(event) => {
                    // A dropped receiver means the runtime is gone; stop.
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
                FrameAction::End(session_end) => {
                    end = session_end;
                    break;
                }
            }
        }

        *self.commands.lock() = None;
        self.pending.fail_all("bridge session ended");
        reader.abort();
        writer.abort();
        let _ = child.start_kill();
        let _ = child.wait().await;

        Ok(end)
    }

    async fn download_media(&self, media: &MediaRef) -> Result<Vec<u8>> {
        let commands = self
            .commands
            .lock()
            .clone()
            .context("No active bridge session")?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(media.id.clone(), tx);

        let cmd = serde_json::json!({"cmd": "download", "media_id": media.id}).to_string();
        if commands.send(cmd).await.is_err() {
            self.pending.remove(&media.id);
            anyhow::bail!("Bridge session closed before the download was sent");
        }

        match rx.await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(err)) => anyhow::bail!("Bridge download failed: {err}"),
            Err(_) => anyhow::bail!("Bridge session ended mid-download"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
enum BridgeFrame {
    Qr {
        data: String,
    },
    Open,
    Message {
        sender: String,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        media_id: Option<String>,
    },
    Media {
        media_id: String,
        #[serde(default)]
        data: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    Close {
        #[serde(default)]
        code: Option<u16>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> BridgeClient {
        BridgeClient::new(None, "./auth")
    }

    #[test]
    fn frames_decode_from_the_wire_format() {
        let qr: BridgeFrame = serde_json::from_str(r#"{"event":"qr","data":"2@abc"}"#).unwrap();
        assert!(matches!(qr, BridgeFrame::Qr { data } if data == "2@abc"));

        let msg: BridgeFrame =
            serde_json::from_str(r#"{"event":"message","sender":"u1","text":"trip"}"#).unwrap();
        assert!(matches!(
            msg,
            BridgeFrame::Message { sender, text: Some(t), media_id: None } if sender == "u1" && t == "trip"
        ));

        let close: BridgeFrame = serde_json::from_str(r#"{"event":"close","code":401}"#).unwrap();
        assert!(matches!(close, BridgeFrame::Close { code: Some(401) }));

        let close: BridgeFrame = serde_json::from_str(r#"{"event":"close"}"#).unwrap();
        assert!(matches!(close, BridgeFrame::Close { code: None }));
    }

    #[test]
    fn qr_and_message_frames_become_client_events() {
        let pending = PendingDownloads::default();

        let frame: BridgeFrame = serde_json::from_str(r#"{"event":"qr","data":"2@abc"}"#).unwrap();
        assert!(matches!(
            classify_frame(&pending, frame),
            Some(FrameAction::Emit(ClientEvent::Qr(data))) if data == "2@abc"
        ));

        let frame: BridgeFrame =
            serde_json::from_str(r#"{"event":"message","sender":"u1","media_id":"m7"}"#).unwrap();
        match classify_frame(&pending, frame) {
            Some(FrameAction::Emit(ClientEvent::Message(msg))) => {
                assert_eq!(msg.sender, "u1");
                assert_eq!(msg.kind, MessageKind::Image(MediaRef { id: "m7".into() }));
            }
            _ => panic!("expected a message event"),
        }
    }

    #[test]
    fn close_frame_ends_the_session_with_its_code() {
        let pending = PendingDownloads::default();
        let frame: BridgeFrame = serde_json::from_str(r#"{"event":"close","code":401}"#).unwrap();
        match classify_frame(&pending, frame) {
            Some(FrameAction::End(end)) => assert!(end.reason.is_logged_out()),
            _ => panic!("expected the session to end"),
        }
    }

    #[tokio::test]
    async fn media_frame_resolves_a_pending_download() {
        let pending = PendingDownloads::default();
        let (tx, rx) = oneshot::channel();
        pending.insert("m1".into(), tx);

        let frame: BridgeFrame =
            serde_json::from_str(r#"{"event":"media","media_id":"m1","data":"aGVsbG8="}"#).unwrap();
        assert!(classify_frame(&pending, frame).is_none());

        assert_eq!(rx.await.unwrap().unwrap(), b"hello");
    }

    #[tokio::test]
    async fn media_error_frame_propagates_the_failure() {
        let pending = PendingDownloads::default();
        let (tx, rx) = oneshot::channel();
        pending.insert("m2".into(), tx);

        let frame: BridgeFrame = serde_json::from_str(
            r#"{"event":"media","media_id":"m2","error":"expired"}"#,
        )
        .unwrap();
        assert!(classify_frame(&pending, frame).is_none());

        assert_eq!(rx.await.unwrap().unwrap_err(), "expired");
    }

    #[tokio::test]
    async fn download_without_a_session_fails_cleanly() {
        let client = client();
        let err = client
            .download_media(&MediaRef { id: "m1".into() })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No active bridge session"));
    }
}
