//! Notification side-channel: a websocket endpoint for dashboards.
//!
//! Observers connected to `/ws` receive every `"bot message"` event. They can
//! also push events of their own:
//!
//! - `{"event": "bot message", "data": ...}` is relayed to all observers
//! - `{"event": "notifyBot"}` pings the configured default user
//! - `{"event": "upload", "filename": "...", "data": "<base64>"}` and raw
//!   binary frames are forwarded to the upload channel as files

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::bot::platform::Platform;
use crate::error::BotError;

pub const BOT_MESSAGE_EVENT: &str = "bot message";
pub const WAITING_NOTICE: &str = "Someone is waiting for you";
const DEFAULT_ARTIFACT_NAME: &str = "artifact.png";
const OBSERVER_BUFFER: usize = 64;

/// Fan-out of JSON events to every connected observer. Fire-and-forget.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<String>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(OBSERVER_BUFFER);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Returns how many observers the event reached.
    pub fn publish(&self, event: &str, data: Value) -> usize {
        let payload = json!({ "event": event, "data": data }).to_string();
        let reached = self.tx.send(payload).unwrap_or(0);
        debug!("Published {event:?} to {reached} observer(s)");
        reached
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event")]
enum InboundEvent {
    #[serde(rename = "bot message")]
    BotMessage {
        #[serde(default)]
        data: Value,
    },
    #[serde(rename = "notifyBot")]
    NotifyBot {
        #[serde(default)]
        data: Value,
    },
    #[serde(rename = "upload")]
    Upload {
        #[serde(default)]
        filename: Option<String>,
        data: String,
    },
}

/// Shared state of the side-channel server.
#[derive(Clone)]
pub struct SideChannel {
    notifier: Notifier,
    platform: Arc<dyn Platform>,
    upload_channel: String,
    default_user: Option<String>,
    upload_dir: PathBuf,
}

impl SideChannel {
    pub fn new(
        notifier: Notifier,
        platform: Arc<dyn Platform>,
        upload_channel: String,
        default_user: Option<String>,
        upload_dir: PathBuf,
    ) -> Self {
        Self {
            notifier,
            platform,
            upload_channel,
            default_user,
            upload_dir,
        }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(|| async { "ok" }))
            .with_state(self)
    }

    pub async fn serve(self, addr: SocketAddr) -> Result<(), BotError> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Notification side-channel listening on {addr}");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    async fn run_socket(self, socket: WebSocket) {
        let mut rx = self.notifier.subscribe();
        let (mut sender, mut receiver) = socket.split();

        let relay = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => {
                        if sender.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => debug!("Observer lagged, skipped {skipped} event(s)"),
                    Err(RecvError::Closed) => break,
                }
            }
        });

        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => self.handle_text(text.as_str()).await,
                Message::Binary(bytes) => self.handle_artifact(DEFAULT_ARTIFACT_NAME, &bytes).await,
                Message::Close(_) => break,
                _ => {}
            }
        }

        relay.abort();
    }

    /// Handle one inbound JSON event. Malformed input is dropped.
    pub async fn handle_text(&self, text: &str) {
        let event = match serde_json::from_str::<InboundEvent>(text) {
            Ok(event) => event,
            Err(e) => {
                debug!("Ignoring side-channel frame: {e}");
                return;
            }
        };

        match event {
            InboundEvent::BotMessage { data } => {
                info!("Relaying bot message: {data}");
                self.notifier.publish(BOT_MESSAGE_EVENT, data);
            }
            InboundEvent::NotifyBot { data } => {
                info!("notifyBot: {data}");
                let Some(ref user) = self.default_user else {
                    warn!("notifyBot received but no default user is configured");
                    return;
                };
                if let Err(e) = self.platform.send_to_user(user, WAITING_NOTICE).await {
                    warn!("Failed to notify {user}: {e}");
                }
            }
            InboundEvent::Upload { filename, data } => match STANDARD.decode(data.trim()) {
                Ok(bytes) => {
                    let name = filename.as_deref().unwrap_or(DEFAULT_ARTIFACT_NAME);
                    self.handle_artifact(name, &bytes).await;
                }
                Err(e) => warn!("Upload payload is not valid base64: {e}"),
            },
        }
    }

    async fn handle_artifact(&self, filename: &str, bytes: &[u8]) {
        match self.forward_artifact(filename, bytes).await {
            Ok(()) => info!("Forwarded {} ({} bytes) to #{}", filename, bytes.len(), self.upload_channel),
            Err(e) => warn!("Artifact upload failed: {e}"),
        }
    }

    /// Stage the bytes in a scratch directory and upload them. The directory
    /// is removed when this returns, whether or not the upload worked.
    pub async fn forward_artifact(&self, filename: &str, bytes: &[u8]) -> Result<(), BotError> {
        if bytes.is_empty() {
            return Err(BotError::upstream("file upload", "empty artifact"));
        }
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        let staging = tempfile::Builder::new()
            .prefix("upload-")
            .tempdir_in(&self.upload_dir)?;
        let path = staging.path().join(sanitize_file_name(filename));
        tokio::fs::write(&path, bytes).await?;

        self.platform.upload_file(&path, &self.upload_channel).await
    }
}

async fn ws_handler(State(state): State<SideChannel>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| state.run_socket(socket))
}

/// Keep only the final path component and a conservative character set.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        DEFAULT_ARTIFACT_NAME.to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::testing::{RecordingPlatform, Sent};

    fn side_channel(platform: Arc<RecordingPlatform>, dir: &std::path::Path) -> (SideChannel, Notifier) {
        let notifier = Notifier::new();
        let side = SideChannel::new(
            notifier.clone(),
            platform,
            "frontdesk".to_string(),
            Some("erichardson".to_string()),
            dir.to_path_buf(),
        );
        (side, notifier)
    }

    fn staged_entries(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("door.png"), "door.png");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\temp\\cam 1.jpg"), "cam_1.jpg");
        assert_eq!(sanitize_file_name(".hidden"), "hidden");
        assert_eq!(sanitize_file_name(""), "artifact.png");
        assert_eq!(sanitize_file_name("dir/"), "artifact.png");
    }

    #[test]
    fn test_publish_without_observers() {
        let notifier = Notifier::new();
        assert_eq!(notifier.publish(BOT_MESSAGE_EVENT, json!({})), 0);
    }

    #[tokio::test]
    async fn test_bot_message_is_relayed_to_all_observers() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(RecordingPlatform::default());
        let (side, notifier) = side_channel(platform, dir.path());
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();

        side.handle_text(r#"{"event":"bot message","data":{"text":"visitor at door"}}"#).await;

        for rx in [&mut first, &mut second] {
            let payload: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(payload["event"], "bot message");
            assert_eq!(payload["data"]["text"], "visitor at door");
        }
    }

    #[tokio::test]
    async fn test_notify_bot_messages_default_user() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(RecordingPlatform::default());
        let (side, _) = side_channel(platform.clone(), dir.path());

        side.handle_text(r#"{"event":"notifyBot","data":"ring"}"#).await;

        assert_eq!(
            platform.sent(),
            vec![Sent::User { user: "erichardson".into(), text: WAITING_NOTICE.into() }]
        );
    }

    #[tokio::test]
    async fn test_notify_bot_without_default_user() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(RecordingPlatform::default());
        let side = SideChannel::new(
            Notifier::new(),
            platform.clone(),
            "frontdesk".into(),
            None,
            dir.path().to_path_buf(),
        );
        side.handle_text(r#"{"event":"notifyBot"}"#).await;
        assert!(platform.sent().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_frames_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(RecordingPlatform::default());
        let (side, notifier) = side_channel(platform.clone(), dir.path());
        let mut rx = notifier.subscribe();

        side.handle_text("not json").await;
        side.handle_text(r#"{"event":"unknown"}"#).await;
        side.handle_text(r#"{"event":"upload","data":"%%%"}"#).await;

        assert!(platform.sent().is_empty());
        assert!(platform.uploads().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_upload_event_forwards_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(RecordingPlatform::default());
        let (side, _) = side_channel(platform.clone(), dir.path());

        let data = STANDARD.encode(b"\x89PNG fake");
        side.handle_text(&format!(r#"{{"event":"upload","filename":"door cam.png","data":"{data}"}}"#))
            .await;

        let uploads = platform.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].file_name, "door_cam.png");
        assert_eq!(uploads[0].bytes, b"\x89PNG fake".to_vec());
        assert_eq!(uploads[0].channel, "frontdesk");
        assert!(uploads[0].existed);
        assert_eq!(staged_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_failed_upload_still_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(RecordingPlatform { fail_uploads: true, ..Default::default() });
        let (side, _) = side_channel(platform.clone(), dir.path());

        let err = side.forward_artifact("door.png", b"bytes").await.unwrap_err();
        assert!(matches!(err, BotError::UpstreamService { .. }));
        assert_eq!(platform.uploads().len(), 1);
        assert_eq!(staged_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_empty_artifact_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(RecordingPlatform::default());
        let (side, _) = side_channel(platform.clone(), dir.path());

        assert!(side.forward_artifact("door.png", b"").await.is_err());
        assert!(platform.uploads().is_empty());
    }

    #[tokio::test]
    async fn test_websocket_round_trip() {
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message as WsMessage;

        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(RecordingPlatform::default());
        let (side, notifier) = side_channel(platform, dir.path());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, side.router()).await.unwrap();
        });

        let (mut observer, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        // Wait until the server side has subscribed before publishing
        while notifier.tx.receiver_count() == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        notifier.publish(BOT_MESSAGE_EVENT, json!({ "person": "Bob" }));

        let frame = observer.next().await.unwrap().unwrap();
        let WsMessage::Text(text) = frame else {
            panic!("expected text frame, got {frame:?}");
        };
        let payload: Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(payload["data"]["person"], "Bob");
    }
}
