//! Slack RTM websocket: turns socket frames into `PlatformEvent`s.

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

use crate::bot::message::{IncomingMessage, PlatformEvent, Session};
use crate::bot::slack::{SlackClient, is_fatal_connect_error};
use crate::error::BotError;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// What a single text frame means for the session.
#[derive(Debug)]
pub enum Frame {
    Event(PlatformEvent),
    /// Server is about to close the socket; reconnect.
    Goodbye,
    Ignore,
}

/// Interpret one RTM frame. `pending` holds the rosters until `hello` arrives.
pub fn parse_frame(text: &str, pending: &mut Option<Session>) -> Frame {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        debug!("Ignoring non-JSON frame");
        return Frame::Ignore;
    };
    // Acknowledgements of our own pings and sends carry reply_to
    if value.get("reply_to").is_some() {
        return Frame::Ignore;
    }

    match value.get("type").and_then(Value::as_str) {
        Some("hello") => match pending.take() {
            Some(session) => Frame::Event(PlatformEvent::Connected(session)),
            None => Frame::Ignore,
        },
        Some("message") => match serde_json::from_value::<IncomingMessage>(value) {
            Ok(msg) => Frame::Event(PlatformEvent::Message(msg)),
            Err(e) => {
                debug!("Ignoring malformed message frame: {e}");
                Frame::Ignore
            }
        },
        Some("goodbye") => Frame::Goodbye,
        _ => Frame::Ignore,
    }
}

/// Keeps an RTM session alive and forwards its events to the dispatcher.
pub struct RtmRuntime {
    client: Arc<SlackClient>,
    reconnect_delay: Duration,
}

impl RtmRuntime {
    pub fn new(client: Arc<SlackClient>, reconnect_delay: Duration) -> Self {
        Self { client, reconnect_delay }
    }

    /// Runs until the receiver goes away or authentication is rejected.
    pub async fn run(self, tx: mpsc::Sender<PlatformEvent>) -> Result<(), BotError> {
        loop {
            match self.run_session(&tx).await {
                Ok(()) => info!("RTM socket closed"),
                Err(e) if is_fatal_connect_error(&e) => {
                    error!("Slack rejected the bot token: {e}");
                    return Err(e);
                }
                Err(e) => warn!("RTM session error: {e}"),
            }

            if tx.send(PlatformEvent::Disconnected).await.is_err() {
                return Ok(());
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    async fn run_session(&self, tx: &mpsc::Sender<PlatformEvent>) -> Result<(), BotError> {
        let connect = self.client.rtm_connect().await?;
        let users = self.client.list_users().await?;
        let channels = self.client.list_channels().await?;
        let session = Session {
            self_user: Some(connect.self_user),
            users,
            channels,
        };
        self.client.remember_roster(&session);
        info!(
            "Roster loaded: {} users, {} channels",
            session.users.len(),
            session.channels.len()
        );

        let (stream, _response) = connect_async(connect.url.as_str()).await?;
        let (mut sink, mut source) = stream.split();
        let mut pending = Some(session);
        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.tick().await;
        let mut ping_id: u64 = 0;

        loop {
            tokio::select! {
                frame = source.next() => {
                    let Some(frame) = frame else {
                        return Ok(());
                    };
                    let text = match frame? {
                        WsMessage::Text(text) => text.as_str().to_owned(),
                        WsMessage::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                        WsMessage::Close(_) => return Ok(()),
                        _ => continue,
                    };
                    match parse_frame(&text, &mut pending) {
                        Frame::Event(event) => {
                            if tx.send(event).await.is_err() {
                                return Ok(());
                            }
                        }
                        Frame::Goodbye => {
                            info!("Slack asked us to reconnect");
                            return Ok(());
                        }
                        Frame::Ignore => {}
                    }
                }
                _ = keepalive.tick() => {
                    ping_id += 1;
                    let ping = json!({ "id": ping_id, "type": "ping" }).to_string();
                    sink.send(WsMessage::Text(ping.into())).await?;
                }
            }
        }
    }
}
