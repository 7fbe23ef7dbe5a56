use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::bot::platform::Platform;

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const FLUSH_LINES: usize = 50;
const MAX_POST_CHARS: usize = 4000;
const LOOPING_TARGETS: &[&str] = &["jarvisbot::bot::slack", "hyper", "reqwest", "h2"];

/// Log message with priority.
enum LogMessage {
    /// WARN/ERROR - send immediately
    Urgent(String),
    /// INFO - batch and send periodically
    Info(String),
}

/// Mirrors log records into a Slack channel.
pub struct SlackLogLayer {
    tx: mpsc::UnboundedSender<LogMessage>,
}

impl SlackLogLayer {
    /// Must be called from within a tokio runtime.
    pub fn new(platform: Arc<dyn Platform>, channel: String) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogMessage>();

        tokio::spawn(async move {
            let mut info_buffer: Vec<String> = Vec::new();
            let mut interval = tokio::time::interval(FLUSH_INTERVAL);

            loop {
                tokio::select! {
                    msg = rx.recv() => {
                        match msg {
                            Some(LogMessage::Urgent(text)) => {
                                send_log(platform.as_ref(), &channel, &text).await;
                            }
                            Some(LogMessage::Info(text)) => {
                                info_buffer.push(text);
                                if info_buffer.len() >= FLUSH_LINES {
                                    flush_buffer(platform.as_ref(), &channel, &mut info_buffer).await;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = interval.tick() => {
                        flush_buffer(platform.as_ref(), &channel, &mut info_buffer).await;
                    }
                }
            }
        });

        Self { tx }
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() > MAX_POST_CHARS {
        let truncated: String = text.chars().take(MAX_POST_CHARS).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}

async fn send_log(platform: &dyn Platform, channel: &str, text: &str) {
    // Going through tracing here would feed back into this layer. The Slack
    // client must not log on this path either.
    if let Err(e) = platform.send_to_channel(channel, &truncate(text)).await {
        eprintln!("Failed to send log to Slack: {e}");
    }
}

async fn flush_buffer(platform: &dyn Platform, channel: &str, buffer: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }
    let combined = buffer.join("\n");
    buffer.clear();
    send_log(platform, channel, &combined).await;
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message
                .push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

fn classify_event(level: Level, message: String) -> Option<LogMessage> {
    match level {
        Level::ERROR => Some(LogMessage::Urgent(format!(":x: {message}"))),
        Level::WARN => Some(LogMessage::Urgent(format!(":warning: {message}"))),
        Level::INFO => Some(LogMessage::Info(message)),
        _ => None,
    }
}

impl<S: Subscriber> Layer<S> for SlackLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        // Records emitted while posting would loop back through chat.postMessage
        let target = event.metadata().target();
        if LOOPING_TARGETS.iter().any(|t| target.starts_with(t)) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let Some(msg) = classify_event(*event.metadata().level(), visitor.message) else {
            return;
        };
        if self.tx.send(msg).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}
