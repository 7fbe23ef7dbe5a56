//! Message envelope and roster types shared by the platform and dispatcher.

use serde::{Deserialize, Serialize};

/// A raw realtime event. Only `type == "message"` with text is acted on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

impl IncomingMessage {
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    pub fn channel(&self) -> &str {
        self.channel.as_deref().unwrap_or("")
    }

    pub fn user(&self) -> &str {
        self.user.as_deref().unwrap_or("")
    }
}

/// A user from the platform roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
}

/// A channel from the platform roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
}

/// The bot's own account. Messages from this id never trigger replies.
#[derive(Debug, Clone, PartialEq)]
pub struct BotIdentity {
    pub id: String,
    pub name: String,
}

/// Profile returned by the identity lookup service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserProfile {
    pub id: String,
    pub real_name: String,
    pub user_name: String,
    pub email: String,
}

/// Rosters delivered with the "connected" signal.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// The account the connection authenticated as, if the platform reported it.
    pub self_user: Option<User>,
    pub users: Vec<User>,
    pub channels: Vec<Channel>,
}

impl Session {
    pub fn channel_by_id(&self, id: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }

    /// Resolve the bot's identity: the self user when it appears in the roster,
    /// otherwise the roster entry named like the bot.
    pub fn resolve_identity(&self, bot_name: &str) -> Option<BotIdentity> {
        let by_self = self
            .self_user
            .as_ref()
            .and_then(|me| self.users.iter().find(|u| u.id == me.id))
            .or(self.self_user.as_ref());
        let found = by_self.or_else(|| {
            self.users
                .iter()
                .find(|u| u.name.eq_ignore_ascii_case(bot_name))
        })?;
        Some(BotIdentity {
            id: found.id.clone(),
            name: found.name.clone(),
        })
    }
}

/// Event delivered from the platform connection to the dispatcher.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    Connected(Session),
    Message(IncomingMessage),
    Disconnected,
}
