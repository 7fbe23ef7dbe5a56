//! Outbound operations the bot needs from the chat platform.

use async_trait::async_trait;
use std::path::Path;

use crate::bot::message::UserProfile;
use crate::error::BotError;

/// Capability object handed to the dispatcher and the notification server.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Post to a channel identified by its human-readable name.
    async fn send_to_channel(&self, channel_name: &str, text: &str) -> Result<(), BotError>;

    /// Post a direct message. Accepts a user id or a roster user name.
    async fn send_to_user(&self, user: &str, text: &str) -> Result<(), BotError>;

    /// Identity lookup for appointment records.
    async fn user_profile(&self, user_id: &str) -> Result<UserProfile, BotError>;

    /// Upload a local file to the named channel.
    async fn upload_file(&self, path: &Path, channel_name: &str) -> Result<(), BotError>;
}
