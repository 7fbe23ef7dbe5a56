//! In-memory `Platform` that records everything sent through it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::bot::message::UserProfile;
use crate::bot::platform::Platform;
use crate::error::BotError;

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Channel { channel: String, text: String },
    User { user: String, text: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub channel: String,
    /// Whether the file still existed on disk while being uploaded.
    pub existed: bool,
}

#[derive(Default)]
pub struct RecordingPlatform {
    pub sent: Mutex<Vec<Sent>>,
    pub uploads: Mutex<Vec<Upload>>,
    pub profiles: HashMap<String, UserProfile>,
    pub fail_sends: bool,
    pub fail_uploads: bool,
    /// Simulated latency of the identity lookup.
    pub profile_delay: Option<Duration>,
}

impl RecordingPlatform {
    pub fn with_profile(mut self, profile: UserProfile) -> Self {
        self.profiles.insert(profile.id.clone(), profile);
        self
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Platform for RecordingPlatform {
    async fn send_to_channel(&self, channel_name: &str, text: &str) -> Result<(), BotError> {
        self.sent.lock().unwrap().push(Sent::Channel {
            channel: channel_name.to_string(),
            text: text.to_string(),
        });
        if self.fail_sends {
            return Err(BotError::upstream("chat.postMessage", "channel_not_found"));
        }
        Ok(())
    }

    async fn send_to_user(&self, user: &str, text: &str) -> Result<(), BotError> {
        self.sent.lock().unwrap().push(Sent::User {
            user: user.to_string(),
            text: text.to_string(),
        });
        if self.fail_sends {
            return Err(BotError::upstream("chat.postMessage", "user_not_found"));
        }
        Ok(())
    }

    async fn user_profile(&self, user_id: &str) -> Result<UserProfile, BotError> {
        if let Some(delay) = self.profile_delay {
            tokio::time::sleep(delay).await;
        }
        self.profiles
            .get(user_id)
            .cloned()
            .ok_or_else(|| BotError::upstream("users.info", "user_not_found"))
    }

    async fn upload_file(&self, path: &Path, channel_name: &str) -> Result<(), BotError> {
        let existed = path.exists();
        let bytes = std::fs::read(path).unwrap_or_default();
        self.uploads.lock().unwrap().push(Upload {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            bytes,
            channel: channel_name.to_string(),
            existed,
        });
        if self.fail_uploads {
            return Err(BotError::upstream("files.completeUploadExternal", "not_in_channel"));
        }
        Ok(())
    }
}
