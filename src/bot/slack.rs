//! Slack Web API client.

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info};

use crate::bot::message::{Channel, Session, User, UserProfile};
use crate::bot::platform::Platform;
use crate::error::BotError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_LIMIT: usize = 200;

/// Errors from `rtm.connect` that no amount of reconnecting will fix.
const FATAL_AUTH_ERRORS: &[&str] = &["invalid_auth", "not_authed", "account_inactive", "token_revoked"];

/// Result of `rtm.connect`.
#[derive(Debug, Clone)]
pub struct RtmConnect {
    pub url: String,
    pub self_user: User,
}

#[derive(Deserialize)]
struct RtmConnectResponse {
    url: String,
    #[serde(rename = "self")]
    self_user: User,
}

#[derive(Deserialize, Default)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Deserialize)]
struct UsersListResponse {
    #[serde(default)]
    members: Vec<RosterMember>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Deserialize)]
struct RosterMember {
    id: String,
    name: String,
    #[serde(default)]
    deleted: bool,
}

#[derive(Deserialize)]
struct ConversationsListResponse {
    #[serde(default)]
    channels: Vec<RosterChannel>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Deserialize)]
struct RosterChannel {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    is_archived: bool,
}

#[derive(Deserialize)]
struct UsersInfoResponse {
    user: SlackUser,
}

#[derive(Deserialize)]
struct SlackUser {
    id: String,
    name: String,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    profile: SlackProfile,
}

#[derive(Deserialize, Default)]
struct SlackProfile {
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Deserialize)]
struct UploadUrlResponse {
    upload_url: String,
    file_id: String,
}

/// Slack API client. Also caches name→id lookups from the last roster.
pub struct SlackClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
    channel_ids: RwLock<HashMap<String, String>>,
    user_ids: RwLock<HashMap<String, String>>,
}

impl SlackClient {
    pub fn new(api_base: &str, token: &str) -> Result<Self, BotError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("jarvisbot")
            .build()
            .map_err(|e| BotError::upstream("client setup", e.to_string()))?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
            channel_ids: RwLock::new(HashMap::new()),
            user_ids: RwLock::new(HashMap::new()),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.api_base, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, BotError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| BotError::upstream(method, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(300).collect();
            return Err(BotError::upstream(method, format!("status {status}: {body}")));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| BotError::upstream(method, format!("invalid response: {e}")))?;
        if !value.get("ok").and_then(Value::as_bool).unwrap_or(false) {
            let error = value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(BotError::upstream(method, error));
        }

        serde_json::from_value(value)
            .map_err(|e| BotError::upstream(method, format!("unexpected response: {e}")))
    }

    pub async fn rtm_connect(&self) -> Result<RtmConnect, BotError> {
        let response: RtmConnectResponse = self
            .call("rtm.connect", self.http.get(self.url("rtm.connect")))
            .await?;
        debug!("rtm.connect returned self {} ({})", response.self_user.name, response.self_user.id);
        Ok(RtmConnect {
            url: response.url,
            self_user: response.self_user,
        })
    }

    pub async fn list_users(&self) -> Result<Vec<User>, BotError> {
        let mut users = Vec::new();
        let mut cursor = String::new();
        loop {
            let url = format!(
                "{}?limit={}&cursor={}",
                self.url("users.list"),
                PAGE_LIMIT,
                urlencoding::encode(&cursor)
            );
            let page: UsersListResponse = self.call("users.list", self.http.get(url)).await?;
            users.extend(
                page.members
                    .into_iter()
                    .filter(|m| !m.deleted)
                    .map(|m| User { id: m.id, name: m.name }),
            );
            cursor = page.response_metadata.next_cursor;
            if cursor.is_empty() {
                return Ok(users);
            }
        }
    }

    pub async fn list_channels(&self) -> Result<Vec<Channel>, BotError> {
        let mut channels = Vec::new();
        let mut cursor = String::new();
        loop {
            let url = format!(
                "{}?types=public_channel,private_channel&exclude_archived=true&limit={}&cursor={}",
                self.url("conversations.list"),
                PAGE_LIMIT,
                urlencoding::encode(&cursor)
            );
            let page: ConversationsListResponse =
                self.call("conversations.list", self.http.get(url)).await?;
            channels.extend(
                page.channels
                    .into_iter()
                    .filter(|c| !c.is_archived)
                    .map(|c| Channel { id: c.id, name: c.name }),
            );
            cursor = page.response_metadata.next_cursor;
            if cursor.is_empty() {
                return Ok(channels);
            }
        }
    }

    /// Refresh the name→id caches used to address channels and users by name.
    pub fn remember_roster(&self, session: &Session) {
        let mut channels = self.channel_ids.write().unwrap_or_else(PoisonError::into_inner);
        channels.clear();
        channels.extend(session.channels.iter().map(|c| (c.name.clone(), c.id.clone())));

        let mut users = self.user_ids.write().unwrap_or_else(PoisonError::into_inner);
        users.clear();
        users.extend(session.users.iter().map(|u| (u.name.clone(), u.id.clone())));
        debug!("Roster cached: {} channels, {} users", channels.len(), users.len());
    }

    fn channel_id(&self, channel_name: &str) -> Option<String> {
        let name = channel_name.trim_start_matches('#');
        self.channel_ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn user_id(&self, user: &str) -> Option<String> {
        let user = user.trim_start_matches('@');
        if looks_like_user_id(user) {
            return Some(user.to_string());
        }
        self.user_ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user)
            .cloned()
    }

    /// `chat.postMessage` to a channel id, user id or `#name`.
    pub async fn post_message(&self, channel: &str, text: &str) -> Result<(), BotError> {
        let payload = json!({
            "channel": channel,
            "text": text,
            "as_user": true,
        });
        let _: Value = self
            .call("chat.postMessage", self.http.post(self.url("chat.postMessage")).json(&payload))
            .await?;
        Ok(())
    }
}

/// Slack user ids are upper-case alphanumerics starting with U or W.
pub fn looks_like_user_id(value: &str) -> bool {
    value.len() > 1
        && (value.starts_with('U') || value.starts_with('W'))
        && value.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// Whether an `rtm.connect` failure should stop the bot instead of retrying.
pub fn is_fatal_connect_error(error: &BotError) -> bool {
    match error {
        BotError::UpstreamService { message, .. } => FATAL_AUTH_ERRORS.contains(&message.as_str()),
        _ => false,
    }
}

#[async_trait]
impl Platform for SlackClient {
    async fn send_to_channel(&self, channel_name: &str, text: &str) -> Result<(), BotError> {
        let target = self
            .channel_id(channel_name)
            .unwrap_or_else(|| format!("#{}", channel_name.trim_start_matches('#')));
        self.post_message(&target, text).await
    }

    async fn send_to_user(&self, user: &str, text: &str) -> Result<(), BotError> {
        let Some(user_id) = self.user_id(user) else {
            return Err(BotError::upstream("chat.postMessage", format!("unknown user '{user}'")));
        };
        self.post_message(&user_id, text).await
    }

    async fn user_profile(&self, user_id: &str) -> Result<UserProfile, BotError> {
        let url = format!("{}?user={}", self.url("users.info"), urlencoding::encode(user_id));
        let response: UsersInfoResponse = self.call("users.info", self.http.get(url)).await?;
        let user = response.user;
        Ok(UserProfile {
            real_name: user
                .profile
                .real_name
                .filter(|n| !n.is_empty())
                .or(user.real_name)
                .unwrap_or_default(),
            email: user.profile.email.unwrap_or_default(),
            user_name: user.name,
            id: user.id,
        })
    }

    async fn upload_file(&self, path: &Path, channel_name: &str) -> Result<(), BotError> {
        let Some(channel_id) = self.channel_id(channel_name) else {
            return Err(BotError::upstream(
                "files.completeUploadExternal",
                format!("unknown channel '{channel_name}'"),
            ));
        };
        let bytes = tokio::fs::read(path).await?;
        if bytes.is_empty() {
            return Err(BotError::upstream("files.getUploadURLExternal", "empty file"));
        }
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();

        info!("Uploading {} ({} bytes) to #{}", filename, bytes.len(), channel_name);
        let length = bytes.len().to_string();
        let target: UploadUrlResponse = self
            .call(
                "files.getUploadURLExternal",
                self.http
                    .post(self.url("files.getUploadURLExternal"))
                    .form(&[("filename", filename.as_str()), ("length", length.as_str())]),
            )
            .await?;

        let upload = self
            .http
            .post(&target.upload_url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(|e| BotError::upstream("file upload", e.to_string()))?;
        if !upload.status().is_success() {
            return Err(BotError::upstream(
                "file upload",
                format!("status {}", upload.status()),
            ));
        }

        let files = json!([{ "id": target.file_id, "title": filename }]).to_string();
        let _: Value = self
            .call(
                "files.completeUploadExternal",
                self.http
                    .post(self.url("files.completeUploadExternal"))
                    .form(&[("files", files.as_str()), ("channel_id", channel_id.as_str())]),
            )
            .await?;
        Ok(())
    }
}
