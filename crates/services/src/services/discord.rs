//! Discord REST (API v10) implementation of the platform surfaces.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tokio::sync::OnceCell;

use super::surface::{
    ButtonStyle, ChannelId, GuildId, MessageId, MessageSurface, StarterMessage, SurfaceError,
    ThreadControls, ThreadHandle, ThreadId, ThreadSurface,
};

pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!(
    "DiscordBot (taskmaster-bot, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

#[derive(Debug, Deserialize)]
struct ChannelPayload {
    id: ThreadId,
    #[serde(default)]
    guild_id: Option<GuildId>,
    #[serde(default)]
    parent_id: Option<ChannelId>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    thread_metadata: Option<ThreadMetadata>,
}

#[derive(Debug, Deserialize)]
struct ThreadMetadata {
    #[serde(default)]
    archived: bool,
}

impl From<ChannelPayload> for ThreadHandle {
    fn from(payload: ChannelPayload) -> Self {
        ThreadHandle {
            id: payload.id,
            parent_id: payload.parent_id,
            title: payload.name.unwrap_or_default(),
            archived: payload.thread_metadata.is_some_and(|m| m.archived),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagePayload {
    id: MessageId,
    #[serde(default)]
    content: String,
    #[serde(default)]
    components: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ActiveThreadsPayload {
    #[serde(default)]
    threads: Vec<ChannelPayload>,
}

pub struct DiscordClient {
    http: reqwest::Client,
    token: SecretString,
    base_url: String,
    guild_id: OnceCell<GuildId>,
}

impl DiscordClient {
    pub fn new(token: SecretString, guild_id: Option<u64>) -> Result<Self, SurfaceError> {
        Self::with_base_url(token, guild_id, DISCORD_API_BASE)
    }

    pub fn with_base_url(
        token: SecretString,
        guild_id: Option<u64>,
        base_url: &str,
    ) -> Result<Self, SurfaceError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SurfaceError::Transient(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            token,
            base_url: base_url.trim_end_matches('/').to_string(),
            guild_id: OnceCell::new_with(guild_id.map(GuildId)),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bot {}", self.token.expose_secret()),
            )
    }

    async fn send_raw(&self, rb: RequestBuilder) -> Result<String, SurfaceError> {
        let resp = rb.send().await.map_err(|e| {
            SurfaceError::Transient(format!("request to Discord failed: {e}"))
        })?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| SurfaceError::Transient(format!("failed to read Discord response: {e}")))?;
        if !status.is_success() {
            return Err(classify_status(status, body));
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(&self, rb: RequestBuilder) -> Result<T, SurfaceError> {
        let body = self.send_raw(rb).await?;
        serde_json::from_str(&body).map_err(|e| SurfaceError::Decode(e.to_string()))
    }

    /// The configured guild, or the forum's own guild looked up once.
    async fn guild_for(&self, forum: ChannelId) -> Result<GuildId, SurfaceError> {
        self.guild_id
            .get_or_try_init(|| async {
                let channel: ChannelPayload = self
                    .send_json(self.request(Method::GET, &format!("/channels/{forum}")))
                    .await?;
                channel.guild_id.ok_or_else(|| {
                    SurfaceError::Decode(format!("channel {forum} does not belong to a guild"))
                })
            })
            .await
            .copied()
    }
}

/// Maps an unsuccessful HTTP status onto the error taxonomy the sync layer acts on.
fn classify_status(status: StatusCode, body: String) -> SurfaceError {
    match status {
        StatusCode::NOT_FOUND => SurfaceError::NotFound,
        StatusCode::FORBIDDEN => SurfaceError::PermissionDenied(body),
        StatusCode::TOO_MANY_REQUESTS => SurfaceError::Transient(format!("rate limited: {body}")),
        s if s.is_server_error() => SurfaceError::Transient(format!("{}: {body}", s.as_u16())),
        s => SurfaceError::Api {
            status: s.as_u16(),
            body,
        },
    }
}

fn button_style_code(style: ButtonStyle) -> u8 {
    match style {
        ButtonStyle::Primary => 1,
        ButtonStyle::Secondary => 2,
        ButtonStyle::Success => 3,
    }
}

fn components_json(controls: &ThreadControls) -> Vec<Value> {
    controls
        .rows()
        .map(|row| {
            let buttons: Vec<Value> = row
                .iter()
                .map(|button| {
                    json!({
                        "type": 2,
                        "style": button_style_code(button.style),
                        "label": button.label,
                        "custom_id": button.custom_id,
                    })
                })
                .collect();
            json!({ "type": 1, "components": buttons })
        })
        .collect()
}

fn not_found_as_none<T>(result: Result<T, SurfaceError>) -> Result<Option<T>, SurfaceError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(SurfaceError::NotFound) => Ok(None),
        Err(err) => Err(err),
    }
}

#[async_trait]
impl ThreadSurface for DiscordClient {
    async fn create_thread(
        &self,
        forum: ChannelId,
        title: &str,
        body: &str,
        controls: &ThreadControls,
    ) -> Result<ThreadHandle, SurfaceError> {
        let payload = json!({
            "name": title,
            "message": {
                "content": body,
                "components": components_json(controls),
            },
        });
        let channel: ChannelPayload = self
            .send_json(
                self.request(Method::POST, &format!("/channels/{forum}/threads"))
                    .json(&payload),
            )
            .await?;
        Ok(channel.into())
    }

    async fn edit_thread_title(&self, thread: ThreadId, title: &str) -> Result<(), SurfaceError> {
        self.send_raw(
            self.request(Method::PATCH, &format!("/channels/{thread}"))
                .json(&json!({ "name": title })),
        )
        .await
        .map(|_| ())
    }

    async fn fetch_thread(&self, thread: ThreadId) -> Result<Option<ThreadHandle>, SurfaceError> {
        let result: Result<ChannelPayload, _> = self
            .send_json(self.request(Method::GET, &format!("/channels/{thread}")))
            .await;
        not_found_as_none(result).map(|channel| channel.map(ThreadHandle::from))
    }

    async fn fetch_starter_message(
        &self,
        thread: ThreadId,
    ) -> Result<Option<StarterMessage>, SurfaceError> {
        // A forum post's starter message shares the thread's id.
        let result: Result<MessagePayload, _> = self
            .send_json(self.request(
                Method::GET,
                &format!("/channels/{thread}/messages/{thread}"),
            ))
            .await;
        not_found_as_none(result).map(|message| {
            message.map(|m| StarterMessage {
                has_controls: !m.components.is_empty(),
                content: m.content,
            })
        })
    }

    async fn delete_thread(&self, thread: ThreadId) -> Result<(), SurfaceError> {
        self.send_raw(self.request(Method::DELETE, &format!("/channels/{thread}")))
            .await
            .map(|_| ())
    }

    async fn archive_and_lock(&self, thread: ThreadId) -> Result<(), SurfaceError> {
        self.send_raw(
            self.request(Method::PATCH, &format!("/channels/{thread}"))
                .json(&json!({ "archived": true, "locked": true })),
        )
        .await
        .map(|_| ())
    }

    async fn reopen_thread(&self, thread: ThreadId) -> Result<(), SurfaceError> {
        self.send_raw(
            self.request(Method::PATCH, &format!("/channels/{thread}"))
                .json(&json!({ "archived": false, "locked": false })),
        )
        .await
        .map(|_| ())
    }

    async fn edit_starter_message(
        &self,
        thread: ThreadId,
        body: &str,
        controls: &ThreadControls,
    ) -> Result<(), SurfaceError> {
        self.send_raw(
            self.request(
                Method::PATCH,
                &format!("/channels/{thread}/messages/{thread}"),
            )
            .json(&json!({
                "content": body,
                "components": components_json(controls),
            })),
        )
        .await
        .map(|_| ())
    }

    async fn send_message(
        &self,
        thread: ThreadId,
        body: &str,
        controls: &ThreadControls,
    ) -> Result<(), SurfaceError> {
        self.send_raw(
            self.request(Method::POST, &format!("/channels/{thread}/messages"))
                .json(&json!({
                    "content": body,
                    "components": components_json(controls),
                })),
        )
        .await
        .map(|_| ())
    }

    async fn list_active_threads(&self, forum: ChannelId) -> Result<Vec<ThreadHandle>, SurfaceError> {
        let guild = self.guild_for(forum).await?;
        let active: ActiveThreadsPayload = self
            .send_json(self.request(Method::GET, &format!("/guilds/{guild}/threads/active")))
            .await?;
        Ok(active
            .threads
            .into_iter()
            .filter(|thread| thread.parent_id == Some(forum))
            .map(ThreadHandle::from)
            .collect())
    }
}

#[async_trait]
impl MessageSurface for DiscordClient {
    async fn edit_channel_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        content: &str,
    ) -> Result<(), SurfaceError> {
        self.send_raw(
            self.request(
                Method::PATCH,
                &format!("/channels/{channel}/messages/{message}"),
            )
            .json(&json!({ "content": content })),
        )
        .await
        .map(|_| ())
    }

    async fn send_channel_message(
        &self,
        channel: ChannelId,
        content: &str,
    ) -> Result<MessageId, SurfaceError> {
        let message: MessagePayload = self
            .send_json(
                self.request(Method::POST, &format!("/channels/{channel}/messages"))
                    .json(&json!({ "content": content })),
            )
            .await?;
        Ok(message.id)
    }
}
