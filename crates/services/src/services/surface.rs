//! What the sync layer needs from the messaging platform.

use std::fmt;

use async_trait::async_trait;
use db::models::task::Task;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use thiserror::Error;

/// Most buttons one message may carry: five rows of five.
pub const MAX_BUTTONS: usize = 25;
pub const BUTTONS_PER_ROW: usize = 5;

macro_rules! platform_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<u64>().map($name)
            }
        }

        // Serialized as strings; platform ids exceed what JSON numbers hold exactly.
        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserializer.deserialize_any(IdVisitor).map($name)
            }
        }
    };
}

struct IdVisitor;

impl de::Visitor<'_> for IdVisitor {
    type Value = u64;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a platform id as a string or unsigned integer")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<u64, E> {
        Ok(value)
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<u64, E> {
        u64::try_from(value).map_err(|_| E::custom(format!("negative id {value}")))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<u64, E> {
        value
            .trim()
            .parse::<u64>()
            .map_err(|_| E::custom(format!("invalid id '{value}'")))
    }
}

platform_id!(
    /// A thread, which the platform also treats as a channel.
    ThreadId
);
platform_id!(ChannelId);
platform_id!(GuildId);
platform_id!(MessageId);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadHandle {
    pub id: ThreadId,
    pub parent_id: Option<ChannelId>,
    pub title: String,
    pub archived: bool,
}

/// The leading message of a thread, where the task snapshot lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarterMessage {
    pub content: String,
    pub has_controls: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonStyle {
    Primary,
    Secondary,
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlButton {
    pub custom_id: String,
    pub label: String,
    pub style: ButtonStyle,
}

/// Buttons attached to a task thread. Custom ids carry the task key so an
/// interaction can be routed without any in-memory state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadControls {
    pub buttons: Vec<ControlButton>,
}

impl ThreadControls {
    pub fn for_task(task: &Task) -> Self {
        let key = task.key();
        let mut buttons = vec![
            ControlButton {
                custom_id: format!("task:configure:{key}"),
                label: "Configure".to_string(),
                style: ButtonStyle::Primary,
            },
            ControlButton {
                custom_id: format!("task:subtask_add:{key}"),
                label: "Add Sub-task".to_string(),
                style: ButtonStyle::Secondary,
            },
            ControlButton {
                custom_id: format!("task:complete:{key}"),
                label: "Mark Complete".to_string(),
                style: ButtonStyle::Success,
            },
        ];
        let room = MAX_BUTTONS - buttons.len();
        buttons.extend(task.subtasks.iter().take(room).map(|subtask| ControlButton {
            custom_id: format!("task:subtask_toggle:{key}:{}", subtask.id),
            label: format!("{} #{}", if subtask.completed { "✅" } else { "☐" }, subtask.id),
            style: if subtask.completed {
                ButtonStyle::Success
            } else {
                ButtonStyle::Secondary
            },
        }));
        Self { buttons }
    }

    pub fn is_empty(&self) -> bool {
        self.buttons.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[ControlButton]> {
        self.buttons.chunks(BUTTONS_PER_ROW)
    }
}

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("Not found on the platform")]
    NotFound,
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Transient platform error: {0}")]
    Transient(String),
    #[error("Platform API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Failed to decode platform response: {0}")]
    Decode(String),
}

impl SurfaceError {
    /// Network trouble or rate limiting; the next pass is expected to succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SurfaceError::Transient(_))
    }
}

#[async_trait]
pub trait ThreadSurface: Send + Sync {
    async fn create_thread(
        &self,
        forum: ChannelId,
        title: &str,
        body: &str,
        controls: &ThreadControls,
    ) -> Result<ThreadHandle, SurfaceError>;

    async fn edit_thread_title(&self, thread: ThreadId, title: &str) -> Result<(), SurfaceError>;

    /// `Ok(None)` when the thread no longer exists.
    async fn fetch_thread(&self, thread: ThreadId) -> Result<Option<ThreadHandle>, SurfaceError>;

    /// `Ok(None)` when the leading message is gone.
    async fn fetch_starter_message(
        &self,
        thread: ThreadId,
    ) -> Result<Option<StarterMessage>, SurfaceError>;

    /// May fail with `PermissionDenied`.
    async fn delete_thread(&self, thread: ThreadId) -> Result<(), SurfaceError>;

    async fn archive_and_lock(&self, thread: ThreadId) -> Result<(), SurfaceError>;

    /// Unarchive and unlock a thread hidden by the platform or a moderator.
    async fn reopen_thread(&self, thread: ThreadId) -> Result<(), SurfaceError>;

    async fn edit_starter_message(
        &self,
        thread: ThreadId,
        body: &str,
        controls: &ThreadControls,
    ) -> Result<(), SurfaceError>;

    async fn send_message(
        &self,
        thread: ThreadId,
        body: &str,
        controls: &ThreadControls,
    ) -> Result<(), SurfaceError>;

    async fn list_active_threads(&self, forum: ChannelId) -> Result<Vec<ThreadHandle>, SurfaceError>;
}

#[async_trait]
pub trait MessageSurface: Send + Sync {
    /// Fails with `NotFound` when the message was deleted.
    async fn edit_channel_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        content: &str,
    ) -> Result<(), SurfaceError>;

    async fn send_channel_message(
        &self,
        channel: ChannelId,
        content: &str,
    ) -> Result<MessageId, SurfaceError>;
}
