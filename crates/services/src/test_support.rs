//! In-memory platform used by the sync tests. Every write is recorded so tests
//! can assert on exactly what a pass did.

use std::{
    collections::{BTreeMap, HashSet},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;

use crate::services::surface::{
    ChannelId, MessageId, MessageSurface, StarterMessage, SurfaceError, ThreadControls,
    ThreadHandle, ThreadId, ThreadSurface,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    Create(ThreadId),
    Rename(ThreadId, String),
    Delete(ThreadId),
    Archive(ThreadId),
    Reopen(ThreadId),
    EditStarter(ThreadId),
    Send(ThreadId),
    EditChannelMessage(MessageId),
    SendChannelMessage(ChannelId),
}

impl SurfaceCall {
    pub fn thread(&self) -> Option<ThreadId> {
        match self {
            SurfaceCall::Create(id)
            | SurfaceCall::Rename(id, _)
            | SurfaceCall::Delete(id)
            | SurfaceCall::Archive(id)
            | SurfaceCall::Reopen(id)
            | SurfaceCall::EditStarter(id)
            | SurfaceCall::Send(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FakeThread {
    pub handle: ThreadHandle,
    pub starter: Option<StarterMessage>,
    pub locked: bool,
    pub sent: Vec<String>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    threads: BTreeMap<ThreadId, FakeThread>,
    messages: BTreeMap<MessageId, (ChannelId, String)>,
    calls: Vec<SurfaceCall>,
    deny_delete: bool,
    fail_list: bool,
    fail_create_titles: HashSet<String>,
    transient_fetch: HashSet<ThreadId>,
}

pub struct FakeSurface {
    forum: ChannelId,
    state: Mutex<State>,
}

impl FakeSurface {
    pub fn new(forum: ChannelId) -> Self {
        Self {
            forum,
            state: Mutex::new(State {
                next_id: 1_000,
                ..State::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Seed a thread as if it had been created earlier, without recording a write.
    pub fn insert_thread(&self, title: &str, body: &str, has_controls: bool) -> ThreadId {
        let mut state = self.state();
        state.next_id += 1;
        let id = ThreadId(state.next_id);
        state.threads.insert(
            id,
            FakeThread {
                handle: ThreadHandle {
                    id,
                    parent_id: Some(self.forum),
                    title: title.to_string(),
                    archived: false,
                },
                starter: Some(StarterMessage {
                    content: body.to_string(),
                    has_controls,
                }),
                locked: false,
                sent: Vec::new(),
            },
        );
        id
    }

    pub fn thread(&self, id: ThreadId) -> Option<FakeThread> {
        self.state().threads.get(&id).cloned()
    }

    /// Threads that are neither deleted nor archived.
    pub fn open_threads(&self) -> Vec<FakeThread> {
        self.state()
            .threads
            .values()
            .filter(|t| !t.handle.archived)
            .cloned()
            .collect()
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.state().calls.clone()
    }

    pub fn write_count(&self) -> usize {
        self.state().calls.len()
    }

    pub fn message(&self, id: MessageId) -> Option<String> {
        self.state().messages.get(&id).map(|(_, content)| content.clone())
    }

    pub fn messages_in(&self, channel: ChannelId) -> Vec<String> {
        self.state()
            .messages
            .values()
            .filter(|(owner, _)| *owner == channel)
            .map(|(_, content)| content.clone())
            .collect()
    }

    pub fn deny_deletes(&self, deny: bool) {
        self.state().deny_delete = deny;
    }

    pub fn fail_listing(&self, fail: bool) {
        self.state().fail_list = fail;
    }

    pub fn fail_create_for(&self, title: &str) {
        self.state().fail_create_titles.insert(title.to_string());
    }

    pub fn clear_create_failures(&self) {
        self.state().fail_create_titles.clear();
    }

    pub fn fail_fetch_transiently(&self, id: ThreadId) {
        self.state().transient_fetch.insert(id);
    }

    pub fn delete_externally(&self, id: ThreadId) {
        self.state().threads.remove(&id);
    }

    pub fn delete_message_externally(&self, id: MessageId) {
        self.state().messages.remove(&id);
    }

    pub fn rename_externally(&self, id: ThreadId, title: &str) {
        if let Some(thread) = self.state().threads.get_mut(&id) {
            thread.handle.title = title.to_string();
        }
    }

    pub fn strip_controls(&self, id: ThreadId) {
        if let Some(starter) = self
            .state()
            .threads
            .get_mut(&id)
            .and_then(|t| t.starter.as_mut())
        {
            starter.has_controls = false;
        }
    }

    pub fn remove_starter(&self, id: ThreadId) {
        if let Some(thread) = self.state().threads.get_mut(&id) {
            thread.starter = None;
        }
    }
}

#[async_trait]
impl ThreadSurface for FakeSurface {
    async fn create_thread(
        &self,
        forum: ChannelId,
        title: &str,
        body: &str,
        controls: &ThreadControls,
    ) -> Result<ThreadHandle, SurfaceError> {
        let mut state = self.state();
        if state.fail_create_titles.contains(title) {
            return Err(SurfaceError::Api {
                status: 400,
                body: "create rejected".to_string(),
            });
        }
        state.next_id += 1;
        let id = ThreadId(state.next_id);
        let handle = ThreadHandle {
            id,
            parent_id: Some(forum),
            title: title.to_string(),
            archived: false,
        };
        state.threads.insert(
            id,
            FakeThread {
                handle: handle.clone(),
                starter: Some(StarterMessage {
                    content: body.to_string(),
                    has_controls: !controls.is_empty(),
                }),
                locked: false,
                sent: Vec::new(),
            },
        );
        state.calls.push(SurfaceCall::Create(id));
        Ok(handle)
    }

    async fn edit_thread_title(&self, thread: ThreadId, title: &str) -> Result<(), SurfaceError> {
        let mut state = self.state();
        let entry = state.threads.get_mut(&thread).ok_or(SurfaceError::NotFound)?;
        entry.handle.title = title.to_string();
        state.calls.push(SurfaceCall::Rename(thread, title.to_string()));
        Ok(())
    }

    async fn fetch_thread(&self, thread: ThreadId) -> Result<Option<ThreadHandle>, SurfaceError> {
        let state = self.state();
        if state.transient_fetch.contains(&thread) {
            return Err(SurfaceError::Transient("rate limited".to_string()));
        }
        Ok(state.threads.get(&thread).map(|t| t.handle.clone()))
    }

    async fn fetch_starter_message(
        &self,
        thread: ThreadId,
    ) -> Result<Option<StarterMessage>, SurfaceError> {
        let state = self.state();
        let entry = state.threads.get(&thread).ok_or(SurfaceError::NotFound)?;
        Ok(entry.starter.clone())
    }

    async fn delete_thread(&self, thread: ThreadId) -> Result<(), SurfaceError> {
        let mut state = self.state();
        state.calls.push(SurfaceCall::Delete(thread));
        if state.deny_delete {
            return Err(SurfaceError::PermissionDenied(
                "Missing Permissions".to_string(),
            ));
        }
        state
            .threads
            .remove(&thread)
            .map(|_| ())
            .ok_or(SurfaceError::NotFound)
    }

    async fn archive_and_lock(&self, thread: ThreadId) -> Result<(), SurfaceError> {
        let mut state = self.state();
        let entry = state.threads.get_mut(&thread).ok_or(SurfaceError::NotFound)?;
        entry.handle.archived = true;
        entry.locked = true;
        state.calls.push(SurfaceCall::Archive(thread));
        Ok(())
    }

    async fn reopen_thread(&self, thread: ThreadId) -> Result<(), SurfaceError> {
        let mut state = self.state();
        let entry = state.threads.get_mut(&thread).ok_or(SurfaceError::NotFound)?;
        entry.handle.archived = false;
        entry.locked = false;
        state.calls.push(SurfaceCall::Reopen(thread));
        Ok(())
    }

    async fn edit_starter_message(
        &self,
        thread: ThreadId,
        body: &str,
        controls: &ThreadControls,
    ) -> Result<(), SurfaceError> {
        let mut state = self.state();
        let starter = state
            .threads
            .get_mut(&thread)
            .and_then(|t| t.starter.as_mut())
            .ok_or(SurfaceError::NotFound)?;
        starter.content = body.to_string();
        starter.has_controls = !controls.is_empty();
        state.calls.push(SurfaceCall::EditStarter(thread));
        Ok(())
    }

    async fn send_message(
        &self,
        thread: ThreadId,
        body: &str,
        _controls: &ThreadControls,
    ) -> Result<(), SurfaceError> {
        let mut state = self.state();
        let entry = state.threads.get_mut(&thread).ok_or(SurfaceError::NotFound)?;
        entry.sent.push(body.to_string());
        state.calls.push(SurfaceCall::Send(thread));
        Ok(())
    }

    async fn list_active_threads(&self, forum: ChannelId) -> Result<Vec<ThreadHandle>, SurfaceError> {
        let state = self.state();
        if state.fail_list {
            return Err(SurfaceError::Transient("gateway timeout".to_string()));
        }
        Ok(state
            .threads
            .values()
            .filter(|t| !t.handle.archived && t.handle.parent_id == Some(forum))
            .map(|t| t.handle.clone())
            .collect())
    }
}

#[async_trait]
impl MessageSurface for FakeSurface {
    async fn edit_channel_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        content: &str,
    ) -> Result<(), SurfaceError> {
        let mut state = self.state();
        match state.messages.get_mut(&message) {
            Some((owner, stored)) if *owner == channel => {
                *stored = content.to_string();
            }
            _ => return Err(SurfaceError::NotFound),
        }
        state.calls.push(SurfaceCall::EditChannelMessage(message));
        Ok(())
    }

    async fn send_channel_message(
        &self,
        channel: ChannelId,
        content: &str,
    ) -> Result<MessageId, SurfaceError> {
        let mut state = self.state();
        state.next_id += 1;
        let id = MessageId(state.next_id);
        state.messages.insert(id, (channel, content.to_string()));
        state.calls.push(SurfaceCall::SendChannelMessage(channel));
        Ok(id)
    }
}
