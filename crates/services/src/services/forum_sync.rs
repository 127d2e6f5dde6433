//! Projects tasks onto forum threads and keeps the two in step.
//!
//! One pass loads every task and the thread mapping, then for each task creates,
//! refreshes or retires its thread. Every write is gated on a comparison with
//! what the platform currently shows, so a pass over unchanged tasks writes
//! nothing. A reverse scan over the forum's live threads then retires threads
//! whose task is complete or gone, and collapses duplicates left behind when
//! two overlapping passes both created a thread for the same new task. Mapping
//! changes are written once, at the end of the pass.
//!
//! Passes may overlap unless `exclusive_passes` is set. Overlap can produce a
//! duplicate thread for a brand-new task; the reverse scan of a later pass
//! removes it.

use std::{
    collections::{HashMap, HashSet},
    ops::AddAssign,
    sync::Arc,
};

use db::{
    DbError, MetadataStore, RetryPolicy, TaskStore,
    models::task::{Task, UpdateTask},
    with_store_retry,
};
use futures::{FutureExt, StreamExt, future::BoxFuture, stream};
use thiserror::Error;
use tokio::sync::Mutex;

use super::{
    config::{DEFAULT_MAX_CONCURRENCY, SyncConfig},
    mapping::{MappingStore, ThreadMapping},
    render::{self, strip_priority_glyph},
    surface::{ChannelId, SurfaceError, ThreadControls, ThreadHandle, ThreadId, ThreadSurface},
};

#[derive(Debug, Error)]
pub enum ForumSyncError {
    #[error(transparent)]
    Database(#[from] DbError),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error("Task not found: {0}")]
    TaskNotFound(String),
    #[error("Thread {0} is not linked to a task")]
    ThreadNotFound(ThreadId),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// What one pass did. Only the platform writes count towards [`SyncReport::writes`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub renamed: usize,
    pub reopened: usize,
    pub edited: usize,
    pub snapshots_sent: usize,
    pub deleted: usize,
    pub archived: usize,
    pub migrated: usize,
    pub unlinked: usize,
    pub failures: usize,
}

impl SyncReport {
    pub fn writes(&self) -> usize {
        self.created
            + self.renamed
            + self.reopened
            + self.edited
            + self.snapshots_sent
            + self.deleted
            + self.archived
    }

    pub fn is_noop(&self) -> bool {
        *self == SyncReport::default()
    }
}

impl AddAssign for SyncReport {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.renamed += other.renamed;
        self.reopened += other.reopened;
        self.edited += other.edited;
        self.snapshots_sent += other.snapshots_sent;
        self.deleted += other.deleted;
        self.archived += other.archived;
        self.migrated += other.migrated;
        self.unlinked += other.unlinked;
        self.failures += other.failures;
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
    pub exclusive_passes: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            retry: RetryPolicy::default(),
            exclusive_passes: false,
        }
    }
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            retry: config.store_retry.policy(),
            exclusive_passes: config.exclusive_passes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retirement {
    Deleted,
    Archived,
    AlreadyGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MappingChange {
    Keep,
    Link(ThreadId),
    Unlink,
}

/// Result of reconciling one task, folded into the pass by a single writer.
struct TaskOutcome {
    key: String,
    change: MappingChange,
    /// Thread this task acted on or confirmed to exist during the pass.
    thread: Option<ThreadId>,
    report: SyncReport,
}

impl TaskOutcome {
    fn new(key: String) -> Self {
        Self {
            key,
            change: MappingChange::Keep,
            thread: None,
            report: SyncReport::default(),
        }
    }
}

pub struct ForumSyncService {
    tasks: Arc<dyn TaskStore>,
    mappings: MappingStore,
    surface: Arc<dyn ThreadSurface>,
    forum_id: ChannelId,
    retry: RetryPolicy,
    max_concurrency: usize,
    pass_lock: Option<Mutex<()>>,
}

impl ForumSyncService {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        metadata: Arc<dyn MetadataStore>,
        surface: Arc<dyn ThreadSurface>,
        forum_id: ChannelId,
        options: SyncOptions,
    ) -> Self {
        Self {
            tasks,
            mappings: MappingStore::new(metadata, options.retry),
            surface,
            forum_id,
            retry: options.retry,
            max_concurrency: options.max_concurrency.max(1),
            pass_lock: options.exclusive_passes.then(|| Mutex::new(())),
        }
    }

    pub fn forum_id(&self) -> ChannelId {
        self.forum_id
    }

    pub fn mapping_store(&self) -> &MappingStore {
        &self.mappings
    }

    /// Run one reconciliation pass.
    pub async fn sync_from_store(&self) -> Result<SyncReport, ForumSyncError> {
        let _pass_guard = match &self.pass_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        // Reload right before use; another trigger may have saved since our last pass.
        let mut mapping = self.mappings.load().await?;
        let mut tasks = with_store_retry(&self.retry, || self.tasks.get_all()).await?;
        tasks.sort_by_cached_key(|task| (task.order, task.name.to_lowercase()));

        let live = self.live_threads().await;
        let mut report = SyncReport::default();
        let mut dirty = false;

        for task in &tasks {
            if mapping.migrate_legacy(task) {
                report.migrated += 1;
                dirty = true;
            }
        }

        let plan: Vec<(&Task, Option<ThreadId>)> = tasks
            .iter()
            .map(|task| (task, mapping.thread_for(&task.key())))
            .collect();
        let mut handled: HashSet<ThreadId> = HashSet::new();
        let work: Vec<BoxFuture<'_, TaskOutcome>> = plan
            .into_iter()
            .map(|(task, mapped)| self.reconcile_task(task, mapped, &live).boxed())
            .collect();
        let mut outcomes = stream::iter(work).buffer_unordered(self.max_concurrency);

        while let Some(outcome) = outcomes.next().await {
            report += outcome.report;
            if let Some(thread) = outcome.thread {
                handled.insert(thread);
            }
            match outcome.change {
                MappingChange::Keep => {}
                MappingChange::Link(thread) => {
                    mapping.link(&outcome.key, thread);
                    dirty = true;
                }
                MappingChange::Unlink => {
                    mapping.unlink_task(&outcome.key);
                    dirty = true;
                }
            }
        }
        drop(outcomes);

        // Mutations may have landed while the pass ran; the scan judges against them.
        let current = match with_store_retry(&self.retry, || self.tasks.get_all()).await {
            Ok(current) => current,
            Err(err) => {
                tracing::warn!(error = %err, "Could not reload tasks for reverse scan");
                tasks.clone()
            }
        };
        let open_at_start: HashSet<String> = tasks
            .iter()
            .filter(|task| !task.is_complete())
            .map(Task::key)
            .collect();
        let scan = self
            .reverse_scan(&current, &open_at_start, &mut mapping, &live, &handled)
            .await;
        if scan.unlinked > 0 {
            dirty = true;
        }
        report += scan;

        if dirty {
            self.mappings.save(&mapping).await?;
        }

        if report.writes() > 0 || report.migrated > 0 || report.unlinked > 0 || report.failures > 0 {
            tracing::info!(
                created = report.created,
                renamed = report.renamed,
                reopened = report.reopened,
                edited = report.edited,
                snapshots_sent = report.snapshots_sent,
                deleted = report.deleted,
                archived = report.archived,
                migrated = report.migrated,
                unlinked = report.unlinked,
                failures = report.failures,
                "Forum sync pass finished"
            );
        } else {
            tracing::debug!(tasks = tasks.len(), "Forum sync pass found nothing to do");
        }
        Ok(report)
    }

    /// Live threads in the forum, keyed by id. Listing failures leave the map
    /// empty; mapped threads are then fetched one by one.
    async fn live_threads(&self) -> HashMap<ThreadId, ThreadHandle> {
        match self.surface.list_active_threads(self.forum_id).await {
            Ok(threads) => threads
                .into_iter()
                .filter(|thread| thread.parent_id.is_none_or(|parent| parent == self.forum_id))
                .map(|thread| (thread.id, thread))
                .collect(),
            Err(err) => {
                tracing::warn!(error = %err, "Could not enumerate active forum threads");
                HashMap::new()
            }
        }
    }

    async fn reconcile_task(
        &self,
        task: &Task,
        mapped: Option<ThreadId>,
        live: &HashMap<ThreadId, ThreadHandle>,
    ) -> TaskOutcome {
        let key = task.key();
        let mut outcome = TaskOutcome::new(key.clone());

        let thread = match mapped {
            None => None,
            Some(id) => match live.get(&id) {
                Some(handle) => Some(handle.clone()),
                None => match self.surface.fetch_thread(id).await {
                    Ok(found) => found,
                    Err(err) => {
                        // Unknown state; creating now could duplicate the thread.
                        tracing::warn!(task_id = %key, thread_id = %id, error = %err, "Could not fetch mapped thread, skipping task");
                        outcome.report.failures += 1;
                        return outcome;
                    }
                },
            },
        };

        if task.is_complete() {
            match (mapped, thread) {
                (_, Some(handle)) => {
                    outcome.thread = Some(handle.id);
                    match self.retire_thread(handle.id).await {
                        Ok(retirement) => {
                            tally_retirement(&mut outcome.report, retirement);
                            outcome.change = MappingChange::Unlink;
                            outcome.report.unlinked += 1;
                            tracing::info!(task_id = %key, thread_id = %handle.id, ?retirement, "Retired thread for completed task");
                        }
                        Err(err) => {
                            tracing::warn!(task_id = %key, thread_id = %handle.id, error = %err, "Could not delete or archive thread for completed task");
                            outcome.report.failures += 1;
                        }
                    }
                }
                (Some(stale), None) => {
                    tracing::debug!(task_id = %key, thread_id = %stale, "Thread for completed task no longer exists, clearing mapping");
                    outcome.change = MappingChange::Unlink;
                    outcome.report.unlinked += 1;
                }
                (None, None) => {}
            }
            return outcome;
        }

        let rendered = render::render(task);
        let controls = ThreadControls::for_task(task);

        let Some(handle) = thread else {
            match self
                .surface
                .create_thread(self.forum_id, &rendered.title, &rendered.body, &controls)
                .await
            {
                Ok(created) => {
                    tracing::info!(task_id = %key, thread_id = %created.id, "Created forum thread for task");
                    outcome.thread = Some(created.id);
                    outcome.change = MappingChange::Link(created.id);
                    outcome.report.created += 1;
                }
                Err(err) => {
                    tracing::warn!(task_id = %key, error = %err, "Failed to create forum thread");
                    outcome.report.failures += 1;
                }
            }
            return outcome;
        };
        outcome.thread = Some(handle.id);

        // Open tasks must stay visible; the platform auto-archives idle threads.
        if handle.archived {
            match self.surface.reopen_thread(handle.id).await {
                Ok(()) => {
                    tracing::info!(task_id = %key, thread_id = %handle.id, "Reopened archived thread for open task");
                    outcome.report.reopened += 1;
                }
                Err(err) => {
                    tracing::warn!(task_id = %key, thread_id = %handle.id, error = %err, "Could not reopen archived thread");
                    outcome.report.failures += 1;
                    return outcome;
                }
            }
        }

        if handle.title != rendered.title {
            match self.surface.edit_thread_title(handle.id, &rendered.title).await {
                Ok(()) => outcome.report.renamed += 1,
                Err(SurfaceError::PermissionDenied(_)) => {
                    tracing::warn!(thread_id = %handle.id, "Missing permission to rename forum thread");
                    outcome.report.failures += 1;
                }
                Err(err) => {
                    tracing::warn!(thread_id = %handle.id, error = %err, "Failed to rename forum thread");
                    outcome.report.failures += 1;
                }
            }
        }

        match self.surface.fetch_starter_message(handle.id).await {
            Ok(Some(starter)) => {
                if starter.content == rendered.body && starter.has_controls {
                    return outcome;
                }
                match self
                    .surface
                    .edit_starter_message(handle.id, &rendered.body, &controls)
                    .await
                {
                    Ok(()) => outcome.report.edited += 1,
                    Err(SurfaceError::NotFound) => {
                        self.send_snapshot(&handle, &rendered.body, &controls, &mut outcome.report)
                            .await;
                    }
                    Err(err) => {
                        tracing::warn!(thread_id = %handle.id, error = %err, "Failed to edit starter message");
                        outcome.report.failures += 1;
                    }
                }
            }
            Err(err) if err.is_transient() => {
                tracing::warn!(thread_id = %handle.id, error = %err, "Could not read starter message, retrying next pass");
                outcome.report.failures += 1;
            }
            Ok(None) | Err(_) => {
                self.send_snapshot(&handle, &rendered.body, &controls, &mut outcome.report)
                    .await;
            }
        }
        outcome
    }

    /// Post one snapshot message when the starter message cannot be edited.
    async fn send_snapshot(
        &self,
        handle: &ThreadHandle,
        body: &str,
        controls: &ThreadControls,
        report: &mut SyncReport,
    ) {
        match self.surface.send_message(handle.id, body, controls).await {
            Ok(()) => {
                tracing::debug!(thread_id = %handle.id, "Starter message unavailable, posted snapshot");
                report.snapshots_sent += 1;
            }
            Err(err) => {
                tracing::warn!(thread_id = %handle.id, error = %err, "Failed to post task snapshot");
                report.failures += 1;
            }
        }
    }

    /// Delete the thread, falling back to archive-and-lock when deletion is refused.
    async fn retire_thread(&self, thread: ThreadId) -> Result<Retirement, SurfaceError> {
        match self.surface.delete_thread(thread).await {
            Ok(()) => Ok(Retirement::Deleted),
            Err(SurfaceError::NotFound) => Ok(Retirement::AlreadyGone),
            Err(SurfaceError::PermissionDenied(_)) => {
                match self.surface.archive_and_lock(thread).await {
                    Ok(()) => Ok(Retirement::Archived),
                    Err(SurfaceError::NotFound) => Ok(Retirement::AlreadyGone),
                    Err(err) => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Retire live threads the forward loop left behind. Threads it already acted
    /// on are revisited only when their task was completed or deleted mid-pass.
    async fn reverse_scan(
        &self,
        tasks: &[Task],
        open_at_start: &HashSet<String>,
        mapping: &mut ThreadMapping,
        live: &HashMap<ThreadId, ThreadHandle>,
        handled: &HashSet<ThreadId>,
    ) -> SyncReport {
        let mut report = SyncReport::default();
        let by_key: HashMap<String, &Task> = tasks.iter().map(|task| (task.key(), task)).collect();
        let mut by_title: HashMap<String, Vec<&Task>> = HashMap::new();
        for task in tasks.iter().filter(|task| !task.is_complete()) {
            by_title.entry(render::thread_title(task)).or_default().push(task);
        }

        let mut candidates: Vec<ThreadId> = live.keys().chain(handled.iter()).copied().collect();
        candidates.sort();
        candidates.dedup();

        for thread in candidates {
            let acted_on = handled.contains(&thread);
            let reason = match mapping.task_for(thread) {
                Some(task_key) => {
                    let changed_mid_pass = open_at_start.contains(task_key);
                    match by_key.get(task_key) {
                        Some(task) if task.is_complete() => {
                            if acted_on && !changed_mid_pass {
                                continue;
                            }
                            "completed task"
                        }
                        Some(_) => continue,
                        None => {
                            if acted_on && !changed_mid_pass {
                                continue;
                            }
                            "deleted task"
                        }
                    }
                }
                None => {
                    if acted_on {
                        continue;
                    }
                    let Some(handle) = live.get(&thread) else {
                        continue;
                    };
                    let Some(owners) = by_title.get(&handle.title) else {
                        continue;
                    };
                    // Only a thread no task could own is a duplicate.
                    let all_owned_elsewhere = owners.iter().all(|task| {
                        mapping.thread_for(&task.key()).is_some_and(|other| {
                            other != thread
                                && (live.contains_key(&other) || handled.contains(&other))
                        })
                    });
                    if !all_owned_elsewhere {
                        continue;
                    }
                    "duplicate thread"
                }
            };

            match self.retire_thread(thread).await {
                Ok(retirement) => {
                    tally_retirement(&mut report, retirement);
                    if mapping.unlink_thread(thread).is_some() {
                        report.unlinked += 1;
                    }
                    tracing::info!(thread_id = %thread, reason, ?retirement, "Reverse scan retired thread");
                }
                Err(err) => {
                    tracing::warn!(thread_id = %thread, reason, error = %err, "Reverse scan could not retire thread");
                    report.failures += 1;
                }
            }
        }
        report
    }

    /// Pull a title edited on the platform back into the task name.
    /// Returns `None` for threads not linked to any task.
    pub async fn handle_thread_rename(
        &self,
        thread: ThreadId,
        title: &str,
    ) -> Result<Option<Task>, ForumSyncError> {
        let mapping = self.mappings.load().await?;
        let Some(task_key) = mapping.task_for(thread) else {
            return Ok(None);
        };
        let name = strip_priority_glyph(title.trim()).trim();
        if name.is_empty() {
            return Err(ForumSyncError::Validation(
                "Thread title has no task name".to_string(),
            ));
        }

        let task = with_store_retry(&self.retry, || self.tasks.get_by_key(task_key))
            .await?
            .ok_or_else(|| ForumSyncError::TaskNotFound(task_key.to_string()))?;
        // A title we wrote ourselves may be truncated; it must not shorten the name.
        let canonical = render::thread_title(&task);
        if task.name == name || strip_priority_glyph(&canonical).trim() == name {
            return Ok(Some(task));
        }

        let updated = with_store_retry(&self.retry, || {
            self.tasks.update_fields(task.id, UpdateTask::name(name))
        })
        .await?;
        tracing::info!(task_id = %updated.id, old_name = %task.name, new_name = %updated.name, "Task renamed from forum thread");
        Ok(Some(updated))
    }

    pub async fn update_description_for_thread(
        &self,
        thread: ThreadId,
        description: &str,
    ) -> Result<Task, ForumSyncError> {
        let mapping = self.mappings.load().await?;
        let task_key = mapping
            .task_for(thread)
            .ok_or(ForumSyncError::ThreadNotFound(thread))?;
        let task = with_store_retry(&self.retry, || self.tasks.get_by_key(task_key))
            .await?
            .ok_or_else(|| ForumSyncError::TaskNotFound(task_key.to_string()))?;
        let updated = with_store_retry(&self.retry, || {
            self.tasks
                .update_fields(task.id, UpdateTask::description(description.trim()))
        })
        .await?;
        Ok(updated)
    }
}

fn tally_retirement(report: &mut SyncReport, retirement: Retirement) {
    match retirement {
        Retirement::Deleted => report.deleted += 1,
        Retirement::Archived => report.archived += 1,
        Retirement::AlreadyGone => {}
    }
}
