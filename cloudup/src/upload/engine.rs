use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use cloudup_core::{CloudClient, CreateSessionRequest, DirectoryObject, StorageType, UploadMethod};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, clamp_concurrency};

use super::backoff::RetryPolicy;
use super::chunk::{ChunkError, ChunkPlan, ChunkUploader};
use super::collector::UploadCandidate;
use super::conflict::{ConflictStrategy, DirectoryListing, renamed_relative_path};
use super::error::UploadError;
use super::item::{FileHandle, ItemId, UploadItem, UploadStatus};
use super::negotiator::{NegotiationError, SessionNegotiator, SessionPlan};
use super::paths::{file_name_of, is_within, join_remote, normalize_remote};
use super::queue::{QueueEvent, UploadQueue, UploadSummary};
use super::resume::{orphan_candidates, resumable_item, verify_fingerprint};
use super::sampler::{self, SpeedMode};

const EVENT_CAPACITY: usize = 4096;
const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(10);
const NOTHING_TO_UPLOAD: &str = "nothing to upload";

pub type RefreshHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum GlobalCommand {
    SetOverwriteAll(bool),
    RetryAll,
    ClearFinished,
    SetConcurrency(usize),
    SetSpeedMode(SpeedMode),
}

#[derive(Clone)]
pub struct UploadManager {
    inner: Arc<Inner>,
}

struct Inner {
    client: CloudClient,
    negotiator: SessionNegotiator,
    uploader: ChunkUploader,
    config: EngineConfig,
    state: Mutex<State>,
    events: broadcast::Sender<QueueEvent>,
    idle: watch::Sender<bool>,
}

struct State {
    queue: UploadQueue,
    listing: Option<DirectoryListing>,
    concurrency: usize,
    active: usize,
    overwrite_all: bool,
    speed_mode: SpeedMode,
    refresh_due: bool,
    draining: bool,
    sampler_running: bool,
    on_refresh: Option<RefreshHandler>,
}

/// What a worker needs from an item, copied out so no lock is held across
/// network calls.
struct Job {
    full_path: String,
    parent_path: String,
    size: u64,
    file: FileHandle,
    policy_id: String,
    overwrite: bool,
    cancel: CancellationToken,
    resume: Option<SessionPlan>,
}

impl UploadManager {
    pub fn new(client: CloudClient, config: EngineConfig) -> Self {
        let retry = RetryPolicy::new(config.chunk_retries, config.retry_base, config.retry_max, true);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (idle, _) = watch::channel(true);
        let state = State {
            queue: UploadQueue::default(),
            listing: None,
            concurrency: clamp_concurrency(config.concurrency),
            active: 0,
            overwrite_all: config.overwrite,
            speed_mode: config.speed_mode,
            refresh_due: false,
            draining: false,
            sampler_running: false,
            on_refresh: None,
        };
        Self {
            inner: Arc::new(Inner {
                negotiator: SessionNegotiator::new(client.clone(), config.negotiate_interval),
                uploader: ChunkUploader::new(client.clone(), retry),
                client,
                config,
                state: Mutex::new(state),
                events,
                idle,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    pub fn set_refresh_handler(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.inner.state().on_refresh = Some(Arc::new(handler));
    }

    pub fn items(&self) -> Vec<UploadItem> {
        self.inner.state().queue.items().to_vec()
    }

    pub fn item(&self, id: ItemId) -> Option<UploadItem> {
        self.inner.state().queue.get(id).cloned()
    }

    pub fn summary(&self) -> UploadSummary {
        self.inner.state().queue.summary()
    }

    pub fn concurrency(&self) -> usize {
        self.inner.state().concurrency
    }

    pub fn speed_mode(&self) -> SpeedMode {
        self.inner.state().speed_mode
    }

    pub fn set_listing(&self, listing: DirectoryListing) {
        self.inner.state().listing = Some(listing);
    }

    pub async fn wait_idle(&self) {
        let mut idle = self.inner.idle.subscribe();
        let _ = idle.wait_for(|idle| *idle).await;
    }

    pub async fn load_directory(&self, path: &str) -> Result<usize, UploadError> {
        let objects = self
            .inner
            .client
            .list_directory_all(path, self.inner.config.listing_page_size)
            .await?;
        let recovered = self.recover_sessions(&objects).await;
        self.set_listing(DirectoryListing::new(path, objects));
        Ok(recovered)
    }

    pub async fn recover_sessions(&self, objects: &[DirectoryObject]) -> usize {
        let mut recovered = 0;
        for (object, session_id) in orphan_candidates(objects) {
            if self.inner.state().is_known(object, session_id) {
                continue;
            }
            let status = match self.inner.negotiator.validate(session_id).await {
                Ok(status) if status.is_valid => status,
                Ok(_) => {
                    debug!(session_id, "orphaned session is no longer valid");
                    continue;
                }
                Err(err) => {
                    debug!(session_id, error = %err, "failed to validate orphaned session");
                    continue;
                }
            };
            let mut state = self.inner.state();
            if state.is_known(object, session_id) {
                continue;
            }
            let id = state.queue.allocate_id();
            let item = resumable_item(
                id,
                object,
                session_id,
                &status,
                Some(self.inner.config.policy_id.clone()),
            );
            info!(id, path = %item.full_path(), "found resumable upload");
            state.queue.push(item);
            self.inner.publish(QueueEvent::Changed {
                id,
                status: UploadStatus::Resumable,
            });
            recovered += 1;
        }
        recovered
    }

    pub fn add_uploads_to_queue(&self, candidates: Vec<UploadCandidate>) -> bool {
        if candidates.is_empty() {
            warn!("{NOTHING_TO_UPLOAD}");
            self.inner
                .publish(QueueEvent::Notice(NOTHING_TO_UPLOAD.to_string()));
            return false;
        }
        let mut stale_sessions = Vec::new();
        let added = {
            let mut state = self.inner.state();
            let mut added = 0usize;
            for candidate in candidates {
                if let Some(existing) = state
                    .queue
                    .find_by_key(&candidate.target_path, &candidate.relative_path)
                {
                    let (id, status) = (existing.id, existing.status);
                    if status == UploadStatus::Resumable {
                        if self.inner.attach_file(&mut state, id, candidate.file).is_ok() {
                            added += 1;
                        }
                        continue;
                    }
                    if !status.is_finished() {
                        debug!(path = %candidate.relative_path, "already queued");
                        continue;
                    }
                    if let Some(replaced) = state.queue.remove(id) {
                        if replaced.status == UploadStatus::Error
                            && let Some(session_id) = replaced.session_id.clone()
                        {
                            stale_sessions.push((session_id, replaced.full_path()));
                        }
                        self.inner.publish(QueueEvent::Removed { id });
                    }
                }

                let id = state.queue.allocate_id();
                let overwrite = state.overwrite_all;
                let mut item = UploadItem::new(
                    id,
                    candidate.file,
                    candidate.relative_path,
                    candidate.target_path,
                    Some(self.inner.config.policy_id.clone()),
                    overwrite,
                );
                let exists = state
                    .listing
                    .as_ref()
                    .is_some_and(|listing| listing.contains(&item.full_path()));
                if exists && !overwrite {
                    item.status = UploadStatus::Conflict;
                    item.error_message = Some(format!("{} already exists", item.name));
                }
                let status = item.status;
                state.queue.push(item);
                self.inner.publish(QueueEvent::Changed { id, status });
                added += 1;
            }
            added
        };
        for (session_id, path) in stale_sessions {
            info!(session_id = %session_id, path = %path, "dropping session of replaced failed upload");
            let negotiator = self.inner.negotiator.clone();
            tokio::spawn(async move {
                negotiator.delete_best_effort(&session_id, &path).await;
            });
        }
        if added == 0 {
            self.inner.publish(QueueEvent::Notice(
                "all selected files are already queued".to_string(),
            ));
            return false;
        }
        self.inner.schedule();
        true
    }

    pub fn retry_item(&self, id: ItemId) -> Result<(), UploadError> {
        {
            let mut state = self.inner.state();
            let item = state.queue.require_mut(id)?;
            match item.status {
                UploadStatus::Resumable => {
                    self.inner.publish(QueueEvent::FileRequested { id });
                    return Ok(());
                }
                UploadStatus::Error => {
                    item.reset_transfer();
                    item.set_status(UploadStatus::Pending)?;
                }
                from => {
                    return Err(UploadError::InvalidTransition {
                        from,
                        to: UploadStatus::Pending,
                    });
                }
            }
            self.inner.publish(QueueEvent::Changed {
                id,
                status: UploadStatus::Pending,
            });
        }
        self.inner.schedule();
        Ok(())
    }

    pub fn supply_file(&self, id: ItemId, file: FileHandle) -> Result<(), UploadError> {
        {
            let mut state = self.inner.state();
            self.inner.attach_file(&mut state, id, file)?;
        }
        self.inner.schedule();
        Ok(())
    }

    pub async fn cancel_item(&self, id: ItemId) -> Result<(), UploadError> {
        let session = {
            let mut state = self.inner.state();
            let item = state.queue.require_mut(id)?;
            if item.status == UploadStatus::Canceled {
                return Ok(());
            }
            item.set_status(UploadStatus::Canceled)?;
            item.cancel.cancel();
            item.error_message = None;
            item.needs_refresh = false;
            let session = item.session_id.clone().map(|sid| (sid, item.full_path()));
            self.inner.publish(QueueEvent::Changed {
                id,
                status: UploadStatus::Canceled,
            });
            session
        };
        info!(id, "upload canceled");
        if let Some((session_id, path)) = session {
            self.inner
                .negotiator
                .delete_best_effort(&session_id, &path)
                .await;
        }
        Ok(())
    }

    pub async fn remove_item(&self, id: ItemId) -> Result<(), UploadError> {
        let session = {
            let mut state = self.inner.state();
            let item = state.queue.remove(id).ok_or(UploadError::NotFound(id))?;
            item.cancel.cancel();
            self.inner.publish(QueueEvent::Removed { id });
            match item.status {
                UploadStatus::Success | UploadStatus::Canceled => None,
                _ => item.session_id.clone().map(|sid| (sid, item.full_path())),
            }
        };
        if let Some((session_id, path)) = session {
            self.inner
                .negotiator
                .delete_best_effort(&session_id, &path)
                .await;
        }
        Ok(())
    }

    pub fn resolve_conflict(
        &self,
        id: ItemId,
        strategy: ConflictStrategy,
    ) -> Result<(), UploadError> {
        {
            let mut state = self.inner.state();
            let State { queue, listing, .. } = &mut *state;
            let item = queue.get(id).ok_or(UploadError::NotFound(id))?;
            if item.status != UploadStatus::Conflict {
                return Err(UploadError::InvalidTransition {
                    from: item.status,
                    to: UploadStatus::Pending,
                });
            }
            let renamed = match strategy {
                ConflictStrategy::Overwrite => None,
                ConflictStrategy::Rename => {
                    let target = item.target_path.clone();
                    Some(renamed_relative_path(
                        &item.relative_path,
                        &self.inner.config.copy_suffix,
                        |candidate| {
                            queue.find_by_key(&target, candidate).is_some()
                                || listing.as_ref().is_some_and(|listing| {
                                    listing.contains(&join_remote(&target, candidate))
                                })
                        },
                    ))
                }
            };
            let item = queue.require_mut(id)?;
            match renamed {
                Some(relative_path) => {
                    item.name = file_name_of(&relative_path).to_string();
                    item.relative_path = relative_path;
                }
                None => item.overwrite = true,
            }
            item.reset_transfer();
            item.set_status(UploadStatus::Pending)?;
            self.inner.publish(QueueEvent::Changed {
                id,
                status: UploadStatus::Pending,
            });
        }
        self.inner.schedule();
        Ok(())
    }

    pub fn set_concurrency(&self, concurrency: usize) {
        self.inner.state().concurrency = clamp_concurrency(concurrency);
        self.inner.schedule();
    }

    pub fn handle_global_command(&self, command: GlobalCommand) -> Result<(), UploadError> {
        match command {
            GlobalCommand::SetOverwriteAll(enabled) => {
                {
                    let mut state = self.inner.state();
                    state.overwrite_all = enabled;
                    if enabled {
                        for id in state.queue.ids_with_status(UploadStatus::Conflict) {
                            let item = state.queue.require_mut(id)?;
                            item.overwrite = true;
                            item.reset_transfer();
                            item.set_status(UploadStatus::Pending)?;
                            self.inner.publish(QueueEvent::Changed {
                                id,
                                status: UploadStatus::Pending,
                            });
                        }
                    }
                }
                self.inner.schedule();
            }
            GlobalCommand::RetryAll => {
                {
                    let mut state = self.inner.state();
                    for id in state.queue.ids_with_status(UploadStatus::Error) {
                        let item = state.queue.require_mut(id)?;
                        item.reset_transfer();
                        item.set_status(UploadStatus::Pending)?;
                        self.inner.publish(QueueEvent::Changed {
                            id,
                            status: UploadStatus::Pending,
                        });
                    }
                }
                self.inner.schedule();
            }
            GlobalCommand::ClearFinished => {
                let mut state = self.inner.state();
                let mut finished = state.queue.ids_with_status(UploadStatus::Success);
                finished.extend(state.queue.ids_with_status(UploadStatus::Canceled));
                for id in finished {
                    state.queue.remove(id);
                    self.inner.publish(QueueEvent::Removed { id });
                }
            }
            GlobalCommand::SetConcurrency(concurrency) => self.set_concurrency(concurrency),
            GlobalCommand::SetSpeedMode(mode) => self.inner.state().speed_mode = mode,
        }
        Ok(())
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: QueueEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn attach_file(
        &self,
        state: &mut State,
        id: ItemId,
        file: FileHandle,
    ) -> Result<(), UploadError> {
        let item = state.queue.require_mut(id)?;
        if item.status != UploadStatus::Resumable {
            return Err(UploadError::InvalidTransition {
                from: item.status,
                to: UploadStatus::Pending,
            });
        }
        if let Err(err) = verify_fingerprint(item, &file) {
            warn!(id, error = %err, "rejected file for resumable upload");
            self.publish(QueueEvent::Notice(err.to_string()));
            return Err(err);
        }
        item.file = file;
        item.error_message = None;
        item.set_status(UploadStatus::Pending)?;
        self.publish(QueueEvent::Changed {
            id,
            status: UploadStatus::Pending,
        });
        Ok(())
    }

    fn schedule(self: &Arc<Self>) {
        let mut refreshed = {
            let mut state = self.state();
            while state.active < state.concurrency {
                let Some(id) = state.queue.first_pending() else {
                    break;
                };
                let Some(item) = state.queue.get_mut(id) else {
                    break;
                };
                if item.set_status(UploadStatus::Processing).is_err() {
                    break;
                }
                state.active += 1;
                self.publish(QueueEvent::Changed {
                    id,
                    status: UploadStatus::Processing,
                });
                let worker = Arc::clone(self);
                tokio::spawn(worker.run_item(id));
            }
            if state.active > 0 {
                self.idle.send_replace(false);
                if !state.sampler_running {
                    state.sampler_running = true;
                    tokio::spawn(Arc::clone(self).run_sampler());
                }
                return;
            }
            if state.draining || *self.idle.borrow() {
                return;
            }
            state.draining = true;
            std::mem::take(&mut state.refresh_due)
        };

        let mut any_refreshed = false;
        loop {
            if refreshed {
                any_refreshed = true;
                let handler = self.state().on_refresh.clone();
                if let Some(handler) = handler {
                    handler();
                }
            }
            let mut state = self.state();
            if state.active > 0 || state.queue.has_pending() {
                state.draining = false;
                return;
            }
            if state.refresh_due {
                refreshed = std::mem::take(&mut state.refresh_due);
                continue;
            }
            state.draining = false;
            info!(refreshed = any_refreshed, "upload queue drained");
            self.publish(QueueEvent::Drained {
                refreshed: any_refreshed,
            });
            self.idle.send_replace(true);
            return;
        }
    }

    async fn run_item(self: Arc<Self>, id: ItemId) {
        if let Err(err) = self.process_item(id).await {
            self.record_failure(id, err);
        }
        self.state().active -= 1;
        self.schedule();
    }

    async fn run_sampler(self: Arc<Self>) {
        let mut ticker =
            tokio::time::interval(self.config.sample_interval.max(MIN_SAMPLE_INTERVAL));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let mut state = self.state();
            if state.active == 0 {
                state.sampler_running = false;
                return;
            }
            sampler::sample(state.queue.items_mut(), Instant::now());
        }
    }

    async fn process_item(&self, id: ItemId) -> Result<(), UploadError> {
        if !self.config.start_delay.is_zero() {
            tokio::time::sleep(self.config.start_delay).await;
        }
        let Some(job) = self.job_for(id)? else {
            return Ok(());
        };

        let resuming = job.resume.is_some();
        let plan = match job.resume.clone() {
            Some(plan) => plan,
            None => {
                let request = CreateSessionRequest {
                    path: job.full_path.clone(),
                    size: job.size,
                    policy_id: job.policy_id.clone(),
                    overwrite: job.overwrite,
                };
                match self.negotiator.negotiate(&job.parent_path, &request).await {
                    Ok(plan) => plan,
                    Err(NegotiationError::Conflict(message)) => {
                        self.park_conflict(id, message);
                        return Ok(());
                    }
                    Err(NegotiationError::Failed(err)) => return Err(err.into()),
                    Err(NegotiationError::Invalid(err)) => return Err(err.into()),
                }
            }
        };

        let Some(missing) = self.begin_transfer(id, &plan) else {
            if !resuming && let Some(session_id) = &plan.session_id {
                self.negotiator
                    .delete_best_effort(session_id, &job.full_path)
                    .await;
            }
            return Ok(());
        };

        let target = plan.target()?;
        for index in missing {
            let len = self
                .uploader
                .upload(&target, &plan.chunks, &job.file, index, &job.cancel)
                .await?;
            debug!(id, index, len, "chunk uploaded");
            if !self.record_chunk(id, index, &plan.chunks) {
                return Ok(());
            }
        }

        if plan.requires_finalize() {
            self.negotiator
                .finalize(&job.full_path, &job.policy_id, job.size)
                .await?;
        }
        self.complete(id);
        Ok(())
    }

    fn job_for(&self, id: ItemId) -> Result<Option<Job>, UploadError> {
        let state = self.state();
        let Some(item) = state.queue.get(id) else {
            return Ok(None);
        };
        if item.status != UploadStatus::Processing {
            return Ok(None);
        }
        let resume = match (&item.session_id, item.chunk_size) {
            (Some(session_id), Some(chunk_size)) if item.is_resuming => Some(SessionPlan {
                session_id: Some(session_id.clone()),
                method: UploadMethod::Server,
                upload_url: None,
                content_type: None,
                storage_type: item.storage_type.clone().unwrap_or(StorageType::Other),
                chunks: ChunkPlan::new(item.size, chunk_size)?,
            }),
            _ => None,
        };
        Ok(Some(Job {
            full_path: item.full_path(),
            parent_path: item.parent_path(),
            size: item.size,
            file: item.file.clone(),
            policy_id: item
                .policy_id
                .clone()
                .unwrap_or_else(|| self.config.policy_id.clone()),
            overwrite: item.overwrite,
            cancel: item.cancel.clone(),
            resume,
        }))
    }

    fn park_conflict(&self, id: ItemId, message: String) {
        let mut state = self.state();
        let Some(item) = state.queue.get_mut(id) else {
            return;
        };
        if item.set_status(UploadStatus::Conflict).is_ok() {
            info!(id, path = %item.full_path(), "naming conflict");
            item.error_message = Some(message);
            self.publish(QueueEvent::Changed {
                id,
                status: UploadStatus::Conflict,
            });
        }
    }

    fn begin_transfer(&self, id: ItemId, plan: &SessionPlan) -> Option<Vec<u32>> {
        let mut state = self.state();
        let item = state.queue.get_mut(id)?;
        if item.status != UploadStatus::Processing {
            return None;
        }
        let total = plan.chunks.total_chunks;
        item.session_id = plan.session_id.clone();
        item.upload_method = plan.method;
        item.upload_url = plan.upload_url.clone();
        item.content_type = plan.content_type.clone();
        item.storage_type = Some(plan.storage_type.clone());
        item.chunk_size = Some(plan.chunks.chunk_size);
        item.total_chunks = Some(total);
        item.uploaded_chunks.retain(|index| *index < total);
        item.uploaded_size = plan.chunks.uploaded_bytes(&item.uploaded_chunks);
        let now = Instant::now();
        item.start_time = Some(now);
        item.last_time = Some(now);
        item.last_size = item.uploaded_size;
        item.error_message = None;
        item.set_status(UploadStatus::Uploading).ok()?;
        debug!(id, total, method = ?plan.method, "upload session ready");
        self.publish(QueueEvent::Changed {
            id,
            status: UploadStatus::Uploading,
        });
        Some(plan.chunks.missing(&item.uploaded_chunks))
    }

    fn record_chunk(&self, id: ItemId, index: u32, chunks: &ChunkPlan) -> bool {
        let mut state = self.state();
        let Some(item) = state.queue.get_mut(id) else {
            return false;
        };
        if item.status != UploadStatus::Uploading {
            return false;
        }
        item.uploaded_chunks.insert(index);
        item.uploaded_size = chunks.uploaded_bytes(&item.uploaded_chunks);
        self.publish(QueueEvent::Changed {
            id,
            status: UploadStatus::Uploading,
        });
        true
    }

    fn complete(&self, id: ItemId) {
        let mut state = self.state();
        let State {
            queue,
            listing,
            refresh_due,
            ..
        } = &mut *state;
        let Some(item) = queue.get_mut(id) else {
            return;
        };
        if item.set_status(UploadStatus::Success).is_err() {
            return;
        }
        item.uploaded_size = item.size;
        item.error_message = None;
        item.is_resuming = false;
        item.needs_refresh = listing
            .as_ref()
            .is_none_or(|listing| is_within(&item.parent_path(), &listing.path));
        *refresh_due |= item.needs_refresh;
        info!(id, path = %item.full_path(), "upload finished");
        self.publish(QueueEvent::Changed {
            id,
            status: UploadStatus::Success,
        });
    }

    /// Failures land on the item; a canceled item absorbs them silently.
    fn record_failure(&self, id: ItemId, err: UploadError) {
        let mut state = self.state();
        let Some(item) = state.queue.get_mut(id) else {
            return;
        };
        if item.status == UploadStatus::Canceled
            || matches!(err, UploadError::Chunk(ChunkError::Canceled))
        {
            debug!(id, error = %err, "ignoring failure of canceled upload");
            return;
        }
        if item.set_status(UploadStatus::Error).is_ok() {
            warn!(id, path = %item.full_path(), error = %err, "upload failed");
            item.error_message = Some(err.to_string());
            self.publish(QueueEvent::Changed {
                id,
                status: UploadStatus::Error,
            });
        }
    }
}

impl State {
    fn is_known(&self, object: &DirectoryObject, session_id: &str) -> bool {
        self.queue
            .find_by_key(&normalize_remote(&object.path), &object.name)
            .is_some()
            || self
                .queue
                .items()
                .iter()
                .any(|item| item.session_id.as_deref() == Some(session_id))
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
