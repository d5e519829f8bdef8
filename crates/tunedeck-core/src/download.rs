//! Download manager.
//!
//! Tracks at most one job per remote id. Each job runs as its own task:
//! resolve the stream, transfer it chunk by chunk into a hidden temporary
//! file, rename that file into place and hand the result to the catalog.
//! Cancellation is cooperative and checked between chunks.
//!
//! State machine:
//!
//! ```text
//! Downloading ──► Completed
//!      │    └───► Failed
//!      └──► Cancelling ──► Cancelled
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::DownloadConfig;
use crate::error::{DownloadError, Error, Result};
use crate::events::{EventBus, LibraryEvent};
use crate::model::{CompletedDownload, RemoteAudio, now_millis};
use crate::naming::sanitize_filename;
use crate::permission::{Access, PermissionGate};
use crate::remote::RemoteResolver;

/// Extensions checked when looking for an already downloaded file.
pub const EXISTING_FILE_EXTENSIONS: [&str; 5] = ["m4a", "mp4", "webm", "mp3", "opus"];

/// Lifecycle state of a download job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Transfer in progress.
    Downloading,
    /// Cancel requested; the transfer loop has not stopped yet.
    Cancelling,
    /// File committed and catalogued.
    Completed,
    /// Ended with an error.
    Failed,
    /// Stopped on request.
    Cancelled,
}

impl JobState {
    /// Whether the job has ended.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Observable state of one download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadJob {
    /// Remote identifier; at most one job per id.
    pub remote_id: String,
    /// Title, the remote id until metadata is known.
    pub title: String,
    /// Progress in `[0.0, 1.0]`; never decreases.
    pub progress: f64,
    /// Lifecycle state.
    pub state: JobState,
    /// Failure cause for `Failed` jobs.
    pub error: Option<String>,
    /// Final file path once known.
    pub path: Option<PathBuf>,
    /// Start time (Unix millis).
    pub started_at: u64,
}

impl DownloadJob {
    fn new(remote_id: &str, title: String) -> Self {
        Self {
            remote_id: remote_id.to_string(),
            title,
            progress: 0.0,
            state: JobState::Downloading,
            error: None,
            path: None,
            started_at: now_millis(),
        }
    }
}

/// Receives finished downloads, before the job leaves the active set.
#[async_trait]
pub trait DownloadHandoff: Send + Sync {
    /// Record a committed file. An error fails the job.
    async fn download_completed(&self, download: &CompletedDownload) -> Result<()>;
}

#[derive(Debug)]
struct JobEntry {
    job: DownloadJob,
    cancel: Arc<AtomicBool>,
    generation: u64,
}

struct Inner {
    config: DownloadConfig,
    resolver: Arc<RemoteResolver>,
    permissions: Arc<dyn PermissionGate>,
    handoff: Arc<dyn DownloadHandoff>,
    events: EventBus,
    jobs: RwLock<HashMap<String, JobEntry>>,
    generations: AtomicU64,
    /// Destination names claimed by running jobs, keyed by lowercase name.
    destinations: Mutex<HashMap<String, String>>,
}

/// Runs downloads and owns their in-memory state.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("directory", &self.inner.config.directory)
            .finish_non_exhaustive()
    }
}

impl DownloadManager {
    /// Create a manager.
    pub fn new(
        config: DownloadConfig,
        resolver: Arc<RemoteResolver>,
        permissions: Arc<dyn PermissionGate>,
        handoff: Arc<dyn DownloadHandoff>,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                resolver,
                permissions,
                handoff,
                events,
                jobs: RwLock::new(HashMap::new()),
                generations: AtomicU64::new(0),
                destinations: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Managed download directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.inner.config.directory
    }

    /// Start downloading `remote_id`.
    ///
    /// Returns the existing job if one is still active. A job that already
    /// ended but is still in its grace period is replaced.
    pub async fn start_download(&self, remote_id: &str) -> DownloadJob {
        let title = self
            .inner
            .resolver
            .cached_details(remote_id)
            .await
            .map_or_else(|| remote_id.to_string(), |d| d.title);

        let (job, cancel, generation) = {
            let mut jobs = self.inner.jobs.write().await;
            if let Some(entry) = jobs.get(remote_id)
                && !entry.job.state.is_terminal()
            {
                debug!(remote_id, "Download already active");
                return entry.job.clone();
            }

            let generation = self.inner.generations.fetch_add(1, Ordering::SeqCst) + 1;
            let cancel = Arc::new(AtomicBool::new(false));
            let job = DownloadJob::new(remote_id, title);
            jobs.insert(
                remote_id.to_string(),
                JobEntry {
                    job: job.clone(),
                    cancel: Arc::clone(&cancel),
                    generation,
                },
            );
            (job, cancel, generation)
        };

        info!(remote_id, "Download started");
        self.inner.events.emit(LibraryEvent::JobStarted(job.clone()));

        let inner = Arc::clone(&self.inner);
        let id = remote_id.to_string();
        tokio::spawn(async move {
            inner.run(id, cancel, generation).await;
        });

        job
    }

    /// Request cancellation. Returns `false` if no active job exists.
    pub async fn cancel_download(&self, remote_id: &str) -> bool {
        let mut jobs = self.inner.jobs.write().await;
        let Some(entry) = jobs.get_mut(remote_id) else {
            return false;
        };
        if entry.job.state.is_terminal() {
            return false;
        }

        entry.cancel.store(true, Ordering::SeqCst);
        if entry.job.state == JobState::Downloading {
            entry.job.state = JobState::Cancelling;
            info!(remote_id, "Download cancelling");
            self.inner.events.emit(LibraryEvent::JobCancelling {
                remote_id: remote_id.to_string(),
            });
        }
        true
    }

    /// Snapshot of every job, active or in its grace period.
    pub async fn jobs(&self) -> Vec<DownloadJob> {
        let jobs = self.inner.jobs.read().await;
        let mut list: Vec<DownloadJob> = jobs.values().map(|e| e.job.clone()).collect();
        list.sort_by_key(|job| job.started_at);
        list
    }

    /// Snapshot of one job.
    pub async fn job(&self, remote_id: &str) -> Option<DownloadJob> {
        self.inner
            .jobs
            .read()
            .await
            .get(remote_id)
            .map(|e| e.job.clone())
    }
}

impl Inner {
    async fn run(self: Arc<Self>, remote_id: String, cancel: Arc<AtomicBool>, generation: u64) {
        let outcome = self.download(&remote_id, &cancel, generation).await;

        let (state, error) = match outcome {
            Ok(path) => {
                info!(remote_id = %remote_id, path = %path.display(), "Download completed");
                (JobState::Completed, None)
            }
            Err(e) if e.is_cancellation() => {
                info!(remote_id = %remote_id, "Download cancelled");
                (JobState::Cancelled, None)
            }
            Err(e) => {
                error!(remote_id = %remote_id, "Download failed: {}", e);
                (JobState::Failed, Some(e.to_string()))
            }
        };

        let terminal = {
            let mut jobs = self.jobs.write().await;
            let Some(entry) = jobs.get_mut(&remote_id) else {
                return;
            };
            if entry.generation != generation {
                return;
            }
            entry.job.state = state;
            entry.job.error = error;
            if state == JobState::Completed {
                entry.job.progress = 1.0;
            }
            entry.job.clone()
        };
        self.events.emit(LibraryEvent::JobTerminal(terminal));

        let grace = self.config.terminal_grace();
        if !grace.is_zero() {
            tokio::time::sleep(grace).await;
        }

        let removed = {
            let mut jobs = self.jobs.write().await;
            match jobs.get(&remote_id) {
                Some(entry) if entry.generation == generation => {
                    jobs.remove(&remote_id);
                    true
                }
                _ => false,
            }
        };
        if removed {
            debug!(remote_id = %remote_id, "Job removed");
            self.events.emit(LibraryEvent::JobRemoved { remote_id });
        }
    }

    async fn download(
        &self,
        remote_id: &str,
        cancel: &AtomicBool,
        generation: u64,
    ) -> Result<PathBuf> {
        if !self.permissions.is_granted(Access::WriteDownloads) {
            return Err(Error::PermissionDenied {
                scope: Access::WriteDownloads.describe().to_string(),
            });
        }
        check_cancelled(cancel)?;

        let remote = self.resolver.audio_details(remote_id).await?;
        self.update(remote_id, generation, |job| job.title.clone_from(&remote.title))
            .await;

        let base_name = sanitize_filename(&remote.title);
        if base_name.is_empty() {
            return Err(DownloadError::UnnamedTrack {
                remote_id: remote_id.to_string(),
            }
            .into());
        }

        let directory = &self.config.directory;
        tokio::fs::create_dir_all(directory)
            .await
            .map_err(|e| Error::io(directory, e))?;

        self.claim_destination(remote_id, &base_name).await?;
        let result = self
            .fetch(remote_id, remote, &base_name, cancel, generation)
            .await;
        self.release_destination(&base_name).await;
        result
    }

    /// Reuse an existing file or transfer a new one under `base_name`.
    async fn fetch(
        &self,
        remote_id: &str,
        remote: RemoteAudio,
        base_name: &str,
        cancel: &AtomicBool,
        generation: u64,
    ) -> Result<PathBuf> {
        let directory = &self.config.directory;
        if let Some(existing) = find_existing(directory, base_name).await {
            let existing = resolve_committed(existing).await;
            info!(remote_id, path = %existing.display(), "File already present, skipping transfer");
            self.set_path(remote_id, generation, &existing).await;
            self.advance(remote_id, generation, 1.0).await;
            self.hand_off(existing.clone(), remote, true).await?;
            return Ok(existing);
        }

        let stream = self.resolver.resolve_stream(remote_id).await?;
        check_cancelled(cancel)?;

        let extension = stream.file_extension();
        let final_path = directory.join(format!("{base_name}.{extension}"));
        let temp_path = directory.join(temp_file_name(base_name, remote_id, &extension));
        self.set_path(remote_id, generation, &final_path).await;

        if let Err(e) = self
            .transfer(remote_id, &stream, &temp_path, cancel, generation)
            .await
        {
            discard(&temp_path).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
            discard(&temp_path).await;
            return Err(DownloadError::CommitFailed {
                from: temp_path,
                to: final_path,
                reason: e.to_string(),
            }
            .into());
        }

        let final_path = resolve_committed(final_path).await;
        self.set_path(remote_id, generation, &final_path).await;
        self.advance(remote_id, generation, 1.0).await;
        self.hand_off(final_path.clone(), remote, false).await?;
        Ok(final_path)
    }

    /// Claim `base_name` in the download directory for `remote_id`. At most
    /// one running job writes under a given name.
    async fn claim_destination(&self, remote_id: &str, base_name: &str) -> Result<()> {
        let mut destinations = self.destinations.lock().await;
        let key = base_name.to_lowercase();
        if let Some(holder) = destinations.get(&key)
            && holder != remote_id
        {
            warn!(remote_id, holder = %holder, "Destination '{}' is in use", base_name);
            return Err(DownloadError::DestinationBusy {
                path: self.config.directory.join(base_name),
                holder: holder.clone(),
            }
            .into());
        }
        destinations.insert(key, remote_id.to_string());
        Ok(())
    }

    async fn release_destination(&self, base_name: &str) {
        self.destinations
            .lock()
            .await
            .remove(&base_name.to_lowercase());
    }

    async fn transfer(
        &self,
        remote_id: &str,
        stream: &crate::remote::StreamDescriptor,
        temp_path: &Path,
        cancel: &AtomicBool,
        generation: u64,
    ) -> Result<()> {
        let mut transfer = self.resolver.open_stream(remote_id, stream).await?;
        let write_failed = |e: std::io::Error| DownloadError::WriteFailed {
            path: temp_path.to_path_buf(),
            reason: e.to_string(),
        };

        let mut file = tokio::fs::File::create(temp_path)
            .await
            .map_err(write_failed)?;

        let total = transfer.total.filter(|t| *t > 0);
        let mut received: u64 = 0;
        while let Some(chunk) = transfer.chunks.next().await {
            check_cancelled(cancel)?;
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(write_failed)?;
            received += chunk.len() as u64;

            let progress = total.map_or(0.0, |t| (received as f64 / t as f64).min(1.0));
            self.advance(remote_id, generation, progress).await;
        }
        check_cancelled(cancel)?;

        file.flush().await.map_err(write_failed)?;
        file.sync_all().await.map_err(write_failed)?;
        debug!(remote_id, received, "Transfer finished");
        Ok(())
    }

    async fn hand_off(&self, path: PathBuf, remote: RemoteAudio, reused_existing: bool) -> Result<()> {
        let completed = CompletedDownload {
            path,
            remote,
            reused_existing,
        };
        self.handoff.download_completed(&completed).await
    }

    async fn update(&self, remote_id: &str, generation: u64, apply: impl FnOnce(&mut DownloadJob)) {
        let mut jobs = self.jobs.write().await;
        if let Some(entry) = jobs.get_mut(remote_id)
            && entry.generation == generation
        {
            apply(&mut entry.job);
        }
    }

    async fn set_path(&self, remote_id: &str, generation: u64, path: &Path) {
        self.update(remote_id, generation, |job| job.path = Some(path.to_path_buf()))
            .await;
    }

    /// Raise progress; lower values are ignored.
    async fn advance(&self, remote_id: &str, generation: u64, progress: f64) {
        let mut advanced = false;
        self.update(remote_id, generation, |job| {
            if progress > job.progress {
                job.progress = progress;
                advanced = true;
            }
        })
        .await;
        if advanced {
            self.events.emit(LibraryEvent::JobProgress {
                remote_id: remote_id.to_string(),
                progress,
            });
        }
    }
}

fn check_cancelled(cancel: &AtomicBool) -> Result<()> {
    if cancel.load(Ordering::SeqCst) {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

async fn find_existing(directory: &Path, base_name: &str) -> Option<PathBuf> {
    for extension in EXISTING_FILE_EXTENSIONS {
        let candidate = directory.join(format!("{base_name}.{extension}"));
        if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return Some(candidate);
        }
    }
    None
}

/// Hidden per-job temporary name next to the final file.
fn temp_file_name(base_name: &str, remote_id: &str, extension: &str) -> String {
    format!(".{base_name}.{}.{extension}.part", sanitize_filename(remote_id))
}

/// Committed files are recorded by their resolved path, the same form the
/// scanner produces.
async fn resolve_committed(path: PathBuf) -> PathBuf {
    match tokio::fs::canonicalize(&path).await {
        Ok(resolved) => resolved,
        Err(e) => {
            debug!("Keeping unresolved path {}: {}", path.display(), e);
            path
        }
    }
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed temporary file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove temporary file {}: {}", path.display(), e),
    }
}
