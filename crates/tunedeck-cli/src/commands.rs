//! Subcommand implementations.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tunedeck_core::{AppConfig, DownloadJob, JobState, Library, LibraryEvent, Track};

/// Errors surfaced by the binary.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// A core operation failed.
    #[error(transparent)]
    Core(#[from] tunedeck_core::Error),

    /// Printing the configuration failed.
    #[error("Cannot render configuration: {0}")]
    Render(#[from] serde_json::Error),

    /// Some downloads failed.
    #[error("{failed} of {total} downloads failed")]
    DownloadsFailed {
        /// Jobs that ended Failed.
        failed: usize,
        /// Jobs started.
        total: usize,
    },

    /// The event stream ended before every job finished.
    #[error("Download events stopped before all jobs finished")]
    EventsClosed,
}

impl CliError {
    /// Message for the terminal.
    pub fn user_message(&self) -> String {
        match self {
            Self::Core(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

/// Load from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, CliError> {
    let config = match path {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    debug!(?config, "Configuration loaded");
    Ok(config)
}

pub fn show_config(config: &AppConfig, path: Option<&Path>, save: bool) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(config)?);
    if save {
        match path {
            Some(path) => config.save_to(path)?,
            None => config.save()?,
        }
        let shown = path.map_or_else(AppConfig::config_file_path, Path::to_path_buf);
        println!("Saved to {}", shown.display());
    }
    Ok(())
}

pub async fn scan(mut config: AppConfig, force: bool, roots: Vec<PathBuf>) -> Result<(), CliError> {
    if !roots.is_empty() {
        config.scan.roots = roots;
    }
    let library = Library::open(config).await?;
    let result = library.scan(force).await?;

    println!(
        "Scanned {} folders ({} skipped): {} new, {} updated, {} removed, {} unreadable",
        result.scan.roots_scanned,
        result.scan.roots_skipped,
        result.sync.inserted,
        result.sync.updated,
        result.removed,
        result.scan.files_failed + result.sync.failed,
    );
    Ok(())
}

pub async fn list(config: AppConfig, query: Option<&str>) -> Result<(), CliError> {
    let library = Library::open(config).await?;
    let tracks = match query {
        Some(query) => library.find(query).await?,
        None => library.tracks().await?,
    };

    for track in &tracks {
        println!("{}", format_track(track));
    }
    println!("{} tracks", tracks.len());
    Ok(())
}

pub async fn search(config: AppConfig, query: &str, pages: usize) -> Result<(), CliError> {
    let library = Library::open(config).await?;

    let mut results = library.search(query).await?;
    let mut fetched = 1;
    while fetched < pages && library.has_more_results().await {
        let page = library.search_next_page(query).await?;
        if page.is_empty() {
            break;
        }
        results.extend(page);
        fetched += 1;
    }

    for item in &results {
        let duration = item
            .duration_ms
            .map_or_else(|| "--:--".to_string(), format_duration);
        let author = item.author.as_deref().unwrap_or("?");
        println!("{:<12} {:>6}  {} ({})", item.id, duration, item.title, author);
    }
    if library.has_more_results().await {
        println!("More results available; use --pages to fetch them");
    }
    Ok(())
}

pub async fn download(config: AppConfig, ids: &[String]) -> Result<(), CliError> {
    let library = Library::open(config).await?;
    let mut events = library.subscribe();

    let ids: BTreeSet<&str> = ids.iter().map(String::as_str).collect();
    for id in &ids {
        let job = library.download(id).await;
        println!("{}: downloading '{}'", job.remote_id, job.title);
    }

    let mut pending: BTreeSet<&str> = ids.clone();
    let mut reported: HashMap<String, u32> = HashMap::new();
    let mut failed = 0;

    while !pending.is_empty() {
        match events.recv().await {
            Ok(LibraryEvent::JobProgress { remote_id, progress }) => {
                let step = (progress * 4.0).floor() as u32;
                let last = reported.entry(remote_id.clone()).or_insert(0);
                if step > *last {
                    *last = step;
                    println!("{remote_id}: {:.0}%", progress * 100.0);
                }
            }
            Ok(LibraryEvent::JobTerminal(job)) => {
                if pending.remove(job.remote_id.as_str()) && report_terminal(&job) {
                    failed += 1;
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!("Missed {} download events", skipped);
                for job in library.jobs().await {
                    if job.state.is_terminal()
                        && pending.remove(job.remote_id.as_str())
                        && report_terminal(&job)
                    {
                        failed += 1;
                    }
                }
            }
            Err(RecvError::Closed) => return Err(CliError::EventsClosed),
        }
    }

    info!(total = ids.len(), failed, "Downloads finished");
    if failed > 0 {
        return Err(CliError::DownloadsFailed {
            failed,
            total: ids.len(),
        });
    }
    Ok(())
}

/// Print the outcome of a finished job. Returns `true` only for failures;
/// a cancelled job is not one.
fn report_terminal(job: &DownloadJob) -> bool {
    match job.state {
        JobState::Completed => {
            println!(
                "{}: done -> {}",
                job.remote_id,
                job.path
                    .as_ref()
                    .map_or_else(String::new, |p| p.display().to_string())
            );
            false
        }
        JobState::Cancelled => {
            println!("{}: cancelled", job.remote_id);
            false
        }
        JobState::Failed => {
            println!(
                "{}: failed: {}",
                job.remote_id,
                job.error.as_deref().unwrap_or("unknown error")
            );
            true
        }
        JobState::Downloading | JobState::Cancelling => false,
    }
}

pub async fn play(config: AppConfig, id: i64) -> Result<(), CliError> {
    let library = Library::open(config).await?;
    let request = library.play_track(id).await?;
    println!("{}", format_track(&request.track));
    println!("{}", request.locator);
    Ok(())
}

pub async fn now_playing(config: AppConfig, ids: &[i64]) -> Result<(), CliError> {
    let library = Library::open(config).await?;
    if !ids.is_empty() {
        library.set_now_playing(ids).await?;
    }
    for (position, track) in library.now_playing().await?.iter().enumerate() {
        println!("{:>3}. {}", position + 1, format_track(track));
    }
    Ok(())
}

fn format_track(track: &Track) -> String {
    let id = track.id.map_or_else(|| "-".to_string(), |id| id.to_string());
    let origin = if track.is_downloaded() { " [dl]" } else { "" };
    format!(
        "{id:>5}  {:>6}  {} - {}{origin}",
        format_duration(track.duration_ms),
        track.artist_line(),
        track.title
    )
}

fn format_duration(ms: u64) -> String {
    let seconds = ms / 1000;
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
