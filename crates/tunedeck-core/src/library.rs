//! The command surface offered to a presentation layer.
//!
//! [`Library`] wires the catalog, scanner, resolver, download manager and
//! sync orchestrator together once, then exposes the user-level commands.
//! Observers subscribe to [`LibraryEvent`]s instead of polling.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use crate::catalog::Catalog;
use crate::config::AppConfig;
use crate::download::{DownloadHandoff, DownloadJob, DownloadManager};
use crate::error::{Result, StorageError};
use crate::events::{EventBus, LibraryEvent};
use crate::model::{PlaybackRequest, RemoteAudio, Track, TrackId};
use crate::naming::LocatorNormalizer;
use crate::permission::{AllowAll, PermissionGate};
use crate::probe::{DurationProbe, LoftyProbe};
use crate::remote::{RemotePlatform, RemoteResolver, RustyYtdlPlatform};
use crate::scanner::{LocalScanner, ScanReport};
use crate::sync::{SyncOrchestrator, SyncReport};

/// Result of [`Library::scan`].
#[derive(Debug, Clone, Default)]
pub struct LibraryScan {
    /// Rows removed because their file vanished.
    pub removed: usize,
    /// What the scanner found.
    pub scan: ScanReport,
    /// What was written.
    pub sync: SyncReport,
}

/// Collaborators that can be swapped out, typically in tests.
pub struct Collaborators {
    /// Remote platform backend.
    pub platform: Arc<dyn RemotePlatform>,
    /// Duration prober.
    pub probe: Arc<dyn DurationProbe>,
    /// Permission layer.
    pub permissions: Arc<dyn PermissionGate>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            platform: Arc::new(RustyYtdlPlatform::new()),
            probe: Arc::new(LoftyProbe),
            permissions: Arc::new(AllowAll),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Music library core.
#[derive(Debug)]
pub struct Library {
    catalog: Arc<Catalog>,
    scanner: LocalScanner,
    resolver: Arc<RemoteResolver>,
    downloads: DownloadManager,
    sync: Arc<SyncOrchestrator>,
    events: EventBus,
}

impl Library {
    /// Open the library described by `config` with production collaborators.
    pub async fn open(config: AppConfig) -> Result<Self> {
        let normalizer = LocatorNormalizer::new(&config.scan.mount_aliases);
        let catalog = Catalog::open(&config.catalog, normalizer).await?;
        Ok(Self::new(config, catalog, Collaborators::default()))
    }

    /// Wire a library from an opened catalog and explicit collaborators.
    pub fn new(config: AppConfig, catalog: Catalog, collaborators: Collaborators) -> Self {
        let Collaborators {
            platform,
            probe,
            permissions,
        } = collaborators;

        let events = EventBus::new();
        let catalog = Arc::new(catalog);
        let resolver = Arc::new(RemoteResolver::new(platform, &config.remote));
        let sync = Arc::new(SyncOrchestrator::new(
            Arc::clone(&catalog),
            events.clone(),
            config.downloads.provenance_tag.clone(),
            Arc::clone(&probe),
            config.scan.probe_attempts,
        ));
        let scanner = LocalScanner::new(config.scan, probe, Arc::clone(&permissions));
        let downloads = DownloadManager::new(
            config.downloads,
            Arc::clone(&resolver),
            permissions,
            Arc::clone(&sync) as Arc<dyn DownloadHandoff>,
            events.clone(),
        );

        Self {
            catalog,
            scanner,
            resolver,
            downloads,
            sync,
            events,
        }
    }

    /// Reconcile, then scan every root and store what was found.
    ///
    /// Library read access is checked before anything is removed.
    ///
    /// Without `force_rescan` files already in the catalog are not probed
    /// again; with it their metadata is refreshed.
    pub async fn scan(&self, force_rescan: bool) -> Result<LibraryScan> {
        // Reconcile reads the library too; a denied scan must not touch rows.
        self.scanner.ensure_permitted()?;
        let removed = self.sync.reconcile().await?;
        let known = self.catalog.locator_keys().await?;
        let scan = self.scanner.scan(&known, force_rescan).await?;
        let sync = self.sync.sync_scanned(&scan.tracks).await;

        info!(
            removed,
            inserted = sync.inserted,
            updated = sync.updated,
            failed = sync.failed,
            "Scan complete"
        );
        Ok(LibraryScan {
            removed,
            scan,
            sync,
        })
    }

    /// First page of remote results for `query`.
    pub async fn search(&self, query: &str) -> Result<Vec<RemoteAudio>> {
        self.resolver.search(query).await
    }

    /// Next page for the last remote search; empty at the end.
    pub async fn search_next_page(&self, query: &str) -> Result<Vec<RemoteAudio>> {
        self.resolver.search_next_page(query).await
    }

    /// Whether the last remote search has more pages.
    pub async fn has_more_results(&self) -> bool {
        self.resolver.has_more_results().await
    }

    /// Start (or join) the download of a remote item.
    pub async fn download(&self, remote_id: &str) -> DownloadJob {
        self.downloads.start_download(remote_id).await
    }

    /// Cancel a running download.
    pub async fn cancel_download(&self, remote_id: &str) -> bool {
        self.downloads.cancel_download(remote_id).await
    }

    /// Current download jobs.
    pub async fn jobs(&self) -> Vec<DownloadJob> {
        self.downloads.jobs().await
    }

    /// Hand a catalogued track to the audio engine.
    pub async fn play_track(&self, id: TrackId) -> Result<PlaybackRequest> {
        let track = self
            .catalog
            .get_track(id)
            .await?
            .ok_or(StorageError::TrackNotFound(id))?;
        let request = PlaybackRequest {
            locator: track.locator.clone(),
            track,
        };
        info!(id, locator = %request.locator, "Playback requested");
        self.events
            .emit(LibraryEvent::PlayRequested(request.clone()));
        Ok(request)
    }

    /// Every catalogued track.
    pub async fn tracks(&self) -> Result<Vec<Track>> {
        self.catalog.query_all().await
    }

    /// Catalogued tracks matching `text`.
    pub async fn find(&self, text: &str) -> Result<Vec<Track>> {
        self.catalog.search(text).await
    }

    /// Replace the now-playing list.
    pub async fn set_now_playing(&self, track_ids: &[TrackId]) -> Result<()> {
        let stored = self.catalog.set_now_playing(track_ids).await?;
        self.events
            .emit(LibraryEvent::NowPlayingChanged { track_ids: stored });
        Ok(())
    }

    /// The now-playing list in order.
    pub async fn now_playing(&self) -> Result<Vec<Track>> {
        self.catalog.get_now_playing().await
    }

    /// Direct catalog access for read queries.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Subscribe to library events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LibraryEvent> {
        self.events.subscribe()
    }
}
