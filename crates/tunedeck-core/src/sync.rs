//! Sync orchestrator: the single path from scanner and downloader output into
//! the catalog.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::download::DownloadHandoff;
use crate::error::{Error, Result, ScanError};
use crate::events::{EventBus, LibraryEvent};
use crate::model::{CompletedDownload, RemoteAudio, Track, TrackId, UNKNOWN_ARTIST};
use crate::naming::parse_track_name;
use crate::probe::{DurationProbe, probe_with_attempts};

/// Outcome of a batch sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// New rows.
    pub inserted: usize,
    /// Existing rows whose metadata was replaced.
    pub updated: usize,
    /// Records rejected by the catalog.
    pub failed: usize,
}

impl SyncReport {
    /// Whether the catalog changed.
    #[must_use]
    pub const fn changed(&self) -> bool {
        self.inserted + self.updated > 0
    }
}

/// Writes scan and download results into the catalog.
pub struct SyncOrchestrator {
    catalog: Arc<Catalog>,
    events: EventBus,
    provenance_tag: String,
    probe: Arc<dyn DurationProbe>,
    probe_attempts: u32,
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("provenance_tag", &self.provenance_tag)
            .finish_non_exhaustive()
    }
}

impl SyncOrchestrator {
    /// Create an orchestrator.
    pub fn new(
        catalog: Arc<Catalog>,
        events: EventBus,
        provenance_tag: impl Into<String>,
        probe: Arc<dyn DurationProbe>,
        probe_attempts: u32,
    ) -> Self {
        Self {
            catalog,
            events,
            provenance_tag: provenance_tag.into(),
            probe,
            probe_attempts,
        }
    }

    /// Store scanned tracks, one transaction each. A rejected record is logged
    /// and counted; the rest of the batch continues.
    pub async fn sync_scanned(&self, tracks: &[Track]) -> SyncReport {
        let mut report = SyncReport::default();
        for track in tracks {
            match self.catalog.upsert_track_outcome(track).await {
                Ok(outcome) if outcome.inserted => report.inserted += 1,
                Ok(_) => report.updated += 1,
                Err(e) => {
                    warn!("Skipping {}: {}", track.locator, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            inserted = report.inserted,
            updated = report.updated,
            failed = report.failed,
            "Synced scanned tracks"
        );
        if report.changed() {
            self.events.emit(LibraryEvent::CatalogChanged {
                inserted: report.inserted,
                updated: report.updated,
                removed: 0,
            });
        }
        report
    }

    /// Store a committed download as a downloaded, provenance-tagged track.
    pub async fn sync_downloaded(&self, path: &Path, remote: &RemoteAudio) -> Result<TrackId> {
        let parsed = parse_track_name(&remote.title);
        let mut artists = parsed.artists;
        if artists == [UNKNOWN_ARTIST]
            && let Some(author) = remote.author.as_deref().filter(|a| !a.trim().is_empty())
        {
            artists = vec![author.to_string()];
        }

        let duration_ms = match remote.duration_ms.filter(|d| *d > 0) {
            Some(duration) => duration,
            None => self.probe_duration(path).await?,
        };

        let track = Track::new(parsed.title, path.to_string_lossy(), duration_ms)
            .with_artists(artists)
            .downloaded_from(remote.id.clone())
            .with_tag(self.provenance_tag.clone());

        let outcome = self.catalog.upsert_track_outcome(&track).await?;
        debug!(
            remote_id = %remote.id,
            id = outcome.id,
            "Catalogued download {}",
            path.display()
        );
        self.events.emit(LibraryEvent::CatalogChanged {
            inserted: usize::from(outcome.inserted),
            updated: usize::from(!outcome.inserted),
            removed: 0,
        });
        Ok(outcome.id)
    }

    /// Remove local tracks whose file vanished. Downloaded tracks are kept.
    pub async fn reconcile(&self) -> Result<usize> {
        let removed = self.catalog.delete_tracks_where_file_missing().await?;
        if removed > 0 {
            self.events.emit(LibraryEvent::CatalogChanged {
                inserted: 0,
                updated: 0,
                removed,
            });
        }
        Ok(removed)
    }

    async fn probe_duration(&self, path: &Path) -> Result<u64> {
        let probe = Arc::clone(&self.probe);
        let owned = path.to_path_buf();
        let attempts = self.probe_attempts;
        tokio::task::spawn_blocking(move || probe_with_attempts(&*probe, &owned, attempts))
            .await
            .map_err(|e| {
                Error::from(ScanError::ProbeFailed {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            })?
            .map_err(Error::from)
    }
}

#[async_trait]
impl DownloadHandoff for SyncOrchestrator {
    async fn download_completed(&self, download: &CompletedDownload) -> Result<()> {
        self.sync_downloaded(&download.path, &download.remote)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::LocatorNormalizer;
    use crate::config::DEFAULT_PROBE_ATTEMPTS;
    use crate::probe::MockDurationProbe;
    use tempfile::TempDir;
    use tokio::sync::broadcast::error::TryRecvError;

    async fn orchestrator(probe: MockDurationProbe) -> (Arc<Catalog>, EventBus, SyncOrchestrator) {
        orchestrator_with(probe, DEFAULT_PROBE_ATTEMPTS).await
    }

    async fn orchestrator_with(
        probe: MockDurationProbe,
        probe_attempts: u32,
    ) -> (Arc<Catalog>, EventBus, SyncOrchestrator) {
        let catalog = Arc::new(Catalog::in_memory(LocatorNormalizer::default()).await.unwrap());
        let events = EventBus::new();
        let sync = SyncOrchestrator::new(
            Arc::clone(&catalog),
            events.clone(),
            "youtube",
            Arc::new(probe),
            probe_attempts,
        );
        (catalog, events, sync)
    }

    fn no_probe() -> MockDurationProbe {
        let mut probe = MockDurationProbe::new();
        probe.expect_duration_ms().never();
        probe
    }

    #[tokio::test]
    async fn test_bad_record_does_not_abort_batch() {
        let (catalog, events, sync) = orchestrator(no_probe()).await;
        let mut rx = events.subscribe();

        let tracks = vec![
            Track::new("Good", "/m/good.mp3", 1000),
            Track::new("Broken", "/m/broken.mp3", 0),
            Track::new("Also Good", "/m/also.mp3", 2000),
        ];
        let report = sync.sync_scanned(&tracks).await;

        assert_eq!(report.inserted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(catalog.count().await.unwrap(), 2);
        assert!(matches!(
            rx.try_recv(),
            Ok(LibraryEvent::CatalogChanged { inserted: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_resync_updates_instead_of_duplicating() {
        let (catalog, _events, sync) = orchestrator(no_probe()).await;
        let tracks = vec![Track::new("Song", "/m/song.mp3", 1000)];

        sync.sync_scanned(&tracks).await;
        let second = sync.sync_scanned(&tracks).await;

        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 1);
        assert_eq!(catalog.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_download_is_tagged_and_uses_channel_as_artist() {
        let (catalog, _events, sync) = orchestrator(no_probe()).await;
        let remote = RemoteAudio {
            author: Some("Some Channel".to_string()),
            duration_ms: Some(215_000),
            ..RemoteAudio::new("abc123", "Song Title (Official Video)")
        };

        let id = sync
            .sync_downloaded(Path::new("/data/Song Title.m4a"), &remote)
            .await
            .unwrap();
        let track = catalog.get_track(id).await.unwrap().unwrap();

        assert!(track.is_downloaded());
        assert!(track.tags.contains("youtube"));
        assert_eq!(track.remote_id.as_deref(), Some("abc123"));
        assert_eq!(track.title, "Song Title");
        assert_eq!(track.artists, vec!["Some Channel".to_string()]);
        assert_eq!(track.duration_ms, 215_000);
    }

    #[tokio::test]
    async fn test_download_title_artist_wins_over_channel() {
        let (catalog, _events, sync) = orchestrator(no_probe()).await;
        let remote = RemoteAudio {
            author: Some("Label VEVO".to_string()),
            duration_ms: Some(1000),
            ..RemoteAudio::new("abc123", "Artist Name - Song Title (Official Video)")
        };
        let id = sync
            .sync_downloaded(Path::new("/data/x.m4a"), &remote)
            .await
            .unwrap();
        let track = catalog.get_track(id).await.unwrap().unwrap();
        assert_eq!(track.artists, vec!["Artist Name".to_string()]);
    }

    #[tokio::test]
    async fn test_download_without_duration_is_probed() {
        let mut probe = MockDurationProbe::new();
        probe.expect_duration_ms().times(1).returning(|_| Ok(99_000));
        let (catalog, _events, sync) = orchestrator(probe).await;

        let id = sync
            .sync_downloaded(Path::new("/data/x.m4a"), &RemoteAudio::new("id1", "Title"))
            .await
            .unwrap();
        assert_eq!(catalog.get_track(id).await.unwrap().unwrap().duration_ms, 99_000);
    }

    #[tokio::test]
    async fn test_unprobeable_download_is_rejected() {
        let mut probe = MockDurationProbe::new();
        probe.expect_duration_ms().times(3).returning(|_| Ok(0));
        let (catalog, _events, sync) = orchestrator_with(probe, 3).await;

        let result = sync
            .sync_downloaded(Path::new("/data/x.m4a"), &RemoteAudio::new("id1", "Title"))
            .await;
        assert!(result.is_err());
        assert_eq!(catalog.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_spares_downloads_and_reports_removal() {
        let temp = TempDir::new().unwrap();
        let (catalog, events, sync) = orchestrator(no_probe()).await;

        let local = temp.path().join("local.mp3");
        let downloaded = temp.path().join("downloaded.m4a");
        std::fs::write(&local, b"x").unwrap();
        std::fs::write(&downloaded, b"x").unwrap();

        sync.sync_scanned(&[Track::new("Local", local.to_string_lossy(), 1000)])
            .await;
        sync.sync_downloaded(
            &downloaded,
            &RemoteAudio {
                duration_ms: Some(1000),
                ..RemoteAudio::new("abc123", "Downloaded")
            },
        )
        .await
        .unwrap();

        std::fs::remove_file(&local).unwrap();
        std::fs::remove_file(&downloaded).unwrap();

        let mut rx = events.subscribe();
        assert_eq!(sync.reconcile().await.unwrap(), 1);
        assert!(matches!(
            rx.try_recv(),
            Ok(LibraryEvent::CatalogChanged { removed: 1, .. })
        ));

        let remaining = catalog.query_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].is_downloaded());

        assert_eq!(sync.reconcile().await.unwrap(), 0);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }
}
