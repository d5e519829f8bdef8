//! Integration tests for `Tunedeck` core workflows.
//!
//! These tests drive the [`Library`] facade end to end:
//! - Scanning temporary directories into an in-memory catalog
//! - Remote search paging against a fake platform
//! - Downloads with progress, cancellation and reuse of existing files
//! - Reconciliation of vanished files

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::channel::mpsc;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tunedeck_core::{
    Access, AppConfig, Catalog, CatalogConfig, Collaborators, DownloadConfig, DownloadError,
    DownloadJob, DurationProbe, Error, JobState, Library, LibraryEvent, LocatorNormalizer,
    PageToken, PermissionGate, RemoteAudio, RemoteConfig, RemoteError, RemotePlatform, ScanConfig,
    ScanError, SearchPage, StreamDescriptor, Track, TransferStream,
};

// =============================================================================
// Test Doubles
// =============================================================================

/// Probe that reports a fixed duration for every file.
struct FixedProbe(u64);

impl DurationProbe for FixedProbe {
    fn duration_ms(&self, _path: &Path) -> Result<u64, ScanError> {
        Ok(self.0)
    }
}

/// Permission gate with a fixed answer.
struct Gate(bool);

impl PermissionGate for Gate {
    fn is_granted(&self, _access: Access) -> bool {
        self.0
    }
}

type ChunkReceiver = mpsc::UnboundedReceiver<Result<Bytes, DownloadError>>;
type ChunkSender = mpsc::UnboundedSender<Result<Bytes, DownloadError>>;

/// Remote platform serving canned pages and streams.
#[derive(Default)]
struct FakePlatform {
    pages: HashMap<String, Vec<SearchPage>>,
    titles: HashMap<String, String>,
    controlled: Mutex<HashMap<String, ChunkReceiver>>,
    body: Vec<u8>,
    opened: AtomicU32,
}

impl FakePlatform {
    fn with_title(mut self, remote_id: &str, title: &str) -> Self {
        self.titles.insert(remote_id.to_string(), title.to_string());
        self
    }

    fn with_pages(mut self, query: &str, pages: Vec<SearchPage>) -> Self {
        self.pages.insert(query.to_string(), pages);
        self
    }

    fn with_body(mut self, body: &[u8]) -> Self {
        self.body = body.to_vec();
        self
    }

    /// Make the stream for `remote_id` emit only what the test sends.
    fn controlled(&self, remote_id: &str) -> ChunkSender {
        let (sender, receiver) = mpsc::unbounded();
        self.controlled
            .lock()
            .unwrap()
            .insert(remote_id.to_string(), receiver);
        sender
    }
}

#[async_trait]
impl RemotePlatform for FakePlatform {
    async fn search(
        &self,
        query: &str,
        page: Option<&PageToken>,
        _page_size: usize,
    ) -> Result<SearchPage, RemoteError> {
        let index = page.map_or(0, |t| t.0.parse::<usize>().unwrap());
        Ok(self
            .pages
            .get(query)
            .and_then(|pages| pages.get(index))
            .cloned()
            .unwrap_or_default())
    }

    async fn details(&self, remote_id: &str) -> Result<RemoteAudio, RemoteError> {
        let title = self
            .titles
            .get(remote_id)
            .cloned()
            .ok_or_else(|| RemoteError::DetailsFailed {
                remote_id: remote_id.to_string(),
                reason: "unknown id".to_string(),
            })?;
        Ok(RemoteAudio {
            author: Some("Uploader".to_string()),
            duration_ms: Some(180_000),
            ..RemoteAudio::new(remote_id, title)
        })
    }

    async fn stream_manifest(&self, remote_id: &str) -> Result<Vec<StreamDescriptor>, RemoteError> {
        Ok(vec![
            StreamDescriptor {
                url: format!("https://media.example/{remote_id}/video"),
                bitrate: 900_000,
                container: "mp4".to_string(),
                has_audio: true,
                has_video: true,
                content_length: None,
            },
            StreamDescriptor {
                url: format!("https://media.example/{remote_id}/audio"),
                bitrate: 128_000,
                container: "mp4".to_string(),
                has_audio: true,
                has_video: false,
                content_length: None,
            },
        ])
    }

    async fn open_stream(
        &self,
        remote_id: &str,
        stream: &StreamDescriptor,
    ) -> Result<TransferStream, DownloadError> {
        assert!(stream.url.ends_with("/audio"), "audio-only stream preferred");
        self.opened.fetch_add(1, Ordering::SeqCst);

        if let Some(receiver) = self.controlled.lock().unwrap().remove(remote_id) {
            return Ok(TransferStream {
                total: Some(1_000),
                chunks: receiver.boxed(),
            });
        }

        let chunks: Vec<Result<Bytes, DownloadError>> = self
            .body
            .chunks(self.body.len().div_ceil(4).max(1))
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(TransferStream {
            total: Some(self.body.len() as u64),
            chunks: futures::stream::iter(chunks).boxed(),
        })
    }
}

// =============================================================================
// Test Fixtures and Utilities
// =============================================================================

/// Temporary library roots, download directory and an in-memory catalog.
struct TestFixture {
    _temp: TempDir,
    music_dir: PathBuf,
    download_dir: PathBuf,
    platform: Arc<FakePlatform>,
    library: Library,
}

impl TestFixture {
    async fn new(platform: FakePlatform) -> Self {
        Self::with_gate(platform, true).await
    }

    async fn with_gate(platform: FakePlatform, granted: bool) -> Self {
        Self::build(platform, granted, false).await
    }

    /// The download directory is also a scan root.
    async fn scanning_downloads(platform: FakePlatform) -> Self {
        Self::build(platform, true, true).await
    }

    async fn build(platform: FakePlatform, granted: bool, scan_downloads: bool) -> Self {
        let temp = TempDir::new().unwrap();
        let music_dir = temp.path().join("music");
        let download_dir = temp.path().join("downloads");
        fs::create_dir_all(&music_dir).unwrap();

        let mut roots = vec![music_dir.clone(), temp.path().join("missing")];
        if scan_downloads {
            roots.push(download_dir.clone());
        }

        let config = AppConfig {
            scan: ScanConfig::with_roots(roots),
            downloads: DownloadConfig {
                terminal_grace_ms: 0,
                ..DownloadConfig::with_directory(&download_dir)
            },
            remote: RemoteConfig {
                page_size: 2,
                manifest_attempts: 1,
                retry_base_delay_ms: 0,
            },
            catalog: CatalogConfig::default(),
        };

        let catalog = Catalog::in_memory(LocatorNormalizer::new(&config.scan.mount_aliases))
            .await
            .unwrap();
        let platform = Arc::new(platform);
        let library = Library::new(
            config,
            catalog,
            Collaborators {
                platform: Arc::clone(&platform) as Arc<dyn RemotePlatform>,
                probe: Arc::new(FixedProbe(200_000)),
                permissions: Arc::new(Gate(granted)),
            },
        );

        Self {
            _temp: temp,
            music_dir,
            download_dir,
            platform,
            library,
        }
    }

    fn add_music(&self, name: &str, size: usize) -> PathBuf {
        let path = self.music_dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, vec![7u8; size]).unwrap();
        path
    }
}

const BIG: usize = 150 * 1024;

async fn wait_terminal(events: &mut broadcast::Receiver<LibraryEvent>, remote_id: &str) -> DownloadJob {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(LibraryEvent::JobTerminal(job)) if job.remote_id == remote_id => return job,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("job did not finish in time")
}

// =============================================================================
// Scanning
// =============================================================================

#[tokio::test]
async fn test_scan_excludes_files_below_threshold() {
    let fixture = TestFixture::new(FakePlatform::default()).await;
    fixture.add_music("keep.mp3", BIG);
    fixture.add_music("tiny.mp3", 10 * 1024);
    fixture.add_music("cover.jpg", BIG);

    let result = fixture.library.scan(false).await.unwrap();

    assert_eq!(result.sync.inserted, 1);
    assert_eq!(result.scan.roots_skipped, 1);
    let tracks = fixture.library.tracks().await.unwrap();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].title, "keep");
}

#[tokio::test]
async fn test_rescan_without_force_adds_no_duplicates() {
    let fixture = TestFixture::new(FakePlatform::default()).await;
    fixture.add_music("a.mp3", BIG);
    fixture.add_music("sub/b.flac", BIG);

    let first = fixture.library.scan(false).await.unwrap();
    assert_eq!(first.sync.inserted, 2);

    let second = fixture.library.scan(false).await.unwrap();
    assert_eq!(second.sync.inserted, 0);
    assert!(second.scan.tracks.is_empty());
    assert_eq!(fixture.library.catalog().count().await.unwrap(), 2);

    let forced = fixture.library.scan(true).await.unwrap();
    assert_eq!(forced.sync.inserted, 0);
    assert_eq!(forced.sync.updated, 2);
    assert_eq!(fixture.library.catalog().count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_scan_parses_artist_and_title_from_filename() {
    let fixture = TestFixture::new(FakePlatform::default()).await;
    fixture.add_music("Artist Name - Song Title (Official Video).mp3", BIG);

    fixture.library.scan(false).await.unwrap();

    let tracks = fixture.library.find("song title").await.unwrap();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].title, "Song Title");
    assert_eq!(tracks[0].artists, vec!["Artist Name".to_string()]);
    assert_eq!(tracks[0].duration_ms, 200_000);
}

#[tokio::test]
async fn test_denied_scan_leaves_catalog_untouched() {
    let fixture = TestFixture::with_gate(FakePlatform::default(), false).await;
    fixture.add_music("a.mp3", BIG);
    let gone = fixture.music_dir.join("gone.mp3");
    fixture
        .library
        .catalog()
        .upsert_track(&Track::new("Gone", gone.to_string_lossy(), 1000))
        .await
        .unwrap();

    let err = fixture.library.scan(false).await.unwrap_err();
    assert!(matches!(err, Error::PermissionDenied { .. }));
    assert_eq!(fixture.library.catalog().count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_rescanning_download_directory_keeps_downloaded_row() {
    let platform = FakePlatform::default()
        .with_title("abc123", "Remote Song")
        .with_body(&[9u8; BIG]);
    let fixture = TestFixture::scanning_downloads(platform).await;

    let mut events = fixture.library.subscribe();
    fixture.library.download("abc123").await;
    assert_eq!(
        wait_terminal(&mut events, "abc123").await.state,
        JobState::Completed
    );

    let plain = fixture.library.scan(false).await.unwrap();
    assert_eq!(plain.sync.inserted, 0);
    let forced = fixture.library.scan(true).await.unwrap();
    assert_eq!(forced.sync.inserted, 0);

    let tracks = fixture.library.tracks().await.unwrap();
    assert_eq!(tracks.len(), 1);
    assert!(tracks[0].is_downloaded());
    assert_eq!(tracks[0].remote_id.as_deref(), Some("abc123"));
    assert!(tracks[0].tags.contains("youtube"));
}

#[tokio::test]
async fn test_reconcile_removes_vanished_local_but_keeps_downloaded() {
    let platform = FakePlatform::default()
        .with_title("abc123", "Remote Song")
        .with_body(b"remote audio");
    let fixture = TestFixture::new(platform).await;
    let local = fixture.add_music("Local Song.mp3", BIG);
    fixture.library.scan(false).await.unwrap();

    let mut events = fixture.library.subscribe();
    fixture.library.download("abc123").await;
    assert_eq!(
        wait_terminal(&mut events, "abc123").await.state,
        JobState::Completed
    );
    assert_eq!(fixture.library.catalog().count().await.unwrap(), 2);

    fs::remove_file(&local).unwrap();
    fs::remove_file(fixture.download_dir.join("Remote Song.m4a")).unwrap();

    let result = fixture.library.scan(false).await.unwrap();
    assert_eq!(result.removed, 1);

    let remaining = fixture.library.tracks().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].is_downloaded());
}

// =============================================================================
// Remote search
// =============================================================================

#[tokio::test]
async fn test_empty_search_stops_paging() {
    let fixture = TestFixture::new(FakePlatform::default()).await;

    assert!(fixture.library.search("x").await.unwrap().is_empty());
    assert!(!fixture.library.has_more_results().await);
    assert!(fixture.library.search_next_page("x").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_search_pages_through_results() {
    let pages = vec![
        SearchPage {
            items: vec![RemoteAudio::new("a", "A"), RemoteAudio::new("b", "B")],
            next: Some(PageToken("1".to_string())),
        },
        SearchPage {
            items: vec![RemoteAudio::new("c", "C")],
            next: None,
        },
    ];
    let fixture = TestFixture::new(FakePlatform::default().with_pages("song", pages)).await;

    assert_eq!(fixture.library.search("song").await.unwrap().len(), 2);
    assert!(fixture.library.has_more_results().await);
    let next = fixture.library.search_next_page("song").await.unwrap();
    assert_eq!(next[0].id, "c");
    assert!(fixture.library.search_next_page("song").await.unwrap().is_empty());
}

// =============================================================================
// Downloads
// =============================================================================

#[tokio::test]
async fn test_completed_download_is_tagged_in_catalog() {
    let platform = FakePlatform::default()
        .with_title("abc123", "Artist Name - Song Title (Official Video)")
        .with_body(b"0123456789");
    let fixture = TestFixture::new(platform).await;
    let mut events = fixture.library.subscribe();

    fixture.library.download("abc123").await;
    let job = wait_terminal(&mut events, "abc123").await;

    assert_eq!(job.state, JobState::Completed);
    assert!((job.progress - 1.0).abs() < f64::EPSILON);

    let path = fixture
        .download_dir
        .join("Artist Name - Song Title (Official Video).m4a");
    assert_eq!(fs::read(&path).unwrap(), b"0123456789");

    let tracks = fixture.library.tracks().await.unwrap();
    assert_eq!(tracks.len(), 1);
    let track = &tracks[0];
    assert!(track.is_downloaded());
    assert!(track.tags.contains("youtube"));
    assert_eq!(track.remote_id.as_deref(), Some("abc123"));
    assert_eq!(track.title, "Song Title");
    assert_eq!(track.artists, vec!["Artist Name".to_string()]);
}

#[tokio::test]
async fn test_search_metadata_is_reused_for_download() {
    let pages = vec![SearchPage {
        items: vec![RemoteAudio {
            duration_ms: Some(60_000),
            ..RemoteAudio::new("xyz", "Searched Title")
        }],
        next: None,
    }];
    let platform = FakePlatform::default()
        .with_pages("q", pages)
        .with_body(b"data");
    let fixture = TestFixture::new(platform).await;
    let mut events = fixture.library.subscribe();

    fixture.library.search("q").await.unwrap();
    let job = fixture.library.download("xyz").await;
    assert_eq!(job.title, "Searched Title");

    assert_eq!(
        wait_terminal(&mut events, "xyz").await.state,
        JobState::Completed
    );
    assert!(fixture.download_dir.join("Searched Title.m4a").exists());
}

#[tokio::test]
async fn test_second_download_request_returns_existing_job() {
    let fixture = TestFixture::new(FakePlatform::default().with_title("abc123", "Song")).await;
    let sender = fixture.platform.controlled("abc123");

    let first = fixture.library.download("abc123").await;
    let second = fixture.library.download("abc123").await;

    assert_eq!(first.remote_id, second.remote_id);
    assert_eq!(first.started_at, second.started_at);
    assert_eq!(fixture.library.jobs().await.len(), 1);
    drop(sender);
}

#[tokio::test]
async fn test_cancelled_download_leaves_no_file() {
    let fixture = TestFixture::new(FakePlatform::default().with_title("abc123", "Song")).await;
    let sender = fixture.platform.controlled("abc123");
    let mut events = fixture.library.subscribe();

    fixture.library.download("abc123").await;
    sender.unbounded_send(Ok(Bytes::from_static(b"part"))).unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(LibraryEvent::JobProgress { progress, .. }) = events.recv().await
                && progress > 0.0
            {
                return;
            }
        }
    })
    .await
    .unwrap();

    assert!(fixture.library.cancel_download("abc123").await);
    sender.unbounded_send(Ok(Bytes::from_static(b"more"))).unwrap();

    let job = wait_terminal(&mut events, "abc123").await;
    assert_eq!(job.state, JobState::Cancelled);
    assert!(!fixture.download_dir.join("Song.m4a").exists());
    assert!(!fixture.download_dir.join(".Song.m4a.part").exists());
    assert_eq!(fixture.library.catalog().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_existing_final_file_completes_without_transfer() {
    let fixture = TestFixture::new(FakePlatform::default().with_title("abc123", "Song")).await;
    fs::create_dir_all(&fixture.download_dir).unwrap();
    fs::write(fixture.download_dir.join("Song.m4a"), b"already here").unwrap();
    let mut events = fixture.library.subscribe();

    fixture.library.download("abc123").await;
    let job = wait_terminal(&mut events, "abc123").await;

    assert_eq!(job.state, JobState::Completed);
    assert!((job.progress - 1.0).abs() < f64::EPSILON);
    assert_eq!(fixture.platform.opened.load(Ordering::SeqCst), 0);
    assert_eq!(fixture.library.catalog().count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_unknown_remote_id_fails_job() {
    let fixture = TestFixture::new(FakePlatform::default()).await;
    let mut events = fixture.library.subscribe();

    fixture.library.download("missing").await;
    let job = wait_terminal(&mut events, "missing").await;
    assert_eq!(job.state, JobState::Failed);
    assert!(job.error.is_some());
}

// =============================================================================
// Playback and now playing
// =============================================================================

#[tokio::test]
async fn test_play_track_emits_request() {
    let fixture = TestFixture::new(FakePlatform::default()).await;
    let path = fixture.add_music("Song.mp3", BIG);
    fixture.library.scan(false).await.unwrap();
    let id = fixture.library.tracks().await.unwrap()[0].id.unwrap();

    let mut events = fixture.library.subscribe();
    let request = fixture.library.play_track(id).await.unwrap();
    assert_eq!(
        fs::canonicalize(&request.locator).unwrap(),
        fs::canonicalize(path).unwrap()
    );
    assert!(matches!(
        events.try_recv(),
        Ok(LibraryEvent::PlayRequested(_))
    ));

    assert!(fixture.library.play_track(id + 100).await.is_err());
}

#[tokio::test]
async fn test_now_playing_round_trip() {
    let fixture = TestFixture::new(FakePlatform::default()).await;
    fixture.add_music("a.mp3", BIG);
    fixture.add_music("b.mp3", BIG);
    fixture.library.scan(false).await.unwrap();

    let ids: Vec<i64> = fixture
        .library
        .tracks()
        .await
        .unwrap()
        .iter()
        .filter_map(|t| t.id)
        .rev()
        .collect();
    fixture.library.set_now_playing(&ids).await.unwrap();

    let playing: Vec<i64> = fixture
        .library
        .now_playing()
        .await
        .unwrap()
        .iter()
        .filter_map(|t| t.id)
        .collect();
    assert_eq!(playing, ids);
}
