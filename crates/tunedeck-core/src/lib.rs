//! `Tunedeck` Core Library
//!
//! This crate keeps a local catalog of playable audio tracks fed from two
//! sources:
//! - The device filesystem, walked by the [`scanner`]
//! - `YouTube` audio streams, found by the [`remote`] resolver and fetched by
//!   the [`download`] manager
//!
//! Both paths write through the [`sync`] orchestrator into the SQLite-backed
//! [`catalog`]. The [`library`] facade wires everything together and is the
//! entry point for a presentation layer.
//!
//! # Error Handling
//!
//! All fallible operations return [`Result`]. See the [`error`] module for the
//! error taxonomy.
//!
//! ```rust,ignore
//! use tunedeck_core::{AppConfig, Library};
//!
//! let library = Library::open(AppConfig::load()?).await?;
//! let scan = library.scan(false).await?;
//! println!("{} new tracks", scan.sync.inserted);
//! ```

pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod library;
pub mod model;
pub mod naming;
pub mod permission;
pub mod probe;
pub mod remote;
pub mod retry;
pub mod scanner;
pub mod sync;

pub use catalog::{Catalog, NOW_PLAYING_PLAYLIST, UpsertOutcome};
pub use config::{
    AppConfig, CatalogConfig, DEFAULT_EXTENSIONS, DEFAULT_MIN_FILE_SIZE_BYTES,
    DEFAULT_PROVENANCE_TAG, DownloadConfig, RemoteConfig, ScanConfig,
};
pub use download::{DownloadHandoff, DownloadJob, DownloadManager, JobState};
pub use error::{
    DownloadError, Error, ErrorKind, RemoteError, Result, ScanError, StorageError,
};
pub use events::{EventBus, LibraryEvent};
pub use library::{Collaborators, Library, LibraryScan};
pub use model::{
    CompletedDownload, PlaybackRequest, RemoteAudio, Track, TrackId, TrackOrigin, UNKNOWN_ARTIST,
};
pub use naming::{LocatorNormalizer, MountAlias, ParsedName, parse_track_name, sanitize_filename};
pub use permission::{Access, AllowAll, PermissionGate};
pub use probe::{DurationProbe, LoftyProbe};
pub use remote::{
    PageToken, RemotePlatform, RemoteResolver, RustyYtdlPlatform, SearchPage, StreamDescriptor,
    TransferStream, select_stream,
};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use scanner::{LocalScanner, ScanReport};
pub use sync::{SyncOrchestrator, SyncReport};
