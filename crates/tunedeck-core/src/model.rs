//! Catalog data model shared by the scanner, downloader and store.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Artist name used when none can be derived.
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Catalog identifier of a track.
pub type TrackId = i64;

/// Where a track came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrackOrigin {
    /// Discovered by the local filesystem scanner.
    #[default]
    Local,
    /// Downloaded from the remote platform into managed storage.
    Downloaded,
}

impl TrackOrigin {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Downloaded => "downloaded",
        }
    }

    /// Parse the storage representation. Unknown values are treated as local.
    #[must_use]
    pub fn from_db(value: &str) -> Self {
        match value {
            "downloaded" => Self::Downloaded,
            _ => Self::Local,
        }
    }
}

impl std::fmt::Display for TrackOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A playable track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// Catalog id; `None` until the track has been stored.
    pub id: Option<TrackId>,
    /// Display title.
    pub title: String,
    /// Ordered artist names, never empty once stored.
    pub artists: Vec<String>,
    /// Album name.
    pub album: Option<String>,
    /// Genre names.
    pub genres: Vec<String>,
    /// Duration in milliseconds.
    pub duration_ms: u64,
    /// Absolute file path or playback URL.
    pub locator: String,
    /// Local or downloaded.
    pub origin: TrackOrigin,
    /// Free-form labels such as a provenance tag.
    pub tags: BTreeSet<String>,
    /// Remote identifier for downloaded tracks.
    pub remote_id: Option<String>,
    /// Creation time (Unix millis).
    pub created_at: u64,
}

impl Track {
    /// Create a local track with a single artist list.
    pub fn new(title: impl Into<String>, locator: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            id: None,
            title: title.into(),
            artists: vec![UNKNOWN_ARTIST.to_string()],
            album: None,
            genres: Vec::new(),
            duration_ms,
            locator: locator.into(),
            origin: TrackOrigin::Local,
            tags: BTreeSet::new(),
            remote_id: None,
            created_at: now_millis(),
        }
    }

    /// Replace the artist list. An empty list falls back to [`UNKNOWN_ARTIST`].
    #[must_use]
    pub fn with_artists<I, S>(mut self, artists: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.artists = artists.into_iter().map(Into::into).collect();
        self.ensure_artist();
        self
    }

    /// Set the album.
    #[must_use]
    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    /// Add a genre.
    #[must_use]
    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genres.push(genre.into());
        self
    }

    /// Add a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Mark as downloaded from the given remote item.
    #[must_use]
    pub fn downloaded_from(mut self, remote_id: impl Into<String>) -> Self {
        self.origin = TrackOrigin::Downloaded;
        self.remote_id = Some(remote_id.into());
        self
    }

    /// Whether this track came from the remote platform.
    #[must_use]
    pub const fn is_downloaded(&self) -> bool {
        matches!(self.origin, TrackOrigin::Downloaded)
    }

    /// Guarantee at least one non-blank artist.
    pub fn ensure_artist(&mut self) {
        self.artists.retain(|a| !a.trim().is_empty());
        if self.artists.is_empty() {
            self.artists.push(UNKNOWN_ARTIST.to_string());
        }
    }

    /// Check the track may be written to the catalog.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title is empty".to_string());
        }
        if self.locator.trim().is_empty() {
            return Err("locator is empty".to_string());
        }
        if self.duration_ms == 0 {
            return Err("duration is zero".to_string());
        }
        if self.artists.iter().all(|a| a.trim().is_empty()) {
            return Err("no artist".to_string());
        }
        Ok(())
    }

    /// Artist names joined for display.
    #[must_use]
    pub fn artist_line(&self) -> String {
        self.artists.join(", ")
    }
}

/// Metadata about an item on the remote platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAudio {
    /// Platform identifier.
    pub id: String,
    /// Item title as published.
    pub title: String,
    /// Channel/uploader name.
    pub author: Option<String>,
    /// Duration in milliseconds, if known.
    pub duration_ms: Option<u64>,
    /// Thumbnail URL.
    pub thumbnail_url: Option<String>,
}

impl RemoteAudio {
    /// Minimal metadata with only id and title.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            author: None,
            duration_ms: None,
            thumbnail_url: None,
        }
    }
}

/// Hand-off to the external audio engine for playback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackRequest {
    /// The track to play.
    pub track: Track,
    /// Locator the engine should open.
    pub locator: String,
}

/// A finished download handed to the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedDownload {
    /// Final file path.
    pub path: PathBuf,
    /// Metadata of the remote item.
    pub remote: RemoteAudio,
    /// Whether the file already existed and no transfer happened.
    pub reused_existing: bool,
}

/// Current time as Unix milliseconds.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_track_defaults_to_unknown_artist() {
        let track = Track::new("Song", "/music/song.mp3", 1000);
        assert_eq!(track.artists, vec![UNKNOWN_ARTIST.to_string()]);
        assert_eq!(track.origin, TrackOrigin::Local);
        assert!(track.validate().is_ok());
    }

    #[test]
    fn test_with_empty_artists_falls_back() {
        let track = Track::new("Song", "/music/song.mp3", 1000).with_artists(Vec::<String>::new());
        assert_eq!(track.artists, vec![UNKNOWN_ARTIST.to_string()]);
    }

    #[test]
    fn test_zero_duration_is_rejected() {
        let track = Track::new("Song", "/music/song.mp3", 0);
        assert_eq!(track.validate(), Err("duration is zero".to_string()));
    }

    #[test]
    fn test_downloaded_from_sets_origin() {
        let track = Track::new("Song", "/data/song.m4a", 1000)
            .downloaded_from("abc123")
            .with_tag("youtube");
        assert!(track.is_downloaded());
        assert_eq!(track.remote_id.as_deref(), Some("abc123"));
        assert!(track.tags.contains("youtube"));
    }

    #[test]
    fn test_origin_round_trip_through_db_text() {
        assert_eq!(TrackOrigin::from_db(TrackOrigin::Downloaded.as_str()), TrackOrigin::Downloaded);
        assert_eq!(TrackOrigin::from_db("garbage"), TrackOrigin::Local);
    }
}
