//! Remote platform access: search, stream manifests and raw transfers.
//!
//! [`RemotePlatform`] is the seam to the video-sharing service. The production
//! implementation is [`RustyYtdlPlatform`]; tests provide their own. Everything
//! above the seam (paging, caching, retries, stream ranking) lives in
//! [`RemoteResolver`].

mod resolver;
mod youtube;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::{DownloadError, RemoteError};
use crate::model::RemoteAudio;

pub use resolver::RemoteResolver;
pub use youtube::RustyYtdlPlatform;

/// Opaque cursor for the next page of a search.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageToken(pub String);

/// One page of search results.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    /// Items on this page.
    pub items: Vec<RemoteAudio>,
    /// Cursor for the following page, `None` at the end.
    pub next: Option<PageToken>,
}

/// One entry of a stream manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Direct media URL.
    pub url: String,
    /// Bits per second as advertised.
    pub bitrate: u64,
    /// Container name, e.g. `mp4` or `webm`.
    pub container: String,
    /// Carries an audio track.
    pub has_audio: bool,
    /// Carries a video track.
    pub has_video: bool,
    /// Size in bytes, if advertised.
    pub content_length: Option<u64>,
}

impl StreamDescriptor {
    /// Whether the stream carries audio and nothing else.
    #[must_use]
    pub const fn is_audio_only(&self) -> bool {
        self.has_audio && !self.has_video
    }

    /// File extension for a download of this stream.
    #[must_use]
    pub fn file_extension(&self) -> String {
        let container = self.container.trim().to_lowercase();
        match container.as_str() {
            "mp4" if self.is_audio_only() => "m4a".to_string(),
            "" => "bin".to_string(),
            _ => container,
        }
    }
}

/// Pick the stream to download: the best audio-only stream, otherwise the
/// best stream carrying both audio and video.
#[must_use]
pub fn select_stream(streams: &[StreamDescriptor]) -> Option<&StreamDescriptor> {
    streams
        .iter()
        .filter(|s| s.is_audio_only())
        .max_by_key(|s| s.bitrate)
        .or_else(|| {
            streams
                .iter()
                .filter(|s| s.has_audio && s.has_video)
                .max_by_key(|s| s.bitrate)
        })
}

/// An open byte stream for one transfer.
pub struct TransferStream {
    /// Total size, if the server announced it.
    pub total: Option<u64>,
    /// Body chunks in order.
    pub chunks: BoxStream<'static, Result<Bytes, DownloadError>>,
}

impl std::fmt::Debug for TransferStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferStream")
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

/// The remote video-sharing service.
#[async_trait]
pub trait RemotePlatform: Send + Sync {
    /// Run a text search. `page` is `None` for the first page.
    async fn search(
        &self,
        query: &str,
        page: Option<&PageToken>,
        page_size: usize,
    ) -> Result<SearchPage, RemoteError>;

    /// Metadata for one item.
    async fn details(&self, remote_id: &str) -> Result<RemoteAudio, RemoteError>;

    /// Every stream the platform offers for one item.
    async fn stream_manifest(&self, remote_id: &str)
    -> Result<Vec<StreamDescriptor>, RemoteError>;

    /// Start transferring a stream.
    async fn open_stream(
        &self,
        remote_id: &str,
        stream: &StreamDescriptor,
    ) -> Result<TransferStream, DownloadError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(bitrate: u64, has_audio: bool, has_video: bool, container: &str) -> StreamDescriptor {
        StreamDescriptor {
            url: format!("https://media.example/{bitrate}"),
            bitrate,
            container: container.to_string(),
            has_audio,
            has_video,
            content_length: None,
        }
    }

    #[test]
    fn test_prefers_highest_audio_only() {
        let streams = vec![
            stream(500_000, true, true, "mp4"),
            stream(128_000, true, false, "mp4"),
            stream(160_000, true, false, "webm"),
            stream(900_000, false, true, "mp4"),
        ];
        assert_eq!(select_stream(&streams).unwrap().bitrate, 160_000);
    }

    #[test]
    fn test_falls_back_to_best_combined() {
        let streams = vec![
            stream(300_000, true, true, "mp4"),
            stream(700_000, true, true, "mp4"),
            stream(900_000, false, true, "mp4"),
        ];
        assert_eq!(select_stream(&streams).unwrap().bitrate, 700_000);
    }

    #[test]
    fn test_no_audio_means_no_stream() {
        let streams = vec![stream(900_000, false, true, "mp4")];
        assert!(select_stream(&streams).is_none());
        assert!(select_stream(&[]).is_none());
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(stream(1, true, false, "mp4").file_extension(), "m4a");
        assert_eq!(stream(1, true, true, "mp4").file_extension(), "mp4");
        assert_eq!(stream(1, true, false, "WebM").file_extension(), "webm");
    }
}
