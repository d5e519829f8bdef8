//! `YouTube` backend built on `rusty_ytdl` for search and manifests and a
//! shared `reqwest` client for transfers.

use async_trait::async_trait;
use futures::StreamExt;
use rusty_ytdl::Video;
use rusty_ytdl::search::{SearchOptions, SearchResult, SearchType, YouTube};
use tracing::{debug, info};

use super::{PageToken, RemotePlatform, SearchPage, StreamDescriptor, TransferStream};
use crate::error::{DownloadError, RemoteError};
use crate::model::RemoteAudio;

fn watch_url(remote_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={remote_id}")
}

/// [`RemotePlatform`] talking to `YouTube`.
///
/// The search API has no continuation cursor, so page tokens are result
/// offsets and each page re-requests everything up to its end.
#[derive(Debug, Clone)]
pub struct RustyYtdlPlatform {
    client: reqwest::Client,
}

impl RustyYtdlPlatform {
    /// Create a platform with a fresh HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    /// Create a platform sharing an existing HTTP client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for RustyYtdlPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemotePlatform for RustyYtdlPlatform {
    async fn search(
        &self,
        query: &str,
        page: Option<&PageToken>,
        page_size: usize,
    ) -> Result<SearchPage, RemoteError> {
        let failed = |reason: String| RemoteError::SearchFailed {
            query: query.to_string(),
            reason,
        };

        let offset = match page {
            Some(token) => token
                .0
                .parse::<usize>()
                .map_err(|e| failed(format!("invalid page token '{}': {e}", token.0)))?,
            None => 0,
        };
        let end = offset + page_size;

        let youtube = YouTube::new().map_err(|e| failed(e.to_string()))?;
        let options = SearchOptions {
            limit: end as u64,
            search_type: SearchType::Video,
            safe_search: false,
        };
        let results = youtube
            .search(query, Some(&options))
            .await
            .map_err(|e| failed(e.to_string()))?;

        let videos: Vec<_> = results
            .into_iter()
            .filter_map(|result| match result {
                SearchResult::Video(video) => Some(video),
                _ => None,
            })
            .collect();
        let reached_end = videos.len() < end;

        let items: Vec<RemoteAudio> = videos
            .into_iter()
            .skip(offset)
            .take(page_size)
            .map(|video| RemoteAudio {
                id: video.id,
                title: video.title,
                author: Some(video.channel.name).filter(|name| !name.is_empty()),
                duration_ms: Some(video.duration).filter(|d| *d > 0),
                thumbnail_url: video.thumbnails.first().map(|t| t.url.clone()),
            })
            .collect();

        debug!(query, offset, results = items.len(), "YouTube search");
        Ok(SearchPage {
            next: (!reached_end && !items.is_empty()).then(|| PageToken(end.to_string())),
            items,
        })
    }

    async fn details(&self, remote_id: &str) -> Result<RemoteAudio, RemoteError> {
        let failed = |reason: String| RemoteError::DetailsFailed {
            remote_id: remote_id.to_string(),
            reason,
        };
        let video = Video::new(watch_url(remote_id))
            .map_err(|e| failed(format!("Failed to create video instance: {e}")))?;
        let info = video
            .get_info()
            .await
            .map_err(|e| failed(format!("Failed to get video info: {e}")))?;
        let details = info.video_details;

        Ok(RemoteAudio {
            id: remote_id.to_string(),
            title: details.title,
            author: details.author.map(|a| a.name),
            duration_ms: details
                .length_seconds
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .map(|s| s * 1000),
            thumbnail_url: details.thumbnails.last().map(|t| t.url.clone()),
        })
    }

    async fn stream_manifest(
        &self,
        remote_id: &str,
    ) -> Result<Vec<StreamDescriptor>, RemoteError> {
        let failed = |reason: String| RemoteError::ManifestFailed {
            remote_id: remote_id.to_string(),
            reason,
        };
        let video = Video::new(watch_url(remote_id))
            .map_err(|e| failed(format!("Failed to create video instance: {e}")))?;
        let info = video
            .get_info()
            .await
            .map_err(|e| failed(format!("Failed to get video info: {e}")))?;

        let streams: Vec<StreamDescriptor> = info
            .formats
            .iter()
            .filter(|format| !format.url.is_empty())
            .map(|format| StreamDescriptor {
                url: format.url.clone(),
                bitrate: format.bitrate,
                container: format.mime_type.container.clone(),
                has_audio: format.has_audio,
                has_video: format.has_video,
                content_length: format
                    .content_length
                    .as_ref()
                    .and_then(|len| len.parse().ok()),
            })
            .collect();

        debug!(remote_id, formats = streams.len(), "Fetched stream manifest");
        Ok(streams)
    }

    async fn open_stream(
        &self,
        remote_id: &str,
        stream: &StreamDescriptor,
    ) -> Result<TransferStream, DownloadError> {
        let response = self.client.get(&stream.url).send().await.map_err(|e| {
            DownloadError::Interrupted {
                remote_id: remote_id.to_string(),
                reason: format!("Request failed: {e}"),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                url: stream.url.clone(),
                status: status.as_u16(),
            });
        }

        let total = response.content_length().or(stream.content_length);
        info!(remote_id, total_bytes = ?total, "Opened stream");

        let owned_id = remote_id.to_string();
        let chunks = response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| DownloadError::Interrupted {
                    remote_id: owned_id.clone(),
                    reason: format!("Failed to download chunk: {e}"),
                })
            })
            .boxed();

        Ok(TransferStream { total, chunks })
    }
}
