//! Search paging, metadata caching and stream resolution on top of a
//! [`RemotePlatform`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::{PageToken, RemotePlatform, StreamDescriptor, TransferStream, select_stream};
use crate::config::RemoteConfig;
use crate::error::{RemoteError, Result};
use crate::model::RemoteAudio;
use crate::retry::{RetryPolicy, retry_with_backoff};

#[derive(Debug, Default)]
struct PagingState {
    query: Option<String>,
    next: Option<PageToken>,
    has_more: bool,
}

/// Client-side view of the remote platform.
pub struct RemoteResolver {
    platform: Arc<dyn RemotePlatform>,
    page_size: usize,
    retry: RetryPolicy,
    paging: Mutex<PagingState>,
    cache: RwLock<HashMap<String, RemoteAudio>>,
}

impl std::fmt::Debug for RemoteResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteResolver")
            .field("page_size", &self.page_size)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl RemoteResolver {
    /// Create a resolver.
    pub fn new(platform: Arc<dyn RemotePlatform>, config: &RemoteConfig) -> Self {
        Self {
            platform,
            page_size: config.page_size.max(1),
            retry: RetryPolicy::new(
                config.manifest_attempts,
                std::time::Duration::from_millis(config.retry_base_delay_ms),
            ),
            paging: Mutex::new(PagingState::default()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// First page of results for `query`. Resets paging.
    ///
    /// Failures are returned as-is and are not retried here.
    pub async fn search(&self, query: &str) -> Result<Vec<RemoteAudio>> {
        let mut paging = self.paging.lock().await;
        *paging = PagingState {
            query: Some(query.to_string()),
            ..PagingState::default()
        };

        let page = self.platform.search(query, None, self.page_size).await?;
        paging.has_more = !page.items.is_empty() && page.next.is_some();
        paging.next = page.next;

        info!(
            query,
            results = page.items.len(),
            has_more = paging.has_more,
            "Remote search"
        );
        self.remember_all(&page.items).await;
        Ok(page.items)
    }

    /// Next page for the last search. Empty when there are no more results or
    /// `query` is not the query of the last search.
    pub async fn search_next_page(&self, query: &str) -> Result<Vec<RemoteAudio>> {
        let mut paging = self.paging.lock().await;
        if paging.query.as_deref() != Some(query) || !paging.has_more {
            return Ok(Vec::new());
        }
        let Some(token) = paging.next.clone() else {
            paging.has_more = false;
            return Ok(Vec::new());
        };

        let page = self
            .platform
            .search(query, Some(&token), self.page_size)
            .await?;
        paging.has_more = !page.items.is_empty() && page.next.is_some();
        paging.next = page.next;

        debug!(
            query,
            results = page.items.len(),
            has_more = paging.has_more,
            "Remote search page"
        );
        self.remember_all(&page.items).await;
        Ok(page.items)
    }

    /// Whether the last search has more pages.
    pub async fn has_more_results(&self) -> bool {
        self.paging.lock().await.has_more
    }

    /// Cache metadata for an item, e.g. from a search result.
    pub async fn remember(&self, item: RemoteAudio) {
        self.cache.write().await.insert(item.id.clone(), item);
    }

    async fn remember_all(&self, items: &[RemoteAudio]) {
        let mut cache = self.cache.write().await;
        for item in items {
            cache.insert(item.id.clone(), item.clone());
        }
    }

    /// Cached metadata, if any.
    pub async fn cached_details(&self, remote_id: &str) -> Option<RemoteAudio> {
        self.cache.read().await.get(remote_id).cloned()
    }

    /// Metadata for an item, from the cache or the platform.
    pub async fn audio_details(&self, remote_id: &str) -> Result<RemoteAudio> {
        if let Some(cached) = self.cached_details(remote_id).await {
            return Ok(cached);
        }
        let details = self.platform.details(remote_id).await?;
        self.remember(details.clone()).await;
        Ok(details)
    }

    /// Resolve the stream to download, retrying the manifest fetch.
    ///
    /// # Errors
    ///
    /// [`RemoteError::StreamUnavailable`] once every attempt failed or no
    /// manifest contained an audio stream.
    pub async fn resolve_stream(&self, remote_id: &str) -> Result<StreamDescriptor> {
        let resolved = retry_with_backoff(self.retry, "stream manifest", |attempt| {
            let platform = Arc::clone(&self.platform);
            let remote_id = remote_id.to_string();
            async move {
                debug!(%remote_id, attempt, "Fetching stream manifest");
                let streams = platform.stream_manifest(&remote_id).await?;
                select_stream(&streams)
                    .cloned()
                    .ok_or_else(|| RemoteError::ManifestFailed {
                        remote_id: remote_id.clone(),
                        reason: format!("no audio stream among {} entries", streams.len()),
                    })
            }
        })
        .await
        .map_err(|exhausted| RemoteError::StreamUnavailable {
            remote_id: remote_id.to_string(),
            attempts: exhausted.attempts,
            reason: exhausted.last_error.to_string(),
        })?;

        info!(
            remote_id,
            bitrate = resolved.bitrate,
            container = %resolved.container,
            audio_only = resolved.is_audio_only(),
            "Resolved stream"
        );
        Ok(resolved)
    }

    /// URL of the stream [`resolve_stream`](Self::resolve_stream) picks.
    pub async fn resolve_stream_url(&self, remote_id: &str) -> Result<String> {
        Ok(self.resolve_stream(remote_id).await?.url)
    }

    /// Open a resolved stream for transfer.
    pub async fn open_stream(
        &self,
        remote_id: &str,
        stream: &StreamDescriptor,
    ) -> Result<TransferStream> {
        Ok(self.platform.open_stream(remote_id, stream).await?)
    }
}
