//! Events published to the presentation layer.
//!
//! Every component that changes observable state publishes through a shared
//! [`EventBus`]; subscribers get their own receiver and never mutate state.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::download::DownloadJob;
use crate::model::{PlaybackRequest, TrackId};

/// Default number of buffered events per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Something observable changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum LibraryEvent {
    /// The catalog contents changed.
    CatalogChanged {
        /// Tracks inserted.
        inserted: usize,
        /// Existing tracks whose metadata was replaced.
        updated: usize,
        /// Tracks removed.
        removed: usize,
    },
    /// The now-playing list was replaced.
    NowPlayingChanged {
        /// New order of track ids.
        track_ids: Vec<TrackId>,
    },
    /// A download job was created.
    JobStarted(DownloadJob),
    /// A job's progress advanced.
    JobProgress {
        /// Remote identifier of the job.
        remote_id: String,
        /// Progress in `[0.0, 1.0]`.
        progress: f64,
    },
    /// A job asked to cancel and is winding down.
    JobCancelling {
        /// Remote identifier of the job.
        remote_id: String,
    },
    /// A job reached Completed, Failed or Cancelled.
    JobTerminal(DownloadJob),
    /// A terminal job left the active set.
    JobRemoved {
        /// Remote identifier of the job.
        remote_id: String,
    },
    /// Playback of a track was requested.
    PlayRequested(PlaybackRequest),
}

/// Fan-out channel for [`LibraryEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LibraryEvent>,
}

impl EventBus {
    /// Create a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create a bus buffering `capacity` events per subscriber.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LibraryEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: LibraryEvent) {
        if self.sender.send(event).is_err() {
            trace!("Event dropped, no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
