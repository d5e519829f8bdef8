//! Audio duration probing.
//!
//! Probing opens the file and reads container properties; it does not decode
//! audio. A file whose duration cannot be read, or reads as zero, is not
//! playable for our purposes.

use std::path::Path;

use lofty::file::AudioFile;
use lofty::probe::Probe;
use tracing::debug;

use crate::error::ScanError;

/// Reads the duration of an audio file.
#[cfg_attr(test, mockall::automock)]
pub trait DurationProbe: Send + Sync {
    /// Duration in milliseconds.
    fn duration_ms(&self, path: &Path) -> Result<u64, ScanError>;
}

/// [`DurationProbe`] backed by `lofty`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyProbe;

impl DurationProbe for LoftyProbe {
    fn duration_ms(&self, path: &Path) -> Result<u64, ScanError> {
        let failed = |reason: String| ScanError::ProbeFailed {
            path: path.to_path_buf(),
            reason,
        };

        let tagged = Probe::open(path)
            .map_err(|e| failed(e.to_string()))?
            .guess_file_type()
            .map_err(|e| failed(e.to_string()))?
            .read()
            .map_err(|e| failed(e.to_string()))?;

        Ok(tagged.properties().duration().as_millis() as u64)
    }
}

/// Probe up to `attempts` times, treating a zero duration as a failure.
pub fn probe_with_attempts(
    probe: &dyn DurationProbe,
    path: &Path,
    attempts: u32,
) -> Result<u64, ScanError> {
    let attempts = attempts.max(1);
    let mut last_error = None;
    for attempt in 1..=attempts {
        match probe.duration_ms(path) {
            Ok(0) => {
                last_error = Some(ScanError::ProbeFailed {
                    path: path.to_path_buf(),
                    reason: "duration is zero".to_string(),
                });
            }
            Ok(duration) => return Ok(duration),
            Err(e) => {
                debug!(
                    "Probe attempt {}/{} failed for {}: {}",
                    attempt,
                    attempts,
                    path.display(),
                    e
                );
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| ScanError::ProbeFailed {
        path: path.to_path_buf(),
        reason: "no attempt made".to_string(),
    }))
}
