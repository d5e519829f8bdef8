//! Local filesystem scanner.
//!
//! Walks the configured library roots in bounded batches, filters candidate
//! audio files by extension and size, dedups them by normalized locator and
//! turns each survivor into a [`Track`] using the file name heuristic and a
//! duration probe.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{MAX_SCAN_BATCH_SIZE, ScanConfig};
use crate::error::{Error, Result, ScanError};
use crate::model::Track;
use crate::naming::{LocatorNormalizer, parse_track_name};
use crate::permission::{Access, PermissionGate};
use crate::probe::{DurationProbe, probe_with_attempts};

/// Outcome of one scan.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Candidate tracks ready for the catalog.
    pub tracks: Vec<Track>,
    /// Roots that were walked.
    pub roots_scanned: usize,
    /// Roots that were missing or unreadable.
    pub roots_skipped: usize,
    /// Files passing the extension and size filters.
    pub files_accepted: usize,
    /// Files rejected for being at or below the size threshold.
    pub files_too_small: usize,
    /// Files skipped because the same locator was already seen or catalogued.
    pub files_duplicate: usize,
    /// Files excluded because their duration could not be read.
    pub files_failed: usize,
}

#[derive(Debug)]
struct Candidate {
    path: PathBuf,
    locator: String,
}

#[derive(Debug, Default)]
struct RootListing {
    readable: bool,
    candidates: Vec<Candidate>,
    too_small: usize,
}

/// Discovers audio files below the library roots.
pub struct LocalScanner {
    config: ScanConfig,
    normalizer: LocatorNormalizer,
    probe: Arc<dyn DurationProbe>,
    permissions: Arc<dyn PermissionGate>,
}

impl std::fmt::Debug for LocalScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalScanner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LocalScanner {
    /// Create a scanner.
    pub fn new(
        config: ScanConfig,
        probe: Arc<dyn DurationProbe>,
        permissions: Arc<dyn PermissionGate>,
    ) -> Self {
        let normalizer = LocatorNormalizer::new(&config.mount_aliases);
        Self {
            config,
            normalizer,
            probe,
            permissions,
        }
    }

    /// Settings in use.
    #[must_use]
    pub const fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Normalizer used for dedup keys.
    #[must_use]
    pub const fn normalizer(&self) -> &LocatorNormalizer {
        &self.normalizer
    }

    /// Fail with `PermissionDenied` unless library reads are granted.
    pub fn ensure_permitted(&self) -> Result<()> {
        if self.permissions.is_granted(Access::ReadLibrary) {
            return Ok(());
        }
        warn!("Library scan refused: read permission not granted");
        Err(Error::PermissionDenied {
            scope: Access::ReadLibrary.describe().to_string(),
        })
    }

    /// Scan every root.
    ///
    /// `known` holds normalized locators already in the catalog; those files
    /// are not probed again unless `force_rescan` is set.
    ///
    /// # Errors
    ///
    /// Fails only when library access is denied or no root is readable.
    /// Individual file problems are logged and skipped.
    pub async fn scan(&self, known: &HashSet<String>, force_rescan: bool) -> Result<ScanReport> {
        self.ensure_permitted()?;

        info!(
            roots = self.config.roots.len(),
            force_rescan, "Starting library scan"
        );

        let mut report = ScanReport::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut to_probe = Vec::new();

        let batch_size = self.config.batch_size.clamp(1, MAX_SCAN_BATCH_SIZE);
        for batch in self.config.roots.chunks(batch_size) {
            let walks = batch.iter().map(|root| {
                let root = root.clone();
                let config = self.config.clone();
                tokio::task::spawn_blocking(move || list_root(&root, &config))
            });

            for (root, joined) in batch.iter().zip(join_all(walks).await) {
                let listing = match joined {
                    Ok(listing) => listing,
                    Err(e) => {
                        warn!("Traversal of {} aborted: {}", root.display(), e);
                        RootListing::default()
                    }
                };
                if !listing.readable {
                    debug!("Skipping unreadable root {}", root.display());
                    report.roots_skipped += 1;
                    continue;
                }
                report.roots_scanned += 1;
                report.files_too_small += listing.too_small;

                for candidate in listing.candidates {
                    let key = self.normalizer.normalize(&candidate.locator);
                    if !seen.insert(key.clone()) {
                        report.files_duplicate += 1;
                        continue;
                    }
                    report.files_accepted += 1;
                    if !force_rescan && known.contains(&key) {
                        report.files_duplicate += 1;
                        continue;
                    }
                    to_probe.push(candidate);
                }
            }
        }

        if report.roots_scanned == 0 {
            return Err(ScanError::NoReadableRoots {
                attempted: self.config.roots.len(),
            }
            .into());
        }

        for chunk in to_probe.chunks(batch_size) {
            let probes = chunk.iter().map(|candidate| {
                let probe = Arc::clone(&self.probe);
                let path = candidate.path.clone();
                let attempts = self.config.probe_attempts;
                tokio::task::spawn_blocking(move || probe_with_attempts(&*probe, &path, attempts))
            });

            for (candidate, joined) in chunk.iter().zip(join_all(probes).await) {
                let probed = joined.unwrap_or_else(|e| {
                    Err(ScanError::ProbeFailed {
                        path: candidate.path.clone(),
                        reason: e.to_string(),
                    })
                });
                match probed {
                    Ok(duration_ms) => report.tracks.push(build_track(candidate, duration_ms)),
                    Err(e) => {
                        warn!("Excluding {}: {}", candidate.path.display(), e);
                        report.files_failed += 1;
                    }
                }
            }
        }

        info!(
            found = report.tracks.len(),
            failed = report.files_failed,
            too_small = report.files_too_small,
            skipped_roots = report.roots_skipped,
            "Library scan finished"
        );
        Ok(report)
    }
}

fn build_track(candidate: &Candidate, duration_ms: u64) -> Track {
    let stem = candidate
        .path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parsed = parse_track_name(&stem);
    Track::new(parsed.title, candidate.locator.clone(), duration_ms).with_artists(parsed.artists)
}

/// Walk one root. Runs on the blocking pool.
fn list_root(root: &Path, config: &ScanConfig) -> RootListing {
    if !root.is_dir() {
        return RootListing::default();
    }

    let mut listing = RootListing {
        readable: true,
        ..RootListing::default()
    };

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping entry below {}: {}", root.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !config.accepts_extension(extension) {
            continue;
        }

        let size = match entry.metadata() {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                warn!(
                    "{}",
                    ScanError::UnreadableFile {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    }
                );
                continue;
            }
        };
        if size <= config.min_file_size_bytes {
            listing.too_small += 1;
            continue;
        }

        let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        listing.candidates.push(Candidate {
            locator: resolved.to_string_lossy().into_owned(),
            path: resolved,
        });
    }

    listing
}
