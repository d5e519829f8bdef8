//! Application configuration management.
//!
//! Handles loading, saving, and validating the settings of every core
//! component: library roots for the scanner, the managed download directory,
//! remote retry policy and the catalog database location.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::naming::{MountAlias, default_mount_aliases};

/// Extensions accepted by the scanner (lowercase, without dot).
pub const DEFAULT_EXTENSIONS: [&str; 9] =
    ["mp3", "m4a", "wav", "flac", "aac", "ogg", "opus", "m4b", "mp4"];

/// Files at or below this size are treated as truncated or non-audio.
pub const DEFAULT_MIN_FILE_SIZE_BYTES: u64 = 100 * 1024;

/// Number of roots traversed concurrently.
pub const DEFAULT_SCAN_BATCH_SIZE: usize = 5;

/// Largest allowed scan batch.
pub const MAX_SCAN_BATCH_SIZE: usize = 16;

/// Attempts made to read a file's duration before excluding it.
pub const DEFAULT_PROBE_ATTEMPTS: u32 = 2;

/// Tag marking tracks that were downloaded from the remote platform.
pub const DEFAULT_PROVENANCE_TAG: &str = "youtube";

/// Scanner settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanConfig {
    /// Directories walked for audio files. Missing ones are skipped.
    #[serde(default = "default_library_roots")]
    pub roots: Vec<PathBuf>,
    /// Accepted lowercase extensions without the dot.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Files must be strictly larger than this.
    #[serde(default = "default_min_file_size")]
    pub min_file_size_bytes: u64,
    /// How many roots are traversed at the same time.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Duration probe attempts per file.
    #[serde(default = "default_probe_attempts")]
    pub probe_attempts: u32,
    /// Mount prefixes that point at the same storage.
    #[serde(default = "default_mount_aliases")]
    pub mount_aliases: Vec<MountAlias>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            roots: default_library_roots(),
            extensions: default_extensions(),
            min_file_size_bytes: DEFAULT_MIN_FILE_SIZE_BYTES,
            batch_size: DEFAULT_SCAN_BATCH_SIZE,
            probe_attempts: DEFAULT_PROBE_ATTEMPTS,
            mount_aliases: default_mount_aliases(),
        }
    }
}

impl ScanConfig {
    /// Scanner settings for the given roots, defaults elsewhere.
    #[must_use]
    pub fn with_roots(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            ..Self::default()
        }
    }

    /// Whether a file extension is accepted (case-insensitive).
    #[must_use]
    pub fn accepts_extension(&self, extension: &str) -> bool {
        let extension = extension.trim_start_matches('.').to_lowercase();
        self.extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(&extension))
    }
}

/// Download manager settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadConfig {
    /// Managed directory downloads are committed to.
    #[serde(default = "default_download_directory")]
    pub directory: PathBuf,
    /// How long a terminal job stays visible before removal.
    #[serde(default = "default_terminal_grace_ms")]
    pub terminal_grace_ms: u64,
    /// Tag added to downloaded tracks.
    #[serde(default = "default_provenance_tag")]
    pub provenance_tag: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            directory: default_download_directory(),
            terminal_grace_ms: default_terminal_grace_ms(),
            provenance_tag: default_provenance_tag(),
        }
    }
}

impl DownloadConfig {
    /// Settings for the given directory, defaults elsewhere.
    #[must_use]
    pub fn with_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    /// Grace period as a `Duration`.
    #[must_use]
    pub const fn terminal_grace(&self) -> Duration {
        Duration::from_millis(self.terminal_grace_ms)
    }
}

/// Remote platform settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Results requested per search page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Stream manifest fetch attempts before giving up.
    #[serde(default = "default_manifest_attempts")]
    pub manifest_attempts: u32,
    /// Base delay of the linear backoff between manifest attempts.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            manifest_attempts: default_manifest_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

/// Catalog database settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogConfig {
    /// SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Connection pool size. Writes are serialized regardless.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppConfig {
    /// Local scanner settings.
    #[serde(default)]
    pub scan: ScanConfig,
    /// Download settings.
    #[serde(default)]
    pub downloads: DownloadConfig,
    /// Remote platform settings.
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Catalog settings.
    #[serde(default)]
    pub catalog: CatalogConfig,
}

impl AppConfig {
    /// Load configuration from disk, or create default if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let config_path = config_file_path();

        if !config_path.exists() {
            debug!("Config file not found, using defaults");
            let config = Self::default();
            // Ensure config directory exists and save defaults
            if let Err(e) = config.save() {
                warn!("Failed to save default config: {}", e);
            }
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;

        let mut config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file: {e}")))?;
        config.validate();

        info!("Loaded config from {}", path.display());
        debug!("Library roots: {:?}", config.scan.roots);

        Ok(config)
    }

    /// Save configuration to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_file_path())
    }

    /// Save configuration to a specific file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|e| Error::io(path, e))?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Clamp values into their supported ranges.
    pub fn validate(&mut self) {
        self.scan.batch_size = self.scan.batch_size.clamp(1, MAX_SCAN_BATCH_SIZE);
        self.scan.probe_attempts = self.scan.probe_attempts.clamp(1, 5);
        self.remote.manifest_attempts = self.remote.manifest_attempts.clamp(1, 10);
        self.remote.page_size = self.remote.page_size.clamp(1, 100);
        self.catalog.max_connections = self.catalog.max_connections.max(1);
        if self.downloads.provenance_tag.trim().is_empty() {
            self.downloads.provenance_tag = default_provenance_tag();
        }
    }

    /// Get the path to the config file.
    #[must_use]
    pub fn config_file_path() -> PathBuf {
        config_file_path()
    }
}

fn app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tunedeck")
}

/// Get the path to the config file.
fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("tunedeck")
        .join("config.json")
}

/// Default library roots: platform music and download folders plus the
/// usual Android shared-storage locations.
#[must_use]
pub fn default_library_roots() -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = [dirs::audio_dir(), dirs::download_dir()]
        .into_iter()
        .flatten()
        .collect();
    for android in [
        "/storage/emulated/0/Music",
        "/storage/emulated/0/Download",
        "/sdcard/Music",
    ] {
        roots.push(PathBuf::from(android));
    }
    roots
}

/// Default managed download directory.
#[must_use]
pub fn default_download_directory() -> PathBuf {
    app_data_dir().join("downloads")
}

/// Default catalog database file.
#[must_use]
pub fn default_database_path() -> PathBuf {
    app_data_dir().join("catalog.db")
}

fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(ToString::to_string).collect()
}

const fn default_min_file_size() -> u64 {
    DEFAULT_MIN_FILE_SIZE_BYTES
}

const fn default_batch_size() -> usize {
    DEFAULT_SCAN_BATCH_SIZE
}

const fn default_probe_attempts() -> u32 {
    DEFAULT_PROBE_ATTEMPTS
}

const fn default_terminal_grace_ms() -> u64 {
    2_000
}

fn default_provenance_tag() -> String {
    DEFAULT_PROVENANCE_TAG.to_string()
}

const fn default_page_size() -> usize {
    20
}

const fn default_manifest_attempts() -> u32 {
    3
}

const fn default_retry_base_delay_ms() -> u64 {
    1_000
}

const fn default_max_connections() -> u32 {
    4
}
