//! Configuration for an archive session

use crate::types::LogVersion;
use std::path::{Path, PathBuf};

/// Environment variable overriding the data volume size ceiling
pub const MAX_VOLUME_SIZE_ENV: &str = "PMARCH_MAXLOGSZ";

/// Data volume bytes written between temporal index entries
pub const DEFAULT_FLUSH_SIZE: u64 = 100_000;

/// Options for creating or appending to an archive
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Archive base path; volumes are `<path>.meta`, `<path>.index`, `<path>.N`
    pub path: PathBuf,

    /// Format version for newly created archives
    pub version: LogVersion,

    /// Reopen an existing archive instead of creating one
    pub append: bool,

    /// Hostname for the label (default: this machine)
    pub hostname: Option<String>,

    /// Timezone for the label (default: local zone)
    pub timezone: Option<String>,

    /// Data volume size ceiling (default: env, then version default)
    pub max_volume_size: Option<u64>,

    /// Data volume bytes between temporal index entries
    pub flush_size: u64,
}

impl ArchiveConfig {
    /// Configuration for a new archive at `path`
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            version: LogVersion::default(),
            append: false,
            hostname: None,
            timezone: None,
            max_volume_size: None,
            flush_size: DEFAULT_FLUSH_SIZE,
        }
    }

    /// Append to the archive if it exists
    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    /// Set the format version
    pub fn version(mut self, version: LogVersion) -> Self {
        self.version = version;
        self
    }

    /// Set the hostname recorded in the label
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Set the timezone recorded in the label
    pub fn timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    /// Set the data volume size ceiling
    pub fn max_volume_size(mut self, bytes: u64) -> Self {
        self.max_volume_size = Some(bytes);
        self
    }

    /// Set the index flush watermark
    pub fn flush_size(mut self, bytes: u64) -> Self {
        self.flush_size = bytes;
        self
    }

    /// Resolve the volume size ceiling for `version`.
    ///
    /// An explicit setting wins, then `PMARCH_MAXLOGSZ`, then the
    /// version default. Unparseable environment values are ignored.
    pub fn resolve_max_volume_size(&self, version: LogVersion) -> u64 {
        if let Some(bytes) = self.max_volume_size {
            return bytes;
        }
        std::env::var(MAX_VOLUME_SIZE_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or_else(|| version.default_max_volume_size())
    }
}
