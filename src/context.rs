// pmarch - Performance metrics archive writer
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Archive context
//!
//! One [`ArchiveContext`] per archive being written. The context is
//! created cheaply; the archive is created (or reopened, in append mode)
//! on the first write so its labels carry the first record's timestamp.
//!
//! ```text
//! START --(first write)--> ACTIVE --(end)--> END
//!                            |
//!                     (fatal error)--> FAILED
//! ```

use crate::codec::{encode_result, MetaRecord};
use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, LogFileError, MisuseError, Result};
use crate::index::TemporalIndex;
use crate::label::{local_timezone, local_zoneinfo, Label};
use crate::metrics::WriteStats;
use crate::reader::{corrupt, parse_index, read_data_label, read_volume, MetadataIndex};
use crate::registry::{MetadataSink, Registry};
use crate::types::{
    Descriptor, InDomId, LabelKind, LabelSet, LogVersion, ResultRecord, TextKind, TextTarget,
    Timestamp,
};
use crate::volume::{data_path, index_path, locate, Located, Lookup, VolumeSet};
use log::{debug, error, info, warn};
use std::fmt;
use std::path::Path;

/// Gap between the last record and a mark record
pub const MARK_OFFSET_MS: u32 = 1;

/// Lifecycle state of an archive context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextState {
    /// Nothing written yet
    #[default]
    Start,
    /// Archive open for writing
    Active,
    /// Session finished
    End,
    /// A storage error ended the session
    Failed,
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextState::Start => write!(f, "START"),
            ContextState::Active => write!(f, "ACTIVE"),
            ContextState::End => write!(f, "END"),
            ContextState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Metadata sink writing to the metadata volume
pub(crate) struct MetaWriter<'a> {
    pub(crate) files: &'a mut VolumeSet,
    pub(crate) stats: &'a mut WriteStats,
}

impl MetadataSink for MetaWriter<'_> {
    fn put_meta(&mut self, record: &MetaRecord) -> Result<()> {
        let bytes = self.files.put_meta(record)?;
        self.stats.record_meta(bytes);
        Ok(())
    }

    fn note_reused(&mut self) {
        self.stats.metadata_reused += 1;
    }
}

/// Writer for one archive
#[derive(Debug)]
pub struct ArchiveContext {
    pub(crate) config: ArchiveConfig,
    pub(crate) state: ContextState,
    pub(crate) version: LogVersion,
    pub(crate) append: bool,
    pub(crate) label: Option<Label>,
    pub(crate) registry: Registry,
    pub(crate) ondisk: Option<MetadataIndex>,
    pub(crate) files: Option<VolumeSet>,
    pub(crate) stamp: Timestamp,
    pub(crate) index: TemporalIndex,
    pub(crate) max_volume_size: u64,
    pub(crate) stats: WriteStats,
}

impl ArchiveContext {
    /// Create a context; nothing touches the disk until the first write
    pub fn new(config: ArchiveConfig) -> Self {
        let version = config.version;
        let append = config.append;
        let index = TemporalIndex::new(config.flush_size);
        let max_volume_size = config.resolve_max_volume_size(version);
        Self {
            config,
            state: ContextState::Start,
            version,
            append,
            label: None,
            registry: Registry::new(),
            ondisk: None,
            files: None,
            stamp: Timestamp::default(),
            index,
            max_volume_size,
            stats: WriteStats::new(),
        }
    }

    /// Create a context for a new archive at `path` with default settings
    pub fn create(path: impl AsRef<Path>) -> Self {
        Self::new(ArchiveConfig::new(path))
    }

    /// Create a context that appends to the archive at `path` if present
    pub fn append(path: impl AsRef<Path>) -> Self {
        Self::new(ArchiveConfig::new(path).append(true))
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Format version in use; adopted from disk when appending
    pub fn version(&self) -> LogVersion {
        self.version
    }

    /// Whether the context is appending to an existing archive
    pub fn is_append(&self) -> bool {
        self.append
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Label of the archive, once started
    pub fn label(&self) -> Option<&Label> {
        self.label.as_ref()
    }

    /// Governing zone of the archive, once started
    pub fn zone(&self) -> Option<&str> {
        self.label.as_ref().map(Label::zone)
    }

    /// Timestamp of the last record submitted
    pub fn last_timestamp(&self) -> Timestamp {
        self.stamp
    }

    /// Current data volume number, once started
    pub fn current_volume(&self) -> Option<i32> {
        self.files.as_ref().map(VolumeSet::curvol)
    }

    /// Data volume size ceiling in effect
    pub fn max_volume_size(&self) -> u64 {
        self.max_volume_size
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn stats(&self) -> &WriteStats {
        &self.stats
    }

    /// Reject writes outside START and ACTIVE
    pub(crate) fn check_writable(&self) -> Result<()> {
        match self.state {
            ContextState::Start | ContextState::Active => Ok(()),
            ContextState::End | ContextState::Failed => Err(MisuseError::State {
                state: self.state.to_string(),
            }
            .into()),
        }
    }

    /// Mark the session failed on a storage error
    pub(crate) fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_fatal() {
                error!("archive {}: {}", self.config.path.display(), err);
                self.state = ContextState::Failed;
            }
        }
        result
    }

    /// Create or reopen the archive if that has not happened yet.
    ///
    /// Returns true when an existing archive was reopened.
    pub fn ensure_started(&mut self) -> Result<bool> {
        self.check_writable()?;
        let result = self.start();
        self.guard(result)
    }

    pub(crate) fn start(&mut self) -> Result<bool> {
        if self.state != ContextState::Start {
            return Ok(self.ondisk.is_some());
        }

        if self.append {
            match locate(&self.config.path) {
                Lookup::Found(located) => {
                    self.open_existing(&located)?;
                    self.state = ContextState::Active;
                    return Ok(true);
                }
                Lookup::NotFound => {
                    warn!(
                        "no archive at {}, creating a new one",
                        self.config.path.display()
                    );
                    self.append = false;
                }
            }
        }

        self.create_new()?;
        self.state = ContextState::Active;
        Ok(false)
    }

    fn open_existing(&mut self, located: &Located) -> Result<()> {
        let base = self.config.path.clone();
        let ondisk = MetadataIndex::load(&base).map_err(|e| corrupt(&base, e))?;
        let label = ondisk.label().clone();

        // index and newest data volume must load before anything is appended
        let (index_label, entries) = read_volume(&index_path(&base))
            .and_then(|bytes| parse_index(&bytes))
            .map_err(|e| corrupt(&base, e))?;
        let curvol = located.max_vol();
        let data_label =
            read_data_label(&data_path(&base, curvol), curvol).map_err(|e| corrupt(&base, e))?;
        for other in [&index_label, &data_label] {
            if other.version != label.version {
                return Err(LogFileError::Corrupt {
                    path: base.display().to_string(),
                    reason: format!(
                        "volume {} is {}, metadata is {}",
                        other.vol, other.version, label.version
                    ),
                }
                .into());
            }
        }
        debug!("{}: {} index entries on disk", base.display(), entries.len());

        if label.version != self.config.version {
            warn!(
                "archive {} is {}, appending in that format",
                base.display(),
                label.version
            );
        }
        if let Some(host) = &self.config.hostname {
            if host != &label.hostname {
                warn!(
                    "archive {} belongs to host {}, ignoring {}",
                    base.display(),
                    label.hostname,
                    host
                );
            }
        }

        self.version = label.version;
        self.max_volume_size = self.config.resolve_max_volume_size(label.version);
        let files = VolumeSet::open(&base, located, label.version)?;
        info!(
            "appending to {} (volume {}, {} metrics on disk, zone {})",
            base.display(),
            files.curvol(),
            ondisk.metric_count(),
            label.zone()
        );

        self.files = Some(files);
        self.label = Some(label);
        self.ondisk = Some(ondisk);
        Ok(())
    }

    fn create_new(&mut self) -> Result<()> {
        let base = self.config.path.clone();
        let hostname = match &self.config.hostname {
            Some(host) => host.clone(),
            None => hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "localhost".to_string()),
        };

        let mut label = Label::new(self.version, hostname, local_timezone());
        label.zoneinfo = local_zoneinfo();
        if let Some(tz) = &self.config.timezone {
            label.timezone = tz.clone();
            label.zoneinfo = None;
        }
        label.start = self.stamp;
        label.validate()?;

        let mut files = VolumeSet::create(&base, self.version)?;
        files.write_labels(&label)?;
        info!(
            "created archive {} ({}, host {}, zone {})",
            base.display(),
            self.version,
            label.hostname,
            label.zone()
        );

        self.files = Some(files);
        self.label = Some(label);
        Ok(())
    }

    /// Register a metric
    pub fn add_metric(&mut self, desc: Descriptor) -> Result<()> {
        self.check_writable()?;
        debug!("add metric {} ({})", desc.name, desc.pmid);
        self.registry.add_metric(desc)
    }

    /// Add an instance to an instance domain
    pub fn add_instance(&mut self, indom: InDomId, inst: i32, name: &str) -> Result<()> {
        self.check_writable()?;
        self.registry.add_instance(indom, inst, name)
    }

    /// Write a one-line or help text for a metric or instance domain at
    /// the current timestamp
    pub fn put_text(&mut self, target: TextTarget, kind: TextKind, content: &str) -> Result<()> {
        self.check_writable()?;
        if content.is_empty() {
            return Err(MisuseError::InvalidText {
                reason: format!("empty text for {:?}", target),
            }
            .into());
        }
        let key = self.registry.add_text(target, kind, content)?;
        let result = self.put_metadata(|registry, sink, ondisk, stamp| {
            registry.ensure_text_written(key, sink, ondisk, stamp)
        });
        self.guard(result)
    }

    /// Write label sets at the current timestamp.
    ///
    /// Every set must be a JSON object. `ident` is the metric or instance
    /// domain id for Item, InDom and Instances labels, the domain or
    /// cluster number for Domain and Cluster labels, and ignored for
    /// Context labels.
    pub fn put_label(&mut self, kind: LabelKind, ident: u32, sets: Vec<LabelSet>) -> Result<()> {
        self.check_writable()?;
        for set in &sets {
            validate_label_json(&set.json)?;
        }
        let ident = if kind == LabelKind::Context { 0 } else { ident };
        let key = self.registry.add_label(kind, ident, sets)?;
        let result = self.put_metadata(|registry, sink, ondisk, stamp| {
            registry.ensure_label_written(key, sink, ondisk, stamp)
        });
        self.guard(result)
    }

    /// Run a metadata write with the index cursor and flush around it
    fn put_metadata<F>(&mut self, write: F) -> Result<()>
    where
        F: FnOnce(
            &mut Registry,
            &mut dyn MetadataSink,
            Option<&MetadataIndex>,
            Timestamp,
        ) -> Result<bool>,
    {
        self.start()?;
        let stamp = self.stamp;
        let files = self.files.as_mut().ok_or_else(not_open)?;
        self.index.mark_meta_start(files);

        let mut writer = MetaWriter {
            files: &mut *files,
            stats: &mut self.stats,
        };
        let sink: &mut dyn MetadataSink = &mut writer;
        let needti = write(&mut self.registry, sink, self.ondisk.as_ref(), stamp)?;
        if needti {
            self.index.flush(files, stamp)?;
            self.stats.index_entries += 1;
        }
        Ok(())
    }

    /// Write a mark record 1 ms after the last timestamp, denoting a gap.
    ///
    /// A mark needs a timestamp to follow, so it fails with a state error
    /// until the archive has been started.
    pub fn put_mark(&mut self) -> Result<()> {
        self.check_writable()?;
        if self.state == ContextState::Start {
            return Err(not_open());
        }
        let result = self.put_mark_inner();
        self.guard(result)
    }

    fn put_mark_inner(&mut self) -> Result<()> {
        self.start()?;
        let stamp = self.stamp.add_millis(MARK_OFFSET_MS);
        let bytes = encode_result(&ResultRecord::new(stamp), self.version);
        self.commit(stamp, &bytes, false, true)
    }

    /// Finish the session: write the closing index entry and close every
    /// volume.
    ///
    /// A context that never wrote anything creates an empty archive first.
    pub fn end(&mut self) -> Result<()> {
        self.check_writable()?;
        let result = self.end_inner();
        self.guard(result)
    }

    fn end_inner(&mut self) -> Result<()> {
        self.start()?;
        let mut files = self.files.take().ok_or_else(not_open)?;
        self.index.finish(&mut files, self.stamp)?;
        self.stats.index_entries += 1;
        files.close()?;
        self.state = ContextState::End;
        info!(
            "closed archive {}: {} results, {} marks, {} index entries",
            self.config.path.display(),
            self.stats.results,
            self.stats.marks,
            self.stats.index_entries
        );
        Ok(())
    }
}

/// Volumes missing outside the ACTIVE state
pub(crate) fn not_open() -> ArchiveError {
    MisuseError::State {
        state: ContextState::Start.to_string(),
    }
    .into()
}

/// Check that a label set is a JSON object
fn validate_label_json(json: &str) -> Result<()> {
    match serde_json::from_str::<serde_json::Value>(json) {
        Ok(serde_json::Value::Object(_)) => Ok(()),
        Ok(other) => Err(MisuseError::InvalidLabelSet {
            reason: format!("expected a JSON object, got {}", other),
        }
        .into()),
        Err(e) => Err(MisuseError::InvalidLabelSet {
            reason: e.to_string(),
        }
        .into()),
    }
}
