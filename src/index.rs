//! Temporal index maintenance
//!
//! An index entry maps a timestamp to the metadata and data offsets a
//! reader can start from. Entries always point at metadata that existed
//! before the indexed record, so the metadata offset is captured before
//! a call writes any metadata and the metadata volume is rewound to it
//! while the entry is emitted.

use crate::codec::IndexEntry;
use crate::error::Result;
use crate::types::Timestamp;
use crate::volume::VolumeSet;
use log::debug;

/// Index cursor for one archive context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporalIndex {
    flush_size: u64,
    watermark: u64,
    meta_before: u64,
}

impl TemporalIndex {
    /// Create a cursor that emits an entry every `flush_size` data bytes
    pub fn new(flush_size: u64) -> Self {
        Self {
            flush_size,
            watermark: flush_size,
            meta_before: 0,
        }
    }

    /// Data offset beyond which an entry is due
    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    /// Metadata offset recorded before the current call's writes
    pub fn meta_before(&self) -> u64 {
        self.meta_before
    }

    /// Remember where metadata stood before this call's writes
    pub fn mark_meta_start(&mut self, files: &VolumeSet) {
        self.meta_before = files.meta.tell();
    }

    /// Restart the watermark for a freshly started data volume
    pub fn reset_watermark(&mut self) {
        self.watermark = self.flush_size;
    }

    /// Whether an entry is due before writing up to `data_end`
    pub fn due(&self, needti: bool, data_end: u64) -> bool {
        needti || data_end > self.watermark
    }

    /// Emit an entry pointing at the metadata offset recorded by
    /// [`mark_meta_start`](Self::mark_meta_start)
    pub fn flush(&mut self, files: &mut VolumeSet, timestamp: Timestamp) -> Result<IndexEntry> {
        files.meta.flush()?;
        files.data.flush()?;
        let meta_after = files.meta.tell();

        files.meta.seek(self.meta_before)?;
        let entry = files.put_index(timestamp)?;
        files.meta.seek(meta_after)?;

        self.watermark = files.data.tell() + self.flush_size;
        debug!(
            "index entry at {}: vol {} meta {} data {}",
            timestamp, entry.vol, entry.meta_offset, entry.data_offset
        );
        Ok(entry)
    }

    /// Emit the closing entry of a session at the current offsets
    pub fn finish(&mut self, files: &mut VolumeSet, timestamp: Timestamp) -> Result<IndexEntry> {
        self.mark_meta_start(files);
        self.flush(files, timestamp)
    }
}
