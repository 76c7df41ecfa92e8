// pmarch - Performance metrics archive writer
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Result writing
//!
//! A result is only committed to the data volume after every metric it
//! names has its metadata on disk, and after the temporal index has been
//! brought up to date.

use crate::codec::encode_result;
use crate::context::{not_open, ArchiveContext, MetaWriter};
use crate::error::{MisuseError, Result};
use crate::types::{ResultRecord, Timestamp, ValueSet, PM_IN_NULL};
use log::debug;
use std::collections::HashSet;

impl ArchiveContext {
    /// Append a result record.
    ///
    /// Values within each value set are written in ascending instance
    /// order. Every metric must be registered; its descriptor and instance
    /// domain are written on first use.
    pub fn put_result(&mut self, mut record: ResultRecord) -> Result<()> {
        self.check_writable()?;
        record.sort_instances();
        self.stamp = record.timestamp;
        let result = self.put_result_inner(&record);
        self.guard(result)
    }

    fn put_result_inner(&mut self, record: &ResultRecord) -> Result<()> {
        self.start()?;

        for vset in &record.vsets {
            self.validate_vset(vset)?;
        }
        let bytes = encode_result(record, self.version);

        // Schema conflicts are found before any metadata is written
        for vset in &record.vsets {
            self.registry.check_metric(vset.pmid, self.ondisk.as_ref())?;
        }

        let files = self.files.as_mut().ok_or_else(not_open)?;
        self.index.mark_meta_start(files);
        let mut sink = MetaWriter {
            files: &mut *files,
            stats: &mut self.stats,
        };
        let mut needti = false;
        for vset in &record.vsets {
            needti |= self.registry.ensure_metric_written(
                vset.pmid,
                &mut sink,
                self.ondisk.as_ref(),
                record.timestamp,
            )?;
        }

        self.commit(record.timestamp, &bytes, needti, record.is_mark())
    }

    /// Check a value set against the metric's registration
    fn validate_vset(&self, vset: &ValueSet) -> Result<()> {
        let pmid = vset.pmid;
        let reg = self
            .registry
            .metric(pmid)
            .ok_or(MisuseError::UnknownMetric(pmid))?;
        let desc = &reg.desc;

        for value in &vset.values {
            if value.value.value_type() != desc.value_type {
                return Err(MisuseError::ValueTypeMismatch {
                    pmid,
                    expected: desc.value_type.to_string(),
                    actual: value.value.value_type().to_string(),
                }
                .into());
            }
        }

        match desc.indom {
            None => {
                if vset.values.len() > 1 {
                    return Err(MisuseError::InstanceMismatch {
                        pmid,
                        reason: format!("singular metric has {} values", vset.values.len()),
                    }
                    .into());
                }
                if let Some(v) = vset.values.iter().find(|v| v.inst != PM_IN_NULL) {
                    return Err(MisuseError::InstanceMismatch {
                        pmid,
                        reason: format!("singular metric given instance {}", v.inst),
                    }
                    .into());
                }
            }
            Some(indom) => {
                let members = self
                    .registry
                    .indom(indom)
                    .ok_or(MisuseError::UnknownInDom(indom))?;
                let mut seen = HashSet::with_capacity(vset.values.len());
                for v in &vset.values {
                    if !seen.insert(v.inst) {
                        return Err(MisuseError::InstanceMismatch {
                            pmid,
                            reason: format!("instance {} given twice", v.inst),
                        }
                        .into());
                    }
                    if !members.instances.iter().any(|i| i.id == v.inst) {
                        return Err(MisuseError::InstanceMismatch {
                            pmid,
                            reason: format!("instance {} not in instance domain {}", v.inst, indom),
                        }
                        .into());
                    }
                }
            }
        }
        Ok(())
    }

    /// Roll the volume and flush the index as needed, then append
    /// `bytes` to the data volume
    pub(crate) fn commit(
        &mut self,
        timestamp: Timestamp,
        bytes: &[u8],
        mut needti: bool,
        mark: bool,
    ) -> Result<()> {
        let files = self.files.as_mut().ok_or_else(not_open)?;
        let len = bytes.len() as u64;

        if files.data.tell() + len >= self.max_volume_size {
            let mut label = self.label.clone().ok_or_else(not_open)?;
            label.start = timestamp;
            let vol = files.new_volume(&label)?;
            debug!(
                "switched to data volume {} at {} (ceiling {} bytes)",
                vol, timestamp, self.max_volume_size
            );
            self.index.reset_watermark();
            self.stats.volume_switches += 1;
            needti = true;
        }

        if self.index.due(needti, files.data.tell() + len) {
            self.index.flush(files, timestamp)?;
            self.stats.index_entries += 1;
        }

        files.put_data(bytes)?;
        self.stats.record_data(bytes.len(), mark);
        Ok(())
    }
}
