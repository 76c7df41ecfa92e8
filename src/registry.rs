//! Metadata registry
//!
//! Tracks the metrics, instance domains, text and label sets known to an
//! archive context, and which of them are already persisted, so each is
//! written to the metadata volume once.
//!
//! When appending, a record that is not yet marked written is first
//! looked up in the metadata loaded from the existing archive:
//!
//! - a descriptor on disk must agree field by field, or the write fails
//!   with a [`SchemaError`]
//! - an instance domain on disk must have exactly the same members,
//!   otherwise a fresh membership record is written
//! - text and label sets on disk are simply skipped

use crate::codec::MetaRecord;
use crate::error::{MisuseError, Result, SchemaError};
use crate::reader::MetadataIndex;
use crate::types::{
    Descriptor, InDomId, Instance, LabelKind, LabelSet, MetricId, TextKind, TextTarget, Timestamp,
};
use std::collections::HashMap;

/// Destination for metadata records
pub trait MetadataSink {
    /// Append a record to the metadata volume
    fn put_meta(&mut self, record: &MetaRecord) -> Result<()>;

    /// A record was found on disk and not rewritten
    fn note_reused(&mut self) {}
}

/// A registered metric
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRegistration {
    pub desc: Descriptor,
    pub written: bool,
}

/// A registered instance domain
#[derive(Debug, Clone, PartialEq)]
pub struct InDomRegistration {
    pub indom: InDomId,
    pub instances: Vec<Instance>,
    pub written: bool,
}

/// A text annotation
#[derive(Debug, Clone, PartialEq)]
pub struct TextRegistration {
    pub target: TextTarget,
    pub kind: TextKind,
    pub content: String,
    pub written: bool,
}

/// A label record
#[derive(Debug, Clone, PartialEq)]
pub struct LabelRegistration {
    pub kind: LabelKind,
    pub ident: u32,
    pub sets: Vec<LabelSet>,
    pub written: bool,
}

/// Check an on-disk descriptor against the one being written
pub fn compare_descs(ours: &Descriptor, theirs: &Descriptor) -> std::result::Result<(), SchemaError> {
    let pmid = ours.pmid;
    if ours.value_type != theirs.value_type {
        return Err(SchemaError::ChangedType { pmid });
    }
    if ours.indom != theirs.indom {
        return Err(SchemaError::ChangedInstanceDomain { pmid });
    }
    if ours.semantics != theirs.semantics {
        return Err(SchemaError::ChangedSemantics { pmid });
    }
    if ours.units != theirs.units {
        return Err(SchemaError::ChangedUnits { pmid });
    }
    Ok(())
}

/// Whether two memberships hold the same (id, name) pairs
pub fn same_instances(a: &[Instance], b: &[Instance]) -> bool {
    a.len() == b.len() && a.iter().all(|inst| b.contains(inst))
}

/// Everything an archive context knows about its metadata
#[derive(Debug, Clone, Default)]
pub struct Registry {
    metrics: HashMap<MetricId, MetricRegistration>,
    names: HashMap<String, MetricId>,
    indoms: HashMap<InDomId, InDomRegistration>,
    texts: HashMap<(TextTarget, TextKind), TextRegistration>,
    labels: HashMap<(LabelKind, u32), LabelRegistration>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a metric.
    ///
    /// Registering an identical descriptor again is a no-op. A different
    /// descriptor under a known id or name is rejected. The metric's
    /// instance domain is created empty if it is not known yet.
    pub fn add_metric(&mut self, desc: Descriptor) -> Result<()> {
        if let Some(existing) = self.metrics.get(&desc.pmid) {
            if existing.desc == desc {
                return Ok(());
            }
            return Err(MisuseError::DuplicateMetric {
                pmid: desc.pmid,
                name: desc.name,
            }
            .into());
        }
        if self.names.contains_key(&desc.name) {
            return Err(MisuseError::DuplicateMetric {
                pmid: desc.pmid,
                name: desc.name,
            }
            .into());
        }

        if let Some(indom) = desc.indom {
            self.indoms.entry(indom).or_insert_with(|| InDomRegistration {
                indom,
                instances: Vec::new(),
                written: false,
            });
        }
        self.names.insert(desc.name.clone(), desc.pmid);
        self.metrics.insert(
            desc.pmid,
            MetricRegistration {
                desc,
                written: false,
            },
        );
        Ok(())
    }

    /// Add an instance to a domain.
    ///
    /// A new member clears the domain's written flag so the grown
    /// membership is written again. Re-adding an identical member is a
    /// no-op; reusing an id or name for a different member is rejected.
    pub fn add_instance(&mut self, indom: InDomId, inst: i32, name: &str) -> Result<()> {
        let reg = self.indoms.entry(indom).or_insert_with(|| InDomRegistration {
            indom,
            instances: Vec::new(),
            written: false,
        });

        for existing in &reg.instances {
            if existing.id == inst && existing.name == name {
                return Ok(());
            }
            if existing.id == inst || existing.name == name {
                return Err(MisuseError::DuplicateInstance {
                    indom,
                    inst,
                    name: name.to_string(),
                }
                .into());
            }
        }

        reg.instances.push(Instance::new(inst, name));
        reg.written = false;
        Ok(())
    }

    /// Register a text annotation for a known metric or instance domain.
    ///
    /// Returns the lookup key. Changed content is written again.
    pub fn add_text(
        &mut self,
        target: TextTarget,
        kind: TextKind,
        content: &str,
    ) -> Result<(TextTarget, TextKind)> {
        self.check_target(target)?;
        let key = (target, kind);
        match self.texts.get_mut(&key) {
            Some(existing) if existing.content == content => {}
            Some(existing) => {
                existing.content = content.to_string();
                existing.written = false;
            }
            None => {
                self.texts.insert(
                    key,
                    TextRegistration {
                        target,
                        kind,
                        content: content.to_string(),
                        written: false,
                    },
                );
            }
        }
        Ok(key)
    }

    /// Register label sets for a target.
    ///
    /// Item labels need a known metric, InDom and Instances labels a known
    /// instance domain. Returns the lookup key.
    pub fn add_label(
        &mut self,
        kind: LabelKind,
        ident: u32,
        sets: Vec<LabelSet>,
    ) -> Result<(LabelKind, u32)> {
        match kind {
            LabelKind::Item => self.check_target(TextTarget::Metric(MetricId(ident)))?,
            LabelKind::InDom | LabelKind::Instances => {
                self.check_target(TextTarget::InDom(InDomId(ident)))?
            }
            LabelKind::Context | LabelKind::Domain | LabelKind::Cluster => {}
        }
        let key = (kind, ident);
        match self.labels.get_mut(&key) {
            Some(existing) if existing.sets == sets => {}
            Some(existing) => {
                existing.sets = sets;
                existing.written = false;
            }
            None => {
                self.labels.insert(
                    key,
                    LabelRegistration {
                        kind,
                        ident,
                        sets,
                        written: false,
                    },
                );
            }
        }
        Ok(key)
    }

    fn check_target(&self, target: TextTarget) -> Result<()> {
        match target {
            TextTarget::Metric(pmid) if !self.metrics.contains_key(&pmid) => {
                Err(MisuseError::UnknownMetric(pmid).into())
            }
            TextTarget::InDom(indom) if !self.indoms.contains_key(&indom) => {
                Err(MisuseError::UnknownInDom(indom).into())
            }
            _ => Ok(()),
        }
    }

    pub fn metric(&self, pmid: MetricId) -> Option<&MetricRegistration> {
        self.metrics.get(&pmid)
    }

    pub fn metric_by_name(&self, name: &str) -> Option<&MetricRegistration> {
        self.names.get(name).and_then(|pmid| self.metrics.get(pmid))
    }

    pub fn indom(&self, indom: InDomId) -> Option<&InDomRegistration> {
        self.indoms.get(&indom)
    }

    pub fn text(&self, target: TextTarget, kind: TextKind) -> Option<&TextRegistration> {
        self.texts.get(&(target, kind))
    }

    pub fn label(&self, kind: LabelKind, ident: u32) -> Option<&LabelRegistration> {
        self.labels.get(&(kind, ident))
    }

    /// Check a metric against the on-disk archive without writing anything
    pub fn check_metric(&self, pmid: MetricId, ondisk: Option<&MetadataIndex>) -> Result<()> {
        let reg = self
            .metrics
            .get(&pmid)
            .ok_or(MisuseError::UnknownMetric(pmid))?;
        if reg.written {
            return Ok(());
        }
        if let Some(theirs) = ondisk.and_then(|disk| disk.lookup_desc(pmid)) {
            compare_descs(&reg.desc, theirs)?;
        }
        Ok(())
    }

    /// Make sure a metric's descriptor (and its instance domain) is persisted.
    ///
    /// Returns true when anything was written, meaning a temporal index
    /// entry is due.
    pub fn ensure_metric_written(
        &mut self,
        pmid: MetricId,
        sink: &mut dyn MetadataSink,
        ondisk: Option<&MetadataIndex>,
        stamp: Timestamp,
    ) -> Result<bool> {
        let reg = self
            .metrics
            .get_mut(&pmid)
            .ok_or(MisuseError::UnknownMetric(pmid))?;

        let mut wrote = false;
        if !reg.written {
            let existing = ondisk.and_then(|disk| disk.lookup_desc(pmid));
            match existing {
                Some(theirs) => {
                    compare_descs(&reg.desc, theirs)?;
                    sink.note_reused();
                }
                None => {
                    sink.put_meta(&MetaRecord::Desc(reg.desc.clone()))?;
                    wrote = true;
                }
            }
            reg.written = true;
        }

        let indom = reg.desc.indom;
        if let Some(indom) = indom {
            wrote |= self.ensure_indom_written(indom, sink, ondisk, stamp)?;
        }
        Ok(wrote)
    }

    /// Make sure the current membership of an instance domain is persisted.
    ///
    /// Any difference from the on-disk membership, including partial
    /// overlap, writes a fresh record rather than failing.
    pub fn ensure_indom_written(
        &mut self,
        indom: InDomId,
        sink: &mut dyn MetadataSink,
        ondisk: Option<&MetadataIndex>,
        stamp: Timestamp,
    ) -> Result<bool> {
        let reg = self
            .indoms
            .get_mut(&indom)
            .ok_or(MisuseError::UnknownInDom(indom))?;
        if reg.written {
            return Ok(false);
        }

        if let Some(theirs) = ondisk.and_then(|disk| disk.lookup_indom(indom, stamp)) {
            if same_instances(&reg.instances, theirs) {
                reg.written = true;
                sink.note_reused();
                return Ok(false);
            }
        }

        sink.put_meta(&MetaRecord::InDom {
            timestamp: stamp,
            indom,
            instances: reg.instances.clone(),
        })?;
        reg.written = true;
        Ok(true)
    }

    /// Make sure a text annotation is persisted, after its target.
    ///
    /// Only a cascaded descriptor or instance domain write requests an
    /// index entry; the text record itself does not.
    pub fn ensure_text_written(
        &mut self,
        key: (TextTarget, TextKind),
        sink: &mut dyn MetadataSink,
        ondisk: Option<&MetadataIndex>,
        stamp: Timestamp,
    ) -> Result<bool> {
        let (target, kind) = key;
        let content = match self.texts.get(&key) {
            Some(reg) if reg.written => return Ok(false),
            Some(reg) => reg.content.clone(),
            None => return Ok(false),
        };

        if ondisk
            .and_then(|disk| disk.lookup_text(target, kind))
            .is_some()
        {
            self.mark_text_written(key);
            sink.note_reused();
            return Ok(false);
        }

        let wrote = match target {
            TextTarget::Metric(pmid) => self.ensure_metric_written(pmid, sink, ondisk, stamp)?,
            TextTarget::InDom(indom) => self.ensure_indom_written(indom, sink, ondisk, stamp)?,
        };

        sink.put_meta(&MetaRecord::Text {
            target,
            kind,
            text: content,
        })?;
        self.mark_text_written(key);
        Ok(wrote)
    }

    fn mark_text_written(&mut self, key: (TextTarget, TextKind)) {
        if let Some(reg) = self.texts.get_mut(&key) {
            reg.written = true;
        }
    }

    /// Make sure a label record is persisted, after its target
    pub fn ensure_label_written(
        &mut self,
        key: (LabelKind, u32),
        sink: &mut dyn MetadataSink,
        ondisk: Option<&MetadataIndex>,
        stamp: Timestamp,
    ) -> Result<bool> {
        let (kind, ident) = key;
        let sets = match self.labels.get(&key) {
            Some(reg) if reg.written => return Ok(false),
            Some(reg) => reg.sets.clone(),
            None => return Ok(false),
        };

        if ondisk
            .and_then(|disk| disk.lookup_label(kind, ident))
            .is_some()
        {
            self.mark_label_written(key);
            sink.note_reused();
            return Ok(false);
        }

        let wrote = match kind {
            LabelKind::Item => self.ensure_metric_written(MetricId(ident), sink, ondisk, stamp)?,
            LabelKind::InDom | LabelKind::Instances => {
                self.ensure_indom_written(InDomId(ident), sink, ondisk, stamp)?
            }
            LabelKind::Context | LabelKind::Domain | LabelKind::Cluster => false,
        };

        sink.put_meta(&MetaRecord::Label {
            timestamp: stamp,
            kind,
            ident,
            sets,
        })?;
        self.mark_label_written(key);
        Ok(wrote)
    }

    fn mark_label_written(&mut self, key: (LabelKind, u32)) {
        if let Some(reg) = self.labels.get_mut(&key) {
            reg.written = true;
        }
    }
}
