//! Reading archives back
//!
//! Loads the metadata volume into lookup tables (used when appending to
//! an existing archive), and reads the temporal index and data volumes
//! for inspection.

use crate::codec::{decode_result, unframe, IndexEntry, MetaRecord};
use crate::error::{ArchiveError, DecodeError, LogFileError, Result};
use crate::label::{Label, VOL_INDEX, VOL_META};
use crate::types::{
    Descriptor, InDomId, Instance, LabelKind, LabelSet, MetricId, ResultRecord, TextKind,
    TextTarget, Timestamp,
};
use crate::volume::{data_path, index_path, locate, meta_path, Lookup};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Read a whole volume into memory
pub fn read_volume(path: &Path) -> Result<Vec<u8>> {
    let mut file = std::fs::File::open(path).map_err(|e| LogFileError::open(path, e))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|e| LogFileError::read(path, e))?;
    Ok(bytes)
}

fn expect_vol(label: &Label, vol: i32) -> Result<()> {
    if label.vol != vol {
        return Err(DecodeError::MalformedRecord {
            offset: 0,
            reason: format!("label is for volume {}, expected {}", label.vol, vol),
        }
        .into());
    }
    Ok(())
}

/// A metadata record and where it sits in the metadata volume
#[derive(Debug, Clone, PartialEq)]
pub struct MetaEntry {
    pub offset: u64,
    pub record: MetaRecord,
}

/// Contents of a metadata volume, indexed for lookup
#[derive(Debug, Clone)]
pub struct MetadataIndex {
    label: Label,
    entries: Vec<MetaEntry>,
    descs: HashMap<MetricId, Descriptor>,
    indoms: HashMap<InDomId, Vec<(Timestamp, Vec<Instance>)>>,
    texts: HashMap<(TextTarget, TextKind), String>,
    labels: HashMap<(LabelKind, u32), Vec<LabelSet>>,
}

impl MetadataIndex {
    /// Parse a metadata volume
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (label, mut offset) = Label::from_bytes(data)?;
        expect_vol(&label, VOL_META)?;

        let mut index = Self {
            label,
            entries: Vec::new(),
            descs: HashMap::new(),
            indoms: HashMap::new(),
            texts: HashMap::new(),
            labels: HashMap::new(),
        };

        while offset < data.len() {
            let (body, consumed) = unframe(&data[offset..], offset as u64)?;
            let record = MetaRecord::decode(body, index.label.version, offset as u64)?;
            index.insert(offset as u64, record);
            offset += consumed;
        }

        Ok(index)
    }

    /// Load the metadata volume of the archive at `base`
    pub fn load(base: &Path) -> Result<Self> {
        Self::from_bytes(&read_volume(&meta_path(base))?)
    }

    fn insert(&mut self, offset: u64, record: MetaRecord) {
        match &record {
            MetaRecord::Desc(desc) => {
                self.descs.insert(desc.pmid, desc.clone());
            }
            MetaRecord::InDom {
                timestamp,
                indom,
                instances,
            } => {
                let history = self.indoms.entry(*indom).or_default();
                history.push((*timestamp, instances.clone()));
                history.sort_by_key(|(ts, _)| *ts);
            }
            MetaRecord::Text { target, kind, text } => {
                self.texts.insert((*target, *kind), text.clone());
            }
            MetaRecord::Label {
                kind, ident, sets, ..
            } => {
                self.labels.insert((*kind, *ident), sets.clone());
            }
        }
        self.entries.push(MetaEntry { offset, record });
    }

    /// Label of the metadata volume
    pub fn label(&self) -> &Label {
        &self.label
    }

    /// All records in volume order
    pub fn entries(&self) -> &[MetaEntry] {
        &self.entries
    }

    /// Descriptor of a metric
    pub fn lookup_desc(&self, pmid: MetricId) -> Option<&Descriptor> {
        self.descs.get(&pmid)
    }

    /// Newest membership of an instance domain at or before `at`
    pub fn lookup_indom(&self, indom: InDomId, at: Timestamp) -> Option<&[Instance]> {
        self.indoms
            .get(&indom)?
            .iter()
            .rev()
            .find(|(ts, _)| *ts <= at)
            .map(|(_, instances)| instances.as_slice())
    }

    /// Text annotation of a metric or instance domain
    pub fn lookup_text(&self, target: TextTarget, kind: TextKind) -> Option<&str> {
        self.texts.get(&(target, kind)).map(String::as_str)
    }

    /// Label sets of a target
    pub fn lookup_label(&self, kind: LabelKind, ident: u32) -> Option<&[LabelSet]> {
        self.labels.get(&(kind, ident)).map(Vec::as_slice)
    }

    /// Descriptor of a metric, by name
    pub fn lookup_name(&self, name: &str) -> Option<&Descriptor> {
        self.descs.values().find(|d| d.name == name)
    }

    /// Newest membership of an instance domain
    pub fn latest_indom(&self, indom: InDomId) -> Option<&[Instance]> {
        self.indoms
            .get(&indom)?
            .last()
            .map(|(_, instances)| instances.as_slice())
    }

    /// Every descriptor, in no particular order
    pub fn descriptors(&self) -> impl Iterator<Item = &Descriptor> {
        self.descs.values()
    }

    /// Every instance domain with at least one membership record
    pub fn indom_ids(&self) -> impl Iterator<Item = InDomId> + '_ {
        self.indoms.keys().copied()
    }

    /// Number of descriptors
    pub fn metric_count(&self) -> usize {
        self.descs.len()
    }
}

/// Read only the label at the head of a data volume
pub fn read_data_label(path: &Path, vol: i32) -> Result<Label> {
    let mut file = std::fs::File::open(path).map_err(|e| LogFileError::open(path, e))?;
    let mut head = [0u8; 4];
    file.read_exact(&mut head)
        .map_err(|e| LogFileError::read(path, e))?;
    let len = u32::from_le_bytes(head) as usize;
    if len < head.len() {
        return Err(DecodeError::MalformedRecord {
            offset: 0,
            reason: format!("label frame length {}", len),
        }
        .into());
    }

    let mut framed = vec![0u8; len];
    framed[..4].copy_from_slice(&head);
    file.read_exact(&mut framed[4..])
        .map_err(|e| LogFileError::read(path, e))?;
    let (label, _) = Label::from_bytes(&framed)?;
    expect_vol(&label, vol)?;
    Ok(label)
}

/// Parse a temporal index volume
pub fn parse_index(data: &[u8]) -> Result<(Label, Vec<IndexEntry>)> {
    let (label, mut offset) = Label::from_bytes(data)?;
    expect_vol(&label, VOL_INDEX)?;

    let size = IndexEntry::encoded_size(label.version);
    let mut entries = Vec::with_capacity((data.len() - offset) / size);
    while offset < data.len() {
        if data.len() - offset < size {
            return Err(DecodeError::MalformedRecord {
                offset: offset as u64,
                reason: format!("partial index entry of {} bytes", data.len() - offset),
            }
            .into());
        }
        entries.push(IndexEntry::decode(
            &data[offset..offset + size],
            label.version,
            offset as u64,
        )?);
        offset += size;
    }
    Ok((label, entries))
}

/// Parse one data volume into its label and (offset, result) pairs
pub fn parse_data_volume(data: &[u8]) -> Result<(Label, Vec<(u64, ResultRecord)>)> {
    let (label, mut offset) = Label::from_bytes(data)?;
    if label.vol < 0 {
        return Err(DecodeError::MalformedRecord {
            offset: 0,
            reason: format!("label is for volume {}, expected a data volume", label.vol),
        }
        .into());
    }

    let mut results = Vec::new();
    while offset < data.len() {
        let (body, consumed) = unframe(&data[offset..], offset as u64)?;
        results.push((
            offset as u64,
            decode_result(body, label.version, offset as u64)?,
        ));
        offset += consumed;
    }
    Ok((label, results))
}

/// Read-only view of a complete archive
#[derive(Debug, Clone)]
pub struct ArchiveReader {
    base: PathBuf,
    volumes: Vec<i32>,
    metadata: MetadataIndex,
    index: Vec<IndexEntry>,
}

impl ArchiveReader {
    /// Open the archive at `base`
    pub fn open(base: impl AsRef<Path>) -> Result<Self> {
        let base = base.as_ref();
        let located = match locate(base) {
            Lookup::Found(located) => located,
            Lookup::NotFound => {
                return Err(LogFileError::Open {
                    path: base.display().to_string(),
                    reason: "no archive at this path".to_string(),
                }
                .into())
            }
        };
        let metadata = MetadataIndex::load(base)?;
        let (_, index) = parse_index(&read_volume(&index_path(base))?)?;
        Ok(Self {
            base: base.to_path_buf(),
            volumes: located.volumes,
            metadata,
            index,
        })
    }

    /// Archive label (from the metadata volume)
    pub fn label(&self) -> &Label {
        self.metadata.label()
    }

    pub fn metadata(&self) -> &MetadataIndex {
        &self.metadata
    }

    /// Temporal index entries in write order
    pub fn index(&self) -> &[IndexEntry] {
        &self.index
    }

    /// Data volume numbers, ascending
    pub fn volumes(&self) -> &[i32] {
        &self.volumes
    }

    /// Label and results of one data volume
    pub fn volume(&self, vol: i32) -> Result<(Label, Vec<(u64, ResultRecord)>)> {
        let (label, results) = parse_data_volume(&read_volume(&data_path(&self.base, vol))?)?;
        expect_vol(&label, vol)?;
        Ok((label, results))
    }

    /// Every result in the archive, in volume order
    pub fn results(&self) -> Result<Vec<ResultRecord>> {
        let mut all = Vec::new();
        for &vol in &self.volumes {
            let (_, results) = self.volume(vol)?;
            all.extend(results.into_iter().map(|(_, r)| r));
        }
        Ok(all)
    }
}

/// Turn any failure to load an existing archive into a fatal storage error
pub(crate) fn corrupt(base: &Path, err: ArchiveError) -> ArchiveError {
    match err {
        ArchiveError::LogFile(_) => err,
        other => LogFileError::Corrupt {
            path: base.display().to_string(),
            reason: other.to_string(),
        }
        .into(),
    }
}
