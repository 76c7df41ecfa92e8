//! Codec module
//!
//! On-disk encoding of everything written into an archive. All integers
//! are little-endian. Labels, metadata records and result records are
//! framed as `len | body | len` where `len` counts the whole frame, so a
//! volume can be walked in either direction. Temporal index entries are
//! fixed-size and unframed.

use crate::error::{ArchiveError, DecodeError, Result};
use crate::types::{
    text_flags, text_from_flags, Descriptor, InDomId, Instance, InstanceValue, LabelKind,
    LabelSet, LogVersion, MetricId, ResultRecord, Semantics, TextKind, TextTarget, Timestamp,
    Units, Value, ValueSet, ValueType,
};

/// Bytes added to a body by framing
pub const FRAME_OVERHEAD: usize = 8;

/// Metadata record type tags
pub const TYPE_DESC: u32 = 1;
pub const TYPE_INDOM_V2: u32 = 2;
pub const TYPE_LABEL_V2: u32 = 3;
pub const TYPE_TEXT: u32 = 4;
pub const TYPE_INDOM: u32 = 5;
pub const TYPE_LABEL: u32 = 7;

/// Wrap a body in a length-prefixed, length-suffixed frame
pub fn frame(body: &[u8]) -> Vec<u8> {
    let len = (body.len() + FRAME_OVERHEAD) as u32;
    let mut bytes = Vec::with_capacity(len as usize);
    bytes.extend_from_slice(&len.to_le_bytes());
    bytes.extend_from_slice(body);
    bytes.extend_from_slice(&len.to_le_bytes());
    bytes
}

/// Read one frame from the start of `data`.
///
/// Returns the body and the number of bytes consumed. `offset` is the
/// position of `data` within its volume and only feeds error messages.
pub fn unframe(data: &[u8], offset: u64) -> Result<(&[u8], usize)> {
    if data.len() < FRAME_OVERHEAD {
        return Err(DecodeError::BufferTooShort {
            needed: FRAME_OVERHEAD,
            available: data.len(),
        }
        .into());
    }
    let len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if len < FRAME_OVERHEAD {
        return Err(malformed(offset, format!("frame length {} too small", len)));
    }
    if data.len() < len {
        return Err(DecodeError::BufferTooShort {
            needed: len,
            available: data.len(),
        }
        .into());
    }
    let trailer = u32::from_le_bytes([data[len - 4], data[len - 3], data[len - 2], data[len - 1]]);
    if trailer as usize != len {
        return Err(malformed(
            offset,
            format!("frame trailer {} does not match header {}", trailer, len),
        ));
    }
    Ok((&data[4..len - 4], len))
}

fn malformed(offset: u64, reason: impl Into<String>) -> ArchiveError {
    DecodeError::MalformedRecord {
        offset,
        reason: reason.into(),
    }
    .into()
}

pub(crate) fn put_timestamp(bytes: &mut Vec<u8>, ts: Timestamp, version: LogVersion) {
    match version {
        LogVersion::V2 => {
            bytes.extend_from_slice(&(ts.sec as u32).to_le_bytes());
            bytes.extend_from_slice(&ts.usec().to_le_bytes());
        }
        LogVersion::V3 => {
            bytes.extend_from_slice(&ts.sec.to_le_bytes());
            bytes.extend_from_slice(&ts.nsec.to_le_bytes());
        }
    }
}

/// Write a u16-length-prefixed string.
///
/// Callers check lengths first (see [`crate::label::Label::validate`]);
/// anything longer is cut on a character boundary.
pub(crate) fn put_str16(bytes: &mut Vec<u8>, s: &str) {
    let raw = s.as_bytes();
    let mut len = raw.len().min(u16::MAX as usize);
    while !s.is_char_boundary(len) {
        len -= 1;
    }
    bytes.extend_from_slice(&(len as u16).to_le_bytes());
    bytes.extend_from_slice(&raw[..len]);
}

fn put_bytes32(bytes: &mut Vec<u8>, raw: &[u8]) {
    bytes.extend_from_slice(&(raw.len() as u32).to_le_bytes());
    bytes.extend_from_slice(raw);
}

/// Cursor over an encoded body
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
    base: u64,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8], base: u64) -> Self {
        Self { data, pos: 0, base }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.data.len() - self.pos < n {
            return Err(DecodeError::BufferTooShort {
                needed: self.pos + n,
                available: self.data.len(),
            }
            .into());
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub(crate) fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub(crate) fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub(crate) fn timestamp(&mut self, version: LogVersion) -> Result<Timestamp> {
        match version {
            LogVersion::V2 => {
                let sec = self.u32()?;
                let usec = self.u32()?;
                Ok(Timestamp::from_micros(sec as i64, usec))
            }
            LogVersion::V3 => {
                let sec = self.i64()?;
                let nsec = self.u32()?;
                Ok(Timestamp::new(sec, nsec))
            }
        }
    }

    pub(crate) fn str16(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        self.string(len)
    }

    fn bytes32(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn str32(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        self.string(len)
    }

    fn string(&mut self, len: usize) -> Result<String> {
        let at = self.offset();
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| malformed(at, "string is not UTF-8"))
    }

    /// Absolute offset of the cursor, for error messages
    pub(crate) fn offset(&self) -> u64 {
        self.base + self.pos as u64
    }
}

/// A record in the metadata volume
#[derive(Debug, Clone, PartialEq)]
pub enum MetaRecord {
    /// Metric descriptor with its name
    Desc(Descriptor),
    /// Instance domain membership as of `timestamp`
    InDom {
        timestamp: Timestamp,
        indom: InDomId,
        instances: Vec<Instance>,
    },
    /// Help text for a metric or instance domain
    Text {
        target: TextTarget,
        kind: TextKind,
        text: String,
    },
    /// Label sets as of `timestamp`
    Label {
        timestamp: Timestamp,
        kind: LabelKind,
        ident: u32,
        sets: Vec<LabelSet>,
    },
}

impl MetaRecord {
    /// Type tag written for this record in the given format
    pub fn type_tag(&self, version: LogVersion) -> u32 {
        match (self, version) {
            (MetaRecord::Desc(_), _) => TYPE_DESC,
            (MetaRecord::InDom { .. }, LogVersion::V2) => TYPE_INDOM_V2,
            (MetaRecord::InDom { .. }, LogVersion::V3) => TYPE_INDOM,
            (MetaRecord::Text { .. }, _) => TYPE_TEXT,
            (MetaRecord::Label { .. }, LogVersion::V2) => TYPE_LABEL_V2,
            (MetaRecord::Label { .. }, LogVersion::V3) => TYPE_LABEL,
        }
    }

    /// Encode as a framed metadata record
    pub fn encode(&self, version: LogVersion) -> Vec<u8> {
        let mut body = Vec::with_capacity(64);
        body.extend_from_slice(&self.type_tag(version).to_le_bytes());

        match self {
            MetaRecord::Desc(desc) => {
                body.extend_from_slice(&desc.pmid.0.to_le_bytes());
                body.push(desc.value_type as u8);
                body.push(desc.semantics as u8);
                body.extend_from_slice(&[0u8; 2]);
                body.extend_from_slice(&InDomId::to_wire(desc.indom).to_le_bytes());
                body.extend_from_slice(&desc.units.pack().to_le_bytes());
                body.extend_from_slice(&1u32.to_le_bytes());
                put_bytes32(&mut body, desc.name.as_bytes());
            }
            MetaRecord::InDom {
                timestamp,
                indom,
                instances,
            } => {
                put_timestamp(&mut body, *timestamp, version);
                body.extend_from_slice(&indom.0.to_le_bytes());
                body.extend_from_slice(&(instances.len() as u32).to_le_bytes());
                for inst in instances {
                    body.extend_from_slice(&inst.id.to_le_bytes());
                }
                for inst in instances {
                    put_bytes32(&mut body, inst.name.as_bytes());
                }
            }
            MetaRecord::Text { target, kind, text } => {
                body.extend_from_slice(&text_flags(*target, *kind).to_le_bytes());
                body.extend_from_slice(&target.ident().to_le_bytes());
                put_bytes32(&mut body, text.as_bytes());
            }
            MetaRecord::Label {
                timestamp,
                kind,
                ident,
                sets,
            } => {
                put_timestamp(&mut body, *timestamp, version);
                body.extend_from_slice(&(*kind as u32).to_le_bytes());
                body.extend_from_slice(&ident.to_le_bytes());
                body.extend_from_slice(&(sets.len() as u32).to_le_bytes());
                for set in sets {
                    body.extend_from_slice(&set.inst.to_le_bytes());
                    put_bytes32(&mut body, set.json.as_bytes());
                }
            }
        }

        frame(&body)
    }

    /// Decode a metadata record body (frame already removed)
    pub fn decode(body: &[u8], version: LogVersion, offset: u64) -> Result<Self> {
        let mut r = ByteReader::new(body, offset + 4);
        let tag = r.u32()?;

        let record = match tag {
            TYPE_DESC => {
                let pmid = MetricId(r.u32()?);
                let type_byte = r.u8()?;
                let value_type = ValueType::from_u8(type_byte)
                    .ok_or_else(|| malformed(offset, format!("bad value type {}", type_byte)))?;
                let sem_byte = r.u8()?;
                let semantics = Semantics::from_u8(sem_byte)
                    .ok_or_else(|| malformed(offset, format!("bad semantics {}", sem_byte)))?;
                r.take(2)?;
                let indom = InDomId::from_wire(r.u32()?);
                let units = Units::unpack(r.u32()?);
                let numnames = r.u32()?;
                if numnames == 0 {
                    return Err(malformed(offset, "descriptor without a name"));
                }
                let name = r.str32()?;
                for _ in 1..numnames {
                    r.str32()?;
                }
                MetaRecord::Desc(Descriptor {
                    pmid,
                    name,
                    value_type,
                    indom,
                    semantics,
                    units,
                })
            }
            TYPE_INDOM | TYPE_INDOM_V2 => {
                let timestamp = r.timestamp(version)?;
                let indom = InDomId(r.u32()?);
                let count = r.u32()? as usize;
                let mut ids = Vec::with_capacity(count.min(body.len() / 4));
                for _ in 0..count {
                    ids.push(r.i32()?);
                }
                let mut instances = Vec::with_capacity(ids.len());
                for id in ids {
                    instances.push(Instance::new(id, r.str32()?));
                }
                MetaRecord::InDom {
                    timestamp,
                    indom,
                    instances,
                }
            }
            TYPE_TEXT => {
                let flags = r.u32()?;
                let ident = r.u32()?;
                let (target, kind) = text_from_flags(flags, ident)
                    .ok_or_else(|| malformed(offset, format!("bad text flags {:#x}", flags)))?;
                let text = r.str32()?;
                MetaRecord::Text { target, kind, text }
            }
            TYPE_LABEL | TYPE_LABEL_V2 => {
                let timestamp = r.timestamp(version)?;
                let raw_kind = r.u32()?;
                let kind = LabelKind::from_u32(raw_kind)
                    .ok_or_else(|| malformed(offset, format!("bad label kind {:#x}", raw_kind)))?;
                let ident = r.u32()?;
                let count = r.u32()? as usize;
                let mut sets = Vec::with_capacity(count.min(body.len() / 8));
                for _ in 0..count {
                    let inst = r.i32()?;
                    let json = r.str32()?;
                    sets.push(LabelSet { inst, json });
                }
                MetaRecord::Label {
                    timestamp,
                    kind,
                    ident,
                    sets,
                }
            }
            other => return Err(DecodeError::UnknownRecordType(other).into()),
        };

        if !r.is_empty() {
            return Err(malformed(
                offset,
                format!("{} trailing bytes", body.len() - r.position()),
            ));
        }
        Ok(record)
    }
}

fn put_value(bytes: &mut Vec<u8>, value: &Value) {
    bytes.push(value.value_type() as u8);
    match value {
        Value::I32(v) => bytes.extend_from_slice(&v.to_le_bytes()),
        Value::U32(v) => bytes.extend_from_slice(&v.to_le_bytes()),
        Value::I64(v) => bytes.extend_from_slice(&v.to_le_bytes()),
        Value::U64(v) => bytes.extend_from_slice(&v.to_le_bytes()),
        Value::Float(v) => bytes.extend_from_slice(&v.to_le_bytes()),
        Value::Double(v) => bytes.extend_from_slice(&v.to_le_bytes()),
        Value::String(v) => put_bytes32(bytes, v.as_bytes()),
        Value::Aggregate(v) => put_bytes32(bytes, v),
    }
}

fn read_value(r: &mut ByteReader<'_>) -> Result<Value> {
    let tag = r.u8()?;
    let value_type = ValueType::from_u8(tag).ok_or(DecodeError::UnknownValueTag(tag))?;
    Ok(match value_type {
        ValueType::I32 => Value::I32(r.i32()?),
        ValueType::U32 => Value::U32(r.u32()?),
        ValueType::I64 => Value::I64(r.i64()?),
        ValueType::U64 => Value::U64(r.u64()?),
        ValueType::Float => Value::Float(f32::from_bits(r.u32()?)),
        ValueType::Double => Value::Double(f64::from_bits(r.u64()?)),
        ValueType::String => Value::String(r.str32()?),
        ValueType::Aggregate => Value::Aggregate(r.bytes32()?.to_vec()),
    })
}

/// Encode a result as a framed data volume record
pub fn encode_result(record: &ResultRecord, version: LogVersion) -> Vec<u8> {
    let mut body = Vec::with_capacity(16 + record.vsets.len() * 24);
    put_timestamp(&mut body, record.timestamp, version);
    body.extend_from_slice(&(record.vsets.len() as u32).to_le_bytes());
    for vset in &record.vsets {
        body.extend_from_slice(&vset.pmid.0.to_le_bytes());
        body.extend_from_slice(&(vset.values.len() as u32).to_le_bytes());
        for iv in &vset.values {
            body.extend_from_slice(&iv.inst.to_le_bytes());
            put_value(&mut body, &iv.value);
        }
    }
    frame(&body)
}

/// Decode a result body (frame already removed)
pub fn decode_result(body: &[u8], version: LogVersion, offset: u64) -> Result<ResultRecord> {
    let mut r = ByteReader::new(body, offset + 4);
    let timestamp = r.timestamp(version)?;
    let numpmid = r.u32()? as usize;
    let mut vsets = Vec::with_capacity(numpmid.min(body.len() / 8));
    for _ in 0..numpmid {
        let pmid = MetricId(r.u32()?);
        let numval = r.u32()? as usize;
        let mut values = Vec::with_capacity(numval.min(body.len() / 5));
        for _ in 0..numval {
            let inst = r.i32()?;
            values.push(InstanceValue::new(inst, read_value(&mut r)?));
        }
        vsets.push(ValueSet { pmid, values });
    }
    if !r.is_empty() {
        return Err(malformed(
            offset,
            format!("{} trailing bytes", body.len() - r.position()),
        ));
    }
    Ok(ResultRecord { timestamp, vsets })
}

/// Entry of the temporal index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Time of the first record at `data_offset`
    pub timestamp: Timestamp,
    /// Data volume number
    pub vol: i32,
    /// Metadata volume offset, before any metadata for `timestamp`
    pub meta_offset: u64,
    /// Data volume offset of the indexed record
    pub data_offset: u64,
}

impl IndexEntry {
    /// Encoded size in the given format
    pub fn encoded_size(version: LogVersion) -> usize {
        version.timestamp_size() + 4 + 8 + 8
    }

    /// Encode as a fixed-size index record
    pub fn encode(&self, version: LogVersion) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::encoded_size(version));
        put_timestamp(&mut bytes, self.timestamp, version);
        bytes.extend_from_slice(&self.vol.to_le_bytes());
        bytes.extend_from_slice(&self.meta_offset.to_le_bytes());
        bytes.extend_from_slice(&self.data_offset.to_le_bytes());
        bytes
    }

    /// Decode one entry from the start of `data`
    pub fn decode(data: &[u8], version: LogVersion, offset: u64) -> Result<Self> {
        let mut r = ByteReader::new(data, offset);
        Ok(Self {
            timestamp: r.timestamp(version)?,
            vol: r.i32()?,
            meta_offset: r.u64()?,
            data_offset: r.u64()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PM_IN_NULL;

    fn sample_desc() -> Descriptor {
        Descriptor::new(
            MetricId::new(60, 0, 4),
            "kernel.all.cpu.user",
            ValueType::U64,
            Some(InDomId::new(60, 0)),
            Semantics::Counter,
            Units {
                dim_time: 1,
                scale_time: 2,
                ..Units::NONE
            },
        )
    }

    fn decode_meta(bytes: &[u8], version: LogVersion) -> MetaRecord {
        let (body, consumed) = unframe(bytes, 0).unwrap();
        assert_eq!(consumed, bytes.len());
        MetaRecord::decode(body, version, 0).unwrap()
    }

    #[test]
    fn test_frame_lengths_match() {
        let framed = frame(b"abc");
        assert_eq!(framed.len(), 3 + FRAME_OVERHEAD);
        assert_eq!(&framed[0..4], &framed[7..11]);
        let (body, consumed) = unframe(&framed, 0).unwrap();
        assert_eq!(body, b"abc");
        assert_eq!(consumed, framed.len());
    }

    #[test]
    fn test_unframe_rejects_bad_trailer() {
        let mut framed = frame(b"abcd");
        let last = framed.len() - 1;
        framed[last] ^= 0x01;
        assert!(matches!(
            unframe(&framed, 128),
            Err(ArchiveError::Decode(DecodeError::MalformedRecord { offset: 128, .. }))
        ));
    }

    #[test]
    fn test_unframe_short_buffer() {
        let framed = frame(b"abcdef");
        assert!(matches!(
            unframe(&framed[..6], 0),
            Err(ArchiveError::Decode(DecodeError::BufferTooShort { .. }))
        ));
    }

    #[test]
    fn test_desc_record() {
        let record = MetaRecord::Desc(sample_desc());
        let bytes = record.encode(LogVersion::V3);
        assert_eq!(decode_meta(&bytes, LogVersion::V3), record);
    }

    #[test]
    fn test_indom_record_type_depends_on_version() {
        let record = MetaRecord::InDom {
            timestamp: Timestamp::new(100, 250_000_000),
            indom: InDomId::new(60, 0),
            instances: vec![Instance::new(0, "red"), Instance::new(1, "blue")],
        };
        assert_eq!(record.type_tag(LogVersion::V2), TYPE_INDOM_V2);
        assert_eq!(record.type_tag(LogVersion::V3), TYPE_INDOM);

        let v2 = record.encode(LogVersion::V2);
        let v3 = record.encode(LogVersion::V3);
        assert_eq!(v3.len() - v2.len(), 4);
        assert_eq!(decode_meta(&v2, LogVersion::V2), record);
    }

    #[test]
    fn test_label_record_keeps_instances() {
        let record = MetaRecord::Label {
            timestamp: Timestamp::new(5, 0),
            kind: LabelKind::Instances,
            ident: InDomId::new(60, 1).0,
            sets: vec![
                LabelSet::new(0, r#"{"device":"sda"}"#),
                LabelSet::new(1, r#"{"device":"sdb"}"#),
            ],
        };
        let bytes = record.encode(LogVersion::V3);
        assert_eq!(decode_meta(&bytes, LogVersion::V3), record);
    }

    #[test]
    fn test_unknown_meta_type() {
        let mut body = Vec::new();
        body.extend_from_slice(&99u32.to_le_bytes());
        assert_eq!(
            MetaRecord::decode(&body, LogVersion::V3, 0),
            Err(ArchiveError::Decode(DecodeError::UnknownRecordType(99)))
        );
    }

    #[test]
    fn test_result_preserves_value_order_and_types() {
        let record = ResultRecord::new(Timestamp::new(100, 0))
            .with_vset(
                ValueSet::new(MetricId::new(60, 0, 4))
                    .with_value(0, Value::U64(10))
                    .with_value(1, Value::U64(20)),
            )
            .with_vset(ValueSet::singular(
                MetricId::new(60, 1, 0),
                Value::String("up".to_string()),
            ))
            .with_vset(ValueSet::singular(MetricId::new(60, 1, 1), Value::Double(0.5)));

        let bytes = encode_result(&record, LogVersion::V3);
        let (body, _) = unframe(&bytes, 0).unwrap();
        let decoded = decode_result(body, LogVersion::V3, 0).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.vsets[1].values[0].inst, PM_IN_NULL);
    }

    #[test]
    fn test_mark_record_is_empty_result() {
        let mark = ResultRecord::new(Timestamp::new(7, 1_000_000));
        let bytes = encode_result(&mark, LogVersion::V3);
        assert_eq!(bytes.len(), FRAME_OVERHEAD + 12 + 4);
        let (body, _) = unframe(&bytes, 0).unwrap();
        assert!(decode_result(body, LogVersion::V3, 0).unwrap().is_mark());
    }

    #[test]
    fn test_index_entry_size() {
        let entry = IndexEntry {
            timestamp: Timestamp::new(100, 0),
            vol: 0,
            meta_offset: 132,
            data_offset: 88,
        };
        for version in [LogVersion::V2, LogVersion::V3] {
            let bytes = entry.encode(version);
            assert_eq!(bytes.len(), IndexEntry::encoded_size(version));
            assert_eq!(IndexEntry::decode(&bytes, version, 0).unwrap(), entry);
        }
    }

    #[test]
    fn test_truncated_result_is_an_error() {
        let record = ResultRecord::new(Timestamp::new(1, 0))
            .with_vset(ValueSet::singular(MetricId::new(1, 0, 0), Value::I64(-3)));
        let bytes = encode_result(&record, LogVersion::V3);
        let (body, _) = unframe(&bytes, 0).unwrap();
        assert!(decode_result(&body[..body.len() - 2], LogVersion::V3, 0).is_err());
    }
}
