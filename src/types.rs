//! Core archive types
//!
//! This module defines the values that flow into an archive:
//! - Metric and instance-domain identifiers
//! - Metric descriptors (type, semantics, units)
//! - Timestamped result records
//! - Text annotations and label sets

use std::fmt;

/// Instance id used by metrics without an instance domain
pub const PM_IN_NULL: i32 = -1;

/// Archive format version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u32)]
pub enum LogVersion {
    /// Legacy format, 32-bit second timestamps and 2 GiB volumes
    V2 = 2,
    /// Current format, 64-bit timestamps with nanoseconds
    #[default]
    V3 = 3,
}

impl LogVersion {
    /// Convert from u32
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            2 => Some(LogVersion::V2),
            3 => Some(LogVersion::V3),
            _ => None,
        }
    }

    /// Encoded size of a timestamp in this format
    pub fn timestamp_size(&self) -> usize {
        match self {
            LogVersion::V2 => 8,
            LogVersion::V3 => 12,
        }
    }

    /// Data volume size ceiling used when nothing else is configured
    pub fn default_max_volume_size(&self) -> u64 {
        match self {
            LogVersion::V2 => 0x7fff_ffff,
            LogVersion::V3 => i64::MAX as u64,
        }
    }
}

impl fmt::Display for LogVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", *self as u32)
    }
}

/// A point in time, seconds and nanoseconds since the epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    /// Whole seconds
    pub sec: i64,
    /// Nanoseconds within the second
    pub nsec: u32,
}

impl Timestamp {
    /// Create a timestamp, normalizing excess nanoseconds into seconds
    pub fn new(sec: i64, nsec: u32) -> Self {
        Self {
            sec: sec + (nsec / 1_000_000_000) as i64,
            nsec: nsec % 1_000_000_000,
        }
    }

    /// Timestamp from milliseconds since the epoch
    pub fn from_millis(ms: i64) -> Self {
        Self {
            sec: ms.div_euclid(1000),
            nsec: (ms.rem_euclid(1000) * 1_000_000) as u32,
        }
    }

    /// Timestamp from seconds and microseconds (V2 precision)
    pub fn from_micros(sec: i64, usec: u32) -> Self {
        Self::new(sec, usec.saturating_mul(1000))
    }

    /// Microsecond part (V2 precision)
    pub fn usec(&self) -> u32 {
        self.nsec / 1000
    }

    /// This timestamp shifted forward by `ms` milliseconds
    pub fn add_millis(&self, ms: u32) -> Self {
        let total = self.nsec as u64 + ms as u64 * 1_000_000;
        Self {
            sec: self.sec + (total / 1_000_000_000) as i64,
            nsec: (total % 1_000_000_000) as u32,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nsec)
    }
}

/// Metric identifier: domain (9 bits), cluster (12 bits), item (10 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricId(pub u32);

impl MetricId {
    /// Build an id from its parts
    pub fn new(domain: u32, cluster: u32, item: u32) -> Self {
        Self(((domain & 0x1ff) << 22) | ((cluster & 0xfff) << 10) | (item & 0x3ff))
    }

    pub fn domain(&self) -> u32 {
        (self.0 >> 22) & 0x1ff
    }

    pub fn cluster(&self) -> u32 {
        (self.0 >> 10) & 0xfff
    }

    pub fn item(&self) -> u32 {
        self.0 & 0x3ff
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.domain(), self.cluster(), self.item())
    }
}

/// Instance domain identifier: domain (9 bits), serial (22 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InDomId(pub u32);

impl InDomId {
    /// Wire value for "no instance domain"
    pub const NULL_WIRE: u32 = 0xffff_ffff;

    /// Build an id from its parts
    pub fn new(domain: u32, serial: u32) -> Self {
        Self(((domain & 0x1ff) << 22) | (serial & 0x3f_ffff))
    }

    pub fn domain(&self) -> u32 {
        (self.0 >> 22) & 0x1ff
    }

    pub fn serial(&self) -> u32 {
        self.0 & 0x3f_ffff
    }

    /// Encode an optional domain for the wire
    pub fn to_wire(indom: Option<InDomId>) -> u32 {
        indom.map(|i| i.0).unwrap_or(Self::NULL_WIRE)
    }

    /// Decode an optional domain from the wire
    pub fn from_wire(value: u32) -> Option<InDomId> {
        if value == Self::NULL_WIRE {
            None
        } else {
            Some(InDomId(value))
        }
    }
}

impl fmt::Display for InDomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain(), self.serial())
    }
}

/// Data type of a metric's values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    I32 = 0,
    U32 = 1,
    I64 = 2,
    U64 = 3,
    Float = 4,
    Double = 5,
    String = 6,
    Aggregate = 7,
}

impl ValueType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ValueType::I32),
            1 => Some(ValueType::U32),
            2 => Some(ValueType::I64),
            3 => Some(ValueType::U64),
            4 => Some(ValueType::Float),
            5 => Some(ValueType::Double),
            6 => Some(ValueType::String),
            7 => Some(ValueType::Aggregate),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::I32 => "32",
            ValueType::U32 => "U32",
            ValueType::I64 => "64",
            ValueType::U64 => "U64",
            ValueType::Float => "FLOAT",
            ValueType::Double => "DOUBLE",
            ValueType::String => "STRING",
            ValueType::Aggregate => "AGGREGATE",
        };
        write!(f, "{}", name)
    }
}

/// How successive values of a metric relate to each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Semantics {
    /// Monotonically increasing counter
    Counter = 1,
    /// Instantaneous value
    #[default]
    Instant = 3,
    /// Value that rarely changes
    Discrete = 4,
}

impl Semantics {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Semantics::Counter),
            3 => Some(Semantics::Instant),
            4 => Some(Semantics::Discrete),
            _ => None,
        }
    }
}

/// Dimension and scale of a metric's values
///
/// Dimensions are signed 4-bit quantities, scales unsigned 4-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Units {
    pub dim_space: i8,
    pub dim_time: i8,
    pub dim_count: i8,
    pub scale_space: u8,
    pub scale_time: u8,
    pub scale_count: u8,
}

impl Units {
    /// Dimensionless
    pub const NONE: Units = Units {
        dim_space: 0,
        dim_time: 0,
        dim_count: 0,
        scale_space: 0,
        scale_time: 0,
        scale_count: 0,
    };

    /// Event count
    pub fn count() -> Self {
        Self {
            dim_count: 1,
            ..Self::NONE
        }
    }

    /// Bytes, with the given space scale (0 = bytes, 1 = KiB, ...)
    pub fn bytes(scale: u8) -> Self {
        Self {
            dim_space: 1,
            scale_space: scale & 0xf,
            ..Self::NONE
        }
    }

    /// Pack into the 32-bit on-disk form
    pub fn pack(&self) -> u32 {
        let nib = |v: i8| (v as u8 & 0xf) as u32;
        (nib(self.dim_space) << 28)
            | (nib(self.dim_time) << 24)
            | (nib(self.dim_count) << 20)
            | (((self.scale_space & 0xf) as u32) << 16)
            | (((self.scale_time & 0xf) as u32) << 12)
            | (((self.scale_count & 0xf) as u32) << 8)
    }

    /// Unpack from the 32-bit on-disk form
    pub fn unpack(value: u32) -> Self {
        // sign-extend a 4-bit field
        let dim = |shift: u32| (((value >> shift) as u8) << 4) as i8 >> 4;
        let scale = |shift: u32| ((value >> shift) & 0xf) as u8;
        Self {
            dim_space: dim(28),
            dim_time: dim(24),
            dim_count: dim(20),
            scale_space: scale(16),
            scale_time: scale(12),
            scale_count: scale(8),
        }
    }
}

/// Metric descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    /// Metric identifier
    pub pmid: MetricId,
    /// External metric name
    pub name: String,
    /// Type of every value of this metric
    pub value_type: ValueType,
    /// Instance domain, `None` for singular metrics
    pub indom: Option<InDomId>,
    /// Value semantics
    pub semantics: Semantics,
    /// Value units
    pub units: Units,
}

impl Descriptor {
    /// Create a descriptor
    pub fn new(
        pmid: MetricId,
        name: impl Into<String>,
        value_type: ValueType,
        indom: Option<InDomId>,
        semantics: Semantics,
        units: Units,
    ) -> Self {
        Self {
            pmid,
            name: name.into(),
            value_type,
            indom,
            semantics,
            units,
        }
    }
}

/// One instance of an instance domain
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instance {
    pub id: i32,
    pub name: String,
}

impl Instance {
    pub fn new(id: i32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// A single metric value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Aggregate(Vec<u8>),
}

impl Value {
    /// Type of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::I32(_) => ValueType::I32,
            Value::U32(_) => ValueType::U32,
            Value::I64(_) => ValueType::I64,
            Value::U64(_) => ValueType::U64,
            Value::Float(_) => ValueType::Float,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::Aggregate(_) => ValueType::Aggregate,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{:?}", v),
            Value::Aggregate(v) => write!(f, "[{} bytes]", v.len()),
        }
    }
}

/// Value of one metric for one instance
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceValue {
    pub inst: i32,
    pub value: Value,
}

impl InstanceValue {
    pub fn new(inst: i32, value: Value) -> Self {
        Self { inst, value }
    }
}

/// All values of one metric within a result
#[derive(Debug, Clone, PartialEq)]
pub struct ValueSet {
    pub pmid: MetricId,
    pub values: Vec<InstanceValue>,
}

impl ValueSet {
    pub fn new(pmid: MetricId) -> Self {
        Self {
            pmid,
            values: Vec::new(),
        }
    }

    /// Value set of a singular metric
    pub fn singular(pmid: MetricId, value: Value) -> Self {
        Self {
            pmid,
            values: vec![InstanceValue::new(PM_IN_NULL, value)],
        }
    }

    /// Add a value for an instance
    pub fn with_value(mut self, inst: i32, value: Value) -> Self {
        self.values.push(InstanceValue::new(inst, value));
        self
    }

    /// Sort values into ascending instance order
    pub fn sort_instances(&mut self) {
        self.values.sort_by_key(|v| v.inst);
    }
}

/// A timestamped set of metric values
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultRecord {
    pub timestamp: Timestamp,
    pub vsets: Vec<ValueSet>,
}

impl ResultRecord {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            vsets: Vec::new(),
        }
    }

    /// Add a value set
    pub fn with_vset(mut self, vset: ValueSet) -> Self {
        self.vsets.push(vset);
        self
    }

    /// A mark record carries no values
    pub fn is_mark(&self) -> bool {
        self.vsets.is_empty()
    }

    /// Sort every value set into ascending instance order
    pub fn sort_instances(&mut self) {
        for vset in &mut self.vsets {
            vset.sort_instances();
        }
    }
}

/// What a text annotation describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextTarget {
    Metric(MetricId),
    InDom(InDomId),
}

impl TextTarget {
    /// Raw target id
    pub fn ident(&self) -> u32 {
        match self {
            TextTarget::Metric(pmid) => pmid.0,
            TextTarget::InDom(indom) => indom.0,
        }
    }
}

/// Kind of text annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextKind {
    /// Short one-line help
    OneLine,
    /// Full help text
    Help,
}

/// Bit flags stored for text records
pub(crate) const TEXT_ONELINE: u32 = 1;
pub(crate) const TEXT_HELP: u32 = 2;
pub(crate) const TEXT_PMID: u32 = 4;
pub(crate) const TEXT_INDOM: u32 = 8;

/// Pack a text target and kind into on-disk flags
pub(crate) fn text_flags(target: TextTarget, kind: TextKind) -> u32 {
    let k = match kind {
        TextKind::OneLine => TEXT_ONELINE,
        TextKind::Help => TEXT_HELP,
    };
    let t = match target {
        TextTarget::Metric(_) => TEXT_PMID,
        TextTarget::InDom(_) => TEXT_INDOM,
    };
    k | t
}

/// Unpack on-disk text flags and ident
pub(crate) fn text_from_flags(flags: u32, ident: u32) -> Option<(TextTarget, TextKind)> {
    let kind = if flags & TEXT_ONELINE != 0 {
        TextKind::OneLine
    } else if flags & TEXT_HELP != 0 {
        TextKind::Help
    } else {
        return None;
    };
    let target = if flags & TEXT_PMID != 0 {
        TextTarget::Metric(MetricId(ident))
    } else if flags & TEXT_INDOM != 0 {
        TextTarget::InDom(InDomId(ident))
    } else {
        return None;
    };
    Some((target, kind))
}

/// Level of the hierarchy a label set applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum LabelKind {
    Context = 1 << 0,
    Domain = 1 << 1,
    Cluster = 1 << 2,
    Item = 1 << 3,
    InDom = 1 << 4,
    Instances = 1 << 5,
}

impl LabelKind {
    /// Convert from u32
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(LabelKind::Context),
            2 => Some(LabelKind::Domain),
            4 => Some(LabelKind::Cluster),
            8 => Some(LabelKind::Item),
            16 => Some(LabelKind::InDom),
            32 => Some(LabelKind::Instances),
            _ => None,
        }
    }
}

/// Labels for one instance (or the whole target when `inst` is `PM_IN_NULL`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    pub inst: i32,
    /// JSON object text, e.g. `{"hostname":"web1"}`
    pub json: String,
}

impl LabelSet {
    pub fn new(inst: i32, json: impl Into<String>) -> Self {
        Self {
            inst,
            json: json.into(),
        }
    }
}
