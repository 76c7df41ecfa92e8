//! Error types for pmarch
//!
//! This module defines all error types used throughout the library.
//! Errors fall into four families:
//!
//! - [`LogFileError`]: filesystem failures, fatal to the session
//! - [`SchemaError`]: descriptor conflicts found while appending
//! - [`MisuseError`]: the caller did something the archive cannot accept
//! - [`DecodeError`]: malformed bytes read back from disk

use crate::types::{InDomId, MetricId};
use std::path::Path;
use thiserror::Error;

/// Result type alias for pmarch operations
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Main error type for archive operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArchiveError {
    /// Storage failure
    #[error("Log file error: {0}")]
    LogFile(#[from] LogFileError),

    /// Descriptor conflict with the archive on disk
    #[error("Schema conflict: {0}")]
    Schema(#[from] SchemaError),

    /// Caller misuse
    #[error("Misuse: {0}")]
    Misuse(#[from] MisuseError),

    /// Malformed archive contents
    #[error("Decoding error: {0}")]
    Decode(#[from] DecodeError),
}

impl ArchiveError {
    /// Whether the session must be abandoned after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ArchiveError::LogFile(_))
    }
}

/// Filesystem failures on one of the archive volumes
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LogFileError {
    /// Volume could not be created
    #[error("cannot create {path}: {reason}")]
    Create { path: String, reason: String },

    /// Volume could not be opened
    #[error("cannot open {path}: {reason}")]
    Open { path: String, reason: String },

    /// Read failed
    #[error("cannot read {path}: {reason}")]
    Read { path: String, reason: String },

    /// Write or flush failed
    #[error("cannot write {path}: {reason}")]
    Write { path: String, reason: String },

    /// Seek or tell failed
    #[error("cannot seek {path}: {reason}")]
    Seek { path: String, reason: String },

    /// Existing archive could not be loaded
    #[error("corrupt archive {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

impl LogFileError {
    pub(crate) fn create(path: &Path, err: std::io::Error) -> Self {
        Self::Create {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn open(path: &Path, err: std::io::Error) -> Self {
        Self::Open {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn read(path: &Path, err: std::io::Error) -> Self {
        Self::Read {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn write(path: &Path, err: std::io::Error) -> Self {
        Self::Write {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn seek(path: &Path, err: std::io::Error) -> Self {
        Self::Seek {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

/// A descriptor already in the archive disagrees with the one being written
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// Value type changed
    #[error("metric {pmid}: value type changed")]
    ChangedType { pmid: MetricId },

    /// Instance domain changed
    #[error("metric {pmid}: instance domain changed")]
    ChangedInstanceDomain { pmid: MetricId },

    /// Semantics changed
    #[error("metric {pmid}: semantics changed")]
    ChangedSemantics { pmid: MetricId },

    /// Units changed
    #[error("metric {pmid}: units changed")]
    ChangedUnits { pmid: MetricId },
}

/// Calls the archive rejects without damaging the session
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MisuseError {
    /// Operation not allowed in the current state
    #[error("operation not allowed: archive context is {state}")]
    State { state: String },

    /// Metric not registered with this context
    #[error("unknown metric {0}")]
    UnknownMetric(MetricId),

    /// Instance domain not registered with this context
    #[error("unknown instance domain {0}")]
    UnknownInDom(InDomId),

    /// Metric id or name registered twice
    #[error("metric {pmid} ({name}) already registered")]
    DuplicateMetric { pmid: MetricId, name: String },

    /// Instance id or name registered twice in one domain
    #[error("instance {inst} ({name}) already in instance domain {indom}")]
    DuplicateInstance {
        indom: InDomId,
        inst: i32,
        name: String,
    },

    /// Values in a record do not fit the metric's instance domain
    #[error("metric {pmid}: {reason}")]
    InstanceMismatch { pmid: MetricId, reason: String },

    /// Value does not have the metric's declared type
    #[error("metric {pmid}: expected {expected} value, got {actual}")]
    ValueTypeMismatch {
        pmid: MetricId,
        expected: String,
        actual: String,
    },

    /// Label set content is not a JSON object
    #[error("invalid label set: {reason}")]
    InvalidLabelSet { reason: String },

    /// Text annotation target is not valid for the text kind
    #[error("invalid text target: {reason}")]
    InvalidText { reason: String },

    /// Label string longer than its length prefix can hold
    #[error("{field} is {len} bytes, at most {max} allowed")]
    FieldTooLong {
        field: String,
        len: usize,
        max: usize,
    },
}

/// Errors while decoding archive bytes
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Invalid label checksum
    #[error("Invalid checksum: expected {expected:08x}, got {actual:08x}")]
    InvalidChecksum { expected: u32, actual: u32 },

    /// Label does not start with the archive magic
    #[error("Invalid magic bytes")]
    BadMagic,

    /// Unsupported archive format version
    #[error("Unsupported archive version {0}")]
    UnsupportedVersion(u32),

    /// Malformed record
    #[error("Malformed record at offset {offset}: {reason}")]
    MalformedRecord { offset: u64, reason: String },

    /// Unknown metadata record type
    #[error("Unknown metadata record type: {0}")]
    UnknownRecordType(u32),

    /// Unknown value tag
    #[error("Unknown value tag: 0x{0:02x}")]
    UnknownValueTag(u8),

    /// Buffer too short
    #[error("Buffer too short: need at least {needed} bytes, got {available}")]
    BufferTooShort { needed: usize, available: usize },
}
