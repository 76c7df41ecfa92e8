//! # pmarch - Performance Metrics Archive writer
//!
//! Creates and appends to on-disk archives of performance metric samples.
//!
//! An archive is a set of files sharing a base path:
//!
//! - `<base>.meta`: metric descriptors, instance domains, help text, labels
//! - `<base>.index`: temporal index from timestamps to file offsets
//! - `<base>.0`, `<base>.1`, ...: data volumes of timestamped results
//!
//! ## Key Features
//!
//! - **Lazy start**: the archive is created (or reopened) on the first write
//! - **Write-once metadata**: each descriptor and instance domain is written
//!   once, and checked against what is already on disk when appending
//! - **Volume rollover**: data volumes switch at a configurable size ceiling
//! - **Temporal index**: entries always point at metadata that precedes
//!   the indexed record
//!
//! ## Quick Start
//!
//! ```rust
//! use pmarch::{
//!     ArchiveContext, Descriptor, InDomId, MetricId, ResultRecord, Semantics, Timestamp, Units,
//!     Value, ValueSet, ValueType,
//! };
//!
//! let dir = tempfile::tempdir().unwrap();
//! let mut ctx = ArchiveContext::create(dir.path().join("archive"));
//!
//! let pmid = MetricId::new(60, 0, 4);
//! let indom = InDomId::new(60, 1);
//! ctx.add_metric(Descriptor::new(
//!     pmid,
//!     "disk.dev.read",
//!     ValueType::U64,
//!     Some(indom),
//!     Semantics::Counter,
//!     Units::count(),
//! ))
//! .unwrap();
//! ctx.add_instance(indom, 0, "sda").unwrap();
//! ctx.add_instance(indom, 1, "sdb").unwrap();
//!
//! let record = ResultRecord::new(Timestamp::new(1_700_000_000, 0)).with_vset(
//!     ValueSet::new(pmid)
//!         .with_value(1, Value::U64(42))
//!         .with_value(0, Value::U64(17)),
//! );
//! ctx.put_result(record).unwrap();
//! ctx.end().unwrap();
//! ```
//!
//! ## Modules
//!
//! - [`context`]: Archive context lifecycle, text, labels and marks
//! - [`writer`]: Result writing, volume rollover
//! - [`registry`]: Write-once metadata tracking
//! - [`index`]: Temporal index maintenance
//! - [`volume`]: Volume files and offsets
//! - [`codec`]: On-disk record encoding
//! - [`label`]: Volume labels
//! - [`reader`]: Reading archives back
//! - [`metrics`]: Write statistics

// Modules
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod index;
pub mod label;
pub mod metrics;
pub mod reader;
pub mod registry;
pub mod types;
pub mod volume;
pub mod writer;

// Re-exports for convenient access
pub use codec::{IndexEntry, MetaRecord};
pub use config::{ArchiveConfig, DEFAULT_FLUSH_SIZE, MAX_VOLUME_SIZE_ENV};
pub use context::{ArchiveContext, ContextState};
pub use error::{ArchiveError, DecodeError, LogFileError, MisuseError, Result, SchemaError};
pub use label::Label;
pub use metrics::WriteStats;
pub use reader::{ArchiveReader, MetadataIndex};
pub use registry::{MetadataSink, Registry};
pub use types::{
    Descriptor, InDomId, Instance, InstanceValue, LabelKind, LabelSet, LogVersion, MetricId,
    ResultRecord, Semantics, TextKind, TextTarget, Timestamp, Units, Value, ValueSet, ValueType,
    PM_IN_NULL,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
