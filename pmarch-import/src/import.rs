// pmarch-import - CSV import into pmarch archives
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! CSV import.
//!
//! The first CSV column must be `timestamp_ms`. Every other column names a
//! metric, optionally with an instance in brackets:
//!
//! ```text
//! timestamp_ms,kernel.load,disk.read[sda],disk.read[sdb]
//! 1700000000000,0.52,120,98
//! ```
//!
//! Each metric becomes a double-valued instant metric; the bracketed
//! instances of one metric share an instance domain. Each row becomes one
//! result. Empty cells are left out, and a row with no values at all is
//! written as a mark record just after the previous row.
//!
//! When appending, metrics and instances already in the archive keep
//! their ids; new ones are numbered after the highest id on disk.

use crate::error::ImportError;
use pmarch::volume::{locate, Lookup};
use pmarch::{
    ArchiveConfig, ArchiveContext, ContextState, Descriptor, InDomId, Instance, LogVersion,
    MetadataIndex, MetricId, ResultRecord, Semantics, Timestamp, Units, Value, ValueSet,
    ValueType, WriteStats, PM_IN_NULL,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Performance metric domain used for imported metrics
pub const IMPORT_DOMAIN: u32 = 245;

/// Configuration for one import run.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// CSV file to read.
    pub csv_path: PathBuf,
    /// Archive base path.
    pub archive: PathBuf,
    /// Append to the archive if it exists.
    pub append: bool,
    /// Hostname for a new archive.
    pub hostname: Option<String>,
    /// Timezone for a new archive.
    pub timezone: Option<String>,
    /// Format version for a new archive.
    pub version: LogVersion,
}

impl ImportConfig {
    /// Archive settings for this import.
    pub fn archive_config(&self) -> ArchiveConfig {
        let mut config = ArchiveConfig::new(&self.archive)
            .append(self.append)
            .version(self.version);
        if let Some(host) = &self.hostname {
            config = config.hostname(host.clone());
        }
        if let Some(tz) = &self.timezone {
            config = config.timezone(tz.clone());
        }
        config
    }
}

/// A metric named by one or more columns.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedMetric {
    pub name: String,
    pub pmid: MetricId,
    pub indom: Option<InDomId>,
    /// Instances to register, in id order for a fresh layout.
    pub instances: Vec<Instance>,
}

/// Where a CSV column's values go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    /// Index into [`CsvLayout::metrics`].
    pub metric: usize,
    /// Instance id, [`PM_IN_NULL`] for singular metrics.
    pub inst: i32,
}

/// Metrics and column mapping derived from the CSV header.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvLayout {
    pub metrics: Vec<ImportedMetric>,
    pub columns: Vec<Column>,
}

/// Split `name[instance]` into its parts.
fn split_column(header: &str) -> Result<(&str, Option<&str>), ImportError> {
    let header = header.trim();
    match header.find('[') {
        None => Ok((header, None)),
        Some(open) => {
            let inst = header[open + 1..].strip_suffix(']').ok_or_else(|| {
                ImportError::InvalidFormat(format!("unterminated instance in column '{}'", header))
            })?;
            let name = header[..open].trim();
            if inst.is_empty() {
                return Err(ImportError::InvalidFormat(format!(
                    "empty instance in column '{}'",
                    header
                )));
            }
            Ok((name, Some(inst)))
        }
    }
}

impl CsvLayout {
    /// Build the layout from the CSV header row.
    pub fn from_headers(headers: &[&str]) -> Result<Self, ImportError> {
        if headers.first().map(|h| h.trim()) != Some("timestamp_ms") {
            return Err(ImportError::InvalidFormat(
                "First column must be 'timestamp_ms'".to_string(),
            ));
        }

        let mut metrics: Vec<ImportedMetric> = Vec::new();
        let mut columns = Vec::with_capacity(headers.len() - 1);

        for header in &headers[1..] {
            let (name, inst) = split_column(header)?;
            if name.is_empty() {
                return Err(ImportError::InvalidFormat(format!(
                    "column '{}' has no metric name",
                    header
                )));
            }

            let index = match metrics.iter().position(|m| m.name == name) {
                Some(index) => index,
                None => {
                    let item = metrics.len() as u32;
                    metrics.push(ImportedMetric {
                        name: name.to_string(),
                        pmid: MetricId::new(IMPORT_DOMAIN, 0, item),
                        indom: inst.map(|_| InDomId::new(IMPORT_DOMAIN, item)),
                        instances: Vec::new(),
                    });
                    metrics.len() - 1
                }
            };
            let metric = &mut metrics[index];

            let id = match (inst, metric.indom) {
                (None, None) => {
                    if columns.iter().any(|c: &Column| c.metric == index) {
                        return Err(ImportError::InvalidFormat(format!(
                            "column '{}' repeated",
                            header
                        )));
                    }
                    PM_IN_NULL
                }
                (Some(inst), Some(_)) => {
                    if metric.instances.iter().any(|i| i.name == inst) {
                        return Err(ImportError::InvalidFormat(format!(
                            "column '{}' repeated",
                            header
                        )));
                    }
                    let id = metric.instances.len() as i32;
                    metric.instances.push(Instance::new(id, inst));
                    id
                }
                _ => {
                    return Err(ImportError::InvalidFormat(format!(
                        "metric '{}' mixes singular and per-instance columns",
                        name
                    )))
                }
            };

            columns.push(Column {
                metric: index,
                inst: id,
            });
        }

        Ok(Self { metrics, columns })
    }

    /// Renumber metrics and instances to match an archive being appended to.
    ///
    /// Names already on disk take their on-disk metric, instance domain and
    /// instance ids, and the on-disk instances stay registered. New names
    /// are numbered after the highest ids on disk in [`IMPORT_DOMAIN`].
    pub fn reconcile(&mut self, ondisk: &MetadataIndex) -> Result<(), ImportError> {
        let mut next = ondisk
            .descriptors()
            .filter(|d| d.pmid.domain() == IMPORT_DOMAIN)
            .map(|d| d.pmid.item() + 1)
            .chain(
                ondisk
                    .indom_ids()
                    .filter(|i| i.domain() == IMPORT_DOMAIN)
                    .map(|i| i.serial() + 1),
            )
            .max()
            .unwrap_or(0);

        for (index, metric) in self.metrics.iter_mut().enumerate() {
            let desc = match ondisk.lookup_name(&metric.name) {
                Some(desc) => desc,
                None => {
                    metric.pmid = MetricId::new(IMPORT_DOMAIN, 0, next);
                    metric.indom = metric.indom.map(|_| InDomId::new(IMPORT_DOMAIN, next));
                    next += 1;
                    continue;
                }
            };

            match (desc.indom, metric.indom.is_some()) {
                (None, false) => {}
                (Some(indom), true) => {
                    let disk = ondisk.latest_indom(indom).unwrap_or(&[]);
                    let mut merged: Vec<Instance> = disk.to_vec();
                    let mut next_inst = disk.iter().map(|i| i.id + 1).max().unwrap_or(0);
                    let mut renumber = HashMap::new();
                    for inst in &metric.instances {
                        let id = match disk.iter().find(|d| d.name == inst.name) {
                            Some(d) => d.id,
                            None => {
                                let id = next_inst;
                                next_inst += 1;
                                merged.push(Instance::new(id, inst.name.clone()));
                                id
                            }
                        };
                        renumber.insert(inst.id, id);
                    }
                    for column in self.columns.iter_mut().filter(|c| c.metric == index) {
                        if let Some(&id) = renumber.get(&column.inst) {
                            column.inst = id;
                        }
                    }
                    metric.instances = merged;
                }
                (Some(_), false) => {
                    return Err(ImportError::InvalidFormat(format!(
                        "metric '{}' has instances in the archive but not in the CSV",
                        metric.name
                    )))
                }
                (None, true) => {
                    return Err(ImportError::InvalidFormat(format!(
                        "metric '{}' has no instances in the archive",
                        metric.name
                    )))
                }
            }

            debug!("{}: reusing {} from the archive", metric.name, desc.pmid);
            metric.pmid = desc.pmid;
            metric.indom = desc.indom;
        }
        Ok(())
    }

    /// Register every metric and instance with the archive.
    pub fn register(&self, ctx: &mut ArchiveContext) -> Result<(), ImportError> {
        for metric in &self.metrics {
            ctx.add_metric(Descriptor::new(
                metric.pmid,
                metric.name.clone(),
                ValueType::Double,
                metric.indom,
                Semantics::Instant,
                Units::NONE,
            ))?;
            if let Some(indom) = metric.indom {
                for inst in &metric.instances {
                    ctx.add_instance(indom, inst.id, &inst.name)?;
                }
            }
        }
        Ok(())
    }

    /// Turn one CSV row into a result.
    ///
    /// Unparseable cells are skipped with a warning. Returns the record
    /// and the number of values it carries.
    pub fn to_record(&self, line: u64, cells: &[&str]) -> Result<(ResultRecord, usize), ImportError> {
        let ms: i64 = cells
            .first()
            .map(|s| s.trim())
            .unwrap_or("")
            .parse()
            .map_err(|_| ImportError::InvalidFormat(format!("line {}: invalid timestamp", line)))?;

        let mut vsets: Vec<Option<ValueSet>> = vec![None; self.metrics.len()];
        let mut count = 0;
        for (column, cell) in self.columns.iter().zip(cells.iter().skip(1)) {
            let cell = cell.trim();
            if cell.is_empty() {
                continue;
            }
            let value: f64 = match cell.parse() {
                Ok(v) => v,
                Err(_) => {
                    warn!(
                        "line {}: skipping unparseable value '{}' for {}",
                        line, cell, self.metrics[column.metric].name
                    );
                    continue;
                }
            };
            let slot = &mut vsets[column.metric];
            let vset = slot.get_or_insert_with(|| ValueSet::new(self.metrics[column.metric].pmid));
            vset.values
                .push(pmarch::InstanceValue::new(column.inst, Value::Double(value)));
            count += 1;
        }

        let mut record = ResultRecord::new(Timestamp::from_millis(ms));
        record.vsets = vsets.into_iter().flatten().collect();
        Ok((record, count))
    }
}

/// Outcome of an import run.
#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub rows: u64,
    pub values: u64,
    pub metrics: usize,
    pub appended: bool,
    pub stats: WriteStats,
}

/// Import a CSV file into an archive.
pub fn run(config: &ImportConfig) -> Result<ImportSummary, ImportError> {
    let path: &Path = &config.csv_path;
    if !path.exists() {
        return Err(ImportError::FileNotFound(path.display().to_string()));
    }

    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let header_strs: Vec<&str> = headers.iter().collect();
    let mut layout = CsvLayout::from_headers(&header_strs)?;
    if config.append {
        if let Lookup::Found(_) = locate(&config.archive) {
            let ondisk = MetadataIndex::load(&config.archive)?;
            layout.reconcile(&ondisk)?;
        }
    }
    info!(
        "{}: {} metrics in {} columns",
        path.display(),
        layout.metrics.len(),
        layout.columns.len()
    );

    let mut ctx = ArchiveContext::new(config.archive_config());
    layout.register(&mut ctx)?;

    let mut rows = 0u64;
    let mut values = 0u64;
    for result in reader.records() {
        let record = result?;
        let line = record.position().map(|p| p.line()).unwrap_or(rows + 2);
        let cells: Vec<&str> = record.iter().collect();
        if cells.is_empty() {
            continue;
        }

        let (result, count) = layout.to_record(line, &cells)?;
        if count == 0 {
            if ctx.state() == ContextState::Start {
                debug!("line {}: no values before the first sample, skipped", line);
                continue;
            }
            debug!("line {}: no values, writing a mark", line);
            ctx.put_mark()?;
        } else {
            ctx.put_result(result)?;
        }
        rows += 1;
        values += count as u64;
    }

    let appended = ctx.is_append();
    ctx.end()?;

    let summary = ImportSummary {
        rows,
        values,
        metrics: layout.metrics.len(),
        appended,
        stats: ctx.stats().clone(),
    };
    info!(
        "imported {} rows ({} values) into {}",
        summary.rows,
        summary.values,
        config.archive.display()
    );
    Ok(summary)
}
