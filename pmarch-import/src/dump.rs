// pmarch-import - CSV import into pmarch archives
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Human-readable archive dump.

use crate::error::ImportError;
use pmarch::{ArchiveReader, MetaRecord};
use std::io::Write;
use std::path::Path;

fn dump_meta(out: &mut impl Write, offset: u64, record: &MetaRecord) -> std::io::Result<()> {
    match record {
        MetaRecord::Desc(desc) => {
            let indom = desc
                .indom
                .map(|i| i.to_string())
                .unwrap_or_else(|| "PM_INDOM_NULL".to_string());
            writeln!(
                out,
                "[{}] desc {} {} type={} indom={} sem={:?} units={:?}",
                offset, desc.pmid, desc.name, desc.value_type, indom, desc.semantics, desc.units
            )
        }
        MetaRecord::InDom {
            timestamp,
            indom,
            instances,
        } => {
            writeln!(
                out,
                "[{}] indom {} @ {}: {} instances",
                offset,
                indom,
                timestamp,
                instances.len()
            )?;
            for inst in instances {
                writeln!(out, "      {} {:?}", inst.id, inst.name)?;
            }
            Ok(())
        }
        MetaRecord::Text { target, kind, text } => {
            writeln!(out, "[{}] text {:?} {:?}: {:?}", offset, target, kind, text)
        }
        MetaRecord::Label {
            timestamp,
            kind,
            ident,
            sets,
        } => {
            writeln!(
                out,
                "[{}] labels {:?} {} @ {}",
                offset, kind, ident, timestamp
            )?;
            for set in sets {
                writeln!(out, "      inst {}: {}", set.inst, set.json)?;
            }
            Ok(())
        }
    }
}

/// Write a readable listing of the archive at `base`.
pub fn dump(base: &Path, out: &mut impl Write) -> Result<(), ImportError> {
    let reader = ArchiveReader::open(base)?;
    let label = reader.label();

    writeln!(out, "Archive: {}", base.display())?;
    writeln!(out, "  version:  {}", label.version)?;
    writeln!(out, "  host:     {}", label.hostname)?;
    writeln!(out, "  zone:     {}", label.zone())?;
    writeln!(out, "  start:    {}", label.start)?;
    writeln!(out, "  volumes:  {:?}", reader.volumes())?;

    writeln!(out, "\nMetadata:")?;
    for entry in reader.metadata().entries() {
        dump_meta(out, entry.offset, &entry.record)?;
    }

    writeln!(out, "\nTemporal index:")?;
    for entry in reader.index() {
        writeln!(
            out,
            "  {} vol {} meta {} data {}",
            entry.timestamp, entry.vol, entry.meta_offset, entry.data_offset
        )?;
    }

    writeln!(out, "\nResults:")?;
    for &vol in reader.volumes() {
        let (_, results) = reader.volume(vol)?;
        for (offset, result) in results {
            if result.is_mark() {
                writeln!(out, "{} <mark> (vol {} @ {})", result.timestamp, vol, offset)?;
                continue;
            }
            writeln!(
                out,
                "{} {} metrics (vol {} @ {})",
                result.timestamp,
                result.vsets.len(),
                vol,
                offset
            )?;
            for vset in &result.vsets {
                let name = reader
                    .metadata()
                    .lookup_desc(vset.pmid)
                    .map(|d| d.name.as_str())
                    .unwrap_or("?");
                for v in &vset.values {
                    writeln!(out, "    {} ({}) [{}] = {}", vset.pmid, name, v.inst, v.value)?;
                }
            }
        }
    }
    Ok(())
}
