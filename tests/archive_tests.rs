// pmarch - Performance metrics archive writer
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Integration tests for archive writing
//!
//! These tests write archives through [`ArchiveContext`] and read them
//! back with [`ArchiveReader`], covering metadata deduplication, instance
//! ordering, index placement, volume rollover, append reconciliation and
//! finalization.

use pmarch::volume::{data_path, index_path, meta_path};
use pmarch::{
    ArchiveConfig, ArchiveContext, ArchiveError, ArchiveReader, ContextState, Descriptor, InDomId,
    Instance, LabelKind, LabelSet, LogFileError, LogVersion, MetaRecord, MetricId, MisuseError,
    ResultRecord, SchemaError, Semantics, TextKind, TextTarget, Timestamp, Units, Value, ValueSet,
    ValueType,
};
use rand::seq::SliceRandom;
use std::path::Path;
use tempfile::tempdir;

const M: MetricId = MetricId(0x0040_0001);
const D: InDomId = InDomId(0x0040_0001);

/// Counter metric M over instance domain D
fn metric_m() -> Descriptor {
    Descriptor::new(
        M,
        "sample.colour.count",
        ValueType::U64,
        Some(D),
        Semantics::Counter,
        Units::count(),
    )
}

fn singular(pmid: MetricId, name: &str) -> Descriptor {
    Descriptor::new(
        pmid,
        name,
        ValueType::Double,
        None,
        Semantics::Instant,
        Units::NONE,
    )
}

/// Context with M and D = {(0,"red"), (1,"blue")} registered
fn context_with_m(base: &Path) -> ArchiveContext {
    let mut ctx = ArchiveContext::new(
        ArchiveConfig::new(base)
            .hostname("testhost")
            .timezone("UTC+00:00"),
    );
    ctx.add_metric(metric_m()).unwrap();
    ctx.add_instance(D, 0, "red").unwrap();
    ctx.add_instance(D, 1, "blue").unwrap();
    ctx
}

fn m_record(sec: i64, values: &[(i32, u64)]) -> ResultRecord {
    let mut vset = ValueSet::new(M);
    for &(inst, v) in values {
        vset = vset.with_value(inst, Value::U64(v));
    }
    ResultRecord::new(Timestamp::new(sec, 0)).with_vset(vset)
}

fn count_descs(reader: &ArchiveReader) -> usize {
    reader
        .metadata()
        .entries()
        .iter()
        .filter(|e| matches!(e.record, MetaRecord::Desc(_)))
        .count()
}

fn count_indoms(reader: &ArchiveReader) -> usize {
    reader
        .metadata()
        .entries()
        .iter()
        .filter(|e| matches!(e.record, MetaRecord::InDom { .. }))
        .count()
}

#[test]
fn test_end_to_end_scenario() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("A");

    let mut ctx = context_with_m(&base);
    ctx.put_result(m_record(100, &[(1, 11), (0, 10)])).unwrap();
    ctx.end().unwrap();

    let reader = ArchiveReader::open(&base).unwrap();
    assert_eq!(reader.label().hostname, "testhost");
    assert_eq!(reader.label().start, Timestamp::new(100, 0));
    assert_eq!(reader.volumes(), &[0]);

    assert_eq!(count_descs(&reader), 1);
    assert_eq!(reader.metadata().lookup_desc(M), Some(&metric_m()));

    assert_eq!(count_indoms(&reader), 1);
    let members = reader
        .metadata()
        .lookup_indom(D, Timestamp::new(100, 0))
        .unwrap();
    assert_eq!(members.len(), 2);
    assert!(members.contains(&Instance::new(0, "red")));
    assert!(members.contains(&Instance::new(1, "blue")));

    let results = reader.results().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].timestamp, Timestamp::new(100, 0));
    let insts: Vec<i32> = results[0].vsets[0].values.iter().map(|v| v.inst).collect();
    assert_eq!(insts, vec![0, 1]);
    assert_eq!(results[0].vsets[0].values[0].value, Value::U64(10));
}

#[test]
fn test_metadata_written_once() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("arch");

    let mut ctx = context_with_m(&base);
    ctx.put_result(m_record(1, &[(0, 1)])).unwrap();
    ctx.put_result(m_record(2, &[(0, 2), (1, 3)])).unwrap();
    ctx.add_metric(metric_m()).unwrap();
    ctx.add_instance(D, 1, "blue").unwrap();
    ctx.put_result(m_record(3, &[(1, 4)])).unwrap();

    let target = TextTarget::Metric(M);
    ctx.put_text(target, TextKind::OneLine, "colour counts").unwrap();
    ctx.put_text(target, TextKind::OneLine, "colour counts").unwrap();

    let sets = vec![LabelSet::new(-1, r#"{"agent":"sample"}"#)];
    ctx.put_label(LabelKind::Context, 0, sets.clone()).unwrap();
    ctx.put_label(LabelKind::Context, 0, sets).unwrap();
    ctx.end().unwrap();

    let reader = ArchiveReader::open(&base).unwrap();
    let entries = reader.metadata().entries();
    assert_eq!(count_descs(&reader), 1);
    assert_eq!(count_indoms(&reader), 1);
    assert_eq!(
        entries
            .iter()
            .filter(|e| matches!(e.record, MetaRecord::Text { .. }))
            .count(),
        1
    );
    assert_eq!(
        entries
            .iter()
            .filter(|e| matches!(e.record, MetaRecord::Label { .. }))
            .count(),
        1
    );
    assert_eq!(
        reader.metadata().lookup_text(target, TextKind::OneLine),
        Some("colour counts")
    );
}

#[test]
fn test_new_instance_rewrites_indom() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("arch");

    let mut ctx = context_with_m(&base);
    ctx.put_result(m_record(1, &[(0, 1), (1, 1)])).unwrap();
    ctx.add_instance(D, 2, "green").unwrap();
    ctx.put_result(m_record(2, &[(2, 1)])).unwrap();
    ctx.end().unwrap();

    let reader = ArchiveReader::open(&base).unwrap();
    assert_eq!(count_descs(&reader), 1);
    assert_eq!(count_indoms(&reader), 2);
    let meta = reader.metadata();
    assert_eq!(meta.lookup_indom(D, Timestamp::new(1, 0)).unwrap().len(), 2);
    assert_eq!(meta.lookup_indom(D, Timestamp::new(2, 0)).unwrap().len(), 3);
}

#[test]
fn test_instances_written_in_ascending_order() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("arch");
    let pmid = MetricId::new(3, 0, 1);
    let indom = InDomId::new(3, 0);

    let mut ctx = ArchiveContext::create(&base);
    ctx.add_metric(Descriptor::new(
        pmid,
        "sample.many",
        ValueType::I64,
        Some(indom),
        Semantics::Instant,
        Units::NONE,
    ))
    .unwrap();

    let mut ids: Vec<i32> = (0..64).map(|i| i * 3 + 1).collect();
    for &id in &ids {
        ctx.add_instance(indom, id, &format!("inst-{}", id)).unwrap();
    }

    // submitted as 5 then 1
    ctx.add_instance(indom, 5, "inst-5").unwrap();
    let first = ValueSet::new(pmid)
        .with_value(5, Value::I64(-1))
        .with_value(1, Value::I64(-2));
    ctx.put_result(ResultRecord::new(Timestamp::new(1, 0)).with_vset(first))
        .unwrap();

    let mut rng = rand::thread_rng();
    for sec in 2..10 {
        ids.shuffle(&mut rng);
        let mut vset = ValueSet::new(pmid);
        for &id in &ids {
            vset = vset.with_value(id, Value::I64(id as i64 * sec));
        }
        ctx.put_result(ResultRecord::new(Timestamp::new(sec, 0)).with_vset(vset))
            .unwrap();
    }
    ctx.end().unwrap();

    let results = ArchiveReader::open(&base).unwrap().results().unwrap();
    assert_eq!(results.len(), 9);
    let first: Vec<(i32, Value)> = results[0].vsets[0]
        .values
        .iter()
        .map(|v| (v.inst, v.value.clone()))
        .collect();
    assert_eq!(first, vec![(1, Value::I64(-2)), (5, Value::I64(-1))]);

    for record in &results[1..] {
        let insts: Vec<i32> = record.vsets[0].values.iter().map(|v| v.inst).collect();
        assert_eq!(insts.len(), 64);
        assert!(insts.windows(2).all(|w| w[0] < w[1]));
        for v in &record.vsets[0].values {
            assert_eq!(v.value, Value::I64(v.inst as i64 * record.timestamp.sec));
        }
    }
}

#[test]
fn test_index_points_before_triggering_metadata() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("arch");
    let a = MetricId::new(1, 0, 1);
    let b = MetricId::new(1, 0, 2);

    let mut ctx = ArchiveContext::create(&base);
    ctx.add_metric(singular(a, "sample.a")).unwrap();
    ctx.add_metric(singular(b, "sample.b")).unwrap();

    ctx.put_result(
        ResultRecord::new(Timestamp::new(10, 0)).with_vset(ValueSet::singular(a, Value::Double(1.0))),
    )
    .unwrap();
    ctx.put_result(
        ResultRecord::new(Timestamp::new(20, 0))
            .with_vset(ValueSet::singular(a, Value::Double(2.0)))
            .with_vset(ValueSet::singular(b, Value::Double(3.0))),
    )
    .unwrap();
    ctx.end().unwrap();

    let reader = ArchiveReader::open(&base).unwrap();
    let entries = reader.metadata().entries();
    let desc_offset = |pmid: MetricId| {
        entries
            .iter()
            .find(|e| matches!(&e.record, MetaRecord::Desc(d) if d.pmid == pmid))
            .map(|e| e.offset)
            .unwrap()
    };

    let index = reader.index();
    assert_eq!(index.len(), 3);
    assert_eq!(index[0].timestamp, Timestamp::new(10, 0));
    assert_eq!(index[0].meta_offset, desc_offset(a));
    assert_eq!(index[1].timestamp, Timestamp::new(20, 0));
    assert_eq!(index[1].meta_offset, desc_offset(b));

    // data offsets point at the indexed records
    let (_, records) = reader.volume(0).unwrap();
    assert_eq!(index[0].data_offset, records[0].0);
    assert_eq!(index[1].data_offset, records[1].0);
}

#[test]
fn test_volume_rollover() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("arch");
    let pmid = MetricId::new(1, 0, 1);

    let mut ctx = ArchiveContext::new(ArchiveConfig::new(&base).max_volume_size(2048));
    ctx.add_metric(singular(pmid, "sample.load")).unwrap();

    let put = |ctx: &mut ArchiveContext, sec: i64| {
        ctx.put_result(
            ResultRecord::new(Timestamp::new(sec, 0))
                .with_vset(ValueSet::singular(pmid, Value::Double(sec as f64))),
        )
        .unwrap();
    };

    let mut sec = 0;
    while ctx.current_volume() != Some(1) {
        sec += 1;
        put(&mut ctx, sec);
        assert!(sec < 1000, "no rollover");
    }
    let rolled_at = sec;
    assert_eq!(ctx.stats().volume_switches, 1);

    let first_len = std::fs::metadata(data_path(&base, 0)).unwrap().len();
    assert!(first_len < 2048);

    for _ in 0..5 {
        sec += 1;
        put(&mut ctx, sec);
    }
    ctx.end().unwrap();

    assert_eq!(std::fs::metadata(data_path(&base, 0)).unwrap().len(), first_len);
    assert!(!data_path(&base, 2).exists());

    let reader = ArchiveReader::open(&base).unwrap();
    assert_eq!(reader.volumes(), &[0, 1]);

    let (label, records) = reader.volume(1).unwrap();
    assert_eq!(label.vol, 1);
    assert_eq!(label.start, Timestamp::new(rolled_at, 0));
    assert_eq!(records.len(), 6);
    assert_eq!(records[0].1.timestamp, Timestamp::new(rolled_at, 0));

    // rollover forces an index entry into the new volume
    assert!(reader
        .index()
        .iter()
        .any(|e| e.vol == 1 && e.timestamp == Timestamp::new(rolled_at, 0)));
    assert_eq!(reader.results().unwrap().len(), sec as usize);
}

#[test]
fn test_append_identical_descriptor() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("arch");

    let mut ctx = context_with_m(&base);
    ctx.put_result(m_record(100, &[(0, 1), (1, 2)])).unwrap();
    ctx.end().unwrap();
    let meta_len = std::fs::metadata(meta_path(&base)).unwrap().len();

    let mut ctx = ArchiveContext::append(&base);
    ctx.add_metric(metric_m()).unwrap();
    ctx.add_instance(D, 1, "blue").unwrap();
    ctx.add_instance(D, 0, "red").unwrap();
    assert!(ctx.ensure_started().unwrap());
    assert!(ctx.is_append());
    assert_eq!(ctx.zone(), Some("UTC+00:00"));

    ctx.put_result(m_record(200, &[(1, 5), (0, 4)])).unwrap();
    assert_eq!(ctx.stats().metadata_records, 0);
    assert_eq!(ctx.stats().metadata_reused, 2);
    ctx.end().unwrap();

    assert_eq!(std::fs::metadata(meta_path(&base)).unwrap().len(), meta_len);

    let reader = ArchiveReader::open(&base).unwrap();
    assert_eq!(reader.label().hostname, "testhost");
    let results = reader.results().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[1].timestamp, Timestamp::new(200, 0));
}

#[test]
fn test_append_changed_type_rejected() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("arch");

    let mut ctx = context_with_m(&base);
    ctx.put_result(m_record(100, &[(0, 1)])).unwrap();
    ctx.end().unwrap();

    let mut ctx = ArchiveContext::append(&base);
    let mut changed = metric_m();
    changed.value_type = ValueType::Double;
    ctx.add_metric(changed).unwrap();
    ctx.add_instance(D, 0, "red").unwrap();
    ctx.add_metric(singular(MetricId::new(9, 0, 1), "sample.other"))
        .unwrap();

    let record = ResultRecord::new(Timestamp::new(200, 0))
        .with_vset(ValueSet::new(M).with_value(0, Value::Double(1.5)));
    let err = ctx.put_result(record).unwrap_err();
    assert_eq!(err, SchemaError::ChangedType { pmid: M }.into());
    assert!(!err.is_fatal());
    assert_eq!(ctx.stats().metadata_records, 0);

    // the context stays usable for other metrics
    assert_eq!(ctx.state(), ContextState::Active);
    ctx.put_result(
        ResultRecord::new(Timestamp::new(201, 0)).with_vset(ValueSet::singular(
            MetricId::new(9, 0, 1),
            Value::Double(2.0),
        )),
    )
    .unwrap();
    ctx.end().unwrap();

    let reader = ArchiveReader::open(&base).unwrap();
    assert_eq!(count_descs(&reader), 2);
    assert_eq!(reader.results().unwrap().len(), 2);
}

#[test]
fn test_append_indom_mismatch_writes_new_membership() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("arch");

    let mut ctx = context_with_m(&base);
    ctx.put_result(m_record(100, &[(0, 1)])).unwrap();
    ctx.end().unwrap();

    let mut ctx = ArchiveContext::append(&base);
    ctx.add_metric(metric_m()).unwrap();
    ctx.add_instance(D, 0, "red").unwrap();
    ctx.add_instance(D, 1, "navy").unwrap();
    ctx.put_result(m_record(200, &[(1, 1)])).unwrap();
    ctx.end().unwrap();

    let reader = ArchiveReader::open(&base).unwrap();
    assert_eq!(count_descs(&reader), 1);
    assert_eq!(count_indoms(&reader), 2);
    let now = reader
        .metadata()
        .lookup_indom(D, Timestamp::new(200, 0))
        .unwrap();
    assert!(now.contains(&Instance::new(1, "navy")));
}

#[test]
fn test_append_adopts_version_and_continues_last_volume() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("arch");
    let pmid = MetricId::new(1, 0, 1);

    let mut ctx = ArchiveContext::new(
        ArchiveConfig::new(&base)
            .version(LogVersion::V2)
            .max_volume_size(1024),
    );
    ctx.add_metric(singular(pmid, "sample.load")).unwrap();
    let mut sec = 0;
    while ctx.current_volume() != Some(1) {
        sec += 1;
        ctx.put_result(
            ResultRecord::new(Timestamp::new(sec, 250_000_000))
                .with_vset(ValueSet::singular(pmid, Value::Double(1.0))),
        )
        .unwrap();
    }
    ctx.end().unwrap();
    let first_len = std::fs::metadata(data_path(&base, 0)).unwrap().len();

    let mut ctx = ArchiveContext::new(
        ArchiveConfig::new(&base)
            .append(true)
            .version(LogVersion::V3)
            .max_volume_size(1024),
    );
    ctx.add_metric(singular(pmid, "sample.load")).unwrap();
    ctx.put_result(
        ResultRecord::new(Timestamp::new(sec + 1, 0))
            .with_vset(ValueSet::singular(pmid, Value::Double(2.0))),
    )
    .unwrap();
    assert_eq!(ctx.version(), LogVersion::V2);
    assert_eq!(ctx.current_volume(), Some(1));
    ctx.end().unwrap();

    assert_eq!(std::fs::metadata(data_path(&base, 0)).unwrap().len(), first_len);
    let reader = ArchiveReader::open(&base).unwrap();
    assert_eq!(reader.label().version, LogVersion::V2);
    let (_, records) = reader.volume(1).unwrap();
    assert_eq!(records.last().unwrap().1.timestamp, Timestamp::new(sec + 1, 0));
    // microsecond precision survives the V2 encoding
    assert_eq!(
        reader.results().unwrap()[0].timestamp,
        Timestamp::new(1, 250_000_000)
    );
}

#[test]
fn test_end_appends_one_index_entry() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("arch");

    let mut ctx = context_with_m(&base);
    ctx.put_result(m_record(100, &[(0, 1)])).unwrap();
    ctx.put_result(m_record(160, &[(0, 2)])).unwrap();
    let before = ctx.stats().index_entries;
    ctx.end().unwrap();
    assert_eq!(ctx.stats().index_entries, before + 1);
    assert_eq!(ctx.state(), ContextState::End);

    let reader = ArchiveReader::open(&base).unwrap();
    let index = reader.index();
    assert_eq!(index.len() as u64, before + 1);
    let last = index.last().unwrap();
    assert_eq!(last.timestamp, Timestamp::new(160, 0));
    assert_eq!(
        last.data_offset,
        std::fs::metadata(data_path(&base, 0)).unwrap().len()
    );

    assert_eq!(
        ctx.put_result(m_record(200, &[(0, 3)])),
        Err(MisuseError::State {
            state: "END".to_string()
        }
        .into())
    );
}

#[test]
fn test_mark_record() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("arch");

    let mut ctx = context_with_m(&base);
    ctx.put_result(m_record(100, &[(0, 1)])).unwrap();
    ctx.put_mark().unwrap();
    ctx.put_result(m_record(200, &[(0, 2)])).unwrap();
    ctx.end().unwrap();
    assert_eq!(ctx.stats().marks, 1);
    assert_eq!(ctx.stats().results, 2);

    let results = ArchiveReader::open(&base).unwrap().results().unwrap();
    assert_eq!(results.len(), 3);
    assert!(results[1].is_mark());
    assert_eq!(results[1].timestamp, Timestamp::new(100, 1_000_000));
}

#[test]
fn test_text_and_labels() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("arch");

    let mut ctx = context_with_m(&base);
    ctx.put_result(m_record(100, &[(0, 1)])).unwrap();
    ctx.put_text(TextTarget::InDom(D), TextKind::Help, "Colours seen by the sampler")
        .unwrap();
    ctx.put_label(
        LabelKind::Instances,
        D.0,
        vec![
            LabelSet::new(0, r#"{"hex":"ff0000"}"#),
            LabelSet::new(1, r#"{"hex":"0000ff"}"#),
        ],
    )
    .unwrap();

    let bad = ctx.put_label(LabelKind::Item, M.0, vec![LabelSet::new(-1, r#""x""#)]);
    assert!(matches!(
        bad,
        Err(ArchiveError::Misuse(MisuseError::InvalidLabelSet { .. }))
    ));
    let unknown = ctx.put_text(
        TextTarget::Metric(MetricId::new(7, 7, 7)),
        TextKind::OneLine,
        "?",
    );
    assert!(matches!(
        unknown,
        Err(ArchiveError::Misuse(MisuseError::UnknownMetric(_)))
    ));
    ctx.end().unwrap();

    let reader = ArchiveReader::open(&base).unwrap();
    let meta = reader.metadata();
    assert_eq!(
        meta.lookup_text(TextTarget::InDom(D), TextKind::Help),
        Some("Colours seen by the sampler")
    );
    let sets = meta.lookup_label(LabelKind::Instances, D.0).unwrap();
    assert_eq!(sets.len(), 2);
    assert_eq!(sets[1].json, r#"{"hex":"0000ff"}"#);

    // metadata already on disk is skipped on append
    let meta_len = std::fs::metadata(meta_path(&base)).unwrap().len();
    let mut ctx = ArchiveContext::append(&base);
    ctx.add_instance(D, 0, "red").unwrap();
    ctx.add_instance(D, 1, "blue").unwrap();
    ctx.put_text(TextTarget::InDom(D), TextKind::Help, "Colours seen by the sampler")
        .unwrap();
    ctx.end().unwrap();
    assert_eq!(std::fs::metadata(meta_path(&base)).unwrap().len(), meta_len);
}

#[test]
fn test_corrupt_archive_is_fatal_on_append() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("arch");

    let mut ctx = context_with_m(&base);
    ctx.put_result(m_record(100, &[(0, 1)])).unwrap();
    ctx.end().unwrap();

    let mut meta = std::fs::read(meta_path(&base)).unwrap();
    meta[6] ^= 0xff;
    std::fs::write(meta_path(&base), &meta).unwrap();

    let mut ctx = ArchiveContext::append(&base);
    let err = ctx.ensure_started().unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(ctx.state(), ContextState::Failed);
    assert!(ctx.end().is_err());
}

#[test]
fn test_truncated_index_is_fatal_on_append() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("arch");

    let mut ctx = context_with_m(&base);
    ctx.put_result(m_record(100, &[(0, 1)])).unwrap();
    ctx.end().unwrap();

    let index = std::fs::read(index_path(&base)).unwrap();
    std::fs::write(index_path(&base), &index[..index.len() - 3]).unwrap();
    let data_len = std::fs::metadata(data_path(&base, 0)).unwrap().len();

    let mut ctx = ArchiveContext::append(&base);
    ctx.add_metric(metric_m()).unwrap();
    ctx.add_instance(D, 0, "red").unwrap();
    ctx.add_instance(D, 1, "blue").unwrap();

    let err = ctx.put_result(m_record(200, &[(0, 2)])).unwrap_err();
    assert!(matches!(
        err,
        ArchiveError::LogFile(LogFileError::Corrupt { .. })
    ));
    assert_eq!(ctx.state(), ContextState::Failed);
    assert!(ctx.end().is_err());

    // nothing was appended to the damaged archive
    assert_eq!(
        std::fs::read(index_path(&base)).unwrap().len(),
        index.len() - 3
    );
    assert_eq!(
        std::fs::metadata(data_path(&base, 0)).unwrap().len(),
        data_len
    );
}

#[test]
fn test_bad_data_volume_label_is_fatal_on_append() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("arch");

    let mut ctx = context_with_m(&base);
    ctx.put_result(m_record(100, &[(0, 1)])).unwrap();
    ctx.end().unwrap();

    let mut data = std::fs::read(data_path(&base, 0)).unwrap();
    data[6] ^= 0xff;
    std::fs::write(data_path(&base, 0), &data).unwrap();

    let mut ctx = ArchiveContext::append(&base);
    let err = ctx.ensure_started().unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(ctx.state(), ContextState::Failed);
}

#[test]
fn test_distinct_contexts_in_parallel() {
    let dir = tempdir().unwrap();
    let handles: Vec<_> = (0..4)
        .map(|n| {
            let base = dir.path().join(format!("arch{}", n));
            std::thread::spawn(move || {
                let mut ctx = context_with_m(&base);
                for sec in 0..50 {
                    ctx.put_result(m_record(sec * (n + 1), &[(0, sec as u64)]))
                        .unwrap();
                }
                ctx.end().unwrap();
                base
            })
        })
        .collect();

    for (n, handle) in handles.into_iter().enumerate() {
        let base = handle.join().unwrap();
        let reader = ArchiveReader::open(&base).unwrap();
        let results = reader.results().unwrap();
        assert_eq!(results.len(), 50);
        assert_eq!(
            reader.index().last().unwrap().timestamp,
            Timestamp::new(49 * (n as i64 + 1), 0)
        );
    }
}
