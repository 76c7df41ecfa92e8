//! Stress tests for pmarch
//!
//! Run with: cargo test --release stress -- --ignored

use pmarch::*;
use std::time::Instant;
use tempfile::tempdir;

fn register(ctx: &mut ArchiveContext, metrics: u32, instances: i32) {
    let indom = InDomId::new(40, 0);
    for i in 0..instances {
        ctx.add_instance(indom, i, &format!("cpu{}", i)).unwrap();
    }
    for item in 0..metrics {
        ctx.add_metric(Descriptor::new(
            MetricId::new(40, 0, item),
            format!("stress.cpu.m{}", item),
            ValueType::U64,
            Some(indom),
            Semantics::Counter,
            Units::count(),
        ))
        .unwrap();
    }
}

fn sample(sec: i64, metrics: u32, instances: i32) -> ResultRecord {
    let mut record = ResultRecord::new(Timestamp::new(sec, 0));
    for item in 0..metrics {
        let mut vset = ValueSet::new(MetricId::new(40, 0, item));
        for i in (0..instances).rev() {
            vset = vset.with_value(i, Value::U64(sec as u64 * 100 + i as u64));
        }
        record = record.with_vset(vset);
    }
    record
}

#[test]
#[ignore] // Run manually with --ignored
fn stress_test_put_result() {
    let dir = tempdir().unwrap();
    let mut ctx = ArchiveContext::create(dir.path().join("stress"));
    register(&mut ctx, 20, 16);

    let iterations = 100_000;
    let start = Instant::now();

    for sec in 0..iterations {
        ctx.put_result(sample(sec, 20, 16)).unwrap();
    }
    ctx.end().unwrap();

    let elapsed = start.elapsed();
    let rate = iterations as f64 / elapsed.as_secs_f64();

    println!("Wrote {} results in {:?}", iterations, elapsed);
    println!("Rate: {:.0} results/second", rate);
    println!("{}", ctx.stats().report());

    assert!(
        rate > 10_000.0,
        "Should write at least 10k results/s, got {:.0}",
        rate
    );
}

#[test]
#[ignore]
fn stress_test_rollover() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("stress");
    let mut ctx = ArchiveContext::new(ArchiveConfig::new(&base).max_volume_size(1 << 20));
    register(&mut ctx, 4, 8);

    let iterations = 200_000;
    for sec in 0..iterations {
        ctx.put_result(sample(sec, 4, 8)).unwrap();
    }
    ctx.end().unwrap();

    let switches = ctx.stats().volume_switches;
    println!("{} volume switches", switches);
    assert!(switches > 10);

    let reader = ArchiveReader::open(&base).unwrap();
    assert_eq!(reader.volumes().len() as u64, switches + 1);
    assert_eq!(reader.results().unwrap().len(), iterations as usize);
    assert!(reader
        .index()
        .windows(2)
        .all(|w| w[0].timestamp <= w[1].timestamp));
}
