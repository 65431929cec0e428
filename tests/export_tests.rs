//! Integration tests for replay and export
//!
//! Records written through a tracer are replayed in order, aggregated per
//! (callable, call site, label, argument) and persisted as a summary table,
//! a bulk array store and a header.

use sigtrace::aggregate::bulk::StatKind;
use sigtrace::aggregate::{aggregate, Aggregator, ExportPaths, ExportedProfile};
use sigtrace::config::TracerConfig;
use sigtrace::intercept::{Tracer, RESULT_NAME};
use sigtrace::reader::{read_records, TraceReader};
use sigtrace::record::{CallSite, Label, TracedCallable};
use sigtrace::value::{ArgumentMap, Capture};
use sigtrace::writer::{TraceWriter, WriteOutcome};
use std::path::PathBuf;
use tempfile::TempDir;

fn quiet_config(dir: &TempDir) -> TracerConfig {
    TracerConfig::default()
        .with_cache_dir(dir.path())
        .with_call_site_capture(false)
        .with_source_archive(false)
}

/// Trace `sum(v)` four times on `[1.0, 2.0, 3.0]` from a single call site
fn record_constant_sum(dir: &TempDir) -> PathBuf {
    let tracer = Tracer::new(quiet_config(dir)).unwrap();
    let sum = tracer.wrap("scenario", "sum", &["v"], |(v,): (Vec<f64>,)| {
        v.iter().sum::<f64>()
    });
    for _ in 0..4 {
        assert_eq!(sum.call((vec![1.0, 2.0, 3.0],)), 6.0);
    }
    tracer.shutdown().unwrap().trace_path.unwrap()
}

#[test]
fn test_constant_array_has_zero_std_and_full_precision() {
    let dir = TempDir::new().unwrap();
    let stream = record_constant_sum(&dir);
    let profile = aggregate(&[stream], &TracerConfig::default()).unwrap();

    let rows = profile.rows("scenario", "sum");
    let inputs: Vec<_> = rows.iter().filter(|r| r.label == Label::Inputs).collect();
    assert_eq!(inputs.len(), 4);
    for row in &inputs {
        assert_eq!(row.name, "v");
        assert_eq!(row.mean, 2.0);
        assert_eq!(row.std, 0.0);
        assert_eq!(row.sig, 53.0);
    }

    let std = profile
        .statistic("scenario", "sum", Label::Inputs, "v", inputs[0].time, StatKind::Std)
        .unwrap();
    assert_eq!(std.shape, vec![3]);
    assert_eq!(std.values, vec![0.0; 3]);

    let outputs: Vec<_> = rows.iter().filter(|r| r.label == Label::Outputs).collect();
    assert_eq!(outputs.len(), 4);
    assert!(outputs.iter().all(|r| r.name == RESULT_NAME && r.mean == 6.0 && r.sig == 53.0));
}

#[test]
fn test_empty_stream_exports_nothing() {
    let dir = TempDir::new().unwrap();
    let stream = dir.path().join("empty.0.msgpack");
    std::fs::write(&stream, b"").unwrap();

    let profile = aggregate(&[stream], &TracerConfig::default()).unwrap();
    assert!(profile.table().is_empty());
    assert!(profile.bulk().is_empty());
    assert!(profile.registry().is_empty());

    let paths = profile.write_to(dir.path().join("stats"), "empty").unwrap();
    let loaded = ExportedProfile::load(&paths).unwrap();
    assert!(loaded.table().is_empty());
}

#[test]
fn test_written_records_replay_in_order() {
    let dir = TempDir::new().unwrap();
    let writer = TraceWriter::new(&quiet_config(&dir)).unwrap();
    let callable = TracedCallable {
        id: 99,
        module: "m".to_string(),
        name: "f".to_string(),
    };

    const N: u64 = 250;
    for t in 0..N {
        let mut args = ArgumentMap::new();
        args.insert("x".to_string(), (t as f64).capture());
        let outcome = writer.write(&callable, t, Label::Inputs, args, &CallSite::default());
        assert_eq!(outcome, WriteOutcome::Written);
    }
    let path = writer.close().unwrap().unwrap();

    let mut reader = TraceReader::open(&path).unwrap();
    let records: Vec<_> = reader.by_ref().collect();
    assert_eq!(records.len() as u64, N);
    assert_eq!(reader.skipped(), 0);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.time, i as u64);
        assert_eq!(record.args["x"].as_scalar(), Some(i as f64));
    }
}

#[test]
fn test_multiple_runs_merge_into_one_export() {
    let dir = TempDir::new().unwrap();
    let first = record_constant_sum(&dir);
    let second = record_constant_sum(&dir);
    assert_ne!(first, second);

    let mut aggregator = Aggregator::new(&TracerConfig::default());
    assert_eq!(aggregator.ingest_stream(&first).unwrap(), 8);
    assert_eq!(aggregator.ingest_stream(&second).unwrap(), 8);
    let profile = aggregator.finish();

    assert_eq!(profile.rows("scenario", "sum").len(), 16);
    assert_eq!(profile.registry().len(), 1);
    let entry = profile.registry().callables.values().next().unwrap();
    assert_eq!(entry.name, "sum");
    // both runs start their clocks at zero
    assert_eq!(entry.call_count(), 4);
}

#[test]
fn test_export_files_roundtrip() {
    let dir = TempDir::new().unwrap();
    let stream = record_constant_sum(&dir);
    let profile = aggregate(&[stream.clone()], &TracerConfig::default()).unwrap();

    let out = dir.path().join("stats");
    let paths = profile.write_to(&out, "run").unwrap();
    assert_eq!(paths, ExportPaths::new(&out, "run", 0));
    assert!(paths.table.exists() && paths.arrays.exists() && paths.header.exists());
    assert_eq!(ExportPaths::from_table(&paths.table), Some(paths.clone()));

    let loaded = ExportedProfile::load(&paths).unwrap();
    assert_eq!(loaded.rows("scenario", "sum").len(), 8);
    assert_eq!(loaded.registry(), profile.registry());
    assert_eq!(loaded.bulk(), profile.bulk());

    let time = loaded.rows("scenario", "sum")[0].time;
    let mean = loaded
        .statistic("scenario", "sum", Label::Inputs, "v", time, StatKind::Mean)
        .unwrap();
    assert_eq!(mean.values, vec![1.0, 2.0, 3.0]);

    let records = read_records(&stream).unwrap();
    assert_eq!(records.len(), 8);
}

#[test]
fn test_export_table_is_json_with_nulls_for_missing_statistics() {
    let dir = TempDir::new().unwrap();
    let stream = record_constant_sum(&dir);
    let config = TracerConfig::default().with_min_samples(10);
    let profile = aggregate(&[stream], &config).unwrap();

    let paths = profile.write_to(dir.path(), "sparse").unwrap();
    let json: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&paths.table).unwrap()).unwrap();
    let first = &json["scenario"]["sum"][0];
    assert!(first["mean"].is_null());
    assert!(first["sig"].is_null());
    assert_eq!(first["name"], "v");
    assert!(profile.bulk().is_empty());
}
