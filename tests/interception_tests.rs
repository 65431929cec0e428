//! Integration tests for call interception
//!
//! - Inputs and outputs records of one call share callable, time and call site
//! - Errors and panics pass through the proxy unchanged
//! - Dynamic module trees are wrapped, verified and recorded

use sigtrace::config::TracerConfig;
use sigtrace::intercept::symbols::{FnOperation, Instrumenter, Module, StaticLoader};
use sigtrace::intercept::{Tracer, RESULT_NAME};
use sigtrace::reader::read_records;
use sigtrace::record::Label;
use sigtrace::value::{Capture, CapturedValue, DType};
use std::sync::Arc;
use tempfile::TempDir;

fn tracer(dir: &TempDir) -> Tracer {
    Tracer::new(TracerConfig::default().with_cache_dir(dir.path())).unwrap()
}

#[test]
fn test_doubling_function_records_inputs_and_outputs() {
    let dir = TempDir::new().unwrap();
    let tracer = tracer(&dir);
    let f = tracer.wrap("scenario", "f", &["a"], |(a,): (i64,)| a * 2);

    assert_eq!(f.call((5,)), 10);

    let report = tracer.shutdown().unwrap();
    assert_eq!(report.records, 2);
    let records = read_records(report.trace_path.unwrap()).unwrap();
    let (inputs, outputs) = (&records[0], &records[1]);

    assert_eq!(inputs.label, Label::Inputs);
    assert_eq!(inputs.args.len(), 1);
    assert_eq!(inputs.args["a"], CapturedValue::scalar(5.0, DType::I64));

    assert_eq!(outputs.label, Label::Outputs);
    assert_eq!(outputs.args.len(), 1);
    assert_eq!(outputs.args[RESULT_NAME], CapturedValue::scalar(10.0, DType::I64));

    assert_eq!(inputs.callable_id, outputs.callable_id);
    assert_eq!(inputs.callable_id, f.callable().id);
    assert_eq!(inputs.time, outputs.time);
    assert_eq!(inputs.call_site, outputs.call_site);
    assert!(inputs.call_site.filename.ends_with("interception_tests.rs"));
    assert!(inputs.call_site.lineno > 0);
}

#[test]
fn test_call_site_line_text_resolved() {
    let dir = TempDir::new().unwrap();
    let tracer = tracer(&dir);
    let square = tracer.wrap("scenario", "square", &["x"], |(x,): (f64,)| x * x);

    let _y = square.call((3.0,)); // marker-line

    let records = read_records(tracer.shutdown().unwrap().trace_path.unwrap()).unwrap();
    let site = &records[0].call_site;
    if std::path::Path::new(&site.filename).exists() {
        assert!(site.line.contains("marker-line"), "line was {:?}", site.line);
    }
}

#[test]
fn test_separate_calls_get_separate_times() {
    let dir = TempDir::new().unwrap();
    let tracer = tracer(&dir);
    let neg = tracer.wrap("scenario", "neg", &["x"], |(x,): (f32,)| -x);

    for i in 0..3 {
        neg.call((i as f32,));
    }

    let records = read_records(tracer.shutdown().unwrap().trace_path.unwrap()).unwrap();
    let times: Vec<u64> = records.iter().map(|r| r.time).collect();
    assert_eq!(times, vec![0, 0, 1, 1, 2, 2]);
}

#[test]
fn test_panic_passes_through_and_session_still_closes() {
    let dir = TempDir::new().unwrap();
    let tracer = tracer(&dir);
    let fragile = tracer.wrap("scenario", "fragile", &["x"], |(x,): (f64,)| {
        assert!(x >= 0.0, "negative input");
        x.sqrt()
    });

    assert_eq!(fragile.call((4.0,)), 2.0);
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| fragile.call((-1.0,))));
    assert!(outcome.is_err());

    let records = read_records(tracer.shutdown().unwrap().trace_path.unwrap()).unwrap();
    let labels: Vec<Label> = records.iter().map(|r| r.label).collect();
    assert_eq!(labels, vec![Label::Inputs, Label::Outputs, Label::Inputs]);
}

#[test]
fn test_missing_parameter_names_degrade_to_positions() {
    let dir = TempDir::new().unwrap();
    let tracer = tracer(&dir);
    let add = tracer.wrap("", "", &["a"], |(a, b): (f64, f64)| a + b);

    add.call((1.0, 2.0));

    let records = read_records(tracer.shutdown().unwrap().trace_path.unwrap()).unwrap();
    assert_eq!(records[0].module, "");
    assert_eq!(records[0].function, "");
    let names: Vec<&str> = records[0].args.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["a", "arg1"]);
}

#[test]
fn test_module_tree_instrumentation() {
    let dir = TempDir::new().unwrap();
    let tracer = Tracer::new(
        TracerConfig::default()
            .with_cache_dir(dir.path())
            .with_exclusions(["^linalg\\.blas\\.copy$"]),
    )
    .unwrap();

    let blas = Module::new("blas")
        .with_operation(
            FnOperation::new("dot", |args| {
                let x = args[0].as_scalar().ok_or("scalar expected")?;
                let y = args[1].as_scalar().ok_or("scalar expected")?;
                Ok((x * y).capture())
            })
            .with_params(["x", "y"]),
        )
        .with_operation(FnOperation::new("copy", |args| Ok(args[0].clone())));
    let linalg = Module::new("linalg").with_module(Arc::new(blas));
    let loader = StaticLoader::new().with_module(linalg);

    let instrumenter = Instrumenter::new(Arc::clone(tracer.context()));
    let instrumented = instrumenter.instrument(&loader, "linalg").unwrap();

    assert!(instrumented.report.missing.is_empty());
    assert_eq!(instrumented.report.unwrapped, vec!["linalg.blas.copy".to_string()]);

    let blas = instrumented
        .module
        .get("blas")
        .and_then(|s| s.as_module())
        .unwrap();
    let out = blas.call("dot", &[2.0f64.capture(), 4.0f64.capture()]).unwrap();
    assert_eq!(out.as_scalar(), Some(8.0));
    blas.call("copy", &[1.0f64.capture()]).unwrap();

    let records = read_records(tracer.shutdown().unwrap().trace_path.unwrap()).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].module, "linalg.blas");
    assert_eq!(records[0].function, "dot");
    assert_eq!(records[0].args["y"].as_scalar(), Some(4.0));
    assert_eq!(records[1].args[RESULT_NAME].as_scalar(), Some(8.0));
}

#[test]
fn test_report_only_session_counts_calls_without_stream() {
    let dir = TempDir::new().unwrap();
    let tracer = Tracer::new(
        TracerConfig::default()
            .with_cache_dir(dir.path())
            .with_call_site_capture(false)
            .with_report(true),
    )
    .unwrap();
    let norm = tracer.wrap("linalg", "norm", &["v"], |(v,): (Vec<f64>,)| {
        v.iter().map(|x| x * x).sum::<f64>().sqrt()
    });
    for _ in 0..3 {
        norm.call((vec![3.0, 4.0],));
    }

    let report = tracer.shutdown().unwrap();
    assert_eq!(report.trace_path, None);
    assert_eq!(report.visits["linalg.norm"], 3);
    let summary = report.report.unwrap();
    let entry = summary.function("linalg", "norm").unwrap();
    assert_eq!((entry.inputs, entry.outputs), (3, 3));
    assert!(entry.arguments.contains("v") && entry.arguments.contains(RESULT_NAME));
}
