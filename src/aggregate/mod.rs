//! Offline aggregation
//!
//! Replays trace streams, groups each argument's captured values by
//! (callable, call site, label, argument name) and turns them into an
//! [`ExportedProfile`]: a summary table with one row per (record, argument),
//! bulk arrays of per-element statistics for multi-element arguments, and a
//! registry of callables, call sites and capture times.
//!
//! Statistics are computed once per sample group and shared by every record
//! that belongs to it. With per-thread export each recording thread forms
//! its own group and rows are named `<arg>_TID<thread>`. A failure while exporting a group drops only that
//! (module, function) group.

pub mod bulk;
pub mod profile;
pub mod registry;
pub mod table;

use crate::config::{SigCeilings, TracerConfig};
use crate::error::Result;
use crate::reader::TraceReader;
use crate::record::{CallSite, Label, TraceRecord};
use crate::stats::{RunningStatistics, SampleAccumulator, Statistic};
use bulk::{array_key, CompressedArray, StatKind};
pub use profile::{ExportPaths, ExportedProfile};
use registry::ExportRegistry;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use table::{ExportRow, SummaryTable};
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SampleKey {
    callable_id: u64,
    call_site: CallSite,
    label: Label,
    name: String,
    thread: Option<u32>,
}

impl SampleKey {
    fn new(row: &RowKeys, name: &str, per_thread: bool) -> Self {
        Self {
            callable_id: row.callable_id,
            call_site: row.call_site.clone(),
            label: row.label,
            name: name.to_string(),
            thread: per_thread.then_some(row.thread),
        }
    }
}

/// A replayed record without its captured values, which live in the samples
#[derive(Debug)]
struct RowKeys {
    callable_id: u64,
    time: u64,
    module: String,
    function: String,
    label: Label,
    call_site: CallSite,
    thread: u32,
    names: Vec<String>,
}

impl RowKeys {
    /// Name of `arg` in the exported table and bulk keys
    fn export_name(&self, arg: &str, per_thread: bool) -> String {
        if per_thread {
            format!("{}_TID{}", arg, self.thread)
        } else {
            arg.to_string()
        }
    }
}

/// Accumulates replayed records and exports them
#[derive(Debug)]
pub struct Aggregator {
    ceilings: SigCeilings,
    min_samples: usize,
    per_thread: bool,
    rows: Vec<RowKeys>,
    samples: HashMap<SampleKey, SampleAccumulator>,
    registry: ExportRegistry,
}

impl Aggregator {
    pub fn new(config: &TracerConfig) -> Self {
        Self {
            ceilings: config.sig_ceilings.clone(),
            min_samples: config.min_samples,
            per_thread: config.export_per_thread,
            rows: Vec::new(),
            samples: HashMap::new(),
            registry: ExportRegistry::new(),
        }
    }

    /// Add one record
    pub fn ingest(&mut self, record: TraceRecord) {
        self.registry.observe(&record);
        let TraceRecord {
            callable_id,
            time,
            module,
            function,
            label,
            args,
            call_site,
            thread,
        } = record;

        let mut row = RowKeys {
            callable_id,
            time,
            module,
            function,
            label,
            call_site,
            thread,
            names: Vec::with_capacity(args.len()),
        };
        for (name, value) in args {
            self.samples
                .entry(SampleKey::new(&row, &name, self.per_thread))
                .or_default()
                .push(&value);
            row.names.push(name);
        }
        self.rows.push(row);
    }

    /// Add every record of a reader; returns how many were added
    pub fn ingest_reader(&mut self, reader: TraceReader) -> usize {
        let before = self.rows.len();
        for record in reader {
            self.ingest(record);
        }
        self.rows.len() - before
    }

    /// Add every record of a stream file
    pub fn ingest_stream<P: AsRef<Path>>(&mut self, path: P) -> Result<usize> {
        let path = path.as_ref();
        let count = self.ingest_reader(TraceReader::open(path)?);
        debug!(path = %path.display(), records = count, "Replayed trace stream");
        Ok(count)
    }

    pub fn registry(&self) -> &ExportRegistry {
        &self.registry
    }

    pub fn records(&self) -> usize {
        self.rows.len()
    }

    /// Compute statistics and build the export
    pub fn finish(self) -> ExportedProfile {
        let Aggregator {
            ceilings,
            min_samples,
            per_thread,
            rows,
            samples,
            registry,
        } = self;

        let statistics: HashMap<SampleKey, RunningStatistics> = samples
            .into_iter()
            .map(|(key, accumulator)| (key, accumulator.finish(&ceilings, min_samples)))
            .collect();

        let mut profile = ExportedProfile {
            table: SummaryTable::new(),
            bulk: bulk::BulkStore::new(),
            registry,
        };
        let mut failed: BTreeSet<(String, String)> = BTreeSet::new();

        for row in &rows {
            let group = (row.module.clone(), row.function.clone());
            if failed.contains(&group) {
                continue;
            }
            if let Err(e) = export_row(&mut profile, row, &statistics, per_thread) {
                error!(
                    module = %row.module,
                    function = %row.function,
                    error = %e,
                    "Failed to export group; skipping it"
                );
                profile.table.remove_group(&row.module, &row.function);
                profile.bulk.remove_group(&row.module, &row.function);
                failed.insert(group);
            }
        }

        info!(
            records = rows.len(),
            rows = profile.table.len(),
            arrays = profile.bulk.len(),
            "Aggregated traces"
        );
        profile
    }
}

fn export_row(
    profile: &mut ExportedProfile,
    record: &RowKeys,
    statistics: &HashMap<SampleKey, RunningStatistics>,
    per_thread: bool,
) -> Result<()> {
    for arg in &record.names {
        let Some(stats) = statistics.get(&SampleKey::new(record, arg, per_thread)) else {
            continue;
        };
        // Unrepresentable-only groups never got a layout
        if stats.dtype().is_none() {
            continue;
        }

        let name = record.export_name(arg, per_thread);
        let (mean, std, sig) = (stats.mean(), stats.std(), stats.sig());
        profile.table.push(
            &record.module,
            &record.function,
            ExportRow {
                callable_id: record.callable_id,
                label: record.label,
                name: name.clone(),
                time: record.time,
                mean: mean.reduce(),
                std: std.reduce(),
                sig: sig.reduce(),
                filename: record.call_site.filename.clone(),
                line: record.call_site.line.clone(),
                lineno: record.call_site.lineno,
                function: record.call_site.name.clone(),
            },
        );

        if stats.ndim() == 0 {
            continue;
        }
        for (kind, statistic) in StatKind::ALL.into_iter().zip([mean, std, sig]) {
            if let Statistic::Computed(array) = statistic {
                profile.bulk.insert(
                    &record.module,
                    &record.function,
                    array_key(record.label, &name, record.time, kind),
                    CompressedArray::compress(array)?,
                );
            }
        }
    }
    Ok(())
}

/// Replay `streams` and build their combined export
pub fn aggregate<P: AsRef<Path>>(streams: &[P], config: &TracerConfig) -> Result<ExportedProfile> {
    let mut aggregator = Aggregator::new(config);
    for stream in streams {
        aggregator.ingest_stream(stream)?;
    }
    Ok(aggregator.finish())
}
