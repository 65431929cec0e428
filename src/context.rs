//! Tracing context
//!
//! One [`TraceContext`] owns everything a recording session shares: the
//! configuration, the stream writer, the callable registry, the capture
//! clock and the call-site resolver. Shutdown runs exactly once, either
//! explicitly or when the context is dropped (including during unwinding):
//! the stream is flushed and closed, an empty stream is deleted, and the
//! source files that contributed call sites are archived.
//!
//! The context also counts calls per `module.function`, including calls
//! whose capture was dropped, and hands the counts out with the shutdown
//! report.

use crate::callsite::CallSiteResolver;
use crate::clock::CaptureClock;
use crate::config::TracerConfig;
use crate::error::Result;
use crate::record::{CallSite, TracedCallable};
use crate::registry::CallableRegistry;
use crate::writer::archive::SourceArchive;
use crate::writer::report::CallReport;
use crate::writer::TraceWriter;
use regex::RegexSet;
use std::collections::BTreeMap;
use std::panic::Location;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

/// Summary of a finished recording session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShutdownReport {
    /// Stream file, `None` if nothing was recorded
    pub trace_path: Option<PathBuf>,
    pub records: u64,
    /// Source files copied into the archive
    pub archived: usize,
    /// Calls per `module.function`
    pub visits: BTreeMap<String, u64>,
    /// Per-function record summary, when reporting is enabled
    pub report: Option<CallReport>,
}

#[derive(Debug)]
pub struct TraceContext {
    config: TracerConfig,
    exclusions: RegexSet,
    writer: TraceWriter,
    registry: CallableRegistry,
    clock: CaptureClock,
    sites: CallSiteResolver,
    visits: Mutex<BTreeMap<String, u64>>,
    report: Mutex<Option<ShutdownReport>>,
}

impl TraceContext {
    pub fn new(config: TracerConfig) -> Result<Self> {
        let exclusions = config.exclusions()?;
        let writer = TraceWriter::new(&config)?;
        let sites = CallSiteResolver::new(config.capture_call_site);
        debug!(cache_dir = %config.cache_dir.display(), "Created trace context");

        Ok(Self {
            config,
            exclusions,
            writer,
            registry: CallableRegistry::new(),
            clock: CaptureClock::new(),
            sites,
            visits: Mutex::new(BTreeMap::new()),
            report: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    pub fn writer(&self) -> &TraceWriter {
        &self.writer
    }

    pub fn clock(&self) -> &CaptureClock {
        &self.clock
    }

    pub fn register(&self, module: &str, name: &str) -> Arc<TracedCallable> {
        self.registry.register(module, name)
    }

    /// Count one call of `callable`
    pub fn visit(&self, callable: &TracedCallable) {
        let mut visits = self.visits.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *visits.entry(callable.qualified_name()).or_insert(0) += 1;
    }

    /// Calls counted so far per `module.function`
    pub fn visits(&self) -> BTreeMap<String, u64> {
        self.visits
            .lock()
            .map(|visits| visits.clone())
            .unwrap_or_default()
    }

    /// Whether `qualified_name` matches an exclusion pattern
    pub fn is_excluded(&self, qualified_name: &str) -> bool {
        self.exclusions.is_match(qualified_name)
    }

    pub fn resolve_site(&self, location: &Location<'_>) -> CallSite {
        self.sites.resolve(location)
    }

    pub fn is_shut_down(&self) -> bool {
        self.report.lock().map(|r| r.is_some()).unwrap_or(true)
    }

    /// Flush and close the stream and archive sources
    ///
    /// Idempotent: later calls return the first report.
    pub fn shutdown(&self) -> Result<ShutdownReport> {
        let mut report = self
            .report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(done) = report.as_ref() {
            return Ok(done.clone());
        }

        let records = self.writer.records_written();
        let visits = self.visits();
        let summary = self.writer.report();
        // Mark done before fallible steps so shutdown never runs twice
        *report = Some(ShutdownReport {
            records,
            visits: visits.clone(),
            report: summary.clone(),
            ..ShutdownReport::default()
        });

        let trace_path = self.writer.close()?;

        let archived = if self.config.archive_sources && trace_path.is_some() {
            let archive = SourceArchive::new(self.config.sources_path());
            archive.archive(&self.sites.visited_files())?.entries.len()
        } else {
            0
        };

        if let Some(summary) = &summary {
            for (module, function, entry) in summary.iter() {
                info!(
                    module,
                    function,
                    inputs = entry.inputs,
                    outputs = entry.outputs,
                    bytes = entry.bytes,
                    "Function report"
                );
            }
        }

        let done = ShutdownReport {
            trace_path,
            records,
            archived,
            visits,
            report: summary,
        };
        info!(
            records = done.records,
            callables = self.registry.len(),
            archived = done.archived,
            path = ?done.trace_path,
            "Trace session finished"
        );
        *report = Some(done.clone());
        Ok(done)
    }
}

impl Drop for TraceContext {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "Trace shutdown failed");
        }
    }
}
