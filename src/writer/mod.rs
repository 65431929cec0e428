//! Concurrency-safe trace writer
//!
//! [`TraceWriter::write`] appends exactly one frame per call and never
//! returns an error to the traced code. Writes are serialized by one mutex,
//! so records land in a total order. A thread-local depth guard is entered
//! before the mutex is touched: a capture that re-enters the writer on the
//! same thread is dropped instead of deadlocking, while plain contention
//! between threads just blocks.
//!
//! The stream file is opened lazily on the first record, at
//! `<dir>/<stem>.<seq>.<ext>` with the first unused sequence token. A
//! failure to open is logged once and disables the writer.
//!
//! With reporting enabled every encoded record is also summarized in a
//! [`CallReport`]; in report-only mode the stream is never opened.

pub mod archive;
pub mod guard;
pub mod path;
pub mod report;

use crate::config::TracerConfig;
use crate::error::Result;
use crate::reader::encode_frame;
use crate::record::{CallSite, Label, TraceRecord, TracedCallable};
use crate::value::{ArgumentMap, CapturedValue};
use guard::{active_calls, CaptureGuard};
use report::CallReport;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, warn};

/// What happened to one write request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Dropped by the re-entrancy guard
    Reentrant,
    /// The record could not be encoded
    Unserializable,
    /// The stream failed to open, failed earlier, or is closed
    Disabled,
    /// Summarized in the report only
    Reported,
}

type Encoder = fn(&TraceRecord) -> Result<Vec<u8>>;

enum StreamState {
    Pending,
    Open {
        out: BufWriter<File>,
        path: PathBuf,
        bytes: u64,
    },
    Failed,
    Closed,
}

/// Appends framed [`TraceRecord`]s to one stream file
pub struct TraceWriter {
    dir: PathBuf,
    stem: String,
    extension: String,
    max_depth: usize,
    state: Mutex<StreamState>,
    written: AtomicU64,
    report: Option<Mutex<CallReport>>,
    report_only: bool,
    encode: Encoder,
}

impl TraceWriter {
    /// Writer for the stream configured by `config`
    ///
    /// Fails if the configured trace name carries a foreign extension.
    pub fn new(config: &TracerConfig) -> Result<Self> {
        let stem = path::check_extension(&config.trace_name, &config.extension)?;
        Ok(Self {
            dir: config.traces_path(),
            stem,
            extension: config.extension.clone(),
            max_depth: config.max_write_depth,
            state: Mutex::new(StreamState::Pending),
            written: AtomicU64::new(0),
            report: config.reports().then(|| Mutex::new(CallReport::new())),
            report_only: config.report_only,
            encode: encode_frame,
        })
    }

    #[cfg(test)]
    fn with_encoder(mut self, encode: Encoder) -> Self {
        self.encode = encode;
        self
    }

    /// Append one record built from already-captured arguments
    pub fn write(
        &self,
        callable: &TracedCallable,
        time: u64,
        label: Label,
        args: ArgumentMap,
        call_site: &CallSite,
    ) -> WriteOutcome {
        self.emit(callable, time, label, call_site, || args)
    }

    /// Capture arguments and append the record, both under the re-entrancy guard
    ///
    /// `capture` runs only if the guard admits this thread, so a traced call
    /// made from inside a capture is not recorded.
    pub fn emit<C>(
        &self,
        callable: &TracedCallable,
        time: u64,
        label: Label,
        call_site: &CallSite,
        capture: C,
    ) -> WriteOutcome
    where
        C: FnOnce() -> ArgumentMap,
    {
        let Some(_guard) = CaptureGuard::enter(self.max_depth) else {
            return WriteOutcome::Reentrant;
        };

        let args = capture();
        let mut record = TraceRecord::new(callable, time, label, representable(args), call_site.clone());
        let frame = match encode_record(&mut record, self.encode) {
            Some(frame) => frame,
            None => {
                error!(
                    callable = %callable.qualified_name(),
                    active = ?active_calls(),
                    "Failed to serialize trace record; these operations are suspect, try again excluding them"
                );
                return WriteOutcome::Unserializable;
            }
        };

        if let Some(report) = &self.report {
            report
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .observe(&record, frame.len());
            if self.report_only {
                return WriteOutcome::Reported;
            }
        }

        self.append(&frame)
    }

    /// Snapshot of the record summary, if reporting is enabled
    pub fn report(&self) -> Option<CallReport> {
        self.report
            .as_ref()
            .map(|report| report.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone())
    }

    /// Records appended so far
    pub fn records_written(&self) -> u64 {
        self.written.load(Ordering::Acquire)
    }

    /// Path of the open stream, if any
    pub fn path(&self) -> Option<PathBuf> {
        match &*self.lock() {
            StreamState::Open { path, .. } => Some(path.clone()),
            _ => None,
        }
    }

    pub fn flush(&self) -> Result<()> {
        if let StreamState::Open { out, .. } = &mut *self.lock() {
            out.flush()?;
        }
        Ok(())
    }

    /// Flush and close the stream; later writes are disabled
    ///
    /// Returns the stream path, or `None` if nothing was written. A stream
    /// holding zero bytes is deleted.
    pub fn close(&self) -> Result<Option<PathBuf>> {
        let previous = std::mem::replace(&mut *self.lock(), StreamState::Closed);
        let StreamState::Open {
            mut out,
            path,
            bytes,
        } = previous
        else {
            return Ok(None);
        };

        out.flush()?;
        drop(out);

        if bytes == 0 {
            fs::remove_file(&path)?;
            debug!(path = %path.display(), "Removed empty trace stream");
            return Ok(None);
        }

        debug!(path = %path.display(), bytes, "Closed trace stream");
        Ok(Some(path))
    }

    fn lock(&self) -> MutexGuard<'_, StreamState> {
        // A panic elsewhere never leaves a frame half-written in our state
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn append(&self, frame: &[u8]) -> WriteOutcome {
        let mut state = self.lock();

        if matches!(*state, StreamState::Pending) {
            *state = match self.open_stream() {
                Ok((file, path)) => {
                    debug!(path = %path.display(), "Opened trace stream");
                    StreamState::Open {
                        out: BufWriter::new(file),
                        path,
                        bytes: 0,
                    }
                }
                Err(e) => {
                    error!(dir = %self.dir.display(), error = %e, "Failed to open trace stream; tracing disabled");
                    StreamState::Failed
                }
            };
        }

        let StreamState::Open { out, path, bytes } = &mut *state else {
            return WriteOutcome::Disabled;
        };

        match out.write_all(frame) {
            Ok(()) => {
                *bytes += frame.len() as u64;
                self.written.fetch_add(1, Ordering::AcqRel);
                WriteOutcome::Written
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to write trace stream; tracing disabled");
                let _ = out.flush();
                *state = StreamState::Failed;
                WriteOutcome::Disabled
            }
        }
    }

    fn open_stream(&self) -> io::Result<(File, PathBuf)> {
        fs::create_dir_all(&self.dir)?;
        let extensions = [self.extension.as_str()];
        let mut seq = 0;
        loop {
            seq = path::next_sequence(&self.dir, &self.stem, &extensions, seq);
            let candidate = path::sequenced_path(&self.dir, &self.stem, seq, &self.extension);
            match OpenOptions::new().write(true).create_new(true).open(&candidate) {
                Ok(file) => return Ok((file, candidate)),
                // Another writer claimed this token between the check and the open
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => seq += 1,
                Err(e) => return Err(e),
            }
        }
    }
}

impl std::fmt::Debug for TraceWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceWriter")
            .field("dir", &self.dir)
            .field("stem", &self.stem)
            .field("extension", &self.extension)
            .field("records_written", &self.records_written())
            .finish()
    }
}

/// Drop placeholders for values that cannot be captured
fn representable(args: ArgumentMap) -> ArgumentMap {
    args.into_iter()
        .filter(|(name, value)| {
            if let CapturedValue::Unrepresentable { type_name } = value {
                debug!(argument = %name, type_name = %type_name, "Argument not captured");
                false
            } else {
                true
            }
        })
        .collect()
}

/// Encode a record, omitting arguments that fail to encode on their own
///
/// On return `record` holds exactly the arguments that were encoded.
fn encode_record(record: &mut TraceRecord, encode: Encoder) -> Option<Vec<u8>> {
    if let Ok(frame) = encode(record) {
        return Some(frame);
    }

    let args = std::mem::take(&mut record.args);
    let mut kept = ArgumentMap::new();
    for (name, value) in args {
        record.args.insert(name.clone(), value);
        let attempt = encode(record);
        let Some(value) = record.args.remove(&name) else {
            continue;
        };
        match attempt {
            Ok(_) => {
                kept.insert(name, value);
            }
            Err(e) => warn!(argument = %name, error = %e, "Argument failed to serialize; omitted"),
        }
    }
    record.args = kept;
    encode(record).ok()
}
