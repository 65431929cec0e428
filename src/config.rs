//! Tracer configuration
//!
//! Loaded from TOML or built in code. Every field has a default so a partial
//! file only overrides what it names:
//!
//! ```toml
//! cache_dir = ".sigtrace"
//! trace_name = "solver"
//! exclude = ["^linalg\\.norm$"]
//! max_write_depth = 1
//!
//! [sig_ceilings]
//! f80 = 64
//! ```

use crate::error::Result;
use crate::value::DType;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Significant-bit ceiling used where `log2(|mean|/std)` is undefined
///
/// Floating types use their mantissa width, integer and boolean types their
/// bit width. The extended-precision entry is platform dependent, so the
/// whole table is configurable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigCeilings {
    pub bool: u32,
    pub u8: u32,
    pub i8: u32,
    pub u16: u32,
    pub i16: u32,
    pub u32: u32,
    pub i32: u32,
    pub u64: u32,
    pub i64: u32,
    pub f16: u32,
    pub f32: u32,
    pub f64: u32,
    pub f80: u32,
    pub text: u32,
    pub object: u32,
}

impl Default for SigCeilings {
    fn default() -> Self {
        Self {
            bool: 1,
            u8: 8,
            i8: 8,
            u16: 16,
            i16: 16,
            u32: 32,
            i32: 32,
            u64: 64,
            i64: 64,
            f16: 11,
            f32: 24,
            f64: 53,
            f80: 80,
            text: 8,
            object: 0,
        }
    }
}

impl SigCeilings {
    /// Ceiling for `dtype`, as a float ready to fill masked elements
    pub fn ceiling(&self, dtype: DType) -> f64 {
        let bits = match dtype {
            DType::Bool => self.bool,
            DType::U8 => self.u8,
            DType::I8 => self.i8,
            DType::U16 => self.u16,
            DType::I16 => self.i16,
            DType::U32 => self.u32,
            DType::I32 => self.i32,
            DType::U64 => self.u64,
            DType::I64 => self.i64,
            DType::F16 => self.f16,
            DType::F32 => self.f32,
            DType::F64 => self.f64,
            DType::F80 => self.f80,
            DType::Text => self.text,
            DType::Object => self.object,
        };
        f64::from(bits)
    }
}

/// Configuration shared by the recording and export paths
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Root of all output (traces, stats, archived sources)
    pub cache_dir: PathBuf,

    /// Sub-directory for raw trace streams
    pub traces_dir: String,

    /// Sub-directory for export tables, bulk arrays and headers
    pub stats_dir: String,

    /// Sub-directory for the content-addressed source archive
    pub sources_dir: String,

    /// Base name of the trace stream; a sequence token is injected before the extension
    pub trace_name: String,

    /// Required extension of trace streams
    pub extension: String,

    /// Resolve source-line text and enclosing function for each call site
    pub capture_call_site: bool,

    /// Copy contributing source files into the archive at shutdown
    pub archive_sources: bool,

    /// Nesting depth at which instrumentation drops re-entrant captures
    ///
    /// Default 1: a capture started while another capture is in progress on
    /// the same thread is dropped.
    pub max_write_depth: usize,

    /// Minimum number of samples before statistics are computed
    pub min_samples: usize,

    /// Keep an in-memory per-function summary of every record written
    pub report: bool,

    /// Summarize only: records go to the report, never to the stream
    pub report_only: bool,

    /// Export statistics per recording thread, as `<arg>_TID<n>` rows
    pub export_per_thread: bool,

    /// Regex patterns over `module.function`; matches are left unwrapped
    pub exclude: Vec<String>,

    pub sig_ceilings: SigCeilings,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".sigtrace"),
            traces_dir: "traces".to_string(),
            stats_dir: "stats".to_string(),
            sources_dir: "sources".to_string(),
            trace_name: "trace".to_string(),
            extension: "msgpack".to_string(),
            capture_call_site: true,
            archive_sources: true,
            max_write_depth: 1,
            min_samples: 1,
            report: false,
            report_only: false,
            export_per_thread: false,
            exclude: Vec::new(),
            sig_ceilings: SigCeilings::default(),
        }
    }
}

impl TracerConfig {
    /// Load configuration from a TOML file
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TracerConfig = toml::from_str(content)?;
        config.exclusions()?;
        Ok(config)
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_trace_name(mut self, name: impl Into<String>) -> Self {
        self.trace_name = name.into();
        self
    }

    pub fn with_exclusions<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_call_site_capture(mut self, enabled: bool) -> Self {
        self.capture_call_site = enabled;
        self
    }

    pub fn with_source_archive(mut self, enabled: bool) -> Self {
        self.archive_sources = enabled;
        self
    }

    pub fn with_max_write_depth(mut self, depth: usize) -> Self {
        self.max_write_depth = depth;
        self
    }

    pub fn with_min_samples(mut self, samples: usize) -> Self {
        self.min_samples = samples;
        self
    }

    /// Summarize records per function; with `only`, skip the stream entirely
    pub fn with_report(mut self, only: bool) -> Self {
        self.report = true;
        self.report_only = only;
        self
    }

    pub fn with_per_thread_export(mut self, enabled: bool) -> Self {
        self.export_per_thread = enabled;
        self
    }

    /// Whether records are summarized in memory
    pub fn reports(&self) -> bool {
        self.report || self.report_only
    }

    /// Compiled exclusion patterns
    pub fn exclusions(&self) -> Result<RegexSet> {
        Ok(RegexSet::new(&self.exclude)?)
    }

    pub fn traces_path(&self) -> PathBuf {
        self.cache_dir.join(&self.traces_dir)
    }

    pub fn stats_path(&self) -> PathBuf {
        self.cache_dir.join(&self.stats_dir)
    }

    pub fn sources_path(&self) -> PathBuf {
        self.cache_dir.join(&self.sources_dir)
    }
}
