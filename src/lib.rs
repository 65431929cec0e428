//! sigtrace - numeric-precision tracing for Rust programs
//!
//! Wraps operations so that every call records its arguments and result,
//! persists the records to a framed msgpack stream, and later aggregates
//! them into per-argument stability statistics: mean, standard deviation
//! and significant bits `log2(|mean| / std)`.
//!
//! ```no_run
//! use sigtrace::config::TracerConfig;
//! use sigtrace::intercept::Tracer;
//!
//! let tracer = Tracer::new(TracerConfig::default()).unwrap();
//! let double = tracer.wrap("demo", "double", &["a"], |(a,): (f64,)| a * 2.0);
//! assert_eq!(double.call((5.0,)), 10.0);
//! tracer.shutdown().unwrap();
//! ```

pub mod aggregate;
pub mod callsite;
pub mod cli;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod intercept;
pub mod reader;
pub mod record;
pub mod registry;
pub mod stats;
pub mod value;
pub mod writer;

pub use error::{Result, TraceError};
