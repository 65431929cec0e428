//! Trace record model
//!
//! A [`TraceRecord`] is one observation of one call phase (inputs or
//! outputs). Records reference their operation by [`TracedCallable::id`] and
//! carry the [`CallSite`] the call came from.

use crate::clock::thread_index;
use crate::value::ArgumentMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hasher;

/// Identity of one traced operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TracedCallable {
    pub id: u64,
    pub module: String,
    pub name: String,
}

impl TracedCallable {
    /// `module.name`, the key exclusion patterns match against
    pub fn qualified_name(&self) -> String {
        if self.module.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.module, self.name)
        }
    }
}

/// Generate a callable ID using the FNV-1a hash of `module::name`
///
/// Deterministic, so the same operation keeps its identity across runs.
///
/// # Example
/// ```
/// use sigtrace::record::generate_callable_id;
///
/// let id = generate_callable_id("linalg", "solve");
/// assert_eq!(id, generate_callable_id("linalg", "solve"));
/// assert_ne!(id, generate_callable_id("linalg", "norm"));
/// ```
pub fn generate_callable_id(module: &str, name: &str) -> u64 {
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(module.as_bytes());
    hasher.write(b"::");
    hasher.write(name.as_bytes());
    hasher.finish()
}

/// Source location a traced call originated from
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CallSite {
    pub filename: String,
    /// Text of the source line (trimmed), empty if the file is unreadable
    pub line: String,
    pub lineno: u32,
    /// Enclosing function, empty if it could not be resolved
    pub name: String,
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}:{}", self.filename, self.lineno)
        } else {
            write!(f, "{}:{} ({})", self.filename, self.lineno, self.name)
        }
    }
}

/// Call phase a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Inputs,
    Outputs,
}

impl Label {
    pub fn as_str(self) -> &'static str {
        match self {
            Label::Inputs => "inputs",
            Label::Outputs => "outputs",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted observation of a call phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub callable_id: u64,
    pub time: u64,
    pub module: String,
    pub function: String,
    pub label: Label,
    pub args: ArgumentMap,
    pub call_site: CallSite,
    /// Index of the recording thread
    #[serde(default)]
    pub thread: u32,
}

impl TraceRecord {
    pub fn new(
        callable: &TracedCallable,
        time: u64,
        label: Label,
        args: ArgumentMap,
        call_site: CallSite,
    ) -> Self {
        Self {
            callable_id: callable.id,
            time,
            module: callable.module.clone(),
            function: callable.name.clone(),
            label,
            args,
            call_site,
            thread: thread_index(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Capture, CapturedValue};

    #[test]
    fn test_generate_callable_id_distinguishes_modules() {
        assert_ne!(
            generate_callable_id("a", "f"),
            generate_callable_id("b", "f")
        );
        assert_ne!(generate_callable_id("a", "f"), 0);
    }

    #[test]
    fn test_qualified_name() {
        let callable = TracedCallable {
            id: 1,
            module: "linalg".to_string(),
            name: "solve".to_string(),
        };
        assert_eq!(callable.qualified_name(), "linalg.solve");

        let bare = TracedCallable {
            id: 2,
            module: String::new(),
            name: "f".to_string(),
        };
        assert_eq!(bare.qualified_name(), "f");
    }

    #[test]
    fn test_label_serialization() {
        assert_eq!(serde_json::to_string(&Label::Inputs).unwrap(), "\"inputs\"");
        assert_eq!(Label::Outputs.to_string(), "outputs");
    }

    #[test]
    fn test_record_msgpack_roundtrip_keeps_args() {
        let callable = TracedCallable {
            id: 7,
            module: "m".to_string(),
            name: "f".to_string(),
        };
        let mut args = ArgumentMap::new();
        args.insert("a".to_string(), 5.0f64.capture());
        args.insert("v".to_string(), vec![1i32, 2].capture());

        let record = TraceRecord::new(&callable, 3, Label::Inputs, args, CallSite::default());
        let bytes = rmp_serde::to_vec_named(&record).unwrap();
        let decoded: TraceRecord = rmp_serde::from_slice(&bytes).unwrap();

        assert_eq!(decoded, record);
        assert_eq!(
            decoded.args["a"],
            CapturedValue::scalar(5.0, crate::value::DType::F64)
        );
    }

    #[test]
    fn test_call_site_display() {
        let site = CallSite {
            filename: "src/main.rs".to_string(),
            line: "let x = f(a);".to_string(),
            lineno: 12,
            name: "main".to_string(),
        };
        assert_eq!(site.to_string(), "src/main.rs:12 (main)");
    }
}
