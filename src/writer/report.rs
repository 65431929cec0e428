//! In-memory record summary
//!
//! With reporting enabled the writer keeps one [`FunctionReport`] per
//! (module, function): how many inputs and outputs records it produced,
//! their encoded size and the argument names seen. In report-only mode
//! this summary replaces the stream.

use crate::record::{Label, TraceRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Summary of the records of one function
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionReport {
    pub inputs: u64,
    pub outputs: u64,
    /// Encoded size of every record, in bytes
    pub bytes: u64,
    pub arguments: BTreeSet<String>,
    /// Capture time of the latest record
    pub last_time: u64,
}

impl FunctionReport {
    pub fn records(&self) -> u64 {
        self.inputs + self.outputs
    }
}

/// Per-function summaries, keyed by module then function
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallReport {
    modules: BTreeMap<String, BTreeMap<String, FunctionReport>>,
}

impl CallReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one record whose frame is `bytes` long
    pub fn observe(&mut self, record: &TraceRecord, bytes: usize) {
        let entry = self
            .modules
            .entry(record.module.clone())
            .or_default()
            .entry(record.function.clone())
            .or_default();

        match record.label {
            Label::Inputs => entry.inputs += 1,
            Label::Outputs => entry.outputs += 1,
        }
        entry.bytes += bytes as u64;
        entry.last_time = entry.last_time.max(record.time);
        entry.arguments.extend(record.args.keys().cloned());
    }

    pub fn function(&self, module: &str, function: &str) -> Option<&FunctionReport> {
        self.modules.get(module)?.get(function)
    }

    /// `(module, function, report)` in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &FunctionReport)> {
        self.modules.iter().flat_map(|(module, functions)| {
            functions
                .iter()
                .map(move |(function, report)| (module.as_str(), function.as_str(), report))
        })
    }

    /// Number of functions summarized
    pub fn len(&self) -> usize {
        self.modules.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CallSite, TracedCallable};
    use crate::value::{ArgumentMap, Capture};

    fn record(name: &str, time: u64, label: Label, arg: &str) -> TraceRecord {
        let callable = TracedCallable {
            id: 1,
            module: "linalg".to_string(),
            name: name.to_string(),
        };
        let mut args = ArgumentMap::new();
        args.insert(arg.to_string(), 1.0f64.capture());
        TraceRecord::new(&callable, time, label, args, CallSite::default())
    }

    #[test]
    fn test_counts_by_label_and_collects_arguments() {
        let mut report = CallReport::new();
        report.observe(&record("solve", 3, Label::Inputs, "a"), 40);
        report.observe(&record("solve", 3, Label::Outputs, "result"), 25);
        report.observe(&record("solve", 1, Label::Inputs, "b"), 40);

        let solve = report.function("linalg", "solve").unwrap();
        assert_eq!(solve.inputs, 2);
        assert_eq!(solve.outputs, 1);
        assert_eq!(solve.records(), 3);
        assert_eq!(solve.bytes, 105);
        assert_eq!(solve.last_time, 3);
        let names: Vec<&str> = solve.arguments.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["a", "b", "result"]);
    }

    #[test]
    fn test_functions_listed_in_name_order() {
        let mut report = CallReport::new();
        report.observe(&record("solve", 0, Label::Inputs, "a"), 1);
        report.observe(&record("norm", 1, Label::Inputs, "x"), 1);

        let names: Vec<&str> = report.iter().map(|(_, function, _)| function).collect();
        assert_eq!(names, vec!["norm", "solve"]);
        assert_eq!(report.len(), 2);
        assert!(report.function("linalg", "det").is_none());
    }
}
