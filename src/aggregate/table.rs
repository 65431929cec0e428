//! Summary table
//!
//! One [`ExportRow`] per (record, argument), grouped by module then
//! function. Statistics that could not be computed are NaN, which the JSON
//! encoding writes as `null`.

use crate::record::{CallSite, Label};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRow {
    pub callable_id: u64,
    pub label: Label,
    /// Argument name
    pub name: String,
    pub time: u64,
    #[serde(with = "nan_as_null")]
    pub mean: f64,
    #[serde(with = "nan_as_null")]
    pub std: f64,
    #[serde(with = "nan_as_null")]
    pub sig: f64,
    pub filename: String,
    pub line: String,
    pub lineno: u32,
    /// Function enclosing the call site
    pub function: String,
}

impl ExportRow {
    pub fn call_site(&self) -> CallSite {
        CallSite {
            filename: self.filename.clone(),
            line: self.line.clone(),
            lineno: self.lineno,
            name: self.function.clone(),
        }
    }
}

mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_none()
        } else {
            serializer.serialize_f64(*value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}

/// module → function → rows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SummaryTable {
    groups: BTreeMap<String, BTreeMap<String, Vec<ExportRow>>>,
}

impl SummaryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, module: &str, function: &str, row: ExportRow) {
        self.groups
            .entry(module.to_string())
            .or_default()
            .entry(function.to_string())
            .or_default()
            .push(row);
    }

    pub fn rows(&self, module: &str, function: &str) -> &[ExportRow] {
        self.groups
            .get(module)
            .and_then(|functions| functions.get(function))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Drop a (module, function) group
    pub fn remove_group(&mut self, module: &str, function: &str) {
        if let Some(functions) = self.groups.get_mut(module) {
            functions.remove(function);
            if functions.is_empty() {
                self.groups.remove(module);
            }
        }
    }

    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn functions<'a>(&'a self, module: &str) -> impl Iterator<Item = &'a str> {
        self.groups
            .get(module)
            .into_iter()
            .flat_map(|functions| functions.keys().map(String::as_str))
    }

    /// Total number of rows
    pub fn len(&self) -> usize {
        self.groups
            .values()
            .flat_map(|functions| functions.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(mean: f64) -> ExportRow {
        ExportRow {
            callable_id: 1,
            label: Label::Inputs,
            name: "a".to_string(),
            time: 0,
            mean,
            std: 0.0,
            sig: 53.0,
            filename: "src/lib.rs".to_string(),
            line: String::new(),
            lineno: 4,
            function: "main".to_string(),
        }
    }

    #[test]
    fn test_nan_written_as_null() {
        let json = serde_json::to_string(&row(f64::NAN)).unwrap();
        assert!(json.contains("\"mean\":null"));

        let back: ExportRow = serde_json::from_str(&json).unwrap();
        assert!(back.mean.is_nan());
        assert_eq!(back.sig, 53.0);
    }

    #[test]
    fn test_groups_and_removal() {
        let mut table = SummaryTable::new();
        table.push("m", "f", row(1.0));
        table.push("m", "f", row(2.0));
        table.push("m", "g", row(3.0));

        assert_eq!(table.len(), 3);
        assert_eq!(table.rows("m", "f").len(), 2);
        assert_eq!(table.functions("m").collect::<Vec<_>>(), vec!["f", "g"]);
        assert!(table.rows("x", "f").is_empty());

        table.remove_group("m", "f");
        table.remove_group("m", "g");
        assert!(table.is_empty());
        assert_eq!(table.modules().count(), 0);
    }

    #[test]
    fn test_json_layout_is_nested() {
        let mut table = SummaryTable::new();
        table.push("m", "f", row(1.0));
        let value: serde_json::Value = serde_json::to_value(&table).unwrap();
        assert_eq!(value["m"]["f"][0]["lineno"], 4);
    }
}
