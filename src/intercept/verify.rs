//! Post-wrap verification
//!
//! Walks a real module tree alongside its wrapped mirror and reports
//! symbols that went missing or operations that were left unwrapped.
//! Findings are logged; verification never fails.

use super::symbols::{join_path, Module, Symbol};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    /// Symbols present in the real tree but absent from the wrapped one
    pub missing: Vec<String>,
    /// Operations in the wrapped tree that do not record calls
    pub unwrapped: Vec<String>,
    /// Symbols compared
    pub checked: usize,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.unwrapped.is_empty()
    }
}

/// Compare `real` with `wrapped`, recursing into nested modules
pub fn verify(real: &Arc<Module>, wrapped: &Arc<Module>) -> VerificationReport {
    let mut report = VerificationReport::default();
    let mut visited = HashSet::new();
    walk(real, wrapped, &real.name, &mut visited, &mut report);
    report
}

fn walk(
    real: &Arc<Module>,
    wrapped: &Arc<Module>,
    prefix: &str,
    visited: &mut HashSet<usize>,
    report: &mut VerificationReport,
) {
    if !visited.insert(Arc::as_ptr(real) as usize) {
        return;
    }

    for (key, symbol) in &real.symbols {
        report.checked += 1;
        let path = join_path(prefix, key);

        let Some(mirror) = wrapped.get(key) else {
            error!(symbol = %path, "Symbol missing from instrumented module");
            report.missing.push(path);
            continue;
        };

        match (symbol, mirror) {
            (Symbol::Operation(_), Symbol::Operation(op)) if !op.is_traced() => {
                warn!(symbol = %path, "Operation not instrumented");
                report.unwrapped.push(path);
            }
            (Symbol::Module(real_sub), Symbol::Module(wrapped_sub)) => {
                walk(real_sub, wrapped_sub, &path, visited, report);
            }
            (Symbol::Operation(_), Symbol::Operation(_)) | (Symbol::Value(_), Symbol::Value(_)) => {}
            _ => {
                warn!(symbol = %path, "Symbol kind changed by instrumentation");
                report.unwrapped.push(path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intercept::symbols::FnOperation;
    use crate::value::Capture;

    fn op(name: &str) -> FnOperation {
        FnOperation::new(name, |_| Ok(1.0f64.capture()))
    }

    #[test]
    fn test_identical_unwrapped_trees_report_every_operation() {
        let real = Arc::new(Module::new("m").with_operation(op("f")).with_operation(op("g")));
        let report = verify(&real, &real);
        assert_eq!(report.unwrapped, vec!["m.f", "m.g"]);
        assert!(report.missing.is_empty());
        assert_eq!(report.checked, 2);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_missing_nested_symbol() {
        let inner = Arc::new(Module::new("inner").with_value("c", 2.0f64.capture()));
        let real = Arc::new(Module::new("m").with_module(inner));
        let wrapped = Arc::new(Module::new("m").with_module(Arc::new(Module::new("inner"))));

        let report = verify(&real, &wrapped);
        assert_eq!(report.missing, vec!["m.inner.c"]);
    }

    #[test]
    fn test_shared_module_visited_once() {
        let shared = Arc::new(Module::new("s").with_value("c", 1.0f64.capture()));
        let real = Arc::new(
            Module::new("m")
                .with_module(Arc::clone(&shared))
                .with_symbol("again", Symbol::Module(Arc::clone(&shared))),
        );
        let report = verify(&real, &real);
        // two module entries plus the shared module's single constant
        assert_eq!(report.checked, 3);
        assert!(report.is_clean());
    }
}
