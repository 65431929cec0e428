//! Call-site resolution
//!
//! The file and line of a traced call come from `#[track_caller]`
//! (`std::panic::Location`), which is exact and free. The source-line text
//! is read from the file (cached per file) and the enclosing function is
//! resolved by walking the stack with the `backtrace` crate and picking the
//! first frame whose debug info points at that file and line. Both are
//! cached, so the stack is symbolized once per distinct call site.

use crate::record::CallSite;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

type SourceLines = Option<Arc<Vec<String>>>;

/// Resolves [`CallSite`]s and remembers which source files contributed one
#[derive(Debug)]
pub struct CallSiteResolver {
    /// Resolve line text and enclosing function (otherwise file:line only)
    detailed: bool,
    sources: Mutex<HashMap<String, SourceLines>>,
    functions: Mutex<HashMap<(String, u32), String>>,
    visited: Mutex<BTreeSet<PathBuf>>,
}

impl CallSiteResolver {
    pub fn new(detailed: bool) -> Self {
        Self {
            detailed,
            sources: Mutex::new(HashMap::new()),
            functions: Mutex::new(HashMap::new()),
            visited: Mutex::new(BTreeSet::new()),
        }
    }

    /// Build the call site for `location`
    pub fn resolve(&self, location: &Location<'_>) -> CallSite {
        let filename = location.file().to_string();
        let lineno = location.line();

        if let Ok(mut visited) = self.visited.lock() {
            visited.insert(PathBuf::from(&filename));
        }

        if !self.detailed {
            return CallSite {
                filename,
                lineno,
                ..CallSite::default()
            };
        }

        let line = self.source_line(&filename, lineno).unwrap_or_default();
        let name = self.function_name(&filename, lineno);

        CallSite {
            filename,
            line,
            lineno,
            name,
        }
    }

    /// Source files seen so far, in path order
    pub fn visited_files(&self) -> Vec<PathBuf> {
        self.visited
            .lock()
            .map(|visited| visited.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn function_name(&self, filename: &str, lineno: u32) -> String {
        let key = (filename.to_string(), lineno);
        if let Some(name) = self.functions.lock().ok().and_then(|names| names.get(&key).cloned()) {
            return name;
        }
        // Resolved outside the lock; a racing thread resolves the same name
        let name = enclosing_function(filename, lineno).unwrap_or_default();
        if let Ok(mut names) = self.functions.lock() {
            names.insert(key, name.clone());
        }
        name
    }

    #[cfg(test)]
    fn cached_functions(&self) -> usize {
        self.functions.lock().map(|names| names.len()).unwrap_or(0)
    }

    fn source_line(&self, filename: &str, lineno: u32) -> Option<String> {
        let lines = {
            let mut sources = self.sources.lock().ok()?;
            sources
                .entry(filename.to_string())
                .or_insert_with(|| {
                    fs::read_to_string(filename)
                        .ok()
                        .map(|text| Arc::new(text.lines().map(str::to_string).collect()))
                })
                .clone()
        }?;

        let index = usize::try_from(lineno).ok()?.checked_sub(1)?;
        lines.get(index).map(|line| line.trim().to_string())
    }
}

impl Default for CallSiteResolver {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Name of the function containing `file:line` on the current stack
fn enclosing_function(file: &str, line: u32) -> Option<String> {
    let target = Path::new(file);
    let mut found = None;

    backtrace::trace(|frame| {
        backtrace::resolve_frame(frame, |symbol| {
            if found.is_some() {
                return;
            }
            let matches_file = symbol
                .filename()
                .map(|path| path.ends_with(target))
                .unwrap_or(false);
            if matches_file && symbol.lineno() == Some(line) {
                found = symbol.name().map(|name| format!("{:#}", name));
            }
        });
        found.is_none()
    });

    found
}
