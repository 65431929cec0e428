//! Content-addressed source archive
//!
//! Source files that contributed call sites are copied to
//! `<root>/<sha256>.<ext>` so the exact text a trace refers to survives
//! later edits. `index.json` maps each original path to its archived name
//! and is merged across runs.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const INDEX_FILE: &str = "index.json";

/// Original path → archived file name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveIndex {
    pub entries: BTreeMap<String, String>,
}

/// Copies sources into a content-addressed directory
#[derive(Debug, Clone)]
pub struct SourceArchive {
    root: PathBuf,
}

impl SourceArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Archive every readable file in `files`; unreadable ones are skipped
    pub fn archive(&self, files: &[PathBuf]) -> Result<ArchiveIndex> {
        let mut index = self.load_index();
        if files.is_empty() {
            return Ok(index);
        }
        fs::create_dir_all(&self.root)?;

        for file in files {
            if !file.is_file() {
                debug!(path = %file.display(), "Source not found, not archived");
                continue;
            }
            match self.archive_file(file) {
                Ok(name) => {
                    index.entries.insert(file.display().to_string(), name);
                }
                Err(e) => warn!(path = %file.display(), error = %e, "Failed to archive source"),
            }
        }

        fs::write(
            self.root.join(INDEX_FILE),
            serde_json::to_string_pretty(&index)?,
        )?;
        Ok(index)
    }

    /// Archived name for a file's content
    pub fn content_name(path: &Path, content: &[u8]) -> String {
        let digest = hex::encode(Sha256::digest(content));
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => format!("{}.{}", digest, ext),
            None => digest,
        }
    }

    fn archive_file(&self, file: &Path) -> Result<String> {
        let content = fs::read(file)?;
        let name = Self::content_name(file, &content);
        let target = self.root.join(&name);
        if !target.exists() {
            fs::write(&target, &content)?;
        }
        Ok(name)
    }

    fn load_index(&self) -> ArchiveIndex {
        fs::read_to_string(self.root.join(INDEX_FILE))
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_archive_is_content_addressed() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("solver.rs");
        fs::write(&src, "fn solve() {}\n").unwrap();

        let archive = SourceArchive::new(dir.path().join("sources"));
        let index = archive.archive(&[src.clone()]).unwrap();

        let name = &index.entries[&src.display().to_string()];
        assert!(name.ends_with(".rs"));
        assert_eq!(name.len(), 64 + 3);
        let archived = fs::read_to_string(archive.root().join(name)).unwrap();
        assert_eq!(archived, "fn solve() {}\n");
    }

    #[test]
    fn test_identical_content_shares_entry() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.rs");
        let b = dir.path().join("b.rs");
        fs::write(&a, "same").unwrap();
        fs::write(&b, "same").unwrap();

        let archive = SourceArchive::new(dir.path().join("sources"));
        let index = archive.archive(&[a, b]).unwrap();

        let names: std::collections::BTreeSet<_> = index.entries.values().collect();
        assert_eq!(index.entries.len(), 2);
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_missing_files_skipped_and_index_merged() {
        let dir = TempDir::new().unwrap();
        let archive = SourceArchive::new(dir.path().join("sources"));
        let present = dir.path().join("x.rs");
        fs::write(&present, "x").unwrap();

        archive.archive(&[present.clone()]).unwrap();
        let index = archive
            .archive(&[dir.path().join("missing.rs")])
            .unwrap();

        assert_eq!(index.entries.len(), 1);
        assert!(index.entries.contains_key(&present.display().to_string()));
    }
}
