//! Output file naming
//!
//! Output files are named `<stem>.<seq>.<ext>`: the configured base name, a
//! numeric sequence token, and the expected extension. The sequence token is
//! the first one under which none of a file set exists yet, so repeated runs
//! never overwrite each other.

use crate::error::{Result, TraceError};
use std::path::{Path, PathBuf};

/// Validate `filename` against `expected` and return its stem
///
/// A bare name is accepted as-is; a name carrying a different extension is
/// rejected.
pub fn check_extension(filename: &str, expected: &str) -> Result<String> {
    let path = Path::new(filename);
    match path.extension().and_then(|ext| ext.to_str()) {
        None => Ok(filename.to_string()),
        Some(ext) if ext == expected => Ok(path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string()),
        Some(_) => Err(TraceError::InvalidExtension {
            path: path.to_path_buf(),
            expected: expected.to_string(),
        }),
    }
}

/// `<dir>/<stem>.<seq>.<ext>`
pub fn sequenced_path(dir: &Path, stem: &str, seq: u64, ext: &str) -> PathBuf {
    dir.join(format!("{}.{}.{}", stem, seq, ext))
}

/// First sequence number at or after `start` for which no file of the set exists
pub fn next_sequence(dir: &Path, stem: &str, extensions: &[&str], start: u64) -> u64 {
    let mut seq = start;
    while extensions
        .iter()
        .any(|ext| sequenced_path(dir, stem, seq, ext).exists())
    {
        seq += 1;
    }
    seq
}

/// Sequence token of a path produced by [`sequenced_path`]
pub fn sequence_of(path: &Path, ext: &str) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let rest = name.strip_suffix(ext)?.strip_suffix('.')?;
    let (_, seq) = rest.rsplit_once('.')?;
    seq.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_check_extension_accepts_bare_and_matching() {
        assert_eq!(check_extension("run", "msgpack").unwrap(), "run");
        assert_eq!(check_extension("run.msgpack", "msgpack").unwrap(), "run");
    }

    #[test]
    fn test_check_extension_rejects_foreign() {
        let err = check_extension("run.json", "msgpack").unwrap_err();
        assert!(matches!(err, TraceError::InvalidExtension { .. }));
    }

    #[test]
    fn test_next_sequence_skips_existing() {
        let dir = TempDir::new().unwrap();
        assert_eq!(next_sequence(dir.path(), "run", &["msgpack"], 0), 0);

        fs::write(sequenced_path(dir.path(), "run", 0, "msgpack"), b"x").unwrap();
        fs::write(sequenced_path(dir.path(), "run", 1, "json"), b"x").unwrap();

        assert_eq!(next_sequence(dir.path(), "run", &["msgpack"], 0), 1);
        assert_eq!(next_sequence(dir.path(), "run", &["msgpack", "json"], 0), 2);
    }

    #[test]
    fn test_sequence_of_roundtrip() {
        let path = sequenced_path(Path::new("/tmp"), "solver.v2", 17, "header.msgpack");
        assert_eq!(sequence_of(&path, "header.msgpack"), Some(17));
        assert_eq!(sequence_of(Path::new("/tmp/plain.msgpack"), "msgpack"), None);
    }
}
