//! Exported profile: the query surface over one aggregation result

use super::bulk::{BulkStore, StatKind};
use super::registry::ExportRegistry;
use super::table::{ExportRow, SummaryTable};
use crate::error::{Result, TraceError};
use crate::record::Label;
use crate::stats::StatArray;
use crate::writer::path::{check_extension, next_sequence, sequenced_path, sequence_of};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const TABLE_EXT: &str = "json";
pub const ARRAYS_EXT: &str = "arrays.msgpack";
pub const HEADER_EXT: &str = "header.msgpack";

/// The three files of one export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub table: PathBuf,
    pub arrays: PathBuf,
    pub header: PathBuf,
}

impl ExportPaths {
    pub fn new(dir: &Path, stem: &str, seq: u64) -> Self {
        Self {
            table: sequenced_path(dir, stem, seq, TABLE_EXT),
            arrays: sequenced_path(dir, stem, seq, ARRAYS_EXT),
            header: sequenced_path(dir, stem, seq, HEADER_EXT),
        }
    }

    /// Siblings of a `<stem>.<seq>.json` table file
    pub fn from_table(table: &Path) -> Option<Self> {
        let seq = sequence_of(table, TABLE_EXT)?;
        let name = table.file_name()?.to_str()?;
        let stem = name.strip_suffix(&format!(".{}.{}", seq, TABLE_EXT))?;
        let dir = table.parent().unwrap_or_else(|| Path::new(""));
        Some(Self::new(dir, stem, seq))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExportedProfile {
    pub(crate) table: SummaryTable,
    pub(crate) bulk: BulkStore,
    pub(crate) registry: ExportRegistry,
}

impl ExportedProfile {
    /// Rows of one (module, function) group
    pub fn rows(&self, module: &str, function: &str) -> &[ExportRow] {
        self.table.rows(module, function)
    }

    pub fn table(&self) -> &SummaryTable {
        &self.table
    }

    pub fn bulk(&self) -> &BulkStore {
        &self.bulk
    }

    pub fn registry(&self) -> &ExportRegistry {
        &self.registry
    }

    /// Decompressed array stored under `key` (see [`super::bulk::array_key`])
    pub fn array(&self, module: &str, function: &str, key: &str) -> Result<StatArray> {
        self.bulk
            .get(module, function, key)
            .ok_or_else(|| TraceError::ArrayNotFound(format!("{}/{}/{}", module, function, key)))?
            .decompress()
    }

    /// Per-element statistic of one argument at one capture time
    pub fn statistic(
        &self,
        module: &str,
        function: &str,
        label: Label,
        name: &str,
        time: u64,
        stat: StatKind,
    ) -> Result<StatArray> {
        self.array(module, function, &super::bulk::array_key(label, name, time, stat))
    }

    /// Persist to `dir` as `<base>.<seq>.{json,arrays.msgpack,header.msgpack}`
    ///
    /// `seq` is the first token under which none of the three files exist.
    pub fn write_to<P: AsRef<Path>>(&self, dir: P, base: &str) -> Result<ExportPaths> {
        let dir = dir.as_ref();
        let stem = check_extension(base, TABLE_EXT)?;
        fs::create_dir_all(dir)?;

        let seq = next_sequence(dir, &stem, &[TABLE_EXT, ARRAYS_EXT, HEADER_EXT], 0);
        let paths = ExportPaths::new(dir, &stem, seq);

        fs::write(&paths.table, serde_json::to_vec_pretty(&self.table)?)?;
        self.bulk.write(&paths.arrays)?;
        self.registry.write(&paths.header)?;

        info!(
            table = %paths.table.display(),
            rows = self.table.len(),
            arrays = self.bulk.len(),
            callables = self.registry.len(),
            "Wrote export"
        );
        Ok(paths)
    }

    pub fn load(paths: &ExportPaths) -> Result<Self> {
        let table = serde_json::from_slice(&fs::read(&paths.table)?)?;
        Ok(Self {
            table,
            bulk: BulkStore::read(&paths.arrays)?,
            registry: ExportRegistry::read(&paths.header)?,
        })
    }
}
