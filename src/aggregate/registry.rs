//! Export registry (the header file)
//!
//! Maps each callable id to its name, module and, per call site, the set of
//! capture times observed there.

use crate::error::Result;
use crate::record::{CallSite, TraceRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteTimes {
    pub call_site: CallSite,
    pub times: BTreeSet<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    pub module: String,
    pub call_sites: Vec<SiteTimes>,
}

impl RegistryEntry {
    pub fn times_at(&self, site: &CallSite) -> Option<&BTreeSet<u64>> {
        self.call_sites
            .iter()
            .find(|s| &s.call_site == site)
            .map(|s| &s.times)
    }

    /// Distinct capture times across all call sites
    pub fn call_count(&self) -> usize {
        self.call_sites
            .iter()
            .flat_map(|s| s.times.iter())
            .collect::<BTreeSet<_>>()
            .len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportRegistry {
    pub callables: BTreeMap<u64, RegistryEntry>,
}

impl ExportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the record's callable, call site and time
    pub fn observe(&mut self, record: &TraceRecord) {
        let entry = self
            .callables
            .entry(record.callable_id)
            .or_insert_with(|| RegistryEntry {
                name: record.function.clone(),
                module: record.module.clone(),
                call_sites: Vec::new(),
            });

        match entry
            .call_sites
            .iter_mut()
            .find(|s| s.call_site == record.call_site)
        {
            Some(site) => {
                site.times.insert(record.time);
            }
            None => entry.call_sites.push(SiteTimes {
                call_site: record.call_site.clone(),
                times: BTreeSet::from([record.time]),
            }),
        }
    }

    pub fn get(&self, id: u64) -> Option<&RegistryEntry> {
        self.callables.get(&id)
    }

    pub fn len(&self) -> usize {
        self.callables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callables.is_empty()
    }

    /// Persist as a single msgpack object
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, rmp_serde::to_vec_named(self)?)?;
        Ok(())
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = fs::read(path)?;
        Ok(rmp_serde::from_slice(&bytes)?)
    }
}
