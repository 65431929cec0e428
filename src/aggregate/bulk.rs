//! Bulk array store
//!
//! Full per-element statistics of multi-element arguments, gzip-compressed
//! as little-endian f64 bytes. Arrays are grouped by module and function and
//! keyed `<label>_<name>_<time>_<stat>`.

use crate::error::{Result, TraceError};
use crate::record::Label;
use crate::stats::StatArray;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

/// Which statistic an array holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Mean,
    Std,
    Sig,
}

impl StatKind {
    pub const ALL: [StatKind; 3] = [StatKind::Mean, StatKind::Std, StatKind::Sig];

    pub fn as_str(self) -> &'static str {
        match self {
            StatKind::Mean => "mean",
            StatKind::Std => "std",
            StatKind::Sig => "sig",
        }
    }
}

/// Key of one array within its (module, function) group
pub fn array_key(label: Label, name: &str, time: u64, stat: StatKind) -> String {
    format!("{}_{}_{}_{}", label, name, time, stat.as_str())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedArray {
    pub shape: Vec<usize>,
    #[serde(with = "byte_buf")]
    pub data: Vec<u8>,
}

impl CompressedArray {
    pub fn compress(array: &StatArray) -> Result<Self> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        for value in &array.values {
            encoder.write_all(&value.to_le_bytes())?;
        }
        Ok(Self {
            shape: array.shape.clone(),
            data: encoder.finish()?,
        })
    }

    pub fn decompress(&self) -> Result<StatArray> {
        let mut raw = Vec::new();
        GzDecoder::new(self.data.as_slice()).read_to_end(&mut raw)?;

        let values: Vec<f64> = raw
            .chunks_exact(8)
            .map(|chunk| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(chunk);
                f64::from_le_bytes(bytes)
            })
            .collect();

        let expected: usize = self.shape.iter().product();
        if raw.len() % 8 != 0 || values.len() != expected {
            return Err(TraceError::ShapeMismatch {
                expected: self.shape.clone(),
                found: vec![raw.len() / 8],
            });
        }

        Ok(StatArray {
            shape: self.shape.clone(),
            values,
        })
    }
}

/// Serialize a byte vector as a msgpack `bin` rather than an integer array
mod byte_buf {
    use serde::de::{Error, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        deserializer.deserialize_byte_buf(ByteBufVisitor)
    }

    struct ByteBufVisitor;

    impl<'de> Visitor<'de> for ByteBufVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a byte buffer")
        }

        fn visit_bytes<E: Error>(self, v: &[u8]) -> Result<Vec<u8>, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E: Error>(self, v: Vec<u8>) -> Result<Vec<u8>, E> {
            Ok(v)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<u8>, A::Error> {
            let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(byte) = seq.next_element()? {
                bytes.push(byte);
            }
            Ok(bytes)
        }
    }
}

type ArrayGroup = BTreeMap<String, CompressedArray>;

/// module → function → key → array
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BulkStore {
    groups: BTreeMap<String, BTreeMap<String, ArrayGroup>>,
}

impl BulkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, module: &str, function: &str, key: String, array: CompressedArray) {
        self.groups
            .entry(module.to_string())
            .or_default()
            .entry(function.to_string())
            .or_default()
            .insert(key, array);
    }

    pub fn get(&self, module: &str, function: &str, key: &str) -> Option<&CompressedArray> {
        self.groups.get(module)?.get(function)?.get(key)
    }

    pub fn keys<'a>(&'a self, module: &str, function: &str) -> impl Iterator<Item = &'a str> {
        self.groups
            .get(module)
            .and_then(|functions| functions.get(function))
            .into_iter()
            .flat_map(|group| group.keys().map(String::as_str))
    }

    pub fn remove_group(&mut self, module: &str, function: &str) {
        if let Some(functions) = self.groups.get_mut(module) {
            functions.remove(function);
            if functions.is_empty() {
                self.groups.remove(module);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.groups
            .values()
            .flat_map(|functions| functions.values())
            .map(BTreeMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, rmp_serde::to_vec_named(self)?)?;
        Ok(())
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = fs::read(path)?;
        Ok(rmp_serde::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_key_format() {
        assert_eq!(array_key(Label::Inputs, "a", 3, StatKind::Sig), "inputs_a_3_sig");
    }

    #[test]
    fn test_compress_restores_values() {
        let array = StatArray {
            shape: vec![2, 2],
            values: vec![1.5, -0.0, f64::MAX, 53.0],
        };
        let compressed = CompressedArray::compress(&array).unwrap();
        assert_eq!(compressed.decompress().unwrap(), array);
    }

    #[test]
    fn test_shape_mismatch_detected() {
        let mut compressed = CompressedArray::compress(&StatArray::zeros(&[3])).unwrap();
        compressed.shape = vec![4];
        assert!(matches!(
            compressed.decompress(),
            Err(TraceError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_store_persists_as_bin() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("s.arrays.msgpack");
        let mut store = BulkStore::new();
        let array = CompressedArray::compress(&StatArray::zeros(&[16])).unwrap();
        store.insert("m", "f", array_key(Label::Outputs, "result", 0, StatKind::Mean), array);

        store.write(&path).unwrap();
        let back = BulkStore::read(&path).unwrap();
        assert_eq!(back, store);
        assert_eq!(back.keys("m", "f").collect::<Vec<_>>(), vec!["outputs_result_0_mean"]);

        store.remove_group("m", "f");
        assert!(store.is_empty());
    }
}
