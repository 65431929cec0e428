//! Trace stream framing and replay
//!
//! A stream is a concatenation of frames. Each frame is a msgpack `bin`
//! header followed by the named-field msgpack encoding of one
//! [`TraceRecord`]. The length prefix lets replay step over a payload that
//! fails to decode without losing the rest of the stream.
//!
//! Replay ends normally only at a clean end of data. A payload that does not
//! decode is skipped with a warning; a truncated or malformed frame header
//! ends replay with a warning.

use crate::error::{Result, TraceError};
use crate::record::TraceRecord;
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Encode one record as a self-delimiting frame
pub fn encode_frame(record: &TraceRecord) -> Result<Vec<u8>> {
    let payload = rmp_serde::to_vec_named(record)?;
    let len = u32::try_from(payload.len()).map_err(|_| TraceError::CorruptFrame {
        offset: 0,
        reason: format!("record of {} bytes exceeds frame limit", payload.len()),
    })?;

    let mut frame = Vec::with_capacity(payload.len() + 5);
    rmp::encode::write_bin_len(&mut frame, len).map_err(|e| TraceError::CorruptFrame {
        offset: 0,
        reason: e.to_string(),
    })?;
    frame.extend_from_slice(&payload);
    Ok(frame)
}

enum Storage {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Storage {
    fn bytes(&self) -> &[u8] {
        match self {
            Storage::Mapped(mmap) => &mmap[..],
            Storage::Owned(bytes) => bytes.as_slice(),
        }
    }
}

/// Iterator over the records of one trace stream
pub struct TraceReader {
    source: Option<PathBuf>,
    storage: Storage,
    offset: usize,
    skipped: usize,
    finished: bool,
}

impl TraceReader {
    /// Memory-map a stream file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;

        // Mapping a zero-length file fails on some platforms
        let storage = if file.metadata()?.len() == 0 {
            Storage::Owned(Vec::new())
        } else {
            // SAFETY: the stream is only read; writers append under their own lock
            // and a concurrent truncation is outside the supported use.
            Storage::Mapped(unsafe { Mmap::map(&file) }?)
        };

        debug!(path = %path.display(), "Opened trace stream");
        Ok(Self {
            source: Some(path.to_path_buf()),
            storage,
            offset: 0,
            skipped: 0,
            finished: false,
        })
    }

    /// Replay a stream held in memory
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            source: None,
            storage: Storage::Owned(bytes),
            offset: 0,
            skipped: 0,
            finished: false,
        }
    }

    /// Payloads skipped because they failed to decode
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Byte offset of the next frame
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn source_name(&self) -> String {
        self.source
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "<memory>".to_string())
    }

    /// Read the next frame's payload bounds, or `None` at the end of data
    fn next_frame(&mut self) -> Option<std::result::Result<(usize, usize), TraceError>> {
        let data = self.storage.bytes();
        if self.offset >= data.len() {
            return None;
        }

        let mut cursor = &data[self.offset..];
        let available = cursor.len();
        let len = match rmp::decode::read_bin_len(&mut cursor) {
            Ok(len) => len as usize,
            Err(e) => {
                return Some(Err(TraceError::CorruptFrame {
                    offset: self.offset,
                    reason: format!("bad frame header: {}", e),
                }))
            }
        };

        let start = self.offset + (available - cursor.len());
        let end = start.saturating_add(len);
        if end > data.len() {
            return Some(Err(TraceError::CorruptFrame {
                offset: self.offset,
                reason: format!(
                    "truncated frame: {} bytes declared, {} available",
                    len,
                    data.len() - start
                ),
            }));
        }
        Some(Ok((start, end)))
    }
}

impl Iterator for TraceReader {
    type Item = TraceRecord;

    fn next(&mut self) -> Option<TraceRecord> {
        while !self.finished {
            let (start, end) = match self.next_frame() {
                None => {
                    self.finished = true;
                    return None;
                }
                Some(Err(e)) => {
                    warn!(source = %self.source_name(), error = %e, "Ending replay early");
                    self.finished = true;
                    return None;
                }
                Some(Ok(bounds)) => bounds,
            };

            let frame_offset = self.offset;
            self.offset = end;
            match rmp_serde::from_slice::<TraceRecord>(&self.storage.bytes()[start..end]) {
                Ok(record) => return Some(record),
                Err(e) => {
                    self.skipped += 1;
                    warn!(
                        source = %self.source_name(),
                        offset = frame_offset,
                        error = %e,
                        "Skipping undecodable record"
                    );
                }
            }
        }
        None
    }
}

/// Read every record of a stream file
pub fn read_records<P: AsRef<Path>>(path: P) -> Result<Vec<TraceRecord>> {
    Ok(TraceReader::open(path)?.collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CallSite, Label, TracedCallable};
    use crate::value::{ArgumentMap, Capture};

    fn record(time: u64) -> TraceRecord {
        let callable = TracedCallable {
            id: 11,
            module: "m".to_string(),
            name: "f".to_string(),
        };
        let mut args = ArgumentMap::new();
        args.insert("x".to_string(), (time as f64).capture());
        TraceRecord::new(&callable, time, Label::Inputs, args, CallSite::default())
    }

    fn stream(records: &[TraceRecord]) -> Vec<u8> {
        records
            .iter()
            .flat_map(|r| encode_frame(r).unwrap())
            .collect()
    }

    #[test]
    fn test_replay_in_order() {
        let records: Vec<_> = (0..5).map(record).collect();
        let replayed: Vec<_> = TraceReader::from_bytes(stream(&records)).collect();
        assert_eq!(replayed, records);
    }

    #[test]
    fn test_empty_stream_yields_nothing() {
        let mut reader = TraceReader::from_bytes(Vec::new());
        assert!(reader.next().is_none());
        assert_eq!(reader.skipped(), 0);
    }

    #[test]
    fn test_corrupt_payload_is_skipped() {
        let mut bytes = encode_frame(&record(0)).unwrap();
        // A well-formed frame whose payload is not a record
        rmp::encode::write_bin_len(&mut bytes, 3).unwrap();
        bytes.extend_from_slice(&[0xc1, 0xc1, 0xc1]);
        bytes.extend(encode_frame(&record(2)).unwrap());

        let mut reader = TraceReader::from_bytes(bytes);
        let times: Vec<_> = reader.by_ref().map(|r| r.time).collect();
        assert_eq!(times, vec![0, 2]);
        assert_eq!(reader.skipped(), 1);
    }

    #[test]
    fn test_truncated_tail_ends_replay() {
        let mut bytes = stream(&[record(0), record(1)]);
        bytes.truncate(bytes.len() - 4);

        let replayed: Vec<_> = TraceReader::from_bytes(bytes).collect();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].time, 0);
    }

    #[test]
    fn test_bad_marker_ends_replay() {
        let mut bytes = stream(&[record(0)]);
        bytes.push(0x01);
        let replayed: Vec<_> = TraceReader::from_bytes(bytes).collect();
        assert_eq!(replayed.len(), 1);
    }

    #[test]
    fn test_open_file_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("t.0.msgpack");
        std::fs::write(&path, stream(&[record(4), record(9)])).unwrap();

        let times: Vec<_> = read_records(&path).unwrap().iter().map(|r| r.time).collect();
        assert_eq!(times, vec![4, 9]);

        let empty = dir.path().join("empty.msgpack");
        std::fs::write(&empty, b"").unwrap();
        assert!(read_records(&empty).unwrap().is_empty());
    }
}
