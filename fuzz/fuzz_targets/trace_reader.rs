#![no_main]

use libfuzzer_sys::fuzz_target;
use sigtrace::reader::TraceReader;

fuzz_target!(|data: &[u8]| {
    // Replay must stop cleanly on any input, never panic
    let mut reader = TraceReader::from_bytes(data.to_vec());
    for record in reader.by_ref() {
        let _ = record.args.len();
    }
    assert!(reader.offset() <= data.len());
});
