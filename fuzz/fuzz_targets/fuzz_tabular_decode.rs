//! Fuzz target for the archive data file decoder.

#![no_main]

use libfuzzer_sys::fuzz_target;
use oa_bundle::tabular::decode;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = decode(text);
    }
});
