//! Fuzz target for obsarchive.toml parsing and validation.

#![no_main]

use libfuzzer_sys::fuzz_target;
use oa_config::{validate_settings, Settings};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(settings) = Settings::parse_toml(text) {
        let _ = validate_settings(&settings);
    }
});
