//! Fuzz target for `classes.txt` parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use railprep::registry::fuzz_parse_class_index;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1024 * 1024 {
        return;
    }

    if let Ok(text) = std::str::from_utf8(data) {
        let _ = fuzz_parse_class_index(text);
    }
});
