//! Fuzz target for annotation parsing and shape normalization.
//!
//! Feeds arbitrary bytes through prefix stripping, record parsing, and the
//! geometry normalizer, checking for panics, crashes, or hangs.

#![no_main]

use libfuzzer_sys::fuzz_target;
use railprep::annotation::{bare_file_name, strip_stale_prefixes, AnnotationRecord, DEFAULT_STALE_PREFIXES};
use railprep::geometry::normalize;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let text = strip_stale_prefixes(text, &DEFAULT_STALE_PREFIXES);
    let Ok(record) = serde_json::from_str::<AnnotationRecord>(&text) else {
        return;
    };

    let _ = bare_file_name(&record.image_reference);
    for shape in &record.shapes {
        if let Ok(bbox) = normalize(&shape.points, 640.0, 480.0) {
            let _ = bbox.clamped();
        }
    }
});
