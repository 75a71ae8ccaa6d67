#![allow(dead_code)]

use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

pub const EPS: f64 = 1e-9;

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(64);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 1024;
    config
}

/// Image dimensions as read from a real header: positive whole pixels.
pub fn arb_image_size() -> impl Strategy<Value = (f64, f64)> {
    (1u32..=4096, 1u32..=4096).prop_map(|(w, h)| (w as f64, h as f64))
}

/// A point anywhere in or somewhat outside a 4096x4096 frame.
pub fn arb_point() -> impl Strategy<Value = [f64; 2]> {
    (-512.0f64..4608.0, -512.0f64..4608.0).prop_map(|(x, y)| [x, y])
}

pub fn arb_polygon(max_points: usize) -> impl Strategy<Value = Vec<[f64; 2]>> {
    prop::collection::vec(arb_point(), 2..=max_points)
}

/// Raw labels drawn from a small vocabulary, with case, whitespace, and
/// punctuation noise, so that distinct strings often clean to one entry.
pub fn arb_raw_label() -> impl Strategy<Value = String> {
    let base = prop::sample::select(vec!["vehicle", "train", "person", "signal", "level crossing"]);
    let case = prop::sample::select(vec![0u8, 1, 2]);
    let pad = prop::sample::select(vec!["", " ", "\t"]);
    let punct = prop::sample::select(vec!["", ":", "/", "?"]);

    (base, case, pad, punct).prop_map(|(base, case, pad, punct)| {
        let cased = match case {
            0 => base.to_string(),
            1 => base.to_uppercase(),
            _ => {
                let mut chars = base.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
        };
        format!("{}{}{}{}", pad, cased, punct, pad)
    })
}

pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= EPS * a.abs().max(b.abs()).max(1.0)
}
