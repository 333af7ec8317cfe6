#![no_main]

//! Fuzz target for watermark bitstring handling
//!
//! Run with: cargo +nightly fuzz run fuzz_bitstring

use libfuzzer_sys::fuzz_target;
use provenance_core::watermark::{bit_error_rate, bytes_from_bitstring, parse_bitstring};
use provenance_core::{FusionConfig, FusionInputs, FusionScorer};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let mid = text
        .char_indices()
        .nth(text.chars().count() / 2)
        .map_or(text.len(), |(i, _)| i);
    let (expected, recovered) = text.split_at(mid);

    let _ = parse_bitstring(expected);
    let _ = bytes_from_bitstring(recovered);

    let ber = bit_error_rate(expected, recovered);
    assert!((0.0..=1.0).contains(&ber));

    let result = FusionScorer::new(FusionConfig::default())
        .map(|scorer| scorer.fuse(&FusionInputs::new().with_watermark_bits(expected, recovered)));
    if let Ok(result) = result {
        assert!((0.0..=1.0).contains(&result.score));
    }
});
