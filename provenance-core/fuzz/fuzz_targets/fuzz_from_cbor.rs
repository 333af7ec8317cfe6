#![no_main]

//! Fuzz target for Fingerprint::from_cbor()
//!
//! Decoded fingerprints are compared against themselves, which walks the
//! hash-length checks with attacker-chosen shapes.
//!
//! Run with: cargo +nightly fuzz run fuzz_from_cbor

use libfuzzer_sys::fuzz_target;
use provenance_core::{compare, Fingerprint};

fuzz_target!(|data: &[u8]| {
    if let Ok(fingerprint) = Fingerprint::from_cbor(data) {
        let _ = fingerprint.phash_hex();
        let _ = compare(&fingerprint, &fingerprint);
    }
});
