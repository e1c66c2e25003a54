#![no_main]

//! Fuzz target for the mock manifest trailer reader
//!
//! Run with: cargo +nightly fuzz run fuzz_manifest_trailer

use libfuzzer_sys::fuzz_target;
use provmark_core::{ManifestEngine, MockManifestEngine};

fuzz_target!(|data: &[u8]| {
    // Garbage must come back as an error or "no manifest", never a panic
    let _ = MockManifestEngine::new().read("video/mp4", data);
});
