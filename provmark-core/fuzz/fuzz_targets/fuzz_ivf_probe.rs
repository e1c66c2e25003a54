#![no_main]

//! Fuzz target for the IVF layout parser
//!
//! Any input must either parse into a layout whose units tile the stream
//! or be rejected with an error.
//!
//! Run with: cargo +nightly fuzz run fuzz_ivf_probe

use libfuzzer_sys::fuzz_target;
use provmark_core::media::ivf::parse_layout;
use provmark_core::{plan_chunks, ChunkPolicy};

fuzz_target!(|data: &[u8]| {
    if let Ok(layout) = parse_layout(data) {
        assert_eq!(layout.total_len, data.len() as u64);
        assert!(layout.validate().is_ok());
        let _ = plan_chunks(&layout, ChunkPolicy::Frames(8));
    }
});
