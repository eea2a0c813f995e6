//! Fuzz target for forkpipe.json parsing and validation.
//!
//! Tests that config parsing and validation handle arbitrary input without
//! panicking, and that any config passing validation builds a usable engine.

#![no_main]

use forkpipe_config::{validate_config, SimConfig};
use forkpipe_core::Engine;
use libfuzzer_sys::fuzz_target;

// Keep engine construction cheap; validation itself is unbounded.
const MAX_ROWS: usize = 4096;

fuzz_target!(|data: &[u8]| {
    let Ok(config) = serde_json::from_slice::<SimConfig>(data) else {
        return;
    };
    if validate_config(&config).is_err() {
        return;
    }
    if config.max_processes > MAX_ROWS
        || config.max_pipes > MAX_ROWS
        || config.max_descriptors > MAX_ROWS
        || config.pipe_buffer_size > MAX_ROWS
    {
        return;
    }

    let mut engine = Engine::new(config);
    assert_eq!(engine.live_process_count(), 1);
    let _ = engine.fork();
    let _ = engine.pipe();
});
