//! Fuzz target for script parsing.
//!
//! Tests that `Script::parse` handles arbitrary input without panicking and
//! that whatever parses also runs without panicking on tight limits.

#![no_main]

use forkpipe_config::{get_preset, PresetName};
use forkpipe_core::script::Script;
use forkpipe_core::Engine;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let Ok(script) = Script::parse(data) else {
        return;
    };

    let mut engine = Engine::new(get_preset(PresetName::Tiny));
    let report = script.run(&mut engine);
    assert_eq!(report.steps.len(), script.steps().len());
});
