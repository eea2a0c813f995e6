//! Standard event names used in logging.
//!
//! Every engine log line carries one of these in its `event` field so JSONL
//! output can be filtered without parsing messages.

pub mod event_names {
    // Run lifecycle
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";

    // Config
    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_ERROR: &str = "config.error";

    // Process table
    pub const FORK: &str = "sim.fork";
    pub const EXIT: &str = "sim.exit";
    pub const WAIT: &str = "sim.wait";
    pub const REPARENT: &str = "sim.reparent";
    pub const SWITCH: &str = "sim.switch";

    // Pipe registry
    pub const PIPE: &str = "sim.pipe";
    pub const READ: &str = "sim.read";
    pub const WRITE: &str = "sim.write";
    pub const CLOSE: &str = "sim.close";
    pub const TEARDOWN: &str = "sim.teardown";

    // Failures
    pub const EXHAUSTED: &str = "sim.exhausted";
    pub const REJECTED: &str = "sim.rejected";

    // Demo and script drivers
    pub const DEMO_CHECK: &str = "demo.check";
    pub const SCRIPT_STEP: &str = "script.step";
}
