//! Fuzz target for arbitrary engine operation sequences.
//!
//! Drives the typed API with random calls on tight limits and checks the
//! table invariants after every step.

#![no_main]

use arbitrary::Arbitrary;
use forkpipe_config::{ForkMode, SimConfig};
use forkpipe_core::{Engine, Fd, Pid};
use libfuzzer_sys::fuzz_target;
use std::collections::HashSet;

#[derive(Debug, Arbitrary)]
enum Op {
    Fork { child: bool },
    Exit(i32),
    Wait,
    WaitPid(u8),
    Switch(u8),
    Pipe,
    Write { fd: u8, len: u8 },
    Read { fd: u8, max: u8 },
    Close(u8),
}

#[derive(Debug, Arbitrary)]
struct Input {
    max_processes: u8,
    max_pipes: u8,
    buffer: u8,
    ops: Vec<Op>,
}

fuzz_target!(|input: Input| {
    let max_processes = usize::from(input.max_processes % 16) + 1;
    let max_pipes = usize::from(input.max_pipes % 8) + 1;
    let buffer = usize::from(input.buffer % 64) + 1;
    let config = SimConfig::default()
        .with_max_processes(max_processes)
        .with_max_pipes(max_pipes)
        .with_pipe_buffer_size(buffer);
    let mut engine = Engine::new(config);
    let payload = [0xA5u8; 256];

    for op in input.ops.iter().take(512) {
        let _ = match *op {
            Op::Fork { child } => {
                let mode = if child { ForkMode::Child } else { ForkMode::Parent };
                engine.fork_with(mode).map(|_| ())
            }
            Op::Exit(status) => engine.exit(status),
            Op::Wait => engine.wait().map(|_| ()),
            Op::WaitPid(pid) => engine.wait_pid(Pid(u32::from(pid))).map(|_| ()),
            Op::Switch(pid) => engine.switch_context(Pid(u32::from(pid))).map(|_| ()),
            Op::Pipe => engine.pipe().map(|_| ()),
            Op::Write { fd, len } => engine
                .write(Fd(u32::from(fd)), &payload[..usize::from(len)])
                .map(|_| ()),
            Op::Read { fd, max } => {
                let mut buf = vec![0u8; usize::from(max)];
                engine.read(Fd(u32::from(fd)), &mut buf).map(|_| ())
            }
            Op::Close(fd) => engine.close(Fd(u32::from(fd))),
        };

        assert!(engine.live_process_count() <= max_processes);
        assert!(engine.live_channel_count() <= max_pipes);
        assert!(engine.open_descriptor_count() <= 2 * max_pipes);

        let pids: HashSet<Pid> = engine.processes().map(|p| p.pid).collect();
        assert_eq!(pids.len(), engine.live_process_count());

        for channel in engine.channels() {
            assert!(channel.buffered() <= buffer);
        }
    }
});
