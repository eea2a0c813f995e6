//! Property-based tests for engine invariants.

use forkpipe_common::Resource;
use forkpipe_core::{sys, Engine, Fd, Forked, Pid, ReadOutcome, SimConfig, SimError};
use proptest::prelude::*;
use std::collections::{BTreeSet, HashSet, VecDeque};

#[derive(Debug, Clone)]
enum PipeOp {
    Write(Vec<u8>),
    Read(usize),
}

fn pipe_op_strategy() -> impl Strategy<Value = PipeOp> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..40).prop_map(PipeOp::Write),
        (0usize..40).prop_map(PipeOp::Read),
    ]
}

#[derive(Debug, Clone)]
enum TableOp {
    Pipe,
    Close(usize),
}

fn table_op_strategy() -> impl Strategy<Value = TableOp> {
    prop_oneof![
        2 => Just(TableOp::Pipe),
        3 => any::<usize>().prop_map(TableOp::Close),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Every pid fork hands out is unique among live rows, and the table
    /// refuses exactly once it is full.
    #[test]
    fn fork_pids_unique_among_live_rows(capacity in 1usize..40, attempts in 0usize..80) {
        let mut engine = Engine::new(SimConfig::default().with_max_processes(capacity));
        let mut seen = HashSet::new();
        for _ in 0..attempts {
            match engine.fork() {
                Ok(Forked::Parent { child }) => {
                    prop_assert!(child.0 > 1, "fork returned reserved pid {}", child);
                    prop_assert!(seen.insert(child), "pid {} handed out twice", child);
                }
                Ok(Forked::Child) => prop_assert!(false, "default mode follows the parent"),
                Err(e) => {
                    prop_assert_eq!(
                        e,
                        SimError::ResourceExhausted { resource: Resource::Processes, capacity }
                    );
                }
            }
        }
        prop_assert_eq!(seen.len(), attempts.min(capacity - 1));
        prop_assert_eq!(engine.live_process_count(), 1 + seen.len());
    }

    /// Zombies come back from `wait` in the order they exited, with their status.
    #[test]
    fn wait_reaps_in_exit_order(
        order in Just((0usize..12).collect::<Vec<_>>()).prop_shuffle(),
        statuses in prop::collection::vec(any::<i32>(), 12),
    ) {
        let mut engine = Engine::default();
        let children: Vec<Pid> = (0..12)
            .map(|_| match engine.fork() {
                Ok(Forked::Parent { child }) => child,
                other => panic!("unexpected fork result {:?}", other),
            })
            .collect();

        for &i in &order {
            engine.switch_context(children[i]).unwrap();
            engine.exit(statuses[i]).unwrap();
            prop_assert_eq!(engine.current_pid(), Pid::ROOT);
        }

        for &i in &order {
            let before = engine.live_process_count();
            let reaped = engine.wait().unwrap();
            prop_assert_eq!(reaped.pid, children[i]);
            prop_assert_eq!(reaped.status, statuses[i]);
            prop_assert_eq!(engine.live_process_count(), before - 1);
        }
        prop_assert!(
            matches!(engine.wait(), Err(SimError::NoChild { .. })),
            "wait after the last reap should report no child"
        );
    }

    /// A channel behaves like a bounded FIFO: writes accept what fits, reads
    /// return bytes in write order, and nothing is lost or invented.
    #[test]
    fn pipe_matches_bounded_fifo_model(
        capacity in 1usize..64,
        ops in prop::collection::vec(pipe_op_strategy(), 0..60),
    ) {
        let mut engine = Engine::new(SimConfig::default().with_pipe_buffer_size(capacity));
        let ends = engine.pipe().unwrap();
        let mut model: VecDeque<u8> = VecDeque::new();
        let mut written = Vec::new();
        let mut read_back = Vec::new();

        for op in ops {
            match op {
                PipeOp::Write(data) => {
                    let accepted = engine.write(ends.write, &data).unwrap();
                    let expected = data.len().min(capacity - model.len());
                    prop_assert_eq!(accepted, expected);
                    model.extend(&data[..accepted]);
                    written.extend_from_slice(&data[..accepted]);
                }
                PipeOp::Read(max) => {
                    let mut buf = vec![0u8; max];
                    let outcome = engine.read(ends.read, &mut buf).unwrap();
                    let expected = max.min(model.len());
                    prop_assert_eq!(outcome.bytes(), expected);
                    if expected == 0 {
                        prop_assert_eq!(outcome, ReadOutcome::Empty);
                    }
                    let want: Vec<u8> = model.drain(..expected).collect();
                    prop_assert_eq!(&buf[..expected], &want[..]);
                    read_back.extend_from_slice(&buf[..expected]);
                }
            }
        }

        let mut rest = vec![0u8; capacity];
        let n = engine.read(ends.read, &mut rest).unwrap().bytes();
        read_back.extend_from_slice(&rest[..n]);
        prop_assert_eq!(read_back, written);
    }

    /// Descriptor handles are always the lowest free values, counts track
    /// the open set, and a failed `pipe` changes nothing.
    #[test]
    fn descriptor_table_matches_model(ops in prop::collection::vec(table_op_strategy(), 0..80)) {
        let max_pipes = 4;
        let config = SimConfig::default().with_max_pipes(max_pipes);
        let first = config.first_descriptor;
        let last = first + config.max_descriptors as u32;
        let mut engine = Engine::new(config);

        let mut open: BTreeSet<u32> = BTreeSet::new();
        // one entry per live channel: its ends, each paired with whether it is still open
        let mut channels: Vec<[(u32, bool); 2]> = Vec::new();

        for op in ops {
            match op {
                TableOp::Pipe => {
                    let lowest = {
                        let mut free = (first..last).filter(|fd| !open.contains(fd));
                        (free.next(), free.next())
                    };
                    let before = (engine.open_descriptor_count(), engine.live_channel_count());
                    match engine.pipe() {
                        Ok(ends) => {
                            prop_assert!(channels.len() < max_pipes);
                            prop_assert_eq!(lowest, (Some(ends.read.0), Some(ends.write.0)));
                            open.insert(ends.read.0);
                            open.insert(ends.write.0);
                            channels.push([(ends.read.0, true), (ends.write.0, true)]);
                        }
                        Err(e) => {
                            prop_assert_eq!(e.code(), SimError::CODE_RESOURCE_EXHAUSTED);
                            prop_assert!(channels.len() == max_pipes || lowest.1.is_none());
                            prop_assert_eq!(
                                (engine.open_descriptor_count(), engine.live_channel_count()),
                                before
                            );
                        }
                    }
                }
                TableOp::Close(pick) => {
                    if open.is_empty() {
                        prop_assert_eq!(
                            engine.close(Fd(first)),
                            Err(SimError::BadDescriptor { fd: Fd(first) })
                        );
                        continue;
                    }
                    let fd = *open.iter().nth(pick % open.len()).unwrap();
                    engine.close(Fd(fd)).unwrap();
                    open.remove(&fd);

                    let pos = channels
                        .iter()
                        .position(|ends| ends.contains(&(fd, true)))
                        .unwrap();
                    for end in channels[pos].iter_mut() {
                        if *end == (fd, true) {
                            end.1 = false;
                        }
                    }
                    if channels[pos].iter().all(|&(_, is_open)| !is_open) {
                        channels.remove(pos);
                    }
                    prop_assert_eq!(
                        engine.close(Fd(fd)),
                        Err(SimError::BadDescriptor { fd: Fd(fd) })
                    );
                }
            }
            prop_assert_eq!(engine.open_descriptor_count(), open.len());
            prop_assert_eq!(engine.live_channel_count(), channels.len());
        }
    }

    /// The raw layer reports the same byte counts as the typed layer.
    #[test]
    fn raw_round_trip_preserves_bytes(payload in prop::collection::vec(any::<u8>(), 0..256)) {
        let mut engine = Engine::default();
        let mut fds = [0i32; 2];
        prop_assert_eq!(sys::pipe(&mut engine, &mut fds), 0);

        let written = sys::write(&mut engine, fds[1], &payload, payload.len());
        prop_assert_eq!(written, payload.len() as isize);

        let mut buf = [0u8; 256];
        let read = sys::read(&mut engine, fds[0], &mut buf, 256);
        prop_assert_eq!(read, payload.len() as isize);
        prop_assert_eq!(&buf[..payload.len()], &payload[..]);
        prop_assert_eq!(sys::read(&mut engine, fds[0], &mut buf, 256), 0);
    }
}
