//! Built-in simulation scenarios.
//!
//! Each scenario drives an engine through the integer convention in
//! [`crate::sys`] the way a program would drive real system calls, then
//! records pass/fail checks. Where a real program would have two processes
//! running side by side, the scenario plays the parent branch, switches the
//! context to the child, and plays the child branch.

use crate::engine::Engine;
use crate::logging::event_names;
use crate::sys;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use forkpipe_common::{Fd, Pid, SimError};
use forkpipe_config::ForkMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// Payload of the pipe scenario, NUL terminator included.
pub const PIPE_MESSAGE: &[u8] = b"Hello from pipe simulation!\0";

/// Payload the parent sends its child in the combined scenario.
pub const PARENT_MESSAGE: &[u8] = b"Message from parent process\0";

/// Size of the reader's buffer in every scenario.
pub const READ_BUFFER_SIZE: usize = 256;

/// Size of the bulk transfer in the comprehensive scenario.
pub const BULK_TRANSFER_SIZE: usize = 511;

/// Children forked at once in the comprehensive scenario.
const MULTI_FORK_COUNT: usize = 3;

/// One built-in scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    /// fork, child exit, parent wait
    Fork,
    /// pipe, write, read, close
    Pipe,
    /// parent writes through a pipe to a forked child
    Combined,
    /// multi-fork, multi-pipe, bulk transfer, and limit checks
    Comprehensive,
}

impl Scenario {
    pub const ALL: &'static [Scenario] = &[
        Scenario::Fork,
        Scenario::Pipe,
        Scenario::Combined,
        Scenario::Comprehensive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::Fork => "fork",
            Scenario::Pipe => "pipe",
            Scenario::Combined => "combined",
            Scenario::Comprehensive => "comprehensive",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Scenario::Fork => "Fork Simulation",
            Scenario::Pipe => "Pipe Simulation",
            Scenario::Combined => "Fork and Pipe Combined",
            Scenario::Comprehensive => "Comprehensive Simulation",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one assertion inside a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

/// All checks recorded by one scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub checks: Vec<Check>,
}

impl ScenarioReport {
    pub fn passed(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    pub fn total(&self) -> usize {
        self.checks.len()
    }

    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }
}

/// Results of a demo run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoReport {
    pub generated_at: DateTime<Utc>,
    pub scenarios: Vec<ScenarioReport>,
    pub passed: usize,
    pub total: usize,
    /// Percentage of checks that passed.
    pub success_rate: f64,
}

impl DemoReport {
    fn from_scenarios(scenarios: Vec<ScenarioReport>) -> Self {
        let passed = scenarios.iter().map(ScenarioReport::passed).sum();
        let total = scenarios.iter().map(ScenarioReport::total).sum();
        let success_rate = if total == 0 {
            0.0
        } else {
            passed as f64 * 100.0 / total as f64
        };
        DemoReport {
            generated_at: Utc::now(),
            scenarios,
            passed,
            total,
            success_rate,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }
}

impl fmt::Display for DemoReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for report in &self.scenarios {
            writeln!(f, "=== SIMULATION TEST: {} ===", report.scenario.title())?;
            for check in &report.checks {
                let mark = if check.passed { "PASS" } else { "FAIL" };
                writeln!(f, "  [{}] {} ({})", mark, check.name, check.detail)?;
            }
            writeln!(f)?;
        }
        writeln!(f, "Tests passed: {}/{}", self.passed, self.total)?;
        writeln!(f, "Success rate: {:.1}%", self.success_rate)
    }
}

struct Recorder {
    scenario: Scenario,
    checks: Vec<Check>,
}

impl Recorder {
    fn new(scenario: Scenario) -> Self {
        Recorder {
            scenario,
            checks: Vec::new(),
        }
    }

    fn check(&mut self, name: &str, passed: bool, detail: impl Into<String>) -> bool {
        let detail = detail.into();
        if passed {
            info!(event = event_names::DEMO_CHECK, scenario = %self.scenario, check = name, %detail, "passed");
        } else {
            warn!(event = event_names::DEMO_CHECK, scenario = %self.scenario, check = name, %detail, "failed");
        }
        self.checks.push(Check {
            name: name.to_string(),
            passed,
            detail,
        });
        passed
    }

    fn finish(self) -> ScenarioReport {
        ScenarioReport {
            scenario: self.scenario,
            checks: self.checks,
        }
    }
}

/// Fork reporting the parent branch whatever the configured mode.
fn fork_parent(engine: &mut Engine) -> i32 {
    engine
        .fork_with(ForkMode::Parent)
        .map_or_else(|e| e.code(), |forked| forked.as_raw())
}

/// Enter the child's branch and exit it with `status`.
fn run_child_exit(engine: &mut Engine, child: i32, status: i32) -> i32 {
    match u32::try_from(child).map(Pid) {
        Ok(pid) if engine.switch_context(pid).is_ok() => sys::exit(engine, status),
        Ok(pid) => SimError::NoSuchProcess { pid }.code(),
        Err(_) => SimError::InvalidPid { raw: child }.code(),
    }
}

fn close_all(engine: &mut Engine, fds: &[i32]) -> bool {
    fds.iter()
        .fold(true, |ok, &fd| sys::close(engine, fd) == 0 && ok)
}

fn fork_scenario(engine: &mut Engine) -> ScenarioReport {
    let mut rec = Recorder::new(Scenario::Fork);
    let home = engine.current_pid();

    let pid = fork_parent(engine);
    if rec.check("fork returns a child pid", pid > 0, format!("fork() = {pid}")) {
        let rc = run_child_exit(engine, pid, 0);
        rec.check(
            "child exits and context returns to parent",
            rc == 0 && engine.current_pid() == home,
            format!("exit(0) = {rc}, context {}", engine.current_pid()),
        );

        let mut status = -1;
        let reaped = sys::wait(engine, &mut status);
        rec.check(
            "parent reaps child",
            reaped == pid && status == 0,
            format!("wait() = {reaped}, status {status}"),
        );
    }

    match engine.fork_with(ForkMode::Child) {
        Ok(forked) if forked.is_child() => {
            let child = engine.current_pid();
            rec.check(
                "child branch observes 0",
                forked.as_raw() == 0,
                format!("fork() = 0 in pid {child}"),
            );
            let rc = sys::exit(engine, 7);
            let mut status = -1;
            let reaped = sys::wait(engine, &mut status);
            rec.check(
                "exit status reaches parent",
                rc == 0 && reaped == child.as_i32() && status == 7,
                format!("wait() = {reaped}, status {status}"),
            );
        }
        Ok(forked) => {
            rec.check(
                "child branch observes 0",
                false,
                format!("fork() = {}", forked.as_raw()),
            );
        }
        Err(e) => {
            rec.check("child branch observes 0", false, e.to_string());
        }
    }

    let mut status = 0;
    let none = sys::wait(engine, &mut status);
    rec.check(
        "wait with no exited child fails",
        none == SimError::CODE_NO_CHILD,
        format!("wait() = {none}"),
    );

    rec.finish()
}

fn pipe_scenario(engine: &mut Engine) -> ScenarioReport {
    let mut rec = Recorder::new(Scenario::Pipe);
    let mut fds = [-1; 2];
    let rc = sys::pipe(engine, &mut fds);
    if !rec.check(
        "pipe creates two descriptors",
        rc == 0 && fds[0] >= 0 && fds[1] >= 0 && fds[0] != fds[1],
        format!("pipe() = {rc}, fds [{}, {}]", fds[0], fds[1]),
    ) {
        return rec.finish();
    }

    let written = sys::write(engine, fds[1], PIPE_MESSAGE, PIPE_MESSAGE.len());
    rec.check(
        "write accepts the message",
        written > 0,
        format!("write() = {written} of {}", PIPE_MESSAGE.len()),
    );

    let mut buf = [0u8; READ_BUFFER_SIZE];
    let got = sys::read(engine, fds[0], &mut buf, READ_BUFFER_SIZE);
    let n = got.max(0) as usize;
    rec.check(
        "read returns exactly what was written",
        got == written && buf[..n] == PIPE_MESSAGE[..n],
        format!(
            "read() = {got}: {:?}",
            String::from_utf8_lossy(&buf[..n]).trim_end_matches('\0')
        ),
    );

    let again = sys::read(engine, fds[0], &mut buf, READ_BUFFER_SIZE);
    rec.check(
        "empty pipe reads 0",
        again == 0,
        format!("read() = {again}"),
    );

    rec.check(
        "both ends close",
        close_all(engine, &fds),
        format!("close({}), close({})", fds[0], fds[1]),
    );

    let stale = sys::read(engine, fds[0], &mut buf, READ_BUFFER_SIZE);
    rec.check(
        "closed descriptor is rejected",
        stale == SimError::CODE_BAD_DESCRIPTOR as isize,
        format!("read() = {stale}"),
    );

    rec.finish()
}

fn combined_scenario(engine: &mut Engine) -> ScenarioReport {
    let mut rec = Recorder::new(Scenario::Combined);
    let home = engine.current_pid();
    let channels_before = engine.live_channel_count();

    let mut fds = [-1; 2];
    let rc = sys::pipe(engine, &mut fds);
    if !rec.check("pipe created", rc == 0, format!("pipe() = {rc}")) {
        return rec.finish();
    }

    let pid = fork_parent(engine);
    if !rec.check("fork returns a child pid", pid > 0, format!("fork() = {pid}")) {
        close_all(engine, &fds);
        return rec.finish();
    }

    // parent branch
    let written = sys::write(engine, fds[1], PARENT_MESSAGE, PARENT_MESSAGE.len());
    rec.check(
        "parent writes to the pipe",
        written > 0,
        format!("write() = {written}"),
    );

    // child branch
    let switched = engine.switch_context(Pid(pid as u32)).is_ok();
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let got = sys::read(engine, fds[0], &mut buf, READ_BUFFER_SIZE);
    let n = got.max(0) as usize;
    rec.check(
        "child reads the parent's message",
        switched && got == written && buf[..n] == PARENT_MESSAGE[..n],
        format!(
            "read() = {got} in pid {}: {:?}",
            engine.current_pid(),
            String::from_utf8_lossy(&buf[..n]).trim_end_matches('\0')
        ),
    );
    let closed = sys::close(engine, fds[0]);
    let exited = sys::exit(engine, 0);
    rec.check(
        "child closes its end and exits",
        closed == 0 && exited == 0 && engine.current_pid() == home,
        format!("close() = {closed}, exit(0) = {exited}"),
    );

    // parent branch again
    let closed = sys::close(engine, fds[1]);
    rec.check(
        "closing the last end tears the channel down",
        closed == 0 && engine.live_channel_count() == channels_before,
        format!("close() = {closed}, live channels {}", engine.live_channel_count()),
    );

    let mut status = -1;
    let reaped = sys::wait(engine, &mut status);
    rec.check(
        "parent reaps child",
        reaped == pid && status == 0,
        format!("wait() = {reaped}, status {status}"),
    );

    rec.finish()
}

fn comprehensive_scenario(engine: &mut Engine) -> ScenarioReport {
    let mut rec = Recorder::new(Scenario::Comprehensive);
    multiple_forks(engine, &mut rec);
    multiple_pipes(engine, &mut rec);
    bulk_transfer(engine, &mut rec);
    partial_write(engine, &mut rec);
    pipe_exhaustion(engine, &mut rec);
    handle_reuse(engine, &mut rec);
    orphan_adoption(engine, &mut rec);
    rec.finish()
}

fn multiple_forks(engine: &mut Engine, rec: &mut Recorder) {
    let pids: Vec<i32> = (0..MULTI_FORK_COUNT).map(|_| fork_parent(engine)).collect();
    let mut unique = pids.clone();
    unique.sort_unstable();
    unique.dedup();
    if !rec.check(
        "multiple forks return distinct pids",
        pids.iter().all(|&p| p > 0) && unique.len() == pids.len(),
        format!("fork() = {pids:?}"),
    ) {
        return;
    }

    // exit newest first; wait must follow exit order
    for (i, &pid) in pids.iter().enumerate().rev() {
        run_child_exit(engine, pid, i as i32);
    }
    let mut reaped = Vec::new();
    let mut status = 0;
    loop {
        let pid = sys::wait(engine, &mut status);
        if pid <= 0 {
            break;
        }
        reaped.push(pid);
    }
    let expected: Vec<i32> = pids.iter().rev().copied().collect();
    rec.check(
        "zombies are reaped in exit order",
        reaped == expected,
        format!("wait() order {reaped:?}"),
    );
}

fn multiple_pipes(engine: &mut Engine, rec: &mut Recorder) {
    let mut a = [-1; 2];
    let mut b = [-1; 2];
    let ra = sys::pipe(engine, &mut a);
    let rb = sys::pipe(engine, &mut b);
    if !rec.check(
        "two pipes coexist",
        ra == 0 && rb == 0,
        format!("pipe() = {ra}, {rb}"),
    ) {
        for fds in [a, b] {
            if fds[0] >= 0 {
                close_all(engine, &fds);
            }
        }
        return;
    }

    sys::write(engine, a[1], b"first", 5);
    sys::write(engine, b[1], b"second", 6);
    let mut buf = [0u8; 16];
    let na = sys::read(engine, a[0], &mut buf, 16);
    let first = buf[..na.max(0) as usize].to_vec();
    let nb = sys::read(engine, b[0], &mut buf, 16);
    let second = buf[..nb.max(0) as usize].to_vec();
    rec.check(
        "pipes keep their bytes apart",
        first == b"first" && second == b"second",
        format!("read() = {na}, {nb}"),
    );

    rec.check(
        "all pipe ends close",
        close_all(engine, &a) && close_all(engine, &b),
        format!("closed {a:?} and {b:?}"),
    );
}

fn bulk_transfer(engine: &mut Engine, rec: &mut Recorder) {
    let mut fds = [-1; 2];
    if sys::pipe(engine, &mut fds) != 0 {
        rec.check("bulk transfer", false, "pipe() failed");
        return;
    }
    let data = vec![b'A'; BULK_TRANSFER_SIZE];
    let written = sys::write(engine, fds[1], &data, data.len());
    let mut buf = vec![0u8; BULK_TRANSFER_SIZE + 1];
    let len = buf.len();
    let got = sys::read(engine, fds[0], &mut buf, len);
    let n = got.max(0) as usize;
    rec.check(
        "bulk transfer arrives intact",
        written > 0 && got == written && buf[..n].iter().all(|&b| b == b'A'),
        format!("write() = {written}, read() = {got}"),
    );
    close_all(engine, &fds);
}

fn partial_write(engine: &mut Engine, rec: &mut Recorder) {
    let mut fds = [-1; 2];
    if sys::pipe(engine, &mut fds) != 0 {
        rec.check("partial write", false, "pipe() failed");
        return;
    }
    let capacity = engine.config().pipe_buffer_size;
    let free = capacity.min(3);
    let fill = vec![b'x'; capacity - free];
    sys::write(engine, fds[1], &fill, fill.len());
    let tail = b"0123456789";
    let accepted = sys::write(engine, fds[1], tail, tail.len());
    let full = sys::write(engine, fds[1], tail, tail.len());
    rec.check(
        "write into a nearly full pipe is short",
        accepted == free as isize && full == 0,
        format!("write() = {accepted} with {free} free, then {full}"),
    );
    close_all(engine, &fds);
}

fn pipe_exhaustion(engine: &mut Engine, rec: &mut Recorder) {
    let before = engine.live_channel_count();
    let mut opened: Vec<[i32; 2]> = Vec::new();
    let failure = loop {
        let mut fds = [-1; 2];
        let rc = sys::pipe(engine, &mut fds);
        if rc != 0 {
            break rc;
        }
        opened.push(fds);
    };
    rec.check(
        "pipe beyond capacity is refused",
        failure == SimError::CODE_RESOURCE_EXHAUSTED && !opened.is_empty(),
        format!("opened {}, then pipe() = {failure}", opened.len()),
    );

    let live = engine.live_channel_count();
    rec.check(
        "refused pipe leaves existing pipes intact",
        live == before + opened.len()
            && opened
                .iter()
                .flatten()
                .all(|&fd| engine.descriptor(Fd(fd as u32)).is_some()),
        format!("{live} live channels"),
    );
    for fds in &opened {
        close_all(engine, fds);
    }
}

fn handle_reuse(engine: &mut Engine, rec: &mut Recorder) {
    let mut first = [-1; 2];
    if sys::pipe(engine, &mut first) != 0 {
        rec.check("descriptor reuse", false, "pipe() failed");
        return;
    }
    close_all(engine, &first);
    let mut buf = [0u8; 4];
    let stale_read = sys::read(engine, first[0], &mut buf, 4);
    let stale_write = sys::write(engine, first[1], b"x", 1);
    rec.check(
        "closed handles are rejected",
        stale_read == SimError::CODE_BAD_DESCRIPTOR as isize
            && stale_write == SimError::CODE_BAD_DESCRIPTOR as isize,
        format!("read() = {stale_read}, write() = {stale_write}"),
    );

    let mut second = [-1; 2];
    let rc = sys::pipe(engine, &mut second);
    rec.check(
        "lowest free handles are reused",
        rc == 0 && second == first,
        format!("first {first:?}, second {second:?}"),
    );
    if rc == 0 {
        close_all(engine, &second);
    }
}

fn orphan_adoption(engine: &mut Engine, rec: &mut Recorder) {
    let home = engine.current_pid();
    let middle = fork_parent(engine);
    if middle <= 0 {
        rec.check("orphans are adopted by the root", false, format!("fork() = {middle}"));
        return;
    }
    let _ = engine.switch_context(Pid(middle as u32));
    let grandchild = fork_parent(engine);
    sys::exit(engine, 0);

    let adopted = u32::try_from(grandchild)
        .ok()
        .and_then(|g| engine.process(Pid(g)))
        .is_some_and(|p| p.parent == Pid::ROOT);
    let grand_exit = run_child_exit(engine, grandchild, 0);
    let _ = engine.switch_context(Pid::ROOT);

    let mut status = 0;
    let first = sys::wait(engine, &mut status);
    let second = sys::wait(engine, &mut status);
    let _ = engine.switch_context(home);
    rec.check(
        "orphans are adopted by the root",
        grandchild > 0 && adopted && grand_exit == 0 && first == middle && second == grandchild,
        format!("wait() = {first}, {second}"),
    );
}

/// Run one scenario on `engine`.
pub fn run_scenario(engine: &mut Engine, scenario: Scenario) -> ScenarioReport {
    info!(event = event_names::RUN_STARTED, scenario = %scenario, "scenario started");
    let report = match scenario {
        Scenario::Fork => fork_scenario(engine),
        Scenario::Pipe => pipe_scenario(engine),
        Scenario::Combined => combined_scenario(engine),
        Scenario::Comprehensive => comprehensive_scenario(engine),
    };
    info!(
        event = event_names::RUN_FINISHED,
        scenario = %scenario,
        passed = report.passed(),
        total = report.total(),
        "scenario finished"
    );
    report
}

/// Run several scenarios in order on one engine.
pub fn run_scenarios(engine: &mut Engine, scenarios: &[Scenario]) -> DemoReport {
    let reports = scenarios
        .iter()
        .map(|&s| run_scenario(engine, s))
        .collect();
    DemoReport::from_scenarios(reports)
}
