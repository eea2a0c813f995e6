//! Line-oriented scripts of engine operations.
//!
//! One operation per line; blank lines and `#` comments are skipped:
//!
//! ```text
//! pipe                     => 0
//! fork                     # parent branch, returns the child pid
//! write 4 hello\n          # text runs to end of line; \n \t \0 \\ \# \= escapes
//! switch 2
//! read 3 256               => 6
//! exit 0
//! wait
//! status
//! ```
//!
//! A trailing `=> <value>` turns a line into a check. The value is either the
//! raw integer result or an error name such as `bad_descriptor`. Each line
//! reports the integer its call would return under the system-call
//! convention.

use crate::engine::Engine;
use crate::logging::event_names;
use crate::pipe::ReadOutcome;
use crate::status::SimulationStatus;
use forkpipe_common::{ErrorKind, Fd, Pid, SimError, StructuredError};
use forkpipe_config::ForkMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Errors found while parsing a script. Nothing runs if any line is bad.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("line {line}: unknown operation '{op}'")]
    UnknownOp { line: usize, op: String },

    #[error("line {line}: '{op}' needs {what}")]
    MissingArgument {
        line: usize,
        op: String,
        what: &'static str,
    },

    #[error("line {line}: invalid {what} '{value}'")]
    InvalidArgument {
        line: usize,
        what: &'static str,
        value: String,
    },

    #[error("line {line}: unexpected trailing input '{rest}'")]
    TrailingInput { line: usize, rest: String },
}

impl ScriptError {
    pub fn line(&self) -> usize {
        match self {
            ScriptError::UnknownOp { line, .. }
            | ScriptError::MissingArgument { line, .. }
            | ScriptError::InvalidArgument { line, .. }
            | ScriptError::TrailingInput { line, .. } => *line,
        }
    }
}

/// One engine operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Fork(Option<ForkMode>),
    Exit(i32),
    Wait,
    WaitPid(i32),
    Pipe,
    Write { fd: i32, data: Vec<u8> },
    Read { fd: i32, max: usize },
    Close(i32),
    Switch(i32),
    Status,
}

/// A parsed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub line: usize,
    pub source: String,
    pub op: Op,
    pub expect: Option<i64>,
}

/// A parsed script, ready to run any number of times.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    steps: Vec<Step>,
}

fn code_for_name(name: &str) -> Option<i32> {
    let kind = match name.to_ascii_lowercase().as_str() {
        "resource_exhausted" => ErrorKind::ResourceExhausted,
        "bad_descriptor" => ErrorKind::BadDescriptor,
        "closed_pipe" => ErrorKind::ClosedPipe,
        "no_child" => ErrorKind::NoChild,
        "no_such_process" => ErrorKind::NoSuchProcess,
        _ => return None,
    };
    Some(match kind {
        ErrorKind::ResourceExhausted => SimError::CODE_RESOURCE_EXHAUSTED,
        ErrorKind::BadDescriptor => SimError::CODE_BAD_DESCRIPTOR,
        ErrorKind::ClosedPipe => SimError::CODE_CLOSED_PIPE,
        ErrorKind::NoChild => SimError::CODE_NO_CHILD,
        ErrorKind::NoSuchProcess => SimError::CODE_NO_SUCH_PROCESS,
    })
}

/// Decode `\n`, `\t`, `\0`, `\\`, `\#`, and `\=` in write payloads.
fn unescape(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let mut bytes = text.bytes();
    while let Some(b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(b'n') => out.push(b'\n'),
            Some(b't') => out.push(b'\t'),
            Some(b'0') => out.push(0),
            Some(b'\\') => out.push(b'\\'),
            Some(b'#') => out.push(b'#'),
            Some(b'=') => out.push(b'='),
            Some(other) => out.extend_from_slice(&[b'\\', other]),
            None => out.push(b'\\'),
        }
    }
    out
}

/// Cut a trailing unescaped `#` comment.
fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'#' => return &line[..i],
            _ => i += 1,
        }
    }
    line
}

/// Split off the last unescaped `=>` and the expectation after it.
fn split_expect(line: &str) -> (&str, Option<&str>) {
    let bytes = line.as_bytes();
    let mut found = None;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'=' if bytes.get(i + 1) == Some(&b'>') => {
                found = Some(i);
                i += 2;
            }
            _ => i += 1,
        }
    }
    match found {
        Some(at) => (&line[..at], Some(&line[at + 2..])),
        None => (line, None),
    }
}

struct LineParser<'a> {
    line: usize,
    op: &'a str,
    rest: &'a str,
}

impl<'a> LineParser<'a> {
    fn next_word(&mut self, what: &'static str) -> Result<&'a str, ScriptError> {
        let rest = self.rest.trim_start();
        if rest.is_empty() {
            return Err(ScriptError::MissingArgument {
                line: self.line,
                op: self.op.to_string(),
                what,
            });
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        self.rest = &rest[end..];
        Ok(&rest[..end])
    }

    fn int<T: std::str::FromStr>(&mut self, what: &'static str) -> Result<T, ScriptError> {
        let word = self.next_word(what)?;
        word.parse().map_err(|_| ScriptError::InvalidArgument {
            line: self.line,
            what,
            value: word.to_string(),
        })
    }

    fn finish(self) -> Result<(), ScriptError> {
        let rest = self.rest.trim();
        if rest.is_empty() {
            Ok(())
        } else {
            Err(ScriptError::TrailingInput {
                line: self.line,
                rest: rest.to_string(),
            })
        }
    }
}

fn parse_expect(line: usize, text: &str) -> Result<i64, ScriptError> {
    let text = text.trim();
    if let Ok(value) = text.parse::<i64>() {
        return Ok(value);
    }
    code_for_name(text)
        .map(i64::from)
        .ok_or_else(|| ScriptError::InvalidArgument {
            line,
            what: "expected value",
            value: text.to_string(),
        })
}

fn parse_line(line: usize, raw: &str) -> Result<Option<Step>, ScriptError> {
    let body = strip_comment(raw);
    let (body, expect) = match split_expect(body) {
        (body, Some(text)) => (body, Some(parse_expect(line, text)?)),
        (body, None) => (body, None),
    };
    let body = body.trim();
    if body.is_empty() {
        return Ok(None);
    }

    let op_end = body.find(char::is_whitespace).unwrap_or(body.len());
    let name = &body[..op_end];
    let mut p = LineParser {
        line,
        op: name,
        rest: &body[op_end..],
    };

    let op = match name {
        "fork" => {
            let rest = p.rest.trim();
            let mode = if rest.is_empty() {
                None
            } else {
                let word = p.next_word("a branch")?;
                Some(ForkMode::parse(word).ok_or_else(|| ScriptError::InvalidArgument {
                    line,
                    what: "branch",
                    value: word.to_string(),
                })?)
            };
            p.finish()?;
            Op::Fork(mode)
        }
        "exit" => {
            let status = p.int("an exit status")?;
            p.finish()?;
            Op::Exit(status)
        }
        "wait" => {
            p.finish()?;
            Op::Wait
        }
        "waitpid" => {
            let pid = p.int("a pid")?;
            p.finish()?;
            Op::WaitPid(pid)
        }
        "pipe" => {
            p.finish()?;
            Op::Pipe
        }
        "write" => {
            let fd = p.int("a descriptor")?;
            let text = p.rest.strip_prefix(' ').unwrap_or(p.rest);
            Op::Write {
                fd,
                data: unescape(text),
            }
        }
        "read" => {
            let fd = p.int("a descriptor")?;
            let max = p.int("a byte count")?;
            p.finish()?;
            Op::Read { fd, max }
        }
        "close" => {
            let fd = p.int("a descriptor")?;
            p.finish()?;
            Op::Close(fd)
        }
        "switch" => {
            let pid = p.int("a pid")?;
            p.finish()?;
            Op::Switch(pid)
        }
        "status" => {
            p.finish()?;
            Op::Status
        }
        other => {
            return Err(ScriptError::UnknownOp {
                line,
                op: other.to_string(),
            })
        }
    };

    Ok(Some(Step {
        line,
        source: body.to_string(),
        op,
        expect,
    }))
}

/// What one step produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub line: usize,
    pub command: String,
    /// Integer the call returns under the system-call convention.
    pub result: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StructuredError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SimulationStatus>,
    #[serde(skip)]
    sim_error: Option<SimError>,
}

impl StepResult {
    /// The engine error behind a negative result.
    pub fn sim_error(&self) -> Option<&SimError> {
        self.sim_error.as_ref()
    }

    /// False only when an expectation was given and not met.
    pub fn passed(&self) -> bool {
        self.expected.map_or(true, |e| e == self.result)
    }
}

/// Everything a script run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptReport {
    pub steps: Vec<StepResult>,
    pub checks: usize,
    pub failed: usize,
}

impl ScriptReport {
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for ScriptReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            write!(f, "{:>4}: {} -> {}", step.line, step.command, step.result)?;
            if let Some(err) = &step.error {
                write!(f, " [{}]", err.kind)?;
            }
            if let Some(detail) = &step.detail {
                write!(f, " {}", detail)?;
            }
            if let Some(expected) = step.expected {
                if step.passed() {
                    write!(f, " (ok)")?;
                } else {
                    write!(f, " (FAIL: expected {})", expected)?;
                }
            }
            writeln!(f)?;
            if let Some(status) = &step.status {
                write!(f, "{}", status)?;
            }
        }
        if self.checks > 0 {
            writeln!(
                f,
                "Checks passed: {}/{}",
                self.checks - self.failed,
                self.checks
            )?;
        }
        Ok(())
    }
}

fn raw_pid(value: i32) -> Result<Pid, SimError> {
    u32::try_from(value)
        .map(Pid)
        .map_err(|_| SimError::InvalidPid { raw: value })
}

impl Script {
    /// Parse a whole script, failing on the first malformed line.
    pub fn parse(source: &str) -> Result<Script, ScriptError> {
        let mut steps = Vec::new();
        for (i, raw) in source.lines().enumerate() {
            if let Some(step) = parse_line(i + 1, raw)? {
                steps.push(step);
            }
        }
        Ok(Script { steps })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Execute every step in order. Engine failures are results, not errors.
    pub fn run(&self, engine: &mut Engine) -> ScriptReport {
        let steps: Vec<StepResult> = self.steps.iter().map(|s| run_step(engine, s)).collect();
        let checks = steps.iter().filter(|s| s.expected.is_some()).count();
        let failed = steps.iter().filter(|s| !s.passed()).count();
        ScriptReport {
            steps,
            checks,
            failed,
        }
    }
}

fn run_step(engine: &mut Engine, step: &Step) -> StepResult {
    let mut detail = None;
    let mut status = None;

    let outcome: Result<i64, SimError> = match &step.op {
        Op::Fork(mode) => {
            let mode = mode.unwrap_or(engine.config().fork_mode);
            engine.fork_with(mode).map(|forked| {
                if forked.is_child() {
                    detail = Some(format!("now in pid {}", engine.current_pid()));
                }
                i64::from(forked.as_raw())
            })
        }
        Op::Exit(code) => engine.exit(*code).map(|()| {
            detail = Some(format!("context pid {}", engine.current_pid()));
            0
        }),
        Op::Wait => engine.wait().map(|r| {
            detail = Some(format!("status {}", r.status));
            i64::from(r.pid.as_i32())
        }),
        Op::WaitPid(pid) => {
            if *pid < 0 {
                Err(SimError::NoChild {
                    pid: engine.current_pid(),
                })
            } else {
                raw_pid(*pid).and_then(|pid| engine.wait_pid(pid)).map(|r| {
                    detail = Some(format!("status {}", r.status));
                    i64::from(r.pid.as_i32())
                })
            }
        }
        Op::Pipe => engine.pipe().map(|ends| {
            detail = Some(format!("fds [{}, {}]", ends.read, ends.write));
            0
        }),
        Op::Write { fd, data } => Fd::from_raw(*fd)
            .ok_or(SimError::InvalidHandle { raw: *fd })
            .and_then(|fd| engine.write(fd, data))
            .map(|n| n as i64),
        Op::Read { fd, max } => {
            let mut buf = vec![0u8; (*max).min(engine.config().pipe_buffer_size)];
            Fd::from_raw(*fd)
                .ok_or(SimError::InvalidHandle { raw: *fd })
                .and_then(|fd| engine.read(fd, &mut buf))
                .map(|outcome| {
                    detail = Some(match outcome {
                        ReadOutcome::Data(n) => {
                            format!("{:?}", String::from_utf8_lossy(&buf[..n]))
                        }
                        other => other.as_str().to_string(),
                    });
                    outcome.bytes() as i64
                })
        }
        Op::Close(fd) => Fd::from_raw(*fd)
            .ok_or(SimError::InvalidHandle { raw: *fd })
            .and_then(|fd| engine.close(fd))
            .map(|()| 0),
        Op::Switch(pid) => raw_pid(*pid)
            .and_then(|pid| engine.switch_context(pid))
            .map(|previous| {
                detail = Some(format!("from pid {}", previous));
                0
            }),
        Op::Status => {
            status = Some(engine.status());
            Ok(0)
        }
    };

    let (result, sim_error) = match outcome {
        Ok(value) => (value, None),
        Err(e) => {
            detail = Some(e.to_string());
            (i64::from(e.code()), Some(e))
        }
    };

    debug!(
        event = event_names::SCRIPT_STEP,
        line = step.line,
        command = %step.source,
        result,
        "step"
    );

    StepResult {
        line: step.line,
        command: step.source.clone(),
        result,
        error: sim_error.as_ref().map(StructuredError::from),
        detail,
        expected: step.expect,
        status,
        sim_error,
    }
}
