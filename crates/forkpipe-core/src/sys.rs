//! Integer calling convention of the simulated system calls.
//!
//! Each function mirrors its OS counterpart: non-negative results mean
//! success, negative results are the stable codes of
//! [`SimError::code`](forkpipe_common::SimError::code).
//!
//! ```
//! use forkpipe_core::{sys, Engine};
//!
//! let mut engine = Engine::default();
//! let pid = sys::fork(&mut engine);
//! if pid > 0 {
//!     // parent branch
//! } else if pid == 0 {
//!     // child branch
//! } else {
//!     // fork failed
//! }
//! ```

use crate::engine::Engine;
use forkpipe_common::{Fd, Pid, SimError};

pub(crate) fn resolve(fd: i32) -> Result<Fd, SimError> {
    Fd::from_raw(fd).ok_or(SimError::InvalidHandle { raw: fd })
}

/// `>0` child pid, `0` in the child branch, `<0` on failure.
pub fn fork(engine: &mut Engine) -> i32 {
    match engine.fork() {
        Ok(forked) => forked.as_raw(),
        Err(e) => e.code(),
    }
}

/// `0` once the current context is a zombie; `<0` if it could not exit.
pub fn exit(engine: &mut Engine, status: i32) -> i32 {
    match engine.exit(status) {
        Ok(()) => 0,
        Err(e) => e.code(),
    }
}

/// Reaped pid with `status` filled in, or `<0` (status untouched).
pub fn wait(engine: &mut Engine, status: &mut i32) -> i32 {
    match engine.wait() {
        Ok(reaped) => {
            *status = reaped.status;
            reaped.pid.as_i32()
        }
        Err(e) => e.code(),
    }
}

/// Like [`wait`] but for one specific child pid.
pub fn waitpid(engine: &mut Engine, pid: i32, status: &mut i32) -> i32 {
    let Ok(pid) = u32::try_from(pid) else {
        return SimError::NoChild {
            pid: engine.current_pid(),
        }
        .code();
    };
    match engine.wait_pid(Pid(pid)) {
        Ok(reaped) => {
            *status = reaped.status;
            reaped.pid.as_i32()
        }
        Err(e) => e.code(),
    }
}

/// `0` with `fds = [read, write]`, or `<0` (fds untouched).
pub fn pipe(engine: &mut Engine, fds: &mut [i32; 2]) -> i32 {
    match engine.pipe() {
        Ok(ends) => {
            *fds = [ends.read.as_i32(), ends.write.as_i32()];
            0
        }
        Err(e) => e.code(),
    }
}

/// Bytes copied into `buf` (at most `count`), `0` when nothing is buffered.
pub fn read(engine: &mut Engine, fd: i32, buf: &mut [u8], count: usize) -> isize {
    let max = count.min(buf.len());
    match resolve(fd).and_then(|fd| engine.read(fd, &mut buf[..max])) {
        Ok(outcome) => outcome.bytes() as isize,
        Err(e) => e.code() as isize,
    }
}

/// Bytes accepted from `buf` (at most `count`); may be short when nearly full.
pub fn write(engine: &mut Engine, fd: i32, buf: &[u8], count: usize) -> isize {
    let len = count.min(buf.len());
    match resolve(fd).and_then(|fd| engine.write(fd, &buf[..len])) {
        Ok(accepted) => accepted as isize,
        Err(e) => e.code() as isize,
    }
}

/// `0` on success, `<0` for an unknown or already-closed handle.
pub fn close(engine: &mut Engine, fd: i32) -> i32 {
    match resolve(fd).and_then(|fd| engine.close(fd)) {
        Ok(()) => 0,
        Err(e) => e.code(),
    }
}
