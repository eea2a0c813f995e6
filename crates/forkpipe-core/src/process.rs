//! Process table: identity, parentage, and lifecycle of simulated processes.
//!
//! Rows live in a fixed arena indexed through a pid map. A row is created
//! RUNNING by `spawn`, becomes ZOMBIE on `mark_exited`, and leaves the table
//! when its parent reaps it. The record handed back by a reap carries the
//! REAPED state; no row in the table is ever observed in that state.

use forkpipe_common::Pid;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// First pid handed out after the root.
const FIRST_CHILD_PID: u32 = 2;

/// Lifecycle state of a simulated process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Running,
    Zombie,
    Reaped,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Running => "RUNNING",
            ProcessState::Zombie => "ZOMBIE",
            ProcessState::Reaped => "REAPED",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row of the process table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedProcess {
    pub pid: Pid,
    pub parent: Pid,
    pub state: ProcessState,
    /// Set once the process has exited.
    pub exit_status: Option<i32>,
    /// Position in global exit order; orders zombies for reaping.
    #[serde(skip)]
    exit_seq: Option<u64>,
}

impl SimulatedProcess {
    fn new(pid: Pid, parent: Pid) -> Self {
        SimulatedProcess {
            pid,
            parent,
            state: ProcessState::Running,
            exit_status: None,
            exit_seq: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == ProcessState::Running
    }

    pub fn is_zombie(&self) -> bool {
        self.state == ProcessState::Zombie
    }
}

/// Arena of process rows with pid lookup.
#[derive(Debug, Clone)]
pub struct ProcessTable {
    rows: Vec<Option<SimulatedProcess>>,
    index: HashMap<Pid, usize>,
    next_pid: u32,
    pid_max: u32,
    exits: u64,
}

impl ProcessTable {
    /// Build a table holding only the root process.
    ///
    /// `capacity` counts the root's row; it is raised to 1 if given as 0.
    pub fn new(capacity: usize, pid_max: u32) -> Self {
        let mut rows = vec![None; capacity.max(1)];
        rows[0] = Some(SimulatedProcess::new(Pid::ROOT, Pid::NONE));
        let mut index = HashMap::new();
        index.insert(Pid::ROOT, 0);

        ProcessTable {
            rows,
            index,
            next_pid: FIRST_CHILD_PID,
            pid_max: pid_max.max(FIRST_CHILD_PID + 1),
            exits: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.rows.len()
    }

    /// Rows currently RUNNING or ZOMBIE.
    pub fn live_count(&self) -> usize {
        self.index.len()
    }

    pub fn is_full(&self) -> bool {
        self.live_count() == self.capacity()
    }

    pub fn get(&self, pid: Pid) -> Option<&SimulatedProcess> {
        self.index.get(&pid).and_then(|&i| self.rows[i].as_ref())
    }

    fn get_mut(&mut self, pid: Pid) -> Option<&mut SimulatedProcess> {
        let i = *self.index.get(&pid)?;
        self.rows[i].as_mut()
    }

    pub fn is_running(&self, pid: Pid) -> bool {
        self.get(pid).is_some_and(SimulatedProcess::is_running)
    }

    /// Next free pid, wrapping at `pid_max` and skipping live ones.
    fn allocate_pid(&mut self) -> Option<Pid> {
        let span = self.pid_max - FIRST_CHILD_PID;
        for _ in 0..span {
            let candidate = Pid(self.next_pid);
            self.next_pid += 1;
            if self.next_pid >= self.pid_max {
                self.next_pid = FIRST_CHILD_PID;
            }
            if !self.index.contains_key(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    /// Insert a RUNNING child of `parent`.
    ///
    /// Returns `None` when the table is full.
    pub fn spawn(&mut self, parent: Pid) -> Option<Pid> {
        if self.is_full() {
            return None;
        }
        let row = self.rows.iter().position(Option::is_none)?;
        let pid = self.allocate_pid()?;
        self.rows[row] = Some(SimulatedProcess::new(pid, parent));
        self.index.insert(pid, row);
        Some(pid)
    }

    /// Turn a RUNNING row into a ZOMBIE holding `status`.
    ///
    /// Any children of the exiting process are handed to the root. Returns
    /// the re-parented pids, or `None` if `pid` is not running.
    pub fn mark_exited(&mut self, pid: Pid, status: i32) -> Option<Vec<Pid>> {
        let seq = self.exits;
        let row = self.get_mut(pid).filter(|p| p.is_running())?;
        row.state = ProcessState::Zombie;
        row.exit_status = Some(status);
        row.exit_seq = Some(seq);
        self.exits += 1;

        if pid == Pid::ROOT {
            return Some(Vec::new());
        }

        let mut orphans = Vec::new();
        for row in self.rows.iter_mut().flatten() {
            if row.parent == pid {
                row.parent = Pid::ROOT;
                orphans.push(row.pid);
            }
        }
        orphans.sort_unstable();
        Some(orphans)
    }

    /// Whether `parent` has any child rows at all.
    pub fn has_children(&self, parent: Pid) -> bool {
        self.rows.iter().flatten().any(|p| p.parent == parent)
    }

    /// Reap the zombie child of `parent` that exited first.
    pub fn reap_any(&mut self, parent: Pid) -> Option<SimulatedProcess> {
        let oldest = self
            .rows
            .iter()
            .flatten()
            .filter(|p| p.parent == parent && p.is_zombie())
            .min_by_key(|p| p.exit_seq)?
            .pid;
        self.remove_reaped(oldest)
    }

    /// Reap one specific zombie child of `parent`.
    pub fn reap(&mut self, parent: Pid, pid: Pid) -> Option<SimulatedProcess> {
        let row = self.get(pid)?;
        if row.parent != parent || !row.is_zombie() {
            return None;
        }
        self.remove_reaped(pid)
    }

    fn remove_reaped(&mut self, pid: Pid) -> Option<SimulatedProcess> {
        let i = self.index.remove(&pid)?;
        let mut row = self.rows[i].take()?;
        row.state = ProcessState::Reaped;
        Some(row)
    }

    /// Live rows in pid order.
    pub fn iter(&self) -> impl Iterator<Item = &SimulatedProcess> {
        let mut rows: Vec<&SimulatedProcess> = self.rows.iter().flatten().collect();
        rows.sort_by_key(|p| p.pid);
        rows.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_table_has_root() {
        let table = ProcessTable::new(4, 100);
        let root = table.get(Pid::ROOT).unwrap();
        assert_eq!(root.parent, Pid::NONE);
        assert_eq!(root.state, ProcessState::Running);
        assert_eq!(table.live_count(), 1);
    }

    #[test]
    fn test_spawn_assigns_increasing_pids() {
        let mut table = ProcessTable::new(4, 100);
        assert_eq!(table.spawn(Pid::ROOT), Some(Pid(2)));
        assert_eq!(table.spawn(Pid::ROOT), Some(Pid(3)));
        assert_eq!(table.spawn(Pid(2)), Some(Pid(4)));
        assert_eq!(table.spawn(Pid::ROOT), None);
        assert_eq!(table.get(Pid(4)).unwrap().parent, Pid(2));
    }

    #[test]
    fn test_pids_not_reused_after_reap() {
        let mut table = ProcessTable::new(4, 100);
        let a = table.spawn(Pid::ROOT).unwrap();
        table.mark_exited(a, 0).unwrap();
        table.reap_any(Pid::ROOT).unwrap();
        let b = table.spawn(Pid::ROOT).unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_pid_allocation_wraps_and_skips_live() {
        // pid space is 2..5
        let mut table = ProcessTable::new(3, 5);
        assert_eq!(table.spawn(Pid::ROOT), Some(Pid(2)));
        assert_eq!(table.spawn(Pid::ROOT), Some(Pid(3)));
        table.mark_exited(Pid(3), 0).unwrap();
        table.reap(Pid::ROOT, Pid(3)).unwrap();

        assert_eq!(table.spawn(Pid::ROOT), Some(Pid(4)));
        table.mark_exited(Pid(4), 0).unwrap();
        table.reap(Pid::ROOT, Pid(4)).unwrap();

        // wrapped; 2 is still live
        assert_eq!(table.spawn(Pid::ROOT), Some(Pid(3)));
    }

    #[test]
    fn test_reap_in_exit_order() {
        let mut table = ProcessTable::new(8, 100);
        let a = table.spawn(Pid::ROOT).unwrap();
        let b = table.spawn(Pid::ROOT).unwrap();
        table.mark_exited(b, 2).unwrap();
        table.mark_exited(a, 1).unwrap();

        let first = table.reap_any(Pid::ROOT).unwrap();
        assert_eq!((first.pid, first.exit_status), (b, Some(2)));
        assert_eq!(first.state, ProcessState::Reaped);
        let second = table.reap_any(Pid::ROOT).unwrap();
        assert_eq!(second.pid, a);
        assert!(table.reap_any(Pid::ROOT).is_none());
    }

    #[test]
    fn test_running_child_is_not_reaped() {
        let mut table = ProcessTable::new(4, 100);
        let child = table.spawn(Pid::ROOT).unwrap();
        assert!(table.reap_any(Pid::ROOT).is_none());
        assert!(table.reap(Pid::ROOT, child).is_none());
        assert_eq!(table.live_count(), 2);
    }

    #[test]
    fn test_reap_specific_requires_parentage() {
        let mut table = ProcessTable::new(4, 100);
        let child = table.spawn(Pid::ROOT).unwrap();
        let grandchild = table.spawn(child).unwrap();
        table.mark_exited(grandchild, 9).unwrap();
        assert!(table.reap(Pid::ROOT, grandchild).is_none());
        assert_eq!(table.reap(child, grandchild).unwrap().exit_status, Some(9));
    }

    #[test]
    fn test_exit_reparents_children_to_root() {
        let mut table = ProcessTable::new(8, 100);
        let mid = table.spawn(Pid::ROOT).unwrap();
        let a = table.spawn(mid).unwrap();
        let b = table.spawn(mid).unwrap();
        table.mark_exited(b, 4).unwrap();

        let orphans = table.mark_exited(mid, 0).unwrap();
        assert_eq!(orphans, vec![a, b]);
        assert_eq!(table.get(a).unwrap().parent, Pid::ROOT);

        // the zombie grandchild exited before its parent, so it reaps first
        assert_eq!(table.reap_any(Pid::ROOT).unwrap().pid, b);
        assert_eq!(table.reap_any(Pid::ROOT).unwrap().pid, mid);
    }

    #[test]
    fn test_exit_twice_is_refused() {
        let mut table = ProcessTable::new(4, 100);
        let child = table.spawn(Pid::ROOT).unwrap();
        assert!(table.mark_exited(child, 0).is_some());
        assert!(table.mark_exited(child, 1).is_none());
        assert_eq!(table.get(child).unwrap().exit_status, Some(0));
    }

    #[test]
    fn test_iter_sorted_by_pid() {
        let mut table = ProcessTable::new(4, 100);
        let a = table.spawn(Pid::ROOT).unwrap();
        table.spawn(Pid::ROOT).unwrap();
        table.mark_exited(a, 0).unwrap();
        table.reap_any(Pid::ROOT).unwrap();
        table.spawn(Pid::ROOT).unwrap();
        let pids: Vec<u32> = table.iter().map(|p| p.pid.0).collect();
        assert_eq!(pids, vec![1, 3, 4]);
    }
}
