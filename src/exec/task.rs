//! Minimal cooperative task model (spec section 3 "Task").
//!
//! Only two tasks ever exist: the bootstrap task that seeds the startup
//! packet, and the handler task itself. `Wait`/`Signal` are modeled as a
//! bitmask the driver loop consults between CPU slices rather than as a
//! real scheduler, since nothing here is ever preempted mid-instruction
//! (spec section 5: "only one task is ever runnable").

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Waiting,
    Running,
}

#[derive(Debug, Clone)]
pub struct Task {
    pub addr: u32,
    pub name: String,
    pub state: TaskState,
    pub signal_mask: u32,
    pub wait_mask: u32,
    pub pending_signals: u32,
}

impl Task {
    pub fn new(addr: u32, name: impl Into<String>) -> Self {
        Task {
            addr,
            name: name.into(),
            state: TaskState::Ready,
            signal_mask: 0,
            wait_mask: 0,
            pending_signals: 0,
        }
    }

    /// `Wait(signals)`: returns `Some(set)` if any requested signal is
    /// already pending, clearing those bits; otherwise marks the task
    /// waiting and returns `None`.
    pub fn wait(&mut self, signals: u32) -> Option<u32> {
        let hit = self.pending_signals & signals;
        if hit != 0 {
            self.pending_signals &= !hit;
            self.state = TaskState::Running;
            Some(hit)
        } else {
            self.wait_mask = signals;
            self.state = TaskState::Waiting;
            None
        }
    }

    /// Raises `signals` on this task; if it was waiting on one of them,
    /// wakes it (the caller is responsible for noticing the state flip and
    /// resuming the CPU — there is no separate scheduler thread).
    pub fn signal(&mut self, signals: u32) {
        self.pending_signals |= signals;
        if self.state == TaskState::Waiting && self.wait_mask & signals != 0 {
            self.pending_signals &= !(self.wait_mask & signals);
            self.state = TaskState::Ready;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_blocks_until_signalled() {
        let mut t = Task::new(0x1000, "handler");
        assert_eq!(t.wait(1 << 4), None);
        assert_eq!(t.state, TaskState::Waiting);
        t.signal(1 << 4);
        assert_eq!(t.state, TaskState::Ready);
    }

    #[test]
    fn wait_returns_immediately_if_already_pending() {
        let mut t = Task::new(0x1000, "handler");
        t.pending_signals = 1 << 2;
        assert_eq!(t.wait(1 << 2), Some(1 << 2));
        assert_eq!(t.state, TaskState::Running);
    }
}
