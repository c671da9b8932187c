use std::sync::atomic::{AtomicU8, Ordering};

/// Running state of a factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Running,
}

// Only start() and stop() transition the state; everything else reads it.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: AtomicU8,
}

const STOPPED: u8 = 0;
const RUNNING: u8 = 1;

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(STOPPED),
        }
    }

    /// Returns false if the factory was already running.
    pub fn start(&self) -> bool {
        self.state
            .compare_exchange(STOPPED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns false if the factory was already stopped.
    pub fn stop(&self) -> bool {
        self.state
            .compare_exchange(RUNNING, STOPPED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn state(&self) -> LifecycleState {
        match self.state.load(Ordering::Acquire) {
            RUNNING => LifecycleState::Running,
            _ => LifecycleState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }
}
