//! Wake-ups for threads waiting on execution progress
//!
//! The monitor is bumped every time a project finishes a locked section
//! that changed state. Waiters re-check their condition on each bump.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
pub struct ExecutionMonitor {
    generation: Mutex<u64>,
    changed: Condvar,
}

impl ExecutionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a state change and wake all waiters
    pub fn notify(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.changed.notify_all();
    }

    /// Block until `done` returns true or `timeout` passed
    ///
    /// `done` is evaluated without the monitor lock held, so it may take
    /// workflow locks. Returns the last value of `done`.
    pub fn wait_until<F>(&self, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let seen = *self.generation.lock();
            if done() {
                return true;
            }
            let mut generation = self.generation.lock();
            while *generation == seen {
                if self.changed.wait_until(&mut generation, deadline).timed_out() {
                    drop(generation);
                    return done();
                }
            }
        }
    }
}
