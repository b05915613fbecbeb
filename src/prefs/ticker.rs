//! Rate-limited persistence ticker.
//!
//! Owns the reader half of every guarded value and, at most once per
//! period, asks each of them to snapshot and persist. Runs on a
//! low-priority thread; storage I/O only ever happens here.

extern crate alloc;
use alloc::boxed::Box;
use alloc::vec::Vec;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info};

use crate::app::ports::Clock;
use crate::drivers::task_pin::{self, Core};

pub const DEFAULT_PERIOD_MS: u32 = 200;

/// Thread parameters for [`PersistenceWriter::spawn`].
const PERSIST_PRIORITY: u8 = 1;
const PERSIST_STACK_KB: usize = 4;

/// One guarded value's snapshot-then-persist step.
pub trait PersistTask: Send {
    fn tick(&mut self);
}

pub struct PersistenceWriter {
    period_ms: u32,
    clock: Option<Box<dyn Clock>>,
    prev_ms: u32,
    tasks: Vec<Box<dyn PersistTask>>,
}

impl PersistenceWriter {
    pub fn new(period_ms: u32) -> Self {
        Self {
            period_ms,
            clock: None,
            prev_ms: 0,
            tasks: Vec::new(),
        }
    }

    /// Gate ticks on `clock`. Without a clock every tick runs all tasks.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Box::new(clock));
        self
    }

    pub fn add(&mut self, task: impl PersistTask + 'static) {
        self.tasks.push(Box::new(task));
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Run every task if a full period has elapsed. Returns whether the
    /// tasks ran.
    ///
    /// A clock reading below the previous one is a clock reset (or `u32`
    /// wraparound): the reference point moves to the new reading instead of
    /// computing a huge elapsed time.
    pub fn tick(&mut self) -> bool {
        if let Some(clock) = &self.clock {
            let now = clock.now_ms();
            if now < self.prev_ms {
                debug!("prefs: clock went backwards ({} < {})", now, self.prev_ms);
                self.prev_ms = now;
            }
            if now - self.prev_ms < self.period_ms {
                return false;
            }
            self.prev_ms = now;
        }

        for task in &mut self.tasks {
            task.tick();
        }
        true
    }

    /// Run the ticker forever on a low-priority thread, calling
    /// [`tick`](Self::tick) every `poll`.
    pub fn spawn(mut self, poll: Duration) -> anyhow::Result<JoinHandle<()>> {
        info!(
            "prefs: persistence writer with {} task(s), period {} ms",
            self.tasks.len(),
            self.period_ms
        );
        task_pin::spawn_on_core(
            Core::Pro,
            PERSIST_PRIORITY,
            PERSIST_STACK_KB,
            "persist\0",
            move || {
                loop {
                    self.tick();
                    std::thread::sleep(poll);
                }
            },
        )
    }
}

impl Default for PersistenceWriter {
    fn default() -> Self {
        Self::new(DEFAULT_PERIOD_MS)
    }
}

// ── Tests ────────────────────────────────────────────────────
