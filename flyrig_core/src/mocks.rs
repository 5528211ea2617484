//! Test and helper mocks for flyrig_core.

use flyrig_traits::{BoxedError, Clock, FlySample, StageDriver, StageStatus, VelocityCommand, VisionSource};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A vision source that always errors on poll; useful when samples are
/// published into a `VisionHandle` directly.
pub struct NoopVision;

impl VisionSource for NoopVision {
    fn poll(&mut self) -> Result<FlySample, BoxedError> {
        Err(Box::new(std::io::Error::other("noop vision")))
    }
}

/// Fault kinds a `SpyStage` can inject on upcoming commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpyFault {
    /// Mapped to a protocol error (transient in the tracker).
    Protocol,
    /// Mapped to a communication error (fatal in the tracker).
    Comm,
}

#[derive(Debug)]
struct SpyState {
    commands: Vec<VelocityCommand>,
    status: StageStatus,
    faults: VecDeque<SpyFault>,
    torn_down: bool,
}

/// Stage driver spy: records every command, returns a programmable status,
/// and can inject faults. The `SpyStageHandle` stays with the test after the
/// driver moves into the tracker.
pub struct SpyStage {
    state: Arc<Mutex<SpyState>>,
}

#[derive(Clone)]
pub struct SpyStageHandle {
    state: Arc<Mutex<SpyState>>,
}

impl SpyStage {
    pub fn new() -> (Self, SpyStageHandle) {
        let state = Arc::new(Mutex::new(SpyState {
            commands: Vec::new(),
            status: StageStatus {
                pos_x: 0.0,
                pos_y: 0.0,
                lim_n: false,
                lim_s: false,
                lim_e: false,
                lim_w: false,
            },
            faults: VecDeque::new(),
            torn_down: false,
        }));
        (
            Self {
                state: state.clone(),
            },
            SpyStageHandle { state },
        )
    }
}

impl SpyStageHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, SpyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn commands(&self) -> Vec<VelocityCommand> {
        self.lock().commands.clone()
    }

    pub fn last_command(&self) -> Option<VelocityCommand> {
        self.lock().commands.last().copied()
    }

    pub fn command_count(&self) -> usize {
        self.lock().commands.len()
    }

    pub fn set_status(&self, status: StageStatus) {
        self.lock().status = status;
    }

    pub fn set_position(&self, x: f64, y: f64) {
        let mut state = self.lock();
        state.status.pos_x = x;
        state.status.pos_y = y;
    }

    pub fn set_limits(&self, lim_s: bool, lim_w: bool) {
        let mut state = self.lock();
        state.status.lim_s = lim_s;
        state.status.lim_w = lim_w;
    }

    /// Queue faults for the next commands, oldest first.
    pub fn inject_faults(&self, faults: impl IntoIterator<Item = SpyFault>) {
        self.lock().faults.extend(faults);
    }

    pub fn torn_down(&self) -> bool {
        self.lock().torn_down
    }
}

impl StageDriver for SpyStage {
    fn set_velocity(&mut self, cmd: VelocityCommand) -> Result<StageStatus, BoxedError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(fault) = state.faults.pop_front() {
            return Err(match fault {
                // the message drives the string-based fallback mapping
                SpyFault::Protocol => Box::new(std::io::Error::other("status checksum mismatch")),
                SpyFault::Comm => Box::new(std::io::Error::other("serial link lost")),
            });
        }
        state.commands.push(cmd);
        Ok(state.status)
    }

    fn teardown(&mut self) -> Result<(), BoxedError> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .torn_down = true;
        Ok(())
    }
}

/// Deterministic test clock whose time only moves when advanced.
///
/// `sleep` advances internal time by the requested duration without actually
/// sleeping, so blocking waits driven by this clock terminate instantly.
#[derive(Clone)]
pub struct TestClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, d: Duration) {
        let mut off = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *off = off.saturating_add(d);
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        let off = *self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        self.origin + off
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}
