//! # Scheduler Adapters
//!
//! The bus never touches a clock or an executor directly. It defers cycle
//! processing and arms request timers through a [`Scheduler`], so it runs
//! inside any host loop:
//!
//! - [`TokioScheduler`]: tasks spawned on a tokio runtime, timers via
//!   `tokio::time::sleep`.
//! - [`ManualScheduler`]: a virtual clock driven explicitly, for tests and
//!   hosts that pump their own loop.

use crate::error::BusError;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// Unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Handle of an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Host event-loop primitives.
pub trait Scheduler: Send + Sync {
    /// Run `task` once, after the current synchronous execution has ended.
    fn defer(&self, task: Task);

    /// Run `task` once after `delay`, unless cleared first.
    fn set_timeout(&self, task: Task, delay: Duration) -> TimerId;

    /// Cancel a timer. Clearing a fired or unknown timer is a no-op.
    fn clear_timeout(&self, timer: TimerId);
}

/// Scheduler backed by a tokio runtime.
pub struct TokioScheduler {
    handle: Handle,
    timers: Arc<Mutex<HashMap<TimerId, AbortHandle>>>,
    next_timer: AtomicU64,
}

impl TokioScheduler {
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_timer: AtomicU64::new(1),
        }
    }

    /// Bind to the runtime of the calling context.
    pub fn current() -> Result<Self, BusError> {
        let handle = Handle::try_current().map_err(|e| BusError::NoRuntime(e.to_string()))?;
        Ok(Self::new(handle))
    }

    /// Timers armed and not yet fired or cleared.
    #[must_use]
    pub fn active_timers(&self) -> usize {
        self.timers.lock().len()
    }
}

impl Scheduler for TokioScheduler {
    fn defer(&self, task: Task) {
        self.handle.spawn(async move { task() });
    }

    fn set_timeout(&self, task: Task, delay: Duration) -> TimerId {
        let id = TimerId(self.next_timer.fetch_add(1, Ordering::Relaxed));
        let timers = self.timers.clone();

        // Hold the lock across spawn so the task cannot deregister before it
        // was registered.
        let mut guard = self.timers.lock();
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if timers.lock().remove(&id).is_some() {
                task();
            }
        });
        guard.insert(id, join.abort_handle());
        id
    }

    fn clear_timeout(&self, timer: TimerId) {
        if let Some(abort) = self.timers.lock().remove(&timer) {
            abort.abort();
        }
    }
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    deferred: VecDeque<Task>,
    timers: BTreeMap<(Duration, TimerId), Task>,
    deadlines: HashMap<TimerId, Duration>,
    next_timer: u64,
}

/// Scheduler driven by explicit calls on a virtual clock.
///
/// Nothing runs until [`run_until_idle`](Self::run_until_idle) or
/// [`advance`](Self::advance) is called. Clones share the same queue.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

impl ManualScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since creation.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.state.lock().deferred.len()
    }

    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.state.lock().timers.len()
    }

    /// Run exactly one deferred task. Returns `false` when none was queued.
    pub fn run_next(&self) -> bool {
        let task = self.state.lock().deferred.pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run deferred tasks, including ones they defer, until none are left.
    /// Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    /// Move the clock forward, firing due timers in deadline order and
    /// draining deferred work after each one.
    pub fn advance(&self, by: Duration) {
        self.run_until_idle();
        let target = self.now() + by;
        loop {
            let due = {
                let mut state = self.state.lock();
                let next = state
                    .timers
                    .keys()
                    .next()
                    .copied()
                    .filter(|(deadline, _)| *deadline <= target);
                match next {
                    Some(key) => {
                        state.now = key.0;
                        state.deadlines.remove(&key.1);
                        state.timers.remove(&key)
                    }
                    None => {
                        state.now = target;
                        None
                    }
                }
            };
            match due {
                Some(task) => {
                    task();
                    self.run_until_idle();
                }
                None => break,
            }
        }
    }
}

impl Scheduler for ManualScheduler {
    fn defer(&self, task: Task) {
        self.state.lock().deferred.push_back(task);
    }

    fn set_timeout(&self, task: Task, delay: Duration) -> TimerId {
        let mut state = self.state.lock();
        state.next_timer += 1;
        let id = TimerId(state.next_timer);
        let deadline = state.now + delay;
        state.timers.insert((deadline, id), task);
        state.deadlines.insert(id, deadline);
        id
    }

    fn clear_timeout(&self, timer: TimerId) {
        let mut state = self.state.lock();
        if let Some(deadline) = state.deadlines.remove(&timer) {
            state.timers.remove(&(deadline, timer));
        }
    }
}
