//! Cancellable repeating background tasks
//!
//! A [`TaskSlot`] holds at most one repeating task. Starting a new task
//! cancels the old one first; stopping is idempotent. Once `start` or `stop`
//! returns, the cancelled task will not begin another tick.
//!
//! Each tick calls the task's tick function, which looks up whatever it acts
//! on (it must not cache it) and returns either [`Tick::Idle`] when there is
//! nothing to do right now, or [`Tick::Action`] with the work to await. A
//! failed action is logged and the task keeps running.
//!
//! The tick function and every poll of its action run while the handle's
//! cancel gate is held, so neither may call back into its own slot. A panic
//! in either counts as a failed tick.

use crate::dispatcher::panic_message;
use futures::future::BoxFuture;
use herald_api::EnvironmentError;
use std::future::{poll_fn, Future};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::Poll;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Errors that can occur when starting a task
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("Interval {requested:?} is below the minimum of {minimum:?}")]
    IntervalTooShort {
        requested: Duration,
        minimum: Duration,
    },

    #[error("No async runtime available to run the task")]
    NoRuntime,
}

/// What one tick decided to do
pub enum Tick {
    /// Nothing to act on this time
    Idle,
    /// Work to run for this tick
    Action(BoxFuture<'static, Result<(), EnvironmentError>>),
}

impl Tick {
    pub fn action<F>(action: F) -> Self
    where
        F: Future<Output = Result<(), EnvironmentError>> + Send + 'static,
    {
        Tick::Action(Box::pin(action))
    }
}

/// Result of a successful `start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOutcome {
    /// A previously running task was cancelled
    pub replaced: bool,
}

/// Handle to one running task
struct TaskHandle {
    cancelled: Arc<Mutex<bool>>,
    driver: JoinHandle<()>,
}

impl TaskHandle {
    fn cancel(&self) {
        // Taking the gate waits out a tick or action poll in progress.
        *lock(&self.cancelled) = true;
        self.driver.abort();
    }
}

struct ActiveTask {
    interval: Duration,
    handle: TaskHandle,
}

/// Slot holding at most one repeating task
pub struct TaskSlot {
    name: String,
    min_interval: Duration,
    active: Mutex<Option<ActiveTask>>,
}

impl TaskSlot {
    /// Create an idle slot that refuses intervals below `min_interval`
    pub fn new(name: impl Into<String>, min_interval: Duration) -> Self {
        Self {
            name: name.into(),
            min_interval: min_interval.max(Duration::from_millis(1)),
            active: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Whether a task is running
    pub fn is_running(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Interval of the running task
    pub fn interval(&self) -> Option<Duration> {
        lock(&self.active).as_ref().map(|a| a.interval)
    }

    /// Start a task ticking every `interval`, replacing any running one
    ///
    /// The first tick happens one full interval after the call. An interval
    /// below the minimum is refused and the slot is left as it was.
    pub fn start<F>(&self, interval: Duration, tick: F) -> Result<StartOutcome, TaskError>
    where
        F: FnMut() -> Tick + Send + 'static,
    {
        if interval < self.min_interval {
            return Err(TaskError::IntervalTooShort {
                requested: interval,
                minimum: self.min_interval,
            });
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| TaskError::NoRuntime)?;

        let mut active = lock(&self.active);
        let replaced = match active.take() {
            Some(previous) => {
                previous.handle.cancel();
                true
            }
            None => false,
        };

        let cancelled = Arc::new(Mutex::new(false));
        let driver = runtime.spawn(drive(self.name.clone(), interval, cancelled.clone(), tick));
        *active = Some(ActiveTask {
            interval,
            handle: TaskHandle { cancelled, driver },
        });

        tracing::debug!(task = %self.name, interval_ms = interval.as_millis() as u64, replaced, "Task started");
        Ok(StartOutcome { replaced })
    }

    /// Cancel the running task; returns `false` if the slot was idle
    pub fn stop(&self) -> bool {
        let previous = lock(&self.active).take();
        match previous {
            Some(previous) => {
                previous.handle.cancel();
                tracing::debug!(task = %self.name, "Task stopped");
                true
            }
            None => false,
        }
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for TaskSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSlot")
            .field("name", &self.name)
            .field("min_interval", &self.min_interval)
            .field("interval", &self.interval())
            .finish()
    }
}

/// Slot state stays consistent across a panicking tick, so poisoning is ignored
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How one tick ended
enum Settled {
    Idle,
    Done(Result<(), EnvironmentError>),
    Panicked(String),
    Cancelled,
}

async fn drive<F>(name: String, interval: Duration, cancelled: Arc<Mutex<bool>>, mut tick: F)
where
    F: FnMut() -> Tick + Send + 'static,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let next = {
            let gate = lock(&cancelled);
            if *gate {
                break;
            }
            catch_unwind(AssertUnwindSafe(&mut tick))
        };

        let settled = match next {
            Err(payload) => Settled::Panicked(panic_message(payload.as_ref())),
            Ok(Tick::Idle) => Settled::Idle,
            Ok(Tick::Action(action)) => run_gated(&cancelled, action).await,
        };

        match settled {
            Settled::Idle => tracing::trace!(task = %name, "Nothing to do this tick"),
            Settled::Done(Ok(())) => {}
            Settled::Done(Err(e)) => tracing::warn!(task = %name, error = %e, "Task tick failed"),
            Settled::Panicked(message) => {
                tracing::warn!(task = %name, panic = %message, "Task tick panicked")
            }
            Settled::Cancelled => break,
        }
    }
}

/// Poll `action` only while holding the gate and only while not cancelled
///
/// `cancel` takes the same gate, so no part of the action runs once it has
/// returned, including code after the action's own await points.
async fn run_gated(
    cancelled: &Mutex<bool>,
    mut action: BoxFuture<'static, Result<(), EnvironmentError>>,
) -> Settled {
    poll_fn(|cx| {
        let gate = lock(cancelled);
        if *gate {
            return Poll::Ready(Settled::Cancelled);
        }
        match catch_unwind(AssertUnwindSafe(|| action.as_mut().poll(cx))) {
            Ok(Poll::Ready(result)) => Poll::Ready(Settled::Done(result)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Settled::Panicked(panic_message(payload.as_ref()))),
        }
    })
    .await
}
