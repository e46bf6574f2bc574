//! Deferred execution backends
//!
//! The debouncer never sleeps on the caller's thread. Deferred work is handed
//! to a [`Timer`], which runs it once the delay elapses unless the returned
//! [`TimerHandle`] is cancelled first.
//!
//! Cancellation is best-effort: a task that is already running (or about to)
//! cannot be recalled. Callers that need strict "never run stale work"
//! semantics must re-validate inside the task, which is what the debouncer's
//! generation check does.
//!
//! Scheduling fails with [`DebounceError::TimerStopped`] once the backend is
//! gone (stopped thread, shut-down runtime) so work is never silently lost.

use crate::error::DebounceError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

/// A unit of deferred work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Something that can run a task after a delay
pub trait Timer: Send + Sync {
    /// Run `task` once `delay` has elapsed
    ///
    /// Returns [`DebounceError::TimerStopped`] (and drops `task`) if the
    /// backend can no longer run anything.
    fn schedule(&self, delay: Duration, task: Task) -> crate::Result<TimerHandle>;
}

/// Cancellation handle for one scheduled task
///
/// Dropping the handle does NOT cancel the task.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TimerHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Handle for a task that was never scheduled
    pub fn detached() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

enum Command {
    Schedule { id: u64, deadline: Instant, task: Task },
    Cancel(u64),
    Stop,
}

/// Timer backed by one dedicated OS thread
///
/// Deadlines are kept in an ordered map on the worker; the worker blocks on
/// the command channel until the earliest deadline. Tasks run on the worker
/// thread one at a time, so a slow task delays the ones behind it.
pub struct ThreadTimer {
    tx: Sender<Command>,
    next_id: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadTimer {
    /// Start the worker thread
    pub fn spawn() -> io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker = thread::Builder::new()
            .name("debounce-timer".to_string())
            .spawn(move || run_worker(rx))?;

        debug!("Started debounce timer thread");

        Ok(Self {
            tx,
            next_id: AtomicU64::new(0),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Stop the worker, dropping every task that has not fired yet
    ///
    /// Blocks until a task currently running on the worker returns, unless
    /// called from the worker itself.
    pub fn stop(&self) {
        let _ = self.tx.send(Command::Stop);

        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        // Dropped from inside one of our own tasks; the loop exits on its own
        if worker.thread().id() == thread::current().id() {
            return;
        }

        if worker.join().is_err() {
            warn!("Debounce timer thread panicked");
        }
    }
}

impl Timer for ThreadTimer {
    fn schedule(&self, delay: Duration, task: Task) -> crate::Result<TimerHandle> {
        let Some(deadline) = Instant::now().checked_add(delay) else {
            debug!("Delay {:?} overflows the clock; task will never fire", delay);
            return Ok(TimerHandle::detached());
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(Command::Schedule { id, deadline, task }).is_err() {
            warn!("Debounce timer already stopped; dropping scheduled task");
            return Err(DebounceError::TimerStopped);
        }

        let tx = self.tx.clone();
        Ok(TimerHandle::new(move || {
            let _ = tx.send(Command::Cancel(id));
        }))
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(rx: Receiver<Command>) {
    let mut queue: BTreeMap<(Instant, u64), Task> = BTreeMap::new();
    let mut deadlines: HashMap<u64, Instant> = HashMap::new();

    loop {
        let next_deadline = queue.keys().next().map(|(deadline, _)| *deadline);

        let received = match next_deadline {
            Some(deadline) => rx.recv_deadline(deadline),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(Command::Schedule { id, deadline, task }) => {
                deadlines.insert(id, deadline);
                queue.insert((deadline, id), task);
            }
            Ok(Command::Cancel(id)) => {
                if let Some(deadline) = deadlines.remove(&id) {
                    queue.remove(&(deadline, id));
                }
            }
            Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        // Also checked after commands so a busy channel cannot starve due tasks
        run_due(&mut queue, &mut deadlines);
    }

    debug!("Debounce timer thread exiting ({} task(s) dropped)", queue.len());
}

fn run_due(queue: &mut BTreeMap<(Instant, u64), Task>, deadlines: &mut HashMap<u64, Instant>) {
    let now = Instant::now();

    while let Some(entry) = queue.first_entry() {
        if entry.key().0 > now {
            break;
        }
        let ((_, id), task) = entry.remove_entry();
        deadlines.remove(&id);
        run_task(task);
    }
}

/// Run a task, keeping the worker alive if it panics
fn run_task(task: Task) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        error!("Debounced work panicked: {}", panic_message(&*payload));
    }
}

/// Timer that schedules onto a tokio runtime
///
/// The delay is a tokio sleep; the work itself runs on the blocking pool so
/// slow work never stalls the runtime's workers.
#[derive(Debug, Clone)]
pub struct TokioTimer {
    handle: Handle,
}

impl TokioTimer {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime the current thread is running in, if any
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl Timer for TokioTimer {
    fn schedule(&self, delay: Duration, task: Task) -> crate::Result<TimerHandle> {
        let polled = Arc::new(AtomicBool::new(false));
        let polled_in_task = polled.clone();

        let join = self.handle.spawn(async move {
            polled_in_task.store(true, Ordering::SeqCst);
            tokio::time::sleep(delay).await;

            if let Err(e) = tokio::task::spawn_blocking(task).await {
                if e.is_panic() {
                    let payload = e.into_panic();
                    error!("Debounced work panicked: {}", panic_message(&*payload));
                }
            }
        });

        // A live runtime polls a task before completing it; a shut-down one
        // completes (cancels) it inside `spawn` without ever polling it
        if join.is_finished() && !polled.load(Ordering::SeqCst) {
            warn!("Tokio runtime has shut down; dropping scheduled task");
            return Err(DebounceError::TimerStopped);
        }

        Ok(TimerHandle::new(move || join.abort()))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
