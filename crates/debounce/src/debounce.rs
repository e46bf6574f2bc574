//! Debounced work invoker
//!
//! Collapses bursts of submissions into a single execution of the most
//! recently submitted work. Work fires after a quiet period of `delay`, or
//! immediately once `max_calls` submissions or `max_wait` elapsed time
//! accumulate in the current window.
//!
//! All state lives behind one mutex per debouncer. Timer callbacks take the
//! same lock and compare their generation against the current one, so a
//! callback for a superseded or cancelled timer never runs stale work.
//! Counters reset when a fire is decided, before the work is invoked, and
//! work always runs with the lock released.

use crate::config::DebounceConfig;
use crate::error::DebounceError;
use crate::stats::{DebounceStats, FireReason, StatsRecorder};
use crate::timer::{Task, ThreadTimer, Timer, TimerHandle, TokioTimer};
use crate::Result;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Debounced invoker for one channel of work
///
/// Cloning is cheap; clones share the same state and timer.
///
/// ```no_run
/// use debounce::{DebounceConfig, Debouncer};
/// use std::time::Duration;
///
/// let debouncer = Debouncer::new(DebounceConfig::new(Duration::from_millis(100)))?;
/// for i in 0..10 {
///     debouncer.submit(move || println!("saving revision {i}"))?;
/// }
/// // Only "saving revision 9" is printed, ~100ms after the last submit
/// # Ok::<(), debounce::DebounceError>(())
/// ```
#[derive(Clone)]
pub struct Debouncer {
    shared: Arc<Shared>,
    timer: Arc<dyn Timer>,
}

struct Shared {
    config: DebounceConfig,
    state: Mutex<State>,
    stats: StatsRecorder,
}

struct State {
    /// Last submitted work (last write wins)
    pending: Option<Task>,
    /// Cancellation handle for the armed timer
    timer: Option<TimerHandle>,
    /// Identity of the armed timer; bumped on every arm and cancel
    generation: u64,
    /// Submissions in the current window
    calls: usize,
    /// When the current window began
    window_start: Instant,
    closed: bool,
}

impl State {
    fn new() -> Self {
        Self {
            pending: None,
            timer: None,
            generation: 0,
            calls: 0,
            window_start: Instant::now(),
            closed: false,
        }
    }

    /// Invalidate the armed timer, if any
    fn disarm(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(handle) = self.timer.take() {
            handle.cancel();
        }
    }

    /// Start a fresh window
    fn reset_window(&mut self, now: Instant) {
        self.calls = 0;
        self.window_start = now;
    }

    /// Decide a fire: disarm, reset, and hand back the work to run
    fn take_for_fire(&mut self, now: Instant) -> Option<Task> {
        self.disarm();
        self.reset_window(now);
        self.pending.take()
    }
}

impl Drop for State {
    fn drop(&mut self) {
        self.disarm();
    }
}

impl Debouncer {
    /// Create a debouncer driven by its own timer thread
    pub fn new(config: DebounceConfig) -> Result<Self> {
        // Checked again in with_timer; this one avoids spawning a thread for a bad config
        config.validate()?;
        let timer = ThreadTimer::spawn().map_err(DebounceError::TimerSpawn)?;
        Self::with_timer(config, Arc::new(timer))
    }

    /// Create a debouncer whose deferred work runs on the current tokio runtime
    pub fn on_tokio(config: DebounceConfig) -> Result<Self> {
        let timer = TokioTimer::try_current().ok_or(DebounceError::NoRuntime)?;
        Self::with_timer(config, Arc::new(timer))
    }

    /// Create a debouncer on a caller-supplied timer
    ///
    /// The timer may be shared between debouncers.
    pub fn with_timer(config: DebounceConfig, timer: Arc<dyn Timer>) -> Result<Self> {
        config.validate()?;

        debug!(
            "Created debouncer (delay: {:?}, max_calls: {:?}, max_wait: {:?})",
            config.delay, config.max_calls, config.max_wait
        );

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(State::new()),
                stats: StatsRecorder::default(),
            }),
            timer,
        })
    }

    /// Submit work, replacing whatever was pending
    ///
    /// If this submission reaches `max_calls` or `max_wait`, the work runs
    /// synchronously on the calling thread before `submit` returns.
    /// Otherwise it is deferred until `delay` passes without another
    /// submission.
    ///
    /// Returns [`DebounceError::Shutdown`] (and drops `work`) after
    /// [`Debouncer::shutdown`], and [`DebounceError::TimerStopped`] (dropping
    /// the pending work) if the timer backend is gone.
    pub fn submit<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let config = &self.shared.config;

        let fire_now = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(DebounceError::Shutdown);
            }

            let superseded = state.pending.replace(Box::new(work)).is_some();
            self.shared.stats.record_submit(superseded);

            let now = Instant::now();
            if state.calls == 0 {
                state.window_start = now;
            }
            state.calls += 1;

            let reason = if config.call_limit_reached(state.calls) {
                Some(FireReason::CallLimit)
            } else if config.time_limit_reached(now.saturating_duration_since(state.window_start)) {
                Some(FireReason::WaitLimit)
            } else {
                None
            };

            match reason {
                Some(reason) => {
                    trace!("Limit reached after {} call(s); firing now ({})", state.calls, reason);
                    state.take_for_fire(now).map(|work| (work, reason))
                }
                None => {
                    self.arm(&mut state)?;
                    trace!("Armed debounce timer (call {} in window)", state.calls);
                    None
                }
            }
        };

        if let Some((work, reason)) = fire_now {
            self.shared.stats.record_fire(reason);
            work();
        }

        Ok(())
    }

    /// Run the pending work now, if there is any
    ///
    /// Returns `true` if work ran.
    pub fn flush(&self) -> Result<bool> {
        let work = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(DebounceError::Shutdown);
            }
            if state.pending.is_none() {
                return Ok(false);
            }
            state.take_for_fire(Instant::now())
        };

        match work {
            Some(work) => {
                trace!("Flushing pending work");
                self.shared.stats.record_fire(FireReason::Flush);
                work();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop the pending work and disarm the timer
    ///
    /// The debouncer stays usable. Calling this when idle is a no-op.
    pub fn cancel(&self) {
        let mut state = self.shared.state.lock();
        self.discard_pending(&mut state);
    }

    /// Cancel and permanently stop the debouncer
    ///
    /// Later calls to [`Debouncer::submit`] and [`Debouncer::flush`] return
    /// [`DebounceError::Shutdown`]. Repeated shutdowns are no-ops.
    ///
    /// Returns `true` if pending work was discarded.
    pub fn shutdown(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        let discarded = self.discard_pending(&mut state);

        debug!("Debouncer shut down (discarded pending work: {})", discarded);
        discarded
    }

    /// Whether work is waiting to fire
    pub fn is_pending(&self) -> bool {
        self.shared.state.lock().pending.is_some()
    }

    /// Whether [`Debouncer::shutdown`] has been called
    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Configuration this debouncer was built with
    pub fn config(&self) -> &DebounceConfig {
        &self.shared.config
    }

    /// Snapshot of the submission and firing counters
    pub fn stats(&self) -> DebounceStats {
        self.shared.stats.snapshot()
    }

    fn discard_pending(&self, state: &mut State) -> bool {
        let discarded = state.take_for_fire(Instant::now()).is_some();
        if discarded {
            self.shared.stats.record_cancel();
        }
        discarded
    }

    /// Replace the armed timer with a fresh one for the current generation
    ///
    /// If the timer refuses the task, the pending work is discarded so the
    /// debouncer does not report work that can never run.
    fn arm(&self, state: &mut State) -> Result<()> {
        state.disarm();

        let generation = state.generation;
        let weak = Arc::downgrade(&self.shared);
        let scheduled = self.timer.schedule(
            self.shared.config.delay,
            Box::new(move || fire_deferred(&weak, generation)),
        );

        match scheduled {
            Ok(handle) => {
                state.timer = Some(handle);
                Ok(())
            }
            Err(e) => {
                warn!("Could not arm debounce timer; discarding pending work: {}", e);
                self.discard_pending(state);
                Err(e)
            }
        }
    }
}

/// Timer callback: run the pending work if this timer is still current
fn fire_deferred(shared: &Weak<Shared>, generation: u64) {
    // Every handle was dropped; nothing to run
    let Some(shared) = shared.upgrade() else {
        return;
    };

    let work = {
        let mut state = shared.state.lock();
        if state.closed || state.generation != generation {
            trace!("Ignoring stale debounce timer (generation {})", generation);
            return;
        }
        // Our own handle; nothing left to cancel
        state.timer = None;
        state.reset_window(Instant::now());
        state.pending.take()
    };

    if let Some(work) = work {
        shared.stats.record_fire(FireReason::Quiet);
        work();
    }
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Debouncer")
            .field("config", &self.shared.config)
            .field("pending", &state.pending.is_some())
            .field("calls", &state.calls)
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Box<dyn FnOnce() + Send>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let make = move || {
            let c = c.clone();
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }) as Box<dyn FnOnce() + Send>
        };
        (count, make)
    }

    #[test]
    fn test_basic_debounce() {
        let debouncer = Debouncer::new(DebounceConfig::new(Duration::from_millis(50))).unwrap();
        let (count, work) = counter();

        debouncer.submit(work()).unwrap();
        debouncer.submit(work()).unwrap();
        debouncer.submit(work()).unwrap();

        // Should not be called yet
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(debouncer.is_pending());

        thread::sleep(Duration::from_millis(150));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_pending());
    }

    #[test]
    fn test_resubmit_extends_quiet_period() {
        let debouncer = Debouncer::new(DebounceConfig::new(Duration::from_millis(100))).unwrap();
        let (count, work) = counter();

        debouncer.submit(work()).unwrap();
        thread::sleep(Duration::from_millis(50));

        // Cancels the first timer
        debouncer.submit(work()).unwrap();
        thread::sleep(Duration::from_millis(60));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        thread::sleep(Duration::from_millis(120));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_max_calls_fires_inline() {
        let config = DebounceConfig::new(Duration::from_millis(100)).with_max_calls(3);
        let debouncer = Debouncer::new(config).unwrap();
        let (count, work) = counter();

        debouncer.submit(work()).unwrap();
        debouncer.submit(work()).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // Third call runs before submit returns
        debouncer.submit(work()).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_pending());

        // Timer was disarmed, nothing fires later
        thread::sleep(Duration::from_millis(150));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(debouncer.stats().fired_call_limit, 1);
    }

    #[test]
    fn test_max_calls_one_fires_every_call() {
        let config = DebounceConfig::new(Duration::from_secs(10)).with_max_calls(1);
        let debouncer = Debouncer::new(config).unwrap();
        let (count, work) = counter();

        for _ in 0..5 {
            debouncer.submit(work()).unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_window_resets_after_fire() {
        let config = DebounceConfig::new(Duration::from_millis(100)).with_max_calls(3);
        let debouncer = Debouncer::new(config).unwrap();
        let (count, work) = counter();

        for _ in 0..3 {
            debouncer.submit(work()).unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);

        for _ in 0..3 {
            debouncer.submit(work()).unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 2);

        let state = debouncer.shared.state.lock();
        assert_eq!(state.calls, 0);
        assert!(state.pending.is_none());
        assert!(state.timer.is_none());
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let debouncer = Debouncer::new(DebounceConfig::new(Duration::from_secs(10))).unwrap();
        let (count, work) = counter();

        debouncer.submit(work()).unwrap();
        let stale = debouncer.shared.state.lock().generation.wrapping_sub(1);

        fire_deferred(&Arc::downgrade(&debouncer.shared), stale);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(debouncer.is_pending());

        let current = debouncer.shared.state.lock().generation;
        fire_deferred(&Arc::downgrade(&debouncer.shared), current);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_pending());
    }

    #[test]
    fn test_callback_after_drop_is_noop() {
        let debouncer = Debouncer::new(DebounceConfig::new(Duration::from_secs(10))).unwrap();
        let weak = Arc::downgrade(&debouncer.shared);
        let generation = debouncer.shared.state.lock().generation;
        drop(debouncer);

        // Must not panic
        fire_deferred(&weak, generation);
    }

    #[test]
    fn test_submit_from_within_work() {
        let config = DebounceConfig::new(Duration::from_millis(20)).with_max_calls(1);
        let debouncer = Debouncer::new(config).unwrap();
        let (count, work) = counter();

        let inner = debouncer.clone();
        let nested = work();
        debouncer
            .submit(move || {
                // Lock is not held while work runs
                inner.submit(nested).unwrap();
            })
            .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = DebounceConfig::new(Duration::from_millis(10)).with_max_calls(0);
        assert!(matches!(
            Debouncer::new(config),
            Err(DebounceError::Config(_))
        ));
    }

    #[test]
    fn test_stopped_timer_rejects_and_clears_pending() {
        let timer = Arc::new(ThreadTimer::spawn().unwrap());
        let debouncer =
            Debouncer::with_timer(DebounceConfig::new(Duration::from_millis(20)), timer.clone())
                .unwrap();
        let (count, work) = counter();

        timer.stop();

        let result = debouncer.submit(work());
        assert!(matches!(result, Err(DebounceError::TimerStopped)));
        assert!(!debouncer.is_pending());
        assert_eq!(debouncer.stats().cancelled, 1);

        // Window reset along with the discarded work
        let state = debouncer.shared.state.lock();
        assert_eq!(state.calls, 0);
        assert!(state.timer.is_none());
        drop(state);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_on_tokio_without_runtime() {
        let result = Debouncer::on_tokio(DebounceConfig::default());
        assert!(matches!(result, Err(DebounceError::NoRuntime)));
    }
}
