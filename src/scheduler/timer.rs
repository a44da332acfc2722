//! Timer source abstraction and the two provided implementations.
//!
//! A [`TimerSource`] schedules one-shot callbacks after a delay and cancels
//! them by token. The scheduler keeps at most one armed at a time. Tokens
//! are never reused by a source, so a callback that fires after its timer
//! was cancelled or superseded identifies itself as stale and the scheduler
//! ignores it.
//!
//! [`ThreadTimer`] is the production implementation: one worker thread, a
//! min-heap of pending one-shots. [`TestTimer`] records schedules and fires
//! them only when a test says so, which pairs with
//! [`VirtualClock`](crate::scheduler::VirtualClock) for fully deterministic
//! scheduler tests.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Identifies a scheduled one-shot. Sources mint each token exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

impl TimerToken {
    /// Builds a token from a raw counter value. For [`TimerSource`]
    /// implementors.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw counter value.
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

/// Callback invoked when a one-shot fires; receives its own token.
pub type TimerCallback = Box<dyn FnOnce(TimerToken) + Send>;

/// Schedules and cancels one-shot callbacks.
///
/// A source must invoke each callback at most once, pass it the token the
/// schedule returned, and never reuse tokens. Callbacks run on whatever
/// context the source delivers from; callers are responsible for their own
/// serialization.
pub trait TimerSource: Send + Sync {
    /// Schedules `callback` to run once after roughly `delay`.
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerToken;

    /// Cancels the one-shot identified by `token`. Cancelling an already
    /// fired or unknown token is a no-op.
    fn cancel(&self, token: TimerToken);
}

struct PendingTimer {
    fire_at: Instant,
    token: TimerToken,
    callback: TimerCallback,
}

impl PartialEq for PendingTimer {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl Eq for PendingTimer {}

impl Ord for PendingTimer {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed so the BinaryHeap pops the earliest deadline first.
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.token.as_raw().cmp(&self.token.as_raw()))
    }
}

impl PartialOrd for PendingTimer {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

struct ThreadTimerState {
    pending: BinaryHeap<PendingTimer>,
    next_token: u64,
    shutdown: bool,
}

struct ThreadTimerInner {
    state: Mutex<ThreadTimerState>,
    wakeup: Condvar,
}

/// Timer source backed by a single worker thread.
///
/// The worker sleeps until the earliest pending deadline, pops everything
/// due, and runs the callbacks with no internal lock held — a callback may
/// freely schedule or cancel on the same source.
pub struct ThreadTimer {
    inner: Arc<ThreadTimerInner>,
    worker: Option<JoinHandle<()>>,
}

impl ThreadTimer {
    /// Spawns the worker thread.
    ///
    /// # Panics
    ///
    /// Panics if the worker thread cannot be spawned.
    #[must_use]
    pub fn new() -> Self {
        let inner = Arc::new(ThreadTimerInner {
            state: Mutex::new(ThreadTimerState {
                pending: BinaryHeap::new(),
                next_token: 0,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
        });
        let worker = {
            let inner = Arc::clone(&inner);
            std::thread::Builder::new()
                .name("tempoq-timer".into())
                .spawn(move || Self::run(&inner))
                .expect("failed to spawn timer worker")
        };
        Self {
            inner,
            worker: Some(worker),
        }
    }

    fn run(inner: &ThreadTimerInner) {
        let mut state = inner.state.lock().expect("timer state poisoned");
        loop {
            if state.shutdown {
                break;
            }

            let now = Instant::now();
            let mut due = Vec::new();
            while state
                .pending
                .peek()
                .is_some_and(|entry| entry.fire_at <= now)
            {
                due.push(state.pending.pop().expect("peeked entry"));
            }
            if !due.is_empty() {
                drop(state);
                for entry in due {
                    (entry.callback)(entry.token);
                }
                state = inner.state.lock().expect("timer state poisoned");
                continue;
            }

            let next_deadline = state.pending.peek().map(|entry| entry.fire_at);
            state = match next_deadline {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(now);
                    inner
                        .wakeup
                        .wait_timeout(state, wait)
                        .expect("timer state poisoned")
                        .0
                }
                None => inner.wakeup.wait(state).expect("timer state poisoned"),
            };
        }
    }
}

impl Default for ThreadTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerSource for ThreadTimer {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerToken {
        let mut state = self.inner.state.lock().expect("timer state poisoned");
        let token = TimerToken::from_raw(state.next_token);
        state.next_token += 1;
        state.pending.push(PendingTimer {
            fire_at: Instant::now() + delay,
            token,
            callback,
        });
        drop(state);
        self.inner.wakeup.notify_one();
        token
    }

    fn cancel(&self, token: TimerToken) {
        let mut state = self.inner.state.lock().expect("timer state poisoned");
        state.pending.retain(|entry| entry.token != token);
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock().expect("timer state poisoned");
            state.shutdown = true;
        }
        self.wakeup_worker();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl ThreadTimer {
    fn wakeup_worker(&self) {
        self.inner.wakeup.notify_all();
    }
}

impl std::fmt::Debug for ThreadTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending = self
            .inner
            .state
            .lock()
            .expect("timer state poisoned")
            .pending
            .len();
        f.debug_struct("ThreadTimer")
            .field("pending", &pending)
            .finish_non_exhaustive()
    }
}

struct RecordedTimer {
    token: TimerToken,
    delay: Duration,
    callback: TimerCallback,
}

struct TestTimerState {
    scheduled: Vec<RecordedTimer>,
    next_token: u64,
}

/// Recording fake: nothing fires until the test asks for it.
///
/// Schedules queue up in order; [`TestTimer::fire_next`] pops and runs the
/// oldest outstanding one-shot on the calling thread.
pub struct TestTimer {
    state: Mutex<TestTimerState>,
}

impl TestTimer {
    /// Creates a timer with nothing scheduled.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(TestTimerState {
                scheduled: Vec::new(),
                next_token: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TestTimerState> {
        self.state.lock().expect("test timer poisoned")
    }

    /// Number of outstanding one-shots.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().scheduled.len()
    }

    /// The delay of the oldest outstanding one-shot.
    #[must_use]
    pub fn next_delay(&self) -> Option<Duration> {
        self.lock().scheduled.first().map(|entry| entry.delay)
    }

    /// Pops and runs the oldest outstanding one-shot. Returns false when
    /// nothing was scheduled.
    pub fn fire_next(&self) -> bool {
        let entry = {
            let mut state = self.lock();
            if state.scheduled.is_empty() {
                return false;
            }
            state.scheduled.remove(0)
        };
        // Invoke without the lock held; the callback may re-schedule.
        (entry.callback)(entry.token);
        true
    }

    /// Fires until nothing is scheduled; returns how many fired.
    pub fn fire_all(&self) -> usize {
        let mut fired = 0;
        while self.fire_next() {
            fired += 1;
        }
        fired
    }
}

impl Default for TestTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerSource for TestTimer {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerToken {
        let mut state = self.lock();
        let token = TimerToken::from_raw(state.next_token);
        state.next_token += 1;
        state.scheduled.push(RecordedTimer {
            token,
            delay,
            callback,
        });
        token
    }

    fn cancel(&self, token: TimerToken) {
        self.lock().scheduled.retain(|entry| entry.token != token);
    }
}

impl std::fmt::Debug for TestTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestTimer")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}
