//! Deadline-driven dispatch with a single-timer discipline.
//!
//! [`ScheduledQueue`] is the outermost layer: it serializes every operation
//! on one mutex, interprets priorities as [`Time`] instants, and keeps at
//! most one timer armed — always for the current minimum's deadline. After
//! every mutation the timer is reset, so the next firing deadline is
//! re-evaluated exactly once per change regardless of queue size.
//!
//! When the timer fires, the callback re-enters through the same mutex and
//! *drains*: it polls the wrapped queue while the minimum priority is at or
//! before the clock's reading, which pushes each due item through the event
//! and dispatch layers below, then re-arms for the new minimum. A late
//! timer simply drains more than one item, in strict heap order.
//!
//! Timer callbacks identify themselves by token; a callback whose token no
//! longer matches the armed one (cancelled or superseded) is ignored, and a
//! callback arriving after the queue was dropped upgrades nothing and goes
//! away.

mod clock;
mod timer;

pub use clock::{TimeSource, VirtualClock, WallClock};
pub use timer::{TestTimer, ThreadTimer, TimerCallback, TimerSource, TimerToken};

use crate::error::Result;
use crate::queue::{Entry, PriorityChange, PriorityQueue};
use crate::registry::{Handle, Ref};
use crate::types::Time;
use core::fmt;
use core::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};

struct SchedulerState<Q> {
    queue: Q,
    running: bool,
    armed: Option<TimerToken>,
}

struct SchedulerCore<Q> {
    state: Mutex<SchedulerState<Q>>,
    clock: Arc<dyn TimeSource>,
    timer: Arc<dyn TimerSource>,
}

impl<Q> SchedulerCore<Q> {
    fn lock_state(&self) -> MutexGuard<'_, SchedulerState<Q>> {
        self.state.lock().expect("scheduler state poisoned")
    }

    /// Cancels the armed timer, then re-arms from the current minimum.
    fn reset_timer<T>(core: &Arc<Self>, state: &mut SchedulerState<Q>)
    where
        Q: PriorityQueue<Time, T> + Send + 'static,
        T: 'static,
    {
        if let Some(token) = state.armed.take() {
            core.timer.cancel(token);
        }
        Self::arm::<T>(core, state);
    }

    /// Arms one timer for the minimum's deadline, iff none is armed, the
    /// scheduler is running, and the queue is non-empty.
    fn arm<T>(core: &Arc<Self>, state: &mut SchedulerState<Q>)
    where
        Q: PriorityQueue<Time, T> + Send + 'static,
        T: 'static,
    {
        if state.armed.is_some() || !state.running {
            return;
        }
        let Some(due) = state.queue.next_priority() else {
            return;
        };
        let now = core.clock.now();
        let delay = due.duration_since(now); // zero when already due

        let weak = Arc::downgrade(core);
        let token = core.timer.schedule(
            delay,
            Box::new(move |token| {
                if let Some(core) = weak.upgrade() {
                    SchedulerCore::on_timer::<T>(&core, token);
                }
            }),
        );
        state.armed = Some(token);
        tracing::trace!(deadline = %due, delay = ?delay, "armed dispatch timer");
    }

    /// Timer callback: drain everything due, then re-arm.
    fn on_timer<T>(core: &Arc<Self>, token: TimerToken)
    where
        Q: PriorityQueue<Time, T> + Send + 'static,
        T: 'static,
    {
        let mut state = core.lock_state();
        if state.armed != Some(token) {
            tracing::trace!(token = token.as_raw(), "stale timer callback ignored");
            return;
        }
        state.armed = None;
        if !state.running {
            return;
        }

        let now = core.clock.now();
        let mut drained = 0_usize;
        while state.queue.next_priority().is_some_and(|due| due <= now) {
            state.queue.poll();
            drained += 1;
        }
        tracing::debug!(drained, now = %now, "dispatch timer fired");

        Self::arm::<T>(core, &mut state);
    }
}

/// Queue wrapper that dispatches due items off a single injected timer.
///
/// Priorities are deadlines: an item whose priority is at or before the
/// clock's reading is *due* and will be polled by the next drain while the
/// scheduler is running. `stop` halts dispatch without touching contents.
pub struct ScheduledQueue<T, Q> {
    core: Arc<SchedulerCore<Q>>,
    _payload: PhantomData<fn() -> T>,
}

impl<T, Q> ScheduledQueue<T, Q>
where
    Q: PriorityQueue<Time, T> + Send + 'static,
    T: 'static,
{
    /// Wraps `queue`, reading time from `clock` and arming one-shots on
    /// `timer`. Dispatch stays off until [`ScheduledQueue::start`].
    #[must_use]
    pub fn new(queue: Q, clock: Arc<dyn TimeSource>, timer: Arc<dyn TimerSource>) -> Self {
        Self {
            core: Arc::new(SchedulerCore {
                state: Mutex::new(SchedulerState {
                    queue,
                    running: false,
                    armed: None,
                }),
                clock,
                timer,
            }),
            _payload: PhantomData,
        }
    }

    /// Begins dispatching: arms the timer from the current minimum.
    pub fn start(&self) {
        let mut state = self.core.lock_state();
        state.running = true;
        SchedulerCore::arm::<T>(&self.core, &mut state);
    }

    /// Halts dispatching and cancels the armed timer. Heap contents and
    /// already-dispatched entries are untouched; parked consumers stay
    /// parked until dispatch restarts.
    pub fn stop(&self) {
        let mut state = self.core.lock_state();
        state.running = false;
        if let Some(token) = state.armed.take() {
            self.core.timer.cancel(token);
        }
    }

    /// Whether dispatch is on.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.core.lock_state().running
    }

    /// Runs `f` against the wrapped queue, under the scheduler's lock.
    pub fn with_inner<R>(&self, f: impl FnOnce(&Q) -> R) -> R {
        f(&self.core.lock_state().queue)
    }
}

impl<T, Q> PriorityQueue<Time, T> for ScheduledQueue<T, Q>
where
    Q: PriorityQueue<Time, T> + Send + 'static,
    T: 'static,
{
    fn insert(&mut self, priority: Time, payload: T, id: Option<&str>) -> Result<Handle<T>> {
        let mut state = self.core.lock_state();
        let handle = state.queue.insert(priority, payload, id)?;
        SchedulerCore::reset_timer::<T>(&self.core, &mut state);
        Ok(handle)
    }

    fn peek(&self) -> Option<Handle<T>> {
        self.core.lock_state().queue.peek()
    }

    fn next_priority(&self) -> Option<Time> {
        self.core.lock_state().queue.next_priority()
    }

    fn poll(&mut self) -> Option<Entry<Time, T>> {
        let mut state = self.core.lock_state();
        let polled = state.queue.poll();
        SchedulerCore::reset_timer::<T>(&self.core, &mut state);
        polled
    }

    fn remove(&mut self, target: Ref<'_, T>) -> Result<Option<Entry<Time, T>>> {
        let mut state = self.core.lock_state();
        let removed = state.queue.remove(target)?;
        SchedulerCore::reset_timer::<T>(&self.core, &mut state);
        Ok(removed)
    }

    fn set_priority(
        &mut self,
        target: Ref<'_, T>,
        priority: Time,
    ) -> Result<PriorityChange<Time, T>> {
        let mut state = self.core.lock_state();
        let change = state.queue.set_priority(target, priority)?;
        SchedulerCore::reset_timer::<T>(&self.core, &mut state);
        Ok(change)
    }

    fn get(&self, target: Ref<'_, T>) -> Result<Option<Handle<T>>> {
        self.core.lock_state().queue.get(target)
    }

    fn has(&self, target: Ref<'_, T>) -> bool {
        self.core.lock_state().queue.has(target)
    }

    fn clear(&mut self) -> usize {
        let mut state = self.core.lock_state();
        let dropped = state.queue.clear();
        SchedulerCore::reset_timer::<T>(&self.core, &mut state);
        dropped
    }

    fn len(&self) -> usize {
        self.core.lock_state().queue.len()
    }
}

impl<T, Q> Drop for ScheduledQueue<T, Q> {
    fn drop(&mut self) {
        // Give the armed one-shot back to its source; a fire already in
        // flight only holds a weak reference and goes quiet on its own.
        let mut state = self.core.lock_state();
        if let Some(token) = state.armed.take() {
            self.core.timer.cancel(token);
        }
    }
}

impl<T, Q> fmt::Debug for ScheduledQueue<T, Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.core.lock_state();
        f.debug_struct("ScheduledQueue")
            .field("running", &state.running)
            .field("armed", &state.armed.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::PairingHeap;
    use std::time::Duration;

    type Sched = ScheduledQueue<String, PairingHeap<Time, String>>;

    fn scheduled() -> (Sched, Arc<VirtualClock>, Arc<TestTimer>) {
        crate::test_utils::init_test_logging();
        let clock = Arc::new(VirtualClock::new());
        let timer = Arc::new(TestTimer::new());
        let queue = ScheduledQueue::new(
            PairingHeap::new(),
            Arc::clone(&clock) as Arc<dyn TimeSource>,
            Arc::clone(&timer) as Arc<dyn TimerSource>,
        );
        (queue, clock, timer)
    }

    #[test]
    fn no_timer_before_start() {
        let (mut queue, _clock, timer) = scheduled();
        queue
            .insert(Time::from_millis(100), "a".to_string(), None)
            .expect("insert");
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn start_arms_for_the_minimum() {
        let (mut queue, _clock, timer) = scheduled();
        queue
            .insert(Time::from_millis(100), "a".to_string(), None)
            .expect("insert");
        queue
            .insert(Time::from_millis(40), "b".to_string(), None)
            .expect("insert");
        queue.start();

        assert_eq!(timer.pending(), 1);
        assert_eq!(timer.next_delay(), Some(Duration::from_millis(40)));
    }

    #[test]
    fn mutations_rearm_exactly_one_timer() {
        let (mut queue, _clock, timer) = scheduled();
        queue.start();
        assert_eq!(timer.pending(), 0); // empty queue arms nothing

        queue
            .insert(Time::from_millis(80), "a".to_string(), None)
            .expect("insert");
        assert_eq!(timer.next_delay(), Some(Duration::from_millis(80)));

        // A nearer deadline takes over the single slot.
        queue
            .insert(Time::from_millis(20), "b".to_string(), None)
            .expect("insert");
        assert_eq!(timer.pending(), 1);
        assert_eq!(timer.next_delay(), Some(Duration::from_millis(20)));

        // Removing the minimum moves the deadline back out.
        let b = "b".to_string();
        queue.remove(Ref::Payload(&b)).expect("remove");
        assert_eq!(timer.pending(), 1);
        assert_eq!(timer.next_delay(), Some(Duration::from_millis(80)));

        // Draining the queue disarms.
        queue.clear();
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn firing_drains_everything_due() {
        let (mut queue, clock, timer) = scheduled();
        for millis in [10u64, 20, 300] {
            queue
                .insert(Time::from_millis(millis), format!("m{millis}"), None)
                .expect("insert");
        }
        queue.start();

        clock.set(Time::from_millis(25));
        assert!(timer.fire_next());

        // Both due items went; the far one re-armed for the remaining gap.
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.with_inner(|heap| heap.next_priority()), Some(Time::from_millis(300)));
        assert_eq!(timer.pending(), 1);
        assert_eq!(timer.next_delay(), Some(Duration::from_millis(275)));
    }

    #[test]
    fn stop_cancels_and_preserves_contents() {
        let (mut queue, _clock, timer) = scheduled();
        queue
            .insert(Time::from_millis(50), "a".to_string(), None)
            .expect("insert");
        queue.start();
        assert!(queue.is_running());
        assert_eq!(timer.pending(), 1);

        queue.stop();
        assert!(!queue.is_running());
        assert_eq!(timer.pending(), 0);
        assert_eq!(queue.len(), 1);

        // Restart re-arms from what is still stored.
        queue.start();
        assert_eq!(timer.pending(), 1);
    }

    #[test]
    fn overdue_deadline_arms_with_zero_delay() {
        let (mut queue, clock, timer) = scheduled();
        clock.set(Time::from_millis(500));
        queue
            .insert(Time::from_millis(100), "late".to_string(), None)
            .expect("insert");
        queue.start();

        assert_eq!(timer.next_delay(), Some(Duration::ZERO));
        timer.fire_next();
        assert!(queue.is_empty());
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn manual_poll_rearms_for_the_new_minimum() {
        let (mut queue, _clock, timer) = scheduled();
        queue
            .insert(Time::from_millis(10), "a".to_string(), None)
            .expect("insert");
        queue
            .insert(Time::from_millis(70), "b".to_string(), None)
            .expect("insert");
        queue.start();

        let polled = queue.poll().expect("poll");
        assert_eq!(polled.payload(), "a");
        assert_eq!(timer.pending(), 1);
        assert_eq!(timer.next_delay(), Some(Duration::from_millis(70)));
    }
}
