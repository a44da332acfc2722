//! Construction-time configuration and the batteries-included facade.
//!
//! [`QueueBuilder`] collects the injected collaborators — time source and
//! timer source are required, the event emitter is optional — and composes
//! the full layer stack:
//!
//! ```text
//! ScheduledQueue ─▶ DispatchQueue ─▶ EventedQueue ─▶ PairingHeap
//! ```
//!
//! The result is a [`ScheduledPriorityQueue`], which carries the assembled
//! stack plus handles to its emitter and consumer stream. Callers wanting a
//! subset of the layers compose the wrappers by hand instead.

use crate::dispatch::{DispatchQueue, DispatchStream};
use crate::error::{Error, ErrorKind, Result};
use crate::events::{EventEmitter, EventedQueue};
use crate::heap::PairingHeap;
use crate::queue::{Entry, PriorityChange, PriorityQueue};
use crate::registry::{Handle, Ref};
use crate::scheduler::{ScheduledQueue, TimeSource, TimerSource};
use crate::types::Time;
use core::fmt;
use core::hash::Hash;
use std::sync::Arc;

type LayerStack<T> = DispatchQueue<Time, T, EventedQueue<Time, T, PairingHeap<Time, T>>>;

/// Builder for a [`ScheduledPriorityQueue`].
///
/// Fails at [`QueueBuilder::build`] with
/// [`ErrorKind::InvalidConfig`] when a required collaborator is missing.
pub struct QueueBuilder<T> {
    clock: Option<Arc<dyn TimeSource>>,
    timer: Option<Arc<dyn TimerSource>>,
    emitter: Option<EventEmitter<Time, T>>,
}

impl<T> QueueBuilder<T> {
    /// Starts an empty configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            clock: None,
            timer: None,
            emitter: None,
        }
    }

    /// Sets the time source (required).
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the timer source (required).
    #[must_use]
    pub fn timer(mut self, timer: Arc<dyn TimerSource>) -> Self {
        self.timer = Some(timer);
        self
    }

    /// Supplies an event emitter to share; a fresh one is created otherwise.
    #[must_use]
    pub fn emitter(mut self, emitter: EventEmitter<Time, T>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Assembles the full layer stack.
    pub fn build(self) -> Result<ScheduledPriorityQueue<T>>
    where
        T: Eq + Hash + Clone + Send + Sync + 'static,
    {
        let clock = self.clock.ok_or_else(|| {
            Error::new(ErrorKind::InvalidConfig).with_context("a time source is required")
        })?;
        let timer = self.timer.ok_or_else(|| {
            Error::new(ErrorKind::InvalidConfig).with_context("a timer source is required")
        })?;
        let emitter = self.emitter.unwrap_or_default();

        let evented = EventedQueue::with_emitter(PairingHeap::new(), emitter.clone());
        let dispatch = DispatchQueue::new(evented);
        let stream = dispatch.stream();
        let sched = ScheduledQueue::new(dispatch, clock, timer);

        Ok(ScheduledPriorityQueue {
            sched,
            emitter,
            stream,
        })
    }
}

impl<T> Default for QueueBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for QueueBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueBuilder")
            .field("clock", &self.clock.is_some())
            .field("timer", &self.timer.is_some())
            .field("emitter", &self.emitter.is_some())
            .finish()
    }
}

/// The assembled scheduler/dispatch/event/heap stack.
///
/// Built by [`QueueBuilder`]. Implements [`PriorityQueue`] like every layer;
/// [`ScheduledPriorityQueue::stream`] and
/// [`ScheduledPriorityQueue::emitter`] hand out the consumer and listener
/// handles.
pub struct ScheduledPriorityQueue<T>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
{
    sched: ScheduledQueue<T, LayerStack<T>>,
    emitter: EventEmitter<Time, T>,
    stream: DispatchStream<Time, T>,
}

impl<T> ScheduledPriorityQueue<T>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Begins dispatching due items.
    pub fn start(&self) {
        self.sched.start();
    }

    /// Halts dispatching; contents and buffered entries are preserved.
    pub fn stop(&self) {
        self.sched.stop();
    }

    /// Whether dispatch is on.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.sched.is_running()
    }

    /// A handle to the shared event emitter.
    #[must_use]
    pub fn emitter(&self) -> EventEmitter<Time, T> {
        self.emitter.clone()
    }

    /// A consumer over dispatched entries. Every call returns a handle onto
    /// the same logical stream; concurrent consumers split the entries.
    #[must_use]
    pub fn stream(&self) -> DispatchStream<Time, T> {
        self.stream.clone()
    }
}

impl<T> PriorityQueue<Time, T> for ScheduledPriorityQueue<T>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn insert(&mut self, priority: Time, payload: T, id: Option<&str>) -> Result<Handle<T>> {
        self.sched.insert(priority, payload, id)
    }

    fn peek(&self) -> Option<Handle<T>> {
        self.sched.peek()
    }

    fn next_priority(&self) -> Option<Time> {
        self.sched.next_priority()
    }

    fn poll(&mut self) -> Option<Entry<Time, T>> {
        self.sched.poll()
    }

    fn remove(&mut self, target: Ref<'_, T>) -> Result<Option<Entry<Time, T>>> {
        self.sched.remove(target)
    }

    fn set_priority(
        &mut self,
        target: Ref<'_, T>,
        priority: Time,
    ) -> Result<PriorityChange<Time, T>> {
        self.sched.set_priority(target, priority)
    }

    fn get(&self, target: Ref<'_, T>) -> Result<Option<Handle<T>>> {
        self.sched.get(target)
    }

    fn has(&self, target: Ref<'_, T>) -> bool {
        self.sched.has(target)
    }

    fn clear(&mut self) -> usize {
        self.sched.clear()
    }

    fn len(&self) -> usize {
        self.sched.len()
    }
}

impl<T> fmt::Debug for ScheduledPriorityQueue<T>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledPriorityQueue")
            .field("len", &self.sched.len())
            .field("running", &self.sched.is_running())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{TestTimer, VirtualClock};

    #[test]
    fn build_requires_clock_and_timer() {
        let err = QueueBuilder::<String>::new().build().expect_err("no clock");
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);

        let err = QueueBuilder::<String>::new()
            .clock(Arc::new(VirtualClock::new()))
            .build()
            .expect_err("no timer");
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn built_stack_wires_all_layers() {
        let timer = Arc::new(TestTimer::new());
        let clock = Arc::new(VirtualClock::new());
        let mut queue = QueueBuilder::new()
            .clock(Arc::clone(&clock) as Arc<dyn crate::scheduler::TimeSource>)
            .timer(Arc::clone(&timer) as Arc<dyn crate::scheduler::TimerSource>)
            .build()
            .expect("build");

        let polls = Arc::new(std::sync::Mutex::new(0u32));
        let sink = Arc::clone(&polls);
        queue
            .emitter()
            .on(crate::events::EventKind::Poll, move |_| {
                *sink.lock().expect("polls") += 1;
            });

        queue
            .insert(Time::from_millis(10), "a".to_string(), Some("a"))
            .expect("insert");
        queue.start();

        clock.set(Time::from_millis(15));
        timer.fire_next();

        // The drain flowed through events and into the stream buffer.
        assert_eq!(*polls.lock().expect("polls"), 1);
        assert_eq!(queue.stream().ready_len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn supplied_emitter_is_shared() {
        let emitter = EventEmitter::new();
        let hits = Arc::new(std::sync::Mutex::new(0u32));
        let sink = Arc::clone(&hits);
        emitter.on(crate::events::EventKind::Insert, move |_| {
            *sink.lock().expect("hits") += 1;
        });

        let mut queue = QueueBuilder::new()
            .clock(Arc::new(VirtualClock::new()))
            .timer(Arc::new(TestTimer::new()))
            .emitter(emitter)
            .build()
            .expect("build");
        queue
            .insert(Time::from_millis(1), "a".to_string(), None)
            .expect("insert");
        assert_eq!(*hits.lock().expect("hits"), 1);
    }
}
