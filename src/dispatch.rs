//! Async consumer stream over polled results.
//!
//! [`DispatchQueue`] decorates `poll` only: every polled entry is appended
//! to a shared ready buffer and one parked consumer is woken. Consumers
//! iterate through [`DispatchStream`] — all clones of a queue's stream share
//! the one buffer, so N concurrent consumers split the work and each entry
//! is delivered to exactly one of them. A single consumer always sees its
//! items in poll order.
//!
//! `next()` resolves immediately while the buffer is non-empty and parks a
//! waker otherwise. Parked waits survive a scheduler stop and resume when
//! dispatch restarts. Dropping the queue closes the buffer: parked and
//! future `next()` calls resolve to `None` once the buffer drains.
//!
//! # Cancel safety
//!
//! A consumer dropped mid-wait unparks cleanly. If it had already absorbed
//! a wakeup, the wakeup is handed to another parked consumer, so no entry
//! strands in the buffer while someone waits.

use crate::error::Result;
use crate::queue::{Entry, PriorityChange, PriorityQueue};
use crate::registry::{Handle, Ref};
use core::fmt;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

/// Minimal async stream: an `Iterator` whose `next` may suspend.
pub trait Stream {
    /// The values the stream yields.
    type Item;

    /// Attempts to pull the next value, registering the caller's waker when
    /// none is ready yet. `Ready(None)` means the stream is finished.
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>>;
}

struct Parked {
    waker: Option<Waker>,
    /// Set when a producer picked this slot's waker; the consumer owes the
    /// buffer a visit (or a handoff, if it drops instead).
    woken: bool,
}

struct BufferState<P, T> {
    ready: VecDeque<Entry<P, T>>,
    parked: Vec<Parked>,
    closed: bool,
}

struct SharedBuffer<P, T> {
    state: Mutex<BufferState<P, T>>,
}

impl<P, T> SharedBuffer<P, T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(BufferState {
                ready: VecDeque::new(),
                parked: Vec::new(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BufferState<P, T>> {
        self.state.lock().expect("dispatch buffer poisoned")
    }

    /// Appends a polled entry and picks one parked consumer to wake.
    fn push(&self, entry: Entry<P, T>) {
        let waker = {
            let mut state = self.lock();
            state.ready.push_back(entry);
            take_one_waker(&mut state)
        };
        // Wake outside the lock so the consumer can immediately re-enter.
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Marks the buffer closed and wakes everyone still parked.
    fn close(&self) {
        let wakers: Vec<Waker> = {
            let mut state = self.lock();
            state.closed = true;
            state
                .parked
                .iter_mut()
                .filter_map(|slot| {
                    slot.woken = true;
                    slot.waker.take()
                })
                .collect()
        };
        for waker in wakers {
            waker.wake();
        }
    }
}

fn take_one_waker<P, T>(state: &mut BufferState<P, T>) -> Option<Waker> {
    for slot in &mut state.parked {
        if !slot.woken {
            if let Some(waker) = slot.waker.take() {
                slot.woken = true;
                return Some(waker);
            }
        }
    }
    None
}

/// Consumer handle over the shared ready buffer.
///
/// Cloning yields another consumer of the *same* logical stream; entries are
/// split between clones, never duplicated.
pub struct DispatchStream<P, T> {
    shared: Arc<SharedBuffer<P, T>>,
    slot: Option<usize>,
}

impl<P, T> DispatchStream<P, T> {
    /// Resolves to the next dispatched entry, or `None` once the queue has
    /// been dropped and the buffer drained.
    pub fn next(&mut self) -> NextEntry<'_, P, T> {
        NextEntry { stream: self }
    }

    /// Entries currently buffered and not yet claimed by any consumer.
    #[must_use]
    pub fn ready_len(&self) -> usize {
        self.shared.lock().ready.len()
    }

    /// Clears this consumer's parked slot. With the state already locked.
    fn release_slot(&mut self, state: &mut BufferState<P, T>) {
        if let Some(index) = self.slot.take() {
            let absorbed_wakeup = {
                let slot = &mut state.parked[index];
                let absorbed = slot.woken && slot.waker.is_none();
                slot.waker = None;
                slot.woken = false;
                absorbed
            };
            // Trailing empty slots can be dropped; earlier indices stay
            // stable for the consumers that hold them.
            while state
                .parked
                .last()
                .is_some_and(|slot| slot.waker.is_none() && !slot.woken)
            {
                state.parked.pop();
            }
            // Hand an absorbed wakeup to someone else if work remains.
            if absorbed_wakeup && !state.ready.is_empty() {
                if let Some(waker) = take_one_waker(state) {
                    waker.wake();
                }
            }
        }
    }
}

impl<P, T> Stream for DispatchStream<P, T> {
    type Item = Entry<P, T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let shared = Arc::clone(&this.shared);
        let mut state = shared.lock();

        if let Some(entry) = state.ready.pop_front() {
            this.release_slot(&mut state);
            return Poll::Ready(Some(entry));
        }
        if state.closed {
            this.release_slot(&mut state);
            return Poll::Ready(None);
        }

        match this.slot {
            Some(index) => {
                let slot = &mut state.parked[index];
                slot.woken = false;
                slot.waker = Some(cx.waker().clone());
            }
            None => {
                state.parked.push(Parked {
                    waker: Some(cx.waker().clone()),
                    woken: false,
                });
                this.slot = Some(state.parked.len() - 1);
            }
        }
        Poll::Pending
    }
}

impl<P, T> Clone for DispatchStream<P, T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            slot: None,
        }
    }
}

impl<P, T> Drop for DispatchStream<P, T> {
    fn drop(&mut self) {
        if self.slot.is_some() {
            let shared = Arc::clone(&self.shared);
            let mut state = shared.lock();
            self.release_slot(&mut state);
        }
    }
}

impl<P, T> fmt::Debug for DispatchStream<P, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchStream")
            .field("parked", &self.slot.is_some())
            .finish_non_exhaustive()
    }
}

/// Future returned by [`DispatchStream::next`].
pub struct NextEntry<'a, P, T> {
    stream: &'a mut DispatchStream<P, T>,
}

impl<P, T> Future for NextEntry<'_, P, T> {
    type Output = Option<Entry<P, T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut *this.stream).poll_next(cx)
    }
}

/// Decorator that feeds every polled entry into the shared ready buffer.
pub struct DispatchQueue<P, T, Q> {
    inner: Q,
    shared: Arc<SharedBuffer<P, T>>,
}

impl<P, T, Q> DispatchQueue<P, T, Q> {
    /// Wraps `inner` with an empty ready buffer.
    #[must_use]
    pub fn new(inner: Q) -> Self {
        Self {
            inner,
            shared: Arc::new(SharedBuffer::new()),
        }
    }

    /// A consumer over this queue's dispatched entries. Every call returns
    /// a handle onto the same logical stream.
    #[must_use]
    pub fn stream(&self) -> DispatchStream<P, T> {
        DispatchStream {
            shared: Arc::clone(&self.shared),
            slot: None,
        }
    }

    /// The wrapped queue.
    #[must_use]
    pub fn inner(&self) -> &Q {
        &self.inner
    }
}

impl<P, T, Q> PriorityQueue<P, T> for DispatchQueue<P, T, Q>
where
    Q: PriorityQueue<P, T>,
    P: Clone,
{
    fn insert(&mut self, priority: P, payload: T, id: Option<&str>) -> Result<Handle<T>> {
        self.inner.insert(priority, payload, id)
    }

    fn peek(&self) -> Option<Handle<T>> {
        self.inner.peek()
    }

    fn next_priority(&self) -> Option<P> {
        self.inner.next_priority()
    }

    fn poll(&mut self) -> Option<Entry<P, T>> {
        let polled = self.inner.poll();
        if let Some(entry) = &polled {
            // The inner layers have finished their side effects (events
            // included) by the time the entry lands in the buffer, so a
            // consumer observing it has proof the poll event fired.
            self.shared.push(entry.clone());
        }
        polled
    }

    fn remove(&mut self, target: Ref<'_, T>) -> Result<Option<Entry<P, T>>> {
        self.inner.remove(target)
    }

    fn set_priority(&mut self, target: Ref<'_, T>, priority: P) -> Result<PriorityChange<P, T>> {
        self.inner.set_priority(target, priority)
    }

    fn get(&self, target: Ref<'_, T>) -> Result<Option<Handle<T>>> {
        self.inner.get(target)
    }

    fn has(&self, target: Ref<'_, T>) -> bool {
        self.inner.has(target)
    }

    fn clear(&mut self) -> usize {
        self.inner.clear()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

impl<P, T, Q> Drop for DispatchQueue<P, T, Q> {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl<P, T, Q: fmt::Debug> fmt::Debug for DispatchQueue<P, T, Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("inner", &self.inner)
            .field("buffered", &self.shared.lock().ready.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::PairingHeap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;

    type Queue = DispatchQueue<u64, String, PairingHeap<u64, String>>;

    struct CountingWaker {
        wakes: AtomicUsize,
    }

    impl CountingWaker {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                wakes: AtomicUsize::new(0),
            })
        }

        fn count(&self) -> usize {
            self.wakes.load(Ordering::SeqCst)
        }
    }

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.wakes.fetch_add(1, Ordering::SeqCst);
        }

        fn wake_by_ref(self: &Arc<Self>) {
            self.wakes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn poll_once<F: Future + Unpin>(fut: &mut F, waker: &Waker) -> Poll<F::Output> {
        let mut cx = Context::from_waker(waker);
        Pin::new(fut).poll(&mut cx)
    }

    fn queue_with(priorities: &[u64]) -> Queue {
        crate::test_utils::init_test_logging();
        let mut queue = Queue::new(PairingHeap::new());
        for p in priorities {
            queue.insert(*p, format!("item-{p}"), None).expect("insert");
        }
        queue
    }

    #[test]
    fn buffered_entries_resolve_without_waiting() {
        let mut queue = queue_with(&[2, 1]);
        let mut stream = queue.stream();
        queue.poll();
        queue.poll();
        assert_eq!(stream.ready_len(), 2);

        let waker: Waker = CountingWaker::new().into();
        let first = poll_once(&mut stream.next(), &waker);
        let second = poll_once(&mut stream.next(), &waker);

        // Poll order, which is ascending priority.
        assert!(matches!(&first, Poll::Ready(Some(e)) if e.payload() == "item-1"));
        assert!(matches!(&second, Poll::Ready(Some(e)) if e.payload() == "item-2"));
        assert_eq!(stream.ready_len(), 0);
    }

    #[test]
    fn empty_buffer_parks_until_poll() {
        let mut queue = queue_with(&[5]);
        let mut stream = queue.stream();

        let source = CountingWaker::new();
        let waker: Waker = Arc::clone(&source).into();
        let mut next = stream.next();
        assert!(poll_once(&mut next, &waker).is_pending());
        assert_eq!(source.count(), 0);

        queue.poll();
        assert_eq!(source.count(), 1);
        let resolved = poll_once(&mut next, &waker);
        assert!(matches!(&resolved, Poll::Ready(Some(e)) if e.payload() == "item-5"));
    }

    #[test]
    fn each_entry_goes_to_one_consumer() {
        let mut queue = queue_with(&[1, 2]);
        let mut c1 = queue.stream();
        let mut c2 = queue.stream();

        let w1 = CountingWaker::new();
        let w2 = CountingWaker::new();
        let waker1: Waker = Arc::clone(&w1).into();
        let waker2: Waker = Arc::clone(&w2).into();

        let mut n1 = c1.next();
        let mut n2 = c2.next();
        assert!(poll_once(&mut n1, &waker1).is_pending());
        assert!(poll_once(&mut n2, &waker2).is_pending());

        queue.poll();
        queue.poll();

        // One wake each: the producer never double-delivers.
        assert_eq!(w1.count(), 1);
        assert_eq!(w2.count(), 1);

        let r1 = poll_once(&mut n1, &waker1);
        let r2 = poll_once(&mut n2, &waker2);
        let mut payloads = Vec::new();
        for r in [r1, r2] {
            let Poll::Ready(Some(entry)) = r else {
                panic!("consumer did not resolve");
            };
            payloads.push(entry.payload().clone());
        }
        payloads.sort();
        assert_eq!(payloads, vec!["item-1", "item-2"]);
    }

    #[test]
    fn dropped_waiter_hands_wakeup_to_next_consumer() {
        let mut queue = queue_with(&[1]);
        let mut c1 = queue.stream();
        let mut c2 = queue.stream();

        let w1 = CountingWaker::new();
        let w2 = CountingWaker::new();
        let waker1: Waker = Arc::clone(&w1).into();
        let waker2: Waker = Arc::clone(&w2).into();

        {
            let mut n1 = c1.next();
            assert!(poll_once(&mut n1, &waker1).is_pending());
        }
        let mut n2 = c2.next();
        assert!(poll_once(&mut n2, &waker2).is_pending());

        // c1 absorbed the wakeup for this poll, then bailed out.
        queue.poll();
        assert_eq!(w1.count(), 1);
        drop(c1);

        // The handoff reached c2, and the entry is still claimable.
        assert_eq!(w2.count(), 1);
        let resolved = poll_once(&mut n2, &waker2);
        assert!(matches!(&resolved, Poll::Ready(Some(e)) if e.payload() == "item-1"));
    }

    #[test]
    fn queue_drop_closes_the_stream() {
        let mut queue = queue_with(&[3]);
        let mut stream = queue.stream();
        queue.poll();
        drop(queue);

        let waker: Waker = CountingWaker::new().into();
        // Buffered entry still drains, then the stream reports finished.
        let first = poll_once(&mut stream.next(), &waker);
        assert!(matches!(&first, Poll::Ready(Some(e)) if e.payload() == "item-3"));
        let second = poll_once(&mut stream.next(), &waker);
        assert!(matches!(second, Poll::Ready(None)));
    }

    #[test]
    fn parked_consumer_wakes_on_queue_drop() {
        let queue = queue_with(&[]);
        let mut stream = queue.stream();

        let source = CountingWaker::new();
        let waker: Waker = Arc::clone(&source).into();
        let mut next = stream.next();
        assert!(poll_once(&mut next, &waker).is_pending());

        drop(queue);
        assert_eq!(source.count(), 1);
        assert!(matches!(poll_once(&mut next, &waker), Poll::Ready(None)));
    }

    #[test]
    fn other_operations_bypass_the_buffer() {
        let mut queue = queue_with(&[1, 2]);
        let stream = queue.stream();
        let two = "item-2".to_string();
        queue.remove(Ref::Payload(&two)).expect("remove");
        queue.clear();
        assert_eq!(stream.ready_len(), 0);
    }
}
