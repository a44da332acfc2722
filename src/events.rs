//! Mutation-observing decorator and its listener registry.
//!
//! [`EventedQueue`] wraps an inner queue and, after each operation commits,
//! emits a [`QueueEvent`] describing the result. Listeners register against
//! an [`EventEmitter`] — a cloneable handle to a shared listener table — so
//! external code can subscribe without holding the queue itself.
//!
//! Delivery is synchronous, on the thread that performed the mutation, in
//! registration order: listeners for the event's own kind first, then
//! [`EventKind::All`] listeners. Because the mutation is committed before
//! the emit, a panicking listener cannot corrupt queue state; panics are
//! caught, logged at `warn`, and delivery continues.

use crate::error::Result;
use crate::queue::{Entry, PriorityChange, PriorityQueue};
use crate::registry::{Handle, Ref};
use crate::types::ListenerId;
use core::fmt;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// Names of the observable operations, plus the [`EventKind::All`] meta-kind
/// that receives every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// An item was inserted.
    Insert,
    /// The minimum item was polled off.
    Poll,
    /// An addressed item was removed.
    Remove,
    /// An item's priority changed.
    Update,
    /// The queue was emptied.
    Clear,
    /// The minimum item was observed.
    Peek,
    /// A reference resolved to a handle.
    Get,
    /// A reference was found present.
    Has,
    /// Meta-kind: receives every event regardless of kind.
    All,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Insert => "insert",
            Self::Poll => "poll",
            Self::Remove => "remove",
            Self::Update => "update",
            Self::Clear => "clear",
            Self::Peek => "peek",
            Self::Get => "get",
            Self::Has => "has",
            Self::All => "all",
        };
        f.write_str(name)
    }
}

/// An emitted event, carrying the result of the operation it reports.
#[derive(Debug)]
pub enum QueueEvent<P, T> {
    /// `insert` committed; carries the new item's handle.
    Insert(Handle<T>),
    /// `poll` returned an item.
    Poll(Entry<P, T>),
    /// `remove` returned an item.
    Remove(Entry<P, T>),
    /// `set_priority` re-keyed an item.
    Update {
        /// Priority before the update.
        before: P,
        /// Priority after the update.
        after: P,
        /// Handle addressing the item after the update.
        handle: Handle<T>,
    },
    /// `clear` ran; carries how many items were dropped.
    Clear(usize),
    /// `peek` observed the minimum item.
    Peek(Handle<T>),
    /// `get` resolved a reference.
    Get(Handle<T>),
    /// `has` reported true.
    Has,
}

impl<P, T> QueueEvent<P, T> {
    /// The kind this event is delivered under.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Insert(_) => EventKind::Insert,
            Self::Poll(_) => EventKind::Poll,
            Self::Remove(_) => EventKind::Remove,
            Self::Update { .. } => EventKind::Update,
            Self::Clear(_) => EventKind::Clear,
            Self::Peek(_) => EventKind::Peek,
            Self::Get(_) => EventKind::Get,
            Self::Has => EventKind::Has,
        }
    }
}

type Listener<P, T> = Box<dyn FnMut(&QueueEvent<P, T>) + Send>;

struct ListenerEntry<P, T> {
    id: ListenerId,
    once: bool,
    callback: Listener<P, T>,
}

struct EmitterInner<P, T> {
    listeners: HashMap<EventKind, Vec<ListenerEntry<P, T>>>,
    next_id: u64,
}

/// Cloneable handle to a shared listener table.
///
/// All clones observe the same listeners; the queue holds one clone and
/// emits through it, subscribers hold others and register through them.
pub struct EventEmitter<P, T> {
    shared: Arc<Mutex<EmitterInner<P, T>>>,
}

impl<P, T> EventEmitter<P, T> {
    /// Creates an emitter with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(EmitterInner {
                listeners: HashMap::new(),
                next_id: 0,
            })),
        }
    }

    /// Registers a listener for `kind`. Returns the id to pass to
    /// [`EventEmitter::off`].
    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: FnMut(&QueueEvent<P, T>) + Send + 'static,
    {
        self.register(kind, Box::new(callback), false)
    }

    /// Registers a listener that is dropped after its first delivery.
    pub fn once<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: FnMut(&QueueEvent<P, T>) + Send + 'static,
    {
        self.register(kind, Box::new(callback), true)
    }

    /// Removes a listener. Returns false when the id is not registered
    /// under `kind`. Calling this from inside a delivery of the same kind
    /// is a no-op for that kind's in-flight batch; use [`EventEmitter::once`]
    /// for listeners that retire themselves.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut inner = self.lock();
        match inner.listeners.get_mut(&kind) {
            Some(entries) => {
                let before = entries.len();
                entries.retain(|entry| entry.id != id);
                entries.len() != before
            }
            None => false,
        }
    }

    /// Number of listeners registered under `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.lock().listeners.get(&kind).map_or(0, Vec::len)
    }

    /// Delivers `event` to its kind's listeners, then to `All` listeners.
    pub fn emit(&self, event: &QueueEvent<P, T>) {
        self.deliver(event.kind(), event);
        self.deliver(EventKind::All, event);
    }

    fn register(&self, kind: EventKind, callback: Listener<P, T>, once: bool) -> ListenerId {
        let mut inner = self.lock();
        let id = ListenerId::from_raw(inner.next_id);
        inner.next_id += 1;
        inner.listeners.entry(kind).or_default().push(ListenerEntry {
            id,
            once,
            callback,
        });
        id
    }

    fn deliver(&self, slot: EventKind, event: &QueueEvent<P, T>) {
        // Take the batch out of the table so listeners can register or
        // remove without deadlocking against this delivery.
        let mut batch = {
            let mut inner = self.lock();
            match inner.listeners.remove(&slot) {
                Some(entries) if !entries.is_empty() => entries,
                _ => return,
            }
        };

        for entry in &mut batch {
            let outcome = catch_unwind(AssertUnwindSafe(|| (entry.callback)(event)));
            if outcome.is_err() {
                tracing::warn!(kind = %slot, listener = %entry.id, "listener panicked; continuing delivery");
            }
        }
        batch.retain(|entry| !entry.once);

        // Merge back, keeping listeners added mid-delivery after the batch.
        let mut inner = self.lock();
        let newcomers = inner.listeners.remove(&slot).unwrap_or_default();
        batch.extend(newcomers);
        if !batch.is_empty() {
            inner.listeners.insert(slot, batch);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EmitterInner<P, T>> {
        self.shared.lock().expect("listener table poisoned")
    }
}

impl<P, T> Clone for EventEmitter<P, T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P, T> Default for EventEmitter<P, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P, T> fmt::Debug for EventEmitter<P, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        let total: usize = inner.listeners.values().map(Vec::len).sum();
        f.debug_struct("EventEmitter")
            .field("listeners", &total)
            .finish_non_exhaustive()
    }
}

/// Decorator that emits a [`QueueEvent`] after each successful operation.
pub struct EventedQueue<P, T, Q> {
    inner: Q,
    emitter: EventEmitter<P, T>,
}

impl<P, T, Q> EventedQueue<P, T, Q> {
    /// Wraps `inner` with a fresh emitter.
    #[must_use]
    pub fn new(inner: Q) -> Self {
        Self::with_emitter(inner, EventEmitter::new())
    }

    /// Wraps `inner`, emitting through the supplied emitter.
    #[must_use]
    pub const fn with_emitter(inner: Q, emitter: EventEmitter<P, T>) -> Self {
        Self { inner, emitter }
    }

    /// A handle to the emitter, for registering listeners.
    #[must_use]
    pub fn emitter(&self) -> EventEmitter<P, T> {
        self.emitter.clone()
    }

    /// The wrapped queue.
    #[must_use]
    pub fn inner(&self) -> &Q {
        &self.inner
    }
}

impl<P, T, Q> PriorityQueue<P, T> for EventedQueue<P, T, Q>
where
    Q: PriorityQueue<P, T>,
    P: Clone,
{
    fn insert(&mut self, priority: P, payload: T, id: Option<&str>) -> Result<Handle<T>> {
        let handle = self.inner.insert(priority, payload, id)?;
        self.emitter.emit(&QueueEvent::Insert(handle.clone()));
        Ok(handle)
    }

    fn peek(&self) -> Option<Handle<T>> {
        let found = self.inner.peek();
        if let Some(handle) = &found {
            self.emitter.emit(&QueueEvent::Peek(handle.clone()));
        }
        found
    }

    fn next_priority(&self) -> Option<P> {
        self.inner.next_priority()
    }

    fn poll(&mut self) -> Option<Entry<P, T>> {
        let polled = self.inner.poll();
        if let Some(entry) = &polled {
            self.emitter.emit(&QueueEvent::Poll(entry.clone()));
        }
        polled
    }

    fn remove(&mut self, target: Ref<'_, T>) -> Result<Option<Entry<P, T>>> {
        let removed = self.inner.remove(target)?;
        if let Some(entry) = &removed {
            self.emitter.emit(&QueueEvent::Remove(entry.clone()));
        }
        Ok(removed)
    }

    fn set_priority(&mut self, target: Ref<'_, T>, priority: P) -> Result<PriorityChange<P, T>> {
        let change = self.inner.set_priority(target, priority)?;
        if let PriorityChange::Updated { before, after, handle } = &change {
            self.emitter.emit(&QueueEvent::Update {
                before: before.clone(),
                after: after.clone(),
                handle: handle.clone(),
            });
        }
        Ok(change)
    }

    fn get(&self, target: Ref<'_, T>) -> Result<Option<Handle<T>>> {
        let found = self.inner.get(target)?;
        if let Some(handle) = &found {
            self.emitter.emit(&QueueEvent::Get(handle.clone()));
        }
        Ok(found)
    }

    fn has(&self, target: Ref<'_, T>) -> bool {
        let present = self.inner.has(target);
        if present {
            self.emitter.emit(&QueueEvent::Has);
        }
        present
    }

    fn clear(&mut self) -> usize {
        let dropped = self.inner.clear();
        self.emitter.emit(&QueueEvent::Clear(dropped));
        dropped
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

impl<P, T, Q: fmt::Debug> fmt::Debug for EventedQueue<P, T, Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventedQueue")
            .field("inner", &self.inner)
            .field("emitter", &"..")
            .finish()
    }
}
