//! The queue interface every layer implements.
//!
//! The crate composes layered wrappers — heap, events, dispatch, scheduler —
//! and each one exposes the same operations by implementing
//! [`PriorityQueue`]. A wrapper stores its inner queue and intercepts only
//! the operations it cares about, delegating the rest.

use crate::error::Result;
use crate::registry::{Handle, Ref};

/// A polled or removed item: the handle plus the priority it held.
pub struct Entry<P, T> {
    /// Priority the item held when it left the queue.
    pub priority: P,
    /// The item's registry handle.
    pub handle: Handle<T>,
}

impl<P, T> Entry<P, T> {
    /// The stored payload.
    #[must_use]
    pub fn payload(&self) -> &T {
        self.handle.payload()
    }

    /// The user-supplied id, when one was given.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.handle.id()
    }
}

impl<P: Clone, T> Clone for Entry<P, T> {
    fn clone(&self) -> Self {
        Self {
            priority: self.priority.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl<P: core::fmt::Debug, T: core::fmt::Debug> core::fmt::Debug for Entry<P, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Entry")
            .field("priority", &self.priority)
            .field("handle", &self.handle)
            .finish()
    }
}

/// Outcome of a priority update.
#[derive(Debug)]
pub enum PriorityChange<P, T> {
    /// The new priority equals the old one; nothing moved.
    Unchanged,
    /// The priority changed. On an increase the item was reinserted and
    /// `handle` is the freshly issued handle (the old one is stale); on a
    /// decrease `handle` is the original.
    Updated {
        /// Priority before the update.
        before: P,
        /// Priority after the update.
        after: P,
        /// Handle addressing the item after the update.
        handle: Handle<T>,
    },
}

impl<P, T> PriorityChange<P, T> {
    /// Returns true when the update was a no-op.
    #[must_use]
    pub const fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged)
    }
}

/// Core queue operations shared by every layer.
///
/// `P` is the priority key (any total order; the scheduler layer fixes it to
/// [`Time`](crate::types::Time)), `T` the payload.
pub trait PriorityQueue<P, T> {
    /// Adds a payload under the given priority, optionally with a unique
    /// user id, and returns its handle.
    fn insert(&mut self, priority: P, payload: T, id: Option<&str>) -> Result<Handle<T>>;

    /// The handle of the minimum-priority item, or `None` when empty.
    fn peek(&self) -> Option<Handle<T>>;

    /// The minimum priority currently stored, or `None` when empty.
    fn next_priority(&self) -> Option<P>;

    /// Removes and returns the minimum-priority item.
    fn poll(&mut self) -> Option<Entry<P, T>>;

    /// Removes the referenced item wherever it sits. A miss returns
    /// `Ok(None)`; a stale handle is an error.
    fn remove(&mut self, target: Ref<'_, T>) -> Result<Option<Entry<P, T>>>;

    /// Re-keys the referenced item. Fails with
    /// [`ErrorKind::NotFound`](crate::ErrorKind::NotFound) when the
    /// reference does not resolve.
    fn set_priority(&mut self, target: Ref<'_, T>, priority: P) -> Result<PriorityChange<P, T>>;

    /// Resolves a reference to its canonical handle.
    fn get(&self, target: Ref<'_, T>) -> Result<Option<Handle<T>>>;

    /// Returns whether the reference resolves; never fails.
    fn has(&self, target: Ref<'_, T>) -> bool;

    /// Empties the queue, returning how many items were dropped.
    fn clear(&mut self) -> usize;

    /// Number of stored items.
    fn len(&self) -> usize;

    /// Returns true when nothing is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
