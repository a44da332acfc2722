//! Two-pass pairing heap over a slot arena.
//!
//! The heap is a multi-way tree in which every parent's priority is at or
//! below its children's. Nodes live in a generational [`Arena`] and point at
//! each other with intrusive `child`/`sibling`/`prev` indices:
//!
//! - a parent's children form a singly linked list through `sibling`;
//! - the first child's `prev` points at the parent, every later child's
//!   `prev` at its left sibling;
//! - the root's `prev` is `None`.
//!
//! Three private primitives carry the whole structure. `link` makes the
//! larger-priority of two roots the first child of the other (ties keep the
//! first argument on top). `cut` detaches a non-root node together with its
//! subtree. `combine_siblings` folds an orphaned child list back into one
//! tree: a left-to-right pass links adjacent pairs, then a right-to-left
//! fold links the pairs into a single root.
//!
//! Every stored payload is registered in the embedded [`Registry`], so
//! `heap.len() == registry.len()` at all times.

use crate::error::{Error, ErrorKind, Result};
use crate::queue::{Entry, PriorityChange, PriorityQueue};
use crate::registry::{Handle, Ref, Registry};
use crate::types::NodeId;
use crate::util::Arena;
use core::fmt;
use core::hash::Hash;

struct Node<P, T> {
    priority: P,
    handle: Handle<T>,
    child: Option<NodeId>,
    sibling: Option<NodeId>,
    prev: Option<NodeId>,
}

/// Addressable min-heap with O(1) insert and amortized O(log n) delete-min.
///
/// Items are addressed through the three [`Ref`] forms. `P` may be any total
/// order; callers that want a custom order wrap their key type (for a
/// max-heap, [`core::cmp::Reverse`]).
pub struct PairingHeap<P, T> {
    arena: Arena<Node<P, T>>,
    root: Option<NodeId>,
    registry: Registry<T>,
}

impl<P, T> PairingHeap<P, T>
where
    P: Ord + Clone,
    T: Eq + Hash + Clone,
{
    /// Creates an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self {
            arena: Arena::new(),
            root: None,
            registry: Registry::new(),
        }
    }

    /// Creates an empty heap with room for `capacity` nodes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            arena: Arena::with_capacity(capacity),
            root: None,
            registry: Registry::new(),
        }
    }

    /// The embedded registry, for iteration and derived lookups.
    #[must_use]
    pub fn registry(&self) -> &Registry<T> {
        &self.registry
    }

    fn node(&self, id: NodeId) -> &Node<P, T> {
        self.arena.get(id.arena()).expect("heap node vanished")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<P, T> {
        self.arena.get_mut(id.arena()).expect("heap node vanished")
    }

    /// Merges two detached roots; the one with the larger priority becomes
    /// the first child of the other. Ties keep `a` on top.
    fn link(&mut self, a: NodeId, b: NodeId) -> NodeId {
        let b_wins = self.node(b).priority < self.node(a).priority;
        let (top, bottom) = if b_wins { (b, a) } else { (a, b) };

        let old_first = self.node(top).child;
        {
            let n = self.node_mut(bottom);
            n.prev = Some(top);
            n.sibling = old_first;
        }
        if let Some(first) = old_first {
            self.node_mut(first).prev = Some(bottom);
        }
        self.node_mut(top).child = Some(bottom);
        top
    }

    /// Detaches a non-root node (with its subtree) from its parent/sibling
    /// list and clears its `prev`/`sibling` links.
    fn cut(&mut self, id: NodeId) {
        let (prev, sibling) = {
            let n = self.node(id);
            (n.prev, n.sibling)
        };
        let prev = prev.expect("cut called on a node without a predecessor");

        if self.node(prev).child == Some(id) {
            self.node_mut(prev).child = sibling;
        } else {
            self.node_mut(prev).sibling = sibling;
        }
        if let Some(sib) = sibling {
            self.node_mut(sib).prev = Some(prev);
        }

        let n = self.node_mut(id);
        n.prev = None;
        n.sibling = None;
    }

    /// Folds an orphaned child list into a single root.
    fn combine_siblings(&mut self, first: NodeId) -> NodeId {
        // Pass 1, left to right: link adjacent pairs. An odd trailing node
        // joins the pair list alone.
        let mut pairs = Vec::new();
        let mut cursor = Some(first);
        while let Some(a) = cursor {
            let b = self.node(a).sibling;
            cursor = b.and_then(|b| self.node(b).sibling);

            let n = self.node_mut(a);
            n.prev = None;
            n.sibling = None;

            match b {
                Some(b) => {
                    let n = self.node_mut(b);
                    n.prev = None;
                    n.sibling = None;
                    pairs.push(self.link(a, b));
                }
                None => pairs.push(a),
            }
        }

        // Pass 2, right to left: fold the pairs into one root.
        let mut merged = pairs.pop().expect("combine_siblings on an empty list");
        while let Some(left) = pairs.pop() {
            merged = self.link(left, merged);
        }
        merged
    }

    /// Structural removal shared by `poll`, `remove`, and the priority
    /// increase path: detach the node, reattach its children, unregister.
    fn remove_node(&mut self, id: NodeId) -> Entry<P, T> {
        if self.root == Some(id) {
            let child = self.node(id).child;
            self.root = child.map(|c| self.combine_siblings(c));
        } else {
            self.cut(id);
            if let Some(child) = self.node(id).child {
                self.node_mut(id).child = None;
                let subtree = self.combine_siblings(child);
                let root = self.root.expect("non-root node in a rootless heap");
                self.root = Some(self.link(root, subtree));
            }
        }

        let node = self
            .arena
            .free(id.arena())
            .expect("removed node missing from arena");
        self.registry.unregister(&node.handle);
        Entry {
            priority: node.priority,
            handle: node.handle,
        }
    }

    fn resolve_node(&self, target: Ref<'_, T>) -> Result<Option<NodeId>> {
        Ok(self.registry.resolve(target)?.map(|h| h.node()))
    }
}

impl<P, T> PriorityQueue<P, T> for PairingHeap<P, T>
where
    P: Ord + Clone,
    T: Eq + Hash + Clone,
{
    fn insert(&mut self, priority: P, payload: T, id: Option<&str>) -> Result<Handle<T>> {
        let node_id = self.arena.alloc_with(|idx| Node {
            priority,
            handle: Handle::new(id, payload, NodeId::from_arena(idx)),
            child: None,
            sibling: None,
            prev: None,
        });
        let node_id = NodeId::from_arena(node_id);
        let handle = self.node(node_id).handle.clone();

        // A rejected registration must leave no trace of the node.
        if let Err(err) = self.registry.register(handle.clone()) {
            self.arena.free(node_id.arena());
            return Err(err);
        }

        self.root = Some(match self.root {
            Some(root) => self.link(root, node_id),
            None => node_id,
        });
        Ok(handle)
    }

    fn peek(&self) -> Option<Handle<T>> {
        self.root.map(|root| self.node(root).handle.clone())
    }

    fn next_priority(&self) -> Option<P> {
        self.root.map(|root| self.node(root).priority.clone())
    }

    fn poll(&mut self) -> Option<Entry<P, T>> {
        let root = self.root?;
        Some(self.remove_node(root))
    }

    fn remove(&mut self, target: Ref<'_, T>) -> Result<Option<Entry<P, T>>> {
        match self.resolve_node(target)? {
            Some(id) => Ok(Some(self.remove_node(id))),
            None => Ok(None),
        }
    }

    fn set_priority(&mut self, target: Ref<'_, T>, priority: P) -> Result<PriorityChange<P, T>> {
        let handle = self
            .registry
            .resolve(target)?
            .ok_or_else(|| {
                Error::new(ErrorKind::NotFound).with_context("priority update target not found")
            })?;
        let id = handle.node();
        if !self.arena.contains(id.arena()) {
            return Err(Error::new(ErrorKind::InvariantViolation)
                .with_context("registered handle has no heap node"));
        }

        let before = self.node(id).priority.clone();
        match priority.cmp(&before) {
            core::cmp::Ordering::Equal => Ok(PriorityChange::Unchanged),
            core::cmp::Ordering::Less => {
                // Moving toward the front: re-key in place, then cut the
                // node loose and link it against the root. A re-keyed root
                // stays where it is.
                self.node_mut(id).priority = priority.clone();
                if self.root != Some(id) {
                    self.cut(id);
                    let root = self.root.expect("non-root node in a rootless heap");
                    self.root = Some(self.link(root, id));
                }
                Ok(PriorityChange::Updated {
                    before,
                    after: priority,
                    handle,
                })
            }
            core::cmp::Ordering::Greater => {
                // Moving toward the back: remove and reinsert. The user id
                // carries over; the handle does not — the old one goes
                // stale.
                let removed = self.remove_node(id);
                let user_id = removed.handle.id().map(str::to_owned);
                let payload = removed.handle.payload().clone();
                let new_handle = self.insert(priority.clone(), payload, user_id.as_deref())?;
                Ok(PriorityChange::Updated {
                    before,
                    after: priority,
                    handle: new_handle,
                })
            }
        }
    }

    fn get(&self, target: Ref<'_, T>) -> Result<Option<Handle<T>>> {
        self.registry.resolve(target)
    }

    fn has(&self, target: Ref<'_, T>) -> bool {
        self.registry.has(target)
    }

    fn clear(&mut self) -> usize {
        let dropped = self.registry.len();
        self.arena.clear();
        self.registry.clear();
        self.root = None;
        dropped
    }

    fn len(&self) -> usize {
        self.registry.len()
    }
}

impl<P, T> Default for PairingHeap<P, T>
where
    P: Ord + Clone,
    T: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P: fmt::Debug, T: fmt::Debug> fmt::Debug for PairingHeap<P, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingHeap")
            .field("len", &self.arena.len())
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}
