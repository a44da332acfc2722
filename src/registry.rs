//! Item registry: handle minting, reference resolution, uniqueness.
//!
//! Every stored payload gets exactly one [`Handle`] — an immutable,
//! registry-scoped identity. The registry indexes handles two ways: by the
//! payload value itself and by the optional user-supplied id, so callers can
//! address an item with whichever of the three forms they hold (see [`Ref`]).
//!
//! A handle outlives its entry: removing the entry does not mutate the
//! handle, the registry just stops recognizing it. Such a handle is *stale*
//! and resolving it fails with [`ErrorKind::StaleHandle`].

use crate::error::{Error, ErrorKind, Result};
use crate::types::NodeId;
use core::fmt;
use core::hash::{Hash, Hasher};
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable, registry-issued reference to a stored payload.
///
/// Handles are compared by identity: two handles are equal only if they came
/// from the same registration. The payload and optional id never change for
/// the lifetime of the handle.
pub struct Handle<T> {
    inner: Arc<HandleInner<T>>,
}

struct HandleInner<T> {
    id: Option<Box<str>>,
    payload: T,
    node: NodeId,
}

impl<T> Handle<T> {
    pub(crate) fn new(id: Option<&str>, payload: T, node: NodeId) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: id.map(Box::from),
                payload,
                node,
            }),
        }
    }

    /// The user-supplied id, when one was given at insert.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.inner.id.as_deref()
    }

    /// The stored payload.
    #[must_use]
    pub fn payload(&self) -> &T {
        &self.inner.payload
    }

    pub(crate) fn node(&self) -> NodeId {
        self.inner.node
    }

    /// Returns true when both handles came from the same registration.
    #[must_use]
    pub fn same_handle(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.same_handle(other)
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(Arc::as_ptr(&self.inner) as usize);
    }
}

impl<T: fmt::Debug> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.inner.id)
            .field("payload", &self.inner.payload)
            .field("node", &self.inner.node)
            .finish()
    }
}

/// The three forms a caller may use to address a stored item.
#[derive(Debug)]
pub enum Ref<'a, T> {
    /// The user-supplied id given at insert.
    Id(&'a str),
    /// A handle previously returned by the queue.
    Handle(&'a Handle<T>),
    /// The payload value itself.
    Payload(&'a T),
}

impl<T> Clone for Ref<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Ref<'_, T> {}

impl<'a, T> From<&'a Handle<T>> for Ref<'a, T> {
    fn from(handle: &'a Handle<T>) -> Self {
        Ref::Handle(handle)
    }
}

/// Dual-indexed handle table.
///
/// Indexed by payload value and, for entries that have one, by user id. The
/// id index is a sub-map of the payload index: `len()` counts payloads.
pub struct Registry<T> {
    by_payload: HashMap<T, Handle<T>>,
    by_id: HashMap<Box<str>, Handle<T>>,
}

impl<T> Registry<T>
where
    T: Eq + Hash + Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            by_payload: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    /// Number of registered payloads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_payload.len()
    }

    /// Returns true when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_payload.is_empty()
    }

    /// Stores `handle` in both indexes.
    ///
    /// Fails with [`ErrorKind::DuplicatePayload`] when the payload is already
    /// registered, and with [`ErrorKind::DuplicateId`] when the handle
    /// carries an id that is already in use. On failure nothing is stored.
    pub(crate) fn register(&mut self, handle: Handle<T>) -> Result<()> {
        if self.by_payload.contains_key(handle.payload()) {
            return Err(Error::new(ErrorKind::DuplicatePayload)
                .with_context("payload is already registered"));
        }
        if let Some(id) = handle.id() {
            if self.by_id.contains_key(id) {
                return Err(Error::duplicate_id(id));
            }
            self.by_id.insert(Box::from(id), handle.clone());
        }
        self.by_payload.insert(handle.payload().clone(), handle);
        Ok(())
    }

    /// Drops `handle` from both indexes. Silent when the handle is not the
    /// canonical one (already unregistered, or superseded).
    pub(crate) fn unregister(&mut self, handle: &Handle<T>) {
        match self.by_payload.get(handle.payload()) {
            Some(current) if current.same_handle(handle) => {
                if let Some(id) = handle.id() {
                    self.by_id.remove(id);
                }
                self.by_payload.remove(handle.payload());
            }
            _ => {}
        }
    }

    /// Resolves a reference to its canonical handle.
    ///
    /// Id and payload lookups return `Ok(None)` on a miss. A handle
    /// reference resolves to itself only while it is still the canonical
    /// handle for its payload; otherwise this fails with
    /// [`ErrorKind::StaleHandle`].
    pub fn resolve(&self, target: Ref<'_, T>) -> Result<Option<Handle<T>>> {
        match target {
            Ref::Id(id) => Ok(self.by_id.get(id).cloned()),
            Ref::Payload(payload) => Ok(self.by_payload.get(payload).cloned()),
            Ref::Handle(handle) => match self.by_payload.get(handle.payload()) {
                Some(current) if current.same_handle(handle) => Ok(Some(handle.clone())),
                _ => Err(Error::new(ErrorKind::StaleHandle)
                    .with_context("handle no longer names a registered item")),
            },
        }
    }

    /// Resolves a reference to its payload value.
    pub fn resolve_payload(&self, target: Ref<'_, T>) -> Result<Option<T>> {
        Ok(self.resolve(target)?.map(|h| h.payload().clone()))
    }

    /// Resolves a reference to its user id, when the entry has one.
    pub fn resolve_id(&self, target: Ref<'_, T>) -> Result<Option<String>> {
        Ok(self
            .resolve(target)?
            .and_then(|h| h.id().map(str::to_owned)))
    }

    /// Returns whether the reference resolves. Never fails; a stale handle
    /// simply reports false.
    #[must_use]
    pub fn has(&self, target: Ref<'_, T>) -> bool {
        matches!(self.resolve(target), Ok(Some(_)))
    }

    /// Iterates `(handle, payload)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&Handle<T>, &T)> {
        self.by_payload.iter().map(|(payload, handle)| (handle, payload))
    }

    pub(crate) fn clear(&mut self) {
        self.by_payload.clear();
        self.by_id.clear();
    }
}

impl<T: fmt::Debug> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("len", &self.by_payload.len())
            .field("ids", &self.by_id.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Arena;

    fn node_id(arena: &mut Arena<()>) -> NodeId {
        NodeId::from_arena(arena.alloc_with(|_| ()))
    }

    fn registry_with(entries: &[(&str, Option<&str>)]) -> (Registry<String>, Vec<Handle<String>>) {
        let mut arena = Arena::new();
        let mut registry = Registry::new();
        let mut handles = Vec::new();
        for (payload, id) in entries {
            let handle = Handle::new(*id, (*payload).to_string(), node_id(&mut arena));
            registry.register(handle.clone()).expect("register");
            handles.push(handle);
        }
        (registry, handles)
    }

    #[test]
    fn register_and_resolve_by_all_three_forms() {
        let (registry, handles) = registry_with(&[("alpha", Some("a"))]);
        let handle = &handles[0];

        let by_id = registry.resolve(Ref::Id("a")).expect("resolve");
        assert_eq!(by_id.as_ref(), Some(handle));

        let payload = "alpha".to_string();
        let by_payload = registry.resolve(Ref::Payload(&payload)).expect("resolve");
        assert_eq!(by_payload.as_ref(), Some(handle));

        let by_handle = registry.resolve(Ref::Handle(handle)).expect("resolve");
        assert_eq!(by_handle.as_ref(), Some(handle));
    }

    #[test]
    fn duplicate_payload_rejected() {
        let mut arena = Arena::new();
        let (mut registry, _handles) = registry_with(&[("alpha", None)]);
        let dup = Handle::new(None, "alpha".to_string(), node_id(&mut arena));
        let err = registry.register(dup).expect_err("duplicate payload");
        assert_eq!(err.kind(), ErrorKind::DuplicatePayload);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_id_rejected_without_storing() {
        let mut arena = Arena::new();
        let (mut registry, _handles) = registry_with(&[("alpha", Some("k"))]);
        let dup = Handle::new(Some("k"), "beta".to_string(), node_id(&mut arena));
        let err = registry.register(dup).expect_err("duplicate id");
        assert_eq!(err.kind(), ErrorKind::DuplicateId);

        // The failed registration left no trace of "beta".
        let beta = "beta".to_string();
        assert!(!registry.has(Ref::Payload(&beta)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stale_handle_fails_resolution_but_not_has() {
        let (mut registry, handles) = registry_with(&[("alpha", Some("a"))]);
        let handle = handles[0].clone();
        registry.unregister(&handle);

        let err = registry.resolve(Ref::Handle(&handle)).expect_err("stale");
        assert_eq!(err.kind(), ErrorKind::StaleHandle);
        assert!(!registry.has(Ref::Handle(&handle)));
        assert!(!registry.has(Ref::Id("a")));
    }

    #[test]
    fn unregister_is_silent_on_miss_and_removes_both_indexes() {
        let (mut registry, handles) = registry_with(&[("alpha", Some("a"))]);
        let handle = handles[0].clone();
        registry.unregister(&handle);
        registry.unregister(&handle); // second time is a no-op

        assert!(registry.is_empty());
        assert_eq!(registry.resolve(Ref::Id("a")).expect("resolve"), None);
    }

    #[test]
    fn handles_compare_by_identity() {
        let mut arena = Arena::new();
        let a = Handle::new(None, "same".to_string(), node_id(&mut arena));
        let b = Handle::new(None, "same".to_string(), node_id(&mut arena));
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn derived_resolvers() {
        let (registry, _handles) = registry_with(&[("alpha", Some("a")), ("beta", None)]);
        assert_eq!(
            registry.resolve_payload(Ref::Id("a")).expect("resolve"),
            Some("alpha".to_string())
        );
        let beta = "beta".to_string();
        assert_eq!(
            registry.resolve_id(Ref::Payload(&beta)).expect("resolve"),
            None
        );
        assert_eq!(registry.resolve_id(Ref::Id("missing")).expect("resolve"), None);
    }

    #[test]
    fn iteration_yields_every_pair() {
        let (registry, _handles) = registry_with(&[("alpha", Some("a")), ("beta", Some("b"))]);
        let mut payloads: Vec<_> = registry.iter().map(|(_, p)| p.clone()).collect();
        payloads.sort();
        assert_eq!(payloads, vec!["alpha".to_string(), "beta".to_string()]);
    }
}
