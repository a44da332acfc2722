//! Error types and the crate's error handling strategy.
//!
//! Errors are explicit and typed: every failure carries an [`ErrorKind`]
//! plus optional context text and an optional source. Misses are not
//! failures — `poll`/`peek` on an empty queue and `remove` on an unknown
//! reference return `None` rather than an error.

use core::fmt;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An insert or register supplied a user id that is already in use.
    DuplicateId,
    /// A payload value is already registered.
    DuplicatePayload,
    /// A handle was supplied that is no longer the registry's canonical
    /// handle for its payload.
    StaleHandle,
    /// A priority update named a reference that did not resolve.
    NotFound,
    /// A required collaborator was missing at construction.
    InvalidConfig,
    /// Internal structure corruption (defensive; unreachable in correct
    /// usage).
    InvariantViolation,
}

/// The error type for queue operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates an error of the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true for a duplicate id or duplicate payload rejection.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::DuplicateId | ErrorKind::DuplicatePayload
        )
    }

    /// Returns true when a supplied handle was stale.
    #[must_use]
    pub const fn is_stale_handle(&self) -> bool {
        matches!(self.kind, ErrorKind::StaleHandle)
    }

    /// Returns true when a reference failed to resolve.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::NotFound)
    }

    /// Attaches context text.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    /// Attaches a source error.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Duplicate-id rejection naming the offending id.
    #[must_use]
    pub fn duplicate_id(id: &str) -> Self {
        Self::new(ErrorKind::DuplicateId).with_context(format!("id {id:?} is already in use"))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Extension trait for attaching context to results.
pub trait ResultExt<T> {
    /// Attach a context string on error.
    fn context(self, ctx: impl Into<String>) -> Result<T>;
    /// Attach context computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(ctx))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_context(f()))
    }
}

/// Specialized result type for queue operations.
pub type Result<T> = core::result::Result<T, Error>;
