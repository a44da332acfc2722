//! Tempoq: an in-process scheduled priority queue.
//!
//! # Overview
//!
//! Tempoq stores payloads under priorities in an addressable pairing heap
//! and, when asked, dispatches them on deadline: priorities become instants,
//! a single injected timer fires when the earliest one elapses, and every
//! due item is polled off — in strict priority order — into an async stream
//! that any number of concurrent consumers share.
//!
//! Four pieces interlock:
//!
//! - a **registry** gives every stored payload a stable [`Handle`] and
//!   resolves the three reference forms ([`Ref`]: id, handle, payload);
//! - a **pairing heap** provides O(1) insert, amortized O(log n)
//!   delete-min, and cheap re-keying, addressed through those handles;
//! - a **scheduler** keeps exactly one timer armed for the current
//!   minimum's deadline and drains everything due when it fires;
//! - **events** and a **dispatch stream** observe each mutation and carry
//!   polled items to consumers, in that order.
//!
//! # Layering
//!
//! Each concern is a wrapper implementing [`PriorityQueue`]; the
//! [`QueueBuilder`] composes the full stack:
//!
//! ```text
//! ScheduledQueue ─▶ DispatchQueue ─▶ EventedQueue ─▶ PairingHeap
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tempoq::scheduler::{TestTimer, VirtualClock};
//! use tempoq::{PriorityQueue, QueueBuilder, Time};
//!
//! let clock = Arc::new(VirtualClock::new());
//! let timer = Arc::new(TestTimer::new());
//! let mut queue = QueueBuilder::new()
//!     .clock(clock.clone())
//!     .timer(timer.clone())
//!     .build()
//!     .expect("clock and timer supplied");
//!
//! queue.insert(Time::from_millis(50), "soon".to_string(), None)?;
//! queue.insert(Time::from_millis(900), "later".to_string(), None)?;
//! queue.start();
//!
//! // Deterministic dispatch: advance the clock, fire the timer.
//! clock.set(Time::from_millis(60));
//! timer.fire_next();
//! assert_eq!(queue.stream().ready_len(), 1);
//! assert_eq!(queue.len(), 1);
//! # Ok::<(), tempoq::Error>(())
//! ```
//!
//! # Concurrency
//!
//! A queue instance serializes all operations — user calls and timer
//! callbacks — on one mutex. The only suspension point is a consumer's
//! `next()` on an empty buffer. Handles are immutable and freely shareable.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod heap;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod types;
pub mod util;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{QueueBuilder, ScheduledPriorityQueue};
pub use dispatch::{DispatchQueue, DispatchStream, NextEntry, Stream};
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use events::{EventEmitter, EventKind, EventedQueue, QueueEvent};
pub use heap::PairingHeap;
pub use queue::{Entry, PriorityChange, PriorityQueue};
pub use registry::{Handle, Ref, Registry};
pub use scheduler::ScheduledQueue;
pub use types::{ListenerId, NodeId, Time};
