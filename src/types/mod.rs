//! Core types shared across layers.
//!
//! - [`Time`]: instant type used for scheduler-layer priorities
//! - [`NodeId`]: generation-checked identity of a heap node
//! - [`ListenerId`]: identity of a registered event listener

pub mod id;

pub use id::{ListenerId, NodeId, Time};
