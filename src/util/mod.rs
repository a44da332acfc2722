//! Internal utilities.
//!
//! Kept dependency-free; the arena is the only storage primitive the heap
//! needs.

pub mod arena;

pub use arena::{Arena, ArenaIndex};
