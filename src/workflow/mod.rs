//! Asynchronous workflow tracking
//!
//! Triggers the engine's demo workflow over HTTP and follows its
//! progress until it reaches a terminal state.

mod tracker;

pub use tracker::*;
