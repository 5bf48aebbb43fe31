//! Core application modules
//!
//! This module contains the core functionality of the supervisor:
//! - Configuration management
//! - Process events
//! - Error types
//! - Log buffering

mod config;
mod error;
mod events;
mod log_buffer;

pub use config::*;
pub use error::*;
pub use events::*;
pub use log_buffer::*;
