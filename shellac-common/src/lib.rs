//! Shared types for the shellac cleanup engine
//!
//! Carries the pieces both the engine library and the binary need:
//! the common error type, TOML configuration, and the event bus used
//! for progress broadcasting.

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
