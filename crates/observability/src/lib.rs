//! Tracing/logging initialization.

pub mod tracing;

pub use tracing::{LogFormat, init, init_with};
