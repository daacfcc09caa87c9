//! Shared utilities.

pub mod duration;

pub use duration::{format_delay, parse_delay};
