//! Terminal reporting for the `cf` commands.

pub mod format;

pub use format::*;
