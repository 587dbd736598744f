//! Synthetic input generation.

pub mod sample;

pub use sample::*;
