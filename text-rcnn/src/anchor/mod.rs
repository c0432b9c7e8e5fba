//! Anchor grid generation and anchor-to-ground-truth matching.

pub use grid::*;
pub mod grid;

pub use matcher::*;
pub mod matcher;
