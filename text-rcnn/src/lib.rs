//! The building blocks of an anchor-based two-stage text region detector.

mod common;

pub mod anchor;
pub mod codec;
pub mod config;
pub mod loss;
pub mod model;
pub mod project;
pub mod suppress;
