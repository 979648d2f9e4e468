//! Step definitions for pipeline run behaviour scenarios.

pub mod world;

mod given;
mod then;
